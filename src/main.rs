use burn::tensor::backend::AutodiffBackend;
use lenet_mnist::backend::{MainAutoBackend, MainDevice};
use lenet_mnist::prelude::*;

fn init_logger() {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.filter_level(log::LevelFilter::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

pub fn launch<AutoB>(training_config: TrainingConfig, model_config: LeNetConfig) -> Result<()>
where
    AutoB: AutodiffBackend + MainDevice,
{
    let device = AutoB::main_device();
    log::info!(
        "training into {:?} with data from {:?}",
        training_config.model_dir,
        training_config.data_dir
    );

    let mut estimator = Estimator::<AutoB>::new(training_config, model_config, device)?;
    let results = estimator.train_and_evaluate()?;

    if let Some(last) = results.last() {
        log::info!(
            "accuracy = {:.4}, global_step = {}, loss = {:.6}",
            last.accuracy,
            last.global_step,
            last.loss
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_logger();

    let app_args = AppArgs::parse()?;
    let training_config = app_args.resolve_training_config()?;
    let model_config = app_args.resolve_model_config(&training_config.model_dir)?;

    launch::<MainAutoBackend>(training_config, model_config)?;
    Ok(())
}
