//! Train and evaluate drivers over a model directory.
//!
//! Every call starts from the latest checkpoint in the model directory, so a
//! `train` followed by `evaluate` (or a fresh process) sees the same weights.

use crate::checkpoint::{CheckpointState, ModelDir};
use crate::config::TrainingConfig;
use crate::dataset::{MnistBatch, MnistBatcher, MnistDataset, Split};
use crate::error::{Error, Result};
use crate::hooks::{LoggingHook, StepInfo, TrainingHook};
use crate::model::{LeNet, LeNetConfig};
use crate::timer::Timer;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder, Progress};
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::{AccuracyMetric, Adaptor, LossMetric, Metric, MetricMetadata, Numeric};
use std::sync::Arc;

type Dataloader<B> = Arc<dyn DataLoader<B, MnistBatch<B>> + 'static>;

/// Which pass the model function is assembling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Loss, streaming accuracy and an optimizer step per batch.
    Train,
    /// Loss and accuracy only, on the non-autodiff backend.
    Eval,
}

impl Mode {
    fn split(self) -> Split {
        match self {
            Mode::Train => Split::Train,
            Mode::Eval => Split::Test,
        }
    }
}

/// Outcome of one `train` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainSummary {
    pub global_step: usize,
    pub steps: usize,
    pub loss: f64,
    pub accuracy: f64,
}

/// Outcome of one `evaluate` call, also written as `eval_results.json`.
#[derive(Config, Debug)]
pub struct EvalResults {
    /// Fraction of correct predictions, in `[0, 1]`.
    pub accuracy: f64,
    /// Mean loss over all examples.
    pub loss: f64,
    pub global_step: usize,
    pub num_examples: usize,
}

// burn's accuracy metric reports percentages
fn fraction(percent: f64) -> f64 {
    percent / 100.0
}

// one train or evaluate call is a single epoch for the metrics
fn metric_metadata(items_total: usize, lr: f64) -> MetricMetadata {
    MetricMetadata {
        progress: Progress::new(0, items_total),
        epoch: 1,
        epoch_total: 1,
        iteration: 0,
        lr: Some(lr),
    }
}

pub struct Estimator<AutoB: AutodiffBackend> {
    config: TrainingConfig,
    model_config: LeNetConfig,
    model_dir: ModelDir,
    device: AutoB::Device,
    train_data: Option<Arc<MnistDataset>>,
    eval_data: Option<Arc<MnistDataset>>,
}

impl<AutoB: AutodiffBackend> Estimator<AutoB> {
    /// Prepares the model directory and persists both configurations into it.
    pub fn new(
        config: TrainingConfig,
        model_config: LeNetConfig,
        device: AutoB::Device,
    ) -> Result<Self> {
        let model_dir = ModelDir::new(config.model_dir.clone());
        model_dir.create()?;
        model_dir.save_training_config(&config)?;
        model_dir.save_model_config(&model_config)?;

        AutoB::seed(&device, config.seed);

        Ok(Self {
            config,
            model_config,
            model_dir,
            device,
            train_data: None,
            eval_data: None,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn model_dir(&self) -> &ModelDir {
        &self.model_dir
    }

    /// Global step of the latest checkpoint, `0` when nothing was saved yet.
    pub fn global_step(&self) -> Result<usize> {
        Ok(self
            .model_dir
            .load_state()?
            .map(|state| state.global_step)
            .unwrap_or(0))
    }

    /// Split for `mode`, read from disk once then kept in memory.
    fn dataset(&mut self, mode: Mode) -> Result<Arc<MnistDataset>> {
        let slot = match mode {
            Mode::Train => &mut self.train_data,
            Mode::Eval => &mut self.eval_data,
        };
        if let Some(dataset) = slot {
            return Ok(Arc::clone(dataset));
        }
        let dataset = Arc::new(MnistDataset::new(&self.config.data_dir, mode.split())?);
        *slot = Some(Arc::clone(&dataset));
        Ok(dataset)
    }

    fn input_fn<B: Backend>(&mut self, mode: Mode) -> Result<Dataloader<B>> {
        let dataset = self.dataset(mode)?;
        let mut builder = DataLoaderBuilder::new(MnistBatcher::default())
            .batch_size(self.config.batch_size)
            .num_workers(self.config.num_workers);
        if mode == Mode::Train && self.config.shuffle {
            builder = builder.shuffle(self.config.seed);
        }
        Ok(builder.build(dataset))
    }

    /// One pass over the training split, resuming from and then updating the checkpoint.
    pub fn train(&mut self, hooks: &mut [&mut dyn TrainingHook]) -> Result<TrainSummary> {
        let device = self.device.clone();
        let lr = self.config.learning_rate;

        // load (or init) model and optim
        let mut model = match self
            .model_dir
            .load_model::<AutoB, _>(&self.model_config, &device)?
        {
            Some(model) => model,
            None => {
                log::info!("initializing new model");
                self.model_config.init::<AutoB>(&device)
            }
        };
        let mut optim = match self
            .model_dir
            .load_optim::<AutoB, LeNet<AutoB>, _>(&self.config.optimizer, &device)?
        {
            Some(optim) => optim,
            None => self.config.optimizer.init::<AutoB, LeNet<AutoB>>(),
        };
        let mut global_step = self.global_step()?;

        let dataloader_train = self.input_fn::<AutoB>(Mode::Train)?;

        for hook in hooks.iter_mut() {
            hook.begin(global_step);
        }

        let mut metric_meta = metric_metadata(dataloader_train.num_items(), lr);
        let mut loss_metric = LossMetric::<AutoB>::new();
        let mut acc_metric = AccuracyMetric::<AutoB>::new();
        let mut last_step = None;

        for (b, batch) in dataloader_train.iter().enumerate() {
            let [batch_size] = batch.targets.dims();
            metric_meta.iteration += 1;
            metric_meta.progress.items_processed += batch_size;

            let output = model.forward_classification(batch.images, batch.targets);
            acc_metric.update(&output.adapt(), &metric_meta);
            loss_metric.update(&output.adapt(), &metric_meta);

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(lr, model, grads);

            global_step += 1;

            let step = StepInfo {
                global_step,
                local_step: b + 1,
                loss: loss_metric.value().current(),
                accuracy: fraction(acc_metric.running_value().current()),
                learning_rate: lr,
            };
            for hook in hooks.iter_mut() {
                hook.after_step(&step);
            }
            last_step = Some(step);
        }

        for hook in hooks.iter_mut() {
            hook.end(last_step.as_ref());
        }

        // save assets
        self.model_dir.save_model::<AutoB>(&model)?;
        self.model_dir
            .save_optim::<AutoB, LeNet<AutoB>, _>(&optim)?;
        self.model_dir
            .save_state(&CheckpointState::new().with_global_step(global_step))?;
        log::info!("saved checkpoint for global_step = {global_step} into {:?}", self.model_dir.path());

        Ok(TrainSummary {
            global_step,
            steps: last_step.map(|step| step.local_step).unwrap_or(0),
            loss: loss_metric.running_value().current(),
            accuracy: fraction(acc_metric.running_value().current()),
        })
    }

    /// One pass over the test split with the latest checkpoint.
    pub fn evaluate(&mut self) -> Result<EvalResults> {
        let device = self.device.clone();

        let Some(state) = self.model_dir.load_state()? else {
            return Err(Error::NoCheckpoint(self.model_dir.path().to_path_buf()));
        };
        let Some(model) = self
            .model_dir
            .load_model::<AutoB::InnerBackend, _>(&self.model_config, &device)?
        else {
            return Err(Error::NoCheckpoint(self.model_dir.path().to_path_buf()));
        };

        let dataloader_valid = self.input_fn::<AutoB::InnerBackend>(Mode::Eval)?;

        let mut metric_meta =
            metric_metadata(dataloader_valid.num_items(), self.config.learning_rate);
        let mut loss_metric = LossMetric::<AutoB::InnerBackend>::new();
        let mut acc_metric = AccuracyMetric::<AutoB::InnerBackend>::new();
        let mut num_examples = 0;

        for batch in dataloader_valid.iter() {
            let [batch_size] = batch.targets.dims();
            metric_meta.iteration += 1;
            metric_meta.progress.items_processed += batch_size;

            let output = model.forward_classification(batch.images, batch.targets);
            acc_metric.update(&output.adapt(), &metric_meta);
            loss_metric.update(&output.adapt(), &metric_meta);
            num_examples += batch_size;
        }

        let results = EvalResults::new(
            fraction(acc_metric.running_value().current()),
            loss_metric.running_value().current(),
            state.global_step,
            num_examples,
        );
        log::info!(
            "evaluation for global_step = {}: accuracy = {:.4}, loss = {:.6} ({} examples)",
            results.global_step,
            results.accuracy,
            results.loss,
            results.num_examples,
        );
        self.model_dir.save_eval_results(&results)?;

        Ok(results)
    }

    /// `num_epochs` cycles of train then evaluate, timed as a whole.
    pub fn train_and_evaluate(&mut self) -> Result<Vec<EvalResults>> {
        let mut logging_hook = LoggingHook::new(self.config.log_every_n_iter);
        let timer = Timer::start("TRAIN_AND_EVALUATE");

        let mut all_results = Vec::with_capacity(self.config.num_epochs);
        for epoch in 1..self.config.num_epochs + 1 {
            log::info!("epoch {epoch}/{}", self.config.num_epochs);
            self.train(&mut [&mut logging_hook])?;
            all_results.push(self.evaluate()?);
        }

        timer.stop();
        Ok(all_results)
    }
}
