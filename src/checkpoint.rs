//! Model directory layout.
//!
//! ```text
//! <model_dir>/
//!     training_config.json
//!     model_config.json
//!     model.mpk
//!     optim.mpk
//!     checkpoint.json      global step of model.mpk / optim.mpk
//!     eval_results.json    latest evaluation
//! ```
//!
//! A missing file means "nothing saved yet" and loads as `None`.

use crate::backend::RecorderTy;
use crate::error::{Error, Result};
use crate::model::ModelConfigExt;
use crate::optim::OptimConfigExt;
use burn::module::AutodiffModule;
use burn::record::{FileRecorder, Recorder};
use burn::{optim::Optimizer, prelude::*, tensor::backend::AutodiffBackend};
use std::path::{Path, PathBuf};

pub const TRAINING_CONFIG_NAME: &str = "training_config.json";
pub const MODEL_CONFIG_NAME: &str = "model_config.json";
pub const MODEL_NAME: &str = "model";
pub const OPTIM_NAME: &str = "optim";
pub const STATE_NAME: &str = "checkpoint.json";
pub const EVAL_RESULTS_NAME: &str = "eval_results.json";

/// Progress stored next to the weights.
#[derive(Config, Debug, PartialEq)]
pub struct CheckpointState {
    #[config(default = 0)]
    pub global_step: usize,
}

fn exists(path: &Path) -> Result<bool> {
    std::fs::exists(path).map_err(|e| Error::io(path, e))
}

pub fn save_config(path: &Path, config: &impl Config) -> Result<()> {
    log::debug!("saving config into {path:?}");
    config.save(path).map_err(|e| Error::io(path, e))
}

pub fn load_config<C: Config>(path: &Path) -> Result<Option<C>> {
    if !exists(path)? {
        return Ok(None);
    }
    log::info!("loading config from {path:?}");
    C::load(path)
        .map(Some)
        .map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            reason: format!("{e:?}"),
        })
}

/// Handle over the model directory.
#[derive(Debug, Clone)]
pub struct ModelDir {
    path: PathBuf,
}

impl ModelDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory to save the model and model config.
    pub fn create(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path).map_err(|e| Error::io(&self.path, e))
    }

    fn with_recorder_ext<B: Backend>(&self, name: &str) -> (PathBuf, PathBuf) {
        let path = self.path.join(name);
        let file_ext = <RecorderTy as FileRecorder<B>>::file_extension();
        let path_ext = path.with_extension(file_ext);
        (path, path_ext)
    }

    pub fn save_training_config(&self, config: &impl Config) -> Result<()> {
        save_config(&self.path.join(TRAINING_CONFIG_NAME), config)
    }

    pub fn save_model_config(&self, config: &impl Config) -> Result<()> {
        save_config(&self.path.join(MODEL_CONFIG_NAME), config)
    }

    pub fn save_state(&self, state: &CheckpointState) -> Result<()> {
        save_config(&self.path.join(STATE_NAME), state)
    }

    pub fn load_state(&self) -> Result<Option<CheckpointState>> {
        load_config(&self.path.join(STATE_NAME))
    }

    pub fn save_eval_results(&self, results: &impl Config) -> Result<()> {
        save_config(&self.path.join(EVAL_RESULTS_NAME), results)
    }

    pub fn save_model<B: Backend>(&self, model: &impl Module<B>) -> Result<()> {
        let (path, path_ext) = self.with_recorder_ext::<B>(MODEL_NAME);
        log::debug!("saving model to {path_ext:?}");
        model
            .clone()
            .save_file(path, &RecorderTy::new()) // ext added automatically
            .map_err(|e| Error::Record {
                action: "save",
                path: path_ext,
                reason: format!("{e:?}"),
            })
    }

    pub fn load_model<B: Backend, ModelConfig: ModelConfigExt<B>>(
        &self,
        model_config: &ModelConfig,
        device: &B::Device,
    ) -> Result<Option<ModelConfig::Model>> {
        let (path, path_ext) = self.with_recorder_ext::<B>(MODEL_NAME);
        if !exists(&path_ext)? {
            return Ok(None);
        }
        log::info!("loading model from {path_ext:?}");
        let model_init = model_config.init(device);
        model_init
            .load_file(path, &RecorderTy::new(), device) // ext added automatically
            .map(Some)
            .map_err(|e| Error::Record {
                action: "load",
                path: path_ext,
                reason: format!("{e:?}"),
            })
    }

    pub fn save_optim<AutoB, AutoM, Optim>(&self, optim: &Optim) -> Result<()>
    where
        AutoB: AutodiffBackend,
        AutoM: AutodiffModule<AutoB>,
        Optim: Optimizer<AutoM, AutoB>,
    {
        let (path, path_ext) = self.with_recorder_ext::<AutoB>(OPTIM_NAME);
        log::debug!("saving optim to {path_ext:?}");
        let record = optim.to_record();
        RecorderTy::new()
            .record(record, path) // ext added automatically
            .map_err(|e| Error::Record {
                action: "save",
                path: path_ext,
                reason: format!("{e:?}"),
            })
    }

    pub fn load_optim<AutoB, AutoM, OptimConfig>(
        &self,
        optim_config: &OptimConfig,
        device: &AutoB::Device,
    ) -> Result<Option<OptimConfig::Adaptor>>
    where
        AutoB: AutodiffBackend,
        AutoM: AutodiffModule<AutoB>,
        OptimConfig: OptimConfigExt<AutoB, AutoM>,
    {
        let (path, path_ext) = self.with_recorder_ext::<AutoB>(OPTIM_NAME);
        if !exists(&path_ext)? {
            return Ok(None);
        }
        log::info!("loading optim from {path_ext:?}");
        let optim_init = optim_config.init();
        let record = RecorderTy::new()
            .load(path, device) // ext added automatically
            .map_err(|e| Error::Record {
                action: "load",
                path: path_ext,
                reason: format!("{e:?}"),
            })?;
        Ok(Some(optim_init.load_record(record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MainAutoBackend, MainBackend};
    use crate::dataset::{HEIGHT, WIDTH};
    use crate::model::{LeNet, LeNetConfig};
    use crate::optim::optimizer_config;
    use burn::optim::GradientsParams;
    use temp_dir::TempDir;

    type AutoLeNet = LeNet<MainAutoBackend>;

    fn grads(model: &AutoLeNet, device: &<MainAutoBackend as Backend>::Device) -> GradientsParams {
        let images = Tensor::<MainAutoBackend, 2>::ones([2, HEIGHT * WIDTH], device);
        let targets = Tensor::<MainAutoBackend, 1, Int>::from_data([1, 4], device);
        let loss = model.forward_classification(images, targets).loss;
        GradientsParams::from_grads(loss.backward(), model)
    }

    fn output_bias(model: &AutoLeNet) -> Vec<f32> {
        let bias = model.dense2.bias.as_ref().unwrap().val();
        bias.into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    #[test]
    fn empty_directory_loads_nothing() {
        let dir = TempDir::new().unwrap();
        let model_dir = ModelDir::new(dir.path());
        let device = Default::default();

        assert_eq!(model_dir.load_state().unwrap(), None);
        let model = model_dir
            .load_model::<MainBackend, _>(&LeNetConfig::new(), &device)
            .unwrap();
        assert!(model.is_none());
        let optim = model_dir
            .load_optim::<MainAutoBackend, LeNet<MainAutoBackend>, _>(&optimizer_config(), &device)
            .unwrap();
        assert!(optim.is_none());
    }

    #[test]
    fn state_and_weights_are_restored() {
        let dir = TempDir::new().unwrap();
        let model_dir = ModelDir::new(dir.path().join("nested"));
        model_dir.create().unwrap();
        let device = Default::default();

        model_dir
            .save_state(&CheckpointState::new().with_global_step(42))
            .unwrap();
        assert_eq!(model_dir.load_state().unwrap().unwrap().global_step, 42);

        let config = LeNetConfig::new();
        let model: LeNet<MainBackend> = config.init(&device);
        model_dir.save_model::<MainBackend>(&model).unwrap();
        let restored = model_dir
            .load_model::<MainBackend, _>(&config, &device)
            .unwrap()
            .unwrap();

        let original = model.dense2.weight.val().into_data().convert::<f32>();
        let restored = restored.dense2.weight.val().into_data().convert::<f32>();
        assert_eq!(
            original.to_vec::<f32>().unwrap(),
            restored.to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn optimizer_moments_are_restored() {
        let dir = TempDir::new().unwrap();
        let model_dir = ModelDir::new(dir.path());
        let device = Default::default();
        let config = LeNetConfig::new()
            .with_conv1_filters(2)
            .with_conv2_filters(3)
            .with_hidden_size(8);
        let lr = 1e-2;

        let mut optim = optimizer_config().init::<MainAutoBackend, AutoLeNet>();
        let model: AutoLeNet = config.init(&device);
        let model = optim.step(lr, model.clone(), grads(&model, &device));

        model_dir
            .save_optim::<MainAutoBackend, AutoLeNet, _>(&optim)
            .unwrap();
        let mut restored = model_dir
            .load_optim::<MainAutoBackend, AutoLeNet, _>(&optimizer_config(), &device)
            .unwrap()
            .unwrap();
        let mut fresh = optimizer_config().init::<MainAutoBackend, AutoLeNet>();

        // same gradients, applied by the saved, the restored and a fresh optimizer
        let from_saved = optim.step(lr, model.clone(), grads(&model, &device));
        let from_restored = restored.step(lr, model.clone(), grads(&model, &device));
        let from_fresh = fresh.step(lr, model.clone(), grads(&model, &device));

        assert_eq!(output_bias(&from_saved), output_bias(&from_restored));
        assert_ne!(output_bias(&from_saved), output_bias(&from_fresh));
    }

    #[test]
    fn corrupted_weights_are_an_error() {
        let dir = TempDir::new().unwrap();
        let model_dir = ModelDir::new(dir.path());
        let device = Default::default();
        let (_, path_ext) = model_dir.with_recorder_ext::<MainBackend>(MODEL_NAME);
        std::fs::write(&path_ext, b"not a record").unwrap();

        let result = model_dir.load_model::<MainBackend, _>(&LeNetConfig::new(), &device);
        assert!(matches!(result, Err(Error::Record { action: "load", .. })));
    }

    #[test]
    fn corrupted_state_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STATE_NAME), "not json").unwrap();
        let model_dir = ModelDir::new(dir.path());
        assert!(matches!(
            model_dir.load_state(),
            Err(Error::ConfigLoad { .. })
        ));
    }
}
