//! LeNet convolutional classifier for MNIST, trained and evaluated with burn.

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod estimator;
pub mod hooks;
pub mod model;
pub mod optim;
pub mod timer;

pub mod prelude {
    pub use crate::config::{AppArgs, TrainingConfig};
    pub use crate::error::{Error, Result};
    pub use crate::estimator::{EvalResults, Estimator, Mode, TrainSummary};
    pub use crate::hooks::{LoggingHook, StepInfo, TrainingHook};
    pub use crate::model::{LeNet, LeNetConfig};
}
