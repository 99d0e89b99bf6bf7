use crate::checkpoint::{self, MODEL_CONFIG_NAME, TRAINING_CONFIG_NAME};
use crate::error::{Error, Result};
use crate::model::LeNetConfig;
use crate::optim::optimizer_config;
use burn::{optim::AdamConfig, prelude::*};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const HELP: &str = "\
LeNet MNIST

Trains a LeNet convolutional classifier on MNIST, evaluating it on the test split after every epoch.
Checkpoints, configurations and evaluation results are persisted in the model directory, and a
later run with the same model directory resumes from the latest checkpoint.

USAGE:
    lenet-mnist [OPTIONS]

CONFIGURATION PRECEDENCE
    command-line option > --training-config file > training_config.json in the model directory > defaults
    The resolved configuration is written back into the model directory.

FLAGS:
    -h, --help                      Show this help message and exit
    -s, --shuffle                   Shuffle the training split on every pass
        --no-shuffle                Keep the training split in file order, even if a saved config shuffles

OPTIONS:
    -d, --data-dir <PATH>           Directory where MNIST is downloaded if not already there [default: /tmp/mnist/data]
    -m, --model-dir <PATH>          Directory where all models are saved [default: /tmp/mnist/model]
    -b, --batch-size <N>            Batch size [default: 100]
    -e, --num-epochs <N>            Number of train-then-evaluate cycles [default: 1]
    -l, --learning-rate <F>         Adam learning rate [default: 0.001]
        --log-every-n-iter <N>      Steps between two training log lines [default: 10]
        --num-workers <N>           Data loading threads [default: 2]
        --seed <N>                  Backend and shuffle seed [default: 0]
    -c, --training-config <PATH>    Load the training configuration from this JSON file
        --model-config <PATH>       Load the model configuration from this JSON file

ENVIRONMENT:
    RUST_LOG                        Log filter, defaults to `info`
";

pub fn default_data_dir() -> PathBuf {
    PathBuf::from("/tmp/mnist/data")
}

pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/tmp/mnist/model")
}

/// Hyperparameters, read once at startup and never mutated afterwards.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub optimizer: AdamConfig,
    /// Directory where mnist data will be downloaded if the data is not already there.
    #[config(default = "default_data_dir()")]
    pub data_dir: PathBuf,
    /// Directory where all models are saved.
    #[config(default = "default_model_dir()")]
    pub model_dir: PathBuf,
    #[config(default = 100)]
    pub batch_size: usize,
    /// Number of train-then-evaluate cycles.
    #[config(default = 1)]
    pub num_epochs: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 10)]
    pub log_every_n_iter: usize,
    #[config(default = 2)]
    pub num_workers: usize,
    #[config(default = false)]
    pub shuffle: bool,
    #[config(default = 0)]
    pub seed: u64,
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if self.log_every_n_iter == 0 {
            return Err(Error::InvalidConfig(
                "log_every_n_iter must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig::new(optimizer_config())
    }
}

#[derive(Debug, Default)]
pub struct AppArgs {
    pub data_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub num_epochs: Option<usize>,
    pub learning_rate: Option<f64>,
    pub log_every_n_iter: Option<usize>,
    pub num_workers: Option<usize>,
    pub seed: Option<u64>,
    /// `Some(true)` for `--shuffle`, `Some(false)` for `--no-shuffle`.
    pub shuffle: Option<bool>,
    pub training_config: Option<PathBuf>,
    pub model_config: Option<PathBuf>,
}

impl AppArgs {
    pub fn parse() -> Result<Self> {
        let mut pargs = pico_args::Arguments::from_env();

        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            println!("{}", HELP);
            std::process::exit(0);
        }

        Self::from_arguments(pargs)
    }

    pub fn from_args(args: Vec<OsString>) -> Result<Self> {
        Self::from_arguments(pico_args::Arguments::from_vec(args))
    }

    fn from_arguments(mut pargs: pico_args::Arguments) -> Result<Self> {
        let args = AppArgs {
            data_dir: pargs.opt_value_from_os_str(["-d", "--data-dir"], parse_path)?,
            model_dir: pargs.opt_value_from_os_str(["-m", "--model-dir"], parse_path)?,
            batch_size: pargs.opt_value_from_str(["-b", "--batch-size"])?,
            num_epochs: pargs.opt_value_from_str(["-e", "--num-epochs"])?,
            learning_rate: pargs.opt_value_from_str(["-l", "--learning-rate"])?,
            log_every_n_iter: pargs.opt_value_from_str("--log-every-n-iter")?,
            num_workers: pargs.opt_value_from_str("--num-workers")?,
            seed: pargs.opt_value_from_str("--seed")?,
            training_config: pargs
                .opt_value_from_os_str(["-c", "--training-config"], parse_path)?,
            model_config: pargs.opt_value_from_os_str("--model-config", parse_path)?,
            // must parse flags after values
            shuffle: match (pargs.contains(["-s", "--shuffle"]), pargs.contains("--no-shuffle")) {
                (true, true) => {
                    return Err(Error::InvalidConfig(
                        "--shuffle and --no-shuffle are mutually exclusive".into(),
                    ));
                }
                (true, false) => Some(true),
                (false, true) => Some(false),
                (false, false) => None,
            },
        };

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            return Err(Error::UnusedArgs(remaining));
        }

        Ok(args)
    }

    /// Model directory named on the command line, or the default one.
    fn model_dir_hint(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(default_model_dir)
    }

    /// Builds the effective training configuration and validates it.
    pub fn resolve_training_config(&self) -> Result<TrainingConfig> {
        let base = match &self.training_config {
            Some(path) => checkpoint::load_config::<TrainingConfig>(path)?
                .ok_or_else(|| missing_config(path))?,
            None => {
                let path = self.model_dir_hint().join(TRAINING_CONFIG_NAME);
                checkpoint::load_config::<TrainingConfig>(&path)?.unwrap_or_default()
            }
        };

        let mut config = base;
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(model_dir) = &self.model_dir {
            config.model_dir = model_dir.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(num_epochs) = self.num_epochs {
            config.num_epochs = num_epochs;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(log_every_n_iter) = self.log_every_n_iter {
            config.log_every_n_iter = log_every_n_iter;
        }
        if let Some(num_workers) = self.num_workers {
            config.num_workers = num_workers;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(shuffle) = self.shuffle {
            config.shuffle = shuffle;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn resolve_model_config(&self, model_dir: &Path) -> Result<LeNetConfig> {
        match &self.model_config {
            Some(path) => {
                checkpoint::load_config::<LeNetConfig>(path)?.ok_or_else(|| missing_config(path))
            }
            None => Ok(
                checkpoint::load_config::<LeNetConfig>(&model_dir.join(MODEL_CONFIG_NAME))?
                    .unwrap_or_else(LeNetConfig::new),
            ),
        }
    }
}

fn parse_path(s: &std::ffi::OsStr) -> Result<PathBuf, &'static str> {
    Ok(s.into())
}

fn missing_config(path: &Path) -> Error {
    Error::ConfigLoad {
        path: path.to_path_buf(),
        reason: "file not found".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_dir::TempDir;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn defaults_match_help_text() {
        let config = TrainingConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/mnist/data"));
        assert_eq!(config.model_dir, PathBuf::from("/tmp/mnist/model"));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.num_epochs, 1);
        assert_eq!(config.learning_rate, 1e-3);
        assert_eq!(config.log_every_n_iter, 10);
        assert!(!config.shuffle);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn command_line_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let model_dir = dir.path().join("model");
        let app_args = AppArgs::from_args(vec![
            OsString::from("--model-dir"),
            model_dir.clone().into_os_string(),
            OsString::from("-b"),
            OsString::from("32"),
            OsString::from("--num-epochs"),
            OsString::from("3"),
            OsString::from("--learning-rate"),
            OsString::from("0.01"),
            OsString::from("--shuffle"),
        ])
        .unwrap();

        let config = app_args.resolve_training_config().unwrap();
        assert_eq!(config.model_dir, model_dir);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.num_epochs, 3);
        assert_eq!(config.learning_rate, 0.01);
        assert!(config.shuffle);
        assert_eq!(config.data_dir, default_data_dir());
    }

    #[test]
    fn saved_config_is_picked_up_from_model_dir() {
        let dir = TempDir::new().unwrap();
        let saved = TrainingConfig::default()
            .with_model_dir(dir.path().to_path_buf())
            .with_batch_size(64)
            .with_seed(7);
        checkpoint::save_config(&dir.path().join(TRAINING_CONFIG_NAME), &saved).unwrap();

        let mut list = args(&["--model-dir"]);
        list.push(dir.path().as_os_str().to_owned());
        list.extend(args(&["--seed", "9"]));
        let config = AppArgs::from_args(list)
            .unwrap()
            .resolve_training_config()
            .unwrap();

        assert_eq!(config.batch_size, 64);
        assert_eq!(config.seed, 9);
    }

    #[test]
    fn training_config_file_beats_model_dir_config() {
        let dir = TempDir::new().unwrap();
        let in_model_dir = TrainingConfig::default()
            .with_model_dir(dir.path().to_path_buf())
            .with_batch_size(64)
            .with_num_epochs(5);
        checkpoint::save_config(&dir.path().join(TRAINING_CONFIG_NAME), &in_model_dir).unwrap();
        let explicit_path = dir.path().join("explicit.json");
        let explicit = TrainingConfig::default()
            .with_batch_size(16)
            .with_num_epochs(2)
            .with_seed(3);
        checkpoint::save_config(&explicit_path, &explicit).unwrap();

        let mut list = args(&["--model-dir"]);
        list.push(dir.path().as_os_str().to_owned());
        list.push(OsString::from("-c"));
        list.push(explicit_path.into_os_string());
        list.extend(args(&["--seed", "4"]));
        let config = AppArgs::from_args(list)
            .unwrap()
            .resolve_training_config()
            .unwrap();

        assert_eq!(config.batch_size, 16);
        assert_eq!(config.num_epochs, 2);
        // the command line still wins over the file
        assert_eq!(config.seed, 4);
        assert_eq!(config.model_dir, dir.path());
    }

    #[test]
    fn no_shuffle_overrides_a_saved_shuffle() {
        let dir = TempDir::new().unwrap();
        let saved = TrainingConfig::default()
            .with_model_dir(dir.path().to_path_buf())
            .with_shuffle(true);
        checkpoint::save_config(&dir.path().join(TRAINING_CONFIG_NAME), &saved).unwrap();

        let resolve = |flags: &[&str]| {
            let mut list = args(&["--model-dir"]);
            list.push(dir.path().as_os_str().to_owned());
            list.extend(args(flags));
            AppArgs::from_args(list)
                .unwrap()
                .resolve_training_config()
                .unwrap()
        };

        assert!(resolve(&[]).shuffle);
        assert!(!resolve(&["--no-shuffle"]).shuffle);
        assert!(resolve(&["-s"]).shuffle);
        assert!(matches!(
            AppArgs::from_args(args(&["--shuffle", "--no-shuffle"])),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn explicit_config_file_must_exist() {
        let dir = TempDir::new().unwrap();
        let mut list = args(&["--training-config"]);
        list.push(dir.path().join("absent.json").into_os_string());
        let app_args = AppArgs::from_args(list).unwrap();
        assert!(matches!(
            app_args.resolve_training_config(),
            Err(Error::ConfigLoad { .. })
        ));
    }

    #[test]
    fn rejects_unknown_and_malformed_arguments() {
        assert!(matches!(
            AppArgs::from_args(args(&["--unknown"])),
            Err(Error::UnusedArgs(_))
        ));
        assert!(matches!(
            AppArgs::from_args(args(&["--batch-size", "many"])),
            Err(Error::Args(_))
        ));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        for bad in [["--batch-size", "0"], ["--learning-rate", "0"]] {
            let mut list = args(&["--model-dir"]);
            list.push(dir.path().as_os_str().to_owned());
            list.extend(args(&bad));
            let result = AppArgs::from_args(list)
                .unwrap()
                .resolve_training_config();
            assert!(matches!(result, Err(Error::InvalidConfig(_))), "{bad:?}");
        }
    }
}
