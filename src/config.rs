use crate::model::{ClassWeight, ForestParameters};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(short, long, action = ArgAction::Count, global = true, help = "Verbose level")]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Train at start-up and serve predictions over HTTP
    Serve(ServeArgs),
    /// Fit on a seeded split and report holdout metrics
    Train(TrainArgs),
    /// Score a CSV file and write the predictions as CSV
    Predict(PredictArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TrainingArgs {
    #[arg(long, env = "CARDIO_TRAIN_FILE", default_value = "heart_train.csv",
    help = "Training table (CSV or Parquet)")]
    pub train_file: PathBuf,
    #[arg(long, default_value_t = 100, help = "Number of trees")]
    pub trees: u16,
    #[arg(long, default_value_t = 10, help = "Maximum tree depth")]
    pub max_depth: u16,
    #[arg(long, default_value_t = 10, help = "Minimum samples to split a node")]
    pub min_samples_split: usize,
    #[arg(long, default_value_t = 42, help = "Random seed")]
    pub seed: u64,
    #[arg(long, help = "Draw rows uniformly instead of balancing classes")]
    pub uniform_weights: bool,
}

impl TrainingArgs {
    pub fn forest_parameters(&self) -> ForestParameters {
        ForestParameters {
            n_trees: self.trees,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            class_weight: if self.uniform_weights {
                ClassWeight::Uniform
            } else {
                ClassWeight::Balanced
            },
            seed: self.seed,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub training: TrainingArgs,
    #[arg(long, env = "CARDIO_LISTEN", default_value = "0.0.0.0:8000", help = "Listen address")]
    pub listen: String,
    #[arg(long, env = "CARDIO_MODEL", help = "Saved classifier to load instead of fitting one")]
    pub model: Option<PathBuf>,
    #[arg(long, default_value_t = 16 * 1024 * 1024, help = "Largest accepted upload in bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    #[command(flatten)]
    pub training: TrainingArgs,
    #[arg(long, default_value_t = 0.2, help = "Share of rows held out for evaluation")]
    pub holdout: f64,
    #[arg(long, help = "Write the fitted classifier here")]
    pub save: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct PredictArgs {
    #[command(flatten)]
    pub training: TrainingArgs,
    #[arg(short, long, help = "Table to score (CSV or Parquet)")]
    pub input: PathBuf,
    #[arg(short, long, help = "Output CSV path")]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["cardio-risk", "serve"]).unwrap();
        assert_eq!(cli.verbose, 0);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.listen, "0.0.0.0:8000");
        assert!(args.model.is_none());
        assert_eq!(args.training.forest_parameters(), ForestParameters::default());
    }

    #[test]
    fn train_flags() {
        let cli = Cli::try_parse_from([
            "cardio-risk",
            "-vv",
            "train",
            "--train-file",
            "data/train.parquet",
            "--trees",
            "20",
            "--uniform-weights",
            "--holdout",
            "0.25",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Train(args) = cli.command else {
            panic!("expected train");
        };
        assert_eq!(args.training.train_file, PathBuf::from("data/train.parquet"));
        assert_eq!(args.holdout, 0.25);
        let params = args.training.forest_parameters();
        assert_eq!(params.n_trees, 20);
        assert_eq!(params.class_weight, ClassWeight::Uniform);
    }

    #[test]
    fn predict_requires_paths() {
        assert!(Cli::try_parse_from(["cardio-risk", "predict"]).is_err());
    }
}
