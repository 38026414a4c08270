use anyhow::Result;
use clap::{Parser, Subcommand};

mod tasks;

#[derive(Parser)]
#[command(
    name = "metaseg",
    about = "Semantic segmentation and learned-optimizer experiments",
    author,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train with the epoch loop and SGD, then evaluate on the test split.
    Train(tasks::ExperimentArgs),
    /// Train with the Burn learner, its metrics dashboard and checkpoints.
    Fit(tasks::fit::FitArgs),
    /// Evaluate a saved model and plot its confusion matrix.
    Evaluate(tasks::ExperimentArgs),
    /// Train the meta-learner on few-shot episodes.
    MetaTrain(tasks::meta::MetaTrainArgs),
    /// Train a segmentation model with a saved meta-learner as its optimizer.
    MetaFit(tasks::ExperimentArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Train(args) => tasks::train::run(args),
        Commands::Fit(args) => tasks::fit::run(args),
        Commands::Evaluate(args) => tasks::evaluate::run(args),
        Commands::MetaTrain(args) => tasks::meta::run_train(args),
        Commands::MetaFit(args) => tasks::meta::run_fit(args),
    }
}
