// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. The CLI layer only
// routes: each subcommand is converted into an application
// config and handed to its use case.

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, GenerateArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "voxelseg",
    version = "0.1.0",
    about = "Train a 3D UNet segmentation model on synthetic volumetric data."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Generate(args) => Self::run_generate(args),
            Commands::Train(args) => Self::run_train(args),
        }
    }

    fn run_generate(args: GenerateArgs) -> Result<()> {
        use crate::application::generate_use_case::GenerateUseCase;

        let use_case = GenerateUseCase::new(args.into());
        let written = use_case.execute()?;
        println!("Wrote {} volume pairs.", written.len());
        Ok(())
    }

    fn run_train(args: TrainArgs) -> Result<()> {
        use crate::application::train_use_case::TrainUseCase;

        tracing::info!("Starting training run from '{}'", args.data_dir);
        let use_case = TrainUseCase::new(args.into());
        let summary = use_case.execute()?;
        println!(
            "Training complete: {} epochs, {} iterations, final loss {:.4}.",
            summary.epochs_run, summary.iterations, summary.final_loss
        );
        Ok(())
    }
}
