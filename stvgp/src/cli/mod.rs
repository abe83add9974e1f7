pub mod fit;

use clap::{Parser, Subcommand};

pub use fit::{FitArgs, KernelType, LikelihoodType};

#[derive(Parser)]
#[command(name = "stvgp")]
#[command(about = "Stochastic variational Gaussian process fitting")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit the variational posterior of a GP and optionally predict
    Fit(FitArgs),
}
