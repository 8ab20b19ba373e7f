use std::str::FromStr;

use anyhow::Result;
use candle_core::Tensor;
use clap::{Parser, Subcommand};
use sprig_ml::{
    EULER_MASCHERONI, GumbelConfig, clip_gradient, device, print_progress, random_gumbel,
    set_global_threadpool,
};
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Debug, Subcommand)]
enum Commands {
    /// Draw Gumbel samples and compare the empirical mean with `mu + beta * gamma`
    Gumbel {
        #[arg(long, default_value = "100000", help = "Number of samples to draw")]
        samples: usize,

        #[arg(long, default_value = "0.0", allow_negative_numbers = true, help = "Location")]
        mu: f64,

        #[arg(long, default_value = "1.0", allow_negative_numbers = true, help = "Scale")]
        beta: f64,

        #[arg(long, help = "Seed for a repeatable draw")]
        seed: Option<u64>,
    },
    /// Print a progress line for a dummy loop
    Progress {
        #[arg(long, default_value = "10000", help = "Number of loops")]
        total: usize,

        #[arg(long, default_value = "1000", help = "Print every N loops")]
        interval: usize,

        #[arg(long, default_value = sprig_ml::DEFAULT_PROGRESS_MSG, help = "Message shown on the line")]
        msg: String,
    },
    /// Clip a gradient vector to a maximum global norm
    Clip {
        #[arg(long, help = "Maximum global norm")]
        max_norm: f64,

        #[arg(long, value_delimiter = ',', allow_negative_numbers = true, help = "Comma separated gradient values")]
        grads: Vec<f32>,
    },
}

#[derive(Debug, Parser)]
struct Cli {
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count, help = "Increase verbosity level (-v = ERROR, -vv = WARN, -vvv = INFO, -vvvv = DEBUG, -vvvvv = TRACE)")]
    verbose: u8,

    #[arg(
        long,
        global = true,
        help = "Parse arguments and exit immediately (for validation)"
    )]
    noop: bool,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // If noop flag is set, exit immediately after parsing arguments
    if cli.noop {
        println!("✓ Arguments parsed successfully (--noop mode)");
        return Ok(());
    }

    let verbosity = cli.verbose.saturating_add(2).clamp(1, 5);
    let level = Level::from_str(verbosity.to_string().as_str())?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::filter::LevelFilter::from_level(level))
        .init();
    info!("Logging initialized at level: {}", level);

    set_global_threadpool()?;
    let device = device()?;

    match cli.command {
        Commands::Gumbel {
            samples,
            mu,
            beta,
            seed,
        } => {
            let config = GumbelConfig {
                mu,
                beta,
                seed,
                name: Some("cli".to_string()),
                ..GumbelConfig::default()
            };
            let draws = random_gumbel(samples, &config, &device)?;
            let mean = draws
                .to_dtype(candle_core::DType::F64)?
                .mean_all()?
                .to_scalar::<f64>()?;
            let expected = mu + beta * EULER_MASCHERONI;
            info!(samples, mean, expected, "gumbel draw");
            println!("mean = {mean:.6}, expected = {expected:.6}");
        }
        Commands::Progress {
            total,
            interval,
            msg,
        } => {
            for current in 0..=total {
                print_progress(current, total, &msg, interval)?;
            }
        }
        Commands::Clip { max_norm, grads } => {
            let n = grads.len();
            let grad = Tensor::from_vec(grads, n, &device)?;
            let clipped = clip_gradient(&[(grad, "grads")], max_norm)?;
            for (grad, name) in &clipped.pairs {
                println!("{name} = {:?}", grad.to_vec1::<f32>()?);
            }
            println!(
                "raw_norm = {:.6}, clipped_norm = {:.6}",
                clipped.raw_norm, clipped.clipped_norm
            );
        }
    }
    Ok(())
}
