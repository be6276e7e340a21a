//! Timely - Main Entry Point

use clap::Parser;
use timely_anomaly::cli::{cmd_detect, cmd_evaluate, cmd_inspect, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "timely=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Evaluate { input, output_dir } => {
            cmd_evaluate(&input, output_dir.as_deref())?;
        }
        Commands::Detect {
            train,
            data,
            features,
            kernel,
            model,
            params,
            transform,
            resample_rate,
            skip,
            channel_names,
            output,
        } => {
            cmd_detect(
                &train,
                &data,
                &features,
                kernel,
                &model,
                params.as_deref(),
                &transform,
                resample_rate,
                skip,
                channel_names,
                &output,
            )?;
        }
        Commands::Inspect { data, channel_names } => {
            cmd_inspect(&data, channel_names)?;
        }
    }

    Ok(())
}
