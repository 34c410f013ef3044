use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::{
    angular, batch, blind_offset, check, coords, distmod, fits2ascii, mjd, mjd_now, ngsf, plot,
};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(default_level)),
        )
        .with_target(false) // Don't show module paths in logs
        .with_level(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Check {
            file,
            ra,
            dec,
            options,
        } => {
            check(&file, &ra, &dec, &options)?;
        }
        Commands::Batch {
            inputs,
            positions,
            ra,
            dec,
            summary,
            options,
        } => {
            batch(
                &inputs,
                positions.as_deref(),
                ra.as_deref(),
                dec.as_deref(),
                summary.as_deref(),
                &options,
            )?;
        }
        Commands::Coords { radec, to } => {
            coords(&radec, &to)?;
        }
        Commands::Mjd { time, from } => {
            mjd(&time, &from)?;
        }
        Commands::MjdNow => {
            mjd_now()?;
        }
        Commands::BlindOffset {
            radec,
            pm_ra,
            pm_dec,
            year,
            month,
        } => {
            blind_offset(&radec, pm_ra, pm_dec, year, month)?;
        }
        Commands::Distmod {
            z,
            magnitude,
            h0,
            om0,
        } => {
            distmod(z, magnitude, h0, om0)?;
        }
        Commands::Angular { z, value, mode } => {
            angular(z, value, &mode)?;
        }
        Commands::Fits2ascii { inputs } => {
            fits2ascii(&inputs)?;
        }
        Commands::Plot {
            file,
            output,
            hdu,
            max_px,
            show_plot,
        } => {
            plot(&file, output.as_deref(), &hdu, max_px, show_plot)?;
        }
        Commands::Ngsf {
            object_to_fit,
            options,
            work_dir,
            run,
            keep,
            python,
        } => {
            ngsf(&object_to_fit, &options, &work_dir, run, keep, &python)?;
        }
    }

    Ok(())
}
