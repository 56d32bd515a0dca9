use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod basin;
mod binning;
mod config;
mod error;
mod geojson;
mod mirror;
mod models;
mod pipeline;
mod render;
mod report;
mod source;
mod strike;
mod tracks;

use crate::basin::IdOrdering;
use crate::config::{parse_run_date, resolve_run_date, RunConfig};
use crate::models::StormId;
use crate::render::PngRenderer;
use crate::source::CsvArchive;

#[derive(Parser)]
#[command(name = "cyclogenesis-products")]
#[command(about = "Five-day cyclogenesis products from ensemble storm tracks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct BasinArgs {
    /// Identifiers below this one are treated as spurious
    #[arg(long, default_value = "70")]
    min_storm_id: String,
    #[arg(long, value_enum, default_value_t = IdOrdering::Lexicographic)]
    id_ordering: IdOrdering,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every product for one forecast cycle and refresh the latest mirror
    Run {
        /// Forecast run date as YYYYMMDD; defaults to today (UTC)
        #[arg(long, env = "COI_RUN_DATE", value_parser = parse_run_date)]
        run_date: Option<NaiveDate>,
        /// Forecast cycle reference hour (UTC)
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..=23))]
        cycle_hour: u32,
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        #[arg(long, default_value = "output")]
        output_root: PathBuf,
        /// Earlier 12-hourly cycles to try when the requested one is missing
        #[arg(long, default_value_t = 4)]
        lookback_cycles: u32,
        #[command(flatten)]
        basin: BasinArgs,
    },
    /// Print the storms a samples CSV yields after basin filtering
    Inspect {
        #[arg(long)]
        csv: PathBuf,
        #[command(flatten)]
        basin: BasinArgs,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            run_date,
            cycle_hour,
            data_dir,
            output_root,
            lookback_cycles,
            basin: filter_args,
        } => {
            let mut config =
                RunConfig::new(&output_root, &data_dir, resolve_run_date(run_date, cycle_hour));
            config.basin.min_storm_id = StormId::new(filter_args.min_storm_id);
            config.id_ordering = filter_args.id_ordering;
            config.lookback_cycles = lookback_cycles;

            let archive = CsvArchive::new(&config.data_dir, config.lookback_cycles);
            let outcome = pipeline::run_cycle(&config, &archive, &PngRenderer::default())
                .with_context(|| format!("cycle {} failed", config.run_date))?;

            println!("Run {} finished.", outcome.run_id);
            match &outcome.primary {
                Some(id) => println!(
                    "Processed {} system(s); primary system {id}.",
                    outcome.storms.len()
                ),
                None => println!("No system suspected ({}).", outcome.subtitle),
            }
            println!("Latest images refreshed in {}.", config.layout.latest_dir().display());
        }
        Commands::Inspect {
            csv,
            basin: filter_args,
        } => {
            let rows = source::read_samples_csv(&csv)
                .with_context(|| format!("failed to read {}", csv.display()))?;
            let samples = basin::validate(rows)?;
            let mut region = basin::BasinRegion::south_west_indian_ocean();
            region.min_storm_id = StormId::new(filter_args.min_storm_id);
            let kept = basin::filter(&samples, &region, filter_args.id_ordering);
            let storms = basin::group_storms(kept, filter_args.id_ordering);

            if storms.is_empty() {
                println!("No system inside the basin ({} samples read).", samples.len());
                return Ok(());
            }

            println!("Systems inside the basin:");
            for storm in &storms {
                println!("{}", report::storm_line(storm));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_hour_outside_the_day_is_rejected() {
        let parsed = Cli::try_parse_from(["cyclogenesis-products", "run", "--cycle-hour", "30"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn cycle_hour_within_the_day_is_accepted() {
        let cli =
            Cli::try_parse_from(["cyclogenesis-products", "run", "--cycle-hour", "12"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { cycle_hour: 12, .. }));
    }
}
