//! dts2ddp - in-place DTS to E-AC-3 conversion for a video library.
//!
//! Scans a directory tree, re-encodes the first English DTS track of each
//! qualifying file to E-AC-3, validates the result, and atomically swaps
//! it over the original. Side modes cover discovery listing, reverifying
//! quarantined outputs, and cleaning up orphaned temp files.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use ddp_core::config::Settings;
use ddp_core::report;
use ddp_core::runner::{parse_percent, RunError, RunOptions, Runner};

#[derive(Parser, Debug)]
#[command(
    name = "dts2ddp",
    version,
    about = "Convert English DTS audio tracks to E-AC-3 in place"
)]
struct Cli {
    /// Directory tree to scan
    directory: PathBuf,

    /// Decide and report without modifying any files
    #[arg(long)]
    dry_run: bool,

    /// Write the ffmpeg commands to a shell script instead of running
    /// them (implies --dry-run)
    #[arg(long, value_name = "FILE")]
    dry_run_batch: Option<PathBuf>,

    /// Wildcard filter applied to file names (`*` and `?`)
    #[arg(long, default_value = "*", value_name = "PATTERN")]
    filter: String,

    /// List files carrying an English DTS track and no AC-3/E-AC-3,
    /// then exit
    #[arg(long)]
    list_dts_no_dd: bool,

    /// Re-check quarantined outputs under the given size tolerance
    /// percent (e.g. "20" or "20%"), then exit
    #[arg(long, value_name = "PERCENT")]
    reverify_bad_convert: Option<String>,

    /// Resolve orphaned temp files left by interrupted runs, then exit
    #[arg(long)]
    clean_temp_files: bool,

    /// Settings file (TOML); defaults apply when the file is absent
    #[arg(long, value_name = "PATH", default_value = "dts2ddp.toml", env = "DTS2DDP_CONFIG")]
    config: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match try_main(&cli) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{:#}", err);
            match err.downcast_ref::<RunError>() {
                Some(run_err) => exit_code_for(run_err),
                None => ExitCode::FAILURE,
            }
        }
    }
}

fn try_main(cli: &Cli) -> anyhow::Result<ExitCode> {
    let settings = Settings::load_or_default(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    let runner = Runner::new(settings);
    runner.check_environment()?;

    if cli.list_dts_no_dd {
        let (matches, examined) = runner.list_unconverted(&cli.directory, &cli.filter)?;
        println!("{}", report::render_list(&matches, examined, &cli.filter));
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(percent) = &cli.reverify_bad_convert {
        let tolerance = parse_percent(percent)?;
        let result = runner.reverify(&cli.directory, tolerance)?;
        println!(
            "Reverify complete: examined={} promoted={} skipped={}",
            result.examined, result.promoted, result.skipped
        );
        // Success when something was recovered, or when there was
        // nothing to examine in the first place.
        let code = if result.promoted > 0 || result.examined == 0 {
            0
        } else {
            1
        };
        return Ok(ExitCode::from(code));
    }

    if cli.clean_temp_files {
        let result = runner.clean_orphan_temps(&cli.directory)?;
        println!(
            "Cleanup complete: found={} promoted={} quarantined={} failed={}",
            result.found, result.promoted, result.quarantined, result.failed
        );
        return Ok(ExitCode::SUCCESS);
    }

    let options = RunOptions {
        directory: cli.directory.clone(),
        pattern: cli.filter.clone(),
        dry_run: cli.dry_run,
        batch_script: cli.dry_run_batch.clone(),
    };
    let result = runner.convert(&options)?;

    if options.is_dry() {
        println!("{}", result.summary.render());
        if let Some(path) = &result.batch_script {
            println!("Batch script written to: {}", path.display());
        }
    } else {
        println!(
            "Run complete: examined={} converted={} skipped={} quarantined={} failed={}",
            result.examined, result.converted, result.skipped, result.quarantined, result.failed
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn exit_code_for(err: &RunError) -> ExitCode {
    match err {
        RunError::DirectoryInvalid(_) => ExitCode::from(1),
        RunError::EnvironmentMissing { .. } => ExitCode::from(2),
        RunError::BatchInitFailed { .. } => ExitCode::from(3),
        RunError::ArgumentInvalid(_) => ExitCode::from(4),
    }
}
