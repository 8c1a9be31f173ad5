//! `pipeval run` - full pipeline validation.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use pipeval_core::report::StageOutcome;
use pipeval_core::validator::{PipelineValidator, ValidatorContext};
use pipeval_core::{CancelToken, ChangeFingerprint, ValidatorConfig};
use tracing::info;

/// Exit codes for `pipeval run`.
pub mod exit_codes {
    /// Every stage passed.
    pub const SUCCESS: u8 = 0;
    /// A validation stage failed.
    pub const VALIDATION_FAILED: u8 = 1;
    /// Configuration or input problem before any stage ran.
    pub const INVALID_ARGS: u8 = 2;
}

/// Arguments for `pipeval run`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Version of the change under validation (e.g. 1.2.3).
    #[arg(long)]
    pub version: String,

    /// Commit hash of the change (short or full, lowercase hex).
    #[arg(long)]
    pub commit: String,

    /// Override the configured environment chain (comma-separated,
    /// in promotion order).
    #[arg(long, value_delimiter = ',')]
    pub envs: Option<Vec<String>>,

    /// Override the build-start timeout, in seconds.
    #[arg(long)]
    pub build_start_secs: Option<u64>,

    /// Override the build-run timeout, in seconds.
    #[arg(long)]
    pub build_run_secs: Option<u64>,

    /// Override the sync timeout, in seconds.
    #[arg(long)]
    pub sync_secs: Option<u64>,

    /// Override the deployment-verification timeout, in seconds.
    #[arg(long)]
    pub deploy_secs: Option<u64>,

    /// Emit the run summary as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Runs the validation and renders the summary.
///
/// # Errors
///
/// Returns an error for configuration and input problems; validation
/// failures are reported through the exit code instead.
pub fn execute(config_path: &Path, args: &RunArgs) -> Result<u8> {
    let mut config = ValidatorConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    if let Some(envs) = &args.envs {
        if envs.is_empty() {
            eprintln!("error: --envs must name at least one environment");
            return Ok(exit_codes::INVALID_ARGS);
        }
        config.chain = envs.clone();
    }
    if let Some(secs) = args.build_start_secs {
        config.timeouts.build_start_secs = secs;
    }
    if let Some(secs) = args.build_run_secs {
        config.timeouts.build_run_secs = secs;
    }
    if let Some(secs) = args.sync_secs {
        config.timeouts.sync_secs = secs;
    }
    if let Some(secs) = args.deploy_secs {
        config.timeouts.deploy_secs = secs;
    }

    let fingerprint = match ChangeFingerprint::new(&args.version, &args.commit) {
        Ok(fingerprint) => fingerprint,
        Err(error) => {
            eprintln!("error: {error}");
            return Ok(exit_codes::INVALID_ARGS);
        },
    };

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("interrupt received, aborting current poll");
            cancel.cancel();
        })
        .context("installing interrupt handler")?;
    }

    let ctx = ValidatorContext::from_config(&config).context("building system clients")?;
    info!(
        version = %fingerprint.version,
        commit = %fingerprint.commit,
        chain = ?config.chain,
        "starting validation"
    );

    let validator = PipelineValidator::new(ctx, config, cancel);
    let outcome = validator.run(&fingerprint);
    let summary = outcome.summary;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        if let Some(failed) = summary
            .stages
            .iter()
            .find(|stage| stage.outcome == StageOutcome::Failed)
        {
            let headline = failed.detail.lines().next().unwrap_or("");
            eprintln!("FAILED at {}: {headline}", failed.stage);
            if failed.detail.lines().count() > 1 {
                eprintln!("--- diagnostics ---");
                eprintln!("{}", failed.detail);
                eprintln!("-------------------");
            }
        }
        print!("{}", summary.render_table());
    }

    Ok(if summary.passed {
        exit_codes::SUCCESS
    } else {
        exit_codes::VALIDATION_FAILED
    })
}
