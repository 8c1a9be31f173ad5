//! `pipeval preflight` - standalone reachability probe.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use pipeval_core::validator::{PipelineValidator, ValidatorContext};
use pipeval_core::{CancelToken, ValidatorConfig};

/// Exit codes for `pipeval preflight`.
pub mod exit_codes {
    /// All four systems are reachable and authenticated.
    pub const SUCCESS: u8 = 0;
    /// At least one system failed the probe.
    pub const PREFLIGHT_FAILED: u8 = 1;
}

/// Arguments for `pipeval preflight`.
#[derive(Debug, Args)]
pub struct PreflightArgs {
    /// Emit JSON output.
    #[arg(long)]
    pub json: bool,
}

/// Probes all four systems read-only and reports the result.
///
/// # Errors
///
/// Returns an error for configuration problems; probe failures are
/// reported through the exit code instead.
pub fn execute(config_path: &Path, args: &PreflightArgs) -> Result<u8> {
    let config = ValidatorConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let ctx = ValidatorContext::from_config(&config).context("building system clients")?;
    let validator = PipelineValidator::new(ctx, config, CancelToken::new());

    match validator.preflight() {
        Ok(detail) => {
            if args.json {
                println!(r#"{{"ok": true, "detail": {}}}"#, serde_json::to_string(&detail)?);
            } else {
                println!("preflight ok: {detail}");
            }
            Ok(exit_codes::SUCCESS)
        },
        Err(error) => {
            if args.json {
                println!(
                    r#"{{"ok": false, "error": {}}}"#,
                    serde_json::to_string(&error.to_string())?
                );
            } else {
                eprintln!("preflight failed: {error}");
            }
            Ok(exit_codes::PREFLIGHT_FAILED)
        },
    }
}
