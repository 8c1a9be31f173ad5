//! `pipeval config` - configuration inspection.

use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};
use pipeval_core::ValidatorConfig;

/// Exit codes for `pipeval config` commands.
pub mod exit_codes {
    /// Configuration is valid.
    pub const SUCCESS: u8 = 0;
    /// Configuration failed to load or validate.
    pub const INVALID_CONFIG: u8 = 1;
}

/// Configuration subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Parse and validate the config file, printing resolved settings.
    Check(CheckArgs),
}

/// Arguments for `pipeval config check`.
#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Also verify the referenced credential variables are set.
    #[arg(long)]
    pub credentials: bool,
}

/// Dispatches a configuration subcommand.
///
/// # Errors
///
/// Returns an error on I/O problems; validation failures are reported
/// through the exit code instead.
pub fn execute(config_path: &Path, command: &ConfigCommands) -> Result<u8> {
    match command {
        ConfigCommands::Check(args) => check(config_path, args),
    }
}

fn check(config_path: &Path, args: &CheckArgs) -> Result<u8> {
    let config = match ValidatorConfig::from_file(config_path) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("config invalid: {error}");
            return Ok(exit_codes::INVALID_CONFIG);
        },
    };

    println!("config ok: {}", config_path.display());
    println!("chain: {}", config.chain.join(" -> "));
    for env in &config.chain {
        let settings = config.env_settings(env);
        println!(
            "  {env}: app_job={} manifest_job={} app={} namespace={} selector={}",
            settings.app_job,
            settings.manifest_job,
            settings.app,
            settings.namespace,
            settings.selector
        );
    }
    println!(
        "credentials by reference: {} {} {} {}",
        config.ci.token_env,
        config.forge.token_env,
        config.gitops.token_env,
        config.workload.token_env
    );

    if args.credentials {
        match config.resolve_credentials() {
            Ok(_) => println!("credentials: all referenced variables are set"),
            Err(error) => {
                eprintln!("credentials: {error}");
                return Ok(exit_codes::INVALID_CONFIG);
            },
        }
    }

    Ok(exit_codes::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
        chain = ["dev"]

        [ci]
        base_url = "https://ci.example.com"
        user = "validator"

        [forge]
        base_url = "https://git.example.com"
        project = "platform/deploy"

        [gitops]
        base_url = "https://argocd.example.com"

        [workload]
        base_url = "https://kube.example.com"
        selector = "app=example-app"
    "#;

    #[test]
    fn check_accepts_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeval.toml");
        std::fs::write(&path, VALID).unwrap();

        let code = check(&path, &CheckArgs { credentials: false }).unwrap();
        assert_eq!(code, exit_codes::SUCCESS);
    }

    #[test]
    fn check_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeval.toml");
        std::fs::write(&path, "chain = []").unwrap();

        let code = check(&path, &CheckArgs { credentials: false }).unwrap();
        assert_eq!(code, exit_codes::INVALID_CONFIG);
    }

    #[test]
    fn check_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.toml");

        let code = check(&path, &CheckArgs { credentials: false }).unwrap();
        assert_eq!(code, exit_codes::INVALID_CONFIG);
    }

    #[test]
    fn credential_check_reports_unset_variables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeval.toml");
        // Point at a variable that is certainly unset.
        let config = VALID.replace(
            "user = \"validator\"",
            "user = \"validator\"\ntoken_env = \"PIPEVAL_TEST_SURELY_UNSET\"",
        );
        std::fs::write(&path, config).unwrap();

        let code = check(&path, &CheckArgs { credentials: true }).unwrap();
        assert_eq!(code, exit_codes::INVALID_CONFIG);
    }
}
