//! Config command implementation.

use anyhow::{Context, Result};

use filedrop_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: &ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = super::load_config();
            print!("{}", config.to_toml().context("Failed to render config")?);
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }
        ConfigAction::Init { force } => {
            let path = Config::config_path();
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default()
                .save()
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("  Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}
