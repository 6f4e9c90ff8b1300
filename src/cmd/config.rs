//! Configuration view and validation commands (`packforge config`).

use std::path::PathBuf;

use anyhow::Result;
use packforge::settings::{SETTINGS_FILE, Settings};

use super::super::{Cli, ConfigCommands};
use super::load_settings;

pub fn cmd_config(cli: &Cli, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let settings = load_settings(cli)?;

            println!();
            println!("Packforge Configuration");
            println!("=======================");
            println!();
            match &cli.config {
                Some(path) => println!("Config file: {}", path.display()),
                None if PathBuf::from(SETTINGS_FILE).is_file() => {
                    println!("Config file: {}", SETTINGS_FILE)
                }
                None => println!("No {} found; defaults and environment apply.", SETTINGS_FILE),
            }
            println!();
            print!("{}", toml::to_string_pretty(&settings)?);
            println!();
            println!(
                "github token: {}",
                if settings.github.token.is_some() { "set" } else { "not set" }
            );
            println!(
                "package repository token: {}",
                if settings.package_repository.token.is_some() {
                    "set"
                } else {
                    "not set"
                }
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            let settings = load_settings(cli)?;
            settings.validate()?;
            println!("Configuration is valid.");
        }
        Some(ConfigCommands::Init { force }) => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE));
            if path.exists() && !force {
                println!("{} already exists.", path.display());
                println!("Pass --force to overwrite it.");
                return Ok(());
            }

            Settings::default().save(&path)?;
            println!("Created {}", path.display());
            println!();
            println!("You can now customize:");
            println!("  - [service] workspace_root, artifact_dir, max_parallel");
            println!("  - [matrix] branch_prefix, default_distribution");
            println!("  - [github] and [package_repository] endpoints");
            println!();
        }
    }

    Ok(())
}
