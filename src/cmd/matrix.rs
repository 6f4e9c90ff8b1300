//! `packforge matrix`.

use anyhow::Result;
use console::style;
use packforge::matrix::resolve_matrix;
use packforge::repository;

use super::super::Cli;
use super::load_settings;

pub async fn cmd_matrix(cli: &Cli, repo: &str, json: bool) -> Result<()> {
    let settings = load_settings(cli)?;
    let source = repository::open(repo);
    let branches = source.references().await?;
    let targets = resolve_matrix(&branches, &settings.matrix);

    if json {
        println!("{}", serde_json::to_string_pretty(&targets)?);
        return Ok(());
    }

    println!();
    println!("Build matrix for {}", style(source.url()).cyan());
    println!();
    println!("{:<16} {:<12} Format", "Distribution", "Arch");
    println!("{:<16} {:<12} ------", "------------", "----");
    for target in &targets {
        println!(
            "{:<16} {:<12} {}",
            target.distribution, target.architecture, target.package_format
        );
    }
    println!();
    Ok(())
}
