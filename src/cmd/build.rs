//! `packforge build`.

use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use packforge::director::Director;
use packforge::pipeline::{BuildRequest, RepositoryHandle};
use packforge::repository;
use packforge::service::{BuildService, ServiceRun};
use packforge_common::{PackageIdentity, PackageType};
use packforge_runtime::{DockerEngine, Sandbox};

use super::super::Cli;
use super::load_settings;

pub struct BuildArgs {
    pub repo: String,
    pub reference: String,
    pub name: String,
    pub version: String,
    pub package_type: PackageType,
    pub distribution: Option<String>,
    pub json: bool,
    pub direct: bool,
    pub max_parallel: Option<usize>,
}

/// Build every target and print the results. Returns whether all runs passed.
pub async fn cmd_build(cli: &Cli, args: BuildArgs) -> Result<bool> {
    let mut settings = load_settings(cli)?;
    if let Some(max) = args.max_parallel {
        settings.service.max_parallel = max;
    }
    settings.validate()?;

    let package = PackageIdentity::new(&args.name, &args.version, args.package_type)?;
    let request = BuildRequest {
        repository: RepositoryHandle {
            url: args.repo.clone(),
            reference: args.reference.clone(),
        },
        package,
    };

    let engine = DockerEngine::connect().context("Failed to connect to the Docker daemon")?;
    let sandbox = Arc::new(Sandbox::new(Arc::new(engine), settings.sandbox_config()));
    let settings = Arc::new(settings);

    let mut service = BuildService::new(Arc::clone(&settings), sandbox);
    if args.direct {
        service = service.with_director(Director::from_settings(&settings));
    }

    let source = repository::open(&args.repo);
    let runs = service
        .build(request, source, args.distribution.as_deref())
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
    } else {
        for run in &runs {
            print_run(run);
        }
    }

    Ok(runs.iter().all(|run| run.report.passes()))
}

fn print_run(run: &ServiceRun) {
    let report = &run.report;
    let verdict = if report.passes() {
        style("PASS").green().bold()
    } else {
        style("FAIL").red().bold()
    };

    println!();
    println!(
        "{} {} {} ({})",
        verdict,
        report.request.package.name,
        report.request.package.version,
        style(&report.target).cyan()
    );
    println!("  run:      {}", style(report.id).dim());
    println!("  findings: {}", report.findings.summary());
    if let Some(abort) = &report.aborted {
        println!(
            "  aborted:  {} {}",
            style(&abort.unit).yellow(),
            style(&abort.reason).dim()
        );
    }

    for finding in report.findings.entries() {
        println!("    {}", finding);
    }
    for artifact in &report.artifacts {
        println!(
            "  artifact: {} {}",
            artifact.path.display(),
            style(&artifact.sha256[..artifact.sha256.len().min(12)]).dim()
        );
    }

    if let Some(direction) = &run.direction {
        if direction.published {
            println!("  published to the package repository");
        }
        for url in &direction.released {
            println!("  released: {}", url);
        }
        if let Some(issue) = &direction.issue {
            println!("  issue:    #{} {}", issue.number, issue.url);
        }
        for error in &direction.errors {
            println!("  {} {}", style("warning:").yellow(), error);
        }
    }
}
