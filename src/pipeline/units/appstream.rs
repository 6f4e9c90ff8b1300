//! `appstream`: validate the installed AppStream metadata.
//!
//! With a `priceUSD` in the project config, the suggested price is written
//! into the metadata as an `x-appcenter-suggested-price` custom value before
//! the package is repacked.

use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use packforge_runtime::SandboxSpec;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{EXTRACT_MOUNT, ExtractDeb, ProjectConfigUnit, container_path, log_tail};
use crate::errors::Interrupt;
use crate::findings::Finding;
use crate::pipeline::{Pipeline, Unit};
use crate::templates::Template;

pub const PRICE_KEY: &str = "x-appcenter-suggested-price";

static ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<id(?:\s[^>]*)?>\s*([^<]+?)\s*</id>").unwrap());
static RELEASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<release\b[^>]*?\bversion\s*=\s*"([^"]+)""#).unwrap());
static PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<value\s+key\s*=\s*"x-appcenter-suggested-price"\s*>[^<]*</value>"#).unwrap()
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStreamOutput {
    /// Metadata file, relative to the extracted tree.
    pub path: Option<PathBuf>,
    pub id: Option<String>,
    pub releases: Vec<String>,
    /// Whether the metadata was rewritten.
    pub modified: bool,
}

/// Metadata locations checked, in order, for package `name`.
pub fn candidates(name: &str) -> Vec<PathBuf> {
    vec![
        PathBuf::from(format!("usr/share/metainfo/{}.appdata.xml", name)),
        PathBuf::from(format!("usr/share/metainfo/{}.metainfo.xml", name)),
        PathBuf::from(format!("usr/share/appdata/{}.appdata.xml", name)),
    ]
}

pub fn component_id(xml: &str) -> Option<String> {
    ID.captures(xml).map(|caps| caps[1].to_string())
}

pub fn release_versions(xml: &str) -> Vec<String> {
    RELEASE
        .captures_iter(xml)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// `5.0` renders as `5`, `4.99` as `4.99`.
pub fn format_price(price: f64) -> String {
    if price.fract() == 0.0 {
        format!("{:.0}", price)
    } else {
        format!("{}", price)
    }
}

/// Set the suggested price in `xml`. `None` when there is no component to
/// hold it.
pub fn inject_price(xml: &str, price: &str) -> Option<String> {
    let value = format!(r#"<value key="{}">{}</value>"#, PRICE_KEY, price);
    if PRICE.is_match(xml) {
        return Some(PRICE.replace(xml, regex::NoExpand(&value)).into_owned());
    }
    if let Some(index) = xml.find("</custom>") {
        let mut out = xml.to_string();
        out.insert_str(index, &format!("  {}\n  ", value));
        return Some(out);
    }
    let index = xml.rfind("</component>")?;
    let mut out = xml.to_string();
    out.insert_str(index, &format!("  <custom>\n    {}\n  </custom>\n", value));
    Some(out)
}

fn id_matches(id: &str, name: &str) -> bool {
    id == name || id.strip_suffix(".desktop") == Some(name)
}

#[derive(Default)]
pub struct AppStream;

#[async_trait]
impl Unit for AppStream {
    const NAME: &'static str = "appstream";
    type Output = AppStreamOutput;

    async fn run(&self, cx: &mut Pipeline) -> Result<Self::Output, Interrupt> {
        let extract = cx.require::<ExtractDeb>().await?;
        let config = cx.require::<ProjectConfigUnit>().await?;
        if extract.is_empty() {
            return Err(Interrupt::Unit);
        }

        let name = cx.package().name.clone();
        let paths = candidates(&name);
        let Some(relative) = paths
            .iter()
            .find(|path| extract.root.join(path).is_file())
            .cloned()
        else {
            let listed: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
            cx.report(Finding::error(
                Template::AppstreamMissing,
                json!({"paths": listed}),
            ));
            return Err(Interrupt::Unit);
        };
        let file = extract.root.join(&relative);

        let workspace = cx.workspace().clone();
        let spec = SandboxSpec::new(
            cx.settings().images.tools.as_str(),
            [
                "appstreamcli".to_string(),
                "validate".to_string(),
                "--no-net".to_string(),
                container_path(&extract.root, &file, EXTRACT_MOUNT),
            ],
        )
        .mount(&extract.root, EXTRACT_MOUNT)
        .log_name(Self::NAME);
        let outcome = cx.sandbox().run(&spec, workspace.root()).await?;
        if !outcome.success() {
            let tail = log_tail(cx, &outcome).await;
            cx.report(
                Finding::error(
                    Template::AppstreamInvalid,
                    json!({
                        "exit_code": outcome.exit_code,
                        "log": outcome.log_path.display().to_string(),
                    }),
                )
                .with_dump(tail),
            );
        }

        let xml = tokio::fs::read_to_string(&file).await?;
        let id = component_id(&xml);
        match id.as_deref() {
            Some(id) if id_matches(id, &name) => {}
            found => cx.report(Finding::error(
                Template::AppstreamIdMismatch,
                json!({"found": found.unwrap_or("(none)"), "expected": name}),
            )),
        }

        let releases = release_versions(&xml);
        let version = cx.package().version.clone();
        if !releases.iter().any(|r| r.trim_start_matches('v') == version) {
            cx.report(Finding::warn(
                Template::AppstreamReleaseMissing,
                json!({"version": version}),
            ));
        }

        let mut modified = false;
        if let Some(price) = config.price_usd.filter(|p| *p > 0.0) {
            let price = format_price(price);
            if let Some(updated) = inject_price(&xml, &price) {
                tokio::fs::write(&file, &updated).await?;
                modified = true;
                cx.report(Finding::info(
                    Template::AppstreamPrice,
                    json!({"price": price}),
                ));
            }
        }

        Ok(AppStreamOutput {
            path: Some(relative),
            id,
            releases,
            modified,
        })
    }
}
