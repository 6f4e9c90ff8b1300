//! Static finding text, keyed by template id.
//!
//! Each template is a markdown file under `templates/`, embedded into the
//! binary. The first `# ` line is the title; everything after it is the body.
//! Both are rendered with Handlebars against the finding's data, without HTML
//! escaping since the output is markdown.

use std::fmt;
use std::sync::LazyLock;

use handlebars::Handlebars;
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/templates/"]
struct TemplateFiles;

/// Identifier of a finding template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Template {
    ConfigMissing,
    ConfigParse,
    ConfigUnknownKeys,
    ConfigInvalid,
    ChangelogMissing,
    ChangelogParse,
    ChangelogPackageMismatch,
    ChangelogVersionMismatch,
    ChangelogDistribution,
    ControlMissing,
    ControlParse,
    ControlSourceMismatch,
    ControlNoBinary,
    BuildFailed,
    BuildNoPackage,
    ExtractFailed,
    AppstreamMissing,
    AppstreamInvalid,
    AppstreamIdMismatch,
    AppstreamReleaseMissing,
    AppstreamPrice,
    DesktopMissing,
    DesktopInvalid,
    DesktopIconMissing,
    PackFailed,
    UnitFailed,
    UnitCycle,
    RunAborted,
    SetupFailed,
    ReportIssue,
}

impl Template {
    pub const ALL: &'static [Template] = &[
        Template::ConfigMissing,
        Template::ConfigParse,
        Template::ConfigUnknownKeys,
        Template::ConfigInvalid,
        Template::ChangelogMissing,
        Template::ChangelogParse,
        Template::ChangelogPackageMismatch,
        Template::ChangelogVersionMismatch,
        Template::ChangelogDistribution,
        Template::ControlMissing,
        Template::ControlParse,
        Template::ControlSourceMismatch,
        Template::ControlNoBinary,
        Template::BuildFailed,
        Template::BuildNoPackage,
        Template::ExtractFailed,
        Template::AppstreamMissing,
        Template::AppstreamInvalid,
        Template::AppstreamIdMismatch,
        Template::AppstreamReleaseMissing,
        Template::AppstreamPrice,
        Template::DesktopMissing,
        Template::DesktopInvalid,
        Template::DesktopIconMissing,
        Template::PackFailed,
        Template::UnitFailed,
        Template::UnitCycle,
        Template::RunAborted,
        Template::SetupFailed,
        Template::ReportIssue,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Template::ConfigMissing => "config-missing",
            Template::ConfigParse => "config-parse",
            Template::ConfigUnknownKeys => "config-unknown-keys",
            Template::ConfigInvalid => "config-invalid",
            Template::ChangelogMissing => "changelog-missing",
            Template::ChangelogParse => "changelog-parse",
            Template::ChangelogPackageMismatch => "changelog-package-mismatch",
            Template::ChangelogVersionMismatch => "changelog-version-mismatch",
            Template::ChangelogDistribution => "changelog-distribution",
            Template::ControlMissing => "control-missing",
            Template::ControlParse => "control-parse",
            Template::ControlSourceMismatch => "control-source-mismatch",
            Template::ControlNoBinary => "control-no-binary",
            Template::BuildFailed => "build-failed",
            Template::BuildNoPackage => "build-no-package",
            Template::ExtractFailed => "extract-failed",
            Template::AppstreamMissing => "appstream-missing",
            Template::AppstreamInvalid => "appstream-invalid",
            Template::AppstreamIdMismatch => "appstream-id-mismatch",
            Template::AppstreamReleaseMissing => "appstream-release-missing",
            Template::AppstreamPrice => "appstream-price",
            Template::DesktopMissing => "desktop-missing",
            Template::DesktopInvalid => "desktop-invalid",
            Template::DesktopIconMissing => "desktop-icon-missing",
            Template::PackFailed => "pack-failed",
            Template::UnitFailed => "unit-failed",
            Template::UnitCycle => "unit-cycle",
            Template::RunAborted => "run-aborted",
            Template::SetupFailed => "setup-failed",
            Template::ReportIssue => "report-issue",
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Title and body produced from a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub title: String,
    pub body: String,
}

struct Source {
    title: String,
    body: String,
}

static REGISTRY: LazyLock<Handlebars<'static>> = LazyLock::new(|| {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(false);
    handlebars.register_escape_fn(handlebars::no_escape);

    for template in Template::ALL {
        let Some(source) = load(*template) else {
            continue;
        };
        let id = template.id();
        if let Err(e) = handlebars.register_template_string(&format!("{}.title", id), &source.title)
        {
            tracing::warn!(template = id, error = %e, "invalid template title");
        }
        if let Err(e) = handlebars.register_template_string(&format!("{}.body", id), &source.body) {
            tracing::warn!(template = id, error = %e, "invalid template body");
        }
    }
    handlebars
});

fn load(template: Template) -> Option<Source> {
    let file = TemplateFiles::get(&format!("{}.md", template.id()))?;
    let text = String::from_utf8_lossy(&file.data).into_owned();
    Some(split(&text))
}

fn split(text: &str) -> Source {
    let text = text.trim_start();
    match text.split_once('\n') {
        Some((first, rest)) if first.starts_with("# ") => Source {
            title: first.trim_start_matches("# ").trim().to_string(),
            body: rest.trim().to_string(),
        },
        None if text.starts_with("# ") => Source {
            title: text.trim_start_matches("# ").trim().to_string(),
            body: String::new(),
        },
        _ => Source {
            title: String::new(),
            body: text.trim().to_string(),
        },
    }
}

/// Render `template` against `data`.
///
/// Never fails: a missing or broken template falls back to the template id as
/// title and the raw data as body, so a rendering problem cannot hide a
/// finding.
pub fn render(template: Template, data: &Value) -> Rendered {
    let id = template.id();
    let title = REGISTRY
        .render(&format!("{}.title", id), data)
        .unwrap_or_else(|_| id.to_string());
    let body = REGISTRY
        .render(&format!("{}.body", id), data)
        .unwrap_or_else(|_| fallback_body(data));
    Rendered {
        title: title.trim().to_string(),
        body: body.trim().to_string(),
    }
}

fn fallback_body(data: &Value) -> String {
    match data {
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}
