//! `project-config`: the per-project `.packforge.json`.
//!
//! ```json
//! {
//!   "priceUSD": 5,
//!   "issueLabel": "packforge",
//!   "endpoints": { "github": true, "elementary": true },
//!   "log": { "enabled": true, "level": "warn", "label": "review", "color": "e74c3c" }
//! }
//! ```
//!
//! Every key is optional. A value of the wrong type is reported and replaced
//! by its default; unknown keys are reported at info level.

use async_trait::async_trait;
use packforge_common::Level;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::errors::Interrupt;
use crate::findings::Finding;
use crate::pipeline::{Pipeline, Unit};
use crate::templates::Template;

pub const CONFIG_FILE: &str = ".packforge.json";

const DEFAULT_LABEL: &str = "packforge";
const DEFAULT_COLOR: &str = "e74c3c";

/// Where a passing build is published.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(default)]
    pub github: bool,
    #[serde(default)]
    pub elementary: bool,
}

/// Issue reporting for failed reviews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub enabled: bool,
    /// Lowest finding level that is reported.
    pub level: Level,
    pub label: String,
    /// Label color as six hex digits, without `#`.
    pub color: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: Level::Error,
            label: DEFAULT_LABEL.to_string(),
            color: DEFAULT_COLOR.to_string(),
        }
    }
}

/// Resolved project configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(rename = "priceUSD", default, skip_serializing_if = "Option::is_none")]
    pub price_usd: Option<f64>,
    pub issue_label: String,
    pub endpoints: Endpoints,
    pub log: LogConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            price_usd: None,
            issue_label: DEFAULT_LABEL.to_string(),
            endpoints: Endpoints::default(),
            log: LogConfig::default(),
        }
    }
}

/// Problems met while reading a config document.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConfigIssues {
    pub unknown: Vec<String>,
    /// `(key, expected)` pairs for values of the wrong type.
    pub invalid: Vec<(String, &'static str)>,
}

fn take_bool(
    object: &Map<String, Value>,
    key: &str,
    path: &str,
    issues: &mut ConfigIssues,
) -> Option<bool> {
    match object.get(key)? {
        Value::Bool(b) => Some(*b),
        _ => {
            issues.invalid.push((path.to_string(), "a boolean"));
            None
        }
    }
}

fn take_string(
    object: &Map<String, Value>,
    key: &str,
    path: &str,
    issues: &mut ConfigIssues,
) -> Option<String> {
    match object.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => {
            issues.invalid.push((path.to_string(), "a non-empty string"));
            None
        }
    }
}

fn take_object<'a>(
    object: &'a Map<String, Value>,
    key: &str,
    issues: &mut ConfigIssues,
) -> Option<&'a Map<String, Value>> {
    match object.get(key)? {
        Value::Object(inner) => Some(inner),
        _ => {
            issues.invalid.push((key.to_string(), "an object"));
            None
        }
    }
}

fn unknown_keys(object: &Map<String, Value>, known: &[&str], prefix: &str, issues: &mut ConfigIssues) {
    for key in object.keys() {
        if !known.contains(&key.as_str()) {
            issues.unknown.push(format!("{}{}", prefix, key));
        }
    }
}

fn is_hex_color(color: &str) -> bool {
    color.len() == 6 && color.chars().all(|c| c.is_ascii_hexdigit())
}

impl ProjectConfig {
    /// Resolve a parsed document into a configuration.
    pub fn from_value(value: &Value) -> (Self, ConfigIssues) {
        let mut config = Self::default();
        let mut issues = ConfigIssues::default();
        let Value::Object(root) = value else {
            issues.invalid.push(("(root)".to_string(), "an object"));
            return (config, issues);
        };

        unknown_keys(root, &["priceUSD", "issueLabel", "endpoints", "log"], "", &mut issues);

        match root.get("priceUSD") {
            None | Some(Value::Null) => {}
            Some(Value::Number(n)) => match n.as_f64() {
                Some(price) if price >= 0.0 => config.price_usd = Some(price),
                _ => issues
                    .invalid
                    .push(("priceUSD".to_string(), "a non-negative number")),
            },
            Some(_) => issues
                .invalid
                .push(("priceUSD".to_string(), "a non-negative number")),
        }

        if let Some(label) = take_string(root, "issueLabel", "issueLabel", &mut issues) {
            config.issue_label = label;
        }
        config.log.label = config.issue_label.clone();

        if let Some(endpoints) = take_object(root, "endpoints", &mut issues) {
            unknown_keys(endpoints, &["github", "elementary"], "endpoints.", &mut issues);
            if let Some(github) = take_bool(endpoints, "github", "endpoints.github", &mut issues) {
                config.endpoints.github = github;
            }
            if let Some(elementary) =
                take_bool(endpoints, "elementary", "endpoints.elementary", &mut issues)
            {
                config.endpoints.elementary = elementary;
            }
        }

        if let Some(log) = take_object(root, "log", &mut issues) {
            unknown_keys(log, &["enabled", "level", "label", "color"], "log.", &mut issues);
            if let Some(enabled) = take_bool(log, "enabled", "log.enabled", &mut issues) {
                config.log.enabled = enabled;
            }
            match log.get("level") {
                None => {}
                Some(Value::String(level)) => match level.parse::<Level>() {
                    Ok(level) => config.log.level = level,
                    Err(_) => issues
                        .invalid
                        .push(("log.level".to_string(), "one of debug, info, warn, error")),
                },
                Some(_) => issues
                    .invalid
                    .push(("log.level".to_string(), "one of debug, info, warn, error")),
            }
            if let Some(label) = take_string(log, "label", "log.label", &mut issues) {
                config.log.label = label;
            }
            if let Some(color) = take_string(log, "color", "log.color", &mut issues) {
                let color = color.trim_start_matches('#').to_lowercase();
                if is_hex_color(&color) {
                    config.log.color = color;
                } else {
                    issues
                        .invalid
                        .push(("log.color".to_string(), "six hex digits"));
                }
            }
        }

        (config, issues)
    }
}

/// Reads `.packforge.json` from the checked-out repository.
#[derive(Default)]
pub struct ProjectConfigUnit;

#[async_trait]
impl Unit for ProjectConfigUnit {
    const NAME: &'static str = "project-config";
    type Output = ProjectConfig;

    async fn run(&self, cx: &mut Pipeline) -> Result<Self::Output, Interrupt> {
        let path = cx.workspace().repository().join(CONFIG_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                cx.report(Finding::info(
                    Template::ConfigMissing,
                    json!({"file": CONFIG_FILE}),
                ));
                return Ok(ProjectConfig::default());
            }
            Err(e) => return Err(e.into()),
        };

        let value: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                cx.report(Finding::error(
                    Template::ConfigParse,
                    json!({
                        "file": CONFIG_FILE,
                        "line": e.line(),
                        "column": e.column(),
                        "message": e.to_string(),
                    }),
                ));
                return Err(Interrupt::Unit);
            }
        };

        let (config, issues) = ProjectConfig::from_value(&value);
        if !issues.unknown.is_empty() {
            cx.report(Finding::info(
                Template::ConfigUnknownKeys,
                json!({"file": CONFIG_FILE, "keys": issues.unknown}),
            ));
        }
        for (key, expected) in issues.invalid {
            cx.report(Finding::error(
                Template::ConfigInvalid,
                json!({"file": CONFIG_FILE, "key": key, "expected": expected}),
            ));
        }
        Ok(config)
    }
}
