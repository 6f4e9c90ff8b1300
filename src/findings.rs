//! Findings: leveled, templated records a run accumulates.
//!
//! A [`Finding`] separates the taxonomy of a problem (its [`Template`]) from
//! the text shown to people (the rendered title and body). The same finding
//! drives the run verdict and, later, the body of a filed issue.
//!
//! ## Verdict rule
//!
//! A run fails iff at least one finding has level `error`. Warnings, info and
//! debug findings never flip the verdict but stay in the report.
//!
//! ## Example
//!
//! ```
//! use packforge::findings::{Finding, FindingLog};
//! use packforge::templates::Template;
//! use serde_json::json;
//!
//! let mut log = FindingLog::default();
//! log.push(Finding::warn(Template::AppstreamReleaseMissing, json!({"version": "1.0.0"})));
//! assert!(log.passes());
//!
//! log.push(Finding::error(Template::BuildNoPackage, json!({})));
//! assert!(log.fails());
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use packforge_common::Level;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::templates::{self, Template};

/// A single diagnostic record produced by a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    level: Level,
    template: Template,
    title: String,
    body: String,
    /// Unit that emitted the finding; stamped by the pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    /// Raw diagnostic text, e.g. an error chain or a log tail.
    #[serde(skip_serializing_if = "Option::is_none")]
    dump: Option<String>,
    #[serde(default)]
    critical: bool,
    #[serde(default)]
    data: Value,
    created_at: DateTime<Utc>,
}

impl Finding {
    /// Create a finding and render its text from `template`.
    pub fn new(level: Level, template: Template, data: Value) -> Self {
        let rendered = templates::render(template, &data);
        Self {
            level,
            template,
            title: rendered.title,
            body: rendered.body,
            unit: None,
            dump: None,
            critical: false,
            data,
            created_at: Utc::now(),
        }
    }

    pub fn debug(template: Template, data: Value) -> Self {
        Self::new(Level::Debug, template, data)
    }

    pub fn info(template: Template, data: Value) -> Self {
        Self::new(Level::Info, template, data)
    }

    pub fn warn(template: Template, data: Value) -> Self {
        Self::new(Level::Warn, template, data)
    }

    pub fn error(template: Template, data: Value) -> Self {
        Self::new(Level::Error, template, data)
    }

    /// Mark as critical. Critical findings are always at error level.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self.level = Level::Error;
        self
    }

    pub fn with_dump(mut self, dump: impl Into<String>) -> Self {
        let dump = dump.into();
        if !dump.is_empty() {
            self.dump = Some(dump);
        }
        self
    }

    /// Attach a caught error: the body becomes the error message and the
    /// debug representation is kept as the dump.
    pub fn set_error<E>(&mut self, err: &E)
    where
        E: fmt::Display + fmt::Debug + ?Sized,
    {
        self.body = format!("{:#}", err);
        self.dump = Some(format!("{:?}", err));
    }

    pub fn with_error<E>(mut self, err: &E) -> Self
    where
        E: fmt::Display + fmt::Debug + ?Sized,
    {
        self.set_error(err);
        self
    }

    pub(crate) fn stamp_unit(&mut self, unit: &str) {
        if self.unit.is_none() {
            self.unit = Some(unit.to_string());
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn template(&self) -> Template {
        self.template
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn dump(&self) -> Option<&str> {
        self.dump.as_deref()
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.title)?;
        if let Some(unit) = &self.unit {
            write!(f, " ({})", unit)?;
        }
        Ok(())
    }
}

/// Append-only, ordered log of a run's findings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingLog {
    entries: Vec<Finding>,
}

impl FindingLog {
    pub fn push(&mut self, finding: Finding) {
        self.entries.push(finding);
    }

    pub fn entries(&self) -> &[Finding] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True iff any finding is at error level or above.
    pub fn fails(&self) -> bool {
        self.entries.iter().any(|f| f.level.is_failing())
    }

    pub fn passes(&self) -> bool {
        !self.fails()
    }

    pub fn has_critical(&self) -> bool {
        self.entries.iter().any(|f| f.critical)
    }

    pub fn at_or_above(&self, level: Level) -> impl Iterator<Item = &Finding> {
        self.entries.iter().filter(move |f| f.level >= level)
    }

    pub fn summary(&self) -> FindingSummary {
        let mut summary = FindingSummary::default();
        for finding in &self.entries {
            match finding.level {
                Level::Debug => summary.debug += 1,
                Level::Info => summary.info += 1,
                Level::Warn => summary.warn += 1,
                Level::Error => summary.error += 1,
            }
        }
        summary
    }
}

/// Finding counts per level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingSummary {
    pub debug: usize,
    pub info: usize,
    pub warn: usize,
    pub error: usize,
}

impl fmt::Display for FindingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error(s), {} warning(s), {} info",
            self.error, self.warn, self.info
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_log_passes() {
        let log = FindingLog::default();
        assert!(log.passes());
        assert!(!log.fails());
    }

    #[test]
    fn test_info_and_warn_do_not_fail() {
        let mut log = FindingLog::default();
        log.push(Finding::debug(Template::ConfigMissing, json!({})));
        log.push(Finding::info(Template::ConfigMissing, json!({})));
        log.push(Finding::warn(Template::DesktopIconMissing, json!({"icon": "x"})));
        assert!(log.passes());
        assert!(!log.fails());
    }

    #[test]
    fn test_single_error_fails_regardless_of_others() {
        let mut log = FindingLog::default();
        log.push(Finding::info(Template::ConfigMissing, json!({})));
        log.push(Finding::error(Template::ControlNoBinary, json!({})));
        log.push(Finding::warn(Template::DesktopIconMissing, json!({"icon": "x"})));
        assert!(log.fails());
        assert!(!log.passes());
    }

    #[test]
    fn test_critical_forces_error_level() {
        let finding = Finding::warn(Template::BuildNoPackage, json!({})).critical();
        assert_eq!(finding.level(), Level::Error);
        assert!(finding.is_critical());
    }

    #[test]
    fn test_set_error_replaces_body_and_keeps_dump() {
        let err = anyhow::anyhow!("disk full").context("writing control file");
        let finding = Finding::error(
            Template::UnitFailed,
            json!({"unit": "pack-deb", "message": "placeholder"}),
        )
        .with_error(&err);

        assert_eq!(finding.body(), "writing control file: disk full");
        assert!(finding.dump().unwrap().contains("disk full"));
    }

    #[test]
    fn test_stamp_unit_does_not_overwrite() {
        let mut finding = Finding::info(Template::ConfigMissing, json!({}));
        finding.stamp_unit("project-config");
        finding.stamp_unit("other");
        assert_eq!(finding.unit(), Some("project-config"));
    }

    #[test]
    fn test_at_or_above_filters_by_level() {
        let mut log = FindingLog::default();
        log.push(Finding::info(Template::ConfigMissing, json!({})));
        log.push(Finding::warn(Template::DesktopIconMissing, json!({"icon": "x"})));
        log.push(Finding::error(Template::ControlNoBinary, json!({})));

        assert_eq!(log.at_or_above(Level::Warn).count(), 2);
        assert_eq!(log.at_or_above(Level::Error).count(), 1);
        assert_eq!(log.at_or_above(Level::Debug).count(), 3);
    }

    #[test]
    fn test_summary_counts_levels() {
        let mut log = FindingLog::default();
        log.push(Finding::warn(Template::DesktopIconMissing, json!({"icon": "x"})));
        log.push(Finding::warn(Template::AppstreamReleaseMissing, json!({"version": "1"})));
        log.push(Finding::error(Template::ControlNoBinary, json!({})));

        let summary = log.summary();
        assert_eq!(summary.warn, 2);
        assert_eq!(summary.error, 1);
        assert_eq!(summary.to_string(), "1 error(s), 2 warning(s), 0 info");
    }

    #[test]
    fn test_display_includes_unit() {
        let mut finding = Finding::error(Template::ControlNoBinary, json!({}));
        finding.stamp_unit("debian-control");
        assert_eq!(
            finding.to_string(),
            "[error] No binary package declared (debian-control)"
        );
    }

    #[test]
    fn test_with_dump_ignores_empty_text() {
        let finding = Finding::error(Template::BuildNoPackage, json!({})).with_dump("");
        assert!(finding.dump().is_none());
    }
}
