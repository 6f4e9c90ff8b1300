//! `debian-control`: source and binary package declarations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::Interrupt;
use crate::findings::Finding;
use crate::pipeline::{Pipeline, Unit};
use crate::templates::Template;

const CONTROL: &str = "debian/control";

/// One `Package:` paragraph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryPackage {
    pub name: String,
    #[serde(default)]
    pub architecture: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlInfo {
    pub source: Option<String>,
    pub binaries: Vec<BinaryPackage>,
}

impl ControlInfo {
    /// Name of the first binary package, if any.
    pub fn primary_binary(&self) -> Option<&str> {
        self.binaries.first().map(|b| b.name.as_str())
    }
}

type Paragraph = Vec<(String, String)>;

/// Split a deb822 document into paragraphs of `(field, value)` pairs.
///
/// Continuation lines are folded into the previous value; `#` comment lines
/// are skipped.
pub fn parse_paragraphs(content: &str) -> Result<Vec<Paragraph>, String> {
    let mut paragraphs = Vec::new();
    let mut current: Paragraph = Vec::new();

    for (index, line) in content.lines().enumerate() {
        if line.starts_with('#') {
            continue;
        }
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            let Some((_, value)) = current.last_mut() else {
                return Err(format!(
                    "line {}: continuation line without a field",
                    index + 1
                ));
            };
            let folded = line.trim();
            if folded != "." {
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(folded);
            }
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            return Err(format!("line {}: expected `Field: value`", index + 1));
        };
        let field = field.trim();
        if field.is_empty() || field.contains(char::is_whitespace) {
            return Err(format!("line {}: invalid field name `{}`", index + 1, field));
        }
        current.push((field.to_string(), value.trim().to_string()));
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs)
}

fn field<'a>(paragraph: &'a Paragraph, name: &str) -> Option<&'a str> {
    paragraph
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

impl ControlInfo {
    pub fn parse(content: &str) -> Result<Self, String> {
        let paragraphs = parse_paragraphs(content)?;
        let mut info = ControlInfo::default();
        for paragraph in &paragraphs {
            if let Some(source) = field(paragraph, "Source") {
                info.source.get_or_insert_with(|| source.to_string());
            }
            if let Some(name) = field(paragraph, "Package") {
                info.binaries.push(BinaryPackage {
                    name: name.to_string(),
                    architecture: field(paragraph, "Architecture")
                        .unwrap_or_default()
                        .to_string(),
                });
            }
        }
        Ok(info)
    }
}

#[derive(Default)]
pub struct DebianControl;

#[async_trait]
impl Unit for DebianControl {
    const NAME: &'static str = "debian-control";
    type Output = ControlInfo;

    async fn run(&self, cx: &mut Pipeline) -> Result<Self::Output, Interrupt> {
        let path = cx.workspace().repository().join(CONTROL);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(cx.critical(Finding::error(
                    Template::ControlMissing,
                    json!({"path": CONTROL}),
                )));
            }
            Err(e) => {
                return Err(cx.critical(
                    Finding::error(Template::ControlParse, json!({"path": CONTROL, "message": ""})).with_error(&e),
                ));
            }
        };

        let info = match ControlInfo::parse(&content) {
            Ok(info) => info,
            Err(message) => {
                return Err(cx.critical(Finding::error(
                    Template::ControlParse,
                    json!({"path": CONTROL, "message": message}),
                )));
            }
        };

        let expected = cx.package().debian_name();
        match info.source.as_deref() {
            Some(source) if source == expected => {}
            found => cx.report(Finding::error(
                Template::ControlSourceMismatch,
                json!({"found": found.unwrap_or("(none)"), "expected": expected}),
            )),
        }
        if info.binaries.is_empty() {
            cx.report(Finding::error(Template::ControlNoBinary, json!({})));
        }

        Ok(info)
    }
}
