use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing domain values out of user input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid package type '{0}'. Valid values: app, library, system-app")]
    PackageType(String),

    #[error("Invalid level '{0}'. Valid values: debug, info, warn, error")]
    Level(String),

    #[error("Invalid package name '{0}': expected a reverse-domain name like com.example.app")]
    PackageName(String),

    #[error("Package version must not be empty")]
    EmptyVersion,
}

/// Declared kind of the package under review.
///
/// Libraries get the reduced task list; everything else is extracted,
/// inspected and repacked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageType {
    #[default]
    App,
    Library,
    SystemApp,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::App => "app",
            PackageType::Library => "library",
            PackageType::SystemApp => "system-app",
        }
    }

    /// Whether the package ships an installed tree that is inspected after build.
    pub fn is_inspected(&self) -> bool {
        !matches!(self, PackageType::Library)
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "app" | "application" => Ok(PackageType::App),
            "library" | "lib" => Ok(PackageType::Library),
            "system-app" | "system_app" => Ok(PackageType::SystemApp),
            _ => Err(ParseError::PackageType(s.to_string())),
        }
    }
}

/// Identity of the package a run builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIdentity {
    /// Reverse-domain name, e.g. `com.github.someone.app`.
    pub name: String,
    pub version: String,
    #[serde(rename = "type", default)]
    pub package_type: PackageType,
}

impl PackageIdentity {
    /// Create a validated package identity.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        package_type: PackageType,
    ) -> Result<Self, ParseError> {
        let name = name.into();
        let version = version.into();
        if !is_reverse_domain(&name) {
            return Err(ParseError::PackageName(name));
        }
        if version.trim().is_empty() {
            return Err(ParseError::EmptyVersion);
        }
        Ok(Self {
            name,
            version: version.trim().trim_start_matches('v').to_string(),
            package_type,
        })
    }

    /// Name of the binary package as Debian tooling writes it.
    pub fn debian_name(&self) -> String {
        self.name.to_lowercase()
    }
}

fn is_reverse_domain(name: &str) -> bool {
    let segments: Vec<&str> = name.split('.').collect();
    segments.len() >= 2
        && segments.iter().all(|s| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}
