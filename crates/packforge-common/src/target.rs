use serde::{Deserialize, Serialize};
use std::fmt;

/// Native package format produced by a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageFormat {
    #[default]
    Deb,
}

impl PackageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            PackageFormat::Deb => "deb",
        }
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One cell of the build matrix.
///
/// Uniqueness in a matrix is by the whole tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildTarget {
    pub distribution: String,
    pub architecture: String,
    #[serde(rename = "packageType")]
    pub package_format: PackageFormat,
}

impl BuildTarget {
    pub fn new(distribution: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            distribution: distribution.into(),
            architecture: architecture.into(),
            package_format: PackageFormat::Deb,
        }
    }

    /// Target for the given distribution on amd64.
    pub fn amd64(distribution: impl Into<String>) -> Self {
        Self::new(distribution, "amd64")
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({})",
            self.distribution, self.architecture, self.package_format
        )
    }
}
