//! Shared domain types for packforge.
//!
//! These types cross crate boundaries: the pipeline, the sandbox runtime and
//! the publish director all speak in terms of build targets, package
//! identities and finding levels.

pub mod level;
pub mod package;
pub mod target;

pub use level::Level;
pub use package::{PackageIdentity, PackageType, ParseError};
pub use target::{BuildTarget, PackageFormat};
