//! packforge: review, build and publish Debian packages of store apps.
//!
//! A [`BuildRequest`](pipeline::BuildRequest) names a source repository, a
//! reference and a package identity. The [`BuildService`](service::BuildService)
//! resolves the distributions to build from the repository's packaging
//! branches and runs one [`Pipeline`](pipeline::Pipeline) per target. Every
//! container command goes through the sandbox runner in `packforge-runtime`.
//! The [`Director`](director::Director) then publishes passing builds and
//! files review findings as an issue.

pub mod director;
pub mod errors;
pub mod findings;
pub mod logging;
pub mod matrix;
pub mod pipeline;
pub mod repository;
pub mod service;
pub mod settings;
pub mod templates;
