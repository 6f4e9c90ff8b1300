//! Sandbox runner for packforge.
//!
//! ## Overview
//!
//! Build and validation commands never run on the host. Each one gets a
//! disposable container created from a named image, with the run's
//! workspace directories bind-mounted in, and the container is removed as
//! soon as the command finishes.
//!
//! ```text
//!   unit ──SandboxSpec──> Sandbox::run()
//!                            │ ensure_image()  (single flight per image name)
//!                            │ check mounts
//!                            v
//!                    ContainerEngine  (DockerEngine via bollard, or ScriptedEngine)
//!                            │ create → start → stream log → wait → remove
//!                            v
//!                     SandboxOutcome { exit_code, log_path }
//! ```
//!
//! A non-zero exit code is data for the caller. Everything else that goes
//! wrong (daemon unreachable, image build failure, missing mount source) is a
//! [`SandboxError`].

pub mod docker;
pub mod engine;
pub mod error;
pub mod sandbox;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use docker::DockerEngine;
pub use engine::{ContainerEngine, ContainerSpec, MANAGED_LABEL};
pub use error::SandboxError;
pub use sandbox::{Mount, Sandbox, SandboxConfig, SandboxOutcome, SandboxSpec};
