//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `build`  | `Build`          |
//! | `matrix` | `Matrix`         |
//! | `config` | `Config`         |

pub mod build;
pub mod config;
pub mod matrix;

pub use build::{BuildArgs, cmd_build};
pub use config::cmd_config;
pub use matrix::cmd_matrix;

use anyhow::Result;
use packforge::settings::Settings;

use super::Cli;

/// Settings from `--config` or discovery, with environment overrides.
pub(crate) fn load_settings(cli: &Cli) -> Result<Settings> {
    Settings::load(cli.config.as_deref())
}
