//! The task unit abstraction.
//!
//! A unit is a named check or build step with one entry point. Units are Rust
//! types, so the set of units is fixed at compile time and a misspelled
//! dependency does not compile.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Pipeline;
use crate::errors::Interrupt;

/// A named step resolved at most once per run.
///
/// `Output::default()` is written into the unit's data namespace before the
/// unit runs and is what dependents receive when the unit stops early.
#[async_trait]
pub trait Unit: Default + Send + Sync + 'static {
    /// Unique name; also the unit's data namespace.
    const NAME: &'static str;

    type Output: Clone + Default + Serialize + Send + Sync + 'static;

    async fn run(&self, cx: &mut Pipeline) -> Result<Self::Output, Interrupt>;
}

/// Lifecycle of a unit within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitState {
    Constructed,
    Running,
    Completed,
    Errored { critical: bool },
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored { .. })
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Errored { critical: true })
    }
}
