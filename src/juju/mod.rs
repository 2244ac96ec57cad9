//! Controller façade
//!
//! The narrow capability surface the planner and engine depend on: status
//! fetch, config get/set, charm refresh, channel switch, action invocation,
//! unit command execution and idle waits. Everything is async and
//! cancellable; failures carry a [`JujuErrorKind`] classification, and the
//! engine decides what is retryable.

pub mod cli;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::JujuError;
use crate::model::{Channel, ModelStatus};

pub use cli::JujuCliClient;

/// What an idle wait covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleScope {
    Application(String),
    Model,
}

/// Result of a controller action run on a unit.
#[derive(Debug, Clone, Default)]
pub struct ActionResult {
    pub status: String,
    pub results: BTreeMap<String, serde_json::Value>,
}

impl ActionResult {
    pub fn output(&self, key: &str) -> Option<&str> {
        self.results.get(key).and_then(|v| v.as_str())
    }
}

/// Result of a raw command run on a unit.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub code: i32,
}

/// Capability surface over the cluster controller.
#[async_trait]
pub trait JujuClient: Send + Sync {
    /// Fetch the full model status.
    async fn status(&self) -> Result<ModelStatus, JujuError>;

    /// Read an application's configuration, flattened to `key -> value`.
    async fn get_config(
        &self,
        app: &str,
    ) -> Result<BTreeMap<String, serde_json::Value>, JujuError>;

    /// Set a single configuration option.
    async fn set_config(&self, app: &str, key: &str, value: &str) -> Result<(), JujuError>;

    /// Refresh the charm to the latest revision of its current channel.
    async fn refresh_charm(&self, app: &str) -> Result<(), JujuError>;

    /// Switch the charm to a different channel.
    async fn set_channel(&self, app: &str, channel: &Channel) -> Result<(), JujuError>;

    /// Run a charm action on a unit. Parameters pass through verbatim;
    /// unknown-parameter failures surface as errors.
    async fn run_action(
        &self,
        unit: &str,
        action: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ActionResult, JujuError>;

    /// Run a shell command on a unit.
    async fn run_on_unit(&self, unit: &str, command: &str) -> Result<CommandOutput, JujuError>;

    /// Wait until the application (or the whole model) settles into the
    /// idle state. Expiry is a timeout failure, never retried.
    async fn wait_for_idle(&self, scope: IdleScope, timeout: Duration) -> Result<(), JujuError>;
}
