//! Operator-facing notifications and navigation.

use serde::{Deserialize, Serialize};

/// Pages the orchestrator can send the operator to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Page {
    Main,
    Settings,
}

/// Surfaces messages to the operator.
pub trait OperatorUi: Send + Sync {
    fn notify(&self, message: &str);

    fn navigate(&self, page: Page);
}

/// An [`OperatorUi`] that reports through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogUi;

impl OperatorUi for LogUi {
    fn notify(&self, message: &str) {
        tracing::warn!(message, "Operator notification");
    }

    fn navigate(&self, page: Page) {
        tracing::info!(page = %page, "Operator action required, open the {} page", page);
    }
}
