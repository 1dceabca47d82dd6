//! Delivery of status transitions to the notification collaborator.

use async_trait::async_trait;
use tokio::sync::mpsc;

use netsync_core::{ChangeKind, StatusChange};

#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    /// Called once per pass with every transition that pass observed.
    async fn notify(&self, changes: &[StatusChange]);
}

/// Logs each transition as a structured event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl ChangeNotifier for TracingNotifier {
    async fn notify(&self, changes: &[StatusChange]) {
        for change in changes {
            let kind = match change.kind {
                ChangeKind::Node => "node",
                ChangeKind::Interface => "interface",
            };
            tracing::info!(
                kind,
                name = %change.name,
                previous = %change.previous_status,
                current = %change.current_status,
                "Status changed"
            );
        }
    }
}

/// Forwards transitions to an async consumer. A closed receiver drops them.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<StatusChange>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::Sender<StatusChange>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ChangeNotifier for ChannelNotifier {
    async fn notify(&self, changes: &[StatusChange]) {
        for change in changes {
            if self.tx.send(change.clone()).await.is_err() {
                tracing::warn!(dropped = changes.len(), "Change receiver closed");
                return;
            }
        }
    }
}
