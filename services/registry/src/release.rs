//! Release notifications sent when a module version is published.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tables::{TableSchema, Tables};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::{RegistryError, RegistryResult};
use crate::rows::{ensure_table, failed, to_item};

/// A link attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Link text.
    pub title: String,
    /// Link target.
    pub url: String,
}

/// A published release of a module or provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// What was released, `module` or `provider`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Owning organization.
    pub organization: String,
    /// Address of the released module or provider.
    pub name: String,
    /// Released version.
    pub version: String,
    /// Human readable summary.
    pub description: String,
    /// Related links.
    #[serde(default)]
    pub links: Vec<Link>,
}

/// Receives release notifications.
#[async_trait::async_trait]
pub trait ReleasePublisher: fmt::Debug + Send + Sync {
    /// Record a release.
    async fn publish(&self, release: Release) -> RegistryResult<()>;
}

/// Publish `release` on a background task, logging failure.
///
/// The caller does not wait for the notification; its outcome never affects
/// the operation which triggered it.
pub(crate) fn notify(publisher: Arc<dyn ReleasePublisher>, release: Release) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let (name, version) = (release.name.clone(), release.version.clone());
            match publisher.publish(release).await {
                Ok(()) => tracing::debug!(%name, %version, "Release published"),
                Err(error) => {
                    tracing::error!(%name, %version, %error, "Failed to publish release")
                }
            }
        }
        .in_current_span(),
    )
}

/// Drops every release.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReleasePublisher;

#[async_trait::async_trait]
impl ReleasePublisher for NoopReleasePublisher {
    async fn publish(&self, release: Release) -> RegistryResult<()> {
        tracing::trace!(name = %release.name, version = %release.version, "Release notifications disabled");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ReleaseRow<'r> {
    #[serde(flatten)]
    release: &'r Release,
    created_at: DateTime<Utc>,
}

/// Records releases in a table keyed by name and version.
#[derive(Debug, Clone)]
pub struct TableReleasePublisher {
    tables: Tables,
    table: String,
}

impl TableReleasePublisher {
    /// Write releases to `table`.
    pub fn new(tables: Tables, table: impl Into<String>) -> Self {
        Self {
            tables,
            table: table.into(),
        }
    }

    /// The releases table layout.
    pub fn schema(&self) -> TableSchema {
        TableSchema::new(&self.table, "name").with_range_key("version")
    }

    /// Create the releases table unless it exists.
    pub async fn initialize(&self) -> RegistryResult<()> {
        ensure_table(&self.tables, &self.schema()).await
    }
}

#[async_trait::async_trait]
impl ReleasePublisher for TableReleasePublisher {
    #[tracing::instrument(skip(self, release), fields(name = %release.name, version = %release.version))]
    async fn publish(&self, release: Release) -> RegistryResult<()> {
        let row = ReleaseRow {
            release: &release,
            created_at: Utc::now(),
        };
        let item = to_item(&row, "release")?;
        self.tables
            .put_item(&self.table, item)
            .await
            .map_err(failed(RegistryError::Create("release")))
    }
}

/// Test double which records every release it receives.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingPublisher {
    releases: tokio::sync::Mutex<Vec<Release>>,
    notify: tokio::sync::Notify,
}

#[cfg(test)]
impl RecordingPublisher {
    pub(crate) async fn releases(&self) -> Vec<Release> {
        self.releases.lock().await.clone()
    }

    /// Wait until at least `count` releases have arrived.
    pub(crate) async fn wait_for(&self, count: usize) -> Vec<Release> {
        loop {
            let notified = self.notify.notified();
            let releases = self.releases().await;
            if releases.len() >= count {
                return releases;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl ReleasePublisher for RecordingPublisher {
    async fn publish(&self, release: Release) -> RegistryResult<()> {
        self.releases.lock().await.push(release);
        self.notify.notify_waiters();
        Ok(())
    }
}
