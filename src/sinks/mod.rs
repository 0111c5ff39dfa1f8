//! Delivery targets for an assembled digest.
//!
//! - [`RecordSink`]: persists the digest as a flat [`Record`] (spreadsheet-like backends)
//! - [`MessageSink`]: sends a [`FormattedMessage`] to a named chat target
//! - [`json::JsonArchiveSink`]: keeps a dated JSON copy of every digest on disk
//!
//! Sinks make a single attempt; timeouts and retries are applied by the
//! orchestrator so every sink gets the same policy.

use crate::error::SinkError;
use crate::models::FormattedMessage;
use async_trait::async_trait;
use std::collections::BTreeMap;

pub mod bitable;
pub mod json;
pub mod webhook;

/// A flat field-name to value map.
pub type Record = BTreeMap<String, serde_json::Value>;

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Short name used in logs and run reports.
    fn name(&self) -> &str;

    async fn write(&self, record: &Record) -> Result<(), SinkError>;
}

#[async_trait]
pub trait MessageSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, target: &str, message: &FormattedMessage) -> Result<(), SinkError>;
}
