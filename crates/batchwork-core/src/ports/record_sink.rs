//! RecordSink port - downstream receiver of completed record batches.
//!
//! The ingestion side buffers records and hands a full batch to the sink;
//! the sink acknowledges asynchronously. See `impls::RecordBuffer` for the
//! buffering side.

use async_trait::async_trait;

use crate::error::TaskError;

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Deliver one batch. `Ok` acknowledges the whole batch.
    async fn send_batch(&self, records: Vec<serde_json::Value>) -> Result<(), TaskError>;
}
