//! RecordBuffer - threshold-flush adapter in front of a RecordSink
//!
//! # 学習ポイント
//! - バッファは lock 内で取り出し、submit (await) は lock の外で行う
//! - 送信は `Task::call_with` で、レコード列そのものを引数リストとして渡す
//!   (失敗時は reporter が `failure.args()` で元のレコードを受け取れる)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::info;

use crate::domain::{Args, ItemId, Task};
use crate::error::BatchError;
use crate::manager::lifecycle::lock;
use crate::manager::Executor;
use crate::ports::RecordSink;

/// Default number of records per batch.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 100;

/// RecordBuffer は records を貯めて、閾値に達したら 1 バッチとして sink に送る
///
/// # 使用例
/// ```ignore
/// let buffer = RecordBuffer::new(sink);
/// for record in records {
///     buffer.push(record, &manager).await?;
/// }
/// buffer.flush(&manager).await?;
/// manager.wait_idle().await;
/// ```
pub struct RecordBuffer<S> {
    sink: Arc<S>,
    threshold: usize,
    buffered: Mutex<Vec<Value>>,
    received: AtomicU64,
}

impl<S: RecordSink + 'static> RecordBuffer<S> {
    pub fn new(sink: S) -> Self {
        Self::with_threshold(sink, DEFAULT_FLUSH_THRESHOLD)
    }

    /// A threshold of 0 is treated as 1.
    pub fn with_threshold(sink: S, threshold: usize) -> Self {
        Self {
            sink: Arc::new(sink),
            threshold: threshold.max(1),
            buffered: Mutex::new(Vec::new()),
            received: AtomicU64::new(0),
        }
    }

    /// Buffer one record; submit a batch to `executor` once the threshold is reached.
    ///
    /// Returns the id of the submitted batch, if any.
    pub async fn push<E>(&self, record: Value, executor: &E) -> Result<Option<ItemId>, BatchError>
    where
        E: Executor<()> + ?Sized,
    {
        let received = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        let batch = {
            let mut buffered = lock(&self.buffered);
            buffered.push(record);
            if buffered.len() < self.threshold {
                return Ok(None);
            }
            std::mem::take(&mut *buffered)
        };
        info!(manager = %executor.name(), received, batch = batch.len(), "record batch full");
        executor.submit(self.batch_task(batch)).await.map(Some)
    }

    /// Submit whatever is buffered, even below the threshold.
    pub async fn flush<E>(&self, executor: &E) -> Result<Option<ItemId>, BatchError>
    where
        E: Executor<()> + ?Sized,
    {
        let batch = std::mem::take(&mut *lock(&self.buffered));
        if batch.is_empty() {
            return Ok(None);
        }
        executor.submit(self.batch_task(batch)).await.map(Some)
    }

    fn batch_task(&self, batch: Vec<Value>) -> Task<()> {
        let sink = Arc::clone(&self.sink);
        Task::call_with(
            move |records: Args| {
                let sink = Arc::clone(&sink);
                async move { sink.send_batch(records).await }
            },
            batch,
        )
    }

    pub fn buffered(&self) -> usize {
        lock(&self.buffered).len()
    }

    /// Records pushed so far, flushed or not.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}
