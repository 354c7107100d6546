//! # Batched Persistence
//!
//! Records are appended to a [`BatchBuffer`] and written to a store in
//! multi-row batches by a [`BatchWriter`].
//!
//! Appending, checking the size and taking a full batch happen under one
//! lock, so concurrent producers can never both observe the same full
//! buffer. Physical writes go through a separate async lock, giving one
//! writer at a time per store. A batch whose write fails is put back at the
//! front of the buffer and retried with the next flush.

use crate::store::PostbackStore;
use crate::{PostbackRecord, ReceivedPostback, StoreResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

// ============================================================================
// BatchBuffer
// ============================================================================

/// Fixed-size in-memory buffer that hands out full batches
#[derive(Debug)]
pub struct BatchBuffer<T> {
    items: Mutex<Vec<T>>,
    batch_size: usize,
}

impl<T> BatchBuffer<T> {
    /// Create a buffer that releases a batch every `batch_size` items
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            items: Mutex::new(Vec::with_capacity(batch_size)),
            batch_size,
        }
    }

    /// Append an item, returning the whole buffer if it is now full
    pub fn push(&self, item: T) -> Option<Vec<T>> {
        let mut items = self.lock();
        items.push(item);
        if items.len() >= self.batch_size {
            Some(std::mem::replace(
                &mut *items,
                Vec::with_capacity(self.batch_size),
            ))
        } else {
            None
        }
    }

    /// Take everything currently buffered
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.lock())
    }

    /// Put items back in front of anything buffered since they were taken
    pub fn requeue(&self, mut batch: Vec<T>) {
        let mut items = self.lock();
        batch.append(&mut *items);
        *items = batch;
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Destination for flushed batches
#[async_trait]
pub trait BatchSink<T>: Send + Sync {
    /// Write one batch, returning the number of newly stored rows
    async fn write_batch(&self, batch: &[T]) -> StoreResult<u64>;
}

/// Writes batches into the sent-record table
#[derive(Clone)]
pub struct SentSink {
    store: Arc<dyn PostbackStore>,
}

impl SentSink {
    pub fn new(store: Arc<dyn PostbackStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BatchSink<PostbackRecord> for SentSink {
    async fn write_batch(&self, batch: &[PostbackRecord]) -> StoreResult<u64> {
        self.store.insert_sent(batch).await
    }
}

/// Writes batches into the received-record table
#[derive(Clone)]
pub struct ReceivedSink {
    store: Arc<dyn PostbackStore>,
}

impl ReceivedSink {
    pub fn new(store: Arc<dyn PostbackStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BatchSink<ReceivedPostback> for ReceivedSink {
    async fn write_batch(&self, batch: &[ReceivedPostback]) -> StoreResult<u64> {
        self.store.insert_received(batch).await
    }
}

// ============================================================================
// BatchWriter
// ============================================================================

/// Buffer plus sink, with one physical write in progress at a time
pub struct BatchWriter<T> {
    buffer: BatchBuffer<T>,
    sink: Arc<dyn BatchSink<T>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl<T> BatchWriter<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(sink: Arc<dyn BatchSink<T>>, batch_size: usize) -> Self {
        Self {
            buffer: BatchBuffer::new(batch_size),
            sink,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Buffer an item without writing
    ///
    /// Returns a full batch that the caller is responsible for passing to
    /// [`BatchWriter::write`].
    pub fn enqueue(&self, item: T) -> Option<Vec<T>> {
        self.buffer.push(item)
    }

    /// Buffer an item and write the batch inline if the buffer filled up
    pub async fn submit(&self, item: T) -> StoreResult<u64> {
        match self.enqueue(item) {
            Some(batch) => self.write(batch).await,
            None => Ok(0),
        }
    }

    /// Write a batch taken from this writer's buffer
    ///
    /// On failure the batch is requeued so a later flush retries it.
    pub async fn write(&self, batch: Vec<T>) -> StoreResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let size = batch.len();

        match self.sink.write_batch(&batch).await {
            Ok(inserted) => {
                debug!(batch_size = size, inserted, "Batch flushed");
                Ok(inserted)
            }
            Err(e) => {
                error!(batch_size = size, error = %e, "Batch write failed, requeueing");
                self.buffer.requeue(batch);
                Err(e)
            }
        }
    }

    /// Write whatever is buffered, regardless of batch size
    pub async fn flush(&self) -> StoreResult<u64> {
        let batch = self.take_buffered();
        self.write(batch).await
    }

    /// Take the buffered items for a caller-driven [`BatchWriter::write`]
    pub fn take_buffered(&self) -> Vec<T> {
        self.buffer.drain()
    }

    /// Number of items waiting to be written
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn batch_size(&self) -> usize {
        self.buffer.batch_size()
    }
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
