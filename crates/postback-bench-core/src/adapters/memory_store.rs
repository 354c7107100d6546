//! # In-Memory Postback Store
//!
//! Thread-safe in-memory implementation of [`PostbackStore`] for tests and
//! development. Keyed by `request_id` with the same insert-or-ignore
//! semantics as the SQLite store.

use crate::store::{PostbackStore, RunSummary};
use crate::{PostbackRecord, ReceivedPostback, RequestId, StoreError, StoreResult, TestId};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

#[derive(Debug, Default)]
struct Tables {
    /// Sent records with their insertion sequence number
    sent: HashMap<RequestId, (u64, PostbackRecord)>,
    received: HashMap<RequestId, ReceivedPostback>,
    runs: HashMap<TestId, RunSummary>,
    next_sequence: u64,
}

/// In-memory store shared through cheap clones
#[derive(Debug, Clone, Default)]
pub struct InMemoryPostbackStore {
    tables: Arc<RwLock<Tables>>,
    unavailable: Arc<AtomicBool>,
    sent_writes: Arc<AtomicU64>,
    received_writes: Arc<AtomicU64>,
}

impl InMemoryPostbackStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `insert_sent` calls that reached the tables
    pub fn sent_write_count(&self) -> u64 {
        self.sent_writes.load(Ordering::SeqCst)
    }

    /// Number of `insert_received` calls that reached the tables
    pub fn received_write_count(&self) -> u64 {
        self.received_writes.load(Ordering::SeqCst)
    }

    /// Total received rows across all runs
    pub fn received_len(&self) -> usize {
        self.read().received.len()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: "in-memory store marked unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PostbackStore for InMemoryPostbackStore {
    async fn insert_sent(&self, records: &[PostbackRecord]) -> StoreResult<u64> {
        self.check_available()?;
        self.sent_writes.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.write();
        let mut inserted = 0;
        for record in records {
            if tables.sent.contains_key(&record.request_id) {
                continue;
            }
            let sequence = tables.next_sequence;
            tables.next_sequence += 1;
            tables
                .sent
                .insert(record.request_id.clone(), (sequence, record.clone()));
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_received(&self, records: &[ReceivedPostback]) -> StoreResult<u64> {
        self.check_available()?;
        self.received_writes.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.write();
        let mut inserted = 0;
        for record in records {
            if !tables.received.contains_key(&record.request_id) {
                tables
                    .received
                    .insert(record.request_id.clone(), record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn count_sent(&self, test_id: &TestId) -> StoreResult<u64> {
        self.check_available()?;
        let tables = self.read();
        Ok(tables
            .sent
            .values()
            .filter(|(_, record)| &record.test_id == test_id)
            .count() as u64)
    }

    async fn count_delivered(&self, test_id: &TestId) -> StoreResult<u64> {
        self.check_available()?;
        let tables = self.read();
        Ok(tables
            .sent
            .values()
            .filter(|(_, record)| &record.test_id == test_id)
            .filter(|(_, record)| tables.received.contains_key(&record.request_id))
            .count() as u64)
    }

    async fn load_sent(&self, test_id: &TestId) -> StoreResult<Vec<PostbackRecord>> {
        self.check_available()?;
        let tables = self.read();
        let mut rows: Vec<_> = tables
            .sent
            .values()
            .filter(|(_, record)| &record.test_id == test_id)
            .collect();
        rows.sort_by_key(|(sequence, _)| *sequence);
        Ok(rows.into_iter().map(|(_, record)| record.clone()).collect())
    }

    async fn load_received(&self, test_id: &TestId) -> StoreResult<Vec<ReceivedPostback>> {
        self.check_available()?;
        let tables = self.read();
        Ok(tables
            .sent
            .values()
            .filter(|(_, record)| &record.test_id == test_id)
            .filter_map(|(_, record)| tables.received.get(&record.request_id).cloned())
            .collect())
    }

    async fn save_run_summary(&self, summary: &RunSummary) -> StoreResult<()> {
        self.check_available()?;
        self.write()
            .runs
            .entry(summary.test_id.clone())
            .or_insert_with(|| summary.clone());
        Ok(())
    }

    async fn recent_runs(&self, limit: u32) -> StoreResult<Vec<RunSummary>> {
        self.check_available()?;
        let tables = self.read();
        let mut runs: Vec<RunSummary> = tables.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.test_datetime.cmp(&a.test_datetime));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn latest_test_id(&self) -> StoreResult<Option<TestId>> {
        self.check_available()?;
        let tables = self.read();
        Ok(tables
            .sent
            .values()
            .max_by_key(|(sequence, _)| *sequence)
            .map(|(_, record)| record.test_id.clone()))
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.check_available()
    }
}

#[cfg(test)]
#[path = "memory_store_tests.rs"]
mod tests;
