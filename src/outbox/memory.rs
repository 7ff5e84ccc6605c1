use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{NewOutboxEvent, OutboxClaim, OutboxError, OutboxEvent, OutboxStore};
use crate::domain::time_record::{DomainEvent, RepositoryError, TimeRecord, TimeRecordRepository};

// ============================================================================
// In-Memory Database - same contracts as the PostgreSQL adapters
// ============================================================================
//
// Used by tests and local runs without PostgreSQL:
// - `claimed` plays the role of row locks taken with SKIP LOCKED
// - claim updates are buffered and applied only on release (commit)
// - dropping an unreleased claim discards its updates (rollback)
// - one active CHECKED_IN record per employee, like the partial unique index
//
// ============================================================================

#[derive(Default)]
struct Tables {
    time_records: HashMap<Uuid, TimeRecord>,
    outbox: Vec<OutboxEvent>,
    claimed: HashSet<Uuid>,
    fail_writes: bool,
}

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbox(&self) -> MemoryOutboxStore {
        MemoryOutboxStore { db: self.clone() }
    }

    pub fn time_records(&self) -> MemoryTimeRecordRepository {
        MemoryTimeRecordRepository { db: self.clone() }
    }

    /// Make every following unit of work fail before anything is written
    pub fn fail_writes(&self, fail: bool) {
        self.tables.lock().fail_writes = fail;
    }

    /// Append a row outside of any business transaction
    pub fn append(&self, event: &DomainEvent) -> Result<(), OutboxError> {
        let row = NewOutboxEvent::from_event(event)
            .map_err(|e| OutboxError::Unavailable(e.to_string()))?;
        self.tables.lock().outbox.push(row.into_row());
        Ok(())
    }

    /// Snapshot of the outbox table in insertion order
    pub fn outbox_rows(&self) -> Vec<OutboxEvent> {
        self.tables.lock().outbox.clone()
    }

    pub fn outbox_row(&self, id: Uuid) -> Option<OutboxEvent> {
        self.tables.lock().outbox.iter().find(|r| r.id == id).cloned()
    }
}

#[derive(Clone)]
pub struct MemoryOutboxStore {
    db: MemoryDatabase,
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    type Claim = MemoryOutboxClaim;

    async fn claim_batch(&self, event_type: &str, limit: usize) -> Result<MemoryOutboxClaim, OutboxError> {
        let mut tables = self.db.tables.lock();
        if tables.fail_writes {
            return Err(OutboxError::Unavailable("database offline".into()));
        }

        let mut events: Vec<OutboxEvent> = tables
            .outbox
            .iter()
            .filter(|r| r.event_type == event_type && !r.published && !tables.claimed.contains(&r.id))
            .cloned()
            .collect();
        events.sort_by_key(|r| r.created_at);
        events.truncate(limit);

        for event in &events {
            tables.claimed.insert(event.id);
        }

        Ok(MemoryOutboxClaim {
            db: self.db.clone(),
            events,
            pending: Vec::new(),
            released: false,
        })
    }
}

enum PendingUpdate {
    Published(Uuid),
    Failed(Uuid, String),
}

pub struct MemoryOutboxClaim {
    db: MemoryDatabase,
    events: Vec<OutboxEvent>,
    pending: Vec<PendingUpdate>,
    released: bool,
}

impl MemoryOutboxClaim {
    fn ensure_claimed(&self, id: Uuid) -> Result<(), OutboxError> {
        if self.events.iter().any(|e| e.id == id) {
            Ok(())
        } else {
            Err(OutboxError::NotClaimed(id))
        }
    }

    fn unlock(&self, tables: &mut Tables) {
        for event in &self.events {
            tables.claimed.remove(&event.id);
        }
    }
}

#[async_trait]
impl OutboxClaim for MemoryOutboxClaim {
    fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    async fn mark_published(&mut self, id: Uuid) -> Result<(), OutboxError> {
        self.ensure_claimed(id)?;
        self.pending.push(PendingUpdate::Published(id));
        Ok(())
    }

    async fn record_failure(&mut self, id: Uuid, error: &str) -> Result<(), OutboxError> {
        self.ensure_claimed(id)?;
        self.pending.push(PendingUpdate::Failed(id, error.to_string()));
        Ok(())
    }

    async fn release(mut self) -> Result<(), OutboxError> {
        let mut tables = self.db.tables.lock();
        let now = Utc::now();

        for update in self.pending.drain(..) {
            match update {
                PendingUpdate::Published(id) => {
                    if let Some(row) = tables.outbox.iter_mut().find(|r| r.id == id && !r.published) {
                        row.published = true;
                        row.published_at = Some(now);
                    }
                }
                PendingUpdate::Failed(id, error) => {
                    if let Some(row) = tables.outbox.iter_mut().find(|r| r.id == id) {
                        row.retry_count += 1;
                        row.last_error = Some(error);
                    }
                }
            }
        }

        self.unlock(&mut tables);
        drop(tables);
        self.released = true;

        Ok(())
    }
}

impl Drop for MemoryOutboxClaim {
    fn drop(&mut self) {
        if !self.released {
            let db = self.db.clone();
            let mut tables = db.tables.lock();
            self.unlock(&mut tables);
        }
    }
}

#[derive(Clone)]
pub struct MemoryTimeRecordRepository {
    db: MemoryDatabase,
}

#[async_trait]
impl TimeRecordRepository for MemoryTimeRecordRepository {
    async fn find_active(&self, employee_id: &str) -> Result<Option<TimeRecord>, RepositoryError> {
        let tables = self.db.tables.lock();
        Ok(tables
            .time_records
            .values()
            .find(|r| r.employee_id == employee_id && r.is_checked_in())
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TimeRecord>, RepositoryError> {
        Ok(self.db.tables.lock().time_records.get(&id).cloned())
    }

    async fn save_with_event(
        &self,
        record: &TimeRecord,
        event: &DomainEvent,
    ) -> Result<(), RepositoryError> {
        let row = NewOutboxEvent::from_event(event)?;
        let mut tables = self.db.tables.lock();

        if tables.fail_writes {
            return Err(OutboxError::Unavailable("database offline".into()).into());
        }

        let conflict = record.is_checked_in()
            && tables
                .time_records
                .values()
                .any(|r| r.id != record.id && r.employee_id == record.employee_id && r.is_checked_in());
        if conflict {
            return Err(RepositoryError::Conflict);
        }

        tables.time_records.insert(record.id, record.clone());
        tables.outbox.push(row.into_row());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::time_record::EmployeeId;

    fn checked_in_event(db: &MemoryDatabase) -> DomainEvent {
        let record = TimeRecord::check_in(&EmployeeId::parse("E100").unwrap(), Utc::now());
        let event = DomainEvent::checked_in(&record, Utc::now());
        db.append(&event).unwrap();
        event
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_disjoint() {
        let db = MemoryDatabase::new();
        for _ in 0..5 {
            checked_in_event(&db);
        }
        let store = db.outbox();

        let first = store.claim_batch("EmployeeCheckedIn", 3).await.unwrap();
        let second = store.claim_batch("EmployeeCheckedIn", 3).await.unwrap();

        assert_eq!(first.events().len(), 3);
        assert_eq!(second.events().len(), 2);
        for event in second.events() {
            assert!(!first.events().iter().any(|e| e.id == event.id));
        }
    }

    #[tokio::test]
    async fn test_dropped_claim_leaves_rows_claimable() {
        let db = MemoryDatabase::new();
        let event = checked_in_event(&db);
        let store = db.outbox();

        {
            let mut claim = store.claim_batch("EmployeeCheckedIn", 10).await.unwrap();
            claim.mark_published(event.header().event_id).await.unwrap();
            // dropped without release
        }

        let claim = store.claim_batch("EmployeeCheckedIn", 10).await.unwrap();
        assert_eq!(claim.events().len(), 1);
        assert!(!db.outbox_row(event.header().event_id).unwrap().published);
    }

    #[tokio::test]
    async fn test_release_applies_updates() {
        let db = MemoryDatabase::new();
        let ok = checked_in_event(&db);
        let bad = checked_in_event(&db);
        let store = db.outbox();

        let mut claim = store.claim_batch("EmployeeCheckedIn", 10).await.unwrap();
        claim.mark_published(ok.header().event_id).await.unwrap();
        claim.record_failure(bad.header().event_id, "broker down").await.unwrap();
        claim.release().await.unwrap();

        let published = db.outbox_row(ok.header().event_id).unwrap();
        assert!(published.published);
        assert!(published.published_at.is_some());

        let failed = db.outbox_row(bad.header().event_id).unwrap();
        assert!(!failed.published);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("broker down"));

        let next = store.claim_batch("EmployeeCheckedIn", 10).await.unwrap();
        assert_eq!(next.events().len(), 1);
        assert_eq!(next.events()[0].id, bad.header().event_id);
    }

    #[tokio::test]
    async fn test_claim_rejects_foreign_ids() {
        let db = MemoryDatabase::new();
        checked_in_event(&db);

        let mut claim = db.outbox().claim_batch("EmployeeCheckedIn", 10).await.unwrap();
        let err = claim.mark_published(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OutboxError::NotClaimed(_)));
    }

    #[tokio::test]
    async fn test_failed_unit_of_work_writes_nothing() {
        let db = MemoryDatabase::new();
        let repo = db.time_records();
        let record = TimeRecord::check_in(&EmployeeId::parse("E100").unwrap(), Utc::now());
        let event = DomainEvent::checked_in(&record, Utc::now());

        db.fail_writes(true);
        assert!(repo.save_with_event(&record, &event).await.is_err());

        assert!(db.outbox_rows().is_empty());
        assert!(repo.find_by_id(record.id).await.unwrap().is_none());
    }
}
