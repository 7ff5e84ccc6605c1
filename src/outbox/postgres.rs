use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::{NewOutboxEvent, OutboxClaim, OutboxError, OutboxEvent, OutboxStore};
use crate::domain::time_record::{
    DomainEvent, RepositoryError, TimeRecord, TimeRecordRepository, TimeRecordStatus,
};

// ============================================================================
// PostgreSQL Outbox Store
// ============================================================================
//
// Claims use `SELECT ... FOR UPDATE SKIP LOCKED` inside a transaction that
// stays open while the relay publishes. Concurrent relays therefore see
// disjoint batches, and a relay that dies mid-batch releases its locks when
// the connection goes away.
//
// ============================================================================

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS time_records (
        id            UUID PRIMARY KEY,
        employee_id   VARCHAR(50) NOT NULL,
        check_in_at   TIMESTAMPTZ NOT NULL,
        check_out_at  TIMESTAMPTZ,
        status        VARCHAR(20) NOT NULL,
        hours_worked  DOUBLE PRECISION NOT NULL DEFAULT 0,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_time_records_active_employee
        ON time_records (employee_id) WHERE status = 'CHECKED_IN'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS outbox_events (
        id            UUID PRIMARY KEY,
        event_type    VARCHAR(100) NOT NULL,
        aggregate_id  UUID NOT NULL,
        payload       BYTEA NOT NULL,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        published     BOOLEAN NOT NULL DEFAULT FALSE,
        published_at  TIMESTAMPTZ,
        retry_count   INTEGER NOT NULL DEFAULT 0,
        last_error    TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_outbox_events_unpublished
        ON outbox_events (event_type, created_at) WHERE published = FALSE
    "#,
];

pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
}

/// Create tables and indexes if they do not exist yet
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Database schema ready");
    Ok(())
}

type OutboxRow = (
    Uuid,
    String,
    Uuid,
    Vec<u8>,
    DateTime<Utc>,
    bool,
    Option<DateTime<Utc>>,
    i32,
    Option<String>,
);

fn outbox_event_from_row(row: OutboxRow) -> OutboxEvent {
    let (id, event_type, aggregate_id, payload, created_at, published, published_at, retry_count, last_error) =
        row;
    OutboxEvent {
        id,
        event_type,
        aggregate_id,
        payload,
        created_at,
        published,
        published_at,
        retry_count,
        last_error,
    }
}

#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one row on the caller's connection. Pass the connection of an
    /// open transaction to make the row part of that unit of work.
    pub async fn append(conn: &mut PgConnection, event: &NewOutboxEvent) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, event_type, aggregate_id, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(event.aggregate_id)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    type Claim = PgOutboxClaim;

    async fn claim_batch(&self, event_type: &str, limit: usize) -> Result<PgOutboxClaim, OutboxError> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, event_type, aggregate_id, payload, created_at,
                   published, published_at, retry_count, last_error
            FROM outbox_events
            WHERE event_type = $1 AND published = FALSE
            ORDER BY created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(event_type)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        let events: Vec<OutboxEvent> = rows.into_iter().map(outbox_event_from_row).collect();

        debug!(event_type, claimed = events.len(), "Claimed outbox batch");

        Ok(PgOutboxClaim { tx, events })
    }
}

/// Row locks live as long as the transaction
pub struct PgOutboxClaim {
    tx: Transaction<'static, Postgres>,
    events: Vec<OutboxEvent>,
}

impl PgOutboxClaim {
    fn ensure_claimed(&self, id: Uuid) -> Result<(), OutboxError> {
        if self.events.iter().any(|e| e.id == id) {
            Ok(())
        } else {
            Err(OutboxError::NotClaimed(id))
        }
    }
}

#[async_trait]
impl OutboxClaim for PgOutboxClaim {
    fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    async fn mark_published(&mut self, id: Uuid) -> Result<(), OutboxError> {
        self.ensure_claimed(id)?;

        sqlx::query(
            r#"
            UPDATE outbox_events
            SET published = TRUE, published_at = NOW()
            WHERE id = $1 AND published = FALSE
            "#,
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn record_failure(&mut self, id: Uuid, error: &str) -> Result<(), OutboxError> {
        self.ensure_claimed(id)?;

        sqlx::query(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1, last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn release(self) -> Result<(), OutboxError> {
        self.tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// PostgreSQL Time Record Repository
// ============================================================================

type TimeRecordRow = (Uuid, String, DateTime<Utc>, Option<DateTime<Utc>>, String, f64);

fn time_record_from_row(row: TimeRecordRow) -> Result<TimeRecord, RepositoryError> {
    let (id, employee_id, check_in_at, check_out_at, status, hours_worked) = row;
    let status = TimeRecordStatus::from_db(&status)
        .ok_or_else(|| RepositoryError::Corrupt(format!("unknown status {status} for record {id}")))?;

    Ok(TimeRecord {
        id,
        employee_id,
        check_in_at,
        check_out_at,
        status,
        hours_worked,
    })
}

#[derive(Clone)]
pub struct PgTimeRecordRepository {
    pool: PgPool,
}

impl PgTimeRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TimeRecordRepository for PgTimeRecordRepository {
    async fn find_active(&self, employee_id: &str) -> Result<Option<TimeRecord>, RepositoryError> {
        let row: Option<TimeRecordRow> = sqlx::query_as(
            r#"
            SELECT id, employee_id, check_in_at, check_out_at, status, hours_worked
            FROM time_records
            WHERE employee_id = $1 AND status = 'CHECKED_IN'
            ORDER BY check_in_at DESC
            LIMIT 1
            "#,
        )
        .bind(employee_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(time_record_from_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TimeRecord>, RepositoryError> {
        let row: Option<TimeRecordRow> = sqlx::query_as(
            r#"
            SELECT id, employee_id, check_in_at, check_out_at, status, hours_worked
            FROM time_records
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(time_record_from_row).transpose()
    }

    async fn save_with_event(
        &self,
        record: &TimeRecord,
        event: &DomainEvent,
    ) -> Result<(), RepositoryError> {
        let outbox_row = NewOutboxEvent::from_event(event)?;
        let mut tx = self.pool.begin().await?;

        let upsert = sqlx::query(
            r#"
            INSERT INTO time_records (id, employee_id, check_in_at, check_out_at, status, hours_worked)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET check_out_at = EXCLUDED.check_out_at,
                status = EXCLUDED.status,
                hours_worked = EXCLUDED.hours_worked,
                updated_at = NOW()
            "#,
        )
        .bind(record.id)
        .bind(&record.employee_id)
        .bind(record.check_in_at)
        .bind(record.check_out_at)
        .bind(record.status.as_str())
        .bind(record.hours_worked)
        .execute(&mut *tx)
        .await;

        match upsert {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(RepositoryError::Conflict);
            }
            Err(e) => return Err(e.into()),
        }

        PgOutboxStore::append(&mut tx, &outbox_row).await?;

        tx.commit().await?;

        debug!(
            record_id = %record.id,
            event_id = %outbox_row.id,
            event_type = %outbox_row.event_type,
            "Saved time record with outbox event"
        );

        Ok(())
    }
}
