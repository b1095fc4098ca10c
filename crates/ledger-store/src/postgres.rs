use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    BookingId, Purpose, ReservationId, TransactionId, TxHash, WalletAddress, Wei,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ClaimOutcome, EventEnvelope, EventId, LedgerTransaction, Marked, NewClaim, ProcessedKey,
    RelayCursor, Result, StateRecord, StoreError, TransactionQuery, TransactionStatus, Version,
    store::{LedgerStore, RelayStore, ReservationStore, check_transition, record_claim_metric},
};

const TX_COLUMNS: &str = "id, reservation_id, purpose, payer_address, payee_address, \
     amount::text AS amount, gas_fee::text AS gas_fee, transaction_hash, status, block_number, \
     retry_count, failure_reason, created_at, submitted_at, confirmed_at, updated_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_transaction(row: PgRow) -> Result<LedgerTransaction> {
        let purpose: String = row.try_get("purpose")?;
        let status: String = row.try_get("status")?;
        let amount: String = row.try_get("amount")?;
        let gas_fee: Option<String> = row.try_get("gas_fee")?;
        let block_number: Option<i64> = row.try_get("block_number")?;
        let retry_count: i32 = row.try_get("retry_count")?;

        Ok(LedgerTransaction {
            id: TransactionId::from_uuid(row.try_get::<Uuid, _>("id")?),
            reservation_id: ReservationId::from_uuid(row.try_get::<Uuid, _>("reservation_id")?),
            purpose: purpose.parse().map_err(|_| StoreError::Corrupt {
                column: "purpose",
                value: purpose.clone(),
            })?,
            payer: WalletAddress::new(row.try_get::<String, _>("payer_address")?),
            payee: WalletAddress::new(row.try_get::<String, _>("payee_address")?),
            amount: parse_wei("amount", &amount)?,
            gas_fee: gas_fee.map(|g| parse_wei("gas_fee", &g)).transpose()?,
            tx_hash: row
                .try_get::<Option<String>, _>("transaction_hash")?
                .map(TxHash::new),
            status: status.parse().map_err(|_| StoreError::Corrupt {
                column: "status",
                value: status.clone(),
            })?,
            block_number: block_number.map(|b| b as u64),
            retry_count: retry_count as u32,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            submitted_at: row.try_get("submitted_at")?,
            confirmed_at: row.try_get("confirmed_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_state(row: PgRow) -> Result<StateRecord> {
        Ok(StateRecord {
            reservation_id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            version: Version::new(row.try_get("version")?),
            status: row.try_get("status")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            state: row.try_get("state")?,
        })
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            reservation_id: ReservationId::from_uuid(row.try_get::<Uuid, _>("reservation_id")?),
            version: Version::new(row.try_get("version")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }

    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        id: TransactionId,
    ) -> Result<LedgerTransaction> {
        let row = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM ledger_transactions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        Self::row_to_transaction(row)
    }

    async fn find_active(
        &self,
        reservation_id: ReservationId,
        purpose: Purpose,
    ) -> Result<Option<LedgerTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM ledger_transactions \
             WHERE reservation_id = $1 AND purpose = $2 AND status <> 'FAILED'"
        ))
        .bind(reservation_id.as_uuid())
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }
}

fn parse_wei(column: &'static str, value: &str) -> Result<Wei> {
    value.parse().map_err(|_| StoreError::Corrupt {
        column,
        value: value.to_string(),
    })
}

fn is_constraint(err: &sqlx::Error, name: &str) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.constraint() == Some(name))
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn try_claim(&self, claim: NewClaim) -> Result<ClaimOutcome> {
        // The conflicting row may turn FAILED between the insert and the
        // lookup, in which case the insert is attempted again.
        loop {
            let row = LedgerTransaction::from_claim(claim.clone());
            let inserted = sqlx::query(&format!(
                r#"
                INSERT INTO ledger_transactions
                    (id, reservation_id, purpose, payer_address, payee_address, amount,
                     status, retry_count, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6::numeric, $7, 0, $8, $8)
                ON CONFLICT (reservation_id, purpose) WHERE status <> 'FAILED' DO NOTHING
                RETURNING {TX_COLUMNS}
                "#
            ))
            .bind(row.id.as_uuid())
            .bind(row.reservation_id.as_uuid())
            .bind(row.purpose.as_str())
            .bind(row.payer.as_str())
            .bind(row.payee.as_str())
            .bind(row.amount.to_string())
            .bind(row.status.as_str())
            .bind(row.created_at)
            .fetch_optional(&self.pool)
            .await?;

            let outcome = match inserted {
                Some(inserted) => ClaimOutcome::Claimed(Self::row_to_transaction(inserted)?),
                None => match self.find_active(claim.reservation_id, claim.purpose).await? {
                    Some(existing) => ClaimOutcome::AlreadyClaimed(existing),
                    None => continue,
                },
            };
            record_claim_metric(&outcome);
            return Ok(outcome);
        }
    }

    async fn mark_submitted(&self, id: TransactionId, tx_hash: TxHash) -> Result<Marked> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_row(&mut tx, id).await?;

        match &current.tx_hash {
            Some(existing) if *existing == tx_hash => {
                return Ok(Marked {
                    record: current,
                    applied: false,
                });
            }
            Some(_) => {
                return Err(StoreError::InvalidStatusTransition {
                    id,
                    from: current.status,
                    to: TransactionStatus::Processing,
                });
            }
            None if current.status != TransactionStatus::Processing => {
                return Err(StoreError::InvalidStatusTransition {
                    id,
                    from: current.status,
                    to: TransactionStatus::Processing,
                });
            }
            None => {}
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE ledger_transactions
            SET transaction_hash = $2, submitted_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {TX_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(tx_hash.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_constraint(&e, "unique_transaction_hash") {
                return StoreError::DuplicateTransactionHash(tx_hash.clone());
            }
            StoreError::Database(e)
        })?;

        tx.commit().await?;
        Ok(Marked {
            record: Self::row_to_transaction(row)?,
            applied: true,
        })
    }

    async fn mark_confirmed(
        &self,
        id: TransactionId,
        block_number: u64,
        gas_fee: Wei,
    ) -> Result<Marked> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_row(&mut tx, id).await?;

        if !check_transition(&current, TransactionStatus::Confirmed)? {
            return Ok(Marked {
                record: current,
                applied: false,
            });
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE ledger_transactions
            SET status = 'CONFIRMED', block_number = $2, gas_fee = $3::numeric,
                confirmed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {TX_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(block_number as i64)
        .bind(gas_fee.to_string())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Marked {
            record: Self::row_to_transaction(row)?,
            applied: true,
        })
    }

    async fn mark_failed(&self, id: TransactionId, reason: &str) -> Result<Marked> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_row(&mut tx, id).await?;

        if !check_transition(&current, TransactionStatus::Failed)? {
            return Ok(Marked {
                record: current,
                applied: false,
            });
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE ledger_transactions
            SET status = 'FAILED', failure_reason = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {TX_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(reason)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Marked {
            record: Self::row_to_transaction(row)?,
            applied: true,
        })
    }

    async fn record_attempt(&self, id: TransactionId) -> Result<LedgerTransaction> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE ledger_transactions
            SET retry_count = retry_count + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING {TX_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        Self::row_to_transaction(row)
    }

    async fn find(
        &self,
        reservation_id: ReservationId,
        purpose: Purpose,
    ) -> Result<Option<LedgerTransaction>> {
        if let Some(active) = self.find_active(reservation_id, purpose).await? {
            return Ok(Some(active));
        }

        let row = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM ledger_transactions \
             WHERE reservation_id = $1 AND purpose = $2 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(reservation_id.as_uuid())
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn find_by_hash(&self, tx_hash: &TxHash) -> Result<Option<LedgerTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM ledger_transactions WHERE transaction_hash = $1"
        ))
        .bind(tx_hash.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn get(&self, id: TransactionId) -> Result<LedgerTransaction> {
        let row = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM ledger_transactions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        Self::row_to_transaction(row)
    }

    async fn history(&self, reservation_id: ReservationId) -> Result<Vec<LedgerTransaction>> {
        self.query(TransactionQuery::new().reservation(reservation_id))
            .await
    }

    async fn query(&self, query: TransactionQuery) -> Result<Vec<LedgerTransaction>> {
        let mut sql = format!("SELECT {TX_COLUMNS} FROM ledger_transactions WHERE 1=1");
        let mut param_count = 0;

        if query.reservation_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND reservation_id = ${param_count}"));
        }
        if query.purpose.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND purpose = ${param_count}"));
        }
        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }
        match query.submitted {
            Some(true) => sql.push_str(" AND transaction_hash IS NOT NULL"),
            Some(false) => sql.push_str(" AND transaction_hash IS NULL"),
            None => {}
        }
        if query.updated_before.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND updated_at < ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.reservation_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(purpose) = query.purpose {
            sqlx_query = sqlx_query.bind(purpose.as_str());
        }
        if let Some(status) = query.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(before) = query.updated_before {
            sqlx_query = sqlx_query.bind(before);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_transaction).collect()
    }
}

#[async_trait]
impl ReservationStore for PostgresStore {
    async fn load_state(&self, reservation_id: ReservationId) -> Result<Option<StateRecord>> {
        let row = sqlx::query(
            "SELECT id, version, status, state, updated_at FROM reservations WHERE id = $1",
        )
        .bind(reservation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_state).transpose()
    }

    async fn save_state(
        &self,
        record: StateRecord,
        expected: Version,
        history: Vec<EventEnvelope>,
    ) -> Result<()> {
        let reservation_id = record.reservation_id;
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT version FROM reservations WHERE id = $1 FOR UPDATE")
                .bind(reservation_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

        let actual = current.map(Version::new).unwrap_or(Version::initial());
        if actual != expected {
            return Err(StoreError::ConcurrencyConflict {
                reservation_id,
                expected,
                actual,
            });
        }

        let conflict = |e: sqlx::Error| {
            if is_constraint(&e, "reservations_pkey")
                || is_constraint(&e, "unique_reservation_version")
            {
                return StoreError::ConcurrencyConflict {
                    reservation_id,
                    expected,
                    actual: record.version,
                };
            }
            StoreError::Database(e)
        };

        sqlx::query(
            r#"
            INSERT INTO reservations (id, version, status, state, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                version = EXCLUDED.version,
                status = EXCLUDED.status,
                state = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(reservation_id.as_uuid())
        .bind(record.version.as_i64())
        .bind(&record.status)
        .bind(&record.state)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(&conflict)?;

        for entry in &history {
            let metadata_json = serde_json::to_value(&entry.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO reservation_events (id, reservation_id, event_type, version, timestamp, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(entry.event_id.as_uuid())
            .bind(entry.reservation_id.as_uuid())
            .bind(&entry.event_type)
            .bind(entry.version.as_i64())
            .bind(entry.timestamp)
            .bind(&entry.payload)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(&conflict)?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_states(&self, status: Option<&str>) -> Result<Vec<StateRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, version, status, state, updated_at
            FROM reservations
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY updated_at ASC
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_state).collect()
    }

    async fn history_for(&self, reservation_id: ReservationId) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, reservation_id, version, timestamp, payload, metadata
            FROM reservation_events
            WHERE reservation_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(reservation_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }
}

#[async_trait]
impl RelayStore for PostgresStore {
    async fn link_booking(
        &self,
        booking_id: BookingId,
        reservation_id: ReservationId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO booking_links (booking_id, reservation_id)
            VALUES ($1, $2)
            ON CONFLICT (booking_id) DO NOTHING
            "#,
        )
        .bind(booking_id.as_u64() as i64)
        .bind(reservation_id.as_uuid())
        .execute(&self.pool)
        .await?;

        match self.reservation_for_booking(booking_id).await? {
            Some(existing) if existing != reservation_id => Err(StoreError::LinkConflict {
                booking_id,
                existing,
            }),
            _ => Ok(()),
        }
    }

    async fn reservation_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<ReservationId>> {
        let id: Option<Uuid> =
            sqlx::query_scalar("SELECT reservation_id FROM booking_links WHERE booking_id = $1")
                .bind(booking_id.as_u64() as i64)
                .fetch_optional(&self.pool)
                .await?;

        Ok(id.map(ReservationId::from_uuid))
    }

    async fn booking_for_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<BookingId>> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT booking_id FROM booking_links
            WHERE reservation_id = $1
            ORDER BY created_at DESC, booking_id DESC
            LIMIT 1
            "#,
        )
        .bind(reservation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(id.map(|b| BookingId::new(b as u64)))
    }

    async fn load_cursor(&self, name: &str) -> Result<Option<RelayCursor>> {
        let row = sqlx::query("SELECT block_number, log_index FROM relay_cursors WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(RelayCursor::new(
                row.try_get::<i64, _>("block_number")? as u64,
                row.try_get::<i32, _>("log_index")? as u32,
            ))),
            None => Ok(None),
        }
    }

    async fn record_processed(
        &self,
        name: &str,
        key: ProcessedKey,
        position: RelayCursor,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO relay_processed_events (event_name, transaction_hash, log_index, block_number)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&key.event_name)
        .bind(key.tx_hash.as_str())
        .bind(key.log_index as i32)
        .bind(position.block_number as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        sqlx::query(
            r#"
            INSERT INTO relay_cursors (name, block_number, log_index, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (name) DO UPDATE SET
                block_number = EXCLUDED.block_number,
                log_index = EXCLUDED.log_index,
                updated_at = NOW()
            WHERE (relay_cursors.block_number, relay_cursors.log_index)
                < (EXCLUDED.block_number, EXCLUDED.log_index)
            "#,
        )
        .bind(name)
        .bind(position.block_number as i64)
        .bind(position.log_index as i32)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn is_processed(&self, key: &ProcessedKey) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM relay_processed_events
                WHERE event_name = $1 AND transaction_hash = $2 AND log_index = $3
            )
            "#,
        )
        .bind(&key.event_name)
        .bind(key.tx_hash.as_str())
        .bind(key.log_index as i32)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}
