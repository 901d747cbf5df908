//! Postgres-backed ledger store.
//!
//! The balance projection lives in the database: an `AFTER INSERT` trigger on
//! `ledger_entries` upserts `inventory_balances` inside the inserting
//! transaction, so a failed increment rolls the ledger row back with it. See
//! `migrations/0001_ledger.sql`.
//!
//! Every query carries `organization_id` in its WHERE clause.
//!
//! Listing order is `(recorded_at, sequence)`, both fixed at insert time, while
//! rows become visible at commit. `list_entries` therefore only returns rows
//! written by transactions older than the reader's snapshot `xmin`: a row that
//! is still uncommitted can never land behind a cursor already handed out. All
//! rows of one batch share the batch's first timestamp for the same reason.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use stockledger_core::{
    ActorId, CorrelationId, ItemId, LedgerEntryId, LocationId, LotId, OrganizationId,
};
use stockledger_ledger::{
    AuditSnapshot, Balance, BalanceKey, Discrepancy, LedgerEntry, LedgerFilter, LedgerPage,
    LedgerTotal, MAX_PAGE_SIZE, MovementType, NewLedgerEntry, PageRequest,
};

use super::{AppendReceipt, CorrectionOutcome, LedgerStore, ensure_correctable};
use crate::error::{StoreError, map_sqlx_error};

const SELECT_ENTRY: &str = r#"
    SELECT entry_id, sequence, organization_id, item_id, location_id, lot_id, quantity,
           movement_type, correlation_id, actor_id, memo, recorded_at
    FROM ledger_entries
"#;

const SELECT_BALANCE: &str = r#"
    SELECT organization_id, item_id, location_id, lot_id, quantity, last_updated, last_entry_id
    FROM inventory_balances
"#;

#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn begin(&self, operation: &'static str) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

/// Insert one entry and read back the balance the trigger produced.
///
/// `recorded_at` of `None` takes the clock after the transaction id is assigned.
async fn insert_entry(
    tx: &mut Transaction<'static, Postgres>,
    organization_id: OrganizationId,
    new: NewLedgerEntry,
    recorded_at: Option<DateTime<Utc>>,
) -> Result<AppendReceipt, StoreError> {
    let id = LedgerEntryId::new();
    let row = sqlx::query(
        r#"
        INSERT INTO ledger_entries (
            entry_id, organization_id, item_id, location_id, lot_id, quantity,
            movement_type, correlation_id, actor_id, memo, txid, recorded_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                pg_current_xact_id(), COALESCE($11, clock_timestamp()))
        RETURNING sequence, recorded_at
        "#,
    )
    .bind(id.as_uuid())
    .bind(organization_id.as_uuid())
    .bind(new.item_id.as_uuid())
    .bind(new.location_id.as_uuid())
    .bind(new.lot_id.map(|l| *l.as_uuid()))
    .bind(new.quantity)
    .bind(new.movement_type.as_str())
    .bind(new.correlation_id.as_uuid())
    .bind(new.actor_id.as_uuid())
    .bind(new.memo.as_deref())
    .bind(recorded_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("append_entry", e))?;

    let sequence: i64 = row.try_get("sequence").map_err(|e| map_sqlx_error("append_entry", e))?;
    let recorded_at: DateTime<Utc> = row
        .try_get("recorded_at")
        .map_err(|e| map_sqlx_error("append_entry", e))?;

    let entry = LedgerEntry::commit(organization_id, new, id, sequence as u64, recorded_at);
    let balance = fetch_balance(&mut **tx, &entry.key())
        .await?
        .ok_or_else(|| StoreError::Backend(format!("balance for {} missing after append", entry.key())))?;

    Ok(AppendReceipt { entry, balance })
}

async fn fetch_balance<'e, E>(executor: E, key: &BalanceKey) -> Result<Option<Balance>, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = format!(
        "{SELECT_BALANCE} WHERE organization_id = $1 AND item_id = $2 AND location_id = $3 \
         AND lot_id IS NOT DISTINCT FROM $4"
    );
    let row = sqlx::query(&sql)
        .bind(key.organization_id.as_uuid())
        .bind(key.item_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .bind(key.lot_id.map(|l| *l.as_uuid()))
        .fetch_optional(executor)
        .await
        .map_err(|e| map_sqlx_error("get_balance", e))?;

    row.map(|r| BalanceRow::from_row(&r).map(Into::into))
        .transpose()
        .map_err(|e| map_sqlx_error("get_balance", e))
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(
        skip(self, entry),
        fields(organization_id = %organization_id, item_id = %entry.item_id, location_id = %entry.location_id),
        err
    )]
    async fn append(
        &self,
        organization_id: OrganizationId,
        entry: NewLedgerEntry,
    ) -> Result<AppendReceipt, StoreError> {
        let mut tx = self.begin("append").await?;
        let receipt = insert_entry(&mut tx, organization_id, entry, None).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("append", e))?;
        Ok(receipt)
    }

    #[instrument(
        skip(self, entries),
        fields(organization_id = %organization_id, entry_count = entries.len()),
        err
    )]
    async fn append_batch(
        &self,
        organization_id: OrganizationId,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<AppendReceipt>, StoreError> {
        if entries.is_empty() {
            return Ok(vec![]);
        }

        // Dropping `tx` on an early return rolls the whole batch back.
        let mut tx = self.begin("append_batch").await?;
        let mut receipts: Vec<AppendReceipt> = Vec::with_capacity(entries.len());
        for entry in entries {
            let batch_time = receipts.first().map(|r| r.entry.recorded_at);
            receipts.push(insert_entry(&mut tx, organization_id, entry, batch_time).await?);
        }
        tx.commit().await.map_err(|e| map_sqlx_error("append_batch", e))?;
        Ok(receipts)
    }

    async fn get_balance(&self, key: &BalanceKey) -> Result<Balance, StoreError> {
        Ok(fetch_balance(&*self.pool, key)
            .await?
            .unwrap_or_else(|| Balance::zero(*key)))
    }

    #[instrument(skip(self, filter), fields(organization_id = %organization_id, returned = tracing::field::Empty), err)]
    async fn list_entries(
        &self,
        organization_id: OrganizationId,
        filter: &LedgerFilter,
        page: PageRequest,
    ) -> Result<LedgerPage, StoreError> {
        let limit = page.limit.clamp(1, MAX_PAGE_SIZE);
        let sql = format!(
            r#"{SELECT_ENTRY}
            WHERE organization_id = $1
                AND ($2::uuid IS NULL OR item_id = $2)
                AND ($3::uuid IS NULL OR location_id = $3)
                AND ($4::uuid IS NULL OR lot_id = $4)
                AND ($5::timestamptz IS NULL OR recorded_at >= $5)
                AND ($6::timestamptz IS NULL OR recorded_at < $6)
                AND ($7::timestamptz IS NULL OR (recorded_at, sequence) > ($7, $8))
                AND txid < pg_snapshot_xmin(pg_current_snapshot())
            ORDER BY recorded_at ASC, sequence ASC
            LIMIT $9
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(organization_id.as_uuid())
            .bind(filter.item_id.map(|i| *i.as_uuid()))
            .bind(filter.location_id.map(|l| *l.as_uuid()))
            .bind(filter.lot_id.map(|l| *l.as_uuid()))
            .bind(filter.recorded_from)
            .bind(filter.recorded_until)
            .bind(page.after.map(|c| c.recorded_at))
            .bind(page.after.map(|c| c.sequence as i64).unwrap_or(0))
            .bind(i64::from(limit) + 1)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_entries", e))?;

        let entries = rows
            .iter()
            .map(|r| LedgerEntryRow::from_row(r).and_then(LedgerEntry::try_from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("list_entries", e))?;

        Span::current().record("returned", entries.len());
        Ok(LedgerPage::from_overfetch(entries, limit))
    }

    async fn get_entry(
        &self,
        organization_id: OrganizationId,
        entry_id: LedgerEntryId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let sql = format!("{SELECT_ENTRY} WHERE organization_id = $1 AND entry_id = $2");
        let row = sqlx::query(&sql)
            .bind(organization_id.as_uuid())
            .bind(entry_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_entry", e))?;

        row.map(|r| LedgerEntryRow::from_row(&r).and_then(LedgerEntry::try_from))
            .transpose()
            .map_err(|e| map_sqlx_error("get_entry", e))
    }

    /// Runs as a `REPEATABLE READ, READ ONLY` transaction: both reads see the
    /// same MVCC snapshot and appends are never blocked.
    #[instrument(skip(self), fields(organization_id = %organization_id, tuples = tracing::field::Empty), err)]
    async fn snapshot(&self, organization_id: OrganizationId) -> Result<AuditSnapshot, StoreError> {
        let mut tx = self.begin("snapshot").await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("snapshot", e))?;

        let taken_at: DateTime<Utc> = sqlx::query_scalar("SELECT now()")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("snapshot", e))?;

        let total_rows = sqlx::query(
            r#"
            SELECT organization_id, item_id, location_id, lot_id,
                   SUM(quantity) AS sum, COUNT(*) AS entry_count
            FROM ledger_entries
            WHERE organization_id = $1
            GROUP BY organization_id, item_id, location_id, lot_id
            "#,
        )
        .bind(organization_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("snapshot_totals", e))?;

        let balance_rows = sqlx::query(&format!("{SELECT_BALANCE} WHERE organization_id = $1"))
            .bind(organization_id.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("snapshot_balances", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("snapshot", e))?;

        let totals = total_rows
            .iter()
            .map(|r| LedgerTotalRow::from_row(r).map(Into::into))
            .collect::<Result<Vec<LedgerTotal>, _>>()
            .map_err(|e| map_sqlx_error("snapshot_totals", e))?;
        let balances = balance_rows
            .iter()
            .map(|r| BalanceRow::from_row(r).map(Into::into))
            .collect::<Result<Vec<Balance>, _>>()
            .map_err(|e| map_sqlx_error("snapshot_balances", e))?;

        Span::current().record("tuples", totals.len().max(balances.len()));
        Ok(AuditSnapshot {
            organization_id,
            taken_at,
            totals,
            balances,
        })
    }

    /// Compare-and-set on the balance row: the UPDATE only matches if quantity
    /// and last entry are still what the snapshot saw. A row created by a
    /// concurrent append makes the missing-balance INSERT a no-op.
    #[instrument(skip(self, discrepancy), fields(key = %discrepancy.key), err)]
    async fn correct_balance(
        &self,
        discrepancy: &Discrepancy,
    ) -> Result<CorrectionOutcome, StoreError> {
        ensure_correctable(discrepancy)?;
        let key = &discrepancy.key;

        let result = match discrepancy.balance_quantity {
            Some(observed) => sqlx::query(
                r#"
                UPDATE inventory_balances
                SET quantity = $5, last_updated = now()
                WHERE organization_id = $1 AND item_id = $2 AND location_id = $3
                    AND lot_id IS NOT DISTINCT FROM $4
                    AND quantity = $6
                    AND last_entry_id IS NOT DISTINCT FROM $7
                "#,
            )
            .bind(key.organization_id.as_uuid())
            .bind(key.item_id.as_uuid())
            .bind(key.location_id.as_uuid())
            .bind(key.lot_id.map(|l| *l.as_uuid()))
            .bind(discrepancy.ledger_sum)
            .bind(observed)
            .bind(discrepancy.observed_last_entry_id.map(|e| *e.as_uuid()))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("correct_balance", e))?,

            None => sqlx::query(
                r#"
                INSERT INTO inventory_balances
                    (organization_id, item_id, location_id, lot_id, quantity, last_updated, last_entry_id)
                SELECT $1, $2, $3, $4, $5, now(),
                       (SELECT entry_id FROM ledger_entries
                        WHERE organization_id = $1 AND item_id = $2 AND location_id = $3
                            AND lot_id IS NOT DISTINCT FROM $4
                        ORDER BY recorded_at DESC, sequence DESC
                        LIMIT 1)
                ON CONFLICT ON CONSTRAINT inventory_balances_key DO NOTHING
                "#,
            )
            .bind(key.organization_id.as_uuid())
            .bind(key.item_id.as_uuid())
            .bind(key.location_id.as_uuid())
            .bind(key.lot_id.map(|l| *l.as_uuid()))
            .bind(discrepancy.ledger_sum)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("correct_balance", e))?,
        };

        Ok(if result.rows_affected() == 0 {
            CorrectionOutcome::Superseded
        } else {
            CorrectionOutcome::Applied
        })
    }
}

#[derive(Debug)]
struct LedgerEntryRow {
    entry_id: uuid::Uuid,
    sequence: i64,
    organization_id: uuid::Uuid,
    item_id: uuid::Uuid,
    location_id: uuid::Uuid,
    lot_id: Option<uuid::Uuid>,
    quantity: f64,
    movement_type: String,
    correlation_id: uuid::Uuid,
    actor_id: uuid::Uuid,
    memo: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LedgerEntryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LedgerEntryRow {
            entry_id: row.try_get("entry_id")?,
            sequence: row.try_get("sequence")?,
            organization_id: row.try_get("organization_id")?,
            item_id: row.try_get("item_id")?,
            location_id: row.try_get("location_id")?,
            lot_id: row.try_get("lot_id")?,
            quantity: row.try_get("quantity")?,
            movement_type: row.try_get("movement_type")?,
            correlation_id: row.try_get("correlation_id")?,
            actor_id: row.try_get("actor_id")?,
            memo: row.try_get("memo")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = sqlx::Error;

    fn try_from(row: LedgerEntryRow) -> Result<Self, Self::Error> {
        let movement_type: MovementType = row.movement_type.parse().map_err(|e| sqlx::Error::ColumnDecode {
            index: "movement_type".to_string(),
            source: Box::new(e),
        })?;

        Ok(LedgerEntry {
            id: LedgerEntryId::from_uuid(row.entry_id),
            sequence: row.sequence as u64,
            organization_id: OrganizationId::from_uuid(row.organization_id),
            item_id: ItemId::from_uuid(row.item_id),
            location_id: LocationId::from_uuid(row.location_id),
            lot_id: row.lot_id.map(LotId::from_uuid),
            quantity: row.quantity,
            movement_type,
            correlation_id: CorrelationId::from_uuid(row.correlation_id),
            actor_id: ActorId::from_uuid(row.actor_id),
            memo: row.memo,
            recorded_at: row.recorded_at,
        })
    }
}

#[derive(Debug)]
struct BalanceRow {
    organization_id: uuid::Uuid,
    item_id: uuid::Uuid,
    location_id: uuid::Uuid,
    lot_id: Option<uuid::Uuid>,
    quantity: f64,
    last_updated: DateTime<Utc>,
    last_entry_id: Option<uuid::Uuid>,
}

impl<'r> FromRow<'r, PgRow> for BalanceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(BalanceRow {
            organization_id: row.try_get("organization_id")?,
            item_id: row.try_get("item_id")?,
            location_id: row.try_get("location_id")?,
            lot_id: row.try_get("lot_id")?,
            quantity: row.try_get("quantity")?,
            last_updated: row.try_get("last_updated")?,
            last_entry_id: row.try_get("last_entry_id")?,
        })
    }
}

impl From<BalanceRow> for Balance {
    fn from(row: BalanceRow) -> Self {
        Balance {
            key: BalanceKey {
                organization_id: OrganizationId::from_uuid(row.organization_id),
                item_id: ItemId::from_uuid(row.item_id),
                location_id: LocationId::from_uuid(row.location_id),
                lot_id: row.lot_id.map(LotId::from_uuid),
            },
            quantity: row.quantity,
            last_updated: Some(row.last_updated),
            last_entry_id: row.last_entry_id.map(LedgerEntryId::from_uuid),
        }
    }
}

#[derive(Debug)]
struct LedgerTotalRow {
    organization_id: uuid::Uuid,
    item_id: uuid::Uuid,
    location_id: uuid::Uuid,
    lot_id: Option<uuid::Uuid>,
    sum: f64,
    entry_count: i64,
}

impl<'r> FromRow<'r, PgRow> for LedgerTotalRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LedgerTotalRow {
            organization_id: row.try_get("organization_id")?,
            item_id: row.try_get("item_id")?,
            location_id: row.try_get("location_id")?,
            lot_id: row.try_get("lot_id")?,
            sum: row.try_get("sum")?,
            entry_count: row.try_get("entry_count")?,
        })
    }
}

impl From<LedgerTotalRow> for LedgerTotal {
    fn from(row: LedgerTotalRow) -> Self {
        LedgerTotal {
            key: BalanceKey {
                organization_id: OrganizationId::from_uuid(row.organization_id),
                item_id: ItemId::from_uuid(row.item_id),
                location_id: LocationId::from_uuid(row.location_id),
                lot_id: row.lot_id.map(LotId::from_uuid),
            },
            sum: row.sum,
            entry_count: row.entry_count as u64,
        }
    }
}
