//! Postgres-backed invoice repository.
//!
//! Schema lives in `migrations/0001_invoices.sql`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | RepositoryError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `UniqueViolation` |
//! | Database (other) | Any other | `Database` |
//! | Guarded write matched no row | N/A | `Conflict` / `NotFound` |
//! | RowNotFound | N/A | `NotFound` |
//! | Other | N/A | `Database` |
//!
//! Lifecycle and binding rules are enforced by the statements themselves: an
//! invoice update only matches rows whose stored status may become the new
//! one, and a line-item upsert only overwrites rows that are unbound or already
//! bound to the same invoice.
//!
//! Inside a transaction, a failed statement aborts the Postgres transaction, so
//! a partially-written line-item batch can only be rolled back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use movebill_core::{InvoiceId, LineItemId, ShipmentId, UploadId};
use movebill_invoicing::{Invoice, InvoiceStatus, LineItemStatus, ShipmentLineItem};

use crate::config::SubmissionConfig;

use super::{
    InvoiceRepository, InvoiceTransaction, RepositoryError, RepositoryResult, binding_conflict,
    ensure_unique_line_items, status_conflict, statuses_writable_to, validate_invoice,
    validate_line_items,
};

/// Invoice repository over a Postgres connection pool.
///
/// `Send + Sync`; clones share the pool.
#[derive(Debug, Clone)]
pub struct PostgresInvoiceRepository {
    pool: Arc<PgPool>,
}

impl PostgresInvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect a new pool to `database_url`.
    pub async fn connect(database_url: &str) -> RepositoryResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Connect to the configured `DATABASE_URL`.
    pub async fn from_config(config: &SubmissionConfig) -> RepositoryResult<Self> {
        let database_url = config.database_url.as_deref().ok_or_else(|| {
            RepositoryError::Database("DATABASE_URL is not configured".to_string())
        })?;
        Self::connect(database_url).await
    }
}

#[async_trait]
impl InvoiceRepository for PostgresInvoiceRepository {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> RepositoryResult<Box<dyn InvoiceTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresInvoiceTransaction { tx }))
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id_typed()), err)]
    async fn create_invoice(&self, invoice: &Invoice) -> RepositoryResult<()> {
        validate_invoice(invoice)?;
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        insert_invoice(&mut conn, invoice).await
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id_typed()), err)]
    async fn save_invoice(&self, invoice: &Invoice) -> RepositoryResult<()> {
        validate_invoice(invoice)?;
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        update_invoice(&mut conn, invoice).await
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn fetch_invoice(&self, id: InvoiceId) -> RepositoryResult<Invoice> {
        let row = sqlx::query(
            r#"
            SELECT id, status, invoice_number, invoiced_date, shipment_id, upload_id
            FROM invoices
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_invoice", e))?
        .ok_or(RepositoryError::NotFound)?;

        invoice_from_row(&row)
    }

    #[instrument(skip(self), fields(shipment_id = %shipment_id), err)]
    async fn fetch_invoices_for_shipment(
        &self,
        shipment_id: ShipmentId,
    ) -> RepositoryResult<Vec<Invoice>> {
        let rows = sqlx::query(
            r#"
            SELECT id, status, invoice_number, invoiced_date, shipment_id, upload_id
            FROM invoices
            WHERE shipment_id = $1
            ORDER BY invoiced_date ASC, id ASC
            "#,
        )
        .bind(shipment_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_invoices_for_shipment", e))?;

        rows.iter().map(invoice_from_row).collect()
    }

    #[instrument(skip(self), fields(shipment_id = %shipment_id), err)]
    async fn fetch_line_items_for_shipment(
        &self,
        shipment_id: ShipmentId,
    ) -> RepositoryResult<Vec<ShipmentLineItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, shipment_id, invoice_id, status, requires_pre_approval,
                   item_code, amount_cents
            FROM shipment_line_items
            WHERE shipment_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(shipment_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_line_items_for_shipment", e))?;

        rows.iter().map(line_item_from_row).collect()
    }
}

/// A Postgres transaction; dropped without commit means rolled back.
pub struct PostgresInvoiceTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InvoiceTransaction for PostgresInvoiceTransaction {
    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id_typed()), err)]
    async fn create_invoice(&mut self, invoice: &Invoice) -> RepositoryResult<()> {
        validate_invoice(invoice)?;
        insert_invoice(&mut self.tx, invoice).await
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id_typed()), err)]
    async fn save_invoice(&mut self, invoice: &Invoice) -> RepositoryResult<()> {
        validate_invoice(invoice)?;
        update_invoice(&mut self.tx, invoice).await
    }

    #[instrument(skip(self, items), fields(line_item_count = items.len()), err)]
    async fn save_line_items(&mut self, items: &[ShipmentLineItem]) -> RepositoryResult<()> {
        validate_line_items(items)?;
        ensure_unique_line_items(items)?;
        for item in items {
            upsert_line_item(&mut self.tx, item).await?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        let PostgresInvoiceTransaction { tx } = *self;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        let PostgresInvoiceTransaction { tx } = *self;
        tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }
}

async fn insert_invoice(conn: &mut PgConnection, invoice: &Invoice) -> RepositoryResult<()> {
    sqlx::query(
        r#"
        INSERT INTO invoices (id, status, invoice_number, invoiced_date, shipment_id, upload_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(invoice.id_typed().as_uuid())
    .bind(invoice.status().as_str())
    .bind(invoice.invoice_number())
    .bind(invoice.invoiced_date())
    .bind(invoice.shipment_id().as_uuid())
    .bind(invoice.upload_id().map(Uuid::from))
    .execute(conn)
    .await
    .map_err(|e| map_sqlx_error("insert_invoice", e))?;
    Ok(())
}

async fn update_invoice(conn: &mut PgConnection, invoice: &Invoice) -> RepositoryResult<()> {
    let writable_from: Vec<String> = statuses_writable_to(invoice.status())
        .into_iter()
        .map(|status| status.as_str().to_string())
        .collect();

    let result = sqlx::query(
        r#"
        UPDATE invoices
        SET status = $2,
            invoice_number = $3,
            invoiced_date = $4,
            upload_id = $5,
            updated_at = now()
        WHERE id = $1 AND status = ANY($6)
        "#,
    )
    .bind(invoice.id_typed().as_uuid())
    .bind(invoice.status().as_str())
    .bind(invoice.invoice_number())
    .bind(invoice.invoiced_date())
    .bind(invoice.upload_id().map(Uuid::from))
    .bind(writable_from)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_invoice", e))?;

    if result.rows_affected() > 0 {
        return Ok(());
    }

    // Nothing matched: either the invoice is missing or its stored status forbids the write.
    let stored = sqlx::query_scalar::<_, String>("SELECT status FROM invoices WHERE id = $1")
        .bind(invoice.id_typed().as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("update_invoice", e))?;

    match stored {
        None => Err(RepositoryError::NotFound),
        Some(stored) => {
            let stored: InvoiceStatus = stored.parse().map_err(|e| {
                RepositoryError::Database(format!("invoice {}: {e}", invoice.id_typed()))
            })?;
            Err(status_conflict(invoice.id_typed(), stored, invoice.status()))
        }
    }
}

async fn upsert_line_item(conn: &mut PgConnection, item: &ShipmentLineItem) -> RepositoryResult<()> {
    let amount_cents = item
        .amount_cents()
        .map(i64::try_from)
        .transpose()
        .map_err(|_| {
            RepositoryError::Database(format!(
                "amount for line item {} does not fit in BIGINT",
                item.id_typed()
            ))
        })?;

    let result = sqlx::query(
        r#"
        INSERT INTO shipment_line_items (
            id, shipment_id, invoice_id, status, requires_pre_approval, item_code, amount_cents
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE
        SET invoice_id = EXCLUDED.invoice_id,
            status = EXCLUDED.status,
            requires_pre_approval = EXCLUDED.requires_pre_approval,
            item_code = EXCLUDED.item_code,
            amount_cents = EXCLUDED.amount_cents,
            updated_at = now()
        WHERE shipment_line_items.invoice_id IS NULL
           OR shipment_line_items.invoice_id = EXCLUDED.invoice_id
        "#,
    )
    .bind(item.id_typed().as_uuid())
    .bind(item.shipment_id().as_uuid())
    .bind(item.invoice_id().map(Uuid::from))
    .bind(item.status().as_str())
    .bind(item.requires_pre_approval())
    .bind(item.item_code())
    .bind(amount_cents)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("upsert_line_item", e))?;

    if result.rows_affected() == 0 {
        let bound: Option<Uuid> =
            sqlx::query_scalar::<_, Option<Uuid>>("SELECT invoice_id FROM shipment_line_items WHERE id = $1")
                .bind(item.id_typed().as_uuid())
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("upsert_line_item", e))?
                .flatten();
        return Err(match bound {
            Some(bound) => binding_conflict(item, InvoiceId::from_uuid(bound)),
            None => RepositoryError::Conflict(format!(
                "line item {} was not written",
                item.id_typed()
            )),
        });
    }
    Ok(())
}

fn invoice_from_row(row: &PgRow) -> RepositoryResult<Invoice> {
    let read = |e: sqlx::Error| RepositoryError::Database(format!("failed to read invoice row: {e}"));

    let id: Uuid = row.try_get("id").map_err(read)?;
    let status: String = row.try_get("status").map_err(read)?;
    let invoice_number: String = row.try_get("invoice_number").map_err(read)?;
    let invoiced_date: DateTime<Utc> = row.try_get("invoiced_date").map_err(read)?;
    let shipment_id: Uuid = row.try_get("shipment_id").map_err(read)?;
    let upload_id: Option<Uuid> = row.try_get("upload_id").map_err(read)?;

    let status: InvoiceStatus = status
        .parse()
        .map_err(|e| RepositoryError::Database(format!("invoice {id}: {e}")))?;

    Ok(Invoice::restore(
        InvoiceId::from_uuid(id),
        status,
        invoice_number,
        invoiced_date,
        ShipmentId::from_uuid(shipment_id),
        upload_id.map(UploadId::from_uuid),
    ))
}

fn line_item_from_row(row: &PgRow) -> RepositoryResult<ShipmentLineItem> {
    let read =
        |e: sqlx::Error| RepositoryError::Database(format!("failed to read line item row: {e}"));

    let id: Uuid = row.try_get("id").map_err(read)?;
    let shipment_id: Uuid = row.try_get("shipment_id").map_err(read)?;
    let invoice_id: Option<Uuid> = row.try_get("invoice_id").map_err(read)?;
    let status: String = row.try_get("status").map_err(read)?;
    let requires_pre_approval: bool = row.try_get("requires_pre_approval").map_err(read)?;
    let item_code: String = row.try_get("item_code").map_err(read)?;
    let amount_cents: Option<i64> = row.try_get("amount_cents").map_err(read)?;

    let status: LineItemStatus = status
        .parse()
        .map_err(|e| RepositoryError::Database(format!("line item {id}: {e}")))?;
    let amount_cents = amount_cents
        .map(u64::try_from)
        .transpose()
        .map_err(|_| RepositoryError::Database(format!("line item {id}: negative amount")))?;

    Ok(ShipmentLineItem::restore(
        LineItemId::from_uuid(id),
        ShipmentId::from_uuid(shipment_id),
        invoice_id.map(InvoiceId::from_uuid),
        status,
        requires_pre_approval,
        item_code,
        amount_cents,
    ))
}

/// Map SQLx errors to `RepositoryError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) if code.as_ref() == "23505" => RepositoryError::UniqueViolation(msg),
                _ => RepositoryError::Database(msg),
            }
        }
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::PoolClosed => {
            RepositoryError::Database(format!("connection pool closed in {}", operation))
        }
        _ => RepositoryError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}
