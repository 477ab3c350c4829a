//! Database service: invoice and payment stores.

use crate::models::{
    CreateInvoice, CreatePayment, Customer, CustomerRef, Invoice, InvoiceStatus,
    ListInvoicesFilter, Payment, PaymentStatus, Property, UpdateInvoice,
};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, invoice_number, customer_kind, customer_id, property_id, issuer_id, \
     amount, paid_amount, currency, issue_date, due_date, payment_status, description, \
     gateway_processor, gateway_invoice_id, gateway_invoice_number, gateway_reference, \
     gateway_payment_url, gateway_response, gateway_synced_at, created_utc, updated_utc";

const PAYMENT_COLUMNS: &str = "payment_id, invoice_id, property_id, customer_kind, customer_id, reference, \
     amount, paid_amount, charges, processor, channel, status, payment_date, created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "revenue-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Begin a transaction for multi-row commits.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to begin: {}", e)))
    }

    // -------------------------------------------------------------------------
    // Customer / Property lookups
    // -------------------------------------------------------------------------

    /// Resolve a customer reference of either kind.
    #[instrument(skip(self), fields(customer_id = %customer.id))]
    pub async fn get_customer(&self, customer: CustomerRef) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_customer"])
            .start_timer();

        let record = sqlx::query_as::<_, Customer>(
            r#"
            SELECT customer_id, kind, first_name, last_name, company_name, email, phone_number, created_utc
            FROM customers
            WHERE customer_id = $1 AND kind = $2
            "#,
        )
        .bind(customer.id)
        .bind(customer.kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get customer: {}", e)))?;

        timer.observe_duration();

        Ok(record)
    }

    /// Get a property by id.
    #[instrument(skip(self), fields(property_id = %property_id))]
    pub async fn get_property(&self, property_id: Uuid) -> Result<Option<Property>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_property"])
            .start_timer();

        let property = sqlx::query_as::<_, Property>(
            r#"
            SELECT property_id, customer_kind, customer_id, reference_type, reference_value,
                   address, assessed_amount, created_utc
            FROM properties
            WHERE property_id = $1
            "#,
        )
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get property: {}", e)))?;

        timer.observe_duration();

        Ok(property)
    }

    // -------------------------------------------------------------------------
    // Invoice operations
    // -------------------------------------------------------------------------

    /// Create an invoice, allocating the next `INV-YYYYMM-NNNN` number.
    ///
    /// Number allocation and the insert run in one transaction; the
    /// per-month counter row is advanced with an upsert, so two concurrent
    /// creations in the same month cannot observe the same sequence value.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn create_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;

        let period = input.issue_date.format("%Y%m").to_string();
        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_sequences (period, last_seq)
            VALUES ($1, 1)
            ON CONFLICT (period) DO UPDATE SET last_seq = invoice_sequences.last_seq + 1
            RETURNING last_seq
            "#,
        )
        .bind(&period)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to allocate invoice number: {}", e))
        })?;

        let invoice_number = format_invoice_number(&period, sequence);

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (invoice_id, invoice_number, customer_kind, customer_id, property_id,
                issuer_id, amount, paid_amount, currency, issue_date, due_date, payment_status, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $10, 'PENDING', $11)
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(&invoice_number)
        .bind(input.customer_kind.as_str())
        .bind(input.customer_id)
        .bind(input.property_id)
        .bind(input.issuer_id)
        .bind(input.amount)
        .bind(&input.currency)
        .bind(input.issue_date)
        .bind(input.due_date)
        .bind(&input.description)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice number '{}' already exists",
                    invoice_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)),
        })?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e)))?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            "Invoice created"
        );

        Ok(invoice)
    }

    /// Get an invoice by id.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// List invoices with optional filters, newest first.
    #[instrument(skip(self, filter))]
    pub async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = if filter.limit > 0 { filter.limit } else { 15 };

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE ($1::text IS NULL OR payment_status = $1)
              AND ($2::uuid IS NULL OR customer_id = $2)
              AND ($3::uuid IS NULL OR property_id = $3)
            ORDER BY created_utc DESC
            LIMIT $4 OFFSET $5
            "#,
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.customer_id)
        .bind(filter.property_id)
        .bind(limit)
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Update amount/due date/description of an unpaid invoice.
    ///
    /// The status and settled-amount guards are repeated in SQL so a
    /// concurrent settlement cannot slip an edit onto a paid invoice or
    /// push `paid_amount` above the new amount. A reassessment down to
    /// exactly the settled total closes the invoice.
    #[instrument(skip(self, input), fields(invoice_id = %invoice_id))]
    pub async fn update_invoice_details(
        &self,
        invoice_id: Uuid,
        input: &UpdateInvoice,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice_details"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET amount = $2,
                due_date = $3,
                description = $4,
                payment_status = CASE
                    WHEN paid_amount = 0 THEN payment_status
                    WHEN paid_amount >= $2 THEN 'PAID'
                    ELSE 'PARTIAL'
                END,
                updated_utc = NOW()
            WHERE invoice_id = $1 AND payment_status <> 'PAID' AND paid_amount <= $2
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(invoice_id)
        .bind(input.amount)
        .bind(input.due_date)
        .bind(&input.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Delete an unpaid invoice. Returns whether a row was removed.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn delete_invoice(&self, invoice_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        let result = sqlx::query(
            "DELETE FROM invoices WHERE invoice_id = $1 AND payment_status <> 'PAID'",
        )
        .bind(invoice_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    /// Record a successful gateway sync on an invoice.
    #[instrument(skip(self, response), fields(invoice_id = %invoice_id))]
    pub async fn mark_invoice_synced(
        &self,
        invoice_id: Uuid,
        processor: &str,
        gateway_invoice_id: Option<i64>,
        gateway_invoice_number: Option<&str>,
        response: &Value,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_invoice_synced"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET gateway_processor = $2,
                gateway_invoice_id = $3,
                gateway_invoice_number = $4,
                gateway_response = $5,
                gateway_synced_at = NOW(),
                updated_utc = NOW()
            WHERE invoice_id = $1
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(invoice_id)
        .bind(processor)
        .bind(gateway_invoice_id)
        .bind(gateway_invoice_number)
        .bind(response)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record sync: {}", e)))?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            processor = %processor,
            "Invoice synced with gateway"
        );

        Ok(invoice)
    }

    /// Cache the latest payment link and reference on an invoice.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn set_invoice_payment_link(
        &self,
        invoice_id: Uuid,
        link: Option<&str>,
        reference: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE invoices
            SET gateway_payment_url = $2, gateway_reference = $3, updated_utc = NOW()
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .bind(link)
        .bind(reference)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to store payment link: {}", e))
        })?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Payment operations
    // -------------------------------------------------------------------------

    /// Record a freshly initiated payment attempt in `PENDING`.
    #[instrument(skip(self, input), fields(invoice_id = %input.invoice_id, reference = %input.reference))]
    pub async fn create_payment(&self, input: &CreatePayment) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments (payment_id, invoice_id, property_id, customer_kind, customer_id,
                reference, amount, paid_amount, charges, processor, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 0, $8, 'PENDING')
            RETURNING {PAYMENT_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(input.invoice_id)
        .bind(input.property_id)
        .bind(input.customer_kind.as_str())
        .bind(input.customer_id)
        .bind(&input.reference)
        .bind(input.amount)
        .bind(&input.processor)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Payment reference '{}' already recorded",
                    input.reference
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create payment: {}", e)),
        })?;

        timer.observe_duration();

        info!(
            payment_id = %payment.payment_id,
            reference = %payment.reference,
            "Payment attempt recorded"
        );

        Ok(payment)
    }

    /// Get a payment by id.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        Ok(payment)
    }

    /// Look up a payment by its gateway reference.
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn get_payment_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, AppError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        Ok(payment)
    }

    /// List payment attempts for an invoice, oldest first.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE invoice_id = $1 ORDER BY created_utc ASC"
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        Ok(payments)
    }

    // -------------------------------------------------------------------------
    // Reconciliation commit helpers (run inside one transaction)
    // -------------------------------------------------------------------------

    /// Lock a payment row for the duration of a reconciliation.
    ///
    /// Concurrent reconcilers for the same payment serialize here; the
    /// second one observes the terminal state the first committed.
    pub async fn lock_payment(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        payment_id: Uuid,
    ) -> Result<Option<Payment>, AppError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = $1 FOR UPDATE"
        ))
        .bind(payment_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock payment: {}", e)))?;

        Ok(payment)
    }

    /// Lock an invoice row for a totals update.
    ///
    /// Taken after the payment lock and before summing, so a concurrent
    /// reconciliation of a sibling payment cannot write a stale total.
    pub async fn lock_invoice(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1 FOR UPDATE"
        ))
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?;

        Ok(invoice)
    }

    /// Apply a verification result to a locked payment row.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_payment_result(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        payment_id: Uuid,
        status: PaymentStatus,
        paid_amount: Decimal,
        charges: Decimal,
        channel: Option<&str>,
        payment_date: Option<DateTime<Utc>>,
    ) -> Result<Payment, AppError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments
            SET status = $2,
                paid_amount = $3,
                charges = $4,
                channel = COALESCE($5, channel),
                payment_date = COALESCE($6, payment_date)
            WHERE payment_id = $1
            RETURNING {PAYMENT_COLUMNS}
            "#,
        ))
        .bind(payment_id)
        .bind(status.as_str())
        .bind(paid_amount)
        .bind(charges)
        .bind(channel)
        .bind(payment_date)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record payment result: {}", e))
        })?;

        Ok(payment)
    }

    /// Sum the confirmed amounts of all successful payments for an invoice.
    pub async fn sum_successful_payments(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        invoice_id: Uuid,
    ) -> Result<Decimal, AppError> {
        let total: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(paid_amount), 0)
            FROM payments
            WHERE invoice_id = $1 AND status = 'SUCCESS'
            "#,
        )
        .bind(invoice_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum payments: {}", e)))?;

        Ok(total)
    }

    /// Write recomputed totals and status onto an invoice.
    pub async fn apply_invoice_totals(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        invoice_id: Uuid,
        paid_amount: Decimal,
        status: InvoiceStatus,
    ) -> Result<Invoice, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET paid_amount = $2, payment_status = $3, updated_utc = NOW()
            WHERE invoice_id = $1
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(invoice_id)
        .bind(paid_amount)
        .bind(status.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice totals: {}", e))
        })?;

        Ok(invoice)
    }
}

/// Format an invoice number from a `YYYYMM` period and sequence value.
pub fn format_invoice_number(period: &str, sequence: i64) -> String {
    format!("INV-{}-{:04}", period, sequence)
}
