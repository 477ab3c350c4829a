//! Invoice lifecycle orchestration.
//!
//! Creates invoices, drives gateway synchronization, initiates payment
//! attempts, and reconciles verification results into invoice/payment
//! state. The webhook-style callback and the manual revalidation action
//! both route through [`InvoiceLifecycle::reconcile_payment`], so the two
//! entry points cannot diverge.

use crate::config::GatewayConfig;
use crate::models::{
    CreateInvoice, CreatePayment, CustomerKind, Invoice, InvoiceStatus, Payment, PaymentStatus,
    Property, TaxpayerData,
};
use crate::services::database::Database;
use crate::services::gateway::{GatewayClient, GatewayError, InvoiceEntry};
use crate::services::metrics::{
    GATEWAY_SYNCS_TOTAL, INVOICES_TOTAL, PAYMENTS_TOTAL, RECONCILIATIONS_TOTAL,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use service_core::error::AppError;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_CURRENCY: &str = "NGN";

/// The gateway requires a taxpayer phone number; this placeholder stands in
/// for customer records that have none.
const PLACEHOLDER_PHONE: &str = "+2340000000000";

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::BadGateway(err.to_string())
    }
}

/// Request to create a local invoice.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub property_id: Uuid,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub description: Option<String>,
    pub issuer_id: Option<Uuid>,
    pub sync_with_gateway: bool,
    pub sync_options: SyncOptions,
}

/// Options steering a gateway sync.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub revenue_category_key: Option<String>,
    pub processor: Option<String>,
    pub variables: Option<Value>,
}

/// Result of creating an invoice. `sync_warning` carries the non-blocking
/// reason when a requested gateway sync did not complete.
#[derive(Debug, Clone)]
pub struct CreatedInvoice {
    pub invoice: Invoice,
    pub sync_warning: Option<String>,
}

/// Result of an explicit gateway sync attempt.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Synced(Invoice),
    /// The gateway accepted the request but returned no entries; the
    /// invoice remains unsynced and the sync can be retried.
    NotSynced { invoice: Invoice, message: String },
}

/// Result of initiating a payment attempt.
#[derive(Debug, Clone)]
pub struct PaymentInitiationResult {
    pub payment: Payment,
    pub link: Option<String>,
    pub reference: String,
    pub processor: String,
}

/// Typed outcome of a reconciliation run.
#[derive(Debug, Clone)]
pub enum ReconciliationOutcome {
    /// Verification confirmed settlement; invoice totals updated.
    Settled { payment: Payment, invoice: Invoice },
    /// The payment was already in the `SUCCESS` terminal state; nothing
    /// was re-mutated.
    AlreadySettled { payment: Payment },
    /// Verification reported failure; payment closed, invoice untouched.
    Failed { payment: Payment },
    /// The payment was already in the `FAILED` terminal state.
    AlreadyFailed { payment: Payment },
    /// Verification was inconclusive; no terminal transition committed.
    StillPending { payment: Payment },
}

impl ReconciliationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReconciliationOutcome::Settled { .. } => "settled",
            ReconciliationOutcome::AlreadySettled { .. } => "already_settled",
            ReconciliationOutcome::Failed { .. } => "failed",
            ReconciliationOutcome::AlreadyFailed { .. } => "already_failed",
            ReconciliationOutcome::StillPending { .. } => "pending",
        }
    }

    /// Operator-facing summary of the outcome.
    pub fn message(&self) -> String {
        match self {
            ReconciliationOutcome::Settled { invoice, .. } => format!(
                "Payment verified successfully. Invoice is now {}.",
                invoice.payment_status
            ),
            ReconciliationOutcome::AlreadySettled { .. } => {
                "Payment is already marked as successful.".to_string()
            }
            ReconciliationOutcome::Failed { .. } => {
                "Payment verification failed. The payment was not successful.".to_string()
            }
            ReconciliationOutcome::AlreadyFailed { .. } => {
                "Payment attempt already failed. Initiate a new payment to retry.".to_string()
            }
            ReconciliationOutcome::StillPending { .. } => {
                "Payment is still pending. Please try again later.".to_string()
            }
        }
    }
}

/// Map the gateway's informal verification status onto a payment status.
///
/// Only `success` and `failed` (any case) commit a terminal transition;
/// anything else, including absence, stays `PENDING`.
pub fn map_gateway_status(raw: Option<&str>) -> PaymentStatus {
    match raw {
        Some(status) if status.eq_ignore_ascii_case("success") => PaymentStatus::Success,
        Some(status) if status.eq_ignore_ascii_case("failed") => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

/// Recompute invoice totals from the confirmed sum of successful payments.
///
/// `paid_amount` is clamped to the invoice amount; the invoice becomes
/// `PAID` when nothing remains, `PARTIAL` otherwise.
pub fn settlement_totals(invoice_amount: Decimal, success_total: Decimal) -> (Decimal, InvoiceStatus) {
    let paid_amount = success_total.min(invoice_amount);
    let remaining = (invoice_amount - success_total).max(Decimal::ZERO);
    let status = if remaining <= Decimal::ZERO {
        InvoiceStatus::Paid
    } else {
        InvoiceStatus::Partial
    };
    (paid_amount, status)
}

/// Orchestrator for invoice creation, gateway sync, payment initiation and
/// reconciliation.
#[derive(Clone)]
pub struct InvoiceLifecycle {
    db: Database,
    gateway: GatewayClient,
    config: GatewayConfig,
}

impl InvoiceLifecycle {
    pub fn new(db: Database, gateway: GatewayClient, config: GatewayConfig) -> Self {
        Self {
            db,
            gateway,
            config,
        }
    }

    // -------------------------------------------------------------------------
    // Creation & sync
    // -------------------------------------------------------------------------

    /// Create an invoice and, when requested, mirror it into the gateway.
    ///
    /// Local invoicing is the source of truth: a gateway sync failure is
    /// logged and reported as a warning, never as a creation failure.
    pub async fn create_invoice(&self, input: NewInvoice) -> Result<CreatedInvoice, AppError> {
        if input.amount.is_sign_negative() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoice amount must not be negative"
            )));
        }
        if let Some(processor) = input.sync_options.processor.as_deref() {
            self.ensure_known_processor(processor)?;
        }

        let property = self
            .db
            .get_property(input.property_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Property not found")))?;

        let description = input.description.clone().unwrap_or_else(|| {
            format!(
                "Invoice for {}: {}",
                property.reference_type, property.reference_value
            )
        });

        let invoice = self
            .db
            .create_invoice(&CreateInvoice {
                customer_kind: CustomerKind::from_string(&property.customer_kind),
                customer_id: property.customer_id,
                property_id: Some(property.property_id),
                issuer_id: input.issuer_id,
                amount: input.amount,
                currency: DEFAULT_CURRENCY.to_string(),
                issue_date: Utc::now().date_naive(),
                due_date: input.due_date,
                description: Some(description),
            })
            .await?;

        INVOICES_TOTAL
            .with_label_values(&[InvoiceStatus::Pending.as_str()])
            .inc();

        if !input.sync_with_gateway {
            return Ok(CreatedInvoice {
                invoice,
                sync_warning: None,
            });
        }

        match self
            .sync_invoice_with_gateway(&invoice, &property, &input.sync_options)
            .await
        {
            Ok(SyncOutcome::Synced(invoice)) => Ok(CreatedInvoice {
                invoice,
                sync_warning: None,
            }),
            Ok(SyncOutcome::NotSynced { invoice, message }) => Ok(CreatedInvoice {
                invoice,
                sync_warning: Some(message),
            }),
            Err(e) => {
                warn!(
                    invoice_id = %invoice.invoice_id,
                    error = %e,
                    "Gateway sync failed during invoice creation; invoice remains unsynced"
                );
                GATEWAY_SYNCS_TOTAL.with_label_values(&["failed"]).inc();
                Ok(CreatedInvoice {
                    invoice,
                    sync_warning: Some(format!("Invoice created but not synced: {}", e)),
                })
            }
        }
    }

    /// Retry gateway sync for an existing unsynced invoice.
    ///
    /// Unlike creation-time sync, failures here surface to the caller.
    pub async fn sync_invoice(
        &self,
        invoice_id: Uuid,
        options: &SyncOptions,
    ) -> Result<SyncOutcome, AppError> {
        let invoice = self
            .db
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if invoice.is_synced() {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "Invoice is already synced with the gateway"
            )));
        }

        let property_id = invoice.property_id.ok_or_else(|| {
            AppError::PreconditionFailed(anyhow::anyhow!("Invoice has no property to sync against"))
        })?;
        let property = self
            .db
            .get_property(property_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Property not found")))?;

        self.sync_invoice_with_gateway(&invoice, &property, options)
            .await
    }

    /// Mirror an invoice into the gateway and persist the sync result.
    async fn sync_invoice_with_gateway(
        &self,
        invoice: &Invoice,
        property: &Property,
        options: &SyncOptions,
    ) -> Result<SyncOutcome, AppError> {
        let key = options.revenue_category_key.as_deref().unwrap_or("default");
        let revenue_category_id = self.config.revenue_category_id(key).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!(
                "Revenue category not configured for key: {}",
                key
            ))
        })?;

        let processor = options
            .processor
            .clone()
            .unwrap_or_else(|| self.config.default_processor.clone());
        self.ensure_known_processor(&processor)?;

        let customer = self
            .db
            .get_customer(property.customer_ref())
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Customer not found")))?;
        let taxpayer = TaxpayerData::from_customer(&customer, PLACEHOLDER_PHONE);

        let variables = options
            .variables
            .clone()
            .unwrap_or_else(|| json!({ "amount": invoice.amount }));

        let entries = [InvoiceEntry {
            revenue_sub_head_id: revenue_category_id,
            variables,
            description: invoice.description.clone(),
            due_date: invoice.due_date,
        }];

        let created = self
            .gateway
            .create_multi_tax_invoices(&entries, &taxpayer, &processor)
            .await?;

        if created.entries.is_empty() {
            // The gateway accepted the request but mirrored nothing; report
            // it instead of leaving an indistinguishable "unsynced" state.
            warn!(
                invoice_id = %invoice.invoice_id,
                "Gateway returned no invoice entries; invoice remains unsynced"
            );
            GATEWAY_SYNCS_TOTAL.with_label_values(&["empty"]).inc();
            return Ok(SyncOutcome::NotSynced {
                invoice: invoice.clone(),
                message: "Gateway accepted the sync but returned no invoice entries".to_string(),
            });
        }

        let first = &created.entries[0];
        let invoice = self
            .db
            .mark_invoice_synced(
                invoice.invoice_id,
                &processor,
                Some(first.id),
                first.invoice_number.as_deref(),
                &created.raw,
            )
            .await?;

        GATEWAY_SYNCS_TOTAL.with_label_values(&["synced"]).inc();

        Ok(SyncOutcome::Synced(invoice))
    }

    // -------------------------------------------------------------------------
    // Payment initiation
    // -------------------------------------------------------------------------

    /// Initiate a payment attempt for the invoice's remaining amount.
    ///
    /// Produces a pending payment row keyed by the gateway-issued
    /// reference and returns the redirect link for the payer. Completion
    /// is asynchronous; this call never waits for it.
    pub async fn initiate_payment(
        &self,
        invoice_id: Uuid,
    ) -> Result<PaymentInitiationResult, AppError> {
        let invoice = self
            .db
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if invoice.is_fully_paid() {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "Invoice is already paid"
            )));
        }
        if invoice.remaining_amount() <= Decimal::ZERO {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "Invoice has no outstanding amount to collect"
            )));
        }
        if !invoice.is_synced() {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "Invoice must be synced with the gateway before payment can be initiated"
            )));
        }

        let gateway_invoice_ids = invoice.gateway_invoice_ids();
        if gateway_invoice_ids.is_empty() {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "Synced invoice carries no gateway invoice ids"
            )));
        }

        let processor = invoice
            .gateway_processor
            .clone()
            .unwrap_or_else(|| self.config.default_processor.clone());

        let callback_url = format!(
            "{}/invoices/{}/gateway-callback",
            self.config.public_base_url.trim_end_matches('/'),
            invoice.invoice_id
        );

        let initiation = self
            .gateway
            .initiate_payment(&gateway_invoice_ids, &processor, None, Some(&callback_url))
            .await?;

        let payment = self
            .db
            .create_payment(&CreatePayment {
                invoice_id: invoice.invoice_id,
                property_id: invoice.property_id,
                customer_kind: CustomerKind::from_string(&invoice.customer_kind),
                customer_id: invoice.customer_id,
                reference: initiation.reference.clone(),
                amount: invoice.remaining_amount(),
                processor: processor.clone(),
            })
            .await?;

        PAYMENTS_TOTAL
            .with_label_values(&[PaymentStatus::Pending.as_str()])
            .inc();

        // UI convenience cache; the payment row is the source of truth.
        self.db
            .set_invoice_payment_link(
                invoice.invoice_id,
                initiation.link.as_deref(),
                &initiation.reference,
            )
            .await?;

        info!(
            invoice_id = %invoice.invoice_id,
            payment_id = %payment.payment_id,
            reference = %payment.reference,
            processor = %processor,
            "Payment initiated"
        );

        Ok(PaymentInitiationResult {
            payment,
            link: initiation.link,
            reference: initiation.reference,
            processor,
        })
    }

    // -------------------------------------------------------------------------
    // Reconciliation
    // -------------------------------------------------------------------------

    /// Verify a payment with the gateway and commit its outcome.
    ///
    /// The payment row is locked for the whole run, the terminal-state
    /// guard makes replays no-ops, and the payment transition plus the
    /// invoice totals update commit as one transaction. Invoice totals
    /// are recomputed from the sum of successful payments rather than
    /// incremented, so a replay can never double-credit.
    pub async fn reconcile_payment(
        &self,
        invoice_id: Uuid,
        payment_id: Uuid,
    ) -> Result<ReconciliationOutcome, AppError> {
        let mut tx = self.db.begin().await?;

        let payment = self
            .db
            .lock_payment(&mut tx, payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

        if payment.invoice_id != invoice_id {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "Payment does not belong to this invoice"
            )));
        }

        // Terminal states admit no further transition; dropping the
        // transaction releases the lock without mutating anything.
        match payment.status() {
            PaymentStatus::Success => {
                RECONCILIATIONS_TOTAL
                    .with_label_values(&["already_settled"])
                    .inc();
                return Ok(ReconciliationOutcome::AlreadySettled { payment });
            }
            PaymentStatus::Failed => {
                RECONCILIATIONS_TOTAL
                    .with_label_values(&["already_failed"])
                    .inc();
                return Ok(ReconciliationOutcome::AlreadyFailed { payment });
            }
            PaymentStatus::Pending => {}
        }

        let verification = self.gateway.verify_payment(&payment.reference).await?;

        info!(
            payment_id = %payment.payment_id,
            reference = %payment.reference,
            gateway_status = ?verification.status,
            "Payment verification response"
        );

        let charges = verification
            .charges
            .and_then(Decimal::from_f64_retain)
            .unwrap_or(Decimal::ZERO);

        match map_gateway_status(verification.status.as_deref()) {
            PaymentStatus::Pending => {
                RECONCILIATIONS_TOTAL.with_label_values(&["pending"]).inc();
                Ok(ReconciliationOutcome::StillPending { payment })
            }
            PaymentStatus::Failed => {
                // Nothing was collected, so no fee applies either.
                let payment = self
                    .db
                    .record_payment_result(
                        &mut tx,
                        payment.payment_id,
                        PaymentStatus::Failed,
                        Decimal::ZERO,
                        Decimal::ZERO,
                        verification.channel.as_deref(),
                        None,
                    )
                    .await?;
                tx.commit().await.map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e))
                })?;

                PAYMENTS_TOTAL
                    .with_label_values(&[PaymentStatus::Failed.as_str()])
                    .inc();
                RECONCILIATIONS_TOTAL.with_label_values(&["failed"]).inc();

                Ok(ReconciliationOutcome::Failed { payment })
            }
            PaymentStatus::Success => {
                // The gateway reports no attempt-level partial settlement:
                // the full attempted amount is taken as collected.
                let payment = self
                    .db
                    .record_payment_result(
                        &mut tx,
                        payment.payment_id,
                        PaymentStatus::Success,
                        payment.amount,
                        charges,
                        verification.channel.as_deref(),
                        Some(Utc::now()),
                    )
                    .await?;

                let invoice = self
                    .db
                    .lock_invoice(&mut tx, invoice_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

                let success_total = self
                    .db
                    .sum_successful_payments(&mut tx, invoice_id)
                    .await?;
                let (paid_amount, status) = settlement_totals(invoice.amount, success_total);

                let invoice = self
                    .db
                    .apply_invoice_totals(&mut tx, invoice_id, paid_amount, status)
                    .await?;

                tx.commit().await.map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e))
                })?;

                PAYMENTS_TOTAL
                    .with_label_values(&[PaymentStatus::Success.as_str()])
                    .inc();
                INVOICES_TOTAL.with_label_values(&[status.as_str()]).inc();
                RECONCILIATIONS_TOTAL.with_label_values(&["settled"]).inc();

                info!(
                    invoice_id = %invoice.invoice_id,
                    payment_id = %payment.payment_id,
                    paid_amount = %invoice.paid_amount,
                    payment_status = %invoice.payment_status,
                    "Payment settled and invoice updated"
                );

                Ok(ReconciliationOutcome::Settled { payment, invoice })
            }
        }
    }

    // -------------------------------------------------------------------------
    // Guarded edits
    // -------------------------------------------------------------------------

    /// Edit an invoice's amount, due date and description.
    ///
    /// Paid invoices are immutable.
    pub async fn update_invoice(
        &self,
        invoice_id: Uuid,
        input: &crate::models::UpdateInvoice,
    ) -> Result<Invoice, AppError> {
        if input.amount.is_sign_negative() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoice amount must not be negative"
            )));
        }

        let invoice = self
            .db
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if invoice.is_fully_paid() {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "Cannot edit a paid invoice"
            )));
        }
        if input.amount < invoice.paid_amount {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "Invoice amount cannot be reduced below the settled amount of {}",
                invoice.paid_amount
            )));
        }

        self.db
            .update_invoice_details(invoice_id, input)
            .await?
            .ok_or_else(|| {
                AppError::PreconditionFailed(anyhow::anyhow!(
                    "Invoice edit conflicts with recorded payments"
                ))
            })
    }

    /// Delete an invoice. Paid invoices are never deleted.
    pub async fn delete_invoice(&self, invoice_id: Uuid) -> Result<(), AppError> {
        let invoice = self
            .db
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if invoice.is_fully_paid() {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "Cannot delete a paid invoice"
            )));
        }

        if !self.db.delete_invoice(invoice_id).await? {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "Cannot delete a paid invoice"
            )));
        }

        Ok(())
    }

    /// Extract gateway template variables for a recognized revenue
    /// category key.
    pub async fn extract_variables(
        &self,
        key: &str,
        ward_id: Option<i64>,
        revenue_type_category: Option<&str>,
    ) -> Result<crate::services::gateway::ExtractedVariables, AppError> {
        let revenue_category_id = self.config.revenue_category_id(key).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!(
                "Revenue category not configured for key: {}",
                key
            ))
        })?;

        Ok(self
            .gateway
            .extract_variables(revenue_category_id, ward_id, revenue_type_category)
            .await?)
    }

    fn ensure_known_processor(&self, processor: &str) -> Result<(), AppError> {
        if self.config.processors.iter().any(|p| p == processor) {
            Ok(())
        } else {
            Err(AppError::BadRequest(anyhow::anyhow!(
                "Unknown payment processor: {}",
                processor
            )))
        }
    }
}
