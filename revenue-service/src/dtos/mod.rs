//! Request and response shapes for the HTTP surface.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::models::{Invoice, Payment};
use crate::services::lifecycle::{
    CreatedInvoice, PaymentInitiationResult, ReconciliationOutcome, SyncOutcome,
};

fn default_sync() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    pub property_id: Uuid,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub issuer_id: Option<Uuid>,
    /// Mirror the invoice into the gateway at creation time. Sync failures
    /// never fail the creation; they surface as `sync_warning`.
    #[serde(default = "default_sync")]
    pub sync_with_gateway: bool,
    #[validate(length(min = 1, max = 64))]
    pub processor: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub revenue_category_key: Option<String>,
    pub variables: Option<Value>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInvoiceRequest {
    pub amount: Decimal,
    pub due_date: NaiveDate,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct SyncInvoiceRequest {
    #[validate(length(min = 1, max = 64))]
    pub processor: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub revenue_category_key: Option<String>,
    pub variables: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListInvoicesQuery {
    pub status: Option<String>,
    pub customer_id: Option<Uuid>,
    pub property_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Query carried by the gateway's post-payment redirect.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VariablesQuery {
    /// Recognized revenue-category key; defaults to `default`.
    pub key: Option<String>,
    pub ward_id: Option<i64>,
    pub revenue_type_category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub customer_kind: String,
    pub customer_id: Uuid,
    pub property_id: Option<Uuid>,
    pub amount: Decimal,
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub payment_status: String,
    pub description: Option<String>,
    pub synced: bool,
    pub gateway_processor: Option<String>,
    pub gateway_invoice_number: Option<String>,
    pub gateway_payment_url: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl From<Invoice> for InvoiceResponse {
    fn from(invoice: Invoice) -> Self {
        Self {
            remaining_amount: invoice.remaining_amount(),
            synced: invoice.is_synced(),
            invoice_id: invoice.invoice_id,
            invoice_number: invoice.invoice_number,
            customer_kind: invoice.customer_kind,
            customer_id: invoice.customer_id,
            property_id: invoice.property_id,
            amount: invoice.amount,
            paid_amount: invoice.paid_amount,
            currency: invoice.currency,
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            payment_status: invoice.payment_status,
            description: invoice.description,
            gateway_processor: invoice.gateway_processor,
            gateway_invoice_number: invoice.gateway_invoice_number,
            gateway_payment_url: invoice.gateway_payment_url,
            created_utc: invoice.created_utc,
            updated_utc: invoice.updated_utc,
        }
    }
}

/// Invoice detail: the invoice plus its payment attempt history.
#[derive(Debug, Serialize)]
pub struct InvoiceDetailResponse {
    #[serde(flatten)]
    pub invoice: InvoiceResponse,
    pub payments: Vec<PaymentResponse>,
}

#[derive(Debug, Serialize)]
pub struct CreateInvoiceResponse {
    pub invoice: InvoiceResponse,
    pub synced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_warning: Option<String>,
}

impl From<CreatedInvoice> for CreateInvoiceResponse {
    fn from(created: CreatedInvoice) -> Self {
        Self {
            synced: created.invoice.is_synced() && created.sync_warning.is_none(),
            sync_warning: created.sync_warning,
            invoice: created.invoice.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SyncInvoiceResponse {
    pub synced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub invoice: InvoiceResponse,
}

impl From<SyncOutcome> for SyncInvoiceResponse {
    fn from(outcome: SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Synced(invoice) => Self {
                synced: true,
                message: None,
                invoice: invoice.into(),
            },
            SyncOutcome::NotSynced { invoice, message } => Self {
                synced: false,
                message: Some(message),
                invoice: invoice.into(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub reference: String,
    pub amount: Decimal,
    pub paid_amount: Decimal,
    pub charges: Decimal,
    pub processor: String,
    pub channel: Option<String>,
    pub status: String,
    pub payment_date: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            payment_id: payment.payment_id,
            invoice_id: payment.invoice_id,
            reference: payment.reference,
            amount: payment.amount,
            paid_amount: payment.paid_amount,
            charges: payment.charges,
            processor: payment.processor,
            channel: payment.channel,
            status: payment.status,
            payment_date: payment.payment_date,
            created_utc: payment.created_utc,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentInitiationResponse {
    pub payment: PaymentResponse,
    pub link: Option<String>,
    pub reference: String,
    pub processor: String,
}

impl From<PaymentInitiationResult> for PaymentInitiationResponse {
    fn from(result: PaymentInitiationResult) -> Self {
        Self {
            payment: result.payment.into(),
            link: result.link,
            reference: result.reference,
            processor: result.processor,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReconciliationResponse {
    /// One of `settled`, `already_settled`, `failed`, `already_failed`,
    /// `pending`.
    pub outcome: &'static str,
    pub message: String,
    pub payment: PaymentResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<InvoiceResponse>,
}

impl From<ReconciliationOutcome> for ReconciliationResponse {
    fn from(outcome: ReconciliationOutcome) -> Self {
        let label = outcome.label();
        let message = outcome.message();
        let (payment, invoice) = match outcome {
            ReconciliationOutcome::Settled { payment, invoice } => (payment, Some(invoice)),
            ReconciliationOutcome::AlreadySettled { payment }
            | ReconciliationOutcome::Failed { payment }
            | ReconciliationOutcome::AlreadyFailed { payment }
            | ReconciliationOutcome::StillPending { payment } => (payment, None),
        };
        Self {
            outcome: label,
            message,
            payment: payment.into(),
            invoice: invoice.map(Into::into),
        }
    }
}
