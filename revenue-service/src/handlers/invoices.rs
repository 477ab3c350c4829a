//! Invoice and payment handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{
    CreateInvoiceRequest, CreateInvoiceResponse, InvoiceDetailResponse, InvoiceResponse,
    ListInvoicesQuery, PaymentInitiationResponse, PaymentResponse, ReconciliationResponse,
    SyncInvoiceRequest, SyncInvoiceResponse, UpdateInvoiceRequest,
};
use crate::models::{InvoiceStatus, ListInvoicesFilter, UpdateInvoice};
use crate::services::lifecycle::{NewInvoice, SyncOptions};
use crate::startup::AppState;

/// Create an invoice, optionally mirroring it into the gateway.
pub async fn create_invoice(
    State(state): State<AppState>,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<CreateInvoiceResponse>), AppError> {
    payload.validate()?;

    let created = state
        .lifecycle
        .create_invoice(NewInvoice {
            property_id: payload.property_id,
            amount: payload.amount,
            due_date: payload.due_date,
            description: payload.description,
            issuer_id: payload.issuer_id,
            sync_with_gateway: payload.sync_with_gateway,
            sync_options: SyncOptions {
                revenue_category_key: payload.revenue_category_key,
                processor: payload.processor,
                variables: payload.variables,
            },
        })
        .await?;

    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<Vec<InvoiceResponse>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(parse_invoice_status)
        .transpose()?;

    let invoices = state
        .db
        .list_invoices(&ListInvoicesFilter {
            status,
            customer_id: query.customer_id,
            property_id: query.property_id,
            limit: query.limit.unwrap_or(15),
            offset: query.offset.unwrap_or(0),
        })
        .await?;

    Ok(Json(invoices.into_iter().map(Into::into).collect()))
}

/// Invoice detail with its payment attempt history.
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDetailResponse>, AppError> {
    let invoice = state
        .db
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    let payments = state.db.list_payments(invoice_id).await?;

    Ok(Json(InvoiceDetailResponse {
        invoice: invoice.into(),
        payments: payments.into_iter().map(Into::into).collect(),
    }))
}

/// Edit an unpaid invoice's amount, due date and description.
pub async fn update_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<UpdateInvoiceRequest>,
) -> Result<Json<InvoiceResponse>, AppError> {
    payload.validate()?;

    let invoice = state
        .lifecycle
        .update_invoice(
            invoice_id,
            &UpdateInvoice {
                amount: payload.amount,
                due_date: payload.due_date,
                description: payload.description,
            },
        )
        .await?;

    Ok(Json(invoice.into()))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.lifecycle.delete_invoice(invoice_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Retry gateway sync for an unsynced invoice. Unlike creation-time sync,
/// a failure here is the caller's answer.
pub async fn sync_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    payload: Option<Json<SyncInvoiceRequest>>,
) -> Result<Json<SyncInvoiceResponse>, AppError> {
    let Json(payload) = payload.unwrap_or_default();
    payload.validate()?;

    let outcome = state
        .lifecycle
        .sync_invoice(
            invoice_id,
            &SyncOptions {
                revenue_category_key: payload.revenue_category_key,
                processor: payload.processor,
                variables: payload.variables,
            },
        )
        .await?;

    Ok(Json(outcome.into()))
}

/// Initiate a payment attempt for the invoice's remaining amount.
pub async fn initiate_payment(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<(StatusCode, Json<PaymentInitiationResponse>), AppError> {
    let result = state.lifecycle.initiate_payment(invoice_id).await?;
    Ok((StatusCode::CREATED, Json(result.into())))
}

/// List payment attempts for an invoice, oldest first.
pub async fn list_payments(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<PaymentResponse>>, AppError> {
    state
        .db
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    let payments = state.db.list_payments(invoice_id).await?;
    Ok(Json(payments.into_iter().map(Into::into).collect()))
}

/// Re-verify a payment with the gateway and apply the outcome.
///
/// Safe to call any number of times; a payment already in a terminal
/// state reports it without re-verifying.
pub async fn revalidate_payment(
    State(state): State<AppState>,
    Path((invoice_id, payment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ReconciliationResponse>, AppError> {
    let outcome = state
        .lifecycle
        .reconcile_payment(invoice_id, payment_id)
        .await?;

    Ok(Json(outcome.into()))
}

fn parse_invoice_status(s: &str) -> Result<InvoiceStatus, AppError> {
    match s.to_uppercase().as_str() {
        "PENDING" => Ok(InvoiceStatus::Pending),
        "PARTIAL" => Ok(InvoiceStatus::Partial),
        "PAID" => Ok(InvoiceStatus::Paid),
        "FAILED" => Ok(InvoiceStatus::Failed),
        "CANCELLED" => Ok(InvoiceStatus::Cancelled),
        other => Err(AppError::BadRequest(anyhow::anyhow!(
            "Unknown invoice status filter: {}",
            other
        ))),
    }
}
