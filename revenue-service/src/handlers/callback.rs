//! Gateway post-payment callback.
//!
//! The gateway redirects the payer's browser here after a payment attempt.
//! The callback is a trigger, never a source of truth: the outcome is
//! established by verifying the reference with the gateway, through the
//! same reconciliation path the manual revalidate action uses.

use axum::{
    extract::{Path, Query, State},
    response::Redirect,
};
use tracing::warn;
use uuid::Uuid;

use crate::dtos::CallbackQuery;
use crate::services::ReconciliationOutcome;
use crate::startup::AppState;

/// Handle the gateway's redirect for a completed (or abandoned) payment
/// attempt, then send the payer on to the invoice page.
///
/// Always redirects. A payer-facing URL must not surface 5xx pages for
/// conditions reconciliation can report in the query string instead.
pub async fn gateway_callback(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    let outcome = resolve_callback(&state, invoice_id, query.reference.as_deref()).await;
    let target = format!(
        "{}/invoices/{}?payment_outcome={}",
        state.config.gateway.public_base_url.trim_end_matches('/'),
        invoice_id,
        outcome
    );
    Redirect::to(&target)
}

async fn resolve_callback(
    state: &AppState,
    invoice_id: Uuid,
    reference: Option<&str>,
) -> &'static str {
    let Some(reference) = reference else {
        warn!(invoice_id = %invoice_id, "Gateway callback without a reference");
        return "unknown";
    };

    let payment = match state.db.get_payment_by_reference(reference).await {
        Ok(Some(payment)) => payment,
        Ok(None) => {
            warn!(
                invoice_id = %invoice_id,
                reference = %reference,
                "Gateway callback for an unknown payment reference"
            );
            return "unknown";
        }
        Err(e) => {
            warn!(invoice_id = %invoice_id, error = %e, "Gateway callback lookup failed");
            return "error";
        }
    };

    match state
        .lifecycle
        .reconcile_payment(invoice_id, payment.payment_id)
        .await
    {
        Ok(ReconciliationOutcome::Settled { .. })
        | Ok(ReconciliationOutcome::AlreadySettled { .. }) => "success",
        Ok(ReconciliationOutcome::Failed { .. })
        | Ok(ReconciliationOutcome::AlreadyFailed { .. }) => "failed",
        Ok(ReconciliationOutcome::StillPending { .. }) => "pending",
        Err(e) => {
            warn!(
                invoice_id = %invoice_id,
                payment_id = %payment.payment_id,
                error = %e,
                "Callback reconciliation failed"
            );
            "error"
        }
    }
}
