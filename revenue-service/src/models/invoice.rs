//! Invoice model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::customer::{CustomerKind, CustomerRef};

/// Invoice payment status.
///
/// `Failed` and `Cancelled` exist in the schema for operator tooling but are
/// never produced by reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    Partial,
    Paid,
    Failed,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Partial => "PARTIAL",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Failed => "FAILED",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "PARTIAL" => InvoiceStatus::Partial,
            "PAID" => InvoiceStatus::Paid,
            "FAILED" => InvoiceStatus::Failed,
            "CANCELLED" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Pending,
        }
    }
}

/// Invoice record.
///
/// The `gateway_*` columns mirror the external revenue-collection gateway;
/// `gateway_synced_at` is null until the first successful sync. The payment
/// link and reference are caches for the UI, never the source of truth for
/// settlement.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub customer_kind: String,
    pub customer_id: Uuid,
    pub property_id: Option<Uuid>,
    pub issuer_id: Option<Uuid>,
    pub amount: Decimal,
    pub paid_amount: Decimal,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub payment_status: String,
    pub description: Option<String>,
    pub gateway_processor: Option<String>,
    pub gateway_invoice_id: Option<i64>,
    pub gateway_invoice_number: Option<String>,
    pub gateway_reference: Option<String>,
    pub gateway_payment_url: Option<String>,
    pub gateway_response: Option<serde_json::Value>,
    pub gateway_synced_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.payment_status)
    }

    /// Outstanding amount, clamped at zero.
    pub fn remaining_amount(&self) -> Decimal {
        (self.amount - self.paid_amount).max(Decimal::ZERO)
    }

    pub fn is_fully_paid(&self) -> bool {
        self.status() == InvoiceStatus::Paid
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.due_date < today && !self.is_fully_paid()
    }

    pub fn is_synced(&self) -> bool {
        self.gateway_synced_at.is_some()
    }

    pub fn customer_ref(&self) -> CustomerRef {
        CustomerRef {
            kind: CustomerKind::from_string(&self.customer_kind),
            id: self.customer_id,
        }
    }

    /// Gateway-side invoice ids recorded by the last successful sync.
    pub fn gateway_invoice_ids(&self) -> Vec<i64> {
        self.gateway_response
            .as_ref()
            .and_then(|response| response.get("data"))
            .and_then(|data| data.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("id").and_then(|id| id.as_i64()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub customer_kind: CustomerKind,
    pub customer_id: Uuid,
    pub property_id: Option<Uuid>,
    pub issuer_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub description: Option<String>,
}

/// Input for editing an invoice that is not yet paid.
#[derive(Debug, Clone)]
pub struct UpdateInvoice {
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub description: Option<String>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<Uuid>,
    pub property_id: Option<Uuid>,
    pub limit: i64,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(amount: &str, paid: &str, status: &str) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: "INV-202608-0001".to_string(),
            customer_kind: "INDIVIDUAL".to_string(),
            customer_id: Uuid::new_v4(),
            property_id: None,
            issuer_id: None,
            amount: amount.parse().unwrap(),
            paid_amount: paid.parse().unwrap(),
            currency: "NGN".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            payment_status: status.to_string(),
            description: None,
            gateway_processor: None,
            gateway_invoice_id: None,
            gateway_invoice_number: None,
            gateway_reference: None,
            gateway_payment_url: None,
            gateway_response: None,
            gateway_synced_at: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn remaining_amount_is_clamped_at_zero() {
        let inv = invoice("100.00", "150.00", "PAID");
        assert_eq!(inv.remaining_amount(), Decimal::ZERO);

        let inv = invoice("100.00", "40.00", "PARTIAL");
        assert_eq!(inv.remaining_amount(), "60.00".parse::<Decimal>().unwrap());
    }

    #[test]
    fn overdue_requires_past_due_date_and_unpaid_status() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        assert!(invoice("100.00", "0.00", "PENDING").is_overdue(today));
        assert!(!invoice("100.00", "100.00", "PAID").is_overdue(today));

        let early = NaiveDate::from_ymd_opt(2026, 8, 15).unwrap();
        assert!(!invoice("100.00", "0.00", "PENDING").is_overdue(early));
    }

    #[test]
    fn gateway_invoice_ids_parse_from_sync_response() {
        let mut inv = invoice("100.00", "0.00", "PENDING");
        assert!(inv.gateway_invoice_ids().is_empty());

        inv.gateway_response = Some(serde_json::json!({
            "data": [
                {"id": 9001, "invoice_number": "GW-0001"},
                {"id": 9002, "invoice_number": "GW-0002"},
                {"invoice_number": "no-id-entry"}
            ]
        }));
        assert_eq!(inv.gateway_invoice_ids(), vec![9001, 9002]);
    }

    #[test]
    fn unknown_status_string_defaults_to_pending() {
        assert_eq!(InvoiceStatus::from_string("bogus"), InvoiceStatus::Pending);
        assert_eq!(InvoiceStatus::from_string("PAID"), InvoiceStatus::Paid);
    }
}
