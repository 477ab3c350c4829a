//! Payment attempt model.
//!
//! One row per initiated payment attempt. An attempt transitions at most
//! once out of `PENDING`; a retry against the same invoice is a new row.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::customer::{CustomerKind, CustomerRef};

/// Payment attempt status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "SUCCESS" => PaymentStatus::Success,
            "FAILED" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }

    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failed)
    }
}

/// Payment attempt record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub property_id: Option<Uuid>,
    pub customer_kind: String,
    pub customer_id: Uuid,
    /// Gateway-issued reference, globally unique.
    pub reference: String,
    /// Amount this attempt set out to collect.
    pub amount: Decimal,
    /// Amount confirmed collected; zero until verification succeeds.
    pub paid_amount: Decimal,
    /// Processor fee reported on settlement; zero for pending and failed
    /// attempts.
    pub charges: Decimal,
    pub processor: String,
    pub channel: Option<String>,
    pub status: String,
    pub payment_date: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl Payment {
    pub fn status(&self) -> PaymentStatus {
        PaymentStatus::from_string(&self.status)
    }

    pub fn customer_ref(&self) -> CustomerRef {
        CustomerRef {
            kind: CustomerKind::from_string(&self.customer_kind),
            id: self.customer_id,
        }
    }
}

/// Input for recording a freshly initiated payment attempt.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub invoice_id: Uuid,
    pub property_id: Option<Uuid>,
    pub customer_kind: CustomerKind,
    pub customer_id: Uuid,
    pub reference: String,
    pub amount: Decimal,
    pub processor: String,
}
