//! Property read model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::customer::{CustomerKind, CustomerRef};

/// Registered property against which invoices are raised.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Property {
    pub property_id: Uuid,
    pub customer_kind: String,
    pub customer_id: Uuid,
    /// Kind of registry identifier (e.g. "parcel", "certificate").
    pub reference_type: String,
    /// Registry identifier value.
    pub reference_value: String,
    pub address: Option<String>,
    /// Assessed annual amount, used to seed gateway variables.
    pub assessed_amount: Decimal,
    pub created_utc: DateTime<Utc>,
}

impl Property {
    pub fn customer_ref(&self) -> CustomerRef {
        CustomerRef {
            kind: CustomerKind::from_string(&self.customer_kind),
            id: self.customer_id,
        }
    }
}
