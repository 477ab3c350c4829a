//! Customer read models.
//!
//! The registry stores individual and corporate customers in one table with
//! a `kind` discriminator; invoices and payments refer to a customer through
//! a [`CustomerRef`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Customer kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerKind {
    Individual,
    Corporate,
}

impl CustomerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerKind::Individual => "INDIVIDUAL",
            CustomerKind::Corporate => "CORPORATE",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "CORPORATE" => CustomerKind::Corporate,
            _ => CustomerKind::Individual,
        }
    }
}

/// Reference to a customer of either kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRef {
    pub kind: CustomerKind,
    pub id: Uuid,
}

/// Customer record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub customer_id: Uuid,
    pub kind: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Customer {
    pub fn kind(&self) -> CustomerKind {
        CustomerKind::from_string(&self.kind)
    }

    pub fn customer_ref(&self) -> CustomerRef {
        CustomerRef {
            kind: self.kind(),
            id: self.customer_id,
        }
    }
}

/// Taxpayer identity submitted to the gateway when mirroring an invoice.
#[derive(Debug, Clone, Serialize)]
pub struct TaxpayerData {
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub email: Option<String>,
}

impl TaxpayerData {
    /// Build taxpayer data from a customer record.
    ///
    /// The gateway requires a phone number; `placeholder_phone` is
    /// substituted when the local record has none.
    pub fn from_customer(customer: &Customer, placeholder_phone: &str) -> Self {
        let (first_name, last_name) = match customer.kind() {
            CustomerKind::Individual => (
                customer
                    .first_name
                    .clone()
                    .unwrap_or_else(|| "N/A".to_string()),
                customer.last_name.clone().unwrap_or_default(),
            ),
            CustomerKind::Corporate => (
                customer
                    .company_name
                    .clone()
                    .unwrap_or_else(|| "N/A".to_string()),
                String::new(),
            ),
        };

        let phone_number = match customer.phone_number.as_deref() {
            Some(phone) if !phone.is_empty() => phone.to_string(),
            _ => placeholder_phone.to_string(),
        };

        Self {
            first_name,
            last_name,
            phone_number,
            email: customer.email.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn individual(phone: Option<&str>) -> Customer {
        Customer {
            customer_id: Uuid::new_v4(),
            kind: "INDIVIDUAL".to_string(),
            first_name: Some("Awa".to_string()),
            last_name: Some("Ceesay".to_string()),
            company_name: None,
            email: Some("awa@example.gm".to_string()),
            phone_number: phone.map(String::from),
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn taxpayer_uses_customer_phone_when_present() {
        let data = TaxpayerData::from_customer(&individual(Some("+2207001122")), "+2340000000000");
        assert_eq!(data.phone_number, "+2207001122");
        assert_eq!(data.first_name, "Awa");
        assert_eq!(data.last_name, "Ceesay");
    }

    #[test]
    fn taxpayer_substitutes_placeholder_for_missing_phone() {
        let data = TaxpayerData::from_customer(&individual(None), "+2340000000000");
        assert_eq!(data.phone_number, "+2340000000000");

        let data = TaxpayerData::from_customer(&individual(Some("")), "+2340000000000");
        assert_eq!(data.phone_number, "+2340000000000");
    }

    #[test]
    fn corporate_taxpayer_uses_company_name() {
        let customer = Customer {
            customer_id: Uuid::new_v4(),
            kind: "CORPORATE".to_string(),
            first_name: None,
            last_name: None,
            company_name: Some("Banjul Holdings Ltd".to_string()),
            email: None,
            phone_number: None,
            created_utc: Utc::now(),
        };
        let data = TaxpayerData::from_customer(&customer, "+2340000000000");
        assert_eq!(data.first_name, "Banjul Holdings Ltd");
        assert_eq!(data.last_name, "");
    }
}
