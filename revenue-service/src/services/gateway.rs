//! Revenue-collection gateway client.
//!
//! Thin HTTP client over the gateway's REST API: remote tax-invoice
//! creation, template-variable extraction, payment initiation, and payment
//! verification. Pure request/response; no local state.

use crate::config::GatewayConfig;
use crate::models::TaxpayerData;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failure modes of a gateway call.
///
/// `Unavailable` covers transport failures and timeouts, `Rejected` a
/// non-2xx response, `InvalidResponse` a 2xx body the client cannot use.
/// All three are recoverable by retrying the specific operation.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway unreachable: {0}")]
    Unavailable(#[from] reqwest::Error),

    #[error("gateway rejected request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

/// One invoice entry submitted to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceEntry {
    pub revenue_sub_head_id: i64,
    pub variables: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub due_date: NaiveDate,
}

#[derive(Debug, Serialize)]
struct MultiTaxInvoiceRequest<'a> {
    entries: &'a [InvoiceEntry],
    first_name: &'a str,
    last_name: &'a str,
    phone_number: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    gateway: &'a str,
}

/// One gateway-side invoice from a creation response.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayInvoice {
    pub id: i64,
    pub invoice_number: Option<String>,
}

/// Result of a remote invoice creation: the parsed entries plus the raw
/// payload, which is persisted verbatim on the local invoice.
#[derive(Debug, Clone)]
pub struct CreatedInvoices {
    pub entries: Vec<GatewayInvoice>,
    pub raw: Value,
}

/// Template variables for a revenue category.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedVariables {
    pub variables: Value,
    pub template: String,
}

/// Response to a payment initiation.
#[derive(Debug, Clone)]
pub struct PaymentInitiation {
    pub link: Option<String>,
    pub reference: String,
    pub processor: String,
}

#[derive(Debug, Serialize)]
struct PayRequest<'a> {
    invoice_id: &'a [i64],
    gateway: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
}

/// Verification payload for a payment reference.
///
/// `status` is an informal string (`success`/`failed`/`pending`, any case);
/// mapping to local payment state happens in the lifecycle, not here.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentVerification {
    pub status: Option<String>,
    pub charges: Option<f64>,
    pub channel: Option<String>,
}

/// Client for the external revenue-collection gateway.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Create remote tax invoices for one taxpayer.
    pub async fn create_multi_tax_invoices(
        &self,
        entries: &[InvoiceEntry],
        taxpayer: &TaxpayerData,
        processor: &str,
    ) -> Result<CreatedInvoices, GatewayError> {
        let request = MultiTaxInvoiceRequest {
            entries,
            first_name: &taxpayer.first_name,
            last_name: &taxpayer.last_name,
            phone_number: &taxpayer.phone_number,
            email: taxpayer.email.as_deref(),
            gateway: processor,
        };

        let url = format!("{}/multi_tax_invoices", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-client-id", &self.config.client_id)
            .json(&request)
            .send()
            .await?;

        let raw = Self::read_json(response, "invoice creation").await?;

        let entries: Vec<GatewayInvoice> = match raw.get("data") {
            Some(data) => serde_json::from_value(data.clone()).map_err(|e| {
                GatewayError::InvalidResponse(format!("malformed invoice entries: {}", e))
            })?,
            None => Vec::new(),
        };

        tracing::info!(
            entry_count = entries.len(),
            processor = %processor,
            "Gateway invoices created"
        );

        Ok(CreatedInvoices { entries, raw })
    }

    /// Extract the template variables for a revenue category.
    ///
    /// The gateway answers with a 2-element array:
    /// `[variables_object, template_string]`.
    pub async fn extract_variables(
        &self,
        revenue_category_id: i64,
        ward_id: Option<i64>,
        revenue_type_category: Option<&str>,
    ) -> Result<ExtractedVariables, GatewayError> {
        let url = format!("{}/tax_invoices/extract/variables", self.config.base_url);

        let mut query: Vec<(&str, String)> =
            vec![("revenue_sub_head_id", revenue_category_id.to_string())];
        if let Some(ward) = ward_id {
            query.push(("ward_id", ward.to_string()));
        }
        if let Some(category) = revenue_type_category {
            query.push(("revenue_type_category", category.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .header("x-client-id", &self.config.client_id)
            .query(&query)
            .send()
            .await?;

        let body = Self::read_json(response, "variable extraction").await?;

        match body.as_array() {
            Some(parts) if parts.len() >= 2 => Ok(ExtractedVariables {
                variables: parts[0].clone(),
                template: parts[1].as_str().unwrap_or_default().to_string(),
            }),
            _ => Err(GatewayError::InvalidResponse(
                "expected [variables, template] array".to_string(),
            )),
        }
    }

    /// Initiate payment for gateway-side invoice ids.
    ///
    /// Returns the redirect link and the gateway-issued reference the payer
    /// completes out-of-band.
    pub async fn initiate_payment(
        &self,
        invoice_ids: &[i64],
        processor: &str,
        reference: Option<&str>,
        callback_url: Option<&str>,
    ) -> Result<PaymentInitiation, GatewayError> {
        let request = PayRequest {
            invoice_id: invoice_ids,
            gateway: processor,
            reference,
            callback_url,
        };

        tracing::info!(
            invoice_ids = ?invoice_ids,
            processor = %processor,
            "Initiating gateway payment"
        );

        let url = format!("{}/pay", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-client-id", &self.config.client_id)
            .json(&request)
            .send()
            .await?;

        let body = Self::read_json(response, "payment initiation").await?;

        let reference = body
            .get("reference")
            .and_then(|r| r.as_str())
            .map(String::from)
            .ok_or_else(|| {
                GatewayError::InvalidResponse("payment initiation returned no reference".to_string())
            })?;
        let link = body
            .get("link")
            .and_then(|l| l.as_str())
            .map(String::from);

        Ok(PaymentInitiation {
            link,
            reference,
            processor: processor.to_string(),
        })
    }

    /// Verify the authoritative status of a payment reference.
    pub async fn verify_payment(
        &self,
        reference: &str,
    ) -> Result<PaymentVerification, GatewayError> {
        tracing::info!(reference = %reference, "Verifying gateway payment");

        let url = format!("{}/payment/verify/{}", self.config.base_url, reference);
        let response = self
            .client
            .get(&url)
            .header("x-client-id", &self.config.client_id)
            .send()
            .await?;

        let body = Self::read_json(response, "payment verification").await?;

        serde_json::from_value(body)
            .map_err(|e| GatewayError::InvalidResponse(format!("malformed verification: {}", e)))
    }

    /// Decode a response body, mapping non-2xx statuses to a typed
    /// rejection carrying the gateway's `{message}` when present.
    async fn read_json(response: reqwest::Response, context: &str) -> Result<Value, GatewayError> {
        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, body = %body, "Gateway response");

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                GatewayError::InvalidResponse(format!("{} returned non-JSON body: {}", context, e))
            })
        } else {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("message")
                        .and_then(|m| m.as_str())
                        .map(String::from)
                })
                .unwrap_or_else(|| format!("{} failed", context));

            tracing::error!(status = %status, message = %message, "Gateway request rejected");

            Err(GatewayError::Rejected { status, message })
        }
    }
}
