pub mod database;
pub mod gateway;
pub mod lifecycle;
pub mod metrics;

pub use database::Database;
pub use gateway::{GatewayClient, GatewayError};
pub use lifecycle::{InvoiceLifecycle, ReconciliationOutcome, SyncOutcome};
pub use metrics::{get_metrics, init_metrics};
