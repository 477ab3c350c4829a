use revenue_service::config::{Config, DatabaseConfig, GatewayConfig, ServerConfig};
use revenue_service::services::Database;
use revenue_service::startup::Application;
use rust_decimal::Decimal;
use secrecy::Secret;
use sqlx::postgres::PgPoolOptions;
use sqlx::Executor;
use std::collections::HashMap;
use uuid::Uuid;
use wiremock::MockServer;

/// A running application instance backed by a fresh database and a mock
/// gateway.
///
/// `spawn` returns `None` when `TEST_DATABASE_URL` is not set, so
/// database-backed tests skip cleanly on machines without Postgres.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub db: Database,
    pub gateway: MockServer,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Option<Self> {
        let admin_url = match std::env::var("TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("TEST_DATABASE_URL not set; skipping database-backed test");
                return None;
            }
        };

        let db_name = format!("revenue_test_{}", Uuid::new_v4().simple());
        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&admin_url)
            .await
            .expect("Failed to connect to TEST_DATABASE_URL");
        admin_pool
            .execute(format!(r#"CREATE DATABASE "{}""#, db_name).as_str())
            .await
            .expect("Failed to create test database");

        let (base, _) = admin_url
            .rsplit_once('/')
            .expect("TEST_DATABASE_URL must contain a database path");
        let database_url = format!("{}/{}", base, db_name);

        let gateway = MockServer::start().await;

        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Random port
            },
            database: DatabaseConfig {
                url: Secret::new(database_url),
                max_connections: 5,
                min_connections: 1,
            },
            gateway: GatewayConfig {
                base_url: gateway.uri(),
                client_id: "15".to_string(),
                timeout_secs: 5,
                default_processor: "paystack".to_string(),
                processors: vec![
                    "paystack".to_string(),
                    "remita".to_string(),
                    "interswitch".to_string(),
                ],
                revenue_categories: HashMap::from([
                    ("default".to_string(), 1052),
                    ("property_tax".to_string(), 1052),
                ]),
                public_base_url: "http://localhost:3006".to_string(),
            },
            service_name: "revenue-service-test".to_string(),
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);
        let db = app.db().clone();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        Some(TestApp {
            address,
            port,
            db,
            gateway,
            client: reqwest::Client::new(),
        })
    }

    /// Insert an individual customer and return its id.
    pub async fn seed_customer(&self) -> Uuid {
        let customer_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO customers (customer_id, kind, first_name, last_name, email, phone_number)
            VALUES ($1, 'INDIVIDUAL', 'Ada', 'Obi', 'ada.obi@example.com', '+2348012345678')
            "#,
        )
        .bind(customer_id)
        .execute(self.db.pool())
        .await
        .expect("Failed to seed customer");
        customer_id
    }

    /// Insert a property for a customer and return its id.
    pub async fn seed_property(&self, customer_id: Uuid) -> Uuid {
        let property_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO properties (property_id, customer_kind, customer_id,
                reference_type, reference_value, address, assessed_amount)
            VALUES ($1, 'INDIVIDUAL', $2, 'C_OF_O', 'KN/2024/0042', '12 Airport Road', $3)
            "#,
        )
        .bind(property_id)
        .bind(customer_id)
        .bind("5000.00".parse::<Decimal>().unwrap())
        .execute(self.db.pool())
        .await
        .expect("Failed to seed property");
        property_id
    }

    /// A customer with one property, ready for invoicing.
    pub async fn seed_customer_with_property(&self) -> (Uuid, Uuid) {
        let customer_id = self.seed_customer().await;
        let property_id = self.seed_property(customer_id).await;
        (customer_id, property_id)
    }
}

/// Standard gateway success payload for invoice creation.
pub fn gateway_invoice_created_body(gateway_invoice_id: i64) -> serde_json::Value {
    serde_json::json!({
        "message": "Invoices created",
        "data": [
            {"id": gateway_invoice_id, "invoice_number": format!("GW-{}", gateway_invoice_id)}
        ]
    })
}
