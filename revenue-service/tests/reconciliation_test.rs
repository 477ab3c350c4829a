//! Payment reconciliation: settlement, failure, idempotency and the
//! gateway callback.

mod common;

use common::{gateway_invoice_created_body, TestApp};
use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn dec(value: &serde_json::Value) -> Decimal {
    serde_json::from_value(value.clone()).expect("Expected a decimal value")
}

/// Create a synced invoice and an initiated payment, returning
/// `(invoice_id, payment_id)`.
async fn synced_invoice_with_payment(app: &TestApp, amount: &str, reference: &str) -> (String, String) {
    let (_, property_id) = app.seed_customer_with_property().await;

    Mock::given(method("POST"))
        .and(path("/multi_tax_invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gateway_invoice_created_body(9001)))
        .mount(&app.gateway)
        .await;

    let response = app
        .client
        .post(format!("{}/invoices", app.address))
        .json(&json!({
            "property_id": property_id,
            "amount": amount,
            "due_date": "2026-09-30"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    let invoice_id = body["invoice"]["invoice_id"].as_str().unwrap().to_string();

    Mock::given(method("POST"))
        .and(path("/pay"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "link": "https://checkout.example/pay",
            "reference": reference
        })))
        .up_to_n_times(1)
        .mount(&app.gateway)
        .await;

    let response = app
        .client
        .post(format!("{}/invoices/{}/payments", app.address, invoice_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["reference"], reference);
    let payment_id = body["payment"]["payment_id"].as_str().unwrap().to_string();

    (invoice_id, payment_id)
}

async fn mount_verification(app: &TestApp, reference: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/payment/verify/{}", reference)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&app.gateway)
        .await;
}

#[tokio::test]
async fn successful_verification_settles_the_invoice() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (invoice_id, payment_id) = synced_invoice_with_payment(&app, "5000.00", "REF-0001").await;

    mount_verification(
        &app,
        "REF-0001",
        json!({"status": "success", "charges": 37.5, "channel": "card"}),
    )
    .await;

    let response = app
        .client
        .post(format!(
            "{}/invoices/{}/payments/{}/revalidate",
            app.address, invoice_id, payment_id
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "settled");
    assert_eq!(body["payment"]["status"], "SUCCESS");
    assert_eq!(body["payment"]["channel"], "card");
    assert_eq!(dec(&body["payment"]["charges"]), Decimal::new(375, 1));

    let invoice = &body["invoice"];
    assert_eq!(invoice["payment_status"], "PAID");
    assert_eq!(dec(&invoice["paid_amount"]), dec(&invoice["amount"]));
    assert_eq!(dec(&invoice["remaining_amount"]), Decimal::ZERO);
}

#[tokio::test]
async fn failed_verification_closes_the_payment_but_not_the_invoice() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (invoice_id, payment_id) = synced_invoice_with_payment(&app, "5000.00", "REF-0002").await;

    mount_verification(&app, "REF-0002", json!({"status": "FAILED", "charges": 25.0})).await;

    let response = app
        .client
        .post(format!(
            "{}/invoices/{}/payments/{}/revalidate",
            app.address, invoice_id, payment_id
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "failed");
    assert_eq!(body["payment"]["status"], "FAILED");
    assert_eq!(dec(&body["payment"]["paid_amount"]), Decimal::ZERO);
    // No settlement, no fee, whatever the verification payload claims.
    assert_eq!(dec(&body["payment"]["charges"]), Decimal::ZERO);

    let response = app
        .client
        .get(format!("{}/invoices/{}", app.address, invoice_id))
        .send()
        .await
        .unwrap();
    let invoice: serde_json::Value = response.json().await.unwrap();
    assert_eq!(invoice["payment_status"], "PENDING");
    assert_eq!(dec(&invoice["paid_amount"]), Decimal::ZERO);

    // A failed attempt is terminal; retrying the invoice means a new attempt.
    Mock::given(method("POST"))
        .and(path("/pay"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "link": "https://checkout.example/pay2",
            "reference": "REF-0002-RETRY"
        })))
        .mount(&app.gateway)
        .await;

    let response = app
        .client
        .post(format!("{}/invoices/{}/payments", app.address, invoice_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn inconclusive_verification_leaves_the_payment_pending() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (invoice_id, payment_id) = synced_invoice_with_payment(&app, "5000.00", "REF-0003").await;

    // The first check answers with an unrecognized status; the follow-up
    // confirms settlement.
    Mock::given(method("GET"))
        .and(path("/payment/verify/REF-0003"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
        .up_to_n_times(1)
        .mount(&app.gateway)
        .await;

    let url = format!(
        "{}/invoices/{}/payments/{}/revalidate",
        app.address, invoice_id, payment_id
    );

    let response = app.client.post(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "pending");
    assert_eq!(body["payment"]["status"], "PENDING");

    mount_verification(&app, "REF-0003", json!({"status": "success"})).await;

    let response = app.client.post(&url).send().await.unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "settled");
    assert_eq!(body["invoice"]["payment_status"], "PAID");
}

#[tokio::test]
async fn revalidating_a_settled_payment_is_a_no_op() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (invoice_id, payment_id) = synced_invoice_with_payment(&app, "5000.00", "REF-0004").await;

    // The terminal-state guard must keep the second run from re-verifying.
    Mock::given(method("GET"))
        .and(path("/payment/verify/REF-0004"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
        .expect(1)
        .mount(&app.gateway)
        .await;

    let url = format!(
        "{}/invoices/{}/payments/{}/revalidate",
        app.address, invoice_id, payment_id
    );

    let response = app.client.post(&url).send().await.unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "settled");

    let response = app.client.post(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "already_settled");

    let response = app
        .client
        .get(format!("{}/invoices/{}", app.address, invoice_id))
        .send()
        .await
        .unwrap();
    let invoice: serde_json::Value = response.json().await.unwrap();
    assert_eq!(invoice["payment_status"], "PAID");
    assert_eq!(dec(&invoice["paid_amount"]), dec(&invoice["amount"]));
}

#[tokio::test]
async fn partial_settlement_accumulates_across_attempts() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (invoice_id, payment_id) = synced_invoice_with_payment(&app, "2000.00", "REF-0005").await;

    // Reassess upward before the first attempt settles, so its amount
    // covers only part of the invoice.
    let response = app
        .client
        .put(format!("{}/invoices/{}", app.address, invoice_id))
        .json(&json!({
            "amount": "5000.00",
            "due_date": "2026-09-30",
            "description": "Reassessed"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    mount_verification(&app, "REF-0005", json!({"status": "success"})).await;

    let response = app
        .client
        .post(format!(
            "{}/invoices/{}/payments/{}/revalidate",
            app.address, invoice_id, payment_id
        ))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "settled");

    let invoice = &body["invoice"];
    assert_eq!(invoice["payment_status"], "PARTIAL");
    assert_eq!(dec(&invoice["paid_amount"]), Decimal::new(2000, 0));
    assert_eq!(dec(&invoice["remaining_amount"]), Decimal::new(3000, 0));

    // Second attempt covers exactly the remainder.
    Mock::given(method("POST"))
        .and(path("/pay"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "link": "https://checkout.example/pay2",
            "reference": "REF-0006"
        })))
        .mount(&app.gateway)
        .await;

    let response = app
        .client
        .post(format!("{}/invoices/{}/payments", app.address, invoice_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(dec(&body["payment"]["amount"]), Decimal::new(3000, 0));
    let second_payment_id = body["payment"]["payment_id"].as_str().unwrap().to_string();

    mount_verification(&app, "REF-0006", json!({"status": "success"})).await;

    let response = app
        .client
        .post(format!(
            "{}/invoices/{}/payments/{}/revalidate",
            app.address, invoice_id, second_payment_id
        ))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "settled");
    assert_eq!(body["invoice"]["payment_status"], "PAID");
    assert_eq!(dec(&body["invoice"]["paid_amount"]), Decimal::new(5000, 0));

    // Fully paid invoices accept no further attempts or edits.
    let response = app
        .client
        .post(format!("{}/invoices/{}/payments", app.address, invoice_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 412);

    let response = app
        .client
        .put(format!("{}/invoices/{}", app.address, invoice_id))
        .json(&json!({"amount": "1.00", "due_date": "2026-09-30"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 412);

    let response = app
        .client
        .delete(format!("{}/invoices/{}", app.address, invoice_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 412);
}

#[tokio::test]
async fn edit_cannot_reduce_amount_below_settled_total() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (invoice_id, payment_id) = synced_invoice_with_payment(&app, "2000.00", "REF-0012").await;

    let response = app
        .client
        .put(format!("{}/invoices/{}", app.address, invoice_id))
        .json(&json!({"amount": "5000.00", "due_date": "2026-09-30"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    mount_verification(&app, "REF-0012", json!({"status": "success"})).await;

    let response = app
        .client
        .post(format!(
            "{}/invoices/{}/payments/{}/revalidate",
            app.address, invoice_id, payment_id
        ))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "settled");
    assert_eq!(body["invoice"]["payment_status"], "PARTIAL");

    // 2000.00 is already settled; the invoice cannot shrink below it.
    let response = app
        .client
        .put(format!("{}/invoices/{}", app.address, invoice_id))
        .json(&json!({"amount": "1500.00", "due_date": "2026-09-30"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 412);

    let response = app
        .client
        .get(format!("{}/invoices/{}", app.address, invoice_id))
        .send()
        .await
        .unwrap();
    let invoice: serde_json::Value = response.json().await.unwrap();
    assert_eq!(dec(&invoice["amount"]), Decimal::new(5000, 0));
    assert_eq!(invoice["payment_status"], "PARTIAL");

    // Reassessing down to exactly the settled total closes the invoice.
    let response = app
        .client
        .put(format!("{}/invoices/{}", app.address, invoice_id))
        .json(&json!({"amount": "2000.00", "due_date": "2026-09-30"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let invoice: serde_json::Value = response.json().await.unwrap();
    assert_eq!(invoice["payment_status"], "PAID");
    assert_eq!(dec(&invoice["remaining_amount"]), Decimal::ZERO);

    // A closed invoice accepts no further payment attempts.
    let response = app
        .client
        .post(format!("{}/invoices/{}/payments", app.address, invoice_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 412);
}

#[tokio::test]
async fn gateway_verification_outage_keeps_the_payment_pending() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (invoice_id, payment_id) = synced_invoice_with_payment(&app, "5000.00", "REF-0007").await;

    Mock::given(method("GET"))
        .and(path("/payment/verify/REF-0007"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": "maintenance"})))
        .mount(&app.gateway)
        .await;

    let response = app
        .client
        .post(format!(
            "{}/invoices/{}/payments/{}/revalidate",
            app.address, invoice_id, payment_id
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);

    let response = app
        .client
        .get(format!("{}/invoices/{}/payments", app.address, invoice_id))
        .send()
        .await
        .unwrap();
    let payments: serde_json::Value = response.json().await.unwrap();
    assert_eq!(payments[0]["status"], "PENDING");
}

#[tokio::test]
async fn revalidate_rejects_a_payment_from_another_invoice() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (_, payment_id) = synced_invoice_with_payment(&app, "5000.00", "REF-0008").await;
    let (other_invoice_id, _) = synced_invoice_with_payment(&app, "3000.00", "REF-0009").await;

    let response = app
        .client
        .post(format!(
            "{}/invoices/{}/payments/{}/revalidate",
            app.address, other_invoice_id, payment_id
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 412);
}

#[tokio::test]
async fn callback_reconciles_and_redirects_the_payer() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (invoice_id, _) = synced_invoice_with_payment(&app, "5000.00", "REF-0010").await;

    mount_verification(&app, "REF-0010", json!({"status": "success"})).await;

    let no_redirect = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let callback_url = format!(
        "{}/invoices/{}/gateway-callback?reference=REF-0010",
        app.address, invoice_id
    );

    let response = no_redirect.get(&callback_url).send().await.unwrap();
    assert_eq!(response.status(), 303);
    let location = response.headers()["location"].to_str().unwrap();
    assert_eq!(
        location,
        format!(
            "http://localhost:3006/invoices/{}?payment_outcome=success",
            invoice_id
        )
    );

    let response = app
        .client
        .get(format!("{}/invoices/{}", app.address, invoice_id))
        .send()
        .await
        .unwrap();
    let invoice: serde_json::Value = response.json().await.unwrap();
    assert_eq!(invoice["payment_status"], "PAID");

    // Replays land on the terminal-state guard and report the same outcome.
    let response = no_redirect.get(&callback_url).send().await.unwrap();
    assert_eq!(response.status(), 303);
    let location = response.headers()["location"].to_str().unwrap();
    assert!(location.ends_with("payment_outcome=success"));
}

#[tokio::test]
async fn callback_without_a_known_reference_still_redirects() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };
    let (invoice_id, _) = synced_invoice_with_payment(&app, "5000.00", "REF-0011").await;

    let no_redirect = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let response = no_redirect
        .get(format!(
            "{}/invoices/{}/gateway-callback?reference=REF-NEVER-ISSUED",
            app.address, invoice_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 303);
    let location = response.headers()["location"].to_str().unwrap();
    assert!(location.ends_with("payment_outcome=unknown"));

    let response = no_redirect
        .get(format!(
            "{}/invoices/{}/gateway-callback",
            app.address, invoice_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 303);
    let location = response.headers()["location"].to_str().unwrap();
    assert!(location.ends_with("payment_outcome=unknown"));
}
