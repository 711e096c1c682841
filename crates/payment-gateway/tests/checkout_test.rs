//! Integration tests for card checkout

mod common;

use std::sync::Arc;

use actix_web::{http::StatusCode, test, App};
use serde_json::{json, Value};

use common::*;
use payment_gateway::error::PaymentError;
use payment_gateway::models::{CheckoutRequest, IntentStatus};
use payment_gateway::services::CheckoutOutcome;

const CHECKOUT_PATH: &str = "/api/v1/payments/checkout";

fn checkout_body(product_id: &str, key: &str) -> Value {
    json!({
        "productId": product_id,
        "idempotencyKey": key,
        "successUrl": "https://app.example.com/billing/success",
        "cancelUrl": "https://app.example.com/billing/cancel"
    })
}

fn checkout_request(product_id: &str, key: &str) -> CheckoutRequest {
    serde_json::from_value(checkout_body(product_id, key)).unwrap()
}

#[actix_web::test]
async fn test_checkout_returns_hosted_session() {
    let gateway = Arc::new(FakeGateway::default());
    let h = default_harness(unused_verifier(), gateway.clone());
    let app = test::init_service(App::new().configure(app_config(h.services.clone()))).await;
    let key = new_key();

    let req = test::TestRequest::post()
        .uri(CHECKOUT_PATH)
        .insert_header(bearer(USER_A))
        .set_json(checkout_body("prod_pro", &key))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "redirect");
    assert_eq!(body["sessionId"], "cs_test_1");
    assert_eq!(
        body["checkoutUrl"],
        "https://checkout.stripe.com/c/pay/cs_test_1"
    );

    let params = gateway.last_params.lock().unwrap().clone().unwrap();
    assert_eq!(params.user_id, USER_A);
    assert_eq!(params.product_id, "prod_pro");
    assert_eq!(params.idempotency_key, key);
    assert_eq!(params.amount_cents, 1000);

    let intent = h.store.intent(&key).unwrap();
    assert_eq!(intent.status(), IntentStatus::Created);
    assert_eq!(intent.checkout_session_id.as_deref(), Some("cs_test_1"));

    // Nothing is paid until the webhook arrives
    assert!(h.store.payments().is_empty());
    assert!(h.store.profile(USER_A).is_none());
}

#[actix_web::test]
async fn test_repeated_key_returns_same_session() {
    let gateway = Arc::new(FakeGateway::default());
    let h = default_harness(unused_verifier(), gateway.clone());
    let request = checkout_request("prod_pro", &new_key());

    let first = h.services.checkout.start_checkout(USER_A, &request).await.unwrap();
    let second = h.services.checkout.start_checkout(USER_A, &request).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(gateway.call_count(), 1);
}

#[actix_web::test]
async fn test_new_key_opens_new_session() {
    let gateway = Arc::new(FakeGateway::default());
    let h = default_harness(unused_verifier(), gateway.clone());

    let first = h
        .services
        .checkout
        .start_checkout(USER_A, &checkout_request("prod_pro", &new_key()))
        .await
        .unwrap();
    let second = h
        .services
        .checkout
        .start_checkout(USER_A, &checkout_request("prod_pro", &new_key()))
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(gateway.call_count(), 2);
}

#[actix_web::test]
async fn test_key_reused_for_other_product_conflicts() {
    let gateway = Arc::new(FakeGateway::default());
    let h = default_harness(unused_verifier(), gateway.clone());
    let key = new_key();

    h.services
        .checkout
        .start_checkout(USER_A, &checkout_request("prod_pro", &key))
        .await
        .unwrap();
    let err = h
        .services
        .checkout
        .start_checkout(USER_A, &checkout_request("prod_business", &key))
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::Conflict(_)));
    assert_eq!(gateway.call_count(), 1);
}

#[actix_web::test]
async fn test_key_reused_by_other_user_conflicts() {
    let h = default_harness(unused_verifier(), Arc::new(FakeGateway::default()));
    let app = test::init_service(App::new().configure(app_config(h.services.clone()))).await;
    let key = new_key();

    let req = test::TestRequest::post()
        .uri(CHECKOUT_PATH)
        .insert_header(bearer(USER_A))
        .set_json(checkout_body("prod_pro", &key))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::post()
        .uri(CHECKOUT_PATH)
        .insert_header(bearer(USER_B))
        .set_json(checkout_body("prod_pro", &key))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "conflict");
}

#[actix_web::test]
async fn test_free_product_activates_without_gateway() {
    let gateway = Arc::new(FakeGateway::default());
    let h = default_harness(unused_verifier(), gateway.clone());
    let key = new_key();

    let outcome = h
        .services
        .checkout
        .start_checkout(USER_A, &checkout_request("prod_free", &key))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        CheckoutOutcome::Activated {
            tier: "starter".to_string()
        }
    );
    assert_eq!(gateway.call_count(), 0);
    assert_eq!(h.store.intent(&key).unwrap().status(), IntentStatus::Completed);

    let profile = h.store.profile(USER_A).unwrap();
    assert_eq!(profile.tier, "starter");
    assert_eq!(profile.bonus_credits, 50);
}

#[actix_web::test]
async fn test_free_product_bonus_granted_once_per_user() {
    let h = default_harness(unused_verifier(), Arc::new(FakeGateway::default()));

    for _ in 0..2 {
        let outcome = h
            .services
            .checkout
            .start_checkout(USER_A, &checkout_request("prod_free", &new_key()))
            .await
            .unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Activated { .. }));
    }

    assert_eq!(h.store.payments().len(), 1);
    assert_eq!(h.store.profile(USER_A).unwrap().bonus_credits, 50);
}

#[actix_web::test]
async fn test_completed_intent_reports_completed() {
    let h = default_harness(unused_verifier(), Arc::new(FakeGateway::default()));
    let request = checkout_request("prod_free", &new_key());

    h.services.checkout.start_checkout(USER_A, &request).await.unwrap();
    let replay = h.services.checkout.start_checkout(USER_A, &request).await.unwrap();

    assert_eq!(
        replay,
        CheckoutOutcome::Completed {
            tier: "starter".to_string()
        }
    );
}

#[actix_web::test]
async fn test_missing_stripe_config_is_server_misconfigured() {
    let mut config = test_payment_config();
    config.stripe_secret_key = None;
    let h = harness(
        seeded_store(),
        config,
        Arc::new(FakeLimiter::default()),
        verifiers_with_evm(unused_verifier()),
        None,
    );
    let app = test::init_service(App::new().configure(app_config(h.services.clone()))).await;

    let req = test::TestRequest::post()
        .uri(CHECKOUT_PATH)
        .insert_header(bearer(USER_A))
        .set_json(checkout_body("prod_pro", &new_key()))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "server_misconfigured");
    assert!(!body["message"].as_str().unwrap().contains("STRIPE"));
}

#[actix_web::test]
async fn test_free_checkout_works_without_stripe() {
    let mut config = test_payment_config();
    config.stripe_secret_key = None;
    config.stripe_webhook_secret = None;
    let h = harness(
        seeded_store(),
        config,
        Arc::new(FakeLimiter::default()),
        verifiers_with_evm(unused_verifier()),
        None,
    );

    let outcome = h
        .services
        .checkout
        .start_checkout(USER_A, &checkout_request("prod_free", &new_key()))
        .await
        .unwrap();
    assert!(matches!(outcome, CheckoutOutcome::Activated { .. }));
}

#[actix_web::test]
async fn test_gateway_failure_is_503_and_key_can_retry() {
    let h = default_harness(unused_verifier(), Arc::new(FakeGateway::failing()));
    let app = test::init_service(App::new().configure(app_config(h.services.clone()))).await;
    let key = new_key();

    let req = test::TestRequest::post()
        .uri(CHECKOUT_PATH)
        .insert_header(bearer(USER_A))
        .set_json(checkout_body("prod_pro", &key))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = test::read_body_json(resp).await;
    assert!(!body["message"].as_str().unwrap().contains("connection reset"));

    // The intent stays pending so the same key can try again
    assert_eq!(h.store.intent(&key).unwrap().status(), IntentStatus::Pending);
}

#[actix_web::test]
async fn test_unknown_product_is_404() {
    let h = default_harness(unused_verifier(), Arc::new(FakeGateway::default()));
    let app = test::init_service(App::new().configure(app_config(h.services.clone()))).await;

    let req = test::TestRequest::post()
        .uri(CHECKOUT_PATH)
        .insert_header(bearer(USER_A))
        .set_json(checkout_body("prod_missing", &new_key()))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "product_not_found");
}

#[actix_web::test]
async fn test_invalid_redirect_url_is_400() {
    let h = default_harness(unused_verifier(), Arc::new(FakeGateway::default()));
    let app = test::init_service(App::new().configure(app_config(h.services.clone()))).await;

    let mut body = checkout_body("prod_pro", &new_key());
    body["successUrl"] = json!("not a url");
    let req = test::TestRequest::post()
        .uri(CHECKOUT_PATH)
        .insert_header(bearer(USER_A))
        .set_json(body)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_checkout_rate_limited() {
    let h = harness(
        seeded_store(),
        test_payment_config(),
        Arc::new(FakeLimiter::denying(60)),
        verifiers_with_evm(unused_verifier()),
        None,
    );

    let err = h
        .services
        .checkout
        .start_checkout(USER_A, &checkout_request("prod_pro", &new_key()))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::RateLimited { retry_after: 60 }));
    assert!(h.store.payments().is_empty());
}
