use std::time::Duration;

use algo_options_broker::{SmartApiClient, SmartApiConfig, LTP_PATH, PLACE_ORDER_PATH, REFRESH_PATH};
use algo_options_core::{BrokerError, BrokerGateway, BrokerSession, OrderRequest, Side};
use rust_decimal_macros::dec;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session() -> BrokerSession {
    BrokerSession {
        client_id: "C1".to_string(),
        access_token: "jwt-1".to_string(),
        refresh_token: Some("refresh-1".to_string()),
        feed_token: None,
    }
}

fn client(server: &MockServer) -> SmartApiClient {
    let config = SmartApiConfig {
        api_key: "key".to_string(),
        ..SmartApiConfig::default()
    }
    .with_base_url(server.uri())
    .with_timeout(Duration::from_millis(500));
    SmartApiClient::new(config).unwrap()
}

#[tokio::test]
async fn place_market_order_sends_smartapi_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(PLACE_ORDER_PATH))
        .and(header("Authorization", "Bearer jwt-1"))
        .and(header("X-PrivateKey", "key"))
        .and(body_partial_json(json!({
            "tradingsymbol": "NIFTY29OCT2625000CE",
            "symboltoken": "43210",
            "transactiontype": "BUY",
            "ordertype": "MARKET",
            "producttype": "INTRADAY",
            "quantity": "75"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true, "message": "SUCCESS", "errorcode": "",
            "data": {"orderid": "241029000777"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let order = OrderRequest::market(
        "NFO",
        "NIFTY29OCT2625000CE",
        Side::Buy,
        75,
        Some("43210".to_string()),
    );
    let ack = client(&server).place_order(&session(), &order).await.unwrap();

    assert_eq!(ack.order_id, "241029000777");
}

#[tokio::test]
async fn ltp_returns_price() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LTP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true, "message": "SUCCESS",
            "data": {"exchange": "NFO", "tradingsymbol": "X", "symboltoken": "43210", "ltp": 101.35}
        })))
        .mount(&server)
        .await;

    let ltp = client(&server)
        .get_ltp(&session(), "NFO", "X", "43210")
        .await
        .unwrap();
    assert_eq!(ltp.price, dec!(101.35));
}

#[tokio::test]
async fn throttled_ltp_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LTP_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("Access denied because of exceeding access rate"))
        .mount(&server)
        .await;

    let err = client(&server)
        .get_ltp(&session(), "NFO", "X", "43210")
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::RateLimited { status: 403 }));
}

#[tokio::test]
async fn expired_token_is_invalid_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LTP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": false, "message": "Invalid Token", "errorcode": "AG8001", "data": null
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .get_ltp(&session(), "NFO", "X", "43210")
        .await
        .unwrap_err();
    assert!(err.is_invalid_session());
}

#[tokio::test]
async fn slow_broker_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LTP_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(2))
                .set_body_json(json!({"status": true, "data": {"ltp": 1}})),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .get_ltp(&session(), "NFO", "X", "43210")
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Timeout(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn refresh_exchanges_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_partial_json(json!({"refreshToken": "refresh-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true, "message": "SUCCESS",
            "data": {"jwtToken": "jwt-2", "refreshToken": "refresh-2", "feedToken": "feed-2"}
        })))
        .mount(&server)
        .await;

    let refreshed = client(&server).refresh_session(&session()).await.unwrap();
    assert_eq!(refreshed.access_token, "jwt-2");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-2"));
    assert_eq!(refreshed.client_id, "C1");
}

#[tokio::test]
async fn refresh_without_refresh_token_fails() {
    let server = MockServer::start().await;
    let mut s = session();
    s.refresh_token = None;

    let err = client(&server).refresh_session(&s).await.unwrap_err();
    assert!(matches!(err, BrokerError::RefreshFailed(_)));
}
