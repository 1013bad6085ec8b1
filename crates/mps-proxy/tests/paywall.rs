use std::sync::Arc;

use actix_web::{test, web, App};
use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use mps::{ChannelDirectory, ChannelError, ChannelKey, ChannelManager, InMemoryChannelManager};
use mps_proxy::content::{ContentBody, ContentRegistry, PaywalledContent};
use mps_proxy::headers;
use mps_proxy::routes::{self, RouteTable};
use mps_proxy::{AppState, ProxyConfig};

const CONTRACT: Address = Address::new([0xcc; 20]);
const ADMIN_TOKEN: &str = "admin-secret";

struct Fixture {
    state: AppState,
    manager: Arc<InMemoryChannelManager>,
    sender: PrivateKeySigner,
    key: ChannelKey,
    table: RouteTable,
}

fn make_fixture() -> Fixture {
    let receiver = PrivateKeySigner::random();
    let sender = PrivateKeySigner::random();
    let manager = Arc::new(InMemoryChannelManager::new(receiver.address(), CONTRACT));
    manager.start();
    let key = ChannelKey::new(sender.address(), 100);
    manager.open_channel(key, U256::from(1000u64));

    let mut config = ProxyConfig::new(receiver);
    config.contract_address = CONTRACT;
    config.token_address = Address::repeat_byte(0x70);
    config.admin_token = Some(ADMIN_TOKEN.to_string());

    let content = Arc::new(ContentRegistry::new());
    content.add(PaywalledContent::fixed(
        "doggo.txt",
        U256::from(30u64),
        ContentBody::new("text/plain", "woof"),
    ));
    content.add(PaywalledContent::fixed(
        "free.txt",
        U256::ZERO,
        ContentBody::new("text/plain", "free"),
    ));
    content.add(PaywalledContent::generated(
        "echo/*",
        U256::from(1u64),
        |rest| ContentBody::new("text/plain", format!("echo:{rest}")),
    ));

    let state = AppState::new(&config, ChannelDirectory::new(manager.clone()), content).unwrap();
    Fixture {
        state,
        manager,
        sender,
        key,
        table: RouteTable::new(None),
    }
}

fn signature(f: &Fixture, balance: u64) -> String {
    f.state
        .codec
        .sign_balance(
            f.state.terms.receiver,
            f.key.open_block,
            U256::from(balance),
            &f.sender,
        )
        .unwrap()
        .signature_hex()
}

fn paid_request(f: &Fixture, uri: &str, balance: u64) -> test::TestRequest {
    test::TestRequest::get()
        .uri(uri)
        .insert_header((headers::SENDER_ADDRESS, format!("{:#x}", f.key.sender)))
        .insert_header((headers::OPEN_BLOCK, f.key.open_block.to_string()))
        .insert_header((headers::BALANCE, balance.to_string()))
        .insert_header((headers::BALANCE_SIGNATURE, signature(f, balance)))
}

#[actix_rt::test]
async fn test_unpaid_request_gets_terms_without_internals() {
    let f = make_fixture();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(f.state.clone()))
            .configure(|cfg| routes::configure(cfg, &f.table)),
    )
    .await;

    let req = test::TestRequest::get().uri("/doggo.txt").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 402);
    assert_eq!(resp.headers().get(headers::PRICE).unwrap(), "30");
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "payment_required");
    assert_eq!(body["price"], "30");
    assert_eq!(
        body["receiver_address"].as_str().unwrap().to_lowercase(),
        format!("{:#x}", f.state.terms.receiver)
    );
    assert_eq!(body["gateway_path"], "/api/1");
    assert!(body.get("sender_balance").is_none());
    let text = body.to_string();
    assert!(!text.contains("deposit"));
    assert!(!text.contains("signature"));
}

#[actix_rt::test]
async fn test_payment_sequence_grants_then_rejects_stale() {
    let f = make_fixture();
    f.manager
        .register_payment(
            &f.key,
            U256::from(50u64),
            U256::ZERO,
            &hex_bytes(&signature(&f, 50)),
        )
        .unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(f.state.clone()))
            .configure(|cfg| routes::configure(cfg, &f.table)),
    )
    .await;

    let resp = test::call_service(&app, paid_request(&f, "/doggo.txt", 80).to_request()).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get(headers::COST).unwrap(), "30");
    assert_eq!(resp.headers().get(headers::SENDER_BALANCE).unwrap(), "80");
    let body = test::read_body(resp).await;
    assert_eq!(&body[..], b"woof");

    let resp = test::call_service(&app, paid_request(&f, "/doggo.txt", 75).to_request()).await;
    assert_eq!(resp.status(), 402);
    assert_eq!(
        resp.headers().get(headers::PAYMENT_ERROR).unwrap(),
        "stale_balance"
    );
    assert_eq!(resp.headers().get(headers::SENDER_BALANCE).unwrap(), "80");
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "stale_balance");
    assert_eq!(body["sender_balance"], "80");

    let recorded = f.manager.get_channel(&f.key).unwrap();
    assert_eq!(recorded.balance, U256::from(80u64));
}

#[actix_rt::test]
async fn test_replayed_proof_is_stale() {
    let f = make_fixture();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(f.state.clone()))
            .configure(|cfg| routes::configure(cfg, &f.table)),
    )
    .await;

    let resp = test::call_service(&app, paid_request(&f, "/doggo.txt", 30).to_request()).await;
    assert_eq!(resp.status(), 200);
    let resp = test::call_service(&app, paid_request(&f, "/doggo.txt", 30).to_request()).await;
    assert_eq!(resp.status(), 402);
    assert_eq!(
        resp.headers().get(headers::INVALID_PROOF).unwrap(),
        "1"
    );
}

#[actix_rt::test]
async fn test_unknown_channel_is_flagged() {
    let f = make_fixture();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(f.state.clone()))
            .configure(|cfg| routes::configure(cfg, &f.table)),
    )
    .await;

    let req = paid_request(&f, "/doggo.txt", 30)
        .insert_header((headers::OPEN_BLOCK, "101"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 402);
    assert_eq!(
        resp.headers().get(headers::NONEXISTING_CHANNEL).unwrap(),
        "1"
    );
}

#[actix_rt::test]
async fn test_malformed_headers_are_402() {
    let f = make_fixture();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(f.state.clone()))
            .configure(|cfg| routes::configure(cfg, &f.table)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/doggo.txt")
        .insert_header((headers::SENDER_ADDRESS, "nope"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 402);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "invalid_headers");
}

#[actix_rt::test]
async fn test_free_and_unknown_content() {
    let f = make_fixture();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(f.state.clone()))
            .configure(|cfg| routes::configure(cfg, &f.table)),
    )
    .await;

    let req = test::TestRequest::get().uri("/free.txt").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().get(headers::COST).is_none());

    let req = test::TestRequest::get().uri("/missing.txt").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "content_not_found");
}

#[actix_rt::test]
async fn test_generated_content_receives_remainder() {
    let f = make_fixture();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(f.state.clone()))
            .configure(|cfg| routes::configure(cfg, &f.table)),
    )
    .await;

    let resp = test::call_service(&app, paid_request(&f, "/echo/hello/world", 5).to_request()).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get(headers::COST).unwrap(), "5");
    let body = test::read_body(resp).await;
    assert_eq!(&body[..], b"echo:hello/world");
}

#[actix_rt::test]
async fn test_channel_lookup_and_listing() {
    let f = make_fixture();
    let other = ChannelKey::new(Address::repeat_byte(0x11), 5);
    f.manager.open_channel(other, U256::from(10u64));
    f.manager.begin_uncooperative_close(&other).unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(f.state.clone()))
            .configure(|cfg| routes::configure(cfg, &f.table)),
    )
    .await;

    let uri = format!("/api/1/channels/{:#x}/{}", f.key.sender, f.key.open_block);
    let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["deposit"], "1000");
    assert_eq!(body["state"], "open");

    let uri = format!("/api/1/channels/{:#x}/999", f.key.sender);
    let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    assert_eq!(resp.status(), 404);

    let req = test::TestRequest::get().uri("/api/1/channels").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let req = test::TestRequest::get()
        .uri("/api/1/channels/?status=closing")
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["open_block"], 5);

    let uri = format!("/api/1/channels/{:#x}", f.key.sender);
    let body: serde_json::Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let req = test::TestRequest::get()
        .uri("/api/1/channels?status=bogus")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_rt::test]
async fn test_close_requires_admin_token() {
    let f = make_fixture();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(f.state.clone()))
            .configure(|cfg| routes::configure(cfg, &f.table)),
    )
    .await;

    let uri = format!("/api/1/channels/{:#x}/{}", f.key.sender, f.key.open_block);
    let resp = test::call_service(&app, test::TestRequest::delete().uri(&uri).to_request()).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::delete()
        .uri(&uri)
        .insert_header(("Authorization", "Bearer wrong"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    assert!(f.manager.get_channel(&f.key).unwrap().state.is_open());
}

#[actix_rt::test]
async fn test_cooperative_close_over_http() {
    let f = make_fixture();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(f.state.clone()))
            .configure(|cfg| routes::configure(cfg, &f.table)),
    )
    .await;

    let resp = test::call_service(&app, paid_request(&f, "/doggo.txt", 40).to_request()).await;
    assert_eq!(resp.status(), 200);

    let uri = format!("/api/1/channels/{:#x}/{}", f.key.sender, f.key.open_block);
    let req = test::TestRequest::delete()
        .uri(&uri)
        .insert_header(("Authorization", format!("Bearer {ADMIN_TOKEN}")))
        .set_json(serde_json::json!({ "balance": "60" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["balance"], "60");

    let close_signature = mps::balance_proof::decode_signature_hex(
        body["close_signature"].as_str().unwrap(),
    )
    .unwrap();
    let signer = f
        .state
        .codec
        .recover_balance_signer(
            f.state.terms.receiver,
            f.key.open_block,
            U256::from(60u64),
            &close_signature,
        )
        .unwrap();
    assert_eq!(signer, f.state.terms.receiver);

    let req = test::TestRequest::delete()
        .uri(&uri)
        .insert_header(("Authorization", format!("Bearer {ADMIN_TOKEN}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "already_closed");

    // A closed channel no longer pays for content.
    let resp = test::call_service(&app, paid_request(&f, "/doggo.txt", 90).to_request()).await;
    assert_eq!(resp.status(), 402);
    assert_eq!(
        resp.headers().get(headers::PAYMENT_ERROR).unwrap(),
        ChannelError::ChannelNotOpen.reason_code()
    );
}

#[actix_rt::test]
async fn test_close_all_reports_each_channel() {
    let f = make_fixture();
    let second = ChannelKey::new(Address::repeat_byte(0x22), 7);
    let third = ChannelKey::new(Address::repeat_byte(0x33), 8);
    f.manager.open_channel(second, U256::from(10u64));
    f.manager.open_channel(third, U256::from(10u64));
    f.state.closer.close_channel(third, None).unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(f.state.clone()))
            .configure(|cfg| routes::configure(cfg, &f.table)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/1/admin/close_all")
        .insert_header(("Authorization", format!("Bearer {ADMIN_TOKEN}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["closed"].as_array().unwrap().len(), 2);
    assert!(body["failed"].as_array().unwrap().is_empty());

    let req = test::TestRequest::get().uri("/api/1/admin").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["channels"]["closed"], 3);
    assert_eq!(body["channels"]["open"], 0);
}

#[actix_rt::test]
async fn test_service_endpoints() {
    let f = make_fixture();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(f.state.clone()))
            .configure(|cfg| routes::configure(cfg, &f.table)),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["synced"], true);

    let req = test::TestRequest::get().uri("/cm").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["api"], "/api/1");

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_rt::test]
async fn test_health_degraded_until_synced() {
    let receiver = PrivateKeySigner::random();
    let manager =
        Arc::new(InMemoryChannelManager::new(receiver.address(), CONTRACT).with_manual_sync());
    manager.start();
    let config = ProxyConfig::new(receiver);
    let state = AppState::new(
        &config,
        ChannelDirectory::new(manager.clone()),
        Arc::new(ContentRegistry::new()),
    )
    .unwrap();
    let table = RouteTable::new(None);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(|cfg| routes::configure(cfg, &table)),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);

    manager.mark_synced();
    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

fn hex_bytes(sig: &str) -> Vec<u8> {
    mps::balance_proof::decode_signature_hex(sig).unwrap()
}
