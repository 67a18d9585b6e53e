//! Streaming tier contract tests
//!
//! These tests run full chat sessions against mock HTTP servers and check:
//! - the gateway request carries bearer auth, a request id and the logical body
//! - the provider request is reshaped with the synthesized instruction
//! - fallback happens exactly once on primary failure
//! - both tiers failing yields the single synthesized message

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use muse::config::MuseConfig;
use muse::features::FeatureId;
use muse::stream::message::{ChatMessage, StreamRequest};
use muse::stream::session::{ChatStreamSession, Completion, STREAM_FAILURE_MESSAGE, SessionState};
use muse::stream::transport::{StreamTransport, TierKind};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "gemini-test";
const API_KEY: &str = "k1";

fn provider_path() -> String {
    format!("/v1beta/models/{MODEL}:streamGenerateContent")
}

fn config(gateway: Option<String>, provider: &MockServer) -> MuseConfig {
    let mut config = MuseConfig::default();
    config.gateway.url = gateway;
    config.gateway.token = Some("tok".into());
    config.provider.base_url = provider.uri();
    config.provider.model = MODEL.into();
    config.provider.api_key = API_KEY.into();
    config
}

fn sam_request() -> StreamRequest {
    StreamRequest::new(vec![ChatMessage::user("hi")])
        .with_context("FIRSTNAME", "Sam")
        .with_temperature(0.5)
}

fn candidates_body(fragments: &[&str]) -> String {
    let records: Vec<String> = fragments
        .iter()
        .map(|f| json!({"candidates": [{"content": {"parts": [{"text": f}], "role": "model"}}]}).to_string() + "\n")
        .collect();
    format!("[{}]", records.join(",\r\n"))
}

async fn run(config: &MuseConfig, request: StreamRequest) -> (Vec<String>, Completion, usize, Arc<StreamTransport>) {
    let transport = Arc::new(StreamTransport::from_config(config));
    let tokens = Arc::new(Mutex::new(Vec::new()));
    let completes = Arc::new(AtomicUsize::new(0));
    let t = Arc::clone(&tokens);
    let c = Arc::clone(&completes);
    let completion = ChatStreamSession::new(Arc::clone(&transport))
        .start(
            request,
            move |tok| t.lock().unwrap().push(tok.to_owned()),
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
        )
        .wait()
        .await;
    let tokens = tokens.lock().unwrap().clone();
    (tokens, completion, completes.load(Ordering::SeqCst), transport)
}

// ────────────────────────────────────────────────────────────────────────────
// Gateway tier
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn gateway_request_carries_auth_request_id_and_body() {
    let gateway = MockServer::start().await;
    let provider = MockServer::start().await;
    let request = sam_request();

    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(header("authorization", "Bearer tok"))
        .and(header("x-request-id", request.request_id.as_str()))
        .and(body_partial_json(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "userContext": {"FIRSTNAME": "Sam"},
            "temperature": 0.5
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string("Hello Sam! FEATURES:[\"image\",\"podcast\"]"))
        .expect(1)
        .mount(&gateway)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&provider)
        .await;

    let config = config(Some(format!("{}/chat", gateway.uri())), &provider);
    let (tokens, completion, completes, transport) = run(&config, request).await;

    assert_eq!(completion.state, SessionState::Completed);
    assert_eq!(completion.tier, Some(TierKind::Gateway));
    assert_eq!(completion.text, "Hello Sam! ");
    assert_eq!(tokens.concat(), "Hello Sam! ");
    assert_eq!(completion.features, vec![FeatureId::Image]);
    assert_eq!(completes, 1);
    assert_eq!(transport.fallback_count(), 0);
}

#[tokio::test]
async fn gateway_without_token_sends_no_auth_header() {
    let gateway = MockServer::start().await;
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header_exists("x-request-id"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&gateway)
        .await;

    let mut config = config(Some(gateway.uri()), &provider);
    config.gateway.token = None;
    let (_, completion, _, _) = run(&config, sam_request()).await;
    assert_eq!(completion.text, "ok");

    let received = gateway.received_requests().await.unwrap();
    assert!(received[0].headers.get("authorization").is_none());
}

// ────────────────────────────────────────────────────────────────────────────
// Fallback tier
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn primary_500_falls_back_to_provider_once() {
    let gateway = MockServer::start().await;
    let provider = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("edge down"))
        .expect(1)
        .mount(&gateway)
        .await;
    Mock::given(method("POST"))
        .and(path(provider_path()))
        .and(query_param("key", API_KEY))
        .and(body_partial_json(json!({"generationConfig": {"temperature": 0.5}})))
        .respond_with(ResponseTemplate::new(200).set_body_string(candidates_body(&[
            "Hi Sam, ",
            "try this! FEATURES:[\"ghi",
            "bli\"]",
        ])))
        .expect(1)
        .mount(&provider)
        .await;

    let config = config(Some(gateway.uri()), &provider);
    let (tokens, completion, completes, transport) = run(&config, sam_request()).await;

    assert_eq!(completion.state, SessionState::Completed);
    assert_eq!(completion.tier, Some(TierKind::Provider));
    assert_eq!(completion.text, "Hi Sam, try this! ");
    assert_eq!(tokens, vec!["Hi Sam, ", "try this! "]);
    assert_eq!(completion.features, vec![FeatureId::Ghibli]);
    assert_eq!(completes, 1);
    assert_eq!(transport.fallback_count(), 1);
}

#[tokio::test]
async fn provider_request_is_reshaped_with_instruction() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(provider_path()))
        .respond_with(ResponseTemplate::new(200).set_body_string(candidates_body(&["Hello!"])))
        .expect(1)
        .mount(&provider)
        .await;

    let config = config(None, &provider);
    let request = StreamRequest::new(vec![
        ChatMessage::user("hi"),
        ChatMessage::assistant("Hello!"),
        ChatMessage::user("make a meme"),
    ])
    .with_context("FIRSTNAME", "Sam");
    run(&config, request).await;

    let received = provider.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    let contents = body["contents"].as_array().unwrap();
    let roles: Vec<&str> = contents.iter().map(|c| c["role"].as_str().unwrap()).collect();
    assert_eq!(roles, vec!["user", "model", "user", "model", "user"]);

    let instruction = contents[0]["parts"][0]["text"].as_str().unwrap();
    assert!(instruction.contains("FIRSTNAME: Sam"));
    assert!(instruction.contains("action-figure"));
    assert!(instruction.contains("FEATURES:["));
    assert_eq!(contents[4]["parts"][0]["text"], "make a meme");
}

#[tokio::test]
async fn unreachable_primary_falls_back() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(provider_path()))
        .respond_with(ResponseTemplate::new(200).set_body_string(candidates_body(&["fine"])))
        .expect(1)
        .mount(&provider)
        .await;

    let config = config(Some("http://127.0.0.1:1/chat".into()), &provider);
    let (_, completion, _, transport) = run(&config, sam_request()).await;
    assert_eq!(completion.state, SessionState::Completed);
    assert_eq!(completion.text, "fine");
    assert_eq!(transport.fallback_count(), 1);
}

#[tokio::test]
async fn empty_primary_body_falls_back() {
    let gateway = MockServer::start().await;
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&gateway)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(candidates_body(&["from provider"])))
        .expect(1)
        .mount(&provider)
        .await;

    let config = config(Some(gateway.uri()), &provider);
    let (_, completion, _, _) = run(&config, sam_request()).await;
    assert_eq!(completion.tier, Some(TierKind::Provider));
    assert_eq!(completion.text, "from provider");
}

#[tokio::test]
async fn unconfigured_primary_goes_straight_to_provider() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(provider_path()))
        .respond_with(ResponseTemplate::new(200).set_body_string(candidates_body(&["Hi ", "Sam!"])))
        .expect(1)
        .mount(&provider)
        .await;

    let mut config = config(None, &provider);
    config.gateway.url = Some("   ".into());
    let (tokens, completion, _, transport) = run(&config, sam_request()).await;

    assert!(!transport.has_primary());
    assert_eq!(completion.state, SessionState::Completed);
    assert!(!completion.text.is_empty());
    assert_eq!(tokens, vec!["Hi ", "Sam!"]);
}

// ────────────────────────────────────────────────────────────────────────────
// Failure delivery
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn both_tiers_failing_yields_single_message() {
    let gateway = MockServer::start().await;
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&gateway)
        .await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(json!({"error": {"message": "quota exceeded"}})),
        )
        .expect(1)
        .mount(&provider)
        .await;

    let config = config(Some(gateway.uri()), &provider);
    let (tokens, completion, completes, _) = run(&config, sam_request()).await;

    assert!(tokens.is_empty());
    assert_eq!(completion.state, SessionState::Failed);
    assert_eq!(completion.text, STREAM_FAILURE_MESSAGE);
    assert!(completion.features.is_empty());
    assert_eq!(completes, 1);
}

#[tokio::test]
async fn malformed_provider_records_do_not_abort() {
    let provider = MockServer::start().await;
    let body = format!(
        "[{}\n,{{\"broken\": \n}}\n,{}\n]",
        json!({"candidates": [{"content": {"parts": [{"text": "one "}]}}]}),
        json!({"candidates": [{"content": {"parts": [{"text": "two"}]}}]})
    );
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&provider)
        .await;

    let config = config(None, &provider);
    let (_, completion, _, _) = run(&config, sam_request()).await;
    assert_eq!(completion.state, SessionState::Completed);
    assert!(completion.text.starts_with("one "));
    assert!(completion.text.ends_with("two"));
}
