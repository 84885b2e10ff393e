use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use whatsthis::config::Settings;
use whatsthis::credentials::{Credentials, API_KEY_STORAGE_KEY};
use whatsthis::models::{PopupContent, PopupGeometry, Position, Viewport};
use whatsthis::network::GeminiClient;
use whatsthis::popup::PopupManager;
use whatsthis::router::RequestRouter;
use whatsthis::selection::{ControllerState, SelectionController, SETTLE_DELAY};
use whatsthis::storage::MemoryStore;
use whatsthis::transport::Bridge;

struct Harness {
    controller: SelectionController,
    shutdown: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn harness(server: &MockServer, api_key: Option<&str>) -> Harness {
    let settings = Settings {
        gemini_api_base: server.uri(),
        request_timeout_secs: 5,
        ..Settings::default()
    };
    let service = GeminiClient::new(&settings).unwrap();
    let router = match api_key {
        Some(key) => {
            let store = MemoryStore::with_value(API_KEY_STORAGE_KEY, key);
            let router = RequestRouter::new(Arc::new(service), Credentials::new(Arc::new(store)));
            router.start().await;
            router
        }
        // Never loaded, so no key can leak in from the environment.
        None => RequestRouter::new(Arc::new(service), Credentials::new(Arc::new(MemoryStore::new()))),
    };

    let (bridge, port) = Bridge::new();
    let shutdown = CancellationToken::new();
    tokio::spawn(Arc::new(router).run(port, shutdown.clone()));

    let popups = PopupManager::new(3, Viewport::new(1280, 800), PopupGeometry::default());
    let controller = SelectionController::new(popups, bridge.connect_page(), Some(Duration::from_secs(15)));
    Harness { controller, shutdown }
}

fn select(controller: &mut SelectionController, text: &str) {
    let now = Instant::now();
    controller.handle_pointer_up(Position::new(200, 150), now);
    controller.tick(now + SETTLE_DELAY, text);
}

fn current_content(controller: &SelectionController) -> Option<PopupContent> {
    let id = controller.current_popup()?;
    controller.popups().get(id).map(|p| p.content.clone())
}

async fn wait_for_result(controller: &mut SelectionController, text: &str) -> PopupContent {
    for _ in 0..300 {
        controller.tick(Instant::now(), text);
        match current_content(controller) {
            Some(PopupContent::Loading) => tokio::time::sleep(Duration::from_millis(10)).await,
            Some(content) => return content,
            None => panic!("popup disappeared"),
        }
    }
    panic!("no result arrived");
}

fn candidate(text: &str) -> serde_json::Value {
    json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
}

#[tokio::test]
async fn missing_key_shows_configuration_error_without_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate("unused")))
        .expect(0)
        .mount(&server)
        .await;

    let mut h = harness(&server, None).await;
    select(&mut h.controller, "API");
    assert_eq!(current_content(&h.controller), Some(PopupContent::Loading));

    let content = wait_for_result(&mut h.controller, "API").await;
    assert_eq!(
        content,
        PopupContent::Error("❌ API key not configured. Please set it in the extension settings.".into())
    );
}

#[tokio::test]
async fn rate_limit_is_reported_in_popup() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r":generateContent$"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let mut h = harness(&server, Some("key")).await;
    select(&mut h.controller, "tokio");
    let content = wait_for_result(&mut h.controller, "tokio").await;
    assert_eq!(
        content,
        PopupContent::Error("❌ API rate limit exceeded. Please try again later.".into())
    );
}

#[tokio::test]
async fn explanation_is_trimmed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate("  Foo bar.  ")))
        .mount(&server)
        .await;

    let mut h = harness(&server, Some("key")).await;
    select(&mut h.controller, "Foo");
    let content = wait_for_result(&mut h.controller, "Foo").await;
    assert_eq!(content, PopupContent::Explanation("Foo bar.".into()));
}

#[tokio::test]
async fn result_after_close_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(candidate("Too late."))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut h = harness(&server, Some("key")).await;
    select(&mut h.controller, "RAII");
    let popup_id = h.controller.current_popup().cloned().unwrap();
    h.controller.close_current_popup(Instant::now());

    for _ in 0..200 {
        if !server.received_requests().await.unwrap_or_default().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.controller.tick(Instant::now(), "");
    }

    assert_eq!(h.controller.state(), &ControllerState::Idle);
    let untouched = h
        .controller
        .popups()
        .get(&popup_id)
        .is_none_or(|p| p.content == PopupContent::Loading);
    assert!(untouched);
}

#[tokio::test]
async fn new_selection_gets_its_own_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate("Explained.")))
        .mount(&server)
        .await;

    let mut h = harness(&server, Some("key")).await;
    select(&mut h.controller, "first term");
    wait_for_result(&mut h.controller, "first term").await;

    select(&mut h.controller, "second term");
    assert_eq!(current_content(&h.controller), Some(PopupContent::Loading));
    let content = wait_for_result(&mut h.controller, "second term").await;
    assert_eq!(content, PopupContent::Explanation("Explained.".into()));
    assert_eq!(h.controller.popups().popups().filter(|p| p.is_open()).count(), 1);
}

#[tokio::test]
async fn slow_answer_for_earlier_selection_does_not_overwrite_newer_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("slow term"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(candidate("About the slow term."))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("fast term"))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate("About the fast term.")))
        .mount(&server)
        .await;

    let mut h = harness(&server, Some("key")).await;
    select(&mut h.controller, "slow term");
    select(&mut h.controller, "fast term");
    let content = wait_for_result(&mut h.controller, "fast term").await;
    assert_eq!(content, PopupContent::Explanation("About the fast term.".into()));

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.controller.tick(Instant::now(), "fast term");
    }
    assert_eq!(
        current_content(&h.controller),
        Some(PopupContent::Explanation("About the fast term.".into()))
    );
    assert_eq!(server.received_requests().await.map(|r| r.len()), Some(2));
}
