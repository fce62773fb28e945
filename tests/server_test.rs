//! HTTP tests of the authoring routes against a live listener.

#![cfg(feature = "server")]

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{COOKIE, SET_COOKIE};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use common::{ScriptedProvider, server_error};
use skald::server::{self, AppState, SESSION_COOKIE};
use skald::{AuthoringService, ServiceConfig, SessionStore};

struct TestServer {
    base: String,
    client: reqwest::Client,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    async fn start(provider: Arc<ScriptedProvider>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let state = AppState::new(
            AuthoringService::new(provider, ServiceConfig::new("test-model")),
            SessionStore::default(),
        );
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(server::serve(listener, state, Duration::from_secs(1), async move {
            let _ = rx.await;
        }));
        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            _shutdown: tx,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

async fn json_body(response: reqwest::Response) -> Value {
    serde_json::from_str(&response.text().await.unwrap()).unwrap()
}

/// `NAME=value` of the session cookie set on `response`.
fn session_cookie(response: &reqwest::Response) -> String {
    let header = response
        .headers()
        .get(SET_COOKIE)
        .expect("a session cookie")
        .to_str()
        .unwrap();
    let pair = header.split(';').next().unwrap().to_owned();
    assert!(pair.starts_with(&format!("{SESSION_COOKIE}=")));
    pair
}

/// Parse an SSE body into `(event name, data)` pairs.
fn sse_events(body: &str) -> Vec<(String, String)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut name = "message".to_owned();
            let mut data = Vec::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    name = v.trim().to_owned();
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push(v.strip_prefix(' ').unwrap_or(v).to_owned());
                }
            }
            (!data.is_empty()).then(|| (name, data.join("\n")))
        })
        .collect()
}

#[tokio::test]
async fn translate_answers_with_envelope_and_session() {
    let server = TestServer::start(Arc::new(ScriptedProvider::new(&["Hallo"]))).await;

    let response = server
        .client
        .get(server.url("/authoring/translate"))
        .query(&[("text", "Hello"), ("sourceLanguage", "en"), ("targetLanguage", "de")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    session_cookie(&response);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], 200);
    assert_eq!(body["data"]["result"]["translation"][0], "Hallo");
}

#[tokio::test]
async fn missing_text_is_a_bad_request() {
    let server = TestServer::start(Arc::new(ScriptedProvider::new(&["x"]))).await;

    let response = server
        .client
        .post(server.url("/authoring/translate"))
        .form(&[("sourceLanguage", "en"), ("targetLanguage", "de")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["messages"][0]["text"], "No text given");
}

#[tokio::test]
async fn backend_details_are_not_leaked() {
    let server = TestServer::start(Arc::new(ScriptedProvider::failing(server_error))).await;

    let response = server
        .client
        .post(server.url("/authoring/prompt"))
        .form(&[("prompt", "Say hi")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let text = response.text().await.unwrap();
    assert!(!text.contains("upstream exploded"));
}

#[tokio::test]
async fn blank_backend_reply_is_a_server_error() {
    let server = TestServer::start(Arc::new(ScriptedProvider::new(&[" \n "]))).await;

    let response = server
        .client
        .post(server.url("/authoring/description"))
        .form(&[("text", "About Rust streaming.")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert!(body["data"]["result"]["description"].is_null());
}

#[tokio::test]
async fn streamed_creation_is_delivered_as_events() {
    let provider = Arc::new(
        ScriptedProvider::new(&["One ", "short ", "sentence."]).delay(Duration::from_millis(10)),
    );
    let server = TestServer::start(provider).await;

    let response = server
        .client
        .post(server.url("/authoring/create"))
        .form(&[("prompt", "Write one sentence"), ("streaming", "true")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response);
    let body = json_body(response).await;
    let id = body["data"]["result"]["streamid"]
        .as_str()
        .expect("a stream id")
        .to_owned();

    let response = server
        .client
        .get(server.url("/authoring/stream"))
        .query(&[("streamid", id.as_str())])
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let events = sse_events(&response.text().await.unwrap());
    let text: String = events
        .iter()
        .filter(|(name, _)| name == "message")
        .map(|(_, data)| data.as_str())
        .collect();
    assert_eq!(text, "One short sentence.");
    assert_eq!(
        events.last(),
        Some(&("finished".to_owned(), "stop".to_owned()))
    );

    // Redeemed once only.
    let again = server
        .client
        .get(server.url("/authoring/stream"))
        .query(&[("streamid", id.as_str())])
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::GONE);
}

#[tokio::test]
async fn stream_is_bound_to_its_session() {
    let provider = Arc::new(ScriptedProvider::new(&["text"]));
    let server = TestServer::start(provider).await;

    let response = server
        .client
        .get(server.url("/authoring/create"))
        .query(&[("prompt", "Write"), ("streaming", "true")])
        .send()
        .await
        .unwrap();
    let body = json_body(response).await;
    let id = body["data"]["result"]["streamid"].as_str().unwrap().to_owned();

    let response = server
        .client
        .get(server.url("/authoring/stream"))
        .query(&[("streamid", id.as_str())])
        .header(COOKIE, format!("{SESSION_COOKIE}=someone-else"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn unknown_and_missing_stream_ids() {
    let server = TestServer::start(Arc::new(ScriptedProvider::new(&["x"]))).await;

    let response = server
        .client
        .get(server.url("/authoring/stream"))
        .query(&[("streamid", "3b0c5c52-0000-4000-8000-000000000000")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);

    let response = server
        .client
        .get(server.url("/authoring/stream"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn keywords_and_description_routes() {
    let server = TestServer::start(Arc::new(ScriptedProvider::new(&["rust\nstreaming"]))).await;

    let response = server
        .client
        .post(server.url("/authoring/keywords"))
        .form(&[("text", "About Rust streaming.")])
        .send()
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(
        body["data"]["result"]["keywords"],
        serde_json::json!(["rust", "streaming"])
    );

    let response = server
        .client
        .post(server.url("/authoring/description"))
        .form(&[("text", "About Rust streaming."), ("maxwords", "many")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
