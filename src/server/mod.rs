//! HTTP surface of the authoring operations.
//!
//! | Route                        | Result key    |
//! |------------------------------|---------------|
//! | `/authoring/translate`       | `translation` or `streamid` |
//! | `/authoring/keywords`        | `keywords`    |
//! | `/authoring/description`     | `description` |
//! | `/authoring/prompt`          | `text`        |
//! | `/authoring/create`          | `text` or `streamid` |
//! | `/authoring/stream`          | server-sent events |
//!
//! Initiating routes accept GET with a query string or POST with a form
//! body and answer with a JSON envelope
//! `{success, status, messages, data: {result: {...}}}`.
//!
//! `/authoring/stream?streamid=...` answers `text/event-stream`: one `data:`
//! event per chunk, then a `finished` event carrying the finish reason or
//! an `error` event. A stream id is only redeemable from the session that
//! created it; sessions are tracked with the `SKALD_SESSION` cookie.

pub mod config;

pub use config::{Config, Secrets};

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Query, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, IntoResponseParts, Response, ResponseParts};
use axum::routing::get;
use axum::{Form, Json, Router};
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::channel::{ChunkSink, Drained, Outcome, SinkClosed};
use crate::registry::SessionStore;
use crate::service::AuthoringService;
use crate::types::{CreateRequest, Initiated, PromptRequest, TranslateRequest};
use crate::SkaldError;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "SKALD_SESSION";

/// Message sent to clients instead of backend error details.
const GENERIC_FAILURE: &str = "The text generation failed. Please try again later.";

/// Events buffered between a draining channel and the HTTP response.
const SSE_BUFFER: usize = 64;

/// Shared state of all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AuthoringService>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(service: AuthoringService, sessions: SessionStore) -> Self {
        Self {
            service: Arc::new(service),
            sessions: Arc::new(sessions),
        }
    }
}

/// Build the router with all authoring routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/authoring/translate", get(translate).post(translate))
        .route("/authoring/keywords", get(keywords).post(keywords))
        .route("/authoring/description", get(description).post(description))
        .route("/authoring/prompt", get(prompt).post(prompt))
        .route("/authoring/create", get(create).post(create))
        .route("/authoring/stream", get(stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
///
/// Also runs a background sweep that expires unredeemed streams (cancelling
/// their generations) and idle sessions every `housekeeping` interval.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    housekeeping: Duration,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sweeper = spawn_housekeeping(Arc::clone(&state.sessions), housekeeping);
    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await;
    sweeper.abort();
    result
}

fn spawn_housekeeping(sessions: Arc<SessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sessions.purge_expired();
        }
    })
}

// ============================================================================
// Session cookie
// ============================================================================

/// The client's session id, issued on first contact.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    fresh: bool,
}

impl Session {
    fn from_cookie_header(header: &str) -> Option<String> {
        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .map(|(_, value)| value.trim().to_owned())
            .filter(|value| is_valid_session_id(value))
    }
}

fn is_valid_session_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 64
        && value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let existing = parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(Session::from_cookie_header);
        Ok(match existing {
            Some(id) => Session { id, fresh: false },
            None => Session {
                id: Uuid::new_v4().to_string(),
                fresh: true,
            },
        })
    }
}

impl IntoResponseParts for Session {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        if self.fresh {
            let cookie = format!("{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax", self.id);
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                res.headers_mut().append(SET_COOKIE, value);
            }
        }
        Ok(res)
    }
}

// ============================================================================
// Envelope and errors
// ============================================================================

fn success(result: Value) -> Json<Value> {
    Json(json!({
        "success": true,
        "status": StatusCode::OK.as_u16(),
        "messages": [],
        "data": { "result": result },
    }))
}

/// Error response carrying the JSON envelope.
pub struct ApiError(SkaldError);

impl From<SkaldError> for ApiError {
    fn from(err: SkaldError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            SkaldError::InvalidRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            SkaldError::StreamNotFound(id) => {
                warn!(stream_id = %id, "no stream found");
                (StatusCode::GONE, "The stream is no longer available.".to_owned())
            }
            e if e.is_backend() => (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE.to_owned()),
            e => {
                error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE.to_owned())
            }
        };
        let body = json!({
            "success": false,
            "status": status.as_u16(),
            "messages": [{ "level": "error", "text": message }],
        });
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// `"true"` in any case is true; anything else, including absence, is false.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true")))
}

/// Optional positive number; blank counts as absent.
fn parse_number(value: Option<&str>, name: &str) -> Result<Option<usize>, SkaldError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| SkaldError::InvalidRequest(format!("{name} is not a number: {v}"))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateParams {
    #[serde(default)]
    text: String,
    #[serde(default)]
    source_language: String,
    #[serde(default)]
    target_language: String,
    #[serde(default, deserialize_with = "flag")]
    rich_text: bool,
    #[serde(default, deserialize_with = "flag")]
    streaming: bool,
}

#[derive(Debug, Deserialize)]
struct TextParams {
    #[serde(default)]
    text: String,
    #[serde(default)]
    maxwords: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptParams {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    maxtokens: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    text_length: Option<String>,
    #[serde(default)]
    input_text: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    rich_text: bool,
    #[serde(default, deserialize_with = "flag")]
    streaming: bool,
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    #[serde(default)]
    streamid: String,
}

// ============================================================================
// Handlers
// ============================================================================

fn initiated_result(initiated: Initiated, text_key: &str) -> Value {
    match initiated {
        Initiated::Text(text) if text_key == "translation" => json!({ "translation": [text] }),
        Initiated::Text(text) => {
            let mut result = serde_json::Map::new();
            result.insert(text_key.to_owned(), Value::String(text));
            Value::Object(result)
        }
        Initiated::Stream(id) => json!({ "streamid": id }),
    }
}

async fn translate(
    State(state): State<AppState>,
    session: Session,
    Form(params): Form<TranslateParams>,
) -> Result<impl IntoResponse, ApiError> {
    let request = TranslateRequest::new(params.text, params.source_language, params.target_language)
        .rich_text(params.rich_text)
        .streaming(params.streaming);
    let registry = state.sessions.registry(&session.id);
    let initiated = state.service.translate(&registry, &request).await?;
    Ok((session, success(initiated_result(initiated, "translation"))))
}

async fn keywords(
    State(state): State<AppState>,
    Form(params): Form<TextParams>,
) -> Result<impl IntoResponse, ApiError> {
    let keywords = state.service.keywords(&params.text).await?;
    Ok(success(json!({ "keywords": keywords })))
}

async fn description(
    State(state): State<AppState>,
    Form(params): Form<TextParams>,
) -> Result<impl IntoResponse, ApiError> {
    let max_words = parse_number(params.maxwords.as_deref(), "maxwords")?;
    let description = state.service.description(&params.text, max_words).await?;
    Ok(success(json!({ "description": description })))
}

async fn prompt(
    State(state): State<AppState>,
    Form(params): Form<PromptParams>,
) -> Result<impl IntoResponse, ApiError> {
    let mut request = PromptRequest::new(params.prompt);
    if let Some(text) = non_blank(params.text) {
        request = request.text(text);
    }
    if let Some(n) = parse_number(params.maxtokens.as_deref(), "maxtokens")? {
        request = request.max_tokens(n);
    }
    let text = state.service.prompt(&request).await?;
    Ok(success(json!({ "text": text })))
}

async fn create(
    State(state): State<AppState>,
    session: Session,
    Form(params): Form<CreateParams>,
) -> Result<impl IntoResponse, ApiError> {
    let mut request = CreateRequest::new(params.prompt)
        .rich_text(params.rich_text)
        .streaming(params.streaming);
    if let Some(length) = non_blank(params.text_length) {
        request = request.text_length(length);
    }
    if let Some(input) = non_blank(params.input_text) {
        request = request.input_text(input);
    }
    let registry = state.sessions.registry(&session.id);
    let initiated = state.service.create(&registry, &request).await?;
    Ok((session, success(initiated_result(initiated, "text"))))
}

async fn stream(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<StreamParams>,
) -> Result<Response, ApiError> {
    let id = params.streamid.trim();
    if id.is_empty() {
        return Err(SkaldError::InvalidRequest("No stream id given".into()).into());
    }
    let registry = state
        .sessions
        .existing(&session.id)
        .ok_or_else(|| SkaldError::StreamNotFound(id.to_owned()))?;
    let channel = state.service.fetch_stream(&registry, id)?;

    let (tx, rx) = mpsc::channel(SSE_BUFFER);
    let stream_id = id.to_owned();
    tokio::spawn(async move {
        let mut sink = SseSink { tx };
        match channel.drain(&mut sink).await {
            Ok(Drained::Finished(outcome)) => {
                debug!(stream_id = %stream_id, ?outcome, "stream delivered");
            }
            Ok(Drained::ReaderGone { delivered }) => {
                debug!(stream_id = %stream_id, delivered, "client left the stream");
            }
            Err(e) => error!(stream_id = %stream_id, error = %e, "stream could not be drained"),
        }
    });

    let sse = Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default());
    Ok((session, sse).into_response())
}

// ============================================================================
// SSE sink
// ============================================================================

/// Forwards channel chunks to an SSE response.
struct SseSink {
    tx: mpsc::Sender<Result<Event, Infallible>>,
}

impl SseSink {
    async fn send(&self, event: Event) -> Result<(), SinkClosed> {
        self.tx.send(Ok(event)).await.map_err(|_| SinkClosed)
    }
}

/// SSE cannot carry carriage returns inside a field.
fn data_event(chunk: &str) -> Event {
    if chunk.contains('\r') {
        Event::default().data(chunk.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Event::default().data(chunk)
    }
}

#[async_trait]
impl ChunkSink for SseSink {
    async fn send_chunk(&mut self, chunk: &str) -> Result<(), SinkClosed> {
        self.send(data_event(chunk)).await
    }

    async fn finish(&mut self, outcome: &Outcome) -> Result<(), SinkClosed> {
        let event = match outcome {
            Outcome::Completed { finish_reason, .. } => {
                Event::default().event("finished").data(finish_reason.as_str())
            }
            Outcome::Failed(_) => Event::default().event("error").data(GENERIC_FAILURE),
            Outcome::Cancelled => Event::default().event("error").data("The stream was cancelled."),
        };
        self.send(event).await
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}
