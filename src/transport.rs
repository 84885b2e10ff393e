//! Addressed message passing between pages and the privileged side.
//!
//! Pages send requests over a single shared request channel; every request
//! carries the sender's [`DestinationId`]. Results travel back through a
//! registry that maps each destination to its inbox. Messages cross the
//! boundary as JSON objects tagged by `action`, so either side can receive
//! something it does not understand; such messages are logged and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::ExplainError;
use crate::models::DestinationId;

/// Page → privileged messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum BackgroundRequest {
    /// `request_id` is echoed back on the result so the page can tell which
    /// request an answer belongs to.
    #[serde(rename_all = "camelCase")]
    GetExplanation {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    SaveApiKey {
        api_key: String,
    },
    GetApiKey,
    /// Tries a key against the generation service without saving it.
    #[serde(rename_all = "camelCase")]
    TestApiKey {
        api_key: String,
    },
}

/// Privileged → page messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PageMessage {
    ExplanationResponse(ExplanationResult),
    HidePopup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
}

impl ExplanationResult {
    pub fn ok(explanation: String) -> Self {
        Self {
            success: true,
            explanation: Some(explanation),
            error: None,
            request_id: None,
        }
    }

    pub fn failed(error: &ExplainError) -> Self {
        Self {
            success: false,
            explanation: None,
            error: Some(error.user_message()),
            request_id: None,
        }
    }

    pub fn for_request(mut self, request_id: Option<u64>) -> Self {
        self.request_id = request_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a key check; `error` holds the user-facing reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyReply {
    pub api_key: Option<String>,
}

/// A request as seen by the privileged side.
#[derive(Debug)]
pub struct RequestEnvelope {
    pub origin: DestinationId,
    pub payload: Value,
    /// Present when the sender waits for a direct answer.
    pub reply: Option<oneshot::Sender<Value>>,
}

impl RequestEnvelope {
    pub fn decode(&self) -> Option<BackgroundRequest> {
        decode_message(self.payload.clone())
    }

    /// Answers the sender, if it is still waiting.
    pub fn respond<T: Serialize>(self, reply: &T) {
        let Some(tx) = self.reply else {
            debug!(origin = %self.origin, "no reply slot, response dropped");
            return;
        };
        match serde_json::to_value(reply) {
            Ok(value) => {
                let _ = tx.send(value);
            }
            Err(e) => warn!(error = %e, "failed to encode reply"),
        }
    }
}

type Registry = Arc<Mutex<HashMap<DestinationId, mpsc::UnboundedSender<Value>>>>;

/// Hands out page ports that all talk to one privileged side.
#[derive(Clone)]
pub struct Bridge {
    request_tx: mpsc::UnboundedSender<RequestEnvelope>,
    pages: Registry,
    next_destination: Arc<AtomicU64>,
}

impl Bridge {
    pub fn new() -> (Self, BackgroundPort) {
        let (request_tx, requests) = mpsc::unbounded_channel();
        let pages: Registry = Arc::default();
        let bridge = Self {
            request_tx,
            pages: pages.clone(),
            next_destination: Arc::new(AtomicU64::new(1)),
        };
        let port = BackgroundPort {
            requests,
            outbound: Outbound { pages },
        };
        (bridge, port)
    }

    /// Registers a new page and returns its end of the bridge.
    pub fn connect_page(&self) -> PagePort {
        let destination = DestinationId(self.next_destination.fetch_add(1, Ordering::Relaxed));
        let (tx, inbox) = mpsc::unbounded_channel();
        lock(&self.pages).insert(destination, tx);
        debug!(destination = %destination, "page connected");
        PagePort {
            destination,
            request_tx: self.request_tx.clone(),
            inbox,
            pages: self.pages.clone(),
        }
    }
}

/// The page's end: send requests, receive results addressed to this page.
pub struct PagePort {
    destination: DestinationId,
    request_tx: mpsc::UnboundedSender<RequestEnvelope>,
    inbox: mpsc::UnboundedReceiver<Value>,
    pages: Registry,
}

impl PagePort {
    pub fn destination(&self) -> DestinationId {
        self.destination
    }

    /// False once the privileged side has gone away. Sends made after that
    /// point are lost, so callers check this first.
    pub fn is_connected(&self) -> bool {
        !self.request_tx.is_closed()
    }

    /// Fire-and-forget send.
    pub fn send(&self, request: &BackgroundRequest) -> Result<(), ExplainError> {
        let payload = encode(request)?;
        self.send_raw(payload, None)
    }

    /// Sends any JSON payload. Mostly useful for exercising the receiving
    /// side with messages it does not know.
    pub fn send_raw(&self, payload: Value, reply: Option<oneshot::Sender<Value>>) -> Result<(), ExplainError> {
        self.request_tx
            .send(RequestEnvelope {
                origin: self.destination,
                payload,
                reply,
            })
            .map_err(|_| ExplainError::ContextInvalidated)
    }

    /// Sends a request and waits for the direct answer.
    pub async fn request<T: DeserializeOwned>(&self, request: &BackgroundRequest) -> Result<T, ExplainError> {
        let (tx, rx) = oneshot::channel();
        self.send_raw(encode(request)?, Some(tx))?;
        let value = rx.await.map_err(|_| ExplainError::ContextInvalidated)?;
        serde_json::from_value(value).map_err(|e| ExplainError::Protocol(e.to_string()))
    }

    pub async fn save_api_key(&self, api_key: &str) -> Result<SaveReply, ExplainError> {
        self.request(&BackgroundRequest::SaveApiKey {
            api_key: api_key.to_string(),
        })
        .await
    }

    pub async fn get_api_key(&self) -> Result<Option<String>, ExplainError> {
        let reply: ApiKeyReply = self.request(&BackgroundRequest::GetApiKey).await?;
        Ok(reply.api_key)
    }

    pub async fn test_api_key(&self, api_key: &str) -> Result<ConnectionReply, ExplainError> {
        self.request(&BackgroundRequest::TestApiKey {
            api_key: api_key.to_string(),
        })
        .await
    }

    /// Next understood message, without waiting. Anything undecodable is
    /// skipped.
    pub fn try_recv(&mut self) -> Option<PageMessage> {
        while let Ok(value) = self.inbox.try_recv() {
            if let Some(message) = decode_message(value) {
                return Some(message);
            }
        }
        None
    }

    /// Waits for the next understood message. `None` once nothing can arrive
    /// anymore.
    pub async fn recv(&mut self) -> Option<PageMessage> {
        while let Some(value) = self.inbox.recv().await {
            if let Some(message) = decode_message(value) {
                return Some(message);
            }
        }
        None
    }
}

impl Drop for PagePort {
    fn drop(&mut self) {
        lock(&self.pages).remove(&self.destination);
        debug!(destination = %self.destination, "page disconnected");
    }
}

/// The privileged end.
pub struct BackgroundPort {
    requests: mpsc::UnboundedReceiver<RequestEnvelope>,
    outbound: Outbound,
}

impl BackgroundPort {
    pub async fn recv(&mut self) -> Option<RequestEnvelope> {
        self.requests.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RequestEnvelope> {
        self.requests.try_recv().ok()
    }

    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }
}

/// Delivers messages to pages by destination.
#[derive(Clone)]
pub struct Outbound {
    pages: Registry,
}

impl Outbound {
    /// At-most-once delivery. Unknown or closed destinations are logged and
    /// the message dropped.
    pub fn deliver(&self, destination: DestinationId, message: &PageMessage) {
        match serde_json::to_value(message) {
            Ok(value) => self.deliver_raw(destination, value),
            Err(e) => warn!(error = %e, "failed to encode page message"),
        }
    }

    pub fn deliver_raw(&self, destination: DestinationId, value: Value) {
        let pages = lock(&self.pages);
        match pages.get(&destination) {
            Some(tx) if tx.send(value).is_ok() => {}
            _ => debug!(destination = %destination, "destination gone, message dropped"),
        }
    }
}

fn encode<T: Serialize>(message: &T) -> Result<Value, ExplainError> {
    serde_json::to_value(message).map_err(|e| ExplainError::Protocol(e.to_string()))
}

fn decode_message<T: DeserializeOwned>(value: Value) -> Option<T> {
    let action = value
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("<none>")
        .to_string();
    match serde_json::from_value(value) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(action = %action, error = %e, "ignoring unrecognized message");
            None
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
