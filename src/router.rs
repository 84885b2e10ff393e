//! The privileged side: owns the API key, calls the generation service and
//! sends each result back to the page that asked.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::credentials::Credentials;
use crate::error::ExplainError;
use crate::models::DestinationId;
use crate::network::ExplanationService;
use crate::transport::{
    ApiKeyReply, BackgroundPort, BackgroundRequest, ConnectionReply, ExplanationResult, Outbound,
    PageMessage, RequestEnvelope, SaveReply,
};

pub struct RequestRouter {
    service: Arc<dyn ExplanationService>,
    credentials: Credentials,
}

impl RequestRouter {
    pub fn new(service: Arc<dyn ExplanationService>, credentials: Credentials) -> Self {
        Self { service, credentials }
    }

    /// Loads the persisted key. A storage failure leaves the router running
    /// without a key; requests then report the missing configuration.
    pub async fn start(&self) {
        if let Err(e) = self.credentials.load().await {
            error!(error = %e, "failed to load API key");
        }
    }

    /// Drops the in-memory key.
    pub fn teardown(&self) {
        self.credentials.teardown();
    }

    /// Produces the result for one selection. Never fails; every error is
    /// folded into an unsuccessful result.
    pub async fn explain(&self, text: &str) -> ExplanationResult {
        let Some(api_key) = self.credentials.current() else {
            return ExplanationResult::failed(&ExplainError::Configuration);
        };

        match self.service.explain(&api_key, text).await {
            Ok(explanation) => ExplanationResult::ok(explanation),
            Err(e) => {
                warn!(error = ?e, "explanation request failed");
                ExplanationResult::failed(&e)
            }
        }
    }

    /// Explains `text` and delivers exactly one result to `destination`,
    /// tagged with the caller's `request_id`.
    pub async fn handle_explanation_request(
        &self,
        text: &str,
        request_id: Option<u64>,
        destination: DestinationId,
        outbound: &Outbound,
    ) {
        debug!(destination = %destination, request = ?request_id, "explanation requested");
        let result = self.explain(text).await.for_request(request_id);
        outbound.deliver(destination, &PageMessage::ExplanationResponse(result));
    }

    /// Checks a candidate key. The stored key is neither used nor replaced.
    pub async fn handle_connection_test(&self, api_key: &str) -> ConnectionReply {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return ConnectionReply {
                success: false,
                error: Some(ExplainError::Configuration.user_message()),
            };
        }
        match self.service.check_key(api_key).await {
            Ok(()) => {
                info!("API key check succeeded");
                ConnectionReply {
                    success: true,
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = ?e, "API key check failed");
                ConnectionReply {
                    success: false,
                    error: Some(e.user_message()),
                }
            }
        }
    }

    pub async fn handle_credential_save(&self, api_key: String) -> SaveReply {
        match self.credentials.save(api_key).await {
            Ok(()) => SaveReply {
                success: true,
                error: None,
            },
            Err(e) => {
                error!(error = %e, "failed to save API key");
                SaveReply {
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn handle_credential_read(&self) -> Option<String> {
        self.credentials.current()
    }

    /// Serves requests until `shutdown` fires or every sender is gone, then
    /// tears down. Dropping the port on exit is what pages observe as the
    /// privileged side going away.
    pub async fn run(self: Arc<Self>, mut port: BackgroundPort, shutdown: CancellationToken) {
        let outbound = port.outbound();
        info!("request router started");
        loop {
            let envelope = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = port.recv() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            self.clone().dispatch(envelope, &outbound);
        }
        self.teardown();
        info!("request router stopped");
    }

    fn dispatch(self: Arc<Self>, envelope: RequestEnvelope, outbound: &Outbound) {
        match envelope.decode() {
            Some(BackgroundRequest::GetExplanation { text, request_id }) => {
                let origin = envelope.origin;
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    self.handle_explanation_request(&text, request_id, origin, &outbound)
                        .await;
                });
            }
            Some(BackgroundRequest::SaveApiKey { api_key }) => {
                tokio::spawn(async move {
                    let reply = self.handle_credential_save(api_key).await;
                    envelope.respond(&reply);
                });
            }
            Some(BackgroundRequest::GetApiKey) => {
                let api_key = self.handle_credential_read();
                envelope.respond(&ApiKeyReply { api_key });
            }
            Some(BackgroundRequest::TestApiKey { api_key }) => {
                tokio::spawn(async move {
                    let reply = self.handle_connection_test(&api_key).await;
                    envelope.respond(&reply);
                });
            }
            None => {}
        }
    }
}
