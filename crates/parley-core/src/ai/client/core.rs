//! Completion client core
//!
//! Runs one send cycle per user message:
//! `Idle → Validating → RateChecking → Sending → AwaitingResponse → {Success, Failed} → Idle`.
//! Every failure becomes a single error turn in the conversation and a
//! [`NormalizedError`] returned to the caller. Nothing is retried.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::config::{redact_url, ClientConfig, ClientError};
use super::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::ai::credentials::{CredentialValidator, CredentialVerdict, ReasonCode};
use crate::ai::errors::{ErrorKind, ErrorNormalizer, NormalizedError};
use crate::ai::format::response::{describe_missing_completion, find_embedded_error};
use crate::ai::format::ChatRequestBuilder;
use crate::ai::governor::{Clock, QuotaPolicy, RateGovernor, RateSnapshot, SystemClock};
use crate::ai::providers::AuthScheme;
use crate::ai::types::{Conversation, ConversationTurn};

/// Where the send cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Idle,
    Validating,
    RateChecking,
    Sending,
    AwaitingResponse,
    Success,
    Failed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientState::Idle => "idle",
            ClientState::Validating => "validating",
            ClientState::RateChecking => "rate_checking",
            ClientState::Sending => "sending",
            ClientState::AwaitingResponse => "awaiting_response",
            ClientState::Success => "success",
            ClientState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Result of [`CompletionClient::send_message`]
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Blank input; nothing happened
    Ignored,
    /// The assistant turn that was appended
    Completed(ConversationTurn),
    /// The failure that was appended as an error turn
    Failed(NormalizedError),
}

/// Everything a front-end needs to render the session
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub state: ClientState,
    pub provider: String,
    pub model: String,
    pub model_display_name: String,
    pub title: String,
    pub turns: Vec<ConversationTurn>,
    pub rate: RateSnapshot,
    pub credential: CredentialVerdict,
    pub last_error: Option<NormalizedError>,
}

/// One chat session against one provider endpoint
pub struct CompletionClient {
    config: ClientConfig,
    endpoint: Url,
    session_id: Uuid,
    conversation: Conversation,
    governor: RateGovernor,
    validator: CredentialValidator,
    normalizer: ErrorNormalizer,
    builder: ChatRequestBuilder,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    api_key: Option<String>,
    state: ClientState,
    last_error: Option<NormalizedError>,
}

impl CompletionClient {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ClientError> {
        let endpoint = config.api_url(&config.model)?;
        Ok(Self {
            endpoint,
            session_id: Uuid::new_v4(),
            conversation: Conversation::new(),
            governor: RateGovernor::new(config.rate_limits.clone()),
            validator: CredentialValidator::new(config.key_policy.clone()),
            normalizer: ErrorNormalizer::new(config.provider_name.clone()),
            builder: ChatRequestBuilder::new(config.request_shape, config.options),
            transport,
            clock,
            api_key: None,
            state: ClientState::Idle,
            last_error: None,
            config,
        })
    }

    /// Client over reqwest and the wall clock
    pub fn with_default_transport(config: ClientConfig) -> Result<Self, ClientError> {
        Self::new(config, Arc::new(ReqwestTransport::new()), Arc::new(SystemClock))
    }

    /// Replace the governor's quota policy (window state starts fresh)
    pub fn with_quota_policy(mut self, policy: Box<dyn QuotaPolicy>) -> Self {
        self.governor = RateGovernor::with_policy(self.config.rate_limits.clone(), policy);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn last_error(&self) -> Option<&NormalizedError> {
        self.last_error.as_ref()
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Store a key as typed; the verdict is recomputed on every use
    pub fn set_api_key(&mut self, raw: &str) -> CredentialVerdict {
        self.api_key = Some(raw.to_string());
        let verdict = self.validator.validate(self.api_key.as_deref());
        debug!(valid = verdict.valid, reason = %verdict.reason, "API key updated");
        verdict
    }

    pub fn credential_verdict(&self) -> CredentialVerdict {
        self.validator.validate(self.api_key.as_deref())
    }

    /// Switch model; the endpoint is rebuilt before anything changes
    pub fn set_model(&mut self, model_id: &str) -> Result<(), ClientError> {
        let model_id = model_id.trim();
        let endpoint = self.config.api_url(model_id)?;
        self.endpoint = endpoint;
        self.config.model = model_id.to_string();
        info!(model = %self.config.model, "Model changed");
        Ok(())
    }

    pub fn set_instructions(&mut self, text: &str) {
        self.config.instructions = text.trim().to_string();
        debug!(chars = self.config.instructions.len(), "Instructions updated");
    }

    /// Clear the conversation and rate state; the API key is kept
    pub fn start_new_chat(&mut self) {
        self.conversation.clear();
        self.governor.reset();
        self.last_error = None;
        self.state = ClientState::Idle;
        self.session_id = Uuid::new_v4();
        info!(session = %self.session_id, "Started new chat");
    }

    /// Check the key format and report it in the conversation
    ///
    /// Never touches the network or the rate governor.
    pub fn test_api_key(&mut self) -> CredentialVerdict {
        let verdict = self.credential_verdict();
        let text = self
            .validator
            .describe(verdict.reason, &self.config.provider_name);
        let now = self.clock.now();
        let turn = if verdict.valid {
            ConversationTurn::notice(text, now)
        } else {
            ConversationTurn::error(ErrorKind::InvalidCredential, text, now)
        };
        self.conversation.push(turn);
        verdict
    }

    pub fn view(&self) -> SessionView {
        let display_name = crate::ai::providers::get_provider(self.config.provider_id)
            .map(|p| p.display_name_for(&self.config.model).to_string())
            .unwrap_or_else(|| self.config.model.clone());
        SessionView {
            session_id: self.session_id,
            state: self.state,
            provider: self.config.provider_name.clone(),
            model: self.config.model.clone(),
            model_display_name: display_name,
            title: self.conversation.title(),
            turns: self.conversation.turns().to_vec(),
            rate: self.governor.snapshot(self.clock.now()),
            credential: self.credential_verdict(),
            last_error: self.last_error.clone(),
        }
    }

    /// Run one send cycle for `text`
    ///
    /// Blank input is ignored without touching any state. If a previous call
    /// was dropped mid-flight the machine is returned to idle first; that
    /// attempt stays counted by the governor.
    #[instrument(skip_all, fields(session = %self.session_id))]
    pub async fn send_message(&mut self, text: &str) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::Ignored;
        }

        if self.state != ClientState::Idle {
            warn!(state = %self.state, "Previous send did not finish, returning to idle");
            self.state = ClientState::Idle;
        }

        let outcome = match self.run_send_cycle(text).await {
            Ok(turn) => {
                self.transition(ClientState::Success);
                self.last_error = None;
                SendOutcome::Completed(turn)
            }
            Err(err) => {
                self.transition(ClientState::Failed);
                let now = self.clock.now();
                self.conversation
                    .push(ConversationTurn::error(err.kind, err.message.clone(), now));
                self.last_error = Some(err.clone());
                SendOutcome::Failed(err)
            }
        };

        self.transition(ClientState::Idle);
        outcome
    }

    async fn run_send_cycle(&mut self, text: &str) -> Result<ConversationTurn, NormalizedError> {
        self.transition(ClientState::Validating);
        let key = self.usable_key()?;
        let headers = self.request_headers(&key)?;
        let url = self.request_url(&key);

        self.transition(ClientState::RateChecking);
        let now = self.clock.now();
        let decision = self.governor.check_and_reserve(now);
        if !decision.allowed {
            warn!(
                wait_ms = decision.wait_ms(),
                reason = ?decision.reason,
                "Send held back by rate governor"
            );
            return Err(NormalizedError::rate_limited_local(decision.wait));
        }

        self.transition(ClientState::Sending);
        self.governor.record_attempt(now);
        let request = self.builder.build(
            &self.config.model,
            &self.config.instructions,
            self.conversation.turns(),
            text,
        );
        self.conversation.push(ConversationTurn::user(text, now));

        info!(
            url = %redact_url(&self.endpoint),
            model = %self.config.model,
            shape = %request.shape,
            replayed_turns = request.replayed_turns,
            "Dispatching completion request"
        );

        self.transition(ClientState::AwaitingResponse);
        let result = self
            .transport
            .post(HttpRequest {
                url,
                headers,
                body: request.body,
            })
            .await;
        let received_at = self.clock.now();

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "Transport failure");
                return Err(self.normalizer.from_transport_failure(&err));
            }
        };

        self.governor.observe_headers(&response.headers, received_at);
        let completion = self.parse_completion(&response, received_at)?;

        self.governor.record_success();
        let turn = ConversationTurn::assistant(completion, self.config.model.clone(), received_at);
        self.conversation.push(turn.clone());
        Ok(turn)
    }

    fn usable_key(&self) -> Result<String, NormalizedError> {
        let verdict = self.credential_verdict();
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if verdict.valid => Ok(key.to_string()),
            _ => {
                warn!(reason = %verdict.reason, "API key rejected before send");
                let reason = self
                    .validator
                    .describe(verdict.reason, &self.config.provider_name);
                let message = match verdict.reason {
                    ReasonCode::Missing | ReasonCode::Empty => format!(
                        "{}. Please enter your {} API key to start chatting.",
                        reason, self.config.provider_name
                    ),
                    _ => format!(
                        "{}. Please enter a valid {} API key.",
                        reason, self.config.provider_name
                    ),
                };
                Err(NormalizedError::invalid_credential(message))
            }
        }
    }

    fn request_headers(&self, key: &str) -> Result<HeaderMap, NormalizedError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (name, value) in &self.config.custom_headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "Skipping invalid custom header"),
            }
        }

        if self.config.auth == AuthScheme::Bearer {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|_| {
                NormalizedError::invalid_credential(
                    "The API key contains characters that cannot be sent in a header",
                )
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }

    fn request_url(&self, key: &str) -> Url {
        let mut url = self.endpoint.clone();
        if self.config.auth == AuthScheme::QueryKey {
            url.query_pairs_mut().append_pair("key", key);
        }
        url
    }

    fn parse_completion(
        &self,
        response: &HttpResponse,
        received_at: DateTime<Utc>,
    ) -> Result<String, NormalizedError> {
        if !response.is_success() {
            warn!(status = response.status, "Provider rejected request");
            return Err(self.normalizer.from_http_failure(
                response.status,
                Some(&response.body),
                &response.headers,
                received_at,
            ));
        }

        let body: Value = serde_json::from_str(&response.body).map_err(|e| {
            warn!(status = response.status, "Success response is not JSON");
            NormalizedError::malformed_response(
                &format!("body is not valid JSON ({})", e),
                Some(serde_json::json!({ "status": response.status, "raw": response.body })),
            )
        })?;

        if let Some(text) = self.builder.extract_completion(&body) {
            return Ok(text);
        }

        if let Some(embedded) = find_embedded_error(&body) {
            warn!(code = ?embedded.code, "Error body delivered with success status");
            return Err(self.normalizer.from_error_body(
                embedded.code,
                &embedded.message,
                &response.body,
                &response.headers,
                received_at,
            ));
        }

        warn!(status = response.status, "No completion text in response");
        Err(NormalizedError::malformed_response(
            &describe_missing_completion(self.builder.shape(), &body),
            Some(body),
        ))
    }

    fn transition(&mut self, next: ClientState) {
        debug!(from = %self.state, to = %next, "Send cycle transition");
        self.state = next;
    }
}

impl fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionClient")
            .field("session_id", &self.session_id)
            .field("provider", &self.config.provider_name)
            .field("model", &self.config.model)
            .field("state", &self.state)
            .field("turns", &self.conversation.len())
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}
