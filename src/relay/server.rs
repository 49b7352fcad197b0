use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{
    document::{self, Document},
    error::{LLMError, RelayError},
    persona::{Persona, PersonaProfile},
    prompt::{PromptError, PromptTemplates, MAP_SYSTEM, PERSONA_JSON_SYSTEM, PERSONA_SYSTEM},
    providers::LLMProvider,
    scenario::{Storyboard, StructuredScenario},
    types::{ChatMessage, CompletionRequest},
};

use super::{
    strip_code_fences, ClientEvent, Completion, Reply, ServerEvent, INVALID_JSON_FAILURE,
    PERSONA_FAILURE, PROVIDER_FAILURE, SCENARIO_FAILURE, STORYBOARD_FAILURE, STRUCTURED_FAILURE,
};

pub type RelayState = Arc<RelayService>;

const STORYBOARD_TEMPERATURE: f32 = 0.7;
const PERSONA_TEMPERATURE: f32 = 0.8;
const PERSONA_JSON_TEMPERATURE: f32 = 0.2;
const MAP_TEMPERATURE: f32 = 0.7;

/// Turns scenario prompts into journey documents, structured breakdowns,
/// storyboards and personas through an [`LLMProvider`].
pub struct RelayService {
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    prompts: PromptTemplates,
}

impl RelayService {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
    ) -> Result<Self, PromptError> {
        Ok(Self {
            provider,
            model: model.into(),
            temperature: None,
            max_tokens: None,
            prompts: PromptTemplates::new()?,
        })
    }

    /// Used for every request except persona structuring, which always runs cold.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_prompts(mut self, prompts: PromptTemplates) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn into_state(self) -> RelayState {
        Arc::new(self)
    }

    fn request(
        &self,
        messages: Vec<ChatMessage>,
        default_temperature: Option<f32>,
    ) -> CompletionRequest {
        let mut request = CompletionRequest::new(&self.model, messages);
        if let Some(temperature) = self.temperature.or(default_temperature) {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }

    /// Reply text with code fences removed.
    async fn complete(&self, request: CompletionRequest) -> Result<String, RelayError> {
        let response = self.provider.complete(request).await?;
        Ok(strip_code_fences(response.message.text().unwrap_or_default()))
    }

    async fn complete_json<T: DeserializeOwned>(
        &self,
        request: CompletionRequest,
    ) -> Result<T, RelayError> {
        let text = self.complete(request).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn complete_document(&self, request: CompletionRequest) -> Result<Document, RelayError> {
        let text = self.complete(request).await?;
        let decoded = document::decode(&text)?;
        if decoded.skipped > 0 {
            tracing::warn!(
                skipped = decoded.skipped,
                "model reply contained malformed node entries"
            );
        }
        Ok(decoded.document)
    }

    pub async fn generate(&self, scenario: &str) -> Result<Document, RelayError> {
        let rendered = self.prompts.render(scenario)?;
        self.complete_document(self.request(vec![ChatMessage::user(rendered)], None))
            .await
    }

    /// Journey document for a persona, drawn from its goal and leading traits.
    pub async fn generate_for_persona(
        &self,
        profile: &PersonaProfile,
    ) -> Result<Document, RelayError> {
        let rendered = self.prompts.render(&profile.scenario_sentence())?;
        let messages = vec![ChatMessage::system(MAP_SYSTEM), ChatMessage::user(rendered)];
        self.complete_document(self.request(messages, Some(MAP_TEMPERATURE)))
            .await
    }

    pub async fn structure(&self, scenario: &str) -> Result<StructuredScenario, RelayError> {
        let rendered = self.prompts.render_structured(scenario)?;
        self.complete_json(self.request(vec![ChatMessage::user(rendered)], None))
            .await
    }

    /// Structured breakdown of a journey document.
    pub async fn convert_document(
        &self,
        document: &Document,
    ) -> Result<StructuredScenario, RelayError> {
        let rendered = self.prompts.render_conversion(document)?;
        self.complete_json(self.request(vec![ChatMessage::user(rendered)], None))
            .await
    }

    pub async fn storyboard(&self, scenario: &str) -> Result<Storyboard, RelayError> {
        let rendered = self.prompts.render_storyboard(scenario)?;
        let mut storyboard: Storyboard = self
            .complete_json(self.request(
                vec![ChatMessage::user(rendered)],
                Some(STORYBOARD_TEMPERATURE),
            ))
            .await?;
        let dropped = storyboard.truncate();
        if dropped > 0 {
            tracing::debug!(dropped, "storyboard trimmed");
        }
        Ok(storyboard)
    }

    /// Scenario prose written back from an edited structured breakdown.
    pub async fn write_scenario(
        &self,
        structured: &StructuredScenario,
    ) -> Result<String, RelayError> {
        let rendered = self.prompts.render_scenario(structured)?;
        let text = self
            .complete(self.request(vec![ChatMessage::user(rendered)], None))
            .await?;
        if text.is_empty() {
            return Err(LLMError::InvalidResponse("empty scenario").into());
        }
        Ok(text)
    }

    /// Expands a brief into a profile text, then structures it. A profile whose
    /// structured form does not parse is still returned, with an empty profile.
    pub async fn flourish_persona(&self, brief: &str) -> Result<Persona, RelayError> {
        let rendered = self.prompts.render_persona(brief)?;
        let messages = vec![ChatMessage::system(PERSONA_SYSTEM), ChatMessage::user(rendered)];
        let profile_text = self
            .provider
            .complete(self.request(messages, Some(PERSONA_TEMPERATURE)))
            .await?
            .message
            .text()
            .unwrap_or_default()
            .trim()
            .to_string();
        if profile_text.is_empty() {
            return Err(LLMError::InvalidResponse("empty persona profile").into());
        }

        let messages = vec![
            ChatMessage::system(PERSONA_JSON_SYSTEM),
            ChatMessage::user(profile_text.clone()),
        ];
        let request = self
            .request(messages, None)
            .with_temperature(PERSONA_JSON_TEMPERATURE)
            .with_response_format(serde_json::json!({ "type": "json_object" }));
        let profile = match self.complete_json::<PersonaProfile>(request).await {
            Ok(profile) => profile,
            Err(RelayError::Serialization(error)) => {
                tracing::warn!(%error, "persona profile was not valid JSON");
                PersonaProfile::default()
            }
            Err(error) => return Err(error),
        };

        Ok(Persona {
            profile_text,
            profile,
        })
    }

    /// Completion text for a prompt: the pretty-printed document, or a bracketed
    /// failure literal. Never retries.
    pub async fn complete_prompt(&self, scenario: &str) -> String {
        let result = self.generate(scenario).await;
        self.completion_text(result)
    }

    fn completion_text(&self, result: Result<Document, RelayError>) -> String {
        match result {
            Ok(document) => document
                .to_json_pretty()
                .unwrap_or_else(|_| INVALID_JSON_FAILURE.to_string()),
            Err(RelayError::Document(error)) => {
                tracing::warn!(%error, "model reply was not a journey document");
                INVALID_JSON_FAILURE.to_string()
            }
            Err(error) => {
                tracing::error!(
                    %error,
                    provider = self.provider.name(),
                    "completion request failed"
                );
                PROVIDER_FAILURE.to_string()
            }
        }
    }

    fn reply<T>(
        &self,
        result: Result<T, RelayError>,
        failure: &str,
        request_id: Option<u64>,
    ) -> Reply<T> {
        match result {
            Ok(value) => Reply::ready(value, request_id),
            Err(error) => {
                tracing::error!(
                    %error,
                    provider = self.provider.name(),
                    failure,
                    "relay request failed"
                );
                Reply::failed(failure, request_id)
            }
        }
    }

    /// Answers one client event. `nodePlaced` has no answer.
    pub async fn respond(&self, event: ClientEvent) -> Option<ServerEvent> {
        let reply = match event {
            ClientEvent::NodePlaced(_) => return None,
            ClientEvent::InitialPrompt(request) => ServerEvent::Completion(Completion {
                text: self.complete_prompt(&request.text).await,
                request_id: request.request_id,
            }),
            ClientEvent::StructuredFormat(request) => {
                let result = self.structure(&request.text).await;
                let reply = self.reply(result, STRUCTURED_FAILURE, request.request_id);
                ServerEvent::StructuredResult(reply)
            }
            ClientEvent::StoryboardFormat(request) => {
                let result = self.storyboard(&request.text).await;
                let reply = self.reply(result, STORYBOARD_FAILURE, request.request_id);
                ServerEvent::StoryboardResult(reply)
            }
            ClientEvent::ConvertStructured(request) => {
                let text = match self.write_scenario(&request.structured).await {
                    Ok(text) => text,
                    Err(error) => {
                        tracing::error!(%error, "scenario conversion failed");
                        SCENARIO_FAILURE.to_string()
                    }
                };
                ServerEvent::ConvertedScenario(Completion {
                    text,
                    request_id: request.request_id,
                })
            }
            ClientEvent::FlourishPersona(request) => {
                let result = self.flourish_persona(&request.text).await;
                let reply = self.reply(result, PERSONA_FAILURE, request.request_id);
                ServerEvent::PersonaFlourished(reply)
            }
            ClientEvent::GenerateMapData(request) => {
                let result = self.generate_for_persona(&request.profile).await;
                ServerEvent::MapDataGenerated(Completion {
                    text: self.completion_text(result),
                    request_id: request.request_id,
                })
            }
        };
        Some(reply)
    }
}

pub fn router(state: RelayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/socket", get(socket_upgrade))
        .route("/api/generate", post(generate))
        .route("/api/convert", post(convert))
        .route("/api/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: RelayState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

async fn socket_upgrade(ws: WebSocketUpgrade, State(state): State<RelayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    tracing::info!("relay client connected");
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut pending) = mpsc::unbounded_channel::<ServerEvent>();

    let writer = tokio::spawn(async move {
        while let Some(event) = pending.recv().await {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(error) => {
                    tracing::error!(%error, "failed to encode relay event");
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(error) => {
                tracing::debug!(%error, "relay socket error");
                break;
            }
        };

        match ClientEvent::from_frame(text.as_str()) {
            Ok(ClientEvent::NodePlaced(node)) => {
                tracing::info!(
                    node_id = %node.descriptor.node_id,
                    row = node.descriptor.row,
                    col = node.descriptor.col,
                    sub_id = node.descriptor.node_sub_id,
                    "node placed"
                );
            }
            Ok(event) => {
                tracing::info!(event = event.name(), "request received");
                let state = state.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    if let Some(reply) = state.respond(event).await {
                        let _ = outbound.send(reply);
                    }
                });
            }
            Err(error) => tracing::warn!(%error, "ignoring unrecognised relay frame"),
        }
    }

    drop(outbound);
    let _ = writer.await;
    tracing::info!("relay client disconnected");
}

#[derive(Deserialize)]
struct GenerateRequest {
    prompt: String,
}

async fn generate(
    State(state): State<RelayState>,
    Json(req): Json<GenerateRequest>,
) -> impl IntoResponse {
    respond_with(state.generate(&req.prompt).await)
}

#[derive(Deserialize)]
struct ConvertRequest {
    /// The document, either inline or as JSON text.
    json: Value,
}

async fn convert(
    State(state): State<RelayState>,
    Json(req): Json<ConvertRequest>,
) -> impl IntoResponse {
    let decoded = match req.json {
        Value::String(text) => document::decode(&text),
        value => document::decode_value(value),
    };
    match decoded {
        Ok(decoded) => respond_with(state.convert_document(&decoded.document).await),
        Err(e) => respond_with::<StructuredScenario>(Err(e.into())),
    }
}

fn respond_with<T: Serialize>(result: Result<T, RelayError>) -> Response {
    match result {
        Ok(data) => Json(ApiResponse {
            data: Some(data),
            message: None,
            success: true,
        })
        .into_response(),
        Err(RelayError::Document(e)) => failure(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Not a journey document: {}", e),
        ),
        Err(RelayError::Serialization(e)) => failure(
            StatusCode::BAD_GATEWAY,
            format!("Model reply was not valid JSON: {}", e),
        ),
        Err(e) => failure(
            StatusCode::BAD_GATEWAY,
            format!("Completion request failed: {}", e),
        ),
    }
}

fn failure(status: StatusCode, message: String) -> Response {
    let body = ApiResponse {
        data: Option::<Value>::None,
        message: Some(message),
        success: false,
    };
    (status, Json(body)).into_response()
}

async fn health(State(state): State<RelayState>) -> impl IntoResponse {
    Json(ApiResponse {
        data: serde_json::json!({ "model": state.model() }),
        message: None,
        success: true,
    })
}

#[derive(Serialize)]
struct ApiResponse<T> {
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    success: bool,
}

#[cfg(test)]
mod tests {
    use crate::providers::scripted::ScriptedProvider;
    use crate::relay::{PromptRequest, ReplyOutcome, StructuredRequest};
    use crate::types::MessageRole;

    use super::*;

    const REPLY: &str = "```json\n[{\"touchpoints\":\"Alarm\",\"nodes info\":[{\"nodeId\":\"001\",\"row\":0,\"col\":0,\"nodeSubId\":0}]}]\n```";

    fn service(provider: ScriptedProvider) -> RelayService {
        RelayService::new(Arc::new(provider), "gpt-4o").expect("service")
    }

    fn prompt(text: &str, request_id: u64) -> PromptRequest {
        PromptRequest {
            text: text.to_string(),
            request_id: Some(request_id),
        }
    }

    #[tokio::test]
    async fn fenced_reply_becomes_pretty_document() {
        let relay = service(ScriptedProvider::from_responses([REPLY]));
        let text = relay.complete_prompt("wake up and take a taxi").await;

        let document = Document::from_json_str(&text).expect("document");
        assert_eq!(document.rows[0].touchpoints, "Alarm");
        assert!(text.contains("\n  {"));
    }

    #[tokio::test]
    async fn non_document_reply_yields_json_failure_literal() {
        let relay = service(ScriptedProvider::from_responses(["Sure! Here is your journey."]));
        assert_eq!(relay.complete_prompt("x").await, INVALID_JSON_FAILURE);
    }

    #[tokio::test]
    async fn provider_error_yields_failure_literal() {
        let provider = ScriptedProvider::new();
        provider.push_failure("upstream unavailable");
        let relay = service(provider);
        assert_eq!(relay.complete_prompt("x").await, PROVIDER_FAILURE);
    }

    #[tokio::test]
    async fn structured_request_returns_breakdown() {
        let relay = service(ScriptedProvider::from_responses([
            "```json\n{\"context\":[\"Street\"],\"artifact\":[\"Taxi app\"],\"userExperience\":{\"001\":\"Orders a taxi\"}}\n```",
        ]));

        let reply = relay
            .respond(ClientEvent::StructuredFormat(prompt("commute", 5)))
            .await;
        match reply {
            Some(ServerEvent::StructuredResult(reply)) => {
                assert_eq!(reply.request_id, Some(5));
                let structured = reply.into_result().expect("ready");
                assert_eq!(structured.artifact, vec!["Taxi app".to_string()]);
                assert_eq!(structured.user_experience["001"], "Orders a taxi");
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn storyboard_failure_is_an_error_reply() {
        let relay = service(ScriptedProvider::from_responses(["no JSON here"]));
        let reply = relay
            .respond(ClientEvent::StoryboardFormat(prompt("commute", 1)))
            .await;

        match reply {
            Some(ServerEvent::StoryboardResult(reply)) => assert_eq!(
                reply.outcome,
                ReplyOutcome::Failed {
                    error: STORYBOARD_FAILURE.to_string()
                }
            ),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn structured_breakdown_is_written_back_as_prose() {
        let relay = service(ScriptedProvider::from_responses([
            "  Mina wakes up and orders a taxi.  ",
        ]));
        let mut structured = StructuredScenario::default();
        structured.set_user_experience("001", "Orders a taxi");

        let reply = relay
            .respond(ClientEvent::ConvertStructured(StructuredRequest {
                structured,
                request_id: Some(9),
            }))
            .await;
        assert_eq!(
            reply,
            Some(ServerEvent::ConvertedScenario(Completion {
                text: "Mina wakes up and orders a taxi.".into(),
                request_id: Some(9),
            }))
        );
    }

    #[tokio::test]
    async fn persona_keeps_text_when_structuring_fails() {
        let relay = service(ScriptedProvider::from_responses([
            "Name: Mina\nAge: 29\nRole: job seeker",
            "not json",
        ]));

        let persona = relay.flourish_persona("a nervous job seeker").await.expect("persona");
        assert!(persona.profile_text.starts_with("Name: Mina"));
        assert_eq!(persona.profile, PersonaProfile::default());
    }

    #[tokio::test]
    async fn persona_profile_is_structured() {
        let relay = service(ScriptedProvider::from_responses([
            "Mina is 29 and wants to reach interviews on time.",
            "{\"name\":\"Mina\",\"age\":29,\"goals\":[\"reach interviews on time\"]}",
        ]));

        let reply = relay
            .respond(ClientEvent::FlourishPersona(prompt("job seeker", 2)))
            .await;
        match reply {
            Some(ServerEvent::PersonaFlourished(reply)) => {
                let persona = reply.into_result().expect("persona");
                assert_eq!(persona.profile.name, "Mina");
                assert_eq!(persona.profile.age, "29");
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn persona_requests_carry_system_prompts_and_json_format() {
        let provider = Arc::new(ScriptedProvider::from_responses([
            "Mina, 29, job seeker.",
            "{\"name\":\"Mina\"}",
        ]));
        let relay = RelayService::new(provider.clone(), "gpt-4o")
            .expect("service")
            .with_max_tokens(1024);

        relay.flourish_persona("job seeker").await.expect("persona");

        let received = provider.received();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].messages[0].role, MessageRole::System);
        assert_eq!(received[0].messages[0].text(), Some(PERSONA_SYSTEM));
        assert_eq!(received[0].temperature, Some(PERSONA_TEMPERATURE));
        assert_eq!(received[1].messages[1].text(), Some("Mina, 29, job seeker."));
        assert_eq!(received[1].temperature, Some(PERSONA_JSON_TEMPERATURE));
        assert_eq!(
            received[1].response_format,
            Some(serde_json::json!({ "type": "json_object" }))
        );
        assert!(received.iter().all(|r| r.max_tokens == Some(1024)));
    }

    #[tokio::test]
    async fn configured_temperature_overrides_step_defaults() {
        let provider = Arc::new(ScriptedProvider::from_responses(["{\"storyboards\":[]}"]));
        let relay = RelayService::new(provider.clone(), "gpt-4o")
            .expect("service")
            .with_temperature(0.1);

        relay.storyboard("commute").await.expect("storyboard");
        assert_eq!(provider.received()[0].temperature, Some(0.1));
        assert_eq!(provider.received()[0].max_tokens, None);
    }

    #[tokio::test]
    async fn persona_map_uses_goal_and_traits() {
        let provider = Arc::new(ScriptedProvider::from_responses([REPLY]));
        let relay = RelayService::new(provider.clone(), "gpt-4o").expect("service");
        let profile: PersonaProfile = serde_json::from_str(
            r#"{"goals":["reach interviews on time"],"personality":{"traits":["punctual","anxious"]}}"#,
        )
        .expect("profile");

        let reply = relay
            .respond(ClientEvent::GenerateMapData(crate::relay::MapDataRequest {
                profile,
                request_id: Some(4),
            }))
            .await;
        match reply {
            Some(ServerEvent::MapDataGenerated(completion)) => {
                assert_eq!(completion.request_id, Some(4));
                assert!(Document::from_json_str(&completion.text).is_ok());
            }
            other => panic!("unexpected reply {other:?}"),
        }

        let request = &provider.received()[0];
        assert_eq!(request.messages[0].text(), Some(MAP_SYSTEM));
        assert!(request.messages[1]
            .text()
            .is_some_and(|text| text.contains("This user aims to reach interviews on time.")));
    }

    #[tokio::test]
    async fn persona_provider_failure_is_an_error_reply() {
        let provider = ScriptedProvider::new();
        provider.push_failure("quota");
        let relay = service(provider);

        let reply = relay
            .respond(ClientEvent::FlourishPersona(prompt("anyone", 3)))
            .await;
        match reply {
            Some(ServerEvent::PersonaFlourished(reply)) => {
                assert_eq!(reply.into_result(), Err(PERSONA_FAILURE.to_string()));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn node_placements_get_no_reply() {
        let relay = service(ScriptedProvider::new());
        let node = crate::grid::Node::new(0, 0, "#7BFF00", "001", 0);
        let event = ClientEvent::NodePlaced(crate::relay::PlacedNode::from(&node));
        assert_eq!(relay.respond(event).await, None);
    }
}
