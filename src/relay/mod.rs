//! Event relay between the editor and the hosted text-generation service.
//!
//! Frames are JSON text messages of the form `{"event": <name>, "data": <payload>}`.
//! There are no delivery guarantees and no retries; the optional `requestId` only lets
//! a client discard completions that answer an older prompt.

pub mod client;
pub mod server;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::document::{self, Document, NodeDescriptor};
use crate::grid::Node;
use crate::persona::{Persona, PersonaProfile};
use crate::scenario::{Storyboard, StructuredScenario};

pub use client::{RelayClient, RelayEvents};
pub use server::{RelayService, RelayState};

/// Shown while a prompt is in flight.
pub const GENERATING_PLACEHOLDER: &str = "generating...";
/// Completion text when the provider call fails.
pub const PROVIDER_FAILURE: &str = "[completion request failed]";
/// Completion text when the model reply does not decode as a document.
pub const INVALID_JSON_FAILURE: &str = "[response was not valid JSON]";
/// `error` of a failed `structuredResult`.
pub const STRUCTURED_FAILURE: &str = "[structured conversion failed]";
/// `error` of a failed `storyboardResult`.
pub const STORYBOARD_FAILURE: &str = "[storyboard conversion failed]";
/// `convertedScenario` text when the scenario could not be written.
pub const SCENARIO_FAILURE: &str = "[scenario conversion failed]";
/// `error` of a failed `personaFlourished`.
pub const PERSONA_FAILURE: &str = "[error generating persona]";

static RE_CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?").expect("code fence pattern"));

/// Removes Markdown code fences around a model reply.
pub fn strip_code_fences(text: &str) -> String {
    RE_CODE_FENCE.replace_all(text, "").trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedNode {
    #[serde(flatten)]
    pub descriptor: NodeDescriptor,
    pub color: String,
}

impl From<&Node> for PlacedNode {
    fn from(node: &Node) -> Self {
        Self {
            descriptor: NodeDescriptor::from_node(node),
            color: node.color.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawCorrelated")]
pub struct PromptRequest {
    pub text: String,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawCorrelated")]
pub struct Completion {
    pub text: String,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
}

/// Payloads may be a bare string or an object carrying a request id.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawCorrelated {
    Text(String),
    Full {
        text: String,
        #[serde(rename = "requestId", default)]
        request_id: Option<u64>,
    },
}

impl RawCorrelated {
    fn into_parts(self) -> (String, Option<u64>) {
        match self {
            RawCorrelated::Text(text) => (text, None),
            RawCorrelated::Full { text, request_id } => (text, request_id),
        }
    }
}

impl From<RawCorrelated> for PromptRequest {
    fn from(raw: RawCorrelated) -> Self {
        let (text, request_id) = raw.into_parts();
        Self { text, request_id }
    }
}

impl From<RawCorrelated> for Completion {
    fn from(raw: RawCorrelated) -> Self {
        let (text, request_id) = raw.into_parts();
        Self { text, request_id }
    }
}

/// A structured breakdown to be written back into scenario prose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredRequest {
    #[serde(flatten)]
    pub structured: StructuredScenario,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDataRequest {
    #[serde(rename = "profileJson", default)]
    pub profile: PersonaProfile,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
}

/// A JSON reply, or `{"error": ...}` when the request failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply<T> {
    #[serde(flatten)]
    pub outcome: ReplyOutcome<T>,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyOutcome<T> {
    Failed { error: String },
    Ready(T),
}

impl<T> Reply<T> {
    pub fn ready(value: T, request_id: Option<u64>) -> Self {
        Self {
            outcome: ReplyOutcome::Ready(value),
            request_id,
        }
    }

    pub fn failed(error: impl Into<String>, request_id: Option<u64>) -> Self {
        Self {
            outcome: ReplyOutcome::Failed {
                error: error.into(),
            },
            request_id,
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match self.outcome {
            ReplyOutcome::Ready(value) => Ok(value),
            ReplyOutcome::Failed { error } => Err(error),
        }
    }
}

/// Editor to relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "nodePlaced")]
    NodePlaced(PlacedNode),
    #[serde(rename = "initialPrompt")]
    InitialPrompt(PromptRequest),
    #[serde(rename = "phase1StructuredFormat")]
    StructuredFormat(PromptRequest),
    #[serde(rename = "phase4StoryboardFormat")]
    StoryboardFormat(PromptRequest),
    #[serde(rename = "convertStructuredToScenario")]
    ConvertStructured(StructuredRequest),
    #[serde(rename = "flourishPersona")]
    FlourishPersona(PromptRequest),
    #[serde(rename = "generateMapData")]
    GenerateMapData(MapDataRequest),
}

/// Relay to editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "completion")]
    Completion(Completion),
    #[serde(rename = "structuredResult")]
    StructuredResult(Reply<StructuredScenario>),
    #[serde(rename = "storyboardResult")]
    StoryboardResult(Reply<Storyboard>),
    #[serde(rename = "convertedScenario")]
    ConvertedScenario(Completion),
    #[serde(rename = "personaFlourished")]
    PersonaFlourished(Reply<Persona>),
    #[serde(rename = "mapDataGenerated")]
    MapDataGenerated(Completion),
}

impl ClientEvent {
    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::NodePlaced(_) => "nodePlaced",
            ClientEvent::InitialPrompt(_) => "initialPrompt",
            ClientEvent::StructuredFormat(_) => "phase1StructuredFormat",
            ClientEvent::StoryboardFormat(_) => "phase4StoryboardFormat",
            ClientEvent::ConvertStructured(_) => "convertStructuredToScenario",
            ClientEvent::FlourishPersona(_) => "flourishPersona",
            ClientEvent::GenerateMapData(_) => "generateMapData",
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

impl ServerEvent {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Document(Document),
    /// Anything that is not a document, shown to the user verbatim.
    Failure(String),
}

/// Decides whether completion text carries a document or a failure message.
pub fn classify_completion(text: &str) -> CompletionOutcome {
    match document::decode(&strip_code_fences(text)) {
        Ok(decoded) => CompletionOutcome::Document(decoded.document),
        Err(_) => CompletionOutcome::Failure(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fences() {
        let reply = "```json\n[{\"touchpoints\":\"A\",\"nodes info\":[]}]\n```";
        assert_eq!(strip_code_fences(reply), "[{\"touchpoints\":\"A\",\"nodes info\":[]}]");
    }

    #[test]
    fn classifies_documents_and_failures() {
        let document = classify_completion("[{\"touchpoints\":\"A\",\"nodes info\":[]}]");
        assert!(matches!(document, CompletionOutcome::Document(ref d) if d.rows.len() == 1));

        let failure = classify_completion(PROVIDER_FAILURE);
        assert_eq!(failure, CompletionOutcome::Failure(PROVIDER_FAILURE.to_string()));

        let object = classify_completion("{\"touchpoints\":\"A\"}");
        assert!(matches!(object, CompletionOutcome::Failure(_)));
    }

    #[test]
    fn node_placed_frame_carries_full_node() {
        let node = Node::new(1, 2, "#FF18C8", "003", 4);
        let frame = ClientEvent::NodePlaced(PlacedNode::from(&node))
            .to_frame()
            .expect("frame");
        let value: serde_json::Value = serde_json::from_str(&frame).expect("json");

        assert_eq!(value["event"], "nodePlaced");
        assert_eq!(value["data"]["nodeId"], "003");
        assert_eq!(value["data"]["nodeSubId"], 4);
        assert_eq!(value["data"]["color"], "#FF18C8");
    }

    #[test]
    fn prompt_accepts_bare_string_payload() {
        let event = ClientEvent::from_frame(r#"{"event":"initialPrompt","data":"a scenario"}"#)
            .expect("event");
        assert_eq!(
            event,
            ClientEvent::InitialPrompt(PromptRequest {
                text: "a scenario".into(),
                request_id: None,
            })
        );

        let frame = r#"{"event":"initialPrompt","data":{"text":"b","requestId":7}}"#;
        let event = ClientEvent::from_frame(frame).expect("event");
        assert!(matches!(event, ClientEvent::InitialPrompt(ref p) if p.request_id == Some(7)));
    }

    #[test]
    fn structured_request_accepts_the_bare_object() {
        let event = ClientEvent::from_frame(
            r#"{"event":"convertStructuredToScenario","data":{"context":["Street"],"artifact":[],"userExperience":{"001":"walks"}}}"#,
        )
        .expect("event");

        match event {
            ClientEvent::ConvertStructured(request) => {
                assert_eq!(request.structured.context, vec!["Street".to_string()]);
                assert_eq!(request.request_id, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn failed_reply_is_an_error_object() {
        let event = ServerEvent::StoryboardResult(Reply::failed(STORYBOARD_FAILURE, Some(2)));
        let value: serde_json::Value =
            serde_json::from_str(&event.to_frame().expect("frame")).expect("json");
        assert_eq!(value["event"], "storyboardResult");
        assert_eq!(value["data"]["error"], STORYBOARD_FAILURE);
        assert_eq!(value["data"]["requestId"], 2);

        let frame = r#"{"event":"structuredResult","data":{"context":["Lobby"],"requestId":4}}"#;
        match ServerEvent::from_frame(frame).expect("decode") {
            ServerEvent::StructuredResult(reply) => {
                assert_eq!(reply.request_id, Some(4));
                let structured = reply.into_result().expect("ready");
                assert_eq!(structured.context, vec!["Lobby".to_string()]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn completion_frame_roundtrips_request_id() {
        let event = ServerEvent::Completion(Completion {
            text: "[]".into(),
            request_id: Some(3),
        });
        let frame = event.to_frame().expect("frame");
        assert_eq!(ServerEvent::from_frame(&frame).expect("decode"), event);
    }
}
