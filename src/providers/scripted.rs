use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse},
    LLMError,
};

/// Replays canned replies in order. Used for offline relays and tests.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<String, String>>>,
    received: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            received: Mutex::default(),
        }
    }

    pub fn push_response(&self, response: impl Into<String>) {
        if let Ok(mut guard) = self.responses.lock() {
            guard.push_back(Ok(response.into()));
        }
    }

    /// Queues a provider failure for the next call.
    pub fn push_failure(&self, message: impl Into<String>) {
        if let Ok(mut guard) = self.responses.lock() {
            guard.push_back(Err(message.into()));
        }
    }

    /// Requests seen so far, oldest first.
    pub fn received(&self) -> Vec<CompletionRequest> {
        self.received
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn next_response(&self) -> Option<Result<String, String>> {
        self.responses.lock().ok().and_then(|mut guard| guard.pop_front())
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        if let Ok(mut guard) = self.received.lock() {
            guard.push(request);
        }
        match self.next_response() {
            Some(Ok(response)) => Ok(CompletionResponse {
                message: ChatMessage::assistant(response),
                usage: None,
            }),
            Some(Err(message)) => Err(LLMError::Provider(message)),
            None => Err(LLMError::Provider("no more scripted responses".to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
