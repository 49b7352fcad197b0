//! One editing session: translates editor gestures into grid mutations and wires the
//! grid to the animation player and the relay.
//!
//! The grid lock is only ever held inside a single method call, never across a call
//! into the [`PlaybackDriver`], which takes the same lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::document::{self, Document, ImportOptions};
use crate::error::{DocumentError, RelayError};
use crate::grid::{Grid, Node, NodeKey, SharedGrid};
use crate::palette::{hex_to_rgba, PALETTE};
use crate::persona::Persona;
use crate::player::{PlaybackDriver, PlayerState};
use crate::relay::{
    classify_completion, Completion, CompletionOutcome, RelayClient, Reply, ServerEvent,
    GENERATING_PLACEHOLDER, SCENARIO_FAILURE,
};
use crate::scenario::{Storyboard, StructuredScenario};

/// Opacity of the preview shown when hovering an empty cell.
const HOVER_ALPHA: f32 = 0.3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextAction {
    AddUser { row: u32, col: u32 },
    AddNextNode(NodeKey),
    DeleteNode(NodeKey),
}

/// Actions offered for a right-clicked cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextMenu {
    pub row: u32,
    pub col: u32,
    pub target: Option<Node>,
    pub actions: Vec<ContextAction>,
}

/// Kinds of relay request. Each kind keeps only its newest request in flight;
/// replies to older ones are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// `initialPrompt` and `generateMapData`; both load the grid.
    Journey,
    Structured,
    Storyboard,
    Scenario,
    Persona,
}

/// Text areas of the prompt panel and the views fed by relay replies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptPanel {
    pub input: String,
    pub output: String,
    pub scenario: Option<Document>,
    pub structured: Option<StructuredScenario>,
    pub storyboard: Option<Storyboard>,
    pub persona: Option<Persona>,
    pending: HashMap<RequestKind, u64>,
}

impl PromptPanel {
    /// Request id of the newest request of `kind` still waiting for a reply.
    pub fn pending(&self, kind: RequestKind) -> Option<u64> {
        self.pending.get(&kind).copied()
    }

    /// Clears the pending slot for a reply, or returns false if the reply answers
    /// an older request than the newest one.
    fn accept(&mut self, kind: RequestKind, received: Option<u64>) -> bool {
        if let (Some(received), Some(pending)) = (received, self.pending(kind)) {
            if received < pending {
                tracing::debug!(?kind, received, pending, "dropping stale reply");
                return false;
            }
        }
        self.pending.remove(&kind);
        true
    }
}

pub struct EditorSession {
    grid: SharedGrid,
    driver: PlaybackDriver,
    relay: Option<RelayClient>,
    drag: Option<NodeKey>,
    queue: Option<Vec<Node>>,
    prompt: PromptPanel,
    status: Option<String>,
    import_options: ImportOptions,
    rng: StdRng,
}

impl EditorSession {
    pub fn new(grid: Grid) -> Self {
        let grid = grid.into_shared();
        Self {
            driver: PlaybackDriver::new(grid.clone()),
            grid,
            relay: None,
            drag: None,
            queue: None,
            prompt: PromptPanel::default(),
            status: None,
            import_options: ImportOptions::default(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.driver = PlaybackDriver::new(self.grid.clone()).with_tick(tick);
        self
    }

    pub fn with_import_options(mut self, options: ImportOptions) -> Self {
        self.import_options = options;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Binds a relay connection to this session and broadcasts placements over it.
    pub async fn attach_relay(&mut self, client: RelayClient) {
        if let Some(notifier) = client.placement_notifier() {
            self.grid.lock().await.subscribe(Arc::new(notifier));
        }
        self.relay = Some(client);
    }

    pub fn grid(&self) -> &SharedGrid {
        &self.grid
    }

    pub fn prompt(&self) -> &PromptPanel {
        &self.prompt
    }

    /// Last user-visible message, e.g. a rejected import.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub async fn playback_state(&self) -> PlayerState {
        self.driver.state().await
    }

    pub async fn wait_for_playback(&mut self) {
        self.driver.wait().await;
    }

    pub async fn context_menu(&self, row: u32, col: u32) -> ContextMenu {
        let grid = self.grid.lock().await;
        let target = grid.nodes_at(row, col).first().map(|n| (*n).clone());

        let actions = match &target {
            None => vec![ContextAction::AddUser { row, col }],
            Some(node) => vec![
                ContextAction::AddNextNode(node.key()),
                ContextAction::DeleteNode(node.key()),
            ],
        };

        ContextMenu {
            row,
            col,
            target,
            actions,
        }
    }

    /// Runs a context-menu action. Returns the placed node for add actions.
    pub async fn apply(&mut self, action: ContextAction) -> Option<Node> {
        let mut grid = self.grid.lock().await;
        match action {
            ContextAction::AddUser { row, col } => grid.add_node(row, col),
            ContextAction::AddNextNode(key) => {
                let origin = grid.find(&key).cloned()?;
                Some(grid.add_linked_node(&origin))
            }
            ContextAction::DeleteNode(key) => {
                grid.delete_node(&key);
                None
            }
        }
    }

    /// Preview color for the pointer over a cell; occupied cells show their node.
    pub async fn hover_tint(&self, row: u32, col: u32) -> Option<String> {
        let occupied = !self.grid.lock().await.nodes_at(row, col).is_empty();
        if occupied {
            return None;
        }
        hex_to_rgba(PALETTE[0], HOVER_ALPHA)
    }

    pub async fn begin_drag(&mut self, key: NodeKey) -> bool {
        let exists = self.grid.lock().await.find(&key).is_some();
        self.drag = exists.then_some(key);
        exists
    }

    pub async fn drop_at(&mut self, row: u32, col: u32) -> bool {
        let Some(key) = self.drag.take() else {
            return false;
        };
        self.grid.lock().await.move_node(&key, row, col)
    }

    pub async fn add_row(&mut self) -> usize {
        self.grid.lock().await.add_row()
    }

    pub async fn set_row_label(&mut self, index: usize, text: impl Into<String>) -> bool {
        self.grid.lock().await.set_row_label(index, text)
    }

    pub async fn export(&self) -> Document {
        let grid = self.grid.lock().await;
        document::export_document(grid.row_labels(), grid.nodes())
    }

    pub async fn export_json(&self) -> Result<String, DocumentError> {
        self.export().await.to_json_pretty()
    }

    /// Loads a document file and replays it. A format error leaves the grid as it
    /// was and is reported through [`EditorSession::status`].
    pub async fn import_json(&mut self, input: &str) -> Result<usize, DocumentError> {
        match document::import_json(input, self.import_options, &mut self.rng) {
            Ok(imported) => {
                if imported.skipped > 0 {
                    self.status = Some(format!(
                        "Skipped {} malformed node entries",
                        imported.skipped
                    ));
                } else {
                    self.status = None;
                }
                let count = imported.nodes.len();
                self.load(imported.row_labels, imported.nodes).await;
                Ok(count)
            }
            Err(error) => {
                tracing::warn!(%error, "import rejected");
                self.status = Some(format!("Could not import file: {error}"));
                Err(error)
            }
        }
    }

    pub async fn import_document(&mut self, document: &Document) -> usize {
        let imported = document::import_document(document, self.import_options, &mut self.rng);
        let count = imported.nodes.len();
        self.load(imported.row_labels, imported.nodes).await;
        count
    }

    async fn load(&mut self, labels: Vec<String>, nodes: Vec<Node>) {
        self.grid.lock().await.replace_row_labels(labels);
        self.queue = Some(nodes.clone());
        self.driver.play(nodes).await;
    }

    /// Replays the last imported sequence from scratch.
    pub async fn replay(&mut self) -> bool {
        match self.queue.clone() {
            Some(nodes) => {
                self.driver.play(nodes).await;
                true
            }
            None => false,
        }
    }

    fn relay(&self) -> Result<&RelayClient, RelayError> {
        self.relay.as_ref().ok_or(RelayError::Disconnected)
    }

    /// Sends a scenario for its journey document, structured breakdown and
    /// storyboard. Returns the request id of the journey request.
    pub fn submit_prompt(&mut self, text: impl Into<String>) -> Result<u64, RelayError> {
        let text = text.into();
        let request_id = self.send_journey(&text)?;
        let structured = self.relay()?.request_structured(text.clone())?;
        self.prompt.pending.insert(RequestKind::Structured, structured);
        self.prompt.input = text;
        Ok(request_id)
    }

    fn send_journey(&mut self, text: &str) -> Result<u64, RelayError> {
        let relay = self.relay()?;
        let request_id = relay.send_prompt(text)?;
        let storyboard = relay.request_storyboard(text)?;

        self.prompt.output = GENERATING_PLACEHOLDER.to_string();
        self.prompt.pending.insert(RequestKind::Journey, request_id);
        self.prompt.pending.insert(RequestKind::Storyboard, storyboard);
        Ok(request_id)
    }

    /// Sends the edited structured breakdown to be written back as a scenario.
    pub fn submit_structured(&mut self) -> Result<u64, RelayError> {
        let structured = self
            .prompt
            .structured
            .as_ref()
            .ok_or(RelayError::MissingInput("structured scenario"))?;
        let request_id = self.relay()?.convert_structured(structured)?;
        self.prompt.pending.insert(RequestKind::Scenario, request_id);
        Ok(request_id)
    }

    pub fn set_structured_context(&mut self, index: usize, text: impl Into<String>) -> bool {
        self.prompt
            .structured
            .as_mut()
            .is_some_and(|structured| structured.set_context(index, text))
    }

    pub fn set_structured_artifact(&mut self, index: usize, text: impl Into<String>) -> bool {
        self.prompt
            .structured
            .as_mut()
            .is_some_and(|structured| structured.set_artifact(index, text))
    }

    pub fn set_structured_user_experience(
        &mut self,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> bool {
        match self.prompt.structured.as_mut() {
            Some(structured) => {
                structured.set_user_experience(user_id, text);
                true
            }
            None => false,
        }
    }

    /// Expands a persona brief into a full profile.
    pub fn flourish_persona(&mut self, brief: impl Into<String>) -> Result<u64, RelayError> {
        let request_id = self.relay()?.flourish_persona(brief)?;
        self.prompt.pending.insert(RequestKind::Persona, request_id);
        Ok(request_id)
    }

    /// Asks for a journey document drawn from the current persona.
    pub fn generate_persona_map(&mut self) -> Result<u64, RelayError> {
        let persona = self
            .prompt
            .persona
            .as_ref()
            .ok_or(RelayError::MissingInput("persona"))?;
        let request_id = self.relay()?.generate_map_data(&persona.profile)?;
        self.prompt.output = GENERATING_PLACEHOLDER.to_string();
        self.prompt.pending.insert(RequestKind::Journey, request_id);
        Ok(request_id)
    }

    /// Applies one relay event. Returns false when it answered a superseded request.
    pub async fn handle_event(&mut self, event: ServerEvent) -> bool {
        match event {
            ServerEvent::Completion(completion) | ServerEvent::MapDataGenerated(completion) => {
                self.receive_completion(completion).await
            }
            ServerEvent::StructuredResult(reply) => {
                let accepted = self.receive_reply(RequestKind::Structured, reply);
                let is_accepted = accepted.is_some();
                if let Some(structured) = accepted.flatten() {
                    self.prompt.structured = Some(structured);
                }
                is_accepted
            }
            ServerEvent::StoryboardResult(reply) => {
                let accepted = self.receive_reply(RequestKind::Storyboard, reply);
                let is_accepted = accepted.is_some();
                if let Some(storyboard) = accepted.flatten() {
                    self.prompt.storyboard = Some(storyboard);
                }
                is_accepted
            }
            ServerEvent::PersonaFlourished(reply) => {
                let accepted = self.receive_reply(RequestKind::Persona, reply);
                let is_accepted = accepted.is_some();
                if let Some(persona) = accepted.flatten() {
                    self.prompt.persona = Some(persona);
                }
                is_accepted
            }
            ServerEvent::ConvertedScenario(completion) => self.receive_scenario(completion),
        }
    }

    /// `None` for a stale reply, `Some(None)` for a failure shown in the status line.
    fn receive_reply<T>(&mut self, kind: RequestKind, reply: Reply<T>) -> Option<Option<T>> {
        if !self.prompt.accept(kind, reply.request_id) {
            return None;
        }
        match reply.into_result() {
            Ok(value) => Some(Some(value)),
            Err(message) => {
                self.status = Some(message);
                Some(None)
            }
        }
    }

    /// A rewritten scenario replaces the prompt input and is sent again for its
    /// journey and storyboard.
    fn receive_scenario(&mut self, completion: Completion) -> bool {
        if !self.prompt.accept(RequestKind::Scenario, completion.request_id) {
            return false;
        }
        if completion.text == SCENARIO_FAILURE {
            self.status = Some(completion.text);
            return true;
        }
        if let Err(error) = self.send_journey(&completion.text) {
            tracing::warn!(%error, "could not resend converted scenario");
            self.status = Some(error.to_string());
        }
        self.prompt.input = completion.text;
        true
    }

    /// Shows a completion. Completions answering an older prompt than the newest one
    /// are dropped; documents are loaded into the scenario table and the grid.
    pub async fn receive_completion(&mut self, completion: Completion) -> bool {
        if !self.prompt.accept(RequestKind::Journey, completion.request_id) {
            return false;
        }
        self.prompt.output = completion.text.clone();

        match classify_completion(&completion.text) {
            CompletionOutcome::Document(document) => {
                self.import_document(&document).await;
                self.prompt.scenario = Some(document);
                self.status = None;
            }
            CompletionOutcome::Failure(message) => {
                self.prompt.scenario = None;
                self.status = Some(message);
            }
        }
        true
    }

    pub fn toggle_scenario_member(&mut self, row: usize, node_id: &str, checked: bool) -> bool {
        self.edit_scenario(|document| document.toggle_member(row, node_id, checked))
    }

    pub fn set_scenario_touchpoint(&mut self, row: usize, text: impl Into<String>) -> bool {
        let text = text.into();
        self.edit_scenario(|document| document.set_touchpoint(row, text))
    }

    fn edit_scenario<F>(&mut self, edit: F) -> bool
    where
        F: FnOnce(&mut Document) -> bool,
    {
        let Some(document) = self.prompt.scenario.as_mut() else {
            return false;
        };
        if !edit(document) {
            return false;
        }
        if let Ok(json) = document.to_json_pretty() {
            self.prompt.output = json;
        }
        true
    }

    /// Stops playback and closes the relay connection.
    pub async fn close(mut self) {
        self.driver.stop().await;
        if let Some(relay) = self.relay.take() {
            relay.disconnect().await;
        }
    }
}
