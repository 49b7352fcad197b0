pub mod config;
pub mod document;
pub mod error;
pub mod grid;
pub mod palette;
pub mod persona;
pub mod player;
pub mod prompt;
pub mod providers;
pub mod relay;
pub mod scenario;
pub mod session;
pub mod types;

pub use config::{ProviderKind, RelayConfig};
pub use document::{Document, ImportOptions, ImportedGrid, NodeDescriptor, RowEntry};
pub use error::{ConfigError, DocumentError, LLMError, RelayError};
pub use grid::{Grid, GroupPath, Node, NodeKey, Occupancy, PlacementObserver, SharedGrid};
pub use player::{AnimationPlayer, PlaybackDriver, PlayerState, TickOutcome};
pub use persona::{Persona, PersonaProfile};
pub use prompt::{PromptError, PromptTemplates};
pub use providers::LLMProvider;
pub use relay::{
    ClientEvent, Completion, CompletionOutcome, RelayClient, RelayEvents, RelayService, Reply,
    ServerEvent,
};
pub use scenario::{Scene, Storyboard, StructuredScenario};
pub use session::{ContextAction, ContextMenu, EditorSession, PromptPanel, RequestKind};
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole, TokenUsage};
pub use schemars::JsonSchema;
