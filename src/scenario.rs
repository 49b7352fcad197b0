//! Companion views of a journey produced by the relay: the structured breakdown
//! (places, artifacts, per-user flow) and the storyboard.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Most scenes a storyboard keeps.
pub const MAX_SCENES: usize = 5;

/// A scenario split into its physical context, the artifacts users touch and one
/// narrative per user id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StructuredScenario {
    /// Places and environmental elements.
    pub context: Vec<String>,
    /// Products, screens and systems users interact with.
    pub artifact: Vec<String>,
    /// Journey summary per user id, e.g. `"001"`, in time order.
    #[serde(rename = "userExperience")]
    pub user_experience: BTreeMap<String, String>,
}

impl StructuredScenario {
    pub fn is_empty(&self) -> bool {
        self.context.is_empty() && self.artifact.is_empty() && self.user_experience.is_empty()
    }

    pub fn set_context(&mut self, index: usize, text: impl Into<String>) -> bool {
        set_item(&mut self.context, index, text.into())
    }

    pub fn set_artifact(&mut self, index: usize, text: impl Into<String>) -> bool {
        set_item(&mut self.artifact, index, text.into())
    }

    /// Replaces or adds the narrative for one user.
    pub fn set_user_experience(&mut self, user_id: impl Into<String>, text: impl Into<String>) {
        self.user_experience.insert(user_id.into(), text.into());
    }
}

fn set_item(items: &mut [String], index: usize, text: String) -> bool {
    match items.get_mut(index) {
        Some(item) => {
            *item = text;
            true
        }
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Scene {
    #[serde(rename = "sceneId")]
    pub scene_id: u32,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "keyInteractions", default)]
    pub key_interactions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Storyboard {
    #[serde(default)]
    pub storyboards: Vec<Scene>,
}

impl Storyboard {
    /// Drops scenes past [`MAX_SCENES`] and returns how many were removed.
    pub fn truncate(&mut self) -> usize {
        let excess = self.storyboards.len().saturating_sub(MAX_SCENES);
        self.storyboards.truncate(MAX_SCENES);
        excess
    }
}
