//! Persona profiles expanded from a short brief.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::document::string_or_integer;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Personality {
    pub traits: Vec<String>,
    pub drives: Vec<String>,
    pub strengths: Vec<String>,
}

/// Structured persona. Every field is optional on the wire; models routinely
/// leave some out.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PersonaProfile {
    pub name: String,
    #[serde(deserialize_with = "string_or_integer")]
    #[schemars(with = "String")]
    pub age: String,
    pub gender: String,
    pub role: String,
    pub location: String,
    pub education: String,
    pub background: String,
    pub goals: Vec<String>,
    #[serde(rename = "painPoints")]
    pub pain_points: Vec<String>,
    pub personality: Personality,
    #[serde(rename = "techUsage")]
    pub tech_usage: Vec<String>,
    pub hobbies: Vec<String>,
}

impl PersonaProfile {
    /// Two-sentence scenario used to draw a journey map for this persona.
    pub fn scenario_sentence(&self) -> String {
        let goal = self.goals.first().map(String::as_str).unwrap_or_default();
        let traits = self
            .personality
            .traits
            .iter()
            .take(2)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        format!("This user aims to {goal}. User is {traits}.")
    }
}

/// Result of expanding a brief: the free-text profile and its structured form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Persona {
    #[serde(rename = "profileText")]
    pub profile_text: String,
    #[serde(rename = "profileJson", default)]
    pub profile: PersonaProfile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_accepts_numeric_age_and_partial_fields() {
        let profile: PersonaProfile = serde_json::from_str(
            r#"{"name":"Mina","age":29,"painPoints":["late taxis"],"personality":{"traits":["punctual"]}}"#,
        )
        .expect("profile");

        assert_eq!(profile.age, "29");
        assert_eq!(profile.pain_points, vec!["late taxis".to_string()]);
        assert!(profile.hobbies.is_empty());
    }

    #[test]
    fn scenario_sentence_uses_first_goal_and_two_traits() {
        let profile = PersonaProfile {
            goals: vec!["reach interviews on time".into(), "save money".into()],
            personality: Personality {
                traits: vec!["punctual".into(), "anxious".into(), "curious".into()],
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(
            profile.scenario_sentence(),
            "This user aims to reach interviews on time. User is punctual, anxious."
        );
    }
}
