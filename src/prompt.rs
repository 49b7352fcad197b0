use handlebars::Handlebars;
use serde::Serialize;
use thiserror::Error;

use crate::document::Document;
use crate::scenario::StructuredScenario;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("template error: {0}")]
    Template(#[from] Box<handlebars::TemplateError>),
    #[error("template render error: {0}")]
    Render(#[from] handlebars::RenderError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub const JOURNEY_TEMPLATE: &str = r#"Identify the design touchpoints a user meets in the scenario below and convert the journey into structured JSON.
Output only JSON inside a ```json code block and nothing else.

Scenario:
{{{scenario}}}

A touchpoint is a concrete screen, object or place the user actually encounters, for example "smartphone alarm screen" or "building lobby kiosk".

Rules:
1. The output is an array; each element is one row and stands for one touchpoint.
2. "touchpoints" names the touchpoint. Every touchpoint appears exactly once in the whole output.
3. "nodes info" lists the users present at that touchpoint:
   - "nodeId": a unique id per user, formatted "001", "002", ...
   - "row": distinguishes diverging choices of users at the same step.
   - "col": the time step, starting at 0 and increasing by one.
   - "nodeSubId": the step number inside that user's journey, starting at 0 for each user.
4. With several users, give each a distinct nodeId and list them together.
5. If the scenario leaves gaps, fill them with natural assumptions so every journey forms a connected path.

The output must validate against this JSON schema:
{{{schema}}}

Example:
{{{example}}}
"#;

const STRUCTURED_TEMPLATE: &str = r#"Break the {{source_kind}} below down into structured JSON.
Output only JSON inside a ```json code block and nothing else.

Format:
{
  "context": [physical places and environmental elements],
  "artifact": [products, screens, apps and systems the users interact with],
  "userExperience": {
    "001": "step by step service flow of user 001",
    "002": "step by step service flow of user 002"
  }
}

Rules:
- context lists physical spaces and environmental elements.
- artifact lists the concrete media of the experience: interfaces, screens, apps, products.
- userExperience summarises, per user id, that user's journey in time order as one string.
- The output must be valid JSON.

{{{source}}}
"#;

const STORYBOARD_TEMPLATE: &str = r#"Below is a service scenario. Compose a storyboard from it.

Format:
{
  "storyboards": [
    { "sceneId": 1, "title": "scene title", "keyInteractions": ["key user action 1", "key user action 2"] }
  ]
}

Rules:
- Create at most 5 scenes.
- Order the scenes chronologically.
- Output only valid JSON, without Markdown.

Scenario:
{{{scenario}}}
"#;

const SCENARIO_TEMPLATE: &str = r#"Write a service scenario in plain prose from the structured breakdown below.
Cover every user in "userExperience" in time order, and mention the places from "context" and the artifacts from "artifact" where users meet them.
Output only the scenario text, without headings, lists or Markdown.

{{{structured}}}
"#;

const PERSONA_TEMPLATE: &str = r#"Based on the following description, create a complete persona profile including name, age, gender, role, location, education, background, goals, pain points, personality, tech usage, and hobbies.

{{{brief}}}"#;

/// System message for expanding a persona brief.
pub const PERSONA_SYSTEM: &str = "You are a UX researcher assistant that expands a brief persona idea into a full, human-centered persona profile.";

/// System message for structuring a persona profile.
pub const PERSONA_JSON_SYSTEM: &str = r#"Convert the following persona profile into a well-structured JSON object with the following fields:

- name
- age
- gender
- role
- location
- education
- background
- goals (as a list of bullet points)
- painPoints (as a list of bullet points)
- personality:
    - traits (list of adjectives or behaviors)
    - drives (core motivations)
    - strengths (key abilities or qualities)
- techUsage (as a list of bullet points)
- hobbies (as a list of bullet points)

Ensure all list fields are arrays of strings."#;

/// System message for journey maps drawn from a persona.
pub const MAP_SYSTEM: &str = "You generate JSON journey maps from scenarios.";

#[derive(Serialize)]
struct JourneyPromptData<'a> {
    scenario: &'a str,
    schema: String,
    example: String,
}

#[derive(Serialize)]
struct StructuredPromptData<'a> {
    source_kind: &'a str,
    source: String,
}

/// Renders every prompt the relay sends.
pub struct PromptTemplates {
    registry: Handlebars<'static>,
}

impl PromptTemplates {
    pub fn new() -> Result<Self, PromptError> {
        Self::with_journey_template(JOURNEY_TEMPLATE)
    }

    /// Replaces the journey template; the others keep their defaults.
    pub fn with_journey_template(template: &str) -> Result<Self, PromptError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        for (name, source) in [
            ("journey", template),
            ("structured", STRUCTURED_TEMPLATE),
            ("storyboard", STORYBOARD_TEMPLATE),
            ("scenario", SCENARIO_TEMPLATE),
            ("persona", PERSONA_TEMPLATE),
        ] {
            registry
                .register_template_string(name, source)
                .map_err(Box::new)?;
        }
        Ok(Self { registry })
    }

    pub fn render(&self, scenario: &str) -> Result<String, PromptError> {
        let data = JourneyPromptData {
            scenario,
            schema: serde_json::to_string_pretty(&Document::json_schema())?,
            example: example_document(),
        };
        Ok(self.registry.render("journey", &data)?)
    }

    pub fn render_structured(&self, scenario: &str) -> Result<String, PromptError> {
        let data = StructuredPromptData {
            source_kind: "scenario",
            source: format!("Scenario:\n{scenario}"),
        };
        Ok(self.registry.render("structured", &data)?)
    }

    /// Structured breakdown of an existing journey document.
    pub fn render_conversion(&self, document: &Document) -> Result<String, PromptError> {
        let data = StructuredPromptData {
            source_kind: "journey touchpoint data",
            source: format!("Data:\n{}", serde_json::to_string_pretty(document)?),
        };
        Ok(self.registry.render("structured", &data)?)
    }

    pub fn render_storyboard(&self, scenario: &str) -> Result<String, PromptError> {
        Ok(self
            .registry
            .render("storyboard", &serde_json::json!({ "scenario": scenario }))?)
    }

    pub fn render_scenario(&self, structured: &StructuredScenario) -> Result<String, PromptError> {
        let structured = serde_json::to_string_pretty(structured)?;
        Ok(self
            .registry
            .render("scenario", &serde_json::json!({ "structured": structured }))?)
    }

    pub fn render_persona(&self, brief: &str) -> Result<String, PromptError> {
        Ok(self
            .registry
            .render("persona", &serde_json::json!({ "brief": brief }))?)
    }
}

fn example_document() -> String {
    r#"[
  {"touchpoints": "Smartphone alarm screen",
   "nodes info": [{"nodeId": "001", "row": 0, "col": 0, "nodeSubId": 0},
                  {"nodeId": "002", "row": 0, "col": 0, "nodeSubId": 0}]},
  {"touchpoints": "Taxi display",
   "nodes info": [{"nodeId": "001", "row": 1, "col": 1, "nodeSubId": 1},
                  {"nodeId": "002", "row": 1, "col": 1, "nodeSubId": 1}]}
]"#
    .to_string()
}
