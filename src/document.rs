//! Row-oriented JSON document: the export file format and the relay payload.
//!
//! ```json
//! [
//!   { "touchpoints": "Alarm screen",
//!     "nodes info": [ { "nodeId": "001", "row": 0, "col": 0, "nodeSubId": 0 } ] }
//! ]
//! ```
//!
//! Decoding is strict about the envelope (a list of row objects) and lenient about
//! individual node entries: an entry with missing or mistyped fields is dropped and
//! counted, the rest of the document still loads.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::DocumentError;
use crate::grid::Node;
use crate::palette::ColorAssigner;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeDescriptor {
    /// Identifies the user path the node belongs to, e.g. `"001"`.
    #[serde(rename = "nodeId", deserialize_with = "string_or_integer")]
    #[schemars(with = "String")]
    pub node_id: String,
    pub row: u32,
    /// Time step along the journey.
    pub col: u32,
    /// Order of the node within its path, starting at 0.
    #[serde(rename = "nodeSubId")]
    pub node_sub_id: u32,
}

impl NodeDescriptor {
    pub fn from_node(node: &Node) -> Self {
        Self {
            node_id: node.group_id.clone(),
            row: node.row,
            col: node.col,
            node_sub_id: node.sub_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct RowEntry {
    /// The touchpoint this row stands for, e.g. a screen or a place.
    #[serde(default)]
    pub touchpoints: String,
    #[serde(rename = "nodes info", default)]
    pub nodes: Vec<NodeDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Document {
    pub rows: Vec<RowEntry>,
}

/// A decoded document plus the number of node entries that were dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub document: Document,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Overwrite every node's `row` with the index of its enclosing row entry.
    pub normalize_rows: bool,
}

impl ImportOptions {
    pub fn normalized() -> Self {
        Self {
            normalize_rows: true,
        }
    }
}

/// Grid contents reconstructed from a document.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedGrid {
    pub row_labels: Vec<String>,
    /// Nodes in document order, ready for playback.
    pub nodes: Vec<Node>,
    pub skipped: usize,
}

impl ImportedGrid {
    /// Row count playback will use: one past the deepest node row.
    pub fn playback_rows(&self) -> usize {
        self.nodes.iter().map(|n| n.row as usize + 1).max().unwrap_or(1)
    }
}

#[derive(Deserialize)]
struct RawRowEntry {
    #[serde(default)]
    touchpoints: Option<Value>,
    #[serde(rename = "nodes info", default)]
    nodes: Option<Vec<Value>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

pub(crate) fn string_or_integer<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}

impl Document {
    pub fn new(rows: Vec<RowEntry>) -> Self {
        Self { rows }
    }

    pub fn from_json_str(input: &str) -> Result<Self, DocumentError> {
        Ok(decode(input)?.document)
    }

    pub fn to_json_pretty(&self) -> Result<String, DocumentError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// JSON schema of the document, embedded into generation prompts.
    pub fn json_schema() -> Value {
        let schema = schemars::schema_for!(Document);
        serde_json::to_value(schema).unwrap_or(Value::Null)
    }

    pub fn node_count(&self) -> usize {
        self.rows.iter().map(|r| r.nodes.len()).sum()
    }

    /// Distinct node ids, sorted. These are the columns of the scenario table.
    pub fn member_ids(&self) -> Vec<String> {
        self.rows
            .iter()
            .flat_map(|row| row.nodes.iter().map(|n| n.node_id.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn set_touchpoint(&mut self, row: usize, text: impl Into<String>) -> bool {
        match self.rows.get_mut(row) {
            Some(entry) => {
                entry.touchpoints = text.into();
                true
            }
            None => false,
        }
    }

    /// Checks or unchecks a member for one row of the scenario table.
    ///
    /// Checking adds a node at column 0 with the row's current node count as its
    /// sequence index; unchecking removes every node of that member from the row.
    pub fn toggle_member(&mut self, row: usize, node_id: &str, checked: bool) -> bool {
        let Some(entry) = self.rows.get_mut(row) else {
            return false;
        };
        let present = entry.nodes.iter().any(|n| n.node_id == node_id);

        match (checked, present) {
            (true, false) => {
                let sub_id = entry.nodes.len() as u32;
                entry.nodes.push(NodeDescriptor {
                    node_id: node_id.to_string(),
                    row: row as u32,
                    col: 0,
                    node_sub_id: sub_id,
                });
                true
            }
            (false, true) => {
                entry.nodes.retain(|n| n.node_id != node_id);
                true
            }
            _ => false,
        }
    }
}

pub fn decode(input: &str) -> Result<Decoded, DocumentError> {
    let value: Value = serde_json::from_str(input)?;
    decode_value(value)
}

pub fn decode_value(value: Value) -> Result<Decoded, DocumentError> {
    let Value::Array(entries) = value else {
        return Err(DocumentError::NotASequence);
    };

    let mut rows = Vec::with_capacity(entries.len());
    let mut skipped = 0;

    for (index, entry) in entries.into_iter().enumerate() {
        let raw: RawRowEntry =
            serde_json::from_value(entry).map_err(|_| DocumentError::InvalidRow {
                index,
                reason: "expected an object with an optional \"nodes info\" list",
            })?;

        let touchpoints = match raw.touchpoints {
            Some(Value::String(text)) => text,
            _ => String::new(),
        };

        let mut nodes = Vec::new();
        for item in raw.nodes.unwrap_or_default() {
            match serde_json::from_value::<NodeDescriptor>(item) {
                Ok(node) => nodes.push(node),
                Err(error) => {
                    tracing::warn!(row = index, %error, "skipping malformed node entry");
                    skipped += 1;
                }
            }
        }

        rows.push(RowEntry { touchpoints, nodes });
    }

    Ok(Decoded {
        document: Document { rows },
        skipped,
    })
}

/// Builds the document for the current grid: one entry per labelled row.
pub fn export_document(row_labels: &[String], nodes: &[Node]) -> Document {
    let rows = row_labels
        .iter()
        .enumerate()
        .map(|(index, label)| RowEntry {
            touchpoints: label.clone(),
            nodes: nodes
                .iter()
                .filter(|n| n.row as usize == index)
                .map(NodeDescriptor::from_node)
                .collect(),
        })
        .collect();

    Document { rows }
}

/// Turns a document back into labels and nodes. Colors are not stored in the
/// document, so every distinct node id gets a fresh random palette color.
pub fn import_document<R: Rng + ?Sized>(
    document: &Document,
    options: ImportOptions,
    rng: &mut R,
) -> ImportedGrid {
    let mut colors = ColorAssigner::new();
    let mut nodes = Vec::with_capacity(document.node_count());

    for (index, entry) in document.rows.iter().enumerate() {
        for descriptor in &entry.nodes {
            let row = if options.normalize_rows {
                index as u32
            } else {
                descriptor.row
            };
            let color = colors.color_for(&descriptor.node_id, rng);
            nodes.push(Node::new(
                row,
                descriptor.col,
                color,
                descriptor.node_id.clone(),
                descriptor.node_sub_id,
            ));
        }
    }

    ImportedGrid {
        row_labels: document.rows.iter().map(|r| r.touchpoints.clone()).collect(),
        nodes,
        skipped: 0,
    }
}

pub fn import_json<R: Rng + ?Sized>(
    input: &str,
    options: ImportOptions,
    rng: &mut R,
) -> Result<ImportedGrid, DocumentError> {
    let decoded = decode(input)?;
    let mut imported = import_document(&decoded.document, options, rng);
    imported.skipped = decoded.skipped;
    Ok(imported)
}

/// Download name for a generated document, e.g. `touchpoints_2024-05-01-12-30-45.json`.
pub fn suggested_filename(now: DateTime<Utc>) -> String {
    now.format("touchpoints_%Y-%m-%d-%H-%M-%S.json").to_string()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    const TWO_ROWS: &str = r#"[
        {"touchpoints":"A","nodes info":[{"nodeId":"001","row":0,"col":0,"nodeSubId":0}]},
        {"touchpoints":"B","nodes info":[{"nodeId":"001","row":1,"col":1,"nodeSubId":1}]}
    ]"#;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn tuples(nodes: &[Node]) -> Vec<(String, u32, u32, u32)> {
        nodes
            .iter()
            .map(|n| (n.group_id.clone(), n.row, n.col, n.sub_id))
            .collect()
    }

    #[test]
    fn export_groups_nodes_by_row_label() {
        let labels = vec!["Alarm".to_string(), "Taxi".to_string(), "Lobby".to_string()];
        let nodes = vec![
            Node::new(0, 0, "#7BFF00", "001", 0),
            Node::new(1, 1, "#7BFF00", "001", 1),
            Node::new(0, 0, "#FF18C8", "002", 0),
            Node::new(7, 2, "#FF18C8", "002", 1),
        ];

        let document = export_document(&labels, &nodes);
        assert_eq!(document.rows.len(), 3);
        assert_eq!(document.rows[0].touchpoints, "Alarm");
        assert_eq!(document.rows[0].nodes.len(), 2);
        assert_eq!(document.rows[1].nodes[0].node_sub_id, 1);
        assert!(document.rows[2].nodes.is_empty());
    }

    #[test]
    fn export_then_import_keeps_positions_and_identity() {
        let labels = vec!["A".to_string(), "B".to_string()];
        let nodes = vec![
            Node::new(0, 0, "#7BFF00", "001", 0),
            Node::new(1, 3, "#7BFF00", "001", 1),
            Node::new(1, 0, "#1BEAFF", "002", 0),
        ];

        let json = export_document(&labels, &nodes).to_json_pretty().expect("json");
        let imported = import_json(&json, ImportOptions::default(), &mut rng()).expect("import");

        let mut expected = tuples(&nodes);
        let mut actual = tuples(&imported.nodes);
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);
        assert_eq!(imported.row_labels, labels);
        assert_eq!(imported.skipped, 0);
    }

    #[test]
    fn exported_json_uses_wire_field_names() {
        let document = export_document(&["A".to_string()], &[Node::new(0, 2, "#7BFF00", "001", 0)]);
        let json = document.to_json_pretty().expect("json");
        assert!(json.contains("\"nodes info\""));
        assert!(json.contains("\"nodeSubId\": 0"));
        assert!(!json.contains("color"));
    }

    #[test]
    fn import_assigns_one_color_per_node_id() {
        let imported = import_json(TWO_ROWS, ImportOptions::default(), &mut rng()).expect("import");
        assert_eq!(imported.nodes.len(), 2);
        assert_eq!(imported.nodes[0].color, imported.nodes[1].color);
        assert_eq!(imported.playback_rows(), 2);
    }

    #[test]
    fn non_array_is_a_format_error() {
        let error = decode(r#"{"touchpoints":"A"}"#).unwrap_err();
        assert!(matches!(error, DocumentError::NotASequence));

        let error = decode("not json").unwrap_err();
        assert!(matches!(error, DocumentError::Json(_)));
    }

    #[test]
    fn row_with_non_list_nodes_is_a_format_error() {
        let error = decode(r#"[{"touchpoints":"A","nodes info":"oops"}]"#).unwrap_err();
        assert!(matches!(error, DocumentError::InvalidRow { index: 0, .. }));

        let error = decode(r#"[{"touchpoints":"A","nodes info":[]}, 5]"#).unwrap_err();
        assert!(matches!(error, DocumentError::InvalidRow { index: 1, .. }));
    }

    #[test]
    fn missing_node_list_is_an_empty_row() {
        let decoded = decode(r#"[{"touchpoints":"A"},{"nodes info":null}]"#).expect("decode");
        assert_eq!(decoded.document.rows.len(), 2);
        assert!(decoded.document.rows[0].nodes.is_empty());
        assert_eq!(decoded.document.rows[1].touchpoints, "");
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let input = r#"[{"touchpoints":"A","nodes info":[
            {"nodeId":"001","row":0,"col":0,"nodeSubId":0},
            {"nodeId":"002","row":0,"col":1},
            {"nodeId":"003","row":"zero","col":1,"nodeSubId":0},
            {"nodeId":4,"row":0,"col":2,"nodeSubId":0},
            "garbage"
        ]}]"#;

        let decoded = decode(input).expect("decode");
        let ids: Vec<&str> = decoded.document.rows[0]
            .nodes
            .iter()
            .map(|n| n.node_id.as_str())
            .collect();
        assert_eq!(ids, vec!["001", "4"]);
        assert_eq!(decoded.skipped, 3);
    }

    #[test]
    fn normalize_rows_uses_entry_index() {
        let input = r#"[
            {"touchpoints":"A","nodes info":[{"nodeId":"001","row":5,"col":0,"nodeSubId":0}]},
            {"touchpoints":"B","nodes info":[{"nodeId":"001","row":0,"col":1,"nodeSubId":1}]}
        ]"#;

        let plain = import_json(input, ImportOptions::default(), &mut rng()).expect("plain");
        assert_eq!(plain.nodes[0].row, 5);

        let fixed = import_json(input, ImportOptions::normalized(), &mut rng()).expect("fixed");
        let rows: Vec<u32> = fixed.nodes.iter().map(|n| n.row).collect();
        assert_eq!(rows, vec![0, 1]);
    }

    #[test]
    fn scenario_table_toggles_members() {
        let mut document = Document::from_json_str(TWO_ROWS).expect("document");
        assert_eq!(document.member_ids(), vec!["001".to_string()]);

        assert!(document.toggle_member(0, "002", true));
        assert!(!document.toggle_member(0, "002", true));
        let added = &document.rows[0].nodes[1];
        assert_eq!((added.row, added.col, added.node_sub_id), (0, 0, 1));
        assert_eq!(document.member_ids(), vec!["001".to_string(), "002".to_string()]);

        assert!(document.toggle_member(0, "001", false));
        assert_eq!(document.rows[0].nodes.len(), 1);
        assert!(!document.toggle_member(9, "001", true));

        assert!(document.set_touchpoint(1, "Taxi screen"));
        assert_eq!(document.rows[1].touchpoints, "Taxi screen");
    }

    #[test]
    fn schema_names_wire_fields() {
        let schema = Document::json_schema().to_string();
        assert!(schema.contains("nodes info"));
        assert!(schema.contains("nodeSubId"));
    }

    #[test]
    fn filename_uses_utc_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap();
        assert_eq!(suggested_filename(now), "touchpoints_2024-05-01-12-30-45.json");
    }
}
