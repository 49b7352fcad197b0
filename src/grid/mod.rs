//! The live grid: placed nodes, row labels and the row count of one editing session.

pub mod path;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::palette;

pub use path::{cell_center, GroupPath, Point, CELL_SIZE};

/// Grid handle shared between the interaction layer and the animation player.
pub type SharedGrid = Arc<Mutex<Grid>>;

/// Pixel shift applied per extra node stacked in one cell.
pub const STACK_OFFSET: f32 = 6.0;

/// One placed marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub row: u32,
    pub col: u32,
    pub color: String,
    pub group_id: String,
    pub sub_id: u32,
}

impl Node {
    pub fn new(
        row: u32,
        col: u32,
        color: impl Into<String>,
        group_id: impl Into<String>,
        sub_id: u32,
    ) -> Self {
        Self {
            row,
            col,
            color: color.into(),
            group_id: group_id.into(),
            sub_id,
        }
    }

    pub fn key(&self) -> NodeKey {
        NodeKey {
            row: self.row,
            col: self.col,
            group_id: self.group_id.clone(),
            sub_id: self.sub_id,
        }
    }

    pub fn matches(&self, key: &NodeKey) -> bool {
        self.row == key.row
            && self.col == key.col
            && self.sub_id == key.sub_id
            && self.group_id == key.group_id
    }
}

/// Exact identity of a node: position plus group membership. Color is not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub row: u32,
    pub col: u32,
    pub group_id: String,
    pub sub_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Occupancy {
    /// `add_node` refuses cells that already hold a node.
    #[default]
    Single,
    /// Cells may hold several nodes; they are spread by [`STACK_OFFSET`] when drawn.
    Multiple,
}

/// Receives every new placement. Notifications carry no acknowledgement.
pub trait PlacementObserver: Send + Sync {
    fn node_placed(&self, node: &Node);
}

pub struct Grid {
    nodes: Vec<Node>,
    row_labels: Vec<String>,
    rows: usize,
    next_group: u64,
    occupancy: Occupancy,
    observers: Vec<Arc<dyn PlacementObserver>>,
    rng: StdRng,
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grid")
            .field("nodes", &self.nodes)
            .field("row_labels", &self.row_labels)
            .field("rows", &self.rows)
            .field("next_group", &self.next_group)
            .field("occupancy", &self.occupancy)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new()
    }
}

impl Grid {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic colors, for tests and reproducible demos.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            nodes: Vec::new(),
            row_labels: vec![String::new()],
            rows: 1,
            next_group: 1,
            occupancy: Occupancy::default(),
            observers: Vec::new(),
            rng,
        }
    }

    pub fn with_occupancy(mut self, occupancy: Occupancy) -> Self {
        self.occupancy = occupancy;
        self
    }

    pub fn into_shared(self) -> SharedGrid {
        Arc::new(Mutex::new(self))
    }

    pub fn subscribe(&mut self, observer: Arc<dyn PlacementObserver>) {
        self.observers.push(observer);
    }

    pub fn occupancy(&self) -> Occupancy {
        self.occupancy
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    /// Appends an empty row and returns its index.
    pub fn add_row(&mut self) -> usize {
        self.rows += 1;
        while self.row_labels.len() < self.rows {
            self.row_labels.push(String::new());
        }
        self.rows - 1
    }

    pub fn set_row_label(&mut self, index: usize, text: impl Into<String>) -> bool {
        match self.row_labels.get_mut(index) {
            Some(label) => {
                *label = text.into();
                true
            }
            None => false,
        }
    }

    /// Sets the visible row count. Labels are padded but never dropped.
    pub fn set_row_count(&mut self, rows: usize) {
        self.rows = rows.max(1);
        while self.row_labels.len() < self.rows {
            self.row_labels.push(String::new());
        }
    }

    /// Installs labels from an imported document; the row count follows them.
    pub fn replace_row_labels(&mut self, labels: Vec<String>) {
        self.row_labels = labels;
        self.set_row_count(self.row_labels.len());
    }

    pub fn nodes_at(&self, row: u32, col: u32) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| n.row == row && n.col == col)
            .collect()
    }

    pub fn is_occupied(&self, row: u32, col: u32) -> bool {
        self.nodes.iter().any(|n| n.row == row && n.col == col)
    }

    pub fn find(&self, key: &NodeKey) -> Option<&Node> {
        self.nodes.iter().find(|n| n.matches(key))
    }

    /// Starts a new group at an empty cell.
    pub fn add_node(&mut self, row: u32, col: u32) -> Option<Node> {
        if self.occupancy == Occupancy::Single && self.is_occupied(row, col) {
            tracing::debug!(row, col, "cell already occupied, ignoring add");
            return None;
        }

        let group_id = self.allocate_group_id();
        let color = palette::random_color(&mut self.rng);
        let node = Node::new(row, col, color, group_id, 0);
        self.place(node.clone());
        Some(node)
    }

    /// Appends the next step of `origin`'s group one column to its right.
    ///
    /// The target cell is not checked for occupancy.
    pub fn add_linked_node(&mut self, origin: &Node) -> Node {
        let next_sub = self
            .nodes
            .iter()
            .filter(|n| n.group_id == origin.group_id)
            .map(|n| n.sub_id)
            .chain(std::iter::once(origin.sub_id))
            .max()
            .map_or(0, |max| max + 1);

        let node = Node::new(
            origin.row,
            origin.col + 1,
            origin.color.clone(),
            origin.group_id.clone(),
            next_sub,
        );
        self.place(node.clone());
        node
    }

    fn allocate_group_id(&mut self) -> String {
        loop {
            let candidate = format!("{:03}", self.next_group);
            self.next_group += 1;
            if !self.nodes.iter().any(|n| n.group_id == candidate) {
                return candidate;
            }
        }
    }

    fn place(&mut self, node: Node) {
        tracing::debug!(
            group = %node.group_id,
            sub_id = node.sub_id,
            row = node.row,
            col = node.col,
            "node placed"
        );
        for observer in &self.observers {
            observer.node_placed(&node);
        }
        self.nodes.push(node);
    }

    /// Appends a node without notifying observers. Used by import and playback.
    pub fn push_node(&mut self, node: Node) {
        self.note_group_id(&node.group_id);
        if node.row as usize >= self.rows {
            self.set_row_count(node.row as usize + 1);
        }
        self.nodes.push(node);
    }

    /// Keeps future `add_node` ids clear of `nodes`, e.g. a queue that is about to
    /// be played back.
    pub fn reserve_group_ids(&mut self, nodes: &[Node]) {
        for node in nodes {
            self.note_group_id(&node.group_id);
        }
    }

    /// Only ids that fit in `u32` move the counter; anything larger cannot collide
    /// with a generated id before the counter gets there, and the allocator skips
    /// ids already on the grid.
    fn note_group_id(&mut self, group_id: &str) {
        if let Ok(numeric) = group_id.parse::<u32>() {
            self.next_group = self.next_group.max(u64::from(numeric) + 1);
        }
    }

    /// Repositions a node; group and sequence index stay unchanged.
    pub fn move_node(&mut self, key: &NodeKey, row: u32, col: u32) -> bool {
        match self.nodes.iter_mut().find(|n| n.matches(key)) {
            Some(node) => {
                node.row = row;
                node.col = col;
                if row as usize >= self.rows {
                    self.set_row_count(row as usize + 1);
                }
                true
            }
            None => false,
        }
    }

    /// Removes exactly one node matching `key`.
    pub fn delete_node(&mut self, key: &NodeKey) -> bool {
        match self.nodes.iter().position(|n| n.matches(key)) {
            Some(index) => {
                self.nodes.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Nodes by group, each ordered by sequence index ascending.
    pub fn grouped_view(&self) -> BTreeMap<String, Vec<Node>> {
        let mut grouped: BTreeMap<String, Vec<Node>> = BTreeMap::new();
        for node in &self.nodes {
            grouped
                .entry(node.group_id.clone())
                .or_default()
                .push(node.clone());
        }
        for members in grouped.values_mut() {
            members.sort_by_key(|n| n.sub_id);
        }
        grouped
    }

    /// Paths for groups that have at least two members.
    pub fn connections(&self) -> Vec<GroupPath> {
        path::group_paths(&self.grouped_view())
    }

    /// Render offset of a node among the nodes sharing its cell. Identity is unaffected.
    pub fn stack_offset(&self, key: &NodeKey) -> Option<(f32, f32)> {
        let index = self
            .nodes_at(key.row, key.col)
            .iter()
            .position(|n| n.matches(key))?;
        let shift = index as f32 * STACK_OFFSET;
        Some((shift, shift))
    }
}
