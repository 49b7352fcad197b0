//! Timed replay of a node sequence into the grid.
//!
//! [`AnimationPlayer`] is the synchronous state machine; [`PlaybackDriver`] owns the
//! single tokio task that ticks it. Every `play` bumps a generation counter, so a
//! ticket from an earlier playback can never insert into the grid again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::grid::{Grid, Node, SharedGrid};

pub const DEFAULT_TICK: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
}

/// Proof that a tick belongs to the current playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackTicket {
    generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Inserted { node: Node, remaining: usize },
    Finished,
    Stale,
}

#[derive(Debug)]
pub struct AnimationPlayer {
    state: PlayerState,
    queue: Vec<Node>,
    cursor: usize,
    generation: u64,
}

impl Default for AnimationPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl AnimationPlayer {
    pub fn new() -> Self {
        Self {
            state: PlayerState::Idle,
            queue: Vec::new(),
            cursor: 0,
            generation: 0,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn remaining(&self) -> usize {
        self.queue.len() - self.cursor
    }

    /// Resets the grid and queues `nodes` for insertion in the given order.
    pub fn play(&mut self, grid: &mut Grid, nodes: Vec<Node>) -> PlaybackTicket {
        self.generation += 1;

        grid.clear();
        grid.reserve_group_ids(&nodes);
        let rows = nodes.iter().map(|n| n.row as usize).max().unwrap_or(0) + 1;
        grid.set_row_count(rows);

        self.queue = nodes;
        self.cursor = 0;
        self.state = if self.queue.is_empty() {
            PlayerState::Idle
        } else {
            PlayerState::Playing
        };

        tracing::debug!(
            generation = self.generation,
            nodes = self.queue.len(),
            rows,
            "playback started"
        );
        PlaybackTicket {
            generation: self.generation,
        }
    }

    /// Invalidates the current ticket and returns to idle.
    pub fn stop(&mut self) {
        self.generation += 1;
        self.queue.clear();
        self.cursor = 0;
        self.state = PlayerState::Idle;
    }

    /// Appends exactly one queued node, unless `ticket` is outdated.
    pub fn tick(&mut self, grid: &mut Grid, ticket: PlaybackTicket) -> TickOutcome {
        if ticket.generation != self.generation {
            return TickOutcome::Stale;
        }

        let Some(node) = self.queue.get(self.cursor).cloned() else {
            self.state = PlayerState::Idle;
            return TickOutcome::Finished;
        };

        self.cursor += 1;
        grid.push_node(node.clone());

        let remaining = self.remaining();
        if remaining == 0 {
            self.state = PlayerState::Idle;
            tracing::debug!(generation = self.generation, "playback finished");
        }

        TickOutcome::Inserted { node, remaining }
    }
}

/// Runs an [`AnimationPlayer`] against a shared grid on a fixed interval.
pub struct PlaybackDriver {
    grid: SharedGrid,
    player: Arc<Mutex<AnimationPlayer>>,
    tick: Duration,
    progress: Option<mpsc::UnboundedSender<Node>>,
    task: Option<JoinHandle<()>>,
}

impl PlaybackDriver {
    pub fn new(grid: SharedGrid) -> Self {
        Self {
            grid,
            player: Arc::new(Mutex::new(AnimationPlayer::new())),
            tick: DEFAULT_TICK,
            progress: None,
            task: None,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Receives a copy of every inserted node.
    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<Node>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn grid(&self) -> &SharedGrid {
        &self.grid
    }

    pub async fn state(&self) -> PlayerState {
        self.player.lock().await.state()
    }

    /// Starts a playback, cancelling any playback still in progress.
    ///
    /// Must not be called while holding the grid lock.
    pub async fn play(&mut self, nodes: Vec<Node>) -> PlaybackTicket {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let ticket = {
            let mut grid = self.grid.lock().await;
            let mut player = self.player.lock().await;
            player.play(&mut grid, nodes)
        };

        let grid = self.grid.clone();
        let player = self.player.clone();
        let period = self.tick;
        let progress = self.progress.clone();

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                interval.tick().await;
                let outcome = {
                    let mut grid = grid.lock().await;
                    let mut player = player.lock().await;
                    player.tick(&mut grid, ticket)
                };

                match outcome {
                    TickOutcome::Inserted { node, remaining } => {
                        if let Some(progress) = &progress {
                            let _ = progress.send(node);
                        }
                        if remaining == 0 {
                            break;
                        }
                    }
                    TickOutcome::Finished | TickOutcome::Stale => break,
                }
            }
        }));

        ticket
    }

    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.player.lock().await.stop();
    }

    /// Waits until the current playback has inserted its last node.
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
