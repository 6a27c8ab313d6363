// State management module
//
// This module provides the StateManager which wraps AppState with thread-safe access
// using Arc<RwLock<T>>, emits change events for front ends, and owns the
// single-flight guards of the patch and save flows.

use crate::models::{AppState, PipelineStage};
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Change events emitted when state is modified
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// A patch run claimed the pipeline
    PatchStarted { image: Option<Utf8PathBuf> },

    /// The pipeline entered a new stage
    StageChanged { stage: PipelineStage },

    /// A patch run released the pipeline
    PatchFinished {
        succeeded: bool,
        output: Option<Utf8PathBuf>,
    },

    /// A save load or persist claimed the save flow
    SaveStarted { folder: Option<Utf8PathBuf> },

    /// The save flow was released
    SaveFinished,

    /// Occupied quest slot count changed
    SlotsChanged { occupied: usize },

    /// Number of quests in the folder pool changed
    PoolChanged { size: usize },

    /// Current operation has changed
    OperationChanged { operation: String },

    /// A flow reported a failure
    ErrorRaised { message: String },
}

/// The two flows that must never run twice at once
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Patch,
    Save,
}

/// Thread-safe state manager with event emission
///
/// - Provides thread-safe access to [`AppState`] via `Arc<RwLock<T>>`
/// - Detects state changes and emits [`StateChange`] events
/// - Hands out [`FlowGuard`]s so a flow kind runs at most once at a time
///
/// # Usage
///
/// - [`read()`](Self::read) for reading state
/// - [`update()`](Self::update) for mutations with automatic event emission
/// - [`subscribe()`](Self::subscribe) for listening to state changes
/// - [`try_begin()`](Self::try_begin) to claim a flow
pub struct StateManager {
    state: Arc<RwLock<AppState>>,
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with default state and a 100 event buffer
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(AppState::default())),
            state_tx,
        }
    }

    /// Clone of the current state
    pub fn snapshot(&self) -> AppState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let stage = state_manager.read(|state| state.patch_stage);
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AppState) -> R,
    {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// Returns the events that were emitted.
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut AppState),
    {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = self.detect_changes(&old_state, &state);
        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn detect_changes(&self, old: &AppState, new: &AppState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.is_patching != new.is_patching {
            if new.is_patching {
                changes.push(StateChange::PatchStarted {
                    image: new.current_image.clone(),
                });
            } else {
                changes.push(StateChange::PatchFinished {
                    succeeded: new.patch_stage == PipelineStage::Done,
                    output: new.last_output.clone(),
                });
            }
        }

        if old.patch_stage != new.patch_stage {
            changes.push(StateChange::StageChanged {
                stage: new.patch_stage,
            });
        }

        if old.is_saving != new.is_saving {
            if new.is_saving {
                changes.push(StateChange::SaveStarted {
                    folder: new.save_folder.clone(),
                });
            } else {
                changes.push(StateChange::SaveFinished);
            }
        }

        if old.occupied_slots != new.occupied_slots {
            changes.push(StateChange::SlotsChanged {
                occupied: new.occupied_slots,
            });
        }

        if old.pool_size != new.pool_size {
            changes.push(StateChange::PoolChanged {
                size: new.pool_size,
            });
        }

        if old.current_operation != new.current_operation {
            changes.push(StateChange::OperationChanged {
                operation: new.current_operation.clone(),
            });
        }

        if old.last_error != new.last_error {
            if let Some(message) = &new.last_error {
                changes.push(StateChange::ErrorRaised {
                    message: message.clone(),
                });
            }
        }

        changes
    }

    /// Claim a flow for `target`.
    ///
    /// Returns `None` when a run of the same kind is still live. The flow is
    /// released when the returned guard is dropped.
    pub fn try_begin(&self, flow: Flow, target: &Utf8Path) -> Option<FlowGuard> {
        let mut acquired = false;
        self.update(|state| match flow {
            Flow::Patch if !state.is_patching => {
                state.is_patching = true;
                state.patch_stage = PipelineStage::Idle;
                state.current_image = Some(target.to_path_buf());
                state.last_output = None;
                state.last_error = None;
                acquired = true;
            }
            Flow::Save if !state.is_saving => {
                state.is_saving = true;
                state.save_folder = Some(target.to_path_buf());
                state.last_error = None;
                acquired = true;
            }
            _ => {}
        });

        if acquired {
            tracing::debug!("{:?} flow claimed for {}", flow, target);
            Some(FlowGuard {
                manager: self.clone(),
                flow,
            })
        } else {
            tracing::warn!("{:?} flow is already running, refusing {}", flow, target);
            None
        }
    }

    pub fn is_running(&self, flow: Flow) -> bool {
        self.read(|state| match flow {
            Flow::Patch => state.is_patching,
            Flow::Save => state.is_saving,
        })
    }

    /// Record the stage the pipeline just entered
    pub fn set_stage(&self, stage: PipelineStage) -> Vec<StateChange> {
        self.update(|state| {
            state.patch_stage = stage;
            state.current_operation = stage.describe().to_string();
        })
    }

    /// Record the delivered image of a successful run
    pub fn finish_patch(&self, output: Utf8PathBuf) -> Vec<StateChange> {
        self.update(|state| {
            state.patch_stage = PipelineStage::Done;
            state.last_output = Some(output);
            state.current_operation = PipelineStage::Done.describe().to_string();
        })
    }

    /// Record a failed run
    pub fn fail_patch(&self, message: String) -> Vec<StateChange> {
        self.update(|state| {
            state.patch_stage = PipelineStage::Error;
            state.last_error = Some(message);
            state.current_operation = PipelineStage::Error.describe().to_string();
        })
    }

    /// Record a failure of the save flow
    pub fn fail_save(&self, message: String) -> Vec<StateChange> {
        self.update(|state| {
            state.last_error = Some(message);
        })
    }

    pub fn set_occupied_slots(&self, occupied: usize) -> Vec<StateChange> {
        self.update(|state| state.occupied_slots = occupied)
    }

    pub fn set_pool_size(&self, size: usize) -> Vec<StateChange> {
        self.update(|state| state.pool_size = size)
    }

    pub fn set_operation(&self, operation: impl Into<String>) -> Vec<StateChange> {
        let operation = operation.into();
        self.update(|state| state.current_operation = operation)
    }

    fn release(&self, flow: Flow) {
        self.update(|state| match flow {
            Flow::Patch => state.is_patching = false,
            Flow::Save => state.is_saving = false,
        });
        tracing::debug!("{:?} flow released", flow);
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}

/// Proof that a flow is claimed; releases it on drop
pub struct FlowGuard {
    manager: StateManager,
    flow: Flow,
}

impl FlowGuard {
    pub fn flow(&self) -> Flow {
        self.flow
    }
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        self.manager.release(self.flow);
    }
}
