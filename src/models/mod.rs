//! Data models for FUCTool.
//!
//! - [`AppState`]: runtime state shared by the patch and save flows
//! - [`PipelineStage`]: the stages of a disc image patch run
//! - [`MainConfig`]: tool paths, patch files, known digests and regions from `FUCTool.yaml`
//! - [`UserConfig`]: logging preferences from `FUCTool Settings.yaml`
//! - [`QuestRecord`] / [`SaveContainer`]: the 18 quest slots of a save
//!
//! # Architecture Note
//!
//! Config structs derive `Serialize`/`Deserialize` for YAML persistence.
//! `AppState` is wrapped in `Arc<RwLock<>>` by [`StateManager`](crate::state::StateManager).

pub mod app_state;
pub mod config;
pub mod quest;

pub use app_state::{AppState, PipelineStage};
pub use config::{
    ConfigOption, ConfigValue, DumpName, FucData, KnownHashes, MainConfig, PatchPaths,
    RegionConfig, ToolPaths, UserConfig,
};
pub use quest::{QuestRecord, SaveContainer, SlotError, QUEST_SLOT_COUNT};
