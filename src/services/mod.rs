//! Services module - the flows that drive external tools and the staging area.
//!
//! Everything here is independent of the command-line front end. Flows take
//! their collaborators explicitly: a [`ToolInvoker`] to launch processes, a
//! [`StateManager`](crate::state::StateManager) to publish progress, and paths
//! resolved from configuration.
//!
//! # Components
//!
//! - [`tools`]: the [`ToolInvoker`] seam, its `tokio::process` implementation
//!   and the argument builders of xdelta3, UMD-replace, psp-save and the
//!   DATA.BIN cryptor
//! - [`staging`]: the per-flow scratch directory and its fixed artifact names
//! - [`pipeline`]: the disc image patch state machine
//! - [`quests`]: save folder validation, quest sessions and the quest file pool
//! - [`dump`]: DATA.BIN dump on a blocking worker
//! - [`config_bin`]: config.bin option reading and writing
//!
//! # Usage Example
//!
//! ```ignore
//! use fuctool::services::{PatchPipeline, PipelineSettings, ProcessInvoker};
//!
//! let settings = PipelineSettings::from_config(&main_config, base_dir)?;
//! let pipeline = PatchPipeline::new(ProcessInvoker::new(None), settings, state);
//! let report = pipeline.run(Utf8Path::new("MHFU.iso")).await?;
//! println!("{}", report.output);
//! ```

pub mod config_bin;
pub mod dump;
pub mod pipeline;
pub mod quests;
pub mod staging;
pub mod tools;

pub use config_bin::{ConfigBinError, apply_choices, read_choices, read_file_choices, write_choice};
pub use dump::{DumpError, DumpReport, dump_data_bin};
pub use pipeline::{
    PatchPipeline, PatchSet, PipelineContext, PipelineError, PipelineReport, PipelineSettings, StageEvent,
    transition,
};
pub use quests::{
    ExportReport, OverwritePolicy, PoolEntry, QuestError, QuestPool, QuestSession, Region, SaveEditor, SaveFolder,
    export_to_pool,
};
pub use staging::{Artifact, StagingArea, StagingError};
pub use tools::{ProcessInvoker, Tool, ToolCommand, ToolError, ToolInvoker, ToolOutcome, Toolchain};
