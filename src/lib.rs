// FUCTool - patcher and quest save editor for Monster Hunter Freedom Unite
//
// This is the library crate containing the codecs, flows and state.
// The binary crate (main.rs) provides the command-line front end.

pub mod codec;
pub mod config;
pub mod logging;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use models::{AppState, MainConfig, PipelineStage, UserConfig};
pub use state::{StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
