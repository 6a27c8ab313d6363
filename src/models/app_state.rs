use camino::Utf8PathBuf;
use std::fmt;

/// Stages of a disc image patch run, in the order they execute.
///
/// `CompatPatch` only runs for the UMD build. `Error` is absorbing and can be
/// reached from any stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Idle,
    HashCheck,
    CompatPatch,
    Extract,
    Decrypt,
    AlignPatch,
    Replace,
    FinalPatch,
    Done,
    Error,
}

impl PipelineStage {
    /// Human readable description used for progress messages.
    pub fn describe(self) -> &'static str {
        match self {
            PipelineStage::Idle => "Idle",
            PipelineStage::HashCheck => "Checking ISO",
            PipelineStage::CompatPatch => "Applying compat patch",
            PipelineStage::Extract => "Extracting DATA.BIN",
            PipelineStage::Decrypt => "Decrypting DATA.BIN (this may take a few minutes)",
            PipelineStage::AlignPatch => "Patching DATA.BIN",
            PipelineStage::Replace => "Replacing DATA.BIN",
            PipelineStage::FinalPatch => "Patching ISO",
            PipelineStage::Done => "Patching done",
            PipelineStage::Error => "Patching failed",
        }
    }

    /// True for `Done` and `Error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Error)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::HashCheck => "hash-check",
            PipelineStage::CompatPatch => "compat-patch",
            PipelineStage::Extract => "extract",
            PipelineStage::Decrypt => "decrypt",
            PipelineStage::AlignPatch => "align-patch",
            PipelineStage::Replace => "replace",
            PipelineStage::FinalPatch => "final-patch",
            PipelineStage::Done => "done",
            PipelineStage::Error => "error",
        };
        f.write_str(name)
    }
}

/// Single source of truth for runtime state shared between the flows and
/// whatever front end drives them.
///
/// # Thread Safety
///
/// `AppState` is wrapped in `Arc<RwLock<AppState>>` by [`crate::state::StateManager`].
/// Never mutate it directly - go through
/// [`update()`](crate::state::StateManager::update) so change events are emitted.
#[derive(Clone, Debug)]
pub struct AppState {
    // Patch pipeline
    pub is_patching: bool,
    pub patch_stage: PipelineStage,
    pub current_image: Option<Utf8PathBuf>,
    pub last_output: Option<Utf8PathBuf>,

    // Quest save session
    pub is_saving: bool,
    pub save_folder: Option<Utf8PathBuf>,
    pub occupied_slots: usize,
    pub pool_size: usize,

    // Shared
    pub current_operation: String,
    pub last_error: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            is_patching: false,
            patch_stage: PipelineStage::Idle,
            current_image: None,
            last_output: None,

            is_saving: false,
            save_folder: None,
            occupied_slots: 0,
            pool_size: 0,

            current_operation: String::new(),
            last_error: None,
        }
    }
}

impl AppState {
    /// True while any flow holds the staging area.
    pub fn is_busy(&self) -> bool {
        self.is_patching || self.is_saving
    }
}
