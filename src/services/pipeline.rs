//! Disc image patch pipeline.
//!
//! A run walks `HashCheck → [CompatPatch] → Extract → Decrypt → AlignPatch →
//! Replace → FinalPatch → Done`. Each stage runs as one task (a blocking
//! worker or an external tool) and reports a [`StageEvent`]; the pure
//! [`transition`] function turns that event into the next stage. Any failure
//! ends the run in `Error` and leaves the staging area as it was, to be
//! cleared by the next run.

use crate::codec::{self, BuildTable, CodecError, DATA_BIN_PATH, DiscDigest, KnownBuild};
use crate::models::{MainConfig, PipelineStage};
use crate::services::staging::{Artifact, StagingArea, StagingError};
use crate::services::tools::{Tool, ToolCommand, ToolError, ToolInvoker, ToolOutcome, Toolchain};
use crate::state::{Flow, StateManager};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that end a patch run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("A patch run is already in progress")]
    Busy,

    #[error("Invalid ISO: MD5 {digest} matches neither the UMD nor the PSN dump")]
    UnrecognizedImage { digest: DiscDigest },

    #[error("{0} is already decrypted, select an unmodified ISO")]
    AlreadyDecrypted(Utf8PathBuf),

    #[error("{tool} failed during {stage} with exit code {exit_code:?}")]
    ToolFailed {
        stage: PipelineStage,
        tool: Tool,
        exit_code: Option<i32>,
    },

    #[error("{stage} did not produce {path}")]
    MissingArtifact {
        stage: PipelineStage,
        path: Utf8PathBuf,
    },

    #[error("{stage}: {source}")]
    Tool {
        stage: PipelineStage,
        #[source]
        source: ToolError,
    },

    #[error("{stage}: {source}")]
    Codec {
        stage: PipelineStage,
        #[source]
        source: CodecError,
    },

    #[error("{stage}: {source}")]
    Staging {
        stage: PipelineStage,
        #[source]
        source: StagingError,
    },

    #[error("{stage}: background task failed: {source}")]
    Task {
        stage: PipelineStage,
        #[source]
        source: tokio::task::JoinError,
    },

    #[error("{stage} cannot handle {event}")]
    InvalidTransition { stage: PipelineStage, event: String },
}

/// Completion signal of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    /// Hash check matched a known build
    Identified(KnownBuild),
    /// Hash check matched nothing
    Unrecognized(DiscDigest),
    /// Any other stage finished successfully
    Completed,
}

/// Next stage after `stage` reported `event`.
pub fn transition(stage: PipelineStage, event: StageEvent) -> Result<PipelineStage, PipelineError> {
    use PipelineStage::*;

    match (stage, event) {
        (Idle, StageEvent::Completed) => Ok(HashCheck),
        (HashCheck, StageEvent::Identified(KnownBuild::Umd)) => Ok(CompatPatch),
        (HashCheck, StageEvent::Identified(KnownBuild::Psn)) => Ok(Extract),
        (HashCheck, StageEvent::Unrecognized(digest)) => Err(PipelineError::UnrecognizedImage { digest }),
        (CompatPatch, StageEvent::Completed) => Ok(Extract),
        (Extract, StageEvent::Completed) => Ok(Decrypt),
        (Decrypt, StageEvent::Completed) => Ok(AlignPatch),
        (AlignPatch, StageEvent::Completed) => Ok(Replace),
        (Replace, StageEvent::Completed) => Ok(FinalPatch),
        (FinalPatch, StageEvent::Completed) => Ok(Done),
        (stage, event) => Err(PipelineError::InvalidTransition {
            stage,
            event: format!("{:?}", event),
        }),
    }
}

/// The three xdelta patches bundled with the tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSet {
    pub compat: Utf8PathBuf,
    pub align: Utf8PathBuf,
    pub final_patch: Utf8PathBuf,
}

/// Everything a run needs besides the source image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub toolchain: Toolchain,
    pub patches: PatchSet,
    pub builds: BuildTable,
    pub staging_root: Utf8PathBuf,
}

impl PipelineSettings {
    /// Resolve settings from the main config, relative paths against `base_dir`
    pub fn from_config(config: &MainConfig, base_dir: &Utf8Path) -> Result<Self, CodecError> {
        let data = &config.fuc_data;
        Ok(Self {
            toolchain: Toolchain::from_config(&data.tools, data.save_encrypt_mode, base_dir),
            patches: PatchSet {
                compat: base_dir.join(&data.patches.compat),
                align: base_dir.join(&data.patches.align),
                final_patch: base_dir.join(&data.patches.final_patch),
            },
            builds: BuildTable::from_hex(&data.known_hashes.umd, &data.known_hashes.psn)?,
            staging_root: base_dir.join(&data.staging_dir).join("patch"),
        })
    }
}

/// State owned by one run
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub source: Utf8PathBuf,
    pub stem: String,
    pub build: Option<KnownBuild>,
    /// Image the container is extracted from and spliced into
    pub working_image: Utf8PathBuf,
    working_artifact: Option<Artifact>,
    /// Delivered image, beside the source
    pub output: Utf8PathBuf,
    pub staging: StagingArea,
}

impl PipelineContext {
    pub fn new(source: &Utf8Path, staging_root: &Utf8Path) -> Self {
        let stem = source.file_stem().unwrap_or("image").to_string();
        let output = source
            .parent()
            .unwrap_or_else(|| Utf8Path::new(""))
            .join(format!("{}_FUC.iso", stem));

        Self {
            source: source.to_path_buf(),
            stem,
            build: None,
            working_image: source.to_path_buf(),
            working_artifact: None,
            output,
            staging: StagingArea::new(staging_root),
        }
    }
}

/// Summary of a successful run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub source: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub build: Option<KnownBuild>,
    /// Stages in the order they executed
    pub stages: Vec<PipelineStage>,
    pub elapsed: Duration,
}

/// Drives patch runs, one at a time
///
/// Turns an unmodified MHFU ISO into `<stem>_FUC.iso` beside it, delegating
/// every binary transformation to the external tools of the [`Toolchain`].
///
/// # Collaborators
///
/// - `invoker`: launches xdelta3, UMD-replace and the DATA.BIN cryptor. Tests
///   pass a fake that copies files instead.
/// - `settings`: tool and patch locations, the accepted digests and the
///   staging root (`temp/patch` by default).
/// - `state`: receives one `StageChanged` per stage and owns the guard that
///   refuses a second concurrent run.
///
/// # Files
///
/// The source image is only ever read. Intermediate files live in the
/// staging area under fixed names and are retired as soon as the next stage
/// has consumed them, so a successful run leaves the staging area empty. A
/// failed run leaves it as is; the next run clears it before starting.
pub struct PatchPipeline<I> {
    invoker: I,
    settings: PipelineSettings,
    state: StateManager,
}

impl<I: ToolInvoker> PatchPipeline<I> {
    pub fn new(invoker: I, settings: PipelineSettings, state: StateManager) -> Self {
        Self {
            invoker,
            settings,
            state,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Patch `source`, delivering `<stem>_FUC.iso` beside it.
    ///
    /// Runs `HashCheck`, then `CompatPatch` for the UMD build only, then
    /// `Extract`, `Decrypt`, `AlignPatch`, `Replace` and `FinalPatch`. Each
    /// stage starts only after the previous one succeeded.
    ///
    /// # Arguments
    /// * `source` - The ISO to patch. It is never modified.
    ///
    /// # Returns
    /// A [`PipelineReport`] with the output path, the detected build and the
    /// stages that ran.
    ///
    /// # Errors
    /// * [`PipelineError::Busy`] while another run is live
    /// * [`PipelineError::UnrecognizedImage`] when the MD5 matches neither
    ///   known dump; no tool is invoked
    /// * [`PipelineError::AlreadyDecrypted`] when the ISO carries a plaintext DATA.BIN
    /// * [`PipelineError::ToolFailed`] when a tool exits nonzero
    pub async fn run(&self, source: &Utf8Path) -> Result<PipelineReport, PipelineError> {
        let Some(_guard) = self.state.try_begin(Flow::Patch, source) else {
            return Err(PipelineError::Busy);
        };

        let start = Instant::now();
        let mut ctx = PipelineContext::new(source, &self.settings.staging_root);
        let mut stages = Vec::new();

        match self.drive(&mut ctx, &mut stages).await {
            Ok(()) => {
                self.state.finish_patch(ctx.output.clone());
                tracing::info!("Patching done, patched ISO is located at: {}", ctx.output);
                Ok(PipelineReport {
                    source: ctx.source,
                    output: ctx.output,
                    build: ctx.build,
                    stages,
                    elapsed: start.elapsed(),
                })
            }
            Err(e) => {
                let failed_at = stages.last().copied().unwrap_or(PipelineStage::Idle);
                tracing::error!("Patching failed during {}: {}", failed_at, e);
                self.state.fail_patch(e.to_string());
                Err(e)
            }
        }
    }

    async fn drive(&self, ctx: &mut PipelineContext, stages: &mut Vec<PipelineStage>) -> Result<(), PipelineError> {
        ctx.staging.ensure_clean().map_err(|source| PipelineError::Staging {
            stage: PipelineStage::Idle,
            source,
        })?;

        let mut stage = transition(PipelineStage::Idle, StageEvent::Completed)?;
        while stage != PipelineStage::Done {
            self.state.set_stage(stage);
            stages.push(stage);
            tracing::info!("{}...", stage.describe());

            let event = self.execute(stage, ctx).await?;
            stage = transition(stage, event)?;
        }

        Ok(())
    }

    async fn execute(&self, stage: PipelineStage, ctx: &mut PipelineContext) -> Result<StageEvent, PipelineError> {
        let toolchain = &self.settings.toolchain;
        let patches = &self.settings.patches;

        match stage {
            PipelineStage::HashCheck => {
                let source = ctx.source.clone();
                let digest = blocking(stage, move || codec::hash_of(&source)).await?;

                match self.settings.builds.identify(&digest) {
                    Some(build) => {
                        tracing::info!("Valid {} ISO file.", build);
                        ctx.build = Some(build);
                        Ok(StageEvent::Identified(build))
                    }
                    None => {
                        tracing::error!("Invalid ISO, your dump should match one of the following md5 hashes:");
                        tracing::error!("UMD: {}", self.settings.builds.umd);
                        tracing::error!("PSN: {}", self.settings.builds.psn);
                        Ok(StageEvent::Unrecognized(digest))
                    }
                }
            }

            PipelineStage::CompatPatch => {
                let artifact = Artifact::NormalizedImage(ctx.stem.clone());
                let output = ctx.staging.path(&artifact);

                let command = toolchain.xdelta_apply(&ctx.source, &patches.compat, &output);
                self.run_tool(stage, &command).await?;
                require_artifact(stage, &output)?;

                ctx.working_image = output;
                ctx.working_artifact = Some(artifact);
                Ok(StageEvent::Completed)
            }

            PipelineStage::Extract => {
                let image = ctx.working_image.clone();
                let dest = ctx.staging.path(&Artifact::ExtractedContainer);
                blocking(stage, move || codec::extract_container(&image, DATA_BIN_PATH, &dest)).await?;
                Ok(StageEvent::Completed)
            }

            PipelineStage::Decrypt => self.decrypt(ctx).await,

            PipelineStage::AlignPatch => {
                let decrypted = ctx.staging.path(&Artifact::DecryptedContainer);
                let rebuilt = ctx.staging.path(&Artifact::RebuiltContainer);

                let command = toolchain.xdelta_apply(&decrypted, &patches.align, &rebuilt);
                self.run_tool(stage, &command).await?;
                require_artifact(stage, &rebuilt)?;

                retire(stage, &ctx.staging, &Artifact::ExtractedContainer)?;
                retire(stage, &ctx.staging, &Artifact::DecryptedContainer)?;
                Ok(StageEvent::Completed)
            }

            PipelineStage::Replace => {
                if ctx.working_artifact.is_none() {
                    // The splicer edits in place; never hand it the user's image
                    let artifact = Artifact::WorkingImage(ctx.stem.clone());
                    let source = ctx.source.clone();
                    let dest = ctx.staging.path(&artifact);
                    let copy_dest = dest.clone();
                    blocking(stage, move || {
                        fs::copy(&source, &copy_dest).map_err(CodecError::io(&copy_dest))
                    })
                    .await?;

                    ctx.working_image = dest;
                    ctx.working_artifact = Some(artifact);
                }

                let rebuilt = ctx.staging.path(&Artifact::RebuiltContainer);
                let command = toolchain.umd_replace(&ctx.working_image, DATA_BIN_PATH, &rebuilt);
                self.run_tool(stage, &command).await?;

                retire(stage, &ctx.staging, &Artifact::RebuiltContainer)?;
                Ok(StageEvent::Completed)
            }

            PipelineStage::FinalPatch => {
                let command = toolchain.xdelta_apply(&ctx.working_image, &patches.final_patch, &ctx.output);
                self.run_tool(stage, &command).await?;
                require_artifact(stage, &ctx.output)?;

                if let Some(artifact) = ctx.working_artifact.take() {
                    retire(stage, &ctx.staging, &artifact)?;
                }
                Ok(StageEvent::Completed)
            }

            PipelineStage::Idle | PipelineStage::Done | PipelineStage::Error => {
                Err(PipelineError::InvalidTransition {
                    stage,
                    event: "execute".to_string(),
                })
            }
        }
    }

    /// Decrypt the extracted container.
    ///
    /// A failed decryption of a container that already carries a plausible
    /// plaintext table is reported as [`PipelineError::AlreadyDecrypted`].
    /// This is a best-effort reading of the tool failure, not a contract of
    /// the tool. Partial output is always discarded.
    async fn decrypt(&self, ctx: &PipelineContext) -> Result<StageEvent, PipelineError> {
        let stage = PipelineStage::Decrypt;
        let input = ctx.staging.path(&Artifact::ExtractedContainer);
        let output = ctx.staging.path(&Artifact::DecryptedContainer);

        let command = self.settings.toolchain.data_bin_decrypt(&input, &output);
        let outcome = self
            .invoker
            .invoke(&command)
            .await
            .map_err(|source| PipelineError::Tool { stage, source })?;

        if outcome.success() && output.exists() {
            return Ok(StageEvent::Completed);
        }

        if retire(stage, &ctx.staging, &Artifact::DecryptedContainer)? {
            tracing::debug!("Discarded partial {}", output);
        }

        let probe = input.clone();
        let plaintext = blocking(stage, move || codec::data_bin::is_plausible_plaintext(&probe)).await?;
        if plaintext {
            tracing::error!("DATA.BIN is already decrypted");
            return Err(PipelineError::AlreadyDecrypted(input));
        }

        if outcome.success() {
            Err(PipelineError::MissingArtifact { stage, path: output })
        } else {
            Err(PipelineError::ToolFailed {
                stage,
                tool: outcome.tool,
                exit_code: outcome.exit_code,
            })
        }
    }

    async fn run_tool(&self, stage: PipelineStage, command: &ToolCommand) -> Result<ToolOutcome, PipelineError> {
        let outcome = self
            .invoker
            .invoke(command)
            .await
            .map_err(|source| PipelineError::Tool { stage, source })?;

        if !outcome.success() {
            return Err(PipelineError::ToolFailed {
                stage,
                tool: outcome.tool,
                exit_code: outcome.exit_code,
            });
        }
        Ok(outcome)
    }
}

/// Run file-bound codec work on a blocking worker
async fn blocking<T, F>(stage: PipelineStage, work: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, CodecError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|source| PipelineError::Task { stage, source })?
        .map_err(|source| PipelineError::Codec { stage, source })
}

fn require_artifact(stage: PipelineStage, path: &Utf8Path) -> Result<(), PipelineError> {
    if path.exists() {
        Ok(())
    } else {
        Err(PipelineError::MissingArtifact {
            stage,
            path: path.to_path_buf(),
        })
    }
}

fn retire(stage: PipelineStage, staging: &StagingArea, artifact: &Artifact) -> Result<bool, PipelineError> {
    staging
        .retire(artifact)
        .map_err(|source| PipelineError::Staging { stage, source })
}
