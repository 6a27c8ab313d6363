use crate::codec::{self, CodecError};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DumpError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Dump task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result of a finished dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpReport {
    pub output_dir: Utf8PathBuf,
    pub files: Vec<Utf8PathBuf>,
}

/// Dump a decrypted DATA.BIN on a blocking worker.
///
/// Writes to `output_dir`, or `DATA.BIN_dump` beside the container when none
/// is given. Fails with [`CodecError::NotDecrypted`] for an encrypted input.
pub async fn dump_data_bin(
    container: &Utf8Path,
    output_dir: Option<&Utf8Path>,
    names: IndexMap<u32, String>,
) -> Result<DumpReport, DumpError> {
    let container = container.to_path_buf();
    let output_dir = output_dir
        .map(Utf8Path::to_path_buf)
        .unwrap_or_else(|| codec::data_bin::default_dump_dir(&container));

    tracing::info!("Dumping {} to {}", container, output_dir);
    let start = Instant::now();

    let dest = output_dir.clone();
    let result = tokio::task::spawn_blocking(move || codec::dump_container(&container, &dest, &names)).await?;

    match result {
        Ok(files) => {
            tracing::info!(
                "DATA.BIN dumped to {} ({} files, {:.2}s)",
                output_dir,
                files.len(),
                start.elapsed().as_secs_f32()
            );
            Ok(DumpReport { output_dir, files })
        }
        Err(e) => {
            tracing::error!("Dump failed: {}", e);
            Err(e.into())
        }
    }
}
