//! Binary formats handled in-process.
//!
//! - [`hash`]: MD5 digest of a disc image and the table of accepted builds
//! - [`iso`]: ISO 9660 lookup and extraction of `DATA.BIN`
//! - [`data_bin`]: entry table of a decrypted `DATA.BIN`, dump and rename
//! - [`save`]: the quest slot region of a decrypted save
//!
//! Nothing here launches processes or touches the staging area; callers run
//! the file-bound functions on blocking workers.

pub mod data_bin;
pub mod hash;
pub mod iso;
pub mod save;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

pub use data_bin::{ContainerEntry, dump_container, rename_dump_files};
pub use hash::{BuildTable, DiscDigest, KnownBuild, hash_of};
pub use iso::{DATA_BIN_PATH, extract_container};
pub use save::{decode_record, read_slots_from_save, write_slots_to_save};

/// Errors raised while reading or writing the binary formats
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{logical_path} not found in {image}: {reason}")]
    ContainerNotFound {
        image: Utf8PathBuf,
        logical_path: String,
        reason: String,
    },

    #[error("{0} is not decrypted")]
    NotDecrypted(Utf8PathBuf),

    #[error("Dump directory {output_dir} contains the input {input}")]
    OutputContainsInput {
        input: Utf8PathBuf,
        output_dir: Utf8PathBuf,
    },

    #[error("Invalid MD5 digest: {0}")]
    InvalidDigest(String),

    #[error("known_hashes.{0} is not configured, set it to the MD5 of your {0} dump in FUCTool.yaml")]
    DigestNotConfigured(&'static str),

    #[error("Save image is {actual} bytes, the quest region needs {required}")]
    SaveTooShort { actual: usize, required: usize },

    #[error("Quest payload is {actual} bytes, a slot holds {max}")]
    PayloadTooLarge { actual: usize, max: usize },

    #[error("Quest title pointer {pointer:#x} is outside the payload")]
    BadTitlePointer { pointer: u32 },

    #[error("Expected {expected} quest slots, got {actual}")]
    SlotCount { expected: usize, actual: usize },
}

impl CodecError {
    pub(crate) fn io(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> CodecError + '_ {
        move |source| CodecError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
