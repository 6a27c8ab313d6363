//! Quest save editing.
//!
//! A [`SaveEditor`] opens one save folder at a time. [`SaveEditor::load`]
//! decrypts the save into a [`QuestSession`] holding the 18 slots; the session
//! is edited in memory and written back only by [`SaveEditor::persist`].
//! Quest files live in a folder pool as `m<id>.mib.dec`.

use crate::codec::{self, CodecError};
use crate::models::config::find_region;
use crate::models::{QuestRecord, RegionConfig, SaveContainer, SlotError};
use crate::services::staging::{Artifact, StagingArea, StagingError};
use crate::services::tools::{Tool, ToolCommand, ToolError, ToolInvoker, Toolchain};
use crate::state::{Flow, FlowGuard, StateManager};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use regex::Regex;
use std::fs;
use std::sync::LazyLock;
use thiserror::Error;

pub const SAVE_FILE_NAME: &str = "MHP2NDG.BIN";
pub const SAVE_METADATA_NAME: &str = "PARAM.SFO";
pub const SAVE_BACKUP_NAME: &str = "MHP2NDG.BIN.BAK";

static PRODUCT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"UL[A-Z]{2}\d{5}").expect("Invalid product code regex"));

static POOL_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^m(\d+)\.mib\.dec$").expect("Invalid quest file regex"));

#[derive(Error, Debug)]
pub enum QuestError {
    #[error("A save is already open")]
    Busy,

    #[error("No known region in save folder name {0}")]
    UnrecognizedRegion(Utf8PathBuf),

    #[error("Save folder is missing {0}")]
    MissingCompanionFile(Utf8PathBuf),

    #[error(transparent)]
    Slots(#[from] SlotError),

    #[error("{tool} exited with code {exit_code:?}")]
    ToolFailed { tool: Tool, exit_code: Option<i32> },

    #[error("{tool} did not produce {path}")]
    MissingArtifact { tool: Tool, path: Utf8PathBuf },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> QuestError + '_ {
    move |source| QuestError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Release a save belongs to, resolved from the folder's product code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub product_code: String,
    pub name: String,
    pub key_file: Utf8PathBuf,
    pub mode: u8,
}

/// First product code (`UL` + two letters + five digits) in a folder name
pub fn product_code(folder_name: &str) -> Option<&str> {
    PRODUCT_CODE.find(folder_name).map(|m| m.as_str())
}

/// A PSP save folder holding `MHP2NDG.BIN` and `PARAM.SFO`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveFolder {
    dir: Utf8PathBuf,
    region: Region,
}

impl SaveFolder {
    /// Validate `dir` and resolve its region. Key files are looked up in `keys_dir`.
    pub fn open(
        dir: &Utf8Path,
        regions: &IndexMap<String, RegionConfig>,
        keys_dir: &Utf8Path,
    ) -> Result<Self, QuestError> {
        let folder_name = dir.file_name().unwrap_or_default();
        let (code, config) = product_code(folder_name)
            .and_then(|code| find_region(regions, code).map(|config| (code, config)))
            .ok_or_else(|| QuestError::UnrecognizedRegion(dir.to_path_buf()))?;

        for name in [SAVE_FILE_NAME, SAVE_METADATA_NAME] {
            let path = dir.join(name);
            if !path.is_file() {
                return Err(QuestError::MissingCompanionFile(path));
            }
        }

        tracing::info!("Opened {} save folder {}", config.name, dir);

        Ok(Self {
            dir: dir.to_path_buf(),
            region: Region {
                product_code: code.to_string(),
                name: config.name.clone(),
                key_file: keys_dir.join(&config.key_file),
                mode: config.mode,
            },
        })
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn save_path(&self) -> Utf8PathBuf {
        self.dir.join(SAVE_FILE_NAME)
    }

    pub fn metadata_path(&self) -> Utf8PathBuf {
        self.dir.join(SAVE_METADATA_NAME)
    }

    pub fn backup_path(&self) -> Utf8PathBuf {
        self.dir.join(SAVE_BACKUP_NAME)
    }
}

/// An opened save. Holds the save flow until dropped.
pub struct QuestSession {
    folder: SaveFolder,
    container: SaveContainer,
    plaintext: Vec<u8>,
    state: StateManager,
    _guard: FlowGuard,
}

impl QuestSession {
    pub fn folder(&self) -> &SaveFolder {
        &self.folder
    }

    pub fn container(&self) -> &SaveContainer {
        &self.container
    }

    /// Decrypted save bytes the slots were read from
    pub fn plaintext(&self) -> &[u8] {
        &self.plaintext
    }

    pub fn add_from_pool(&mut self, records: &[QuestRecord]) -> Result<(), QuestError> {
        if let Err(e) = self.container.add_from_pool(records) {
            tracing::error!("Cannot add quests to save: {}", e);
            return Err(e.into());
        }
        self.state.set_occupied_slots(self.container.occupied_count());
        Ok(())
    }

    pub fn remove_at(&mut self, indices: &[usize]) -> Vec<QuestRecord> {
        let removed = self.container.remove_at(indices);
        self.state.set_occupied_slots(self.container.occupied_count());
        removed
    }
}

/// Loads and writes back quest saves through psp-save
///
/// Editing is split in three steps so nothing reaches the save folder by
/// accident:
///
/// 1. [`load`](Self::load) backs up `MHP2NDG.BIN`, decrypts it into the
///    staging area (`temp/save` by default) and decodes the 18 quest slots.
/// 2. The returned [`QuestSession`] is edited in memory.
/// 3. [`persist`](Self::persist) re-encodes, encrypts and installs the save.
///
/// Only one session may be open at a time; it holds the save flow of the
/// [`StateManager`] until dropped.
pub struct SaveEditor<I> {
    invoker: I,
    toolchain: Toolchain,
    staging: StagingArea,
    state: StateManager,
}

impl<I: ToolInvoker> SaveEditor<I> {
    pub fn new(invoker: I, toolchain: Toolchain, staging_root: &Utf8Path, state: StateManager) -> Self {
        Self {
            invoker,
            toolchain,
            staging: StagingArea::new(staging_root),
            state,
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Back up, decrypt and decode the save in `folder`.
    ///
    /// `MHP2NDG.BIN.BAK` is refreshed from the current save before anything
    /// else happens. The save itself is never written here.
    ///
    /// # Arguments
    /// * `folder` - A validated save folder, see [`SaveFolder::open`]
    ///
    /// # Returns
    /// An open [`QuestSession`]. The save flow stays claimed until it is dropped.
    ///
    /// # Errors
    /// * [`QuestError::Busy`] while another session is open
    /// * [`QuestError::ToolFailed`] when psp-save cannot decrypt the save
    /// * [`QuestError::Codec`] when the decrypted save is too short for 18 slots
    pub async fn load(&self, folder: SaveFolder) -> Result<QuestSession, QuestError> {
        let Some(guard) = self.state.try_begin(Flow::Save, folder.dir()) else {
            return Err(QuestError::Busy);
        };

        match self.decrypt_save(&folder).await {
            Ok((container, plaintext)) => {
                tracing::info!(
                    "Loaded save with {} quest(s) from {}",
                    container.occupied_count(),
                    folder.dir()
                );
                self.state.set_occupied_slots(container.occupied_count());
                Ok(QuestSession {
                    folder,
                    container,
                    plaintext,
                    state: self.state.clone(),
                    _guard: guard,
                })
            }
            Err(e) => {
                tracing::error!("Failed to load save {}: {}", folder.dir(), e);
                self.state.fail_save(e.to_string());
                Err(e)
            }
        }
    }

    async fn decrypt_save(&self, folder: &SaveFolder) -> Result<(SaveContainer, Vec<u8>), QuestError> {
        let save = folder.save_path();
        let backup = folder.backup_path();
        tokio::fs::copy(&save, &backup).await.map_err(io_error(&backup))?;
        tracing::info!("Backed up save to {}", backup);

        self.staging.ensure_clean()?;
        self.state.set_operation("Decrypting save");

        let region = folder.region();
        let plain = self.staging.path(&Artifact::PlainSave);
        let command = self.toolchain.save_decrypt(&region.key_file, region.mode, &save, &plain);
        self.run_tool(&command, &plain).await?;

        let plaintext = tokio::fs::read(&plain).await.map_err(io_error(&plain))?;
        let container = codec::read_slots_from_save(&plaintext)?;
        Ok((container, plaintext))
    }

    /// Encode the session, encrypt it and install it into the save folder.
    ///
    /// The slots are written into the decrypted bytes the session was loaded
    /// from, so everything outside the quest region is kept. psp-save encrypts
    /// the result and produces a matching `PARAM.SFO`.
    ///
    /// The folder is only written after psp-save reported success. Both files
    /// are copied beside their targets first and then renamed into place. On
    /// failure the error log names the `.BAK` backup taken by `load`.
    ///
    /// # Arguments
    /// * `session` - The session returned by [`load`](Self::load)
    ///
    /// # Errors
    /// * [`QuestError::ToolFailed`] / [`QuestError::MissingArtifact`] when
    ///   encryption fails; the folder is untouched
    /// * [`QuestError::Io`] when installing the files fails
    pub async fn persist(&self, session: &QuestSession) -> Result<(), QuestError> {
        match self.encrypt_save(session).await {
            Ok(()) => {
                tracing::info!("Saved {} quest(s) to {}", session.container.occupied_count(), session.folder.dir());
                self.state.set_operation("Save written");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to write save {}: {}", session.folder.dir(), e);
                tracing::error!("The save as loaded is kept at {}", session.folder.backup_path());
                self.state.fail_save(e.to_string());
                Err(e)
            }
        }
    }

    async fn encrypt_save(&self, session: &QuestSession) -> Result<(), QuestError> {
        let folder = &session.folder;
        let bytes = codec::write_slots_to_save(&session.plaintext, &session.container)?;

        fs::create_dir_all(self.staging.root()).map_err(io_error(self.staging.root()))?;
        let temp_save = self.staging.path(&Artifact::TemporarySave);
        tokio::fs::write(&temp_save, &bytes).await.map_err(io_error(&temp_save))?;

        self.state.set_operation("Encrypting save");
        let temp_metadata = self.staging.path(&Artifact::TemporaryMetadata);
        let command = self.toolchain.save_encrypt(
            &folder.region().key_file,
            &temp_save,
            &folder.metadata_path(),
            &temp_metadata,
        );
        self.run_tool(&command, &temp_metadata).await?;

        install(&[(temp_save, folder.save_path()), (temp_metadata, folder.metadata_path())]).await?;

        for artifact in [Artifact::TemporarySave, Artifact::TemporaryMetadata, Artifact::PlainSave] {
            self.staging.retire(&artifact)?;
        }
        Ok(())
    }

    async fn run_tool(&self, command: &ToolCommand, expected: &Utf8Path) -> Result<(), QuestError> {
        let outcome = self.invoker.invoke(command).await?;
        if !outcome.success() {
            return Err(QuestError::ToolFailed {
                tool: outcome.tool,
                exit_code: outcome.exit_code,
            });
        }
        if !expected.exists() {
            return Err(QuestError::MissingArtifact {
                tool: outcome.tool,
                path: expected.to_path_buf(),
            });
        }
        Ok(())
    }
}

/// Copy each source next to its destination as `<name>.NEW`, then rename
/// them all into place. Nothing is replaced unless every copy succeeded.
async fn install(files: &[(Utf8PathBuf, Utf8PathBuf)]) -> Result<(), QuestError> {
    let mut staged = Vec::with_capacity(files.len());
    for (source, dest) in files {
        let pending = dest.with_file_name(format!("{}.NEW", dest.file_name().unwrap_or_default()));
        if let Err(e) = tokio::fs::copy(source, &pending).await {
            for (leftover, _) in &staged {
                let _ = tokio::fs::remove_file(leftover).await;
            }
            return Err(io_error(&pending)(e));
        }
        staged.push((pending, dest));
    }

    for (pending, dest) in staged {
        tokio::fs::rename(&pending, dest).await.map_err(io_error(dest))?;
    }
    Ok(())
}

/// A quest file found in the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub path: Utf8PathBuf,
    pub record: QuestRecord,
}

/// Quest files of the pool directory, sorted by quest id
#[derive(Debug, Clone, Default)]
pub struct QuestPool {
    entries: Vec<PoolEntry>,
}

impl QuestPool {
    /// Read every `m<id>.mib.dec` in `dir`. Unreadable or malformed files are skipped.
    pub fn scan(dir: &Utf8Path) -> Result<Self, QuestError> {
        if !dir.exists() {
            tracing::warn!("Quest folder {} does not exist", dir);
            return Ok(Self::default());
        }

        let mut entries = Vec::new();
        for dir_entry in dir.read_dir_utf8().map_err(io_error(dir))? {
            let dir_entry = dir_entry.map_err(io_error(dir))?;
            if !POOL_FILE.is_match(dir_entry.file_name()) {
                continue;
            }

            let path = dir_entry.path().to_path_buf();
            let record = fs::read(&path)
                .map_err(CodecError::io(&path))
                .and_then(|bytes| codec::decode_record(&bytes));
            match record {
                Ok(record) if !record.is_empty() => entries.push(PoolEntry { path, record }),
                Ok(_) => tracing::warn!("Skipping empty quest file {}", path),
                Err(e) => tracing::warn!("Skipping quest file {}: {}", path, e),
            }
        }

        entries.sort_by(|a, b| a.record.id().cmp(b.record.id()));
        tracing::debug!("Found {} quest file(s) in {}", entries.len(), dir);
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&QuestRecord> {
        self.entries
            .iter()
            .find(|entry| entry.record.id() == id)
            .map(|entry| &entry.record)
    }

    /// Records for `ids` in the given order; unknown ids are returned separately
    pub fn select(&self, ids: &[String]) -> (Vec<QuestRecord>, Vec<String>) {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for id in ids {
            match self.find(id) {
                Some(record) => found.push(record.clone()),
                None => missing.push(id.clone()),
            }
        }
        (found, missing)
    }
}

/// Decides whether an existing pool file may be replaced
#[cfg_attr(test, mockall::automock)]
pub trait OverwritePolicy {
    fn confirm_overwrite(&mut self, path: &Utf8Path) -> bool;
}

impl<F> OverwritePolicy for F
where
    F: FnMut(&Utf8Path) -> bool,
{
    fn confirm_overwrite(&mut self, path: &Utf8Path) -> bool {
        self(path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub written: Vec<Utf8PathBuf>,
    pub skipped: Vec<Utf8PathBuf>,
}

/// Write records to the pool as `m<id>.mib.dec`.
///
/// Empty records are ignored. When a file for the quest already exists,
/// `policy` decides whether it is replaced; the command line asks the user
/// unless `--overwrite` or `--keep` was given.
///
/// # Arguments
/// * `records` - Quests to export, usually taken from a loaded session
/// * `dir` - The pool directory, created if missing
/// * `policy` - Asked once per existing file
///
/// # Returns
/// An [`ExportReport`] listing written and kept files
pub fn export_to_pool<P: OverwritePolicy + ?Sized>(
    records: &[QuestRecord],
    dir: &Utf8Path,
    policy: &mut P,
) -> Result<ExportReport, QuestError> {
    fs::create_dir_all(dir).map_err(io_error(dir))?;

    let mut report = ExportReport::default();
    for record in records.iter().filter(|record| !record.is_empty()) {
        let path = dir.join(record.pool_file_name());
        if path.exists() && !policy.confirm_overwrite(&path) {
            tracing::info!("Kept existing {}", path);
            report.skipped.push(path);
            continue;
        }

        fs::write(&path, record.payload()).map_err(io_error(&path))?;
        tracing::info!("Exported quest {} to {}", record.id(), path);
        report.written.push(path);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::save::{QUEST_ID_OFFSET, QUEST_TITLE_POINTER_OFFSET};
    use tempfile::TempDir;

    fn regions() -> IndexMap<String, RegionConfig> {
        let mut regions = IndexMap::new();
        regions.insert(
            "ULUS10391".to_string(),
            RegionConfig {
                name: "US".to_string(),
                key_file: "FU.bin".to_string(),
                mode: 2,
            },
        );
        regions
    }

    fn quest_bytes(id: u16, title: &str) -> Vec<u8> {
        let mut data = vec![0u8; 0x100];
        data[QUEST_ID_OFFSET..QUEST_ID_OFFSET + 2].copy_from_slice(&id.to_le_bytes());
        data[QUEST_TITLE_POINTER_OFFSET..QUEST_TITLE_POINTER_OFFSET + 4].copy_from_slice(&0x20u32.to_le_bytes());
        data[0x20..0x20 + title.len()].copy_from_slice(title.as_bytes());
        data
    }

    fn utf8_dir(temp_dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_product_code_extraction() {
        assert_eq!(product_code("ULUS10391MHP2NDG"), Some("ULUS10391"));
        assert_eq!(product_code("save_ULJM05500_01"), Some("ULJM05500"));
        assert_eq!(product_code("NPUH10000"), None);
    }

    #[test]
    fn test_open_resolves_region() {
        let temp_dir = TempDir::new().unwrap();
        let dir = utf8_dir(&temp_dir).join("ULUS10391QST");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join(SAVE_FILE_NAME), b"save").unwrap();
        fs::write(dir.join(SAVE_METADATA_NAME), b"sfo").unwrap();

        let folder = SaveFolder::open(&dir, &regions(), Utf8Path::new("res")).unwrap();
        assert_eq!(folder.region().product_code, "ULUS10391");
        assert_eq!(folder.region().mode, 2);
        assert_eq!(folder.region().key_file, Utf8Path::new("res").join("FU.bin"));
    }

    #[test]
    fn test_open_rejects_unknown_region() {
        let temp_dir = TempDir::new().unwrap();
        let dir = utf8_dir(&temp_dir).join("ULES01213QST");
        fs::create_dir(&dir).unwrap();

        let result = SaveFolder::open(&dir, &regions(), Utf8Path::new("res"));
        assert!(matches!(result, Err(QuestError::UnrecognizedRegion(_))));
    }

    #[test]
    fn test_open_requires_param_sfo() {
        let temp_dir = TempDir::new().unwrap();
        let dir = utf8_dir(&temp_dir).join("ULUS10391QST");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join(SAVE_FILE_NAME), b"save").unwrap();

        match SaveFolder::open(&dir, &regions(), Utf8Path::new("res")) {
            Err(QuestError::MissingCompanionFile(path)) => assert!(path.ends_with(SAVE_METADATA_NAME)),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_scan_sorts_and_skips_malformed() {
        let temp_dir = TempDir::new().unwrap();
        let dir = utf8_dir(&temp_dir);
        fs::write(dir.join("m61002.mib.dec"), quest_bytes(61002, "Second")).unwrap();
        fs::write(dir.join("m61001.mib.dec"), quest_bytes(61001, "First")).unwrap();
        fs::write(dir.join("m99999.mib.dec"), vec![1u8; 0x2000]).unwrap();
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        let pool = QuestPool::scan(&dir).unwrap();
        let ids: Vec<&str> = pool.entries().iter().map(|entry| entry.record.id()).collect();
        assert_eq!(ids, vec!["61001", "61002"]);
        assert_eq!(pool.find("61002").unwrap().name(), "Second");

        let (found, missing) = pool.select(&["61002".to_string(), "1".to_string()]);
        assert_eq!(found.len(), 1);
        assert_eq!(missing, vec!["1".to_string()]);
    }

    #[test]
    fn test_export_asks_before_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let dir = utf8_dir(&temp_dir);
        let record = codec::decode_record(&quest_bytes(61001, "First")).unwrap();
        fs::write(dir.join("m61001.mib.dec"), b"old").unwrap();

        let mut policy = MockOverwritePolicy::new();
        policy
            .expect_confirm_overwrite()
            .withf(|path| path.ends_with("m61001.mib.dec"))
            .times(1)
            .return_const(false);

        let report = export_to_pool(&[record, QuestRecord::empty()], &dir, &mut policy).unwrap();
        assert!(report.written.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(fs::read(dir.join("m61001.mib.dec")).unwrap(), b"old");
    }

    #[test]
    fn test_export_overwrites_when_confirmed() {
        let temp_dir = TempDir::new().unwrap();
        let dir = utf8_dir(&temp_dir);
        let record = codec::decode_record(&quest_bytes(61001, "First")).unwrap();
        fs::write(dir.join("m61001.mib.dec"), b"old").unwrap();

        let mut always = |_: &Utf8Path| true;
        let report = export_to_pool(std::slice::from_ref(&record), &dir, &mut always).unwrap();

        assert_eq!(report.written, vec![dir.join("m61001.mib.dec")]);
        assert_eq!(fs::read(dir.join("m61001.mib.dec")).unwrap(), record.payload());
    }
}
