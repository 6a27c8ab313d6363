use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use thiserror::Error;

/// Scratch files a flow writes into its staging area.
///
/// Every artifact has a fixed file name, so a path is always derivable from
/// the artifact alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Output of the compat patch, named after the source image stem
    NormalizedImage(String),
    /// Copy of the source image that the splicer may modify
    WorkingImage(String),
    ExtractedContainer,
    DecryptedContainer,
    RebuiltContainer,
    PlainSave,
    TemporarySave,
    TemporaryMetadata,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        match self {
            Artifact::NormalizedImage(stem) => format!("{}_compat.iso", stem),
            Artifact::WorkingImage(stem) => format!("{}_work.iso", stem),
            Artifact::ExtractedContainer => "DATA.BIN".to_string(),
            Artifact::DecryptedContainer => "DATA.BIN.DEC".to_string(),
            Artifact::RebuiltContainer => "DATA.BIN.NEW".to_string(),
            Artifact::PlainSave => "MHP2NDG.BIN.DEC".to_string(),
            Artifact::TemporarySave => "MHP2NDG.BIN.TEMP".to_string(),
            Artifact::TemporaryMetadata => "PARAM.SFO.TEMP".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Staging I/O error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One ephemeral working directory owned by a single flow run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingArea {
    root: Utf8PathBuf,
}

impl StagingArea {
    pub fn new<P: AsRef<Utf8Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Remove the directory with everything in it, then recreate it empty.
    pub fn ensure_clean(&self) -> Result<(), StagingError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|source| StagingError::Io {
                path: self.root.clone(),
                source,
            })?;
            tracing::debug!("Cleared staging area {}", self.root);
        }

        fs::create_dir_all(&self.root).map_err(|source| StagingError::Io {
            path: self.root.clone(),
            source,
        })
    }

    pub fn path(&self, artifact: &Artifact) -> Utf8PathBuf {
        self.root.join(artifact.file_name())
    }

    pub fn contains(&self, artifact: &Artifact) -> bool {
        self.path(artifact).exists()
    }

    /// Delete a superseded artifact. Returns whether a file was removed.
    pub fn retire(&self, artifact: &Artifact) -> Result<bool, StagingError> {
        let path = self.path(artifact);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Retired {}", path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StagingError::Io { path, source }),
        }
    }

    /// File names currently in the staging area, sorted
    pub fn list(&self) -> Result<Vec<String>, StagingError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries = self.root.read_dir_utf8().map_err(|source| StagingError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StagingError::Io {
                path: self.root.clone(),
                source,
            })?;
            names.push(entry.file_name().to_string());
        }
        names.sort();
        Ok(names)
    }

    pub fn is_empty(&self) -> Result<bool, StagingError> {
        Ok(self.list()?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn staging() -> (StagingArea, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().join("temp")).unwrap();
        (StagingArea::new(root), temp_dir)
    }

    #[test]
    fn test_ensure_clean_creates_and_clears() {
        let (area, _temp_dir) = staging();
        assert!(!area.root().exists());

        area.ensure_clean().unwrap();
        assert!(area.root().exists());

        fs::write(area.path(&Artifact::ExtractedContainer), b"stale").unwrap();
        fs::create_dir(area.root().join("nested")).unwrap();
        area.ensure_clean().unwrap();

        assert!(area.is_empty().unwrap());
    }

    #[test]
    fn test_artifact_names() {
        let (area, _temp_dir) = staging();
        assert_eq!(
            area.path(&Artifact::NormalizedImage("MHFU".to_string())),
            area.root().join("MHFU_compat.iso")
        );
        assert_eq!(Artifact::DecryptedContainer.file_name(), "DATA.BIN.DEC");
        assert_eq!(Artifact::TemporaryMetadata.file_name(), "PARAM.SFO.TEMP");
    }

    #[test]
    fn test_retire() {
        let (area, _temp_dir) = staging();
        area.ensure_clean().unwrap();
        fs::write(area.path(&Artifact::RebuiltContainer), b"data").unwrap();

        assert!(area.contains(&Artifact::RebuiltContainer));
        assert!(area.retire(&Artifact::RebuiltContainer).unwrap());
        assert!(!area.contains(&Artifact::RebuiltContainer));
        assert!(!area.retire(&Artifact::RebuiltContainer).unwrap());
    }

    #[test]
    fn test_list_missing_root() {
        let (area, _temp_dir) = staging();
        assert!(area.list().unwrap().is_empty());
    }
}
