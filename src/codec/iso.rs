use super::CodecError;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};

/// Logical path of the game data container inside the UMD image
pub const DATA_BIN_PATH: &str = "/PSP_GAME/USRDIR/DATA.BIN";

const DEFAULT_BLOCK_SIZE: u64 = 2048;
const PVD_SECTOR: u64 = 16;
const ROOT_RECORD_OFFSET: usize = 156;
const ROOT_RECORD_LEN: usize = 34;
const FLAG_DIRECTORY: u8 = 0x02;

/// A parsed ISO 9660 directory record
#[derive(Debug, Clone, PartialEq, Eq)]
struct DirectoryRecord {
    extent: u32,
    size: u32,
    is_dir: bool,
    name: String,
}

/// Location of a file's bytes inside the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileExtent {
    pub offset: u64,
    pub size: u64,
}

fn parse_directory_record(data: &[u8]) -> Option<DirectoryRecord> {
    let len = *data.first()? as usize;
    if len < 34 || data.len() < len {
        return None;
    }

    let extent = u32::from_le_bytes(data[2..6].try_into().ok()?);
    let size = u32::from_le_bytes(data[10..14].try_into().ok()?);
    let flags = data[25];
    let name_len = data[32] as usize;
    if 33 + name_len > len {
        return None;
    }

    let raw_name = &data[33..33 + name_len];
    let name = match raw_name {
        [0] => ".".to_string(),
        [1] => "..".to_string(),
        _ => {
            let text = String::from_utf8_lossy(raw_name);
            let without_version = text.split(';').next().unwrap_or_default();
            without_version.trim_end_matches('.').to_string()
        }
    };

    Some(DirectoryRecord {
        extent,
        size,
        is_dir: flags & FLAG_DIRECTORY != 0,
        name,
    })
}

/// Read-only view of an ISO 9660 image
struct IsoImage {
    path: Utf8PathBuf,
    file: File,
    block_size: u64,
    image_len: u64,
    root: DirectoryRecord,
}

impl IsoImage {
    fn open(path: &Utf8Path, logical_path: &str) -> Result<Self, CodecError> {
        let not_found = |reason: &str| CodecError::ContainerNotFound {
            image: path.to_path_buf(),
            logical_path: logical_path.to_string(),
            reason: reason.to_string(),
        };

        let mut file = File::open(path).map_err(CodecError::io(path))?;
        let image_len = file.metadata().map_err(CodecError::io(path))?.len();

        if image_len < (PVD_SECTOR + 1) * DEFAULT_BLOCK_SIZE {
            return Err(not_found("image is too small to hold a volume descriptor"));
        }

        let mut pvd = vec![0u8; DEFAULT_BLOCK_SIZE as usize];
        file.seek(SeekFrom::Start(PVD_SECTOR * DEFAULT_BLOCK_SIZE))
            .map_err(CodecError::io(path))?;
        file.read_exact(&mut pvd).map_err(CodecError::io(path))?;

        if pvd[0] != 0x01 || &pvd[1..6] != b"CD001" {
            return Err(not_found("missing primary volume descriptor"));
        }

        let block_size = match u16::from_le_bytes([pvd[128], pvd[129]]) {
            0 => DEFAULT_BLOCK_SIZE,
            size => size as u64,
        };

        let root = parse_directory_record(&pvd[ROOT_RECORD_OFFSET..ROOT_RECORD_OFFSET + ROOT_RECORD_LEN])
            .ok_or_else(|| not_found("malformed root directory record"))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            block_size,
            image_len,
            root,
        })
    }

    fn extent_of(&self, record: &DirectoryRecord) -> Option<FileExtent> {
        let offset = record.extent as u64 * self.block_size;
        let size = record.size as u64;
        (offset + size <= self.image_len).then_some(FileExtent { offset, size })
    }

    fn read_directory(&mut self, dir: &DirectoryRecord) -> Result<Option<Vec<DirectoryRecord>>, CodecError> {
        let Some(extent) = self.extent_of(dir) else {
            return Ok(None);
        };

        let mut data = vec![0u8; extent.size as usize];
        self.file
            .seek(SeekFrom::Start(extent.offset))
            .map_err(CodecError::io(&self.path))?;
        self.file.read_exact(&mut data).map_err(CodecError::io(&self.path))?;

        let block = self.block_size as usize;
        let mut records = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            if data[pos] == 0 {
                // Records never straddle a sector; zero padding runs to the next one
                pos = (pos / block + 1) * block;
                continue;
            }
            match parse_directory_record(&data[pos..]) {
                Some(record) => {
                    pos += data[pos] as usize;
                    if record.name != "." && record.name != ".." {
                        records.push(record);
                    }
                }
                None => break,
            }
        }

        Ok(Some(records))
    }

    /// Resolve a slash separated path, case-insensitively, to a file extent
    fn locate(&mut self, logical_path: &str) -> Result<FileExtent, CodecError> {
        let image = self.path.clone();
        let not_found = |reason: String| CodecError::ContainerNotFound {
            image: image.clone(),
            logical_path: logical_path.to_string(),
            reason,
        };

        let components: Vec<&str> = logical_path.split('/').filter(|c| !c.is_empty()).collect();
        let Some((file_name, dirs)) = components.split_last() else {
            return Err(not_found("empty path".to_string()));
        };

        let mut current = self.root.clone();
        for dir in dirs {
            let entries = self
                .read_directory(&current)?
                .ok_or_else(|| not_found(format!("directory extent of {} is outside the image", current.name)))?;
            current = entries
                .into_iter()
                .find(|entry| entry.is_dir && entry.name.eq_ignore_ascii_case(dir))
                .ok_or_else(|| not_found(format!("directory {} is missing", dir)))?;
        }

        let entries = self
            .read_directory(&current)?
            .ok_or_else(|| not_found(format!("directory extent of {} is outside the image", current.name)))?;
        let record = entries
            .into_iter()
            .find(|entry| !entry.is_dir && entry.name.eq_ignore_ascii_case(file_name))
            .ok_or_else(|| not_found(format!("file {} is missing", file_name)))?;

        self.extent_of(&record)
            .ok_or_else(|| not_found("file extent is outside the image".to_string()))
    }

    fn copy_extent(&mut self, extent: FileExtent, dest: &Utf8Path) -> Result<u64, CodecError> {
        self.file
            .seek(SeekFrom::Start(extent.offset))
            .map_err(CodecError::io(&self.path))?;

        let out = File::create(dest).map_err(CodecError::io(dest))?;
        let mut writer = BufWriter::new(out);
        let mut reader = (&mut self.file).take(extent.size);
        let copied = std::io::copy(&mut reader, &mut writer).map_err(CodecError::io(dest))?;
        writer.flush().map_err(CodecError::io(dest))?;

        if copied != extent.size {
            return Err(CodecError::Io {
                path: self.path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("copied {} of {} bytes", copied, extent.size),
                ),
            });
        }
        Ok(copied)
    }
}

/// Locate a file inside an ISO 9660 image without copying it.
pub fn locate_file(image: &Utf8Path, logical_path: &str) -> Result<FileExtent, CodecError> {
    IsoImage::open(image, logical_path)?.locate(logical_path)
}

/// Copy the file at `logical_path` out of the image into `dest`.
///
/// Returns the number of bytes written.
pub fn extract_container(image: &Utf8Path, logical_path: &str, dest: &Utf8Path) -> Result<u64, CodecError> {
    let mut iso = IsoImage::open(image, logical_path)?;
    let extent = iso.locate(logical_path)?;
    let copied = iso.copy_extent(extent, dest)?;

    tracing::info!(
        "Extracted {} ({} bytes at {:#x}) to {}",
        logical_path,
        copied,
        extent.offset,
        dest
    );
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &[u8], extent: u32, size: u32, flags: u8) -> Vec<u8> {
        let len = 33 + name.len() + (name.len() + 1) % 2;
        let mut data = vec![0u8; len];
        data[0] = len as u8;
        data[2..6].copy_from_slice(&extent.to_le_bytes());
        data[6..10].copy_from_slice(&extent.to_be_bytes());
        data[10..14].copy_from_slice(&size.to_le_bytes());
        data[14..18].copy_from_slice(&size.to_be_bytes());
        data[25] = flags;
        data[32] = name.len() as u8;
        data[33..33 + name.len()].copy_from_slice(name);
        data
    }

    #[test]
    fn test_parse_file_record_strips_version() {
        let parsed = parse_directory_record(&record(b"DATA.BIN;1", 21, 4096, 0)).unwrap();
        assert_eq!(parsed.name, "DATA.BIN");
        assert_eq!(parsed.extent, 21);
        assert_eq!(parsed.size, 4096);
        assert!(!parsed.is_dir);
    }

    #[test]
    fn test_parse_directory_and_special_records() {
        let dir = parse_directory_record(&record(b"USRDIR", 20, 2048, FLAG_DIRECTORY)).unwrap();
        assert!(dir.is_dir);
        assert_eq!(dir.name, "USRDIR");

        let current = parse_directory_record(&record(&[0], 18, 2048, FLAG_DIRECTORY)).unwrap();
        assert_eq!(current.name, ".");
        let parent = parse_directory_record(&record(&[1], 18, 2048, FLAG_DIRECTORY)).unwrap();
        assert_eq!(parent.name, "..");
    }

    #[test]
    fn test_parse_truncated_record() {
        let full = record(b"EBOOT.BIN;1", 30, 10, 0);
        assert!(parse_directory_record(&full[..20]).is_none());
        assert!(parse_directory_record(&[]).is_none());
    }

    #[test]
    fn test_open_rejects_non_iso() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), vec![0u8; 40 * 2048]).unwrap();
        let path = Utf8PathBuf::try_from(temp_file.path().to_path_buf()).unwrap();

        let result = locate_file(&path, DATA_BIN_PATH);
        assert!(matches!(result, Err(CodecError::ContainerNotFound { .. })));
    }
}
