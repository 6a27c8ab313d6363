use super::CodecError;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};

/// Entry offsets in the table are counted in sectors of this size
pub const CONTAINER_SECTOR: u64 = 0x800;

const TABLE_HEADER_LEN: u64 = 4;
const TABLE_RECORD_LEN: u64 = 8;

/// One entry of a decrypted DATA.BIN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerEntry {
    pub index: u32,
    pub offset: u64,
    pub size: u64,
}

impl ContainerEntry {
    /// File name written by the dump before renaming
    pub fn raw_file_name(&self) -> String {
        format!("{:04}.bin", self.index)
    }
}

/// Read and sanity check the entry table.
///
/// Returns `None` when the header does not describe a table that fits the
/// file, which is what an encrypted container looks like.
fn read_table<R: Read + Seek>(reader: &mut R, file_len: u64) -> std::io::Result<Option<Vec<ContainerEntry>>> {
    if file_len < TABLE_HEADER_LEN {
        return Ok(None);
    }

    reader.seek(SeekFrom::Start(0))?;
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    let count = u32::from_le_bytes(header) as u64;

    let table_end = TABLE_HEADER_LEN + count * TABLE_RECORD_LEN;
    if count == 0 || table_end > file_len {
        return Ok(None);
    }

    let mut table = vec![0u8; (count * TABLE_RECORD_LEN) as usize];
    reader.read_exact(&mut table)?;

    let mut entries = Vec::with_capacity(count as usize);
    for (index, record) in table.chunks_exact(TABLE_RECORD_LEN as usize).enumerate() {
        let sector = u32::from_le_bytes([record[0], record[1], record[2], record[3]]) as u64;
        let size = u32::from_le_bytes([record[4], record[5], record[6], record[7]]) as u64;
        let offset = sector * CONTAINER_SECTOR;

        if size > 0 && (offset < table_end || offset + size > file_len) {
            return Ok(None);
        }
        entries.push(ContainerEntry {
            index: index as u32,
            offset,
            size,
        });
    }

    Ok(Some(entries))
}

/// Whether the container already carries a plausible plaintext entry table.
pub fn is_plausible_plaintext(path: &Utf8Path) -> Result<bool, CodecError> {
    let mut file = File::open(path).map_err(CodecError::io(path))?;
    let len = file.metadata().map_err(CodecError::io(path))?.len();
    Ok(read_table(&mut file, len).map_err(CodecError::io(path))?.is_some())
}

/// Entries of a decrypted container, or [`CodecError::NotDecrypted`].
pub fn read_entries(path: &Utf8Path) -> Result<Vec<ContainerEntry>, CodecError> {
    let mut file = File::open(path).map_err(CodecError::io(path))?;
    let len = file.metadata().map_err(CodecError::io(path))?.len();
    read_table(&mut file, len)
        .map_err(CodecError::io(path))?
        .ok_or_else(|| CodecError::NotDecrypted(path.to_path_buf()))
}

/// Default dump directory: `DATA.BIN_dump` beside the container
pub fn default_dump_dir(container: &Utf8Path) -> Utf8PathBuf {
    container
        .parent()
        .unwrap_or_else(|| Utf8Path::new("."))
        .join("DATA.BIN_dump")
}

/// Write every entry of a decrypted container to `output_dir`, then rename
/// the files to readable names.
///
/// An existing `output_dir` is removed first so stale entries never survive.
/// Fails with [`CodecError::OutputContainsInput`] before touching anything when
/// `output_dir` holds the container itself. Returns the final paths in entry order.
pub fn dump_container(
    decrypted: &Utf8Path,
    output_dir: &Utf8Path,
    names: &IndexMap<u32, String>,
) -> Result<Vec<Utf8PathBuf>, CodecError> {
    let entries = read_entries(decrypted)?;

    if output_dir.exists() {
        let input = decrypted.canonicalize_utf8().map_err(CodecError::io(decrypted))?;
        let existing = output_dir.canonicalize_utf8().map_err(CodecError::io(output_dir))?;
        if input.starts_with(&existing) {
            return Err(CodecError::OutputContainsInput {
                input,
                output_dir: existing,
            });
        }

        fs::remove_dir_all(output_dir).map_err(CodecError::io(output_dir))?;
        tracing::debug!("Removed stale dump directory {}", output_dir);
    }
    fs::create_dir_all(output_dir).map_err(CodecError::io(output_dir))?;

    let mut file = File::open(decrypted).map_err(CodecError::io(decrypted))?;
    for entry in &entries {
        let dest = output_dir.join(entry.raw_file_name());
        file.seek(SeekFrom::Start(entry.offset))
            .map_err(CodecError::io(decrypted))?;

        let mut writer = BufWriter::new(File::create(&dest).map_err(CodecError::io(&dest))?);
        let mut reader = (&mut file).take(entry.size);
        std::io::copy(&mut reader, &mut writer).map_err(CodecError::io(&dest))?;
        writer.flush().map_err(CodecError::io(&dest))?;
    }

    tracing::info!("Dumped {} entries to {}", entries.len(), output_dir);

    rename_dump_files(output_dir, names)
}

/// Extension guessed from the first bytes of an entry
fn sniff_extension(magic: &[u8]) -> &'static str {
    match magic {
        [b'M', b'I', b'G', b'.', ..] => "gim",
        [b'R', b'I', b'F', b'F', ..] => "at3",
        [b'P', b'S', b'M', b'F', ..] => "pmf",
        [b'T', b'M', b'H', b'0', ..] => "tmh",
        [b'P', b'A', b'K', 0, ..] => "pak",
        _ => "bin",
    }
}

/// Rename `NNNN.bin` files in a dump directory.
///
/// Entries listed in `names` take that name, everything else keeps its index
/// and gets an extension sniffed from its magic. A name that is already taken
/// leaves the file as is.
pub fn rename_dump_files(
    output_dir: &Utf8Path,
    names: &IndexMap<u32, String>,
) -> Result<Vec<Utf8PathBuf>, CodecError> {
    let mut raw_files: Vec<(u32, Utf8PathBuf)> = Vec::new();
    for dir_entry in output_dir.read_dir_utf8().map_err(CodecError::io(output_dir))? {
        let dir_entry = dir_entry.map_err(CodecError::io(output_dir))?;
        let index = dir_entry
            .file_name()
            .strip_suffix(".bin")
            .filter(|stem| stem.len() == 4)
            .and_then(|stem| stem.parse::<u32>().ok());
        if let Some(index) = index {
            raw_files.push((index, dir_entry.path().to_path_buf()));
        }
    }
    raw_files.sort_by_key(|(index, _)| *index);

    let mut renamed = Vec::with_capacity(raw_files.len());
    for (index, path) in raw_files {
        let target_name = match names.get(&index) {
            Some(name) => name.clone(),
            None => {
                let mut magic = [0u8; 4];
                let mut file = File::open(&path).map_err(CodecError::io(&path))?;
                let read = file.read(&mut magic).map_err(CodecError::io(&path))?;
                format!("{:04}.{}", index, sniff_extension(&magic[..read]))
            }
        };

        let target = output_dir.join(&target_name);
        if target == path {
            renamed.push(path);
            continue;
        }
        if target.exists() {
            tracing::warn!("Dump name {} already taken, keeping {}", target_name, path);
            renamed.push(path);
            continue;
        }

        fs::rename(&path, &target).map_err(CodecError::io(&path))?;
        renamed.push(target);
    }

    Ok(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn container(entries: &[&[u8]]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        let mut sector = 1u32;
        let mut layout = Vec::new();
        for entry in entries {
            data.extend_from_slice(&sector.to_le_bytes());
            data.extend_from_slice(&(entry.len() as u32).to_le_bytes());
            layout.push(sector);
            sector += (entry.len() as u64).div_ceil(CONTAINER_SECTOR).max(1) as u32;
        }
        for (entry, sector) in entries.iter().zip(layout) {
            data.resize(sector as usize * CONTAINER_SECTOR as usize, 0);
            data.extend_from_slice(entry);
        }
        data
    }

    #[test]
    fn test_read_table_plausible() {
        let data = container(&[b"MIG.00.1PSP", b"RIFFxxxx"]);
        let len = data.len() as u64;
        let entries = read_table(&mut Cursor::new(data), len).unwrap().unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].offset, CONTAINER_SECTOR);
        assert_eq!(entries[0].size, 11);
        assert_eq!(entries[1].offset, 2 * CONTAINER_SECTOR);
    }

    #[test]
    fn test_read_table_rejects_noise() {
        let noise: Vec<u8> = (0..8192u32).map(|i| (i.wrapping_mul(2654435761) >> 24) as u8).collect();
        let len = noise.len() as u64;
        assert!(read_table(&mut Cursor::new(noise), len).unwrap().is_none());
    }

    #[test]
    fn test_read_table_rejects_zero_entries() {
        let data = vec![0u8; 4096];
        assert!(read_table(&mut Cursor::new(data), 4096).unwrap().is_none());
    }

    #[test]
    fn test_sniff_extension() {
        assert_eq!(sniff_extension(b"MIG.00.1"), "gim");
        assert_eq!(sniff_extension(b"RIFF"), "at3");
        assert_eq!(sniff_extension(b"PSMF"), "pmf");
        assert_eq!(sniff_extension(b"\x00\x01"), "bin");
    }

    #[test]
    fn test_default_dump_dir() {
        let dir = default_dump_dir(Utf8Path::new("work/DATA.BIN.DEC"));
        assert_eq!(dir, Utf8PathBuf::from("work/DATA.BIN_dump"));
    }
}
