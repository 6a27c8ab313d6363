//! Shared fixtures: a minimal ISO 9660 writer, DATA.BIN and save builders,
//! and a tool invoker that fakes the external executables with file copies.

#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use fuctool::codec::save::{QUEST_BASE_OFFSET, QUEST_REGION_END, QUEST_SLOT_SIZE};
use fuctool::services::{Tool, ToolCommand, ToolError, ToolInvoker, ToolOutcome};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const SECTOR: usize = 2048;

const PVD_SECTOR: usize = 16;
const ROOT_SECTOR: usize = 18;
const PSP_GAME_SECTOR: usize = 19;
const USRDIR_SECTOR: usize = 20;
const DATA_SECTOR: usize = 21;

pub fn utf8_temp_dir() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, path)
}

fn dir_record(name: &[u8], extent: u32, size: u32, is_dir: bool) -> Vec<u8> {
    let mut len = 33 + name.len();
    if len % 2 == 1 {
        len += 1;
    }

    let mut record = vec![0u8; len];
    record[0] = len as u8;
    record[2..6].copy_from_slice(&extent.to_le_bytes());
    record[6..10].copy_from_slice(&extent.to_be_bytes());
    record[10..14].copy_from_slice(&size.to_le_bytes());
    record[14..18].copy_from_slice(&size.to_be_bytes());
    record[25] = if is_dir { 0x02 } else { 0x00 };
    record[28..30].copy_from_slice(&1u16.to_le_bytes());
    record[32] = name.len() as u8;
    record[33..33 + name.len()].copy_from_slice(name);
    record
}

fn write_directory(image: &mut [u8], sector: usize, parent: usize, children: &[Vec<u8>]) {
    let mut data = Vec::new();
    data.extend(dir_record(&[0], sector as u32, SECTOR as u32, true));
    data.extend(dir_record(&[1], parent as u32, SECTOR as u32, true));
    for child in children {
        data.extend_from_slice(child);
    }
    image[sector * SECTOR..sector * SECTOR + data.len()].copy_from_slice(&data);
}

/// An ISO 9660 image holding `/PSP_GAME/USRDIR/DATA.BIN;1` with `data_bin` as content
pub fn build_iso(data_bin: &[u8]) -> Vec<u8> {
    let mut image = vec![0u8; DATA_SECTOR * SECTOR];

    let pvd = &mut image[PVD_SECTOR * SECTOR..(PVD_SECTOR + 1) * SECTOR];
    pvd[0] = 0x01;
    pvd[1..6].copy_from_slice(b"CD001");
    pvd[6] = 0x01;
    pvd[128..130].copy_from_slice(&(SECTOR as u16).to_le_bytes());
    pvd[130..132].copy_from_slice(&(SECTOR as u16).to_be_bytes());
    let root = dir_record(&[0], ROOT_SECTOR as u32, SECTOR as u32, true);
    pvd[156..156 + root.len()].copy_from_slice(&root);

    let terminator = &mut image[(PVD_SECTOR + 1) * SECTOR..(PVD_SECTOR + 2) * SECTOR];
    terminator[0] = 0xff;
    terminator[1..6].copy_from_slice(b"CD001");
    terminator[6] = 0x01;

    write_directory(
        &mut image,
        ROOT_SECTOR,
        ROOT_SECTOR,
        &[dir_record(b"PSP_GAME", PSP_GAME_SECTOR as u32, SECTOR as u32, true)],
    );
    write_directory(
        &mut image,
        PSP_GAME_SECTOR,
        ROOT_SECTOR,
        &[dir_record(b"USRDIR", USRDIR_SECTOR as u32, SECTOR as u32, true)],
    );
    write_directory(
        &mut image,
        USRDIR_SECTOR,
        PSP_GAME_SECTOR,
        &[dir_record(b"DATA.BIN;1", DATA_SECTOR as u32, data_bin.len() as u32, false)],
    );

    image.extend_from_slice(data_bin);
    image.resize(image.len().div_ceil(SECTOR) * SECTOR, 0);
    image
}

/// A decrypted DATA.BIN with one entry per slice, each starting on its own sector
pub fn build_container(entries: &[&[u8]]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&(entries.len() as u32).to_le_bytes());

    let mut sector = 1u32;
    let mut layout = Vec::new();
    for entry in entries {
        data.extend_from_slice(&sector.to_le_bytes());
        data.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        layout.push(sector);
        sector += entry.len().div_ceil(SECTOR).max(1) as u32;
    }
    for (entry, sector) in entries.iter().zip(layout) {
        data.resize(sector as usize * SECTOR, 0);
        data.extend_from_slice(entry);
    }
    data
}

/// Bytes that never parse as an entry table
pub fn encrypted_container(len: usize) -> Vec<u8> {
    let mut data: Vec<u8> = (0..len as u32)
        .map(|i| (i.wrapping_mul(2654435761) >> 24) as u8)
        .collect();
    data[..4].copy_from_slice(&u32::MAX.to_le_bytes());
    data
}

/// A quest file with `id` and an ASCII title at offset 0x40
pub fn quest_payload(id: u16, title: &str) -> Vec<u8> {
    let mut data = vec![0u8; 0x100];
    data[0..2].copy_from_slice(&id.to_le_bytes());
    data[4..8].copy_from_slice(&0x40u32.to_le_bytes());
    data[0x40..0x40 + title.len()].copy_from_slice(title.as_bytes());
    data
}

/// A plaintext save with `quests` in the first slots and a fixed pattern around the slot region
pub fn build_save(quests: &[Vec<u8>]) -> Vec<u8> {
    let mut save: Vec<u8> = (0..QUEST_REGION_END + 0x80).map(|i| (i % 249) as u8 + 1).collect();
    save[QUEST_BASE_OFFSET..QUEST_REGION_END].fill(0);
    for (slot, quest) in quests.iter().enumerate() {
        let start = QUEST_BASE_OFFSET + slot * QUEST_SLOT_SIZE;
        save[start..start + quest.len()].copy_from_slice(quest);
    }
    save
}

/// What the fake DATA.BIN cryptor does
#[derive(Clone, Debug)]
pub enum DecryptBehavior {
    /// Exit 0 and write these bytes
    Produce(Vec<u8>),
    /// Exit 1 after writing a few bytes of garbage
    Fail,
}

/// [`ToolInvoker`] standing in for xdelta3, UMD-replace, psp-save and the cryptor.
///
/// xdelta copies its source to its output, psp-save treats encryption as the
/// identity, UMD-replace checks its inputs exist. Every call is recorded.
#[derive(Clone)]
pub struct FakeInvoker {
    calls: Arc<Mutex<Vec<ToolCommand>>>,
    decrypt: DecryptBehavior,
    failing: Option<(Tool, String)>,
}

impl FakeInvoker {
    pub fn new(decrypt: DecryptBehavior) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            decrypt,
            failing: None,
        }
    }

    /// Exit 1 for `tool` when its first argument is `first_arg`, without touching files
    pub fn failing(mut self, tool: Tool, first_arg: &str) -> Self {
        self.failing = Some((tool, first_arg.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<ToolCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tools_called(&self) -> Vec<Tool> {
        self.calls().into_iter().map(|c| c.tool).collect()
    }

    fn outcome(tool: Tool, exit_code: i32) -> ToolOutcome {
        ToolOutcome {
            tool,
            exit_code: Some(exit_code),
            duration: Duration::from_millis(1),
        }
    }

    fn io(tool: Tool, program: &Utf8Path, source: std::io::Error) -> ToolError {
        ToolError::Spawn {
            tool,
            program: program.to_path_buf(),
            source,
        }
    }
}

impl ToolInvoker for FakeInvoker {
    async fn invoke(&self, command: &ToolCommand) -> Result<ToolOutcome, ToolError> {
        self.calls.lock().unwrap().push(command.clone());

        let tool = command.tool;
        let args = &command.args;
        let fail = |e| Self::io(tool, &command.program, e);

        if let Some((failing_tool, first_arg)) = &self.failing {
            if *failing_tool == tool && args.first() == Some(first_arg) {
                return Ok(Self::outcome(tool, 1));
            }
        }

        match tool {
            Tool::Xdelta => {
                fs::copy(&args[2], &args[4]).map_err(fail)?;
            }
            Tool::DataBinCrypt => match &self.decrypt {
                DecryptBehavior::Produce(bytes) => fs::write(&args[2], bytes).map_err(fail)?,
                DecryptBehavior::Fail => {
                    fs::write(&args[2], b"partial").map_err(fail)?;
                    return Ok(Self::outcome(tool, 1));
                }
            },
            Tool::UmdReplace => {
                if !Utf8Path::new(&args[0]).exists() || !Utf8Path::new(&args[2]).exists() {
                    return Ok(Self::outcome(tool, 2));
                }
            }
            Tool::PspSave => match args[0].as_str() {
                "-d" => {
                    fs::copy(&args[3], &args[4]).map_err(fail)?;
                }
                "-e" => {
                    fs::copy(&args[4], &args[5]).map_err(fail)?;
                }
                _ => return Ok(Self::outcome(tool, 1)),
            },
        }

        Ok(Self::outcome(tool, 0))
    }
}
