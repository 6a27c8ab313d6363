//! Option editor for the game's `config.bin`.
//!
//! Each [`ConfigOption`] names a byte offset and the labelled byte strings
//! that may be stored there. The current choice of an option is the first
//! value whose bytes match the file.

use crate::models::ConfigOption;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigBinError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{option}' writes {len} byte(s) at {offset:#x}, past the end of a {file_len} byte file")]
    OffsetOutOfRange {
        option: String,
        offset: usize,
        len: usize,
        file_len: usize,
    },

    #[error("'{option}' has no value {index} ({available} available)")]
    NoSuchValue {
        option: String,
        index: usize,
        available: usize,
    },

    #[error("Value '{label}' of '{option}' is not valid hex: {source}")]
    InvalidValueData {
        option: String,
        label: String,
        #[source]
        source: hex::FromHexError,
    },

    #[error("Got {actual} choice(s) for {expected} option(s)")]
    ChoiceCount { expected: usize, actual: usize },
}

/// Index of the value currently stored for each option.
///
/// `None` when no value matches or the option reaches past the file.
pub fn read_choices(bytes: &[u8], options: &[ConfigOption]) -> Vec<Option<usize>> {
    options
        .iter()
        .map(|option| {
            option.values.iter().position(|value| match value.bytes() {
                Ok(data) => bytes
                    .get(option.offset..option.offset + data.len())
                    .is_some_and(|current| current == data.as_slice()),
                Err(_) => false,
            })
        })
        .collect()
}

/// Store value `index` of `option` into `bytes`.
pub fn write_choice(bytes: &mut [u8], option: &ConfigOption, index: usize) -> Result<(), ConfigBinError> {
    let value = option.values.get(index).ok_or_else(|| ConfigBinError::NoSuchValue {
        option: option.description.clone(),
        index,
        available: option.values.len(),
    })?;

    let data = value.bytes().map_err(|source| ConfigBinError::InvalidValueData {
        option: option.description.clone(),
        label: value.label.clone(),
        source,
    })?;

    let file_len = bytes.len();
    let target = bytes
        .get_mut(option.offset..option.offset + data.len())
        .ok_or_else(|| ConfigBinError::OffsetOutOfRange {
            option: option.description.clone(),
            offset: option.offset,
            len: data.len(),
            file_len,
        })?;
    target.copy_from_slice(&data);

    tracing::debug!("{} -> {}", option.description, value.label);
    Ok(())
}

/// Current choices of the file at `path`
pub fn read_file_choices(path: &Utf8Path, options: &[ConfigOption]) -> Result<Vec<Option<usize>>, ConfigBinError> {
    let bytes = fs::read(path).map_err(|source| ConfigBinError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(read_choices(&bytes, options))
}

/// Write one choice per option back to `path`. `None` leaves an option untouched.
///
/// The file is only rewritten when every choice is valid.
pub fn apply_choices(
    path: &Utf8Path,
    options: &[ConfigOption],
    choices: &[Option<usize>],
) -> Result<(), ConfigBinError> {
    if choices.len() != options.len() {
        return Err(ConfigBinError::ChoiceCount {
            expected: options.len(),
            actual: choices.len(),
        });
    }

    let mut bytes = fs::read(path).map_err(|source| ConfigBinError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    for (option, choice) in options.iter().zip(choices) {
        if let Some(index) = choice {
            write_choice(&mut bytes, option, *index)?;
        }
    }

    fs::write(path, &bytes).map_err(|source| ConfigBinError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::info!("Configuration saved to {}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfigValue;
    use tempfile::TempDir;

    fn option(offset: usize, values: &[(&str, &str)]) -> ConfigOption {
        ConfigOption {
            description: format!("option at {:#x}", offset),
            offset,
            values: values
                .iter()
                .map(|(label, data)| ConfigValue {
                    label: label.to_string(),
                    data: data.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_read_choices_matches_first_value() {
        let bytes = [0x00, 0x01, 0xff, 0x10];
        let options = vec![
            option(1, &[("Off", "00"), ("On", "01")]),
            option(2, &[("Low", "ff00"), ("High", "ff10")]),
            option(0, &[("Unknown", "aa")]),
            option(3, &[("Too long", "1000")]),
        ];

        assert_eq!(read_choices(&bytes, &options), vec![Some(1), Some(1), None, None]);
    }

    #[test]
    fn test_write_choice_bounds() {
        let mut bytes = vec![0u8; 4];
        let opt = option(2, &[("Short", "0102"), ("Long", "010203")]);

        write_choice(&mut bytes, &opt, 0).unwrap();
        assert_eq!(bytes, vec![0, 0, 1, 2]);

        assert!(matches!(
            write_choice(&mut bytes, &opt, 1),
            Err(ConfigBinError::OffsetOutOfRange { .. })
        ));
        assert!(matches!(
            write_choice(&mut bytes, &opt, 5),
            Err(ConfigBinError::NoSuchValue { available: 2, .. })
        ));
        assert_eq!(bytes, vec![0, 0, 1, 2]);
    }

    #[test]
    fn test_apply_choices_rewrites_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(temp_dir.path().join("config.bin")).unwrap();
        fs::write(&path, [0u8; 8]).unwrap();

        let options = vec![option(0, &[("A", "0a"), ("B", "0b")]), option(4, &[("C", "0c0c")])];
        apply_choices(&path, &options, &[Some(1), None]).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes, vec![0x0b, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(read_file_choices(&path, &options).unwrap(), vec![Some(1), None]);

        assert!(matches!(
            apply_choices(&path, &options, &[Some(0)]),
            Err(ConfigBinError::ChoiceCount { expected: 2, actual: 1 })
        ));
    }
}
