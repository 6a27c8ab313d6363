use super::CodecError;
use crate::models::quest::{QUEST_SLOT_COUNT, QuestRecord, SaveContainer};
use encoding_rs::SHIFT_JIS;

/// Offset of the first quest slot in the decrypted save
pub const QUEST_BASE_OFFSET: usize = 0x2A0;

/// Bytes per quest slot; also the maximum size of a quest file
pub const QUEST_SLOT_SIZE: usize = 0x1400;

/// `u16` quest id inside a quest payload
pub const QUEST_ID_OFFSET: usize = 0x00;

/// `u32` offset of the NUL terminated quest title inside a quest payload
pub const QUEST_TITLE_POINTER_OFFSET: usize = 0x04;

/// First byte past the quest slot region
pub const QUEST_REGION_END: usize = QUEST_BASE_OFFSET + QUEST_SLOT_COUNT * QUEST_SLOT_SIZE;

/// Decode one quest payload into a record.
///
/// All-zero payloads decode to the empty record. Shorter payloads are zero
/// padded to [`QUEST_SLOT_SIZE`].
pub fn decode_record(payload: &[u8]) -> Result<QuestRecord, CodecError> {
    if payload.len() > QUEST_SLOT_SIZE {
        return Err(CodecError::PayloadTooLarge {
            actual: payload.len(),
            max: QUEST_SLOT_SIZE,
        });
    }
    if payload.iter().all(|b| *b == 0) {
        return Ok(QuestRecord::empty());
    }

    let mut padded = payload.to_vec();
    padded.resize(QUEST_SLOT_SIZE, 0);

    let id = u16::from_le_bytes([padded[QUEST_ID_OFFSET], padded[QUEST_ID_OFFSET + 1]]);
    let pointer = u32::from_le_bytes([
        padded[QUEST_TITLE_POINTER_OFFSET],
        padded[QUEST_TITLE_POINTER_OFFSET + 1],
        padded[QUEST_TITLE_POINTER_OFFSET + 2],
        padded[QUEST_TITLE_POINTER_OFFSET + 3],
    ]);

    let name = match pointer as usize {
        0 => String::new(),
        start if start >= QUEST_SLOT_SIZE => {
            return Err(CodecError::BadTitlePointer { pointer });
        }
        start => {
            let raw = &padded[start..];
            let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
            let (title, _) = SHIFT_JIS.decode_without_bom_handling(&raw[..end]);
            title.trim().to_string()
        }
    };

    Ok(QuestRecord::from_parts(format!("{:05}", id), name, padded))
}

/// Decode the 18 quest slots of a decrypted save.
pub fn read_slots_from_save(bytes: &[u8]) -> Result<SaveContainer, CodecError> {
    if bytes.len() < QUEST_REGION_END {
        return Err(CodecError::SaveTooShort {
            actual: bytes.len(),
            required: QUEST_REGION_END,
        });
    }

    let slots = bytes[QUEST_BASE_OFFSET..QUEST_REGION_END]
        .chunks_exact(QUEST_SLOT_SIZE)
        .map(decode_record)
        .collect::<Result<Vec<_>, _>>()?;

    SaveContainer::from_slots(slots).map_err(|_| CodecError::SlotCount {
        expected: QUEST_SLOT_COUNT,
        actual: (QUEST_REGION_END - QUEST_BASE_OFFSET) / QUEST_SLOT_SIZE,
    })
}

/// Re-serialize the slots into a copy of `base`.
///
/// The result has the same length as `base`; only the slot region changes and
/// empty slots are zero filled.
pub fn write_slots_to_save(base: &[u8], container: &SaveContainer) -> Result<Vec<u8>, CodecError> {
    if base.len() < QUEST_REGION_END {
        return Err(CodecError::SaveTooShort {
            actual: base.len(),
            required: QUEST_REGION_END,
        });
    }

    let mut out = base.to_vec();
    for (index, record) in container.slots().iter().enumerate() {
        let start = QUEST_BASE_OFFSET + index * QUEST_SLOT_SIZE;
        let slot = &mut out[start..start + QUEST_SLOT_SIZE];
        slot.fill(0);

        let payload = record.payload();
        if payload.len() > QUEST_SLOT_SIZE {
            return Err(CodecError::PayloadTooLarge {
                actual: payload.len(),
                max: QUEST_SLOT_SIZE,
            });
        }
        slot[..payload.len()].copy_from_slice(payload);
    }

    Ok(out)
}
