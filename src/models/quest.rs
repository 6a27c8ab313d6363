use thiserror::Error;

/// Number of quest slots in a save.
pub const QUEST_SLOT_COUNT: usize = 18;

/// One quest slot: a decoded quest file or the empty sentinel.
///
/// Occupied records are built by [`crate::codec::save::decode_record`], which
/// normalizes the payload to the full slot size. The empty record has an empty
/// id, an empty name and no payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QuestRecord {
    id: String,
    name: String,
    payload: Vec<u8>,
}

impl QuestRecord {
    pub(crate) fn from_parts(id: String, name: String, payload: Vec<u8>) -> Self {
        Self { id, name, payload }
    }

    /// The unused-slot sentinel.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.payload.iter().all(|b| *b == 0)
    }

    /// File name of this quest in the quest folder pool (`m<id>.mib.dec`)
    pub fn pool_file_name(&self) -> String {
        pool_file_name(&self.id)
    }
}

/// File name used for a quest id in the quest folder pool.
pub fn pool_file_name(id: &str) -> String {
    format!("m{}.mib.dec", id)
}

/// Errors raised by slot mutations. The container is unchanged when one is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("Not enough slots: {occupied} occupied, {incoming} incoming, {QUEST_SLOT_COUNT} available")]
    CapacityExceeded { occupied: usize, incoming: usize },

    #[error("Record at position {0} is an empty quest")]
    EmptyRecord(usize),

    #[error("Save holds {0} slots, expected {QUEST_SLOT_COUNT}")]
    WrongSlotCount(usize),
}

/// The 18 quest slots of a save.
///
/// `slots().len() == QUEST_SLOT_COUNT` holds after construction and after
/// every mutation. Mutations compact occupied records to the front in their
/// current relative order and pad the tail with empty records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveContainer {
    slots: Vec<QuestRecord>,
}

impl SaveContainer {
    /// A container with every slot empty.
    pub fn new() -> Self {
        Self {
            slots: vec![QuestRecord::empty(); QUEST_SLOT_COUNT],
        }
    }

    /// Build from decoded slots, which must number exactly [`QUEST_SLOT_COUNT`].
    pub fn from_slots(slots: Vec<QuestRecord>) -> Result<Self, SlotError> {
        if slots.len() != QUEST_SLOT_COUNT {
            return Err(SlotError::WrongSlotCount(slots.len()));
        }
        Ok(Self { slots })
    }

    pub fn slots(&self) -> &[QuestRecord] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<&QuestRecord> {
        self.slots.get(index)
    }

    /// Occupied slots in slot order.
    pub fn occupied(&self) -> impl Iterator<Item = &QuestRecord> {
        self.slots.iter().filter(|record| !record.is_empty())
    }

    pub fn occupied_count(&self) -> usize {
        self.occupied().count()
    }

    pub fn free_slots(&self) -> usize {
        QUEST_SLOT_COUNT - self.occupied_count()
    }

    /// Append pool records after the occupied slots.
    ///
    /// Rejected with [`SlotError::CapacityExceeded`] when the records do not fit.
    pub fn add_from_pool(&mut self, records: &[QuestRecord]) -> Result<(), SlotError> {
        let occupied = self.occupied_count();
        if occupied + records.len() > QUEST_SLOT_COUNT {
            return Err(SlotError::CapacityExceeded {
                occupied,
                incoming: records.len(),
            });
        }
        if let Some(position) = records.iter().position(QuestRecord::is_empty) {
            return Err(SlotError::EmptyRecord(position));
        }

        let mut packed: Vec<QuestRecord> = self.occupied().cloned().collect();
        packed.extend(records.iter().cloned());
        self.slots = pad_slots(packed);

        tracing::debug!(
            "Added {} quest(s), {} slot(s) occupied",
            records.len(),
            self.occupied_count()
        );
        Ok(())
    }

    /// Remove the slots at `indices` and return the removed occupied records.
    ///
    /// Indices past the end are ignored.
    pub fn remove_at(&mut self, indices: &[usize]) -> Vec<QuestRecord> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(QUEST_SLOT_COUNT);

        for (index, record) in self.slots.drain(..).enumerate() {
            if indices.contains(&index) {
                if !record.is_empty() {
                    removed.push(record);
                }
            } else if !record.is_empty() {
                kept.push(record);
            }
        }

        self.slots = pad_slots(kept);

        tracing::debug!(
            "Removed {} quest(s), {} slot(s) occupied",
            removed.len(),
            self.occupied_count()
        );
        removed
    }
}

impl Default for SaveContainer {
    fn default() -> Self {
        Self::new()
    }
}

fn pad_slots(mut records: Vec<QuestRecord>) -> Vec<QuestRecord> {
    records.resize(QUEST_SLOT_COUNT, QuestRecord::empty());
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quest(id: u16) -> QuestRecord {
        let mut payload = vec![0u8; 16];
        payload[..2].copy_from_slice(&id.to_le_bytes());
        QuestRecord::from_parts(format!("{:05}", id), format!("Quest {}", id), payload)
    }

    fn container_with(count: u16) -> SaveContainer {
        let mut container = SaveContainer::new();
        let records: Vec<_> = (1..=count).map(quest).collect();
        container.add_from_pool(&records).unwrap();
        container
    }

    #[test]
    fn test_new_container_is_all_empty() {
        let container = SaveContainer::new();
        assert_eq!(container.slots().len(), QUEST_SLOT_COUNT);
        assert_eq!(container.occupied_count(), 0);
        assert_eq!(container.free_slots(), QUEST_SLOT_COUNT);
    }

    #[test]
    fn test_from_slots_requires_exact_count() {
        let result = SaveContainer::from_slots(vec![QuestRecord::empty(); 17]);
        assert_eq!(result, Err(SlotError::WrongSlotCount(17)));
    }

    #[test]
    fn test_capacity_exceeded_leaves_container_unchanged() {
        let mut container = container_with(5);
        let before = container.clone();
        let incoming: Vec<_> = (100..114).map(quest).collect();

        let result = container.add_from_pool(&incoming);

        assert_eq!(
            result,
            Err(SlotError::CapacityExceeded {
                occupied: 5,
                incoming: 14
            })
        );
        assert_eq!(container, before);
        assert_eq!(container.occupied_count(), 5);
    }

    #[test]
    fn test_add_fills_exactly_to_capacity() {
        let mut container = container_with(5);
        let incoming: Vec<_> = (100..113).map(quest).collect();

        container.add_from_pool(&incoming).unwrap();

        assert_eq!(container.occupied_count(), 18);
        assert_eq!(container.slots().len(), QUEST_SLOT_COUNT);
        assert_eq!(container.get(5).unwrap().id(), "00100");
    }

    #[test]
    fn test_add_rejects_empty_record() {
        let mut container = container_with(2);
        let result = container.add_from_pool(&[quest(9), QuestRecord::empty()]);
        assert_eq!(result, Err(SlotError::EmptyRecord(1)));
        assert_eq!(container.occupied_count(), 2);
    }

    #[test]
    fn test_remove_first_and_last_of_full_container() {
        let mut container = container_with(18);

        let removed = container.remove_at(&[0, 17]);

        assert_eq!(removed.len(), 2);
        assert_eq!(container.slots().len(), QUEST_SLOT_COUNT);
        assert_eq!(container.occupied_count(), 16);
        let ids: Vec<_> = container.occupied().map(|q| q.id().to_string()).collect();
        let expected: Vec<_> = (2..=17).map(|id| format!("{:05}", id)).collect();
        assert_eq!(ids, expected);
        assert!(container.get(16).unwrap().is_empty());
        assert!(container.get(17).unwrap().is_empty());
    }

    #[test]
    fn test_remove_compacts_gaps() {
        let mut slots = vec![QuestRecord::empty(); QUEST_SLOT_COUNT];
        slots[1] = quest(1);
        slots[4] = quest(4);
        slots[9] = quest(9);
        let mut container = SaveContainer::from_slots(slots).unwrap();

        container.remove_at(&[4, 40]);

        assert_eq!(container.get(0).unwrap().id(), "00001");
        assert_eq!(container.get(1).unwrap().id(), "00009");
        assert_eq!(container.occupied_count(), 2);
    }

    #[test]
    fn test_pool_file_name() {
        assert_eq!(quest(61234).pool_file_name(), "m61234.mib.dec");
    }
}
