use alloc::string::String;
use alloc::vec::Vec;

use core::fmt::Write;

use crc::{CRC_32_ISO_HDLC, Crc};
use hashbrown::HashMap;
use log::{debug, warn};

use crate::error::{Error, ErrorKind};

// Record layout: magic (2) | version (1) | sequence (4) | length (2) |
// payload | crc32 (4). Integers are little endian.
const MAGIC: [u8; 2] = *b"LR";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 9;
const CRC_LEN: usize = 4;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Maximum length of a storage key, slot suffix excluded.
pub const MAX_KEY_LEN: usize = 16;

/// Durable key-addressed byte storage.
///
/// Both operations are synchronous and bounded in time. A write is not
/// assumed to be atomic: a power loss may leave a partially written
/// value behind, which is why persisted records go through a
/// [`StateStore`].
pub trait Storage {
    /// Reads the value stored under `key` into `buf`.
    ///
    /// Returns `Ok(None)` when no value is stored, and the value length
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Fails when the backend cannot be read or the value does not fit
    /// into `buf`.
    fn read(&mut self, key: &str, buf: &mut [u8]) -> Result<Option<usize>, Error>;

    /// Stores `data` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Fails when the backend cannot be written.
    fn write(&mut self, key: &str, data: &[u8]) -> Result<(), Error>;
}

impl<S: Storage + ?Sized> Storage for &mut S {
    fn read(&mut self, key: &str, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        (**self).read(key, buf)
    }

    fn write(&mut self, key: &str, data: &[u8]) -> Result<(), Error> {
        (**self).write(key, data)
    }
}

/// A [`Storage`] kept in memory.
///
/// Besides serving as volatile storage, it can inject the faults a flash
/// backend exhibits: failing writes and writes torn by a power loss.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: HashMap<String, Vec<u8>>,
    fail_writes: bool,
    tear_next_write: Option<usize>,
    writes: usize,
}

impl MemoryStorage {
    /// Creates an empty [`MemoryStorage`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write fail until disabled.
    #[inline]
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Makes the next write store only its first `bytes` bytes and fail,
    /// as a power loss in the middle of the write would.
    #[inline]
    pub fn tear_next_write(&mut self, bytes: usize) {
        self.tear_next_write = Some(bytes);
    }

    /// Returns the number of successful writes.
    #[must_use]
    #[inline]
    pub const fn writes(&self) -> usize {
        self.writes
    }

    /// Returns the raw value stored under `key`.
    #[must_use]
    #[inline]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.values.get(key).map(Vec::as_slice)
    }

    /// Flips every bit of the byte at `index` of the value stored under
    /// `key`.
    pub fn corrupt(&mut self, key: &str, index: usize) {
        if let Some(byte) = self.values.get_mut(key).and_then(|value| value.get_mut(index)) {
            *byte = !*byte;
        }
    }
}

impl Storage for MemoryStorage {
    fn read(&mut self, key: &str, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        let Some(value) = self.values.get(key) else {
            return Ok(None);
        };

        let destination = buf.get_mut(..value.len()).ok_or_else(|| {
            Error::new(
                ErrorKind::BufferOverflow,
                alloc::format!("`{key}` holds {} bytes", value.len()),
            )
        })?;
        destination.copy_from_slice(value);

        Ok(Some(value.len()))
    }

    fn write(&mut self, key: &str, data: &[u8]) -> Result<(), Error> {
        if self.fail_writes {
            return Err(Error::new(ErrorKind::Storage, "write rejected"));
        }

        if let Some(bytes) = self.tear_next_write.take() {
            let torn = data.get(..bytes).unwrap_or(data);
            let _ = self.values.insert(String::from(key), torn.to_vec());
            return Err(Error::new(ErrorKind::Storage, "write interrupted"));
        }

        let _ = self.values.insert(String::from(key), data.to_vec());
        self.writes += 1;
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Slot {
    A,
    B,
}

impl Slot {
    const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    const fn suffix(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct Committed {
    slot: Slot,
    sequence: u32,
    payload_crc: u32,
    payload_len: usize,
}

/// Crash-safe persisted records over any [`Storage`].
///
/// Each record alternates between two slots. A save always writes the slot
/// that does not hold the committed record, and a load picks the valid
/// slot with the newest sequence number. A power loss in the middle of a
/// save therefore leaves the previous record readable.
///
/// Saving a payload identical to the committed one does not touch the
/// storage.
#[derive(Debug)]
pub struct StateStore {
    scratch: Vec<u8>,
    committed: HashMap<String, Committed>,
}

impl StateStore {
    /// Creates a [`StateStore`] for payloads up to `max_payload` bytes.
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        let mut scratch = Vec::with_capacity(HEADER_LEN + max_payload + CRC_LEN);
        scratch.resize(HEADER_LEN + max_payload + CRC_LEN, 0);
        Self {
            scratch,
            committed: HashMap::new(),
        }
    }

    /// Returns the maximum payload length.
    #[must_use]
    #[inline]
    pub fn max_payload(&self) -> usize {
        self.scratch.len() - HEADER_LEN - CRC_LEN
    }

    /// Loads the newest valid record stored under `key` into `payload`.
    ///
    /// Returns `Ok(None)` when no slot holds a valid record: absent,
    /// torn and corrupted records are all treated as missing.
    ///
    /// # Errors
    ///
    /// Fails when the storage cannot be read or `payload` is too small.
    pub fn load<S: Storage>(
        &mut self,
        storage: &mut S,
        key: &str,
        payload: &mut [u8],
    ) -> Result<Option<usize>, Error> {
        let mut newest: Option<Committed> = None;

        for slot in [Slot::A, Slot::B] {
            let Some(record) = self.read_slot(storage, key, slot)? else {
                continue;
            };

            if newest.is_none_or(|newest| is_newer(record.sequence, newest.sequence)) {
                let destination = payload.get_mut(..record.payload_len).ok_or_else(|| {
                    Error::new(
                        ErrorKind::BufferOverflow,
                        alloc::format!("record `{key}` holds {} bytes", record.payload_len),
                    )
                })?;
                destination
                    .copy_from_slice(&self.scratch[HEADER_LEN..HEADER_LEN + record.payload_len]);
                newest = Some(record);
            }
        }

        Ok(newest.map(|record| {
            debug!(
                "record `{key}` loaded from slot {} (sequence {})",
                record.slot.suffix(),
                record.sequence
            );
            let _ = self.committed.insert(String::from(key), record);
            record.payload_len
        }))
    }

    /// Saves `payload` under `key`.
    ///
    /// Returns whether the storage was written: an unchanged payload is
    /// skipped.
    ///
    /// # Errors
    ///
    /// Fails when the payload is too long or the storage write fails. The
    /// previously committed record stays valid in both cases.
    pub fn save<S: Storage>(
        &mut self,
        storage: &mut S,
        key: &str,
        payload: &[u8],
    ) -> Result<bool, Error> {
        if payload.len() > self.max_payload() || payload.len() > usize::from(u16::MAX) {
            return Err(Error::new(
                ErrorKind::BufferOverflow,
                alloc::format!("record `{key}` of {} bytes is too long", payload.len()),
            ));
        }

        let payload_crc = CRC32.checksum(payload);
        let previous = self.committed.get(key).copied();

        if let Some(previous) = previous
            && previous.payload_crc == payload_crc
            && previous.payload_len == payload.len()
        {
            return Ok(false);
        }

        let (slot, sequence) = match previous {
            Some(previous) => (previous.slot.other(), previous.sequence.wrapping_add(1)),
            None => (Slot::A, 1),
        };

        let len = encode(&mut self.scratch, sequence, payload);
        let slot_key = slot_key(key, slot)?;
        storage.write(&slot_key, &self.scratch[..len])?;

        let _ = self.committed.insert(
            String::from(key),
            Committed {
                slot,
                sequence,
                payload_crc,
                payload_len: payload.len(),
            },
        );

        Ok(true)
    }

    fn read_slot<S: Storage>(
        &mut self,
        storage: &mut S,
        key: &str,
        slot: Slot,
    ) -> Result<Option<Committed>, Error> {
        let slot_key = slot_key(key, slot)?;

        let len = match storage.read(&slot_key, &mut self.scratch) {
            Ok(Some(len)) => len,
            Ok(None) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::BufferOverflow => {
                warn!("record `{slot_key}` is oversized, ignoring it");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match decode(&self.scratch[..len]) {
            Ok(record) => Ok(Some(Committed { slot, ..record })),
            Err(e) => {
                warn!("record `{slot_key}` is unusable: {e}");
                Ok(None)
            }
        }
    }
}

/// Builds the storage key of a record slot.
fn slot_key(key: &str, slot: Slot) -> Result<heapless::String<24>, Error> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(Error::new(
            ErrorKind::InvalidKey,
            alloc::format!("`{key}` is not a valid record key"),
        ));
    }

    let mut slot_key = heapless::String::new();
    write!(slot_key, "{key}.{}", slot.suffix())
        .map_err(|_| Error::new(ErrorKind::InvalidKey, "record key too long"))?;
    Ok(slot_key)
}

fn encode(buf: &mut [u8], sequence: u32, payload: &[u8]) -> usize {
    let payload_end = HEADER_LEN + payload.len();

    buf[..2].copy_from_slice(&MAGIC);
    buf[2] = VERSION;
    buf[3..7].copy_from_slice(&sequence.to_le_bytes());
    // The caller bounds the payload length to u16::MAX.
    buf[7..9].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    buf[HEADER_LEN..payload_end].copy_from_slice(payload);

    let crc = CRC32.checksum(&buf[..payload_end]);
    buf[payload_end..payload_end + CRC_LEN].copy_from_slice(&crc.to_le_bytes());

    payload_end + CRC_LEN
}

fn decode(record: &[u8]) -> Result<Committed, Error> {
    if record.len() < HEADER_LEN + CRC_LEN {
        return Err(Error::new(ErrorKind::StateCorrupted, "truncated header"));
    }

    if record[..2] != MAGIC || record[2] != VERSION {
        return Err(Error::new(ErrorKind::StateCorrupted, "unknown record format"));
    }

    let sequence = u32::from_le_bytes([record[3], record[4], record[5], record[6]]);
    let payload_len = usize::from(u16::from_le_bytes([record[7], record[8]]));
    let payload_end = HEADER_LEN + payload_len;

    if record.len() != payload_end + CRC_LEN {
        return Err(Error::new(ErrorKind::StateCorrupted, "length mismatch"));
    }

    let stored_crc = u32::from_le_bytes([
        record[payload_end],
        record[payload_end + 1],
        record[payload_end + 2],
        record[payload_end + 3],
    ]);
    if CRC32.checksum(&record[..payload_end]) != stored_crc {
        return Err(Error::new(ErrorKind::StateCorrupted, "checksum mismatch"));
    }

    Ok(Committed {
        slot: Slot::A,
        sequence,
        payload_crc: CRC32.checksum(&record[HEADER_LEN..payload_end]),
        payload_len,
    })
}

// Sequence numbers wrap, so the newer one is the one less than half the
// sequence space ahead.
const fn is_newer(sequence: u32, than: u32) -> bool {
    let distance = sequence.wrapping_sub(than);
    distance != 0 && distance < u32::MAX / 2
}

#[cfg(test)]
mod tests {
    use super::{MemoryStorage, StateStore, Storage, is_newer};

    use crate::error::ErrorKind;

    fn load(store: &mut StateStore, storage: &mut MemoryStorage, key: &str) -> Option<[u8; 4]> {
        let mut payload = [0; 4];
        store
            .load(storage, key, &mut payload)
            .unwrap()
            .map(|len| {
                assert_eq!(len, 4);
                payload
            })
    }

    #[test]
    fn test_memory_storage() {
        let mut storage = MemoryStorage::new();
        let mut buf = [0; 8];

        assert_eq!(storage.read("key", &mut buf).unwrap(), None);

        storage.write("key", &[1, 2, 3]).unwrap();
        assert_eq!(storage.read("key", &mut buf).unwrap(), Some(3));
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(storage.writes(), 1);

        let mut small = [0; 2];
        assert_eq!(
            storage.read("key", &mut small).unwrap_err().kind(),
            ErrorKind::BufferOverflow
        );

        storage.fail_writes(true);
        assert_eq!(
            storage.write("key", &[4]).unwrap_err().kind(),
            ErrorKind::Storage
        );
        assert_eq!(storage.get("key"), Some([1, 2, 3].as_slice()));
    }

    #[test]
    fn test_absent_record() {
        let mut storage = MemoryStorage::new();
        let mut store = StateStore::new(16);

        assert_eq!(load(&mut store, &mut storage, "state_0"), None);
    }

    #[test]
    fn test_save_alternates_slots() {
        let mut storage = MemoryStorage::new();
        let mut store = StateStore::new(16);

        assert!(store.save(&mut storage, "state_0", &[1, 0, 0, 0]).unwrap());
        assert!(storage.get("state_0.a").is_some());
        assert!(storage.get("state_0.b").is_none());

        assert!(store.save(&mut storage, "state_0", &[2, 0, 0, 0]).unwrap());
        assert!(storage.get("state_0.b").is_some());

        // A fresh store, as after a reboot, picks the newest slot.
        let mut rebooted = StateStore::new(16);
        assert_eq!(
            load(&mut rebooted, &mut storage, "state_0"),
            Some([2, 0, 0, 0])
        );

        // The next save overwrites the older slot.
        assert!(rebooted.save(&mut storage, "state_0", &[3, 0, 0, 0]).unwrap());
        let mut rebooted = StateStore::new(16);
        assert_eq!(
            load(&mut rebooted, &mut storage, "state_0"),
            Some([3, 0, 0, 0])
        );
    }

    #[test]
    fn test_unchanged_payload_is_not_written() {
        let mut storage = MemoryStorage::new();
        let mut store = StateStore::new(16);

        assert!(store.save(&mut storage, "state_1", &[7, 7, 7, 7]).unwrap());
        assert!(!store.save(&mut storage, "state_1", &[7, 7, 7, 7]).unwrap());
        assert_eq!(storage.writes(), 1);
    }

    #[test]
    fn test_torn_write_keeps_previous_record() {
        let mut storage = MemoryStorage::new();
        let mut store = StateStore::new(16);

        assert!(store.save(&mut storage, "state_2", &[1, 1, 1, 1]).unwrap());
        assert!(store.save(&mut storage, "state_2", &[2, 2, 2, 2]).unwrap());

        // Every possible interruption point of the third save.
        for torn_at in 0..17 {
            let mut storage_copy = MemoryStorage::new();
            for slot in ["state_2.a", "state_2.b"] {
                storage_copy
                    .write(slot, storage.get(slot).unwrap())
                    .unwrap();
            }
            let mut store = StateStore::new(16);
            assert_eq!(
                load(&mut store, &mut storage_copy, "state_2"),
                Some([2, 2, 2, 2])
            );

            storage_copy.tear_next_write(torn_at);
            assert_eq!(
                store
                    .save(&mut storage_copy, "state_2", &[3, 3, 3, 3])
                    .unwrap_err()
                    .kind(),
                ErrorKind::Storage
            );

            let mut rebooted = StateStore::new(16);
            assert_eq!(
                load(&mut rebooted, &mut storage_copy, "state_2"),
                Some([2, 2, 2, 2])
            );

            // The retry succeeds and wins.
            assert!(store.save(&mut storage_copy, "state_2", &[3, 3, 3, 3]).unwrap());
            let mut rebooted = StateStore::new(16);
            assert_eq!(
                load(&mut rebooted, &mut storage_copy, "state_2"),
                Some([3, 3, 3, 3])
            );
        }
    }

    #[test]
    fn test_corrupted_slot_falls_back() {
        let mut storage = MemoryStorage::new();
        let mut store = StateStore::new(16);

        assert!(store.save(&mut storage, "config", &[1, 2, 3, 4]).unwrap());
        assert!(store.save(&mut storage, "config", &[5, 6, 7, 8]).unwrap());

        storage.corrupt("config.b", 10);

        let mut rebooted = StateStore::new(16);
        assert_eq!(
            load(&mut rebooted, &mut storage, "config"),
            Some([1, 2, 3, 4])
        );

        storage.corrupt("config.a", 0);
        let mut rebooted = StateStore::new(16);
        assert_eq!(load(&mut rebooted, &mut storage, "config"), None);
    }

    #[test]
    fn test_invalid_key_and_oversized_payload() {
        let mut storage = MemoryStorage::new();
        let mut store = StateStore::new(4);

        assert_eq!(
            store
                .save(&mut storage, "a_key_that_is_too_long", &[0])
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidKey
        );
        assert_eq!(
            store
                .save(&mut storage, "state_0", &[0; 5])
                .unwrap_err()
                .kind(),
            ErrorKind::BufferOverflow
        );
    }

    #[test]
    fn test_sequence_wraps() {
        assert!(is_newer(2, 1));
        assert!(!is_newer(1, 2));
        assert!(!is_newer(5, 5));
        assert!(is_newer(0, u32::MAX));
        assert!(is_newer(3, u32::MAX - 2));
    }
}
