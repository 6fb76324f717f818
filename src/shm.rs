//! Named, process-shared latest-value maps.
//!
//! Each map is a fixed-capacity `i32 → record` table living in a named file
//! under the shared-memory directory, memory-mapped by every participant,
//! and serialized by an advisory lock on the companion `<name>_LOCK` file.
//! The supervisor is the creator: construction destroys any pre-existing
//! object of the same name before creating a fresh one, so stale segments
//! from a crashed predecessor never leak state. Worker processes attach by
//! name and follow the same lock protocol.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use memmap2::MmapMut;

use crate::errors::Error;

/// Fixed-width record that can live in a [SharedMap] slot.
pub trait SharedRecord: Sized {
    /// Encoded slot payload size.
    const SIZE: usize;

    fn encode_record(&self, buf: &mut [u8]);
    fn decode_record(buf: &[u8]) -> Self;
}

/// Entries per map. GPS PRNs run 1..=32, so this is generous; a full map is
/// a hard error rather than a silent drop.
pub const MAP_CAPACITY: usize = 128;

const MAGIC: [u8; 4] = *b"GSHM";
const HEADER_SIZE: usize = 8;
const KEY_SIZE: usize = 4;

/// Directory the named objects live in. `/dev/shm` keeps them in memory on
/// Linux; elsewhere the temp dir carries the same naming contract.
fn shm_dir() -> PathBuf {
    let dev_shm = Path::new("/dev/shm");
    if dev_shm.is_dir() {
        dev_shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// One named shared map. The handle owns the underlying objects: dropping
/// it unlinks both the segment and its lock.
pub struct SharedMap<R: SharedRecord> {
    name: String,
    data_path: PathBuf,
    lock_path: PathBuf,
    lock_file: File,
    image: Mutex<MmapMut>,
    _record: PhantomData<R>,
}

struct Unlock<'a>(&'a File);

impl Drop for Unlock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.0);
    }
}

impl<R: SharedRecord> SharedMap<R> {
    const SLOT_SIZE: usize = KEY_SIZE + R::SIZE;

    /// Destroys any object already registered under `name`, then creates
    /// the segment and its `<name>_LOCK` companion.
    pub fn create(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        let dir = shm_dir();
        let data_path = dir.join(&name);
        let lock_path = dir.join(format!("{}_LOCK", name));

        let _ = std::fs::remove_file(&data_path);
        let _ = std::fs::remove_file(&lock_path);

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&data_path)?;

        let len = HEADER_SIZE + MAP_CAPACITY * Self::SLOT_SIZE;
        file.set_len(len as u64)?;

        // Safety: the mapping covers a file this handle just created and
        // sized; it stays alive for as long as the mapping does.
        let mut image = unsafe { MmapMut::map_mut(&file)? };
        image[0..4].copy_from_slice(&MAGIC);
        image[4..8].copy_from_slice(&0u32.to_le_bytes());

        Ok(Self {
            name,
            data_path,
            lock_path,
            lock_file,
            image: Mutex::new(image),
            _record: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> Result<Unlock<'_>, Error> {
        self.lock_file.lock_exclusive()?;
        Ok(Unlock(&self.lock_file))
    }

    fn entry_count(image: &MmapMut) -> usize {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&image[4..8]);
        u32::from_le_bytes(raw) as usize
    }

    fn set_entry_count(image: &mut MmapMut, count: usize) {
        image[4..8].copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn slot_key(image: &MmapMut, index: usize) -> i32 {
        let offset = HEADER_SIZE + index * Self::SLOT_SIZE;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&image[offset..offset + KEY_SIZE]);
        i32::from_le_bytes(raw)
    }

    fn slot_value(image: &MmapMut, index: usize) -> R {
        let offset = HEADER_SIZE + index * Self::SLOT_SIZE + KEY_SIZE;
        R::decode_record(&image[offset..offset + R::SIZE])
    }

    fn set_slot(image: &mut MmapMut, index: usize, key: i32, value: &R) {
        let offset = HEADER_SIZE + index * Self::SLOT_SIZE;
        image[offset..offset + KEY_SIZE].copy_from_slice(&key.to_le_bytes());
        value.encode_record(&mut image[offset + KEY_SIZE..offset + KEY_SIZE + R::SIZE]);
    }

    /// Upserts `value` under `key`.
    pub fn write(&self, key: i32, value: &R) -> Result<(), Error> {
        let _guard = self.lock()?;
        let mut image = self.image.lock().unwrap();

        let count = Self::entry_count(&image);
        for index in 0..count {
            if Self::slot_key(&image, index) == key {
                Self::set_slot(&mut image, index, key, value);
                return Ok(());
            }
        }

        if count == MAP_CAPACITY {
            return Err(Error::SharedMapFull {
                name: self.name.clone(),
                capacity: MAP_CAPACITY,
            });
        }

        Self::set_slot(&mut image, count, key, value);
        Self::set_entry_count(&mut image, count + 1);
        Ok(())
    }

    pub fn read(&self, key: i32) -> Result<Option<R>, Error> {
        let _guard = self.lock()?;
        let image = self.image.lock().unwrap();

        let count = Self::entry_count(&image);
        for index in 0..count {
            if Self::slot_key(&image, index) == key {
                return Ok(Some(Self::slot_value(&image, index)));
            }
        }
        Ok(None)
    }

    pub fn size(&self) -> Result<usize, Error> {
        let _guard = self.lock()?;
        let image = self.image.lock().unwrap();
        Ok(Self::entry_count(&image))
    }

    /// Copies every entry out under the lock, then releases it.
    pub fn snapshot(&self) -> Result<BTreeMap<i32, R>, Error> {
        let _guard = self.lock()?;
        let image = self.image.lock().unwrap();

        let count = Self::entry_count(&image);
        let mut copy = BTreeMap::new();
        for index in 0..count {
            copy.insert(Self::slot_key(&image, index), Self::slot_value(&image, index));
        }
        Ok(copy)
    }
}

impl<R: SharedRecord> Drop for SharedMap<R> {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.data_path);
        let _ = std::fs::remove_file(&self.lock_path);
    }
}
