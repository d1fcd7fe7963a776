use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use super::{validate_attached, BackingStore};
use crate::core::*;
use crate::identity::QueueIdentity;
use crate::QueueError;

/// Header and slots in a plain file, reopened and seeked on every access.
///
/// Nothing is mapped, so cross-process visibility rests entirely on the
/// queue serializing access through its lock.
pub struct FileStore {
    path: PathBuf,
    capacity: usize,
}

impl FileStore {
    fn open_rw(&self) -> io::Result<File> {
        OpenOptions::new().read(true).write(true).open(&self.path)
    }

    fn read_at<const N: usize>(&self, offset: usize) -> Result<[u8; N], QueueError> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut buff = [0u8; N];
        file.read_exact(&mut buff)?;
        Ok(buff)
    }

    fn write_at(&self, offset: usize, bytes: &[u8]) -> Result<(), QueueError> {
        let mut file = self.open_rw()?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), QueueError> {
        if index >= self.capacity {
            return Err(QueueError::ConsistencyViolation(format!(
                "slot index {} outside capacity {}",
                index, self.capacity
            )));
        }
        Ok(())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl BackingStore for FileStore {
    fn create(identity: &QueueIdentity, capacity: usize) -> Result<Self, QueueError> {
        check_capacity(capacity)?;
        let path = identity.path().to_path_buf();
        let failed = |e: io::Error| QueueError::StoreCreationFailed {
            name: path.display().to_string(),
            reason: e.to_string(),
        };

        // An existing file may back a live or persisted queue; never clobber it.
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(failed)?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&SegmentHeader::new(capacity).to_bytes())
            .map_err(failed)?;
        let empty = Slot::EMPTY.to_bytes();
        for _ in 0..capacity {
            writer.write_all(&empty).map_err(failed)?;
        }
        writer.flush().map_err(failed)?;

        tracing::info!(path = %path.display(), capacity, "file store created");
        Ok(FileStore { path, capacity })
    }

    fn attach(identity: &QueueIdentity) -> Result<Self, QueueError> {
        let path = identity.path().to_path_buf();
        let name = path.display().to_string();
        let mut file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => QueueError::StoreNotFound { name: name.clone() },
            _ => QueueError::Io(e),
        })?;
        let len = file.metadata()?.len() as usize;
        let mut buff = [0u8; HEADER_SIZE];
        file.read_exact(&mut buff).map_err(|_| {
            QueueError::ConsistencyViolation(format!("{}: {} bytes is smaller than a header", name, len))
        })?;
        let header = SegmentHeader::from_bytes(&buff);
        let capacity = validate_attached(&name, &header, len)?;

        tracing::info!(path = %name, capacity, count = header.count, "file store attached");
        Ok(FileStore { path, capacity })
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn header(&self) -> Result<SegmentHeader, QueueError> {
        let buff = self.read_at::<HEADER_SIZE>(0)?;
        Ok(SegmentHeader::from_bytes(&buff))
    }

    fn store_header(&self, header: &SegmentHeader) -> Result<(), QueueError> {
        self.write_at(0, &header.to_bytes())
    }

    fn slot(&self, index: usize) -> Result<Slot, QueueError> {
        self.check_index(index)?;
        let buff = self.read_at::<SLOT_SIZE>(slot_offset(index))?;
        Ok(Slot::from_bytes(&buff))
    }

    fn store_slot(&self, index: usize, slot: &Slot) -> Result<(), QueueError> {
        self.check_index(index)?;
        self.write_at(slot_offset(index), &slot.to_bytes())
    }
}
