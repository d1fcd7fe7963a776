use std::mem;
use std::path::PathBuf;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

/// Bytes reserved for a message, terminator included.
pub const SLOT_TEXT_SIZE: usize = 20;
/// Longest message a slot accepts.
pub const MAX_MESSAGE_LEN: usize = SLOT_TEXT_SIZE - 1;
/// Upper bound for a queue capacity. Kept well below `SEM_VALUE_MAX`.
pub const MAX_CAPACITY: usize = 1 << 20;

pub const HEADER_SIZE: usize = mem::size_of::<SegmentHeader>();
pub const SLOT_SIZE: usize = mem::size_of::<Slot>();

/// Bookkeeping at offset 0 of every store.
#[repr(C)]
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct SegmentHeader {
    pub capacity: i32,
    pub count: i32,
    pub head: i32,
    pub tail: i32,
}

/// One message cell. `occupied` is a single byte so that any bit pattern
/// found in a foreign mapping is a valid value.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    pub occupied: u8,
    pub text: [u8; SLOT_TEXT_SIZE],
}

const _: () = assert!(HEADER_SIZE == 16);
const _: () = assert!(SLOT_SIZE == 1 + SLOT_TEXT_SIZE);

impl SegmentHeader {
    pub fn new(capacity: usize) -> SegmentHeader {
        SegmentHeader {
            capacity: capacity as i32,
            count: 0,
            head: 0,
            tail: 0,
        }
    }

    /// Checks the bound invariant, returning a description of the first
    /// broken bound.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity <= 0 || self.capacity as usize > MAX_CAPACITY {
            return Err(format!("capacity {} out of range", self.capacity));
        }
        if self.count < 0 || self.count > self.capacity {
            return Err(format!(
                "count {} outside [0, {}]",
                self.count, self.capacity
            ));
        }
        if self.head < 0 || self.head >= self.capacity {
            return Err(format!("head {} outside [0, {})", self.head, self.capacity));
        }
        if self.tail < 0 || self.tail >= self.capacity {
            return Err(format!("tail {} outside [0, {})", self.tail, self.capacity));
        }
        Ok(())
    }

    #[inline]
    pub fn next_index(&self, index: i32) -> i32 {
        (index + 1) % self.capacity
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buff = [0u8; HEADER_SIZE];
        buff[0..4].copy_from_slice(&self.capacity.to_ne_bytes());
        buff[4..8].copy_from_slice(&self.count.to_ne_bytes());
        buff[8..12].copy_from_slice(&self.head.to_ne_bytes());
        buff[12..16].copy_from_slice(&self.tail.to_ne_bytes());
        buff
    }

    pub fn from_bytes(buff: &[u8; HEADER_SIZE]) -> SegmentHeader {
        let field = |at: usize| i32::from_ne_bytes([buff[at], buff[at + 1], buff[at + 2], buff[at + 3]]);
        SegmentHeader {
            capacity: field(0),
            count: field(4),
            head: field(8),
            tail: field(12),
        }
    }
}

impl Default for Slot {
    fn default() -> Slot {
        Slot::EMPTY
    }
}

impl Slot {
    pub const EMPTY: Slot = Slot {
        occupied: 0,
        text: [0; SLOT_TEXT_SIZE],
    };

    /// Builds an occupied slot. The message must already have passed
    /// [`check_message`].
    pub fn with_text(message: &str) -> Slot {
        let mut slot = Slot {
            occupied: 1,
            text: [0; SLOT_TEXT_SIZE],
        };
        let bytes = message.as_bytes();
        slot.text[..bytes.len()].copy_from_slice(bytes);
        slot
    }

    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.occupied != 0
    }

    /// Payload up to the first NUL. Empty for an unoccupied slot, whatever
    /// stale bytes it still holds.
    pub fn text(&self) -> String {
        if !self.is_occupied() {
            return String::new();
        }
        let end = self
            .text
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SLOT_TEXT_SIZE);
        String::from_utf8_lossy(&self.text[..end]).into_owned()
    }

    pub fn to_bytes(&self) -> [u8; SLOT_SIZE] {
        let mut buff = [0u8; SLOT_SIZE];
        buff[0] = self.occupied;
        buff[1..].copy_from_slice(&self.text);
        buff
    }

    pub fn from_bytes(buff: &[u8; SLOT_SIZE]) -> Slot {
        let mut text = [0u8; SLOT_TEXT_SIZE];
        text.copy_from_slice(&buff[1..]);
        Slot {
            occupied: buff[0],
            text,
        }
    }
}

/// Size of a store holding `capacity` slots.
#[inline]
pub fn segment_size(capacity: usize) -> usize {
    HEADER_SIZE + capacity * SLOT_SIZE
}

#[inline]
pub fn slot_offset(index: usize) -> usize {
    HEADER_SIZE + index * SLOT_SIZE
}

pub fn check_capacity(capacity: usize) -> Result<(), crate::QueueError> {
    if capacity == 0 || capacity > MAX_CAPACITY {
        return Err(crate::QueueError::InvalidCapacity(capacity));
    }
    Ok(())
}

/// Rejects messages that would not survive a round trip through a slot.
pub fn check_message(message: &str) -> Result<(), crate::QueueError> {
    if message.len() > MAX_MESSAGE_LEN {
        return Err(crate::QueueError::MessageTooLong {
            length: message.len(),
            max: MAX_MESSAGE_LEN,
        });
    }
    if message.as_bytes().contains(&0) {
        return Err(crate::QueueError::InvalidMessage);
    }
    Ok(())
}

/// Cuts a message down to the slot payload width on a char boundary.
/// Queue writes never do this on their own.
pub fn truncate_message(message: &str) -> &str {
    if message.len() <= MAX_MESSAGE_LEN {
        return message;
    }
    let mut end = MAX_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

/// How long a blocking queue operation may wait.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timeout {
    Infinite,
    Val(Duration),
}

impl Timeout {
    /// A single non-blocking attempt.
    pub const NONE: Timeout = Timeout::Val(Duration::ZERO);

    pub(crate) fn to_raw(self) -> raw_sync::Timeout {
        match self {
            Timeout::Infinite => raw_sync::Timeout::Infinite,
            Timeout::Val(d) => raw_sync::Timeout::Val(d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Timeout {
        Timeout::Val(d)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Shmem,
    File,
}

impl Default for Backend {
    fn default() -> Backend {
        Backend::Shmem
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    pub data_dir: String,
    pub queue_name: String,
    pub capacity: usize,
    #[serde(default)]
    pub backend: Backend,
    // Absent timeouts mean "wait indefinitely".
    #[serde(default)]
    pub write_timeout_ms: Option<u64>,
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    #[serde(default)]
    pub ready_timeout_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> QueueConfig {
        QueueConfig {
            data_dir: ".".to_string(),
            queue_name: "boundq.bin".to_string(),
            capacity: 16,
            backend: Backend::Shmem,
            write_timeout_ms: Some(1_000),
            read_timeout_ms: Some(1_000),
            ready_timeout_ms: Some(30_000),
        }
    }
}

impl QueueConfig {
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.queue_name)
    }

    pub fn write_timeout(&self) -> Timeout {
        timeout_from_millis(self.write_timeout_ms)
    }

    pub fn read_timeout(&self) -> Timeout {
        timeout_from_millis(self.read_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Timeout {
        timeout_from_millis(self.ready_timeout_ms)
    }
}

pub fn timeout_from_millis(millis: Option<u64>) -> Timeout {
    match millis {
        Some(ms) => Timeout::Val(Duration::from_millis(ms)),
        None => Timeout::Infinite,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueError;

    #[test]
    fn slot_layout_matches_segment_format() {
        assert_eq!(HEADER_SIZE, 16);
        assert_eq!(SLOT_SIZE, 21);
        assert_eq!(segment_size(5), 16 + 5 * 21);
        assert_eq!(slot_offset(0), HEADER_SIZE);
        assert_eq!(slot_offset(3), HEADER_SIZE + 3 * SLOT_SIZE);
    }

    #[test]
    fn header_validation_catches_out_of_range_fields() {
        let header = SegmentHeader::new(4);
        assert!(header.validate().is_ok());

        let negative = SegmentHeader { count: -1, ..header };
        assert!(negative.validate().unwrap_err().contains("count -1"));

        let overfull = SegmentHeader { count: 5, ..header };
        assert!(overfull.validate().is_err());

        let bad_head = SegmentHeader { head: 4, ..header };
        assert!(bad_head.validate().unwrap_err().contains("head"));

        let bad_tail = SegmentHeader { tail: -3, ..header };
        assert!(bad_tail.validate().unwrap_err().contains("tail"));

        assert!(SegmentHeader::new(0).validate().is_err());
    }

    #[test]
    fn next_index_wraps_at_capacity() {
        let header = SegmentHeader::new(2);
        assert_eq!(header.next_index(0), 1);
        assert_eq!(header.next_index(1), 0);
    }

    #[test]
    fn header_bytes_use_native_field_order() {
        let header = SegmentHeader {
            capacity: 7,
            count: 3,
            head: 2,
            tail: 5,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &7i32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &5i32.to_ne_bytes());
        assert_eq!(SegmentHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn unoccupied_slot_reads_as_empty_even_with_stale_bytes() {
        let mut slot = Slot::with_text("stale");
        slot.occupied = 0;
        assert_eq!(slot.text(), "");
        assert!(!slot.is_occupied());
    }

    #[test]
    fn max_width_message_fills_slot_without_losing_terminator() {
        let message = "a".repeat(MAX_MESSAGE_LEN);
        check_message(&message).unwrap();
        let slot = Slot::with_text(&message);
        assert_eq!(slot.text[SLOT_TEXT_SIZE - 1], 0);
        assert_eq!(slot.text(), message);
    }

    #[test]
    fn overlong_and_nul_messages_are_rejected() {
        let message = "a".repeat(MAX_MESSAGE_LEN + 1);
        match check_message(&message) {
            Err(QueueError::MessageTooLong { length, max }) => {
                assert_eq!(length, MAX_MESSAGE_LEN + 1);
                assert_eq!(max, MAX_MESSAGE_LEN);
            }
            other => panic!("Expected MessageTooLong, got {:?}", other),
        }
        assert!(matches!(check_message("a\0b"), Err(QueueError::InvalidMessage)));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_message("short"), "short");
        let long = "x".repeat(30);
        assert_eq!(truncate_message(&long).len(), MAX_MESSAGE_LEN);
        // 18 ASCII bytes followed by a 2-byte char straddling the limit.
        let straddling = format!("{}é", "x".repeat(18));
        assert_eq!(truncate_message(&straddling), "x".repeat(18));
    }

    #[test]
    fn capacity_bounds() {
        assert!(check_capacity(1).is_ok());
        assert!(check_capacity(MAX_CAPACITY).is_ok());
        assert!(matches!(check_capacity(0), Err(QueueError::InvalidCapacity(0))));
        assert!(check_capacity(MAX_CAPACITY + 1).is_err());
    }

    #[test]
    fn config_timeouts() {
        let mut cfg = QueueConfig::default();
        cfg.read_timeout_ms = None;
        assert_eq!(cfg.read_timeout(), Timeout::Infinite);
        assert_eq!(cfg.write_timeout(), Timeout::Val(Duration::from_millis(1_000)));
        assert_eq!(Timeout::from(Duration::ZERO), Timeout::NONE);
        cfg.data_dir = "/tmp".to_string();
        cfg.queue_name = "q.bin".to_string();
        assert_eq!(cfg.path(), PathBuf::from("/tmp/q.bin"));
    }
}
