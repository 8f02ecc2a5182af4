use jiff::Timestamp;

use crate::err::{DeserializationError, DeserializationResult};
use crate::field_cursor::PointerSize;
use crate::guid::Guid;
use crate::utils::filetime_to_timestamp;

/// The fixed header the capture source supplies alongside every payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    pub provider_guid: Guid,
    pub event_id: u16,
    pub version: u8,
    pub task: u16,
    pub opcode: u8,
    pub timestamp: Timestamp,
    pub process_id: u32,
    pub thread_id: u32,
    /// Pointer width of the process that emitted the event.
    pub pointer_size: PointerSize,
    /// Payload length declared by the capture source; `None` means "the whole buffer".
    pub payload_len: Option<u32>,
}

impl RecordHeader {
    pub fn new(provider_guid: Guid, event_id: u16) -> Self {
        RecordHeader {
            provider_guid,
            event_id,
            version: 0,
            task: 0,
            opcode: 0,
            timestamp: Timestamp::UNIX_EPOCH,
            process_id: 0,
            thread_id: 0,
            pointer_size: PointerSize::default(),
            payload_len: None,
        }
    }

    pub fn with_pointer_size(mut self, pointer_size: PointerSize) -> Self {
        self.pointer_size = pointer_size;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the timestamp from a Windows FILETIME (100ns ticks since 1601).
    pub fn with_filetime(mut self, filetime: u64) -> DeserializationResult<Self> {
        self.timestamp = filetime_to_timestamp(filetime)?;
        Ok(self)
    }

    pub fn with_task(mut self, task: u16, opcode: u8) -> Self {
        self.task = task;
        self.opcode = opcode;
        self
    }

    pub fn with_process(mut self, process_id: u32, thread_id: u32) -> Self {
        self.process_id = process_id;
        self.thread_id = thread_id;
        self
    }

    pub fn with_payload_len(mut self, payload_len: u32) -> Self {
        self.payload_len = Some(payload_len);
        self
    }
}

/// A record as handed over by the capture source, valid for one decode+dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRecord<'a> {
    pub header: &'a RecordHeader,
    data: &'a [u8],
}

impl<'a> RawRecord<'a> {
    pub fn new(header: &'a RecordHeader, data: &'a [u8]) -> Self {
        RawRecord { header, data }
    }

    /// The payload, limited to the declared length.
    pub fn payload(&self) -> DeserializationResult<&'a [u8]> {
        match self.header.payload_len {
            None => Ok(self.data),
            Some(declared) => self.data.get(..declared as usize).ok_or(
                DeserializationError::PayloadLengthMismatch {
                    declared,
                    available: self.data.len(),
                },
            ),
        }
    }
}

/// A record that owns its payload, for buffering streams between threads.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedRecord {
    pub header: RecordHeader,
    pub data: Vec<u8>,
}

impl OwnedRecord {
    pub fn new(header: RecordHeader, data: Vec<u8>) -> Self {
        OwnedRecord { header, data }
    }

    pub fn as_raw(&self) -> RawRecord<'_> {
        RawRecord::new(&self.header, &self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_payload_length_limits_the_view() {
        let header = RecordHeader::new(Guid::default(), 1).with_payload_len(2);
        let record = RawRecord::new(&header, &[1, 2, 3]);
        assert_eq!(record.payload().unwrap(), &[1, 2]);

        let header = RecordHeader::new(Guid::default(), 1).with_payload_len(4);
        let record = RawRecord::new(&header, &[1, 2, 3]);
        assert!(matches!(
            record.payload(),
            Err(DeserializationError::PayloadLengthMismatch {
                declared: 4,
                available: 3
            })
        ));
    }

    #[test]
    fn test_filetime_header() {
        let header = RecordHeader::new(Guid::default(), 1)
            .with_filetime(116_444_736_000_000_000)
            .unwrap();
        assert_eq!(header.timestamp, Timestamp::UNIX_EPOCH);
    }
}
