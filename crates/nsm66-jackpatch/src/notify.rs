//! Port-registration notifications across the JACK callback boundary.
//!
//! The registration callback runs on a JACK thread and must not block
//! or allocate; it writes one fixed-size record per event into a
//! single-producer single-consumer ring buffer. The main loop is the
//! sole consumer and drains by peek-then-read. Overflow drops the
//! event and is logged; it never blocks the callback.

use jack::{RingBufferReader, RingBufferWriter};
use tracing::warn;

/// Ring-buffer capacity in bytes.
pub const RING_CAPACITY: usize = 8192;

/// Maximum stored port-name length. The Linux JACK limit is
/// client (64) + port (256), but names beyond this are unheard of.
pub const NAME_CAPACITY: usize = 256;

/// Record layout: `len: u32 | registered: u8 | name: [u8; 256]`.
pub const RECORD_SIZE: usize = 4 + 1 + NAME_CAPACITY;

/// One decoded registration event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEvent {
    pub name: String,
    pub registered: bool,
}

/// Encode an event into one fixed-size record. Stack-only.
#[must_use]
pub fn encode_record(name: &str, registered: bool) -> [u8; RECORD_SIZE] {
    let mut record = [0u8; RECORD_SIZE];
    let bytes = name.as_bytes();
    let len = bytes.len().min(NAME_CAPACITY);
    record[0..4].copy_from_slice(&(len as u32).to_ne_bytes());
    record[4] = u8::from(registered);
    record[5..5 + len].copy_from_slice(&bytes[..len]);
    record
}

/// Decode one record read from the ring buffer.
#[must_use]
pub fn decode_record(record: &[u8; RECORD_SIZE]) -> PortEvent {
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&record[0..4]);
    let len = (u32::from_ne_bytes(len_bytes) as usize).min(NAME_CAPACITY);
    PortEvent {
        name: String::from_utf8_lossy(&record[5..5 + len]).into_owned(),
        registered: record[4] != 0,
    }
}

/// Producer side, called from the JACK notification thread. Returns
/// `false` when the buffer is full and the event was dropped.
pub fn write_event(writer: &mut RingBufferWriter, name: &str, registered: bool) -> bool {
    if writer.space() < RECORD_SIZE {
        return false;
    }
    let record = encode_record(name, registered);
    writer.write_buffer(&record) == RECORD_SIZE
}

/// Consumer side: peek for a complete record, then read it.
pub fn try_read_event(reader: &mut RingBufferReader) -> Option<PortEvent> {
    let mut len_bytes = [0u8; 4];
    if reader.peek(&mut len_bytes) < len_bytes.len() {
        return None;
    }
    if reader.space() < RECORD_SIZE {
        return None;
    }
    let mut record = [0u8; RECORD_SIZE];
    if reader.read_buffer(&mut record) < RECORD_SIZE {
        return None;
    }
    Some(decode_record(&record))
}

/// The JACK notification handler: resolves the port name and queues
/// one record. Nothing here may wait on the main loop.
pub struct PortNotifier {
    writer: RingBufferWriter,
}

impl PortNotifier {
    #[must_use]
    pub fn new(writer: RingBufferWriter) -> Self {
        Self { writer }
    }
}

impl jack::NotificationHandler for PortNotifier {
    fn port_registration(
        &mut self,
        client: &jack::Client,
        port_id: jack::PortId,
        is_registered: bool,
    ) {
        let Some(port) = client.port_by_id(port_id) else {
            return;
        };
        let Ok(name) = port.name() else {
            return;
        };
        if !write_event(&mut self.writer, &name, is_registered) {
            warn!(port = %name, "port notification buffer overrun, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip() {
        let record = encode_record("seq66:midi_out", true);
        let event = decode_record(&record);
        assert_eq!(
            event,
            PortEvent {
                name: "seq66:midi_out".to_string(),
                registered: true,
            }
        );

        let record = encode_record("fluidsynth:midi_in", false);
        let event = decode_record(&record);
        assert!(!event.registered);
        assert_eq!(event.name, "fluidsynth:midi_in");
    }

    #[test]
    fn oversized_names_are_truncated_not_overflowed() {
        let long = "c".repeat(NAME_CAPACITY + 50);
        let record = encode_record(&long, true);
        let event = decode_record(&record);
        assert_eq!(event.name.len(), NAME_CAPACITY);
    }

    #[test]
    fn capacity_holds_a_burst_of_records() {
        // The 8 KiB buffer must absorb a typical session's worth of
        // registrations between drains.
        assert!(RING_CAPACITY / RECORD_SIZE >= 30);
    }
}
