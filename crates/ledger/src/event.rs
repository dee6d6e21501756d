//! Ledger events.

use fornax_types::{read_bytes, read_u16, read_u64, write_bytes, write_u16, write_u64, Codec,
    Coordinate,
};
use std::io::{self, Read, Write};

/// Pack an event id from its emitting coordinate and intra-slot index.
pub fn marshal_event_id(coord: Coordinate, index: u16) -> u64 {
    (coord.height as u64) << 32 | (coord.index as u64) << 16 | index as u64
}

/// An event emitted during transaction execution and persisted with the
/// block. The payload layout is owned by the emitting transaction type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub coord: Coordinate,
    pub index: u16,
    pub event_type: u64,
    pub payload: Vec<u8>,
}

impl EventRecord {
    pub fn id(&self) -> u64 {
        marshal_event_id(self.coord, self.index)
    }
}

impl Codec for EventRecord {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.coord.write_to(w)?;
        write_u16(w, self.index)?;
        write_u64(w, self.event_type)?;
        write_bytes(w, &self.payload)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            coord: Coordinate::read_from(r)?,
            index: read_u16(r)?,
            event_type: read_u64(r)?,
            payload: read_bytes(r)?,
        })
    }
}
