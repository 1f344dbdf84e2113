//! Packet envelope exchanged with the host.
//!
//! # Design
//! A packet is one contiguous buffer: an 8-byte little-endian header followed
//! by content. The header carries the content length, the instance code and
//! the domain tag:
//!
//! ```text
//! [0..4] length  u32   content bytes while in transit, suspend marker when stored
//! [4..6] code    i16
//! [6]    domain  u8
//! [7]    reserved
//! ```
//!
//! When a packet is parked as suspended state, the length field is
//! overwritten with a `SuspendMarker`. From then on the buffer's own extent
//! is authoritative for size, and `restore_length` recomputes the field
//! before the packet goes back on the wire.

use bytes::{Buf, BufMut};

use crate::error::ServiceError;

/// Size of the fixed packet header.
pub const HEADER_SIZE: usize = 8;

const OFFSET_LENGTH: usize = 0;
const OFFSET_CODE: usize = 4;
const OFFSET_DOMAIN: usize = 6;

/// Host-assigned identity of an instance, stamped into every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Code(pub i16);

/// Sub-protocol a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Domain {
    Call = 0,
    Info = 1,
    Flow = 2,
    Data = 3,
}

impl Domain {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Domain::Call),
            1 => Some(Domain::Info),
            2 => Some(Domain::Flow),
            3 => Some(Domain::Data),
            _ => None,
        }
    }
}

/// Value stored in the length field of a suspended packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SuspendMarker {
    /// A call was received and must be processed again from scratch.
    Incoming = 0,
    /// A reply was built but not yet delivered.
    Outgoing = 1,
}

impl SuspendMarker {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(SuspendMarker::Incoming),
            1 => Some(SuspendMarker::Outgoing),
            _ => None,
        }
    }
}

/// A header plus content, owned as a single buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    buf: Vec<u8>,
}

impl Packet {
    /// Build a packet by copying `content` after a fresh header.
    pub fn new(code: Code, domain: Domain, content: &[u8]) -> Self {
        Self::build(code, domain, |buf| buf.extend_from_slice(content))
    }

    /// Build a packet whose content is written in place by `fill`.
    ///
    /// `fill` receives the buffer positioned just past the header and must
    /// only append to it.
    pub fn build(code: Code, domain: Domain, fill: impl FnOnce(&mut Vec<u8>)) -> Self {
        let mut buf = vec![0u8; HEADER_SIZE];
        fill(&mut buf);

        let mut packet = Self { buf };
        packet.restore_length();
        (&mut packet.buf[OFFSET_CODE..]).put_i16_le(code.0);
        packet.buf[OFFSET_DOMAIN] = domain as u8;
        packet
    }

    /// Take ownership of a raw buffer without copying it.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self, ServiceError> {
        if buf.len() < HEADER_SIZE {
            return Err(ServiceError::InvalidState { len: buf.len() });
        }
        Ok(Self { buf })
    }

    pub fn code(&self) -> Code {
        Code((&self.buf[OFFSET_CODE..]).get_i16_le())
    }

    pub fn raw_domain(&self) -> u8 {
        self.buf[OFFSET_DOMAIN]
    }

    /// Domain tag, or `None` for tags this service does not know.
    pub fn domain(&self) -> Option<Domain> {
        Domain::from_u8(self.raw_domain())
    }

    /// Raw value of the length field. Meaningful as a length only while the
    /// packet is in transit.
    pub fn length_field(&self) -> u32 {
        (&self.buf[OFFSET_LENGTH..]).get_u32_le()
    }

    /// Everything after the header.
    pub fn content(&self) -> &[u8] {
        &self.buf[HEADER_SIZE..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Interpret the length field as a suspend marker.
    pub fn suspend_marker(&self) -> Option<SuspendMarker> {
        SuspendMarker::from_u32(self.length_field())
    }

    /// Overwrite the length field with `marker`.
    pub fn mark_suspended(&mut self, marker: SuspendMarker) {
        (&mut self.buf[OFFSET_LENGTH..]).put_u32_le(marker as u32);
    }

    /// Recompute the length field from the buffer extent.
    pub fn restore_length(&mut self) {
        let len = (self.buf.len() - HEADER_SIZE) as u32;
        (&mut self.buf[OFFSET_LENGTH..]).put_u32_le(len);
    }
}
