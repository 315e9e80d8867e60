//! The 4-byte `InfoHeader` shared by four of the five message kinds, and the
//! 36-byte `DatagramHeader` used by data packets (§4.1).
//!
//! Multi-byte fields are stored as raw byte arrays (network/big-endian order)
//! rather than native integers, so the struct can be safely viewed as bytes
//! via `bytemuck` without ever being misinterpreted as host-endian.

use bytemuck::{Pod, Zeroable};

pub const MAGIC_STATUS_OR_COMMAND: u16 = 0xFACE;
pub const MAGIC_DATA: u16 = 0xFACD;

pub const MSG_TYPE_SCAN_REQUEST: u8 = 2;
pub const MSG_TYPE_SET_WINDOW: u8 = 4;
pub const MSG_TYPE_DISCONNECT: u8 = 6;
pub const MSG_TYPE_BROADCAST_CONNECT: u8 = 7;
pub const MSG_TYPE_STATUS: u8 = 3;

pub const SCAN_HEAD_COMMAND_PORT: u16 = 12346;

/// The common 4-byte header: magic, size, type.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
pub struct InfoHeader {
    magic: [u8; 2],
    size: u8,
    kind: u8,
}

impl InfoHeader {
    pub const SIZE: usize = 4;

    pub fn new(magic: u16, size: u8, kind: u8) -> Self {
        InfoHeader {
            magic: magic.to_be_bytes(),
            size,
            kind,
        }
    }

    pub fn magic(&self) -> u16 {
        u16::from_be_bytes(self.magic)
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn kind(&self) -> u8 {
        self.kind
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        bytemuck::bytes_of(self).try_into().unwrap()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(*bytemuck::from_bytes(&bytes[..Self::SIZE]))
    }
}

/// The 36-byte header every data packet (0xFACD) carries ahead of its
/// variable-length step/encoder/payload tail.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
pub struct DatagramHeader {
    magic: [u8; 2],
    exposure_time_us: [u8; 2],
    scan_head_id: u8,
    camera_id: u8,
    laser_id: u8,
    flags: u8,
    timestamp_ns: [u8; 8],
    laser_on_time_us: [u8; 2],
    data_type: [u8; 2],
    data_length: [u8; 2],
    number_encoders: u8,
    deprecated: u8,
    datagram_position: [u8; 4],
    number_datagrams: [u8; 4],
    start_column: [u8; 2],
    end_column: [u8; 2],
}

impl DatagramHeader {
    pub const SIZE: usize = 36;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exposure_time_us: u16,
        scan_head_id: u8,
        camera_id: u8,
        laser_id: u8,
        flags: u8,
        timestamp_ns: u64,
        laser_on_time_us: u16,
        data_type: u16,
        data_length: u16,
        number_encoders: u8,
        datagram_position: u32,
        number_datagrams: u32,
        start_column: u16,
        end_column: u16,
    ) -> Self {
        DatagramHeader {
            magic: MAGIC_DATA.to_be_bytes(),
            exposure_time_us: exposure_time_us.to_be_bytes(),
            scan_head_id,
            camera_id,
            laser_id,
            flags,
            timestamp_ns: timestamp_ns.to_be_bytes(),
            laser_on_time_us: laser_on_time_us.to_be_bytes(),
            data_type: data_type.to_be_bytes(),
            data_length: data_length.to_be_bytes(),
            number_encoders,
            deprecated: 0,
            datagram_position: datagram_position.to_be_bytes(),
            number_datagrams: number_datagrams.to_be_bytes(),
            start_column: start_column.to_be_bytes(),
            end_column: end_column.to_be_bytes(),
        }
    }

    pub fn magic(&self) -> u16 {
        u16::from_be_bytes(self.magic)
    }
    pub fn exposure_time_us(&self) -> u16 {
        u16::from_be_bytes(self.exposure_time_us)
    }
    pub fn set_exposure_time_us(&mut self, value: u16) {
        self.exposure_time_us = value.to_be_bytes();
    }
    pub fn scan_head_id(&self) -> u8 {
        self.scan_head_id
    }
    pub fn camera_id(&self) -> u8 {
        self.camera_id
    }
    pub fn laser_id(&self) -> u8 {
        self.laser_id
    }
    pub fn flags(&self) -> u8 {
        self.flags
    }
    pub fn timestamp_ns(&self) -> u64 {
        u64::from_be_bytes(self.timestamp_ns)
    }
    pub fn laser_on_time_us(&self) -> u16 {
        u16::from_be_bytes(self.laser_on_time_us)
    }
    pub fn data_type(&self) -> u16 {
        u16::from_be_bytes(self.data_type)
    }
    pub fn data_length(&self) -> u16 {
        u16::from_be_bytes(self.data_length)
    }
    pub fn number_encoders(&self) -> u8 {
        self.number_encoders
    }
    pub fn datagram_position(&self) -> u32 {
        u32::from_be_bytes(self.datagram_position)
    }
    pub fn number_datagrams(&self) -> u32 {
        u32::from_be_bytes(self.number_datagrams)
    }
    pub fn start_column(&self) -> u16 {
        u16::from_be_bytes(self.start_column)
    }
    pub fn end_column(&self) -> u16 {
        u16::from_be_bytes(self.end_column)
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        bytemuck::bytes_of(self).try_into().unwrap()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(*bytemuck::from_bytes(&bytes[..Self::SIZE]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_header_round_trips() {
        let hdr = InfoHeader::new(MAGIC_STATUS_OR_COMMAND, 20, MSG_TYPE_STATUS);
        let bytes = hdr.to_bytes();
        let back = InfoHeader::from_bytes(&bytes).unwrap();
        assert_eq!(back.magic(), MAGIC_STATUS_OR_COMMAND);
        assert_eq!(back.size(), 20);
        assert_eq!(back.kind(), MSG_TYPE_STATUS);
    }

    #[test]
    fn datagram_header_round_trips_big_endian() {
        let hdr = DatagramHeader::new(1234, 1, 0, 0, 0, 0xDEAD_BEEF_0000_0001, 500, 3, 200, 2, 2, 4, 0, 1455);
        let bytes = hdr.to_bytes();
        // magic must be big-endian on the wire regardless of host endianness.
        assert_eq!(&bytes[0..2], &[0xFA, 0xCD]);
        let back = DatagramHeader::from_bytes(&bytes).unwrap();
        assert_eq!(back.timestamp_ns(), 0xDEAD_BEEF_0000_0001);
        assert_eq!(back.datagram_position(), 2);
        assert_eq!(back.number_datagrams(), 4);
        assert_eq!(back.end_column(), 1455);
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(InfoHeader::from_bytes(&[0u8; 2]).is_none());
        assert!(DatagramHeader::from_bytes(&[0u8; 10]).is_none());
    }
}
