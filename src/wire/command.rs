//! Client→scan-head command encoding: broadcast-connect, disconnect,
//! set-window, and scan-request (§4.1).

use std::net::Ipv4Addr;

use crate::error::{Result, ScanError};
use crate::wire::header::{
    InfoHeader, MAGIC_STATUS_OR_COMMAND, MSG_TYPE_BROADCAST_CONNECT, MSG_TYPE_DISCONNECT,
    MSG_TYPE_SCAN_REQUEST, MSG_TYPE_SET_WINDOW,
};

/// `connection kind` byte of the broadcast-connect command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionKind {
    Normal = 0,
    Mappler = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastConnect {
    pub client_ip: Ipv4Addr,
    /// A zero port on the wire means "use the scan-server default".
    pub client_port: u16,
    pub session_id: u8,
    pub scan_head_id: u8,
    pub connection_kind: ConnectionKind,
    pub serial: u32,
}

impl BroadcastConnect {
    pub const BODY_SIZE: usize = 4 + 2 + 1 + 1 + 1 + 4;
    pub const TOTAL_SIZE: usize = InfoHeader::SIZE + Self::BODY_SIZE;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::TOTAL_SIZE);
        let header = InfoHeader::new(
            MAGIC_STATUS_OR_COMMAND,
            Self::TOTAL_SIZE as u8,
            MSG_TYPE_BROADCAST_CONNECT,
        );
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(&u32::from(self.client_ip).to_be_bytes());
        buf.extend_from_slice(&self.client_port.to_be_bytes());
        buf.push(self.session_id);
        buf.push(self.scan_head_id);
        buf.push(self.connection_kind as u8);
        buf.extend_from_slice(&self.serial.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::TOTAL_SIZE {
            return Err(ScanError::Internal("broadcast connect shorter than fixed body".into()));
        }
        let header = InfoHeader::from_bytes(bytes)
            .ok_or_else(|| ScanError::Internal("broadcast connect missing header".into()))?;
        if header.magic() != MAGIC_STATUS_OR_COMMAND || header.kind() != MSG_TYPE_BROADCAST_CONNECT {
            return Err(ScanError::Internal("broadcast connect has wrong magic/type".into()));
        }
        let b = &bytes[InfoHeader::SIZE..];
        let client_ip = Ipv4Addr::from(u32::from_be_bytes(b[0..4].try_into().unwrap()));
        let client_port = u16::from_be_bytes(b[4..6].try_into().unwrap());
        let session_id = b[6];
        let scan_head_id = b[7];
        let connection_kind = if b[8] == ConnectionKind::Mappler as u8 { ConnectionKind::Mappler } else { ConnectionKind::Normal };
        let serial = u32::from_be_bytes(b[9..13].try_into().unwrap());
        Ok(BroadcastConnect { client_ip, client_port, session_id, scan_head_id, connection_kind, serial })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnect;

impl Disconnect {
    pub fn encode(&self) -> Vec<u8> {
        InfoHeader::new(MAGIC_STATUS_OR_COMMAND, InfoHeader::SIZE as u8, MSG_TYPE_DISCONNECT)
            .to_bytes()
            .to_vec()
    }
}

/// One half-plane constraint endpoint pair, in 1/1000 inch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConstraintRecord {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetWindow {
    pub camera_id: u8,
    pub constraints: Vec<ConstraintRecord>,
}

impl SetWindow {
    pub fn encode(&self) -> Vec<u8> {
        let body_len = 4 + self.constraints.len() * 16;
        let total = InfoHeader::SIZE + body_len;
        let mut buf = Vec::with_capacity(total);
        let header = InfoHeader::new(MAGIC_STATUS_OR_COMMAND, total as u8, MSG_TYPE_SET_WINDOW);
        buf.extend_from_slice(&header.to_bytes());
        buf.push(self.camera_id);
        buf.extend_from_slice(&[0u8; 3]);
        for c in &self.constraints {
            buf.extend_from_slice(&c.x1.to_be_bytes());
            buf.extend_from_slice(&c.y1.to_be_bytes());
            buf.extend_from_slice(&c.x2.to_be_bytes());
            buf.extend_from_slice(&c.y2.to_be_bytes());
        }
        buf
    }
}

/// `74 + 2*n` byte scan-request command body (§4.1). Fields are kept in
/// declaration order matching the wire layout table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub client_ip: Ipv4Addr,
    pub client_port: u16,
    pub request_sequence: u8,
    pub scan_head_id: u8,
    pub camera_id: u8,
    pub laser_id: u8,
    pub flags: u8,
    pub laser_exposure_min_us: u32,
    pub laser_exposure_def_us: u32,
    pub laser_exposure_max_us: u32,
    pub camera_exposure_min_us: u32,
    pub camera_exposure_def_us: u32,
    pub camera_exposure_max_us: u32,
    pub laser_detection_threshold: u32,
    pub saturation_threshold: u32,
    pub saturation_percentage: u32,
    pub target_average_intensity: u32,
    pub scan_interval_us: u32,
    pub scan_offset_us: u32,
    /// `0` is encoded as 1_000_000 on the wire, per §4.1.
    pub number_of_scans: u32,
    pub data_type_mask: u16,
    pub start_column: u16,
    pub end_column: u16,
    /// One entry per set bit of `data_type_mask`, in ascending bit order.
    pub steps: Vec<u16>,
}

impl ScanRequest {
    pub const FIXED_BODY_SIZE: usize = 74 - InfoHeader::SIZE; // bytes after the header, before steps
    pub const HEADER_AND_FIXED_BODY: usize = 74;

    pub fn total_size(&self) -> usize {
        Self::HEADER_AND_FIXED_BODY + self.steps.len() * 2
    }

    pub fn encode(&self) -> Vec<u8> {
        let total = self.total_size();
        let mut buf = Vec::with_capacity(total);
        let header = InfoHeader::new(MAGIC_STATUS_OR_COMMAND, total as u8, MSG_TYPE_SCAN_REQUEST);
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(&u32::from(self.client_ip).to_be_bytes());
        buf.extend_from_slice(&self.client_port.to_be_bytes());
        buf.push(self.request_sequence);
        buf.push(self.scan_head_id);
        buf.push(self.camera_id);
        buf.push(self.laser_id);
        buf.push(0); // deprecated
        buf.push(self.flags);
        buf.extend_from_slice(&self.laser_exposure_min_us.to_be_bytes());
        buf.extend_from_slice(&self.laser_exposure_def_us.to_be_bytes());
        buf.extend_from_slice(&self.laser_exposure_max_us.to_be_bytes());
        buf.extend_from_slice(&self.camera_exposure_min_us.to_be_bytes());
        buf.extend_from_slice(&self.camera_exposure_def_us.to_be_bytes());
        buf.extend_from_slice(&self.camera_exposure_max_us.to_be_bytes());
        buf.extend_from_slice(&self.laser_detection_threshold.to_be_bytes());
        buf.extend_from_slice(&self.saturation_threshold.to_be_bytes());
        buf.extend_from_slice(&self.saturation_percentage.to_be_bytes());
        buf.extend_from_slice(&self.target_average_intensity.to_be_bytes());
        buf.extend_from_slice(&self.scan_interval_us.to_be_bytes());
        buf.extend_from_slice(&self.scan_offset_us.to_be_bytes());
        let wire_num_scans = if self.number_of_scans == 0 { 1_000_000 } else { self.number_of_scans };
        buf.extend_from_slice(&wire_num_scans.to_be_bytes());
        buf.extend_from_slice(&self.data_type_mask.to_be_bytes());
        buf.extend_from_slice(&self.start_column.to_be_bytes());
        buf.extend_from_slice(&self.end_column.to_be_bytes());
        for step in &self.steps {
            buf.extend_from_slice(&step.to_be_bytes());
        }
        debug_assert_eq!(buf.len(), total);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::HEADER_AND_FIXED_BODY {
            return Err(ScanError::Internal("scan request shorter than fixed body".into()));
        }
        let header = InfoHeader::from_bytes(bytes)
            .ok_or_else(|| ScanError::Internal("scan request missing header".into()))?;
        if header.magic() != MAGIC_STATUS_OR_COMMAND || header.kind() != MSG_TYPE_SCAN_REQUEST {
            return Err(ScanError::Internal("scan request has wrong magic/type".into()));
        }
        let b = &bytes[InfoHeader::SIZE..];
        let client_ip = Ipv4Addr::from(u32::from_be_bytes(b[0..4].try_into().unwrap()));
        let client_port = u16::from_be_bytes(b[4..6].try_into().unwrap());
        let request_sequence = b[6];
        let scan_head_id = b[7];
        let camera_id = b[8];
        let laser_id = b[9];
        // b[10] is the deprecated byte.
        let flags = b[11];
        let laser_exposure_min_us = u32::from_be_bytes(b[12..16].try_into().unwrap());
        let laser_exposure_def_us = u32::from_be_bytes(b[16..20].try_into().unwrap());
        let laser_exposure_max_us = u32::from_be_bytes(b[20..24].try_into().unwrap());
        let camera_exposure_min_us = u32::from_be_bytes(b[24..28].try_into().unwrap());
        let camera_exposure_def_us = u32::from_be_bytes(b[28..32].try_into().unwrap());
        let camera_exposure_max_us = u32::from_be_bytes(b[32..36].try_into().unwrap());
        let laser_detection_threshold = u32::from_be_bytes(b[36..40].try_into().unwrap());
        let saturation_threshold = u32::from_be_bytes(b[40..44].try_into().unwrap());
        let saturation_percentage = u32::from_be_bytes(b[44..48].try_into().unwrap());
        let target_average_intensity = u32::from_be_bytes(b[48..52].try_into().unwrap());
        let scan_interval_us = u32::from_be_bytes(b[52..56].try_into().unwrap());
        let scan_offset_us = u32::from_be_bytes(b[56..60].try_into().unwrap());
        let wire_num_scans = u32::from_be_bytes(b[60..64].try_into().unwrap());
        let number_of_scans = if wire_num_scans == 1_000_000 { 0 } else { wire_num_scans };
        let data_type_mask = u16::from_be_bytes(b[64..66].try_into().unwrap());
        let start_column = u16::from_be_bytes(b[66..68].try_into().unwrap());
        let end_column = u16::from_be_bytes(b[68..70].try_into().unwrap());

        let n_types = data_type_mask.count_ones() as usize;
        let steps_start = InfoHeader::SIZE + 70;
        let steps_end = steps_start + n_types * 2;
        if bytes.len() < steps_end {
            return Err(ScanError::Internal("scan request missing step values".into()));
        }
        let steps = bytes[steps_start..steps_end]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();

        Ok(ScanRequest {
            client_ip,
            client_port,
            request_sequence,
            scan_head_id,
            camera_id,
            laser_id,
            flags,
            laser_exposure_min_us,
            laser_exposure_def_us,
            laser_exposure_max_us,
            camera_exposure_min_us,
            camera_exposure_def_us,
            camera_exposure_max_us,
            laser_detection_threshold,
            saturation_threshold,
            saturation_percentage,
            target_average_intensity,
            scan_interval_us,
            scan_offset_us,
            number_of_scans,
            data_type_mask,
            start_column,
            end_column,
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request(steps: Vec<u16>, mask: u16) -> ScanRequest {
        ScanRequest {
            client_ip: Ipv4Addr::new(192, 168, 1, 50),
            client_port: 50_123,
            request_sequence: 7,
            scan_head_id: 2,
            camera_id: 0,
            laser_id: 0,
            flags: 0,
            laser_exposure_min_us: 100,
            laser_exposure_def_us: 500,
            laser_exposure_max_us: 1_000,
            camera_exposure_min_us: 15_000,
            camera_exposure_def_us: 500_000,
            camera_exposure_max_us: 900_000,
            laser_detection_threshold: 120,
            saturation_threshold: 800,
            saturation_percentage: 30,
            target_average_intensity: 50,
            scan_interval_us: 2_000,
            scan_offset_us: 0,
            number_of_scans: 0,
            data_type_mask: mask,
            start_column: 0,
            end_column: 1_455,
            steps,
        }
    }

    #[test]
    fn scan_request_round_trips_byte_for_byte() {
        let req = sample_request(vec![1, 1], 0b11);
        let encoded = req.encode();
        assert_eq!(encoded[2] as usize, encoded.len());
        let decoded = ScanRequest::decode(&encoded).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn zero_number_of_scans_round_trips_through_wire_sentinel() {
        let req = sample_request(vec![1], 0b10);
        let encoded = req.encode();
        // offset 64 (4 header + 60) holds num_scans
        let wire_value = u32::from_be_bytes(encoded[64..68].try_into().unwrap());
        assert_eq!(wire_value, 1_000_000);
        let decoded = ScanRequest::decode(&encoded).unwrap();
        assert_eq!(decoded.number_of_scans, 0);
    }

    #[test]
    fn broadcast_connect_encodes_fixed_size() {
        let cmd = BroadcastConnect {
            client_ip: Ipv4Addr::new(10, 0, 0, 5),
            client_port: 0,
            session_id: 3,
            scan_head_id: 1,
            connection_kind: ConnectionKind::Normal,
            serial: 12345,
        };
        let bytes = cmd.encode();
        assert_eq!(bytes.len(), BroadcastConnect::TOTAL_SIZE);
        assert_eq!(bytes[0..2], [0xFA, 0xCE]);
    }

    #[test]
    fn broadcast_connect_round_trips() {
        let cmd = BroadcastConnect {
            client_ip: Ipv4Addr::new(192, 168, 1, 40),
            client_port: 54321,
            session_id: 7,
            scan_head_id: 2,
            connection_kind: ConnectionKind::Mappler,
            serial: 99,
        };
        let bytes = cmd.encode();
        let back = BroadcastConnect::decode(&bytes).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn set_window_size_matches_header() {
        let cmd = SetWindow {
            camera_id: 0,
            constraints: vec![ConstraintRecord::default(); 4],
        };
        let bytes = cmd.encode();
        assert_eq!(bytes[2] as usize, bytes.len());
    }
}
