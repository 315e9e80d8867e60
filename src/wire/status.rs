//! Status message (0xFACE, type=3): version info plus the per-head telemetry
//! snapshot (§4.1).

use std::net::Ipv4Addr;

use crate::error::{Result, ScanError};
use crate::wire::header::{InfoHeader, MAGIC_STATUS_OR_COMMAND, MSG_TYPE_STATUS};

pub const VERSION_INFO_SIZE: usize = 20;
/// Fixed-size tail after the version block, before the variable encoder/camera arrays.
const FIXED_TAIL_SIZE: usize = 4 + 4 + 4 + 4 + 2 + 2 + 8 + 4 + 4 + 1 + 1 + 8 * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInformation {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub commit: u32,
    pub product: u16,
    pub flags: u16,
}

impl VersionInformation {
    /// Two major versions are compatible iff their `major` fields are equal.
    pub fn compatible(&self, other: &VersionInformation) -> bool {
        self.major == other.major
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.major.to_be_bytes());
        buf.extend_from_slice(&self.minor.to_be_bytes());
        buf.extend_from_slice(&self.patch.to_be_bytes());
        buf.extend_from_slice(&self.commit.to_be_bytes());
        buf.extend_from_slice(&self.product.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
    }

    fn decode(b: &[u8]) -> Result<Self> {
        if b.len() < VERSION_INFO_SIZE {
            return Err(ScanError::Internal("version info truncated".into()));
        }
        Ok(VersionInformation {
            major: u32::from_be_bytes(b[0..4].try_into().unwrap()),
            minor: u32::from_be_bytes(b[4..8].try_into().unwrap()),
            patch: u32::from_be_bytes(b[8..12].try_into().unwrap()),
            commit: u32::from_be_bytes(b[12..16].try_into().unwrap()),
            product: u16::from_be_bytes(b[16..18].try_into().unwrap()),
            flags: u16::from_be_bytes(b[18..20].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub version: VersionInformation,
    pub serial: u32,
    pub max_scan_rate: u32,
    pub scan_head_ip: Ipv4Addr,
    pub client_ip: Ipv4Addr,
    pub client_port: u16,
    pub scan_sync_id: u16,
    pub global_time: u64,
    pub num_packets_sent: u32,
    pub num_profiles_sent: u32,
    pub encoders: Vec<u64>,
    pub pixels_in_window: Vec<i32>,
    pub camera_temp: Vec<i32>,
}

impl StatusMessage {
    pub fn valid_encoders(&self) -> u8 {
        self.encoders.len() as u8
    }

    pub fn valid_cameras(&self) -> u8 {
        self.pixels_in_window.len() as u8
    }

    pub fn total_size(&self) -> usize {
        InfoHeader::SIZE
            + VERSION_INFO_SIZE
            + FIXED_TAIL_SIZE
            + self.encoders.len() * 8
            + self.pixels_in_window.len() * 4
            + self.camera_temp.len() * 4
    }

    pub fn encode(&self) -> Vec<u8> {
        let total = self.total_size();
        let mut buf = Vec::with_capacity(total);
        let header = InfoHeader::new(MAGIC_STATUS_OR_COMMAND, total.min(255) as u8, MSG_TYPE_STATUS);
        buf.extend_from_slice(&header.to_bytes());
        self.version.encode_into(&mut buf);
        buf.extend_from_slice(&self.serial.to_be_bytes());
        buf.extend_from_slice(&self.max_scan_rate.to_be_bytes());
        buf.extend_from_slice(&u32::from(self.scan_head_ip).to_be_bytes());
        buf.extend_from_slice(&u32::from(self.client_ip).to_be_bytes());
        buf.extend_from_slice(&self.client_port.to_be_bytes());
        buf.extend_from_slice(&self.scan_sync_id.to_be_bytes());
        buf.extend_from_slice(&self.global_time.to_be_bytes());
        buf.extend_from_slice(&self.num_packets_sent.to_be_bytes());
        buf.extend_from_slice(&self.num_profiles_sent.to_be_bytes());
        buf.push(self.valid_encoders());
        buf.push(self.valid_cameras());
        buf.extend_from_slice(&[0u8; 8 * 4]); // reserved
        for e in &self.encoders {
            buf.extend_from_slice(&e.to_be_bytes());
        }
        for p in &self.pixels_in_window {
            buf.extend_from_slice(&p.to_be_bytes());
        }
        for t in &self.camera_temp {
            buf.extend_from_slice(&t.to_be_bytes());
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = InfoHeader::from_bytes(bytes)
            .ok_or_else(|| ScanError::Internal("status message missing header".into()))?;
        if header.magic() != MAGIC_STATUS_OR_COMMAND || header.kind() != MSG_TYPE_STATUS {
            return Err(ScanError::Internal("status message has wrong magic/type".into()));
        }
        let body = &bytes[InfoHeader::SIZE..];
        if body.len() < VERSION_INFO_SIZE + FIXED_TAIL_SIZE {
            return Err(ScanError::Internal("status message truncated".into()));
        }
        let version = VersionInformation::decode(&body[0..VERSION_INFO_SIZE])?;
        let t = &body[VERSION_INFO_SIZE..];
        let serial = u32::from_be_bytes(t[0..4].try_into().unwrap());
        let max_scan_rate = u32::from_be_bytes(t[4..8].try_into().unwrap());
        let scan_head_ip = Ipv4Addr::from(u32::from_be_bytes(t[8..12].try_into().unwrap()));
        let client_ip = Ipv4Addr::from(u32::from_be_bytes(t[12..16].try_into().unwrap()));
        let client_port = u16::from_be_bytes(t[16..18].try_into().unwrap());
        let scan_sync_id = u16::from_be_bytes(t[18..20].try_into().unwrap());
        let global_time = u64::from_be_bytes(t[20..28].try_into().unwrap());
        let num_packets_sent = u32::from_be_bytes(t[28..32].try_into().unwrap());
        let num_profiles_sent = u32::from_be_bytes(t[32..36].try_into().unwrap());
        let valid_encoders = t[36] as usize;
        let valid_cameras = t[37] as usize;
        // t[38..38+32] is the reserved block.
        let tail = &t[38 + 32..];
        let encoders_bytes = valid_encoders * 8;
        let cameras_bytes = valid_cameras * 4;
        if tail.len() < encoders_bytes + 2 * cameras_bytes {
            return Err(ScanError::Internal("status message missing variable tail".into()));
        }
        let encoders = tail[0..encoders_bytes]
            .chunks_exact(8)
            .map(|c| u64::from_be_bytes(c.try_into().unwrap()))
            .collect();
        let pix_start = encoders_bytes;
        let pixels_in_window = tail[pix_start..pix_start + cameras_bytes]
            .chunks_exact(4)
            .map(|c| i32::from_be_bytes(c.try_into().unwrap()))
            .collect();
        let temp_start = pix_start + cameras_bytes;
        let camera_temp = tail[temp_start..temp_start + cameras_bytes]
            .chunks_exact(4)
            .map(|c| i32::from_be_bytes(c.try_into().unwrap()))
            .collect();

        Ok(StatusMessage {
            version,
            serial,
            max_scan_rate,
            scan_head_ip,
            client_ip,
            client_port,
            scan_sync_id,
            global_time,
            num_packets_sent,
            num_profiles_sent,
            encoders,
            pixels_in_window,
            camera_temp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StatusMessage {
        StatusMessage {
            version: VersionInformation { major: 2, minor: 1, patch: 0, commit: 0xABCD, product: 7, flags: 0 },
            serial: 12345,
            max_scan_rate: 2_000,
            scan_head_ip: Ipv4Addr::new(192, 168, 1, 10),
            client_ip: Ipv4Addr::new(192, 168, 1, 50),
            client_port: 40_000,
            scan_sync_id: 1,
            global_time: 1_000_000_000,
            num_packets_sent: 10,
            num_profiles_sent: 2,
            encoders: vec![1, 2, 3],
            pixels_in_window: vec![100, 200],
            camera_temp: vec![25, 26],
        }
    }

    #[test]
    fn status_message_round_trips() {
        let s = sample();
        let bytes = s.encode();
        let back = StatusMessage::decode(&bytes).unwrap();
        assert_eq!(back, s);
        assert_eq!(back.valid_encoders(), 3);
        assert_eq!(back.valid_cameras(), 2);
    }

    #[test]
    fn version_compatibility_matches_major_only() {
        let cases = [
            (1, 1, true),
            (2, 2, true),
            (1, 2, false),
            (2, 1, false),
            (0, 0, true),
            (5, 3, false),
            (3, 3, true),
            (10, 10, true),
        ];
        for (a, b, expect) in cases {
            let va = VersionInformation { major: a, minor: 0, patch: 0, commit: 0, product: 0, flags: 0 };
            let vb = VersionInformation { major: b, minor: 0, patch: 0, commit: 0, product: 0, flags: 0 };
            assert_eq!(va.compatible(&vb), expect, "major {a} vs {b}");
        }
    }
}
