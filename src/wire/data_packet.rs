//! Data packet (0xFACD) parsing: fixed header, variable step/encoder tail,
//! and the stride formula that spreads one profile's samples over several
//! fragments (§4.1).

use crate::error::{Result, ScanError};
use crate::wire::header::{DatagramHeader, MAGIC_DATA};

/// Data-type bitmask values (§4.1).
pub mod data_type {
    pub const BRIGHTNESS: u16 = 1;
    pub const XY_DATA: u16 = 2;
    pub const WIDTH: u16 = 4;
    pub const SECOND_MOMENT: u16 = 8;
    pub const SUBPIXEL: u16 = 16;
    pub const IMAGE: u16 = 32;

    pub const ALL_BITS: [u16; 6] = [BRIGHTNESS, XY_DATA, WIDTH, SECOND_MOMENT, SUBPIXEL, IMAGE];

    /// Per-value wire size, in bytes, for a single bit of the data-type mask.
    pub fn value_size(bit: u16) -> usize {
        match bit {
            BRIGHTNESS | IMAGE => 1,
            XY_DATA => 4,
            WIDTH | SECOND_MOMENT | SUBPIXEL => 2,
            _ => 0,
        }
    }
}

/// Number of samples a single fragment (`datagram_position` of
/// `number_datagrams`) carries for a data type spanning `num_cols` columns
/// at the given `step`, per the stride formula in §4.1.
pub fn fragment_value_count(num_cols: u32, step: u32, number_datagrams: u32, datagram_position: u32) -> usize {
    if step == 0 || number_datagrams == 0 {
        return 0;
    }
    let base = num_cols / (number_datagrams * step);
    let remainder = (num_cols / step) % number_datagrams;
    let extra = if remainder > datagram_position { 1 } else { 0 };
    (base + extra) as usize
}

/// The wire column for sample index `j` (0-based) within a fragment at
/// `datagram_position` of `number_datagrams`, per the interleave formula.
pub fn fragment_column(start_column: u16, step: u16, j: usize, datagram_position: u32, number_datagrams: u32) -> u16 {
    let col = j as u32 * number_datagrams + datagram_position;
    start_column + (col * step as u32) as u16
}

/// A borrowed view over one data packet: the parsed fixed header, the
/// per-data-type step values, the encoder readings, and the payload slice.
#[derive(Debug)]
pub struct DataPacketView<'a> {
    pub header: DatagramHeader,
    pub steps: Vec<u16>,
    pub encoders: Vec<i64>,
    pub payload: &'a [u8],
}

impl<'a> DataPacketView<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < DatagramHeader::SIZE {
            return Err(ScanError::Internal("data packet shorter than header".into()));
        }
        let header = DatagramHeader::from_bytes(bytes)
            .ok_or_else(|| ScanError::Internal("data packet missing header".into()))?;
        if header.magic() != MAGIC_DATA {
            return Err(ScanError::Internal("data packet has wrong magic".into()));
        }
        let n_types = header.data_type().count_ones() as usize;
        let steps_start = DatagramHeader::SIZE;
        let steps_end = steps_start + n_types * 2;
        let encoders_end = steps_end + header.number_encoders() as usize * 8;
        if bytes.len() < encoders_end {
            return Err(ScanError::Internal("data packet missing step/encoder tail".into()));
        }
        let steps = bytes[steps_start..steps_end]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        let encoders = bytes[steps_end..encoders_end]
            .chunks_exact(8)
            .map(|c| i64::from_be_bytes(c.try_into().unwrap()))
            .collect();
        let payload = &bytes[encoders_end..];
        Ok(DataPacketView { header, steps, encoders, payload })
    }

    /// The step value associated with a given data-type bit, if that bit is set.
    pub fn step_for(&self, bit: u16) -> Option<u16> {
        let mask = self.header.data_type();
        if mask & bit == 0 {
            return None;
        }
        // Steps are ordered by ascending bit value among the set bits.
        let index = data_type::ALL_BITS
            .iter()
            .filter(|&&b| mask & b != 0)
            .position(|&b| b == bit)?;
        self.steps.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_covers_all_columns_exactly_once_total() {
        // Invariant 4: summing num_vals over all fragments equals num_cols/step.
        for &(num_cols, step, n) in &[(1456u32, 1u32, 4u32), (1456, 2, 3), (100, 7, 5), (1, 1, 1)] {
            let total: usize = (0..n).map(|p| fragment_value_count(num_cols, step, n, p)).sum();
            assert_eq!(total, (num_cols / step) as usize, "num_cols={num_cols} step={step} n={n}");
        }
    }

    #[test]
    fn s6_scenario_364_values_at_position_2_of_4() {
        let count = fragment_value_count(1456, 1, 4, 2);
        assert_eq!(count, 364);
        let columns: Vec<u16> = (0..count).map(|j| fragment_column(0, 1, j, 2, 4)).collect();
        let expected: Vec<u16> = (0..364).map(|i| 2 + i as u16 * 4).collect();
        assert_eq!(columns, expected);
    }

    #[test]
    fn value_sizes_match_spec_table() {
        assert_eq!(data_type::value_size(data_type::BRIGHTNESS), 1);
        assert_eq!(data_type::value_size(data_type::IMAGE), 1);
        assert_eq!(data_type::value_size(data_type::XY_DATA), 4);
        assert_eq!(data_type::value_size(data_type::WIDTH), 2);
        assert_eq!(data_type::value_size(data_type::SECOND_MOMENT), 2);
        assert_eq!(data_type::value_size(data_type::SUBPIXEL), 2);
    }

    #[test]
    fn parses_minimal_data_packet() {
        let header = DatagramHeader::new(100, 1, 0, 0, 0, 42, 50, data_type::XY_DATA, 8, 1, 0, 1, 0, 3);
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&1u16.to_be_bytes()); // one step value for XY
        bytes.extend_from_slice(&7i64.to_be_bytes()); // one encoder
        bytes.extend_from_slice(&[0, 1, 0, 2]); // payload: x=1, y=2
        let view = DataPacketView::parse(&bytes).unwrap();
        assert_eq!(view.steps, vec![1]);
        assert_eq!(view.encoders, vec![7]);
        assert_eq!(view.payload, &[0, 1, 0, 2]);
        assert_eq!(view.step_for(data_type::XY_DATA), Some(1));
        assert_eq!(view.step_for(data_type::BRIGHTNESS), None);
    }
}
