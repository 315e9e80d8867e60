//! Profile assembler (C3, §4.3): groups data-packet fragments into complete
//! (or lost) profiles.

use crate::alignment::{Alignment, MilPoint};
use crate::profile::{CameraId, Profile, SourceId, INVALID_COORDINATE};
use crate::wire::{data_packet, data_type, DataPacketView};

/// One assembler per scan-head receiver. Holds at most one in-flight profile.
pub struct ProfileAssembler {
    scan_head_id: u32,
    in_flight: Option<(SourceId, u64, Profile)>,
}

impl ProfileAssembler {
    pub fn new(scan_head_id: u32) -> Self {
        ProfileAssembler { scan_head_id, in_flight: None }
    }

    /// Processes one data packet. `alignments` are indexed by [`CameraId`] as
    /// `0usize`/`1usize`. Returns zero, one, or two profiles that became
    /// ready for the queue: a stamped-and-flushed previous partial (if the
    /// packet belongs to a new source/timestamp pair), and/or the profile
    /// this packet just completed.
    pub fn on_data_packet(&mut self, view: &DataPacketView, alignments: &[Alignment; 2]) -> Vec<Profile> {
        let mut ready = Vec::new();
        let source = SourceId::new(view.header.scan_head_id(), view.header.camera_id(), view.header.laser_id());
        let timestamp = view.header.timestamp_ns();

        let boundary_changed = match &self.in_flight {
            Some((s, t, _)) => *s != source || *t != timestamp,
            None => false,
        };
        if boundary_changed {
            if let Some((_, _, mut partial)) = self.in_flight.take() {
                partial.udp_packets_expected = partial.udp_packets_received;
                ready.push(partial);
            }
        }

        if self.in_flight.is_none() {
            let camera = CameraId::from_wire(view.header.camera_id());
            let mut profile = Profile::new(self.scan_head_id, camera, view.header.laser_id(), timestamp, view.header.data_type());
            profile.exposure_time_us = view.header.exposure_time_us() as u32;
            profile.laser_on_time_us = view.header.laser_on_time_us() as u32;
            profile.encoders = view.encoders.clone();
            self.in_flight = Some((source, timestamp, profile));
        }

        let alignment = &alignments[CameraId::from_wire(view.header.camera_id()).to_wire() as usize];
        {
            let (_, _, profile) = self.in_flight.as_mut().expect("just ensured in-flight profile exists");
            apply_payload(view, profile, alignment);
            profile.udp_packets_received += 1;

            if profile.udp_packets_received == view.header.number_datagrams() {
                let (_, _, mut done) = self.in_flight.take().unwrap();
                done.udp_packets_expected = view.header.number_datagrams();
                ready.push(done);
            }
        }

        ready
    }

    /// Flushes any in-flight profile, stamping its received count as the
    /// expected count (a loss, not an error). Used when the receiver stops.
    pub fn flush(&mut self) -> Option<Profile> {
        self.in_flight.take().map(|(_, _, mut p)| {
            p.udp_packets_expected = p.udp_packets_received;
            p
        })
    }
}

fn apply_payload(view: &DataPacketView, profile: &mut Profile, alignment: &Alignment) {
    let mask = view.header.data_type();
    let num_cols = (view.header.end_column() - view.header.start_column() + 1) as u32;
    let position = view.header.datagram_position();
    let n_frags = view.header.number_datagrams();

    if mask & data_type::IMAGE != 0 {
        // Firmware quirk: image-mode packets report exposure time left-shifted by 8 bits.
        profile.exposure_time_us = (view.header.exposure_time_us() as u32) << 8;
        if let Some(image) = profile.image.as_mut() {
            let offset = position as usize * 4 * crate::profile::IMAGE_WIDTH;
            let len = view.payload.len().min(image.len().saturating_sub(offset));
            image[offset..offset + len].copy_from_slice(&view.payload[..len]);
        }
        return;
    }

    let has_xy = mask & data_type::XY_DATA != 0;
    let has_brightness = mask & data_type::BRIGHTNESS != 0;
    if !has_xy {
        return; // Width/SecondMoment/Subpixel-only profiles are not materialized into `points`.
    }

    let xy_step = view.step_for(data_type::XY_DATA).unwrap_or(1) as u32;
    let num_vals = data_packet::fragment_value_count(num_cols, xy_step, n_frags, position);

    let mut offset = 0usize;
    let xy_size = data_type::value_size(data_type::XY_DATA);
    let brightness_size = data_type::value_size(data_type::BRIGHTNESS);

    // XY always precedes brightness in payload ordering when both are present.
    let xy_bytes = &view.payload[offset..offset + num_vals * xy_size];
    offset += num_vals * xy_size;
    let brightness_bytes = if has_brightness {
        Some(&view.payload[offset..offset + num_vals * brightness_size])
    } else {
        None
    };

    for j in 0..num_vals {
        let col = data_packet::fragment_column(view.header.start_column(), xy_step as u16, j, position, n_frags);
        let xb = &xy_bytes[j * xy_size..j * xy_size + xy_size];
        let x = i16::from_be_bytes([xb[0], xb[1]]);
        let y = i16::from_be_bytes([xb[2], xb[3]]);
        if x == INVALID_COORDINATE && y == INVALID_COORDINATE {
            continue;
        }
        let mill = alignment.camera_to_mill(MilPoint::new(x as i32, y as i32));
        let idx = col as usize;
        if idx >= profile.points.len() {
            continue;
        }
        profile.points[idx].x_mils = mill.x.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        profile.points[idx].y_mils = mill.y.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        profile.valid_geometry_count += 1;

        if let Some(bb) = brightness_bytes {
            profile.points[idx].brightness = bb[j];
            profile.valid_brightness_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::header::DatagramHeader;

    fn identity_alignments() -> [Alignment; 2] {
        [Alignment::new(0.0, 0.0, 0.0, false), Alignment::new(0.0, 0.0, 0.0, false)]
    }

    fn make_packet(position: u32, n: u32, num_cols: u16) -> Vec<u8> {
        let step = 1u16;
        let count = data_packet::fragment_value_count(num_cols as u32, step as u32, n, position);
        let header = DatagramHeader::new(
            100,
            1,
            0,
            0,
            0,
            999,
            50,
            data_type::XY_DATA | data_type::BRIGHTNESS,
            (count * 5) as u16,
            0,
            position,
            n,
            0,
            num_cols - 1,
        );
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&step.to_be_bytes()); // XY step
        bytes.extend_from_slice(&step.to_be_bytes()); // Brightness step
        for j in 0..count {
            let col = data_packet::fragment_column(0, step, j, position, n);
            bytes.extend_from_slice(&(col as i16).to_be_bytes());
            bytes.extend_from_slice(&(-(col as i16)).to_be_bytes());
        }
        for j in 0..count {
            bytes.push((j % 256) as u8);
        }
        bytes
    }

    #[test]
    fn at_least_once_delivery_across_out_of_order_fragments() {
        let alignments = identity_alignments();
        let mut assembler = ProfileAssembler::new(7);
        let n = 4u32;
        let mut order: Vec<u32> = (0..n).collect();
        order.reverse();
        let mut completed = Vec::new();
        for p in order {
            let bytes = make_packet(p, n, 1456);
            let view = DataPacketView::parse(&bytes).unwrap();
            completed.extend(assembler.on_data_packet(&view, &alignments));
        }
        assert_eq!(completed.len(), 1);
        let profile = &completed[0];
        assert_eq!(profile.udp_packets_received, n);
        assert_eq!(profile.udp_packets_expected, n);
        assert!(profile.is_complete());
        assert_eq!(profile.valid_geometry_count, 1456);
        assert_eq!(profile.valid_brightness_count, 1456);
    }

    #[test]
    fn boundary_change_flushes_lost_partial() {
        let alignments = identity_alignments();
        let mut assembler = ProfileAssembler::new(1);
        let first = make_packet(0, 4, 1456);
        let view1 = DataPacketView::parse(&first).unwrap();
        let ready1 = assembler.on_data_packet(&view1, &alignments);
        assert!(ready1.is_empty());

        // A packet for a different timestamp arrives before the first completes.
        let mut second = make_packet(0, 4, 1456);
        // Bump the timestamp field (bytes 8..16 of the header).
        second[8..16].copy_from_slice(&1000u64.to_be_bytes());
        let view2 = DataPacketView::parse(&second).unwrap();
        let ready2 = assembler.on_data_packet(&view2, &alignments);

        assert_eq!(ready2.len(), 1);
        let lost = &ready2[0];
        assert_eq!(lost.timestamp_ns, 999);
        assert_eq!(lost.udp_packets_received, 1);
        assert_eq!(lost.udp_packets_expected, 1);
        assert!(!lost.is_complete() || lost.udp_packets_expected == 1);
    }

    #[test]
    fn invalid_sentinel_points_are_skipped() {
        let alignments = identity_alignments();
        let mut assembler = ProfileAssembler::new(1);
        let header = DatagramHeader::new(100, 1, 0, 0, 0, 1, 50, data_type::XY_DATA, 4, 0, 0, 1, 0, 0);
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&INVALID_COORDINATE.to_be_bytes());
        bytes.extend_from_slice(&INVALID_COORDINATE.to_be_bytes());
        let view = DataPacketView::parse(&bytes).unwrap();
        let ready = assembler.on_data_packet(&view, &alignments);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].valid_geometry_count, 0);
    }
}
