//! Per-camera alignment: forward/inverse rigid transform between camera and
//! "mill" coordinates (§3, §4.2).

/// A point in 1/1000 inch ("mil") units, in either the camera or mill frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MilPoint {
    pub x: i32,
    pub y: i32,
}

impl MilPoint {
    pub fn new(x: i32, y: i32) -> Self {
        MilPoint { x, y }
    }
}

/// Converts a user-facing inch value to 1/1000 inch (mil) units.
pub fn inches_to_mils(inches: f64) -> i32 {
    (inches * 1000.0).round() as i32
}

/// A camera's rigid transform to/from the shared "mill" coordinate frame.
///
/// Precomputes sin/cos of the roll angle and the 0°/180° yaw selected by
/// `cable_downstream`, so per-point transforms are pure multiply-adds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    shift_x_mil: f64,
    shift_y_mil: f64,
    cable_downstream: bool,
    sin_roll: f64,
    cos_roll: f64,
    cos_yaw: f64,
}

impl Alignment {
    /// `roll_deg`: camera roll in degrees. `shift_x_in`/`shift_y_in`: camera
    /// origin shift in inches. `cable_downstream`: selects a 180° yaw.
    pub fn new(roll_deg: f64, shift_x_in: f64, shift_y_in: f64, cable_downstream: bool) -> Self {
        let roll_rad = roll_deg.to_radians();
        Alignment {
            shift_x_mil: shift_x_in * 1000.0,
            shift_y_mil: shift_y_in * 1000.0,
            cable_downstream,
            sin_roll: roll_rad.sin(),
            cos_roll: roll_rad.cos(),
            cos_yaw: if cable_downstream { -1.0 } else { 1.0 },
        }
    }

    pub fn cable_downstream(&self) -> bool {
        self.cable_downstream
    }

    /// camera→mill: `(x', y') = (x·cosYaw·cosR − y·sinR + Sx, x·cosYaw·sinR + y·cosR + Sy)`
    pub fn camera_to_mill(&self, p: MilPoint) -> MilPoint {
        let x = p.x as f64;
        let y = p.y as f64;
        let xp = x * self.cos_yaw * self.cos_roll - y * self.sin_roll + self.shift_x_mil;
        let yp = x * self.cos_yaw * self.sin_roll + y * self.cos_roll + self.shift_y_mil;
        MilPoint::new(xp.round() as i32, yp.round() as i32)
    }

    /// mill→camera: inverse of [`camera_to_mill`](Self::camera_to_mill), shifts applied first.
    pub fn mill_to_camera(&self, p: MilPoint) -> MilPoint {
        let x = p.x as f64 - self.shift_x_mil;
        let y = p.y as f64 - self.shift_y_mil;
        // Inverse rotation-plus-yaw: solve the 2x2 linear system from camera_to_mill.
        let xp = (x * self.cos_roll + y * self.sin_roll) * self.cos_yaw;
        let yp = -x * self.sin_roll + y * self.cos_roll;
        MilPoint::new(xp.round() as i32, yp.round() as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_error(p: MilPoint, a: &Alignment) -> i32 {
        let back = a.mill_to_camera(a.camera_to_mill(p));
        (back.x - p.x).abs().max((back.y - p.y).abs())
    }

    #[test]
    fn identity_alignment_is_a_no_op() {
        let a = Alignment::new(0.0, 0.0, 0.0, false);
        let p = MilPoint::new(1234, -5678);
        assert_eq!(a.camera_to_mill(p), p);
        assert_eq!(a.mill_to_camera(p), p);
    }

    #[test]
    fn bijective_transform_within_one_mil() {
        let cases = [
            (0.0, 0.0, 0.0, false),
            (15.0, 100.0, -200.0, false),
            (-30.0, -50.0, 50.0, true),
            (90.0, 0.0, 0.0, true),
            (180.0, 1000.0, 1000.0, false),
            (45.5, -1234.5, 6789.1, true),
        ];
        let points = [
            MilPoint::new(0, 0),
            MilPoint::new(100_000, 100_000),
            MilPoint::new(-100_000, -100_000),
            MilPoint::new(12_345, -67_890),
            MilPoint::new(-1, 1),
        ];
        for (roll, sx, sy, cable) in cases {
            let a = Alignment::new(roll, sx / 1000.0, sy / 1000.0, cable);
            for &p in &points {
                assert!(round_trip_error(p, &a) <= 1, "roll={roll} sx={sx} sy={sy} cable={cable} p={p:?}");
            }
        }
    }

    #[test]
    fn cable_downstream_flips_yaw_sign() {
        let forward = Alignment::new(0.0, 0.0, 0.0, false);
        let flipped = Alignment::new(0.0, 0.0, 0.0, true);
        let p = MilPoint::new(1000, 0);
        assert_eq!(forward.camera_to_mill(p).x, 1000);
        assert_eq!(flipped.camera_to_mill(p).x, -1000);
    }

    #[test]
    fn inches_to_mils_scales_by_thousand() {
        assert_eq!(inches_to_mils(1.0), 1000);
        assert_eq!(inches_to_mils(-2.5), -2500);
    }
}
