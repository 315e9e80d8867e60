//! Scan window geometry: an axis-aligned rectangle (inches) lowered to four
//! oriented half-plane constraints in mil units (§3, §4.2).

use crate::alignment::{Alignment, MilPoint};
use crate::error::{Result, ScanError};
use crate::wire::ConstraintRecord;

/// An oriented half-plane: a point `p` is inside iff
/// `(p - p0) x (p1 - p0) >= 0` (2-D cross product).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConstraint {
    pub p0: MilPoint,
    pub p1: MilPoint,
}

impl WindowConstraint {
    pub fn new(p0: MilPoint, p1: MilPoint) -> Self {
        WindowConstraint { p0, p1 }
    }

    /// `true` iff `p` is on the non-negative side of this half-plane.
    ///
    /// Uses a 64-bit signed cross product: coordinates reach +-100_000 mil,
    /// so the naive i32 product can overflow by roughly 34x at the extremes.
    pub fn contains(&self, p: MilPoint) -> bool {
        let (px, py) = (p.x as i64 - self.p0.x as i64, p.y as i64 - self.p0.y as i64);
        let (qx, qy) = (self.p1.x as i64 - self.p0.x as i64, self.p1.y as i64 - self.p0.y as i64);
        px * qy - py * qx >= 0
    }

    /// Returns this constraint with its endpoints swapped, preserving the
    /// closed region's orientation under an X-flipped camera.
    pub fn swapped(&self) -> Self {
        WindowConstraint { p0: self.p1, p1: self.p0 }
    }

    pub fn to_wire(self) -> ConstraintRecord {
        ConstraintRecord {
            x1: self.p0.x,
            y1: self.p0.y,
            x2: self.p1.x,
            y2: self.p1.y,
        }
    }
}

/// An axis-aligned scan window, given in inches, stored as four half-plane
/// constraints in the order top, bottom, right, left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    constraints: [WindowConstraint; 4],
}

impl ScanWindow {
    /// `top`/`bottom`/`left`/`right` in inches. Requires `top > bottom` and
    /// `right > left`.
    pub fn new(top_in: f64, bottom_in: f64, left_in: f64, right_in: f64) -> Result<Self> {
        if !(top_in > bottom_in) {
            return Err(ScanError::InvalidArgument(format!(
                "window top ({top_in}) must be greater than bottom ({bottom_in})"
            )));
        }
        if !(right_in > left_in) {
            return Err(ScanError::InvalidArgument(format!(
                "window right ({right_in}) must be greater than left ({left_in})"
            )));
        }

        let top = crate::alignment::inches_to_mils(top_in);
        let bottom = crate::alignment::inches_to_mils(bottom_in);
        let left = crate::alignment::inches_to_mils(left_in);
        let right = crate::alignment::inches_to_mils(right_in);

        let top_left = MilPoint::new(left, top);
        let top_right = MilPoint::new(right, top);
        let bottom_left = MilPoint::new(left, bottom);
        let bottom_right = MilPoint::new(right, bottom);

        // Outward normals sweep consistently clockwise starting at the top edge.
        let constraints = [
            WindowConstraint::new(top_left, top_right),       // top
            WindowConstraint::new(bottom_right, bottom_left), // bottom
            WindowConstraint::new(top_right, bottom_right),   // right
            WindowConstraint::new(bottom_left, top_left),     // left
        ];

        Ok(ScanWindow { constraints })
    }

    pub fn constraints(&self) -> &[WindowConstraint; 4] {
        &self.constraints
    }

    pub fn contains(&self, p: MilPoint) -> bool {
        self.constraints.iter().all(|c| c.contains(p))
    }

    /// Maps each constraint's endpoints through the camera's mill→camera
    /// transform, swapping endpoint order when `cable_downstream` is set so
    /// the half-plane orientation survives the camera's X-flip.
    pub fn for_camera(&self, alignment: &Alignment) -> [WindowConstraint; 4] {
        self.constraints.map(|c| {
            let mapped = WindowConstraint::new(
                alignment.mill_to_camera(c.p0),
                alignment.mill_to_camera(c.p1),
            );
            if alignment.cable_downstream() {
                mapped.swapped()
            } else {
                mapped
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_rectangles() {
        assert!(ScanWindow::new(10.0, 10.0, -10.0, 10.0).is_err());
        assert!(ScanWindow::new(10.0, -10.0, 10.0, 10.0).is_err());
        assert!(ScanWindow::new(-10.0, 10.0, -10.0, 10.0).is_err());
    }

    #[test]
    fn s5_corners_in_clockwise_order_from_top_left() {
        let w = ScanWindow::new(10.0, -10.0, -10.0, 10.0).unwrap();
        let c = w.constraints();
        assert_eq!(c[0], WindowConstraint::new(MilPoint::new(-10_000, 10_000), MilPoint::new(10_000, 10_000)));
        assert_eq!(c[1], WindowConstraint::new(MilPoint::new(10_000, -10_000), MilPoint::new(-10_000, -10_000)));
        assert_eq!(c[2], WindowConstraint::new(MilPoint::new(10_000, 10_000), MilPoint::new(10_000, -10_000)));
        assert_eq!(c[3], WindowConstraint::new(MilPoint::new(-10_000, -10_000), MilPoint::new(-10_000, 10_000)));
    }

    #[test]
    fn interior_test_agrees_with_rectangle_over_random_points() {
        let w = ScanWindow::new(5.0, -5.0, -3.0, 3.0).unwrap();
        let mut state = 0x1234_5678_u64;
        let mut next = || {
            // xorshift64 for a deterministic, dependency-free PRNG in a pure unit test.
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };
        let mut checked = 0;
        for _ in 0..10_000 {
            let x_mil = (next() % 20_000) as i32 - 10_000;
            let y_mil = (next() % 20_000) as i32 - 10_000;
            let inside_rect = x_mil >= -3_000 && x_mil <= 3_000 && y_mil >= -5_000 && y_mil <= 5_000;
            let inside_window = w.contains(MilPoint::new(x_mil, y_mil));
            assert_eq!(inside_rect, inside_window, "x={x_mil} y={y_mil}");
            checked += 1;
        }
        assert_eq!(checked, 10_000);
    }

    #[test]
    fn cable_downstream_swaps_endpoint_order() {
        let w = ScanWindow::new(5.0, -5.0, -5.0, 5.0).unwrap();
        let a_normal = Alignment::new(0.0, 0.0, 0.0, false);
        let a_flipped = Alignment::new(0.0, 0.0, 0.0, true);
        let normal = w.for_camera(&a_normal);
        let flipped = w.for_camera(&a_flipped);
        // Same endpoints (mirrored by the transform), opposite order.
        assert_eq!(normal[0].p0, flipped[0].p1);
        assert_eq!(normal[0].p1, flipped[0].p0);
    }
}
