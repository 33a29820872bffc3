//! Segmented DM commands and segment layout.
//!
//! Segments sit on a hexagonal lattice: one central segment plus `rings` rings
//! around it (3 rings give 37 segments). Segment `0` is the center, then each
//! ring in order, walking counter-clockwise from the +x side.

use crate::error::{AppResult, DaqError};

/// Piston/tip/tilt of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SegmentPosition {
    /// Piston in µm
    pub piston_um: f64,
    /// Tip in mrad
    pub tip_mrad: f64,
    /// Tilt in mrad
    pub tilt_mrad: f64,
}

impl From<(f64, f64, f64)> for SegmentPosition {
    fn from((piston_um, tip_mrad, tilt_mrad): (f64, f64, f64)) -> Self {
        Self {
            piston_um,
            tip_mrad,
            tilt_mrad,
        }
    }
}

/// Full segmented DM command.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedDmCommand {
    segments: Vec<SegmentPosition>,
}

impl SegmentedDmCommand {
    /// All segments at zero.
    pub fn flat(num_segments: usize) -> Self {
        Self {
            segments: vec![SegmentPosition::default(); num_segments],
        }
    }

    /// Command from a `(piston µm, tip mrad, tilt mrad)` list, one entry per segment.
    pub fn read_initial_command(list: &[(f64, f64, f64)]) -> Self {
        Self {
            segments: list.iter().copied().map(SegmentPosition::from).collect(),
        }
    }

    /// Pure piston command.
    pub fn from_pistons_um(pistons: &[f64]) -> Self {
        Self {
            segments: pistons
                .iter()
                .map(|&piston_um| SegmentPosition {
                    piston_um,
                    ..Default::default()
                })
                .collect(),
        }
    }

    /// Number of segments.
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Segments in layout order.
    pub fn segments(&self) -> &[SegmentPosition] {
        &self.segments
    }

    /// Whether every segment is at zero.
    pub fn is_flat(&self) -> bool {
        self.segments.iter().all(|s| *s == SegmentPosition::default())
    }

    /// Check the segment count and stroke limits.
    pub fn validate(&self, expected_segments: usize, max_piston_um: f64, max_tilt_mrad: f64) -> AppResult<()> {
        if self.segments.len() != expected_segments {
            return Err(DaqError::Instrument(format!(
                "Segmented DM command has {} segments, expected {}",
                self.segments.len(),
                expected_segments
            )));
        }
        for (index, segment) in self.segments.iter().enumerate() {
            if segment.piston_um.abs() > max_piston_um {
                return Err(DaqError::Instrument(format!(
                    "Segment {index} piston {} um exceeds limit {max_piston_um} um",
                    segment.piston_um
                )));
            }
            if segment.tip_mrad.abs() > max_tilt_mrad || segment.tilt_mrad.abs() > max_tilt_mrad {
                return Err(DaqError::Instrument(format!(
                    "Segment {index} tip/tilt exceeds limit {max_tilt_mrad} mrad"
                )));
            }
        }
        Ok(())
    }
}

/// Number of segments with `rings` rings around the center.
pub fn segment_count(rings: usize) -> usize {
    1 + 3 * rings * (rings + 1)
}

/// Segment centers in units of the segment pitch (center-to-center distance).
pub fn segment_centers(rings: usize) -> Vec<(f64, f64)> {
    // Axial hex directions, counter-clockwise.
    const DIRECTIONS: [(i32, i32); 6] = [(1, 0), (0, 1), (-1, 1), (-1, 0), (0, -1), (1, -1)];

    let mut centers = vec![(0.0, 0.0)];
    for ring in 1..=rings as i32 {
        // Start at the corner reached by walking `ring` steps in direction 4.
        let (mut q, mut r) = (DIRECTIONS[4].0 * ring, DIRECTIONS[4].1 * ring);
        for (dq, dr) in DIRECTIONS {
            for _ in 0..ring {
                centers.push(axial_to_xy(q, r));
                q += dq;
                r += dr;
            }
        }
    }
    centers
}

fn axial_to_xy(q: i32, r: i32) -> (f64, f64) {
    let x = q as f64 + r as f64 / 2.0;
    let y = r as f64 * 3f64.sqrt() / 2.0;
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_rings_give_37_segments() {
        assert_eq!(segment_count(3), 37);
        assert_eq!(segment_centers(3).len(), 37);
        assert_eq!(segment_centers(0), vec![(0.0, 0.0)]);
    }

    #[test]
    fn first_ring_is_unit_distance() {
        let centers = segment_centers(1);
        for &(x, y) in &centers[1..] {
            assert!(((x * x + y * y).sqrt() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn centers_are_distinct() {
        let centers = segment_centers(3);
        for (i, a) in centers.iter().enumerate() {
            for b in &centers[i + 1..] {
                let d = ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt();
                assert!(d > 0.99, "{a:?} and {b:?} overlap");
            }
        }
    }

    #[test]
    fn validate_limits() {
        let mut list = vec![(0.0, 0.0, 0.0); 37];
        list[5] = (6.0, 0.0, 0.0);
        let command = SegmentedDmCommand::read_initial_command(&list);
        assert!(command.validate(37, 5.0, 5.0).is_err());
        assert!(SegmentedDmCommand::flat(37).validate(37, 5.0, 5.0).is_ok());
        assert!(SegmentedDmCommand::flat(19).validate(37, 5.0, 5.0).is_err());
    }
}
