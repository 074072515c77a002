use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Capture, Region};

/// Per-channel delta at or below which a pixel counts as unchanged.
pub const DEFAULT_NOISE_FLOOR: u8 = 16;

/// Why a region could not be captured. Always transient: the retry loop
/// consumes it as a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("capture unavailable for {region}: {reason}")]
    Unavailable { region: Region, reason: String },
    #[error("game window is gone")]
    WindowLost,
}

/// Programming-contract violations. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VisionError {
    #[error("capture dimensions differ: {before_w}x{before_h} vs {after_w}x{after_h}")]
    DimensionMismatch {
        before_w: u32,
        before_h: u32,
        after_w: u32,
        after_h: u32,
    },
    #[error("captures come from different regions: {before} vs {after}")]
    RegionMismatch { before: Region, after: Region },
    #[error("capture buffer of {len} bytes cannot hold {width}x{height} at {bytes_per_row} bytes per row")]
    MalformedBuffer {
        len: usize,
        width: u32,
        height: u32,
        bytes_per_row: u32,
    },
}

/// Source of region captures (live window, stub, or scripted fake).
pub trait RegionCapture {
    fn capture(&mut self, region: Region) -> Result<Capture, CaptureError>;
}

/// Fraction of changed pixels between two captures, always in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DifferenceScore(f64);

impl DifferenceScore {
    pub const ZERO: DifferenceScore = DifferenceScore(0.0);

    pub fn new(fraction: f64) -> Self {
        if fraction.is_nan() {
            return Self::ZERO;
        }
        Self(fraction.clamp(0.0, 1.0))
    }

    pub fn fraction(&self) -> f64 {
        self.0
    }

    pub fn percent(&self) -> f64 {
        self.0 * 100.0
    }
}

impl fmt::Display for DifferenceScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.percent())
    }
}

/// Reduces a before/after capture pair to a single changed-fraction score.
///
/// A pixel counts as changed when any of its B, G or R components moved by
/// more than the noise floor. Alpha is ignored. The comparison is symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifferenceEvaluator {
    noise_floor: u8,
}

impl Default for DifferenceEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_FLOOR)
    }
}

impl DifferenceEvaluator {
    pub fn new(noise_floor: u8) -> Self {
        Self { noise_floor }
    }

    pub fn noise_floor(&self) -> u8 {
        self.noise_floor
    }

    pub fn score(&self, before: &Capture, after: &Capture) -> Result<DifferenceScore, VisionError> {
        check_comparable(before, after)?;
        let total = before.pixel_count();
        if total == 0 {
            return Ok(DifferenceScore::ZERO);
        }
        let mut changed: u64 = 0;
        for y in 0..before.height {
            for x in 0..before.width {
                if self.pixel_changed(before, after, x, y) {
                    changed += 1;
                }
            }
        }
        Ok(DifferenceScore::new(changed as f64 / total as f64))
    }

    /// Row-major changed/unchanged mask, for rendering diff images.
    pub fn mask(&self, before: &Capture, after: &Capture) -> Result<Vec<bool>, VisionError> {
        check_comparable(before, after)?;
        let mut mask = Vec::with_capacity(before.pixel_count() as usize);
        for y in 0..before.height {
            for x in 0..before.width {
                mask.push(self.pixel_changed(before, after, x, y));
            }
        }
        Ok(mask)
    }

    fn pixel_changed(&self, a: &Capture, b: &Capture, x: u32, y: u32) -> bool {
        let (ab, ag, ar) = a.bgr(x, y);
        let (bb, bg, br) = b.bgr(x, y);
        ab.abs_diff(bb) > self.noise_floor
            || ag.abs_diff(bg) > self.noise_floor
            || ar.abs_diff(br) > self.noise_floor
    }
}

fn check_comparable(before: &Capture, after: &Capture) -> Result<(), VisionError> {
    if before.region != after.region {
        return Err(VisionError::RegionMismatch { before: before.region, after: after.region });
    }
    if before.width != after.width || before.height != after.height {
        return Err(VisionError::DimensionMismatch {
            before_w: before.width,
            before_h: before.height,
            after_w: after.width,
            after_h: after.height,
        });
    }
    check_buffer(before)?;
    check_buffer(after)
}

fn check_buffer(cap: &Capture) -> Result<(), VisionError> {
    let needed = cap.bytes_per_row as u64 * cap.height as u64;
    if (cap.bytes_per_row as u64) < cap.width as u64 * 4 || (cap.data.len() as u64) < needed {
        return Err(VisionError::MalformedBuffer {
            len: cap.data.len(),
            width: cap.width,
            height: cap.height,
            bytes_per_row: cap.bytes_per_row,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region::from_size(0, 0, 10, 10)
    }

    #[test]
    fn identical_captures_score_zero() {
        let a = Capture::filled(region(), [10, 20, 30, 255]);
        let b = Capture::filled(region(), [10, 20, 30, 255]);
        let eval = DifferenceEvaluator::default();
        assert_eq!(eval.score(&a, &b).unwrap(), DifferenceScore::ZERO);
        assert_eq!(eval.score(&a, &a).unwrap(), DifferenceScore::ZERO);
    }

    #[test]
    fn fully_replaced_image_scores_one() {
        let a = Capture::filled(region(), [0, 0, 0, 255]);
        let b = Capture::filled(region(), [255, 255, 255, 255]);
        let score = DifferenceEvaluator::default().score(&a, &b).unwrap();
        assert_eq!(score.fraction(), 1.0);
    }

    #[test]
    fn score_is_symmetric() {
        let a = Capture::filled(region(), [0, 0, 0, 255]);
        let mut b = Capture::filled(region(), [0, 0, 0, 255]);
        for x in 0..10 {
            for y in 0..3 {
                b.set_bgr(x, y, (200, 10, 10));
            }
        }
        let eval = DifferenceEvaluator::default();
        let ab = eval.score(&a, &b).unwrap();
        let ba = eval.score(&b, &a).unwrap();
        assert_eq!(ab, ba);
        assert!((ab.fraction() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn noise_below_floor_is_ignored() {
        let a = Capture::filled(region(), [100, 100, 100, 255]);
        let b = Capture::filled(region(), [110, 95, 100, 0]);
        let eval = DifferenceEvaluator::new(16);
        assert_eq!(eval.score(&a, &b).unwrap(), DifferenceScore::ZERO);
        assert_eq!(DifferenceEvaluator::new(4).score(&a, &b).unwrap().fraction(), 1.0);
    }

    #[test]
    fn single_channel_change_counts_once_per_pixel() {
        let a = Capture::filled(Region::from_size(0, 0, 2, 1), [0, 0, 0, 255]);
        let mut b = Capture::filled(Region::from_size(0, 0, 2, 1), [0, 0, 0, 255]);
        b.set_bgr(0, 0, (255, 255, 255));
        let score = DifferenceEvaluator::default().score(&a, &b).unwrap();
        assert_eq!(score.fraction(), 0.5);
    }

    #[test]
    fn mismatched_dimensions_are_a_contract_violation() {
        let a = Capture::filled(region(), [0, 0, 0, 255]);
        let mut b = Capture::filled(region(), [0, 0, 0, 255]);
        b.width = 5;
        b.bytes_per_row = 20;
        let err = DifferenceEvaluator::default().score(&a, &b).unwrap_err();
        assert!(matches!(err, VisionError::DimensionMismatch { after_w: 5, .. }));
    }

    #[test]
    fn different_regions_are_a_contract_violation() {
        let a = Capture::filled(region(), [0, 0, 0, 255]);
        let b = Capture::filled(Region::from_size(5, 5, 10, 10), [0, 0, 0, 255]);
        let err = DifferenceEvaluator::default().score(&a, &b).unwrap_err();
        assert!(matches!(err, VisionError::RegionMismatch { .. }));
    }

    #[test]
    fn short_buffers_are_a_contract_violation() {
        let a = Capture::filled(region(), [0, 0, 0, 255]);
        let mut truncated = Capture::filled(region(), [0, 0, 0, 255]);
        truncated.data.truncate(100);
        let eval = DifferenceEvaluator::default();
        let err = eval.score(&a, &truncated).unwrap_err();
        assert!(matches!(err, VisionError::MalformedBuffer { len: 100, .. }));
        assert!(eval.mask(&truncated, &a).is_err());

        let mut narrow = Capture::filled(region(), [0, 0, 0, 255]);
        narrow.bytes_per_row = 8;
        assert!(matches!(eval.score(&a, &narrow).unwrap_err(), VisionError::MalformedBuffer { bytes_per_row: 8, .. }));
    }

    #[test]
    fn padded_rows_are_respected() {
        // 2x1 image with 4 bytes of row padding
        let r = Region::from_size(0, 0, 2, 1);
        let mut a = Capture::from_bgra(r, 2, 1, vec![0; 12]);
        a.bytes_per_row = 12;
        let mut b = Capture::from_bgra(r, 2, 1, vec![0, 0, 0, 0, 0, 0, 0, 0, 255, 255, 255, 255]);
        b.bytes_per_row = 12;
        assert_eq!(DifferenceEvaluator::default().score(&a, &b).unwrap(), DifferenceScore::ZERO);
    }

    #[test]
    fn empty_region_scores_zero() {
        let r = Region::from_size(0, 0, 0, 0);
        let a = Capture::filled(r, [0, 0, 0, 255]);
        let b = Capture::filled(r, [9, 9, 9, 255]);
        assert_eq!(DifferenceEvaluator::default().score(&a, &b).unwrap(), DifferenceScore::ZERO);
    }

    #[test]
    fn mask_marks_changed_pixels() {
        let r = Region::from_size(0, 0, 2, 2);
        let a = Capture::filled(r, [0, 0, 0, 255]);
        let mut b = Capture::filled(r, [0, 0, 0, 255]);
        b.set_bgr(1, 1, (0, 0, 200));
        let mask = DifferenceEvaluator::default().mask(&a, &b).unwrap();
        assert_eq!(mask, vec![false, false, false, true]);
    }

    #[test]
    fn verdict_does_not_depend_on_where_the_change_sits() {
        use crate::confirm::ConfirmationSpec;
        use crate::types::Point;

        fn painted(changed: &dyn Fn(u32, u32) -> bool) -> Capture {
            let mut cap = Capture::filled(region(), [0, 0, 0, 255]);
            for y in 0..10 {
                for x in 0..10 {
                    if changed(x, y) {
                        cap.set_bgr(x, y, (220, 40, 90));
                    }
                }
            }
            cap
        }

        type Layout = Box<dyn Fn(u32, u32) -> bool>;
        fn layout(f: impl Fn(u32, u32) -> bool + 'static) -> Layout {
            Box::new(f)
        }

        // a band of rows, a block of columns, and a scattered pattern, same pixel count each
        let cases: Vec<(f64, [Layout; 3])> = vec![
            (0.40, [layout(|_, y| y < 4), layout(|x, _| x >= 6), layout(|x, y| (x + 3 * y) % 5 < 2)]),
            (0.50, [layout(|_, y| y >= 5), layout(|x, _| x < 5), layout(|x, y| (x + y) % 2 == 0)]),
            (0.90, [layout(|_, y| y < 9), layout(|x, _| x > 0), layout(|x, y| (x + y) % 10 != 0)]),
        ];

        let eval = DifferenceEvaluator::default();
        let base = Capture::filled(region(), [0, 0, 0, 255]);
        let selection = ConfirmationSpec::selection(Point::new(5, 5), 5, 5, 0.40);
        let placement = ConfirmationSpec::placement(vec![region()], 0.85);

        for (fraction, layouts) in cases {
            let scores: Vec<DifferenceScore> =
                layouts.iter().map(|l| eval.score(&base, &painted(l.as_ref())).unwrap()).collect();
            for s in &scores {
                assert!((s.fraction() - fraction).abs() < 1e-9, "{} vs {}", s, fraction);
                assert_eq!(*s, scores[0]);
                assert_eq!(selection.confirms(*s), selection.confirms(scores[0]));
                assert_eq!(placement.confirms(*s), placement.confirms(scores[0]));
            }
            assert_eq!(selection.confirms(scores[0]), fraction >= 0.40);
            assert_eq!(placement.confirms(scores[0]), fraction >= 0.85);
        }
    }
}
