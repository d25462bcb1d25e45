use image::GrayImage;

use crate::Landmark;

/// Semi-axis below which the pad pattern cannot be resolved on screen.
const MIN_AXIS_PX: f32 = 175.0;
/// How far in from the rim the probes sit, as a fraction of the axis.
const PROBE_FRACTION: f32 = 0.215;
/// Gray-level contrast above this across the landmark rejects the pattern.
const MAX_CONTRAST: i16 = 90;

/// Best-effort check that a large landmark sits on the pad's even pattern
/// rather than a high-contrast edge. `None` when the landmark is too small
/// to judge. Annotation only, never load-bearing.
pub fn confirm_pattern(gray: &GrayImage, lm: &Landmark) -> Option<bool> {
    if lm.a < MIN_AXIS_PX {
        return None;
    }

    let probe = |dx: f32, dy: f32| -> i16 {
        let x = (lm.cx + dx).clamp(0.0, (gray.width() - 1) as f32) as u32;
        let y = (lm.cy + dy).clamp(0.0, (gray.height() - 1) as f32) as u32;
        gray.get_pixel(x, y)[0] as i16
    };

    let r = lm.a * (1.0 - PROBE_FRACTION);
    let (s, c) = lm.theta.sin_cos();
    let ahead = probe(r * c, r * s);
    let behind = probe(-r * c, -r * s);
    Some((ahead - behind).abs() <= MAX_CONTRAST)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn landmark(cx: f32, cy: f32, a: f32) -> Landmark {
        Landmark {
            cx,
            cy,
            a,
            b: a * 0.9,
            theta: 0.0,
            score: 0.9,
        }
    }

    #[test]
    fn small_landmarks_are_not_judged() {
        let gray = GrayImage::from_pixel(64, 64, Luma([128u8]));
        assert_eq!(confirm_pattern(&gray, &landmark(32.0, 32.0, 20.0)), None);
    }

    #[test]
    fn even_surface_confirms() {
        let gray = GrayImage::from_pixel(640, 480, Luma([200u8]));
        assert_eq!(
            confirm_pattern(&gray, &landmark(320.0, 240.0, 180.0)),
            Some(true)
        );
    }

    #[test]
    fn hard_edge_rejects() {
        let gray = GrayImage::from_fn(640, 480, |x, _| {
            if x < 320 {
                Luma([0u8])
            } else {
                Luma([255u8])
            }
        });
        assert_eq!(
            confirm_pattern(&gray, &landmark(320.0, 240.0, 180.0)),
            Some(false)
        );
    }
}
