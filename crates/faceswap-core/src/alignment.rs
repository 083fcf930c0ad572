//! Face alignment via 4-DOF similarity transform.
//!
//! Aligns detected faces to a canonical square crop using the five InsightFace
//! reference landmarks and least-squares estimation. The same transform is
//! inverted to paste a processed crop back into the full image.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Reference landmarks for a square crop of `size` pixels.
///
/// Multiples of 112 scale the ArcFace template; multiples of 128 scale it by
/// `size / 128` and shift it right by 8 scaled pixels (the swap model layout).
pub fn reference_landmarks(size: usize) -> [(f32, f32); 5] {
    let (ratio, shift_x) = if size % 112 == 0 {
        (size as f32 / 112.0, 0.0)
    } else {
        let ratio = size as f32 / 128.0;
        (ratio, 8.0 * ratio)
    };
    REFERENCE_LANDMARKS_112.map(|(x, y)| (x * ratio + shift_x, y * ratio))
}

/// 2×3 similarity transform mapping image coordinates to aligned-crop coordinates:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Least-squares estimate of the transform taking `src` landmarks onto `dst`.
    ///
    /// Closed form over mean-centred points. Degenerate input (all `src`
    /// points equal) yields [`SimilarityTransform::IDENTITY`].
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let centroid = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / 5.0, sy / 5.0)
        };
        let (scx, scy) = centroid(src);
        let (dcx, dcy) = centroid(dst);

        let (mut dot, mut cross, mut spread) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (px, py) = (sx - scx, sy - scy);
            let (qx, qy) = (dx - dcx, dy - dcy);
            dot += px * qx + py * qy;
            cross += px * qy - py * qx;
            spread += px * px + py * py;
        }
        if spread < 1e-12 {
            return Self::IDENTITY;
        }

        let a = dot / spread;
        let b = cross / spread;
        Self {
            a,
            b,
            tx: dcx - (a * scx - b * scy),
            ty: dcy - (b * scx + a * scy),
        }
    }

    /// Map an image-space point into aligned space.
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// The transform mapping aligned space back to image space.
    ///
    /// Returns `None` when the scale collapses to zero.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return None;
        }
        let ia = self.a / det;
        let ib = -self.b / det;
        // x = ia*(u - tx) - ib*(v - ty), y = ib*(u - tx) + ia*(v - ty)
        Some(Self {
            a: ia,
            b: ib,
            tx: -(ia * self.tx - ib * self.ty),
            ty: -(ib * self.tx + ia * self.ty),
        })
    }
}

/// Bilinear RGB sample at a sub-pixel position. Out-of-bounds neighbours read as black.
pub(crate) fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let texel = |px: i64, py: i64| -> [f32; 3] {
        if px >= 0 && px < w && py >= 0 && py < h {
            let Rgb([r, g, b]) = *image.get_pixel(px as u32, py as u32);
            [r as f32, g as f32, b as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr) = (texel(x0, y0), texel(x0 + 1, y0));
    let (bl, br) = (texel(x0, y0 + 1), texel(x0 + 1, y0 + 1));

    std::array::from_fn(|c| {
        tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy
    })
}

/// Warp `image` into an `out_size` square through `transform` (image → aligned).
///
/// Uses bilinear interpolation; pixels that map outside the source are black.
pub fn warp_affine(image: &RgbImage, transform: &SimilarityTransform, out_size: u32) -> RgbImage {
    let mut output = RgbImage::new(out_size, out_size);
    let Some(inverse) = transform.inverse() else {
        return output;
    };

    for (ox, oy, pixel) in output.enumerate_pixels_mut() {
        let (sx, sy) = inverse.apply(ox as f32, oy as f32);
        let [r, g, b] = sample_bilinear(image, sx, sy);
        *pixel = Rgb([to_u8(r), to_u8(g), to_u8(b)]);
    }

    output
}

pub(crate) fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Align a detected face to a canonical `size`×`size` crop.
///
/// Returns the crop and the image → crop transform so callers can map results back.
pub fn align_face(
    image: &RgbImage,
    landmarks: &[(f32, f32); 5],
    size: usize,
) -> (RgbImage, SimilarityTransform) {
    let transform = SimilarityTransform::estimate(landmarks, &reference_landmarks(size));
    (warp_affine(image, &transform, size as u32), transform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let m = SimilarityTransform::estimate(&pts, &pts);

        assert!((m.a - 1.0).abs() < 1e-4, "a = {}", m.a);
        assert!(m.b.abs() < 1e-4, "b = {}", m.b);
        assert!(m.tx.abs() < 1e-3, "tx = {}", m.tx);
        assert!(m.ty.abs() < 1e-3, "ty = {}", m.ty);
    }

    #[test]
    fn test_scaled_transform() {
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = SimilarityTransform::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert!((m.a - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m.a);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = SimilarityTransform { a: 0.8, b: 0.3, tx: 12.0, ty: -7.5 };
        let inv = t.inverse().unwrap();
        let (u, v) = t.apply(40.0, 25.0);
        let (x, y) = inv.apply(u, v);
        assert!((x - 40.0).abs() < 1e-3, "x = {x}");
        assert!((y - 25.0).abs() < 1e-3, "y = {y}");
    }

    #[test]
    fn test_degenerate_transform_has_no_inverse() {
        let t = SimilarityTransform { a: 0.0, b: 0.0, tx: 1.0, ty: 1.0 };
        assert!(t.inverse().is_none());
    }

    #[test]
    fn test_reference_landmarks_128_shifted() {
        let r = reference_landmarks(128);
        assert!((r[0].0 - (38.2946 + 8.0)).abs() < 1e-4);
        assert!((r[0].1 - 51.6963).abs() < 1e-4);
        assert_eq!(reference_landmarks(112), REFERENCE_LANDMARKS_112);
    }

    #[test]
    fn test_warp_output_size() {
        let image = RgbImage::from_pixel(64, 48, Rgb([128, 128, 128]));
        let out = warp_affine(&image, &SimilarityTransform::IDENTITY, 32);
        assert_eq!(out.dimensions(), (32, 32));
        assert_eq!(*out.get_pixel(5, 5), Rgb([128, 128, 128]));
    }

    #[test]
    fn test_align_face_output_size() {
        let image = RgbImage::from_pixel(640, 480, Rgb([90, 100, 110]));
        let (aligned, _) = align_face(&image, &REFERENCE_LANDMARKS_112, 112);
        assert_eq!(aligned.dimensions(), (112, 112));
    }

    #[test]
    fn test_landmark_roundtrip() {
        // A bright patch at the source left eye should land near the reference left eye.
        let mut image = RgbImage::new(200, 200);
        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for dy in 0..5 {
            for dx in 0..5 {
                image.put_pixel(78 + dx, 58 + dy, Rgb([255, 255, 255]));
            }
        }

        let (aligned, _) = align_face(&image, &src_landmarks, 112);

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as u32;
        let mut max_val = 0u8;
        for y in ref_y - 1..=ref_y + 1 {
            for x in ref_x - 1..=ref_x + 1 {
                max_val = max_val.max(aligned.get_pixel(x, y)[0]);
            }
        }
        assert!(max_val > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_val}");
    }

    #[test]
    fn test_sample_bilinear_midpoint() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([0, 0, 0]));
        image.put_pixel(1, 0, Rgb([200, 100, 50]));
        let s = sample_bilinear(&image, 0.5, 0.0);
        assert!((s[0] - 100.0).abs() < 1e-3);
        assert!((s[1] - 50.0).abs() < 1e-3);
    }
}
