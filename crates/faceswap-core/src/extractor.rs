//! Face crops from detector output.

use crate::types::{DetectedFace, FaceRecord, Image};
use image::imageops;

/// Crop every detected face out of `image`, preserving detection order.
///
/// Boxes reaching outside the image are clamped to its bounds; the resulting
/// [`FaceRecord`] reports this through [`FaceRecord::clamped`].
pub fn extract(image: &Image, faces: Vec<DetectedFace>) -> Vec<FaceRecord> {
    let (width, height) = image.dimensions();

    faces
        .into_iter()
        .enumerate()
        .map(|(index, face)| {
            let (crop_rect, clamped) = face.bbox.clamp_to(width, height);
            if clamped {
                tracing::warn!(
                    origin = %image.origin(),
                    index,
                    bbox = ?face.bbox,
                    crop = ?crop_rect,
                    "face box exceeds image bounds; clamped"
                );
            }

            let crop = imageops::crop_imm(
                image.pixels(),
                crop_rect.x0() as u32,
                crop_rect.y0() as u32,
                crop_rect.width(),
                crop_rect.height(),
            )
            .to_image();

            FaceRecord::new(index, face.bbox, crop_rect, face.descriptor, crop)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, FaceDescriptor, FaceRect, ImageOrigin};
    use image::{Rgb, RgbImage};

    fn face(x0: i32, y0: i32, x1: i32, y1: i32) -> DetectedFace {
        let bbox = FaceRect::new(x0, y0, x1, y1).unwrap();
        DetectedFace {
            bbox,
            descriptor: FaceDescriptor {
                detection: BoundingBox {
                    x: x0 as f32,
                    y: y0 as f32,
                    width: (x1 - x0) as f32,
                    height: (y1 - y0) as f32,
                    confidence: 0.9,
                    landmarks: None,
                },
                embedding: None,
            },
        }
    }

    fn gradient(width: u32, height: u32) -> Image {
        let pixels = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 7]));
        Image::new(pixels, ImageOrigin::Memory("gradient".into())).unwrap()
    }

    #[test]
    fn test_crop_matches_bbox() {
        let image = gradient(100, 80);
        let records = extract(&image, vec![face(10, 20, 30, 50)]);

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert!(!r.clamped());
        assert_eq!(r.crop().dimensions(), (20, 30));
        assert_eq!(*r.crop().get_pixel(0, 0), Rgb([10, 20, 7]));
        assert_eq!(*r.crop().get_pixel(19, 29), Rgb([29, 49, 7]));
    }

    #[test]
    fn test_preserves_order_and_length() {
        let image = gradient(100, 100);
        let faces = vec![face(50, 50, 60, 60), face(0, 0, 10, 10), face(20, 20, 40, 40)];
        let records = extract(&image, faces.clone());

        assert_eq!(records.len(), 3);
        for (i, (record, original)) in records.iter().zip(faces.iter()).enumerate() {
            assert_eq!(record.index(), i);
            assert_eq!(record.bbox(), original.bbox);
            assert_eq!(record.descriptor(), &original.descriptor);
        }
    }

    #[test]
    fn test_clamps_partially_outside() {
        let image = gradient(50, 40);
        let records = extract(&image, vec![face(-10, 30, 20, 60)]);

        let r = &records[0];
        assert!(r.clamped());
        assert_eq!(r.bbox(), FaceRect::new(-10, 30, 20, 60).unwrap());
        assert_eq!(r.crop_rect(), FaceRect::new(0, 30, 20, 40).unwrap());
        assert_eq!(r.crop().dimensions(), (20, 10));
    }

    #[test]
    fn test_no_faces_no_records() {
        let image = gradient(10, 10);
        assert!(extract(&image, Vec::new()).is_empty());
    }
}
