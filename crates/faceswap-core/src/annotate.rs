//! Draw detected faces onto a copy of an image for operator selection.

use crate::types::{FaceRecord, Image};
use image::{Rgb, RgbImage};

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TICK_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: u32 = 3;
const TAB_HEIGHT: u32 = 10;
const TICK_WIDTH: u32 = 2;
const TICK_SPACING: u32 = 4;

/// Outline every face in red and mark it with its index.
///
/// The index is drawn as `index + 1` white ticks on a red tab above the box
/// (below it when the box touches the top edge).
pub fn annotate(image: &Image, faces: &[FaceRecord]) -> RgbImage {
    let mut canvas = image.pixels().clone();

    for face in faces {
        let rect = face.crop_rect();
        let (x0, y0) = (rect.x0() as u32, rect.y0() as u32);
        let (x1, y1) = (rect.x1() as u32, rect.y1() as u32);

        for t in 0..BOX_THICKNESS {
            fill(&mut canvas, x0, y0 + t, x1, y0 + t + 1, BOX_COLOR);
            fill(&mut canvas, x0, (y1 - 1).saturating_sub(t), x1, y1.saturating_sub(t), BOX_COLOR);
            fill(&mut canvas, x0 + t, y0, x0 + t + 1, y1, BOX_COLOR);
            fill(&mut canvas, (x1 - 1).saturating_sub(t), y0, x1.saturating_sub(t), y1, BOX_COLOR);
        }

        let ticks = face.index() as u32 + 1;
        let tab_w = ticks * TICK_SPACING + TICK_WIDTH;
        let tab_y0 = if y0 >= TAB_HEIGHT { y0 - TAB_HEIGHT } else { y1 };
        fill(&mut canvas, x0, tab_y0, x0 + tab_w, tab_y0 + TAB_HEIGHT, BOX_COLOR);
        for i in 0..ticks {
            let tx = x0 + TICK_WIDTH + i * TICK_SPACING;
            fill(&mut canvas, tx, tab_y0 + 2, tx + TICK_WIDTH, tab_y0 + TAB_HEIGHT - 2, TICK_COLOR);
        }
    }

    canvas
}

/// Fill `[x0, x1) × [y0, y1)`, clipped to the canvas.
fn fill(canvas: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    let x1 = x1.min(canvas.width());
    let y1 = y1.min(canvas.height());
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::extract;
    use crate::types::{BoundingBox, DetectedFace, FaceDescriptor, FaceRect, ImageOrigin};

    fn detected(x0: i32, y0: i32, x1: i32, y1: i32) -> DetectedFace {
        DetectedFace {
            bbox: FaceRect::new(x0, y0, x1, y1).unwrap(),
            descriptor: FaceDescriptor {
                detection: BoundingBox {
                    x: x0 as f32, y: y0 as f32,
                    width: (x1 - x0) as f32, height: (y1 - y0) as f32,
                    confidence: 0.9, landmarks: None,
                },
                embedding: None,
            },
        }
    }

    #[test]
    fn test_annotate_draws_box_and_keeps_interior() {
        let image = Image::new(
            RgbImage::from_pixel(100, 100, Rgb([0, 0, 0])),
            ImageOrigin::Memory("blank".into()),
        )
        .unwrap();
        let faces = extract(&image, vec![detected(20, 30, 60, 80)]);

        let out = annotate(&image, &faces);

        assert_eq!(out.dimensions(), (100, 100));
        assert_eq!(*out.get_pixel(20, 50), BOX_COLOR);
        assert_eq!(*out.get_pixel(59, 50), BOX_COLOR);
        assert_eq!(*out.get_pixel(40, 30), BOX_COLOR);
        assert_eq!(*out.get_pixel(40, 55), Rgb([0, 0, 0]));
        // One tick for face 0 on the tab above the box
        assert_eq!(*out.get_pixel(22, 25), TICK_COLOR);
        // Source image untouched
        assert_eq!(*image.pixels().get_pixel(20, 50), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_annotate_box_at_image_edge() {
        let image = Image::new(
            RgbImage::from_pixel(40, 40, Rgb([0, 0, 0])),
            ImageOrigin::Memory("edge".into()),
        )
        .unwrap();
        let faces = extract(&image, vec![detected(0, 0, 40, 20)]);

        let out = annotate(&image, &faces);

        // Tab moves below the box
        assert_eq!(*out.get_pixel(0, 25), BOX_COLOR);
        assert_eq!(*out.get_pixel(39, 0), BOX_COLOR);
    }
}
