use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Bounding box for a detected face, with optional facial landmarks.
///
/// Float coordinates as produced by the detector, in source-image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Smallest integer rectangle enclosing this box.
    pub fn to_rect(&self) -> FaceRect {
        FaceRect::enclosing(self.x, self.y, self.x + self.width, self.y + self.height)
    }
}

/// Axis-aligned integer rectangle in source-image pixel coordinates.
///
/// Always non-empty: `x0 < x1` and `y0 < y1`. The right and bottom edges are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceRect {
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
}

impl FaceRect {
    /// Build a rectangle from its corners. Returns `None` for empty or inverted input.
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Option<Self> {
        (x0 < x1 && y0 < y1).then_some(Self { x0, y0, x1, y1 })
    }

    /// Round float corners outward to whole pixels, keeping at least one pixel per axis.
    pub fn enclosing(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        let (lo_x, hi_x) = (x0.min(x1), x0.max(x1));
        let (lo_y, hi_y) = (y0.min(y1), y0.max(y1));
        let x0 = lo_x.floor() as i32;
        let y0 = lo_y.floor() as i32;
        Self {
            x0,
            y0,
            x1: (hi_x.ceil() as i32).max(x0.saturating_add(1)),
            y1: (hi_y.ceil() as i32).max(y0.saturating_add(1)),
        }
    }

    pub fn x0(&self) -> i32 {
        self.x0
    }

    pub fn y0(&self) -> i32 {
        self.y0
    }

    pub fn x1(&self) -> i32 {
        self.x1
    }

    pub fn y1(&self) -> i32 {
        self.y1
    }

    pub fn width(&self) -> u32 {
        (self.x1 - self.x0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y1 - self.y0) as u32
    }

    /// Clamp to a `width` × `height` image.
    ///
    /// Returns the clamped rectangle and whether anything changed. A rectangle lying
    /// entirely outside the image collapses onto the nearest one-pixel edge strip.
    pub fn clamp_to(&self, width: u32, height: u32) -> (FaceRect, bool) {
        let w = i32::try_from(width).unwrap_or(i32::MAX).max(1);
        let h = i32::try_from(height).unwrap_or(i32::MAX).max(1);

        let x0 = self.x0.clamp(0, w - 1);
        let y0 = self.y0.clamp(0, h - 1);
        let clamped = FaceRect {
            x0,
            y0,
            x1: self.x1.clamp(x0 + 1, w),
            y1: self.y1.clamp(y0 + 1, h),
        };
        (clamped, clamped != *self)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Build an L2-normalized embedding from raw model output.
    pub fn normalized(raw: Vec<f32>, model_version: Option<String>) -> Self {
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };
        Self {
            values,
            model_version,
        }
    }
}

/// Per-face data produced by the detector and consumed only by the swap model.
///
/// The pipeline carries it from detection to swap without looking inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDescriptor {
    pub detection: BoundingBox,
    /// Identity embedding, present when the detector produced landmarks to align on.
    pub embedding: Option<Embedding>,
}

/// One face as returned by a [`crate::detector::FaceDetector`].
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: FaceRect,
    pub descriptor: FaceDescriptor,
}

/// A detected face together with its crop from the source image.
///
/// Built by [`crate::extractor::extract`]; immutable afterwards.
#[derive(Debug, Clone)]
pub struct FaceRecord {
    index: usize,
    bbox: FaceRect,
    crop_rect: FaceRect,
    descriptor: FaceDescriptor,
    crop: RgbImage,
}

impl FaceRecord {
    pub(crate) fn new(
        index: usize,
        bbox: FaceRect,
        crop_rect: FaceRect,
        descriptor: FaceDescriptor,
        crop: RgbImage,
    ) -> Self {
        Self {
            index,
            bbox,
            crop_rect,
            descriptor,
            crop,
        }
    }

    /// Position in the detector's output order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Rectangle as reported by the detector.
    pub fn bbox(&self) -> FaceRect {
        self.bbox
    }

    /// Rectangle actually cropped, after clamping to the image bounds.
    pub fn crop_rect(&self) -> FaceRect {
        self.crop_rect
    }

    /// True when the detector's rectangle reached outside the image.
    pub fn clamped(&self) -> bool {
        self.bbox != self.crop_rect
    }

    pub fn descriptor(&self) -> &FaceDescriptor {
        &self.descriptor
    }

    pub fn crop(&self) -> &RgbImage {
        &self.crop
    }

    /// Detector confidence for this face.
    pub fn confidence(&self) -> f32 {
        self.descriptor.detection.confidence
    }
}

/// Where an [`Image`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOrigin {
    File(PathBuf),
    Memory(String),
    /// Produced by a pipeline stage (swap, enhancement).
    Derived(String),
}

impl std::fmt::Display for ImageOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageOrigin::File(path) => write!(f, "{}", path.display()),
            ImageOrigin::Memory(label) => write!(f, "memory:{label}"),
            ImageOrigin::Derived(stage) => write!(f, "derived:{stage}"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("image has zero dimensions ({width}x{height})")]
pub struct EmptyImage {
    pub width: u32,
    pub height: u32,
}

/// A decoded 3-channel RGB pixel buffer plus its origin.
///
/// At least 1×1. Stages that transform an image produce a new `Image`.
#[derive(Debug, Clone)]
pub struct Image {
    pixels: RgbImage,
    origin: ImageOrigin,
}

impl Image {
    pub fn new(pixels: RgbImage, origin: ImageOrigin) -> Result<Self, EmptyImage> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(EmptyImage { width, height });
        }
        Ok(Self { pixels, origin })
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn into_pixels(self) -> RgbImage {
        self.pixels
    }

    pub fn origin(&self) -> &ImageOrigin {
        &self.origin
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}
