//! Render pipeline — badge-colored boxes on the frame, 2:1 center
//! crop, resize to the output size, handed to a display sink.
//!
//! The actual on-screen surface is an external concern; the default
//! sink discards frames and the snapshot sink writes periodic PNGs
//! for kiosk debugging.

use crate::session::{Badge, Detection};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use presence_core::BoundingBox;
use presence_hw::frame::center_crop_rows;
use presence_hw::Frame;
use std::path::PathBuf;

const BOX_THICKNESS: u32 = 2;

/// Destination for rendered frames. Must never fail the frame loop.
pub trait FrameSink: Send {
    fn present(&mut self, frame: &Frame, detections: &[Detection]);
}

/// Discards every frame. Default for headless runs.
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _frame: &Frame, _detections: &[Detection]) {}
}

/// Writes every Nth rendered frame as a PNG.
pub struct SnapshotSink {
    dir: PathBuf,
    every: u64,
    target_width: u32,
    target_height: u32,
    frames: u64,
}

impl SnapshotSink {
    pub fn new(dir: PathBuf, every: u64, target_width: u32, target_height: u32) -> Self {
        Self {
            dir,
            every: every.max(1),
            target_width,
            target_height,
            frames: 0,
        }
    }
}

impl FrameSink for SnapshotSink {
    fn present(&mut self, frame: &Frame, detections: &[Detection]) {
        let n = self.frames;
        self.frames += 1;
        if n % self.every != 0 {
            return;
        }
        let img = compose_display(frame, detections, self.target_width, self.target_height);
        let path = self.dir.join(format!("frame-{n:06}.png"));
        if let Err(e) = img.save(&path) {
            tracing::warn!(path = %path.display(), error = %e, "snapshot write failed");
        }
    }
}

/// Box color per badge state: red for strangers, amber while waiting
/// for the blink, green once marked.
pub fn badge_color(badge: Badge) -> Rgb<u8> {
    match badge {
        Badge::Unknown => Rgb([255, 0, 0]),
        Badge::PendingBlink => Rgb([255, 165, 0]),
        Badge::AlreadyMarked | Badge::JustMarked => Rgb([0, 255, 0]),
    }
}

/// Produce the display image: grayscale frame promoted to RGB, boxes
/// drawn at native resolution, center-cropped to 2:1 and resized to
/// the target dimensions.
pub fn compose_display(
    frame: &Frame,
    detections: &[Detection],
    target_width: u32,
    target_height: u32,
) -> RgbImage {
    let mut canvas = RgbImage::from_fn(frame.width.max(1), frame.height.max(1), |x, y| {
        let p = frame
            .data
            .get((y * frame.width + x) as usize)
            .copied()
            .unwrap_or(0);
        Rgb([p, p, p])
    });

    for det in detections {
        draw_box(&mut canvas, &det.bbox, badge_color(det.badge));
    }

    let (start, crop_h) = center_crop_rows(canvas.width(), canvas.height());
    let cropped = imageops::crop_imm(&canvas, 0, start, canvas.width(), crop_h).to_image();
    imageops::resize(&cropped, target_width, target_height, FilterType::Triangle)
}

/// Draw a rectangle outline, clamped to the image bounds.
fn draw_box(img: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || bbox.width <= 0.0 || bbox.height <= 0.0 {
        return;
    }
    let x0 = bbox.x.clamp(0.0, (w - 1) as f32) as u32;
    let y0 = bbox.y.clamp(0.0, (h - 1) as f32) as u32;
    let x1 = (bbox.x + bbox.width).clamp(0.0, (w - 1) as f32) as u32;
    let y1 = (bbox.y + bbox.height).clamp(0.0, (h - 1) as f32) as u32;

    for t in 0..BOX_THICKNESS {
        let top = (y0 + t).min(h - 1);
        let bottom = y1.saturating_sub(t).max(y0);
        for x in x0..=x1 {
            img.put_pixel(x, top, color);
            img.put_pixel(x, bottom, color);
        }
        let left = (x0 + t).min(w - 1);
        let right = x1.saturating_sub(t).max(x0);
        for y in y0..=y1 {
            img.put_pixel(left, y, color);
            img.put_pixel(right, y, color);
        }
    }
}
