//! Frame type and image operations — YUYV conversion, downscaling,
//! aspect cropping.

use image::imageops::{self, FilterType};
use image::GrayImage;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// View the frame as a [`GrayImage`] for saving or further
    /// processing. Falls back to a blank image if the buffer does not
    /// match the stated dimensions.
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| GrayImage::new(self.width.max(1), self.height.max(1)))
    }

    /// Downscale the frame by a uniform factor in (0, 1].
    ///
    /// Detection runs on the downscaled copy for throughput; boxes are
    /// mapped back with [`BoundingBox::scaled`] by the inverse factor.
    pub fn downscaled(&self, factor: f32) -> Frame {
        let w = ((self.width as f32 * factor).round() as u32).max(1);
        let h = ((self.height as f32 * factor).round() as u32).max(1);
        let small = imageops::resize(&self.to_gray_image(), w, h, FilterType::Triangle);
        Frame {
            data: small.into_raw(),
            width: w,
            height: h,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
/// Grayscale = every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Vertical extent of a centered crop bringing `width`x`height` to a
/// 2:1 output aspect. Returns (start_row, crop_height).
///
/// Frames shorter than the target aspect are kept whole.
pub fn center_crop_rows(width: u32, height: u32) -> (u32, u32) {
    let crop_h = (width / 2).min(height).max(1);
    let start = (height - crop_h) / 2;
    (start, crop_h)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
