// THEORY:
// The `frame` module is the boundary between the external capture collaborator and
// the vision core. Frames arrive as raw RGBA byte buffers produced at an unknown
// cadence; the core only ever *borrows* them.
//
// Key architectural principles:
// 1.  **Borrowed views**: `FrameView<'a>` is a read-only window over somebody else's
//     buffer (possibly a pooled one). The lifetime ties every use of the view to the
//     call that received it, so the core cannot retain a frame across an async
//     boundary by accident.
// 2.  **Explicit stride**: Rows may be padded. Every access goes through
//     `row * stride + col * 4`, never through `width * 4`.
// 3.  **Copy out what you keep**: When a piece of a frame must outlive the call
//     (the ROI fed to the controller's mailbox), it is copied into an `OwnedFrame`.

use crate::core_modules::pixel::pixel::{CHANNELS, Pixel};
use crate::error::VisionError;
use tokio::time::Instant;

/// An axis-aligned rectangle in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// A read-only view over an RGBA pixel buffer owned by the caller.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    /// Bytes per row. `stride >= width * 4`.
    stride: usize,
    timestamp: Option<Instant>,
    sequence: u64,
}

impl<'a> FrameView<'a> {
    /// Wraps `data` as a `width` x `height` RGBA frame whose rows are `stride` bytes apart.
    pub fn new(data: &'a [u8], width: u32, height: u32, stride: usize) -> Result<Self, VisionError> {
        let row_bytes = width as usize * CHANNELS;
        if stride < row_bytes {
            return Err(VisionError::StrideTooSmall { width, stride });
        }
        let expected = if height == 0 {
            0
        } else {
            stride * (height as usize - 1) + row_bytes
        };
        if data.len() < expected {
            return Err(VisionError::BufferTooSmall {
                width,
                height,
                stride,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
            timestamp: None,
            sequence: 0,
        })
    }

    /// Wraps a tightly packed buffer (`stride == width * 4`).
    pub fn packed(data: &'a [u8], width: u32, height: u32) -> Result<Self, VisionError> {
        Self::new(data, width, height, width as usize * CHANNELS)
    }

    pub fn with_timestamp(mut self, timestamp: Instant) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Capture time, if the producer stamped one.
    pub fn timestamp(&self) -> Option<Instant> {
        self.timestamp
    }

    /// Producer sequence number. Zero means "unsequenced".
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The `width * 4` pixel bytes of row `y`, without padding.
    #[inline]
    pub fn row(&self, y: u32) -> &'a [u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * CHANNELS]
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Pixel {
        let offset = y as usize * self.stride + x as usize * CHANNELS;
        Pixel::new(
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        )
    }

    /// All pixels in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = Pixel> + 'a {
        let view = *self;
        (0..view.height).flat_map(move |y| {
            view.row(y)
                .chunks_exact(CHANNELS)
                .filter_map(Pixel::from_rgba)
        })
    }

    /// Copies a square region of side `size` centred on (`cx`, `cy`).
    ///
    /// The region is clamped to the frame and is never smaller than 1x1. Returns
    /// `None` only for an empty frame.
    pub fn extract_roi(&self, cx: i32, cy: i32, size: u32) -> Option<(OwnedFrame, Rect)> {
        if self.is_empty() {
            return None;
        }
        let size = size.max(1) as i64;
        let half = size / 2;
        let x0 = (cx as i64 - half).clamp(0, self.width as i64 - 1);
        let y0 = (cy as i64 - half).clamp(0, self.height as i64 - 1);
        let w = size.min(self.width as i64 - x0).max(1);
        let h = size.min(self.height as i64 - y0).max(1);
        let rect = Rect::new(x0 as u32, y0 as u32, w as u32, h as u32);
        Some((self.crop(rect), rect))
    }

    /// Copies `rect` (which must lie inside the frame) into an owned frame.
    fn crop(&self, rect: Rect) -> OwnedFrame {
        let mut data = Vec::with_capacity(rect.width as usize * rect.height as usize * CHANNELS);
        let start = rect.x as usize * CHANNELS;
        let end = start + rect.width as usize * CHANNELS;
        for y in rect.y..rect.y + rect.height {
            data.extend_from_slice(&self.row(y)[start..end]);
        }
        OwnedFrame {
            data,
            width: rect.width,
            height: rect.height,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }

    pub fn to_owned_frame(&self) -> OwnedFrame {
        self.crop(Rect::new(0, 0, self.width, self.height))
    }
}

impl<'a> From<&'a image::RgbaImage> for FrameView<'a> {
    fn from(img: &'a image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        // An `RgbaImage` is always tightly packed with exactly width * height * 4 bytes.
        Self {
            data: img.as_raw(),
            width,
            height,
            stride: width as usize * CHANNELS,
            timestamp: None,
            sequence: 0,
        }
    }
}

/// A tightly packed RGBA frame that owns its pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    timestamp: Option<Instant>,
    sequence: u64,
}

impl OwnedFrame {
    /// A frame where every pixel is `pixel`.
    pub fn filled(width: u32, height: u32, pixel: Pixel) -> Self {
        let bytes: [u8; CHANNELS] = pixel.into();
        let data = bytes
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * CHANNELS)
            .collect();
        Self {
            data,
            width,
            height,
            timestamp: None,
            sequence: 0,
        }
    }

    /// A frame whose pixels are produced by `f(x, y)`.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> Pixel) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for y in 0..height {
            for x in 0..width {
                let bytes: [u8; CHANNELS] = f(x, y).into();
                data.extend_from_slice(&bytes);
            }
        }
        Self {
            data,
            width,
            height,
            timestamp: None,
            sequence: 0,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Instant) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Paints the rectangle `[x0, x1) x [y0, y1)`, clamped to the frame.
    pub fn fill_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, pixel: Pixel) {
        let bytes: [u8; CHANNELS] = pixel.into();
        for y in y0.min(self.height)..y1.min(self.height) {
            for x in x0.min(self.width)..x1.min(self.width) {
                let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
                self.data[offset..offset + CHANNELS].copy_from_slice(&bytes);
            }
        }
    }

    /// Writes `other` with its top-left corner at (`x`, `y`), clipping at the edges.
    pub fn blit(&mut self, other: &FrameView<'_>, x: u32, y: u32) {
        for oy in 0..other.height() {
            let ty = y + oy;
            if ty >= self.height {
                break;
            }
            for ox in 0..other.width() {
                let tx = x + ox;
                if tx >= self.width {
                    break;
                }
                let bytes: [u8; CHANNELS] = other.pixel(ox, oy).into();
                let offset = (ty as usize * self.width as usize + tx as usize) * CHANNELS;
                self.data[offset..offset + CHANNELS].copy_from_slice(&bytes);
            }
        }
    }

    /// See `FrameView::extract_roi`.
    pub fn extract_roi(&self, cx: i32, cy: i32, size: u32) -> Option<(OwnedFrame, Rect)> {
        self.view().extract_roi(cx, cy, size)
    }

    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            data: &self.data,
            width: self.width,
            height: self.height,
            stride: self.width as usize * CHANNELS,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }
}

impl From<image::RgbaImage> for OwnedFrame {
    fn from(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            timestamp: None,
            sequence: 0,
        }
    }
}
