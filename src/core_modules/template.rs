// THEORY:
// The `template` module holds the reference pattern the matcher searches for and
// every derived form of it. The expensive part of preparing a template (colour to
// luminance, mask extraction, sum and sum of squares) is done exactly once for the
// base pattern; every scaled variant is resampled from the base *luminance plane*,
// never from the source colour pixels.
//
// Key architectural principles:
// 1.  **Immutable once built**: A `TemplatePrecomp` is never mutated after
//     construction. It is shared behind an `Arc` by every worker that matches at
//     that size.
// 2.  **Masking is first class**: Pixels with zero alpha are excluded from the
//     statistics and from correlation. A fully opaque template carries no mask at
//     all, which lets the matcher take the integral-image fast path.
// 3.  **Insert-once cache**: The `ScaledTemplateCache` maps an output size to its
//     precomputed template. Readers take a shared lock; a builder resamples outside
//     the lock and the first insert for a size wins. Entries are kept for the cache
//     owner's lifetime, since scale sets are small and reused frame after frame.

use crate::core_modules::frame::{FrameView, OwnedFrame};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Below this standard deviation a template is treated as constant.
pub const FLAT_EPSILON: f64 = 1e-9;

/// The reference pattern, as supplied by the caller. Immutable.
#[derive(Debug, Clone)]
pub struct TemplateView {
    frame: OwnedFrame,
}

impl TemplateView {
    /// Copies the pattern out of a borrowed frame.
    pub fn from_view(view: &FrameView<'_>) -> Self {
        Self {
            frame: view.to_owned_frame(),
        }
    }

    pub fn from_image(img: image::RgbaImage) -> Self {
        Self { frame: img.into() }
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn view(&self) -> FrameView<'_> {
        self.frame.view()
    }

    /// Luminance plane and statistics. `None` for an empty or fully masked pattern.
    pub fn precompute(&self) -> Option<TemplatePrecomp> {
        TemplatePrecomp::from_view(&self.frame.view())
    }
}

impl From<OwnedFrame> for TemplateView {
    fn from(frame: OwnedFrame) -> Self {
        Self { frame }
    }
}

/// A template (base or scaled) reduced to luminance plus summary statistics.
#[derive(Debug, Clone)]
pub struct TemplatePrecomp {
    /// Luminance per pixel, row-major. Masked pixels hold 0.
    gray: Vec<f32>,
    /// `Some` only when at least one pixel is masked; `true` means "use this pixel".
    mask: Option<Vec<bool>>,
    width: u32,
    height: u32,
    /// Number of unmasked pixels.
    count: usize,
    mean: f64,
    std_dev: f64,
}

impl TemplatePrecomp {
    /// Builds the precomputed form of a template straight from its pixels.
    pub fn from_view(view: &FrameView<'_>) -> Option<Self> {
        if view.is_empty() {
            return None;
        }
        let len = view.width() as usize * view.height() as usize;
        let mut gray = Vec::with_capacity(len);
        let mut mask = Vec::with_capacity(len);
        for px in view.pixels() {
            mask.push(!px.is_masked());
            gray.push(px.luminance() as f32);
        }
        Self::from_parts(gray, mask, view.width(), view.height())
    }

    fn from_parts(gray: Vec<f32>, mask: Vec<bool>, width: u32, height: u32) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for (&value, &used) in gray.iter().zip(&mask) {
            if used {
                let v = value as f64;
                count += 1;
                sum += v;
                sum_sq += v * v;
            }
        }
        if count == 0 {
            return None;
        }
        let n = count as f64;
        let mean = sum / n;
        let variance = (sum_sq - sum * sum / n) / n;
        let std_dev = if variance > 0.0 { variance.sqrt() } else { 0.0 };
        let mask = if count == gray.len() { None } else { Some(mask) };
        Some(Self {
            gray,
            mask,
            width,
            height,
            count,
            mean,
            std_dev,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn gray(&self) -> &[f32] {
        &self.gray
    }

    pub fn mask(&self) -> Option<&[bool]> {
        self.mask.as_deref()
    }

    #[inline]
    pub fn is_used(&self, index: usize) -> bool {
        self.mask.as_ref().is_none_or(|m| m[index])
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }

    pub fn is_constant(&self) -> bool {
        self.std_dev <= FLAT_EPSILON
    }

    /// Output size for a scale factor, or `None` when the factor is not positive
    /// or the result would be smaller than 2x2.
    pub fn scaled_dims(&self, factor: f64) -> Option<(u32, u32)> {
        if !(factor > 0.0) || !factor.is_finite() {
            return None;
        }
        let w = (self.width as f64 * factor) as u32;
        let h = (self.height as f64 * factor) as u32;
        if w < 2 || h < 2 {
            return None;
        }
        Some((w, h))
    }

    /// Bilinear resample of the luminance plane (and mask) to `width` x `height`.
    /// Pixel centres are aligned, so a 1:1 resample reproduces the source.
    pub fn resample(&self, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let (bw, bh) = (self.width as usize, self.height as usize);
        let (w, h) = (width as usize, height as usize);
        let fx = bw as f64 / w as f64;
        let fy = bh as f64 / h as f64;
        let mut gray = Vec::with_capacity(w * h);
        let mut mask = Vec::with_capacity(w * h);

        for y in 0..h {
            let (y0, y1, dy) = Self::source_span(y, fy, bh);
            for x in 0..w {
                let (x0, x1, dx) = Self::source_span(x, fx, bw);
                let lerp = |a: f64, b: f64, c: f64, d: f64| {
                    let top = a * (1.0 - dx) + b * dx;
                    let bottom = c * (1.0 - dx) + d * dx;
                    top * (1.0 - dy) + bottom * dy
                };
                let g = |sx: usize, sy: usize| self.gray[sy * bw + sx] as f64;
                gray.push(lerp(g(x0, y0), g(x1, y0), g(x0, y1), g(x1, y1)) as f32);

                let coverage = match &self.mask {
                    None => 1.0,
                    Some(m) => {
                        let c = |sx: usize, sy: usize| if m[sy * bw + sx] { 1.0 } else { 0.0 };
                        lerp(c(x0, y0), c(x1, y0), c(x0, y1), c(x1, y1))
                    }
                };
                mask.push(coverage >= 0.5);
            }
        }
        Self::from_parts(gray, mask, width, height)
    }

    /// Maps an output coordinate to its two source neighbours and the blend weight.
    #[inline]
    fn source_span(out: usize, factor: f64, len: usize) -> (usize, usize, f64) {
        let max = (len - 1) as f64;
        let src = ((out as f64 + 0.5) * factor - 0.5).clamp(0.0, max);
        let lo = src.floor() as usize;
        let hi = (lo + 1).min(len - 1);
        (lo, hi, src - lo as f64)
    }
}

/// Scaled variants of one base template, keyed by output size.
#[derive(Debug)]
pub struct ScaledTemplateCache {
    base: Arc<TemplatePrecomp>,
    entries: RwLock<HashMap<(u32, u32), Arc<TemplatePrecomp>>>,
}

impl ScaledTemplateCache {
    pub fn new(base: TemplatePrecomp) -> Self {
        let base = Arc::new(base);
        let mut entries = HashMap::new();
        entries.insert((base.width(), base.height()), Arc::clone(&base));
        Self {
            base,
            entries: RwLock::new(entries),
        }
    }

    pub fn base(&self) -> &Arc<TemplatePrecomp> {
        &self.base
    }

    /// Returns the template resampled by `factor`, building and caching it on
    /// first request. `None` for non-positive factors or sub-2x2 results.
    pub fn get_or_build(&self, factor: f64) -> Option<Arc<TemplatePrecomp>> {
        if factor == 1.0 {
            return Some(Arc::clone(&self.base));
        }
        let key = self.base.scaled_dims(factor)?;
        if let Some(hit) = self.entries.read().get(&key) {
            return Some(Arc::clone(hit));
        }

        let built = Arc::new(self.base.resample(key.0, key.1)?);
        tracing::trace!(width = key.0, height = key.1, factor, "cached scaled template");
        let mut entries = self.entries.write();
        Some(Arc::clone(entries.entry(key).or_insert(built)))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
