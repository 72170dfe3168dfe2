// THEORY:
// The `IntegralImage` is a per-frame summary built once and thrown away when the
// frame's matching pass ends. It holds the frame's luminance plus two summed-area
// tables (of luminance and of luminance squared), so the mean and variance of any
// axis-aligned window cost four lookups each instead of a full window scan.
//
// The tables are built in a single pass with a running row sum:
//     I(x, y) = I(x, y - 1) + rowSum(0..=x, y)

use crate::core_modules::frame::FrameView;
use crate::core_modules::pixel::pixel::Pixel;

/// Luminance of a frame plus summed-area tables of luminance and luminance².
#[derive(Debug, Clone)]
pub struct IntegralImage {
    gray: Vec<f64>,
    integral: Vec<f64>,
    integral_sq: Vec<f64>,
    width: usize,
    height: usize,
}

impl IntegralImage {
    /// Builds the luminance plane and both tables in one pass.
    /// Masked (alpha == 0) frame pixels contribute zero.
    pub fn build(frame: &FrameView<'_>) -> Self {
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let len = width * height;
        let mut gray = Vec::with_capacity(len);
        let mut integral = vec![0.0; len];
        let mut integral_sq = vec![0.0; len];

        for y in 0..height {
            let mut row_sum = 0.0;
            let mut row_sum_sq = 0.0;
            for (x, px) in frame.row(y as u32).chunks_exact(4).enumerate() {
                let lum = Pixel::from_rgba(px).map_or(0.0, |p| p.luminance());
                gray.push(lum);
                row_sum += lum;
                row_sum_sq += lum * lum;
                let offset = y * width + x;
                if y == 0 {
                    integral[offset] = row_sum;
                    integral_sq[offset] = row_sum_sq;
                } else {
                    integral[offset] = integral[offset - width] + row_sum;
                    integral_sq[offset] = integral_sq[offset - width] + row_sum_sq;
                }
            }
        }

        Self {
            gray,
            integral,
            integral_sq,
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// The luminance plane, row-major.
    pub fn gray(&self) -> &[f64] {
        &self.gray
    }

    #[inline]
    pub fn gray_at(&self, x: usize, y: usize) -> f64 {
        self.gray[y * self.width + x]
    }

    /// Sum of luminance over the `w` x `h` window whose top-left is (`x`, `y`).
    #[inline]
    pub fn window_sum(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        Self::rect_sum(&self.integral, self.width, x, y, w, h)
    }

    /// Sum of luminance² over the window.
    #[inline]
    pub fn window_sum_sq(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        Self::rect_sum(&self.integral_sq, self.width, x, y, w, h)
    }

    /// Mean and population variance of the window.
    pub fn window_stats(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let n = (w * h) as f64;
        if n == 0.0 {
            return (0.0, 0.0);
        }
        let sum = self.window_sum(x, y, w, h);
        let sum_sq = self.window_sum_sq(x, y, w, h);
        let mean = sum / n;
        let variance = (sum_sq - sum * sum / n) / n;
        (mean, variance)
    }

    /// Inclusive rectangle sum `[x0, x1] x [y0, y1]` via four corner lookups.
    #[inline]
    fn rect_sum(table: &[f64], width: usize, x: usize, y: usize, w: usize, h: usize) -> f64 {
        if w == 0 || h == 0 {
            return 0.0;
        }
        let x1 = x + w - 1;
        let y1 = y + h - 1;
        let at = |cx: usize, cy: usize| table[cy * width + cx];

        let mut total = at(x1, y1);
        if x > 0 {
            total -= at(x - 1, y1);
        }
        if y > 0 {
            total -= at(x1, y - 1);
        }
        if x > 0 && y > 0 {
            total += at(x - 1, y - 1);
        }
        total
    }
}
