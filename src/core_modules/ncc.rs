// THEORY:
// The `ncc` module is the single-scale matching engine. It slides a precomputed
// template over a frame's luminance plane and scores every candidate offset with
// the normalized cross-correlation coefficient:
//
//     score = (Σ F·T - n·meanF·meanT) / (n · stdF · stdT)
//
// Key architectural principles:
// 1.  **Statistics are never recomputed per window**: Frame-window mean and
//     variance come from the `IntegralImage` in O(1); template statistics come from
//     the `TemplatePrecomp`. Only Σ F·T is computed per offset. Masked templates
//     are the exception: their window statistics must skip the masked positions,
//     so they are gathered in the same pass as Σ F·T.
// 2.  **Coarse then fine**: A strided scan finds the neighbourhood cheaply; an
//     optional refinement pass re-scans ±stride around the coarse best at stride 1.
// 3.  **Degenerate input is an answer, not an error**: An empty or fully masked
//     template, or a frame smaller than the template, yields `score = -1`.
// 4.  **Flat regions are skipped**: A window with (numerically) zero variance has
//     no defined correlation. A (numerically) constant template falls back to an
//     exact-equality scan instead.

use crate::core_modules::frame::FrameView;
use crate::core_modules::integral::IntegralImage;
use crate::core_modules::template::{FLAT_EPSILON, TemplatePrecomp, TemplateView};
use std::time::{Duration, Instant};

pub const DEFAULT_THRESHOLD: f64 = 0.80;

/// Tolerance, in luminance units, for the constant-template equality scan.
const EQUALITY_TOLERANCE: f64 = 1e-3;

/// Options for a single-scale match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    /// Minimum score for `MatchResult::found`. Non-positive values mean the default.
    pub threshold: f64,
    /// Coarse scan step in pixels. Zero means 1.
    pub stride: u32,
    /// Re-scan ±stride around the coarse best at stride 1.
    pub refine: bool,
    /// Report the best coordinates even when the score is below threshold.
    pub return_best_even: bool,
    /// Record how long the match took.
    pub debug_timing: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            stride: 1,
            refine: false,
            return_best_even: false,
            debug_timing: false,
        }
    }
}

impl MatchOptions {
    /// Replaces out-of-range values with safe defaults.
    pub fn normalized(mut self) -> Self {
        if !(self.threshold > 0.0) {
            self.threshold = DEFAULT_THRESHOLD;
        }
        if self.stride == 0 {
            self.stride = 1;
        }
        self
    }
}

/// Outcome of a match. `found` is derived from `score` and `threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Top-left corner of the best window.
    pub x: u32,
    pub y: u32,
    /// Correlation coefficient in [-1, 1]; -1 when nothing could be scored.
    pub score: f64,
    /// Scale factor of the template that produced this result.
    pub scale: f64,
    /// Size of the (scaled) template that was matched.
    pub width: u32,
    pub height: u32,
    /// The threshold this result was judged against.
    pub threshold: f64,
    pub duration: Option<Duration>,
    /// Number of scales actually scored. 1 for a single-scale match.
    pub scales_evaluated: usize,
}

impl MatchResult {
    pub fn not_found(threshold: f64) -> Self {
        Self {
            x: 0,
            y: 0,
            score: -1.0,
            scale: 0.0,
            width: 0,
            height: 0,
            threshold,
            duration: None,
            scales_evaluated: 0,
        }
    }

    pub fn found(&self) -> bool {
        self.score >= self.threshold
    }

    /// Centre of the matched window, in frame coordinates.
    pub fn center(&self) -> (i32, i32) {
        (
            (self.x + self.width / 2) as i32,
            (self.y + self.height / 2) as i32,
        )
    }
}

/// Matches `template` against `frame` at a single scale.
pub fn match_template(frame: &FrameView<'_>, template: &TemplateView, opts: &MatchOptions) -> MatchResult {
    let opts = opts.normalized();
    let Some(pre) = template.precompute() else {
        return MatchResult::not_found(opts.threshold);
    };
    if frame.width() < pre.width() || frame.height() < pre.height() {
        return MatchResult::not_found(opts.threshold);
    }
    let integral = IntegralImage::build(frame);
    match_precomputed(&integral, &pre, &opts)
}

/// Matches an already precomputed template against an already built integral image.
/// This is the per-scale work unit of the multi-scale orchestrator.
pub fn match_precomputed(integral: &IntegralImage, template: &TemplatePrecomp, opts: &MatchOptions) -> MatchResult {
    let start = opts.debug_timing.then(Instant::now);
    let opts = opts.normalized();
    let mut result = MatchResult::not_found(opts.threshold);

    let (fw, fh) = (integral.width(), integral.height());
    let (tw, th) = (template.width() as usize, template.height() as usize);
    if tw == 0 || th == 0 || fw < tw || fh < th || template.count() == 0 {
        return result;
    }
    result.scale = 1.0;
    result.width = template.width();
    result.height = template.height();
    result.scales_evaluated = 1;

    let scanner = WindowScanner::new(integral, template);
    let stride = opts.stride as usize;

    let best = if template.is_constant() {
        scanner.find_exact(stride).map(|(x, y)| (x, y, 1.0))
    } else {
        let coarse = scanner.scan(0..=fw - tw, 0..=fh - th, stride, None);
        if opts.refine && stride > 1 {
            coarse.map(|(bx, by, score)| {
                let xs = bx.saturating_sub(stride)..=(bx + stride).min(fw - tw);
                let ys = by.saturating_sub(stride)..=(by + stride).min(fh - th);
                scanner
                    .scan(xs, ys, 1, Some((bx, by, score)))
                    .unwrap_or((bx, by, score))
            })
        } else {
            coarse
        }
    };

    if let Some((x, y, score)) = best {
        result.score = score;
        if result.found() || opts.return_best_even {
            result.x = x as u32;
            result.y = y as u32;
        }
    }
    result.duration = start.map(|s| s.elapsed());
    result
}

/// Scores template placements against one frame.
struct WindowScanner<'a> {
    integral: &'a IntegralImage,
    template: &'a TemplatePrecomp,
    tw: usize,
    th: usize,
}

impl<'a> WindowScanner<'a> {
    fn new(integral: &'a IntegralImage, template: &'a TemplatePrecomp) -> Self {
        Self {
            integral,
            template,
            tw: template.width() as usize,
            th: template.height() as usize,
        }
    }

    /// Best (x, y, score) over the given offsets, strictly greater wins.
    fn scan(
        &self,
        xs: std::ops::RangeInclusive<usize>,
        ys: std::ops::RangeInclusive<usize>,
        stride: usize,
        seed: Option<(usize, usize, f64)>,
    ) -> Option<(usize, usize, f64)> {
        let mut best = seed;
        for y in ys.step_by(stride) {
            for x in xs.clone().step_by(stride) {
                let Some(score) = self.score_at(x, y) else {
                    continue;
                };
                if best.is_none_or(|(_, _, b)| score > b) {
                    best = Some((x, y, score));
                }
            }
        }
        best
    }

    /// NCC at offset (x, y), or `None` when the frame window is flat.
    fn score_at(&self, x: usize, y: usize) -> Option<f64> {
        let tpl = self.template;
        let (mean_f, var_f, sum_ft, n) = match tpl.mask() {
            None => {
                let (mean, variance) = self.integral.window_stats(x, y, self.tw, self.th);
                (mean, variance, self.cross_sum(x, y), (self.tw * self.th) as f64)
            }
            Some(mask) => {
                let (sum_f, sum_f2, sum_ft, n) = self.masked_sums(x, y, mask);
                let mean = sum_f / n;
                (mean, (sum_f2 - sum_f * sum_f / n) / n, sum_ft, n)
            }
        };

        // Summed-area tables lose absolute precision on bright, large frames.
        if var_f <= FLAT_EPSILON + mean_f * mean_f * 1e-10 {
            return None;
        }
        let denom = n * var_f.sqrt() * tpl.std_dev();
        if denom <= 0.0 {
            return None;
        }
        let numer = sum_ft - n * mean_f * tpl.mean();
        Some((numer / denom).clamp(-1.0, 1.0))
    }

    fn cross_sum(&self, x: usize, y: usize) -> f64 {
        let gray = self.integral.gray();
        let fw = self.integral.width();
        let tgray = self.template.gray();
        (0..self.th)
            .map(|py| {
                let frow = &gray[(y + py) * fw + x..][..self.tw];
                let trow = &tgray[py * self.tw..][..self.tw];
                frow.iter().zip(trow).map(|(&f, &t)| f * t as f64).sum::<f64>()
            })
            .sum()
    }

    /// Window statistics and Σ F·T restricted to unmasked template positions.
    fn masked_sums(&self, x: usize, y: usize, mask: &[bool]) -> (f64, f64, f64, f64) {
        let tgray = self.template.gray();
        let (mut sum_f, mut sum_f2, mut sum_ft) = (0.0, 0.0, 0.0);
        for py in 0..self.th {
            for px in 0..self.tw {
                let i = py * self.tw + px;
                if !mask[i] {
                    continue;
                }
                let f = self.integral.gray_at(x + px, y + py);
                sum_f += f;
                sum_f2 += f * f;
                sum_ft += f * tgray[i] as f64;
            }
        }
        (sum_f, sum_f2, sum_ft, self.template.count() as f64)
    }

    /// First strided offset whose unmasked pixels all equal the template's level.
    fn find_exact(&self, stride: usize) -> Option<(usize, usize)> {
        let fw = self.integral.width();
        let fh = self.integral.height();
        let level = self.template.mean();
        let (cx, cy) = (self.tw / 2, self.th / 2);
        let center_used = self.template.is_used(cy * self.tw + cx);
        let matches = |v: f64| (v - level).abs() <= EQUALITY_TOLERANCE;

        for y in (0..=fh - self.th).step_by(stride) {
            for x in (0..=fw - self.tw).step_by(stride) {
                if center_used && !matches(self.integral.gray_at(x + cx, y + cy)) {
                    continue;
                }
                let all_equal = (0..self.th).all(|py| {
                    (0..self.tw).all(|px| {
                        !self.template.is_used(py * self.tw + px)
                            || matches(self.integral.gray_at(x + px, y + py))
                    })
                });
                if all_equal {
                    return Some((x, y));
                }
            }
        }
        None
    }
}
