// THEORY:
// The `multi_scale` module finds a template whose on-screen size is unknown. It
// tries a bounded set of scale factors, one matching task per factor, and keeps the
// best-scoring result.
//
// Key architectural principles:
// 1.  **One frame summary, many templates**: The frame's `IntegralImage` is built
//     once and shared read-only by every task. Each task fetches its resampled
//     template from the `ScaledTemplateCache` owned by the matcher instance.
// 2.  **Bounded data parallelism**: Tasks run on a rayon pool sized to the
//     machine's hardware parallelism. Nothing is shared between tasks except the
//     read-only inputs, the cache and one atomic stop flag.
// 3.  **Cooperative early stop**: When a task scores at or above `stop_on_score` it
//     raises the flag. Tasks that have not started yet skip their work; tasks in
//     flight finish their scan. The result is guaranteed to meet the stop bound, not
//     to be the global maximum.
// 4.  **Ties are best-effort**: Results are reduced by strictly greater score, so
//     equal scores keep whichever result the reduction saw first. Under parallel
//     execution that order is not a contract.

use crate::core_modules::frame::FrameView;
use crate::core_modules::integral::IntegralImage;
use crate::core_modules::ncc::{MatchOptions, MatchResult, match_precomputed};
use crate::core_modules::template::{ScaledTemplateCache, TemplateView};
use crate::error::VisionError;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::debug;

/// Upper bound on generated scale factors, whatever the configured range.
pub const MAX_GENERATED_SCALES: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct MultiScaleOptions {
    /// Explicit factors to try. When empty, factors are generated from the range.
    pub scales: Vec<f64>,
    /// Per-scale matching options.
    pub ncc: MatchOptions,
    /// Stop scheduling new scales once any score reaches this. Zero disables.
    pub stop_on_score: f64,
    pub min_scale: f64,
    pub max_scale: f64,
    pub scale_step: f64,
}

impl Default for MultiScaleOptions {
    fn default() -> Self {
        Self {
            scales: Vec::new(),
            ncc: MatchOptions {
                threshold: 0.80,
                stride: 4,
                refine: true,
                return_best_even: true,
                debug_timing: false,
            },
            stop_on_score: 0.95,
            min_scale: 0.60,
            max_scale: 1.40,
            scale_step: 0.05,
        }
    }
}

impl MultiScaleOptions {
    /// The factors a search will try, in order.
    ///
    /// Generated ranges are inclusive of `max_scale` and capped at
    /// `MAX_GENERATED_SCALES`. An invalid range yields no factors.
    pub fn scale_factors(&self) -> Vec<f64> {
        if !self.scales.is_empty() {
            return self.scales.clone();
        }
        let (min, max, step) = (self.min_scale, self.max_scale, self.scale_step);
        if !(min > 0.0 && max > 0.0 && step > 0.0 && max >= min) {
            return Vec::new();
        }
        let steps = 1 + ((max - min) / step + 0.5) as usize;
        (0..steps.min(MAX_GENERATED_SCALES))
            .map(|i| min + i as f64 * step)
            .take_while(|&s| s <= max + 1e-9)
            .collect()
    }
}

/// Multi-scale matcher for one template. Owns the scaled-template cache and the
/// worker pool, so repeated searches reuse both.
pub struct MultiScaleMatcher {
    cache: Option<ScaledTemplateCache>,
    pool: rayon::ThreadPool,
}

impl MultiScaleMatcher {
    /// A matcher whose pool has one worker per logical CPU.
    pub fn new(template: &TemplateView) -> Result<Self, VisionError> {
        Self::with_workers(template, num_cpus::get())
    }

    pub fn with_workers(template: &TemplateView, workers: usize) -> Result<Self, VisionError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("lure-match-{i}"))
            .build()?;
        let cache = template.precompute().map(ScaledTemplateCache::new);
        if cache.is_none() {
            tracing::warn!(
                width = template.width(),
                height = template.height(),
                "template has no unmasked pixels; every search will come back empty"
            );
        }
        Ok(Self { cache, pool })
    }

    /// Number of template sizes built so far.
    pub fn cached_sizes(&self) -> usize {
        self.cache.as_ref().map_or(0, ScaledTemplateCache::len)
    }

    /// Best match across the configured scales.
    pub fn match_frame(&self, frame: &FrameView<'_>, opts: &MultiScaleOptions) -> MatchResult {
        let Some(cache) = &self.cache else {
            return MatchResult::not_found(opts.ncc.normalized().threshold);
        };
        let start = Instant::now();
        let integral = IntegralImage::build(frame);
        let mut result = self.pool.install(|| search(cache, &integral, opts));
        if opts.ncc.debug_timing {
            result.duration = Some(start.elapsed());
        }
        result
    }
}

/// One-off multi-scale match on rayon's global pool. Prefer `MultiScaleMatcher`
/// when the same template is searched repeatedly.
pub fn match_multi_scale(frame: &FrameView<'_>, template: &TemplateView, opts: &MultiScaleOptions) -> MatchResult {
    let Some(base) = template.precompute() else {
        return MatchResult::not_found(opts.ncc.normalized().threshold);
    };
    let start = Instant::now();
    let cache = ScaledTemplateCache::new(base);
    let integral = IntegralImage::build(frame);
    let mut result = search(&cache, &integral, opts);
    if opts.ncc.debug_timing {
        result.duration = Some(start.elapsed());
    }
    result
}

fn search(cache: &ScaledTemplateCache, integral: &IntegralImage, opts: &MultiScaleOptions) -> MatchResult {
    let ncc = opts.ncc.normalized();
    let factors = opts.scale_factors();
    let stop_on = opts.stop_on_score;
    let stop = AtomicBool::new(false);
    let evaluated = AtomicUsize::new(0);

    let best = factors
        .par_iter()
        .filter(|&&factor| factor > 0.0)
        .filter_map(|&factor| {
            if stop.load(Ordering::Acquire) {
                return None;
            }
            // Size check before resampling: an oversized factor must never allocate.
            let (w, h) = cache.base().scaled_dims(factor)?;
            if w as usize > integral.width() || h as usize > integral.height() {
                return None;
            }
            let template = cache.get_or_build(factor)?;
            let mut result = match_precomputed(integral, &template, &ncc);
            if result.scales_evaluated == 0 {
                return None;
            }
            result.scale = factor;
            evaluated.fetch_add(1, Ordering::Relaxed);
            if let Some(elapsed) = result.duration {
                debug!(factor, score = result.score, elapsed_us = elapsed.as_micros() as u64, "scale scored");
            }
            if stop_on > 0.0 && result.score >= stop_on {
                stop.store(true, Ordering::Release);
            }
            Some(result)
        })
        .reduce_with(|best, next| if next.score > best.score { next } else { best });

    let mut result = best.unwrap_or_else(|| MatchResult::not_found(ncc.threshold));
    result.scales_evaluated = evaluated.load(Ordering::Relaxed);
    result.duration = None;
    result
}
