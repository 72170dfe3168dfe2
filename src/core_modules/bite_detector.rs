// THEORY:
// The `bite_detector` module watches a small region of interest and fires exactly
// once when that region changes suddenly. It is the temporal half of the system:
// the matcher finds *where* to look, the detector decides *when* something happened.
//
// Key architectural principles:
// 1.  **Three signals per frame**: For every frame after the first we measure the
//     mean absolute change versus the previous frame (`dt`), the fraction of pixels
//     that moved by more than a fixed per-pixel threshold (`ratio_changed`), and the
//     mean absolute departure from a slow exponential baseline (`diff_base_mean`).
// 2.  **Learned normal, frozen during an event**: A short rolling window of `dt`
//     values gives a mean and standard deviation for "normal" flicker. While a
//     candidate run is in progress the window is not updated, so the event cannot
//     inflate the statistics it is being measured against.
// 3.  **Three ways to be a candidate**: a statistical spike (z-score on `dt`), a
//     baseline jump (large departure from the slow average), or a big immediate change
//     during cold start when the window is still too short for statistics.
// 4.  **One shot per session**: Once triggered, the detector ignores input until
//     `reset()`. A new session starts the monitoring clock used by
//     `target_lost_heuristic()`.
// 5.  **Single owner**: A detector is driven by exactly one caller. It is `Send` so it
//     can live inside the controller task, but it is never shared.

use crate::core_modules::frame::FrameView;
use crate::core_modules::pixel::pixel::{CHANNELS, Pixel};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// The capability the controller needs from a change detector.
pub trait BiteDetector: Send {
    /// Processes one ROI frame. Returns `true` exactly once per session, on the
    /// frame that triggers.
    fn feed_frame(&mut self, frame: &FrameView<'_>, timestamp: Instant) -> bool;

    /// `true` once the current session has run longer than the monitoring ceiling.
    fn target_lost_heuristic(&self) -> bool;

    /// Starts a new session.
    fn reset(&mut self);
}

/// Tunable constants for `ChangeDetector`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BiteThresholds {
    /// Capacity of the rolling `dt` window.
    pub window_size: usize,
    /// Window samples needed before the z-score test applies.
    pub min_frames_for_stats: usize,
    /// Per-pixel absolute difference that counts a pixel as changed.
    pub pixel_diff_threshold: u8,
    /// `ratio_changed` needed alongside a z-score spike.
    pub ratio_threshold_spike: f64,
    /// `ratio_changed` needed alongside a baseline jump.
    pub ratio_threshold_base: f64,
    /// `diff_base_mean` that counts as a baseline jump.
    pub baseline_diff_threshold: f64,
    /// z-score multiplier for the spike test.
    pub std_dev_multiplier: f64,
    /// Cold-start shortcut: `ratio_changed` needed.
    pub big_immediate_ratio: f64,
    /// Cold-start shortcut: `dt` needed.
    pub big_immediate_diff: f64,
    /// Baseline adaptation rate.
    pub ema_alpha: f32,
    /// Consecutive candidate frames needed to trigger.
    pub debounce_frames: u32,
}

impl BiteThresholds {
    /// The default tuning. Reacts to a quarter of the ROI changing on a single frame.
    pub fn sensitive() -> Self {
        Self {
            window_size: 20,
            min_frames_for_stats: 5,
            pixel_diff_threshold: 10,
            ratio_threshold_spike: 0.18,
            ratio_threshold_base: 0.12,
            baseline_diff_threshold: 14.0,
            std_dev_multiplier: 2.0,
            big_immediate_ratio: 0.20,
            big_immediate_diff: 12.0,
            ema_alpha: 0.03,
            debounce_frames: 1,
        }
    }

    /// Stricter ratios and z-score, a longer window and a slower baseline. Suited
    /// to busy scenes where the sensitive tuning fires on ambient motion.
    pub fn conservative() -> Self {
        Self {
            window_size: 30,
            min_frames_for_stats: 8,
            pixel_diff_threshold: 14,
            ratio_threshold_spike: 0.22,
            ratio_threshold_base: 0.15,
            baseline_diff_threshold: 14.0,
            std_dev_multiplier: 3.0,
            big_immediate_ratio: 0.22,
            big_immediate_diff: 14.0,
            ema_alpha: 0.02,
            debounce_frames: 1,
        }
    }
}

impl Default for BiteThresholds {
    fn default() -> Self {
        Self::sensitive()
    }
}

/// Per-session diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectorStats {
    /// Frames that produced signals (every frame but the seed frame).
    pub frames_scored: u64,
    pub min_dt: f64,
    pub max_dt: f64,
    pub min_ratio_changed: f64,
    pub max_ratio_changed: f64,
    pub min_diff_base_mean: f64,
    pub max_diff_base_mean: f64,
    pub last_dt: f64,
    pub last_ratio_changed: f64,
    pub last_diff_base_mean: f64,
    /// Which candidate tests the last scored frame passed.
    pub last_spike: bool,
    pub last_base_jump: bool,
    pub last_big_immediate: bool,
    pub candidate_runs_started: u32,
    pub candidate_runs_aborted: u32,
    pub longest_candidate_run: u32,
}

impl DetectorStats {
    fn record(&mut self, signals: &Signals) {
        if self.frames_scored == 0 {
            self.min_dt = signals.dt;
            self.max_dt = signals.dt;
            self.min_ratio_changed = signals.ratio_changed;
            self.max_ratio_changed = signals.ratio_changed;
            self.min_diff_base_mean = signals.diff_base_mean;
            self.max_diff_base_mean = signals.diff_base_mean;
        } else {
            self.min_dt = self.min_dt.min(signals.dt);
            self.max_dt = self.max_dt.max(signals.dt);
            self.min_ratio_changed = self.min_ratio_changed.min(signals.ratio_changed);
            self.max_ratio_changed = self.max_ratio_changed.max(signals.ratio_changed);
            self.min_diff_base_mean = self.min_diff_base_mean.min(signals.diff_base_mean);
            self.max_diff_base_mean = self.max_diff_base_mean.max(signals.diff_base_mean);
        }
        self.frames_scored += 1;
        self.last_dt = signals.dt;
        self.last_ratio_changed = signals.ratio_changed;
        self.last_diff_base_mean = signals.diff_base_mean;
    }
}

struct Signals {
    dt: f64,
    ratio_changed: f64,
    diff_base_mean: f64,
}

/// Fixed-capacity window of `dt` samples with running sums.
#[derive(Debug, Clone)]
struct DeltaWindow {
    values: VecDeque<f64>,
    capacity: usize,
    sum: f64,
    sum_sq: f64,
}

impl DeltaWindow {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }
        self.values.push_back(value);
        self.sum += value;
        self.sum_sq += value * value;
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn clear(&mut self) {
        self.values.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
    }

    fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.sum / self.values.len() as f64
    }

    /// Sample standard deviation (n - 1).
    fn std_dev(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        let n = n as f64;
        let variance = (self.sum_sq - self.sum * self.sum / n) / (n - 1.0);
        variance.max(0.0).sqrt()
    }
}

/// The production change detector.
pub struct ChangeDetector {
    thresholds: BiteThresholds,
    /// Zero disables the monitoring ceiling.
    max_monitoring: Duration,

    // --- Session ---
    monitoring_started: Option<Instant>,
    triggered: bool,

    // --- Pixel memory ---
    width: u32,
    height: u32,
    current: Vec<u8>,
    previous: Vec<u8>,
    /// Slow exponential average of luma, kept fractional so slow drift accumulates.
    baseline: Vec<f32>,
    seeded: bool,

    // --- Temporal statistics ---
    window: DeltaWindow,
    candidate_frames: u32,
    stats_frozen: bool,

    stats: DetectorStats,
}

impl ChangeDetector {
    pub fn new(thresholds: BiteThresholds, max_monitoring: Duration) -> Self {
        Self {
            window: DeltaWindow::new(thresholds.window_size),
            thresholds,
            max_monitoring,
            monitoring_started: None,
            triggered: false,
            width: 0,
            height: 0,
            current: Vec::new(),
            previous: Vec::new(),
            baseline: Vec::new(),
            seeded: false,
            candidate_frames: 0,
            stats_frozen: false,
            stats: DetectorStats::default(),
        }
    }

    pub fn stats(&self) -> &DetectorStats {
        &self.stats
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    fn load_luma(&mut self, frame: &FrameView<'_>) {
        self.current.clear();
        for y in 0..frame.height() {
            let row = frame.row(y);
            self.current.extend(
                row.chunks_exact(CHANNELS)
                    .filter_map(Pixel::from_rgba)
                    .map(|px| px.luma8()),
            );
        }
    }

    fn seed(&mut self) {
        self.previous.clone_from(&self.current);
        self.baseline.clear();
        self.baseline.extend(self.current.iter().map(|&v| v as f32));
        self.window.clear();
        self.candidate_frames = 0;
        self.stats_frozen = false;
        self.seeded = true;
    }

    fn measure(&self) -> Signals {
        let threshold = self.thresholds.pixel_diff_threshold;
        let mut sum_prev = 0u64;
        let mut changed = 0usize;
        let mut sum_base = 0.0f64;
        for ((&cur, &prev), &base) in self.current.iter().zip(&self.previous).zip(&self.baseline) {
            let diff = cur.abs_diff(prev);
            sum_prev += diff as u64;
            if diff > threshold {
                changed += 1;
            }
            sum_base += (cur as f32 - base).abs() as f64;
        }
        let n = self.current.len() as f64;
        Signals {
            dt: sum_prev as f64 / n,
            ratio_changed: changed as f64 / n,
            diff_base_mean: sum_base / n,
        }
    }

    fn update_baseline(&mut self) {
        let alpha = self.thresholds.ema_alpha;
        for (base, &cur) in self.baseline.iter_mut().zip(&self.current) {
            *base += alpha * (cur as f32 - *base);
        }
    }
}

impl BiteDetector for ChangeDetector {
    fn feed_frame(&mut self, frame: &FrameView<'_>, _timestamp: Instant) -> bool {
        if self.triggered || frame.is_empty() {
            return false;
        }
        self.load_luma(frame);

        if !self.seeded || frame.width() != self.width || frame.height() != self.height {
            if self.seeded {
                warn!(
                    from_w = self.width,
                    from_h = self.height,
                    to_w = frame.width(),
                    to_h = frame.height(),
                    "ROI size changed mid-session; re-seeding"
                );
            }
            self.width = frame.width();
            self.height = frame.height();
            self.seed();
            return false;
        }

        let t = &self.thresholds;
        let signals = self.measure();
        let mean = self.window.mean();
        let std_dev = self.window.std_dev();
        let warm = self.window.len() >= t.min_frames_for_stats;

        let spike = warm
            && signals.dt > mean + t.std_dev_multiplier * std_dev
            && signals.ratio_changed > t.ratio_threshold_spike;
        let base_jump =
            signals.diff_base_mean > t.baseline_diff_threshold && signals.ratio_changed > t.ratio_threshold_base;
        let big_immediate =
            !warm && signals.ratio_changed > t.big_immediate_ratio && signals.dt > t.big_immediate_diff;
        let candidate = spike || base_jump || big_immediate;

        self.stats.record(&signals);
        self.stats.last_spike = spike;
        self.stats.last_base_jump = base_jump;
        self.stats.last_big_immediate = big_immediate;

        if candidate {
            if self.candidate_frames == 0 {
                self.stats.candidate_runs_started += 1;
                self.stats_frozen = true;
                debug!(dt = signals.dt, ratio = signals.ratio_changed, spike, base_jump, big_immediate, "candidate run started");
            }
            self.candidate_frames += 1;
            self.stats.longest_candidate_run = self.stats.longest_candidate_run.max(self.candidate_frames);

            if self.candidate_frames >= t.debounce_frames || (big_immediate && self.candidate_frames == 1) {
                self.triggered = true;
                info!(
                    dt = signals.dt,
                    mean_dt = mean,
                    std_dt = std_dev,
                    changed_ratio = signals.ratio_changed,
                    diff_base_mean = signals.diff_base_mean,
                    frames_in_candidate = self.candidate_frames,
                    "bite detected"
                );
                return true;
            }
        } else {
            if self.candidate_frames > 0 {
                self.stats.candidate_runs_aborted += 1;
                debug!(run = self.candidate_frames, "candidate run cleared");
            }
            self.candidate_frames = 0;
            self.stats_frozen = false;
        }

        if !self.stats_frozen {
            self.window.push(signals.dt);
        }
        self.update_baseline();
        std::mem::swap(&mut self.previous, &mut self.current);
        false
    }

    fn target_lost_heuristic(&self) -> bool {
        if self.max_monitoring.is_zero() {
            return false;
        }
        let Some(started) = self.monitoring_started else {
            return false;
        };
        if started.elapsed() >= self.max_monitoring {
            info!(limit_secs = self.max_monitoring.as_secs(), "monitoring ceiling reached; target considered lost");
            return true;
        }
        false
    }

    fn reset(&mut self) {
        self.monitoring_started = Some(Instant::now());
        self.triggered = false;
        self.width = 0;
        self.height = 0;
        self.current.clear();
        self.previous.clear();
        self.baseline.clear();
        self.seeded = false;
        self.window = DeltaWindow::new(self.thresholds.window_size);
        self.candidate_frames = 0;
        self.stats_frozen = false;
        self.stats = DetectorStats::default();
    }
}
