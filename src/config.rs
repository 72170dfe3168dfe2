// THEORY:
// `Config` is the externally owned snapshot the engine reads. The core never
// persists it; it only derives per-operation option structs from it. Out-of-range
// values are repaired by `validate`, never rejected, so a hand-edited or stale
// settings file cannot stop the engine from starting.

use crate::core_modules::bite_detector::BiteThresholds;
use crate::core_modules::multi_scale::MultiScaleOptions;
use crate::core_modules::ncc::MatchOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest scale factor `validate` lets through.
pub const MAX_SCALE_LIMIT: f64 = 8.0;

/// Which detector tuning to use while monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiteProfile {
    #[default]
    Sensitive,
    Conservative,
}

impl BiteProfile {
    pub fn thresholds(self) -> BiteThresholds {
        match self {
            BiteProfile::Sensitive => BiteThresholds::sensitive(),
            BiteProfile::Conservative => BiteThresholds::conservative(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- Matching ---
    pub min_scale: f64,
    pub max_scale: f64,
    pub scale_step: f64,
    /// Minimum NCC score for a match.
    pub threshold: f64,
    /// Coarse scan step in pixels.
    pub stride: u32,
    pub refine: bool,
    /// Stop trying further scales once a score reaches this.
    pub stop_on_score: f64,
    pub return_best_even: bool,
    pub debug_timing: bool,

    // --- Controller ---
    pub cooldown_seconds: u64,
    /// Monitoring ceiling. Zero disables it.
    pub max_monitoring_seconds: u64,
    pub search_timeout_seconds: u64,
    /// Side of the square ROI cropped around the target while monitoring.
    pub roi_size_px: u32,
    /// Key token pressed to cast, e.g. "F3" or "R".
    pub reel_key: String,
    pub bite_profile: BiteProfile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_scale: 0.60,
            max_scale: 1.40,
            scale_step: 0.05,
            threshold: 0.80,
            stride: 4,
            refine: true,
            stop_on_score: 0.95,
            return_best_even: true,
            debug_timing: false,
            cooldown_seconds: 1,
            max_monitoring_seconds: 25,
            search_timeout_seconds: 5,
            roi_size_px: 80,
            reel_key: "F3".to_string(),
            bite_profile: BiteProfile::Sensitive,
        }
    }
}

impl Config {
    /// Repairs out-of-range values with safe defaults.
    pub fn validate(mut self) -> Self {
        let defaults = Config::default();
        if !(self.min_scale > 0.0 && self.min_scale <= MAX_SCALE_LIMIT) {
            self.min_scale = defaults.min_scale;
        }
        if !(self.max_scale > 0.0) || self.max_scale < self.min_scale {
            self.max_scale = self.min_scale + 0.80;
        }
        self.max_scale = self.max_scale.min(MAX_SCALE_LIMIT);
        if !(self.scale_step > 0.0) {
            self.scale_step = defaults.scale_step;
        }
        let range = self.max_scale - self.min_scale;
        if range > 0.0 && self.scale_step > range {
            self.scale_step = range / 4.0;
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            self.threshold = defaults.threshold;
        }
        if self.stride == 0 {
            self.stride = defaults.stride;
        }
        if !(0.0..=1.0).contains(&self.stop_on_score) {
            self.stop_on_score = defaults.stop_on_score;
        }
        if self.roi_size_px == 0 {
            self.roi_size_px = defaults.roi_size_px;
        }
        if self.cooldown_seconds == 0 {
            self.cooldown_seconds = defaults.cooldown_seconds;
        }
        if self.search_timeout_seconds == 0 {
            self.search_timeout_seconds = defaults.search_timeout_seconds;
        }
        if self.reel_key.trim().is_empty() {
            self.reel_key = defaults.reel_key;
        }
        self
    }

    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            threshold: self.threshold,
            stride: self.stride,
            refine: self.refine,
            return_best_even: self.return_best_even,
            debug_timing: self.debug_timing,
        }
    }

    pub fn multi_scale_options(&self) -> MultiScaleOptions {
        MultiScaleOptions {
            scales: Vec::new(),
            ncc: self.match_options(),
            stop_on_score: self.stop_on_score,
            min_scale: self.min_scale,
            max_scale: self.max_scale,
            scale_step: self.scale_step,
        }
    }

    pub fn bite_thresholds(&self) -> BiteThresholds {
        self.bite_profile.thresholds()
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn max_monitoring(&self) -> Duration {
        Duration::from_secs(self.max_monitoring_seconds)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_validation() {
        assert_eq!(Config::default().validate(), Config::default());
    }

    #[test]
    fn out_of_range_values_are_repaired() {
        let cfg = Config {
            min_scale: -1.0,
            max_scale: 0.1,
            scale_step: 0.0,
            threshold: 1.5,
            stride: 0,
            stop_on_score: 2.0,
            roi_size_px: 0,
            cooldown_seconds: 0,
            search_timeout_seconds: 0,
            reel_key: "  ".into(),
            ..Config::default()
        }
        .validate();
        assert_eq!(cfg.min_scale, 0.60);
        assert!((cfg.max_scale - 1.40).abs() < 1e-12);
        assert_eq!(cfg.scale_step, 0.05);
        assert_eq!(cfg.threshold, 0.80);
        assert_eq!(cfg.stride, 4);
        assert_eq!(cfg.stop_on_score, 0.95);
        assert_eq!(cfg.roi_size_px, 80);
        assert_eq!(cfg.cooldown_seconds, 1);
        assert_eq!(cfg.search_timeout_seconds, 5);
        assert_eq!(cfg.reel_key, "F3");
    }

    #[test]
    fn scale_range_is_capped() {
        let cfg = Config {
            max_scale: 1.0e7,
            ..Config::default()
        }
        .validate();
        assert_eq!(cfg.max_scale, MAX_SCALE_LIMIT);
        assert_eq!(cfg.min_scale, 0.60);

        let cfg = Config {
            min_scale: 50.0,
            max_scale: 60.0,
            ..Config::default()
        }
        .validate();
        assert_eq!(cfg.min_scale, 0.60);
        assert_eq!(cfg.max_scale, MAX_SCALE_LIMIT);
    }

    #[test]
    fn oversized_step_is_shrunk_to_the_range() {
        let cfg = Config {
            min_scale: 0.9,
            max_scale: 1.1,
            scale_step: 0.5,
            ..Config::default()
        }
        .validate();
        assert!((cfg.scale_step - 0.05).abs() < 1e-12);
        assert_eq!(cfg.multi_scale_options().scale_factors().len(), 5);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"threshold": 0.9, "bite_profile": "conservative"}"#).unwrap();
        assert_eq!(cfg.threshold, 0.9);
        assert_eq!(cfg.bite_profile, BiteProfile::Conservative);
        assert_eq!(cfg.roi_size_px, 80);
        assert_eq!(cfg.bite_thresholds(), BiteThresholds::conservative());
    }
}
