// THEORY:
// The `DetectionPipeline` is the top-level API for frame-driven operation. It sits
// between an external frame source and the controller and decides, per frame,
// what (if anything) the frame is used for:
//
// - **Searching**: run the multi-scale matcher and report the target's centre.
// - **Monitoring**: crop the ROI around the stored target and queue it for the
//   bite detector.
// - **Anything else**: ignore the frame.
//
// Key architectural principles:
// 1.  **Borrow, never retain**: The pipeline only reads the frame during the call.
//     An ROI that has to cross into the controller task is copied out first.
// 2.  **Bounded search rate**: Searching is the expensive path. It runs at most
//     once per `search_interval` and never twice on the same frame sequence.
// 3.  **Sequenced frames only**: Frames with sequence number 0 are treated as
//     "unnumbered" and skipped, since they cannot be deduplicated.

use crate::config::Config;
use crate::controller::{ControllerHandle, FishingState};
use crate::core_modules::frame::{FrameView, Rect};
use crate::core_modules::multi_scale::{MultiScaleMatcher, MultiScaleOptions};
use crate::core_modules::ncc::MatchResult;
use crate::core_modules::template::TemplateView;
use crate::error::{ControllerError, VisionError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Minimum spacing between two searches.
pub const SEARCH_INTERVAL: Duration = Duration::from_millis(65);

/// What the pipeline did with a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// The controller is in a state that does not consume frames, or the frame
    /// has no sequence number.
    Ignored,
    /// Already processed this sequence number, or searched too recently.
    Skipped,
    /// Searched; nothing reached the threshold.
    Searched(MatchResult),
    /// Searched and reported the target to the controller.
    Acquired(MatchResult),
    /// Cropped and queued an ROI covering `Rect`.
    Monitored(Rect),
}

pub struct DetectionPipeline {
    matcher: MultiScaleMatcher,
    options: MultiScaleOptions,
    controller: ControllerHandle,
    roi_size: u32,
    search_interval: Duration,
    last_search_at: Option<Instant>,
    last_search_seq: u64,
    last_monitor_seq: u64,
}

impl DetectionPipeline {
    pub fn new(config: &Config, template: &TemplateView, controller: ControllerHandle) -> Result<Self, VisionError> {
        let config = config.clone().validate();
        Ok(Self {
            matcher: MultiScaleMatcher::new(template)?,
            options: config.multi_scale_options(),
            controller,
            roi_size: config.roi_size_px,
            search_interval: SEARCH_INTERVAL,
            last_search_at: None,
            last_search_seq: 0,
            last_monitor_seq: 0,
        })
    }

    pub fn with_search_interval(mut self, interval: Duration) -> Self {
        self.search_interval = interval;
        self
    }

    /// Routes one captured frame according to the controller's current state.
    /// A frame stamped by its producer is timed by that stamp instead of `now`.
    pub fn process_frame(&mut self, frame: &FrameView<'_>, now: Instant) -> Result<FrameOutcome, ControllerError> {
        if frame.sequence() == 0 {
            return Ok(FrameOutcome::Ignored);
        }
        let now = frame.timestamp().unwrap_or(now);
        match self.controller.current() {
            FishingState::Searching => self.search(frame, now),
            FishingState::Monitoring => self.monitor(frame, now),
            _ => Ok(FrameOutcome::Ignored),
        }
    }

    fn search(&mut self, frame: &FrameView<'_>, now: Instant) -> Result<FrameOutcome, ControllerError> {
        if frame.sequence() == self.last_search_seq {
            return Ok(FrameOutcome::Skipped);
        }
        if self
            .last_search_at
            .is_some_and(|last| now.saturating_duration_since(last) < self.search_interval)
        {
            return Ok(FrameOutcome::Skipped);
        }
        self.last_search_seq = frame.sequence();
        self.last_search_at = Some(now);

        let result = self.matcher.match_frame(frame, &self.options);
        debug!(
            sequence = frame.sequence(),
            score = result.score,
            scale = result.scale,
            scales = result.scales_evaluated,
            "search finished"
        );
        if !result.found() {
            return Ok(FrameOutcome::Searched(result));
        }
        let (x, y) = result.center();
        self.controller.target_acquired_at(x, y)?;
        Ok(FrameOutcome::Acquired(result))
    }

    fn monitor(&mut self, frame: &FrameView<'_>, now: Instant) -> Result<FrameOutcome, ControllerError> {
        if frame.sequence() == self.last_monitor_seq {
            return Ok(FrameOutcome::Skipped);
        }
        let Some((x, y)) = self.controller.target_coordinates() else {
            return Ok(FrameOutcome::Ignored);
        };
        let Some((roi, rect)) = frame.extract_roi(x, y, self.roi_size) else {
            return Ok(FrameOutcome::Ignored);
        };
        self.last_monitor_seq = frame.sequence();
        self.controller.process_owned_frame(roi, now)?;
        Ok(FrameOutcome::Monitored(rect))
    }
}
