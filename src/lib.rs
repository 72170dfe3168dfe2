// THEORY:
// This file is the main entry point for the `lure_vision` library crate. It
// exposes three engines and the glue between them:
//
// 1.  **Matching** (`MultiScaleMatcher`, `match_template`): find a reference
//     pattern in a frame at an unknown scale.
// 2.  **Change detection** (`ChangeDetector`): fire once when a small region of
//     interest changes suddenly.
// 3.  **Automation** (`Controller`): a mailbox-driven state machine that turns
//     matches and detections into actuation requests on a fixed cadence.
//
// `DetectionPipeline` routes frames from an external source into the first two
// according to the controller's state. Frame capture, OS input and configuration
// storage are injected by the embedding application.

pub mod actions;
pub mod config;
pub mod controller;
pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use actions::{Actuator, KeyCode};
pub use config::{BiteProfile, Config};
pub use controller::{
    Controller, ControllerHandle, ControllerSnapshot, DetectorFactory, FishingState, change_detector_factory,
};
pub use core_modules::bite_detector::{BiteDetector, BiteThresholds, ChangeDetector, DetectorStats};
pub use core_modules::frame::{FrameView, OwnedFrame, Rect};
pub use core_modules::multi_scale::{MultiScaleMatcher, MultiScaleOptions, match_multi_scale};
pub use core_modules::ncc::{MatchOptions, MatchResult, match_template};
pub use core_modules::pixel::pixel::Pixel;
pub use core_modules::template::TemplateView;
pub use error::{ActuationError, ControllerError, VisionError};
pub use pipeline::{DetectionPipeline, FrameOutcome};
