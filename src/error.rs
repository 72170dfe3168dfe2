// THEORY:
// Errors in this crate are rare on purpose. Degenerate vision input (an empty
// template, a frame smaller than the template, a flat ROI) is a normal outcome
// that surfaces as "not found" or "no detection", never as an `Err`. What is
// left are construction problems and the controller's mailbox boundary.

use thiserror::Error;

/// Failures while building frame views or the matching worker pool.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("pixel buffer holds {actual} bytes, but {width}x{height} with stride {stride} needs {expected}")]
    BufferTooSmall {
        width: u32,
        height: u32,
        stride: usize,
        expected: usize,
        actual: usize,
    },

    #[error("row stride {stride} is smaller than width {width} * 4")]
    StrideTooSmall { width: u32, stride: usize },

    #[error("failed to build matching worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Failures at the controller's mailbox boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    /// The bounded mailbox is full. Events are produced faster than real time,
    /// which is a caller-side defect.
    #[error("controller mailbox is full")]
    MailboxFull,

    #[error("controller has shut down")]
    Closed,

    #[error("controller dropped the reply channel")]
    ReplyDropped,
}

/// Failure reported by an actuation primitive. Always swallowed and logged at
/// the dispatch boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActuationError {
    #[error("cursor move to ({x}, {y}) failed: {reason}")]
    MoveCursor { x: i32, y: i32, reason: String },

    #[error("right click failed: {0}")]
    Click(String),

    #[error("key press {code:#04x} failed: {reason}")]
    KeyPress { code: u8, reason: String },

    #[error("actuation was cancelled before it ran")]
    Cancelled,
}
