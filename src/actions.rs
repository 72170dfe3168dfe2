// THEORY:
// The `actions` module is the boundary between the controller and the operating
// system. The controller never moves a cursor or presses a key itself; it hands a
// job to `dispatch` and moves on.
//
// Key architectural principles:
// 1.  **Injected capability**: OS primitives live behind the `Actuator` trait, so
//     the controller can be driven by a real input backend, a logger, or a test
//     recorder without changing a line.
// 2.  **Fire and forget**: Every actuation runs in its own task. Primitives are
//     assumed synchronous, so each call is moved onto tokio's blocking pool. A slow
//     primitive delays only its own job, never the controller's mailbox.
// 3.  **Failures stop at the boundary**: An `Err` or a panic inside a job is logged
//     by a watcher task and then dropped. No state is rolled back.

use crate::error::ActuationError;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error};

/// A Windows-style virtual-key code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCode(pub u8);

impl KeyCode {
    pub const F1: KeyCode = KeyCode(0x70);
    pub const F3: KeyCode = KeyCode(0x72);
    pub const F10: KeyCode = KeyCode(0x79);
    pub const F11: KeyCode = KeyCode(0x7A);
    pub const F12: KeyCode = KeyCode(0x7B);

    /// Parses `F1`..`F12` or a single letter `A`..`Z`, ignoring case and
    /// surrounding whitespace. Anything else is `F3`.
    pub fn parse(token: &str) -> KeyCode {
        let token = token.trim().to_ascii_uppercase();
        match token.as_bytes() {
            [b'F', d @ b'1'..=b'9'] => KeyCode(Self::F1.0 + (d - b'1')),
            b"F10" => Self::F10,
            b"F11" => Self::F11,
            b"F12" => Self::F12,
            [c @ b'A'..=b'Z'] => KeyCode(*c),
            _ => Self::F3,
        }
    }

    pub fn code(self) -> u8 {
        self.0
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// OS-level input primitives.
pub trait Actuator: Send + Sync + 'static {
    fn move_cursor(&self, x: i32, y: i32) -> Result<(), ActuationError>;

    fn click_right(&self) -> Result<(), ActuationError>;

    fn press_key(&self, key: KeyCode) -> Result<(), ActuationError>;

    fn parse_key_token(&self, token: &str) -> KeyCode {
        KeyCode::parse(token)
    }
}

/// Runs one primitive on the blocking pool. A panic inside the primitive is
/// re-raised in the calling task so the `dispatch` watcher sees it.
pub async fn run_blocking<F>(actuator: Arc<dyn Actuator>, call: F) -> Result<(), ActuationError>
where
    F: FnOnce(&dyn Actuator) -> Result<(), ActuationError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || call(actuator.as_ref())).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(ActuationError::Cancelled),
    }
}

/// Spawns `job` and a watcher that logs its outcome. Never blocks, never fails.
pub fn dispatch<F>(action: &'static str, job: F)
where
    F: Future<Output = Result<(), ActuationError>> + Send + 'static,
{
    let task = tokio::spawn(job);
    tokio::spawn(async move {
        match task.await {
            Ok(Ok(())) => debug!(action, "actuation finished"),
            Ok(Err(err)) => error!(action, error = %err, "actuation failed"),
            Err(err) if err.is_panic() => {
                let message = panic_message(err.into_panic());
                error!(action, panic = %message, "actuation panicked");
            }
            Err(_) => debug!(action, "actuation task cancelled"),
        }
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
