// THEORY:
// The `Controller` sequences the automation cycle: wait for focus, search for the
// target, monitor it for a bite, reel, cool down, cast again. It is an actor: one
// task owns every piece of state and processes one event at a time from a bounded
// mailbox. Callers hold a cheap, cloneable `ControllerHandle` and only ever enqueue.
//
// Key architectural principles:
// 1.  **No locks around state**: The state, target coordinates, deadlines and the
//     current bite detector all live inside the actor task. Transitions are
//     serialized by the mailbox, so no two of them can interleave.
// 2.  **Reads through a snapshot**: After each event the actor publishes the
//     current state and target coordinates on a `watch` channel. `current()` reads
//     that snapshot without a round trip through the mailbox.
// 3.  **Ephemeral states**: Reeling and Casting perform their side effect and
//     immediately resolve to Cooldown and Searching. Listeners see the resolved
//     state, and a transition that resolves back to where it started is silent.
// 4.  **Invalid events are no-ops**: An event that does not apply to the current
//     state is dropped without a transition.
// 5.  **The actor owns no clock**: Timeouts are evaluated when a `Tick` arrives.
//     Deadlines are stamped from tokio's clock when they are set.

use crate::actions::{self, Actuator};
use crate::config::Config;
use crate::core_modules::bite_detector::{BiteDetector, ChangeDetector};
use crate::core_modules::frame::{FrameView, OwnedFrame};
use crate::error::ControllerError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Mailbox capacity. Overflow means events are produced faster than real time.
pub const MAILBOX_CAPACITY: usize = 64;
/// Delay between moving the cursor and clicking when reeling.
pub const REEL_SETTLE: Duration = Duration::from_millis(300);
/// Extra cooldown that covers the reel sequence itself.
pub const REEL_MARGIN: Duration = Duration::from_millis(500);

/// The states of the automation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FishingState {
    Halt,
    WaitingFocus,
    Searching,
    Monitoring,
    /// Ephemeral; resolves to `Cooldown`.
    Reeling,
    Cooldown,
    /// Ephemeral; resolves to `Searching`.
    Casting,
}

impl fmt::Display for FishingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FishingState::Halt => "halt",
            FishingState::WaitingFocus => "focus",
            FishingState::Searching => "searching",
            FishingState::Monitoring => "monitoring",
            FishingState::Reeling => "reeling",
            FishingState::Cooldown => "cooldown",
            FishingState::Casting => "casting",
        };
        f.write_str(name)
    }
}

/// What `current()` and `target_coordinates()` read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub state: FishingState,
    pub target: Option<(i32, i32)>,
}

/// Called with `(previous, next)` on every state-changing transition.
pub type StateListener = Box<dyn FnMut(FishingState, FishingState) + Send>;

/// Builds a fresh detector each time monitoring starts.
pub type DetectorFactory = Box<dyn FnMut() -> Box<dyn BiteDetector> + Send>;

/// The production factory: a `ChangeDetector` tuned from `config`.
pub fn change_detector_factory(config: &Config) -> DetectorFactory {
    let thresholds = config.bite_thresholds();
    let ceiling = config.max_monitoring();
    Box::new(move || Box::new(ChangeDetector::new(thresholds, ceiling)) as Box<dyn BiteDetector>)
}

enum Event {
    AwaitFocus,
    FocusAcquired,
    TargetAcquiredAt { x: i32, y: i32 },
    TargetLost,
    FishBite,
    Halt,
    ForceCast,
    Tick(Instant),
    MonitoringFrame { roi: OwnedFrame, at: Instant },
    AddListener(StateListener),
    Sync(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable front door to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    events: mpsc::Sender<Event>,
    snapshot: watch::Receiver<ControllerSnapshot>,
}

impl ControllerHandle {
    fn send(&self, event: Event) -> Result<(), ControllerError> {
        match self.events.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::error!(capacity = MAILBOX_CAPACITY, "controller mailbox full; event dropped");
                Err(ControllerError::MailboxFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ControllerError::Closed),
        }
    }

    pub fn await_focus(&self) -> Result<(), ControllerError> {
        self.send(Event::AwaitFocus)
    }

    pub fn focus_acquired(&self) -> Result<(), ControllerError> {
        self.send(Event::FocusAcquired)
    }

    pub fn target_acquired_at(&self, x: i32, y: i32) -> Result<(), ControllerError> {
        self.send(Event::TargetAcquiredAt { x, y })
    }

    pub fn target_lost(&self) -> Result<(), ControllerError> {
        self.send(Event::TargetLost)
    }

    pub fn fish_bite(&self) -> Result<(), ControllerError> {
        self.send(Event::FishBite)
    }

    pub fn halt(&self) -> Result<(), ControllerError> {
        self.send(Event::Halt)
    }

    pub fn force_cast(&self) -> Result<(), ControllerError> {
        self.send(Event::ForceCast)
    }

    pub fn tick(&self, now: Instant) -> Result<(), ControllerError> {
        self.send(Event::Tick(now))
    }

    /// Copies `roi` and queues it for the bite detector. The caller keeps
    /// ownership of the borrowed frame.
    pub fn process_monitoring_frame(&self, roi: &FrameView<'_>, now: Instant) -> Result<(), ControllerError> {
        self.send(Event::MonitoringFrame {
            roi: roi.to_owned_frame(),
            at: now,
        })
    }

    /// Queues an already owned ROI without copying it again.
    pub fn process_owned_frame(&self, roi: OwnedFrame, now: Instant) -> Result<(), ControllerError> {
        self.send(Event::MonitoringFrame { roi, at: now })
    }

    pub fn add_listener<F>(&self, listener: F) -> Result<(), ControllerError>
    where
        F: FnMut(FishingState, FishingState) + Send + 'static,
    {
        self.send(Event::AddListener(Box::new(listener)))
    }

    /// State as of the last processed event.
    pub fn current(&self) -> FishingState {
        self.snapshot.borrow().state
    }

    pub fn target_coordinates(&self) -> Option<(i32, i32)> {
        self.snapshot.borrow().target
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        *self.snapshot.borrow()
    }

    /// Receiver that changes whenever the snapshot does.
    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.snapshot.clone()
    }

    /// Resolves once every event queued before this call has been processed.
    pub async fn sync(&self) -> Result<(), ControllerError> {
        let (reply, done) = oneshot::channel();
        self.events
            .send(Event::Sync(reply))
            .await
            .map_err(|_| ControllerError::Closed)?;
        done.await.map_err(|_| ControllerError::ReplyDropped)
    }

    /// Stops the actor after the events already queued.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        self.events.send(Event::Shutdown).await.map_err(|_| ControllerError::Closed)
    }
}

/// The actor. Constructed and driven only through `Controller::spawn`.
pub struct Controller {
    // --- Cycle state ---
    state: FishingState,
    target: Option<(i32, i32)>,
    cooldown_until: Option<Instant>,
    search_started: Instant,
    detector: Option<Box<dyn BiteDetector>>,

    // --- Collaborators ---
    detectors: DetectorFactory,
    actuator: Arc<dyn Actuator>,
    listeners: Vec<StateListener>,
    snapshot: watch::Sender<ControllerSnapshot>,

    // --- Settings ---
    cooldown: Duration,
    search_timeout: Duration,
    reel_key: String,
}

impl Controller {
    /// Starts the actor on the current tokio runtime, in `Halt`.
    pub fn spawn(config: &Config, actuator: Arc<dyn Actuator>, detectors: DetectorFactory) -> ControllerHandle {
        let config = config.clone().validate();
        let (events, inbox) = mpsc::channel(MAILBOX_CAPACITY);
        let initial = ControllerSnapshot {
            state: FishingState::Halt,
            target: None,
        };
        let (snapshot, snapshot_rx) = watch::channel(initial);

        let actor = Controller {
            state: FishingState::Halt,
            target: None,
            cooldown_until: None,
            search_started: Instant::now(),
            detector: None,
            detectors,
            actuator,
            listeners: Vec::new(),
            snapshot,
            cooldown: config.cooldown(),
            search_timeout: config.search_timeout(),
            reel_key: config.reel_key,
        };
        tokio::spawn(actor.run(inbox));

        ControllerHandle {
            events,
            snapshot: snapshot_rx,
        }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Event>) {
        while let Some(event) = inbox.recv().await {
            if !self.handle(event) {
                break;
            }
            self.publish();
        }
        debug!(state = %self.state, "controller stopped");
    }

    /// Applies one event. Returns `false` when the actor should stop.
    fn handle(&mut self, event: Event) -> bool {
        use FishingState::*;
        match event {
            Event::AwaitFocus if self.state == Halt => self.transition(WaitingFocus),
            Event::FocusAcquired if self.state == WaitingFocus => self.transition(Searching),
            Event::TargetAcquiredAt { x, y } if self.state == Searching => {
                self.target = Some((x, y));
                self.transition(Monitoring);
            }
            Event::TargetLost if self.state == Monitoring => self.transition(Casting),
            Event::FishBite if self.state == Monitoring => self.transition(Reeling),
            Event::Halt => {
                self.cooldown_until = None;
                self.target = None;
                if let Some(detector) = self.detector.as_mut() {
                    detector.reset();
                }
                self.transition(Halt);
            }
            Event::ForceCast => self.transition(Casting),
            Event::Tick(now) => self.on_tick(now),
            Event::MonitoringFrame { roi, at } if self.state == Monitoring => self.on_monitoring_frame(&roi, at),
            Event::AddListener(listener) => self.listeners.push(listener),
            Event::Sync(reply) => {
                let _ = reply.send(());
            }
            Event::Shutdown => return false,
            _ => {}
        }
        true
    }

    fn on_tick(&mut self, now: Instant) {
        match self.state {
            FishingState::Searching if now.saturating_duration_since(self.search_started) > self.search_timeout => {
                info!(timeout_secs = self.search_timeout.as_secs(), "no target found in time; recasting");
                self.transition(FishingState::Casting);
            }
            FishingState::Cooldown if self.cooldown_until.is_some_and(|deadline| now > deadline) => {
                self.transition(FishingState::Casting);
            }
            FishingState::Monitoring if self.detector.as_ref().is_some_and(|d| d.target_lost_heuristic()) => {
                self.transition(FishingState::Casting);
            }
            _ => {}
        }
    }

    fn on_monitoring_frame(&mut self, roi: &OwnedFrame, at: Instant) {
        let Some(detector) = self.detector.as_mut() else {
            return;
        };
        if detector.feed_frame(&roi.view(), at) {
            self.transition(FishingState::Reeling);
        } else if detector.target_lost_heuristic() {
            self.transition(FishingState::Casting);
        }
    }

    fn transition(&mut self, requested: FishingState) {
        let previous = self.state;
        if previous == requested {
            return;
        }
        let next = match requested {
            FishingState::Casting => {
                self.cast();
                FishingState::Searching
            }
            FishingState::Reeling => {
                self.reel();
                FishingState::Cooldown
            }
            FishingState::Monitoring => {
                self.begin_monitoring();
                FishingState::Monitoring
            }
            other => other,
        };

        if previous == FishingState::Monitoring && next != FishingState::Monitoring {
            self.detector = None;
        }
        if next != FishingState::Cooldown {
            self.cooldown_until = None;
        }
        self.state = next;
        if next == FishingState::Searching {
            self.search_started = Instant::now();
        }

        if previous != next {
            debug!(from = %previous, to = %next, "state transition");
            for listener in &mut self.listeners {
                listener(previous, next);
            }
        }
    }

    fn begin_monitoring(&mut self) {
        if let Some((x, y)) = self.target {
            info!(x, y, "target acquired");
            let actuator = Arc::clone(&self.actuator);
            actions::dispatch("aim", actions::run_blocking(actuator, move |a| a.move_cursor(x, y)));
        }
        let mut detector = (self.detectors)();
        detector.reset();
        self.detector = Some(detector);
    }

    fn reel(&mut self) {
        match self.target {
            Some((x, y)) => {
                let actuator = Arc::clone(&self.actuator);
                actions::dispatch("reel", async move {
                    actions::run_blocking(Arc::clone(&actuator), move |a| a.move_cursor(x, y)).await?;
                    tokio::time::sleep(REEL_SETTLE).await;
                    actions::run_blocking(actuator, |a| a.click_right()).await?;
                    info!(x, y, "reel action executed");
                    Ok(())
                });
            }
            None => warn!("reel skipped; no target coordinates"),
        }
        self.cooldown_until = Some(Instant::now() + self.cooldown + REEL_MARGIN);
    }

    fn cast(&mut self) {
        let key = self.actuator.parse_key_token(&self.reel_key);
        let actuator = Arc::clone(&self.actuator);
        actions::dispatch("cast", actions::run_blocking(actuator, move |a| a.press_key(key)));
        info!(key = %self.reel_key, code = %key, "cast action executed");
    }

    fn publish(&self) {
        let current = ControllerSnapshot {
            state: self.state,
            target: self.target,
        };
        self.snapshot.send_if_modified(|published| {
            if *published == current {
                return false;
            }
            *published = current;
            true
        });
    }
}
