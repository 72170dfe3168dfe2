use lure_vision::{
    ActuationError, Actuator, BiteDetector, Config, Controller, ControllerError, ControllerHandle, DetectorFactory,
    FishingState, FrameView, KeyCode, OwnedFrame, Pixel, change_detector_factory,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use FishingState::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Move(i32, i32),
    Click,
    Key(KeyCode),
}

struct Recorder(mpsc::UnboundedSender<Action>);

impl Actuator for Recorder {
    fn move_cursor(&self, x: i32, y: i32) -> Result<(), ActuationError> {
        let _ = self.0.send(Action::Move(x, y));
        Ok(())
    }

    fn click_right(&self) -> Result<(), ActuationError> {
        let _ = self.0.send(Action::Click);
        Ok(())
    }

    fn press_key(&self, key: KeyCode) -> Result<(), ActuationError> {
        let _ = self.0.send(Action::Key(key));
        Ok(())
    }
}

/// Fires on the `fire_on`-th frame of each session.
struct Scripted {
    fire_on: usize,
    seen: usize,
    resets: Arc<AtomicUsize>,
}

impl BiteDetector for Scripted {
    fn feed_frame(&mut self, _frame: &FrameView<'_>, _timestamp: Instant) -> bool {
        self.seen += 1;
        self.seen == self.fire_on
    }

    fn target_lost_heuristic(&self) -> bool {
        false
    }

    fn reset(&mut self) {
        self.seen = 0;
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

fn scripted(fire_on: usize, resets: Arc<AtomicUsize>) -> DetectorFactory {
    Box::new(move || {
        Box::new(Scripted {
            fire_on,
            seen: 0,
            resets: Arc::clone(&resets),
        }) as Box<dyn BiteDetector>
    })
}

type Transitions = Arc<Mutex<Vec<(FishingState, FishingState)>>>;

struct Harness {
    handle: ControllerHandle,
    actions: mpsc::UnboundedReceiver<Action>,
    transitions: Transitions,
}

impl Harness {
    async fn start(config: Config, detectors: Option<DetectorFactory>) -> Self {
        let (tx, actions) = mpsc::unbounded_channel();
        let detectors = detectors.unwrap_or_else(|| change_detector_factory(&config));
        let handle = Controller::spawn(&config, Arc::new(Recorder(tx)), detectors);
        let transitions: Transitions = Arc::default();
        let sink = Arc::clone(&transitions);
        handle.add_listener(move |from, to| sink.lock().push((from, to))).unwrap();
        handle.sync().await.unwrap();
        Self {
            handle,
            actions,
            transitions,
        }
    }

    async fn searching(config: Config, detectors: Option<DetectorFactory>) -> Self {
        let harness = Self::start(config, detectors).await;
        harness.handle.await_focus().unwrap();
        harness.handle.focus_acquired().unwrap();
        harness.handle.sync().await.unwrap();
        assert_eq!(harness.handle.current(), Searching);
        harness
    }

    async fn next_action(&mut self) -> Action {
        self.actions.recv().await.unwrap()
    }

    fn transitions(&self) -> Vec<(FishingState, FishingState)> {
        self.transitions.lock().clone()
    }
}

fn roi(level: u8) -> OwnedFrame {
    OwnedFrame::filled(40, 40, Pixel::gray(level))
}

#[tokio::test(start_paused = true)]
async fn full_cycle_follows_the_transition_table() {
    let mut h = Harness::searching(Config::default(), None).await;

    h.handle.target_acquired_at(120, 64).unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), Monitoring);
    assert_eq!(h.handle.target_coordinates(), Some((120, 64)));
    assert_eq!(h.next_action().await, Action::Move(120, 64));

    h.handle.fish_bite().unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), Cooldown);
    assert_eq!(h.next_action().await, Action::Move(120, 64));
    assert_eq!(h.next_action().await, Action::Click);

    // Cooldown lasts `cooldown_seconds` plus the reel margin, measured from the bite.
    let bite = Instant::now();
    h.handle.tick(bite).unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), Cooldown);

    h.handle.tick(bite + Duration::from_secs(3)).unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), Searching);
    assert_eq!(h.next_action().await, Action::Key(KeyCode::F3));

    assert_eq!(
        h.transitions(),
        vec![
            (Halt, WaitingFocus),
            (WaitingFocus, Searching),
            (Searching, Monitoring),
            (Monitoring, Cooldown),
            (Cooldown, Searching),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn events_that_do_not_apply_are_ignored() {
    let h = Harness::start(Config::default(), None).await;

    h.handle.focus_acquired().unwrap();
    h.handle.target_acquired_at(5, 5).unwrap();
    h.handle.target_lost().unwrap();
    h.handle.fish_bite().unwrap();
    h.handle.tick(Instant::now() + Duration::from_secs(60)).unwrap();
    h.handle.sync().await.unwrap();

    assert_eq!(h.handle.current(), Halt);
    assert_eq!(h.handle.target_coordinates(), None);
    assert!(h.transitions().is_empty());

    h.handle.await_focus().unwrap();
    h.handle.await_focus().unwrap();
    h.handle.fish_bite().unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), WaitingFocus);
    assert_eq!(h.transitions(), vec![(Halt, WaitingFocus)]);
}

#[derive(Debug, Clone, Copy)]
enum Poke {
    AwaitFocus,
    FocusAcquired,
    Acquire,
    Lost,
    Bite,
    Frame,
}

fn poke(handle: &ControllerHandle, poke: Poke) {
    let sent = match poke {
        Poke::AwaitFocus => handle.await_focus(),
        Poke::FocusAcquired => handle.focus_acquired(),
        Poke::Acquire => handle.target_acquired_at(999, 999),
        Poke::Lost => handle.target_lost(),
        Poke::Bite => handle.fish_bite(),
        Poke::Frame => handle.process_owned_frame(roi(80), Instant::now()),
    };
    sent.unwrap();
}

async fn drive_to(h: &Harness, state: FishingState) {
    let steps: &[Poke] = match state {
        Halt => &[],
        WaitingFocus => &[Poke::AwaitFocus],
        Searching => &[Poke::AwaitFocus, Poke::FocusAcquired],
        Monitoring => &[Poke::AwaitFocus, Poke::FocusAcquired, Poke::Acquire],
        Cooldown => &[Poke::AwaitFocus, Poke::FocusAcquired, Poke::Acquire, Poke::Bite],
        other => panic!("{other} is not a resting state"),
    };
    for &step in steps {
        match step {
            Poke::Acquire => h.handle.target_acquired_at(10, 20).unwrap(),
            other => poke(&h.handle, other),
        }
    }
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), state);
}

#[tokio::test(start_paused = true)]
async fn every_unlisted_state_event_pair_is_a_no_op() {
    use Poke::*;
    let table: [(FishingState, &[Poke]); 5] = [
        (Halt, &[FocusAcquired, Acquire, Lost, Bite, Frame]),
        (WaitingFocus, &[AwaitFocus, Acquire, Lost, Bite, Frame]),
        (Searching, &[AwaitFocus, FocusAcquired, Lost, Bite, Frame]),
        (Monitoring, &[AwaitFocus, FocusAcquired, Acquire]),
        (Cooldown, &[AwaitFocus, FocusAcquired, Acquire, Lost, Bite, Frame]),
    ];
    for (state, pokes) in table {
        let h = Harness::start(Config::default(), None).await;
        drive_to(&h, state).await;
        let target = h.handle.target_coordinates();
        let seen = h.transitions().len();
        for &p in pokes {
            poke(&h.handle, p);
            h.handle.sync().await.unwrap();
            assert_eq!(h.handle.current(), state, "{p:?} in {state}");
            assert_eq!(h.handle.target_coordinates(), target, "{p:?} in {state}");
        }
        assert_eq!(h.transitions().len(), seen);
    }
}

#[tokio::test(start_paused = true)]
async fn listeners_run_in_registration_order() {
    let h = Harness::start(Config::default(), None).await;
    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second"] {
        let order = Arc::clone(&order);
        h.handle.add_listener(move |_, to| order.lock().push((name, to))).unwrap();
    }
    h.handle.await_focus().unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(*order.lock(), vec![("first", WaitingFocus), ("second", WaitingFocus)]);
}

#[tokio::test(start_paused = true)]
async fn search_timeout_recasts_without_notifying() {
    let before = Instant::now();
    let mut h = Harness::searching(Config::default(), None).await;
    let seen = h.transitions().len();

    h.handle.tick(before + Duration::from_secs(5)).unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), Searching);
    assert!(h.actions.try_recv().is_err());

    h.handle.tick(before + Duration::from_secs(6)).unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), Searching);
    assert_eq!(h.next_action().await, Action::Key(KeyCode::F3));
    assert_eq!(h.transitions().len(), seen, "Searching -> Searching is silent");
}

#[tokio::test(start_paused = true)]
async fn monitoring_frames_drive_the_reel() {
    let resets = Arc::new(AtomicUsize::new(0));
    let mut h = Harness::searching(Config::default(), Some(scripted(3, Arc::clone(&resets)))).await;

    h.handle.target_acquired_at(40, 30).unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(resets.load(Ordering::SeqCst), 1);
    assert_eq!(h.next_action().await, Action::Move(40, 30));

    let now = Instant::now();
    h.handle.process_owned_frame(roi(80), now).unwrap();
    h.handle.process_monitoring_frame(&roi(80).view(), now).unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), Monitoring);

    h.handle.process_owned_frame(roi(80), now).unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), Cooldown);
    assert_eq!(h.next_action().await, Action::Move(40, 30));
    assert_eq!(h.next_action().await, Action::Click);
}

#[tokio::test(start_paused = true)]
async fn change_detector_reels_on_a_real_splash() {
    let mut h = Harness::searching(Config::default(), None).await;
    h.handle.target_acquired_at(10, 10).unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.next_action().await, Action::Move(10, 10));

    for _ in 0..10 {
        h.handle.process_owned_frame(roi(80), Instant::now()).unwrap();
    }
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), Monitoring);

    let mut splash = roi(80);
    splash.fill_rect(10, 10, 30, 30, Pixel::gray(150));
    h.handle.process_owned_frame(splash, Instant::now()).unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), Cooldown);
}

#[tokio::test(start_paused = true)]
async fn monitoring_ceiling_recasts() {
    let config = Config {
        max_monitoring_seconds: 10,
        ..Config::default()
    };
    let mut h = Harness::searching(config, None).await;
    h.handle.target_acquired_at(1, 2).unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.next_action().await, Action::Move(1, 2));

    tokio::time::advance(Duration::from_secs(11)).await;
    h.handle.tick(Instant::now()).unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), Searching);
    assert_eq!(h.next_action().await, Action::Key(KeyCode::F3));
    assert_eq!(h.transitions().last(), Some(&(Monitoring, Searching)));
}

#[tokio::test(start_paused = true)]
async fn halt_clears_target_and_force_cast_restarts() {
    let mut h = Harness::searching(Config::default(), None).await;
    h.handle.target_acquired_at(7, 9).unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.next_action().await, Action::Move(7, 9));

    h.handle.halt().unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), Halt);
    assert_eq!(h.handle.target_coordinates(), None);

    h.handle.force_cast().unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), Searching);
    assert_eq!(h.next_action().await, Action::Key(KeyCode::F3));
    assert_eq!(h.transitions().last(), Some(&(Halt, Searching)));
}

#[tokio::test(start_paused = true)]
async fn target_lost_casts_again() {
    let config = Config {
        reel_key: "r".into(),
        ..Config::default()
    };
    let mut h = Harness::searching(config, None).await;
    h.handle.target_acquired_at(3, 3).unwrap();
    h.handle.target_lost().unwrap();
    h.handle.sync().await.unwrap();
    assert_eq!(h.handle.current(), Searching);

    // Aim and cast are independent jobs; either may land first.
    let actions = [h.next_action().await, h.next_action().await];
    assert!(actions.contains(&Action::Move(3, 3)));
    assert!(actions.contains(&Action::Key(KeyCode(b'R'))));
    assert_eq!(h.transitions().last(), Some(&(Monitoring, Searching)));
}

struct Exploding;

impl Actuator for Exploding {
    fn move_cursor(&self, _x: i32, _y: i32) -> Result<(), ActuationError> {
        panic!("no display");
    }

    fn click_right(&self) -> Result<(), ActuationError> {
        Err(ActuationError::Click("no display".into()))
    }

    fn press_key(&self, key: KeyCode) -> Result<(), ActuationError> {
        Err(ActuationError::KeyPress {
            code: key.code(),
            reason: "no display".into(),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn failing_actuator_does_not_stop_the_cycle() {
    let config = Config::default();
    let handle = Controller::spawn(&config, Arc::new(Exploding), change_detector_factory(&config));
    handle.await_focus().unwrap();
    handle.focus_acquired().unwrap();
    handle.target_acquired_at(50, 50).unwrap();
    handle.fish_bite().unwrap();
    handle.sync().await.unwrap();
    assert_eq!(handle.current(), Cooldown);

    // Let the reel job run (and fail) before checking the actor is still alive.
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.force_cast().unwrap();
    handle.sync().await.unwrap();
    assert_eq!(handle.current(), Searching);
}

#[tokio::test]
async fn overflowing_the_mailbox_reports_backpressure() {
    let config = Config::default();
    let (tx, _rx) = mpsc::unbounded_channel();
    let handle = Controller::spawn(&config, Arc::new(Recorder(tx)), change_detector_factory(&config));

    // The actor cannot run until this task yields, so the mailbox fills up.
    let now = Instant::now();
    let results: Vec<_> = (0..80).map(|_| handle.tick(now)).collect();
    assert!(results.iter().take(64).all(Result::is_ok));
    assert_eq!(results.last(), Some(&Err(ControllerError::MailboxFull)));

    handle.sync().await.unwrap();
    assert_eq!(handle.current(), Halt);
}

#[tokio::test]
async fn handle_reports_a_stopped_controller() {
    let config = Config::default();
    let (tx, _rx) = mpsc::unbounded_channel();
    let handle = Controller::spawn(&config, Arc::new(Recorder(tx)), change_detector_factory(&config));
    handle.shutdown().await.unwrap();
    tokio::task::yield_now().await;
    assert!(matches!(handle.sync().await, Err(ControllerError::Closed | ControllerError::ReplyDropped)));
}
