use lure_vision::{BiteDetector, BiteThresholds, ChangeDetector, OwnedFrame, Pixel};
use std::time::Duration;
use tokio::time::Instant;

const SIDE: u32 = 40;
const BASE: u8 = 80;

fn flat(level: u8) -> OwnedFrame {
    OwnedFrame::filled(SIDE, SIDE, Pixel::gray(level))
}

/// The flat ROI with a `size` x `size` square at (10, 10) painted `level`.
fn with_square(size: u32, level: u8) -> OwnedFrame {
    let mut frame = flat(BASE);
    frame.fill_rect(10, 10, 10 + size, 10 + size, Pixel::gray(level));
    frame
}

fn detector(thresholds: BiteThresholds) -> ChangeDetector {
    let mut detector = ChangeDetector::new(thresholds, Duration::from_secs(25));
    detector.reset();
    detector
}

/// Feeds `count` copies of `frame`, returning the 1-based index of the frame that fired.
fn feed(detector: &mut ChangeDetector, frame: &OwnedFrame, count: usize) -> Option<usize> {
    (1..=count).find(|_| detector.feed_frame(&frame.view(), Instant::now()))
}

#[test]
fn region_jump_triggers_under_both_profiles() {
    for (name, thresholds) in [
        ("sensitive", BiteThresholds::sensitive()),
        ("conservative", BiteThresholds::conservative()),
    ] {
        let mut detector = detector(thresholds);
        assert_eq!(feed(&mut detector, &flat(BASE), 11), None, "{name}: stable frames");
        let fired = feed(&mut detector, &with_square(20, 140), 3);
        assert!(matches!(fired, Some(1) | Some(2)), "{name}: fired at {fired:?}");
        assert!(detector.is_triggered());
    }
}

#[test]
fn jump_before_the_window_warms_fires_on_the_first_frame() {
    for (name, thresholds) in [
        ("sensitive", BiteThresholds::sensitive()),
        ("conservative", BiteThresholds::conservative()),
    ] {
        let mut detector = detector(thresholds);
        // One seed frame plus four window samples: short of either profile's minimum.
        assert_eq!(feed(&mut detector, &flat(BASE), 5), None, "{name}: stable frames");
        assert_eq!(feed(&mut detector, &with_square(20, 140), 2), Some(1), "{name}");
        assert!(detector.stats().last_big_immediate, "{name}: big-immediate path");
        assert!(detector.is_triggered());
    }
}

#[test]
fn sub_threshold_jitter_never_triggers() {
    let mut detector = detector(BiteThresholds::sensitive());
    for i in 0..60u32 {
        let frame = OwnedFrame::from_fn(SIDE, SIDE, |x, y| {
            let wobble = ((x * 7 + y * 3 + i * 5) % 7) as u8;
            Pixel::gray(BASE + wobble)
        });
        assert!(!detector.feed_frame(&frame.view(), Instant::now()), "frame {i}");
    }
    assert_eq!(detector.stats().candidate_runs_started, 0);
    assert!(detector.stats().max_dt < 7.0);
}

#[test]
fn slow_drift_never_triggers() {
    let mut detector = detector(BiteThresholds::sensitive());
    for i in 0..40u32 {
        let level = BASE + (i / 8) as u8;
        assert!(!detector.feed_frame(&flat(level).view(), Instant::now()), "frame {i}");
    }
    assert!(detector.stats().max_diff_base_mean < 14.0);
}

#[test]
fn fires_once_per_session_and_rearms_after_reset() {
    let mut detector = detector(BiteThresholds::sensitive());
    feed(&mut detector, &flat(BASE), 8);
    assert!(feed(&mut detector, &with_square(20, 140), 1).is_some());
    assert_eq!(feed(&mut detector, &flat(BASE), 5), None, "triggered detector stays quiet");

    detector.reset();
    assert!(!detector.is_triggered());
    assert_eq!(detector.stats().frames_scored, 0);
    feed(&mut detector, &flat(BASE), 8);
    assert!(feed(&mut detector, &with_square(20, 140), 2).is_some());
}

#[test]
fn profiles_disagree_on_a_marginal_splash() {
    // An 18x18 square covers 20.25% of the ROI: above the sensitive spike ratio,
    // below the conservative one, and too shallow for a baseline jump.
    let run = |thresholds| {
        let mut detector = detector(thresholds);
        feed(&mut detector, &flat(BASE), 11);
        feed(&mut detector, &with_square(18, 140), 4).is_some()
    };
    assert!(run(BiteThresholds::sensitive()));
    assert!(!run(BiteThresholds::conservative()));
}

#[test]
fn thresholds_round_trip_through_json() {
    let json = serde_json::to_string(&BiteThresholds::conservative()).unwrap();
    let back: BiteThresholds = serde_json::from_str(&json).unwrap();
    assert_eq!(back, BiteThresholds::conservative());
}

#[tokio::test(start_paused = true)]
async fn monitoring_ceiling_reports_target_lost() {
    let mut detector = detector(BiteThresholds::sensitive());
    assert!(!detector.target_lost_heuristic());

    tokio::time::advance(Duration::from_secs(24)).await;
    assert!(!detector.target_lost_heuristic());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(detector.target_lost_heuristic());

    detector.reset();
    assert!(!detector.target_lost_heuristic());
}
