// This file is an example of how to use the `lure_vision` library. It drives the
// whole engine over a synthetic scene: a textured background with a target
// pattern drawn at 1.2x scale, and a "bite" splash that appears a few frames after
// monitoring starts. Actuation is logged instead of reaching the OS.
//
// Usage: lure_vision [config.json]
// Log level follows RUST_LOG (default `lure_vision=info`).

use anyhow::Context;
use lure_vision::{
    ActuationError, Actuator, Config, Controller, DetectionPipeline, FishingState, FrameOutcome, KeyCode, OwnedFrame,
    Pixel, TemplateView, change_detector_factory,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SCENE_W: u32 = 320;
const SCENE_H: u32 = 240;
const TARGET_AT: (u32, u32) = (180, 90);
const TARGET_SCALE: f64 = 1.2;
const FRAME_INTERVAL: Duration = Duration::from_millis(50);
const MAX_FRAMES: u64 = 400;

/// Prints every actuation instead of performing it.
struct LoggingActuator;

impl Actuator for LoggingActuator {
    fn move_cursor(&self, x: i32, y: i32) -> Result<(), ActuationError> {
        info!(x, y, "move cursor");
        Ok(())
    }

    fn click_right(&self) -> Result<(), ActuationError> {
        info!("right click");
        Ok(())
    }

    fn press_key(&self, key: KeyCode) -> Result<(), ActuationError> {
        info!(%key, "press key");
        Ok(())
    }
}

/// Smooth ring-like pattern, defined in template coordinates.
fn pattern(u: f64, v: f64) -> Pixel {
    let (cx, cy) = (12.0, 12.0);
    let r = ((u - cx).powi(2) + (v - cy).powi(2)).sqrt();
    let level = 120.0 + 90.0 * (r / 2.5).cos() * (-(r / 14.0)).exp();
    Pixel::new(level as u8, (level * 0.8) as u8, 40, 255)
}

/// The template as an image buffer, the way a loaded PNG would arrive.
fn template() -> TemplateView {
    TemplateView::from_image(image::RgbaImage::from_fn(24, 24, |x, y| {
        let px = pattern(x as f64, y as f64);
        image::Rgba([px.red, px.green, px.blue, px.alpha])
    }))
}

/// Background with the target drawn at `TARGET_SCALE`, optionally with a splash.
fn scene(sequence: u64, splash: bool) -> OwnedFrame {
    let size = (24.0 * TARGET_SCALE) as u32;
    let mut frame = OwnedFrame::from_fn(SCENE_W, SCENE_H, |x, y| {
        let wave = ((x as f64 / 17.0).sin() + (y as f64 / 23.0).cos()) * 12.0;
        Pixel::new(30, (60.0 + wave) as u8, (90.0 + wave) as u8, 255)
    });
    let target = OwnedFrame::from_fn(size, size, |x, y| {
        pattern(x as f64 / TARGET_SCALE, y as f64 / TARGET_SCALE)
    });
    frame.blit(&target.view(), TARGET_AT.0, TARGET_AT.1);
    if splash {
        let (cx, cy) = (TARGET_AT.0 + size / 2, TARGET_AT.1 + size / 2);
        frame.fill_rect(cx - 25, cy - 25, cx + 25, cy + 25, Pixel::gray(235));
    }
    frame.with_sequence(sequence)
}

fn load_config() -> anyhow::Result<Config> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(Config::default());
    };
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading config {path}"))?;
    let config: Config = serde_json::from_str(&raw).with_context(|| format!("parsing config {path}"))?;
    Ok(config.validate())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lure_vision=info")))
        .init();

    let config = load_config()?;
    info!(?config, "Lure Vision - Example Runner");

    let controller = Controller::spawn(&config, Arc::new(LoggingActuator), change_detector_factory(&config));
    let mut pipeline = DetectionPipeline::new(&config, &template(), controller.clone())
        .context("building detection pipeline")?;

    controller.add_listener(|from, to| info!(%from, %to, "state changed"))?;
    controller.await_focus()?;
    controller.focus_acquired()?;
    controller.sync().await?;

    let mut monitored_frames = 0u32;
    let mut completed_cycle = false;
    for sequence in 1..=MAX_FRAMES {
        let now = Instant::now();
        let splash = monitored_frames >= 6;
        let frame = scene(sequence, splash).with_timestamp(now);

        let outcome = tokio::task::block_in_place(|| pipeline.process_frame(&frame.view(), now))?;
        match outcome {
            FrameOutcome::Acquired(result) => {
                info!(x = result.x, y = result.y, score = result.score, scale = result.scale, "target found");
            }
            FrameOutcome::Monitored(_) => monitored_frames += 1,
            _ => {}
        }

        controller.tick(now)?;
        controller.sync().await?;

        if controller.current() == FishingState::Cooldown {
            completed_cycle = true;
            monitored_frames = 0;
        }
        if completed_cycle && controller.current() == FishingState::Searching {
            info!(frames = sequence, "cycle complete: searched, monitored, reeled, cooled down and recast");
            break;
        }
        tokio::time::sleep(FRAME_INTERVAL).await;
    }

    controller.halt()?;
    controller.shutdown().await?;
    Ok(())
}
