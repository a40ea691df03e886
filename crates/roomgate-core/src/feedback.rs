//! ============================================================================
//! Feedback - LED strip driver task
//! ============================================================================
//! The strip breathes white while idle and holds a solid color for a few
//! seconds after a scan. It runs as its own task and only listens to
//! `LightCommand`s, so the scan loop never waits on LED timing.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, warn};

use crate::types::{Color, RoomgateResult};

/// Output side of the reader hardware
pub trait LedStrip: Send + 'static {
    fn set_all(&mut self, color: Color);

    /// Push the current frame to the LEDs
    fn present(&mut self) -> RoomgateResult<()>;

    /// 0.0 - 1.0
    fn set_brightness(&mut self, level: f32);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// How long a scan color stays up
    pub hold: Duration,
    /// Delay between breathing steps
    pub step_delay: Duration,
    pub step: u8,
    pub brightness_low: f32,
    pub brightness_high: f32,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            hold: Duration::from_secs(2),
            step_delay: Duration::from_millis(50),
            step: 5,
            brightness_low: 0.2,
            brightness_high: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightCommand {
    /// Show a color, then go back to breathing
    Hold(Color),
    /// Show a color until shutdown
    Alert(Color),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Breathing { level: u8, rising: bool },
    Held { until: Instant },
    Alert,
}

/// Next breathing level: 0 up to 255 and back down
fn next_level(level: u8, rising: bool, step: u8) -> (u8, bool) {
    if rising {
        match level.checked_add(step) {
            Some(n) if n < u8::MAX => (n, true),
            _ => (u8::MAX, false),
        }
    } else {
        match level.checked_sub(step) {
            Some(n) if n > 0 => (n, false),
            _ => (0, true),
        }
    }
}

fn show<L: LedStrip>(strip: &mut L, color: Color) {
    strip.set_all(color);
    if let Err(e) = strip.present() {
        warn!("LED update failed: {}", e);
    }
}

async fn run_strip<L: LedStrip>(
    mut strip: L,
    config: FeedbackConfig,
    mut commands: mpsc::Receiver<LightCommand>,
) {
    let breathing = Phase::Breathing {
        level: 0,
        rising: true,
    };
    let step = config.step.max(1);
    strip.set_brightness(config.brightness_low);
    let mut phase = breathing;
    let mut next_step = Instant::now();

    loop {
        let wake = match phase {
            Phase::Breathing { .. } => Some(next_step),
            Phase::Held { until } => Some(until),
            Phase::Alert => None,
        };
        let tick = async {
            match wake {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            command = commands.recv() => match command {
                Some(LightCommand::Hold(color)) => {
                    strip.set_brightness(config.brightness_high);
                    show(&mut strip, color);
                    phase = Phase::Held { until: Instant::now() + config.hold };
                }
                Some(LightCommand::Alert(color)) => {
                    strip.set_brightness(config.brightness_high);
                    show(&mut strip, color);
                    phase = Phase::Alert;
                }
                Some(LightCommand::Shutdown) | None => break,
            },
            _ = tick => match phase {
                Phase::Breathing { level, rising } => {
                    show(&mut strip, Color::gray(level));
                    let (level, rising) = next_level(level, rising, step);
                    phase = Phase::Breathing { level, rising };
                    next_step = Instant::now() + config.step_delay;
                }
                Phase::Held { .. } => {
                    strip.set_brightness(config.brightness_low);
                    phase = breathing;
                    next_step = Instant::now();
                }
                Phase::Alert => {}
            },
        }
    }

    show(&mut strip, Color::BLACK);
    debug!("Feedback task stopped");
}

/// Handle to the running feedback task
pub struct Feedback {
    commands: mpsc::Sender<LightCommand>,
    task: Option<JoinHandle<()>>,
}

impl Feedback {
    /// Take ownership of the strip and start breathing
    pub fn spawn<L: LedStrip>(strip: L, config: FeedbackConfig) -> Self {
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run_strip(strip, config, rx));
        Self {
            commands: tx,
            task: Some(task),
        }
    }

    pub async fn hold(&self, color: Color) {
        self.send(LightCommand::Hold(color)).await;
    }

    pub async fn alert(&self, color: Color) {
        self.send(LightCommand::Alert(color)).await;
    }

    async fn send(&self, command: LightCommand) {
        if self.commands.send(command).await.is_err() {
            warn!("Feedback task is gone, dropping {:?}", command);
        }
    }

    /// Blank the strip and wait for the task to finish. Safe to call twice.
    pub async fn shutdown(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let _ = self.commands.send(LightCommand::Shutdown).await;
        if let Err(e) = task.await {
            error!("Feedback task panicked: {}", e);
        }
    }
}
