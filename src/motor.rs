/*!
 # Motor output

 Speed-to-power mapping and the periodic scheduler that pushes motor power
 to the hubs. Commands only record the desired power; the scheduler writes it
 on its next tick, and only when it changed.
*/

use std::time::Duration;
use tokio::time;
use tracing::{error, instrument, trace};

use crate::session::Session;
use crate::transport::Transport;

/// Default scheduler period
pub const DEFAULT_TICK: Duration = Duration::from_millis(120);
/// Default gap between writes to different motors of one hub
pub const DEFAULT_STAGGER: Duration = Duration::from_millis(11);

/// Clamps `x` into the input range, then maps it linearly onto the output range.
///
/// The input range may be given in descending order.
pub fn remap(x: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    let (low, high) = if in_min <= in_max {
        (in_min, in_max)
    } else {
        (in_max, in_min)
    };
    let x = x.clamp(low, high);
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

/// Power ranges used for the two directions, by hub firmware generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerCurve {
    /// Forward 15..=97, reverse 245..=160
    #[default]
    Current,
    /// Forward 35..=100, reverse 220..=155
    Legacy,
}

impl PowerCurve {
    fn forward(self) -> (f64, f64) {
        match self {
            PowerCurve::Current => (15.0, 97.0),
            PowerCurve::Legacy => (35.0, 100.0),
        }
    }

    fn reverse(self) -> (f64, f64) {
        match self {
            PowerCurve::Current => (245.0, 160.0),
            PowerCurve::Legacy => (220.0, 155.0),
        }
    }
}

/// Maps a speed in -100..=100 to a raw power byte.
///
/// Speeds within -1..=1 are the deadband and map to `neutral`.
pub fn speed_to_power(speed: i32, curve: PowerCurve, neutral: u8) -> u8 {
    let speed = speed.clamp(-100, 100) as f64;
    if speed > 1.0 {
        let (low, high) = curve.forward();
        remap(speed, 1.0, 100.0, low, high) as u8
    } else if speed < -1.0 {
        let (low, high) = curve.reverse();
        remap(speed, -1.0, -100.0, low, high) as u8
    } else {
        neutral
    }
}

/// Writes changed motor powers once per tick
#[derive(Debug, Clone, Copy)]
pub struct MotorScheduler {
    pub interval: Duration,
    pub stagger: Duration,
}

impl Default for MotorScheduler {
    fn default() -> Self {
        Self {
            interval: DEFAULT_TICK,
            stagger: DEFAULT_STAGGER,
        }
    }
}

impl MotorScheduler {
    pub fn new(interval: Duration, stagger: Duration) -> Self {
        Self { interval, stagger }
    }

    /// Runs one tick for a session and returns the number of writes issued.
    ///
    /// A failed write is logged and not retried; the power still counts as sent.
    #[instrument(skip_all, fields(hub = %session.id()))]
    pub async fn tick<T: Transport + ?Sized>(&self, session: &mut Session, transport: &T) -> usize {
        let changes = session.ports_mut().take_motor_changes();
        let mut writes = 0;
        for (i, (port, power)) in changes.into_iter().enumerate() {
            if i > 0 {
                time::sleep(self.stagger).await;
            }
            let Some(outbound) = session.codec().motor_power(port, power) else {
                continue;
            };
            trace!("Motor on port {} -> {}", port, power);
            if let Err(e) = session.send(transport, &outbound).await {
                error!("Motor write to port {} failed: {}", port, e);
            }
            writes += 1;
        }
        writes
    }
}
