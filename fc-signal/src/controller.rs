//! Closed-loop PI speed control over the feedback vector.
//!
//! The controller is passive: the orchestrator calls [`Controller::step`]
//! once per control period with the latest feedback vector and routes the
//! returned control vector to the slave manager. Gains carry the error
//! normalized by the target, so one schedule serves 500 and 20000 RPM
//! targets alike; the integral state itself stays in RPM units and is
//! clamped to a tenth of the target.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{info, warn};

use fc_types::error::{FcError, Result};
use fc_types::{is_sentinel, wire_to_duty, ControlVector, FanSelection, FeedbackVector, Target};

/// Error history window per fan, for auto-tuning.
const ERROR_HISTORY: usize = 20;

/// Auto-tune evaluation interval.
const AUTOTUNE_INTERVAL: Duration = Duration::from_secs(30);

/// Step-duration ring buffer size.
const STEP_BUFFER: usize = 256;

/// Commanded duty range under closed-loop control.
const DC_MIN: f64 = 0.1;
const DC_MAX: f64 = 1.0;

/// Auto-path gain limits.
pub const AUTO_KP_RANGE: (f64, f64) = (0.005, 0.05);
pub const AUTO_KI_RANGE: (f64, f64) = (0.0001, 0.01);

/// User "apply" path limits, broadcast verbatim via PISET.
pub const USER_KP_RANGE: (f64, f64) = (0.1, 2.0);
pub const USER_KI_RANGE: (f64, f64) = (0.01, 0.5);

/// Controller operating mode.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMode {
    Off,
    /// Hold one duty on every targeted fan.
    OpenLoop(f64),
    /// Chase a target RPM on the selected fans.
    ClosedLoop {
        target_rpm: f64,
        selection: FanSelection,
    },
}

/// Proportional/integral gain pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
}

/// Start-up gain schedule, parameterized by target RPM, then load-scaled
/// and clamped to the auto-path limits.
pub fn schedule_gains(target_rpm: f64) -> Gains {
    let (mut kp, mut ki) = if target_rpm < 1_000.0 {
        (0.02, 0.002)
    } else if target_rpm < 3_000.0 {
        (0.015, 0.0015)
    } else {
        (0.01, 0.001)
    };
    let load = (target_rpm / 5_000.0).min(1.0);
    kp *= 1.0 + 0.5 * load;
    ki *= 1.0 + 0.3 * load;
    Gains {
        kp: kp.clamp(AUTO_KP_RANGE.0, AUTO_KP_RANGE.1),
        ki: ki.clamp(AUTO_KI_RANGE.0, AUTO_KI_RANGE.1),
    }
}

/// Controller construction knobs.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Control period.
    pub period: Duration,
    pub max_rpm: f64,
    pub dc_decimals: u32,
    /// Enable the periodic gain self-adjustment.
    pub auto_tune: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(100),
            max_rpm: 25_000.0,
            dc_decimals: 2,
            auto_tune: false,
        }
    }
}

/// Step-duration telemetry (microseconds).
#[derive(Debug)]
struct StepTelemetry {
    durations_us: [u32; STEP_BUFFER],
    idx: usize,
    count: usize,
    overruns: u64,
}

impl StepTelemetry {
    fn new() -> Self {
        Self {
            durations_us: [0; STEP_BUFFER],
            idx: 0,
            count: 0,
            overruns: 0,
        }
    }

    fn record(&mut self, elapsed: Duration, budget: Duration) -> bool {
        let us = elapsed.as_micros().min(u32::MAX as u128) as u32;
        self.durations_us[self.idx] = us;
        self.idx = (self.idx + 1) % STEP_BUFFER;
        self.count = (self.count + 1).min(STEP_BUFFER);
        let overrun = elapsed > budget;
        if overrun {
            self.overruns += 1;
        }
        overrun
    }

    fn summary(&self) -> (u32, u32, u64) {
        if self.count == 0 {
            return (0, 0, 0);
        }
        let slice = &self.durations_us[..self.count];
        let sum: u64 = slice.iter().map(|&v| u64::from(v)).sum();
        let max = slice.iter().copied().max().unwrap_or(0);
        ((sum / self.count as u64) as u32, max, self.overruns)
    }
}

/// Controller statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct ControllerStats {
    pub steps: u64,
    pub avg_step_us: u32,
    pub max_step_us: u32,
    pub overruns: u64,
    pub autotune_adjustments: u64,
}

struct FanLoop {
    integral: f64,
    dc: f64,
    errors: VecDeque<f64>,
}

impl FanLoop {
    fn new() -> Self {
        Self {
            integral: 0.0,
            dc: 0.0,
            errors: VecDeque::with_capacity(ERROR_HISTORY),
        }
    }
}

/// The PI feedback controller.
pub struct Controller {
    config: ControllerConfig,
    mode: ControlMode,
    gains: Gains,
    fans: Vec<FanLoop>,
    steps: u64,
    last_autotune: Option<Instant>,
    autotune_adjustments: u64,
    telemetry: StepTelemetry,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            mode: ControlMode::Off,
            gains: Gains { kp: 0.0, ki: 0.0 },
            fans: Vec::new(),
            steps: 0,
            last_autotune: None,
            autotune_adjustments: 0,
            telemetry: StepTelemetry::new(),
        }
    }

    pub fn mode(&self) -> &ControlMode {
        &self.mode
    }

    pub fn gains(&self) -> Gains {
        self.gains
    }

    /// Override the scheduled gains (auto-path clamps apply).
    pub fn set_gains(&mut self, gains: Gains) {
        self.gains = Gains {
            kp: gains.kp.clamp(AUTO_KP_RANGE.0, AUTO_KP_RANGE.1),
            ki: gains.ki.clamp(AUTO_KI_RANGE.0, AUTO_KI_RANGE.1),
        };
    }

    /// Validate user-facing gains for a PISET broadcast. The values are
    /// not applied locally; slaves run them in their own loops.
    pub fn validate_user_gains(kp: f64, ki: f64) -> Result<(f64, f64)> {
        if !(USER_KP_RANGE.0..=USER_KP_RANGE.1).contains(&kp) {
            return Err(FcError::validation(format!(
                "Kp {} outside {:?}",
                kp, USER_KP_RANGE
            )));
        }
        if !(USER_KI_RANGE.0..=USER_KI_RANGE.1).contains(&ki) {
            return Err(FcError::validation(format!(
                "Ki {} outside {:?}",
                ki, USER_KI_RANGE
            )));
        }
        Ok((kp, ki))
    }

    /// Enter closed-loop mode, scheduling gains off the target.
    pub fn chase(&mut self, target_rpm: f64, selection: FanSelection) -> Result<()> {
        if target_rpm <= 0.0 || target_rpm > self.config.max_rpm {
            return Err(FcError::validation(format!(
                "target {} outside (0, {}]",
                target_rpm, self.config.max_rpm
            )));
        }
        self.gains = schedule_gains(target_rpm);
        self.mode = ControlMode::ClosedLoop {
            target_rpm,
            selection,
        };
        self.reset_loops();
        info!(
            target: "controller",
            "chasing {} RPM with Kp={} Ki={}",
            target_rpm, self.gains.kp, self.gains.ki
        );
        Ok(())
    }

    /// Enter open-loop mode at a fixed duty.
    pub fn open_loop(&mut self, dc: f64) {
        self.mode = ControlMode::OpenLoop(dc.clamp(0.0, 1.0));
        self.reset_loops();
    }

    /// Leave any active mode: integrators reset, owned fans get DC 0.
    /// A second call is a no-op.
    pub fn stop(&mut self, feedback: &FeedbackVector) -> Result<Option<ControlVector>> {
        if self.mode == ControlMode::Off {
            return Ok(None);
        }
        let selection = match &self.mode {
            ControlMode::ClosedLoop { selection, .. } => selection.clone(),
            _ => FanSelection::All,
        };
        self.mode = ControlMode::Off;
        self.reset_loops();

        let total = feedback.n_slaves() * feedback.max_fans();
        let duties = (0..total)
            .map(|i| {
                if selection.selects(i) {
                    0.0
                } else {
                    current_duty(feedback, i, self.config.dc_decimals)
                }
            })
            .collect();
        info!(target: "controller", "stopped; owned fans commanded to zero");
        Ok(Some(ControlVector::VectorDc {
            target: Target::All,
            duties,
        }))
    }

    fn reset_loops(&mut self) {
        for fan in &mut self.fans {
            fan.integral = 0.0;
            fan.errors.clear();
        }
    }

    /// One control period: read the feedback vector, update every owned
    /// fan's loop, and emit the resulting duty matrix.
    pub fn step(&mut self, feedback: &FeedbackVector, now: Instant) -> Option<ControlVector> {
        let started = Instant::now();
        let total = feedback.n_slaves() * feedback.max_fans();
        if self.fans.len() < total {
            self.fans.resize_with(total, FanLoop::new);
        }

        let out = match self.mode.clone() {
            ControlMode::Off => None,
            ControlMode::OpenLoop(dc) => Some(ControlVector::VectorDc {
                target: Target::All,
                duties: vec![dc; total],
            }),
            ControlMode::ClosedLoop {
                target_rpm,
                selection,
            } => {
                let vector = self.closed_loop_step(feedback, target_rpm, &selection, total);
                if self.config.auto_tune {
                    self.maybe_autotune(target_rpm, now);
                }
                Some(vector)
            }
        };

        self.steps += 1;
        let elapsed = started.elapsed();
        if self.telemetry.record(elapsed, self.config.period / 2) {
            warn!(
                target: "controller",
                "step took {:?}, over half the {:?} period",
                elapsed, self.config.period
            );
        }
        out
    }

    fn closed_loop_step(
        &mut self,
        feedback: &FeedbackVector,
        target: f64,
        selection: &FanSelection,
        total: usize,
    ) -> ControlVector {
        let decimals = self.config.dc_decimals;
        let max_plausible = 1.5 * self.config.max_rpm;
        let mut duties = Vec::with_capacity(total);

        for i in 0..total {
            let slave = i / feedback.max_fans();
            let fan = i % feedback.max_fans();
            let rpm_wire = feedback.rpm(slave, fan);

            if !selection.selects(i) {
                // Fans the controller does not own keep their last
                // commanded duty off the DC half.
                duties.push(current_duty(feedback, i, decimals));
                continue;
            }

            let state = &mut self.fans[i];
            let valid =
                !is_sentinel(rpm_wire) && rpm_wire >= 0 && (rpm_wire as f64) <= max_plausible;
            if !valid {
                duties.push(state.dc.clamp(0.0, DC_MAX));
                continue;
            }
            let rpm = rpm_wire as f64;

            // Seed the loop's duty from the wire the first time through.
            if state.dc == 0.0 {
                let seen = current_duty(feedback, i, decimals);
                if seen > 0.0 {
                    state.dc = seen;
                }
            }

            let mut error = target - rpm;
            if error.abs() < 0.02 * target {
                error = 0.0;
            }
            state.errors.push_back(error.abs());
            if state.errors.len() > ERROR_HISTORY {
                state.errors.pop_front();
            }

            let windup = 0.1 * target;
            state.integral = (state.integral + error).clamp(-windup, windup);

            let delta =
                self.gains.kp * (error / target) + self.gains.ki * (state.integral / target);
            state.dc = (state.dc + delta).clamp(DC_MIN, DC_MAX);
            duties.push(state.dc);
        }

        ControlVector::VectorDc {
            target: Target::All,
            duties,
        }
    }

    /// Every 30 s, nudge the gains from per-fan error history.
    fn maybe_autotune(&mut self, target: f64, now: Instant) {
        let due = self
            .last_autotune
            .map(|t| now.duration_since(t) >= AUTOTUNE_INTERVAL)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_autotune = Some(now);

        let histories: Vec<&VecDeque<f64>> = self
            .fans
            .iter()
            .filter(|f| !f.errors.is_empty())
            .map(|f| &f.errors)
            .collect();
        if histories.is_empty() {
            return;
        }
        let all: Vec<f64> = histories.iter().flat_map(|h| h.iter().copied()).collect();
        let mean_abs = all.iter().sum::<f64>() / all.len() as f64;
        let variance =
            all.iter().map(|e| (e - mean_abs).powi(2)).sum::<f64>() / all.len() as f64;

        let mut gains = self.gains;
        if mean_abs > 0.1 * target {
            gains.ki *= 1.2;
        } else if variance > (0.05 * target).powi(2) {
            gains.kp *= 0.9;
            gains.ki *= 0.9;
        } else if mean_abs < 0.02 * target && variance < (0.02 * target).powi(2) {
            gains.kp *= 1.05;
        } else {
            return;
        }
        gains.kp = gains.kp.clamp(AUTO_KP_RANGE.0, AUTO_KP_RANGE.1);
        gains.ki = gains.ki.clamp(AUTO_KI_RANGE.0, AUTO_KI_RANGE.1);
        if gains != self.gains {
            info!(
                target: "controller",
                "auto-tune: Kp {} -> {}, Ki {} -> {}",
                self.gains.kp, gains.kp, self.gains.ki, gains.ki
            );
            self.gains = gains;
            self.autotune_adjustments += 1;
        }
    }

    /// Integral term for one flat fan index, for invariant checks.
    pub fn integral(&self, fan: usize) -> f64 {
        self.fans.get(fan).map(|f| f.integral).unwrap_or(0.0)
    }

    /// Last commanded duty for one flat fan index.
    pub fn duty(&self, fan: usize) -> f64 {
        self.fans.get(fan).map(|f| f.dc).unwrap_or(0.0)
    }

    pub fn stats(&self) -> ControllerStats {
        let (avg, max, overruns) = self.telemetry.summary();
        ControllerStats {
            steps: self.steps,
            avg_step_us: avg,
            max_step_us: max,
            overruns,
            autotune_adjustments: self.autotune_adjustments,
        }
    }
}

fn current_duty(feedback: &FeedbackVector, flat: usize, decimals: u32) -> f64 {
    let slave = flat / feedback.max_fans();
    let fan = flat % feedback.max_fans();
    let wire = feedback.dc(slave, fan);
    if is_sentinel(wire) {
        0.0
    } else {
        wire_to_duty(wire, decimals).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests;
