use std::time::{Duration, Instant};

use fc_types::codes::RIP;
use fc_types::{duty_to_wire, ControlVector, FanSelection, FeedbackVector};

use super::{schedule_gains, ControlMode, Controller, ControllerConfig, Gains};

fn controller() -> Controller {
    Controller::new(ControllerConfig::default())
}

/// One-slave, one-fan feedback vector from an (rpm, duty) pair.
fn feedback(rpm: f64, duty: f64) -> FeedbackVector {
    let mut f = FeedbackVector::rip(1, 1);
    f.set_rpm(0, 0, rpm.round() as i64);
    f.set_dc(0, 0, duty_to_wire(duty, 2));
    f
}

fn commanded(vector: &ControlVector) -> f64 {
    match vector {
        ControlVector::VectorDc { duties, .. } => duties[0],
        other => panic!("expected VectorDc, got {:?}", other),
    }
}

/// First-order fan plant: rpm' = 0.9 rpm + 1200 dc + noise.
struct Plant {
    rpm: f64,
    saturation: Option<f64>,
    noise_state: u64,
}

impl Plant {
    fn new() -> Self {
        Self {
            rpm: 0.0,
            saturation: None,
            noise_state: 1,
        }
    }

    fn saturated(limit: f64) -> Self {
        Self {
            rpm: 0.0,
            saturation: Some(limit),
            noise_state: 1,
        }
    }

    fn step(&mut self, dc: f64) -> f64 {
        // Deterministic +/-3 RPM jitter.
        self.noise_state = self
            .noise_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let noise = ((self.noise_state >> 33) % 7) as f64 - 3.0;
        self.rpm = 0.9 * self.rpm + 1_200.0 * dc + noise;
        if let Some(limit) = self.saturation {
            self.rpm = self.rpm.min(limit);
        }
        self.rpm.max(0.0)
    }
}

#[test]
fn gain_schedule_brackets() {
    let low = schedule_gains(500.0);
    assert!((low.kp - 0.02 * 1.05).abs() < 1e-9);
    assert!((low.ki - 0.002 * 1.03).abs() < 1e-9);

    let mid = schedule_gains(1_500.0);
    assert!((mid.kp - 0.015 * 1.15).abs() < 1e-9);

    let high = schedule_gains(10_000.0);
    // Load factor saturates at 1.
    assert!((high.kp - 0.01 * 1.5).abs() < 1e-9);
    assert!((high.ki - 0.001 * 1.3).abs() < 1e-9);
}

#[test]
fn auto_gain_clamps() {
    let mut c = controller();
    c.set_gains(Gains { kp: 0.004, ki: 0.00005 });
    assert!((c.gains().kp - 0.005).abs() < 1e-12);
    assert!((c.gains().ki - 0.0001).abs() < 1e-12);

    c.set_gains(Gains { kp: 0.005, ki: 0.0001 });
    assert!((c.gains().kp - 0.005).abs() < 1e-12);

    c.set_gains(Gains { kp: 0.9, ki: 0.9 });
    assert!((c.gains().kp - 0.05).abs() < 1e-12);
    assert!((c.gains().ki - 0.01).abs() < 1e-12);
}

#[test]
fn user_gain_ranges_are_wide_open() {
    assert!(Controller::validate_user_gains(0.1, 0.01).is_ok());
    assert!(Controller::validate_user_gains(2.0, 0.5).is_ok());
    assert!(Controller::validate_user_gains(0.09, 0.1).is_err());
    assert!(Controller::validate_user_gains(2.1, 0.1).is_err());
    assert!(Controller::validate_user_gains(0.5, 0.009).is_err());
    assert!(Controller::validate_user_gains(0.5, 0.51).is_err());
}

#[test]
fn converges_on_simulated_plant() {
    let mut c = controller();
    c.chase(1_500.0, FanSelection::All).unwrap();
    c.set_gains(Gains { kp: 0.015, ki: 0.0015 });

    let mut plant = Plant::new();
    let mut dc = 0.5;
    let now = Instant::now();
    let mut converged_at = None;

    for step in 0..300 {
        let rpm = plant.step(dc);
        let f = feedback(rpm, dc);
        let out = c.step(&f, now).unwrap();
        dc = commanded(&out);
        assert!((0.0..=1.0).contains(&dc), "dc {} out of range", dc);

        let error = (rpm - 1_500.0).abs();
        if converged_at.is_none() && error < 50.0 {
            converged_at = Some(step);
        }
        if step >= 200 {
            assert!(error < 100.0, "step {}: error {}", step, error);
        }
    }

    let converged = converged_at.expect("never converged");
    assert!(converged <= 200, "converged only at step {}", converged);
}

#[test]
fn anti_windup_holds_under_saturation() {
    let mut c = controller();
    c.chase(2_000.0, FanSelection::All).unwrap();
    c.set_gains(Gains { kp: 0.015, ki: 0.0015 });

    // Blocked fan: the plant cannot exceed 800 RPM.
    let mut plant = Plant::saturated(800.0);
    let mut dc = 0.5;
    let now = Instant::now();
    let mut saw_full_duty = false;

    for _ in 0..300 {
        let rpm = plant.step(dc);
        let f = feedback(rpm, dc);
        let out = c.step(&f, now).unwrap();
        dc = commanded(&out);

        assert!(dc <= 1.0, "dc {} above full duty", dc);
        assert!(
            c.integral(0).abs() <= 0.1 * 2_000.0 + 1e-9,
            "integral {} past clamp",
            c.integral(0)
        );
        if (dc - 1.0).abs() < 1e-9 {
            saw_full_duty = true;
        }
    }
    assert!(saw_full_duty, "saturated plant should drive full duty");
}

#[test]
fn dead_zone_freezes_integrator_and_duty() {
    let mut c = controller();
    c.chase(1_500.0, FanSelection::All).unwrap();
    c.set_gains(Gains { kp: 0.015, ki: 0.0015 });

    let now = Instant::now();
    for _ in 0..100 {
        // 1490 RPM sits inside the 2% dead zone around 1500.
        let f = feedback(1_490.0, 0.5);
        let out = c.step(&f, now).unwrap();
        assert_eq!(c.integral(0), 0.0);
        assert!((commanded(&out) - 0.5).abs() < 1e-9);
    }
}

#[test]
fn sentinel_readings_hold_last_duty() {
    let mut c = controller();
    c.chase(1_500.0, FanSelection::All).unwrap();

    let now = Instant::now();
    // Establish a live duty first.
    let f = feedback(1_000.0, 0.4);
    let out = c.step(&f, now).unwrap();
    let live = commanded(&out);

    let mut dead = FeedbackVector::rip(1, 1);
    dead.set_rpm(0, 0, RIP);
    dead.set_dc(0, 0, duty_to_wire(live, 2));
    let out = c.step(&dead, now).unwrap();
    assert!((commanded(&out) - live).abs() < 1e-9);
    // No integral movement on an invalid reading.
    let integral_before = c.integral(0);
    c.step(&dead, now).unwrap();
    assert_eq!(c.integral(0), integral_before);
}

#[test]
fn unselected_fans_keep_wire_duty() {
    let mut c = controller();
    c.chase(1_500.0, FanSelection::parse_mask("10").unwrap())
        .unwrap();

    let mut f = FeedbackVector::rip(1, 2);
    f.set_rpm(0, 0, 1_000);
    f.set_rpm(0, 1, 900);
    f.set_dc(0, 0, 4_000);
    f.set_dc(0, 1, 7_700);

    let out = c.step(&f, Instant::now()).unwrap();
    match out {
        ControlVector::VectorDc { duties, .. } => {
            // Fan 1 is not owned: its wire duty rides through untouched.
            assert!((duties[1] - 0.77).abs() < 1e-9);
            // Fan 0 is owned and moves off its seed.
            assert!(duties[0] > 0.4);
        }
        other => panic!("expected VectorDc, got {:?}", other),
    }
}

#[test]
fn open_loop_commands_fixed_duty() {
    let mut c = controller();
    c.open_loop(0.65);
    let f = FeedbackVector::rip(2, 3);
    let out = c.step(&f, Instant::now()).unwrap();
    match out {
        ControlVector::VectorDc { duties, .. } => {
            assert_eq!(duties.len(), 6);
            assert!(duties.iter().all(|d| (*d - 0.65).abs() < 1e-9));
        }
        other => panic!("expected VectorDc, got {:?}", other),
    }
}

#[test]
fn stop_zeroes_owned_fans_and_is_idempotent() {
    let mut c = controller();
    c.chase(1_500.0, FanSelection::parse_mask("10").unwrap())
        .unwrap();

    let mut f = FeedbackVector::rip(1, 2);
    f.set_rpm(0, 0, 1_000);
    f.set_dc(0, 0, 4_000);
    f.set_dc(0, 1, 6_000);
    c.step(&f, Instant::now());

    let out = c.stop(&f).unwrap().expect("first stop emits a vector");
    match out {
        ControlVector::VectorDc { duties, .. } => {
            assert_eq!(duties[0], 0.0);
            assert!((duties[1] - 0.6).abs() < 1e-9);
        }
        other => panic!("expected VectorDc, got {:?}", other),
    }
    assert_eq!(*c.mode(), ControlMode::Off);
    assert_eq!(c.integral(0), 0.0);

    // Second stop is a quiet no-op.
    assert!(c.stop(&f).unwrap().is_none());
}

#[test]
fn off_mode_steps_emit_nothing() {
    let mut c = controller();
    let f = FeedbackVector::rip(1, 1);
    assert!(c.step(&f, Instant::now()).is_none());
    assert_eq!(c.stats().steps, 1);
}

#[test]
fn autotune_raises_ki_on_large_errors() {
    let mut c = Controller::new(ControllerConfig {
        auto_tune: true,
        ..ControllerConfig::default()
    });
    c.chase(1_500.0, FanSelection::All).unwrap();
    c.set_gains(Gains { kp: 0.015, ki: 0.0015 });

    let t0 = Instant::now();
    // Persistent huge error: mean abs error far above 0.1 * target.
    c.step(&feedback(100.0, 0.5), t0);
    assert_eq!(c.stats().autotune_adjustments, 1);
    assert!((c.gains().ki - 0.0015 * 1.2).abs() < 1e-9);

    // Within the 30 s window nothing more happens.
    c.step(&feedback(100.0, 0.5), t0 + Duration::from_secs(1));
    assert_eq!(c.stats().autotune_adjustments, 1);

    // Past the window it fires again.
    c.step(&feedback(100.0, 0.5), t0 + Duration::from_secs(31));
    assert_eq!(c.stats().autotune_adjustments, 2);
}

#[test]
fn chase_rejects_impossible_targets() {
    let mut c = controller();
    assert!(c.chase(0.0, FanSelection::All).is_err());
    assert!(c.chase(-100.0, FanSelection::All).is_err());
    assert!(c.chase(30_000.0, FanSelection::All).is_err());
    assert!(c.chase(25_000.0, FanSelection::All).is_ok());
}
