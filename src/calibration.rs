/// Calibration helpers: measured travel in, machine constants out.
///
/// Procedure: jog the in/out axis by ±1000 steps and measure the travel, then
/// rotate by ±2000 steps and measure how far the rack was dragged along.

use crate::error::{MotionError, MotionResult};
use crate::kinematics::MoveCommand;

pub const INOUT_TEST_STEPS: i32 = 1000;
pub const ROTATION_TEST_STEPS: i32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jog {
    InOutOut,
    InOutIn,
    RotateForward,
    RotateBack,
}

impl Jog {
    pub fn command(self) -> MoveCommand {
        match self {
            Jog::InOutOut => MoveCommand::new(0, INOUT_TEST_STEPS),
            Jog::InOutIn => MoveCommand::new(0, -INOUT_TEST_STEPS),
            Jog::RotateForward => MoveCommand::new(ROTATION_TEST_STEPS, 0),
            Jog::RotateBack => MoveCommand::new(-ROTATION_TEST_STEPS, 0),
        }
    }
}

fn measured(value: f64, what: &str) -> MotionResult<f64> {
    if !value.is_finite() {
        return Err(MotionError::InvalidInput(format!("{} must be a finite number", what)));
    }
    Ok(value)
}

/// `0.5 · mm_rotation / mm_inout`, both measured over the standard jog distances.
pub fn compensation_ratio(mm_inout: f64, mm_rotation: f64) -> MotionResult<f64> {
    let mm_inout = measured(mm_inout, "in/out travel")?;
    let mm_rotation = measured(mm_rotation, "rotation drag")?;
    if mm_inout == 0.0 {
        return Err(MotionError::InvalidInput("In-Out movement cannot be zero".into()));
    }
    Ok(0.5 * (mm_rotation / mm_inout))
}

pub fn inout_steps_per_mm(test_steps: i32, mm_moved: f64) -> MotionResult<f64> {
    let mm_moved = measured(mm_moved, "in/out travel")?;
    if mm_moved == 0.0 {
        return Err(MotionError::InvalidInput("In-Out movement cannot be zero".into()));
    }
    Ok((test_steps as f64 / mm_moved).abs())
}
