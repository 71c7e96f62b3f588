/// Kinematic step conversion for the two-axis sand table
///
/// Turns a requested motion into signed step counts for the rotation axis and
/// the in/out axis. Rotating the turntable drags the in/out carriage along, so
/// every rotation step induces `compensation_ratio` in/out steps of parasitic
/// travel which is subtracted from the in/out command.
///
/// All functions here are pure: callers own the session state and decide what
/// to do with the result. Step counts stay within ±i32::MAX so every command
/// can be negated for undo or reversed wiring.

use serde::{Deserialize, Serialize};

use crate::error::{MotionError, MotionResult};

/// Physical constants of one table build.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MachineConfig {
    /// Steps of the in/out motor per millimetre of radial travel.
    pub inout_steps_per_mm: f64,
    /// Degrees of turntable rotation per rotation motor step.
    pub rotation_deg_per_step: f64,
    /// In/out steps to subtract per rotation step.
    pub compensation_ratio: f64,
    /// Bound on the cumulative in/out step position, if enforced at all.
    #[serde(default)]
    pub max_in_out_steps: Option<i32>,
    /// Both motors are wired reversed; the device gets the negated command.
    #[serde(default)]
    pub invert_wiring: bool,
}

impl MachineConfig {
    pub const fn reference() -> Self {
        Self {
            inout_steps_per_mm: 33.0,
            rotation_deg_per_step: 0.0679,
            compensation_ratio: 0.3167,
            max_in_out_steps: Some(4280),
            invert_wiring: false,
        }
    }

    pub fn validate(&self) -> MotionResult<()> {
        if !(self.inout_steps_per_mm.is_finite() && self.inout_steps_per_mm > 0.0) {
            return Err(MotionError::InvalidInput(format!(
                "INOUT_STEPS_PER_MM must be positive, got {}",
                self.inout_steps_per_mm
            )));
        }
        if !(self.rotation_deg_per_step.is_finite() && self.rotation_deg_per_step > 0.0) {
            return Err(MotionError::InvalidInput(format!(
                "ROTATION_DEG_PER_STEP must be positive, got {}",
                self.rotation_deg_per_step
            )));
        }
        if !self.compensation_ratio.is_finite() {
            return Err(MotionError::InvalidInput("COMPENSATION_RATIO must be finite".into()));
        }
        if let Some(max) = self.max_in_out_steps {
            if max < 0 {
                return Err(MotionError::InvalidInput(format!(
                    "MAX_IN_OUT_STEPS must not be negative, got {}",
                    max
                )));
            }
        }
        Ok(())
    }

    /// Wire value for a logical command.
    pub fn to_sent(&self, logical: MoveCommand) -> MotionResult<MoveCommand> {
        if self.invert_wiring {
            logical.inverse()
        } else {
            Ok(logical)
        }
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::reference()
    }
}

/// How fractional step counts become integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    /// Toward zero.
    Truncate,
    /// To nearest, halves away from zero.
    Round,
}

impl Rounding {
    /// Whole steps for `value`. Anything outside ±i32::MAX is rejected rather
    /// than clamped.
    pub fn quantize(self, value: f64) -> MotionResult<i32> {
        let steps = match self {
            Rounding::Truncate => value.trunc(),
            Rounding::Round => value.round(),
        };
        if steps.abs() <= i32::MAX as f64 {
            Ok(steps as i32)
        } else {
            Err(MotionError::InvalidInput(format!("{} steps is out of range", value)))
        }
    }
}

/// `a - b`, rejected when it leaves ±i32::MAX.
fn sub_steps(a: i32, b: i32) -> MotionResult<i32> {
    a.checked_sub(b)
        .filter(|&steps| steps != i32::MIN)
        .ok_or_else(|| MotionError::InvalidInput(format!("{} - {} steps is out of range", a, b)))
}

/// Behaviour switches for [`convert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ConverterMode {
    pub rounding: Rounding,
    /// Fold the rotation delta into (-180, 180] to take the short way round.
    #[serde(default)]
    pub wrap_angle: bool,
    /// Reject moves that push the cumulative in/out total past the bound.
    #[serde(default)]
    pub enforce_limit: bool,
}

impl ConverterMode {
    /// Slider-driven absolute positioning.
    pub const ABSOLUTE_TARGET: ConverterMode = ConverterMode {
        rounding: Rounding::Truncate,
        wrap_angle: false,
        enforce_limit: false,
    };

    /// Point-to-point moves between Cartesian points.
    pub const RELATIVE_MOVE: ConverterMode = ConverterMode {
        rounding: Rounding::Round,
        wrap_angle: true,
        enforce_limit: false,
    };
}

/// Annulus of mechanically reachable radii.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WorkspaceBounds {
    pub inner_limit_radius_mm: f64,
    pub workspace_radius_mm: f64,
}

impl WorkspaceBounds {
    pub fn contains(&self, radius_mm: f64) -> bool {
        self.inner_limit_radius_mm <= radius_mm && radius_mm <= self.workspace_radius_mm
    }

    pub fn check(&self, radius_mm: f64) -> MotionResult<()> {
        if self.contains(radius_mm) {
            Ok(())
        } else {
            Err(MotionError::WorkspaceViolation {
                radius_mm,
                inner_mm: self.inner_limit_radius_mm,
                outer_mm: self.workspace_radius_mm,
            })
        }
    }
}

impl Default for WorkspaceBounds {
    fn default() -> Self {
        Self {
            inner_limit_radius_mm: 30.0,
            workspace_radius_mm: 130.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolarMm {
    pub theta_deg: f64,
    pub radius_mm: f64,
}

impl PolarMm {
    pub const fn new(theta_deg: f64, radius_mm: f64) -> Self {
        Self { theta_deg, radius_mm }
    }

    fn is_finite(&self) -> bool {
        self.theta_deg.is_finite() && self.radius_mm.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CartesianMm {
    pub x_mm: f64,
    pub y_mm: f64,
}

impl CartesianMm {
    pub const fn new(x_mm: f64, y_mm: f64) -> Self {
        Self { x_mm, y_mm }
    }

    pub fn distance_to(&self, other: &CartesianMm) -> f64 {
        (self.x_mm - other.x_mm).hypot(self.y_mm - other.y_mm)
    }
}

/// A point on the table in either representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionMm {
    Polar(PolarMm),
    Cartesian(CartesianMm),
}

impl PositionMm {
    pub fn to_polar(self) -> PolarMm {
        match self {
            PositionMm::Polar(p) => p,
            PositionMm::Cartesian(c) => to_polar(c.x_mm, c.y_mm),
        }
    }

    pub fn to_cartesian(self) -> CartesianMm {
        match self {
            PositionMm::Polar(p) => to_cartesian(p),
            PositionMm::Cartesian(c) => c,
        }
    }
}

impl From<PolarMm> for PositionMm {
    fn from(p: PolarMm) -> Self {
        PositionMm::Polar(p)
    }
}

impl From<CartesianMm> for PositionMm {
    fn from(c: CartesianMm) -> Self {
        PositionMm::Cartesian(c)
    }
}

/// Cartesian millimetres to polar, theta in degrees within [-180, 180].
pub fn to_polar(x_mm: f64, y_mm: f64) -> PolarMm {
    PolarMm {
        theta_deg: y_mm.atan2(x_mm).to_degrees(),
        radius_mm: x_mm.hypot(y_mm),
    }
}

pub fn to_cartesian(p: PolarMm) -> CartesianMm {
    let theta = p.theta_deg.to_radians();
    CartesianMm {
        x_mm: p.radius_mm * theta.cos(),
        y_mm: p.radius_mm * theta.sin(),
    }
}

/// Signed step counts for one discrete move. Zero means "leave this axis alone".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MoveCommand {
    pub rotation_steps: i32,
    pub in_out_steps: i32,
}

impl MoveCommand {
    pub const ZERO: MoveCommand = MoveCommand { rotation_steps: 0, in_out_steps: 0 };

    pub const fn new(rotation_steps: i32, in_out_steps: i32) -> Self {
        Self { rotation_steps, in_out_steps }
    }

    pub fn is_zero(&self) -> bool {
        self.rotation_steps == 0 && self.in_out_steps == 0
    }

    /// Both axes reversed. `i32::MIN` has no positive counterpart and is refused.
    pub fn inverse(self) -> MotionResult<MoveCommand> {
        match (self.rotation_steps.checked_neg(), self.in_out_steps.checked_neg()) {
            (Some(rotation_steps), Some(in_out_steps)) => Ok(MoveCommand { rotation_steps, in_out_steps }),
            _ => Err(MotionError::InvalidInput(format!(
                "({}, {}) steps cannot be reversed",
                self.rotation_steps, self.in_out_steps
            ))),
        }
    }
}

/// Result of a conversion with the intermediate figures kept for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertedMove {
    pub delta_theta_deg: f64,
    pub delta_radius_mm: f64,
    /// In/out steps before compensation.
    pub raw_in_out_steps: i32,
    /// Amount taken off `raw_in_out_steps`.
    pub compensation_steps: i32,
    /// Steps as the table sees them, used for session bookkeeping.
    pub logical: MoveCommand,
    /// Steps as written to the device.
    pub sent: MoveCommand,
}

impl ConvertedMove {
    /// Wrap raw step counts, as entered by hand or produced by an undo.
    pub fn from_steps(logical: MoveCommand, cfg: &MachineConfig) -> MotionResult<Self> {
        // A command that cannot be reversed could never be undone.
        logical.inverse()?;
        Ok(Self {
            delta_theta_deg: logical.rotation_steps as f64 * cfg.rotation_deg_per_step,
            delta_radius_mm: logical.in_out_steps as f64 / cfg.inout_steps_per_mm,
            raw_in_out_steps: logical.in_out_steps,
            compensation_steps: 0,
            logical,
            sent: cfg.to_sent(logical)?,
        })
    }
}

/// Fold an angle delta into (-180, 180]. Applied once, so inputs are expected
/// to be differences of two angles in the same ±180 frame.
pub fn wrap_delta_deg(delta_deg: f64) -> f64 {
    if delta_deg > 180.0 {
        delta_deg - 360.0
    } else if delta_deg < -180.0 {
        delta_deg + 360.0
    } else {
        delta_deg
    }
}

fn compute(start: PolarMm, end: PolarMm, cfg: &MachineConfig, mode: &ConverterMode) -> MotionResult<ConvertedMove> {
    let mut delta_theta_deg = end.theta_deg - start.theta_deg;
    if mode.wrap_angle {
        delta_theta_deg = wrap_delta_deg(delta_theta_deg);
    }
    let delta_radius_mm = end.radius_mm - start.radius_mm;

    let rotation_steps = mode.rounding.quantize(delta_theta_deg / cfg.rotation_deg_per_step)?;
    let linear_steps = delta_radius_mm * cfg.inout_steps_per_mm;
    let raw_in_out_steps = mode.rounding.quantize(linear_steps)?;

    let in_out_steps = match mode.rounding {
        // Compensation is folded in before truncation so its fractional part is
        // absorbed by the single truncation.
        Rounding::Truncate => Rounding::Truncate
            .quantize(linear_steps - cfg.compensation_ratio * rotation_steps as f64)?,
        Rounding::Round => sub_steps(
            raw_in_out_steps,
            Rounding::Round.quantize(cfg.compensation_ratio * rotation_steps as f64)?,
        )?,
    };

    let logical = MoveCommand::new(rotation_steps, in_out_steps);
    Ok(ConvertedMove {
        delta_theta_deg,
        delta_radius_mm,
        raw_in_out_steps,
        compensation_steps: sub_steps(raw_in_out_steps, in_out_steps)?,
        logical,
        sent: cfg.to_sent(logical)?,
    })
}

/// Parameterized converter behind both reference variants.
pub fn convert(
    start: PolarMm,
    end: PolarMm,
    cfg: &MachineConfig,
    mode: &ConverterMode,
    bounds: Option<&WorkspaceBounds>,
) -> MotionResult<ConvertedMove> {
    if !start.is_finite() || !end.is_finite() {
        return Err(MotionError::InvalidInput(format!(
            "non-finite coordinates: start {:?}, end {:?}",
            start, end
        )));
    }
    if let Some(bounds) = bounds {
        bounds.check(start.radius_mm)?;
        bounds.check(end.radius_mm)?;
    }
    compute(start, end, cfg, mode)
}

/// Absolute target positioning: no angle wrap, truncating, no bound check.
pub fn steps_for_absolute_target(
    current: PositionMm,
    target: PositionMm,
    cfg: &MachineConfig,
) -> MotionResult<MoveCommand> {
    Ok(convert(current.to_polar(), target.to_polar(), cfg, &ConverterMode::ABSOLUTE_TARGET, None)?.logical)
}

/// Point-to-point move: wrapped, rounded, both endpoints checked against `bounds`.
pub fn steps_for_relative_move(
    start: PolarMm,
    end: PolarMm,
    cfg: &MachineConfig,
    bounds: &WorkspaceBounds,
) -> MotionResult<ConvertedMove> {
    convert(start, end, cfg, &ConverterMode::RELATIVE_MOVE, Some(bounds))
}

/// Whether a proposed cumulative in/out total is allowed. No bound means no limit.
pub fn limit_check(proposed_total_in_out: i32, cfg: &MachineConfig) -> bool {
    match cfg.max_in_out_steps {
        Some(max) => proposed_total_in_out.unsigned_abs() <= max.unsigned_abs(),
        None => true,
    }
}

/// Inverse of the last move. Clears `last` so a repeated call yields `(0, 0)`.
/// A move that cannot be reversed is refused and `last` is kept.
pub fn undo(last: &mut MoveCommand) -> MotionResult<MoveCommand> {
    let inverse = last.inverse()?;
    *last = MoveCommand::ZERO;
    Ok(inverse)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthUnit {
    #[default]
    Mm,
    Cm,
}

impl LengthUnit {
    pub fn to_mm(self, value: f64) -> f64 {
        match self {
            LengthUnit::Mm => value,
            LengthUnit::Cm => value * 10.0,
        }
    }
}

/// Parse one numeric entry.
pub fn parse_coordinate(text: &str) -> MotionResult<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(MotionError::InvalidInput("missing coordinate".into()));
    }
    let value: f64 = trimmed
        .parse()
        .map_err(|_| MotionError::InvalidInput(format!("'{}' is not a number", trimmed)))?;
    if !value.is_finite() {
        return Err(MotionError::InvalidInput(format!("'{}' is not a finite number", trimmed)));
    }
    Ok(value)
}

/// Parse an `x,y` pair given in `unit`.
pub fn parse_point(text: &str, unit: LengthUnit) -> MotionResult<CartesianMm> {
    let (x, y) = text
        .split_once(',')
        .ok_or_else(|| MotionError::InvalidInput(format!("expected 'x,y', got '{}'", text.trim())))?;
    Ok(CartesianMm::new(
        unit.to_mm(parse_coordinate(x)?),
        unit.to_mm(parse_coordinate(y)?),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_config() -> MachineConfig {
        MachineConfig {
            rotation_deg_per_step: 0.0675,
            max_in_out_steps: None,
            invert_wiring: true,
            ..MachineConfig::reference()
        }
    }

    #[test]
    fn test_absolute_same_position_is_zero() {
        let cfg = MachineConfig::reference();
        for &(theta, r) in &[(0.0, 185.0), (123.4, 75.0), (359.9, 100.5)] {
            let p = PositionMm::Polar(PolarMm::new(theta, r));
            assert_eq!(steps_for_absolute_target(p, p, &cfg).unwrap(), MoveCommand::ZERO);
        }
    }

    #[test]
    fn test_absolute_end_to_end() {
        let cfg = MachineConfig::reference();
        let cmd = steps_for_absolute_target(
            PolarMm::new(0.0, 185.0).into(),
            PolarMm::new(90.0, 75.0).into(),
            &cfg,
        )
        .unwrap();
        // 90 / 0.0679 = 1325.48 -> 1325
        // -3630 - 0.3167 * 1325 = -4049.63 -> -4049 (toward zero)
        assert_eq!(cmd, MoveCommand::new(1325, -4049));
    }

    #[test]
    fn test_absolute_does_not_wrap() {
        let cfg = MachineConfig::reference();
        let cmd = steps_for_absolute_target(
            PolarMm::new(350.0, 100.0).into(),
            PolarMm::new(10.0, 100.0).into(),
            &cfg,
        )
        .unwrap();
        assert!(cmd.rotation_steps < 0);
        assert_eq!(cmd.rotation_steps, (-340.0f64 / 0.0679).trunc() as i32);
    }

    #[test]
    fn test_wrap_delta() {
        assert!((wrap_delta_deg(-170.0 - 170.0) - 20.0).abs() < 1e-12);
        assert!((wrap_delta_deg(170.0 - -170.0) + 20.0).abs() < 1e-12);
        assert_eq!(wrap_delta_deg(180.0), 180.0);
        assert_eq!(wrap_delta_deg(-45.0), -45.0);
    }

    #[test]
    fn test_relative_takes_short_way() {
        let cfg = demo_config();
        let bounds = WorkspaceBounds::default();
        let mv = steps_for_relative_move(
            PolarMm::new(170.0, 100.0),
            PolarMm::new(-170.0, 100.0),
            &cfg,
            &bounds,
        )
        .unwrap();
        assert!((mv.delta_theta_deg - 20.0).abs() < 1e-9);
        // round(20 / 0.0675) = 296, round(0.3167 * 296) = 94
        assert_eq!(mv.logical, MoveCommand::new(296, -94));
        assert_eq!(mv.compensation_steps, 94);
        assert_eq!(mv.raw_in_out_steps, 0);
    }

    #[test]
    fn test_compensation_is_subtracted() {
        let cfg = MachineConfig { invert_wiring: false, ..demo_config() };
        let bounds = WorkspaceBounds::default();
        for &(t0, t1) in &[(0.0, 45.0), (10.0, -60.0), (-90.0, 90.0), (30.0, 31.0)] {
            let mv = steps_for_relative_move(
                PolarMm::new(t0, 50.0),
                PolarMm::new(t1, 80.0),
                &cfg,
                &bounds,
            )
            .unwrap();
            let expected = (cfg.compensation_ratio * mv.logical.rotation_steps as f64).round() as i32;
            assert_eq!(mv.compensation_steps, expected);
            assert_eq!(mv.logical.in_out_steps, mv.raw_in_out_steps - expected);
        }
    }

    #[test]
    fn test_inverted_wiring_sends_negation() {
        let cfg = demo_config();
        let mv = steps_for_relative_move(
            PolarMm::new(0.0, 50.0),
            PolarMm::new(30.0, 100.0),
            &cfg,
            &WorkspaceBounds::default(),
        )
        .unwrap();
        assert_eq!(mv.sent, mv.logical.inverse().unwrap());

        let straight = MachineConfig { invert_wiring: false, ..cfg };
        assert_eq!(straight.to_sent(mv.logical).unwrap(), mv.logical);
    }

    #[test]
    fn test_workspace_violation() {
        let cfg = demo_config();
        let bounds = WorkspaceBounds { inner_limit_radius_mm: 30.0, workspace_radius_mm: 130.0 };
        let err = steps_for_relative_move(PolarMm::new(0.0, 50.0), PolarMm::new(0.0, 25.0), &cfg, &bounds)
            .unwrap_err();
        assert!(matches!(err, MotionError::WorkspaceViolation { radius_mm, .. } if radius_mm == 25.0));

        let err = steps_for_relative_move(PolarMm::new(0.0, 131.0), PolarMm::new(0.0, 60.0), &cfg, &bounds)
            .unwrap_err();
        assert!(matches!(err, MotionError::WorkspaceViolation { .. }));

        assert!(bounds.contains(30.0));
        assert!(bounds.contains(130.0));
    }

    #[test]
    fn test_convert_without_bounds_accepts_any_radius() {
        let cfg = demo_config();
        let mv = convert(
            PolarMm::new(0.0, 5.0),
            PolarMm::new(0.0, 200.0),
            &cfg,
            &ConverterMode::RELATIVE_MOVE,
            None,
        )
        .unwrap();
        assert_eq!(mv.logical, MoveCommand::new(0, 6435));
    }

    #[test]
    fn test_convert_rejects_nan() {
        let cfg = demo_config();
        let err = convert(
            PolarMm::new(f64::NAN, 50.0),
            PolarMm::new(0.0, 60.0),
            &cfg,
            &ConverterMode::RELATIVE_MOVE,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, MotionError::InvalidInput(_)));
    }

    #[test]
    fn test_polar_round_trip() {
        for &(x, y) in &[(10.0, 0.0), (0.0, -42.5), (-73.2, 18.9), (120.0, 120.0), (-0.5, -99.0)] {
            let back = to_cartesian(to_polar(x, y));
            assert!((back.x_mm - x).abs() < 1e-6, "x {} -> {}", x, back.x_mm);
            assert!((back.y_mm - y).abs() < 1e-6, "y {} -> {}", y, back.y_mm);
        }
        let p = to_polar(0.0, 10.0);
        assert!((p.theta_deg - 90.0).abs() < 1e-12);
        assert!((p.radius_mm - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_limit_check() {
        let cfg = MachineConfig::reference();
        assert!(limit_check(4280, &cfg));
        assert!(limit_check(-4280, &cfg));
        assert!(!limit_check(4300, &cfg));
        assert!(!limit_check(-4281, &cfg));

        let unbounded = MachineConfig { max_in_out_steps: None, ..cfg };
        assert!(limit_check(i32::MAX, &unbounded));
    }

    #[test]
    fn test_undo_twice() {
        let mut last = MoveCommand::new(296, -94);
        assert_eq!(undo(&mut last).unwrap(), MoveCommand::new(-296, 94));
        assert_eq!(last, MoveCommand::ZERO);
        assert_eq!(undo(&mut last).unwrap(), MoveCommand::ZERO);
    }

    #[test]
    fn test_undo_refuses_unreversible_steps() {
        let mut last = MoveCommand::new(i32::MIN, 0);
        assert!(matches!(undo(&mut last), Err(MotionError::InvalidInput(_))));
        assert_eq!(last, MoveCommand::new(i32::MIN, 0));

        let cfg = MachineConfig::reference();
        assert!(matches!(
            ConvertedMove::from_steps(MoveCommand::new(0, i32::MIN), &cfg),
            Err(MotionError::InvalidInput(_))
        ));
        assert!(ConvertedMove::from_steps(MoveCommand::new(-i32::MAX, i32::MAX), &cfg).is_ok());
    }

    #[test]
    fn test_huge_radius_is_out_of_range() {
        let cfg = MachineConfig::reference();
        let err = convert(
            PolarMm::new(0.0, 185.0),
            PolarMm::new(0.0, 1e12),
            &cfg,
            &ConverterMode::ABSOLUTE_TARGET,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, MotionError::InvalidInput(_)));

        let err = convert(
            PolarMm::new(0.0, 1e12),
            PolarMm::new(90.0, 10.0),
            &demo_config(),
            &ConverterMode::RELATIVE_MOVE,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, MotionError::InvalidInput(_)));

        // Raw steps just inside the range, compensation pushes them over.
        let edge = MachineConfig { inout_steps_per_mm: 1.0, compensation_ratio: 1.0, ..demo_config() };
        let err = convert(
            PolarMm::new(0.0, 0.0),
            PolarMm::new(1.0, -(i32::MAX as f64)),
            &edge,
            &ConverterMode { wrap_angle: false, ..ConverterMode::RELATIVE_MOVE },
            None,
        )
        .unwrap_err();
        assert!(matches!(err, MotionError::InvalidInput(_)));
    }

    #[test]
    fn test_rounding_modes() {
        assert_eq!(Rounding::Truncate.quantize(-4049.6).unwrap(), -4049);
        assert_eq!(Rounding::Round.quantize(-4049.6).unwrap(), -4050);
        assert_eq!(Rounding::Round.quantize(2.5).unwrap(), 3);
        assert_eq!(Rounding::Round.quantize(-2.5).unwrap(), -3);
        assert!(Rounding::Truncate.quantize(2_147_483_647.9).is_ok());
        assert!(Rounding::Round.quantize(2_147_483_647.9).is_err());
        assert!(Rounding::Truncate.quantize(-2_147_483_648.0).is_err());
    }

    #[test]
    fn test_parse_point() {
        let p = parse_point(" 5.5, -3 ", LengthUnit::Cm).unwrap();
        assert_eq!(p, CartesianMm::new(55.0, -30.0));
        assert!(matches!(parse_point("5.5", LengthUnit::Mm), Err(MotionError::InvalidInput(_))));
        assert!(matches!(parse_point("abc,1", LengthUnit::Mm), Err(MotionError::InvalidInput(_))));
        assert!(matches!(parse_point(",1", LengthUnit::Mm), Err(MotionError::InvalidInput(_))));
        assert!(matches!(parse_coordinate("inf"), Err(MotionError::InvalidInput(_))));
    }

    #[test]
    fn test_config_validation() {
        assert!(MachineConfig::reference().validate().is_ok());
        let bad = MachineConfig { rotation_deg_per_step: 0.0, ..MachineConfig::reference() };
        assert!(bad.validate().is_err());
        let bad = MachineConfig { max_in_out_steps: Some(-1), ..MachineConfig::reference() };
        assert!(bad.validate().is_err());
    }
}
