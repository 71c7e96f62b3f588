/// Radial sand patterns
///
/// Generates `r(theta)` patterns, samples them at the table's step resolution,
/// turns the samples into a drawable path and reads/writes the plain-text
/// coordinate files used to hand paths between tools.

use std::f64::consts::{PI, TAU};
use std::io::Write;

use log::debug;
use nom::{
    character::complete::{char, space0},
    number::complete::double,
    sequence::{delimited, separated_pair},
    IResult,
};

use crate::error::{MotionError, MotionResult};
use crate::kinematics::CartesianMm;

pub const PREVIEW_SAMPLES: usize = 1000;
pub const PREVIEW_CLIP_MM: f64 = 23.0;
pub const PREVIEW_BOUNDARY_MM: f64 = 24.0;
pub const MACHINE_ROTATION_STEP_DEG: f64 = 1.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pattern {
    /// `r = a·(cos(nθ + d) + sin(nθ + d))`
    Simple { a: f64, n: f64, d: f64 },
    /// Ratio of two `cos(2·asin(..) + π·m)` terms, scaled by `a`.
    Complex { a: f64, k: f64, m: f64, n: f64 },
}

/// One pattern sample, theta in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternPoint {
    pub r: f64,
    pub theta: f64,
}

impl PatternPoint {
    pub fn to_cartesian(&self) -> CartesianMm {
        CartesianMm::new(self.r * self.theta.cos(), self.r * self.theta.sin())
    }
}

impl Pattern {
    pub fn validate(&self) -> MotionResult<()> {
        let finite = match *self {
            Pattern::Simple { a, n, d } => [a, n, d].iter().all(|v| v.is_finite()),
            Pattern::Complex { a, k, m, n } => [a, k, m, n].iter().all(|v| v.is_finite()),
        };
        if !finite {
            return Err(MotionError::InvalidInput("pattern parameters must be finite".into()));
        }
        if let Pattern::Complex { k, n, .. } = *self {
            if k.abs() > 1.0 {
                return Err(MotionError::InvalidInput(format!("k must lie in [-1, 1], got {}", k)));
            }
            if n == 0.0 {
                return Err(MotionError::InvalidInput("n must be non-zero".into()));
            }
        }
        Ok(())
    }

    pub fn radius(&self, theta: f64) -> f64 {
        match *self {
            Pattern::Simple { a, n, d } => a * ((n * theta + d).cos() + (n * theta + d).sin()),
            Pattern::Complex { a, k, m, n } => {
                let numerator = (2.0 * k.asin() + PI * m).cos() / (2.0 * n);
                let denominator = (2.0 * (k * (n * theta).cos()).asin() + PI * m).cos() / (2.0 * n);
                a * (numerator / denominator)
            }
        }
    }

    /// `samples` points evenly spaced over [0, 2π] inclusive, optionally clipped to ±clip.
    pub fn preview(&self, samples: usize, clip: Option<f64>) -> MotionResult<Vec<PatternPoint>> {
        self.validate()?;
        if samples < 2 {
            return Err(MotionError::InvalidInput("preview needs at least 2 samples".into()));
        }
        let last = (samples - 1) as f64;
        Ok((0..samples)
            .map(|i| {
                let theta = TAU * i as f64 / last;
                let mut r = self.radius(theta);
                if let Some(c) = clip {
                    r = r.clamp(-c, c);
                }
                PatternPoint { r, theta }
            })
            .collect())
    }

    /// Samples at the machine's resolution: one per rotation step over [0, 2π),
    /// radius rounded to the nearest in/out step. Undefined radii are dropped.
    pub fn sample_for_machine(&self, rotation_step_deg: f64, inout_steps_per_mm: f64) -> MotionResult<Vec<PatternPoint>> {
        self.validate()?;
        if !(rotation_step_deg.is_finite() && rotation_step_deg > 0.0) {
            return Err(MotionError::InvalidInput(format!("rotation step must be positive, got {}", rotation_step_deg)));
        }
        if !(inout_steps_per_mm.is_finite() && inout_steps_per_mm > 0.0) {
            return Err(MotionError::InvalidInput(format!("steps per mm must be positive, got {}", inout_steps_per_mm)));
        }
        let count = (360.0 / rotation_step_deg).ceil() as usize;
        let mut points = Vec::with_capacity(count);
        let mut dropped = 0usize;
        for i in 0..count {
            let theta = (i as f64 * rotation_step_deg).to_radians();
            let r = (self.radius(theta) * inout_steps_per_mm).round() / inout_steps_per_mm;
            if r.is_finite() {
                points.push(PatternPoint { r, theta });
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(target: "pattern", "Dropped {} undefined samples", dropped);
        }
        Ok(points)
    }
}

/// Start on the boundary at (0, R), go to the closest pattern point, trace
/// every point in order and return to the start.
pub fn build_path(points: &[CartesianMm], boundary_radius: f64) -> MotionResult<Vec<CartesianMm>> {
    let start = CartesianMm::new(0.0, boundary_radius);
    let nearest = points
        .iter()
        .min_by(|a, b| a.distance_to(&start).total_cmp(&b.distance_to(&start)))
        .copied()
        .ok_or_else(|| MotionError::InvalidInput("pattern has no points".into()))?;

    let mut path = Vec::with_capacity(points.len() + 3);
    path.push(start);
    path.push(nearest);
    path.extend_from_slice(points);
    path.push(start);
    Ok(path)
}

pub fn scale_points(points: &[CartesianMm], factor: f64) -> Vec<CartesianMm> {
    points
        .iter()
        .map(|p| CartesianMm::new(p.x_mm * factor, p.y_mm * factor))
        .collect()
}

pub fn write_xy<W: Write>(out: &mut W, points: &[PatternPoint]) -> MotionResult<()> {
    for p in points {
        let c = p.to_cartesian();
        writeln!(out, "({:.3}, {:.3})", c.x_mm, c.y_mm)?;
    }
    Ok(())
}

/// Theta is written in radians.
pub fn write_r_theta<W: Write>(out: &mut W, points: &[PatternPoint]) -> MotionResult<()> {
    for p in points {
        writeln!(out, "({:.3}, {:.3})", p.r, p.theta)?;
    }
    Ok(())
}

fn coordinate_pair(input: &str) -> IResult<&str, (f64, f64)> {
    delimited(
        char('('),
        separated_pair(
            delimited(space0, double, space0),
            char(','),
            delimited(space0, double, space0),
        ),
        char(')'),
    )(input)
}

/// Read back a file written by `write_xy` or `write_r_theta`. Blank lines are skipped.
pub fn parse_coordinate_list(text: &str) -> MotionResult<Vec<(f64, f64)>> {
    let mut pairs = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match coordinate_pair(line) {
            Ok(("", pair)) if pair.0.is_finite() && pair.1.is_finite() => pairs.push(pair),
            _ => {
                return Err(MotionError::InvalidInput(format!(
                    "line {}: expected '(a, b)', got '{}'",
                    idx + 1,
                    line
                )))
            }
        }
    }
    Ok(pairs)
}
