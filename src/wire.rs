/// Device wire formats
///
/// The table firmware reads plain ASCII lines and never answers:
/// - per-axis: `r <steps>\n` / `i <steps>\n`, one line per moving axis
/// - combined: `MOVE <thetaSteps> <rSteps>\n`, used by the pattern stepper firmware

use std::fmt;

use nom::branch::alt;
use nom::character::complete::{char, digit1, line_ending, one_of, space0, space1};
use nom::bytes::complete::tag;
use nom::combinator::{all_consuming, map, map_res, opt, recognize, value};
use nom::sequence::{pair, preceded, terminated, tuple};
use nom::IResult;
use serde::{Deserialize, Serialize};

use crate::error::{MotionError, MotionResult};
use crate::kinematics::MoveCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    Rotation,
    InOut,
}

impl Axis {
    pub fn code(self) -> char {
        match self {
            Axis::Rotation => 'r',
            Axis::InOut => 'i',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    #[default]
    AxisLines,
    CombinedMove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCommand {
    Axis { axis: Axis, steps: i32 },
    Move { theta_steps: i32, r_steps: i32 },
}

impl fmt::Display for WireCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireCommand::Axis { axis, steps } => writeln!(f, "{} {}", axis.code(), steps),
            WireCommand::Move { theta_steps, r_steps } => writeln!(f, "MOVE {} {}", theta_steps, r_steps),
        }
    }
}

/// Lines to write for one move. A zero move writes nothing.
pub fn encode(cmd: MoveCommand, format: WireFormat) -> Vec<WireCommand> {
    match format {
        WireFormat::AxisLines => {
            let mut lines = Vec::with_capacity(2);
            if cmd.rotation_steps != 0 {
                lines.push(WireCommand::Axis { axis: Axis::Rotation, steps: cmd.rotation_steps });
            }
            if cmd.in_out_steps != 0 {
                lines.push(WireCommand::Axis { axis: Axis::InOut, steps: cmd.in_out_steps });
            }
            lines
        }
        WireFormat::CombinedMove => {
            if cmd.is_zero() {
                Vec::new()
            } else {
                vec![WireCommand::Move {
                    theta_steps: cmd.rotation_steps,
                    r_steps: cmd.in_out_steps,
                }]
            }
        }
    }
}

fn signed_steps(input: &str) -> IResult<&str, i32> {
    map_res(recognize(pair(opt(one_of("+-")), digit1)), str::parse::<i32>)(input)
}

fn axis(input: &str) -> IResult<&str, Axis> {
    alt((value(Axis::Rotation, char('r')), value(Axis::InOut, char('i'))))(input)
}

fn axis_line(input: &str) -> IResult<&str, WireCommand> {
    map(
        tuple((axis, space1, signed_steps)),
        |(axis, _, steps)| WireCommand::Axis { axis, steps },
    )(input)
}

fn move_line(input: &str) -> IResult<&str, WireCommand> {
    map(
        tuple((tag("MOVE"), preceded(space1, signed_steps), preceded(space1, signed_steps))),
        |(_, theta_steps, r_steps)| WireCommand::Move { theta_steps, r_steps },
    )(input)
}

/// Parse one device line, as written by [`WireCommand`]'s `Display`.
pub fn parse_line(text: &str) -> MotionResult<WireCommand> {
    let mut parser = all_consuming(terminated(
        alt((move_line, axis_line)),
        pair(space0, opt(line_ending)),
    ));
    parser(text)
        .map(|(_, cmd)| cmd)
        .map_err(|e| MotionError::InvalidInput(format!("unrecognised device line {:?}: {}", text, e)))
}

/// Sum a stream of device lines back into the step totals they command.
pub fn replay(lines: &[WireCommand]) -> MoveCommand {
    lines.iter().fold(MoveCommand::ZERO, |acc, line| match *line {
        WireCommand::Axis { axis: Axis::Rotation, steps } => {
            MoveCommand::new(acc.rotation_steps + steps, acc.in_out_steps)
        }
        WireCommand::Axis { axis: Axis::InOut, steps } => {
            MoveCommand::new(acc.rotation_steps, acc.in_out_steps + steps)
        }
        WireCommand::Move { theta_steps, r_steps } => {
            MoveCommand::new(acc.rotation_steps + theta_steps, acc.in_out_steps + r_steps)
        }
    })
}
