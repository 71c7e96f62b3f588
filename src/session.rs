/// Session bookkeeping for one controller run
///
/// Owns the cumulative step totals, the last move (for undo) and the last
/// known table position. The converter never touches this state; it hands back
/// a `PlannedMove` carrying the totals the session will hold once recorded.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{MotionError, MotionResult};
use crate::kinematics::{self, ConvertedMove, ConverterMode, MachineConfig, MoveCommand, PolarMm};

/// Running sum of every logical command issued since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionTotals {
    pub rotation_steps: i32,
    pub in_out_steps: i32,
}

impl SessionTotals {
    /// Totals once `cmd` is applied; a sum past the i32 range is refused.
    pub fn after(&self, cmd: MoveCommand) -> MotionResult<SessionTotals> {
        match (
            self.rotation_steps.checked_add(cmd.rotation_steps),
            self.in_out_steps.checked_add(cmd.in_out_steps),
        ) {
            (Some(rotation_steps), Some(in_out_steps)) => Ok(SessionTotals { rotation_steps, in_out_steps }),
            _ => Err(MotionError::InvalidInput(format!(
                "totals ({}, {}) + ({}, {}) are out of range",
                self.rotation_steps, self.in_out_steps, cmd.rotation_steps, cmd.in_out_steps
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    Absolute,
    Relative,
    Manual,
    Undo,
    /// Totals set back to a baseline; nothing was sent.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovePhase {
    Idle,
    Validated,
    Sent,
    Recorded,
}

/// A move that passed validation and is ready to send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedMove {
    pub kind: MoveKind,
    pub converted: ConvertedMove,
    pub totals_after: SessionTotals,
    /// Position the table ends up at, when known.
    pub target: Option<PolarMm>,
}

impl PlannedMove {
    pub fn logical(&self) -> MoveCommand {
        self.converted.logical
    }

    pub fn sent(&self) -> MoveCommand {
        self.converted.sent
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    totals: SessionTotals,
    last_move: MoveCommand,
    position: Option<PolarMm>,
    position_before_last: Option<PolarMm>,
    phase: MovePhase,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            totals: SessionTotals::default(),
            last_move: MoveCommand::ZERO,
            position: None,
            position_before_last: None,
            phase: MovePhase::Idle,
        }
    }

    pub fn with_position(position: PolarMm) -> Self {
        Self { position: Some(position), ..Self::new() }
    }

    pub fn totals(&self) -> SessionTotals {
        self.totals
    }

    pub fn last_move(&self) -> MoveCommand {
        self.last_move
    }

    pub fn position(&self) -> Option<PolarMm> {
        self.position
    }

    pub fn phase(&self) -> MovePhase {
        self.phase
    }

    /// Check a converted move against the running total. A rejection leaves
    /// every counter as it was.
    pub fn validate(
        &mut self,
        converted: ConvertedMove,
        kind: MoveKind,
        target: Option<PolarMm>,
        cfg: &MachineConfig,
        mode: &ConverterMode,
    ) -> MotionResult<PlannedMove> {
        self.phase = MovePhase::Idle;
        let totals_after = self.totals.after(converted.logical)?;

        if mode.enforce_limit && !kinematics::limit_check(totals_after.in_out_steps, cfg) {
            let limit = cfg.max_in_out_steps.unwrap_or_default();
            warn!(target: "session",
                  "Rejected {:?} move: in-out total {} + {} exceeds ±{}",
                  kind, self.totals.in_out_steps, converted.logical.in_out_steps, limit);
            return Err(MotionError::StepLimitExceeded {
                current: self.totals.in_out_steps,
                requested: converted.logical.in_out_steps,
                limit,
            });
        }

        self.phase = MovePhase::Validated;
        Ok(PlannedMove { kind, converted, totals_after, target })
    }

    pub fn mark_sent(&mut self) {
        self.phase = MovePhase::Sent;
    }

    /// Commit a move to the books.
    pub fn record(&mut self, planned: &PlannedMove) {
        self.totals = planned.totals_after;
        match planned.kind {
            MoveKind::Undo | MoveKind::Reset => {
                self.last_move = MoveCommand::ZERO;
                self.position_before_last = None;
            }
            _ => {
                self.last_move = planned.logical();
                self.position_before_last = self.position;
            }
        }
        if let Some(target) = planned.target {
            self.position = Some(target);
        }
        self.phase = MovePhase::Recorded;
        debug!(target: "session", "Recorded {:?}: totals rotation={} in-out={}",
               planned.kind, self.totals.rotation_steps, self.totals.in_out_steps);
    }

    /// Plan the inverse of the last recorded move.
    pub fn plan_undo(&mut self, cfg: &MachineConfig) -> MotionResult<PlannedMove> {
        let mut last = self.last_move;
        let inverse = kinematics::undo(&mut last)?;
        if inverse.is_zero() {
            return Err(MotionError::NothingToUndo);
        }
        let converted = ConvertedMove::from_steps(inverse, cfg)?;
        let totals_after = self.totals.after(inverse)?;
        self.phase = MovePhase::Validated;
        Ok(PlannedMove {
            kind: MoveKind::Undo,
            converted,
            totals_after,
            target: self.position_before_last,
        })
    }

    /// Back to a baseline, forgetting the last move.
    pub fn reset(&mut self, baseline: SessionTotals, position: Option<PolarMm>) {
        self.totals = baseline;
        self.last_move = MoveCommand::ZERO;
        self.position = position;
        self.position_before_last = None;
        self.phase = MovePhase::Idle;
    }
}
