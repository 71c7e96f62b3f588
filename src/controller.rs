/// Move controller - one owner for transport, session, position record and journal
///
/// Every move walks Idle -> Validated -> Sent -> Recorded, then opens a settle
/// window while the motors catch up. Only one move is in flight at a time: a new
/// move is refused while the window is open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::arduino_connection::Transport;
use crate::config_loader::ToolProfile;
use crate::error::{MotionError, MotionResult};
use crate::kinematics::{self, CartesianMm, ConvertedMove, MoveCommand, PolarMm};
use crate::machine_state_logger::{last_totals, MoveJournal, MoveRecord};
use crate::position_store::{PersistedPosition, PositionStore};
use crate::session::{MoveKind, MovePhase, PlannedMove, Session, SessionTotals};
use crate::wire;

/// Ends a pending settle wait early. Cloneable and usable from a signal handler.
#[derive(Debug, Clone)]
pub struct SettleHandle {
    tx: Arc<watch::Sender<u64>>,
}

impl SettleHandle {
    /// Wake the waiter. The settle window itself stays open.
    pub fn cancel(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

#[derive(Debug)]
pub struct MoveOutcome {
    pub planned: PlannedMove,
    /// Transport failures while sending; the move was recorded regardless.
    pub transport_errors: Vec<MotionError>,
    /// False when the settle wait was cancelled.
    pub settled: bool,
}

impl MoveOutcome {
    pub fn transport_ok(&self) -> bool {
        self.transport_errors.is_empty()
    }
}

pub struct MoveController<T: Transport> {
    profile_name: String,
    profile: ToolProfile,
    host: String,
    transport: T,
    session: Session,
    store: Option<PositionStore>,
    journal: Option<MoveJournal>,
    settle_until: Option<Instant>,
    settle_tx: Arc<watch::Sender<u64>>,
    settle_rx: watch::Receiver<u64>,
}

impl<T: Transport> MoveController<T> {
    pub fn new(profile_name: &str, profile: ToolProfile, transport: T) -> Self {
        let (settle_tx, settle_rx) = watch::channel(0u64);
        Self {
            profile_name: profile_name.to_string(),
            profile,
            host: crate::config_loader::current_hostname(),
            transport,
            session: Session::new(),
            store: None,
            journal: None,
            settle_until: None,
            settle_tx: Arc::new(settle_tx),
            settle_rx,
        }
    }

    /// Attach the position record and start from the position it holds.
    pub fn with_position_store(mut self, store: PositionStore) -> anyhow::Result<Self> {
        let record = store.load()?;
        info!(target: "controller", "Starting at theta={:.2} in_out={:.2} from {:?}",
              record.theta, record.in_out, store.path());
        self.session = Session::with_position(record.polar());
        self.store = Some(store);
        Ok(self)
    }

    /// Attach the journal and carry on from the totals it last recorded for this profile.
    pub fn with_journal(mut self, journal: MoveJournal) -> anyhow::Result<Self> {
        if let Some(baseline) = last_totals(journal.path(), &self.profile_name)? {
            info!(target: "controller", "Resuming totals rotation={} in-out={} from {:?}",
                  baseline.rotation_steps, baseline.in_out_steps, journal.path());
            self.session.reset(baseline, self.session.position());
        }
        self.journal = Some(journal);
        Ok(self)
    }

    pub fn with_position(mut self, position: PolarMm) -> Self {
        self.session = Session::with_position(position);
        self
    }

    pub fn profile(&self) -> &ToolProfile {
        &self.profile
    }

    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn totals(&self) -> SessionTotals {
        self.session.totals()
    }

    pub fn phase(&self) -> MovePhase {
        self.session.phase()
    }

    pub fn position(&self) -> Option<PolarMm> {
        self.session.position()
    }

    pub fn last_move(&self) -> MoveCommand {
        self.session.last_move()
    }

    pub fn settle_handle(&self) -> SettleHandle {
        SettleHandle { tx: Arc::clone(&self.settle_tx) }
    }

    /// Time left in the current settle window.
    pub fn settle_remaining(&self) -> Duration {
        self.settle_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    /// Sleep out whatever is left of the settle window.
    pub async fn wait_settled(&mut self) {
        if let Some(until) = self.settle_until {
            tokio::time::sleep_until(until).await;
        }
        self.settle_until = None;
    }

    fn ensure_idle(&mut self) -> MotionResult<()> {
        match self.settle_until {
            Some(until) if Instant::now() < until => {
                warn!(target: "controller", "Move refused: previous move settling for another {:?}", until - Instant::now());
                Err(MotionError::MoveInProgress)
            }
            _ => {
                self.settle_until = None;
                Ok(())
            }
        }
    }

    /// Absolute move from the tracked position (home when nothing is tracked).
    pub async fn goto(&mut self, target: PolarMm) -> MotionResult<MoveOutcome> {
        self.ensure_idle()?;
        let current = self
            .session
            .position()
            .unwrap_or_else(|| PersistedPosition::home().polar());
        // The start may sit outside the annulus (home is at 185 mm); only the target is checked.
        if let Some(bounds) = &self.profile.workspace {
            bounds.check(target.radius_mm)?;
        }
        let converted = kinematics::convert(current, target, &self.profile.machine, &self.profile.mode, None)?;
        debug!(target: "controller", "goto {:?} -> {:?}: {:?}", current, target, converted.logical);
        self.run(converted, MoveKind::Absolute, Some(target)).await
    }

    /// Relative point-to-point move between two Cartesian points.
    pub async fn line(&mut self, start: CartesianMm, end: CartesianMm) -> MotionResult<MoveOutcome> {
        self.ensure_idle()?;
        let start_polar = kinematics::to_polar(start.x_mm, start.y_mm);
        let end_polar = kinematics::to_polar(end.x_mm, end.y_mm);
        let converted = kinematics::convert(
            start_polar,
            end_polar,
            &self.profile.machine,
            &self.profile.mode,
            self.profile.workspace.as_ref(),
        )?;
        debug!(target: "controller", "line {:?} -> {:?}: {:?}", start_polar, end_polar, converted.logical);
        self.run(converted, MoveKind::Relative, Some(end_polar)).await
    }

    /// Chain relative moves through `points`. Stops at the first rejection, or
    /// before the next move once `stop` is set.
    pub async fn run_path(&mut self, points: &[CartesianMm], stop: &AtomicBool) -> MotionResult<Vec<MoveOutcome>> {
        let mut outcomes = Vec::with_capacity(points.len().saturating_sub(1));
        for (idx, pair) in points.windows(2).enumerate() {
            if stop.load(Ordering::SeqCst) {
                info!(target: "controller", "Path stopped after {} of {} moves", idx, points.len() - 1);
                break;
            }
            // A cancelled settle wait leaves the window open; a path keeps its pace.
            self.wait_settled().await;
            let outcome = self.line(pair[0], pair[1]).await.map_err(|e| {
                warn!(target: "controller", "Path aborted at move {}: {}", idx + 1, e);
                e
            })?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Raw step move. The tracked position is left as it was.
    pub async fn manual(&mut self, cmd: MoveCommand) -> MotionResult<MoveOutcome> {
        self.ensure_idle()?;
        let converted = ConvertedMove::from_steps(cmd, &self.profile.machine)?;
        self.run(converted, MoveKind::Manual, None).await
    }

    pub async fn undo(&mut self) -> MotionResult<MoveOutcome> {
        self.ensure_idle()?;
        let planned = self.session.plan_undo(&self.profile.machine).map_err(|e| {
            info!(target: "controller", "{}", e);
            e
        })?;
        self.execute(planned).await
    }

    /// Zero the totals, forget the last move and put the position record back home.
    /// The zero baseline is journalled so later runs start from it.
    pub fn reset(&mut self) -> anyhow::Result<()> {
        let position = match &self.store {
            Some(store) => Some(store.reset()?.polar()),
            None => None,
        };
        self.session.reset(SessionTotals::default(), position);
        if let Some(journal) = &self.journal {
            journal.append(MoveRecord::baseline(&self.host, &self.profile_name, SessionTotals::default()));
        }
        self.settle_until = None;
        info!(target: "controller", "Session reset");
        Ok(())
    }

    async fn run(&mut self, converted: ConvertedMove, kind: MoveKind, target: Option<PolarMm>) -> MotionResult<MoveOutcome> {
        let planned = self
            .session
            .validate(converted, kind, target, &self.profile.machine, &self.profile.mode)?;
        self.execute(planned).await
    }

    async fn execute(&mut self, planned: PlannedMove) -> MotionResult<MoveOutcome> {
        let lines = wire::encode(planned.sent(), self.profile.wire_format);
        let mut transport_errors = Vec::new();

        if lines.is_empty() {
            debug!(target: "controller", "Zero move, nothing to send");
        } else if !self.transport.is_connected() {
            warn!(target: "controller", "No connection to the table; {} line(s) not sent", lines.len());
            transport_errors.push(MotionError::TransportUnavailable);
        } else {
            let pre_send = self.profile.timing.pre_send();
            if !pre_send.is_zero() {
                tokio::time::sleep(pre_send).await;
            }
            // Each axis is written independently; one failing does not hold back the other.
            for line in &lines {
                if let Err(e) = self.transport.write_command(line) {
                    error!(target: "controller", "Failed to send '{}': {}", line.to_string().trim_end(), e);
                    transport_errors.push(e);
                }
            }
        }
        self.session.mark_sent();

        // Bookkeeping follows the request even when the transport failed.
        self.session.record(&planned);
        if let (Some(store), Some(target)) = (&self.store, planned.target) {
            if let Err(e) = store.save(target) {
                error!(target: "controller", "Failed to persist position: {:#}", e);
            }
        }
        if let Some(journal) = &self.journal {
            journal.append(MoveRecord::new(&self.host, &self.profile_name, &planned, &transport_errors));
        }
        let totals = self.session.totals();
        info!(target: "controller", "{:?} move {:?} recorded, totals rotation={} in-out={}",
              planned.kind, planned.logical(), totals.rotation_steps, totals.in_out_steps);

        let settled = if lines.is_empty() { true } else { self.settle().await };
        Ok(MoveOutcome { planned, transport_errors, settled })
    }

    async fn settle(&mut self) -> bool {
        let duration = self.profile.timing.settle();
        if duration.is_zero() {
            return true;
        }
        let deadline = Instant::now() + duration;
        self.settle_until = Some(deadline);
        let mut cancel_rx = self.settle_rx.clone();
        cancel_rx.borrow_and_update();
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                self.settle_until = None;
                true
            }
            _ = cancel_rx.changed() => {
                info!(target: "controller", "Settle wait cancelled, {:?} left in window", self.settle_remaining());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arduino_connection::RecordingTransport;
    use crate::config_loader::TimingSettings;
    use crate::kinematics::{ConverterMode, MachineConfig, WorkspaceBounds};
    use crate::wire::WireFormat;

    fn lin_rot() -> ToolProfile {
        ToolProfile {
            mode: ConverterMode::ABSOLUTE_TARGET,
            workspace: None,
            timing: TimingSettings::IMMEDIATE,
            ..ToolProfile::reference()
        }
    }

    fn point_to_point() -> ToolProfile {
        ToolProfile {
            machine: MachineConfig { rotation_deg_per_step: 0.0675, max_in_out_steps: None, invert_wiring: true, ..MachineConfig::reference() },
            mode: ConverterMode::RELATIVE_MOVE,
            workspace: Some(WorkspaceBounds::default()),
            timing: TimingSettings::IMMEDIATE,
            ..ToolProfile::reference()
        }
    }

    fn controller(profile: ToolProfile) -> MoveController<RecordingTransport> {
        MoveController::new("test", profile, RecordingTransport::new())
    }

    #[tokio::test]
    async fn test_goto_sends_truncated_steps() {
        let mut ctl = controller(lin_rot());
        let outcome = ctl.goto(PolarMm::new(90.0, 75.0)).await.unwrap();
        assert!(outcome.transport_ok());
        assert!(outcome.settled);
        assert_eq!(ctl.transport().text(), "r 1325\ni -4049\n");
        assert_eq!(ctl.totals(), SessionTotals { rotation_steps: 1325, in_out_steps: -4049 });
        assert_eq!(ctl.phase(), MovePhase::Recorded);
        assert_eq!(ctl.position(), Some(PolarMm::new(90.0, 75.0)));
    }

    #[tokio::test]
    async fn test_goto_same_position_sends_nothing() {
        let mut ctl = controller(lin_rot()).with_position(PolarMm::new(45.0, 100.0));
        let outcome = ctl.goto(PolarMm::new(45.0, 100.0)).await.unwrap();
        assert!(outcome.planned.logical().is_zero());
        assert!(ctl.transport().lines().is_empty());
    }

    #[tokio::test]
    async fn test_line_wraps_and_inverts_wiring() {
        let mut ctl = controller(point_to_point());
        let start = kinematics::to_cartesian(PolarMm::new(170.0, 100.0));
        let end = kinematics::to_cartesian(PolarMm::new(-170.0, 100.0));
        let outcome = ctl.line(start, end).await.unwrap();
        assert_eq!(outcome.planned.logical(), MoveCommand::new(296, -94));
        assert_eq!(ctl.transport().text(), "r -296\ni 94\n");
        assert_eq!(ctl.totals(), SessionTotals { rotation_steps: 296, in_out_steps: -94 });
    }

    #[tokio::test]
    async fn test_combined_move_format() {
        let mut ctl = controller(ToolProfile { wire_format: WireFormat::CombinedMove, ..lin_rot() });
        ctl.manual(MoveCommand::new(0, 12)).await.unwrap();
        assert_eq!(ctl.transport().text(), "MOVE 0 12\n");
    }

    #[tokio::test]
    async fn test_workspace_violation_sends_nothing() {
        let mut ctl = controller(point_to_point());
        let err = ctl
            .line(CartesianMm::new(100.0, 0.0), CartesianMm::new(25.0, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, MotionError::WorkspaceViolation { .. }));
        assert!(ctl.transport().lines().is_empty());
        assert_eq!(ctl.totals(), SessionTotals::default());
        assert_eq!(ctl.phase(), MovePhase::Idle);
    }

    #[tokio::test]
    async fn test_step_limit_rejects_before_sending() {
        let mut profile = lin_rot();
        profile.mode.enforce_limit = true;
        let mut ctl = controller(profile);
        ctl.manual(MoveCommand::new(0, 4000)).await.unwrap();
        let err = ctl.manual(MoveCommand::new(0, 300)).await.unwrap_err();
        assert!(matches!(err, MotionError::StepLimitExceeded { current: 4000, requested: 300, limit: 4280 }));
        assert_eq!(ctl.transport().lines().len(), 1);
        assert_eq!(ctl.totals().in_out_steps, 4000);
    }

    #[tokio::test]
    async fn test_transport_failure_still_records() {
        let mut ctl = MoveController::new("test", lin_rot(), RecordingTransport::failing());
        let outcome = ctl.manual(MoveCommand::new(10, 20)).await.unwrap();
        assert_eq!(outcome.transport_errors.len(), 2);
        assert!(outcome.transport_errors.iter().all(|e| e.is_transport()));
        assert_eq!(ctl.totals(), SessionTotals { rotation_steps: 10, in_out_steps: 20 });

        let mut ctl = MoveController::new("test", lin_rot(), RecordingTransport::disconnected());
        let outcome = ctl.manual(MoveCommand::new(10, 20)).await.unwrap();
        assert!(matches!(outcome.transport_errors.as_slice(), [MotionError::TransportUnavailable]));
        assert_eq!(ctl.last_move(), MoveCommand::new(10, 20));
    }

    #[tokio::test]
    async fn test_undo_twice() {
        let mut ctl = controller(point_to_point());
        ctl.manual(MoveCommand::new(50, -20)).await.unwrap();
        let undo = ctl.undo().await.unwrap();
        assert_eq!(undo.planned.logical(), MoveCommand::new(-50, 20));
        assert_eq!(ctl.transport().text(), "r -50\ni 20\nr 50\ni -20\n");
        assert_eq!(ctl.totals(), SessionTotals::default());

        assert!(matches!(ctl.undo().await, Err(MotionError::NothingToUndo)));
        assert_eq!(ctl.totals(), SessionTotals::default());
        assert_eq!(ctl.transport().lines().len(), 4);
    }

    #[tokio::test]
    async fn test_run_path_and_stop_flag() {
        let mut ctl = controller(point_to_point());
        let points = [
            CartesianMm::new(100.0, 0.0),
            CartesianMm::new(0.0, 100.0),
            CartesianMm::new(-100.0, 0.0),
        ];
        let outcomes = ctl.run_path(&points, &AtomicBool::new(false)).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(ctl.totals().rotation_steps, outcomes.iter().map(|o| o.planned.logical().rotation_steps).sum::<i32>());

        let mut ctl = controller(point_to_point());
        let outcomes = ctl.run_path(&points, &AtomicBool::new(true)).await.unwrap();
        assert!(outcomes.is_empty());
        assert!(ctl.transport().lines().is_empty());
    }

    #[tokio::test]
    async fn test_run_path_stops_at_rejection() {
        let mut ctl = controller(point_to_point());
        let points = [
            CartesianMm::new(100.0, 0.0),
            CartesianMm::new(0.0, 100.0),
            CartesianMm::new(0.0, 10.0),
            CartesianMm::new(0.0, 120.0),
        ];
        let err = ctl.run_path(&points, &AtomicBool::new(false)).await.unwrap_err();
        assert!(matches!(err, MotionError::WorkspaceViolation { .. }));
        assert_eq!(ctl.position(), Some(kinematics::to_polar(0.0, 100.0)));
    }

    #[tokio::test]
    async fn test_cancelled_settle_keeps_window_open() {
        let profile = ToolProfile {
            timing: TimingSettings { pre_send_ms: 0, settle_ms: 60_000 },
            ..lin_rot()
        };
        let mut ctl = controller(profile);
        let handle = ctl.settle_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });
        let outcome = ctl.manual(MoveCommand::new(5, 5)).await.unwrap();
        assert!(!outcome.settled);
        assert!(ctl.settle_remaining() > Duration::ZERO);

        let err = ctl.manual(MoveCommand::new(1, 1)).await.unwrap_err();
        assert!(matches!(err, MotionError::MoveInProgress));
        assert_eq!(ctl.totals(), SessionTotals { rotation_steps: 5, in_out_steps: 5 });

        ctl.reset().unwrap();
        assert_eq!(ctl.settle_remaining(), Duration::ZERO);
        assert_eq!(ctl.totals(), SessionTotals::default());
    }

    #[tokio::test]
    async fn test_position_store_follows_moves() {
        let path = std::env::temp_dir().join(format!("psamathe_ctl_{}.json", uuid::Uuid::new_v4()));
        let store = PositionStore::open(&path).unwrap();
        let mut ctl = controller(lin_rot()).with_position_store(store).unwrap();
        assert_eq!(ctl.position(), Some(PolarMm::new(0.0, 185.0)));

        ctl.goto(PolarMm::new(90.0, 75.0)).await.unwrap();
        let reopened = PositionStore::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap().polar(), PolarMm::new(90.0, 75.0));

        ctl.reset().unwrap();
        assert_eq!(reopened.load().unwrap().polar(), PolarMm::new(0.0, 185.0));
        assert_eq!(ctl.position(), Some(PolarMm::new(0.0, 185.0)));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_step_limit_holds_across_runs() {
        let path = std::env::temp_dir().join(format!("psamathe_ctl_{}.jsonl", uuid::Uuid::new_v4()));
        let mut profile = lin_rot();
        profile.mode.enforce_limit = true;
        {
            let mut ctl = controller(profile.clone()).with_journal(MoveJournal::open(&path).unwrap()).unwrap();
            ctl.manual(MoveCommand::new(0, 4000)).await.unwrap();
        }

        let mut ctl = controller(profile.clone()).with_journal(MoveJournal::open(&path).unwrap()).unwrap();
        assert_eq!(ctl.totals(), SessionTotals { rotation_steps: 0, in_out_steps: 4000 });
        let err = ctl.manual(MoveCommand::new(0, 300)).await.unwrap_err();
        assert!(matches!(err, MotionError::StepLimitExceeded { current: 4000, requested: 300, limit: 4280 }));
        assert!(ctl.transport().lines().is_empty());

        ctl.reset().unwrap();
        drop(ctl);
        let mut ctl = controller(profile).with_journal(MoveJournal::open(&path).unwrap()).unwrap();
        assert_eq!(ctl.totals(), SessionTotals::default());
        ctl.manual(MoveCommand::new(0, 300)).await.unwrap();
        assert_eq!(ctl.totals().in_out_steps, 300);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_unreversible_manual_move_is_refused() {
        let mut ctl = controller(lin_rot());
        let err = ctl.manual(MoveCommand::new(i32::MIN, 0)).await.unwrap_err();
        assert!(matches!(err, MotionError::InvalidInput(_)));
        assert!(ctl.transport().lines().is_empty());
        assert!(matches!(ctl.undo().await, Err(MotionError::NothingToUndo)));
    }

    #[tokio::test]
    async fn test_huge_goto_is_refused() {
        let mut ctl = controller(lin_rot());
        let err = ctl.goto(PolarMm::new(0.0, 1e12)).await.unwrap_err();
        assert!(matches!(err, MotionError::InvalidInput(_)));
        assert!(ctl.transport().lines().is_empty());
        assert_eq!(ctl.totals(), SessionTotals::default());
    }
}
