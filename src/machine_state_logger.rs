/// Move journal for the sand table
///
/// Appends one JSON line per recorded move (including undos and moves whose
/// transmission failed) so a session can be reconstructed afterwards.
///
/// Event-driven, non-blocking: the controller hands records to a bounded
/// channel and a dedicated writer thread does the file I/O.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MotionError;
use crate::kinematics::MoveCommand;
use crate::session::{MoveKind, PlannedMove, SessionTotals};

const JOURNAL_BUFFER: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub move_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub host: String,
    pub profile: String,
    pub kind: MoveKind,
    pub logical: MoveCommand,
    pub sent: MoveCommand,
    pub totals_after: SessionTotals,
    pub transport_ok: bool,
    pub message: String,
}

impl MoveRecord {
    pub fn new(host: &str, profile: &str, planned: &PlannedMove, transport_errors: &[MotionError]) -> Self {
        let message = transport_errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            move_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            host: host.to_string(),
            profile: profile.to_string(),
            kind: planned.kind,
            logical: planned.logical(),
            sent: planned.sent(),
            totals_after: planned.totals_after,
            transport_ok: transport_errors.is_empty(),
            message,
        }
    }

    /// Entry marking the totals set back to `totals` without a move.
    pub fn baseline(host: &str, profile: &str, totals: SessionTotals) -> Self {
        Self {
            move_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            host: host.to_string(),
            profile: profile.to_string(),
            kind: MoveKind::Reset,
            logical: MoveCommand::ZERO,
            sent: MoveCommand::ZERO,
            totals_after: totals,
            transport_ok: true,
            message: "session reset".to_string(),
        }
    }
}

struct JournalWriter {
    out: BufWriter<File>,
    path: PathBuf,
}

impl JournalWriter {
    fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create journal directory {:?}", dir))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open move journal {:?}", path))?;
        Ok(Self { out: BufWriter::new(file), path: path.to_path_buf() })
    }

    fn append(&mut self, record: &MoveRecord) -> Result<()> {
        serde_json::to_writer(&mut self.out, record).context("Failed to serialise move record")?;
        self.out.write_all(b"\n")?;
        self.out.flush()
            .with_context(|| format!("Failed to flush move journal {:?}", self.path))?;
        Ok(())
    }
}

pub struct MoveJournal {
    write_tx: Option<SyncSender<MoveRecord>>,
    writer: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl std::fmt::Debug for MoveJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoveJournal").field("path", &self.path).finish()
    }
}

impl MoveJournal {
    /// Open (or create) the journal file and start the writer thread.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = JournalWriter::open(&path)?;
        let (write_tx, write_rx) = mpsc::sync_channel(JOURNAL_BUFFER);
        let handle = thread::Builder::new()
            .name("move-journal".into())
            .spawn(move || Self::writer_thread(writer, write_rx))
            .context("Failed to spawn move journal writer")?;
        info!(target: "machine_state_logger", "Move journal at {:?}", path);
        Ok(Self { write_tx: Some(write_tx), writer: Some(handle), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Dedicated writer thread - event-driven, runs until the channel closes
    fn writer_thread(mut writer: JournalWriter, write_rx: Receiver<MoveRecord>) {
        debug!(target: "machine_state_logger", "Journal writer thread started");
        let mut written = 0usize;
        let mut errors = 0usize;
        while let Ok(record) = write_rx.recv() {
            if let Err(e) = writer.append(&record) {
                errors += 1;
                error!(target: "machine_state_logger", "Failed to append move {}: {:#}", record.move_id, e);
            } else {
                written += 1;
            }
        }
        debug!(target: "machine_state_logger", "Journal writer stopped. Written: {}, Errors: {}", written, errors);
    }

    /// Queue a record. Never blocks; a full buffer drops the record.
    pub fn append(&self, record: MoveRecord) {
        let Some(tx) = self.write_tx.as_ref() else { return; };
        match tx.try_send(record) {
            Ok(_) => {}
            Err(TrySendError::Full(r)) => {
                warn!(target: "machine_state_logger", "Journal buffer full - dropping record for move {}", r.move_id);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(target: "machine_state_logger", "Journal writer disconnected");
            }
        }
    }
}

impl Drop for MoveJournal {
    fn drop(&mut self) {
        // Closing the channel lets the writer drain and exit.
        self.write_tx.take();
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

/// Read a journal back, skipping nothing: a malformed line is an error.
pub fn read_journal<P: AsRef<Path>>(path: P) -> Result<Vec<MoveRecord>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open move journal {:?}", path))?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: MoveRecord = serde_json::from_str(&line)
            .with_context(|| format!("Bad journal entry at {:?}:{}", path, idx + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Totals after the most recent entry for `profile`, if the journal has one.
pub fn last_totals<P: AsRef<Path>>(path: P, profile: &str) -> Result<Option<SessionTotals>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    Ok(read_journal(path)?
        .iter()
        .rev()
        .find(|r| r.profile == profile)
        .map(|r| r.totals_after))
}
