/// Last known absolute table position, kept in a single JSON record
///
/// The record is created with the home position the first time the store is
/// opened and is overwritten whole after every accepted move.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::kinematics::PolarMm;

const RECORD_ID: u32 = 1;
pub const HOME_THETA_DEG: f64 = 0.0;
pub const HOME_IN_OUT_MM: f64 = 185.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistedPosition {
    pub id: u32,
    pub theta: f64,
    pub in_out: f64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PersistedPosition {
    pub fn home() -> Self {
        Self { id: RECORD_ID, theta: HOME_THETA_DEG, in_out: HOME_IN_OUT_MM, updated_at: None }
    }

    pub fn polar(&self) -> PolarMm {
        PolarMm::new(self.theta, self.in_out)
    }
}

impl Default for PersistedPosition {
    fn default() -> Self {
        Self::home()
    }
}

#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    /// Open the store, writing the home record if the file does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self { path: path.as_ref().to_path_buf() };
        if !store.path.exists() {
            info!(target: "position_store", "No position record at {:?}, creating home record", store.path);
            store.write(&PersistedPosition::home())?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<PersistedPosition> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read position record {:?}", self.path))?;
        let record: PersistedPosition = serde_json::from_str(&text)
            .with_context(|| format!("Corrupt position record {:?}", self.path))?;
        if record.id != RECORD_ID {
            return Err(anyhow!("Unexpected position record id {} in {:?}", record.id, self.path));
        }
        Ok(record)
    }

    pub fn save(&self, position: PolarMm) -> Result<PersistedPosition> {
        let record = PersistedPosition {
            id: RECORD_ID,
            theta: position.theta_deg,
            in_out: position.radius_mm,
            updated_at: Some(Utc::now()),
        };
        self.write(&record)?;
        debug!(target: "position_store", "Saved position theta={:.2} in_out={:.2}", record.theta, record.in_out);
        Ok(record)
    }

    pub fn reset(&self) -> Result<PersistedPosition> {
        let record = PersistedPosition { updated_at: Some(Utc::now()), ..PersistedPosition::home() };
        self.write(&record)?;
        info!(target: "position_store", "Position record reset to home");
        Ok(record)
    }

    // Replace the file in one rename so a crash never leaves half a record.
    fn write(&self, record: &PersistedPosition) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create directory {:?}", dir))?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(record)?;
        fs::write(&tmp, text).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace position record {:?}", self.path))?;
        Ok(())
    }
}
