//! File-backed background job records
//!
//! One JSON file per job under the jobs directory. Writes go through a
//! temporary file and a rename so readers never see a partial record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid job id: {0}")]
    InvalidId(String),
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt job record: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,
    #[serde(default)]
    pub meta: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ids are restricted to `[A-Za-z0-9_-]`
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, JobError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> Result<PathBuf, JobError> {
        if !is_valid_id(id) {
            return Err(JobError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    fn write(&self, id: &str, record: &JobRecord) -> Result<(), JobError> {
        let path = self.path(id)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", id));
        fs::write(&tmp, serde_json::to_vec(record)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// New pending job; returns its id
    pub fn create(&self, meta: Value) -> Result<String, JobError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        self.write(
            &id,
            &JobRecord {
                status: JobStatus::Pending,
                meta,
                result: None,
                error: None,
                created_at: now,
                updated_at: now,
            },
        )?;
        info!(job_id = %id, "🧵 Job created");
        Ok(id)
    }

    /// `None` for unknown ids
    pub fn get(&self, id: &str) -> Result<Option<JobRecord>, JobError> {
        let path = self.path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut JobRecord)) -> Result<(), JobError> {
        let mut record = self
            .get(id)?
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        f(&mut record);
        record.updated_at = Utc::now();
        self.write(id, &record)
    }

    pub fn complete(&self, id: &str, result: Value) -> Result<(), JobError> {
        self.update(id, |r| {
            r.status = JobStatus::Done;
            r.result = Some(result);
            r.error = None;
        })?;
        debug!(job_id = %id, "Job done");
        Ok(())
    }

    pub fn fail(&self, id: &str, error: &str) -> Result<(), JobError> {
        self.update(id, |r| {
            r.status = JobStatus::Failed;
            r.error = Some(error.to_string());
        })?;
        debug!(job_id = %id, error, "Job failed");
        Ok(())
    }
}
