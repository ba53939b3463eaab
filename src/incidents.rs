//! Incident ledger.
//!
//! Every incident is one JSON object per line in an append-only file. An
//! update appends the full revised record; on load later lines for the same
//! id replace earlier ones. The in-memory index holds the recent window and is
//! keyed by id, so an update costs one lookup and one append.
//!
//! The index mutex is held only for in-memory work. File appends serialize on
//! a separate writer mutex, taken before the index lock is released so lines
//! land in the same order as index updates. Several processes appending to
//! the same file need an external lock.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::parsing::round2;
use crate::types::{Action, ActionKind, ActionOutcome, Issue, IssueKind, Severity};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("incident log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode incident: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Issue as captured at log time. Never rewritten afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
    pub resource: String,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
}

impl From<&Issue> for IssueRecord {
    fn from(issue: &Issue) -> Self {
        Self {
            kind: issue.kind,
            severity: issue.severity,
            message: issue.message.clone(),
            resource: issue.resource.clone(),
            value: issue.value,
            threshold: issue.threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub target: String,
    pub details: serde_json::Value,
}

impl From<&Action> for ActionRecord {
    fn from(action: &Action) -> Self {
        Self {
            kind: action.kind(),
            target: action.target().to_string(),
            details: action.details(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub issue: IssueRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Filters for `IncidentLedger::query`. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct IncidentQuery {
    pub hours: Option<i64>,
    pub severity: Option<Severity>,
    pub issue_type: Option<IssueKind>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentStats {
    pub total_incidents: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    /// Percentage of resolved incidents that succeeded; pending ones are excluded.
    pub success_rate: f64,
    pub avg_resolution_time_ms: f64,
    pub period_hours: i64,
}

#[derive(Debug, Default)]
struct LedgerIndex {
    incidents: Vec<Incident>,
    by_id: HashMap<String, usize>,
}

impl LedgerIndex {
    fn upsert(&mut self, incident: Incident) {
        match self.by_id.get(&incident.id) {
            Some(&pos) => self.incidents[pos] = incident,
            None => {
                self.by_id.insert(incident.id.clone(), self.incidents.len());
                self.incidents.push(incident);
            }
        }
    }

    fn retain_since(&mut self, cutoff: DateTime<Utc>) {
        self.incidents.retain(|i| i.timestamp > cutoff);
        self.by_id = self
            .incidents
            .iter()
            .enumerate()
            .map(|(pos, i)| (i.id.clone(), pos))
            .collect();
    }
}

pub struct IncidentLedger {
    path: PathBuf,
    index: Mutex<LedgerIndex>,
    writer: Mutex<()>,
}

impl IncidentLedger {
    /// Open (creating if needed) the log at `path` and load the last
    /// `retention_hours` of incidents into memory.
    pub fn open(path: impl Into<PathBuf>, retention_hours: i64) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LedgerError::Io { path: path.clone(), source })?;

        let mut index = read_log(&path)?;
        index.retain_since(Utc::now() - Duration::hours(retention_hours));
        info!(path = %path.display(), loaded = index.incidents.len(), "Incident ledger opened");

        Ok(Self {
            path,
            index: Mutex::new(index),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.lock().incidents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record an issue with its optional action and outcome.
    ///
    /// An action without an outcome is stored with the `pending` result. A
    /// failed append is logged and the incident stays in memory.
    pub fn log(&self, issue: &Issue, action: Option<&Action>, result: Option<&ActionOutcome>) -> Incident {
        let result = match (action, result) {
            (_, Some(r)) => Some(r.clone()),
            (Some(_), None) => Some(ActionOutcome::pending()),
            (None, None) => None,
        };
        let incident = Incident {
            id: new_incident_id(),
            timestamp: Utc::now(),
            issue: IssueRecord::from(issue),
            action: action.map(ActionRecord::from),
            result,
            updated_at: None,
        };

        let mut index = self.lock();
        index.upsert(incident.clone());
        let _writer = self.lock_writer();
        drop(index);

        if let Err(e) = self.append(&incident) {
            error!(id = %incident.id, error = %e, "Error writing incident to log");
        }
        info!(id = %incident.id, issue = %incident.issue.kind, "Logged incident");
        incident
    }

    /// Replace the result of an incident. Returns false if the id is unknown.
    pub fn update(&self, id: &str, result: ActionOutcome) -> bool {
        let mut index = self.lock();
        let Some(&pos) = index.by_id.get(id) else {
            return false;
        };
        let incident = &mut index.incidents[pos];
        incident.result = Some(result);
        incident.updated_at = Some(Utc::now());
        let revised = incident.clone();
        let _writer = self.lock_writer();
        drop(index);

        if let Err(e) = self.append(&revised) {
            error!(id, error = %e, "Error appending incident update");
        }
        true
    }

    pub fn get(&self, id: &str) -> Option<Incident> {
        let index = self.lock();
        index.by_id.get(id).map(|&pos| index.incidents[pos].clone())
    }

    /// Filter, sort newest first, then truncate.
    pub fn query(&self, q: &IncidentQuery) -> Vec<Incident> {
        let cutoff = q.hours.filter(|h| *h > 0).map(|h| Utc::now() - Duration::hours(h));

        let mut filtered: Vec<Incident> = self
            .lock()
            .incidents
            .iter()
            .filter(|i| cutoff.map_or(true, |c| i.timestamp > c))
            .filter(|i| q.severity.map_or(true, |s| i.issue.severity == s))
            .filter(|i| q.issue_type.map_or(true, |t| i.issue.kind == t))
            .cloned()
            .collect();

        // Reverse first so equal timestamps keep newest-logged first under the stable sort
        filtered.reverse();
        filtered.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        if let Some(limit) = q.limit.filter(|l| *l > 0) {
            filtered.truncate(limit);
        }
        filtered
    }

    pub fn stats(&self, hours: i64) -> IncidentStats {
        let incidents = self.query(&IncidentQuery {
            hours: Some(hours),
            ..Default::default()
        });

        let mut by_severity = BTreeMap::new();
        let mut by_type = BTreeMap::new();
        for incident in &incidents {
            *by_severity.entry(incident.issue.severity.to_string()).or_insert(0) += 1;
            *by_type.entry(incident.issue.kind.to_string()).or_insert(0) += 1;
        }

        let resolved: Vec<bool> = incidents
            .iter()
            .filter_map(|i| i.result.as_ref()?.success)
            .collect();
        let success_rate = if resolved.is_empty() {
            0.0
        } else {
            let succeeded = resolved.iter().filter(|s| **s).count();
            round2(succeeded as f64 / resolved.len() as f64 * 100.0)
        };

        let durations: Vec<f64> = incidents
            .iter()
            .filter_map(|i| i.result.as_ref()?.duration_ms)
            .collect();
        let avg_resolution_time_ms = if durations.is_empty() {
            0.0
        } else {
            round2(durations.iter().sum::<f64>() / durations.len() as f64)
        };

        IncidentStats {
            total_incidents: incidents.len(),
            by_severity,
            by_type,
            success_rate,
            avg_resolution_time_ms,
            period_hours: hours,
        }
    }

    pub fn recent_timeline(&self, count: usize) -> Vec<Incident> {
        self.query(&IncidentQuery {
            limit: Some(count),
            ..Default::default()
        })
    }

    /// Rewrite the log with one line per incident id, dropping superseded
    /// revisions. Returns the number of records kept.
    pub fn compact(&self) -> Result<usize, LedgerError> {
        let _writer = self.lock_writer();
        let folded = read_log(&self.path)?;

        let tmp = self.path.with_extension("compact.tmp");
        let io_err = |source| LedgerError::Io { path: tmp.clone(), source };
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        for incident in &folded.incidents {
            let mut line = serde_json::to_string(incident)?;
            line.push('\n');
            file.write_all(line.as_bytes()).map_err(io_err)?;
        }
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })?;

        info!(records = folded.incidents.len(), "Compacted incident log");
        Ok(folded.incidents.len())
    }

    fn append(&self, incident: &Incident) -> Result<(), LedgerError> {
        let mut line = serde_json::to_string(incident)?;
        line.push('\n');
        let io_err = |source| LedgerError::Io { path: self.path.clone(), source };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).map_err(io_err)
    }

    fn lock(&self) -> MutexGuard<'_, LedgerIndex> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fold the log by id. Lines that are not UTF-8 or not an incident are skipped.
fn read_log(path: &Path) -> Result<LedgerIndex, LedgerError> {
    let io_err = |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(fs::File::open(path).map_err(io_err)?);

    let mut index = LedgerIndex::default();
    let mut skipped = 0usize;
    for raw in reader.split(b'\n') {
        let raw = raw.map_err(io_err)?;
        let Ok(line) = std::str::from_utf8(&raw) else {
            skipped += 1;
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Incident>(line) {
            Ok(incident) => index.upsert(incident),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, "Skipped unreadable incident lines");
    }
    Ok(index)
}

fn new_incident_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
