//! Flat-file persistence: `reports/<KEY>.json` holds the current report,
//! `history/<KEY>.jsonl` every report ever saved, `exports/<KEY>.csv` the
//! current rows, and `master.csv` the fleet table.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::StoreError;
use crate::export::{self, TabularRow};
use crate::models::DiagnosticReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub entry_id: Uuid,
    pub revision: u32,
    pub recorded_at: DateTime<Utc>,
    pub report: DiagnosticReport,
}

#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn for_equipment(&self, equipment_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(equipment_id.to_string()).or_default())
    }
}

/// Writers for one equipment must hold its lock from [`ReportRepository::locks`].
pub trait ReportRepository {
    fn locks(&self) -> &LockRegistry;

    /// Appends to history and makes `report` the current one.
    fn save(&self, report: &DiagnosticReport) -> Result<HistoryEntry, StoreError>;

    /// Appends to history only.
    fn archive(&self, report: &DiagnosticReport) -> Result<HistoryEntry, StoreError>;

    fn load(&self, equipment_id: &str) -> Result<Option<DiagnosticReport>, StoreError>;

    fn current(&self) -> Result<Vec<DiagnosticReport>, StoreError>;

    fn history(&self, equipment_id: &str) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Drops the current report. History is kept.
    fn remove(&self, equipment_id: &str) -> Result<bool, StoreError>;
}

pub trait MasterTable {
    fn replace_rows(&self, equipment_id: &str, rows: &[TabularRow]) -> Result<(), StoreError>;

    fn remove_rows(&self, equipment_id: &str) -> Result<usize, StoreError>;

    fn rows(&self) -> Result<Vec<TabularRow>, StoreError>;
}

#[derive(Debug)]
pub struct FlatFileStore {
    root: PathBuf,
    locks: LockRegistry,
    master: RwLock<()>,
}

impl FlatFileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in ["reports", "history", "exports"] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|source| StoreError::io(&path, source))?;
        }
        tracing::debug!(root = %root.display(), "opened flat-file store");
        Ok(Self {
            root,
            locks: LockRegistry::default(),
            master: RwLock::new(()),
        })
    }

    pub fn master_path(&self) -> PathBuf {
        self.root.join("master.csv")
    }

    fn keyed_path(&self, dir: &str, equipment_id: &str, ext: &str) -> Result<PathBuf, StoreError> {
        let key = storage_key(equipment_id)?;
        Ok(self.root.join(dir).join(format!("{key}.{ext}")))
    }

    pub fn write_export(
        &self,
        equipment_id: &str,
        rows: &[TabularRow],
    ) -> Result<PathBuf, StoreError> {
        let path = self.keyed_path("exports", equipment_id, "csv")?;
        let bytes = csv_bytes(&path, rows)?;
        write_atomic(&path, &bytes)?;
        Ok(path)
    }

    pub fn remove_export(&self, equipment_id: &str) -> Result<bool, StoreError> {
        remove_if_present(&self.keyed_path("exports", equipment_id, "csv")?)
    }

    fn append_history(&self, report: &DiagnosticReport) -> Result<HistoryEntry, StoreError> {
        let path = self.keyed_path("history", &report.equipment_id, "jsonl")?;
        let revision = self.history(&report.equipment_id)?.len() as u32 + 1;
        let entry = HistoryEntry {
            entry_id: Uuid::new_v4(),
            revision,
            recorded_at: Utc::now(),
            report: report.clone(),
        };

        let mut line =
            serde_json::to_string(&entry).map_err(|source| StoreError::json(&path, source))?;
        line.push('\n');
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StoreError::io(&path, source))?;
        log.write_all(line.as_bytes())
            .map_err(|source| StoreError::io(&path, source))?;
        Ok(entry)
    }

    fn read_master(&self) -> Result<Vec<TabularRow>, StoreError> {
        let path = self.master_path();
        let mut reader = match csv::Reader::from_path(&path) {
            Ok(reader) => reader,
            Err(err) if is_not_found(&err) => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::csv(&path, source)),
        };

        let mut rows = Vec::new();
        for result in reader.deserialize::<TabularRow>() {
            rows.push(result.map_err(|source| StoreError::csv(&path, source))?);
        }
        Ok(rows)
    }

    fn write_master(&self, table: &[TabularRow]) -> Result<(), StoreError> {
        let path = self.master_path();
        let bytes = csv_bytes(&path, table)?;
        write_atomic(&path, &bytes)
    }
}

/// File stem for an equipment identifier. Portable ASCII identifiers are
/// used as is; anything else gets a sanitized stem plus a hash of the full
/// identifier so distinct identifiers never share a file.
fn storage_key(equipment_id: &str) -> Result<String, StoreError> {
    if equipment_id.is_empty() || equipment_id.chars().all(|c| c == '.') {
        return Err(StoreError::InvalidKey(equipment_id.to_string()));
    }

    let is_portable = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if equipment_id.chars().all(is_portable) {
        return Ok(equipment_id.to_string());
    }

    let stem: String = equipment_id
        .chars()
        .map(|c| if is_portable(c) { c } else { '_' })
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(equipment_id.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    Ok(format!("{stem}~{}", &hash[..16]))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    fs::write(&temp, bytes).map_err(|source| StoreError::io(&temp, source))?;
    fs::rename(&temp, path).map_err(|source| StoreError::io(path, source))
}

fn remove_if_present(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StoreError::io(path, source)),
    }
}

fn csv_bytes(path: &Path, rows: &[TabularRow]) -> Result<Vec<u8>, StoreError> {
    let mut buffer = Vec::new();
    export::write_csv(&mut buffer, rows).map_err(|source| StoreError::csv(path, source))?;
    Ok(buffer)
}

fn read_report(path: &Path) -> Result<DiagnosticReport, StoreError> {
    let contents = fs::read_to_string(path).map_err(|source| StoreError::io(path, source))?;
    serde_json::from_str(&contents).map_err(|source| StoreError::json(path, source))
}

fn is_not_found(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(io) if io.kind() == ErrorKind::NotFound)
}

impl ReportRepository for FlatFileStore {
    fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    fn save(&self, report: &DiagnosticReport) -> Result<HistoryEntry, StoreError> {
        let entry = self.append_history(report)?;

        let path = self.keyed_path("reports", &report.equipment_id, "json")?;
        let json =
            serde_json::to_vec_pretty(report).map_err(|source| StoreError::json(&path, source))?;
        write_atomic(&path, &json)?;

        tracing::info!(
            equipment_id = %report.equipment_id,
            revision = entry.revision,
            "saved diagnostic report"
        );
        Ok(entry)
    }

    fn archive(&self, report: &DiagnosticReport) -> Result<HistoryEntry, StoreError> {
        let entry = self.append_history(report)?;
        tracing::info!(
            equipment_id = %report.equipment_id,
            revision = entry.revision,
            "archived diagnostic report"
        );
        Ok(entry)
    }

    fn load(&self, equipment_id: &str) -> Result<Option<DiagnosticReport>, StoreError> {
        let path = self.keyed_path("reports", equipment_id, "json")?;
        if !path.exists() {
            return Ok(None);
        }
        read_report(&path).map(Some)
    }

    fn current(&self) -> Result<Vec<DiagnosticReport>, StoreError> {
        let dir = self.root.join("reports");
        let entries = fs::read_dir(&dir).map_err(|source| StoreError::io(&dir, source))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::io(&dir, source))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut reports = Vec::with_capacity(paths.len());
        for path in paths {
            match read_report(&path) {
                Ok(report) => reports.push(report),
                Err(err) => tracing::warn!(error = %err, "skipping unreadable report"),
            }
        }
        Ok(reports)
    }

    fn history(&self, equipment_id: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let path = self.keyed_path("history", equipment_id, "jsonl")?;
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::io(&path, source)),
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| StoreError::io(&path, source))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry =
                serde_json::from_str(&line).map_err(|source| StoreError::json(&path, source))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn remove(&self, equipment_id: &str) -> Result<bool, StoreError> {
        remove_if_present(&self.keyed_path("reports", equipment_id, "json")?)
    }
}

impl MasterTable for FlatFileStore {
    fn replace_rows(&self, equipment_id: &str, rows: &[TabularRow]) -> Result<(), StoreError> {
        let _writer = self.master.write().unwrap_or_else(PoisonError::into_inner);

        let mut table = self.read_master()?;
        let before = table.len();
        table.retain(|row| row.equipment_id != equipment_id);
        let replaced = before - table.len();
        table.extend_from_slice(rows);
        // stable: keeps each equipment's rows in export order
        table.sort_by(|a, b| a.equipment_id.cmp(&b.equipment_id));
        self.write_master(&table)?;

        tracing::debug!(
            equipment_id,
            replaced,
            written = rows.len(),
            "updated master table"
        );
        Ok(())
    }

    fn remove_rows(&self, equipment_id: &str) -> Result<usize, StoreError> {
        let _writer = self.master.write().unwrap_or_else(PoisonError::into_inner);

        let mut table = self.read_master()?;
        let before = table.len();
        table.retain(|row| row.equipment_id != equipment_id);
        let removed = before - table.len();
        if removed > 0 {
            self.write_master(&table)?;
        }
        Ok(removed)
    }

    fn rows(&self) -> Result<Vec<TabularRow>, StoreError> {
        let _reader = self.master.read().unwrap_or_else(PoisonError::into_inner);
        self.read_master()
    }
}
