use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::PoisonError;

use chrono::NaiveDate;

use crate::assessment;
use crate::config::ScoringPolicy;
use crate::error::{AnalysisError, StoreError};
use crate::export;
use crate::health;
use crate::models::{DiagnosticReport, ExtractedRecord, MeasurementRecord};
use crate::report;
use crate::risk;
use crate::store::{FlatFileStore, MasterTable, ReportRepository};

/// Shape or type mismatches are rejected rather than coerced.
pub fn parse_extracted(json: &str) -> Result<ExtractedRecord, AnalysisError> {
    serde_json::from_str(json).map_err(|err| AnalysisError::invalid(err.to_string()))
}

/// Validation, scoring and assembly. Nothing is persisted here.
pub fn analyze(
    raw: ExtractedRecord,
    policy: &ScoringPolicy,
) -> Result<DiagnosticReport, AnalysisError> {
    let record = MeasurementRecord::from_extracted(raw)?;
    let scores = risk::evaluate_record(&record, policy);
    let index = health::calculate(&scores)?;
    tracing::debug!(
        health_index = index.value,
        scored = index.scored_components,
        total = scores.len(),
        "computed health index"
    );
    let assessment = assessment::assess(&index, &scores, policy);
    report::assemble(&record, scores, index, assessment)
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitStatus {
    Current { rows: usize, export_path: PathBuf },
    /// Kept in history only: the stored report has a later analysis date.
    Archived { current_analysis_date: NaiveDate },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub revision: u32,
    pub status: CommitStatus,
}

/// Persists a report under its equipment lock. A report never replaces a
/// current one with a later analysis date; on equal dates the later commit
/// wins.
pub fn commit(
    store: &FlatFileStore,
    report: &DiagnosticReport,
) -> Result<CommitOutcome, StoreError> {
    let lock = store.locks().for_equipment(&report.equipment_id);
    let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

    let current = match store.load(&report.equipment_id) {
        Ok(current) => current,
        Err(err @ StoreError::Json { .. }) => {
            tracing::warn!(error = %err, "replacing unreadable current report");
            None
        }
        Err(err) => return Err(err),
    };

    if let Some(current) = current.filter(|c| c.analysis_date > report.analysis_date) {
        let entry = store.archive(report)?;
        tracing::info!(
            equipment_id = %report.equipment_id,
            analysis_date = %report.analysis_date,
            current_analysis_date = %current.analysis_date,
            "newer report stays current"
        );
        return Ok(CommitOutcome {
            revision: entry.revision,
            status: CommitStatus::Archived {
                current_analysis_date: current.analysis_date,
            },
        });
    }

    let entry = store.save(report)?;
    let rows = export::publish(store, report)?;
    let export_path = store.write_export(&report.equipment_id, &rows)?;

    Ok(CommitOutcome {
        revision: entry.revision,
        status: CommitStatus::Current {
            rows: rows.len(),
            export_path,
        },
    })
}

/// Takes an equipment out of the fleet: current report, export file and
/// master table rows. History is kept. Returns whether anything was removed.
pub fn remove(store: &FlatFileStore, equipment_id: &str) -> Result<bool, StoreError> {
    let lock = store.locks().for_equipment(equipment_id);
    let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

    let report = store.remove(equipment_id)?;
    let export = store.remove_export(equipment_id)?;
    let rows = store.remove_rows(equipment_id)?;
    if report || export || rows > 0 {
        tracing::info!(equipment_id, rows, "removed equipment");
    }
    Ok(report || export || rows > 0)
}

/// Removes every equipment with a current report or master table rows.
/// Returns how many were removed.
pub fn clear(store: &FlatFileStore) -> Result<usize, StoreError> {
    let mut removed = 0;
    for equipment_id in known_equipment(store)? {
        if remove(store, &equipment_id)? {
            removed += 1;
        }
    }
    Ok(removed)
}

fn known_equipment(store: &FlatFileStore) -> Result<BTreeSet<String>, StoreError> {
    let mut ids: BTreeSet<String> = store
        .current()?
        .into_iter()
        .map(|report| report.equipment_id)
        .collect();
    ids.extend(store.rows()?.into_iter().map(|row| row.equipment_id));
    Ok(ids)
}

/// Regenerates every export file and master table row set from the stored
/// reports, dropping rows of equipment without a current report. Returns the
/// number of reports exported.
pub fn rebuild_exports(store: &FlatFileStore) -> Result<usize, StoreError> {
    let reports = store.current()?;
    for report in &reports {
        let lock = store.locks().for_equipment(&report.equipment_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let rows = export::publish(store, report)?;
        store.write_export(&report.equipment_id, &rows)?;
    }

    let exported: BTreeSet<&str> = reports.iter().map(|r| r.equipment_id.as_str()).collect();
    let orphaned: BTreeSet<String> = store
        .rows()?
        .into_iter()
        .map(|row| row.equipment_id)
        .filter(|id| !exported.contains(id.as_str()))
        .collect();
    for equipment_id in orphaned {
        let lock = store.locks().for_equipment(&equipment_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let dropped = store.remove_rows(&equipment_id)?;
        tracing::debug!(%equipment_id, dropped, "dropped orphaned master table rows");
    }
    Ok(reports.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet;
    use crate::models::{RiskTier, Timeframe};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    const WORKED_EXAMPLE: &str = r#"{
        "equipment_id": "  tx-221380042 ",
        "document_date": "2025-03-01",
        "analysis_date": "2025-03-04",
        "components": {
            "winding_resistance": { "measured": 1.118, "reference": 1.097 },
            "turns_ratio": { "measured": 8.325, "reference": 8.289 },
            "main_insulation": { "measured": 0.8 },
            "bushing_pf": { "measured": 0.85, "measurement_point": "H1" },
            "demagnetization": { "measured": 41.0, "reference": 40.0 }
        },
        "equipment_identifiers": { "serial_number": "TX221380042", "manufacturer": "ABB" }
    }"#;

    fn worked_example() -> DiagnosticReport {
        let raw = parse_extracted(WORKED_EXAMPLE).unwrap();
        analyze(raw, &ScoringPolicy::default()).unwrap()
    }

    #[test]
    fn worked_example_end_to_end() {
        let report = worked_example();
        let scores: Vec<Option<u8>> = report
            .asset_health
            .component_risk_scores
            .iter()
            .map(|score| score.score.map(|s| s.get()))
            .collect();
        // bushing, insulation, tan delta (absent), winding, turns ratio, demagnetization
        assert_eq!(scores, vec![Some(4), Some(3), None, Some(2), Some(2), Some(1)]);
        assert_eq!(report.equipment_id, "TX-221380042");
        assert_eq!(report.asset_health.health_index, 65);
        assert_eq!(report.risk_assessment.risk_tier, RiskTier::High);

        let recommendations = &report.maintenance_recommendations;
        assert_eq!(recommendations[0].name(), "bushing power factor");
        assert_eq!(recommendations[0].timeframe, Timeframe::ThirtyDays);
        assert_eq!(recommendations[1].name(), "main insulation");
        assert_eq!(recommendations[1].timeframe, Timeframe::SixMonths);
        assert_eq!(
            report.equipment_identifiers.serial_number.as_deref(),
            Some("TX221380042")
        );
    }

    #[test]
    fn wrong_field_types_are_invalid_records() {
        let json = r#"{ "analysis_date": "2025-01-01",
                        "components": { "ttr": { "reference": "8.2" } } }"#;
        let err = parse_extracted(json).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidMeasurementRecord { .. }));
    }

    #[test]
    fn all_indeterminate_fails_before_persistence() {
        let raw = parse_extracted(
            r#"{ "equipment_id": "TX-5", "analysis_date": "2025-01-01",
                 "components": { "tan_delta": { "measured": "illegible" } } }"#,
        )
        .unwrap();
        let err = analyze(raw, &ScoringPolicy::default()).unwrap_err();
        assert_eq!(err, AnalysisError::InsufficientData { components: 6 });
    }

    #[test]
    fn missing_identifier_fails() {
        let raw = parse_extracted(
            r#"{ "equipment_id": "Not found in document", "analysis_date": "2025-01-01",
                 "components": { "tan_delta": { "measured": 0.2 } } }"#,
        )
        .unwrap();
        assert_eq!(
            analyze(raw, &ScoringPolicy::default()),
            Err(AnalysisError::MissingIdentifier)
        );
    }

    #[test]
    fn analysis_is_reproducible() {
        assert_eq!(worked_example(), worked_example());
    }

    fn export_path(outcome: &CommitOutcome) -> &Path {
        match &outcome.status {
            CommitStatus::Current { export_path, .. } => export_path,
            CommitStatus::Archived { .. } => panic!("expected a current commit"),
        }
    }

    fn dated(report: &DiagnosticReport, analysis_date: (i32, u32, u32)) -> DiagnosticReport {
        let (year, month, day) = analysis_date;
        let mut report = report.clone();
        report.document_date = None;
        report.analysis_date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
        report
    }

    #[test]
    fn recommit_supersedes_without_duplicating() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        let report = worked_example();

        let first = commit(&store, &report).unwrap();
        let master_before = std::fs::read(store.master_path()).unwrap();
        let export_before = std::fs::read(export_path(&first)).unwrap();
        let second = commit(&store, &report).unwrap();

        assert_eq!(first.revision, 1);
        assert_eq!(second.revision, 2);
        assert_eq!(std::fs::read(store.master_path()).unwrap(), master_before);
        assert_eq!(std::fs::read(export_path(&second)).unwrap(), export_before);
        assert_eq!(store.rows().unwrap(), export::rows(&report));

        let summary = fleet::summarize(&store.current().unwrap());
        assert_eq!(summary.total_equipment, 1);
    }

    #[test]
    fn older_report_does_not_replace_newer_one() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        let newer = dated(&worked_example(), (2025, 6, 1));
        let mut older = dated(&worked_example(), (2025, 1, 1));
        older.asset_health.health_index = 40;

        commit(&store, &newer).unwrap();
        let outcome = commit(&store, &older).unwrap();

        assert_eq!(outcome.revision, 2);
        assert_eq!(
            outcome.status,
            CommitStatus::Archived {
                current_analysis_date: newer.analysis_date
            }
        );
        assert_eq!(store.load(&newer.equipment_id).unwrap(), Some(newer.clone()));
        assert_eq!(store.rows().unwrap(), export::rows(&newer));
        assert_eq!(store.history(&newer.equipment_id).unwrap().len(), 2);

        let summary = fleet::summarize(&store.current().unwrap());
        assert_eq!(summary.equipment[0].analysis_date, newer.analysis_date);
    }

    #[test]
    fn commit_order_does_not_change_the_current_report() {
        let newer = dated(&worked_example(), (2025, 6, 1));
        let older = dated(&worked_example(), (2025, 1, 1));

        for batch in [[&newer, &older], [&older, &newer]] {
            let dir = TempDir::new().unwrap();
            let store = FlatFileStore::open(dir.path()).unwrap();
            for report in batch {
                commit(&store, report).unwrap();
            }
            assert_eq!(store.load(&newer.equipment_id).unwrap(), Some(newer.clone()));
        }
    }

    #[test]
    fn remove_drops_equipment_from_fleet_and_master_table() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        let kept = worked_example();
        let mut retired = worked_example();
        retired.equipment_id = "TX-RETIRED".to_string();
        commit(&store, &kept).unwrap();
        let outcome = commit(&store, &retired).unwrap();
        let retired_export = export_path(&outcome).to_path_buf();

        assert!(remove(&store, "TX-RETIRED").unwrap());
        assert!(!remove(&store, "TX-RETIRED").unwrap());

        let summary = fleet::summarize(&store.current().unwrap());
        assert_eq!(summary.total_equipment, 1);
        assert_eq!(summary.equipment[0].equipment_id, kept.equipment_id);
        assert!(store
            .rows()
            .unwrap()
            .iter()
            .all(|row| row.equipment_id == kept.equipment_id));
        assert!(!retired_export.exists());
        assert_eq!(store.history("TX-RETIRED").unwrap().len(), 1);
    }

    #[test]
    fn clear_empties_fleet_and_master_table() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        let mut other = worked_example();
        other.equipment_id = "TX-OTHER".to_string();
        commit(&store, &worked_example()).unwrap();
        commit(&store, &other).unwrap();

        assert_eq!(clear(&store).unwrap(), 2);
        assert_eq!(fleet::summarize(&store.current().unwrap()).total_equipment, 0);
        assert!(store.rows().unwrap().is_empty());
        assert_eq!(clear(&store).unwrap(), 0);
    }

    #[test]
    fn concurrent_commits_of_one_equipment_stay_consistent() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FlatFileStore::open(dir.path()).unwrap());
        let report = Arc::new(worked_example());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let report = Arc::clone(&report);
                std::thread::spawn(move || commit(&store, &report).unwrap())
            })
            .collect();
        let mut revisions: Vec<u32> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap().revision)
            .collect();
        revisions.sort_unstable();

        assert_eq!(revisions, (1..=8).collect::<Vec<u32>>());
        assert_eq!(store.rows().unwrap().len(), export::rows(&report).len());
    }

    #[test]
    fn rebuild_drops_rows_without_a_current_report() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        let report = worked_example();
        commit(&store, &report).unwrap();
        store.replace_rows("TX-GONE", &export::rows(&report)).unwrap();

        assert_eq!(rebuild_exports(&store).unwrap(), 1);
        assert_eq!(store.rows().unwrap(), export::rows(&report));
    }

    #[test]
    fn rebuild_restores_master_table() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileStore::open(dir.path()).unwrap();
        let report = worked_example();
        commit(&store, &report).unwrap();
        let expected = store.rows().unwrap();

        std::fs::remove_file(store.master_path()).unwrap();
        assert_eq!(rebuild_exports(&store).unwrap(), 1);
        assert_eq!(store.rows().unwrap(), expected);
    }
}
