//! SQLite-backed store for commissioning records.
//!
//! Single-process, single-writer model: one `Connection`, one transaction at
//! a time, each logical write committed or rolled back atomically. The
//! nested parts of a record (`phase_status`, `phase_history`,
//! `phase_results`) are stored as JSON TEXT columns.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::model::{CommissioningPhase, CommissioningRecord, PhaseCheckpoint, PhaseStatus};

/// Counts of stored records grouped by status, phase, and cryomodule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseStats {
    pub total_records: i64,
    pub by_status: HashMap<String, i64>,
    pub by_phase: HashMap<String, i64>,
    pub by_cryomodule: HashMap<String, i64>,
}

pub struct CommissioningDatabase {
    conn: Connection,
}

/// Raw row as stored; deserialized into a record after the query.
struct RecordRow {
    cavity_name: String,
    cryomodule: String,
    start_time: String,
    current_phase: String,
    overall_status: String,
    phase_status: String,
    phase_history: String,
    phase_results: String,
}

const RECORD_COLUMNS: &str = "cavity_name, cryomodule, start_time, current_phase, \
     overall_status, phase_status, phase_history, phase_results";

impl RecordRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            cavity_name: row.get(0)?,
            cryomodule: row.get(1)?,
            start_time: row.get(2)?,
            current_phase: row.get(3)?,
            overall_status: row.get(4)?,
            phase_status: row.get(5)?,
            phase_history: row.get(6)?,
            phase_results: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<CommissioningRecord> {
        let start_time = DateTime::parse_from_rfc3339(&self.start_time)
            .context("Failed to parse start_time")?
            .with_timezone(&Utc);
        let current_phase = CommissioningPhase::from_str(&self.current_phase)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse current_phase")?;
        let phase_status: std::collections::BTreeMap<CommissioningPhase, PhaseStatus> =
            serde_json::from_str(&self.phase_status)
                .context("Failed to deserialize phase_status")?;
        let phase_history: Vec<PhaseCheckpoint> = serde_json::from_str(&self.phase_history)
            .context("Failed to deserialize phase_history")?;
        let phase_results: std::collections::BTreeMap<CommissioningPhase, serde_json::Value> =
            serde_json::from_str(&self.phase_results)
                .context("Failed to deserialize phase_results")?;

        Ok(CommissioningRecord {
            cavity_name: self.cavity_name,
            cryomodule: self.cryomodule,
            start_time,
            current_phase,
            overall_status: self.overall_status,
            phase_status,
            phase_history,
            phase_results,
        })
    }
}

impl CommissioningDatabase {
    /// Open (or create) the SQLite database file at the given path.
    /// Call [`initialize`](Self::initialize) before first use.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        Ok(Self { conn })
    }

    /// In-memory database, used in tests.
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Ok(Self { conn })
    }

    /// Create the `commissioning_records` table and its indexes. Safe to
    /// call repeatedly.
    pub fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS commissioning_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    cavity_name TEXT NOT NULL,
                    cryomodule TEXT NOT NULL,
                    start_time TEXT NOT NULL,
                    current_phase TEXT NOT NULL,
                    overall_status TEXT NOT NULL,
                    phase_status TEXT NOT NULL,
                    phase_history TEXT NOT NULL,
                    phase_results TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_cavity_name
                    ON commissioning_records(cavity_name);
                CREATE INDEX IF NOT EXISTS idx_cryomodule
                    ON commissioning_records(cryomodule);
                CREATE INDEX IF NOT EXISTS idx_overall_status
                    ON commissioning_records(overall_status);
                CREATE INDEX IF NOT EXISTS idx_current_phase
                    ON commissioning_records(current_phase);
                ",
            )
            .context("Failed to create commissioning schema")?;
        debug!("commissioning schema initialized");
        Ok(())
    }

    /// Insert a new record (`record_id = None`, returns the new id) or
    /// update an existing row in place (returns the same id). Updating an
    /// id with no matching row is an error; the transaction rolls back and
    /// nothing changes.
    pub fn save_record(
        &self,
        record: &CommissioningRecord,
        record_id: Option<i64>,
    ) -> Result<i64> {
        let phase_status = serde_json::to_string(&record.phase_status)
            .context("Failed to serialize phase_status")?;
        let phase_history = serde_json::to_string(&record.phase_history)
            .context("Failed to serialize phase_history")?;
        let phase_results = serde_json::to_string(&record.phase_results)
            .context("Failed to serialize phase_results")?;
        let now = Utc::now().to_rfc3339();

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let id = match record_id {
            None => {
                tx.execute(
                    "INSERT INTO commissioning_records
                         (cavity_name, cryomodule, start_time, current_phase,
                          overall_status, phase_status, phase_history, phase_results,
                          created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        record.cavity_name,
                        record.cryomodule,
                        record.start_time.to_rfc3339(),
                        record.current_phase.as_str(),
                        record.overall_status,
                        phase_status,
                        phase_history,
                        phase_results,
                        now,
                        now,
                    ],
                )
                .context("Failed to insert commissioning record")?;
                tx.last_insert_rowid()
            }
            Some(id) => {
                let updated = tx
                    .execute(
                        "UPDATE commissioning_records
                         SET cavity_name = ?1, cryomodule = ?2, start_time = ?3,
                             current_phase = ?4, overall_status = ?5,
                             phase_status = ?6, phase_history = ?7,
                             phase_results = ?8, updated_at = ?9
                         WHERE id = ?10",
                        params![
                            record.cavity_name,
                            record.cryomodule,
                            record.start_time.to_rfc3339(),
                            record.current_phase.as_str(),
                            record.overall_status,
                            phase_status,
                            phase_history,
                            phase_results,
                            now,
                            id,
                        ],
                    )
                    .context("Failed to update commissioning record")?;
                if updated == 0 {
                    bail!("No commissioning record with id {}", id);
                }
                id
            }
        };

        tx.commit().context("Failed to commit record save")?;
        info!(
            record_id = id,
            cavity = record.cavity_name.as_str(),
            "commissioning record saved"
        );
        Ok(id)
    }

    pub fn get_record(&self, record_id: i64) -> Result<Option<CommissioningRecord>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM commissioning_records WHERE id = ?1",
                    RECORD_COLUMNS
                ),
                params![record_id],
                RecordRow::from_row,
            )
            .optional()
            .context("Failed to query commissioning record")?;

        row.map(RecordRow::into_record).transpose()
    }

    /// Most recent record for a cavity, by `start_time` descending. With
    /// `active_only`, rows whose `overall_status` is `"complete"` are
    /// excluded.
    pub fn get_record_by_cavity(
        &self,
        cavity_name: &str,
        active_only: bool,
    ) -> Result<Option<CommissioningRecord>> {
        let sql = if active_only {
            format!(
                "SELECT {} FROM commissioning_records
                 WHERE cavity_name = ?1 AND overall_status != 'complete'
                 ORDER BY start_time DESC LIMIT 1",
                RECORD_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM commissioning_records
                 WHERE cavity_name = ?1
                 ORDER BY start_time DESC LIMIT 1",
                RECORD_COLUMNS
            )
        };

        let row = self
            .conn
            .query_row(&sql, params![cavity_name], RecordRow::from_row)
            .optional()
            .context("Failed to query record by cavity")?;

        row.map(RecordRow::into_record).transpose()
    }

    /// All records for a cryomodule, newest `start_time` first.
    pub fn get_records_by_cryomodule(
        &self,
        cryomodule: &str,
        active_only: bool,
    ) -> Result<Vec<CommissioningRecord>> {
        let sql = if active_only {
            format!(
                "SELECT {} FROM commissioning_records
                 WHERE cryomodule = ?1 AND overall_status != 'complete'
                 ORDER BY start_time DESC",
                RECORD_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM commissioning_records
                 WHERE cryomodule = ?1
                 ORDER BY start_time DESC",
                RECORD_COLUMNS
            )
        };

        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare cryomodule query")?;
        let rows = stmt
            .query_map(params![cryomodule], RecordRow::from_row)
            .context("Failed to query records by cryomodule")?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("Failed to read record row")?.into_record()?);
        }
        Ok(records)
    }

    /// All in-progress records across every cryomodule. Used to resume
    /// interrupted commissioning sessions after a restart.
    pub fn get_active_records(&self) -> Result<Vec<CommissioningRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM commissioning_records
                 WHERE overall_status = 'in_progress'
                 ORDER BY start_time DESC",
                RECORD_COLUMNS
            ))
            .context("Failed to prepare active records query")?;
        let rows = stmt
            .query_map([], RecordRow::from_row)
            .context("Failed to query active records")?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("Failed to read record row")?.into_record()?);
        }
        Ok(records)
    }

    /// Remove one record. Returns `true` if a row was deleted.
    pub fn delete_record(&self, record_id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM commissioning_records WHERE id = ?1",
                params![record_id],
            )
            .context("Failed to delete commissioning record")?;
        if count > 0 {
            info!(record_id, "commissioning record deleted");
        }
        Ok(count > 0)
    }

    pub fn get_database_stats(&self) -> Result<DatabaseStats> {
        let total_records: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM commissioning_records", [], |row| {
                row.get(0)
            })
            .context("Failed to count records")?;

        Ok(DatabaseStats {
            total_records,
            by_status: self.count_grouped_by("overall_status")?,
            by_phase: self.count_grouped_by("current_phase")?,
            by_cryomodule: self.count_grouped_by("cryomodule")?,
        })
    }

    fn count_grouped_by(&self, column: &str) -> Result<HashMap<String, i64>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {col}, COUNT(*) FROM commissioning_records GROUP BY {col}",
                col = column
            ))
            .context("Failed to prepare stats query")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .context("Failed to query stats")?;

        let mut counts = HashMap::new();
        for row in rows {
            let (key, count) = row.context("Failed to read stats row")?;
            counts.insert(key, count);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::model::PhaseCheckpoint;

    fn make_db() -> CommissioningDatabase {
        let db = CommissioningDatabase::new_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn record_at(
        cavity: &str,
        cryomodule: &str,
        start_time: DateTime<Utc>,
    ) -> CommissioningRecord {
        let mut record = CommissioningRecord::new(cavity, cryomodule);
        record.start_time = start_time;
        record
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let db = CommissioningDatabase::new_in_memory().unwrap();
        db.initialize().unwrap();
        db.initialize().unwrap();

        let indexes: Vec<String> = {
            let mut stmt = db
                .conn
                .prepare("SELECT name FROM sqlite_master WHERE type = 'index'")
                .unwrap();
            let rows = stmt.query_map([], |row| row.get(0)).unwrap();
            rows.map(|r| r.unwrap()).collect()
        };
        for name in [
            "idx_cavity_name",
            "idx_cryomodule",
            "idx_overall_status",
            "idx_current_phase",
        ] {
            assert!(indexes.iter().any(|i| i == name), "missing index {}", name);
        }
    }

    #[test]
    fn test_save_new_record_returns_id() {
        let db = make_db();
        let record = CommissioningRecord::new("L1B_CM02_CAV3", "02");

        let id = db.save_record(&record, None).unwrap();
        assert!(id > 0);
    }

    #[test]
    fn test_save_and_retrieve_round_trip() {
        let db = make_db();
        let start_time = Utc.with_ymd_and_hms(2026, 2, 18, 10, 0, 0).unwrap();
        let record = record_at("L1B_CM02_CAV3", "02", start_time);

        let id = db.save_record(&record, None).unwrap();
        let retrieved = db.get_record(id).unwrap().unwrap();

        assert_eq!(retrieved.cavity_name, "L1B_CM02_CAV3");
        assert_eq!(retrieved.cryomodule, "02");
        assert_eq!(retrieved.start_time, start_time);
        assert_eq!(retrieved.current_phase, CommissioningPhase::PreChecks);
        assert_eq!(retrieved.overall_status, "in_progress");
        assert_eq!(retrieved.phase_status, record.phase_status);
    }

    #[test]
    fn test_get_nonexistent_record() {
        let db = make_db();
        assert!(db.get_record(99999).unwrap().is_none());
    }

    #[test]
    fn test_update_existing_record() {
        let db = make_db();
        let mut record = CommissioningRecord::new("L1B_CM02_CAV3", "02");

        let id = db.save_record(&record, None).unwrap();

        record.current_phase = CommissioningPhase::ColdLanding;
        let updated_id = db.save_record(&record, Some(id)).unwrap();
        assert_eq!(updated_id, id);

        let retrieved = db.get_record(id).unwrap().unwrap();
        assert_eq!(retrieved.current_phase, CommissioningPhase::ColdLanding);
    }

    #[test]
    fn test_update_missing_record_is_error() {
        let db = make_db();
        let record = CommissioningRecord::new("L1B_CM02_CAV3", "02");

        let result = db.save_record(&record, Some(4242));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("4242"));
    }

    #[test]
    fn test_phase_history_and_results_persist() {
        let db = make_db();
        let mut record = CommissioningRecord::new("L1B_CM02_CAV3", "02");
        record.phase_history.push(PhaseCheckpoint {
            phase: CommissioningPhase::PiezoPreRf,
            timestamp: Utc.with_ymd_and_hms(2026, 2, 18, 10, 5, 0).unwrap(),
            operator: "jdoe".into(),
            step_name: "validate_results".into(),
            success: true,
            measurements: {
                let mut m = serde_json::Map::new();
                m.insert("capacitance_a_nf".into(), json!(2.1));
                m
            },
            notes: "All tests passed".into(),
            error_message: None,
        });
        record.set_phase_result(
            CommissioningPhase::PiezoPreRf,
            json!({"channel_a_passed": true, "channel_b_passed": true}),
        );

        let id = db.save_record(&record, None).unwrap();
        let retrieved = db.get_record(id).unwrap().unwrap();

        assert_eq!(retrieved.phase_history, record.phase_history);
        assert_eq!(
            retrieved.phase_result(CommissioningPhase::PiezoPreRf),
            Some(&json!({"channel_a_passed": true, "channel_b_passed": true}))
        );
    }

    #[test]
    fn test_get_record_by_cavity_returns_most_recent() {
        let db = make_db();
        let older = record_at(
            "L1B_CM02_CAV3",
            "02",
            Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap(),
        );
        let mut newer = record_at(
            "L1B_CM02_CAV3",
            "02",
            Utc.with_ymd_and_hms(2026, 2, 18, 10, 0, 0).unwrap(),
        );
        newer.current_phase = CommissioningPhase::SsaCal;

        db.save_record(&older, None).unwrap();
        db.save_record(&newer, None).unwrap();

        let found = db.get_record_by_cavity("L1B_CM02_CAV3", false).unwrap().unwrap();
        assert_eq!(found.current_phase, CommissioningPhase::SsaCal);
        assert_eq!(found.start_time, newer.start_time);
    }

    #[test]
    fn test_get_record_by_cavity_active_only_skips_complete() {
        let db = make_db();
        let mut finished = record_at(
            "L1B_CM02_CAV3",
            "02",
            Utc.with_ymd_and_hms(2026, 2, 18, 10, 0, 0).unwrap(),
        );
        finished.overall_status = "complete".into();
        let earlier_active = record_at(
            "L1B_CM02_CAV3",
            "02",
            Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap(),
        );

        db.save_record(&finished, None).unwrap();
        db.save_record(&earlier_active, None).unwrap();

        // active_only skips the newer complete run.
        let active = db.get_record_by_cavity("L1B_CM02_CAV3", true).unwrap().unwrap();
        assert_eq!(active.start_time, earlier_active.start_time);

        // Without the filter the complete run wins on recency.
        let any = db.get_record_by_cavity("L1B_CM02_CAV3", false).unwrap().unwrap();
        assert_eq!(any.overall_status, "complete");
    }

    #[test]
    fn test_get_record_by_cavity_none_for_unknown() {
        let db = make_db();
        assert!(db.get_record_by_cavity("L0B_CM01_CAV1", true).unwrap().is_none());
    }

    #[test]
    fn test_get_records_by_cryomodule_newest_first() {
        let db = make_db();
        for (cavity, day) in [("L1B_CM02_CAV1", 10), ("L1B_CM02_CAV2", 12), ("L1B_CM02_CAV3", 11)]
        {
            let record = record_at(
                cavity,
                "02",
                Utc.with_ymd_and_hms(2026, 2, day, 9, 0, 0).unwrap(),
            );
            db.save_record(&record, None).unwrap();
        }
        let other = record_at(
            "L1B_CM03_CAV1",
            "03",
            Utc.with_ymd_and_hms(2026, 2, 20, 9, 0, 0).unwrap(),
        );
        db.save_record(&other, None).unwrap();

        let records = db.get_records_by_cryomodule("02", false).unwrap();
        let cavities: Vec<&str> = records.iter().map(|r| r.cavity_name.as_str()).collect();
        assert_eq!(cavities, vec!["L1B_CM02_CAV2", "L1B_CM02_CAV3", "L1B_CM02_CAV1"]);
    }

    #[test]
    fn test_get_records_by_cryomodule_active_only() {
        let db = make_db();
        let mut finished = CommissioningRecord::new("L1B_CM02_CAV1", "02");
        finished.overall_status = "complete".into();
        db.save_record(&finished, None).unwrap();
        db.save_record(&CommissioningRecord::new("L1B_CM02_CAV2", "02"), None)
            .unwrap();

        let all = db.get_records_by_cryomodule("02", false).unwrap();
        assert_eq!(all.len(), 2);

        let active = db.get_records_by_cryomodule("02", true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].cavity_name, "L1B_CM02_CAV2");
    }

    #[test]
    fn test_get_active_records_across_cryomodules() {
        let db = make_db();
        db.save_record(&CommissioningRecord::new("L1B_CM02_CAV1", "02"), None)
            .unwrap();
        db.save_record(&CommissioningRecord::new("L2B_CM07_CAV4", "07"), None)
            .unwrap();
        let mut aborted = CommissioningRecord::new("L1B_CM03_CAV2", "03");
        aborted.overall_status = "aborted".into();
        db.save_record(&aborted, None).unwrap();

        let active = db.get_active_records().unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|r| r.overall_status == "in_progress"));
    }

    #[test]
    fn test_delete_record_idempotent_in_effect() {
        let db = make_db();
        let id = db
            .save_record(&CommissioningRecord::new("L1B_CM02_CAV3", "02"), None)
            .unwrap();

        assert!(db.delete_record(id).unwrap());
        assert!(!db.delete_record(id).unwrap());
        assert!(db.get_record(id).unwrap().is_none());
    }

    #[test]
    fn test_stats_empty_database() {
        let db = make_db();
        let stats = db.get_database_stats().unwrap();

        assert_eq!(stats.total_records, 0);
        assert!(stats.by_status.is_empty());
        assert!(stats.by_phase.is_empty());
        assert!(stats.by_cryomodule.is_empty());
    }

    #[test]
    fn test_stats_grouped_counts() {
        let db = make_db();
        db.save_record(&CommissioningRecord::new("L1B_CM02_CAV1", "02"), None)
            .unwrap();
        db.save_record(&CommissioningRecord::new("L1B_CM02_CAV2", "02"), None)
            .unwrap();
        let mut finished = CommissioningRecord::new("L1B_CM03_CAV1", "03");
        finished.overall_status = "complete".into();
        finished.current_phase = CommissioningPhase::Complete;
        db.save_record(&finished, None).unwrap();

        let stats = db.get_database_stats().unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.by_status["in_progress"], 2);
        assert_eq!(stats.by_status["complete"], 1);
        assert_eq!(stats.by_phase["pre_checks"], 2);
        assert_eq!(stats.by_phase["complete"], 1);
        assert_eq!(stats.by_cryomodule["02"], 2);
        assert_eq!(stats.by_cryomodule["03"], 1);
    }

    #[test]
    fn test_commissioning_scenario() {
        // Example end-to-end scenario: first save gets id 1, cavity lookup
        // finds it, update in place keeps the id.
        let db = make_db();
        let mut record = CommissioningRecord::new("L1B_CM02_CAV3", "02");

        let id = db.save_record(&record, None).unwrap();
        assert_eq!(id, 1);

        let found = db.get_record_by_cavity("L1B_CM02_CAV3", true).unwrap().unwrap();
        assert_eq!(found.cavity_name, "L1B_CM02_CAV3");

        record.current_phase = CommissioningPhase::ColdLanding;
        assert_eq!(db.save_record(&record, Some(1)).unwrap(), 1);
        assert_eq!(
            db.get_record(1).unwrap().unwrap().current_phase,
            CommissioningPhase::ColdLanding
        );
    }
}
