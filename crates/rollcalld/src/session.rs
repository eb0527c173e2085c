//! Attendance session state machine: `Idle -> Streaming -> Finalized`.
//!
//! All state (present set, registry snapshot, epoch, lifecycle) lives behind
//! one mutex. Finalize decides and commits while holding it, so every
//! `record` that returned before `finalize` was called is in the commit.

use crate::error::SessionError;
use crate::export::CsvExporter;
use crate::gateway::Gateway;
use crate::registry::Registry;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use rollcall_core::UNKNOWN_LABEL;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Streaming,
    Finalized,
}

/// Who to notify after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub name: String,
    pub contact: String,
}

#[derive(Debug, Clone)]
pub struct AttendanceSummary {
    /// Commit timestamp shared by every persisted row.
    pub timestamp: String,
    pub file: PathBuf,
    pub present: Vec<String>,
    pub absent: Vec<String>,
    pub recipients: Vec<Recipient>,
}

#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    Saved(AttendanceSummary),
    AlreadySaved,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub epoch: u64,
    pub present: usize,
    pub registry_size: usize,
}

struct SessionInner {
    state: SessionState,
    epoch: u64,
    present: BTreeSet<String>,
    registry: Registry,
}

pub struct AttendanceSession {
    inner: Mutex<SessionInner>,
}

impl Default for AttendanceSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AttendanceSession {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                epoch: 0,
                present: BTreeSet::new(),
                registry: Registry::default(),
            }),
        }
    }

    /// Start a fresh session with `registry`. Any earlier stream's epoch
    /// becomes stale. Returns the new epoch.
    pub fn begin(&self, registry: Registry) -> u64 {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        inner.state = SessionState::Streaming;
        inner.present.clear();
        inner.registry = registry;
        tracing::info!(
            epoch = inner.epoch,
            identities = inner.registry.len(),
            "attendance session started"
        );
        inner.epoch
    }

    /// Mark `names` present. Ignored unless `epoch` is current and the
    /// session is streaming; unknown names are dropped. Returns how many
    /// names became newly present.
    pub fn record(&self, epoch: u64, names: &[String]) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.epoch != epoch || inner.state != SessionState::Streaming {
            tracing::trace!(epoch, current = inner.epoch, state = ?inner.state, "ignoring stale insert");
            return 0;
        }

        let mut added = 0;
        for name in names {
            if name == UNKNOWN_LABEL || !inner.registry.contains(name) {
                continue;
            }
            if inner.present.insert(name.clone()) {
                tracing::info!(name = %name, epoch, "marked present");
                added += 1;
            }
        }
        added
    }

    pub fn finalize(
        &self,
        gateway: &dyn Gateway,
        exporter: &CsvExporter,
    ) -> Result<FinalizeOutcome, SessionError> {
        self.finalize_at(gateway, exporter, chrono::Local::now().naive_local())
    }

    /// Export, then persist, then mark finalized. A failed persist removes
    /// the export and leaves the session streaming so the call can be retried.
    pub fn finalize_at(
        &self,
        gateway: &dyn Gateway,
        exporter: &CsvExporter,
        now: NaiveDateTime,
    ) -> Result<FinalizeOutcome, SessionError> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Finalized => {
                tracing::info!(epoch = inner.epoch, "attendance already saved");
                return Ok(FinalizeOutcome::AlreadySaved);
            }
            SessionState::Idle => return Err(SessionError::NoActiveSession),
            SessionState::Streaming => {}
        }

        let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let file_stamp = now.format("%Y%m%d_%H%M%S").to_string();

        let file = exporter.write(&inner.registry, &inner.present, &file_stamp, &timestamp)?;

        let present: Vec<String> = inner.present.iter().cloned().collect();
        if let Err(e) = gateway.record_attendance(&present, &timestamp) {
            tracing::warn!(error = %e, epoch = inner.epoch, "attendance commit failed; session left open");
            exporter.remove(&file);
            return Err(SessionError::PersistenceFailure(e));
        }

        inner.state = SessionState::Finalized;

        let absent = inner
            .registry
            .identities()
            .iter()
            .filter(|i| !inner.present.contains(&i.name))
            .map(|i| i.name.clone())
            .collect::<Vec<_>>();
        let recipients = present
            .iter()
            .filter_map(|name| inner.registry.get(name))
            .filter(|i| !i.contact.trim().is_empty())
            .map(|i| Recipient {
                name: i.name.clone(),
                contact: i.contact.clone(),
            })
            .collect();

        tracing::info!(
            epoch = inner.epoch,
            present = present.len(),
            absent = absent.len(),
            file = %file.display(),
            "attendance saved"
        );

        Ok(FinalizeOutcome::Saved(AttendanceSummary {
            timestamp,
            file,
            present,
            absent,
            recipients,
        }))
    }

    /// Whether `epoch` belongs to the latest `begin`.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.inner.lock().epoch == epoch
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        SessionSnapshot {
            state: inner.state,
            epoch: inner.epoch,
            present: inner.present.len(),
            registry_size: inner.registry.len(),
        }
    }

    pub fn present(&self) -> Vec<String> {
        self.inner.lock().present.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{stored, FlakyGateway};
    use std::sync::Arc;

    fn now() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2026, 1, 5)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .unwrap()
    }

    fn setup(names: &[&str]) -> (AttendanceSession, FlakyGateway, tempfile::TempDir, CsvExporter) {
        let identities: Vec<_> = names
            .iter()
            .enumerate()
            .map(|(i, n)| stored(n, vec![i as f32, 1.0]))
            .collect();
        let gateway = FlakyGateway::with_identities(&identities);
        let dir = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new(dir.path());
        (AttendanceSession::new(), gateway, dir, exporter)
    }

    fn saved(outcome: FinalizeOutcome) -> AttendanceSummary {
        match outcome {
            FinalizeOutcome::Saved(summary) => summary,
            FinalizeOutcome::AlreadySaved => panic!("expected a fresh save"),
        }
    }

    #[test]
    fn test_finalize_before_any_stream_is_rejected() {
        let (session, gateway, _dir, exporter) = setup(&["Alice"]);
        assert!(matches!(
            session.finalize_at(&gateway, &exporter, now()),
            Err(SessionError::NoActiveSession)
        ));
        assert_eq!(session.snapshot().state, SessionState::Idle);
    }

    #[test]
    fn test_record_filters_unknown_and_unregistered() {
        let (session, gateway, _dir, _exporter) = setup(&["Alice", "Bob"]);
        let epoch = session.begin(Registry::load(&gateway).unwrap());
        let added = session.record(
            epoch,
            &["Alice".into(), "Unknown".into(), "Mallory".into(), "Alice".into()],
        );
        assert_eq!(added, 1);
        assert_eq!(session.present(), vec!["Alice".to_string()]);
    }

    #[test]
    fn test_finalize_twice_persists_once() {
        let (session, gateway, _dir, exporter) = setup(&["Alice", "Bob"]);
        let epoch = session.begin(Registry::load(&gateway).unwrap());
        session.record(epoch, &["Alice".into()]);

        let summary = saved(session.finalize_at(&gateway, &exporter, now()).unwrap());
        assert_eq!(summary.present, vec!["Alice"]);
        assert_eq!(summary.absent, vec!["Bob"]);
        assert_eq!(summary.timestamp, "2026-01-05 09:00:00");
        assert_eq!(
            summary.recipients,
            vec![Recipient {
                name: "Alice".into(),
                contact: "alice@example.com".into()
            }]
        );

        assert!(matches!(
            session.finalize_at(&gateway, &exporter, now()).unwrap(),
            FinalizeOutcome::AlreadySaved
        ));
        let rows = gateway.store.list_attendance().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Alice");
        assert_eq!(rows[0].timestamp, "2026-01-05 09:00:00");
    }

    #[test]
    fn test_empty_present_set_saves_all_absent() {
        let (session, gateway, _dir, exporter) = setup(&["Alice", "Bob"]);
        session.begin(Registry::load(&gateway).unwrap());

        let summary = saved(session.finalize_at(&gateway, &exporter, now()).unwrap());
        assert!(summary.present.is_empty());
        assert_eq!(summary.absent, vec!["Alice", "Bob"]);
        assert!(summary.recipients.is_empty());
        assert!(gateway.store.list_attendance().unwrap().is_empty());

        let csv = std::fs::read_to_string(&summary.file).unwrap();
        assert_eq!(csv.matches(",Absent,").count(), 2);
    }

    #[test]
    fn test_persistence_failure_leaves_session_open_for_retry() {
        let (session, gateway, dir, exporter) = setup(&["Alice", "Bob"]);
        let epoch = session.begin(Registry::load(&gateway).unwrap());
        session.record(epoch, &["Bob".into()]);

        gateway.fail_writes(true);
        assert!(matches!(
            session.finalize_at(&gateway, &exporter, now()),
            Err(SessionError::PersistenceFailure(_))
        ));
        assert_eq!(session.snapshot().state, SessionState::Streaming);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0, "export rolled back");

        // Still streaming: later matches count toward the retried commit.
        session.record(epoch, &["Alice".into()]);

        gateway.fail_writes(false);
        let summary = saved(session.finalize_at(&gateway, &exporter, now()).unwrap());
        assert_eq!(summary.present, vec!["Alice", "Bob"]);
        assert_eq!(gateway.store.list_attendance().unwrap().len(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_export_failure_leaves_state_untouched() {
        let (session, gateway, dir, _exporter) = setup(&["Alice"]);
        let exporter = CsvExporter::new(dir.path().join("missing"));
        let epoch = session.begin(Registry::load(&gateway).unwrap());
        session.record(epoch, &["Alice".into()]);

        assert!(matches!(
            session.finalize_at(&gateway, &exporter, now()),
            Err(SessionError::Export(_))
        ));
        assert_eq!(session.snapshot().state, SessionState::Streaming);
        assert!(gateway.store.list_attendance().unwrap().is_empty());
    }

    #[test]
    fn test_stale_epoch_cannot_write_into_new_session() {
        let (session, gateway, _dir, _exporter) = setup(&["Alice", "Bob"]);
        let old = session.begin(Registry::load(&gateway).unwrap());
        let new = session.begin(Registry::load(&gateway).unwrap());
        assert_ne!(old, new);

        assert_eq!(session.record(old, &["Alice".into()]), 0);
        assert_eq!(session.record(new, &["Bob".into()]), 1);
        assert_eq!(session.present(), vec!["Bob".to_string()]);
    }

    #[test]
    fn test_begin_after_finalize_starts_clean() {
        let (session, gateway, _dir, exporter) = setup(&["Alice"]);
        let epoch = session.begin(Registry::load(&gateway).unwrap());
        session.record(epoch, &["Alice".into()]);
        saved(session.finalize_at(&gateway, &exporter, now()).unwrap());

        // Inserts after the commit are ignored.
        assert_eq!(session.record(epoch, &["Alice".into()]), 0);

        let epoch = session.begin(Registry::load(&gateway).unwrap());
        let snap = session.snapshot();
        assert_eq!(snap.state, SessionState::Streaming);
        assert_eq!(snap.present, 0);
        assert_eq!(snap.epoch, epoch);
    }

    #[test]
    fn test_registry_is_fixed_for_the_session() {
        let (session, gateway, _dir, _exporter) = setup(&["Alice"]);
        let epoch = session.begin(Registry::load(&gateway).unwrap());

        gateway.store.upsert_identity(&stored("Carol", vec![9.0, 1.0])).unwrap();
        assert_eq!(session.record(epoch, &["Carol".into()]), 0);

        let epoch = session.begin(Registry::load(&gateway).unwrap());
        assert_eq!(session.record(epoch, &["Carol".into()]), 1);
    }

    #[test]
    fn test_finalize_sees_every_insert_completed_before_it() {
        let names: Vec<String> = (0..200).map(|i| format!("person{i:03}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let (session, gateway, _dir, exporter) = setup(&refs);
        let session = Arc::new(session);
        let epoch = session.begin(Registry::load(&gateway).unwrap());

        let completed = Arc::new(Mutex::new(Vec::new()));
        let writer = {
            let session = Arc::clone(&session);
            let completed = Arc::clone(&completed);
            let names = names.clone();
            std::thread::spawn(move || {
                for name in names {
                    session.record(epoch, std::slice::from_ref(&name));
                    completed.lock().push(name);
                }
            })
        };

        while completed.lock().len() < 50 {
            std::thread::yield_now();
        }
        let before: Vec<String> = completed.lock().clone();
        let summary = saved(session.finalize_at(&gateway, &exporter, now()).unwrap());
        writer.join().unwrap();

        let persisted: BTreeSet<String> = gateway
            .store
            .list_attendance()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        for name in &before {
            assert!(persisted.contains(name), "{name} recorded before finalize but missing");
        }
        assert_eq!(persisted.len(), summary.present.len());
    }
}
