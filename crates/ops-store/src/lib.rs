//! Persistence contract for the ops engine
//!
//! The engine reaches incidents, learning records and persisted actions
//! only through the [`Store`] trait; driver-backed implementations are
//! collaborators outside this repository. Each operation is its own
//! transaction — the engine never spans transactions across components.
//! [`MemoryStore`] is the in-tree implementation used by the daemon by
//! default and by every test.

pub mod memory;
pub mod records;

pub use memory::MemoryStore;
pub use records::{
    generate_incident_id, ActionRecord, ActionStatus, AutoRemediationSetting, Incident,
    IncidentFilter, IncidentPatch, IncidentSeverity, IncidentStatus, IncidentType, LearningRecord,
    NewIncident, SettingPatch,
};

use async_trait::async_trait;
use ops_common::Result;

/// Mutation applied to an existing learning record inside the upsert
pub type LearningUpdate = Box<dyn FnOnce(&mut LearningRecord) + Send>;

/// Transactional persistence operations used by the core
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist an executed action; returns its id
    async fn insert_action(&self, record: ActionRecord) -> Result<String>;

    /// Open a new incident in `detected` state
    async fn insert_incident(&self, new: NewIncident) -> Result<Incident>;

    async fn get_incident(&self, incident_id: &str) -> Result<Option<Incident>>;

    async fn query_incidents(&self, filter: IncidentFilter) -> Result<Vec<Incident>>;

    /// Apply a forward-only status transition plus optional field updates
    async fn update_incident_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        notes: Option<String>,
        patch: IncidentPatch,
    ) -> Result<Incident>;

    /// Apply field updates without changing status
    async fn patch_incident(&self, incident_id: &str, patch: IncidentPatch) -> Result<Incident>;

    /// Insert `initial` when the pattern is new, otherwise apply `update`
    /// to the stored record. Returns the record after the operation.
    async fn upsert_learning_record(
        &self,
        initial: LearningRecord,
        update: LearningUpdate,
    ) -> Result<LearningRecord>;

    async fn get_learning_record(&self, pattern_hash: &str) -> Result<Option<LearningRecord>>;

    async fn list_learning_records(&self) -> Result<Vec<LearningRecord>>;

    async fn upsert_autoremediation_setting(
        &self,
        playbook_id: Option<String>,
        service_name: Option<String>,
        patch: SettingPatch,
    ) -> Result<AutoRemediationSetting>;

    async fn list_autoremediation_settings(&self) -> Result<Vec<AutoRemediationSetting>>;
}
