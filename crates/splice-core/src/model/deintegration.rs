// ── De-integration records ──
//
// A record is created once per teardown attempt and is the only handle
// for reintegration. Records are persisted through a `RecordStore`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use uuid::Uuid;

use super::integration::IntegrationKind;

/// Teardown policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeintegrationPolicy {
    #[default]
    Immediate,
    Graceful,
    Scheduled,
    Manual,
}

/// Options for `DeintegrationManager::deintegrate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeintegrationOptions {
    pub policy: DeintegrationPolicy,
    pub preserve_data: bool,
    pub notify_dependents: bool,
    pub force: bool,
    /// Required for the `scheduled` policy.
    pub scheduled_time: Option<DateTime<Utc>>,
}

impl DeintegrationOptions {
    pub fn new(policy: DeintegrationPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn preserve_data(mut self, preserve: bool) -> Self {
        self.preserve_data = preserve;
        self
    }

    pub fn notify_dependents(mut self, notify: bool) -> Self {
        self.notify_dependents = notify;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_time = Some(at);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
}

/// Workflow step names, in execution order.
pub mod steps {
    pub const VALIDATE: &str = "validate";
    pub const LOCK: &str = "lock";
    pub const NOTIFY_DEPENDENTS: &str = "notify_dependents";
    pub const SAVE_STATE: &str = "save_state";
    pub const POLICY_WAIT: &str = "policy_wait";
    pub const CLEANUP: &str = "cleanup";
    pub const VERIFY_CLEANUP: &str = "verify_cleanup";
    pub const ARCHIVE: &str = "archive";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,
    pub status: StepStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Everything needed to rebuild an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedState {
    pub config: Value,
    pub adapter_state: Value,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeintegrationRecord {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub integration_name: String,
    pub integration_type: IntegrationKind,
    pub policy: DeintegrationPolicy,
    pub preserve_data: bool,
    pub notify_dependents: bool,
    pub force: bool,
    pub status: RecordStatus,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_state: Option<SavedState>,
    #[serde(default)]
    pub notified_dependents: Vec<Uuid>,
    #[serde(default)]
    pub cleanup_verification_failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Milliseconds between `start_time` and `end_time`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,
}

impl DeintegrationRecord {
    pub(crate) fn new(
        integration_id: Uuid,
        integration_name: String,
        integration_type: IntegrationKind,
        options: &DeintegrationOptions,
    ) -> Self {
        let now = Utc::now();
        let mut planned = vec![steps::VALIDATE, steps::LOCK];
        if options.notify_dependents {
            planned.push(steps::NOTIFY_DEPENDENTS);
        }
        if options.preserve_data {
            planned.push(steps::SAVE_STATE);
        }
        planned.extend([
            steps::POLICY_WAIT,
            steps::CLEANUP,
            steps::VERIFY_CLEANUP,
            steps::ARCHIVE,
        ]);

        Self {
            id: Uuid::new_v4(),
            integration_id,
            integration_name,
            integration_type,
            policy: options.policy,
            preserve_data: options.preserve_data,
            notify_dependents: options.notify_dependents,
            force: options.force,
            status: RecordStatus::Running,
            steps: planned
                .into_iter()
                .map(|name| Step {
                    name: name.to_owned(),
                    status: StepStatus::Pending,
                    timestamp: now,
                    detail: None,
                })
                .collect(),
            saved_state: None,
            notified_dependents: Vec::new(),
            cleanup_verification_failed: false,
            error: None,
            start_time: now,
            end_time: None,
            duration: None,
            scheduled_time: options.scheduled_time,
        }
    }

    /// Mark a planned step. Unknown names are appended.
    pub(crate) fn mark(&mut self, name: &str, status: StepStatus, detail: Option<String>) {
        let now = Utc::now();
        if let Some(step) = self.steps.iter_mut().find(|s| s.name == name) {
            step.status = status;
            step.timestamp = now;
            step.detail = detail;
        } else {
            self.steps.push(Step {
                name: name.to_owned(),
                status,
                timestamp: now,
                detail,
            });
        }
    }

    pub(crate) fn complete(&mut self, name: &str) {
        self.mark(name, StepStatus::Completed, None);
    }

    pub(crate) fn finish(&mut self, status: RecordStatus, error: Option<String>) {
        let end = Utc::now();
        self.status = status;
        self.error = error;
        self.end_time = Some(end);
        self.duration = Some((end - self.start_time).num_milliseconds());
    }

    /// The only valid input to reintegration.
    pub fn is_restorable(&self) -> bool {
        self.status == RecordStatus::Completed && self.preserve_data && self.saved_state.is_some()
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            id: self.id,
            status: self.status,
        }
    }
}

/// `{id, status}` answer for the de-integrate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub id: Uuid,
    pub status: RecordStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planned_steps_follow_options() {
        let opts = DeintegrationOptions::new(DeintegrationPolicy::Manual).preserve_data(true);
        let record = DeintegrationRecord::new(
            Uuid::new_v4(),
            "db".into(),
            IntegrationKind::Database,
            &opts,
        );
        let names: Vec<_> = record.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "validate",
                "lock",
                "save_state",
                "policy_wait",
                "cleanup",
                "verify_cleanup",
                "archive"
            ]
        );
        assert!(record.steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn only_completed_preserved_records_are_restorable() {
        let opts = DeintegrationOptions::default().preserve_data(true);
        let mut record =
            DeintegrationRecord::new(Uuid::new_v4(), "x".into(), IntegrationKind::Plugin, &opts);
        record.saved_state = Some(SavedState {
            config: serde_json::json!({}),
            adapter_state: Value::Null,
            metadata: Value::Null,
            depends_on: Vec::new(),
        });
        assert!(!record.is_restorable());

        record.finish(RecordStatus::Completed, None);
        assert!(record.is_restorable());
        assert!(record.duration.is_some_and(|d| d >= 0));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: DeintegrationOptions =
            serde_json::from_value(serde_json::json!({ "policy": "graceful", "force": true }))
                .unwrap_or_default();
        assert_eq!(opts.policy, DeintegrationPolicy::Graceful);
        assert!(opts.force);
        assert!(!opts.preserve_data);
    }
}
