use std::sync::Mutex;

use serde_json::json;

use crate::cohort_models::Cohort;
use crate::criteria::CohortCriteria;
use crate::notify::{CohortObserver, Notifier};

/// A saved dynamic cohort with one OR group holding a single performed-event criterion.
pub fn mock_cohort() -> Cohort {
    serde_json::from_value(json!({
        "id": 1,
        "name": "Dashboard power users",
        "description": "",
        "is_static": false,
        "groups": [],
        "filters": {
            "properties": {
                "id": "39777",
                "type": "OR",
                "values": [{
                    "id": "70427",
                    "type": "OR",
                    "values": [{
                        "type": "behavioral",
                        "value": "performed_event",
                        "event_type": "events",
                        "time_value": 30,
                        "time_interval": "day",
                        "key": "dashboard date range changed",
                        "negation": false
                    }]
                }]
            }
        },
        "is_calculating": false,
        "errors_calculating": 0
    }))
    .expect("mock cohort is valid JSON")
}

/// A saved dynamic cohort in the deprecated groups format, matching on an action.
pub fn mock_legacy_cohort() -> Cohort {
    serde_json::from_value(json!({
        "id": 2,
        "name": "Signed up",
        "description": "",
        "is_static": false,
        "groups": [{
            "id": "1",
            "action_id": 7,
            "days": "30"
        }],
        "filters": {
            "properties": {
                "id": "1000",
                "type": "OR",
                "values": []
            }
        },
        "is_calculating": false
    }))
    .expect("mock legacy cohort is valid JSON")
}

/// A complete performed-event criterion for `event`.
pub fn performed_event(event: &str) -> CohortCriteria {
    CohortCriteria {
        key: Some(json!(event)),
        ..CohortCriteria::new_criteria()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    successes: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn successes(&self) -> Vec<String> {
        self.successes.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn success(&self, message: &str) {
        self.successes.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    created: Mutex<Vec<Cohort>>,
    updated: Mutex<Vec<Cohort>>,
    deleted: Mutex<Vec<Cohort>>,
    membership_changes: Mutex<usize>,
    navigations: Mutex<usize>,
}

impl RecordingObserver {
    pub fn created(&self) -> Vec<Cohort> {
        self.created.lock().unwrap().clone()
    }

    pub fn updated(&self) -> Vec<Cohort> {
        self.updated.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<Cohort> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn membership_changes(&self) -> usize {
        *self.membership_changes.lock().unwrap()
    }

    pub fn navigations(&self) -> usize {
        *self.navigations.lock().unwrap()
    }
}

impl CohortObserver for RecordingObserver {
    fn cohort_created(&self, cohort: &Cohort) {
        self.created.lock().unwrap().push(cohort.clone());
    }

    fn cohort_updated(&self, cohort: &Cohort) {
        self.updated.lock().unwrap().push(cohort.clone());
    }

    fn cohort_deleted(&self, cohort: &Cohort) {
        self.deleted.lock().unwrap().push(cohort.clone());
    }

    fn membership_changed(&self, _cohort: &Cohort) {
        *self.membership_changes.lock().unwrap() += 1;
    }

    fn navigate_to_list(&self) {
        *self.navigations.lock().unwrap() += 1;
    }
}
