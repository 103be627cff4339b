use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::cohort_models::{Cohort, CohortFilters, CohortGroup, CsvUpload};
use crate::document::{CohortEdit, FormatKind};
use crate::validation::{validate_criteria_filters, validate_legacy_groups, CohortErrors};

/// Body sent to the cohorts API on create and update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortPayload {
    pub name: String,
    pub description: String,
    pub is_static: bool,
    pub groups: Vec<CohortGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<CohortFilters>,
    // sent as a multipart file part, never as JSON
    #[serde(skip)]
    pub csv: Option<CsvUpload>,
}

impl CohortPayload {
    fn common(cohort: &Cohort) -> Self {
        CohortPayload {
            name: cohort.name.clone(),
            description: cohort.description.clone(),
            is_static: cohort.is_static,
            groups: Vec::new(),
            filters: None,
            csv: cohort.csv.clone(),
        }
    }
}

/// One of the two filter formats a cohort can be edited in. The session picks one
/// when it is created and routes every edit, validation and save through it.
pub trait CohortFormat {
    fn kind(&self) -> FormatKind;

    fn validate(&self, cohort: &Cohort) -> CohortErrors;

    fn payload(&self, cohort: &Cohort) -> CohortPayload;

    /// Applies `edit` when it belongs to this format or to the common cohort fields.
    fn apply_edit(&self, cohort: &Cohort, edit: &CohortEdit) -> Cohort {
        match edit.format() {
            Some(kind) if kind != self.kind() => {
                warn!(
                    "ignoring {:?} edit on a cohort edited as {:?}",
                    kind,
                    self.kind()
                );
                cohort.clone()
            }
            _ => edit.apply(cohort),
        }
    }
}

pub struct LegacyGroups;

impl CohortFormat for LegacyGroups {
    fn kind(&self) -> FormatKind {
        FormatKind::LegacyGroups
    }

    fn validate(&self, cohort: &Cohort) -> CohortErrors {
        validate_legacy_groups(cohort)
    }

    fn payload(&self, cohort: &Cohort) -> CohortPayload {
        CohortPayload {
            groups: cohort.groups.clone(),
            ..CohortPayload::common(cohort)
        }
    }
}

pub struct CriteriaFilters;

impl CohortFormat for CriteriaFilters {
    fn kind(&self) -> FormatKind {
        FormatKind::CriteriaFilters
    }

    fn validate(&self, cohort: &Cohort) -> CohortErrors {
        validate_criteria_filters(cohort)
    }

    fn payload(&self, cohort: &Cohort) -> CohortPayload {
        CohortPayload {
            filters: Some(cohort.filters.clone()),
            ..CohortPayload::common(cohort)
        }
    }
}

pub fn select_format(cohort_filters_enabled: bool) -> Arc<dyn CohortFormat + Send + Sync> {
    if cohort_filters_enabled {
        Arc::new(CriteriaFilters)
    } else {
        Arc::new(LegacyGroups)
    }
}
