//! Submit-time validation of a cohort.
//!
//! The error tree has the same shape as the cohort: each group and criterion
//! gets an error node at the same position, with absent keys where nothing is
//! wrong, so errors can be shown inline next to the offending field.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cohort_models::{
    Cohort, CohortCriteriaGroupFilter, CohortGroup, CriteriaNode, FilterLogicalOperator, MatchType,
};
use crate::criteria::{CohortCriteria, CriteriaField};
use crate::document::legacy_entity_reference;

pub const NAME_REQUIRED: &str = "You need to set a name.";
pub const CSV_REQUIRED: &str = "You need to upload a CSV file.";
pub const MATCHING_GROUP_REQUIRED: &str = "You need at least one matching group.";
pub const MATCHING_CRITERIA_REQUIRED: &str = "You need at least one matching criteria.";
pub const PROPERTY_GROUP_EMPTY: &str =
    "Please select at least one property or remove this match group.";
pub const ENTITY_GROUP_EMPTY: &str = "Please select an event or action.";
pub const PERIOD_RANGE_INVALID: &str =
    "The lowerbound period value must not be greater than the upperbound value.";
pub const NEGATION_WITHOUT_POSITIVE: &str = "Negation criteria are only supported after you have specified at least one positive matching criteria. Negation criteria can only be used when matching all criteria (AND).";
pub const CRITERIA_CANCEL_OUT: &str =
    "These criteria cancel each other out, and would result in no matching persons.";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CohortErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<LegacyGroupErrors>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterErrors>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LegacyGroupErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<&'static str>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterErrors {
    pub properties: GroupErrors,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<&'static str>,
    pub values: Vec<NodeErrors>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeErrors {
    Group(GroupErrors),
    Criteria(CriteriaErrors),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CriteriaErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<&'static str>,
    #[serde(flatten)]
    pub fields: BTreeMap<CriteriaField, &'static str>,
}

impl CohortErrors {
    pub fn has_errors(&self) -> bool {
        self.name.is_some()
            || self.csv.is_some()
            || self
                .groups
                .as_ref()
                .is_some_and(|groups| groups.iter().any(|group| group.id.is_some()))
            || self
                .filters
                .as_ref()
                .is_some_and(|filters| filters.properties.has_errors())
    }
}

impl GroupErrors {
    pub fn has_errors(&self) -> bool {
        self.id.is_some() || self.values.iter().any(NodeErrors::has_errors)
    }
}

impl NodeErrors {
    pub fn has_errors(&self) -> bool {
        match self {
            NodeErrors::Group(group) => group.has_errors(),
            NodeErrors::Criteria(criteria) => criteria.has_errors(),
        }
    }
}

impl CriteriaErrors {
    pub fn has_errors(&self) -> bool {
        self.id.is_some() || !self.fields.is_empty()
    }

    pub fn field(&self, field: CriteriaField) -> Option<&'static str> {
        self.fields.get(&field).copied()
    }

    // first rule to report on a key keeps it
    fn add(&mut self, field: CriteriaField, message: &'static str) {
        self.fields.entry(field).or_insert(message);
    }

    fn add_id(&mut self, message: &'static str) {
        self.id.get_or_insert(message);
    }
}

/// Name and CSV checks shared by both filter formats.
pub fn validate_common(cohort: &Cohort) -> CohortErrors {
    CohortErrors {
        name: cohort.name.trim().is_empty().then_some(NAME_REQUIRED),
        csv: (cohort.is_static && cohort.csv.is_none() && cohort.groups.is_empty())
            .then_some(CSV_REQUIRED),
        ..Default::default()
    }
}

/// Validates a cohort edited through the deprecated `groups` format.
pub fn validate_legacy_groups(cohort: &Cohort) -> CohortErrors {
    let groups = if cohort.is_static {
        None
    } else if cohort.groups.is_empty() {
        Some(vec![LegacyGroupErrors {
            id: Some(MATCHING_GROUP_REQUIRED),
        }])
    } else {
        Some(cohort.groups.iter().map(validate_legacy_group).collect())
    };

    CohortErrors {
        groups,
        ..validate_common(cohort)
    }
}

fn validate_legacy_group(group: &CohortGroup) -> LegacyGroupErrors {
    let id = match group.inferred_match_type() {
        MatchType::Properties if group.properties.as_ref().map_or(true, Vec::is_empty) => {
            Some(PROPERTY_GROUP_EMPTY)
        }
        MatchType::Entities if legacy_entity_reference(group).is_none() => {
            Some(ENTITY_GROUP_EMPTY)
        }
        _ => None,
    };
    LegacyGroupErrors { id }
}

/// Validates a cohort edited through the criteria filter tree.
pub fn validate_criteria_filters(cohort: &Cohort) -> CohortErrors {
    let filters = (!cohort.is_static).then(|| {
        let outer = &cohort.filters.properties;
        FilterErrors {
            properties: GroupErrors {
                id: outer.values.is_empty().then_some(MATCHING_GROUP_REQUIRED),
                values: outer.values.iter().map(validate_node).collect(),
            },
        }
    });

    CohortErrors {
        filters,
        ..validate_common(cohort)
    }
}

fn validate_node(node: &CriteriaNode) -> NodeErrors {
    match node {
        CriteriaNode::Group(group) => NodeErrors::Group(validate_group(group)),
        CriteriaNode::Criteria(criteria) => {
            let mut errors = CriteriaErrors::default();
            validate_criteria(criteria, &mut errors);
            NodeErrors::Criteria(errors)
        }
    }
}

/// Validates one group: negation consistency across its direct criteria, then
/// period ranges and mandatory fields of each criterion. Nested groups are
/// validated the same way on their own.
pub fn validate_group(group: &CohortCriteriaGroupFilter) -> GroupErrors {
    let mut group_id = group.values.is_empty().then_some(MATCHING_CRITERIA_REQUIRED);
    let mut criteria_errors: Vec<Option<CriteriaErrors>> = group
        .values
        .iter()
        .map(|node| match node {
            CriteriaNode::Criteria(_) => Some(CriteriaErrors::default()),
            CriteriaNode::Group(_) => None,
        })
        .collect();

    let (negated, positive): (Vec<_>, Vec<_>) =
        group.criteria().partition(|(_, criteria)| criteria.negation);

    if !negated.is_empty() && (positive.is_empty() || group.operator == FilterLogicalOperator::Or)
    {
        group_id.get_or_insert(NEGATION_WITHOUT_POSITIVE);
        for errors in criteria_errors.iter_mut().flatten() {
            errors.add(CriteriaField::Value, NEGATION_WITHOUT_POSITIVE);
        }
    } else {
        for (negated_index, negated_criteria) in &negated {
            for (positive_index, positive_criteria) in &positive {
                if !negated_criteria.matches_ignoring_negation(positive_criteria) {
                    continue;
                }
                group_id.get_or_insert(CRITERIA_CANCEL_OUT);
                for index in [*negated_index, *positive_index] {
                    if let Some(Some(errors)) = criteria_errors.get_mut(index) {
                        errors.add(CriteriaField::Value, CRITERIA_CANCEL_OUT);
                    }
                }
            }
        }
    }

    let values = group
        .values
        .iter()
        .zip(criteria_errors)
        .map(|(node, errors)| match (node, errors) {
            (CriteriaNode::Criteria(criteria), Some(mut errors)) => {
                validate_criteria(criteria, &mut errors);
                NodeErrors::Criteria(errors)
            }
            (CriteriaNode::Group(inner), _) => NodeErrors::Group(validate_group(inner)),
            (CriteriaNode::Criteria(_), None) => NodeErrors::Criteria(CriteriaErrors::default()),
        })
        .collect();

    GroupErrors {
        id: group_id,
        values,
    }
}

/// Field-level checks of a single criterion: period range first, then missing fields.
pub fn validate_criteria(criteria: &CohortCriteria, errors: &mut CriteriaErrors) {
    if let (Some(min_periods), Some(total_periods)) = (criteria.min_periods, criteria.total_periods)
    {
        if min_periods > total_periods {
            errors.add_id(PERIOD_RANGE_INVALID);
            errors.add(CriteriaField::MinPeriods, PERIOD_RANGE_INVALID);
            errors.add(CriteriaField::TotalPeriods, PERIOD_RANGE_INVALID);
        }
    }

    for (field, message) in criteria.missing_fields() {
        errors.add(field, message);
    }
}
