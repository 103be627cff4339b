//! Structural edits over the cohort document.
//!
//! Every edit takes the current cohort and returns a new one. Edits never fail:
//! addresses that do not exist in the current tree leave it unchanged, and any
//! malformed state is left for the validator to report at submit time.

use serde_json::Value;

use crate::cohort_models::{
    generate_group_id, Cohort, CohortCriteriaGroupFilter, CohortGroup, CriteriaNode, CsvUpload,
    FilterLogicalOperator, MatchType,
};
use crate::criteria::{CohortCriteria, CriteriaUpdate};
use crate::property_models::PropertyFilter;

/// Which filter format an edit operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    LegacyGroups,
    CriteriaFilters,
}

/// A partial legacy group, merged over an existing one by `set_legacy_group`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct LegacyGroupUpdate {
    #[serde(rename = "matchType")]
    pub match_type: Option<MatchType>,
    pub properties: Option<Vec<PropertyFilter>>,
    pub action_id: Option<i64>,
    pub event_id: Option<String>,
    pub days: Option<String>,
    pub count: Option<i64>,
    pub count_operator: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CohortEdit {
    SetName(String),
    SetDescription(String),
    SetIsStatic(bool),
    SetCsv(Option<CsvUpload>),
    SetOuterOperator(FilterLogicalOperator),
    SetInnerOperator {
        operator: FilterLogicalOperator,
        group_index: usize,
    },
    AddGroup,
    RemoveGroup {
        group_index: usize,
    },
    DuplicateGroup {
        group_index: usize,
    },
    AddCriterion {
        group_index: usize,
    },
    RemoveCriterion {
        group_index: usize,
        criterion_index: usize,
    },
    DuplicateCriterion {
        group_index: usize,
        criterion_index: usize,
    },
    SetCriterion {
        update: CriteriaUpdate,
        group_index: usize,
        criterion_index: usize,
    },
    SetLegacyGroup {
        update: LegacyGroupUpdate,
        group_id: String,
    },
}

impl CohortEdit {
    /// The format this edit belongs to, or `None` for edits of the common cohort fields.
    pub fn format(&self) -> Option<FormatKind> {
        match self {
            CohortEdit::SetName(_)
            | CohortEdit::SetDescription(_)
            | CohortEdit::SetIsStatic(_)
            | CohortEdit::SetCsv(_) => None,
            CohortEdit::SetLegacyGroup { .. } => Some(FormatKind::LegacyGroups),
            _ => Some(FormatKind::CriteriaFilters),
        }
    }

    pub fn apply(&self, cohort: &Cohort) -> Cohort {
        match self {
            CohortEdit::SetName(name) => Cohort {
                name: name.clone(),
                ..cohort.clone()
            },
            CohortEdit::SetDescription(description) => Cohort {
                description: description.clone(),
                ..cohort.clone()
            },
            CohortEdit::SetIsStatic(is_static) => Cohort {
                is_static: *is_static,
                ..cohort.clone()
            },
            CohortEdit::SetCsv(csv) => Cohort {
                csv: csv.clone(),
                ..cohort.clone()
            },
            CohortEdit::SetOuterOperator(operator) => set_outer_operator(cohort, *operator),
            CohortEdit::SetInnerOperator {
                operator,
                group_index,
            } => set_inner_operator(cohort, *operator, *group_index),
            CohortEdit::AddGroup => add_group(cohort),
            CohortEdit::RemoveGroup { group_index } => remove_group(cohort, *group_index),
            CohortEdit::DuplicateGroup { group_index } => duplicate_group(cohort, *group_index),
            CohortEdit::AddCriterion { group_index } => add_criterion(cohort, *group_index),
            CohortEdit::RemoveCriterion {
                group_index,
                criterion_index,
            } => remove_criterion(cohort, *group_index, *criterion_index),
            CohortEdit::DuplicateCriterion {
                group_index,
                criterion_index,
            } => duplicate_criterion(cohort, *group_index, *criterion_index),
            CohortEdit::SetCriterion {
                update,
                group_index,
                criterion_index,
            } => set_criterion(cohort, update, *group_index, *criterion_index),
            CohortEdit::SetLegacyGroup { update, group_id } => {
                set_legacy_group(cohort, update, group_id)
            }
        }
    }
}

fn with_outer_values(
    cohort: &Cohort,
    edit: impl FnOnce(&[CriteriaNode]) -> Vec<CriteriaNode>,
) -> Cohort {
    let mut next = cohort.clone();
    next.filters.properties.values = edit(&cohort.filters.properties.values);
    next
}

fn with_inner_values(
    cohort: &Cohort,
    group_index: usize,
    edit: impl FnOnce(&[CriteriaNode]) -> Vec<CriteriaNode>,
) -> Cohort {
    with_outer_values(cohort, |groups| {
        let mut groups = groups.to_vec();
        if let Some(CriteriaNode::Group(group)) = groups.get_mut(group_index) {
            group.values = edit(&group.values);
        }
        groups
    })
}

fn duplicated_at<T: Clone>(items: &[T], index: usize) -> Vec<T> {
    let mut next = items.to_vec();
    if let Some(item) = items.get(index) {
        next.insert(index, item.clone());
    }
    next
}

fn removed_at<T: Clone>(items: &[T], index: usize) -> Vec<T> {
    let mut next = items.to_vec();
    if index < next.len() {
        next.remove(index);
    }
    next
}

pub fn set_outer_operator(cohort: &Cohort, operator: FilterLogicalOperator) -> Cohort {
    let mut next = cohort.clone();
    next.filters.properties.operator = operator;
    next
}

pub fn set_inner_operator(
    cohort: &Cohort,
    operator: FilterLogicalOperator,
    group_index: usize,
) -> Cohort {
    with_outer_values(cohort, |groups| {
        let mut groups = groups.to_vec();
        if let Some(CriteriaNode::Group(group)) = groups.get_mut(group_index) {
            group.operator = operator;
        }
        groups
    })
}

pub fn add_group(cohort: &Cohort) -> Cohort {
    with_outer_values(cohort, |groups| {
        let mut groups = groups.to_vec();
        groups.push(CriteriaNode::Group(
            CohortCriteriaGroupFilter::new_criteria_group(),
        ));
        groups
    })
}

pub fn remove_group(cohort: &Cohort, group_index: usize) -> Cohort {
    with_outer_values(cohort, |groups| removed_at(groups, group_index))
}

/// Inserts a copy of the group right before the original.
pub fn duplicate_group(cohort: &Cohort, group_index: usize) -> Cohort {
    with_outer_values(cohort, |groups| duplicated_at(groups, group_index))
}

pub fn add_criterion(cohort: &Cohort, group_index: usize) -> Cohort {
    with_inner_values(cohort, group_index, |criteria| {
        let mut criteria = criteria.to_vec();
        criteria.push(CriteriaNode::Criteria(CohortCriteria::new_criteria()));
        criteria
    })
}

pub fn remove_criterion(cohort: &Cohort, group_index: usize, criterion_index: usize) -> Cohort {
    with_inner_values(cohort, group_index, |criteria| {
        removed_at(criteria, criterion_index)
    })
}

pub fn duplicate_criterion(cohort: &Cohort, group_index: usize, criterion_index: usize) -> Cohort {
    with_inner_values(cohort, group_index, |criteria| {
        duplicated_at(criteria, criterion_index)
    })
}

/// Merges `update` into the criterion at the address and reshapes it to its row.
/// A nested group at the address is left as it is.
pub fn set_criterion(
    cohort: &Cohort,
    update: &CriteriaUpdate,
    group_index: usize,
    criterion_index: usize,
) -> Cohort {
    with_inner_values(cohort, group_index, |criteria| {
        let mut criteria = criteria.to_vec();
        if let Some(CriteriaNode::Criteria(old)) = criteria.get_mut(criterion_index) {
            *old = old.merge(update).clean();
        }
        criteria
    })
}

/// Legacy equivalent of `set_criterion`, addressing the group by id. Switching
/// `matchType` starts over from a blank group of the new kind.
pub fn set_legacy_group(cohort: &Cohort, update: &LegacyGroupUpdate, group_id: &str) -> Cohort {
    let mut next = cohort.clone();
    if let Some(group) = next.groups.iter_mut().find(|group| group.id == group_id) {
        let base = match update.match_type {
            Some(match_type) => CohortGroup::new_of(match_type, group.id.clone()),
            None => group.clone(),
        };
        *group = merge_legacy_group(base, update);
    }
    process_on_set(&next)
}

fn merge_legacy_group(base: CohortGroup, update: &LegacyGroupUpdate) -> CohortGroup {
    CohortGroup {
        id: base.id,
        match_type: update.match_type.or(base.match_type),
        properties: update.properties.clone().or(base.properties),
        action_id: update.action_id.or(base.action_id),
        event_id: update.event_id.clone().or(base.event_id),
        days: update.days.clone().or(base.days),
        count: update.count.or(base.count),
        count_operator: update.count_operator.clone().or(base.count_operator),
        label: update.label.clone().or(base.label),
    }
}

/// Normalizes a cohort whenever it is set wholesale: every legacy group gets an id
/// and a match type, and every criteria group gets an id.
pub fn process_on_set(cohort: &Cohort) -> Cohort {
    let mut next = cohort.clone();
    for group in next.groups.iter_mut() {
        if group.id.is_empty() {
            group.id = generate_group_id();
        }
        group.match_type = Some(group.inferred_match_type());
    }
    assign_group_ids(&mut next.filters.properties);
    next
}

fn assign_group_ids(group: &mut CohortCriteriaGroupFilter) {
    if group.id.is_empty() {
        group.id = generate_group_id();
    }
    for node in group.values.iter_mut() {
        if let CriteriaNode::Group(inner) = node {
            assign_group_ids(inner);
        }
    }
}

/// Id of the event a legacy entity group points at, if any.
pub fn legacy_entity_reference(group: &CohortGroup) -> Option<Value> {
    match (group.action_id, &group.event_id) {
        (Some(action_id), _) => Some(Value::from(action_id)),
        (None, Some(event_id)) if !event_id.is_empty() => Some(Value::from(event_id.as_str())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::BehavioralValue;
    use crate::test_utils::{mock_cohort, mock_legacy_cohort};
    use serde_json::json;

    fn inner_group(cohort: &Cohort, index: usize) -> &CohortCriteriaGroupFilter {
        match &cohort.filters.properties.values[index] {
            CriteriaNode::Group(group) => group,
            CriteriaNode::Criteria(_) => panic!("expected a group at {}", index),
        }
    }

    fn criteria_at(cohort: &Cohort, group_index: usize, index: usize) -> &CohortCriteria {
        match &inner_group(cohort, group_index).values[index] {
            CriteriaNode::Criteria(criteria) => criteria,
            CriteriaNode::Group(_) => panic!("expected criteria at {}", index),
        }
    }

    #[test]
    fn test_duplicate_group() {
        let cohort = mock_cohort();
        let next = duplicate_group(&cohort, 0);

        assert_eq!(next.filters.properties.values.len(), 2);
        assert_eq!(inner_group(&next, 0), inner_group(&cohort, 0));
        assert_eq!(inner_group(&next, 1), inner_group(&cohort, 0));
        // the input is never touched
        assert_eq!(cohort.filters.properties.values.len(), 1);
    }

    #[test]
    fn test_duplicate_group_is_independent_of_original() {
        let cohort = duplicate_group(&mock_cohort(), 0);
        let edited = set_inner_operator(&cohort, FilterLogicalOperator::And, 0);

        assert_eq!(inner_group(&edited, 0).operator, FilterLogicalOperator::And);
        assert_eq!(inner_group(&edited, 1).operator, FilterLogicalOperator::Or);

        let edited = set_criterion(
            &edited,
            &CriteriaUpdate {
                key: Some(Some(json!("$rageclick"))),
                ..Default::default()
            },
            1,
            0,
        );
        assert_eq!(criteria_at(&edited, 1, 0).key, Some(json!("$rageclick")));
        assert_eq!(
            criteria_at(&edited, 0, 0).key,
            Some(json!("dashboard date range changed"))
        );
    }

    #[test]
    fn test_remove_group() {
        let next = remove_group(&mock_cohort(), 0);

        assert!(next.filters.properties.values.is_empty());
    }

    #[test]
    fn test_add_group() {
        let cohort = mock_cohort();
        let next = add_group(&cohort);

        assert_eq!(inner_group(&next, 0), inner_group(&cohort, 0));
        let added = inner_group(&next, 1);
        assert_eq!(added.operator, FilterLogicalOperator::Or);
        assert_eq!(
            added.values,
            vec![CriteriaNode::Criteria(CohortCriteria::new_criteria())]
        );
    }

    #[test]
    fn test_add_then_remove_group_round_trips() {
        let cohort = mock_cohort();
        let added = add_group(&cohort);
        let index = added.filters.properties.values.len() - 1;

        assert_eq!(remove_group(&added, index), cohort);
    }

    #[test]
    fn test_duplicate_criterion() {
        let cohort = mock_cohort();
        let next = duplicate_criterion(&cohort, 0, 0);

        assert_eq!(inner_group(&next, 0).values.len(), 2);
        assert_eq!(criteria_at(&next, 0, 0), criteria_at(&cohort, 0, 0));
        assert_eq!(criteria_at(&next, 0, 1), criteria_at(&cohort, 0, 0));
    }

    #[test]
    fn test_remove_criterion() {
        let next = remove_criterion(&mock_cohort(), 0, 0);

        assert!(inner_group(&next, 0).values.is_empty());
    }

    #[test]
    fn test_add_criterion() {
        let cohort = mock_cohort();
        let next = add_criterion(&cohort, 0);

        assert_eq!(criteria_at(&next, 0, 0), criteria_at(&cohort, 0, 0));
        assert_eq!(criteria_at(&next, 0, 1), &CohortCriteria::new_criteria());
    }

    #[test]
    fn test_set_outer_operator() {
        let next = set_outer_operator(&mock_cohort(), FilterLogicalOperator::And);

        assert_eq!(next.filters.properties.operator, FilterLogicalOperator::And);
    }

    #[test]
    fn test_set_inner_operator() {
        let next = set_inner_operator(&mock_cohort(), FilterLogicalOperator::And, 0);

        assert_eq!(inner_group(&next, 0).operator, FilterLogicalOperator::And);
    }

    #[test]
    fn test_out_of_range_edits_leave_cohort_unchanged() {
        let cohort = mock_cohort();

        assert_eq!(remove_group(&cohort, 5), cohort);
        assert_eq!(duplicate_group(&cohort, 5), cohort);
        assert_eq!(add_criterion(&cohort, 5), cohort);
        assert_eq!(remove_criterion(&cohort, 0, 9), cohort);
        assert_eq!(duplicate_criterion(&cohort, 3, 0), cohort);
        assert_eq!(
            set_inner_operator(&cohort, FilterLogicalOperator::And, 2),
            cohort
        );
        assert_eq!(
            set_criterion(&cohort, &CriteriaUpdate::default(), 0, 4),
            cohort
        );
    }

    #[test]
    fn test_removing_last_criterion_leaves_empty_group() {
        let cohort = remove_criterion(&mock_cohort(), 0, 0);
        let cohort = remove_criterion(&cohort, 0, 0);

        assert!(inner_group(&cohort, 0).values.is_empty());
    }

    #[test]
    fn test_set_criterion_cleans_fields_for_new_row() {
        let next = set_criterion(
            &mock_cohort(),
            &CriteriaUpdate {
                value: Some(BehavioralValue::PerformedEventRegularly),
                ..Default::default()
            },
            0,
            0,
        );

        let criteria = criteria_at(&next, 0, 0);
        assert_eq!(
            criteria.value,
            Some(BehavioralValue::PerformedEventRegularly)
        );
        assert_eq!(criteria.min_periods, Some(3));
        assert_eq!(criteria.total_periods, Some(5));
        assert_eq!(criteria.key, Some(json!("dashboard date range changed")));
    }

    #[test]
    fn test_set_legacy_group_merges_fields() {
        let cohort = mock_legacy_cohort();
        let next = set_legacy_group(
            &cohort,
            &LegacyGroupUpdate {
                days: Some("7".to_string()),
                ..Default::default()
            },
            "1",
        );

        assert_eq!(next.groups[0].days, Some("7".to_string()));
        assert_eq!(next.groups[0].action_id, cohort.groups[0].action_id);
    }

    #[test]
    fn test_set_legacy_group_match_type_resets_group() {
        let cohort = mock_legacy_cohort();
        let next = set_legacy_group(
            &cohort,
            &LegacyGroupUpdate {
                match_type: Some(MatchType::Properties),
                ..Default::default()
            },
            "1",
        );

        let group = &next.groups[0];
        assert_eq!(group.id, "1");
        assert_eq!(group.match_type, Some(MatchType::Properties));
        assert_eq!(group.properties, Some(Vec::new()));
        assert_eq!(group.action_id, None);
        assert_eq!(group.days, None);
    }

    #[test]
    fn test_set_legacy_group_unknown_id_is_noop() {
        let cohort = process_on_set(&mock_legacy_cohort());

        assert_eq!(
            set_legacy_group(&cohort, &LegacyGroupUpdate::default(), "missing"),
            cohort
        );
    }

    #[test]
    fn test_process_on_set_fills_ids_and_match_types() {
        let mut cohort = mock_legacy_cohort();
        cohort.groups.push(CohortGroup {
            properties: Some(Vec::new()),
            ..Default::default()
        });
        cohort.filters.properties.id = String::new();

        let next = process_on_set(&cohort);

        assert!(!next.groups[1].id.is_empty());
        assert_eq!(next.groups[1].match_type, Some(MatchType::Properties));
        assert_eq!(next.groups[0].match_type, Some(MatchType::Entities));
        assert!(!next.filters.properties.id.is_empty());
    }

    #[test]
    fn test_edit_format() {
        assert_eq!(CohortEdit::SetName("x".to_string()).format(), None);
        assert_eq!(
            CohortEdit::AddGroup.format(),
            Some(FormatKind::CriteriaFilters)
        );
        assert_eq!(
            CohortEdit::SetLegacyGroup {
                update: LegacyGroupUpdate::default(),
                group_id: "1".to_string()
            }
            .format(),
            Some(FormatKind::LegacyGroups)
        );
    }

    #[test]
    fn test_legacy_entity_reference() {
        let group = CohortGroup {
            event_id: Some("$pageview".to_string()),
            ..Default::default()
        };
        assert_eq!(legacy_entity_reference(&group), Some(json!("$pageview")));
        assert_eq!(legacy_entity_reference(&CohortGroup::default()), None);
    }
}
