use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::criteria::CohortCriteria;
use crate::property_models::PropertyFilter;

pub type CohortId = i64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterLogicalOperator {
    And,
    #[default]
    Or,
}

/// The cohort being edited, in the shape the cohorts API returns it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Cohort {
    // None until the cohort has been created on the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CohortId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(skip)]
    pub csv: Option<CsvUpload>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub groups: Vec<CohortGroup>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filters: CohortFilters,
    #[serde(default)]
    pub is_calculating: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    #[serde(default)]
    pub errors_calculating: i32,
    #[serde(default)]
    pub deleted: bool,
}

/// A membership list uploaded for a static cohort. Only ever sent, never read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvUpload {
    pub file_name: String,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CohortFilters {
    pub properties: CohortCriteriaGroupFilter,
}

/// A logical container of criteria or further groups.
///
/// By convention the outer group (`filters.properties`) holds inner groups and
/// inner groups hold criteria:
/// ```json
/// {
///   "id": "39777",
///   "type": "OR",
///   "values": [
///     {
///       "id": "70427",
///       "type": "AND",
///       "values": [
///         {"type": "behavioral", "value": "performed_event", "key": "$pageview", ...}
///       ]
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CohortCriteriaGroupFilter {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub operator: FilterLogicalOperator,
    #[serde(default)]
    pub values: Vec<CriteriaNode>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CriteriaNode {
    Group(CohortCriteriaGroupFilter),
    Criteria(CohortCriteria),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Entities,
    Properties,
}

/// A match group of the deprecated `groups` format.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CohortGroup {
    #[serde(default)]
    pub id: String,
    #[serde(
        rename = "matchType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub match_type: Option<MatchType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<PropertyFilter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn generate_group_id() -> String {
    Uuid::now_v7().to_string()
}

impl Cohort {
    /// The blank cohort a session starts from when no id is given.
    pub fn new_cohort() -> Self {
        Cohort {
            id: None,
            name: String::new(),
            description: String::new(),
            is_static: false,
            csv: None,
            groups: Vec::new(),
            filters: CohortFilters {
                properties: CohortCriteriaGroupFilter {
                    id: generate_group_id(),
                    operator: FilterLogicalOperator::Or,
                    values: vec![CriteriaNode::Group(
                        CohortCriteriaGroupFilter::new_criteria_group(),
                    )],
                },
            },
            is_calculating: false,
            count: None,
            errors_calculating: 0,
            deleted: false,
        }
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }
}

impl Default for CohortFilters {
    fn default() -> Self {
        CohortFilters {
            properties: CohortCriteriaGroupFilter {
                id: generate_group_id(),
                operator: FilterLogicalOperator::Or,
                values: Vec::new(),
            },
        }
    }
}

impl CohortCriteriaGroupFilter {
    /// The inner group added when the user asks for a new matching group.
    pub fn new_criteria_group() -> Self {
        CohortCriteriaGroupFilter {
            id: generate_group_id(),
            operator: FilterLogicalOperator::Or,
            values: vec![CriteriaNode::Criteria(CohortCriteria::new_criteria())],
        }
    }

    /// Leaf criteria directly inside this group, with their position in `values`.
    pub fn criteria(&self) -> impl Iterator<Item = (usize, &CohortCriteria)> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(index, node)| match node {
                CriteriaNode::Criteria(criteria) => Some((index, criteria)),
                CriteriaNode::Group(_) => None,
            })
    }
}

impl CohortGroup {
    /// A fresh group of the given kind, keeping only the id.
    pub fn new_of(match_type: MatchType, id: String) -> Self {
        CohortGroup {
            id,
            match_type: Some(match_type),
            properties: match match_type {
                MatchType::Properties => Some(Vec::new()),
                MatchType::Entities => None,
            },
            ..Default::default()
        }
    }

    pub fn inferred_match_type(&self) -> MatchType {
        match (self.match_type, &self.properties) {
            (Some(match_type), _) => match_type,
            (None, Some(_)) => MatchType::Properties,
            (None, None) => MatchType::Entities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::{BehavioralFilterKey, BehavioralValue};
    use serde_json::json;

    #[test]
    fn test_cohort_deserializes_nested_filters() {
        let cohort: Cohort = serde_json::from_value(json!({
            "id": 1,
            "name": "Power users",
            "description": null,
            "is_static": false,
            "groups": [],
            "filters": {
                "properties": {
                    "id": "39777",
                    "type": "OR",
                    "values": [{
                        "id": "70427",
                        "type": "AND",
                        "values": [{
                            "type": "behavioral",
                            "value": "performed_event",
                            "event_type": "events",
                            "time_value": 30,
                            "time_interval": "day",
                            "key": "dashboard date range changed"
                        }]
                    }]
                }
            },
            "is_calculating": true,
            "count": 42
        }))
        .unwrap();

        assert_eq!(cohort.id, Some(1));
        assert_eq!(cohort.description, "");
        assert!(cohort.is_calculating);
        let outer = &cohort.filters.properties;
        assert_eq!(outer.operator, FilterLogicalOperator::Or);
        let CriteriaNode::Group(inner) = &outer.values[0] else {
            panic!("expected an inner group");
        };
        assert_eq!(inner.operator, FilterLogicalOperator::And);
        let (_, criteria) = inner.criteria().next().unwrap();
        assert_eq!(criteria.filter_key, BehavioralFilterKey::Behavioral);
        assert_eq!(criteria.value, Some(BehavioralValue::PerformedEvent));
    }

    #[test]
    fn test_cohort_with_null_filters_gets_empty_outer_group() {
        let cohort: Cohort = serde_json::from_value(json!({
            "id": 3,
            "name": "Uploaded",
            "is_static": true,
            "filters": null,
            "groups": null
        }))
        .unwrap();

        assert!(cohort.groups.is_empty());
        assert!(cohort.filters.properties.values.is_empty());
    }

    #[test]
    fn test_new_cohort_serializes_without_id_or_csv() {
        let mut cohort = Cohort::new_cohort();
        cohort.csv = Some(CsvUpload {
            file_name: "users.csv".to_string(),
            contents: b"distinct_id\n1\n".to_vec(),
        });

        let value = serde_json::to_value(&cohort).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("csv").is_none());
        assert_eq!(value["filters"]["properties"]["type"], json!("OR"));
    }

    #[test]
    fn test_legacy_group_match_type_inference() {
        let group: CohortGroup = serde_json::from_value(json!({
            "id": "1",
            "properties": [{"key": "email", "type": "person", "value": "a@b.c"}]
        }))
        .unwrap();
        assert_eq!(group.inferred_match_type(), MatchType::Properties);

        let group: CohortGroup =
            serde_json::from_value(json!({"id": "2", "action_id": 4})).unwrap();
        assert_eq!(group.inferred_match_type(), MatchType::Entities);
    }
}
