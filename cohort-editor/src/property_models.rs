use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorType {
    Exact,
    IsNot,
    Icontains,
    NotIcontains,
    Regex,
    NotRegex,
    Gt,
    Lt,
    Gte,
    Lte,
    IsSet,
    IsNotSet,
    IsDateExact,
    IsDateAfter,
    IsDateBefore,
    In,
    NotIn,
}

impl OperatorType {
    /// Operators that only check for presence and never look at a comparison value.
    pub fn is_presence_check(self) -> bool {
        matches!(self, OperatorType::IsSet | OperatorType::IsNotSet)
    }
}

/// A property filter as stored on legacy cohort match groups.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PropertyFilter {
    pub key: String,
    // is_set / is_not_set filters created through the API carry no value
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<OperatorType>,
    #[serde(rename = "type")]
    pub prop_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_type_index: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_filter_without_value_deserializes() {
        let filter: PropertyFilter = serde_json::from_value(json!({
            "key": "email",
            "type": "person",
            "operator": "is_set"
        }))
        .unwrap();

        assert_eq!(filter.value, None);
        assert_eq!(filter.operator, Some(OperatorType::IsSet));
        assert!(filter.operator.unwrap().is_presence_check());
    }
}
