use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use strum::{AsRefStr, EnumIter};

use crate::property_models::OperatorType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BehavioralFilterKey {
    Behavioral,
    Person,
    Cohort,
}

/// Selects the row shape of a criterion, i.e. which fields it needs to be complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, AsRefStr, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BehavioralValue {
    PerformedEvent,
    PerformedEventMultiple,
    PerformedEventFirstTime,
    PerformedEventSequence,
    NotPerformedEventSequence,
    PerformedEventRegularly,
    StoppedPerformingEvent,
    RestartedPerformingEvent,
    HaveProperty,
    NotHaveProperty,
    InCohort,
    NotInCohort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Events,
    Actions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Day,
    Week,
    Month,
    Year,
}

/// Field keys of a criterion, as they appear in the JSON document and in error trees.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CriteriaField {
    Value,
    Key,
    Operator,
    OperatorValue,
    TimeValue,
    TimeInterval,
    SeqEvent,
    SeqTimeValue,
    SeqTimeInterval,
    MinPeriods,
    TotalPeriods,
    ValueProperty,
}

/// How a field is filled in, which decides the message shown when it is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Event,
    PersonProperty,
    PropertyOperator,
    PropertyValue,
    Cohort,
    MathOperator,
    Number,
    Period,
    TimeUnit,
}

impl FieldType {
    pub fn missing_message(self) -> &'static str {
        match self {
            FieldType::Event => "Event or action cannot be empty.",
            FieldType::PersonProperty => "Person property cannot be empty.",
            FieldType::PropertyOperator => "Property operator cannot be empty.",
            FieldType::PropertyValue => "Property value cannot be empty.",
            FieldType::Cohort => "Cohort value cannot be empty.",
            FieldType::MathOperator => "Math operator cannot be empty.",
            FieldType::Number => "Number cannot be empty.",
            FieldType::Period => "Period values must be at least 1 day and cannot be empty.",
            FieldType::TimeUnit => "Time interval cannot be empty.",
        }
    }

    fn check(self, value: Option<FieldValue<'_>>) -> Option<&'static str> {
        let valid = match (self, value) {
            (_, None) => false,
            (FieldType::Period, Some(FieldValue::Number(n))) => n >= 1,
            (_, Some(FieldValue::Json(Value::Null))) => false,
            (_, Some(FieldValue::Json(Value::String(s)))) => !s.is_empty(),
            (_, Some(FieldValue::Json(Value::Array(items)))) => !items.is_empty(),
            (_, Some(_)) => true,
        };
        (!valid).then(|| self.missing_message())
    }
}

pub const CRITERIA_VALUE_MISSING: &str = "Criteria type cannot be empty.";

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub field: CriteriaField,
    pub field_type: FieldType,
}

const fn spec(field: CriteriaField, field_type: FieldType) -> FieldSpec {
    FieldSpec { field, field_type }
}

const EVENT_IN_PERIOD: &[FieldSpec] = &[
    spec(CriteriaField::Key, FieldType::Event),
    spec(CriteriaField::TimeValue, FieldType::Period),
    spec(CriteriaField::TimeInterval, FieldType::TimeUnit),
];

const EVENT_COUNT_IN_PERIOD: &[FieldSpec] = &[
    spec(CriteriaField::Key, FieldType::Event),
    spec(CriteriaField::Operator, FieldType::MathOperator),
    spec(CriteriaField::OperatorValue, FieldType::Number),
    spec(CriteriaField::TimeValue, FieldType::Period),
    spec(CriteriaField::TimeInterval, FieldType::TimeUnit),
];

const EVENT_SEQUENCE: &[FieldSpec] = &[
    spec(CriteriaField::Key, FieldType::Event),
    spec(CriteriaField::TimeValue, FieldType::Period),
    spec(CriteriaField::TimeInterval, FieldType::TimeUnit),
    spec(CriteriaField::SeqEvent, FieldType::Event),
    spec(CriteriaField::SeqTimeValue, FieldType::Period),
    spec(CriteriaField::SeqTimeInterval, FieldType::TimeUnit),
];

const EVENT_REGULARLY: &[FieldSpec] = &[
    spec(CriteriaField::Key, FieldType::Event),
    spec(CriteriaField::Operator, FieldType::MathOperator),
    spec(CriteriaField::OperatorValue, FieldType::Number),
    spec(CriteriaField::TimeValue, FieldType::Period),
    spec(CriteriaField::TimeInterval, FieldType::TimeUnit),
    spec(CriteriaField::MinPeriods, FieldType::Period),
    spec(CriteriaField::TotalPeriods, FieldType::Period),
];

const EVENT_LIFECYCLE: &[FieldSpec] = &[
    spec(CriteriaField::Key, FieldType::Event),
    spec(CriteriaField::TimeValue, FieldType::Period),
    spec(CriteriaField::TimeInterval, FieldType::TimeUnit),
    spec(CriteriaField::SeqTimeValue, FieldType::Period),
    spec(CriteriaField::SeqTimeInterval, FieldType::TimeUnit),
];

const PERSON_PROPERTY: &[FieldSpec] = &[
    spec(CriteriaField::Key, FieldType::PersonProperty),
    spec(CriteriaField::Operator, FieldType::PropertyOperator),
    spec(CriteriaField::ValueProperty, FieldType::PropertyValue),
];

const COHORT_MEMBERSHIP: &[FieldSpec] = &[spec(CriteriaField::ValueProperty, FieldType::Cohort)];

#[derive(Debug, Clone, Copy)]
pub struct RowShape {
    pub filter_key: BehavioralFilterKey,
    pub fields: &'static [FieldSpec],
}

impl BehavioralValue {
    pub fn row(self) -> RowShape {
        let (filter_key, fields) = match self {
            BehavioralValue::PerformedEvent | BehavioralValue::PerformedEventFirstTime => {
                (BehavioralFilterKey::Behavioral, EVENT_IN_PERIOD)
            }
            BehavioralValue::PerformedEventMultiple => {
                (BehavioralFilterKey::Behavioral, EVENT_COUNT_IN_PERIOD)
            }
            BehavioralValue::PerformedEventSequence
            | BehavioralValue::NotPerformedEventSequence => {
                (BehavioralFilterKey::Behavioral, EVENT_SEQUENCE)
            }
            BehavioralValue::PerformedEventRegularly => {
                (BehavioralFilterKey::Behavioral, EVENT_REGULARLY)
            }
            BehavioralValue::StoppedPerformingEvent
            | BehavioralValue::RestartedPerformingEvent => {
                (BehavioralFilterKey::Behavioral, EVENT_LIFECYCLE)
            }
            BehavioralValue::HaveProperty | BehavioralValue::NotHaveProperty => {
                (BehavioralFilterKey::Person, PERSON_PROPERTY)
            }
            BehavioralValue::InCohort | BehavioralValue::NotInCohort => {
                (BehavioralFilterKey::Cohort, COHORT_MEMBERSHIP)
            }
        };
        RowShape { filter_key, fields }
    }
}

enum FieldValue<'a> {
    Number(i64),
    Json(&'a Value),
    Present,
}

/// A single matching condition inside a criteria group.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CohortCriteria {
    #[serde(rename = "type")]
    pub filter_key: BehavioralFilterKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<BehavioralValue>,
    // event name, or action id when event_type is actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<OperatorType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_interval: Option<TimeUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_event: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_event_type: Option<EventType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_time_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_time_interval: Option<TimeUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_periods: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_periods: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_property: Option<Value>,
    #[serde(default)]
    pub negation: bool,
}

/// A partial criterion, merged over an existing one by `CohortCriteria::merge`.
///
/// A field left out of the update keeps its current value. A field sent as `null`,
/// i.e. `Some(None)`, is cleared.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CriteriaUpdate {
    #[serde(default, rename = "type")]
    pub filter_key: Option<BehavioralFilterKey>,
    #[serde(default)]
    pub value: Option<BehavioralValue>,
    #[serde(default, deserialize_with = "present")]
    pub key: Option<Option<Value>>,
    #[serde(default, deserialize_with = "present")]
    pub event_type: Option<Option<EventType>>,
    #[serde(default, deserialize_with = "present")]
    pub operator: Option<Option<OperatorType>>,
    #[serde(default, deserialize_with = "present")]
    pub operator_value: Option<Option<i64>>,
    #[serde(default, deserialize_with = "present")]
    pub time_value: Option<Option<i64>>,
    #[serde(default, deserialize_with = "present")]
    pub time_interval: Option<Option<TimeUnit>>,
    #[serde(default, deserialize_with = "present")]
    pub seq_event: Option<Option<Value>>,
    #[serde(default, deserialize_with = "present")]
    pub seq_event_type: Option<Option<EventType>>,
    #[serde(default, deserialize_with = "present")]
    pub seq_time_value: Option<Option<i64>>,
    #[serde(default, deserialize_with = "present")]
    pub seq_time_interval: Option<Option<TimeUnit>>,
    #[serde(default, deserialize_with = "present")]
    pub min_periods: Option<Option<i64>>,
    #[serde(default, deserialize_with = "present")]
    pub total_periods: Option<Option<i64>>,
    #[serde(default, deserialize_with = "present")]
    pub value_property: Option<Option<Value>>,
    #[serde(default)]
    pub negation: Option<bool>,
}

// Only called for keys that are in the input, so `null` becomes `Some(None)`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn merge_field<T: Clone>(target: &mut Option<T>, update: &Option<Option<T>>) {
    if let Some(value) = update {
        *target = value.clone();
    }
}

impl CohortCriteria {
    /// An empty criterion of the given row kind, with nothing but its discriminators set.
    pub fn blank(value: BehavioralValue) -> Self {
        CohortCriteria {
            filter_key: value.row().filter_key,
            value: Some(value),
            key: None,
            event_type: None,
            operator: None,
            operator_value: None,
            time_value: None,
            time_interval: None,
            seq_event: None,
            seq_event_type: None,
            seq_time_value: None,
            seq_time_interval: None,
            min_periods: None,
            total_periods: None,
            value_property: None,
            negation: false,
        }
    }

    /// The criterion added to a group when the user asks for a new one.
    pub fn new_criteria() -> Self {
        CohortCriteria {
            event_type: Some(EventType::Events),
            time_value: Some(30),
            time_interval: Some(TimeUnit::Day),
            ..CohortCriteria::blank(BehavioralValue::PerformedEvent)
        }
    }

    pub fn merge(&self, update: &CriteriaUpdate) -> Self {
        let mut merged = self.clone();
        if let Some(filter_key) = update.filter_key {
            merged.filter_key = filter_key;
        }
        merged.value = update.value.or(merged.value);
        merge_field(&mut merged.key, &update.key);
        merge_field(&mut merged.event_type, &update.event_type);
        merge_field(&mut merged.operator, &update.operator);
        merge_field(&mut merged.operator_value, &update.operator_value);
        merge_field(&mut merged.time_value, &update.time_value);
        merge_field(&mut merged.time_interval, &update.time_interval);
        merge_field(&mut merged.seq_event, &update.seq_event);
        merge_field(&mut merged.seq_event_type, &update.seq_event_type);
        merge_field(&mut merged.seq_time_value, &update.seq_time_value);
        merge_field(&mut merged.seq_time_interval, &update.seq_time_interval);
        merge_field(&mut merged.min_periods, &update.min_periods);
        merge_field(&mut merged.total_periods, &update.total_periods);
        merge_field(&mut merged.value_property, &update.value_property);
        if let Some(negation) = update.negation {
            merged.negation = negation;
        }
        merged
    }

    /// Reshapes the criterion to its row: `type` follows `value`, fields the row does not
    /// declare are dropped and declared fields that are still empty get the row defaults.
    pub fn clean(&self) -> Self {
        let Some(value) = self.value else {
            return self.clone();
        };

        let mut cleaned = CohortCriteria {
            negation: self.negation,
            ..CohortCriteria::blank(value)
        };
        for spec in value.row().fields {
            cleaned.copy_field(self, spec.field);
            cleaned.fill_default(spec);
        }
        cleaned
    }

    fn copy_field(&mut self, from: &CohortCriteria, field: CriteriaField) {
        match field {
            CriteriaField::Value => self.value = from.value,
            CriteriaField::Key => {
                self.key = from.key.clone();
                self.event_type = from.event_type;
            }
            CriteriaField::Operator => self.operator = from.operator,
            CriteriaField::OperatorValue => self.operator_value = from.operator_value,
            CriteriaField::TimeValue => self.time_value = from.time_value,
            CriteriaField::TimeInterval => self.time_interval = from.time_interval,
            CriteriaField::SeqEvent => {
                self.seq_event = from.seq_event.clone();
                self.seq_event_type = from.seq_event_type;
            }
            CriteriaField::SeqTimeValue => self.seq_time_value = from.seq_time_value,
            CriteriaField::SeqTimeInterval => self.seq_time_interval = from.seq_time_interval,
            CriteriaField::MinPeriods => self.min_periods = from.min_periods,
            CriteriaField::TotalPeriods => self.total_periods = from.total_periods,
            CriteriaField::ValueProperty => self.value_property = from.value_property.clone(),
        }
    }

    fn fill_default(&mut self, spec: &FieldSpec) {
        match (spec.field, spec.field_type) {
            (CriteriaField::Key, FieldType::Event) => {
                self.event_type.get_or_insert(EventType::Events);
            }
            (CriteriaField::SeqEvent, _) => {
                self.seq_event_type.get_or_insert(EventType::Events);
            }
            (CriteriaField::Operator, FieldType::MathOperator) => {
                self.operator.get_or_insert(OperatorType::Gte);
            }
            (CriteriaField::Operator, _) => {
                self.operator.get_or_insert(OperatorType::Exact);
            }
            (CriteriaField::OperatorValue, _) => {
                self.operator_value.get_or_insert(5);
            }
            (CriteriaField::TimeValue, _) => {
                self.time_value.get_or_insert(30);
            }
            (CriteriaField::TimeInterval, _) => {
                self.time_interval.get_or_insert(TimeUnit::Day);
            }
            (CriteriaField::SeqTimeValue, _) => {
                self.seq_time_value.get_or_insert(30);
            }
            (CriteriaField::SeqTimeInterval, _) => {
                self.seq_time_interval.get_or_insert(TimeUnit::Day);
            }
            (CriteriaField::MinPeriods, _) => {
                self.min_periods.get_or_insert(3);
            }
            (CriteriaField::TotalPeriods, _) => {
                self.total_periods.get_or_insert(5);
            }
            _ => {}
        }
    }

    fn field_value(&self, field: CriteriaField) -> Option<FieldValue<'_>> {
        match field {
            CriteriaField::Value => self.value.map(|_| FieldValue::Present),
            CriteriaField::Key => self.key.as_ref().map(FieldValue::Json),
            CriteriaField::Operator => self.operator.map(|_| FieldValue::Present),
            CriteriaField::OperatorValue => self.operator_value.map(FieldValue::Number),
            CriteriaField::TimeValue => self.time_value.map(FieldValue::Number),
            CriteriaField::TimeInterval => self.time_interval.map(|_| FieldValue::Present),
            CriteriaField::SeqEvent => self.seq_event.as_ref().map(FieldValue::Json),
            CriteriaField::SeqTimeValue => self.seq_time_value.map(FieldValue::Number),
            CriteriaField::SeqTimeInterval => self.seq_time_interval.map(|_| FieldValue::Present),
            CriteriaField::MinPeriods => self.min_periods.map(FieldValue::Number),
            CriteriaField::TotalPeriods => self.total_periods.map(FieldValue::Number),
            CriteriaField::ValueProperty => self.value_property.as_ref().map(FieldValue::Json),
        }
    }

    /// Mandatory fields of this criterion's row that are missing, with the message for each.
    pub fn missing_fields(&self) -> Vec<(CriteriaField, &'static str)> {
        let Some(value) = self.value else {
            return vec![(CriteriaField::Value, CRITERIA_VALUE_MISSING)];
        };

        value
            .row()
            .fields
            .iter()
            .filter(|spec| !self.skips_field(spec))
            .filter_map(|spec| {
                spec.field_type
                    .check(self.field_value(spec.field))
                    .map(|message| (spec.field, message))
            })
            .collect()
    }

    fn skips_field(&self, spec: &FieldSpec) -> bool {
        spec.field_type == FieldType::PropertyValue
            && self.operator.is_some_and(OperatorType::is_presence_check)
    }

    /// Whether two criteria match the same persons once negation is taken out of the picture.
    pub fn matches_ignoring_negation(&self, other: &CohortCriteria) -> bool {
        CohortCriteria {
            negation: false,
            ..self.clone()
        } == CohortCriteria {
            negation: false,
            ..other.clone()
        }
    }
}
