//! Filter value types and the emptiness rule.
//!
//! This module defines the runtime representation of filter values. Every
//! filter, whatever its kind, stores one [`FilterValue`]; the kind decides which
//! variants it accepts (see [`crate::definition::FilterKind`]).
//!
//! ## Emptiness
//!
//! A value is *empty* when it is `Null`, an empty string, an empty list, or a
//! range with neither bound set. Emptiness drives active-filter accounting,
//! the default dependency predicate and parameter encoding.
//!
//! `Bool(false)` and `Number(0.0)` are **not** empty. A "show only archived:
//! no" toggle or a "minimum rating: 0" input is a real, active choice.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Map of filter id to value. Ordered so snapshots and encodings are stable.
pub type ValueMap = BTreeMap<String, FilterValue>;

/// Runtime representation of a filter value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterValue {
    /// No value set.
    #[default]
    Null,

    /// Free text or a single selected option (e.g., `status = "active"`)
    String(String),

    /// Several selected options (e.g., `tags = ["rust", "cli"]`)
    StringList(Vec<String>),

    Number(f64),

    Bool(bool),

    Date(NaiveDate),

    /// Numeric range; either bound may be open.
    NumberRange { min: Option<f64>, max: Option<f64> },

    /// Date range; either bound may be open.
    DateRange {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

impl FilterValue {
    pub fn number_range(min: Option<f64>, max: Option<f64>) -> Self {
        FilterValue::NumberRange { min, max }
    }

    pub fn date_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        FilterValue::DateRange { start, end }
    }

    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterValue::StringList(items.into_iter().map(Into::into).collect())
    }

    /// Check whether this value counts as "nothing selected".
    ///
    /// - Null: empty
    /// - String: empty iff `""` (whitespace is a value)
    /// - StringList: empty iff no elements
    /// - Ranges: empty iff both bounds are open
    /// - Number, Bool, Date: never empty
    pub fn is_empty(&self) -> bool {
        match self {
            FilterValue::Null => true,
            FilterValue::String(s) => s.is_empty(),
            FilterValue::StringList(v) => v.is_empty(),
            FilterValue::NumberRange { min, max } => min.is_none() && max.is_none(),
            FilterValue::DateRange { start, end } => start.is_none() && end.is_none(),
            FilterValue::Number(_) | FilterValue::Bool(_) | FilterValue::Date(_) => false,
        }
    }

    /// Short name of the variant, used in log messages.
    pub fn variant_name(&self) -> &'static str {
        match self {
            FilterValue::Null => "null",
            FilterValue::String(_) => "string",
            FilterValue::StringList(_) => "string-list",
            FilterValue::Number(_) => "number",
            FilterValue::Bool(_) => "bool",
            FilterValue::Date(_) => "date",
            FilterValue::NumberRange { .. } => "number-range",
            FilterValue::DateRange { .. } => "date-range",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FilterValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FilterValue::StringList(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FilterValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FilterValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FilterValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Human-readable rendering, used for active-filter summaries.
    pub fn display(&self) -> String {
        match self {
            FilterValue::Null => String::new(),
            FilterValue::String(s) => s.clone(),
            FilterValue::StringList(v) => v.join(", "),
            FilterValue::Number(n) => n.to_string(),
            FilterValue::Bool(true) => "Yes".to_string(),
            FilterValue::Bool(false) => "No".to_string(),
            FilterValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FilterValue::NumberRange { min, max } => match (min, max) {
                (Some(lo), Some(hi)) => format!("{} - {}", lo, hi),
                (Some(lo), None) => format!(">= {}", lo),
                (None, Some(hi)) => format!("<= {}", hi),
                (None, None) => String::new(),
            },
            FilterValue::DateRange { start, end } => match (start, end) {
                (Some(s), Some(e)) => format!("{} - {}", s.format("%Y-%m-%d"), e.format("%Y-%m-%d")),
                (Some(s), None) => format!("from {}", s.format("%Y-%m-%d")),
                (None, Some(e)) => format!("until {}", e.format("%Y-%m-%d")),
                (None, None) => String::new(),
            },
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(value: Vec<String>) -> Self {
        FilterValue::StringList(value)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Number(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<NaiveDate> for FilterValue {
    fn from(value: NaiveDate) -> Self {
        FilterValue::Date(value)
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FilterValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn null_and_blank_values_are_empty() {
        assert!(FilterValue::Null.is_empty());
        assert!(FilterValue::String(String::new()).is_empty());
        assert!(FilterValue::StringList(vec![]).is_empty());
        assert!(FilterValue::number_range(None, None).is_empty());
        assert!(FilterValue::date_range(None, None).is_empty());
    }

    #[test]
    fn false_and_zero_are_not_empty() {
        assert!(!FilterValue::Bool(false).is_empty());
        assert!(!FilterValue::Number(0.0).is_empty());
    }

    #[test]
    fn whitespace_string_is_a_value() {
        assert!(!FilterValue::from(" ").is_empty());
    }

    #[test]
    fn half_open_ranges_are_not_empty() {
        assert!(!FilterValue::number_range(Some(1.0), None).is_empty());
        assert!(!FilterValue::date_range(None, Some(date(2024, 1, 1))).is_empty());
    }

    #[test]
    fn option_conversion_maps_none_to_null() {
        assert_eq!(FilterValue::from(None::<&str>), FilterValue::Null);
        assert_eq!(FilterValue::from(Some(2.5)), FilterValue::Number(2.5));
    }

    #[test]
    fn accessors_match_variants() {
        assert_eq!(FilterValue::from("open").as_str(), Some("open"));
        assert_eq!(FilterValue::Bool(true).as_str(), None);
        assert_eq!(
            FilterValue::list(["a", "b"]).as_list(),
            Some(&["a".to_string(), "b".to_string()][..])
        );
        assert_eq!(FilterValue::Number(3.0).as_number(), Some(3.0));
        assert_eq!(FilterValue::Bool(false).as_bool(), Some(false));
        assert_eq!(
            FilterValue::Date(date(2024, 5, 1)).as_date(),
            Some(date(2024, 5, 1))
        );
    }

    #[test]
    fn display_formats_ranges() {
        assert_eq!(
            FilterValue::number_range(Some(10.0), Some(50.0)).display(),
            "10 - 50"
        );
        assert_eq!(FilterValue::number_range(Some(10.0), None).display(), ">= 10");
        assert_eq!(
            FilterValue::date_range(None, Some(date(2024, 2, 29))).display(),
            "until 2024-02-29"
        );
        assert_eq!(FilterValue::list(["a", "b"]).display(), "a, b");
        assert_eq!(FilterValue::Bool(false).display(), "No");
    }

    #[test]
    fn serde_uses_snake_case_tags() {
        let json = serde_json::to_string(&FilterValue::number_range(Some(1.0), None)).unwrap();
        assert_eq!(json, r#"{"number_range":{"min":1.0,"max":null}}"#);

        let back: FilterValue = serde_json::from_str(r#"{"string_list":["x"]}"#).unwrap();
        assert_eq!(back, FilterValue::list(["x"]));
    }
}
