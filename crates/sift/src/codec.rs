//! # Parameter Codec
//!
//! Maps a value map to flat string parameters and back, so filter state can
//! live in a URL query string.
//!
//! Each non-empty value is written under `prefix + filter id`:
//!
//! | Value | Encoding | Example |
//! |-------|----------|---------|
//! | `String` | raw text | `filter_q=red shoes` |
//! | `StringList` | elements joined by the array delimiter | `filter_tags=a,b` |
//! | `Number` | shortest round-trip decimal | `filter_rating=4.5` |
//! | `Bool` | `true` / `false` | `filter_archived=false` |
//! | `Date` | `YYYY-MM-DD` | `filter_due=2024-03-01` |
//! | `NumberRange` | `min..max`, open side left blank | `filter_price=..50` |
//! | `DateRange` | `start..end` | `filter_created=2024-01-01..` |
//!
//! Inside list elements, `\` and the delimiter are escaped with `\`. A list
//! holding one empty element is written as a lone `\`, so it stays distinct
//! from the empty list.
//!
//! Decoding is directed by the declared kind of each filter. Parameters
//! without the prefix, or naming an undeclared filter, are ignored; text that
//! does not decode is logged and skipped.
//!
//! Empty values are never written, so `from_params(to_params(v)) == v` holds
//! for maps of non-empty values only; an empty filter comes back absent.

use crate::config::EngineConfig;
use crate::definition::{FilterDefinition, FilterKind, FilterSet};
use crate::error::{Result, SiftError};
use crate::value::{FilterValue, ValueMap};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::warn;
use url::{form_urlencoded, Url};

/// Flat parameter map, ordered by key.
pub type Params = BTreeMap<String, String>;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamCodec {
    prefix: String,
    array_delimiter: char,
    range_delimiter: String,
}

impl Default for ParamCodec {
    fn default() -> Self {
        Self::new("filter_", ',', "..")
    }
}

impl ParamCodec {
    pub fn new(
        prefix: impl Into<String>,
        array_delimiter: char,
        range_delimiter: impl Into<String>,
    ) -> Self {
        let range_delimiter = range_delimiter.into();
        Self {
            prefix: prefix.into(),
            array_delimiter,
            range_delimiter: if range_delimiter.is_empty() {
                "..".to_string()
            } else {
                range_delimiter
            },
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.param_prefix.clone(),
            config.array_delimiter(),
            config.range_delimiter(),
        )
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parameter key of a filter id.
    pub fn param_key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Encode every non-empty value of a declared filter.
    pub fn to_params(&self, filters: &FilterSet, values: &ValueMap) -> Params {
        filters
            .iter()
            .filter_map(|definition| {
                let value = values.get(&definition.id)?;
                if definition.is_value_empty(value) {
                    return None;
                }
                let encoded = self.encode_value(value)?;
                Some((self.param_key(&definition.id), encoded))
            })
            .collect()
    }

    /// Decode the parameters of declared filters. Only filters present in
    /// `params` appear in the result.
    pub fn from_params(&self, filters: &FilterSet, params: &Params) -> ValueMap {
        let mut values = ValueMap::new();
        for (key, raw) in params {
            let Some(id) = key.strip_prefix(&self.prefix) else {
                continue;
            };
            let Some(definition) = filters.get(id) else {
                continue;
            };
            match self.decode_value(definition, raw) {
                Ok(value) => {
                    values.insert(id.to_string(), value);
                }
                Err(err) => warn!(param = %key, error = %err, "skipping undecodable parameter"),
            }
        }
        values
    }

    /// Text form of a value, or `None` for an empty value.
    pub fn encode_value(&self, value: &FilterValue) -> Option<String> {
        if value.is_empty() {
            return None;
        }
        let encoded = match value {
            FilterValue::Null => return None,
            FilterValue::String(s) => s.clone(),
            FilterValue::StringList(items) if items.len() == 1 && items[0].is_empty() => {
                "\\".to_string()
            }
            FilterValue::StringList(items) => items
                .iter()
                .map(|item| self.escape(item))
                .collect::<Vec<_>>()
                .join(&self.array_delimiter.to_string()),
            FilterValue::Number(n) => n.to_string(),
            FilterValue::Bool(b) => b.to_string(),
            FilterValue::Date(d) => d.format(DATE_FORMAT).to_string(),
            FilterValue::NumberRange { min, max } => self.join_range(
                min.map(|n| n.to_string()),
                max.map(|n| n.to_string()),
            ),
            FilterValue::DateRange { start, end } => self.join_range(
                start.map(|d| d.format(DATE_FORMAT).to_string()),
                end.map(|d| d.format(DATE_FORMAT).to_string()),
            ),
        };
        Some(encoded)
    }

    /// Decode `raw` according to the kind of `definition`.
    ///
    /// Blank text decodes to the kind's empty value.
    pub fn decode_value(&self, definition: &FilterDefinition, raw: &str) -> Result<FilterValue> {
        self.parse(definition.kind, raw)
            .map_err(|reason| SiftError::InvalidParam {
                key: self.param_key(&definition.id),
                value: raw.to_string(),
                reason,
            })
    }

    fn parse(&self, kind: FilterKind, raw: &str) -> std::result::Result<FilterValue, String> {
        if raw.is_empty() {
            return Ok(kind.empty_value());
        }
        match kind {
            FilterKind::Text | FilterKind::Select => Ok(FilterValue::String(raw.to_string())),
            FilterKind::MultiSelect => Ok(FilterValue::StringList(self.split_list(raw))),
            FilterKind::Number => parse_number(raw).map(FilterValue::Number),
            FilterKind::Boolean => parse_bool(raw).map(FilterValue::Bool),
            FilterKind::Date => parse_date(raw).map(FilterValue::Date),
            FilterKind::NumberRange => {
                let (min, max) = self.split_range(raw)?;
                Ok(FilterValue::NumberRange {
                    min: optional(min, parse_number)?,
                    max: optional(max, parse_number)?,
                })
            }
            FilterKind::DateRange => {
                let (start, end) = self.split_range(raw)?;
                Ok(FilterValue::DateRange {
                    start: optional(start, parse_date)?,
                    end: optional(end, parse_date)?,
                })
            }
        }
    }

    fn escape(&self, item: &str) -> String {
        let mut escaped = String::with_capacity(item.len());
        for c in item.chars() {
            if c == '\\' || c == self.array_delimiter {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }

    fn split_list(&self, raw: &str) -> Vec<String> {
        let mut items = Vec::new();
        let mut current = String::new();
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                // A dangling escape ends the element
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            } else if c == self.array_delimiter {
                items.push(std::mem::take(&mut current));
            } else {
                current.push(c);
            }
        }
        items.push(current);
        items
    }

    fn join_range(&self, low: Option<String>, high: Option<String>) -> String {
        format!(
            "{}{}{}",
            low.unwrap_or_default(),
            self.range_delimiter,
            high.unwrap_or_default()
        )
    }

    fn split_range<'a>(&self, raw: &'a str) -> std::result::Result<(&'a str, &'a str), String> {
        raw.split_once(self.range_delimiter.as_str())
            .ok_or_else(|| format!("expected a range like 1{}5", self.range_delimiter))
    }
}

fn optional<T>(
    raw: &str,
    parse: fn(&str) -> std::result::Result<T, String>,
) -> std::result::Result<Option<T>, String> {
    if raw.is_empty() {
        Ok(None)
    } else {
        parse(raw).map(Some)
    }
}

fn parse_number(raw: &str) -> std::result::Result<f64, String> {
    match raw.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        Ok(_) => Err("number must be finite".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

fn parse_bool(raw: &str) -> std::result::Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("'{}' is not a boolean", other)),
    }
}

fn parse_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|err| err.to_string())
}

/// Serialize parameters as an `application/x-www-form-urlencoded` query string.
pub fn to_query_string(params: &Params) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}

/// Parse a query string; a leading `?` is allowed. Later duplicates win.
pub fn parse_query_string(query: &str) -> Params {
    let query = query.strip_prefix('?').unwrap_or(query);
    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

pub fn params_from_url(url: &Url) -> Params {
    url.query_pairs().into_owned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::FilterDefinition;
    use chrono::Days;
    use proptest::prelude::*;

    fn filters() -> FilterSet {
        FilterSet::new([
            FilterDefinition::text("q", "Search"),
            FilterDefinition::select("status", "Status"),
            FilterDefinition::multi_select("tags", "Tags"),
            FilterDefinition::number("rating", "Rating"),
            FilterDefinition::number_range("price", "Price"),
            FilterDefinition::date("due", "Due"),
            FilterDefinition::date_range("created", "Created"),
            FilterDefinition::boolean("archived", "Archived"),
        ])
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn encodes_each_kind() {
        let codec = ParamCodec::default();
        let mut values = ValueMap::new();
        values.insert("tags".into(), FilterValue::list(["a", "b"]));
        values.insert("rating".into(), FilterValue::Number(4.5));
        values.insert("price".into(), FilterValue::number_range(None, Some(50.0)));
        values.insert("created".into(), FilterValue::date_range(Some(date(2024, 1, 1)), None));
        values.insert("archived".into(), FilterValue::Bool(false));
        values.insert("status".into(), FilterValue::Null);

        let params = codec.to_params(&filters(), &values);

        assert_eq!(params["filter_tags"], "a,b");
        assert_eq!(params["filter_rating"], "4.5");
        assert_eq!(params["filter_price"], "..50");
        assert_eq!(params["filter_created"], "2024-01-01..");
        assert_eq!(params["filter_archived"], "false");
        assert!(!params.contains_key("filter_status"));
    }

    #[test]
    fn list_elements_are_escaped() {
        let codec = ParamCodec::default();
        let filters = filters();
        let value = FilterValue::list(["a,b", "c\\d", ""]);
        let encoded = codec.encode_value(&value).unwrap();
        assert_eq!(encoded, "a\\,b,c\\\\d,");

        let decoded = codec
            .decode_value(filters.get("tags").unwrap(), &encoded)
            .unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn single_empty_element_survives_a_round_trip() {
        let codec = ParamCodec::default();
        let filters = filters();
        let mut values = ValueMap::new();
        values.insert("tags".into(), FilterValue::list([""]));

        let params = codec.to_params(&filters, &values);
        assert_eq!(params["filter_tags"], "\\");
        assert_eq!(codec.from_params(&filters, &params), values);

        let query = to_query_string(&params);
        assert_eq!(codec.from_params(&filters, &parse_query_string(&query)), values);
    }

    #[test]
    fn empty_text_still_decodes_to_an_empty_list() {
        let codec = ParamCodec::default();
        let filters = filters();
        let decoded = codec.decode_value(filters.get("tags").unwrap(), "").unwrap();
        assert_eq!(decoded, FilterValue::StringList(vec![]));
    }

    #[test]
    fn ignores_foreign_and_unknown_keys() {
        let codec = ParamCodec::default();
        let mut params = Params::new();
        params.insert("page".into(), "2".into());
        params.insert("filter_ghost".into(), "x".into());
        params.insert("filter_status".into(), "open".into());

        let values = codec.from_params(&filters(), &params);
        assert_eq!(values.len(), 1);
        assert_eq!(values["status"], FilterValue::from("open"));
    }

    #[test]
    fn undecodable_values_are_skipped() {
        let codec = ParamCodec::default();
        let mut params = Params::new();
        params.insert("filter_rating".into(), "lots".into());
        params.insert("filter_due".into(), "2024-13-45".into());
        params.insert("filter_price".into(), "10".into());
        params.insert("filter_archived".into(), "true".into());

        let values = codec.from_params(&filters(), &params);
        assert_eq!(values.len(), 1);
        assert_eq!(values["archived"], FilterValue::Bool(true));
    }

    #[test]
    fn decode_error_names_the_parameter() {
        let codec = ParamCodec::default();
        let filters = filters();
        match codec.decode_value(filters.get("rating").unwrap(), "inf") {
            Err(SiftError::InvalidParam { key, value, .. }) => {
                assert_eq!(key, "filter_rating");
                assert_eq!(value, "inf");
            }
            other => panic!("Expected InvalidParam, got {:?}", other),
        }
    }

    #[test]
    fn custom_prefix_and_delimiters() {
        let codec = ParamCodec::new("f.", '|', "~");
        let filters = filters();
        let mut values = ValueMap::new();
        values.insert("tags".into(), FilterValue::list(["x", "y"]));
        values.insert("price".into(), FilterValue::number_range(Some(-5.0), Some(-1.0)));

        let params = codec.to_params(&filters, &values);
        assert_eq!(params["f.tags"], "x|y");
        assert_eq!(params["f.price"], "-5~-1");
        assert_eq!(codec.from_params(&filters, &params), values);
    }

    #[test]
    fn query_string_round_trip() {
        let mut params = Params::new();
        params.insert("filter_q".into(), "red & blue = purple".into());
        params.insert("filter_tags".into(), "é,ü".into());

        let query = to_query_string(&params);
        assert!(!query.contains(' '));
        assert_eq!(parse_query_string(&format!("?{}", query)), params);
    }

    #[test]
    fn params_from_url_reads_query() {
        let url = Url::parse("https://example.com/items?filter_status=open&page=3").unwrap();
        let params = params_from_url(&url);
        assert_eq!(params["filter_status"], "open");
        assert_eq!(params["page"], "3");
    }

    fn epoch_date() -> impl Strategy<Value = NaiveDate> {
        (0u64..40_000).prop_map(|days| date(1970, 1, 1).checked_add_days(Days::new(days)).unwrap())
    }

    fn half_open<S: Strategy>(
        side: impl Fn() -> S,
    ) -> impl Strategy<Value = (Option<S::Value>, Option<S::Value>)> {
        prop_oneof![
            (side(), side()).prop_map(|(a, b)| (Some(a), Some(b))),
            side().prop_map(|a| (Some(a), None)),
            side().prop_map(|b| (None, Some(b))),
        ]
    }

    fn value_map() -> impl Strategy<Value = ValueMap> {
        let number = || -1.0e9..1.0e9f64;
        (
            prop::option::of(".+"),
            prop::option::of("[a-z]{1,8}"),
            prop::option::of(prop::collection::vec("[a-z,\\\\ ]{0,5}", 1..4)),
            prop::option::of(number()),
            prop::option::of(half_open(number)),
            prop::option::of(epoch_date()),
            prop::option::of(half_open(epoch_date)),
            prop::option::of(any::<bool>()),
        )
            .prop_map(|(q, status, tags, rating, price, due, created, archived)| {
                let mut values = ValueMap::new();
                let mut put = |id: &str, value: Option<FilterValue>| {
                    if let Some(value) = value {
                        values.insert(id.to_string(), value);
                    }
                };
                put("q", q.map(FilterValue::String));
                put("status", status.map(FilterValue::String));
                put("tags", tags.map(FilterValue::StringList));
                put("rating", rating.map(FilterValue::Number));
                put("price", price.map(|(min, max)| FilterValue::NumberRange { min, max }));
                put("due", due.map(FilterValue::Date));
                put("created", created.map(|(start, end)| FilterValue::DateRange { start, end }));
                put("archived", archived.map(FilterValue::Bool));
                values
            })
    }

    proptest! {
        #[test]
        fn params_round_trip(values in value_map()) {
            let codec = ParamCodec::default();
            let filters = filters();
            let params = codec.to_params(&filters, &values);
            prop_assert_eq!(codec.from_params(&filters, &params), values.clone());

            let query = to_query_string(&params);
            prop_assert_eq!(codec.from_params(&filters, &parse_query_string(&query)), values);
        }
    }
}
