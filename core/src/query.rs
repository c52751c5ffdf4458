//! Query parameters carried by a resource accessor.
//!
//! # Design
//! Parameters are kept typed until the request is built. On the wire,
//! string values go out as-is and every other value is sent as compact JSON
//! text (`page=2`, `select=["id","name"]`, `filters=[{...}]`). A key set in
//! `extra` replaces the typed field of the same name, so each key is sent
//! once.

use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::types::{AggregateColumn, BooleanOperator, Filter, FilterGroup, FilterItem, OrderBy};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pub filters: Vec<Filter>,
    pub filter: Option<FilterGroup>,
    pub order_by: Option<OrderBy>,
    pub page: Option<u32>,
    pub page_limit: Option<u32>,
    pub select: Option<Vec<String>>,
    pub include: Option<Vec<String>>,
    pub columns: Option<Vec<AggregateColumn>>,
    pub extra: Map<String, Value>,
}

impl QueryParams {
    pub fn is_empty(&self) -> bool {
        *self == QueryParams::default()
    }

    /// Add `filter` to the boolean group, merging as follows: no group yet
    /// creates one; a group with the same operator gets the filter appended;
    /// a group with a different operator is replaced by a group using the
    /// new operator whose items are the new filter followed by the old items.
    pub fn append_filter(&mut self, filter: Filter, operator: BooleanOperator) {
        let group = match self.filter.take() {
            None => FilterGroup {
                operator,
                items: vec![FilterItem::Filter(filter)],
            },
            Some(mut group) if group.operator == operator => {
                group.items.push(FilterItem::Filter(filter));
                group
            }
            Some(group) => {
                let mut items = Vec::with_capacity(group.items.len() + 1);
                items.push(FilterItem::Filter(filter));
                items.extend(group.items);
                FilterGroup { operator, items }
            }
        };
        self.filter = Some(group);
    }

    /// Parse a filter group from JSON text. The text must be an object.
    pub fn parse_filter_group(raw: &str) -> Result<FilterGroup, ApiError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ApiError::InvalidInput(format!("invalid JSON for filter group: {e}")))?;
        if !value.is_object() {
            return Err(ApiError::InvalidInput(
                "filter group JSON must represent an object".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidInput(format!("malformed filter group: {e}")))
    }

    /// Merge the members of a JSON object into the extra parameters.
    pub fn extend_json(&mut self, raw: &str) -> Result<(), ApiError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ApiError::InvalidInput(format!("invalid JSON for params: {e}")))?;
        match value {
            Value::Object(map) => {
                self.extra.extend(map);
                Ok(())
            }
            _ => Err(ApiError::InvalidInput(
                "params JSON must represent an object".to_string(),
            )),
        }
    }

    /// Flatten into `(key, value)` pairs ready for the query string. Extra
    /// keys override typed fields with the same name.
    pub fn to_pairs(&self) -> Result<Vec<(String, String)>, ApiError> {
        let mut pairs = Vec::new();
        if !self.filters.is_empty() {
            pairs.push(("filters".to_string(), encode(&self.filters)?));
        }
        if let Some(group) = &self.filter {
            pairs.push(("filter".to_string(), encode(group)?));
        }
        if let Some(order) = &self.order_by {
            pairs.push(("order_by".to_string(), encode(order)?));
        }
        if let Some(page) = self.page {
            pairs.push(("page".to_string(), page.to_string()));
        }
        if let Some(limit) = self.page_limit {
            pairs.push(("page_limit".to_string(), limit.to_string()));
        }
        if let Some(select) = &self.select {
            pairs.push(("select".to_string(), encode(select)?));
        }
        if let Some(include) = &self.include {
            pairs.push(("include".to_string(), encode(include)?));
        }
        if let Some(columns) = &self.columns {
            pairs.push(("columns".to_string(), encode(columns)?));
        }
        pairs.retain(|(key, _)| !self.extra.contains_key(key));
        for (key, value) in &self.extra {
            let text = match value {
                Value::String(s) => s.clone(),
                other => encode(other)?,
            };
            pairs.push((key.clone(), text));
        }
        Ok(pairs)
    }
}

fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string(value).map_err(|e| ApiError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AggregateFunction, QueryOperator};
    use serde_json::json;

    fn eq(name: &str, value: i64) -> Filter {
        Filter::new(name, QueryOperator::Eq, value)
    }

    fn names(group: &FilterGroup) -> Vec<String> {
        group
            .items
            .iter()
            .map(|item| match item {
                FilterItem::Filter(f) => f.name.clone(),
                FilterItem::Group(_) => "<group>".to_string(),
            })
            .collect()
    }

    #[test]
    fn empty_params_produce_no_pairs() {
        let params = QueryParams::default();
        assert!(params.is_empty());
        assert!(params.to_pairs().unwrap().is_empty());
    }

    #[test]
    fn append_filter_creates_group() {
        let mut params = QueryParams::default();
        params.append_filter(eq("a", 1), BooleanOperator::And);
        let group = params.filter.unwrap();
        assert_eq!(group.operator, BooleanOperator::And);
        assert_eq!(names(&group), ["a"]);
    }

    #[test]
    fn append_filter_same_operator_appends() {
        let mut params = QueryParams::default();
        params.append_filter(eq("a", 1), BooleanOperator::Or);
        params.append_filter(eq("b", 2), BooleanOperator::Or);
        let group = params.filter.unwrap();
        assert_eq!(group.operator, BooleanOperator::Or);
        assert_eq!(names(&group), ["a", "b"]);
    }

    #[test]
    fn append_filter_other_operator_prepends_new_filter() {
        let mut params = QueryParams::default();
        params.append_filter(eq("a", 1), BooleanOperator::And);
        params.append_filter(eq("b", 2), BooleanOperator::And);
        params.append_filter(eq("c", 3), BooleanOperator::Or);
        let group = params.filter.unwrap();
        assert_eq!(group.operator, BooleanOperator::Or);
        assert_eq!(names(&group), ["c", "a", "b"]);
    }

    #[test]
    fn non_string_values_are_json_encoded() {
        let mut params = QueryParams {
            page: Some(2),
            page_limit: Some(50),
            select: Some(vec!["id".to_string(), "name".to_string()]),
            ..QueryParams::default()
        };
        params.filters.push(eq("id", 7));
        params.extra.insert("search".to_string(), json!("acme"));
        params.extra.insert("deep".to_string(), json!({"x": true}));

        let pairs = params.to_pairs().unwrap();
        let get = |k: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };
        assert_eq!(get("page"), "2");
        assert_eq!(get("page_limit"), "50");
        assert_eq!(get("select"), r#"["id","name"]"#);
        assert_eq!(get("filters"), r#"[{"name":"id","operator":"EQ","value":7}]"#);
        assert_eq!(get("search"), "acme");
        assert_eq!(get("deep"), r#"{"x":true}"#);
    }

    #[test]
    fn parse_filter_group_rejects_non_object() {
        let err = QueryParams::parse_filter_group("[1,2]").unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        let err = QueryParams::parse_filter_group("{not json").unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[test]
    fn parse_filter_group_accepts_group_text() {
        let group = QueryParams::parse_filter_group(
            r#"{"operator":"AND","items":[{"name":"a","operator":"EQ","value":"x"}]}"#,
        )
        .unwrap();
        assert_eq!(names(&group), ["a"]);
    }

    #[test]
    fn extend_json_requires_object() {
        let mut params = QueryParams::default();
        params.extend_json(r#"{"status":"open"}"#).unwrap();
        assert_eq!(params.extra["status"], json!("open"));
        assert!(params.extend_json(r#""open""#).is_err());
    }

    #[test]
    fn extra_keys_replace_typed_fields() {
        let mut params = QueryParams {
            page: Some(1),
            page_limit: Some(10),
            columns: Some(vec![AggregateColumn::new("amount", AggregateFunction::Sum)]),
            ..QueryParams::default()
        };
        params.extra.insert("page".to_string(), json!(5));
        params.extra.insert("columns".to_string(), json!([{"name": "id", "function": "count"}]));

        let pairs = params.to_pairs().unwrap();
        let values = |k: &str| pairs.iter().filter(|(key, _)| key == k).map(|(_, v)| v.as_str()).collect::<Vec<_>>();
        assert_eq!(values("page"), ["5"]);
        assert_eq!(values("page_limit"), ["10"]);
        assert_eq!(values("columns"), [r#"[{"name":"id","function":"count"}]"#]);
    }
}
