//! Query DTOs understood by the Stofware API.
//!
//! These serialize to the JSON shapes the server expects inside query
//! parameters: filters as `{"name", "operator", "value"}` objects, filter
//! groups as `{"operator", "items"}`, ordering as `{"name", "direction"}`,
//! aggregate columns as `{"name", "function", "alias"?}`.

use serde::{Deserialize, Serialize};

/// Comparison operator of a single filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOperator {
    #[serde(rename = "EQ")]
    Eq,
    #[serde(rename = "NE")]
    Ne,
    #[serde(rename = "IS")]
    Is,
    #[serde(rename = "NOT")]
    Not,
    #[serde(rename = "GT")]
    Gt,
    #[serde(rename = "GE")]
    Ge,
    #[serde(rename = "LT")]
    Lt,
    #[serde(rename = "LTE")]
    Lte,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOTIN")]
    NotIn,
    #[serde(rename = "ILIKE")]
    ILike,
    #[serde(rename = "JSONB_CONTAINS")]
    JsonbContains,
}

/// How the items of a `FilterGroup` combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BooleanOperator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

/// Right-hand side of a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Str(String),
    IntList(Vec<i64>),
    StrList(Vec<String>),
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Bool(v)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Int(v)
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        FilterValue::Int(v.into())
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Str(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        FilterValue::Str(v)
    }
}

impl From<Vec<i64>> for FilterValue {
    fn from(v: Vec<i64>) -> Self {
        FilterValue::IntList(v)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(v: Vec<String>) -> Self {
        FilterValue::StrList(v)
    }
}

impl From<Vec<&str>> for FilterValue {
    fn from(v: Vec<&str>) -> Self {
        FilterValue::StrList(v.into_iter().map(str::to_string).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub operator: QueryOperator,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(name: &str, operator: QueryOperator, value: impl Into<FilterValue>) -> Self {
        Self {
            name: name.to_string(),
            operator,
            value: value.into(),
        }
    }
}

/// A member of a `FilterGroup`: either a plain filter or a nested group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterItem {
    Filter(Filter),
    Group(FilterGroup),
}

impl From<Filter> for FilterItem {
    fn from(f: Filter) -> Self {
        FilterItem::Filter(f)
    }
}

impl From<FilterGroup> for FilterItem {
    fn from(g: FilterGroup) -> Self {
        FilterItem::Group(g)
    }
}

/// Boolean combination of filters, sent as the `filter` query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub operator: BooleanOperator,
    pub items: Vec<FilterItem>,
}

impl FilterGroup {
    pub fn new(operator: BooleanOperator) -> Self {
        Self {
            operator,
            items: Vec::new(),
        }
    }

    pub fn with(mut self, item: impl Into<FilterItem>) -> Self {
        self.items.push(item.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub name: String,
    #[serde(default)]
    pub direction: OrderDirection,
}

/// Aggregation applied to one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Mean,
    Median,
    Mode,
    Sum,
    Count,
    CountDistinct,
    NUnique,
    Std,
    Min,
    Max,
}

/// One entry of the `columns` parameter of an aggregate request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateColumn {
    pub name: String,
    pub function: AggregateFunction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl AggregateColumn {
    pub fn new(name: &str, function: AggregateFunction) -> Self {
        Self {
            name: name.to_string(),
            function,
            alias: None,
        }
    }

    /// Name the result key instead of the server's default.
    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }
}
