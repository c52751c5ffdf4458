//! Query-string handling for list and aggregate routes.
//!
//! Structured parameters arrive as JSON text (`filters=[...]`,
//! `order_by={...}`); `page` and `page_limit` are plain integers.

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use serde::Deserialize;
use serde_json::{json, Value};

use crate::{Failure, Record};

#[derive(Debug, Deserialize)]
struct FilterSpec {
    name: String,
    operator: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct GroupSpec {
    operator: String,
    items: Vec<GroupItem>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GroupItem {
    Group(GroupSpec),
    Filter(FilterSpec),
}

#[derive(Debug, Deserialize)]
struct OrderSpec {
    name: String,
    #[serde(default = "default_direction")]
    direction: String,
}

fn default_direction() -> String {
    "DESC".to_string()
}

#[derive(Debug, Deserialize)]
struct ColumnSpec {
    name: String,
    function: String,
    alias: Option<String>,
}

#[derive(Debug, Default)]
pub struct ListQuery {
    filters: Vec<FilterSpec>,
    group: Option<GroupSpec>,
    order_by: Option<OrderSpec>,
    page: Option<usize>,
    page_limit: Option<usize>,
    select: Option<Vec<String>>,
    columns: Vec<ColumnSpec>,
}

impl ListQuery {
    pub fn parse(raw: &HashMap<String, String>) -> Result<Self, Failure> {
        Ok(Self {
            filters: json_param(raw, "filters")?.unwrap_or_default(),
            group: json_param(raw, "filter")?,
            order_by: json_param(raw, "order_by")?,
            page: int_param(raw, "page")?,
            page_limit: int_param(raw, "page_limit")?,
            select: json_param(raw, "select")?,
            columns: json_param(raw, "columns")?.unwrap_or_default(),
        })
    }

    /// Filter, order, page and project `records`.
    pub fn apply(&self, records: Vec<Record>) -> Result<Vec<Record>, Failure> {
        let mut records = self.matching(records)?;

        if let Some(order) = &self.order_by {
            let descending = order.direction.eq_ignore_ascii_case("desc");
            records.sort_by(|a, b| {
                let ord = compare(field(a, &order.name), field(b, &order.name)).unwrap_or(Ordering::Equal);
                if descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        if let Some(limit) = self.page_limit {
            let page = self.page.unwrap_or(1).max(1);
            let offset = (page - 1).saturating_mul(limit);
            records = records.into_iter().skip(offset).take(limit).collect();
        }

        Ok(records.into_iter().map(|r| self.project(r)).collect())
    }

    /// Keep only the `select`ed fields.
    pub fn project(&self, record: Record) -> Record {
        match &self.select {
            Some(fields) => record.into_iter().filter(|(k, _)| fields.contains(k)).collect(),
            None => record,
        }
    }

    /// Evaluate `columns` over the filtered records.
    pub fn aggregate(&self, records: Vec<Record>) -> Result<Record, Failure> {
        if self.columns.is_empty() {
            return Err(Failure::bad_request("aggregate requires `columns`"));
        }
        let records = self.matching(records)?;
        let mut out = Record::new();
        for column in &self.columns {
            let values: Vec<&Value> = records
                .iter()
                .map(|r| field(r, &column.name))
                .filter(|v| !v.is_null())
                .collect();
            let numbers = || values.iter().filter_map(|v| v.as_f64());
            let result = match column.function.to_ascii_lowercase().as_str() {
                "count" => json!(values.len()),
                "sum" => json!(numbers().sum::<f64>()),
                "mean" => mean(&numbers().collect::<Vec<_>>()).map_or(Value::Null, |m| json!(m)),
                "median" => median(numbers().collect()),
                "mode" => mode(&values),
                "std" => std_dev(&numbers().collect::<Vec<_>>()),
                "countdistinct" | "nunique" => {
                    json!(values.iter().map(|v| v.to_string()).collect::<HashSet<_>>().len())
                }
                "min" => extreme(&values, Ordering::Less),
                "max" => extreme(&values, Ordering::Greater),
                other => return Err(Failure::bad_request(format!("unsupported aggregate function {other}"))),
            };
            let key = column
                .alias
                .clone()
                .unwrap_or_else(|| format!("{}_{}", column.function.to_ascii_lowercase(), column.name));
            out.insert(key, result);
        }
        Ok(out)
    }

    fn matching(&self, records: Vec<Record>) -> Result<Vec<Record>, Failure> {
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            let mut keep = true;
            for filter in &self.filters {
                if !matches(&record, filter)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                if let Some(group) = &self.group {
                    keep = matches_group(&record, group)?;
                }
            }
            if keep {
                kept.push(record);
            }
        }
        Ok(kept)
    }
}

fn json_param<T: serde::de::DeserializeOwned>(
    raw: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, Failure> {
    raw.get(key)
        .map(|text| {
            serde_json::from_str(text).map_err(|e| Failure::bad_request(format!("invalid `{key}`: {e}")))
        })
        .transpose()
}

fn int_param(raw: &HashMap<String, String>, key: &str) -> Result<Option<usize>, Failure> {
    raw.get(key)
        .map(|text| {
            text.parse()
                .map_err(|_| Failure::bad_request(format!("`{key}` must be a non-negative integer")))
        })
        .transpose()
}

fn field<'a>(record: &'a Record, name: &str) -> &'a Value {
    record.get(name).unwrap_or(&Value::Null)
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        _ => None,
    }
}

fn extreme(values: &[&Value], want: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for &value in values {
        best = match best {
            Some(current) if compare(value, current) != Some(want) => Some(current),
            _ => Some(value),
        };
    }
    best.cloned().unwrap_or(Value::Null)
}

fn mean(numbers: &[f64]) -> Option<f64> {
    if numbers.is_empty() {
        return None;
    }
    Some(numbers.iter().sum::<f64>() / numbers.len() as f64)
}

fn median(mut numbers: Vec<f64>) -> Value {
    if numbers.is_empty() {
        return Value::Null;
    }
    numbers.sort_by(f64::total_cmp);
    let mid = numbers.len() / 2;
    if numbers.len() % 2 == 0 {
        json!((numbers[mid - 1] + numbers[mid]) / 2.0)
    } else {
        json!(numbers[mid])
    }
}

/// Most frequent value; ties go to the one seen first.
fn mode(values: &[&Value]) -> Value {
    let mut counts: Vec<(&Value, usize)> = Vec::new();
    for &value in values {
        match counts.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }
    let mut best: Option<(&Value, usize)> = None;
    for (value, n) in counts {
        if best.map_or(true, |(_, top)| n > top) {
            best = Some((value, n));
        }
    }
    best.map_or(Value::Null, |(value, _)| value.clone())
}

/// Sample standard deviation; `null` below two values.
fn std_dev(numbers: &[f64]) -> Value {
    let Some(m) = mean(numbers) else {
        return Value::Null;
    };
    if numbers.len() < 2 {
        return Value::Null;
    }
    let variance = numbers.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (numbers.len() - 1) as f64;
    json!(variance.sqrt())
}

fn matches(record: &Record, filter: &FilterSpec) -> Result<bool, Failure> {
    let actual = field(record, &filter.name);
    let expected = &filter.value;
    let ordered = |accept: fn(Ordering) -> bool| compare(actual, expected).is_some_and(accept);
    let contains = || expected.as_array().is_some_and(|list| list.contains(actual));

    let result = match filter.operator.to_ascii_uppercase().as_str() {
        "EQ" => actual == expected,
        "NE" => actual != expected,
        "IS" => actual == expected,
        "NOT" => actual != expected,
        "GT" => ordered(|o| o == Ordering::Greater),
        "GE" => ordered(|o| o != Ordering::Less),
        "LT" => ordered(|o| o == Ordering::Less),
        "LTE" => ordered(|o| o != Ordering::Greater),
        "IN" => contains(),
        "NOTIN" => !contains(),
        "ILIKE" => match (actual.as_str(), expected.as_str()) {
            (Some(text), Some(pattern)) => ilike(text, pattern),
            _ => false,
        },
        other => return Err(Failure::bad_request(format!("unsupported operator {other}"))),
    };
    Ok(result)
}

fn matches_group(record: &Record, group: &GroupSpec) -> Result<bool, Failure> {
    let any = match group.operator.to_ascii_uppercase().as_str() {
        "AND" => false,
        "OR" => true,
        other => return Err(Failure::bad_request(format!("unsupported boolean operator {other}"))),
    };
    for item in &group.items {
        let hit = match item {
            GroupItem::Filter(filter) => matches(record, filter)?,
            GroupItem::Group(inner) => matches_group(record, inner)?,
        };
        if hit == any {
            return Ok(any);
        }
    }
    Ok(!any)
}

/// Case-insensitive SQL `LIKE` with `%` as the only wildcard.
fn ilike(text: &str, pattern: &str) -> bool {
    let text = text.to_lowercase();
    let pattern = pattern.to_lowercase();
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return text == pattern;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !text.starts_with(first) || text.len() < first.len() + last.len() || !text.ends_with(last) {
        return false;
    }
    let mut rest = &text[first.len()..text.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}
