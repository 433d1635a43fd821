//! In-memory source for tests, demos and local experiments.
//!
//! Filters use the Elasticsearch query shape but only a small subset is
//! understood: `match_all`, `term`, `terms`, `range` and `bool` (`must`,
//! `filter`, `must_not`, `should`). Anything else is rejected as a query error.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::source::{Page, Record, SourceReader};

/// A fixed, ordered set of records.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    records: Vec<Record>,
}

impl InMemorySource {
    /// Creates a source over `records`, kept in the given order.
    #[must_use]
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Number of records regardless of any filter.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the source holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn matching(&self, filter: Option<&Value>) -> Result<Vec<&Record>> {
        let mut out = Vec::new();
        for record in &self.records {
            let keep = match filter {
                Some(query) => matches_query(query, record)?,
                None => true,
            };
            if keep {
                out.push(record);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl SourceReader for InMemorySource {
    fn source_type(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn count(&self, filter: Option<&Value>) -> Result<u64> {
        Ok(self.matching(filter)?.len() as u64)
    }

    async fn fetch_page(
        &self,
        filter: Option<&Value>,
        cursor: Option<&Value>,
        page_size: usize,
    ) -> Result<Page> {
        let offset = match cursor {
            None => 0,
            Some(value) => value
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| Error::SourceUnavailable(format!("invalid cursor: {value}")))?,
        };

        let matching = self.matching(filter)?;
        let end = offset.saturating_add(page_size).min(matching.len());
        let records: Vec<Record> = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|r| (*r).clone())
            .collect();

        let next_cursor = (end < matching.len()).then(|| Value::from(end as u64));
        Ok(Page {
            records,
            next_cursor,
        })
    }
}

fn query_error(msg: impl Into<String>) -> Error {
    Error::SourceUnavailable(format!("query error: {}", msg.into()))
}

/// Evaluates one query clause against a record.
fn matches_query(query: &Value, record: &Record) -> Result<bool> {
    let clause = query
        .as_object()
        .filter(|obj| obj.len() == 1)
        .ok_or_else(|| query_error(format!("expected a single-clause object, got {query}")))?;
    let (kind, body) = clause
        .iter()
        .next()
        .ok_or_else(|| query_error("empty clause"))?;

    match kind.as_str() {
        "match_all" => Ok(true),
        "term" => {
            let (field, expected) = single_field(body, "term")?;
            let expected = expected.get("value").unwrap_or(expected);
            Ok(field_matches(record, field, |v| v == expected))
        }
        "terms" => {
            let (field, options) = single_field(body, "terms")?;
            let options = options
                .as_array()
                .ok_or_else(|| query_error("terms expects an array"))?;
            Ok(field_matches(record, field, |v| options.contains(v)))
        }
        "range" => {
            let (field, bounds) = single_field(body, "range")?;
            let bounds = bounds
                .as_object()
                .ok_or_else(|| query_error("range expects an object of bounds"))?;
            let mut result = true;
            for (op, bound) in bounds {
                let wanted: &[Ordering] = match op.as_str() {
                    "gt" => &[Ordering::Greater],
                    "gte" => &[Ordering::Greater, Ordering::Equal],
                    "lt" => &[Ordering::Less],
                    "lte" => &[Ordering::Less, Ordering::Equal],
                    other => return Err(query_error(format!("unsupported range operator '{other}'"))),
                };
                result &= field_matches(record, field, |v| {
                    compare(v, bound).is_some_and(|ord| wanted.contains(&ord))
                });
            }
            Ok(result)
        }
        "bool" => matches_bool(body, record),
        other => Err(query_error(format!("unsupported clause '{other}'"))),
    }
}

fn matches_bool(body: &Value, record: &Record) -> Result<bool> {
    let obj = body
        .as_object()
        .ok_or_else(|| query_error("bool expects an object"))?;

    let clauses = |key: &str| -> Vec<&Value> {
        match obj.get(key) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single) => vec![single],
            None => Vec::new(),
        }
    };

    for clause in clauses("must").into_iter().chain(clauses("filter")) {
        if !matches_query(clause, record)? {
            return Ok(false);
        }
    }
    for clause in clauses("must_not") {
        if matches_query(clause, record)? {
            return Ok(false);
        }
    }

    let should = clauses("should");
    if should.is_empty() || obj.contains_key("must") || obj.contains_key("filter") {
        return Ok(true);
    }
    for clause in should {
        if matches_query(clause, record)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn single_field<'a>(body: &'a Value, kind: &str) -> Result<(&'a str, &'a Value)> {
    body.as_object()
        .filter(|obj| obj.len() == 1)
        .and_then(|obj| obj.iter().next())
        .map(|(k, v)| (k.as_str(), v))
        .ok_or_else(|| query_error(format!("{kind} expects exactly one field")))
}

/// Applies `pred` to the field value, or to each element when the field is an array.
fn field_matches(record: &Record, field: &str, pred: impl Fn(&Value) -> bool) -> bool {
    if field == "_id" {
        return pred(&Value::String(record.id.clone()));
    }

    match record.fields.get(field) {
        Some(Value::Array(items)) => items.iter().any(&pred),
        Some(v) => pred(v),
        None => false,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
