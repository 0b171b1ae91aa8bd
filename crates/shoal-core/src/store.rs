//! Contract for the collection store that holds every persisted row.
//!
//! The control plane only needs filtered reads, inserts, and filtered
//! patch/delete. [`MemoryStore`] implements the same semantics in memory.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StoreError;

pub type Row = serde_json::Map<String, Value>;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Logical collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Resource,
    Service,
    ServiceRuntime,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Resource => "resource",
            Table::Service => "service",
            Table::ServiceRuntime => "service_runtime",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals the value. Array fields match when they contain it.
    Eq(Value),
    /// Field is one of the values. Array fields match on any overlap.
    In(Vec<Value>),
    /// Numeric field is at most the bound.
    Le(f64),
}

impl Condition {
    fn matches(&self, field: Option<&Value>) -> bool {
        let Some(field) = field else {
            return false;
        };
        match self {
            Condition::Eq(expected) => match field {
                Value::Array(items) => items.contains(expected),
                other => other == expected,
            },
            Condition::In(candidates) => match field {
                Value::Array(items) => items.iter().any(|i| candidates.contains(i)),
                other => candidates.contains(other),
            },
            Condition::Le(bound) => field.as_f64().is_some_and(|v| v <= *bound),
        }
    }
}

/// Conjunction of field conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Condition)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push((field.into(), Condition::Eq(value.into())));
        self
    }

    pub fn any_of<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.conditions.push((field.into(), Condition::In(values)));
        self
    }

    pub fn at_most(mut self, field: impl Into<String>, bound: f64) -> Self {
        self.conditions.push((field.into(), Condition::Le(bound)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[(String, Condition)] {
        &self.conditions
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(field, cond)| cond.matches(row.get(field)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub order_by: Option<(String, Order)>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub projection: Option<Vec<String>>,
}

impl Query {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.order_by = Some((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

/// The store every component reads and writes through.
///
/// Implementations serialize conflicting writes to the same row; callers
/// never lock around these calls.
pub trait RuntimeStore: Send + Sync {
    fn get<'a>(&'a self, table: Table, query: &'a Query) -> StoreFuture<'a, Vec<Row>>;

    /// Insert a row, assigning an `id` when the row has none. Returns the id.
    fn insert<'a>(&'a self, table: Table, row: Row) -> StoreFuture<'a, String>;

    /// Patch every matching row, or delete them when `patch` is `None`.
    /// Returns the number of rows touched.
    fn set<'a>(&'a self, table: Table, patch: Option<Row>, filter: &'a Filter)
    -> StoreFuture<'a, u64>;

    fn get_one<'a>(&'a self, table: Table, filter: Filter) -> StoreFuture<'a, Option<Row>> {
        Box::pin(async move {
            let query = Query::new(filter).limit(1);
            Ok(self.get(table, &query).await?.into_iter().next())
        })
    }
}

pub fn to_row<T: Serialize>(value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Decode {
            table: "-".into(),
            reason: format!("expected an object, got {other}"),
        }),
    }
}

pub fn from_row<T: DeserializeOwned>(table: Table, row: Row) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(row)).map_err(|e| StoreError::Decode {
        table: table.to_string(),
        reason: e.to_string(),
    })
}

fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// In-memory [`RuntimeStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Table, Vec<Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held in `table`.
    pub async fn len(&self, table: Table) -> usize {
        self.tables.read().await.get(&table).map_or(0, Vec::len)
    }
}

impl RuntimeStore for MemoryStore {
    fn get<'a>(&'a self, table: Table, query: &'a Query) -> StoreFuture<'a, Vec<Row>> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            let mut rows: Vec<Row> = tables
                .get(&table)
                .map(|rows| {
                    rows.iter()
                        .filter(|r| query.filter.matches(r))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            drop(tables);

            if let Some((field, order)) = &query.order_by {
                // Missing fields sort last in either direction.
                rows.sort_by(|a, b| {
                    let (fa, fb) = (a.get(field), b.get(field));
                    match (fa.is_some(), fb.is_some(), order) {
                        (true, true, Order::Descending) => compare_fields(fb, fa),
                        _ => compare_fields(fa, fb),
                    }
                });
            }

            let rows = rows
                .into_iter()
                .skip(query.offset)
                .take(query.limit.unwrap_or(usize::MAX));

            let rows = match &query.projection {
                Some(fields) => rows
                    .map(|row| {
                        row.into_iter()
                            .filter(|(k, _)| fields.contains(k))
                            .collect()
                    })
                    .collect(),
                None => rows.collect(),
            };
            Ok(rows)
        })
    }

    fn insert<'a>(&'a self, table: Table, mut row: Row) -> StoreFuture<'a, String> {
        Box::pin(async move {
            let id = match row.get("id").and_then(Value::as_str) {
                Some(id) => id.to_string(),
                None => {
                    let id = uuid::Uuid::new_v4().simple().to_string();
                    row.insert("id".into(), Value::String(id.clone()));
                    id
                }
            };
            self.tables
                .write()
                .await
                .entry(table)
                .or_default()
                .push(row);
            tracing::debug!(%table, id = %id, "Row inserted");
            Ok(id)
        })
    }

    fn set<'a>(
        &'a self,
        table: Table,
        patch: Option<Row>,
        filter: &'a Filter,
    ) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            let Some(rows) = tables.get_mut(&table) else {
                return Ok(0);
            };

            let touched = match patch {
                Some(patch) => {
                    let mut count = 0;
                    for row in rows.iter_mut().filter(|r| filter.matches(r)) {
                        for (k, v) in &patch {
                            row.insert(k.clone(), v.clone());
                        }
                        count += 1;
                    }
                    count
                }
                None => {
                    let before = rows.len();
                    rows.retain(|r| !filter.matches(r));
                    (before - rows.len()) as u64
                }
            };
            tracing::debug!(%table, touched, "Rows updated");
            Ok(touched)
        })
    }
}
