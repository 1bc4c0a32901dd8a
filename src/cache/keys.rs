//! Cache key derivation and tag naming.
//!
//! A query is reduced to a [`QueryShape`] (table, generated SQL, bound values,
//! eager loads). The shape is written into a canonical byte stream and hashed
//! with SHA-256; the [`Operation`] then appends a suffix so that a count and a
//! fetch over the same predicate never share an entry. Lookups by primary key
//! skip hashing and use `{table}.find.{id}` directly.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A value bound to a placeholder in the generated SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Binding {
    fn write_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Binding::Null => out.push(b'n'),
            Binding::Bool(value) => {
                out.push(b'b');
                out.push(u8::from(*value));
            }
            Binding::Int(value) => {
                out.push(b'i');
                out.extend_from_slice(&value.to_be_bytes());
            }
            Binding::Float(value) => {
                out.push(b'f');
                // `-0.0 == 0.0` in SQL; fold the sign so both share a key.
                let value = if *value == 0.0 { 0.0 } else { *value };
                out.extend_from_slice(&value.to_bits().to_be_bytes());
            }
            Binding::Text(value) => {
                out.push(b's');
                write_str(out, value);
            }
        }
    }
}

impl From<bool> for Binding {
    fn from(value: bool) -> Self {
        Binding::Bool(value)
    }
}

impl From<i32> for Binding {
    fn from(value: i32) -> Self {
        Binding::Int(value.into())
    }
}

impl From<i64> for Binding {
    fn from(value: i64) -> Self {
        Binding::Int(value)
    }
}

impl From<f64> for Binding {
    fn from(value: f64) -> Self {
        Binding::Float(value)
    }
}

impl From<&str> for Binding {
    fn from(value: &str) -> Self {
        Binding::Text(value.to_string())
    }
}

impl From<String> for Binding {
    fn from(value: String) -> Self {
        Binding::Text(value)
    }
}

impl From<Uuid> for Binding {
    fn from(value: Uuid) -> Self {
        Binding::Text(value.to_string())
    }
}

impl<T: Into<Binding>> From<Option<T>> for Binding {
    fn from(value: Option<T>) -> Self {
        value.map_or(Binding::Null, Into::into)
    }
}

/// Everything about a query that affects its result set.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryShape {
    table: String,
    sql: String,
    bindings: Vec<Binding>,
    eager_loads: Vec<String>,
}

impl QueryShape {
    pub fn new(table: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            sql: sql.into(),
            bindings: Vec::new(),
            eager_loads: Vec::new(),
        }
    }

    /// Append a bound parameter value, in placeholder order.
    pub fn bind(mut self, value: impl Into<Binding>) -> Self {
        self.bindings.push(value.into());
        self
    }

    /// Declare an eager-loaded relation.
    pub fn with(mut self, relation: impl Into<String>) -> Self {
        self.eager_loads.push(relation.into());
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn eager_loads(&self) -> &[String] {
        &self.eager_loads
    }

    /// Eager loads are a set: declaration order and repeats do not matter.
    fn canonical_eager_loads(&self) -> Vec<&str> {
        let mut loads: Vec<&str> = self.eager_loads.iter().map(String::as_str).collect();
        loads.sort_unstable();
        loads.dedup();
        loads
    }

    fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.sql.len() + 64);
        write_str(&mut out, &self.table);
        write_str(&mut out, &self.sql);
        out.extend_from_slice(&(self.bindings.len() as u64).to_be_bytes());
        for binding in &self.bindings {
            binding.write_canonical(&mut out);
        }
        let loads = self.canonical_eager_loads();
        out.extend_from_slice(&(loads.len() as u64).to_be_bytes());
        for load in loads {
            write_str(&mut out, load);
        }
        out
    }

    /// Hex SHA-256 of the canonical form, shared by every table-scoped operation.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        hex::encode(hasher.finalize())
    }
}

fn write_str(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u64).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
}

/// Primary key of a cached record. Integer and string keys share one textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty ids carry no record identity and never produce a record tag.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i32> for RecordId {
    fn from(value: i32) -> Self {
        Self(value.to_string())
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for RecordId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<Uuid> for RecordId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    Sum,
    Avg,
    Max,
    Min,
}

impl Aggregate {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
            Aggregate::Max => "max",
            Aggregate::Min => "min",
        }
    }
}

/// What the caller asks of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Fetch every matching row.
    Get,
    /// Fetch the first matching row.
    First,
    Count,
    Aggregate { function: Aggregate, column: String },
    /// Fetch one record by primary key.
    Find(RecordId),
}

impl Operation {
    pub fn sum(column: impl Into<String>) -> Self {
        Self::aggregate(Aggregate::Sum, column)
    }

    pub fn avg(column: impl Into<String>) -> Self {
        Self::aggregate(Aggregate::Avg, column)
    }

    pub fn max(column: impl Into<String>) -> Self {
        Self::aggregate(Aggregate::Max, column)
    }

    pub fn min(column: impl Into<String>) -> Self {
        Self::aggregate(Aggregate::Min, column)
    }

    fn aggregate(function: Aggregate, column: impl Into<String>) -> Self {
        Self::Aggregate {
            function,
            column: column.into(),
        }
    }

    /// Short label used in stats and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::First => "first",
            Operation::Count => "count",
            Operation::Aggregate { function, .. } => function.as_str(),
            Operation::Find(_) => "find",
        }
    }
}

/// Derive the (unprefixed) cache key for `operation` over `shape`.
///
/// Pure: never touches a store.
pub fn derive_key(shape: &QueryShape, operation: &Operation) -> String {
    match operation {
        Operation::Find(id) => find_key(shape.table(), id),
        Operation::Get => shape.fingerprint(),
        Operation::First => format!("{}:first", shape.fingerprint()),
        Operation::Count => format!("{}:count", shape.fingerprint()),
        Operation::Aggregate { function, column } => {
            format!("{}:{}:{}", shape.fingerprint(), function.as_str(), column)
        }
    }
}

/// Key for a primary-key lookup; identity needs no predicate disambiguation.
pub fn find_key(table: &str, id: &RecordId) -> String {
    format!("{table}.find.{id}")
}

/// Invalidation scope of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagScope {
    /// Every entry written by this cache.
    Global,
    /// Every entry read from one table.
    Table(String),
    /// Entries for a single record of a table.
    Record { table: String, id: RecordId },
}

impl TagScope {
    pub fn table(table: impl Into<String>) -> Self {
        Self::Table(table.into())
    }

    pub fn record(table: impl Into<String>, id: impl Into<RecordId>) -> Self {
        Self::Record {
            table: table.into(),
            id: id.into(),
        }
    }

    /// Render as `{prefix}`, `{prefix}.{table}` or `{prefix}.{table}.{id}`.
    pub fn tag(&self, prefix: &str) -> String {
        match self {
            TagScope::Global => prefix.to_string(),
            TagScope::Table(table) => format!("{prefix}.{table}"),
            TagScope::Record { table, id } => format!("{prefix}.{table}.{id}"),
        }
    }
}
