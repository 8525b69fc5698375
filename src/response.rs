use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One column of a result set
///
/// Snowflake sends name, type, nullability, precision and so on;
/// everything besides the name is passed through untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// The uniform result envelope
///
/// `row_count` is always `rows.len()`, whatever the service claims in its metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatementResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
}

impl StatementResult {
    pub(crate) fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> StatementResult {
        StatementResult {
            row_count: rows.len(),
            columns,
            rows,
        }
    }

    /// Rows as JSON objects keyed by column name
    pub fn json_objects(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                Value::Object(
                    self.columns
                        .iter()
                        .zip(row)
                        .map(|(column, value)| (column.name.clone(), value.clone()))
                        .collect(),
                )
            })
            .collect()
    }
}
