//! Typed records and their columnar representation.
//!
//! The decoder produces string-or-null cells; `TypedRecord::from_raw`
//! coerces them into the column types declared by the mapping tables. A
//! coercion failure means the mapping tables disagree with the live feed
//! and is surfaced as a `Validation` error, never silently dropped.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use arrow_array::{Array, ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};

use super::decode::RawRecord;
use super::error::EtlError;
use super::schema::{EntityKind, FieldSpec, FieldType};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Float(f64),
    Null,
}

/// Primary-key value for dedup maps; keys are always text or integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PkValue {
    Text(String),
    Int(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedRecord {
    pub kind: EntityKind,
    pub values: Vec<Value>,
}

impl TypedRecord {
    pub fn from_raw(kind: EntityKind, raw: RawRecord) -> Result<Self, EtlError> {
        let fields = kind.fields();
        debug_assert_eq!(raw.0.len(), fields.len());

        let mut values = Vec::with_capacity(fields.len());
        for (spec, cell) in fields.iter().zip(raw.0) {
            let v = match cell {
                None => Value::Null,
                Some(s) => coerce(spec, s)?,
            };
            values.push(v);
        }

        // A null key cannot be upserted; treat it like any other mismatch
        // between the mapping tables and the feed.
        if matches!(values[0], Value::Null) {
            return Err(EtlError::Validation {
                field: fields[0].column,
                value: String::new(),
            });
        }

        Ok(TypedRecord { kind, values })
    }

    pub fn pk(&self) -> PkValue {
        match &self.values[0] {
            Value::Text(s) => PkValue::Text(s.clone()),
            Value::Int(i) => PkValue::Int(*i),
            Value::Float(f) => PkValue::Int(*f as i64),
            Value::Null => unreachable!("from_raw rejects null keys"),
        }
    }
}

fn coerce(spec: &FieldSpec, s: String) -> Result<Value, EtlError> {
    match spec.ty {
        FieldType::Text => Ok(Value::Text(s)),
        FieldType::Int => {
            let t = s.trim();
            if t.is_empty() {
                return Ok(Value::Null);
            }
            t.parse::<i64>()
                .map(Value::Int)
                .map_err(|_| EtlError::Validation {
                    field: spec.column,
                    value: s.clone(),
                })
        }
        FieldType::Float => {
            let t = s.trim();
            if t.is_empty() {
                return Ok(Value::Null);
            }
            t.parse::<f64>()
                .map(Value::Float)
                .map_err(|_| EtlError::Validation {
                    field: spec.column,
                    value: s.clone(),
                })
        }
    }
}

pub fn arrow_schema(kind: EntityKind) -> Arc<Schema> {
    let fields: Vec<Field> = kind
        .fields()
        .iter()
        .map(|f| {
            let dt = match f.ty {
                FieldType::Text => DataType::Utf8,
                FieldType::Int => DataType::Int64,
                FieldType::Float => DataType::Float64,
            };
            Field::new(f.column, dt, true)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

/// Column-orient a batch of records for the parquet writer.
pub fn to_record_batch(kind: EntityKind, records: &[TypedRecord]) -> Result<RecordBatch> {
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(kind.fields().len());
    for (i, spec) in kind.fields().iter().enumerate() {
        let array: ArrayRef = match spec.ty {
            FieldType::Text => {
                let col: Vec<Option<&str>> = records
                    .iter()
                    .map(|r| match &r.values[i] {
                        Value::Text(s) => Some(s.as_str()),
                        _ => None,
                    })
                    .collect();
                Arc::new(StringArray::from(col))
            }
            FieldType::Int => {
                let col: Vec<Option<i64>> = records
                    .iter()
                    .map(|r| match &r.values[i] {
                        Value::Int(v) => Some(*v),
                        _ => None,
                    })
                    .collect();
                Arc::new(Int64Array::from(col))
            }
            FieldType::Float => {
                let col: Vec<Option<f64>> = records
                    .iter()
                    .map(|r| match &r.values[i] {
                        Value::Float(v) => Some(*v),
                        _ => None,
                    })
                    .collect();
                Arc::new(Float64Array::from(col))
            }
        };
        arrays.push(array);
    }
    RecordBatch::try_new(arrow_schema(kind), arrays)
        .with_context(|| format!("building record batch for {}", kind.table()))
}

/// Row-orient a batch read back from a staging file.
pub fn from_record_batch(kind: EntityKind, batch: &RecordBatch) -> Result<Vec<TypedRecord>> {
    let fields = kind.fields();
    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut values = Vec::with_capacity(fields.len());
        for (i, spec) in fields.iter().enumerate() {
            let col = batch.column(i);
            let v = match spec.ty {
                FieldType::Text => {
                    let col = col
                        .as_any()
                        .downcast_ref::<StringArray>()
                        .ok_or_else(|| anyhow!("column {} is not utf8", spec.column))?;
                    if col.is_null(row) {
                        Value::Null
                    } else {
                        Value::Text(col.value(row).to_string())
                    }
                }
                FieldType::Int => {
                    let col = col
                        .as_any()
                        .downcast_ref::<Int64Array>()
                        .ok_or_else(|| anyhow!("column {} is not int64", spec.column))?;
                    if col.is_null(row) {
                        Value::Null
                    } else {
                        Value::Int(col.value(row))
                    }
                }
                FieldType::Float => {
                    let col = col
                        .as_any()
                        .downcast_ref::<Float64Array>()
                        .ok_or_else(|| anyhow!("column {} is not float64", spec.column))?;
                    if col.is_null(row) {
                        Value::Null
                    } else {
                        Value::Float(col.value(row))
                    }
                }
            };
            values.push(v);
        }
        records.push(TypedRecord { kind, values });
    }
    Ok(records)
}
