//! Reply projection.
//!
//! `dump_info` and `dump_stats` replies are projected through the declared
//! schema into the caller's output: only declared fields are copied, each
//! checked against its declared kind, containers recursively. Fields the
//! reply does not carry, or whose value does not match the declared kind,
//! are skipped silently.

use serde_json::{Map, Value};

use extdev_core::{Field, FieldKind, Schema};

/// Hook appending system-level device statistics to `dump_info` output.
/// The real provider lives in the host daemon.
pub trait SystemStats: Send + Sync {
    fn append(&self, device: &str, out: &mut Map<String, Value>);
}

/// Default no-op provider.
pub struct NoSystemStats;

impl SystemStats for NoSystemStats {
    fn append(&self, _device: &str, _out: &mut Map<String, Value>) {}
}

/// Projects a handler reply through a schema.
pub fn project(schema: &Schema, reply: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    let Some(fields) = reply.as_object() else {
        return out;
    };
    for field in schema.fields() {
        if let Some(value) = fields.get(&field.name)
            && let Some(projected) = project_value(&field.kind, value)
        {
            out.insert(field.name.clone(), projected);
        }
    }
    out
}

fn project_value(kind: &FieldKind, value: &Value) -> Option<Value> {
    match kind {
        FieldKind::I8 => in_range_signed(value, i8::MIN as i64, i8::MAX as i64),
        FieldKind::I16 => in_range_signed(value, i16::MIN as i64, i16::MAX as i64),
        FieldKind::I32 => in_range_signed(value, i32::MIN as i64, i32::MAX as i64),
        FieldKind::I64 => value.as_i64().map(Value::from),
        FieldKind::U8 => in_range_unsigned(value, u8::MAX as u64),
        FieldKind::U16 => in_range_unsigned(value, u16::MAX as u64),
        FieldKind::U32 => in_range_unsigned(value, u32::MAX as u64),
        FieldKind::U64 => value.as_u64().map(Value::from),
        FieldKind::String => value.as_str().map(Value::from),
        FieldKind::Array(items) => {
            let elements = value.as_array()?;
            Some(Value::Array(
                elements
                    .iter()
                    .filter_map(|e| project_value(items, e))
                    .collect(),
            ))
        }
        FieldKind::Table(fields) => {
            let table = value.as_object()?;
            Some(Value::Object(project_table(fields, table)))
        }
    }
}

fn project_table(fields: &[Field], table: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for field in fields {
        if let Some(value) = table.get(&field.name)
            && let Some(projected) = project_value(&field.kind, value)
        {
            out.insert(field.name.clone(), projected);
        }
    }
    out
}

fn in_range_signed(value: &Value, min: i64, max: i64) -> Option<Value> {
    let n = value.as_i64()?;
    (min..=max).contains(&n).then(|| Value::from(n))
}

fn in_range_unsigned(value: &Value, max: u64) -> Option<Value> {
    let n = value.as_u64()?;
    (n <= max).then(|| Value::from(n))
}
