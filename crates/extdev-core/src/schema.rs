//! Declarative payload schemas.
//!
//! Each device type descriptor carries up to three schemas (config, info,
//! stats) describing the fields the external handler understands. The
//! controller uses the config schema to classify configuration diffs and the
//! info/stats schemas to project handler replies into caller output.

use serde::Deserialize;
use tracing::debug;

/// Scalar or container type of a schema field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    String,
    /// Ordered array of one element kind.
    Array(Box<FieldKind>),
    /// Unordered table of named fields.
    Table(Vec<Field>),
}

impl FieldKind {
    /// Resolves a scalar type name from a descriptor. Container kinds are
    /// assembled by the descriptor parser from `items`/`fields`.
    pub fn scalar(name: &str) -> Option<FieldKind> {
        Some(match name {
            "i8" => Self::I8,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "u8" => Self::U8,
            "u16" => Self::U16,
            "u32" => Self::U32,
            "u64" => Self::U64,
            "string" => Self::String,
            _ => return None,
        })
    }
}

/// A named schema field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

/// An ordered list of declared fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parses a descriptor field-spec array. Entries with unrecognised type
    /// names are skipped silently, per the handler interface contract.
    pub fn from_specs(specs: &[FieldSpec]) -> Self {
        let mut fields = Vec::with_capacity(specs.len());
        for spec in specs {
            match spec.to_field() {
                Some(field) => fields.push(field),
                None => debug!(name = %spec.name, kind = %spec.kind, "skipping unknown schema field type"),
            }
        }
        Self { fields }
    }
}

/// One field entry as it appears in a descriptor file.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Element spec for `"type": "array"` entries.
    #[serde(default)]
    pub items: Option<Box<FieldSpec>>,
    /// Nested fields for `"type": "table"` entries.
    #[serde(default)]
    pub fields: Option<Vec<FieldSpec>>,
}

impl FieldSpec {
    fn to_kind(&self) -> Option<FieldKind> {
        match self.kind.as_str() {
            "array" => {
                let items = self.items.as_ref()?;
                Some(FieldKind::Array(Box::new(items.to_kind()?)))
            }
            "table" => {
                let fields = self.fields.as_deref().unwrap_or_default();
                Some(FieldKind::Table(
                    fields.iter().filter_map(FieldSpec::to_field).collect(),
                ))
            }
            scalar => FieldKind::scalar(scalar),
        }
    }

    fn to_field(&self) -> Option<Field> {
        Some(Field {
            name: self.name.clone(),
            kind: self.to_kind()?,
        })
    }
}
