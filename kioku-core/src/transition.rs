//! Transition records stored in replay buffers.
//!
//! A transition is one step of agent-environment interaction, represented as
//! a mapping from named fields (`state`, `action`, `reward`, `next_state`,
//! `terminal`, plus arbitrary extras) to numeric values. The buffer is
//! agnostic to field semantics: producers define the field set, and the
//! first appended record fixes the schema for the lifetime of the buffer.

use crate::error::KiokuError;
use serde::{Deserialize, Serialize};
use std::collections::{
    hash_map::{Iter, Keys},
    HashMap,
};

/// A value held by one field of a [`Transition`].
///
/// Arrays carry their shape so that schema checks and batch concatenation
/// can validate compatibility without interpreting the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// A single floating-point value, e.g. a reward or a terminal flag.
    Scalar(f32),

    /// A 1-dimensional array.
    Array1(Vec<f32>),

    /// A 2-dimensional array with shape information.
    Array2(Vec<f32>, [usize; 2]),

    /// A 3-dimensional array with shape information.
    Array3(Vec<f32>, [usize; 3]),
}

impl FieldValue {
    /// Returns the kind descriptor of this value.
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Scalar(_) => FieldKind::Scalar,
            FieldValue::Array1(v) => FieldKind::Array1(v.len()),
            FieldValue::Array2(_, s) => FieldKind::Array2(*s),
            FieldValue::Array3(_, s) => FieldKind::Array3(*s),
        }
    }

    /// Returns the raw elements of this value in row-major order.
    pub fn elems(&self) -> &[f32] {
        match self {
            FieldValue::Scalar(v) => std::slice::from_ref(v),
            FieldValue::Array1(v) => v,
            FieldValue::Array2(v, _) => v,
            FieldValue::Array3(v, _) => v,
        }
    }
}

/// Kind and shape of a field, used for schema checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// A single floating-point value.
    Scalar,

    /// A 1-dimensional array of the given length.
    Array1(usize),

    /// A 2-dimensional array of the given shape.
    Array2([usize; 2]),

    /// A 3-dimensional array of the given shape.
    Array3([usize; 3]),
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Scalar => write!(f, "scalar"),
            FieldKind::Array1(n) => write!(f, "[{}]", n),
            FieldKind::Array2(s) => write!(f, "[{}, {}]", s[0], s[1]),
            FieldKind::Array3(s) => write!(f, "[{}, {}, {}]", s[0], s[1], s[2]),
        }
    }
}

/// One step of agent-environment interaction.
///
/// A container of named [`FieldValue`]s. Records are immutable once stored
/// in a buffer.
///
/// # Examples
///
/// ```
/// use kioku_core::{FieldValue, Transition};
///
/// let tr = Transition::from_slice(&[
///     ("state", FieldValue::Array1(vec![0.1, 0.2])),
///     ("action", FieldValue::Scalar(1.0)),
///     ("reward", FieldValue::Scalar(0.5)),
///     ("next_state", FieldValue::Array1(vec![0.2, 0.3])),
///     ("terminal", FieldValue::Scalar(0.0)),
/// ]);
/// assert_eq!(tr.get("reward"), Some(&FieldValue::Scalar(0.5)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition(HashMap<String, FieldValue>);

impl Transition {
    /// Creates an empty transition.
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Creates a transition from a slice of key-value pairs.
    pub fn from_slice<K: Into<String> + Clone>(s: &[(K, FieldValue)]) -> Self {
        Self(
            s.iter()
                .map(|(k, v)| (k.clone().into(), v.clone()))
                .collect(),
        )
    }

    /// Inserts a field, replacing any previous value under the same name.
    pub fn insert(&mut self, k: impl Into<String>, v: FieldValue) {
        self.0.insert(k.into(), v);
    }

    /// Gets a reference to the value of field `k`.
    pub fn get(&self, k: &str) -> Option<&FieldValue> {
        self.0.get(k)
    }

    /// Returns an iterator over the field names.
    pub fn keys(&self) -> Keys<String, FieldValue> {
        self.0.keys()
    }

    /// Returns an iterator over the fields.
    pub fn iter(&self) -> Iter<'_, String, FieldValue> {
        self.0.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the transition has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Field layout of a buffer, inferred from the first appended record.
///
/// Field names are kept sorted so that wildcard expansion and batch field
/// order are deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<(String, FieldKind)>,
}

impl Schema {
    /// Infers a schema from a record.
    ///
    /// # Errors
    ///
    /// Returns [`KiokuError::InvalidArgument`] if the record has no fields.
    pub fn infer(tr: &Transition) -> Result<Self, KiokuError> {
        if tr.is_empty() {
            return Err(KiokuError::InvalidArgument(
                "cannot infer a schema from a transition with no fields".into(),
            ));
        }
        let mut fields: Vec<_> = tr.iter().map(|(k, v)| (k.clone(), v.kind())).collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self { fields })
    }

    /// Checks a record against this schema.
    ///
    /// # Errors
    ///
    /// Returns [`KiokuError::InvalidArgument`] if the record's field set or
    /// any field shape differs from the schema.
    pub fn validate(&self, tr: &Transition) -> Result<(), KiokuError> {
        if tr.len() != self.fields.len() {
            return Err(KiokuError::InvalidArgument(format!(
                "schema mismatch: expected {} fields, found {}",
                self.fields.len(),
                tr.len()
            )));
        }
        for (name, kind) in &self.fields {
            match tr.get(name) {
                Some(v) if v.kind() == *kind => {}
                Some(v) => {
                    return Err(KiokuError::InvalidArgument(format!(
                        "schema mismatch for field '{}': expected {}, found {}",
                        name,
                        kind,
                        v.kind()
                    )))
                }
                None => {
                    return Err(KiokuError::InvalidArgument(format!(
                        "schema mismatch: missing field '{}'",
                        name
                    )))
                }
            }
        }
        Ok(())
    }

    /// Field names in schema order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Kind of field `k`, if present.
    pub fn kind_of(&self, k: &str) -> Option<FieldKind> {
        self.fields
            .iter()
            .find(|(name, _)| name == k)
            .map(|(_, kind)| *kind)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
