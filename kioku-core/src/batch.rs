//! Batches produced by sampling a buffer.

use crate::{
    error::KiokuError,
    transition::{FieldKind, FieldValue, Schema, Transition},
};
use serde::{Deserialize, Serialize};

/// How records are selected by `sample_batch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleMethod {
    /// Uniform random selection with replacement over occupied slots.
    Uniform,

    /// Every occupied slot in insertion order, ignoring the batch size.
    ///
    /// Used by on-policy algorithms that consume the whole buffer and then
    /// call `clear`.
    All,
}

/// Selects which fields are extracted from sampled records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleKey {
    /// A field selected by name.
    Named(String),

    /// All fields not selected by name, in schema order.
    Wildcard,
}

impl SampleKey {
    /// Shorthand for a named key.
    pub fn named(k: impl Into<String>) -> Self {
        SampleKey::Named(k.into())
    }
}

/// Field values stacked along a new leading batch dimension.
///
/// Stacking a [`FieldValue`] adds one dimension: scalars stack into
/// `Array1`, `Array1` into `Array2` and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchValue {
    /// Stacked scalars.
    Array1(Vec<f32>),

    /// Stacked 1-dimensional arrays, shape `[batch, len]`.
    Array2(Vec<f32>, [usize; 2]),

    /// Stacked 2-dimensional arrays.
    Array3(Vec<f32>, [usize; 3]),

    /// Stacked 3-dimensional arrays.
    Array4(Vec<f32>, [usize; 4]),
}

/// One field of a sampled batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldBatch {
    /// Same-named fields stacked into a single container.
    Stacked(BatchValue),

    /// One value per sampled record, in sample order.
    Rows(Vec<FieldValue>),
}

/// Result of `sample_batch`.
///
/// Fields are ordered as requested by the sample keys, with wildcard
/// expansion in schema order. `indices` are the slot indices the records
/// were drawn from; `weights` are importance-sampling weights and present
/// only for prioritized sampling.
#[derive(Debug, Clone)]
pub struct SampledBatch {
    /// Number of records actually selected.
    ///
    /// May be smaller than requested when [`SampleMethod::All`] selects
    /// fewer occupied slots.
    pub batch_size: usize,

    /// Extracted field batches, in key order.
    pub fields: Vec<(String, FieldBatch)>,

    /// Slot indices of the sampled records.
    pub indices: Option<Vec<usize>>,

    /// Importance-sampling weights, normalized per the buffer's config.
    pub weights: Option<Vec<f32>>,
}

impl SampledBatch {
    /// Gets the batch of field `k`, if selected.
    pub fn field(&self, k: &str) -> Option<&FieldBatch> {
        self.fields
            .iter()
            .find(|(name, _)| name == k)
            .map(|(_, b)| b)
    }
}

/// Expands sample keys against a schema.
///
/// `None` selects every field. A wildcard expands to all fields not named
/// elsewhere in the key list, in schema order.
///
/// # Errors
///
/// Returns [`KiokuError::InvalidArgument`] if a named key is not in the
/// schema.
pub fn expand_keys(
    schema: &Schema,
    keys: Option<&[SampleKey]>,
) -> Result<Vec<String>, KiokuError> {
    let keys = match keys {
        None => return Ok(schema.field_names().map(|k| k.to_string()).collect()),
        Some(keys) => keys,
    };

    let named: Vec<&str> = keys
        .iter()
        .filter_map(|k| match k {
            SampleKey::Named(name) => Some(name.as_str()),
            SampleKey::Wildcard => None,
        })
        .collect();
    for name in &named {
        if schema.kind_of(name).is_none() {
            return Err(KiokuError::InvalidArgument(format!(
                "sample key '{}' is not a field of the buffer schema",
                name
            )));
        }
    }

    let mut out = Vec::new();
    for key in keys {
        match key {
            SampleKey::Named(name) => out.push(name.clone()),
            SampleKey::Wildcard => {
                for name in schema.field_names() {
                    if !named.contains(&name) {
                        out.push(name.to_string());
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Stacks one field across records along a new leading batch dimension.
fn stack(key: &str, values: &[&FieldValue]) -> Result<BatchValue, KiokuError> {
    let kind = values[0].kind();
    for v in values.iter() {
        if v.kind() != kind {
            return Err(KiokuError::ShapeMismatch {
                key: key.to_string(),
                expected: kind.to_string(),
                found: v.kind().to_string(),
            });
        }
    }

    let n = values.len();
    let data: Vec<f32> = values.iter().flat_map(|v| v.elems().iter().copied()).collect();
    Ok(match kind {
        FieldKind::Scalar => BatchValue::Array1(data),
        FieldKind::Array1(d) => BatchValue::Array2(data, [n, d]),
        FieldKind::Array2(s) => BatchValue::Array3(data, [n, s[0], s[1]]),
        FieldKind::Array3(s) => BatchValue::Array4(data, [n, s[0], s[1], s[2]]),
    })
}

/// Assembles field batches from selected records.
///
/// Records may come from a single buffer or be merged across shards; each
/// record must carry every selected field. An empty selection yields an
/// empty field list, since stacking has no shape to infer from.
pub fn collate(
    records: &[&Transition],
    keys: &[String],
    concatenate: bool,
) -> Result<Vec<(String, FieldBatch)>, KiokuError> {
    if records.is_empty() {
        return Ok(vec![]);
    }
    let mut fields = Vec::with_capacity(keys.len());
    for key in keys {
        let mut values = Vec::with_capacity(records.len());
        for r in records {
            let v = r.get(key).ok_or_else(|| {
                KiokuError::InvalidArgument(format!("record is missing field '{}'", key))
            })?;
            values.push(v);
        }
        let batch = if concatenate {
            FieldBatch::Stacked(stack(key, &values)?)
        } else {
            FieldBatch::Rows(values.into_iter().cloned().collect())
        };
        fields.push((key.clone(), batch));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(x: f32) -> Transition {
        Transition::from_slice(&[
            ("state", FieldValue::Array1(vec![x, x + 1.0])),
            ("reward", FieldValue::Scalar(x)),
        ])
    }

    #[test]
    fn test_wildcard_expands_remaining_fields() {
        let schema = Schema::infer(&record(0.0)).unwrap();
        let keys = expand_keys(
            &schema,
            Some(&[SampleKey::named("reward"), SampleKey::Wildcard]),
        )
        .unwrap();
        assert_eq!(keys, vec!["reward".to_string(), "state".to_string()]);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let schema = Schema::infer(&record(0.0)).unwrap();
        assert!(expand_keys(&schema, Some(&[SampleKey::named("oops")])).is_err());
    }

    #[test]
    fn test_stacking_shapes() {
        let (a, b) = (record(0.0), record(1.0));
        let records = vec![&a, &b];
        let fields = collate(
            &records,
            &["state".to_string(), "reward".to_string()],
            true,
        )
        .unwrap();
        match &fields[0].1 {
            FieldBatch::Stacked(BatchValue::Array2(data, shape)) => {
                assert_eq!(*shape, [2, 2]);
                assert_eq!(data, &vec![0.0, 1.0, 1.0, 2.0]);
            }
            other => panic!("unexpected batch: {:?}", other),
        }
        match &fields[1].1 {
            FieldBatch::Stacked(BatchValue::Array1(data)) => {
                assert_eq!(data, &vec![0.0, 1.0]);
            }
            other => panic!("unexpected batch: {:?}", other),
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let a = record(0.0);
        let mut b = record(1.0);
        b.insert("state", FieldValue::Array1(vec![1.0, 2.0, 3.0]));
        let records = vec![&a, &b];
        let err = collate(&records, &["state".to_string()], true).unwrap_err();
        assert!(matches!(err, KiokuError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_collate_empty_selection() {
        let fields = collate(&[], &["reward".to_string()], true).unwrap();
        assert!(fields.is_empty());
    }

    #[test]
    fn test_rows_keep_per_record_values() {
        let (a, b) = (record(0.0), record(1.0));
        let records = vec![&a, &b];
        let fields = collate(&records, &["reward".to_string()], false).unwrap();
        match &fields[0].1 {
            FieldBatch::Rows(rows) => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[1], FieldValue::Scalar(1.0));
            }
            other => panic!("unexpected batch: {:?}", other),
        }
    }
}
