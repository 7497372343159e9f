//! Normalized truth labels.
//!
//! A truth target names one drawn field of one object. Extraction looks the
//! value up in the drawn parameters, looks its declared distribution up in the
//! lensing configuration, and normalizes the value against it. Labels come out
//! in target order.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::distribution::{normalize_param, DistributionError, DistributionRecord};
use crate::param_tree::{EncodedTree, SampledTree};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TruthError {
    #[error("unknown truth field '{object}.{field}'")]
    UnknownField { object: String, field: String },
    #[error("cannot normalize truth field '{object}.{field}': {source}")]
    Normalization {
        object: String,
        field: String,
        #[source]
        source: DistributionError,
    },
    #[error("truth target columns differ in length: {objects} objects, {fields} fields")]
    ColumnMismatch { objects: usize, fields: usize },
}

/// One `(object, field)` label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruthTarget {
    pub object: String,
    pub field: String,
}

impl TruthTarget {
    pub fn new(object: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            field: field.into(),
        }
    }

    fn unknown(&self) -> TruthError {
        TruthError::UnknownField {
            object: self.object.clone(),
            field: self.field.clone(),
        }
    }

    fn record<'a>(&self, config: &'a EncodedTree) -> Result<&'a DistributionRecord, TruthError> {
        config
            .get(&[self.object.as_str(), self.field.as_str()])
            .map_err(|_| self.unknown())
    }
}

/// Ordered list of truth targets.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TruthTargets(Vec<TruthTarget>);

impl TruthTargets {
    pub fn new(targets: Vec<TruthTarget>) -> Self {
        Self(targets)
    }

    /// Build from parallel `objects` and `fields` columns.
    pub fn from_columns<S: AsRef<str>>(objects: &[S], fields: &[S]) -> Result<Self, TruthError> {
        if objects.len() != fields.len() {
            return Err(TruthError::ColumnMismatch {
                objects: objects.len(),
                fields: fields.len(),
            });
        }
        Ok(Self(
            objects
                .iter()
                .zip(fields)
                .map(|(object, field)| TruthTarget::new(object.as_ref(), field.as_ref()))
                .collect(),
        ))
    }

    pub fn targets(&self) -> &[TruthTarget] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check that every target has a declared distribution.
    pub fn resolve(&self, config: &EncodedTree) -> Result<(), TruthError> {
        for target in &self.0 {
            target.record(config)?;
        }
        Ok(())
    }
}

/// Normalized label vector for `targets`, in target order.
///
/// `params` holds the drawn values grouped by object; `config` holds the
/// distributions they were drawn from.
pub fn extract_truth_values(
    params: &SampledTree,
    config: &EncodedTree,
    targets: &TruthTargets,
) -> Result<Array1<f64>, TruthError> {
    let values = targets
        .targets()
        .iter()
        .map(|target| {
            let value = params
                .get(&[target.object.as_str(), target.field.as_str()])
                .map_err(|_| target.unknown())?;
            let record = target.record(config)?;
            normalize_param(*value, record).map_err(|source| TruthError::Normalization {
                object: target.object.clone(),
                field: target.field.clone(),
                source,
            })
        })
        .collect::<Result<Vec<f64>, TruthError>>()?;
    Ok(Array1::from(values))
}
