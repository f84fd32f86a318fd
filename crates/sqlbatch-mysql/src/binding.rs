//! The parameter values of one statement invocation.

use sqlbatch_core::error::{Error, Result, StatementError, StatementErrorKind};
use sqlbatch_core::{BoundValue, FieldType, StreamSource, Value};

/// Bytes a NULL slot is assumed to occupy when sizing batches.
const NULL_SIZE: u64 = 4;

/// A fixed-length, ordered set of parameter bindings.
///
/// Queued batch entries are owned clones; setting a parameter on the live
/// statement afterwards never reaches them.
#[derive(Debug, Clone, Default)]
pub struct BindingSet {
    values: Vec<BoundValue>,
}

impl BindingSet {
    /// A set of `param_count` unset slots.
    pub fn new(param_count: usize) -> Self {
        Self {
            values: vec![BoundValue::Unset; param_count],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bind a slot by 1-based parameter index.
    #[allow(clippy::result_large_err)]
    pub fn set(&mut self, index: usize, binding: BoundValue) -> Result<()> {
        let count = self.values.len();
        let slot = index
            .checked_sub(1)
            .and_then(|i| self.values.get_mut(i))
            .ok_or_else(|| {
                Error::Statement(StatementError::new(
                    StatementErrorKind::ParameterIndex,
                    format!("Parameter index out of range ({index} > number of parameters, which is {count})"),
                ))
            })?;
        *slot = binding;
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    pub fn set_value(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.set(index, BoundValue::from_value(value.into()))
    }

    #[allow(clippy::result_large_err)]
    pub fn set_typed(&mut self, index: usize, value: impl Into<Value>, field_type: FieldType) -> Result<()> {
        self.set(index, BoundValue::with_type(value.into(), field_type))
    }

    #[allow(clippy::result_large_err)]
    pub fn set_null(&mut self, index: usize, field_type: FieldType) -> Result<()> {
        self.set(index, BoundValue::Null { declared_type: field_type })
    }

    #[allow(clippy::result_large_err)]
    pub fn set_stream(&mut self, index: usize, source: StreamSource, length: Option<u64>) -> Result<()> {
        self.set(index, BoundValue::stream(source, length))
    }

    /// Reset every slot to unset.
    pub fn clear(&mut self) {
        self.values.fill(BoundValue::Unset);
    }

    /// Have all slots been bound?
    pub fn is_complete(&self) -> bool {
        self.values.iter().all(BoundValue::is_set)
    }

    /// 1-based index of the first unset slot.
    pub fn first_unset(&self) -> Option<usize> {
        self.values.iter().position(|v| !v.is_set()).map(|i| i + 1)
    }

    pub fn values(&self) -> &[BoundValue] {
        &self.values
    }

    /// Estimated wire size of this set.
    ///
    /// A stream of unknown length counts as `max_allowed_packet`, forcing
    /// the batch down to one set per round trip.
    pub fn parameter_set_size(&self, max_allowed_packet: usize) -> u64 {
        self.values
            .iter()
            .map(|v| match v {
                BoundValue::Unset => 0,
                BoundValue::Null { .. } => NULL_SIZE,
                BoundValue::Stream { length: Some(len), .. } => len.saturating_mul(2),
                BoundValue::Stream { length: None, .. } => max_allowed_packet as u64,
                BoundValue::Value { bytes, .. } => bytes.len() as u64,
            })
            .fold(0_u64, u64::saturating_add)
    }
}
