//! Typed field comparison used to filter scans.

use bytes::Bytes;
use keel_common::{KeelError, Result};
use std::cmp::Ordering;

/// Type of the field a scan predicate compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    /// Native-endian 32-bit signed integer.
    Integer,
    /// Native-endian 32-bit float.
    Float,
    /// Byte string compared up to the first NUL.
    String,
}

/// Comparison applied between the record field and the filter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Lte,
    Eq,
    Gte,
    Gt,
    Ne,
}

impl Operator {
    /// Applies the operator to `field.cmp(filter)`. An unordered comparison
    /// (NaN) only satisfies `Ne`.
    fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Operator::Ne, None) => true,
            (_, None) => false,
            (Operator::Lt, Some(ord)) => ord == Ordering::Less,
            (Operator::Lte, Some(ord)) => ord != Ordering::Greater,
            (Operator::Eq, Some(ord)) => ord == Ordering::Equal,
            (Operator::Gte, Some(ord)) => ord != Ordering::Less,
            (Operator::Gt, Some(ord)) => ord == Ordering::Greater,
            (Operator::Ne, Some(ord)) => ord != Ordering::Equal,
        }
    }
}

/// A comparison of the `length` bytes at `offset` in each record against a
/// fixed filter value.
#[derive(Debug, Clone)]
pub struct ScanPredicate {
    offset: usize,
    length: usize,
    datatype: Datatype,
    filter: Bytes,
    op: Operator,
}

impl ScanPredicate {
    /// Builds a predicate, rejecting inconsistent parameters with
    /// `BadScanParameter`.
    pub fn new(
        offset: usize,
        length: usize,
        datatype: Datatype,
        filter: &[u8],
        op: Operator,
    ) -> Result<Self> {
        if length == 0 {
            return Err(KeelError::BadScanParameter(
                "field length must be at least 1".to_string(),
            ));
        }
        match datatype {
            Datatype::Integer if length != size_of::<i32>() => {
                return Err(KeelError::BadScanParameter(format!(
                    "integer field must be {} bytes, got {}",
                    size_of::<i32>(),
                    length
                )));
            }
            Datatype::Float if length != size_of::<f32>() => {
                return Err(KeelError::BadScanParameter(format!(
                    "float field must be {} bytes, got {}",
                    size_of::<f32>(),
                    length
                )));
            }
            _ => {}
        }
        if filter.len() < length {
            return Err(KeelError::BadScanParameter(format!(
                "filter value has {} bytes, field needs {}",
                filter.len(),
                length
            )));
        }

        Ok(Self {
            offset,
            length,
            datatype,
            filter: Bytes::copy_from_slice(&filter[..length]),
            op,
        })
    }

    /// Returns true if the record satisfies the predicate.
    ///
    /// A field window reaching past the end of the record never matches.
    pub fn matches(&self, record: &[u8]) -> bool {
        let Some(end) = self.offset.checked_add(self.length) else {
            return false;
        };
        let Some(field) = record.get(self.offset..end) else {
            return false;
        };

        let ordering = match self.datatype {
            Datatype::Integer => match (native_i32(field), native_i32(&self.filter)) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => return false,
            },
            Datatype::Float => match (native_f32(field), native_f32(&self.filter)) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => return false,
            },
            Datatype::String => Some(compare_c_strings(field, &self.filter)),
        };

        self.op.holds(ordering)
    }
}

fn native_i32(bytes: &[u8]) -> Option<i32> {
    Some(i32::from_ne_bytes(bytes.try_into().ok()?))
}

fn native_f32(bytes: &[u8]) -> Option<f32> {
    Some(f32::from_ne_bytes(bytes.try_into().ok()?))
}

/// Compares two equal-length byte windows as unsigned bytes, stopping at
/// the first NUL both share.
fn compare_c_strings(a: &[u8], b: &[u8]) -> Ordering {
    for (&x, &y) in a.iter().zip(b) {
        if x != y {
            return x.cmp(&y);
        }
        if x == 0 {
            break;
        }
    }
    Ordering::Equal
}
