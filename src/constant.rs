//! Compile-time constant values.
//!
//! `ConstantValue` follows the reference semantics of the source language:
//! booleans behave as integers in arithmetic, integers are arbitrary
//! precision, `0 == 0.0`, and truthiness is zero/emptiness based. Every
//! folding helper either produces a value, a statically-known raise, or
//! refuses (`Pending`), leaving the operation for runtime.

use num::bigint::BigInt;
use num::ToPrimitive;
use num_traits::{Signed, Zero};

use crate::exceptions::ExceptionKind;
use crate::shapes::TypeId;

#[derive(Clone, PartialEq, Debug)]
pub enum ConstantValue {
    None,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<ConstantValue>),
    /// A module object bound by a trusted import. Carries the module name
    /// so attribute lookups can consult the trust table.
    ImportedModule(String),
}

/// Result of attempting a compile-time evaluation.
#[derive(Clone, PartialEq, Debug)]
pub enum Folded {
    Value(ConstantValue),
    Raise(ExceptionKind),
}

impl ConstantValue {
    pub fn int(v: i64) -> Self {
        ConstantValue::Int(BigInt::from(v))
    }

    pub fn str(v: &str) -> Self {
        ConstantValue::Str(v.to_string())
    }

    pub fn type_id(&self) -> TypeId {
        match self {
            ConstantValue::None => TypeId::NoneType,
            ConstantValue::Bool(_) => TypeId::Bool,
            ConstantValue::Int(_) => TypeId::Int,
            ConstantValue::Float(_) => TypeId::Float,
            ConstantValue::Str(_) => TypeId::Str,
            ConstantValue::Bytes(_) => TypeId::Bytes,
            ConstantValue::Tuple(_) => TypeId::Tuple,
            ConstantValue::ImportedModule(_) => TypeId::Module,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_id().name()
    }

    pub fn truthy(&self) -> bool {
        match self {
            ConstantValue::None => false,
            ConstantValue::Bool(b) => *b,
            ConstantValue::Int(i) => !i.is_zero(),
            ConstantValue::Float(f) => *f != 0.0,
            ConstantValue::Str(s) => !s.is_empty(),
            ConstantValue::Bytes(b) => !b.is_empty(),
            ConstantValue::Tuple(t) => !t.is_empty(),
            ConstantValue::ImportedModule(_) => true,
        }
    }

    /// Numeric view with bool-as-int promotion. `None` for non-integers.
    pub fn as_bigint(&self) -> Option<BigInt> {
        match self {
            ConstantValue::Bool(b) => Some(BigInt::from(*b as i64)),
            ConstantValue::Int(i) => Some(i.clone()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConstantValue::Bool(b) => Some(*b as i64 as f64),
            ConstantValue::Int(i) => i.to_f64(),
            ConstantValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(
            self,
            ConstantValue::Bool(_) | ConstantValue::Int(_) | ConstantValue::Float(_)
        )
    }

    fn is_float_ctx(&self, other: &ConstantValue) -> bool {
        matches!(self, ConstantValue::Float(_)) || matches!(other, ConstantValue::Float(_))
    }

    /// Value equality under reference semantics: numbers compare across
    /// representation, everything else compares within its own type.
    pub fn eq_value(&self, other: &ConstantValue) -> bool {
        match (self, other) {
            (a, b) if a.is_number() && b.is_number() => {
                if a.is_float_ctx(b) {
                    match (a.as_f64(), b.as_f64()) {
                        (Some(x), Some(y)) => x == y,
                        _ => false,
                    }
                } else {
                    a.as_bigint() == b.as_bigint()
                }
            }
            (ConstantValue::None, ConstantValue::None) => true,
            (ConstantValue::Str(a), ConstantValue::Str(b)) => a == b,
            (ConstantValue::Bytes(a), ConstantValue::Bytes(b)) => a == b,
            (ConstantValue::Tuple(a), ConstantValue::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.eq_value(y))
            }
            _ => false,
        }
    }

    /// Ordering under reference semantics. `None` when the pair is
    /// unorderable (which folds to a `TypeError`).
    pub fn cmp_value(&self, other: &ConstantValue) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (a, b) if a.is_number() && b.is_number() => {
                if a.is_float_ctx(b) {
                    a.as_f64()?.partial_cmp(&b.as_f64()?)
                } else {
                    Some(a.as_bigint()?.cmp(&b.as_bigint()?))
                }
            }
            (ConstantValue::Str(a), ConstantValue::Str(b)) => Some(a.cmp(b)),
            (ConstantValue::Bytes(a), ConstantValue::Bytes(b)) => Some(a.cmp(b)),
            (ConstantValue::Tuple(a), ConstantValue::Tuple(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.cmp_value(y)? {
                        std::cmp::Ordering::Equal => continue,
                        other => return Some(other),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// Membership test for `in`. `None` when the right side is not a
    /// container the optimizer can test.
    pub fn contains(&self, item: &ConstantValue) -> Option<bool> {
        match self {
            ConstantValue::Tuple(elems) => Some(elems.iter().any(|e| e.eq_value(item))),
            ConstantValue::Str(s) => match item {
                ConstantValue::Str(needle) => Some(s.contains(needle.as_str())),
                _ => None,
            },
            _ => None,
        }
    }

    /// Length where the value has one.
    pub fn len(&self) -> Option<usize> {
        match self {
            ConstantValue::Str(s) => Some(s.chars().count()),
            ConstantValue::Bytes(b) => Some(b.len()),
            ConstantValue::Tuple(t) => Some(t.len()),
            _ => None,
        }
    }

    /// Indexing with negative-index normalization. Only defined for the
    /// immutable sequence constants.
    pub fn index(&self, index: &ConstantValue) -> Option<Folded> {
        let len = self.len()? as i64;
        let raw = match index.as_bigint() {
            Some(i) => i,
            None => return Some(Folded::Raise(ExceptionKind::TypeError)),
        };
        let raw = match raw.to_i64() {
            Some(i) => i,
            None => return Some(Folded::Raise(ExceptionKind::IndexError)),
        };
        let effective = if raw < 0 { raw + len } else { raw };
        if effective < 0 || effective >= len {
            return Some(Folded::Raise(ExceptionKind::IndexError));
        }
        let at = effective as usize;
        let value = match self {
            ConstantValue::Str(s) => ConstantValue::Str(s.chars().nth(at)?.to_string()),
            ConstantValue::Bytes(b) => ConstantValue::int(b[at] as i64),
            ConstantValue::Tuple(t) => t[at].clone(),
            _ => return None,
        };
        Some(Folded::Value(value))
    }

    /// Slicing with clamped bounds, step 1 only.
    pub fn slice(&self, lower: Option<i64>, upper: Option<i64>) -> Option<ConstantValue> {
        let len = self.len()? as i64;
        let clamp = |bound: Option<i64>, default: i64| -> i64 {
            let b = bound.unwrap_or(default);
            let b = if b < 0 { b + len } else { b };
            b.clamp(0, len)
        };
        let start = clamp(lower, 0) as usize;
        let stop = clamp(upper, len) as usize;
        let stop = stop.max(start);
        match self {
            ConstantValue::Str(s) => {
                Some(ConstantValue::Str(s.chars().skip(start).take(stop - start).collect()))
            }
            ConstantValue::Bytes(b) => Some(ConstantValue::Bytes(b[start..stop].to_vec())),
            ConstantValue::Tuple(t) => Some(ConstantValue::Tuple(t[start..stop].to_vec())),
            _ => None,
        }
    }

    /// Human-oriented rendering for diagnostics and tree dumps.
    pub fn describe(&self) -> String {
        match self {
            ConstantValue::None => "None".to_string(),
            ConstantValue::Bool(true) => "True".to_string(),
            ConstantValue::Bool(false) => "False".to_string(),
            ConstantValue::Int(i) => i.to_string(),
            ConstantValue::Float(f) => format!("{:?}", f),
            ConstantValue::Str(s) => format!("{:?}", s),
            ConstantValue::Bytes(b) => format!("b<{} bytes>", b.len()),
            ConstantValue::Tuple(t) => {
                let inner: Vec<String> = t.iter().map(|v| v.describe()).collect();
                format!("({})", inner.join(", "))
            }
            ConstantValue::ImportedModule(name) => format!("<module {}>", name),
        }
    }
}

impl std::fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Integer repetition guard: refuse to materialize absurdly large
/// sequence repetitions at compile time.
pub(crate) const MAX_FOLDED_LEN: usize = 1 << 16;

pub(crate) fn repeat_guard(len: usize, count: &BigInt) -> Option<usize> {
    if count.is_negative() {
        return Some(0);
    }
    let count = count.to_usize()?;
    let total = len.checked_mul(count)?;
    if total > MAX_FOLDED_LEN {
        None
    } else {
        Some(count)
    }
}
