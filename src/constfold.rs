//! Constant-folding table.
//!
//! Maps an operation name to guard predicates over the operand constants
//! and a folding function. An entry only fires when every operand is a
//! compile-time constant and every predicate accepts its operand; the
//! folding function may still refuse (operation left for runtime) or
//! produce a statically known raise (e.g. division by zero).

use std::collections::HashMap;

use num::bigint::BigInt;
use num::ToPrimitive;
use num_traits::{Pow, Signed, Zero};
use once_cell::sync::Lazy;

use crate::constant::{repeat_guard, ConstantValue, Folded};
use crate::exceptions::ExceptionKind;
use crate::tree::{BinOp, CmpOp, UnOp};

pub struct FoldingEntry {
    pub name: &'static str,
    pub predicates: &'static [fn(&ConstantValue) -> bool],
    pub fold: fn(&[ConstantValue]) -> Option<Folded>,
}

macro_rules! table {
    ($table_name: ident => $($name: literal, ($($predicate: ident),*) => ($args: ident) $b: block)*) => {
        pub fn $table_name() -> Vec<FoldingEntry> {
            vec![$(FoldingEntry {
                name: $name,
                predicates: &[$(pred::$predicate),*],
                fold: {
                    fn f($args: &[ConstantValue]) -> Option<Folded> $b
                    f
                }
            }),*]
        }
    };
}

mod pred {
    use super::ConstantValue;

    pub fn always(_: &ConstantValue) -> bool {
        true
    }

    pub fn is_number(v: &ConstantValue) -> bool {
        v.is_number()
    }

    pub fn is_int(v: &ConstantValue) -> bool {
        v.as_bigint().is_some()
    }

}

fn value(v: ConstantValue) -> Option<Folded> {
    Some(Folded::Value(v))
}

fn raise(kind: ExceptionKind) -> Option<Folded> {
    Some(Folded::Raise(kind))
}

/// Numeric binary fold with bool-as-int and float promotion.
fn numeric(
    a: &ConstantValue,
    b: &ConstantValue,
    int_op: impl Fn(&BigInt, &BigInt) -> Option<Folded>,
    float_op: impl Fn(f64, f64) -> Option<Folded>,
) -> Option<Folded> {
    if matches!(a, ConstantValue::Float(_)) || matches!(b, ConstantValue::Float(_)) {
        float_op(a.as_f64()?, b.as_f64()?)
    } else {
        int_op(&a.as_bigint()?, &b.as_bigint()?)
    }
}

table! {
    arithmetic_folding_table =>
        "add", (always, always) => (args) {
            match (&args[0], &args[1]) {
                (ConstantValue::Str(x), ConstantValue::Str(y)) => {
                    value(ConstantValue::Str(format!("{}{}", x, y)))
                }
                (ConstantValue::Bytes(x), ConstantValue::Bytes(y)) => {
                    let mut out = x.clone();
                    out.extend_from_slice(y);
                    value(ConstantValue::Bytes(out))
                }
                (ConstantValue::Tuple(x), ConstantValue::Tuple(y)) => {
                    let mut out = x.clone();
                    out.extend_from_slice(y);
                    value(ConstantValue::Tuple(out))
                }
                (a, b) if a.is_number() && b.is_number() => numeric(
                    a,
                    b,
                    |x, y| value(ConstantValue::Int(x + y)),
                    |x, y| value(ConstantValue::Float(x + y)),
                ),
                _ => raise(ExceptionKind::TypeError),
            }
        }

        "sub", (is_number, is_number) => (args) {
            numeric(
                &args[0],
                &args[1],
                |x, y| value(ConstantValue::Int(x - y)),
                |x, y| value(ConstantValue::Float(x - y)),
            )
        }

        "mult", (always, always) => (args) {
            match (&args[0], &args[1]) {
                (ConstantValue::Str(s), n) | (n, ConstantValue::Str(s)) if n.as_bigint().is_some() => {
                    let count = repeat_guard(s.len(), &n.as_bigint().unwrap())?;
                    value(ConstantValue::Str(s.repeat(count)))
                }
                (ConstantValue::Tuple(t), n) | (n, ConstantValue::Tuple(t)) if n.as_bigint().is_some() => {
                    let count = repeat_guard(t.len(), &n.as_bigint().unwrap())?;
                    let mut out = Vec::with_capacity(t.len() * count);
                    for _ in 0..count {
                        out.extend_from_slice(t);
                    }
                    value(ConstantValue::Tuple(out))
                }
                (a, b) if a.is_number() && b.is_number() => numeric(
                    a,
                    b,
                    |x, y| value(ConstantValue::Int(x * y)),
                    |x, y| value(ConstantValue::Float(x * y)),
                ),
                _ => raise(ExceptionKind::TypeError),
            }
        }

        "truediv", (is_number, is_number) => (args) {
            let y = args[1].as_f64()?;
            if y == 0.0 {
                return raise(ExceptionKind::ZeroDivisionError);
            }
            value(ConstantValue::Float(args[0].as_f64()? / y))
        }

        "floordiv", (is_number, is_number) => (args) {
            numeric(
                &args[0],
                &args[1],
                |x, y| {
                    if y.is_zero() {
                        return raise(ExceptionKind::ZeroDivisionError);
                    }
                    // Floor semantics, not truncation.
                    let (q, r) = (x / y, x % y);
                    let q = if !r.is_zero() && (r.is_negative() != y.is_negative()) {
                        q - 1
                    } else {
                        q
                    };
                    value(ConstantValue::Int(q))
                },
                |x, y| {
                    if y == 0.0 {
                        return raise(ExceptionKind::ZeroDivisionError);
                    }
                    value(ConstantValue::Float((x / y).floor()))
                },
            )
        }

        "mod", (is_number, is_number) => (args) {
            numeric(
                &args[0],
                &args[1],
                |x, y| {
                    if y.is_zero() {
                        return raise(ExceptionKind::ZeroDivisionError);
                    }
                    let r = x % y;
                    let r = if !r.is_zero() && (r.is_negative() != y.is_negative()) {
                        r + y
                    } else {
                        r
                    };
                    value(ConstantValue::Int(r))
                },
                |x, y| {
                    if y == 0.0 {
                        return raise(ExceptionKind::ZeroDivisionError);
                    }
                    let r = x % y;
                    let r = if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r };
                    value(ConstantValue::Float(r))
                },
            )
        }

        "pow", (is_number, is_number) => (args) {
            match (args[0].as_bigint(), args[1].as_bigint()) {
                (Some(base), Some(exp)) if !exp.is_negative() => {
                    // Bounded exponent keeps folding from materializing
                    // gigantic numbers at compile time.
                    let exp = exp.to_u32().filter(|e| *e <= 4096)?;
                    value(ConstantValue::Int(Pow::pow(base, exp)))
                }
                _ => {
                    let base = args[0].as_f64()?;
                    let exp = args[1].as_f64()?;
                    if base == 0.0 && exp < 0.0 {
                        return raise(ExceptionKind::ZeroDivisionError);
                    }
                    value(ConstantValue::Float(base.powf(exp)))
                }
            }
        }

        "lshift", (is_int, is_int) => (args) {
            let shift = args[1].as_bigint().unwrap();
            if shift.is_negative() {
                return raise(ExceptionKind::ValueError);
            }
            let shift = shift.to_u32().filter(|s| *s <= 4096)?;
            value(ConstantValue::Int(args[0].as_bigint().unwrap() << shift))
        }

        "rshift", (is_int, is_int) => (args) {
            let shift = args[1].as_bigint().unwrap();
            if shift.is_negative() {
                return raise(ExceptionKind::ValueError);
            }
            let shift = shift.to_u32()?;
            value(ConstantValue::Int(args[0].as_bigint().unwrap() >> shift))
        }

        "bitand", (is_int, is_int) => (args) {
            value(ConstantValue::Int(args[0].as_bigint().unwrap() & args[1].as_bigint().unwrap()))
        }

        "bitor", (is_int, is_int) => (args) {
            value(ConstantValue::Int(args[0].as_bigint().unwrap() | args[1].as_bigint().unwrap()))
        }

        "bitxor", (is_int, is_int) => (args) {
            value(ConstantValue::Int(args[0].as_bigint().unwrap() ^ args[1].as_bigint().unwrap()))
        }
}

table! {
    unary_folding_table =>
        "neg", (is_number) => (args) {
            match &args[0] {
                ConstantValue::Float(f) => value(ConstantValue::Float(-f)),
                other => value(ConstantValue::Int(-other.as_bigint().unwrap())),
            }
        }

        "pos", (is_number) => (args) {
            match &args[0] {
                ConstantValue::Bool(b) => value(ConstantValue::int(*b as i64)),
                other => value(other.clone()),
            }
        }

        "invert", (is_int) => (args) {
            value(ConstantValue::Int(!args[0].as_bigint().unwrap()))
        }
}

pub static FOLDING_TABLE: Lazy<HashMap<&'static str, FoldingEntry>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for entry in arithmetic_folding_table()
        .into_iter()
        .chain(unary_folding_table())
    {
        table.insert(entry.name, entry);
    }
    table
});

/// Looks up and applies the folding entry for `name`, guarding arity and
/// predicates. `None` means "leave the operation for runtime."
pub fn fold(name: &str, args: &[ConstantValue]) -> Option<Folded> {
    let entry = FOLDING_TABLE.get(name)?;
    if args.len() != entry.predicates.len() {
        return None;
    }
    if !entry
        .predicates
        .iter()
        .zip(args.iter())
        .all(|(pred, arg)| pred(arg))
    {
        return None;
    }
    (entry.fold)(args)
}

pub fn fold_binary(op: BinOp, left: &ConstantValue, right: &ConstantValue) -> Option<Folded> {
    fold(op.name(), &[left.clone(), right.clone()])
}

pub fn fold_unary(op: UnOp, operand: &ConstantValue) -> Option<Folded> {
    fold(op.name(), &[operand.clone()])
}

/// Comparison folding; handled outside the table because ordering
/// comparisons share one implementation and identity comparisons need
/// node-level context.
pub fn fold_comparison(op: CmpOp, left: &ConstantValue, right: &ConstantValue) -> Option<Folded> {
    use std::cmp::Ordering;

    let ordered = |wanted: fn(Ordering) -> bool| -> Option<Folded> {
        match left.cmp_value(right) {
            Some(ordering) => value(ConstantValue::Bool(wanted(ordering))),
            None => raise(ExceptionKind::TypeError),
        }
    };

    match op {
        CmpOp::Eq => value(ConstantValue::Bool(left.eq_value(right))),
        CmpOp::NotEq => value(ConstantValue::Bool(!left.eq_value(right))),
        CmpOp::Lt => ordered(|o| o == Ordering::Less),
        CmpOp::LtE => ordered(|o| o != Ordering::Greater),
        CmpOp::Gt => ordered(|o| o == Ordering::Greater),
        CmpOp::GtE => ordered(|o| o != Ordering::Less),
        // Identity on interned singletons only; other identities are a
        // representation detail the optimizer must not guess.
        CmpOp::Is => match (left, right) {
            (ConstantValue::None, ConstantValue::None) => value(ConstantValue::Bool(true)),
            (ConstantValue::None, _) | (_, ConstantValue::None) => {
                value(ConstantValue::Bool(false))
            }
            (ConstantValue::Bool(a), ConstantValue::Bool(b)) => {
                value(ConstantValue::Bool(a == b))
            }
            _ => None,
        },
        CmpOp::IsNot => match fold_comparison(CmpOp::Is, left, right)? {
            Folded::Value(ConstantValue::Bool(b)) => value(ConstantValue::Bool(!b)),
            other => Some(other),
        },
        CmpOp::In => match right.contains(left) {
            Some(found) => value(ConstantValue::Bool(found)),
            None => {
                if right.is_number() || matches!(right, ConstantValue::None) {
                    raise(ExceptionKind::TypeError)
                } else {
                    None
                }
            }
        },
        CmpOp::NotIn => match fold_comparison(CmpOp::In, left, right)? {
            Folded::Value(ConstantValue::Bool(b)) => value(ConstantValue::Bool(!b)),
            other => Some(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addition_of_int_constants() {
        assert_eq!(
            fold_binary(BinOp::Add, &ConstantValue::int(2), &ConstantValue::int(3)),
            Some(Folded::Value(ConstantValue::int(5)))
        );
    }

    #[test]
    fn division_by_zero_folds_to_raise() {
        assert_eq!(
            fold_binary(BinOp::TrueDiv, &ConstantValue::int(1), &ConstantValue::int(0)),
            Some(Folded::Raise(ExceptionKind::ZeroDivisionError))
        );
        assert_eq!(
            fold_binary(BinOp::FloorDiv, &ConstantValue::int(1), &ConstantValue::int(0)),
            Some(Folded::Raise(ExceptionKind::ZeroDivisionError))
        );
    }

    #[test]
    fn floor_division_floors_toward_negative_infinity() {
        assert_eq!(
            fold_binary(BinOp::FloorDiv, &ConstantValue::int(-7), &ConstantValue::int(2)),
            Some(Folded::Value(ConstantValue::int(-4)))
        );
        assert_eq!(
            fold_binary(BinOp::Mod, &ConstantValue::int(-7), &ConstantValue::int(2)),
            Some(Folded::Value(ConstantValue::int(1)))
        );
    }

    #[test]
    fn mixed_type_addition_is_a_type_error() {
        assert_eq!(
            fold_binary(BinOp::Add, &ConstantValue::int(1), &ConstantValue::str("x")),
            Some(Folded::Raise(ExceptionKind::TypeError))
        );
    }

    #[test]
    fn string_repetition_guards_size() {
        assert_eq!(
            fold_binary(BinOp::Mult, &ConstantValue::str("ab"), &ConstantValue::int(3)),
            Some(Folded::Value(ConstantValue::str("ababab")))
        );
        // Too large to materialize: refused, not raised.
        assert_eq!(
            fold_binary(
                BinOp::Mult,
                &ConstantValue::str("ab"),
                &ConstantValue::int(1 << 40)
            ),
            None
        );
    }

    #[test]
    fn zero_base_negative_exponent_folds_to_raise() {
        assert_eq!(
            fold_binary(BinOp::Pow, &ConstantValue::int(0), &ConstantValue::int(-1)),
            Some(Folded::Raise(ExceptionKind::ZeroDivisionError))
        );
        assert_eq!(
            fold_binary(
                BinOp::Pow,
                &ConstantValue::Float(0.0),
                &ConstantValue::int(-2)
            ),
            Some(Folded::Raise(ExceptionKind::ZeroDivisionError))
        );
        // Non-zero bases still fold to the float reciprocal.
        assert_eq!(
            fold_binary(BinOp::Pow, &ConstantValue::int(2), &ConstantValue::int(-1)),
            Some(Folded::Value(ConstantValue::Float(0.5)))
        );
    }

    #[test]
    fn bool_promotes_to_int_in_arithmetic() {
        assert_eq!(
            fold_binary(
                BinOp::Add,
                &ConstantValue::Bool(true),
                &ConstantValue::Bool(true)
            ),
            Some(Folded::Value(ConstantValue::int(2)))
        );
    }

    #[test]
    fn unorderable_comparison_folds_to_type_error() {
        assert_eq!(
            fold_comparison(CmpOp::Lt, &ConstantValue::str("a"), &ConstantValue::int(1)),
            Some(Folded::Raise(ExceptionKind::TypeError))
        );
        // Equality across types is just False, never an error.
        assert_eq!(
            fold_comparison(CmpOp::Eq, &ConstantValue::str("a"), &ConstantValue::int(1)),
            Some(Folded::Value(ConstantValue::Bool(false)))
        );
    }
}
