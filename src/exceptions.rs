//! Symbolic runtime-exception kinds.
//!
//! These are never raised by the compiler itself. They are dataflow facts
//! carried in a [`TraceCollection`](crate::trace::TraceCollection) and
//! eventually lowered into exception-exit control flow in the emitted
//! program. A "may raise" fact is only ever removed by an explicit rewrite
//! that removes the raising operation.

/// The exception kinds the optimizer models statically.
///
/// `Any` stands for "arbitrary user-level exception": it is attributed to
/// every control-flow escape (calls, unknown attribute lookups, iteration
/// over unknown values) and subsumes every other kind when matching
/// handlers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum ExceptionKind {
    TypeError,
    ValueError,
    NameError,
    UnboundLocalError,
    AttributeError,
    IndexError,
    KeyError,
    ZeroDivisionError,
    OverflowError,
    StopIteration,
    ImportError,
    AssertionError,
    /// Arbitrary exception from code the optimizer cannot see.
    Any,
}

impl ExceptionKind {
    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::NameError => "NameError",
            ExceptionKind::UnboundLocalError => "UnboundLocalError",
            ExceptionKind::AttributeError => "AttributeError",
            ExceptionKind::IndexError => "IndexError",
            ExceptionKind::KeyError => "KeyError",
            ExceptionKind::ZeroDivisionError => "ZeroDivisionError",
            ExceptionKind::OverflowError => "OverflowError",
            ExceptionKind::StopIteration => "StopIteration",
            ExceptionKind::ImportError => "ImportError",
            ExceptionKind::AssertionError => "AssertionError",
            ExceptionKind::Any => "<any>",
        }
    }

    /// Whether an `except` clause for `self` catches a raise of `raised`.
    pub fn catches(self, raised: ExceptionKind) -> bool {
        self == raised || matches!(self, ExceptionKind::Any)
    }
}

impl std::fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
