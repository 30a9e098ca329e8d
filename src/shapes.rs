//! Type shapes: capability records for statically known types.
//!
//! A shape answers "does this value support operation X" with a three-valued
//! answer. Only a definite `No` licenses replacing an operation with a
//! static raise, and only a definite `Yes` licenses dropping the runtime
//! capability check at lowering time. `Unknown` licenses nothing.

/// Three-valued capability answer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Tri {
    Yes,
    No,
    Unknown,
}

impl Tri {
    pub fn from_bool(b: bool) -> Tri {
        if b {
            Tri::Yes
        } else {
            Tri::No
        }
    }

    pub fn is_yes(self) -> bool {
        self == Tri::Yes
    }

    pub fn is_no(self) -> bool {
        self == Tri::No
    }
}

/// Exact type identities the optimizer knows capabilities for.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum TypeId {
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    Tuple,
    List,
    Dict,
    Set,
    Function,
    Module,
}

impl TypeId {
    pub fn name(self) -> &'static str {
        match self {
            TypeId::NoneType => "NoneType",
            TypeId::Bool => "bool",
            TypeId::Int => "int",
            TypeId::Float => "float",
            TypeId::Str => "str",
            TypeId::Bytes => "bytes",
            TypeId::Tuple => "tuple",
            TypeId::List => "list",
            TypeId::Dict => "dict",
            TypeId::Set => "set",
            TypeId::Function => "function",
            TypeId::Module => "module",
        }
    }
}

/// Capability record for an expression's statically known type.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TypeShape {
    pub exact: Option<TypeId>,
}

impl TypeShape {
    pub const fn unknown() -> Self {
        Self { exact: None }
    }

    pub const fn exact(id: TypeId) -> Self {
        Self { exact: Some(id) }
    }

    pub fn is_known(&self) -> bool {
        self.exact.is_some()
    }

    pub fn has_shape_iter(&self) -> Tri {
        match self.exact {
            None => Tri::Unknown,
            Some(
                TypeId::Str
                | TypeId::Bytes
                | TypeId::Tuple
                | TypeId::List
                | TypeId::Dict
                | TypeId::Set,
            ) => Tri::Yes,
            Some(_) => Tri::No,
        }
    }

    pub fn has_shape_len(&self) -> Tri {
        // Same capability class as iteration for the builtin types.
        self.has_shape_iter()
    }

    pub fn has_shape_index(&self) -> Tri {
        match self.exact {
            None => Tri::Unknown,
            Some(TypeId::Str | TypeId::Bytes | TypeId::Tuple | TypeId::List | TypeId::Dict) => {
                Tri::Yes
            }
            Some(_) => Tri::No,
        }
    }

    pub fn has_shape_slice(&self) -> Tri {
        match self.exact {
            None => Tri::Unknown,
            Some(TypeId::Str | TypeId::Bytes | TypeId::Tuple | TypeId::List) => Tri::Yes,
            Some(_) => Tri::No,
        }
    }

    pub fn has_shape_call(&self) -> Tri {
        match self.exact {
            None => Tri::Unknown,
            Some(TypeId::Function) => Tri::Yes,
            // Calling a builtin type object is not modeled; a value of a
            // builtin data type is definitely not callable.
            Some(_) => Tri::No,
        }
    }

    pub fn has_shape_bool(&self) -> Tri {
        match self.exact {
            None => Tri::Unknown,
            // Every builtin shape converts to bool without raising.
            Some(_) => Tri::Yes,
        }
    }

    /// Whether attribute lookup on this shape can run user-level code.
    /// Builtin data types cannot; modules and unknown values can.
    pub fn attr_lookup_escapes(&self) -> bool {
        !matches!(
            self.exact,
            Some(
                TypeId::NoneType
                    | TypeId::Bool
                    | TypeId::Int
                    | TypeId::Float
                    | TypeId::Str
                    | TypeId::Bytes
                    | TypeId::Tuple
                    | TypeId::List
                    | TypeId::Dict
                    | TypeId::Set,
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_shape_answers_unknown() {
        let shape = TypeShape::unknown();
        assert_eq!(shape.has_shape_index(), Tri::Unknown);
        assert_eq!(shape.has_shape_iter(), Tri::Unknown);
    }

    #[test]
    fn int_has_no_indexing_capability() {
        let shape = TypeShape::exact(TypeId::Int);
        assert_eq!(shape.has_shape_index(), Tri::No);
        assert_eq!(shape.has_shape_bool(), Tri::Yes);
    }
}
