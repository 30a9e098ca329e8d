//! External facts entering the otherwise-pure analysis.
//!
//! The trust table classifies `(module, attribute)` pairs for import and
//! attribute-lookup optimization. Plugin snippets are opaque text attached
//! around a module's lowered output, never analyzed. Both are constructed
//! once and carried in the [`OptimizeContext`](crate::optimize::OptimizeContext).

use std::collections::HashMap;

use crate::constant::ConstantValue;

/// Classification of one importable module or `(module, attribute)` pair.
#[derive(Clone, PartialEq, Debug)]
pub enum ImportFact {
    /// Guaranteed to exist; resolving it runs no user-observable code.
    SafeExists,
    /// Guaranteed to exist with this compile-time value.
    SafeKnownValue(ConstantValue),
    /// Lookup is side-effect-free but may fail.
    MayNotExist,
    /// Nothing is known; must resolve at runtime.
    RuntimeOnly,
}

#[derive(Default, Debug)]
pub struct TrustTable {
    modules: HashMap<String, ImportFact>,
    attributes: HashMap<(String, String), ImportFact>,
}

impl TrustTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trust_module(&mut self, module: &str, fact: ImportFact) -> &mut Self {
        self.modules.insert(module.to_string(), fact);
        self
    }

    pub fn trust_attribute(&mut self, module: &str, attribute: &str, fact: ImportFact) -> &mut Self {
        self.attributes
            .insert((module.to_string(), attribute.to_string()), fact);
        self
    }

    pub fn module_fact(&self, module: &str) -> ImportFact {
        self.modules
            .get(module)
            .cloned()
            .unwrap_or(ImportFact::RuntimeOnly)
    }

    pub fn attribute_fact(&self, module: &str, attribute: &str) -> ImportFact {
        self.attributes
            .get(&(module.to_string(), attribute.to_string()))
            .cloned()
            .unwrap_or(ImportFact::RuntimeOnly)
    }
}

/// Opaque pre-scope and post-scope code snippets plus extra implicit
/// dependencies, attached verbatim around a module's lowered output.
#[derive(Default, Clone, Debug)]
pub struct PluginSnippets {
    pub pre_scope: Vec<String>,
    pub post_scope: Vec<String>,
    pub implicit_deps: Vec<String>,
}

/// Inter-module dependency edge reported to the build layer: the
/// importing module needs the imported module's lowered symbols.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DependencyEdge {
    pub importer: String,
    pub imported: String,
}
