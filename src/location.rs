/// Source position attached to every tree node by the front-end.
///
/// The optimizer never reads source text; locations only flow into
/// diagnostics and into the lowered output.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct SourceLoc {
    pub line: u32,
    pub column: u32,
}

impl SourceLoc {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Location for nodes synthesized by a rewrite, where no original
    /// source position applies.
    pub const fn synthesized() -> Self {
        Self { line: 0, column: 0 }
    }
}

impl std::fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}
