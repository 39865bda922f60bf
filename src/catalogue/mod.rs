//! Block-data catalogue (spec §6, consumed interface).
//!
//! For each macro name the parser needs: ordered argument names, which of
//! them are keywords, and whether the trailing positional is variadic.
//! Unknown macros are a parse error. This module is the crate's own
//! stand-in for the surrounding build system's macro registry; embedders
//! provide a real one by implementing [`BlockDataCatalogue`].

use std::collections::HashMap;

/// One formal parameter of a macro.
#[derive(Debug, Clone)]
pub struct FormalArg {
    pub name: String,
    /// Whether raw arguments are only routed to this slot after the
    /// corresponding keyword token is seen (spec §4.2's "named bucket").
    pub is_keyword: bool,
}

impl FormalArg {
    pub fn positional(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_keyword: false }
    }

    pub fn keyword(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_keyword: true }
    }
}

/// A macro's call-site signature, as recorded by block data.
#[derive(Debug, Clone)]
pub struct MacroSignature {
    pub args: Vec<FormalArg>,
    /// Whether the last *positional* (non-keyword) slot is variadic and
    /// absorbs overflow arguments.
    pub variadic: bool,
    /// Whether the macro's body contains conditional expansion (consumed
    /// by callers that need to know before inlining; unused by the parser
    /// itself).
    pub has_conditional: bool,
}

impl MacroSignature {
    pub fn new(args: Vec<FormalArg>) -> Self {
        Self { args, variadic: false, has_conditional: false }
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub fn keyword_names(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter(|a| a.is_keyword).map(|a| a.name.as_str())
    }
}

pub trait BlockDataCatalogue {
    fn lookup(&self, macro_name: &str) -> Option<&MacroSignature>;
}

/// In-memory catalogue for tests and simple embeddings.
#[derive(Debug, Default)]
pub struct MapCatalogue(HashMap<String, MacroSignature>);

impl MapCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, sig: MacroSignature) -> &mut Self {
        self.0.insert(name.into(), sig);
        self
    }
}

impl BlockDataCatalogue for MapCatalogue {
    fn lookup(&self, macro_name: &str) -> Option<&MacroSignature> {
        self.0.get(macro_name)
    }
}
