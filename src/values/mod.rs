//! Value store (spec §4.1).
//!
//! Interns scalar literals and variable names, assigns stable ids, and maps
//! modifier/structural function kinds to fixed-arity function identifiers.
//! Append-only: identifiers handed out here are never invalidated for the
//! lifetime of the store, matching the teacher's preference for
//! arena-backed interning tables with stable indices (no owning pointers
//! leak out; the id is the only public handle).

use std::collections::HashMap;

use indexmap::IndexSet;

use crate::errors::{CmdError, CmdResult};

const CONST_IDX_BITS: u32 = 24;
const CONST_STORAGE_BITS: u32 = 5;
const FUNC_IDX_BITS: u32 = 19;
const FUNC_ARITY_BITS: u32 = 10;

const CONST_IDX_MAX: u32 = (1 << CONST_IDX_BITS) - 1;
const FUNC_IDX_MAX: u32 = (1 << FUNC_IDX_BITS) - 1;

/// Storage selector for a `ConstId`: distinguishes the single string pool
/// this crate uses today from room for future interned-value kinds
/// (numbers, booleans) without widening the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    String = 0,
}

/// Tagged 32-bit scalar identifier: a 5-bit storage selector plus a 24-bit
/// index. Stable for the lifetime of the value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstId(u32);

impl ConstId {
    fn new(storage: Storage, idx: u32) -> Self {
        debug_assert!(idx <= CONST_IDX_MAX);
        ConstId(((storage as u32) << CONST_IDX_BITS) | idx)
    }

    pub fn storage(self) -> u32 {
        self.0 >> CONST_IDX_BITS
    }

    pub fn index(self) -> u32 {
        self.0 & CONST_IDX_MAX
    }

    pub fn to_repr(self) -> u32 {
        self.0
    }

    pub fn from_repr(repr: u32) -> Self {
        ConstId(repr)
    }
}

/// Opaque handle assigned on first interning of a variable name. Equality
/// of names implies equality of ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u32);

impl VarId {
    pub fn to_repr(self) -> u32 {
        self.0
    }

    pub fn from_repr(repr: u32) -> Self {
        VarId(repr)
    }
}

/// 32-bit handle carrying an inline arity (10 bits) and an index (19 bits).
/// Arity is a property of the function *kind*, not of a call site; the
/// compiler and renderer both enforce the declared arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(u32);

impl FuncId {
    fn new(arity: u16, idx: u32) -> Self {
        debug_assert!(idx <= FUNC_IDX_MAX);
        debug_assert!((arity as u32) < (1 << FUNC_ARITY_BITS));
        FuncId(((arity as u32) << FUNC_IDX_BITS) | idx)
    }

    pub fn arity(self) -> u16 {
        (self.0 >> FUNC_IDX_BITS) as u16
    }

    pub fn index(self) -> u32 {
        self.0 & FUNC_IDX_MAX
    }

    pub fn to_repr(self) -> u32 {
        self.0
    }

    pub fn from_repr(repr: u32) -> Self {
        FuncId(repr)
    }
}

/// Closed enumeration of modifier/structural operations (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuncKind {
    // boundary
    Hide,
    Clear,
    Input,
    Output,
    Tool,
    // pure string transforms
    Prefix,
    Suffix,
    Quote,
    CutExtension,
    LastExtension,
    ExtensionFilter,
    SetEnv,
    KeyValue,
    // flag-only modifiers (co-present with Input/Output)
    NoAutoSource,
    NoRelative,
    ResolveToBinDir,
    Glob,
    // structural
    Command,
    Arguments,
    Terms,
    Concat,
}

impl FuncKind {
    pub const MODIFIERS: &'static [FuncKind] = &[
        FuncKind::Hide,
        FuncKind::Clear,
        FuncKind::Input,
        FuncKind::Output,
        FuncKind::Tool,
        FuncKind::Prefix,
        FuncKind::Suffix,
        FuncKind::Quote,
        FuncKind::CutExtension,
        FuncKind::LastExtension,
        FuncKind::ExtensionFilter,
        FuncKind::SetEnv,
        FuncKind::KeyValue,
        FuncKind::NoAutoSource,
        FuncKind::NoRelative,
        FuncKind::ResolveToBinDir,
        FuncKind::Glob,
    ];

    /// Source-level modifier name, as it appears in `${name:...}` or
    /// `${name=v,...:...}`.
    pub fn modifier_name(self) -> Option<&'static str> {
        Some(match self {
            FuncKind::Hide => "hide",
            FuncKind::Clear => "clear",
            FuncKind::Input => "input",
            FuncKind::Output => "output",
            FuncKind::Tool => "tool",
            FuncKind::Prefix => "pre",
            FuncKind::Suffix => "suf",
            FuncKind::Quote => "quo",
            FuncKind::CutExtension => "noext",
            FuncKind::LastExtension => "lastext",
            FuncKind::ExtensionFilter => "ext",
            FuncKind::SetEnv => "env",
            FuncKind::KeyValue => "kv",
            FuncKind::NoAutoSource => "noauto",
            FuncKind::NoRelative => "norel",
            FuncKind::ResolveToBinDir => "tobindir",
            FuncKind::Glob => "glob",
            FuncKind::Command | FuncKind::Arguments | FuncKind::Terms | FuncKind::Concat => return None,
        })
    }

    /// Structural kinds nest as `Cmds(Args(Terms(...), ...), ...)`: a
    /// script is a `Cmds` of commands, a command is an `Args` of
    /// arguments, an argument (when it has more than one term) is a
    /// `Terms` of terms, and a multi-term modifier value is a `Cat`.
    pub fn structural_name(self) -> &'static str {
        match self {
            FuncKind::Command => "Cmds",
            FuncKind::Arguments => "Args",
            FuncKind::Terms => "Terms",
            FuncKind::Concat => "Cat",
            _ => "",
        }
    }

    pub fn from_modifier_name(name: &str) -> Option<Self> {
        Self::MODIFIERS.iter().copied().find(|k| k.modifier_name() == Some(name))
    }

    /// `Some(n)` for fixed-arity modifiers, `None` for structural kinds
    /// whose arity is counted at the call site (spec §4.6: `Cmds`/`Args`/
    /// `Terms`/`Cat` arity is the number of children).
    pub fn fixed_arity(self) -> Option<u16> {
        match self {
            FuncKind::Hide => Some(1),
            FuncKind::Clear => Some(1),
            FuncKind::Input => Some(1),
            FuncKind::Output => Some(1),
            FuncKind::Tool => Some(1),
            FuncKind::Prefix => Some(2),
            FuncKind::Suffix => Some(2),
            FuncKind::Quote => Some(1),
            FuncKind::CutExtension => Some(1),
            FuncKind::LastExtension => Some(1),
            FuncKind::ExtensionFilter => Some(2),
            FuncKind::SetEnv => Some(2),
            FuncKind::KeyValue => Some(2),
            FuncKind::NoAutoSource => Some(1),
            FuncKind::NoRelative => Some(1),
            FuncKind::ResolveToBinDir => Some(1),
            FuncKind::Glob => Some(1),
            FuncKind::Command | FuncKind::Arguments | FuncKind::Terms | FuncKind::Concat => None,
        }
    }

    pub fn is_boundary(self) -> bool {
        matches!(self, FuncKind::Hide | FuncKind::Clear | FuncKind::Input | FuncKind::Output | FuncKind::Tool)
    }

    pub fn is_structural(self) -> bool {
        matches!(self, FuncKind::Command | FuncKind::Arguments | FuncKind::Terms | FuncKind::Concat)
    }
}

/// Interns scalars and variable names; assigns `FuncId`s for function
/// kinds. Append-only for the process lifetime (spec §4.1, §5).
#[derive(Debug, Default)]
pub struct ValueStore {
    strings: IndexSet<Box<str>>,
    vars: IndexSet<Box<str>>,
    func_index: HashMap<(FuncKind, u16), u32>,
    func_by_idx: Vec<(FuncKind, u16)>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern_string(&mut self, s: &str) -> CmdResult<ConstId> {
        if let Some(idx) = self.strings.get_index_of(s) {
            return Ok(ConstId::new(Storage::String, idx as u32));
        }
        if self.strings.len() as u32 > CONST_IDX_MAX {
            return Err(CmdError::CapacityExceeded);
        }
        let (idx, _) = self.strings.insert_full(s.into());
        Ok(ConstId::new(Storage::String, idx as u32))
    }

    pub fn resolve_const(&self, id: ConstId) -> &str {
        self.strings
            .get_index(id.index() as usize)
            .expect("ConstId from this store is always in range")
    }

    pub fn intern_variable(&mut self, name: &str) -> VarId {
        let (idx, _) = self.vars.insert_full(name.into());
        VarId(idx as u32)
    }

    pub fn resolve_variable(&self, id: VarId) -> &str {
        self.vars
            .get_index(id.0 as usize)
            .expect("VarId from this store is always in range")
    }

    /// Returns the `FuncId` for a fixed-arity modifier kind, failing with
    /// `BadModifier` if `given_arity` (the number of value-lists supplied
    /// at the call site, see §4.2) doesn't match the modifier's declared
    /// arity.
    pub fn function_id(&mut self, kind: FuncKind, given_arity: u16) -> CmdResult<FuncId> {
        if let Some(expected) = kind.fixed_arity() {
            if expected != given_arity {
                return Err(CmdError::BadModifier {
                    name: kind.modifier_name().unwrap_or("?").to_string(),
                    reason: format!("expected {} value(s), given {}", expected - 1, given_arity - 1),
                });
            }
        }
        Ok(self.function_id_unchecked(kind, given_arity))
    }

    /// Like [`function_id`](Self::function_id) but for structural kinds,
    /// whose arity is the call site's child count and is never validated
    /// against a fixed expectation.
    pub fn structural_function_id(&mut self, kind: FuncKind, arity: u16) -> FuncId {
        self.function_id_unchecked(kind, arity)
    }

    fn function_id_unchecked(&mut self, kind: FuncKind, arity: u16) -> FuncId {
        let key = (kind, arity);
        let idx = *self.func_index.entry(key).or_insert_with(|| {
            let idx = self.func_by_idx.len() as u32;
            self.func_by_idx.push(key);
            idx
        });
        FuncId::new(arity, idx)
    }

    pub fn kind_of(&self, id: FuncId) -> FuncKind {
        self.func_by_idx[id.index() as usize].0
    }

    pub fn arity(&self, id: FuncId) -> u16 {
        id.arity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_string_is_idempotent() {
        let mut values = ValueStore::new();
        let a = values.intern_string("foo").unwrap();
        let b = values.intern_string("foo").unwrap();
        assert_eq!(a, b);
        assert_eq!(values.resolve_const(a), "foo");
    }

    #[test]
    fn intern_variable_is_idempotent() {
        let mut values = ValueStore::new();
        let a = values.intern_variable("X");
        let b = values.intern_variable("X");
        assert_eq!(a, b);
        assert_eq!(values.resolve_variable(a), "X");
    }

    #[test]
    fn function_id_rejects_wrong_arity() {
        let mut values = ValueStore::new();
        assert!(values.function_id(FuncKind::Prefix, 3).is_err());
        assert!(values.function_id(FuncKind::Prefix, 2).is_ok());
    }

    #[test]
    fn structural_function_ids_vary_by_call_site_arity() {
        let mut values = ValueStore::new();
        let a = values.structural_function_id(FuncKind::Terms, 2);
        let b = values.structural_function_id(FuncKind::Terms, 5);
        assert_ne!(a, b);
        assert_eq!(values.arity(a), 2);
        assert_eq!(values.arity(b), 5);
        assert_eq!(values.kind_of(a), FuncKind::Terms);
    }
}
