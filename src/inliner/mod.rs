//! Variable and macro-call inlining (spec §9), grounded on
//! `command_store.h`'s `TInliner`: per-name recursion counters plus a
//! global call-chain depth, both capped at [`MAX_RECURSION_DEPTH`].
//!
//! Spec §9 leaves open which scope a macro body's free variables resolve
//! against: the caller's local bindings, or only the definitions visible
//! where the macro itself was declared. This implementation resolves it
//! the second way — a macro body sees only its own parameters plus
//! `inline_visible`, never the scope of the call site — because that is
//! the only reading under which recursion counters stay meaningful
//! (a caller's locals leaking into a recursive macro body would let
//! unrelated bindings silently shadow the macro's own parameters on each
//! recursive step). `all_visible` is therefore only ever consulted at the
//! top level, before any macro call has been entered.
//!
//! Spec §4.4's `lookup(varId)` is tri-state, grounded on `command_store.h`'s
//! `ELegacyMode::{None, Expr, Macro}` and `TLegacyVars`: besides a
//! syntax-tree definition recorded directly by this crate, a definition may
//! arrive as a raw string handed down from an older configuration layer —
//! a *legacy expression* to re-parse as a variable's value, or (for macros)
//! a *legacy macro body* to re-parse the same way, once, the first time
//! it's needed (`TDefinitionCache`). [`VariableDefinition`] and
//! [`MacroBody`] carry that distinction; the re-parse itself goes through
//! the inliner's own [`ParserCache`], so a legacy definition referenced
//! from many call sites is only ever parsed once per inlining pass.

use std::collections::HashMap;

use crate::catalogue::BlockDataCatalogue;
use crate::cmdparser::ParserCache;
use crate::errors::{CmdError, CmdResult};
use crate::syntax::{Argument, Call, Command, Script, Term, Transformation};
use crate::values::{ValueStore, VarId};

pub const MAX_RECURSION_DEPTH: u32 = 32;

/// A variable's definition, as handed back by a [`VariableResolver`].
/// `LegacyExpr` mirrors `TLegacyVars`'s raw-string definitions: text that
/// hasn't been parsed yet and is re-parsed as an expression the first time
/// the inliner actually needs its value.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableDefinition {
    Tree(Script),
    LegacyExpr(String),
}

/// Resolves a plain variable reference to its definition, if any. Unbound
/// variables are left as-is (spec §4.4: an unresolved variable is reported
/// later, through the `ErrorShower`, not here).
pub trait VariableResolver {
    fn resolve(&self, id: VarId) -> Option<VariableDefinition>;
}

/// A macro's body, as recorded by a [`MacroResolver`]. `LegacyExpr` mirrors
/// a `TLegacyVars` entry whose `ELegacyMode` is `Macro`: raw source text
/// re-parsed as the macro's body on first use.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroBody {
    Tree(Script),
    LegacyExpr(String),
}

/// A macro's expansion: its formal parameters, in declaration order, and
/// its body. Distinct from [`crate::catalogue::MacroSignature`], which is
/// shape-only information the parser uses for argument binding.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroDefinition {
    pub params: Vec<VarId>,
    pub body: MacroBody,
}

pub trait MacroResolver {
    fn resolve(&self, id: VarId) -> Option<MacroDefinition>;
}

/// In-memory [`VariableResolver`] for tests and simple embeddings.
#[derive(Debug, Default)]
pub struct MapVariableResolver(HashMap<VarId, VariableDefinition>);

impl MapVariableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, id: VarId, value: Script) -> &mut Self {
        self.0.insert(id, VariableDefinition::Tree(value));
        self
    }

    pub fn define_legacy_expr(&mut self, id: VarId, source: impl Into<String>) -> &mut Self {
        self.0.insert(id, VariableDefinition::LegacyExpr(source.into()));
        self
    }
}

impl VariableResolver for MapVariableResolver {
    fn resolve(&self, id: VarId) -> Option<VariableDefinition> {
        self.0.get(&id).cloned()
    }
}

/// In-memory [`MacroResolver`] for tests and simple embeddings.
#[derive(Debug, Default)]
pub struct MapMacroResolver(HashMap<VarId, MacroDefinition>);

impl MapMacroResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, id: VarId, def: MacroDefinition) -> &mut Self {
        self.0.insert(id, def);
        self
    }
}

impl MacroResolver for MapMacroResolver {
    fn resolve(&self, id: VarId) -> Option<MacroDefinition> {
        self.0.get(&id).cloned()
    }
}

/// Layers macro-parameter bindings over a fallback scope. Built fresh for
/// each call expansion and never outlives it. Parameter bindings are
/// already-inlined trees, never legacy text, so they're wrapped as
/// [`VariableDefinition::Tree`] directly.
struct ChainResolver<'a> {
    bindings: &'a HashMap<VarId, Script>,
    fallback: &'a dyn VariableResolver,
}

impl<'a> VariableResolver for ChainResolver<'a> {
    fn resolve(&self, id: VarId) -> Option<VariableDefinition> {
        match self.bindings.get(&id) {
            Some(script) => Some(VariableDefinition::Tree(script.clone())),
            None => self.fallback.resolve(id),
        }
    }
}

pub struct Inliner<'r> {
    all_visible: &'r dyn VariableResolver,
    inline_visible: &'r dyn VariableResolver,
    macros: &'r dyn MacroResolver,
    catalogue: &'r dyn BlockDataCatalogue,
    /// Re-parses legacy raw-string definitions at most once each (spec
    /// §4.4 / `TDefinitionCache`), independent of the store-level parser
    /// cache since this one is scoped to a single inlining pass.
    legacy_cache: ParserCache,
    recursion_counters: HashMap<VarId, u32>,
    chain_depth: u32,
}

impl<'r> Inliner<'r> {
    pub fn new(
        all_visible: &'r dyn VariableResolver,
        inline_visible: &'r dyn VariableResolver,
        macros: &'r dyn MacroResolver,
        catalogue: &'r dyn BlockDataCatalogue,
    ) -> Self {
        Self {
            all_visible,
            inline_visible,
            macros,
            catalogue,
            legacy_cache: ParserCache::new(),
            recursion_counters: HashMap::new(),
            chain_depth: 0,
        }
    }

    pub fn inline_script(&mut self, script: &Script, values: &mut ValueStore) -> CmdResult<Script> {
        let scope = self.all_visible;
        self.inline_script_with(script, scope, values)
    }

    fn inline_script_with(&mut self, script: &Script, scope: &dyn VariableResolver, values: &mut ValueStore) -> CmdResult<Script> {
        let mut commands = Vec::new();
        for cmd in &script.commands {
            commands.extend(self.inline_command_with(cmd, scope, values)?);
        }
        Ok(Script { commands })
    }

    /// A command whose sole argument is a lone call is spliced wholesale:
    /// the macro body's own pipeline stages become this position's
    /// pipeline stages (spec §9 scenario 3). Anywhere else, a call must
    /// reduce to a single argument (see [`Self::flatten_to_argument`]).
    fn inline_command_with(&mut self, cmd: &Command, scope: &dyn VariableResolver, values: &mut ValueStore) -> CmdResult<Vec<Command>> {
        if let [arg] = cmd.as_slice() {
            if let [Term::Call(call)] = arg.as_slice() {
                return self.expand_call(call, scope, values);
            }
        }
        let mut out = Vec::with_capacity(cmd.len());
        for arg in cmd {
            out.push(self.inline_argument_with(arg, scope, values)?);
        }
        Ok(vec![out])
    }

    /// Resolves a variable's definition to a concrete tree, re-parsing a
    /// legacy raw-string definition through [`Self::legacy_cache`] if
    /// that's what `scope` hands back.
    fn resolve_variable(&mut self, id: VarId, scope: &dyn VariableResolver, values: &mut ValueStore) -> CmdResult<Option<Script>> {
        match scope.resolve(id) {
            None => Ok(None),
            Some(VariableDefinition::Tree(script)) => Ok(Some(script)),
            Some(VariableDefinition::LegacyExpr(source)) => {
                let script = self.legacy_cache.get_or_parse(&source, values, self.catalogue)?;
                Ok(Some(script))
            }
        }
    }

    /// As [`Self::resolve_variable`], but for a macro's body.
    fn resolve_macro_body(&mut self, body: &MacroBody, values: &mut ValueStore) -> CmdResult<Script> {
        match body {
            MacroBody::Tree(script) => Ok(script.clone()),
            MacroBody::LegacyExpr(source) => self.legacy_cache.get_or_parse(source, values, self.catalogue),
        }
    }

    fn inline_argument_with(&mut self, arg: &Argument, scope: &dyn VariableResolver, values: &mut ValueStore) -> CmdResult<Argument> {
        let mut out = Vec::with_capacity(arg.len());
        for term in arg {
            match term {
                Term::Literal(_) | Term::Unexpanded(_) => out.push(term.clone()),
                Term::Variable(id) => match self.resolve_variable(*id, scope, values)? {
                    Some(bound) => {
                        let inlined = self.inline_script_with(&bound, scope, values)?;
                        out.extend(self.flatten_to_argument("variable substitution", inlined)?);
                    }
                    None => out.push(term.clone()),
                },
                Term::Transformation(t) => {
                    let body = self.inline_script_with(&t.body, scope, values)?;
                    out.push(Term::Transformation(Transformation {
                        mods: t.mods.clone(),
                        body,
                    }));
                }
                Term::Call(call) => {
                    let expanded = self.expand_call(call, scope, values)?;
                    let single = single_command(expanded, "nested macro call")?;
                    out.extend(self.flatten_to_argument("nested macro call", Script { commands: vec![single] })?);
                }
            }
        }
        Ok(out)
    }

    fn flatten_to_argument(&self, context: &str, script: Script) -> CmdResult<Argument> {
        let cmd = single_command(script, context)?;
        if cmd.len() == 1 {
            Ok(cmd.into_iter().next().unwrap())
        } else {
            Err(CmdError::NotASingleArgument {
                context: context.to_string(),
            })
        }
    }

    fn expand_call(&mut self, call: &Call, scope: &dyn VariableResolver, values: &mut ValueStore) -> CmdResult<Vec<Command>> {
        let def = self.macros.resolve(call.function).ok_or_else(|| CmdError::UnknownMacro {
            name: values.resolve_variable(call.function).to_string(),
        })?;

        let name_depth = *self.recursion_counters.get(&call.function).unwrap_or(&0);
        if name_depth >= MAX_RECURSION_DEPTH {
            return Err(CmdError::RecursionTooDeep {
                name: values.resolve_variable(call.function).to_string(),
            });
        }
        if self.chain_depth >= MAX_RECURSION_DEPTH {
            return Err(CmdError::InlineDepthExceeded);
        }

        *self.recursion_counters.entry(call.function).or_insert(0) += 1;
        self.chain_depth += 1;

        let result = (|| {
            let mut bindings = HashMap::new();
            for (param, actual) in def.params.iter().zip(call.args.iter()) {
                let inlined_actual = self.inline_script_with(actual, scope, values)?;
                bindings.insert(*param, inlined_actual);
            }
            let body = self.resolve_macro_body(&def.body, values)?;
            let fallback = self.inline_visible;
            let chain = ChainResolver { bindings: &bindings, fallback };
            self.inline_script_with(&body, &chain, values)
        })();

        *self.recursion_counters.get_mut(&call.function).unwrap() -= 1;
        self.chain_depth -= 1;

        Ok(result?.commands)
    }
}

fn single_command(script: Script, context: &str) -> CmdResult<Command> {
    if script.commands.len() == 1 {
        Ok(script.commands.into_iter().next().unwrap())
    } else {
        Err(CmdError::NotASingleArgument {
            context: context.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::MapCatalogue;

    fn var_script(id: VarId) -> Script {
        Script {
            commands: vec![vec![vec![Term::Variable(id)]]],
        }
    }

    fn literal_script(values: &mut ValueStore, text: &str) -> Script {
        Script {
            commands: vec![vec![vec![Term::Literal(values.intern_string(text).unwrap())]]],
        }
    }

    #[test]
    fn substitutes_bound_variable() {
        let mut values = ValueStore::new();
        let x = values.intern_variable("X");
        let mut all_visible = MapVariableResolver::new();
        all_visible.define(x, literal_script(&mut values, "hello"));
        let inline_visible = MapVariableResolver::new();
        let macros = MapMacroResolver::new();
        let catalogue = MapCatalogue::new();

        let mut inliner = Inliner::new(&all_visible, &inline_visible, &macros, &catalogue);
        let script = Script {
            commands: vec![vec![vec![Term::Variable(x)]]],
        };
        let result = inliner.inline_script(&script, &mut values).unwrap();
        match &result.commands[0][0][0] {
            Term::Literal(id) => assert_eq!(values.resolve_const(*id), "hello"),
            other => panic!("expected a literal, got {other:?}"),
        }
    }

    #[test]
    fn leaves_unbound_variable_untouched() {
        let mut values = ValueStore::new();
        let x = values.intern_variable("X");
        let all_visible = MapVariableResolver::new();
        let inline_visible = MapVariableResolver::new();
        let macros = MapMacroResolver::new();
        let catalogue = MapCatalogue::new();
        let mut inliner = Inliner::new(&all_visible, &inline_visible, &macros, &catalogue);
        let script = Script {
            commands: vec![vec![vec![Term::Variable(x)]]],
        };
        let result = inliner.inline_script(&script, &mut values).unwrap();
        assert_eq!(result.commands[0][0][0], Term::Variable(x));
    }

    #[test]
    fn expands_macro_call_splicing_pipeline() {
        let mut values = ValueStore::new();
        let m = values.intern_variable("M");
        let param = values.intern_variable("ARG");
        let all_visible = MapVariableResolver::new();
        let inline_visible = MapVariableResolver::new();
        let mut macros = MapMacroResolver::new();
        macros.define(
            m,
            MacroDefinition {
                params: vec![param],
                body: MacroBody::Tree(Script {
                    commands: vec![vec![vec![Term::Variable(param)]], vec![vec![Term::Literal(values.intern_string("second").unwrap())]]],
                }),
            },
        );
        let catalogue = MapCatalogue::new();
        let mut inliner = Inliner::new(&all_visible, &inline_visible, &macros, &catalogue);
        let call_arg = literal_script(&mut values, "first");
        let script = Script {
            commands: vec![vec![vec![Term::Call(Call {
                function: m,
                args: vec![call_arg],
            })]]],
        };
        let result = inliner.inline_script(&script, &mut values).unwrap();
        assert_eq!(result.commands.len(), 2);
        match &result.commands[0][0][0] {
            Term::Literal(id) => assert_eq!(values.resolve_const(*id), "first"),
            other => panic!("expected a literal, got {other:?}"),
        }
    }

    #[test]
    fn rejects_recursion_past_the_depth_cap() {
        let mut values = ValueStore::new();
        let m = values.intern_variable("M");
        let all_visible = MapVariableResolver::new();
        let inline_visible = MapVariableResolver::new();
        let mut macros = MapMacroResolver::new();
        macros.define(
            m,
            MacroDefinition {
                params: vec![],
                body: MacroBody::Tree(Script {
                    commands: vec![vec![vec![Term::Call(Call { function: m, args: vec![] })]]],
                }),
            },
        );
        let catalogue = MapCatalogue::new();
        let mut inliner = Inliner::new(&all_visible, &inline_visible, &macros, &catalogue);
        let script = Script {
            commands: vec![vec![vec![Term::Call(Call { function: m, args: vec![] })]]],
        };
        assert!(inliner.inline_script(&script, &mut values).is_err());
    }

    #[test]
    fn legacy_expr_variable_is_reparsed_and_substituted() {
        let mut values = ValueStore::new();
        let x = values.intern_variable("X");
        let mut all_visible = MapVariableResolver::new();
        all_visible.define_legacy_expr(x, "\"hello\"");
        let inline_visible = MapVariableResolver::new();
        let macros = MapMacroResolver::new();
        let catalogue = MapCatalogue::new();
        let mut inliner = Inliner::new(&all_visible, &inline_visible, &macros, &catalogue);
        let script = var_script(x);
        let result = inliner.inline_script(&script, &mut values).unwrap();
        match &result.commands[0][0][0] {
            Term::Literal(id) => assert_eq!(values.resolve_const(*id), "hello"),
            other => panic!("expected a literal, got {other:?}"),
        }
    }

    /// Grounded on `TLegacyVars` entries with `ELegacyMode::Macro`: the
    /// body is raw source text, re-parsed against the same variable (the
    /// formal parameter) the macro was already declared with.
    #[test]
    fn legacy_macro_body_is_reparsed_and_params_are_bound() {
        let mut values = ValueStore::new();
        let m = values.intern_variable("M");
        let param = values.intern_variable("ARG");
        let all_visible = MapVariableResolver::new();
        let inline_visible = MapVariableResolver::new();
        let mut macros = MapMacroResolver::new();
        macros.define(
            m,
            MacroDefinition {
                params: vec![param],
                body: MacroBody::LegacyExpr("$ARG".to_string()),
            },
        );
        let catalogue = MapCatalogue::new();
        let mut inliner = Inliner::new(&all_visible, &inline_visible, &macros, &catalogue);
        let call_arg = literal_script(&mut values, "first");
        let script = Script {
            commands: vec![vec![vec![Term::Call(Call {
                function: m,
                args: vec![call_arg],
            })]]],
        };
        let result = inliner.inline_script(&script, &mut values).unwrap();
        match &result.commands[0][0][0] {
            Term::Literal(id) => assert_eq!(values.resolve_const(*id), "first"),
            other => panic!("expected a literal, got {other:?}"),
        }
    }
}
