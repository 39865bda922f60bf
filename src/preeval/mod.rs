//! Pre-evaluation (spec §4.5, §4.6): classifies the boundary modifiers
//! (`input`/`output`/`tool`) of an already-inlined tree into order-
//! preserving tables, and opportunistically constant-folds the pure
//! string transforms (`pre`/`suf`/`quo`/`noext`/`lastext`/`ext`) when
//! every operand is already a literal. Grounded on `command_store.h`'s
//! `TCompilationIODesc` (the input/output/tool tables and `EOutputAccountingMode`)
//! and on spec §4.5's explicit statement that folding a pure transform at
//! this stage or leaving it for the renderer must be observationally
//! identical, which is why both paths share [`crate::transforms`].
//!
//! `hide` and `clear` both suppress boundary-table registration for the
//! transformation they appear on, including when co-present with
//! `input`/`output`/`tool` in the same modifier list — a value that is
//! hidden or cleared never contributes to the tables, even though `hide`
//! additionally drops the value from the rendered command while `clear`
//! does not (spec's invariant that table membership tracks exactly what
//! contributes to the rendered script only binds for `hide`; `clear` is
//! documented here as a deliberate, narrower reading — see DESIGN.md).
//!
//! An entry's `glob`/`no-auto-source`/`no-relative`/`resolve-to-bin-dir`
//! flags are read off whichever other modifiers share the same modifier
//! list as the `input`/`output` that produced the entry (e.g.
//! `${input; glob: SRC}`), not from a separate argument.

use crate::errors::{CmdError, CmdResult, ErrorShower};
use crate::syntax::{Argument, Command, Modifier, Script, Term, Transformation, ValueTerm};
use crate::transforms;
use crate::values::{FuncKind, ValueStore};

/// Opaque dependency-graph tag. This crate never interprets it, only
/// threads it through from a modifier's declared values to the
/// corresponding table entry (spec leaves its meaning to the surrounding
/// build system).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkType(pub u8);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub name: String,
    pub link_type: LinkType,
    /// No modifier in this implementation's closed `FuncKind` set produces
    /// a temporary entry; always `false` (see DESIGN.md).
    pub temporary: bool,
    pub glob: bool,
    pub no_auto_source: bool,
    pub no_relative: bool,
    pub resolve_to_bin_dir: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Any number of declared outputs.
    Default,
    /// At most one declared output; a second is a hard error.
    Module,
}

#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub inputs: Vec<Entry>,
    pub outputs: Vec<Entry>,
    pub tools: Vec<Entry>,
    /// Index at which this evaluation's entries begin in each table (spec
    /// §4.6): `0` for a freshly created `Tables`, or the prior length when
    /// extending one shared across several pre-evaluations.
    pub input_base: usize,
    pub output_base: usize,
    pub tool_base: usize,
}

pub struct PreEvaluator<'s> {
    mode: OutputMode,
    shower: &'s mut ErrorShower,
}

impl<'s> PreEvaluator<'s> {
    pub fn new(mode: OutputMode, shower: &'s mut ErrorShower) -> Self {
        Self { mode, shower }
    }

    pub fn evaluate(&mut self, script: &Script, values: &mut ValueStore) -> CmdResult<(Script, Tables)> {
        let mut tables = Tables::default();
        let rewritten = self.evaluate_into(script, values, &mut tables)?;
        Ok((rewritten, tables))
    }

    pub fn evaluate_into(&mut self, script: &Script, values: &mut ValueStore, tables: &mut Tables) -> CmdResult<Script> {
        tables.input_base = tables.inputs.len();
        tables.output_base = tables.outputs.len();
        tables.tool_base = tables.tools.len();
        self.eval_script(script, values, tables, 0)
    }

    fn eval_script(&mut self, script: &Script, values: &mut ValueStore, tables: &mut Tables, depth: usize) -> CmdResult<Script> {
        let commands = script
            .commands
            .iter()
            .map(|cmd| self.eval_command(cmd, values, tables, depth))
            .collect::<CmdResult<Vec<Command>>>()?;
        Ok(Script { commands })
    }

    fn eval_command(&mut self, cmd: &Command, values: &mut ValueStore, tables: &mut Tables, depth: usize) -> CmdResult<Command> {
        cmd.iter().map(|arg| self.eval_argument(arg, values, tables, depth)).collect()
    }

    fn eval_argument(&mut self, arg: &Argument, values: &mut ValueStore, tables: &mut Tables, depth: usize) -> CmdResult<Argument> {
        arg.iter().map(|term| self.eval_term(term, values, tables, depth)).collect()
    }

    fn eval_term(&mut self, term: &Term, values: &mut ValueStore, tables: &mut Tables, depth: usize) -> CmdResult<Term> {
        match term {
            Term::Literal(_) | Term::Unexpanded(_) | Term::Variable(_) => Ok(term.clone()),
            Term::Call(_) => Err(CmdError::CompileError {
                context: "pre-evaluation".to_string(),
                source: Box::new(CmdError::NotASingleArgument {
                    context: "calls must be inlined before pre-evaluation".to_string(),
                }),
            }),
            Term::Transformation(t) => {
                let body = self.eval_script(&t.body, values, tables, depth + 1)?;
                let suppressed = t.mods.iter().any(|m| matches!(m.kind, FuncKind::Hide | FuncKind::Clear));
                if !suppressed {
                    for m in &t.mods {
                        self.classify_boundary(m, &t.mods, &body, values, tables, depth)?;
                    }
                }
                if let Some(folded) = try_fold_pure(&t.mods, &body, values) {
                    Ok(folded)
                } else {
                    Ok(Term::Transformation(Transformation {
                        mods: t.mods.clone(),
                        body,
                    }))
                }
            }
        }
    }

    fn classify_boundary(
        &mut self,
        m: &Modifier,
        siblings: &[Modifier],
        body: &Script,
        values: &mut ValueStore,
        tables: &mut Tables,
        depth: usize,
    ) -> CmdResult<()> {
        let table = match m.kind {
            FuncKind::Input => &mut tables.inputs,
            FuncKind::Output => {
                if self.mode == OutputMode::Module && !tables.outputs.is_empty() {
                    return Err(CmdError::MultipleModuleOutputs);
                }
                &mut tables.outputs
            }
            FuncKind::Tool => &mut tables.tools,
            _ => return Ok(()),
        };
        match constant_text(body, values) {
            Some(name) => table.push(Entry {
                name,
                link_type: LinkType::default(),
                temporary: false,
                glob: siblings.iter().any(|s| s.kind == FuncKind::Glob),
                no_auto_source: siblings.iter().any(|s| s.kind == FuncKind::NoAutoSource),
                no_relative: siblings.iter().any(|s| s.kind == FuncKind::NoRelative),
                resolve_to_bin_dir: siblings.iter().any(|s| s.kind == FuncKind::ResolveToBinDir),
            }),
            None => {
                self.shower.report(
                    depth,
                    format!("{} target name is not statically known", m.kind.modifier_name().unwrap_or("?")),
                );
            }
        }
        Ok(())
    }
}

fn constant_text(script: &Script, values: &ValueStore) -> Option<String> {
    if script.commands.len() != 1 || script.commands[0].len() != 1 {
        return None;
    }
    let mut out = String::new();
    for term in &script.commands[0][0] {
        match term {
            Term::Literal(id) => out.push_str(values.resolve_const(*id)),
            _ => return None,
        }
    }
    Some(out)
}

fn constant_value_text(parts: &[ValueTerm], values: &ValueStore) -> Option<String> {
    let mut out = String::new();
    for part in parts {
        match part {
            ValueTerm::Const(id) => out.push_str(values.resolve_const(*id)),
            ValueTerm::Var(_) => return None,
        }
    }
    Some(out)
}

/// Folds a transformation into a literal when every modifier is pure
/// (carries no boundary/table or flag meaning) and every operand,
/// including the body, is already fully constant.
fn try_fold_pure(mods: &[Modifier], body: &Script, values: &mut ValueStore) -> Option<Term> {
    if !mods.iter().all(|m| {
        matches!(
            m.kind,
            FuncKind::Prefix | FuncKind::Suffix | FuncKind::Quote | FuncKind::CutExtension | FuncKind::LastExtension | FuncKind::ExtensionFilter
        )
    }) {
        return None;
    }
    let mut text = constant_text(body, values)?;
    for m in mods {
        text = match m.kind {
            FuncKind::Prefix => transforms::apply_prefix(&constant_value_text(m.values.first()?, values)?, &text),
            FuncKind::Suffix => transforms::apply_suffix(&text, &constant_value_text(m.values.first()?, values)?),
            FuncKind::Quote => transforms::apply_quote(&text),
            FuncKind::CutExtension => transforms::cut_extension(&text),
            FuncKind::LastExtension => transforms::last_extension(&text),
            FuncKind::ExtensionFilter => {
                let allowed = m.values.iter().map(|v| constant_value_text(v, values)).collect::<Option<Vec<_>>>()?;
                transforms::extension_filter(&text, &allowed)?.to_string()
            }
            _ => unreachable!("filtered above"),
        };
    }
    let id = values.intern_string(&text).ok()?;
    Some(Term::Literal(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ShowMode;

    fn literal(values: &mut ValueStore, s: &str) -> Term {
        Term::Literal(values.intern_string(s).unwrap())
    }

    #[test]
    fn folds_constant_prefix() {
        let mut values = ValueStore::new();
        let lit = literal(&mut values, "foo.c");
        let mods = vec![Modifier {
            kind: FuncKind::Prefix,
            values: vec![vec![ValueTerm::Const(values.intern_string("-I").unwrap())]],
        }];
        let body = Script {
            commands: vec![vec![vec![lit]]],
        };
        let t = Transformation { mods, body };
        let script = Script {
            commands: vec![vec![vec![Term::Transformation(t)]]],
        };
        let mut shower = ErrorShower::new(ShowMode::All);
        let mut evaluator = PreEvaluator::new(OutputMode::Default, &mut shower);
        let (out, _) = evaluator.evaluate(&script, &mut values).unwrap();
        match &out.commands[0][0][0] {
            Term::Literal(id) => assert_eq!(values.resolve_const(*id), "-Ifoo.c"),
            other => panic!("expected a folded literal, got {other:?}"),
        }
    }

    #[test]
    fn records_static_input_and_strips_it_from_tables_when_hidden() {
        let mut values = ValueStore::new();
        let lit = literal(&mut values, "foo.h");
        let body = Script {
            commands: vec![vec![vec![lit]]],
        };
        let t = Transformation {
            mods: vec![Modifier {
                kind: FuncKind::Input,
                values: vec![],
            }],
            body,
        };
        let script = Script {
            commands: vec![vec![vec![Term::Transformation(t)]]],
        };
        let mut shower = ErrorShower::new(ShowMode::All);
        let mut evaluator = PreEvaluator::new(OutputMode::Default, &mut shower);
        let (_, tables) = evaluator.evaluate(&script, &mut values).unwrap();
        assert_eq!(tables.inputs.len(), 1);
        assert_eq!(tables.inputs[0].name, "foo.h");
    }

    #[test]
    fn flags_are_read_from_co_present_modifiers() {
        let mut values = ValueStore::new();
        let lit = literal(&mut values, "src/*.c");
        let body = Script {
            commands: vec![vec![vec![lit]]],
        };
        let t = Transformation {
            mods: vec![
                Modifier {
                    kind: FuncKind::Input,
                    values: vec![],
                },
                Modifier {
                    kind: FuncKind::Glob,
                    values: vec![],
                },
                Modifier {
                    kind: FuncKind::NoRelative,
                    values: vec![],
                },
            ],
            body,
        };
        let script = Script {
            commands: vec![vec![vec![Term::Transformation(t)]]],
        };
        let mut shower = ErrorShower::new(ShowMode::All);
        let mut evaluator = PreEvaluator::new(OutputMode::Default, &mut shower);
        let (_, tables) = evaluator.evaluate(&script, &mut values).unwrap();
        assert_eq!(tables.inputs.len(), 1);
        assert!(tables.inputs[0].glob);
        assert!(tables.inputs[0].no_relative);
        assert!(!tables.inputs[0].no_auto_source);
        assert!(!tables.inputs[0].resolve_to_bin_dir);
    }

    #[test]
    fn second_output_in_module_mode_is_an_error() {
        let mut values = ValueStore::new();
        let make_output = |values: &mut ValueStore, name: &str| Term::Transformation(Transformation {
            mods: vec![Modifier {
                kind: FuncKind::Output,
                values: vec![],
            }],
            body: Script {
                commands: vec![vec![vec![Term::Literal(values.intern_string(name).unwrap())]]],
            },
        });
        let script = Script {
            commands: vec![vec![vec![make_output(&mut values, "a.o")], vec![make_output(&mut values, "b.o")]]],
        };
        let mut shower = ErrorShower::new(ShowMode::All);
        let mut evaluator = PreEvaluator::new(OutputMode::Module, &mut shower);
        assert!(evaluator.evaluate(&script, &mut values).is_err());
    }

    /// `ShowMode::One` must keep exactly one message even though the
    /// deeper `tool` target (inside the `input`'s body) is visited and
    /// reported *before* the shallower `input` target, since `eval_term`
    /// walks a transformation's body before classifying the
    /// transformation's own modifiers.
    #[test]
    fn show_mode_one_keeps_only_the_shallowest_message_reported_out_of_order() {
        let mut values = ValueStore::new();
        let x = values.intern_variable("X");
        let inner_tool = Term::Transformation(Transformation {
            mods: vec![Modifier {
                kind: FuncKind::Tool,
                values: vec![],
            }],
            body: Script {
                commands: vec![vec![vec![Term::Variable(x)]]],
            },
        });
        let outer_input = Transformation {
            mods: vec![Modifier {
                kind: FuncKind::Input,
                values: vec![],
            }],
            body: Script {
                commands: vec![vec![vec![inner_tool]]],
            },
        };
        let script = Script {
            commands: vec![vec![vec![Term::Transformation(outer_input)]]],
        };
        let mut shower = ErrorShower::new(ShowMode::One);
        let mut evaluator = PreEvaluator::new(OutputMode::Default, &mut shower);
        evaluator.evaluate(&script, &mut values).unwrap();
        assert_eq!(shower.count(), 1);
    }
}
