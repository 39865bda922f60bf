//! Syntax tree (spec §3, §4.3).
//!
//! The intermediate representation produced by the parser and consumed by
//! the inliner, pre-evaluator and compiler. Polymorphism over term variants
//! is expressed as a tagged sum type plus an exhaustive visitor, rather
//! than a base-class hierarchy (spec §9): every pass in the core is a
//! case-analysis over the five `Term` shapes.

use crate::values::{ConstId, FuncKind, VarId, ValueStore};

/// A complete script: an ordered sequence of pipeline-separated commands.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Script {
    pub commands: Vec<Command>,
}

/// A single pipeline stage: an ordered sequence of arguments.
pub type Command = Vec<Argument>;

/// A single argument: an ordered sequence of terms, concatenated.
pub type Argument = Vec<Term>;

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Literal(ConstId),
    Variable(VarId),
    Transformation(Transformation),
    Call(Call),
    /// A reference that must survive inlining verbatim (spec §4.4).
    Unexpanded(VarId),
}

/// A single value in a modifier's `value[,value]...` list; a value itself
/// may be composed of several terms concatenated together (e.g. `a$b`),
/// hence `Vec<ValueTerm>`.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueTerm {
    Const(ConstId),
    Var(VarId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Modifier {
    pub kind: FuncKind,
    pub values: Vec<Vec<ValueTerm>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transformation {
    pub mods: Vec<Modifier>,
    pub body: Script,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub function: VarId,
    /// One sub-script per declared macro argument, already bound
    /// positionally by the parser (spec §4.2).
    pub args: Vec<Script>,
}

/// Depth-first, pre-order visitor over a syntax tree (spec §4.3).
pub trait Visitor {
    fn visit_literal(&mut self, _id: ConstId) {}
    fn visit_variable(&mut self, _id: VarId) {}
    fn visit_modifier(&mut self, _m: &Modifier) {}
    fn visit_call(&mut self, _c: &Call) {}
}

pub fn walk_script(script: &Script, v: &mut dyn Visitor) {
    for cmd in &script.commands {
        walk_command(cmd, v);
    }
}

pub fn walk_command(cmd: &Command, v: &mut dyn Visitor) {
    for arg in cmd {
        walk_argument(arg, v);
    }
}

pub fn walk_argument(arg: &Argument, v: &mut dyn Visitor) {
    for term in arg {
        walk_term(term, v);
    }
}

pub fn walk_term(term: &Term, v: &mut dyn Visitor) {
    match term {
        Term::Literal(id) => v.visit_literal(*id),
        Term::Variable(id) => v.visit_variable(*id),
        Term::Unexpanded(id) => v.visit_variable(*id),
        Term::Transformation(t) => {
            for m in &t.mods {
                v.visit_modifier(m);
                for value in &m.values {
                    for vt in value {
                        match vt {
                            ValueTerm::Const(c) => v.visit_literal(*c),
                            ValueTerm::Var(var) => v.visit_variable(*var),
                        }
                    }
                }
            }
            walk_script(&t.body, v);
        }
        Term::Call(c) => {
            v.visit_call(c);
            for arg_script in &c.args {
                walk_script(arg_script, v);
            }
        }
    }
}

/// Canonical, loss-less textual form, used for diagnostics. Round-trips
/// through the parser for any tree built purely from plain terms,
/// variables and transformations; a tree containing calls bound through
/// keyword arguments round-trips only up to the binding's own
/// idempotence, since pretty-printing re-flattens bound buckets back into
/// positional source text (see DESIGN.md).
pub fn pretty_print(script: &Script, values: &ValueStore) -> String {
    let mut out = String::new();
    print_script(script, values, &mut out);
    out
}

fn print_script(script: &Script, values: &ValueStore, out: &mut String) {
    for (i, cmd) in script.commands.iter().enumerate() {
        if i > 0 {
            out.push_str(" | ");
        }
        print_command(cmd, values, out);
    }
}

fn print_command(cmd: &Command, values: &ValueStore, out: &mut String) {
    for (i, arg) in cmd.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        print_argument(arg, values, out);
    }
}

fn print_argument(arg: &Argument, values: &ValueStore, out: &mut String) {
    for term in arg {
        print_term(term, values, out);
    }
}

fn print_term(term: &Term, values: &ValueStore, out: &mut String) {
    match term {
        Term::Literal(id) => out.push_str(&escape(values.resolve_const(*id))),
        Term::Variable(id) | Term::Unexpanded(id) => {
            out.push_str("${");
            out.push_str(values.resolve_variable(*id));
            out.push('}');
        }
        Term::Transformation(t) => {
            out.push_str("${");
            for (i, m) in t.mods.iter().enumerate() {
                if i > 0 {
                    out.push(';');
                }
                out.push_str(m.kind.modifier_name().unwrap_or(""));
                for (vi, value) in m.values.iter().enumerate() {
                    out.push(if vi == 0 { '=' } else { ',' });
                    for vt in value {
                        match vt {
                            ValueTerm::Const(c) => out.push_str(&escape(values.resolve_const(*c))),
                            ValueTerm::Var(v) => {
                                out.push('$');
                                out.push_str(values.resolve_variable(*v));
                            }
                        }
                    }
                }
            }
            out.push(':');
            print_body(&t.body, values, out);
            out.push('}');
        }
        Term::Call(c) => {
            out.push('$');
            out.push_str(values.resolve_variable(c.function));
            out.push('(');
            for (i, arg_script) in c.args.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                print_script(arg_script, values, out);
            }
            out.push(')');
        }
    }
}

fn print_body(body: &Script, values: &ValueStore, out: &mut String) {
    if let [Term::Variable(id)] = single_term(body) {
        out.push_str(values.resolve_variable(*id));
        return;
    }
    out.push('"');
    let mut s = String::new();
    print_script(body, values, &mut s);
    out.push_str(&s.replace('\\', "\\\\").replace('"', "\\\""));
    out.push('"');
}

fn single_term(body: &Script) -> &[Term] {
    if body.commands.len() == 1 && body.commands[0].len() == 1 {
        &body.commands[0][0]
    } else {
        &[]
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\'' | '"' | '\\' | '/') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
