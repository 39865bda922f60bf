//! Postfix ("Polish") compiler (spec §6), grounded on `cmd_parser.cpp`'s
//! `CompileArgs`/`Compile`: emits `Cmds(Args(Terms(...),...),...)` in
//! postfix order using a variadic-call builder that counts children as
//! they're compiled and bakes the count into the function word only once
//! the whole call is known (so arity never has to be predicted ahead of
//! time). An argument with exactly one term, and a transformation body
//! that reduces to one term, skip their wrapping `Terms`/`Script` node
//! entirely — the same single-child collapse the original compiler
//! performs, which keeps the common case (most arguments are one word)
//! from paying for structure it doesn't need.

use crate::errors::{CmdError, CmdResult};
use crate::syntax::{Argument, Command, Modifier, Script, Term, ValueTerm};
use crate::values::{ConstId, FuncId, FuncKind, ValueStore, VarId};

const TAG_BITS: u32 = 2;
const TAG_CONST: u32 = 0;
const TAG_VAR: u32 = 1;
const TAG_FUNC: u32 = 2;
const PAYLOAD_BITS: u32 = 32 - TAG_BITS;
const PAYLOAD_MASK: u32 = (1 << PAYLOAD_BITS) - 1;

/// One cell of the compact postfix stream: a tagged 4-byte word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Word {
    Const(ConstId),
    Var(VarId),
    Func(FuncId),
}

impl Word {
    pub fn to_u32(self) -> u32 {
        let (tag, payload) = match self {
            Word::Const(id) => (TAG_CONST, id.to_repr()),
            Word::Var(id) => (TAG_VAR, id.to_repr()),
            Word::Func(id) => (TAG_FUNC, id.to_repr()),
        };
        debug_assert!(payload & !PAYLOAD_MASK == 0, "id does not fit in the compact word payload");
        (tag << PAYLOAD_BITS) | (payload & PAYLOAD_MASK)
    }

    pub fn from_u32(word: u32) -> CmdResult<Word> {
        let tag = word >> PAYLOAD_BITS;
        let payload = word & PAYLOAD_MASK;
        match tag {
            TAG_CONST => Ok(Word::Const(ConstId::from_repr(payload))),
            TAG_VAR => Ok(Word::Var(VarId::from_repr(payload))),
            TAG_FUNC => Ok(Word::Func(FuncId::from_repr(payload))),
            _ => Err(CmdError::MalformedWord),
        }
    }
}

/// Counts operands as they're compiled and bakes the final count into the
/// structural function's `FuncId` once every child has been emitted.
struct VariadicCallBuilder {
    count: u16,
}

impl VariadicCallBuilder {
    fn new() -> Self {
        Self { count: 0 }
    }

    fn add(&mut self) {
        self.count += 1;
    }

    fn build(self, kind: FuncKind, values: &mut ValueStore, words: &mut Vec<Word>) {
        let fid = values.structural_function_id(kind, self.count);
        words.push(Word::Func(fid));
    }
}

pub fn compile(script: &Script, values: &mut ValueStore) -> CmdResult<Vec<u32>> {
    let mut words = Vec::new();
    compile_script(script, values, &mut words)?;
    Ok(words.into_iter().map(Word::to_u32).collect())
}

pub fn disassemble(words: &[u32]) -> CmdResult<Vec<Word>> {
    words.iter().map(|w| Word::from_u32(*w)).collect()
}

fn compile_script(script: &Script, values: &mut ValueStore, words: &mut Vec<Word>) -> CmdResult<()> {
    let mut builder = VariadicCallBuilder::new();
    for cmd in &script.commands {
        compile_command(cmd, values, words)?;
        builder.add();
    }
    builder.build(FuncKind::Command, values, words);
    Ok(())
}

fn compile_command(cmd: &Command, values: &mut ValueStore, words: &mut Vec<Word>) -> CmdResult<()> {
    let mut builder = VariadicCallBuilder::new();
    for arg in cmd {
        compile_argument(arg, values, words)?;
        builder.add();
    }
    builder.build(FuncKind::Arguments, values, words);
    Ok(())
}

fn compile_argument(arg: &Argument, values: &mut ValueStore, words: &mut Vec<Word>) -> CmdResult<()> {
    if let [term] = arg.as_slice() {
        return compile_term(term, values, words);
    }
    let mut builder = VariadicCallBuilder::new();
    for term in arg {
        compile_term(term, values, words)?;
        builder.add();
    }
    builder.build(FuncKind::Terms, values, words);
    Ok(())
}

fn compile_term(term: &Term, values: &mut ValueStore, words: &mut Vec<Word>) -> CmdResult<()> {
    match term {
        Term::Literal(id) => {
            words.push(Word::Const(*id));
            Ok(())
        }
        Term::Variable(id) | Term::Unexpanded(id) => {
            words.push(Word::Var(*id));
            Ok(())
        }
        Term::Transformation(t) => {
            compile_script(&t.body, values, words)?;
            for m in &t.mods {
                compile_modifier(m, values, words)?;
            }
            Ok(())
        }
        Term::Call(_) => Err(CmdError::CompileError {
            context: "compile".to_string(),
            source: Box::new(CmdError::NotASingleArgument {
                context: "calls must be inlined before compilation".to_string(),
            }),
        }),
    }
}

fn compile_modifier(m: &Modifier, values: &mut ValueStore, words: &mut Vec<Word>) -> CmdResult<()> {
    for value in &m.values {
        compile_value(value, values, words)?;
    }
    // the running operand already on the stack counts as one argument to the modifier
    let given_arity = (m.values.len() + 1) as u16;
    let fid = values.function_id(m.kind, given_arity)?;
    words.push(Word::Func(fid));
    Ok(())
}

fn compile_value(value: &[ValueTerm], values: &mut ValueStore, words: &mut Vec<Word>) -> CmdResult<()> {
    if let [single] = value {
        push_value_term(single, words);
        return Ok(());
    }
    let mut builder = VariadicCallBuilder::new();
    for vt in value {
        push_value_term(vt, words);
        builder.add();
    }
    builder.build(FuncKind::Concat, values, words);
    Ok(())
}

fn push_value_term(vt: &ValueTerm, words: &mut Vec<Word>) {
    match vt {
        ValueTerm::Const(id) => words.push(Word::Const(*id)),
        ValueTerm::Var(id) => words.push(Word::Var(*id)),
    }
}
