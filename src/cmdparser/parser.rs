//! Recursive-descent parser (spec §4.2), grounded on `cmd_parser.cpp`'s
//! `TCmdParserVisitor_Polexpr` (tree shape) and `CollectArgs` (macro
//! argument binding: keyword buckets, positional slots, variadic
//! overflow).
//!
//! Literal text inside a macro call's raw arguments can't be interned
//! until it's known whether that argument opens a keyword bucket (a bare
//! word matching a declared keyword is consumed as a bucket marker, not
//! as a literal). So the parser builds an intermediate `RawTerm` tree for
//! call arguments and only calls into the value store once binding has
//! decided which terms are literal.

use crate::catalogue::{BlockDataCatalogue, MacroSignature};
use crate::cmdparser::lexer::{is_escapable, is_ident_continue, is_ident_start, Scanner};
use crate::errors::{CmdError, CmdResult};
use crate::syntax::{Argument, Call, Command, Modifier, Script, Term, Transformation, ValueTerm};
use crate::values::ValueStore;

enum RawTerm {
    Text(String),
    Var(crate::values::VarId),
    Xfm(Transformation),
    Call(Call),
}

type RawArgument = Vec<RawTerm>;
type RawCommand = Vec<RawArgument>;

pub fn parse(src: &str, values: &mut ValueStore, catalogue: &dyn BlockDataCatalogue) -> CmdResult<Script> {
    let mut parser = Parser {
        scanner: Scanner::new(src),
        values,
        catalogue,
    };
    let script = parser.parse_script()?;
    parser.skip_ws();
    if !parser.scanner.is_eof() {
        return Err(parser.err("unexpected trailing input"));
    }
    Ok(script)
}

struct Parser<'a, 'v, 'c> {
    scanner: Scanner<'a>,
    values: &'v mut ValueStore,
    catalogue: &'c dyn BlockDataCatalogue,
}

impl<'a, 'v, 'c> Parser<'a, 'v, 'c> {
    fn err(&self, msg: impl Into<String>) -> CmdError {
        let (line, column) = self.scanner.position();
        CmdError::ParseError {
            source: self.scanner.source().to_string(),
            message: msg.into(),
            line,
            column,
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.scanner.peek(), Some(c) if c.is_whitespace()) {
            self.scanner.advance();
        }
    }

    fn read_ident(&mut self) -> String {
        let mut s = String::new();
        if matches!(self.scanner.peek(), Some(c) if is_ident_start(c)) {
            s.push(self.scanner.advance().unwrap());
        }
        while matches!(self.scanner.peek(), Some(c) if is_ident_continue(c)) {
            s.push(self.scanner.advance().unwrap());
        }
        s
    }

    fn read_until(&mut self, delim: char) -> CmdResult<String> {
        let mut s = String::new();
        loop {
            match self.scanner.peek() {
                None => return Err(self.err(format!("expected '{delim}' before end of input"))),
                Some(c) if c == delim => break,
                Some(c) => {
                    s.push(c);
                    self.scanner.advance();
                }
            }
        }
        Ok(s)
    }

    fn read_escape(&mut self) -> String {
        match self.scanner.peek() {
            Some(c) if is_escapable(c) => {
                self.scanner.advance();
                c.to_string()
            }
            Some(c) => {
                self.scanner.advance();
                format!("\\{c}")
            }
            None => "\\".to_string(),
        }
    }

    fn parse_script(&mut self) -> CmdResult<Script> {
        let mut commands = Vec::new();
        loop {
            let raw_cmd = self.parse_raw_command(&['|'])?;
            commands.push(self.resolve_raw_command(raw_cmd)?);
            self.skip_ws();
            if self.scanner.eat('|') {
                self.skip_ws();
                continue;
            }
            break;
        }
        Ok(Script { commands })
    }

    fn parse_raw_command(&mut self, terminators: &[char]) -> CmdResult<RawCommand> {
        let mut cmd = Vec::new();
        self.skip_ws();
        while let Some(c) = self.scanner.peek() {
            if terminators.contains(&c) {
                break;
            }
            cmd.push(self.parse_raw_argument(terminators)?);
            self.skip_ws();
        }
        Ok(cmd)
    }

    fn parse_raw_argument(&mut self, terminators: &[char]) -> CmdResult<RawArgument> {
        let mut arg = Vec::new();
        loop {
            match self.scanner.peek() {
                None => break,
                Some(c) if c.is_whitespace() => break,
                Some(c) if terminators.contains(&c) => break,
                Some('\'') => arg.extend(self.parse_quoted('\'')?),
                Some('"') => arg.extend(self.parse_quoted('"')?),
                Some('$') => arg.push(self.parse_dollar()?),
                _ => arg.push(self.parse_plain_text(terminators)?),
            }
        }
        Ok(arg)
    }

    fn parse_plain_text(&mut self, terminators: &[char]) -> CmdResult<RawTerm> {
        let mut buf = String::new();
        loop {
            match self.scanner.peek() {
                None => break,
                Some(c) if c.is_whitespace() => break,
                Some(c) if terminators.contains(&c) => break,
                Some('$') | Some('\'') | Some('"') => break,
                Some('\\') => {
                    self.scanner.advance();
                    buf.push_str(&self.read_escape());
                }
                Some(c) => {
                    buf.push(c);
                    self.scanner.advance();
                }
            }
        }
        Ok(RawTerm::Text(buf))
    }

    /// Parses the body of a `'...'` or `"..."` region: a sequence of terms
    /// with the same escaping rules as plain text but no whitespace
    /// boundary, up to the matching unescaped delimiter.
    fn parse_quoted(&mut self, delim: char) -> CmdResult<Vec<RawTerm>> {
        self.scanner.advance();
        let mut terms = Vec::new();
        let mut buf = String::new();
        loop {
            match self.scanner.peek() {
                None => return Err(self.err("unterminated quoted string")),
                Some(c) if c == delim => {
                    self.scanner.advance();
                    break;
                }
                Some('\\') => {
                    self.scanner.advance();
                    buf.push_str(&self.read_escape());
                }
                Some('$') => {
                    if !buf.is_empty() {
                        terms.push(RawTerm::Text(std::mem::take(&mut buf)));
                    }
                    terms.push(self.parse_dollar()?);
                }
                Some(c) => {
                    buf.push(c);
                    self.scanner.advance();
                }
            }
        }
        if !buf.is_empty() {
            terms.push(RawTerm::Text(buf));
        }
        Ok(terms)
    }

    fn parse_dollar(&mut self) -> CmdResult<RawTerm> {
        self.scanner.advance();
        match self.scanner.peek() {
            Some('{') => self.parse_braced(),
            Some(c) if is_ident_start(c) => {
                let name = self.read_ident();
                if self.scanner.peek() == Some('(') {
                    self.parse_call(name)
                } else {
                    Ok(RawTerm::Var(self.values.intern_variable(&name)))
                }
            }
            _ => Err(self.err("expected a variable name or '{' after '$'")),
        }
    }

    /// `${NAME}` or `${mod[;mod...]:body}`. Distinguished by scanning ahead
    /// (without consuming) for a `:` before the closing `}`; the modifier
    /// grammar never nests braces, so this lookahead is unambiguous.
    fn parse_braced(&mut self) -> CmdResult<RawTerm> {
        self.scanner.advance();
        let mut offset = 0;
        let mut found_colon = false;
        loop {
            match self.scanner.peek_at(offset) {
                None => return Err(self.err("unterminated '${'")),
                Some('}') => break,
                Some(':') => {
                    found_colon = true;
                    break;
                }
                Some(_) => offset += 1,
            }
        }
        if !found_colon {
            let name = self.read_until('}')?;
            self.scanner.advance();
            return Ok(RawTerm::Var(self.values.intern_variable(name.trim())));
        }
        let mods = self.parse_modifier_list()?;
        if !self.scanner.eat(':') {
            return Err(self.err("expected ':' in transformation"));
        }
        let body = self.parse_transform_body()?;
        if !self.scanner.eat('}') {
            return Err(self.err("expected '}' to close transformation"));
        }
        Ok(RawTerm::Xfm(Transformation { mods, body }))
    }

    fn parse_modifier_list(&mut self) -> CmdResult<Vec<Modifier>> {
        let mut mods = Vec::new();
        loop {
            let name = self.read_ident();
            if name.is_empty() {
                return Err(self.err("expected a modifier name"));
            }
            let kind = crate::values::FuncKind::from_modifier_name(&name).ok_or_else(|| CmdError::BadModifier {
                name: name.clone(),
                reason: "unknown modifier name".to_string(),
            })?;
            let mut values = Vec::new();
            if self.scanner.eat('=') {
                loop {
                    values.push(self.parse_modifier_value()?);
                    if !self.scanner.eat(',') {
                        break;
                    }
                }
            }
            mods.push(Modifier { kind, values });
            if !self.scanner.eat(';') {
                break;
            }
        }
        Ok(mods)
    }

    fn parse_modifier_value(&mut self) -> CmdResult<Vec<ValueTerm>> {
        let mut out = Vec::new();
        let mut buf = String::new();
        loop {
            match self.scanner.peek() {
                None => break,
                Some(c) if matches!(c, ',' | ';' | ':' | '}') => break,
                Some('$') => {
                    if !buf.is_empty() {
                        out.push(ValueTerm::Const(self.values.intern_string(&std::mem::take(&mut buf))?));
                    }
                    self.scanner.advance();
                    if self.scanner.eat('{') {
                        let name = self.read_until('}')?;
                        self.scanner.advance();
                        out.push(ValueTerm::Var(self.values.intern_variable(name.trim())));
                    } else {
                        let name = self.read_ident();
                        out.push(ValueTerm::Var(self.values.intern_variable(&name)));
                    }
                }
                Some(c) => {
                    buf.push(c);
                    self.scanner.advance();
                }
            }
        }
        if !buf.is_empty() {
            out.push(ValueTerm::Const(self.values.intern_string(&buf)?));
        }
        Ok(out)
    }

    /// Body grammar: a bare identifier (a single variable reference) or a
    /// double-quoted string, which may itself embed variables and calls.
    fn parse_transform_body(&mut self) -> CmdResult<Script> {
        match self.scanner.peek() {
            Some('"') => {
                let terms = self.parse_quoted('"')?;
                let arg = self.resolve_raw_terms(terms)?;
                Ok(Script {
                    commands: vec![vec![arg]],
                })
            }
            Some(c) if is_ident_start(c) => {
                let name = self.read_ident();
                let var = self.values.intern_variable(&name);
                Ok(Script {
                    commands: vec![vec![vec![Term::Variable(var)]]],
                })
            }
            _ => Err(self.err("expected a transformation body")),
        }
    }

    fn parse_call(&mut self, macro_name: String) -> CmdResult<RawTerm> {
        self.scanner.advance();
        let raw_cmd = self.parse_raw_command(&[')'])?;
        if !self.scanner.eat(')') {
            return Err(self.err("expected ')' to close macro call"));
        }
        let sig = self
            .catalogue
            .lookup(&macro_name)
            .ok_or_else(|| CmdError::UnknownMacro { name: macro_name.clone() })?
            .clone();
        let args = self.bind_macro_args(&macro_name, &sig, raw_cmd)?;
        let function = self.values.intern_variable(&macro_name);
        Ok(RawTerm::Call(Call { function, args }))
    }

    /// Routes each raw argument to its formal slot: a lone word matching a
    /// declared keyword opens that keyword's bucket for all subsequent
    /// arguments (until another keyword is seen); everything before the
    /// first keyword, and anything when no keyword has ever matched, fills
    /// positional slots in order, overflowing into the last positional
    /// slot when the macro is variadic (spec §4.2, `CollectArgs`).
    fn bind_macro_args(&mut self, macro_name: &str, sig: &MacroSignature, raw_cmd: RawCommand) -> CmdResult<Vec<Script>> {
        let slot_count = sig.args.len();
        let mut buckets: Vec<Vec<RawArgument>> = (0..slot_count).map(|_| Vec::new()).collect();
        let positional_slots: Vec<usize> = sig
            .args
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.is_keyword)
            .map(|(i, _)| i)
            .collect();
        let mut next_positional = 0usize;
        let mut active_keyword: Option<usize> = None;

        for raw_arg in raw_cmd {
            if let [RawTerm::Text(word)] = raw_arg.as_slice() {
                if let Some(slot) = sig.args.iter().position(|a| a.is_keyword && a.name == *word) {
                    active_keyword = Some(slot);
                    continue;
                }
            }
            if let Some(slot) = active_keyword {
                buckets[slot].push(raw_arg);
                continue;
            }
            if next_positional < positional_slots.len() {
                buckets[positional_slots[next_positional]].push(raw_arg);
                next_positional += 1;
            } else if sig.variadic {
                match positional_slots.last() {
                    Some(&slot) => buckets[slot].push(raw_arg),
                    None => return Err(CmdError::TooManyArguments { name: macro_name.to_string() }),
                }
            } else {
                return Err(CmdError::TooManyArguments { name: macro_name.to_string() });
            }
        }

        buckets
            .into_iter()
            .map(|bucket| {
                let mut cmd: Command = Vec::with_capacity(bucket.len());
                for raw_arg in bucket {
                    cmd.push(self.resolve_raw_terms(raw_arg)?);
                }
                Ok(Script { commands: vec![cmd] })
            })
            .collect()
    }

    fn resolve_raw_terms(&mut self, terms: Vec<RawTerm>) -> CmdResult<Argument> {
        let mut out = Vec::with_capacity(terms.len());
        for t in terms {
            out.push(match t {
                RawTerm::Text(s) => Term::Literal(self.values.intern_string(&s)?),
                RawTerm::Var(v) => Term::Variable(v),
                RawTerm::Xfm(x) => Term::Transformation(x),
                RawTerm::Call(c) => Term::Call(c),
            });
        }
        Ok(out)
    }

    fn resolve_raw_command(&mut self, raw_cmd: RawCommand) -> CmdResult<Command> {
        raw_cmd.into_iter().map(|arg| self.resolve_raw_terms(arg)).collect()
    }
}
