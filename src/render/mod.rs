//! Shell renderer (spec §6, §7): a value-stack evaluator over the
//! compiled postfix stream, producing one `Vec<String>` argv per
//! pipeline command. Grounded on the same `cmd_parser.cpp` compiler this
//! crate's `polish` module mirrors — rendering is simply evaluating that
//! compiler's output against concrete bindings instead of against the
//! value store's ids.
//!
//! A modifier's body is represented on the stack as `Option<String>`:
//! `None` means "this value was hidden and contributes nothing", and
//! propagates upward through any modifier it's wrapped in (a `pre` around
//! a `hide`d value is still nothing). It only causes a whole argument to
//! disappear when that argument *is* the hidden term with no surrounding
//! `Terms` concatenation; inside a concatenation it is simply an empty
//! contribution, matching how `hide` is scoped to one value rather than
//! to the argument that contains it.

use crate::config::{ConfigEntry, ConfigView};
use crate::errors::{CmdError, CmdResult, ErrorShower};
use crate::polish::{self, Word};
use crate::transforms;
use crate::values::{FuncKind, ValueStore};

/// Mutable record the renderer fills in as it walks a compiled
/// expression, handed back to [`CommandSequenceWriter::end_script`] (spec
/// §6, "produced" interface). The dependency graph this crate hands off
/// to (out of scope, §1) reads `commands`/`arguments` to size its own
/// bookkeeping without re-counting the writer's calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandInfo {
    pub commands: usize,
    pub arguments: usize,
    pub unresolved_variables: usize,
    /// Count of variable resolutions whose [`ConfigEntry::keep_target_platform`]
    /// flag was set (spec §6) — the build graph reads this back to decide
    /// whether the command as a whole must keep targeting the build's
    /// target platform rather than the host.
    pub keep_target_platform_variables: usize,
}

/// Produced interface (spec §6): invoked by the renderer in source order.
/// A command whose every argument was hidden still brackets
/// `begin_command`/`end_command` with zero `write_argument` calls in
/// between — dropping the bracket entirely would make pipeline position
/// ambiguous to a writer that numbers commands as it goes.
pub trait CommandSequenceWriter {
    fn begin_script(&mut self);
    fn begin_command(&mut self);
    fn write_argument(&mut self, arg: String);
    fn end_command(&mut self);
    fn end_script(&mut self, info: &CommandInfo, bindings: &dyn ConfigView);
}

/// [`CommandSequenceWriter`] that simply collects commands, for tests and
/// simple embeddings (teacher style: a "simple" concrete writer living
/// next to the trait, mirroring `SimpleCommandSequenceWriter`).
#[derive(Debug, Default)]
pub struct VecCommandSequenceWriter {
    commands: Vec<Vec<String>>,
    current: Vec<String>,
    info: CommandInfo,
}

impl VecCommandSequenceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_commands(self) -> Vec<Vec<String>> {
        self.commands
    }

    pub fn info(&self) -> &CommandInfo {
        &self.info
    }
}

impl CommandSequenceWriter for VecCommandSequenceWriter {
    fn begin_script(&mut self) {}

    fn begin_command(&mut self) {
        self.current = Vec::new();
    }

    fn write_argument(&mut self, arg: String) {
        self.current.push(arg);
    }

    fn end_command(&mut self) {
        self.commands.push(std::mem::take(&mut self.current));
    }

    fn end_script(&mut self, info: &CommandInfo, _bindings: &dyn ConfigView) {
        self.info = info.clone();
    }
}

#[derive(Debug, Clone)]
enum StackValue {
    Scalar(Option<String>),
    Args(Vec<String>),
    Cmds(Vec<Vec<String>>),
}

pub fn render(
    words: &[u32],
    values: &ValueStore,
    config: &dyn ConfigView,
    shower: &mut ErrorShower,
    writer: &mut dyn CommandSequenceWriter,
) -> CmdResult<()> {
    let program = polish::disassemble(words)?;
    let mut stack: Vec<StackValue> = Vec::new();
    let mut info = CommandInfo::default();

    for word in program {
        match word {
            Word::Const(id) => stack.push(StackValue::Scalar(Some(values.resolve_const(id).to_string()))),
            Word::Var(id) => {
                let name = values.resolve_variable(id);
                match config.resolve(name) {
                    Some(ConfigEntry { value, keep_target_platform }) => {
                        if keep_target_platform {
                            info.keep_target_platform_variables += 1;
                        }
                        stack.push(StackValue::Scalar(Some(value)));
                    }
                    None => {
                        shower.report(0, format!("unresolved variable `{name}`"));
                        info.unresolved_variables += 1;
                        stack.push(StackValue::Scalar(Some(String::new())));
                    }
                }
            }
            Word::Func(fid) => {
                let kind = values.kind_of(fid);
                let arity = values.arity(fid) as usize;
                apply_function(kind, arity, &mut stack)?;
            }
        }
    }

    match stack.pop() {
        Some(StackValue::Cmds(cmds)) if stack.is_empty() => {
            writer.begin_script();
            for argv in cmds {
                info.commands += 1;
                info.arguments += argv.len();
                writer.begin_command();
                for arg in argv {
                    writer.write_argument(arg);
                }
                writer.end_command();
            }
            writer.end_script(&info, config);
            Ok(())
        }
        _ => Err(CmdError::MalformedWord),
    }
}

fn pop_n(stack: &mut Vec<StackValue>, n: usize) -> CmdResult<Vec<StackValue>> {
    if stack.len() < n {
        return Err(CmdError::MalformedWord);
    }
    let at = stack.len() - n;
    Ok(stack.split_off(at))
}

fn apply_function(kind: FuncKind, arity: usize, stack: &mut Vec<StackValue>) -> CmdResult<()> {
    match kind {
        FuncKind::Terms | FuncKind::Concat => {
            let items = pop_n(stack, arity)?;
            let mut out = String::new();
            for item in items {
                match item {
                    StackValue::Scalar(Some(s)) => out.push_str(&s),
                    StackValue::Scalar(None) => {}
                    _ => return Err(CmdError::MalformedWord),
                }
            }
            stack.push(StackValue::Scalar(Some(out)));
        }
        FuncKind::Arguments => {
            let items = pop_n(stack, arity)?;
            let mut argv = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    StackValue::Scalar(Some(s)) => argv.push(s),
                    StackValue::Scalar(None) => {}
                    _ => return Err(CmdError::MalformedWord),
                }
            }
            stack.push(StackValue::Args(argv));
        }
        FuncKind::Command => {
            let items = pop_n(stack, arity)?;
            let mut cmds = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    StackValue::Args(argv) => cmds.push(argv),
                    _ => return Err(CmdError::MalformedWord),
                }
            }
            stack.push(StackValue::Cmds(cmds));
        }
        modifier => {
            let mut items = pop_n(stack, arity)?;
            let body = match items.remove(0) {
                StackValue::Scalar(v) => v,
                _ => return Err(CmdError::MalformedWord),
            };
            let operands = items
                .into_iter()
                .map(|it| match it {
                    StackValue::Scalar(Some(s)) => Ok(s),
                    StackValue::Scalar(None) => Ok(String::new()),
                    _ => Err(CmdError::MalformedWord),
                })
                .collect::<CmdResult<Vec<String>>>()?;
            stack.push(StackValue::Scalar(apply_modifier(modifier, body, &operands)));
        }
    }
    Ok(())
}

fn apply_modifier(kind: FuncKind, body: Option<String>, operands: &[String]) -> Option<String> {
    match kind {
        FuncKind::Hide => None,
        FuncKind::Clear
        | FuncKind::Input
        | FuncKind::Output
        | FuncKind::Tool
        | FuncKind::NoAutoSource
        | FuncKind::NoRelative
        | FuncKind::ResolveToBinDir
        | FuncKind::Glob => body,
        FuncKind::Prefix => body.map(|b| transforms::apply_prefix(&operands[0], &b)),
        FuncKind::Suffix => body.map(|b| transforms::apply_suffix(&b, &operands[0])),
        FuncKind::Quote => body.map(|b| transforms::apply_quote(&b)),
        FuncKind::CutExtension => body.map(|b| transforms::cut_extension(&b)),
        FuncKind::LastExtension => body.map(|b| transforms::last_extension(&b)),
        FuncKind::ExtensionFilter => body.and_then(|b| transforms::extension_filter(&b, operands).map(str::to_string)),
        FuncKind::SetEnv | FuncKind::KeyValue => body.map(|b| format!("{b}={}", operands[0])),
        FuncKind::Command | FuncKind::Arguments | FuncKind::Terms | FuncKind::Concat => {
            unreachable!("structural kinds are handled in apply_function")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::MapCatalogue;
    use crate::config::MapConfigView;
    use crate::errors::ShowMode;

    fn compile(src: &str, values: &mut ValueStore) -> Vec<u32> {
        let catalogue = MapCatalogue::new();
        let script = crate::cmdparser::parse(src, values, &catalogue).unwrap();
        polish::compile(&script, values).unwrap()
    }

    #[test]
    fn renders_plain_command() {
        let mut values = ValueStore::new();
        let words = compile("echo hello world", &mut values);
        let config = MapConfigView::new();
        let mut shower = ErrorShower::new(ShowMode::All);
        let mut writer = VecCommandSequenceWriter::new();
        render(&words, &values, &config, &mut shower, &mut writer).unwrap();
        assert_eq!(writer.into_commands(), vec![vec!["echo".to_string(), "hello".to_string(), "world".to_string()]]);
    }

    #[test]
    fn resolves_variable_from_config() {
        let mut values = ValueStore::new();
        let words = compile("echo $X", &mut values);
        let mut config = MapConfigView::new();
        config.set("X", "resolved");
        let mut shower = ErrorShower::new(ShowMode::All);
        let mut writer = VecCommandSequenceWriter::new();
        render(&words, &values, &config, &mut shower, &mut writer).unwrap();
        assert_eq!(writer.into_commands(), vec![vec!["echo".to_string(), "resolved".to_string()]]);
    }

    #[test]
    fn keep_target_platform_entries_are_counted_in_command_info() {
        use crate::config::ConfigEntry;

        let mut values = ValueStore::new();
        let words = compile("echo $X $Y", &mut values);
        let mut config = MapConfigView::new();
        config.set_entry("X", ConfigEntry::new("platform-specific").keep_target_platform());
        config.set("Y", "plain");
        let mut shower = ErrorShower::new(ShowMode::All);
        let mut writer = VecCommandSequenceWriter::new();
        render(&words, &values, &config, &mut shower, &mut writer).unwrap();
        assert_eq!(
            writer.into_commands(),
            vec![vec!["echo".to_string(), "platform-specific".to_string(), "plain".to_string()]]
        );
        assert_eq!(writer.info().keep_target_platform_variables, 1);
    }

    #[test]
    fn unresolved_variable_is_non_fatal() {
        let mut values = ValueStore::new();
        let words = compile("echo $MISSING", &mut values);
        let config = MapConfigView::new();
        let mut shower = ErrorShower::new(ShowMode::All);
        let mut writer = VecCommandSequenceWriter::new();
        render(&words, &values, &config, &mut shower, &mut writer).unwrap();
        assert_eq!(shower.count(), 1);
        assert_eq!(writer.into_commands(), vec![vec!["echo".to_string(), String::new()]]);
    }

    #[test]
    fn hidden_argument_is_dropped_entirely() {
        let mut values = ValueStore::new();
        let words = compile("echo ${hide:X} world", &mut values);
        let config = MapConfigView::new();
        let mut shower = ErrorShower::new(ShowMode::All);
        let mut writer = VecCommandSequenceWriter::new();
        render(&words, &values, &config, &mut shower, &mut writer).unwrap();
        assert_eq!(writer.into_commands(), vec![vec!["echo".to_string(), "world".to_string()]]);
    }

    #[test]
    fn prefix_modifier_prepends_to_body() {
        let mut values = ValueStore::new();
        let words = compile("echo ${pre=-I:X}", &mut values);
        let config = MapConfigView::new();
        let mut shower = ErrorShower::new(ShowMode::All);
        let mut writer = VecCommandSequenceWriter::new();
        render(&words, &values, &config, &mut shower, &mut writer).unwrap();
        assert_eq!(writer.into_commands(), vec![vec!["echo".to_string(), "-IX".to_string()]]);
    }

    #[test]
    fn env_modifier_joins_body_and_operand_with_an_equals_sign() {
        let mut values = ValueStore::new();
        let words = compile("echo ${env=1:PATH}", &mut values);
        let mut config = MapConfigView::new();
        config.set("PATH", "PATH");
        let mut shower = ErrorShower::new(ShowMode::All);
        let mut writer = VecCommandSequenceWriter::new();
        render(&words, &values, &config, &mut shower, &mut writer).unwrap();
        assert_eq!(writer.into_commands(), vec![vec!["echo".to_string(), "PATH=1".to_string()]]);
    }

    #[test]
    fn flag_only_modifiers_pass_the_body_through_unchanged() {
        let mut values = ValueStore::new();
        let words = compile("echo ${input; glob; noauto; norel; tobindir:SRC}", &mut values);
        let mut config = MapConfigView::new();
        config.set("SRC", "src/main.c");
        let mut shower = ErrorShower::new(ShowMode::All);
        let mut writer = VecCommandSequenceWriter::new();
        render(&words, &values, &config, &mut shower, &mut writer).unwrap();
        assert_eq!(writer.into_commands(), vec![vec!["echo".to_string(), "src/main.c".to_string()]]);
    }

    #[test]
    fn command_info_counts_commands_arguments_and_unresolved_variables() {
        let mut values = ValueStore::new();
        let words = compile("echo $MISSING a | wc -l", &mut values);
        let config = MapConfigView::new();
        let mut shower = ErrorShower::new(ShowMode::All);
        let mut writer = VecCommandSequenceWriter::new();
        render(&words, &values, &config, &mut shower, &mut writer).unwrap();
        let info = writer.info();
        assert_eq!(info.commands, 2);
        assert_eq!(info.arguments, 3 + 2);
        assert_eq!(info.unresolved_variables, 1);
    }
}
