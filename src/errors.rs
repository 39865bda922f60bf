//! Crate-wide error types.
//!
//! Mirrors the teacher's two-tier error style: a `thiserror`-derived enum
//! for fatal failures (`CmdError`, analogous to `ParseException`), and a
//! small cooperative object (`ErrorShower`) for the non-fatal, accumulating
//! failures that flow through rendering instead of unwinding (analogous to
//! how `BreakError`/`ContinueError`/`ReturnError` ride alongside `Result`
//! for shell control flow).

use thiserror::Error;

/// Fatal failures. Parsing, inlining, pre-evaluation and compilation all
/// fail fast by returning one of these; rendering only returns one for
/// structural problems (an unparseable fingerprint, an out-of-range id
/// passed where a fresh one was expected), never for an unresolved
/// variable (see [`ErrorShower`]).
#[derive(Debug, Error)]
pub enum CmdError {
    #[error("could not parse command at {line}:{column}: {message} (in `{source}`)")]
    ParseError {
        /// The full, original source text of the expression that failed to
        /// parse (spec §4.2/§7: fatal errors are reported with the
        /// offending source attached, never a partial tree).
        source: String,
        message: String,
        line: usize,
        column: usize,
    },

    #[error("unknown macro `{name}`")]
    UnknownMacro { name: String },

    #[error("macro `{name}` called with too many positional arguments")]
    TooManyArguments { name: String },

    #[error("macro `{name}` has no keyword `{keyword}`")]
    UnknownKeyword { name: String, keyword: String },

    #[error("bad modifier `{name}`: {reason}")]
    BadModifier { name: String, reason: String },

    #[error("recursion too deep while inlining `{name}`")]
    RecursionTooDeep { name: String },

    #[error("inliner call-chain depth exceeded")]
    InlineDepthExceeded,

    #[error("value store capacity exceeded")]
    CapacityExceeded,

    #[error("multiple outputs declared in module output-accounting mode")]
    MultipleModuleOutputs,

    #[error("{context}: value does not reduce to a single argument")]
    NotASingleArgument { context: String },

    #[error("malformed compact expression word")]
    MalformedWord,

    #[error("compiling `{context}` failed: {source}")]
    CompileError {
        context: String,
        #[source]
        source: Box<CmdError>,
    },
}

impl CmdError {
    /// Wraps any fatal error behind the enclosing façade (spec: "CompileError").
    pub fn wrap(self, context: impl Into<String>) -> CmdError {
        CmdError::CompileError {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

pub type CmdResult<T> = Result<T, CmdError>;

/// How aggressively render-time diagnostics are surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShowMode {
    None,
    #[default]
    One,
    All,
}

/// Cooperative error accumulator threaded through pre-evaluation and
/// rendering. `One` remembers the shallowest depth at which an error was
/// already reported and suppresses deeper duplicates; `All` keeps
/// everything; `None` discards silently.
#[derive(Debug)]
pub struct ErrorShower {
    mode: ShowMode,
    shallowest_shown: usize,
    messages: Vec<String>,
}

impl ErrorShower {
    pub fn new(mode: ShowMode) -> Self {
        Self {
            mode,
            shallowest_shown: usize::MAX,
            messages: Vec::new(),
        }
    }

    /// Report a diagnostic at the given tree depth. Returns whether it was
    /// actually recorded (callers don't otherwise need to branch on mode).
    ///
    /// `One` mode keeps at most one message: a shallower report replaces
    /// whatever was previously accepted, since passes visit a term's body
    /// before its own boundary modifiers and so may report a deeper error
    /// before a shallower one that supersedes it (e.g. an unresolvable
    /// `tool` nested inside an unresolvable `input`).
    pub fn report(&mut self, depth: usize, message: impl Into<String>) -> bool {
        match self.mode {
            ShowMode::None => false,
            ShowMode::All => {
                self.messages.push(message.into());
                true
            }
            ShowMode::One => {
                if depth < self.shallowest_shown {
                    self.shallowest_shown = depth;
                    self.messages.clear();
                    self.messages.push(message.into());
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
