/// Abacus error types
///
/// Layered like the pipeline itself: ScanError (tokenizer + parser),
/// CompileError (a counted batch of scan diagnostics for one input),
/// ExecError (opcode executor), with CalcError as the top-level wrapper
/// the library surface returns.

use colored::Colorize;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Where a diagnostic points: current input name plus 1-based line.
/// Interactive input has no file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePos {
    pub file: Option<Rc<str>>,
    pub line: u32,
}

impl SourcePos {
    pub fn new(file: Option<Rc<str>>, line: u32) -> Self {
        SourcePos { file, line }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(name) => write!(f, "\"{}\", line {}", name, self.line),
            None => write!(f, "line {}", self.line),
        }
    }
}

// ---------------------------------------------------------------------------
// Scan-time errors (tokenizer and parser)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum ScanError {
    /// Bad token, missing punctuation, reserved keyword in symbol position.
    #[error("{0}")]
    Parse(String),
    /// Undefined symbol, builtin redefinition, label never defined.
    #[error("{0}")]
    Resolve(String),
}

/// A positioned scan diagnostic, as recorded by the compiler.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub pos: SourcePos,
    pub error: ScanError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pos, self.error)
    }
}

/// Compilation failed: one or more scan errors were recorded.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
    /// True when the count hit `maxscancount` and scanning was abandoned.
    pub aborted: bool,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.diagnostics {
            writeln!(f, "{}", d)?;
        }
        write!(f, "{} error(s)", self.diagnostics.len())?;
        if self.aborted {
            write!(f, "; compilation abandoned")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

// ---------------------------------------------------------------------------
// Execution errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ExecError {
    /// Wrong operand variant for an operation.
    #[error("bad operand type: {0}")]
    Type(String),
    /// Division by zero, negative index, non-integer where integer required.
    #[error("{0}")]
    Domain(String),
    /// Wrong argument count to a builtin or user function.
    #[error("function \"{name}\" expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },
    /// Undefined function or object method at call time.
    #[error("{0}")]
    Resolve(String),
    /// SIGINT cascade reached ABORT_NOW.
    #[error("operation aborted")]
    Interrupt,
    /// Denied by the -m permission mask.
    #[error("operation denied by permission mode: {0}")]
    IoPermission(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// `quit` statement at top level; not an error proper, but it unwinds
    /// the executor the same way.
    #[error("quit{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Quit { message: Option<String> },
    /// `abort` statement: like quit, but raises the abort level too.
    #[error("abort{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Abort { message: Option<String> },
}

impl ExecError {
    pub fn typ(msg: impl Into<String>) -> Self {
        ExecError::Type(msg.into())
    }

    pub fn domain(msg: impl Into<String>) -> Self {
        ExecError::Domain(msg.into())
    }

    pub fn resolve(msg: impl Into<String>) -> Self {
        ExecError::Resolve(msg.into())
    }
}

// ---------------------------------------------------------------------------
// Top-level wrapper
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CalcError {
    #[error("{0}")]
    Compile(#[from] CompileError),
    #[error("{pos}: {error}")]
    Exec { pos: SourcePos, error: ExecError },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CalcError {
    pub fn exec(pos: SourcePos, error: ExecError) -> Self {
        CalcError::Exec { pos, error }
    }
}

// ---------------------------------------------------------------------------
// Warning surface
// ---------------------------------------------------------------------------

/// Print a scan-time warning to stderr. Warnings never stop compilation.
pub fn warning(pos: &SourcePos, msg: &str) {
    eprintln!("{} {}: {}", "warning:".yellow().bold(), pos, msg);
}
