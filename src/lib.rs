/// Abacus — an arbitrary-precision calculator language
///
/// Module layout:
///   - conf       — runtime configuration (epsilon, display, warnings)
///   - bytecode   — opcode set, Function, function store
///   - label      — forward-reference patch chains for jumps
///   - compiler   — recursive-descent parser emitting opcodes directly
///   - symbol     — global/static/local/parameter scope tables
///   - vm         — stack-machine opcode executor
///   - random     — Blum-Blum-Shub and additive-55 generators
///   - lexer      — tokenizer with mode-switchable newline handling
///   - errors     — scan / compile / exec error types
///   - intrinsics — built-in functions
///   - runtime    — high-level Runtime (conf + tables + VM wiring)
///   - core       — value types (Value, Number, Matrix, Assoc) and OOP

// ── Core pipeline ────────────────────────────────────────────────────────────
pub mod bytecode;
pub mod compiler;
pub mod label;
pub mod symbol;
pub mod vm;

// ── Front-end / language ─────────────────────────────────────────────────────
pub mod errors;
pub mod lexer;

// ── Runtime & values ─────────────────────────────────────────────────────────
pub mod conf;
pub mod core;
pub mod intrinsics;
pub mod random;
pub mod runtime;

// ── Re-exports for convenience ───────────────────────────────────────────────
pub use conf::Config;
pub use core::number::Number;
pub use core::value::Value;
pub use errors::{CalcError, ExecError, ScanError};
pub use lexer::{Lexer, Token};
pub use runtime::Runtime;
