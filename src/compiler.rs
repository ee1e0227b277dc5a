/// Single-pass recursive-descent code generator.
///
/// There is no AST: each grammar routine emits opcodes into the function
/// under construction as it parses. Every expression routine returns a
/// small kind bitfield (rvalue / constant / assignment) that drives
/// lvalue projection and assignment checking.
///
/// The emitter keeps a two-opcode peephole window. Collapses performed
/// while emitting:
///   - addr-opcode + GETVALUE            -> value-opcode of the same kind
///   - constant load + GETVALUE          -> constant load
///   - ASSIGN + POP                      -> ASSIGNPOP
///   - constant/addr load + POP          -> deleted ("constant before comma")
///   - NUMBER NUMBER binop               -> folded constant
///   - NUMBER ^ 2 / ^ 4                  -> SQUARE / SQUARE SQUARE
///   - NUMBER 0 / 1                      -> ZERO / ONE
///   - NEGATE after NUMBER               -> negated constant
///   - repeated DEBUG on one line        -> single DEBUG
/// Placing a label clears the window.

use crate::bytecode::{Function, Op};
use crate::conf::TRACE_NODEBUG;
use crate::core::number::Number;
use crate::core::value::{NumOp, Value};
use crate::errors::{warning, CompileError, Diagnostic, ScanError};
use crate::intrinsics;
use crate::label::{Label, LabelTable};
use crate::lexer::{Lexer, Token, TM_ALLSYMS, TM_DEFAULT, TM_NEWLINES};
use crate::runtime::Runtime;
use crate::symbol::{NameList, SYM_GLOBAL, SYM_LOCAL, SYM_PARAM, SYM_STATIC, SYM_UNDEFINED};
use std::rc::Rc;

// Expression kind bits.
pub const EXPR_RVALUE: u8 = 1;
pub const EXPR_CONST: u8 = 2;
pub const EXPR_ASSIGN: u8 = 4;

fn is_rvalue(t: u8) -> bool {
    t & EXPR_RVALUE != 0
}

fn is_lvalue(t: u8) -> bool {
    t & EXPR_RVALUE == 0
}

fn is_assign(t: u8) -> bool {
    t & EXPR_ASSIGN != 0
}

/// What the driver should do after one top-level command.
#[derive(Debug)]
pub enum Command {
    /// Run this committed anonymous function.
    Eval(usize),
    /// A named function was defined.
    Defined(usize),
    Read { path: String, once: bool },
    Write { path: String },
    Cd(Option<String>),
    /// Separator or recovered error; nothing to do.
    Nothing,
    /// Current input source is exhausted.
    Eof,
}

/// Error-recovery skip classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    None,
    ToSemicolon,
    ToComma,
}

/// How an identifier expression may auto-define its symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AutoDef {
    No,
    Yes,
    Global,
    Local,
    Static,
}

#[derive(Default)]
struct StmtCtx<'a> {
    cont: Option<&'a mut Label>,
    brk: Option<&'a mut Label>,
    next_case: Option<&'a mut Label>,
    deflt: Option<&'a mut Label>,
}

pub struct Compiler<'a> {
    rt: &'a mut Runtime,
    lx: &'a mut Lexer,

    func: Function,
    func_index: usize,
    params: NameList,
    locals: NameList,
    labels: LabelTable,

    // peephole window
    oldop: Op,
    oldop_at: usize,
    oldoldop: Op,
    oldoldop_at: usize,
    debugline: i64,

    diagnostics: Vec<Diagnostic>,
    func_errors: usize,
    aborted: bool,
}

impl<'a> Compiler<'a> {
    pub fn new(rt: &'a mut Runtime, lx: &'a mut Lexer) -> Self {
        Compiler {
            rt,
            lx,
            func: Function::new(Rc::from("*")),
            func_index: 0,
            params: NameList::default(),
            locals: NameList::default(),
            labels: LabelTable::default(),
            oldop: Op::Nop,
            oldop_at: 0,
            oldoldop: Op::Nop,
            oldoldop_at: 0,
            debugline: 0,
            diagnostics: Vec::new(),
            func_errors: 0,
            aborted: false,
        }
    }

    /// Drain recorded diagnostics into a CompileError, if any.
    pub fn take_error(&mut self) -> Option<CompileError> {
        if self.diagnostics.is_empty() {
            None
        } else {
            Some(CompileError {
                diagnostics: std::mem::take(&mut self.diagnostics),
                aborted: self.aborted,
            })
        }
    }

    // -----------------------------------------------------------------
    // Token plumbing and error recovery
    // -----------------------------------------------------------------

    fn gettoken(&mut self) -> Token {
        loop {
            if self.aborted {
                return Token::Eof;
            }
            match self.lx.gettoken() {
                Ok(t) => return t,
                Err(e) => self.record(e),
            }
        }
    }

    fn rescan(&mut self) {
        self.lx.rescan();
    }

    fn record(&mut self, error: ScanError) {
        self.func_errors += 1;
        self.diagnostics.push(Diagnostic {
            pos: self.lx.pos(),
            error,
        });
        if self.diagnostics.len() >= self.rt.conf.maxscancount as usize {
            self.aborted = true;
        }
    }

    fn scan_error(&mut self, skip: Skip, msg: impl Into<String>) {
        self.record(ScanError::Parse(msg.into()));
        self.resync(skip);
    }

    fn resolve_error(&mut self, skip: Skip, msg: impl Into<String>) {
        self.record(ScanError::Resolve(msg.into()));
        self.resync(skip);
    }

    fn resync(&mut self, skip: Skip) {
        match skip {
            Skip::None => {}
            Skip::ToSemicolon => loop {
                match self.gettoken() {
                    Token::Semicolon | Token::Newline | Token::Eof => break,
                    Token::RightBrace => {
                        self.rescan();
                        break;
                    }
                    _ => {}
                }
            },
            Skip::ToComma => loop {
                match self.gettoken() {
                    Token::Comma | Token::Eof => break,
                    Token::Semicolon
                    | Token::Newline
                    | Token::RightParen
                    | Token::RightBracket
                    | Token::RightBrace => {
                        self.rescan();
                        break;
                    }
                    _ => {}
                }
            },
        }
    }

    fn warn(&mut self, msg: &str) {
        warning(&self.lx.pos(), msg);
    }

    // -----------------------------------------------------------------
    // Emission with the peephole window
    // -----------------------------------------------------------------

    fn clear_opt(&mut self) {
        self.oldop = Op::Nop;
        self.oldoldop = Op::Nop;
        self.debugline = 0;
    }

    fn push_op(&mut self, op: Op) {
        self.oldoldop = self.oldop;
        self.oldoldop_at = self.oldop_at;
        self.oldop = op;
        self.oldop_at = self.func.opcodes.len();
        self.func.opcodes.push(op as i64);
    }

    fn addop(&mut self, op: Op) {
        use Op::*;
        match op {
            GetValue => {
                let rewrite = match self.oldop {
                    Number | Zero | One | Imaginary | GetEpsilon | SetEpsilon | StringLit
                    | Undef | GetConfig | SetConfig => return,
                    Duplicate => Some(DupValue),
                    FiAddr => Some(FiValue),
                    GlobalAddr => Some(GlobalValue),
                    LocalAddr => Some(LocalValue),
                    ParamAddr => Some(ParamValue),
                    ElemAddr => Some(ElemValue),
                    _ => None,
                };
                if let Some(new) = rewrite {
                    self.func.opcodes[self.oldop_at] = new as i64;
                    self.oldop = new;
                    return;
                }
            }
            Pop => match self.oldop {
                Assign => {
                    self.func.opcodes[self.oldop_at] = AssignPop as i64;
                    self.oldop = AssignPop;
                    return;
                }
                Undef => {
                    self.func.opcodes.truncate(self.oldop_at);
                    self.oldop = Nop;
                    self.oldoldop = Nop;
                    return;
                }
                Number | Imaginary | StringLit | LocalAddr | ParamAddr | GlobalAddr => {
                    self.func.opcodes.truncate(self.oldop_at);
                    self.oldop = Nop;
                    self.oldoldop = Nop;
                    self.warn("Constant before comma operator");
                    return;
                }
                _ => {}
            },
            Negate => {
                if self.oldop == Number {
                    let idx = self.func.opcodes[self.oldop_at + 1] as usize;
                    let q = self.rt.constant(idx);
                    let folded = self.rt.add_constant(q.neg());
                    self.func.opcodes[self.oldop_at + 1] = folded as i64;
                    return;
                }
            }
            _ => {}
        }
        if self.oldop == Op::Number {
            if self.oldoldop == Op::Number {
                if let Some(fold) = fold_op(op) {
                    let q1 = self.rt.constant(self.func.opcodes[self.oldoldop_at + 1] as usize);
                    let q2 = self.rt.constant(self.func.opcodes[self.oldop_at + 1] as usize);
                    let folded = crate::core::value::binary_op(
                        fold,
                        &Value::num((*q1).clone()),
                        &Value::num((*q2).clone()),
                    );
                    if let Ok(v) = folded {
                        if let Some(q) = v.as_number() {
                            let idx = self.rt.add_constant(q);
                            self.func.opcodes[self.oldoldop_at + 1] = idx as i64;
                            self.func.opcodes.truncate(self.oldoldop_at + 2);
                            self.oldop = Op::Number;
                            self.oldop_at = self.oldoldop_at;
                            self.oldoldop = Op::Nop;
                            return;
                        }
                    }
                }
            } else if op != Op::Number {
                let idx = self.func.opcodes[self.oldop_at + 1] as usize;
                let q = self.rt.constant(idx);
                if op == Op::Power {
                    if q.to_i64() == Some(2) {
                        self.func.opcodes.truncate(self.oldop_at);
                        self.push_op(Op::Square);
                        return;
                    }
                    if q.to_i64() == Some(4) {
                        self.func.opcodes.truncate(self.oldop_at);
                        self.push_op(Op::Square);
                        self.push_op(Op::Square);
                        return;
                    }
                }
                if q.is_zero() {
                    self.func.opcodes.truncate(self.oldop_at);
                    self.push_op(Op::Zero);
                } else if q.is_one() {
                    self.func.opcodes.truncate(self.oldop_at);
                    self.push_op(Op::One);
                }
            }
        }
        self.push_op(op);
    }

    fn addopone(&mut self, op: Op, arg: i64) {
        if op == Op::Debug {
            if self.rt.conf.traceflags & TRACE_NODEBUG != 0 || arg == self.debugline {
                return;
            }
            self.debugline = arg;
            if self.oldop == Op::Debug {
                let at = self.oldop_at;
                self.func.opcodes[at + 1] = arg;
                return;
            }
        }
        self.addop(op);
        self.func.opcodes.push(arg);
    }

    fn addoptwo(&mut self, op: Op, a1: i64, a2: i64) {
        self.addop(op);
        self.func.opcodes.push(a1);
        self.func.opcodes.push(a2);
    }

    fn addop_label(&mut self, op: Op, label: &mut Label) {
        self.addop(op);
        label.use_at(&mut self.func.opcodes);
    }

    /// Place a label here. Placement invalidates the peephole window.
    fn place(&mut self, label: &mut Label) {
        label.set(&mut self.func.opcodes);
        self.clear_opt();
    }

    fn emit_number_text(&mut self, text: &str, imaginary: bool) {
        match self.rt.intern_number_text(text) {
            Some(idx) => {
                self.addopone(
                    if imaginary { Op::Imaginary } else { Op::Number },
                    idx as i64,
                );
            }
            None => self.scan_error(Skip::None, format!("badly formatted number \"{}\"", text)),
        }
    }

    /// Upgrade the most recent INDEXADDR to write intent.
    fn write_index_op(&mut self) {
        if self.oldop == Op::IndexAddr {
            let at = self.oldop_at;
            self.func.opcodes[at + 2] = 1;
        }
    }

    // -----------------------------------------------------------------
    // Function construction
    // -----------------------------------------------------------------

    fn begin_func(&mut self, name: &str) {
        self.func_index = self.rt.functions.index_of(name);
        self.func = Function::new(Rc::from(name));
        self.params.clear();
        self.locals.clear();
        self.labels.clear();
        self.clear_opt();
        self.func_errors = 0;
    }

    /// Finish the current function and commit it. Returns the function
    /// index, or None when errors were recorded for this function.
    fn end_func(&mut self) -> Option<usize> {
        if self.oldop != Op::Return {
            self.addop(Op::Undef);
            self.addop(Op::Return);
        }
        for name in self.labels.undefined() {
            self.record(ScanError::Resolve(format!(
                "label \"{}\" was never defined",
                name
            )));
        }
        if self.func_errors > 0 || self.aborted {
            return None;
        }
        let mut f = std::mem::replace(&mut self.func, Function::new(Rc::from("*")));
        f.param_count = self.params.len();
        f.local_count = self.locals.len();
        f.param_names = self.params.clone();
        f.local_names = self.locals.clone();
        if !f.is_anonymous() && self.rt.conf.traceflags & crate::conf::TRACE_FNCODES != 0 {
            print!("{}", f.disassemble());
        }
        let index = self.func_index;
        self.rt.functions.commit(index, f);
        Some(index)
    }

    // -----------------------------------------------------------------
    // Top-level commands
    // -----------------------------------------------------------------

    pub fn compile_command(&mut self) -> Command {
        loop {
            match self.gettoken() {
                Token::Newline | Token::Semicolon => continue,
                Token::Eof => return Command::Eof,
                Token::Define => return self.get_function(),
                Token::Undefine => {
                    self.get_undefine();
                    return Command::Nothing;
                }
                Token::Read => return self.get_read(),
                Token::Write => return self.get_write(),
                Token::Cd => return self.get_cd(),
                Token::Help => {
                    // the help subsystem lives outside the core
                    let t = self.gettoken();
                    if !matches!(t, Token::Newline | Token::Semicolon | Token::Eof) {
                        self.gettoken();
                    }
                    self.rescan();
                    println!("help is not available in this build");
                    return Command::Nothing;
                }
                _ => {
                    self.rescan();
                    return self.evaluate();
                }
            }
        }
    }

    /// Compile one top-level statement into an anonymous function.
    fn evaluate(&mut self) -> Command {
        self.begin_func("*");
        let mut ctx = StmtCtx::default();
        self.statement(&mut ctx);
        match self.end_func() {
            Some(index) => Command::Eval(index),
            None => Command::Nothing,
        }
    }

    /// define name(params) { body }  |  define name(params) = expr
    fn get_function(&mut self) -> Command {
        self.lx.set_mode(TM_DEFAULT);
        let name = match self.gettoken() {
            Token::Symbol(s) => s,
            _ => {
                self.scan_error(Skip::ToSemicolon, "Function name was expected");
                self.lx.set_mode(TM_NEWLINES);
                return Command::Nothing;
            }
        };
        if intrinsics::lookup(&name).is_some() {
            self.resolve_error(Skip::ToSemicolon, "Using builtin function name");
            self.lx.set_mode(TM_NEWLINES);
            return Command::Nothing;
        }
        self.begin_func(&name);
        self.rt.symbols.enter_func_scope();
        if self.gettoken() != Token::LeftParen {
            self.scan_error(Skip::ToSemicolon, "Left parenthesis expected for function");
            self.abandon_func();
            return Command::Nothing;
        }
        loop {
            match self.gettoken() {
                Token::RightParen => break,
                Token::Symbol(pname) => {
                    let index = match self.symbol_type(&pname) {
                        SYM_UNDEFINED | SYM_GLOBAL | SYM_STATIC => self.params.add(&pname),
                        _ => {
                            self.scan_error(
                                Skip::None,
                                format!("Parameter \"{}\" is already defined", pname),
                            );
                            0
                        }
                    };
                    let mut tok = self.gettoken();
                    if tok == Token::Assign {
                        // default value: evaluated only when the argument
                        // arrives undefined
                        let mut skip = Label::new();
                        self.addopone(Op::ParamAddr, index as i64);
                        self.addop_label(Op::JumpNn, &mut skip);
                        self.op_assignment();
                        self.addop(Op::AssignPop);
                        self.place(&mut skip);
                        tok = self.gettoken();
                    }
                    if tok == Token::RightParen {
                        break;
                    }
                    if tok != Token::Comma {
                        self.scan_error(
                            Skip::ToComma,
                            "Using other than comma to separate parameters",
                        );
                        self.abandon_func();
                        return Command::Nothing;
                    }
                }
                _ => {
                    self.scan_error(Skip::ToComma, "Using non-identifier as function parameter");
                    self.abandon_func();
                    return Command::Nothing;
                }
            }
        }
        match self.gettoken() {
            Token::Assign => {
                self.lx.set_mode(TM_NEWLINES);
                self.expr_list();
                self.addop(Op::Return);
            }
            Token::LeftBrace => {
                let mut ctx = StmtCtx::default();
                self.body(&mut ctx);
            }
            _ => {
                self.scan_error(
                    Skip::ToSemicolon,
                    "Left brace or equals sign expected for function",
                );
                self.abandon_func();
                return Command::Nothing;
            }
        }
        self.lx.set_mode(TM_NEWLINES);
        let committed = self.end_func();
        self.rt.symbols.exit_func_scope();
        match committed {
            Some(index) => Command::Defined(index),
            None => Command::Nothing,
        }
    }

    fn abandon_func(&mut self) {
        self.rt.symbols.exit_func_scope();
        self.func = Function::new(Rc::from("*"));
        self.lx.set_mode(TM_NEWLINES);
    }

    /// undefine name [, name]  |  undefine *
    fn get_undefine(&mut self) {
        loop {
            match self.gettoken() {
                Token::Symbol(name) => {
                    self.rt.functions.undefine(&name);
                }
                Token::Mult => {
                    self.rt.functions.undefine_all();
                }
                Token::Comma => continue,
                Token::Newline | Token::Semicolon | Token::Eof => {
                    self.rescan();
                    return;
                }
                _ => {
                    self.scan_error(Skip::ToSemicolon, "Non-name arg for undefine");
                    return;
                }
            }
        }
    }

    fn get_filename(&mut self) -> Option<(String, bool)> {
        self.lx.set_mode(TM_NEWLINES | TM_ALLSYMS);
        let mut once = false;
        let name = loop {
            match self.gettoken() {
                Token::Str(s) | Token::Symbol(s) => {
                    if !once && &*s == "-once" {
                        once = true;
                        continue;
                    }
                    break s.to_string();
                }
                _ => {
                    self.rescan();
                    self.lx.set_mode(TM_NEWLINES);
                    return None;
                }
            }
        };
        self.lx.set_mode(TM_NEWLINES);
        Some((name, once))
    }

    fn get_read(&mut self) -> Command {
        match self.get_filename() {
            Some((path, once)) => Command::Read { path, once },
            None => {
                self.scan_error(Skip::ToSemicolon, "Filename expected for read");
                Command::Nothing
            }
        }
    }

    fn get_write(&mut self) -> Command {
        match self.get_filename() {
            Some((path, _)) => Command::Write { path },
            None => {
                self.scan_error(Skip::ToSemicolon, "Filename expected for write");
                Command::Nothing
            }
        }
    }

    fn get_cd(&mut self) -> Command {
        match self.get_filename() {
            Some((path, _)) => Command::Cd(Some(path)),
            None => Command::Cd(None),
        }
    }

    // -----------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------

    fn body(&mut self, ctx: &mut StmtCtx) {
        let oldmode = self.lx.set_mode(TM_DEFAULT);
        loop {
            match self.gettoken() {
                Token::RightBrace => {
                    self.lx.set_mode(oldmode);
                    return;
                }
                Token::Eof => {
                    self.scan_error(Skip::None, "End-of-file in function body");
                    self.lx.set_mode(oldmode);
                    return;
                }
                _ => {
                    self.rescan();
                    self.statement(ctx);
                }
            }
        }
    }

    fn statement(&mut self, ctx: &mut StmtCtx) {
        let line = self.lx.line() as i64;
        self.addopone(Op::Debug, line);
        match self.gettoken() {
            Token::Newline | Token::Semicolon => return,
            Token::Global => {
                self.declarations(SYM_GLOBAL);
            }
            Token::Static => {
                let mut label = Label::new();
                let at = self.func.opcodes.len();
                self.addop_label(Op::InitStatic, &mut label);
                if self.declarations(SYM_STATIC) {
                    self.place(&mut label);
                } else {
                    self.func.opcodes.truncate(at);
                    self.clear_opt();
                }
            }
            Token::Local => {
                self.declarations(SYM_LOCAL);
            }
            Token::Undefine => {
                self.get_undefine();
            }
            Token::RightBrace => {
                self.scan_error(Skip::None, "Extraneous right brace");
                return;
            }
            Token::Continue => match ctx.cont.as_deref_mut() {
                Some(label) => self.addop_label(Op::Jump, label),
                None => {
                    self.scan_error(Skip::ToSemicolon, "CONTINUE not within FOR, WHILE, or DO");
                    return;
                }
            },
            Token::Break => match ctx.brk.as_deref_mut() {
                Some(label) => self.addop_label(Op::Jump, label),
                None => {
                    self.scan_error(Skip::ToSemicolon, "BREAK not within FOR, WHILE, or DO");
                    return;
                }
            },
            Token::Goto => match self.gettoken() {
                Token::Symbol(name) => {
                    self.addop(Op::Jump);
                    self.labels.use_named(&name, &mut self.func.opcodes);
                }
                _ => {
                    self.scan_error(Skip::ToSemicolon, "Missing label in goto");
                    return;
                }
            },
            Token::Return => match self.gettoken() {
                Token::Newline | Token::Semicolon => {
                    self.addop(Op::Undef);
                    self.addop(Op::Return);
                    return;
                }
                _ => {
                    self.rescan();
                    self.expr_list();
                    if self.func.is_anonymous() {
                        self.addop(Op::Save);
                    }
                    self.addop(Op::Return);
                }
            },
            Token::LeftBrace => {
                self.body(ctx);
                return;
            }
            Token::If => {
                self.stmt_if(ctx);
                return;
            }
            Token::For => {
                self.stmt_for();
                return;
            }
            Token::While => {
                self.stmt_while();
                return;
            }
            Token::Do => {
                self.stmt_do();
                return;
            }
            Token::Switch => {
                self.stmt_switch(ctx);
                return;
            }
            Token::Case => {
                self.stmt_case(ctx);
                return;
            }
            Token::Default => {
                self.stmt_default(ctx);
                return;
            }
            Token::Else => {
                self.scan_error(Skip::ToSemicolon, "ELSE without preceding IF");
                return;
            }
            Token::Show => {
                self.stmt_show();
            }
            Token::Print => {
                self.stmt_print();
                return;
            }
            Token::Quit => match self.gettoken() {
                Token::Str(s) => {
                    let idx = self.rt.intern_string(&s);
                    self.addopone(Op::Quit, idx as i64);
                }
                _ => {
                    self.rescan();
                    self.addopone(Op::Quit, -1);
                }
            },
            Token::Abort => match self.gettoken() {
                Token::Str(s) => {
                    let idx = self.rt.intern_string(&s);
                    self.addopone(Op::Abort, idx as i64);
                }
                _ => {
                    self.rescan();
                    self.addopone(Op::Abort, -1);
                }
            },
            Token::Symbol(name) => {
                // a symbol immediately followed by a colon defines a label
                if self.lx.next_char_is(':') {
                    if let Err(e) = self.labels.define(&name, &mut self.func.opcodes) {
                        self.record(e);
                    }
                    self.clear_opt();
                    if self.gettoken() == Token::RightBrace {
                        self.rescan();
                        return;
                    }
                    self.rescan();
                    self.statement(&mut StmtCtx {
                        cont: ctx.cont.as_deref_mut(),
                        brk: ctx.brk.as_deref_mut(),
                        next_case: None,
                        deflt: None,
                    });
                    return;
                }
                self.rescan();
                self.stmt_expr(ctx);
                return;
            }
            _ => {
                self.rescan();
                self.stmt_expr(ctx);
                return;
            }
        }
        self.stmt_terminator();
    }

    /// Shared tail of expression-statements: expr ; with result printing
    /// for bare top-level expressions.
    fn stmt_expr(&mut self, ctx: &mut StmtCtx) {
        let kind = self.expr_list();
        let inner = ctx.cont.is_some() || ctx.brk.is_some();
        if inner || !self.func.is_anonymous() {
            self.addop(Op::Pop);
        } else {
            self.addop(Op::Save);
            if is_assign(kind) {
                self.addop(Op::Pop);
            } else {
                self.addop(Op::PrintResult);
            }
        }
        self.stmt_terminator();
    }

    fn stmt_terminator(&mut self) {
        loop {
            match self.gettoken() {
                Token::RightBrace | Token::Newline | Token::Eof | Token::Else => {
                    self.rescan();
                    return;
                }
                Token::Semicolon => return,
                Token::Number(text) => {
                    self.emit_number_text(&text, false);
                    self.scan_error(Skip::None, "Unexpected number");
                }
                Token::Imaginary(text) => {
                    self.emit_number_text(&text, true);
                    self.scan_error(Skip::None, "Unexpected number");
                }
                _ => {
                    self.scan_error(Skip::None, "Semicolon expected");
                    return;
                }
            }
        }
    }

    fn stmt_if(&mut self, ctx: &mut StmtCtx) {
        let mut label1 = Label::new();
        let mut label2 = Label::new();
        self.condition();
        match self.gettoken() {
            Token::Continue => {
                match ctx.cont.as_deref_mut() {
                    Some(label) => self.addop_label(Op::JumpNz, label),
                    None => {
                        self.scan_error(Skip::ToSemicolon, "CONTINUE not within FOR, WHILE, or DO");
                        return;
                    }
                }
            }
            Token::Break => {
                match ctx.brk.as_deref_mut() {
                    Some(label) => self.addop_label(Op::JumpNz, label),
                    None => {
                        self.scan_error(Skip::ToSemicolon, "BREAK not within FOR, WHILE, or DO");
                        return;
                    }
                }
            }
            Token::Goto => match self.gettoken() {
                Token::Symbol(name) => {
                    self.addop(Op::JumpNz);
                    self.labels.use_named(&name, &mut self.func.opcodes);
                }
                _ => {
                    self.scan_error(Skip::ToSemicolon, "Missing label in goto");
                    return;
                }
            },
            _ => {
                self.addop_label(Op::JumpZ, &mut label1);
                self.rescan();
                self.statement(&mut StmtCtx {
                    cont: ctx.cont.as_deref_mut(),
                    brk: ctx.brk.as_deref_mut(),
                    next_case: None,
                    deflt: None,
                });
                if self.gettoken() != Token::Else {
                    self.place(&mut label1);
                    self.rescan();
                    return;
                }
                self.addop_label(Op::Jump, &mut label2);
                self.place(&mut label1);
                self.statement(&mut StmtCtx {
                    cont: ctx.cont.as_deref_mut(),
                    brk: ctx.brk.as_deref_mut(),
                    next_case: None,
                    deflt: None,
                });
                self.place(&mut label2);
                return;
            }
        }
        // if condition routed straight to continue/break/goto
        if self.gettoken() != Token::Semicolon {
            self.rescan();
        }
        if self.gettoken() != Token::Else {
            self.rescan();
            return;
        }
        self.statement(&mut StmtCtx {
            cont: ctx.cont.as_deref_mut(),
            brk: ctx.brk.as_deref_mut(),
            next_case: None,
            deflt: None,
        });
    }

    /// for (a; b; c) stmt — compiled with four labels: cond, step,
    /// body, break. Omitted clauses emit nothing.
    fn stmt_for(&mut self) {
        let oldmode = self.lx.set_mode(TM_DEFAULT);
        let mut label1 = Label::new(); // condition
        let mut label2 = Label::new(); // step
        let mut label3 = Label::new(); // body
        let mut label4 = Label::new(); // break
        let mut cont_is_cond = false;
        let mut cont_is_step = false;
        if self.gettoken() != Token::LeftParen {
            self.lx.set_mode(oldmode);
            self.scan_error(Skip::ToSemicolon, "Left parenthesis expected");
            return;
        }
        if self.gettoken() != Token::Semicolon {
            // init clause
            self.rescan();
            self.expr_list();
            self.addop(Op::Pop);
            if self.gettoken() != Token::Semicolon {
                self.lx.set_mode(oldmode);
                self.scan_error(Skip::ToSemicolon, "Missing semicolon");
                return;
            }
        }
        if self.gettoken() != Token::Semicolon {
            // condition clause
            self.place(&mut label1);
            cont_is_cond = true;
            self.rescan();
            self.expr_list();
            self.addop_label(Op::JumpNz, &mut label3);
            self.addop_label(Op::Jump, &mut label4);
            if self.gettoken() != Token::Semicolon {
                self.lx.set_mode(oldmode);
                self.scan_error(Skip::ToSemicolon, "Missing semicolon");
                return;
            }
        }
        if self.gettoken() != Token::RightParen {
            // step clause
            if !label1.is_set() {
                self.addop_label(Op::Jump, &mut label3);
            }
            self.place(&mut label2);
            cont_is_step = true;
            cont_is_cond = false;
            self.rescan();
            self.expr_list();
            self.addop(Op::Pop);
            if label1.is_set() {
                self.addop_label(Op::Jump, &mut label1);
            }
            if self.gettoken() != Token::RightParen {
                self.lx.set_mode(oldmode);
                self.scan_error(Skip::ToSemicolon, "Right parenthesis expected");
                return;
            }
        }
        self.place(&mut label3);
        self.lx.set_mode(oldmode);
        {
            let cont = if cont_is_step {
                &mut label2
            } else if cont_is_cond {
                &mut label1
            } else {
                &mut label3
            };
            self.statement(&mut StmtCtx {
                cont: Some(&mut *cont),
                brk: Some(&mut label4),
                next_case: None,
                deflt: None,
            });
            self.addop_label(Op::Jump, cont);
        }
        self.place(&mut label4);
    }

    fn stmt_while(&mut self) {
        let oldmode = self.lx.set_mode(TM_DEFAULT);
        let mut cont = Label::new();
        let mut brk = Label::new();
        self.place(&mut cont);
        self.condition();
        self.lx.set_mode(oldmode);
        if self.gettoken() != Token::Semicolon {
            self.addop_label(Op::JumpZ, &mut brk);
            self.rescan();
            self.statement(&mut StmtCtx {
                cont: Some(&mut cont),
                brk: Some(&mut brk),
                next_case: None,
                deflt: None,
            });
            self.addop_label(Op::Jump, &mut cont);
            self.place(&mut brk);
        } else {
            self.addop_label(Op::JumpNz, &mut cont);
        }
    }

    fn stmt_do(&mut self) {
        let oldmode = self.lx.set_mode(TM_DEFAULT);
        let mut cont = Label::new();
        let mut brk = Label::new();
        let mut top = Label::new();
        self.place(&mut top);
        self.statement(&mut StmtCtx {
            cont: Some(&mut cont),
            brk: Some(&mut brk),
            next_case: None,
            deflt: None,
        });
        if self.gettoken() != Token::While {
            self.lx.set_mode(oldmode);
            self.scan_error(Skip::ToSemicolon, "WHILE keyword expected for DO statement");
            return;
        }
        self.place(&mut cont);
        self.condition();
        self.addop_label(Op::JumpNz, &mut top);
        self.place(&mut brk);
        self.lx.set_mode(oldmode);
    }

    fn stmt_switch(&mut self, ctx: &mut StmtCtx) {
        let oldmode = self.lx.set_mode(TM_DEFAULT);
        let mut brk = Label::new();
        let mut next_case = Label::new();
        let mut deflt = Label::new();
        self.condition();
        if self.gettoken() != Token::LeftBrace {
            self.lx.set_mode(oldmode);
            self.scan_error(Skip::ToSemicolon, "Missing left brace for switch statement");
            return;
        }
        self.addop_label(Op::Jump, &mut next_case);
        self.rescan();
        self.statement(&mut StmtCtx {
            cont: ctx.cont.as_deref_mut(),
            brk: Some(&mut brk),
            next_case: Some(&mut next_case),
            deflt: Some(&mut deflt),
        });
        self.addop_label(Op::Jump, &mut brk);
        self.place(&mut next_case);
        if deflt.is_set() {
            self.addop_label(Op::Jump, &mut deflt);
        } else {
            self.addop(Op::Pop);
        }
        self.place(&mut brk);
        self.lx.set_mode(oldmode);
    }

    fn stmt_case(&mut self, ctx: &mut StmtCtx) {
        if ctx.next_case.is_none() {
            self.scan_error(Skip::ToSemicolon, "CASE not within SWITCH statement");
            return;
        }
        let mut label1 = Label::new();
        self.addop_label(Op::Jump, &mut label1);
        {
            let next_case = ctx.next_case.as_deref_mut().unwrap();
            self.clear_opt();
            next_case.set(&mut self.func.opcodes);
            next_case.clear();
        }
        self.expr_list();
        if self.gettoken() != Token::Colon {
            self.scan_error(Skip::ToSemicolon, "Colon expected after CASE expression");
            return;
        }
        {
            let next_case = ctx.next_case.as_deref_mut().unwrap();
            self.addop(Op::CaseJump);
            next_case.use_at(&mut self.func.opcodes);
        }
        self.place(&mut label1);
        self.statement(ctx);
    }

    fn stmt_default(&mut self, ctx: &mut StmtCtx) {
        if self.gettoken() != Token::Colon {
            self.scan_error(Skip::ToSemicolon, "Colon expected after DEFAULT keyword");
            return;
        }
        match ctx.deflt.as_deref_mut() {
            None => {
                self.scan_error(Skip::ToSemicolon, "DEFAULT not within SWITCH statement");
                return;
            }
            Some(label) if label.is_set() => {
                self.scan_error(Skip::ToSemicolon, "Multiple DEFAULT clauses in SWITCH");
                return;
            }
            Some(_) => {}
        }
        let mut label1 = Label::new();
        self.addop_label(Op::Jump, &mut label1);
        {
            let deflt = ctx.deflt.as_deref_mut().unwrap();
            deflt.set(&mut self.func.opcodes);
        }
        self.clear_opt();
        self.addop(Op::Pop);
        self.place(&mut label1);
        self.statement(ctx);
    }

    fn stmt_print(&mut self) {
        let mut printeol = true;
        loop {
            match self.gettoken() {
                Token::RightParen
                | Token::RightBracket
                | Token::RightBrace
                | Token::Newline
                | Token::Else
                | Token::Eof => {
                    self.rescan();
                    if printeol {
                        self.addop(Op::PrintEol);
                    }
                    return;
                }
                Token::Semicolon => {
                    if printeol {
                        self.addop(Op::PrintEol);
                    }
                    return;
                }
                Token::Comma => {
                    self.addop(Op::PrintSpace);
                    printeol = false;
                }
                Token::Colon => {
                    printeol = false;
                }
                Token::Str(s) => {
                    printeol = true;
                    let idx = self.rt.intern_string(&s);
                    self.addopone(Op::PrintString, idx as i64);
                }
                _ => {
                    printeol = true;
                    self.rescan();
                    self.op_assignment();
                    self.addopone(Op::Print, 0);
                }
            }
        }
    }

    /// show <item>: item codes match the original's four-letter match.
    fn stmt_show(&mut self) {
        let arg: i64 = match self.gettoken() {
            Token::Global => 13,
            Token::Static => 14,
            Token::Symbol(name) => {
                let four: String = name.chars().take(4).collect();
                match four.as_str() {
                    "buil" => 1,
                    "real" => 2,
                    "func" => 3,
                    "objf" => 4,
                    "conf" => 5,
                    "objt" => 6,
                    "file" => 7,
                    "size" => 8,
                    "erro" => 9,
                    "cust" => 10,
                    "bloc" => 11,
                    "cons" => 12,
                    "glob" => 13,
                    "stat" => 14,
                    "numb" => 15,
                    "redc" => 16,
                    "stri" => 17,
                    "lite" => 18,
                    "opco" => 19,
                    _ => 0,
                }
            }
            _ => {
                self.rescan();
                println!("show argument must name one of: builtins, config, constants,");
                println!("functions, globals, statics, opcodes <name>");
                return;
            }
        };
        if arg == 19 {
            match self.gettoken() {
                Token::Symbol(fname) => {
                    let index = self.rt.functions.index_of(&fname);
                    self.addopone(Op::Show, index as i64 + 19);
                }
                _ => {
                    self.rescan();
                    self.scan_error(Skip::ToSemicolon, "Function name expected for show statement");
                }
            }
            return;
        }
        if arg > 0 {
            self.addopone(Op::Show, arg);
        } else {
            self.warn("Unknown parameter for show statement");
        }
    }

    // -----------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------

    fn declarations(&mut self, symtype: u8) -> bool {
        let mut res = false;
        loop {
            match self.gettoken() {
                Token::Comma => continue,
                Token::Newline | Token::Semicolon | Token::RightBrace | Token::Eof => {
                    self.rescan();
                    return res;
                }
                Token::Symbol(_) => {
                    let line = self.lx.line() as i64;
                    self.addopone(Op::Debug, line);
                    self.rescan();
                    if self.simple_declaration(symtype) {
                        res = true;
                    }
                }
                Token::Mat => {
                    let line = self.lx.line() as i64;
                    self.addopone(Op::Debug, line);
                    self.mat_declaration(symtype);
                    res = true;
                }
                Token::Obj => {
                    let line = self.lx.line() as i64;
                    self.addopone(Op::Debug, line);
                    self.obj_declaration(symtype);
                    self.addop(Op::Pop);
                    res = true;
                }
                _ => {
                    self.scan_error(Skip::ToSemicolon, "Bad syntax in declaration statement");
                    return res;
                }
            }
        }
    }

    fn simple_declaration(&mut self, symtype: u8) -> bool {
        let mut res = false;
        loop {
            match self.gettoken() {
                Token::Symbol(_) => {
                    self.rescan();
                    if self.one_variable(symtype) {
                        res = true;
                        self.addop(Op::Pop);
                    }
                }
                Token::Comma => continue,
                _ => {
                    self.rescan();
                    return res;
                }
            }
        }
    }

    /// One name in a declaration sequence. Space-separated names share a
    /// trailing assignment: `global c d = 2` assigns both c and d.
    fn one_variable(&mut self, symtype: u8) -> bool {
        match self.gettoken() {
            Token::Symbol(name) => {
                let res = self.one_variable(symtype);
                self.define_symbol(&name, symtype);
                if res {
                    self.use_symbol(&name, AutoDef::No);
                    self.addop(Op::AssignBack);
                }
                res
            }
            Token::Assign => {
                self.op_assignment();
                self.rescan();
                true
            }
            _ => {
                self.rescan();
                false
            }
        }
    }

    // -----------------------------------------------------------------
    // Matrix and object declarations
    // -----------------------------------------------------------------

    fn mat_declaration(&mut self, symtype: u8) {
        loop {
            match self.gettoken() {
                Token::Symbol(_) => {
                    self.rescan();
                    self.one_matrix(symtype);
                    self.addop(Op::Pop);
                }
                Token::Comma => continue,
                _ => {
                    self.rescan();
                    return;
                }
            }
        }
    }

    fn one_matrix(&mut self, symtype: u8) {
        match self.gettoken() {
            Token::Symbol(name) => {
                if symtype == SYM_UNDEFINED {
                    self.rescan();
                    self.id_expr(false, AutoDef::Yes);
                } else {
                    self.define_symbol(&name, symtype);
                    self.use_symbol(&name, AutoDef::No);
                }
                while self.gettoken() == Token::Comma {}
                self.rescan();
                self.one_matrix(symtype);
                self.addop(Op::Assign);
                return;
            }
            Token::LeftParen => {
                if is_rvalue(self.expr_list()) {
                    self.scan_error(Skip::ToSemicolon, "Lvalue expected");
                    return;
                }
                if self.gettoken() != Token::RightParen {
                    self.scan_error(Skip::ToSemicolon, "Missing right parenthesis");
                    return;
                }
                self.one_matrix(symtype);
                self.addop(Op::Assign);
                return;
            }
            _ => {}
        }
        self.rescan();
        if self.gettoken() != Token::LeftBracket {
            self.rescan();
            self.scan_error(Skip::ToSemicolon, "Left-bracket expected");
            return;
        }
        if self.gettoken() == Token::RightBracket {
            if self.gettoken() == Token::Assign {
                // implicit bounds from the initializer count; the bound
                // constant is patched once the list has been counted
                self.clear_opt();
                let patchpc = self.func.opcodes.len() + 1;
                self.addopone(Op::Number, -1);
                self.clear_opt();
                self.addop(Op::Zero);
                self.addopone(Op::MatCreate, 1);
                self.addop(Op::Zero);
                self.addop(Op::InitFill);
                let count = self.init_list();
                let index = self.rt.add_constant(Number::from_i64(count));
                self.func.opcodes[patchpc] = index as i64;
                return;
            }
            self.rescan();
            self.addopone(Op::MatCreate, 0);
            if self.gettoken() == Token::LeftBracket {
                self.create_matrix();
            } else {
                self.rescan();
                self.addop(Op::Zero);
            }
            self.addop(Op::InitFill);
            return;
        }
        self.rescan();
        self.create_matrix();
        while self.gettoken() == Token::Assign {
            self.init_list();
        }
        self.rescan();
    }

    /// Bounds of one bracketed matrix declaration; nests for higher
    /// dimensions written as A[2][3].
    fn create_matrix(&mut self) {
        let mut dim = 0i64;
        loop {
            if self.gettoken() == Token::RightBracket {
                self.addopone(Op::MatCreate, dim);
                if self.gettoken() == Token::LeftBracket {
                    self.create_matrix();
                } else {
                    self.rescan();
                    self.addop(Op::Zero);
                }
                self.addop(Op::InitFill);
                return;
            }
            self.rescan();
            dim += 1;
            if dim > crate::core::matrix::MAXDIM as i64 {
                self.scan_error(
                    Skip::ToSemicolon,
                    format!("Only {} dimensions allowed", crate::core::matrix::MAXDIM),
                );
                return;
            }
            self.op_assignment();
            match self.gettoken() {
                Token::RightBracket => {
                    self.rescan();
                    self.addop(Op::One);
                    self.addop(Op::Sub);
                    self.addop(Op::Zero);
                }
                Token::Comma => {
                    self.addop(Op::One);
                    self.addop(Op::Sub);
                    self.addop(Op::Zero);
                }
                Token::Colon => {
                    self.op_assignment();
                    match self.gettoken() {
                        Token::RightBracket => {
                            self.rescan();
                        }
                        Token::Comma => {}
                        _ => {
                            self.rescan();
                            self.scan_error(Skip::ToSemicolon, "Illegal matrix definition");
                            return;
                        }
                    }
                }
                _ => {
                    self.rescan();
                    self.scan_error(Skip::ToSemicolon, "Illegal matrix definition");
                    return;
                }
            }
        }
    }

    /// Initializer list for a matrix or object: { expr, expr, ... }.
    /// Returns the last element index.
    fn init_list(&mut self) -> i64 {
        let oldmode = self.lx.set_mode(TM_DEFAULT);
        if self.gettoken() != Token::LeftBrace {
            self.scan_error(Skip::ToSemicolon, "Missing left brace for initialization list");
            self.lx.set_mode(oldmode);
            return -1;
        }
        let mut index = 0i64;
        loop {
            match self.gettoken() {
                Token::Comma | Token::Newline => {
                    index += 1;
                    continue;
                }
                Token::RightBrace => {
                    self.lx.set_mode(oldmode);
                    return index;
                }
                Token::LeftBrace => {
                    self.rescan();
                    self.addop(Op::Duplicate);
                    self.addopone(Op::ElemAddr, index);
                    self.init_list();
                }
                _ => {
                    self.rescan();
                    self.op_assignment();
                }
            }
            self.addopone(Op::ElemInit, index);
            match self.gettoken() {
                Token::Comma | Token::Newline => {
                    index += 1;
                    continue;
                }
                Token::RightBrace => {
                    self.lx.set_mode(oldmode);
                    return index;
                }
                _ => {
                    self.scan_error(
                        Skip::ToSemicolon,
                        "Missing right brace for initialization list",
                    );
                    self.lx.set_mode(oldmode);
                    return -1;
                }
            }
        }
    }

    /// obj type { elems }  |  obj type var [= {init}]
    fn obj_declaration(&mut self, symtype: u8) {
        let name = match self.gettoken() {
            Token::Symbol(s) => s,
            _ => {
                self.scan_error(Skip::ToSemicolon, "Object type name missing");
                return;
            }
        };
        if self.gettoken() != Token::LeftBrace {
            self.rescan();
            self.obj_vars(&name, symtype);
            return;
        }
        let oldmode = self.lx.set_mode(TM_DEFAULT);
        let mut elem_ids: Vec<usize> = Vec::new();
        loop {
            match self.gettoken() {
                Token::Symbol(ename) => {
                    let id = self.rt.add_element(&ename);
                    if elem_ids.contains(&id) {
                        self.scan_error(
                            Skip::ToSemicolon,
                            format!("Duplicate element name \"{}\"", ename),
                        );
                        self.lx.set_mode(oldmode);
                        return;
                    }
                    elem_ids.push(id);
                    if self.gettoken() == Token::Comma {
                        continue;
                    }
                    self.rescan();
                    if self.gettoken() != Token::RightBrace {
                        self.scan_error(Skip::ToSemicolon, "Bad object type definition");
                        self.lx.set_mode(oldmode);
                        return;
                    }
                    self.lx.set_mode(oldmode);
                    if self.rt.define_object(&name, elem_ids).is_err() {
                        self.resolve_error(
                            Skip::None,
                            format!("Object type \"{}\" is already defined", name),
                        );
                        return;
                    }
                    self.obj_vars(&name, symtype);
                    return;
                }
                Token::RightBrace => {
                    self.lx.set_mode(oldmode);
                    if self.rt.define_object(&name, elem_ids).is_err() {
                        self.resolve_error(
                            Skip::None,
                            format!("Object type \"{}\" is already defined", name),
                        );
                        return;
                    }
                    self.obj_vars(&name, symtype);
                    return;
                }
                Token::Newline => continue,
                _ => {
                    self.scan_error(Skip::ToSemicolon, "Bad object type definition");
                    self.lx.set_mode(oldmode);
                    return;
                }
            }
        }
    }

    fn obj_vars(&mut self, name: &str, symtype: u8) {
        let index = match self.rt.find_object(name) {
            Some(i) => i,
            None => {
                self.resolve_error(
                    Skip::ToSemicolon,
                    format!("Object {} has not been defined yet", name),
                );
                return;
            }
        };
        loop {
            self.one_obj(index, symtype);
            if symtype == SYM_UNDEFINED {
                return;
            }
            if self.gettoken() != Token::Comma {
                self.rescan();
                return;
            }
            self.addop(Op::Pop);
        }
    }

    fn one_obj(&mut self, index: usize, symtype: u8) {
        match self.gettoken() {
            Token::Symbol(symname) => {
                if symtype == SYM_UNDEFINED {
                    self.rescan();
                    self.id_expr(true, AutoDef::Yes);
                } else {
                    self.define_symbol(&symname, symtype);
                    self.use_symbol(&symname, AutoDef::No);
                }
                self.one_obj(index, symtype);
                self.addop(Op::Assign);
            }
            _ => {
                self.rescan();
                self.addopone(Op::ObjCreate, index as i64);
                while self.gettoken() == Token::Assign {
                    self.init_list();
                }
                self.rescan();
            }
        }
    }

    // -----------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------

    fn condition(&mut self) {
        if self.gettoken() != Token::LeftParen {
            self.scan_error(Skip::ToSemicolon, "Missing left parenthesis for condition");
            return;
        }
        self.expr_list();
        if self.gettoken() != Token::RightParen {
            self.scan_error(Skip::ToSemicolon, "Missing right parenthesis for condition");
        }
    }

    fn expr_list(&mut self) -> u8 {
        let mut kind = self.op_assignment();
        while self.gettoken() == Token::Comma {
            self.addop(Op::Pop);
            kind = self.op_assignment();
        }
        self.rescan();
        kind
    }

    fn assign_op_of(tok: &Token) -> Option<Op> {
        Some(match tok {
            Token::PlusEquals => Op::Add,
            Token::MinusEquals => Op::Sub,
            Token::MultEquals => Op::Mul,
            Token::DivEquals => Op::Div,
            Token::SlashSlashEquals => Op::Quo,
            Token::ModEquals => Op::Mod,
            Token::AndEquals => Op::And,
            Token::OrEquals => Op::Or,
            Token::LshiftEquals => Op::LeftShift,
            Token::RshiftEquals => Op::RightShift,
            Token::PowerEquals => Op::Power,
            Token::HashEquals => Op::HashOp,
            Token::TildeEquals => Op::Xor,
            Token::BackslashEquals => Op::SetMinus,
            _ => return None,
        })
    }

    /// assignment including the op-assign family (x += e, chained).
    fn op_assignment(&mut self) -> u8 {
        let kind = self.assignment();
        let tok = self.gettoken();
        let mut op = match Self::assign_op_of(&tok) {
            Some(op) => op,
            None => {
                self.rescan();
                return kind;
            }
        };
        if is_rvalue(kind) {
            self.scan_error(Skip::None, "Illegal assignment");
            self.op_assignment();
            return EXPR_RVALUE | EXPR_ASSIGN;
        }
        self.write_index_op();
        loop {
            self.addop(Op::Duplicate);
            if self.gettoken() == Token::LeftBrace {
                self.rescan();
                self.addop(Op::DupValue);
                self.init_list();
                while self.gettoken() == Token::Assign {
                    self.init_list();
                }
                self.rescan();
            } else {
                self.rescan();
                self.assignment();
            }
            self.addop(op);
            self.addop(Op::Assign);
            let tok = self.gettoken();
            match Self::assign_op_of(&tok) {
                Some(next) => op = next,
                None => {
                    self.rescan();
                    return EXPR_ASSIGN;
                }
            }
        }
    }

    fn assignment(&mut self) -> u8 {
        match self.gettoken() {
            Token::Comma
            | Token::Semicolon
            | Token::Newline
            | Token::RightParen
            | Token::RightBracket
            | Token::RightBrace
            | Token::Eof => {
                self.addop(Op::Undef);
                self.rescan();
                return EXPR_RVALUE;
            }
            _ => self.rescan(),
        }
        let mut kind = self.alt_cond();
        match self.gettoken() {
            Token::Number(text) => {
                self.emit_number_text(&text, false);
                self.scan_error(Skip::None, "Missing operator");
                return EXPR_RVALUE | EXPR_CONST;
            }
            Token::Imaginary(text) => {
                self.emit_number_text(&text, true);
                self.scan_error(Skip::None, "Missing operator");
                return EXPR_RVALUE | EXPR_CONST;
            }
            Token::Str(_)
            | Token::Symbol(_)
            | Token::OldValue
            | Token::LeftParen
            | Token::PlusPlus
            | Token::MinusMinus
            | Token::Not => {
                self.scan_error(Skip::None, "Missing operator");
                return kind;
            }
            Token::Assign => {}
            _ => {
                self.rescan();
                return kind;
            }
        }
        if is_rvalue(kind) {
            self.scan_error(Skip::ToSemicolon, "Illegal assignment");
            self.assignment();
            return EXPR_RVALUE | EXPR_ASSIGN;
        }
        self.write_index_op();
        if self.gettoken() == Token::LeftBrace {
            self.rescan();
            self.init_list();
            while self.gettoken() == Token::Assign {
                self.init_list();
            }
            self.rescan();
            return EXPR_ASSIGN;
        }
        self.rescan();
        self.assignment();
        self.addop(Op::Assign);
        EXPR_ASSIGN
    }

    /// altcond = orcond [ '?' altcond ':' altcond ]
    fn alt_cond(&mut self) -> u8 {
        let kind = self.or_cond();
        if self.gettoken() != Token::QuestionMark {
            self.rescan();
            return kind;
        }
        let mut donelab = Label::new();
        let mut altlab = Label::new();
        self.addop_label(Op::JumpZ, &mut altlab);
        let mut kind = self.alt_cond();
        if self.gettoken() != Token::Colon {
            self.scan_error(Skip::ToSemicolon, "Missing colon for conditional expression");
            return EXPR_RVALUE;
        }
        self.addop_label(Op::Jump, &mut donelab);
        self.place(&mut altlab);
        kind |= self.alt_cond();
        self.place(&mut donelab);
        kind
    }

    fn or_cond(&mut self) -> u8 {
        let mut donelab = Label::new();
        let mut kind = self.and_cond();
        while self.gettoken() == Token::OrOr {
            self.addop_label(Op::CondOrJump, &mut donelab);
            kind |= self.and_cond();
        }
        self.rescan();
        if donelab.has_refs() {
            self.place(&mut donelab);
        }
        kind
    }

    fn and_cond(&mut self) -> u8 {
        let mut donelab = Label::new();
        let mut kind = self.relation();
        while self.gettoken() == Token::AndAnd {
            self.addop_label(Op::CondAndJump, &mut donelab);
            kind |= self.relation();
        }
        self.rescan();
        if donelab.has_refs() {
            self.place(&mut donelab);
        }
        kind
    }

    fn relation(&mut self) -> u8 {
        let kind = self.sum();
        let op = match self.gettoken() {
            Token::Eq => Op::Eq,
            Token::Ne => Op::Ne,
            Token::Lt => Op::Lt,
            Token::Gt => Op::Gt,
            Token::Le => Op::Le,
            Token::Ge => Op::Ge,
            _ => {
                self.rescan();
                return kind;
            }
        };
        if is_lvalue(kind) {
            self.addop(Op::GetValue);
        }
        self.sum();
        self.addop(op);
        EXPR_RVALUE
    }

    fn sum(&mut self) -> u8 {
        let mut kind = EXPR_RVALUE;
        match self.gettoken() {
            Token::Plus => {
                self.product();
                self.addop(Op::Plus);
            }
            Token::Minus => {
                self.product();
                self.addop(Op::Negate);
            }
            _ => {
                self.rescan();
                kind = self.product();
            }
        }
        loop {
            let op = match self.gettoken() {
                Token::Plus => Op::Add,
                Token::Minus => Op::Sub,
                Token::Hash => Op::HashOp,
                _ => {
                    self.rescan();
                    return kind;
                }
            };
            if is_lvalue(kind) {
                self.addop(Op::GetValue);
            }
            self.product();
            self.addop(op);
            kind = EXPR_RVALUE;
        }
    }

    fn product(&mut self) -> u8 {
        let mut kind = self.or_expr();
        loop {
            let op = match self.gettoken() {
                Token::Mult => Op::Mul,
                Token::Div => Op::Div,
                Token::Mod => Op::Mod,
                Token::SlashSlash => Op::Quo,
                _ => {
                    self.rescan();
                    return kind;
                }
            };
            if is_lvalue(kind) {
                self.addop(Op::GetValue);
            }
            self.or_expr();
            self.addop(op);
            kind = EXPR_RVALUE;
        }
    }

    fn or_expr(&mut self) -> u8 {
        let mut kind = self.and_expr();
        while self.gettoken() == Token::Or {
            if is_lvalue(kind) {
                self.addop(Op::GetValue);
            }
            self.and_expr();
            self.addop(Op::Or);
            kind = EXPR_RVALUE;
        }
        self.rescan();
        kind
    }

    fn and_expr(&mut self) -> u8 {
        let mut kind = self.shift_expr();
        loop {
            let op = match self.gettoken() {
                Token::And => Op::And,
                Token::Tilde => Op::Xor,
                Token::Backslash => Op::SetMinus,
                _ => {
                    self.rescan();
                    return kind;
                }
            };
            if is_lvalue(kind) {
                self.addop(Op::GetValue);
            }
            self.shift_expr();
            self.addop(op);
            kind = EXPR_RVALUE;
        }
    }

    /// Unary prefixes and the right-associative power/shift tier.
    fn shift_expr(&mut self) -> u8 {
        let unary = match self.gettoken() {
            Token::Plus => Some(Op::Plus),
            Token::Minus => Some(Op::Negate),
            Token::Not => Some(Op::Not),
            Token::Div => Some(Op::Invert),
            Token::Backslash => Some(Op::BackSlash),
            Token::Tilde => Some(Op::Comp),
            Token::Hash => Some(Op::Content),
            _ => None,
        };
        if let Some(op) = unary {
            self.shift_expr();
            self.addop(op);
            return EXPR_RVALUE;
        }
        self.rescan();
        let kind = self.reference();
        let op = match self.gettoken() {
            Token::Power => Op::Power,
            Token::LeftShift => Op::LeftShift,
            Token::RightShift => Op::RightShift,
            _ => {
                self.rescan();
                return kind;
            }
        };
        if is_lvalue(kind) {
            self.addop(Op::GetValue);
        }
        self.shift_expr();
        self.addop(op);
        EXPR_RVALUE
    }

    /// Address-of and dereference prefixes.
    fn reference(&mut self) -> u8 {
        match self.gettoken() {
            Token::AndAnd => {
                self.scan_error(Skip::None, "&& used as prefix operator");
                self.reference();
                self.addop(Op::Ptr);
                EXPR_RVALUE
            }
            Token::And => {
                self.reference();
                self.addop(Op::Ptr);
                EXPR_RVALUE
            }
            Token::Mult => {
                self.reference();
                self.addop(Op::Deref);
                0
            }
            Token::Power => {
                self.reference();
                self.addop(Op::Deref);
                self.addop(Op::Deref);
                0
            }
            _ => {
                self.rescan();
                self.inc_dec_expr()
            }
        }
    }

    fn inc_dec_expr(&mut self) -> u8 {
        let mut kind = self.term();
        let mut tok = self.gettoken();
        if tok == Token::PlusPlus || tok == Token::MinusMinus {
            if is_rvalue(kind) {
                self.scan_error(Skip::None, "Bad ++ usage");
            }
            self.write_index_op();
            if tok == Token::PlusPlus {
                self.addop(Op::PostInc);
            } else {
                self.addop(Op::PostDec);
            }
            loop {
                tok = self.gettoken();
                match tok {
                    Token::PlusPlus => {
                        self.addop(Op::PreInc);
                        continue;
                    }
                    Token::MinusMinus => {
                        self.addop(Op::PreDec);
                        continue;
                    }
                    _ => {
                        self.addop(Op::Pop);
                        break;
                    }
                }
            }
            kind = EXPR_RVALUE | EXPR_ASSIGN;
        }
        if tok == Token::Not {
            // postfix factorial
            if let Some(idx) = intrinsics::lookup("fact") {
                self.addoptwo(Op::Call, idx as i64, 1);
            }
            tok = self.gettoken();
            kind = EXPR_RVALUE;
        }
        let _ = tok;
        self.rescan();
        kind
    }

    fn term(&mut self) -> u8 {
        let mut kind: u8;
        match self.gettoken() {
            Token::Number(text) => {
                self.emit_number_text(&text, false);
                return EXPR_RVALUE | EXPR_CONST;
            }
            Token::Imaginary(text) => {
                self.emit_number_text(&text, true);
                return EXPR_RVALUE | EXPR_CONST;
            }
            Token::OldValue => {
                self.addop(Op::OldValue);
                kind = 0;
            }
            Token::Str(s) => {
                let idx = self.rt.intern_string(&s);
                self.addopone(Op::StringLit, idx as i64);
                return EXPR_RVALUE;
            }
            Token::PlusPlus => {
                if is_rvalue(self.term()) {
                    self.scan_error(Skip::None, "Bad ++ usage");
                }
                self.write_index_op();
                self.addop(Op::PreInc);
                return EXPR_ASSIGN;
            }
            Token::MinusMinus => {
                if is_rvalue(self.term()) {
                    self.scan_error(Skip::None, "Bad -- usage");
                }
                self.write_index_op();
                self.addop(Op::PreDec);
                return EXPR_ASSIGN;
            }
            Token::LeftParen => {
                let oldmode = self.lx.set_mode(TM_DEFAULT);
                kind = self.expr_list();
                if self.gettoken() != Token::RightParen {
                    self.scan_error(Skip::ToSemicolon, "Missing right parenthesis");
                }
                self.lx.set_mode(oldmode);
            }
            Token::Mat => {
                self.one_matrix(SYM_UNDEFINED);
                kind = EXPR_ASSIGN;
            }
            Token::Obj => {
                self.obj_declaration(SYM_UNDEFINED);
                kind = EXPR_ASSIGN;
            }
            Token::Symbol(_) => {
                self.rescan();
                kind = self.id_expr(true, AutoDef::No);
            }
            Token::Mult => {
                self.term();
                self.addop(Op::Deref);
                kind = 0;
            }
            Token::Power => {
                self.term();
                self.addop(Op::Deref);
                self.addop(Op::Deref);
                kind = 0;
            }
            Token::Global => {
                if !matches!(self.gettoken(), Token::Symbol(_)) {
                    self.scan_error(Skip::None, "No identifier after global specifier");
                    return 0;
                }
                self.rescan();
                kind = self.id_expr(true, AutoDef::Global);
            }
            Token::Local => {
                if !matches!(self.gettoken(), Token::Symbol(_)) {
                    self.scan_error(Skip::None, "No identifier after local specifier");
                    return 0;
                }
                self.rescan();
                kind = self.id_expr(true, AutoDef::Local);
            }
            Token::Static => {
                if !matches!(self.gettoken(), Token::Symbol(_)) {
                    self.scan_error(Skip::None, "No identifier after static specifier");
                    return 0;
                }
                self.rescan();
                kind = self.id_expr(true, AutoDef::Static);
            }
            Token::LeftBracket => {
                self.scan_error(Skip::None, "Left bracket with no preceding lvalue");
                return 0;
            }
            Token::Period => {
                self.scan_error(Skip::None, "Period with no preceding lvalue");
                return 0;
            }
            tok if tok.is_keyword() => {
                self.scan_error(Skip::None, "Expression contains reserved keyword");
                return 0;
            }
            _ => {
                self.rescan();
                self.scan_error(Skip::ToComma, "Missing expression");
                return 0;
            }
        }
        if kind == 0 {
            loop {
                match self.gettoken() {
                    Token::LeftBracket => {
                        self.rescan();
                        self.mat_args();
                        kind = 0;
                    }
                    Token::Period => {
                        self.element();
                        kind = 0;
                    }
                    Token::LeftParen => {
                        self.scan_error(Skip::None, "Function calls not allowed as expressions");
                        self.rescan();
                        return kind;
                    }
                    _ => {
                        self.rescan();
                        return kind;
                    }
                }
            }
        }
        kind
    }

    /// Identifier expression: call, or variable with element references.
    fn id_expr(&mut self, okmat: bool, autodef: AutoDef) -> u8 {
        let name = match self.get_id() {
            Some(n) => n,
            None => return 0,
        };
        match self.gettoken() {
            Token::LeftParen => {
                let oldmode = self.lx.set_mode(TM_DEFAULT);
                self.call_args(&name);
                self.lx.set_mode(oldmode);
            }
            Token::Assign => {
                let autodef = match autodef {
                    AutoDef::Global | AutoDef::Local | AutoDef::Static => autodef,
                    _ => AutoDef::Yes,
                };
                self.rescan();
                self.use_symbol(&name, autodef);
            }
            _ => {
                self.rescan();
                self.use_symbol(&name, autodef);
            }
        }
        loop {
            match self.gettoken() {
                Token::LeftBracket => {
                    self.rescan();
                    if !okmat {
                        return 0;
                    }
                    self.mat_args();
                }
                Token::Arrow => {
                    self.addop(Op::Deref);
                    self.element();
                }
                Token::Period => {
                    self.element();
                }
                Token::LeftParen => {
                    self.scan_error(Skip::None, "Function calls not allowed as expressions");
                    self.rescan();
                    return 0;
                }
                _ => {
                    self.rescan();
                    return 0;
                }
            }
        }
    }

    /// Square-bracket matrix indexing, including the fast form [[k]].
    fn mat_args(&mut self) {
        if self.gettoken() != Token::LeftBracket {
            self.scan_error(Skip::None, "Matrix indexing expected");
            return;
        }
        if self.gettoken() == Token::LeftBracket {
            self.op_assignment();
            if self.gettoken() != Token::RightBracket || self.gettoken() != Token::RightBracket {
                self.scan_error(Skip::None, "Bad fast index usage");
                return;
            }
            self.addop(Op::FiAddr);
            return;
        }
        self.rescan();
        let mut dim = 0i64;
        if self.gettoken() == Token::RightBracket {
            self.addoptwo(Op::IndexAddr, dim, 0);
            return;
        }
        self.rescan();
        loop {
            dim += 1;
            self.op_assignment();
            match self.gettoken() {
                Token::RightBracket => {
                    self.addoptwo(Op::IndexAddr, dim, 0);
                    return;
                }
                Token::Comma => {}
                _ => {
                    self.rescan();
                    self.scan_error(Skip::None, "Missing right bracket in array reference");
                    return;
                }
            }
        }
    }

    /// Object element access: the period has been read.
    fn element(&mut self) {
        let name = match self.get_id() {
            Some(n) => n,
            None => return,
        };
        match self.rt.find_element(&name) {
            Some(id) => self.addopone(Op::ElemAddr, id as i64),
            None => {
                self.resolve_error(Skip::None, format!("Element \"{}\" is undefined", name));
            }
        }
    }

    fn get_id(&mut self) -> Option<Rc<str>> {
        match self.gettoken() {
            Token::Symbol(s) => Some(s),
            tok if tok.is_keyword() => {
                self.scan_error(Skip::None, "Reserved keyword used as symbol name");
                None
            }
            _ => {
                self.rescan();
                self.scan_error(Skip::None, "Symbol name expected");
                None
            }
        }
    }

    // -----------------------------------------------------------------
    // Symbols
    // -----------------------------------------------------------------

    fn symbol_type(&self, name: &str) -> u8 {
        if self.params.find(name).is_some() {
            return SYM_PARAM;
        }
        if self.locals.find(name).is_some() {
            return SYM_LOCAL;
        }
        self.rt.symbols.symbol_type(name)
    }

    fn define_symbol(&mut self, name: &str, symtype: u8) {
        match self.symbol_type(name) {
            SYM_STATIC => {
                if symtype == SYM_GLOBAL || symtype == SYM_STATIC {
                    self.rt.symbols.end_scope(name, symtype == SYM_GLOBAL);
                }
            }
            SYM_GLOBAL => {
                if symtype == SYM_GLOBAL && self.rt.conf.redecl_warn {
                    self.warn(&format!("redeclaration of global \"{}\"", name));
                    return;
                }
            }
            SYM_LOCAL => {
                if symtype == SYM_LOCAL && self.rt.conf.redecl_warn {
                    self.warn(&format!("redeclaration of local \"{}\"", name));
                    return;
                }
                if self.rt.conf.dupvar_warn {
                    if symtype == SYM_GLOBAL {
                        self.warn(&format!("both local and global \"{}\" defined", name));
                    } else {
                        self.warn(&format!("both local and static \"{}\" defined", name));
                    }
                }
            }
            SYM_PARAM => {
                if self.rt.conf.dupvar_warn {
                    match symtype {
                        SYM_LOCAL => {
                            self.warn(&format!("both local and parameter \"{}\" defined", name))
                        }
                        SYM_GLOBAL => {
                            self.warn(&format!("both global and parameter \"{}\" defined", name))
                        }
                        _ => {
                            self.warn(&format!("both static and parameter \"{}\" defined", name))
                        }
                    }
                }
            }
            _ => {}
        }
        if symtype == SYM_LOCAL {
            self.locals.add(name);
        } else {
            self.rt.symbols.add_global(name, symtype == SYM_STATIC);
        }
    }

    /// Emit the address of a known symbol, possibly auto-defining it.
    fn use_symbol(&mut self, name: &str, autodef: AutoDef) {
        let typ = self.symbol_type(name);
        match autodef {
            AutoDef::Global => {
                if typ == SYM_GLOBAL {
                    self.warn("Unnecessary global specifier");
                }
                let id = self.rt.symbols.add_global(name, false);
                self.addopone(Op::GlobalAddr, id as i64);
                return;
            }
            AutoDef::Static => {
                let id = self.rt.symbols.add_global(name, true);
                self.addopone(Op::GlobalAddr, id as i64);
                return;
            }
            AutoDef::Local => {
                if typ == SYM_LOCAL {
                    self.warn("Unnecessary local specifier");
                }
                let slot = self.locals.add(name);
                self.addopone(Op::LocalAddr, slot as i64);
                return;
            }
            AutoDef::Yes | AutoDef::No => {}
        }
        match typ {
            SYM_LOCAL => {
                let slot = self.locals.find(name).unwrap();
                self.addopone(Op::LocalAddr, slot as i64);
            }
            SYM_PARAM => {
                let slot = self.params.find(name).unwrap();
                self.addopone(Op::ParamAddr, slot as i64);
            }
            SYM_GLOBAL | SYM_STATIC => {
                let id = self.rt.symbols.find_global(name).unwrap();
                self.addopone(Op::GlobalAddr, id as i64);
            }
            _ => {
                // undefined: top-level anonymous code may auto-define
                if !self.func.is_anonymous() || autodef == AutoDef::No {
                    self.resolve_error(Skip::None, format!("\"{}\" is undefined", name));
                    return;
                }
                let id = self.rt.symbols.add_global(name, false);
                self.addopone(Op::GlobalAddr, id as i64);
            }
        }
    }

    // -----------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------

    /// Arguments for a call; the name and '(' have been consumed.
    fn call_args(&mut self, name: &str) {
        let builtin = intrinsics::lookup(name);
        let (op, index) = match builtin {
            Some(i) => (Op::Call, i),
            None => (Op::UserCall, self.rt.functions.index_of(name)),
        };
        // param(n) reads the caller's nth argument directly
        if name == "param" {
            if self.gettoken() == Token::RightParen {
                self.scan_error(Skip::None, "param() requires an index");
                return;
            }
            self.rescan();
            self.op_assignment();
            if self.gettoken() != Token::RightParen {
                self.scan_error(Skip::ToSemicolon, "Missing right parenthesis in function call");
                return;
            }
            self.addopone(Op::ArgValue, 0);
            return;
        }
        if self.gettoken() == Token::RightParen {
            self.emit_call(op, index, 0);
            return;
        }
        self.rescan();
        let mut argcount = 0i64;
        loop {
            argcount += 1;
            if self.gettoken() == Token::RightParen {
                // trailing omitted argument
                self.addop(Op::Undef);
                self.emit_call(op, index, argcount);
                return;
            }
            self.rescan();
            if self.gettoken() == Token::Comma {
                // omitted argument
                self.addop(Op::Undef);
                continue;
            }
            self.rescan();
            let addrflag = self.gettoken() == Token::BackQuote;
            if !addrflag {
                self.rescan();
            }
            self.op_assignment();
            if addrflag {
                self.write_index_op();
            }
            if !addrflag && op != Op::Call {
                self.addop(Op::GetValue);
            }
            match self.gettoken() {
                Token::RightParen => {
                    self.emit_call(op, index, argcount);
                    return;
                }
                Token::Comma => {}
                _ => {
                    self.scan_error(Skip::ToSemicolon, "Missing right parenthesis in function call");
                    return;
                }
            }
        }
    }

    /// Emit a finished call. Builtins carrying a dedicated opcode (the
    /// predicate family, config and epsilon access) compile to that
    /// opcode instead of a CALL.
    fn emit_call(&mut self, op: Op, index: usize, argcount: i64) {
        if op != Op::Call {
            self.addoptwo(op, index as i64, argcount);
            return;
        }
        self.builtin_check(index, argcount as usize);
        let b = intrinsics::builtin(index);
        match b.name {
            "config" => {
                self.addop(if argcount <= 1 {
                    Op::GetConfig
                } else {
                    Op::SetConfig
                });
                return;
            }
            "epsilon" => {
                self.addop(if argcount == 0 {
                    Op::GetEpsilon
                } else {
                    Op::SetEpsilon
                });
                return;
            }
            _ => {}
        }
        if let intrinsics::BuiltinImpl::Opcode(direct) = &b.imp {
            if b.min_args == b.max_args && argcount as usize == b.min_args {
                self.addop(*direct);
                return;
            }
        }
        self.addoptwo(Op::Call, index as i64, argcount);
    }

    fn builtin_check(&mut self, index: usize, argcount: usize) {
        if let Err(msg) = intrinsics::check_arity(index, argcount) {
            self.record(ScanError::Resolve(msg));
        }
    }
}

/// Binary opcodes whose two-constant forms fold at compile time.
fn fold_op(op: Op) -> Option<NumOp> {
    Some(match op {
        Op::Add => NumOp::Add,
        Op::Sub => NumOp::Sub,
        Op::Mul => NumOp::Mul,
        Op::Div => NumOp::Div,
        Op::Quo => NumOp::Quo,
        Op::Mod => NumOp::Mod,
        Op::Power => NumOp::Power,
        _ => return None,
    })
}
