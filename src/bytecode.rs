/// Opcode set, compiled functions, and the function store.
///
/// A compiled function is a flat `Vec<i64>`: one word per opcode, with
/// operand words inlined immediately after. Pointer-sized operands
/// (global ids) occupy PTR_SIZE words; label operands are absolute word
/// offsets from the function start. There are no alignment gaps, so the
/// emitter and executor agree on layout by construction.

use crate::core::value::Value;
use crate::symbol::NameList;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::rc::Rc;

/// Words occupied by a pointer-sized operand.
pub const PTR_SIZE: usize = 1;

/// Opcodes. The discriminants are contiguous from zero; OP_MAX guards
/// decoding of words back into opcodes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Nop = 0,
    LocalAddr,
    GlobalAddr,
    ParamAddr,
    LocalValue,
    GlobalValue,
    ParamValue,
    Number,
    IndexAddr,
    PrintResult,
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Save,
    Negate,
    Invert,
    IntPart,
    FracPart,
    Numerator,
    Denominator,
    Duplicate,
    Pop,
    Return,
    JumpZ,
    JumpNz,
    Jump,
    UserCall,
    GetValue,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
    Debug,
    Print,
    AssignPop,
    Zero,
    One,
    PrintEol,
    PrintSpace,
    PrintString,
    DupValue,
    OldValue,
    Quo,
    Power,
    Quit,
    Call,
    GetEpsilon,
    And,
    Or,
    Not,
    Abs,
    Sgn,
    IsInt,
    CondOrJump,
    CondAndJump,
    Square,
    StringLit,
    IsNum,
    Undef,
    IsNull,
    ArgValue,
    MatCreate,
    IsMat,
    IsStr,
    GetConfig,
    LeftShift,
    RightShift,
    CaseJump,
    IsOdd,
    IsEven,
    FiAddr,
    FiValue,
    IsReal,
    Imaginary,
    Re,
    Im,
    Conjugate,
    ObjCreate,
    IsObj,
    Norm,
    ElemAddr,
    ElemValue,
    IsType,
    Scale,
    IsList,
    Swap,
    IsSimple,
    Cmp,
    SetConfig,
    SetEpsilon,
    IsFile,
    IsAssoc,
    InitStatic,
    ElemInit,
    IsConfig,
    IsHash,
    IsRand,
    IsRandom,
    Show,
    InitFill,
    AssignBack,
    Test,
    IsDefined,
    IsObjType,
    IsBlk,
    Ptr,
    Deref,
    IsOctet,
    IsPtr,
    SaveVal,
    Links,
    Bit,
    Comp,
    Xor,
    HighBit,
    LowBit,
    Content,
    HashOp,
    BackSlash,
    SetMinus,
    Plus,
    JumpNn,
    Abort,
}

pub const OP_MAX: i64 = Op::Abort as i64;

impl Op {
    /// Decode an opcode word. Words outside the opcode range yield None;
    /// the executor treats that as a corrupted stream.
    pub fn from_word(w: i64) -> Option<Op> {
        if (0..=OP_MAX).contains(&w) {
            // discriminants are contiguous from zero
            Some(unsafe { std::mem::transmute::<u8, Op>(w as u8) })
        } else {
            None
        }
    }

    /// Total words this opcode occupies, operands included.
    pub fn width(self) -> usize {
        use Op::*;
        match self {
            GlobalAddr | GlobalValue => 1 + PTR_SIZE,
            LocalAddr | LocalValue | ParamAddr | ParamValue | Number | Imaginary
            | StringLit | PrintString | ArgValue | MatCreate | ObjCreate | ElemAddr
            | ElemValue | ElemInit | Show | Debug | Quit | Abort | Jump | JumpZ | JumpNz
            | JumpNn | CondOrJump | CondAndJump | CaseJump | InitStatic | Print => 2,
            IndexAddr | UserCall | Call => 3,
            _ => 1,
        }
    }

    /// Whether this opcode's final operand is a jump target.
    pub fn is_jump(self) -> bool {
        use Op::*;
        matches!(
            self,
            Jump | JumpZ | JumpNz | JumpNn | CondOrJump | CondAndJump | CaseJump | InitStatic
        )
    }
}

// ---------------------------------------------------------------------------
// Compiled functions
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Function {
    pub name: Rc<str>,
    pub param_count: usize,
    pub local_count: usize,
    pub opcodes: Vec<i64>,
    /// Last top-level expression value, written by SAVE.
    pub saved: RefCell<Value>,
    /// INITSTATIC sites that have already run once.
    pub static_done: RefCell<HashSet<usize>>,
    pub param_names: NameList,
    pub local_names: NameList,
}

impl Function {
    pub fn new(name: Rc<str>) -> Self {
        Function {
            name,
            param_count: 0,
            local_count: 0,
            opcodes: Vec::new(),
            saved: RefCell::new(Value::null()),
            static_done: RefCell::new(HashSet::new()),
            param_names: NameList::default(),
            local_names: NameList::default(),
        }
    }

    /// Anonymous top-level evaluation functions get a reserved prefix
    /// that suppresses tracing and enables result printing.
    pub fn is_anonymous(&self) -> bool {
        self.name.starts_with('*')
    }

    /// Render the opcode stream one opcode per line.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}: {} param(s), {} local(s), {} word(s)",
            self.name,
            self.param_count,
            self.local_count,
            self.opcodes.len()
        );
        let mut pc = 0usize;
        while pc < self.opcodes.len() {
            let op = match Op::from_word(self.opcodes[pc]) {
                Some(op) => op,
                None => {
                    let _ = writeln!(out, "{:5}: ??? {}", pc, self.opcodes[pc]);
                    pc += 1;
                    continue;
                }
            };
            let width = op.width();
            let args = &self.opcodes[pc + 1..pc + width];
            match args.len() {
                0 => {
                    let _ = writeln!(out, "{:5}: {:?}", pc, op);
                }
                1 => {
                    let _ = writeln!(out, "{:5}: {:?} {}", pc, op, args[0]);
                }
                _ => {
                    let _ = writeln!(out, "{:5}: {:?} {} {}", pc, op, args[0], args[1]);
                }
            }
            pc += width;
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Function store
// ---------------------------------------------------------------------------

/// Named user functions. Names intern to stable small indices; the entry
/// at an index is the current definition or empty. Committing replaces
/// any previous definition.
#[derive(Debug, Default)]
pub struct FunctionTable {
    names: Vec<Rc<str>>,
    index: HashMap<Rc<str>, usize>,
    funcs: Vec<Option<Rc<Function>>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        FunctionTable::default()
    }

    /// Intern a function name, returning its stable index.
    pub fn index_of(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let name: Rc<str> = Rc::from(name);
        let i = self.names.len();
        self.names.push(name.clone());
        self.index.insert(name, i);
        self.funcs.push(None);
        i
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn name(&self, index: usize) -> &str {
        &self.names[index]
    }

    pub fn get(&self, index: usize) -> Option<Rc<Function>> {
        self.funcs.get(index).and_then(|f| f.clone())
    }

    pub fn get_by_name(&self, name: &str) -> Option<Rc<Function>> {
        self.lookup(name).and_then(|i| self.get(i))
    }

    /// Install a finished function, replacing any previous definition.
    pub fn commit(&mut self, index: usize, f: Function) {
        self.funcs[index] = Some(Rc::new(f));
    }

    /// Remove one user function definition by name.
    pub fn undefine(&mut self, name: &str) -> bool {
        match self.lookup(name) {
            Some(i) if self.funcs[i].is_some() => {
                self.funcs[i] = None;
                true
            }
            _ => false,
        }
    }

    /// Remove every user function definition.
    pub fn undefine_all(&mut self) {
        for f in self.funcs.iter_mut() {
            *f = None;
        }
    }

    pub fn count(&self) -> usize {
        self.funcs.iter().filter(|f| f.is_some()).count()
    }

    /// Listing for `show functions`.
    pub fn show(&self) -> String {
        let mut out = String::from("Name    Arguments\n----    ---------\n");
        for f in self.funcs.iter().flatten() {
            if f.is_anonymous() {
                continue;
            }
            let mut params = String::new();
            for i in 0..f.param_count {
                if i > 0 {
                    params.push_str(", ");
                }
                params.push_str(f.param_names.name(i).unwrap_or("?"));
            }
            let _ = writeln!(out, "{}({})", f.name, params);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_words_round_trip() {
        assert_eq!(Op::from_word(0), Some(Op::Nop));
        assert_eq!(Op::from_word(OP_MAX), Some(Op::Abort));
        assert_eq!(Op::from_word(OP_MAX + 1), None);
        assert_eq!(Op::from_word(-1), None);
    }

    #[test]
    fn widths_cover_operands() {
        assert_eq!(Op::Add.width(), 1);
        assert_eq!(Op::Number.width(), 2);
        assert_eq!(Op::GlobalAddr.width(), 1 + PTR_SIZE);
        assert_eq!(Op::IndexAddr.width(), 3);
        assert_eq!(Op::UserCall.width(), 3);
    }

    #[test]
    fn function_names_intern_to_stable_indices() {
        let mut t = FunctionTable::new();
        let a = t.index_of("f");
        let b = t.index_of("g");
        assert_eq!(t.index_of("f"), a);
        assert_ne!(a, b);
        assert!(t.get(a).is_none());
        t.commit(a, Function::new(Rc::from("f")));
        assert!(t.get(a).is_some());
        assert!(t.undefine("f"));
        assert!(!t.undefine("f"));
    }
}
