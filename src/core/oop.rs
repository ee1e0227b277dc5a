/// User-defined object types and the operator dispatch table.
///
/// An object type is a name plus a fixed ordered set of element names.
/// Each overloadable operator maps to a user function named
/// `<type>_<op>` (for example `point_add`). The first dispatch of an
/// operator caches the resolved function index in the type descriptor;
/// absent methods fall back to the per-operator action listed in OBJ_OPS.
/// The executor owns the actual calls (vm.rs), this module owns the data.

use crate::core::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct ObjValue {
    pub ty: Rc<ObjectType>,
    pub elems: Vec<Value>,
}

/// Cached method slot: the interned function-table index of
/// `<type>_<op>`, filled in on first dispatch. Whether a definition
/// currently exists at that index is checked per call.
pub type MethodSlot = Option<usize>;

#[derive(Debug)]
pub struct ObjectType {
    pub id: usize,
    pub name: Rc<str>,
    /// Global element-name ids in declaration order.
    pub elements: Vec<usize>,
    pub methods: RefCell<Vec<MethodSlot>>,
}

impl ObjectType {
    pub fn new(id: usize, name: Rc<str>, elements: Vec<usize>) -> Self {
        ObjectType {
            id,
            name,
            elements,
            methods: RefCell::new(vec![None; OBJ_OPS.len()]),
        }
    }

    /// Position of a global element id within this type, if present.
    pub fn element_pos(&self, elem_id: usize) -> Option<usize> {
        self.elements.iter().position(|&e| e == elem_id)
    }
}

/// What kind of value an operator routine must return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetKind {
    Value,
    Int,
    None,
}

/// Action taken when the user routine is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Error: the operation is undefined for the type.
    None,
    /// Render `obj type {elem, elem, ...}`.
    Print,
    /// Componentwise equality.
    Cmp,
    /// OR of element truth values.
    Test,
    /// Square-and-multiply over the type's mul/square/inv methods.
    Pow,
    /// The rational 1.
    One,
    /// Add 1 via the add method.
    Inc,
    /// Subtract 1 via the sub method.
    Dec,
    /// Multiply by itself via the mul method.
    Square,
    /// Plain copy of the value.
    Value,
    /// Plain assignment.
    Assign,
}

pub struct ObjOp {
    pub name: &'static str,
    pub args: u8,
    pub ret: RetKind,
    pub fallback: Fallback,
}

// Operator indices into OBJ_OPS and ObjectType::methods.
pub const OBJ_PRINT: usize = 0;
pub const OBJ_ONE: usize = 1;
pub const OBJ_TEST: usize = 2;
pub const OBJ_ADD: usize = 3;
pub const OBJ_SUB: usize = 4;
pub const OBJ_NEG: usize = 5;
pub const OBJ_MUL: usize = 6;
pub const OBJ_DIV: usize = 7;
pub const OBJ_INV: usize = 8;
pub const OBJ_ABS: usize = 9;
pub const OBJ_NORM: usize = 10;
pub const OBJ_CONJ: usize = 11;
pub const OBJ_POW: usize = 12;
pub const OBJ_SGN: usize = 13;
pub const OBJ_CMP: usize = 14;
pub const OBJ_REL: usize = 15;
pub const OBJ_QUO: usize = 16;
pub const OBJ_MOD: usize = 17;
pub const OBJ_INT: usize = 18;
pub const OBJ_FRAC: usize = 19;
pub const OBJ_INC: usize = 20;
pub const OBJ_DEC: usize = 21;
pub const OBJ_SQUARE: usize = 22;
pub const OBJ_SCALE: usize = 23;
pub const OBJ_SHIFT: usize = 24;
pub const OBJ_ROUND: usize = 25;
pub const OBJ_BROUND: usize = 26;
pub const OBJ_ROOT: usize = 27;
pub const OBJ_SQRT: usize = 28;
pub const OBJ_OR: usize = 29;
pub const OBJ_AND: usize = 30;
pub const OBJ_NOT: usize = 31;
pub const OBJ_FACT: usize = 32;
pub const OBJ_MIN: usize = 33;
pub const OBJ_MAX: usize = 34;
pub const OBJ_SUM: usize = 35;
pub const OBJ_ASSIGN: usize = 36;
pub const OBJ_XOR: usize = 37;
pub const OBJ_COMP: usize = 38;
pub const OBJ_CONTENT: usize = 39;
pub const OBJ_HASHOP: usize = 40;
pub const OBJ_BACKSLASH: usize = 41;
pub const OBJ_SETMINUS: usize = 42;
pub const OBJ_PLUS: usize = 43;

pub const OBJ_OPS: &[ObjOp] = &[
    ObjOp { name: "print", args: 1, ret: RetKind::None, fallback: Fallback::Print },
    ObjOp { name: "one", args: 1, ret: RetKind::Value, fallback: Fallback::One },
    ObjOp { name: "test", args: 1, ret: RetKind::Int, fallback: Fallback::Test },
    ObjOp { name: "add", args: 2, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "sub", args: 2, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "neg", args: 1, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "mul", args: 2, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "div", args: 2, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "inv", args: 1, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "abs", args: 2, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "norm", args: 1, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "conj", args: 1, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "pow", args: 2, ret: RetKind::Value, fallback: Fallback::Pow },
    ObjOp { name: "sgn", args: 1, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "cmp", args: 2, ret: RetKind::Int, fallback: Fallback::Cmp },
    ObjOp { name: "rel", args: 2, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "quo", args: 3, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "mod", args: 3, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "int", args: 1, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "frac", args: 1, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "inc", args: 1, ret: RetKind::Value, fallback: Fallback::Inc },
    ObjOp { name: "dec", args: 1, ret: RetKind::Value, fallback: Fallback::Dec },
    ObjOp { name: "square", args: 1, ret: RetKind::Value, fallback: Fallback::Square },
    ObjOp { name: "scale", args: 2, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "shift", args: 2, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "round", args: 3, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "bround", args: 3, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "root", args: 3, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "sqrt", args: 3, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "or", args: 2, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "and", args: 2, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "not", args: 1, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "fact", args: 1, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "min", args: 1, ret: RetKind::Value, fallback: Fallback::Value },
    ObjOp { name: "max", args: 1, ret: RetKind::Value, fallback: Fallback::Value },
    ObjOp { name: "sum", args: 1, ret: RetKind::Value, fallback: Fallback::Value },
    ObjOp { name: "assign", args: 2, ret: RetKind::None, fallback: Fallback::Assign },
    ObjOp { name: "xor", args: 2, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "comp", args: 1, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "content", args: 1, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "hashop", args: 2, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "backslash", args: 1, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "setminus", args: 2, ret: RetKind::Value, fallback: Fallback::None },
    ObjOp { name: "plus", args: 1, ret: RetKind::Value, fallback: Fallback::None },
];
