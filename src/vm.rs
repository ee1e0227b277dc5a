/// The opcode executor: a stack machine over one value stack.
///
/// Stack slots hold either a value or an address. Addresses are
/// scope-relative descriptors (absolute stack slot for locals and
/// parameters, id for globals) plus an element-descent path, never raw
/// pointers. GETVALUE projects an address to a value; the assignment
/// family resolves it to a storage location and writes through it,
/// cloning shared aggregates first so aliases are never disturbed.
///
/// Calls recurse through `run_function`: the callee's parameters are the
/// argument slots (padded with undefined values up to the parameter
/// count), locals sit above them, and RETURN truncates the frame away.

use crate::bytecode::{Function, Op};
use crate::core::number::{Complex, Number};
use crate::core::oop::{
    Fallback as Fb, ObjValue, ObjectType, RetKind, OBJ_ADD, OBJ_ASSIGN, OBJ_CMP, OBJ_DEC,
    OBJ_INC, OBJ_INV, OBJ_MUL, OBJ_ONE, OBJ_OPS, OBJ_POW, OBJ_PRINT, OBJ_REL, OBJ_SQUARE,
    OBJ_SUB, OBJ_TEST,
};
use crate::core::matrix::{MatDim, Matrix};
use crate::core::value::{
    binary_op, cmp_values, unary_op, values_equal, Addr, Base, Kind, NumOp, PtrKind, PtrVal,
    Step, UnaryOp, Value, SUB_PROTECT,
};
use crate::errors::ExecError;
use crate::intrinsics;
use crate::runtime::{AbortLevel, Runtime};
use std::rc::Rc;

const MAX_CALL_DEPTH: usize = 500;

#[derive(Debug, Clone)]
pub enum Slot {
    Val(Value),
    Addr(Addr),
}

pub struct Vm<'a> {
    pub rt: &'a mut Runtime,
    stack: Vec<Slot>,
    depth: usize,
    /// Source line of the DEBUG opcode most recently executed.
    pub line: i64,
}

impl<'a> Vm<'a> {
    pub fn new(rt: &'a mut Runtime) -> Self {
        Vm {
            rt,
            stack: Vec::new(),
            depth: 0,
            line: 0,
        }
    }

    // -----------------------------------------------------------------
    // Address plumbing
    // -----------------------------------------------------------------

    /// Project an address to the value stored there.
    pub fn read_addr(&self, addr: &Addr) -> Result<Value, ExecError> {
        let mut cur = match &addr.base {
            Base::Global(id) => self.rt.symbols.get(*id).value.clone(),
            Base::Stack(i) => match self.stack.get(*i) {
                Some(Slot::Val(v)) => v.clone(),
                Some(Slot::Addr(inner)) => self.read_addr(&inner.clone())?,
                None => return Err(ExecError::typ("address outlived its frame")),
            },
        };
        for step in &addr.path {
            cur = Self::project_step(&cur, step)?;
        }
        Ok(cur)
    }

    fn project_step(cur: &Value, step: &Step) -> Result<Value, ExecError> {
        match (&cur.kind, step) {
            (Kind::Mat(m), Step::Mat(keys)) => {
                let off = m.offset(keys)?;
                Ok(m.elems[off].clone())
            }
            (Kind::Mat(m), Step::Fast(k)) => {
                let off = m.fast_offset(*k)?;
                Ok(m.elems[off].clone())
            }
            (Kind::Mat(m), Step::Elem(i)) => m
                .elems
                .get(*i)
                .cloned()
                .ok_or_else(|| ExecError::domain("matrix element out of range")),
            (Kind::Assoc(a), Step::Mat(keys)) => Ok(a.get(keys)),
            (Kind::List(l), Step::Mat(keys)) if keys.len() == 1 => {
                let i = keys[0]
                    .as_index()
                    .ok_or_else(|| ExecError::typ("non-integer list index"))?;
                list_index(l.len(), i).map(|i| l[i].clone())
            }
            (Kind::List(l), Step::Fast(k)) => list_index(l.len(), *k).map(|i| l[i].clone()),
            (Kind::Block(b), Step::Mat(keys)) if keys.len() == 1 => {
                let i = keys[0]
                    .as_index()
                    .ok_or_else(|| ExecError::typ("non-integer block index"))?;
                block_index(b.data.len(), i).map(|i| Kind::Octet(b.data[i]).into())
            }
            (Kind::Block(b), Step::Fast(k)) => {
                block_index(b.data.len(), *k).map(|i| Kind::Octet(b.data[i]).into())
            }
            (Kind::Obj(o), Step::Elem(id)) => {
                let pos = o
                    .ty
                    .element_pos(*id)
                    .ok_or_else(|| ExecError::typ("element not in object"))?;
                Ok(o.elems[pos].clone())
            }
            (Kind::Null, _) => Err(ExecError::typ("indexing an undefined value")),
            _ => Err(ExecError::typ(format!(
                "cannot index a {}",
                cur.type_name()
            ))),
        }
    }

    /// Write a value through an address, cloning shared aggregates along
    /// the descent path.
    pub fn write_addr(&mut self, addr: &Addr, value: Value) -> Result<(), ExecError> {
        match &addr.base {
            Base::Global(id) => {
                let target = self.rt.symbols.value_mut(*id);
                write_through(target, &addr.path, value)
            }
            Base::Stack(i) => {
                let i = *i;
                match self.stack.get(i) {
                    None => Err(ExecError::typ("address outlived its frame")),
                    Some(Slot::Addr(inner)) => {
                        let mut full = inner.clone();
                        full.path.extend(addr.path.iter().cloned());
                        self.write_addr(&full, value)
                    }
                    Some(Slot::Val(_)) => {
                        let Slot::Val(target) = &mut self.stack[i] else {
                            unreachable!()
                        };
                        write_through(target, &addr.path, value)
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Stack helpers
    // -----------------------------------------------------------------

    fn push_val(&mut self, v: Value) {
        self.stack.push(Slot::Val(v));
    }

    fn pop(&mut self) -> Result<Slot, ExecError> {
        self.stack
            .pop()
            .ok_or_else(|| ExecError::typ("value stack underflow"))
    }

    pub fn slot_value(&self, slot: &Slot) -> Result<Value, ExecError> {
        match slot {
            Slot::Val(v) => Ok(v.clone()),
            Slot::Addr(a) => self.read_addr(a),
        }
    }

    fn pop_value(&mut self) -> Result<Value, ExecError> {
        let slot = self.pop()?;
        self.slot_value(&slot)
    }

    fn pop_addr(&mut self, what: &str) -> Result<Addr, ExecError> {
        match self.pop()? {
            Slot::Addr(a) => Ok(a),
            Slot::Val(_) => Err(ExecError::typ(format!("{} requires an lvalue", what))),
        }
    }

    fn top_is_addr(&self) -> bool {
        matches!(self.stack.last(), Some(Slot::Addr(_)))
    }

    // -----------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------

    /// Execute a user function with the given argument slots and return
    /// its value.
    pub fn run_function(&mut self, index: usize, args: Vec<Slot>) -> Result<Value, ExecError> {
        let f = self
            .rt
            .functions
            .get(index)
            .ok_or_else(|| {
                ExecError::resolve(format!(
                    "\"{}\" is undefined",
                    self.rt.functions.name(index)
                ))
            })?;
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ExecError::domain("call nesting too deep"));
        }
        self.depth += 1;
        let base = self.stack.len();
        let user_args = args.len();
        for a in args {
            self.stack.push(a);
        }
        // the callee always sees param_count parameter slots
        for _ in user_args..f.param_count {
            self.push_val(Value::null());
        }
        let nparams = user_args.max(f.param_count);
        for _ in 0..f.local_count {
            self.push_val(Value::null());
        }
        let result = self.exec(&f, base, nparams, user_args);
        self.stack.truncate(base);
        self.depth -= 1;
        result
    }

    fn exec(
        &mut self,
        f: &Rc<Function>,
        base: usize,
        nparams: usize,
        user_args: usize,
    ) -> Result<Value, ExecError> {
        let locals_at = base + nparams;
        let code = &f.opcodes;
        let mut pc = 0usize;

        macro_rules! operand {
            () => {{
                let w = code[pc];
                pc += 1;
                w
            }};
        }

        loop {
            if self.rt.abort_level >= AbortLevel::Now {
                return Err(ExecError::Interrupt);
            }
            if pc >= code.len() {
                // falling off the end behaves like an undef return
                return Ok(Value::null());
            }
            let op = Op::from_word(code[pc])
                .ok_or_else(|| ExecError::typ("corrupted opcode stream"))?;
            pc += 1;
            match op {
                Op::Nop => {}
                Op::Debug => {
                    self.line = operand!();
                }

                // ── loads ──────────────────────────────────────────────
                Op::Number => {
                    let idx = operand!() as usize;
                    let q = self.rt.constant(idx);
                    self.push_val(Value::num_rc(q));
                }
                Op::Imaginary => {
                    let idx = operand!() as usize;
                    let q = self.rt.constant(idx);
                    self.push_val(Value::com(Complex::from_imaginary((*q).clone())));
                }
                Op::StringLit => {
                    let idx = operand!() as usize;
                    let s = self.rt.string(idx);
                    self.push_val(Value::str_rc(s));
                }
                Op::Zero => self.push_val(Value::num(Number::zero())),
                Op::One => self.push_val(Value::num(Number::one())),
                Op::Undef => self.push_val(Value::null()),
                Op::OldValue => {
                    let v = self.rt.old_value.clone();
                    self.push_val(v);
                }

                // ── addresses and values ──────────────────────────────
                Op::LocalAddr => {
                    let i = operand!() as usize;
                    self.stack.push(Slot::Addr(Addr::new(Base::Stack(locals_at + i))));
                }
                Op::ParamAddr => {
                    let i = operand!() as usize;
                    self.stack.push(Slot::Addr(Addr::new(Base::Stack(base + i))));
                }
                Op::GlobalAddr => {
                    let id = operand!() as usize;
                    self.stack.push(Slot::Addr(Addr::new(Base::Global(id))));
                }
                Op::LocalValue => {
                    let i = operand!() as usize;
                    let v = self.read_addr(&Addr::new(Base::Stack(locals_at + i)))?;
                    self.push_val(v);
                }
                Op::ParamValue => {
                    let i = operand!() as usize;
                    let v = self.read_addr(&Addr::new(Base::Stack(base + i)))?;
                    self.push_val(v);
                }
                Op::GlobalValue => {
                    let id = operand!() as usize;
                    let v = self.read_addr(&Addr::new(Base::Global(id)))?;
                    self.push_val(v);
                }
                Op::ArgValue => {
                    let _flag = operand!();
                    let n = self
                        .pop_value()?
                        .as_index()
                        .ok_or_else(|| ExecError::typ("param() index must be an integer"))?;
                    if n == 0 {
                        self.push_val(Value::int(user_args as i64));
                    } else if n >= 1 && (n as usize) <= nparams {
                        let slot = self.stack[base + n as usize - 1].clone();
                        let v = self.slot_value(&slot)?;
                        self.push_val(v);
                    } else {
                        return Err(ExecError::domain(format!(
                            "param({}) out of range",
                            n
                        )));
                    }
                }
                Op::GetValue => {
                    if self.top_is_addr() {
                        let addr = self.pop_addr("getvalue")?;
                        let v = self.read_addr(&addr)?;
                        self.push_val(v);
                    }
                }

                // ── indexing ───────────────────────────────────────────
                Op::IndexAddr => {
                    let dim = operand!() as usize;
                    let _write = operand!() != 0;
                    let mut keys = Vec::with_capacity(dim);
                    for _ in 0..dim {
                        keys.push(self.pop_value()?);
                    }
                    keys.reverse();
                    let addr = self.pop_addr("indexing")?;
                    let target = self.read_addr(&addr)?;
                    // eager bounds check for dense targets
                    match &target.kind {
                        Kind::Mat(m) => {
                            m.offset(&keys)?;
                        }
                        Kind::List(l) => {
                            if keys.len() != 1 {
                                return Err(ExecError::typ("list index needs one dimension"));
                            }
                            let i = keys[0]
                                .as_index()
                                .ok_or_else(|| ExecError::typ("non-integer list index"))?;
                            list_index(l.len(), i)?;
                        }
                        Kind::Block(b) => {
                            if keys.len() != 1 {
                                return Err(ExecError::typ("block index needs one dimension"));
                            }
                            let i = keys[0]
                                .as_index()
                                .ok_or_else(|| ExecError::typ("non-integer block index"))?;
                            block_index(b.data.len(), i)?;
                        }
                        Kind::Assoc(_) => {}
                        other => {
                            return Err(ExecError::typ(format!(
                                "cannot index a {}",
                                Value::from(other.clone()).type_name()
                            )))
                        }
                    }
                    let mut addr = addr;
                    addr.path.push(Step::Mat(keys));
                    self.stack.push(Slot::Addr(addr));
                }
                Op::FiAddr | Op::FiValue => {
                    let k = self
                        .pop_value()?
                        .as_index()
                        .ok_or_else(|| ExecError::typ("non-integer fast index"))?;
                    let addr = self.pop_addr("fast indexing")?;
                    let target = self.read_addr(&addr)?;
                    match &target.kind {
                        Kind::Mat(m) => {
                            m.fast_offset(k)?;
                        }
                        Kind::List(l) => {
                            list_index(l.len(), k)?;
                        }
                        Kind::Block(b) => {
                            block_index(b.data.len(), k)?;
                        }
                        other => {
                            return Err(ExecError::typ(format!(
                                "cannot fast-index a {}",
                                Value::from(other.clone()).type_name()
                            )))
                        }
                    }
                    let mut addr = addr;
                    addr.path.push(Step::Fast(k));
                    if op == Op::FiValue {
                        let v = self.read_addr(&addr)?;
                        self.push_val(v);
                    } else {
                        self.stack.push(Slot::Addr(addr));
                    }
                }
                Op::ElemAddr | Op::ElemValue => {
                    let id = operand!() as usize;
                    match self.pop()? {
                        Slot::Addr(mut addr) => {
                            addr.path.push(Step::Elem(id));
                            if op == Op::ElemValue {
                                let v = self.read_addr(&addr)?;
                                self.push_val(v);
                            } else {
                                self.stack.push(Slot::Addr(addr));
                            }
                        }
                        Slot::Val(v) => {
                            // aggregate under construction on the stack:
                            // address into the slot beneath
                            drop(v);
                            if self.stack.is_empty() {
                                return Err(ExecError::typ("element address without aggregate"));
                            }
                            let slot_index = self.stack.len() - 1;
                            let mut addr = Addr::new(Base::Stack(slot_index));
                            addr.path.push(Step::Elem(id));
                            if op == Op::ElemValue {
                                let v = self.read_addr(&addr)?;
                                self.push_val(v);
                            } else {
                                self.stack.push(Slot::Addr(addr));
                            }
                        }
                    }
                }

                // ── aggregate construction ────────────────────────────
                Op::MatCreate => {
                    let dim = operand!() as usize;
                    let dims = if dim == 0 {
                        vec![MatDim { lo: 0, size: 0 }]
                    } else {
                        let mut bounds = Vec::with_capacity(dim * 2);
                        for _ in 0..dim * 2 {
                            let v = self.pop_value()?;
                            let n = v
                                .as_index()
                                .ok_or_else(|| ExecError::typ("matrix bound must be an integer"))?;
                            bounds.push(n);
                        }
                        bounds.reverse();
                        bounds
                            .chunks(2)
                            .map(|pair| {
                                let lo = pair[0].min(pair[1]);
                                let hi = pair[0].max(pair[1]);
                                MatDim {
                                    lo,
                                    size: (hi - lo + 1) as usize,
                                }
                            })
                            .collect()
                    };
                    self.push_val(Value::mat(Matrix::new(dims)?));
                }
                Op::InitFill => {
                    let fill = self.pop_value()?;
                    match self.stack.last_mut() {
                        Some(Slot::Val(Value {
                            kind: Kind::Mat(m), ..
                        })) => {
                            Rc::make_mut(m).fill(&fill);
                        }
                        _ => return Err(ExecError::typ("matrix fill without matrix")),
                    }
                }
                Op::ObjCreate => {
                    let idx = operand!() as usize;
                    let ty = self.rt.object_type(idx)?;
                    let n = ty.elements.len();
                    self.push_val(Value::obj(ObjValue {
                        ty,
                        elems: vec![Value::num(Number::zero()); n],
                    }));
                }
                Op::ElemInit => {
                    let i = operand!() as usize;
                    let slot = self.pop()?;
                    let value = self.slot_value(&slot)?;
                    match self.stack.last_mut() {
                        Some(Slot::Val(Value {
                            kind: Kind::Mat(m), ..
                        })) => {
                            let m = Rc::make_mut(m);
                            if i >= m.elems.len() {
                                return Err(ExecError::domain("too many initializer values"));
                            }
                            m.elems[i] = value;
                        }
                        Some(Slot::Val(Value {
                            kind: Kind::Obj(o), ..
                        })) => {
                            let o = Rc::make_mut(o);
                            if i >= o.elems.len() {
                                return Err(ExecError::domain("too many initializer values"));
                            }
                            o.elems[i] = value;
                        }
                        Some(Slot::Addr(a)) => {
                            let mut addr = a.clone();
                            addr.path.push(Step::Elem(i));
                            self.write_addr(&addr, value)?;
                        }
                        _ => return Err(ExecError::typ("element init without aggregate")),
                    }
                }

                // ── arithmetic ────────────────────────────────────────
                Op::Add => self.binary(NumOp::Add, OBJ_ADD)?,
                Op::Sub => self.binary(NumOp::Sub, OBJ_SUB)?,
                Op::Mul => self.binary(NumOp::Mul, OBJ_MUL)?,
                Op::Div => self.binary(NumOp::Div, crate::core::oop::OBJ_DIV)?,
                Op::Quo => self.binary(NumOp::Quo, crate::core::oop::OBJ_QUO)?,
                Op::Mod => self.binary(NumOp::Mod, crate::core::oop::OBJ_MOD)?,
                Op::And => self.binary(NumOp::And, crate::core::oop::OBJ_AND)?,
                Op::Or => self.binary(NumOp::Or, crate::core::oop::OBJ_OR)?,
                Op::Xor => self.binary(NumOp::Xor, crate::core::oop::OBJ_XOR)?,
                Op::SetMinus => self.binary(NumOp::SetMinus, crate::core::oop::OBJ_SETMINUS)?,
                Op::HashOp => self.binary(NumOp::HashOp, crate::core::oop::OBJ_HASHOP)?,
                Op::LeftShift => self.binary(NumOp::LeftShift, crate::core::oop::OBJ_SHIFT)?,
                Op::RightShift => {
                    let b = self.pop_value()?;
                    let a = self.pop_value()?;
                    if matches!(a.kind, Kind::Obj(_)) {
                        let n = unary_op(UnaryOp::Negate, &b)?;
                        let v = self.objcall(
                            crate::core::oop::OBJ_SHIFT,
                            vec![Slot::Val(a), Slot::Val(n)],
                        )?;
                        self.push_val(v);
                    } else {
                        self.push_val(binary_op(NumOp::RightShift, &a, &b)?);
                    }
                }
                Op::Power => {
                    let e = self.pop_value()?;
                    let a = self.pop_value()?;
                    if matches!(a.kind, Kind::Obj(_)) {
                        let v = self.objcall(OBJ_POW, vec![Slot::Val(a), Slot::Val(e)])?;
                        self.push_val(v);
                    } else {
                        self.push_val(binary_op(NumOp::Power, &a, &e)?);
                    }
                }
                Op::Negate => self.unary(UnaryOp::Negate, Some(crate::core::oop::OBJ_NEG))?,
                Op::Plus => self.unary(UnaryOp::Plus, Some(crate::core::oop::OBJ_PLUS))?,
                Op::Invert => self.unary(UnaryOp::Invert, Some(OBJ_INV))?,
                Op::Square => self.unary(UnaryOp::Square, Some(OBJ_SQUARE))?,
                Op::Abs => {
                    let a = self.pop_value()?;
                    if matches!(a.kind, Kind::Obj(_)) {
                        // the abs routine gets the configured error bound
                        let eps = Value::num(self.rt.conf.epsilon.clone());
                        let v = self.objcall(
                            crate::core::oop::OBJ_ABS,
                            vec![Slot::Val(a), Slot::Val(eps)],
                        )?;
                        self.push_val(v);
                    } else {
                        self.push_val(unary_op(UnaryOp::Abs, &a)?);
                    }
                }
                Op::Norm => self.unary(UnaryOp::Norm, Some(crate::core::oop::OBJ_NORM))?,
                Op::Conjugate => self.unary(UnaryOp::Conj, Some(crate::core::oop::OBJ_CONJ))?,
                Op::IntPart => self.unary(UnaryOp::Int, Some(crate::core::oop::OBJ_INT))?,
                Op::FracPart => self.unary(UnaryOp::Frac, Some(crate::core::oop::OBJ_FRAC))?,
                Op::Re => self.unary(UnaryOp::Re, None)?,
                Op::Im => self.unary(UnaryOp::Im, None)?,
                Op::Comp => self.unary(UnaryOp::Comp, Some(crate::core::oop::OBJ_COMP))?,
                Op::BackSlash => {
                    self.unary(UnaryOp::BackSlash, Some(crate::core::oop::OBJ_BACKSLASH))?
                }
                Op::Numerator => {
                    let v = self.pop_value()?;
                    let q = v
                        .as_number()
                        .ok_or_else(|| ExecError::typ("numerator of non-rational"))?;
                    self.push_val(Value::num(Number::from_int(q.numerator().clone())));
                }
                Op::Denominator => {
                    let v = self.pop_value()?;
                    let q = v
                        .as_number()
                        .ok_or_else(|| ExecError::typ("denominator of non-rational"))?;
                    self.push_val(Value::num(Number::from_int(
                        num_bigint::BigInt::from(q.denominator().clone()),
                    )));
                }
                Op::Sgn => {
                    let v = self.pop_value()?;
                    match &v.kind {
                        Kind::Obj(_) => {
                            let r =
                                self.objcall(crate::core::oop::OBJ_SGN, vec![Slot::Val(v)])?;
                            self.push_val(r);
                        }
                        Kind::Com(c) => {
                            self.push_val(Value::com(Complex::new(
                                Number::from_i64(c.re.sgn()),
                                Number::from_i64(c.im.sgn()),
                            )));
                        }
                        _ => {
                            let q = v
                                .as_number()
                                .ok_or_else(|| ExecError::typ("sgn of non-number"))?;
                            self.push_val(Value::int(q.sgn()));
                        }
                    }
                }
                Op::Scale => {
                    let n = self.pop_value()?;
                    let v = self.pop_value()?;
                    if matches!(v.kind, Kind::Obj(_)) {
                        let r = self.objcall(
                            crate::core::oop::OBJ_SCALE,
                            vec![Slot::Val(v), Slot::Val(n)],
                        )?;
                        self.push_val(r);
                    } else {
                        let k = n
                            .as_index()
                            .ok_or_else(|| ExecError::typ("scale count must be an integer"))?;
                        let q = v
                            .as_number()
                            .ok_or_else(|| ExecError::typ("scale of non-number"))?;
                        self.push_val(Value::num(q.scale(k)));
                    }
                }
                Op::Bit => {
                    let n = self.pop_value()?;
                    let v = self.pop_value()?;
                    let k = n
                        .as_index()
                        .ok_or_else(|| ExecError::typ("bit index must be an integer"))?;
                    let q = v
                        .as_number()
                        .ok_or_else(|| ExecError::typ("bit test of non-number"))?;
                    self.push_val(Value::bool(q.bit(k)?));
                }
                Op::HighBit => {
                    let q = self
                        .pop_value()?
                        .as_number()
                        .ok_or_else(|| ExecError::typ("highbit of non-number"))?;
                    self.push_val(Value::int(q.highbit()?));
                }
                Op::LowBit => {
                    let q = self
                        .pop_value()?
                        .as_number()
                        .ok_or_else(|| ExecError::typ("lowbit of non-number"))?;
                    self.push_val(Value::int(q.lowbit()?));
                }
                Op::Content => {
                    let v = self.pop_value()?;
                    if matches!(v.kind, Kind::Obj(_)) {
                        let r = self
                            .objcall(crate::core::oop::OBJ_CONTENT, vec![Slot::Val(v)])?;
                        self.push_val(r);
                    } else {
                        self.push_val(Value::int(v.content()?));
                    }
                }
                Op::Links => {
                    let v = self.pop_value()?;
                    let links = match &v.kind {
                        Kind::Num(r) => Rc::strong_count(r),
                        Kind::Com(r) => Rc::strong_count(r),
                        Kind::Str(r) => Rc::strong_count(r),
                        Kind::Mat(r) => Rc::strong_count(r),
                        Kind::List(r) => Rc::strong_count(r),
                        Kind::Assoc(r) => Rc::strong_count(r),
                        Kind::Obj(r) => Rc::strong_count(r),
                        Kind::Block(r) => Rc::strong_count(r),
                        _ => 1,
                    };
                    // the projection above holds one link itself
                    self.push_val(Value::int(links as i64 - 1));
                }

                // ── logic and tests ───────────────────────────────────
                Op::Not => {
                    let v = self.pop_value()?;
                    let t = self.test_value(&v)?;
                    self.push_val(Value::bool(!t));
                }
                Op::Test => {
                    let v = self.pop_value()?;
                    let t = self.test_value(&v)?;
                    self.push_val(Value::bool(t));
                }
                Op::Eq | Op::Ne => {
                    let b = self.pop_value()?;
                    let a = self.pop_value()?;
                    let equal = self.equal_values(&a, &b)?;
                    self.push_val(Value::bool(if op == Op::Eq { equal } else { !equal }));
                }
                Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                    let b = self.pop_value()?;
                    let a = self.pop_value()?;
                    let c = self.rel_order(&a, &b)?;
                    let r = match op {
                        Op::Lt => c < 0,
                        Op::Le => c <= 0,
                        Op::Gt => c > 0,
                        _ => c >= 0,
                    };
                    self.push_val(Value::bool(r));
                }
                Op::Cmp => {
                    let b = self.pop_value()?;
                    let a = self.pop_value()?;
                    let c = if matches!(a.kind, Kind::Obj(_)) || matches!(b.kind, Kind::Obj(_)) {
                        let r = self.objcall(OBJ_CMP, vec![Slot::Val(a), Slot::Val(b)])?;
                        r.as_index().unwrap_or(1) as i32
                    } else {
                        cmp_values(&a, &b)?
                    };
                    self.push_val(Value::int(c as i64));
                }

                // ── type predicates ───────────────────────────────────
                Op::IsNum => self.predicate(|v| v.is_number())?,
                Op::IsReal => self.predicate(|v| v.is_real())?,
                Op::IsInt => {
                    self.predicate(|v| v.as_number().map_or(false, |q| q.is_integer()))?
                }
                Op::IsOdd => self.predicate(|v| v.as_number().map_or(false, |q| q.is_odd()))?,
                Op::IsEven => self.predicate(|v| v.as_number().map_or(false, |q| q.is_even()))?,
                Op::IsNull => self.predicate(|v| v.is_null())?,
                Op::IsMat => self.predicate(|v| matches!(v.kind, Kind::Mat(_)))?,
                Op::IsStr => self.predicate(|v| matches!(v.kind, Kind::Str(_)))?,
                Op::IsList => self.predicate(|v| matches!(v.kind, Kind::List(_)))?,
                Op::IsAssoc => self.predicate(|v| matches!(v.kind, Kind::Assoc(_)))?,
                Op::IsObj => self.predicate(|v| matches!(v.kind, Kind::Obj(_)))?,
                Op::IsFile => self.predicate(|v| matches!(v.kind, Kind::File(_)))?,
                Op::IsRand => self.predicate(|v| matches!(v.kind, Kind::Rand(_)))?,
                Op::IsRandom => self.predicate(|v| matches!(v.kind, Kind::Random(_)))?,
                Op::IsConfig => self.predicate(|v| matches!(v.kind, Kind::Conf(_)))?,
                Op::IsHash => self.predicate(|v| matches!(v.kind, Kind::Hash(_)))?,
                Op::IsBlk => self.predicate(|v| matches!(v.kind, Kind::Block(_)))?,
                Op::IsOctet => self.predicate(|v| matches!(v.kind, Kind::Octet(_)))?,
                Op::IsPtr => self.predicate(|v| matches!(v.kind, Kind::Ptr(_)))?,
                Op::IsSimple => self.predicate(|v| {
                    matches!(
                        v.kind,
                        Kind::Null | Kind::Int(_) | Kind::Num(_) | Kind::Com(_) | Kind::Str(_)
                    )
                })?,
                Op::IsType => {
                    let b = self.pop_value()?;
                    let a = self.pop_value()?;
                    let same = match (&a.kind, &b.kind) {
                        (Kind::Obj(x), Kind::Obj(y)) => x.ty.id == y.ty.id,
                        _ => a.variant_rank() == b.variant_rank(),
                    };
                    self.push_val(Value::bool(same));
                }
                Op::IsDefined => {
                    let v = self.pop_value()?;
                    let defined = match &v.kind {
                        Kind::Str(s) => {
                            intrinsics::lookup(s).is_some()
                                || self.rt.functions.get_by_name(s).is_some()
                        }
                        _ => return Err(ExecError::typ("isdefined needs a string")),
                    };
                    self.push_val(Value::bool(defined));
                }
                Op::IsObjType => {
                    let v = self.pop_value()?;
                    let defined = match &v.kind {
                        Kind::Str(s) => self.rt.find_object(s).is_some(),
                        _ => return Err(ExecError::typ("isobjtype needs a string")),
                    };
                    self.push_val(Value::bool(defined));
                }

                // ── control flow ──────────────────────────────────────
                Op::Jump => {
                    pc = jump_target(code, operand!())?;
                }
                Op::JumpZ => {
                    let target = operand!();
                    let v = self.pop_value()?;
                    if !self.test_value(&v)? {
                        pc = jump_target(code, target)?;
                    }
                }
                Op::JumpNz => {
                    let target = operand!();
                    let v = self.pop_value()?;
                    if self.test_value(&v)? {
                        pc = jump_target(code, target)?;
                    }
                }
                Op::JumpNn => {
                    let target = operand!();
                    let top = self
                        .stack
                        .last()
                        .cloned()
                        .ok_or_else(|| ExecError::typ("value stack underflow"))?;
                    let v = self.slot_value(&top)?;
                    if !v.is_null() {
                        self.pop()?;
                        pc = jump_target(code, target)?;
                    }
                }
                Op::CondOrJump => {
                    let target = operand!();
                    let top = self
                        .stack
                        .last()
                        .cloned()
                        .ok_or_else(|| ExecError::typ("value stack underflow"))?;
                    let v = self.slot_value(&top)?;
                    if self.test_value(&v)? {
                        pc = jump_target(code, target)?;
                    } else {
                        self.pop()?;
                    }
                }
                Op::CondAndJump => {
                    let target = operand!();
                    let top = self
                        .stack
                        .last()
                        .cloned()
                        .ok_or_else(|| ExecError::typ("value stack underflow"))?;
                    let v = self.slot_value(&top)?;
                    if !self.test_value(&v)? {
                        pc = jump_target(code, target)?;
                    } else {
                        self.pop()?;
                    }
                }
                Op::CaseJump => {
                    let target = operand!();
                    let case = self.pop_value()?;
                    let switch = {
                        let top = self
                            .stack
                            .last()
                            .cloned()
                            .ok_or_else(|| ExecError::typ("value stack underflow"))?;
                        self.slot_value(&top)?
                    };
                    if self.equal_values(&switch, &case)? {
                        self.pop()?; // consume the switch value, enter the body
                    } else {
                        pc = jump_target(code, target)?;
                    }
                }
                Op::InitStatic => {
                    let target = operand!();
                    let site = pc - 2;
                    let mut done = f.static_done.borrow_mut();
                    if done.contains(&site) {
                        pc = jump_target(code, target)?;
                    } else {
                        done.insert(site);
                    }
                }
                Op::UserCall => {
                    let index = operand!() as usize;
                    let argc = operand!() as usize;
                    let at = self
                        .stack
                        .len()
                        .checked_sub(argc)
                        .ok_or_else(|| ExecError::typ("value stack underflow"))?;
                    let args: Vec<Slot> = self.stack.drain(at..).collect();
                    let v = self.run_function(index, args)?;
                    self.push_val(v);
                }
                Op::Call => {
                    let index = operand!() as usize;
                    let argc = operand!() as usize;
                    let at = self
                        .stack
                        .len()
                        .checked_sub(argc)
                        .ok_or_else(|| ExecError::typ("value stack underflow"))?;
                    let args: Vec<Slot> = self.stack.drain(at..).collect();
                    let v = intrinsics::call(self, index, args)?;
                    self.push_val(v);
                }
                Op::Return => {
                    let slot = self.pop()?;
                    let mut v = self.slot_value(&slot)?;
                    if f.is_anonymous() {
                        let saved = f.saved.borrow().clone();
                        if !saved.is_null() {
                            v = saved;
                        }
                    }
                    return Ok(v);
                }
                Op::Quit => {
                    let idx = operand!();
                    let message = if idx >= 0 {
                        Some(self.rt.string(idx as usize).to_string())
                    } else {
                        None
                    };
                    return Err(ExecError::Quit { message });
                }
                Op::Abort => {
                    let idx = operand!();
                    let message = if idx >= 0 {
                        Some(self.rt.string(idx as usize).to_string())
                    } else {
                        None
                    };
                    self.rt.abort_level = AbortLevel::Now;
                    return Err(ExecError::Abort { message });
                }

                // ── assignment and mutation ───────────────────────────
                Op::Assign => {
                    let src = self.pop()?;
                    let value = self.slot_value(&src)?;
                    let addr = self.pop_addr("assignment")?;
                    self.assign(&addr, value)?;
                    self.stack.push(Slot::Addr(addr));
                }
                Op::AssignPop => {
                    let src = self.pop()?;
                    let value = self.slot_value(&src)?;
                    let addr = self.pop_addr("assignment")?;
                    self.assign(&addr, value)?;
                }
                Op::AssignBack => {
                    let addr = self.pop_addr("assignment")?;
                    let top = self
                        .stack
                        .last()
                        .cloned()
                        .ok_or_else(|| ExecError::typ("value stack underflow"))?;
                    let value = self.slot_value(&top)?;
                    self.assign(&addr, value)?;
                }
                Op::Swap => {
                    let b = self.pop_addr("swap")?;
                    let a = self.pop_addr("swap")?;
                    let va = self.read_addr(&a)?;
                    let vb = self.read_addr(&b)?;
                    self.write_addr(&a, vb)?;
                    self.write_addr(&b, va)?;
                    self.push_val(Value::null());
                }
                Op::PreInc | Op::PreDec => {
                    let addr = match self.stack.last() {
                        Some(Slot::Addr(a)) => a.clone(),
                        _ => return Err(ExecError::typ("++ requires an lvalue")),
                    };
                    let v = self.read_addr(&addr)?;
                    let next = self.step_by_one(&v, op == Op::PreInc)?;
                    self.write_addr(&addr, next)?;
                }
                Op::PostInc | Op::PostDec => {
                    let addr = match self.stack.last() {
                        Some(Slot::Addr(a)) => a.clone(),
                        _ => return Err(ExecError::typ("++ requires an lvalue")),
                    };
                    let old = self.read_addr(&addr)?;
                    let next = self.step_by_one(&old, op == Op::PostInc)?;
                    self.write_addr(&addr, next)?;
                    let top = self.stack.len() - 1;
                    self.stack.insert(top, Slot::Val(old));
                }

                // ── stack shuffling ───────────────────────────────────
                Op::Duplicate => {
                    let top = self
                        .stack
                        .last()
                        .cloned()
                        .ok_or_else(|| ExecError::typ("value stack underflow"))?;
                    self.stack.push(top);
                }
                Op::DupValue => {
                    let top = self
                        .stack
                        .last()
                        .cloned()
                        .ok_or_else(|| ExecError::typ("value stack underflow"))?;
                    let v = self.slot_value(&top)?;
                    self.push_val(v);
                }
                Op::Pop => {
                    self.pop()?;
                }

                // ── pointers ──────────────────────────────────────────
                Op::Ptr => {
                    let addr = self.pop_addr("address-of")?;
                    let kind = match self.read_addr(&addr) {
                        Ok(v) => match v.kind {
                            Kind::Octet(_) => PtrKind::Octet,
                            Kind::Str(_) => PtrKind::Str,
                            Kind::Num(_) | Kind::Int(_) => PtrKind::Number,
                            _ => PtrKind::Value,
                        },
                        Err(_) => PtrKind::Value,
                    };
                    self.push_val(Kind::Ptr(Box::new(PtrVal { kind, addr })).into());
                }
                Op::Deref => {
                    let v = self.pop_value()?;
                    match v.kind {
                        Kind::Ptr(p) => {
                            let inner = self.read_addr(&p.addr)?;
                            self.push_val(inner);
                        }
                        other => self.push_val(other.into()),
                    }
                }

                // ── save / old value ──────────────────────────────────
                Op::Save => {
                    let top = self
                        .stack
                        .last()
                        .cloned()
                        .ok_or_else(|| ExecError::typ("value stack underflow"))?;
                    let v = self.slot_value(&top)?;
                    if self.rt.save_enabled {
                        *f.saved.borrow_mut() = v.clone();
                        self.rt.old_value = v;
                    }
                }
                Op::SaveVal => {
                    let v = self.pop_value()?;
                    self.rt.save_enabled = v.test();
                    self.push_val(Value::null());
                }

                // ── configuration ─────────────────────────────────────
                Op::GetEpsilon => {
                    let eps = self.rt.conf.epsilon.clone();
                    self.push_val(Value::num(eps));
                }
                Op::SetEpsilon => {
                    let v = self.pop_value()?;
                    let old = self.rt.conf.epsilon.clone();
                    self.rt.conf.set("epsilon", &v)?;
                    self.push_val(Value::num(old));
                }
                Op::GetConfig => {
                    let v = self.pop_value()?;
                    let name = match &v.kind {
                        Kind::Str(s) => s.clone(),
                        _ => return Err(ExecError::typ("config name must be a string")),
                    };
                    let r = if &*name == "all" {
                        Kind::Conf(Rc::new(self.rt.conf.clone())).into()
                    } else {
                        self.rt.conf.get(&name)?
                    };
                    self.push_val(r);
                }
                Op::SetConfig => {
                    let value = self.pop_value()?;
                    let v = self.pop_value()?;
                    let name = match &v.kind {
                        Kind::Str(s) => s.clone(),
                        _ => return Err(ExecError::typ("config name must be a string")),
                    };
                    let old = if &*name == "all" {
                        let old: Value = Kind::Conf(Rc::new(self.rt.conf.clone())).into();
                        match &value.kind {
                            Kind::Conf(c) => self.rt.conf = (**c).clone(),
                            _ => return Err(ExecError::typ("config(\"all\") needs a config state")),
                        }
                        old
                    } else {
                        let old = self.rt.conf.get(&name)?;
                        self.rt.conf.set(&name, &value)?;
                        old
                    };
                    self.push_val(old);
                }

                // ── output ────────────────────────────────────────────
                Op::Print => {
                    let _flags = operand!();
                    let v = self.pop_value()?;
                    self.print_value(&v, false)?;
                }
                Op::PrintResult => {
                    let v = self.pop_value()?;
                    if !v.is_null() {
                        self.print_value(&v, false)?;
                        println!();
                    }
                }
                Op::PrintEol => println!(),
                Op::PrintSpace => print!(" "),
                Op::PrintString => {
                    let idx = operand!() as usize;
                    print!("{}", self.rt.string(idx));
                }
                Op::Show => {
                    let arg = operand!();
                    self.show(arg)?;
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Operator helpers
    // -----------------------------------------------------------------

    fn binary(&mut self, op: NumOp, obj_action: usize) -> Result<(), ExecError> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;
        if matches!(a.kind, Kind::Obj(_)) || matches!(b.kind, Kind::Obj(_)) {
            let v = self.objcall(obj_action, vec![Slot::Val(a), Slot::Val(b)])?;
            self.push_val(v);
        } else {
            self.push_val(binary_op(op, &a, &b)?);
        }
        Ok(())
    }

    fn unary(&mut self, op: UnaryOp, obj_action: Option<usize>) -> Result<(), ExecError> {
        let a = self.pop_value()?;
        if matches!(a.kind, Kind::Obj(_)) {
            match obj_action {
                Some(action) => {
                    let v = self.objcall(action, vec![Slot::Val(a)])?;
                    self.push_val(v);
                    return Ok(());
                }
                None => {
                    return Err(ExecError::typ("operation not defined for objects"));
                }
            }
        }
        self.push_val(unary_op(op, &a)?);
        Ok(())
    }

    fn predicate(&mut self, f: impl Fn(&Value) -> bool) -> Result<(), ExecError> {
        let v = self.pop_value()?;
        self.push_val(Value::bool(f(&v)));
        Ok(())
    }

    fn step_by_one(&mut self, v: &Value, up: bool) -> Result<Value, ExecError> {
        if matches!(v.kind, Kind::Obj(_)) {
            let action = if up { OBJ_INC } else { OBJ_DEC };
            return self.objcall(action, vec![Slot::Val(v.clone())]);
        }
        let one = Value::num(Number::one());
        binary_op(if up { NumOp::Add } else { NumOp::Sub }, v, &one)
    }

    /// Truth test, dispatching objects through their test method.
    pub fn test_value(&mut self, v: &Value) -> Result<bool, ExecError> {
        if matches!(v.kind, Kind::Obj(_)) {
            let r = self.objcall(OBJ_TEST, vec![Slot::Val(v.clone())])?;
            return Ok(r.as_index().map_or(false, |n| n != 0));
        }
        Ok(v.test())
    }

    pub fn equal_values(&mut self, a: &Value, b: &Value) -> Result<bool, ExecError> {
        if matches!(a.kind, Kind::Obj(_)) || matches!(b.kind, Kind::Obj(_)) {
            let r = self.objcall(OBJ_CMP, vec![Slot::Val(a.clone()), Slot::Val(b.clone())])?;
            return Ok(r.as_index() == Some(0));
        }
        Ok(values_equal(a, b))
    }

    /// Relational order for < <= > >=: numbers and strings only;
    /// objects dispatch through their rel method.
    pub fn rel_order(&mut self, a: &Value, b: &Value) -> Result<i32, ExecError> {
        if matches!(a.kind, Kind::Obj(_)) || matches!(b.kind, Kind::Obj(_)) {
            let r = self.objcall(OBJ_REL, vec![Slot::Val(a.clone()), Slot::Val(b.clone())])?;
            let q = r
                .as_number()
                .ok_or_else(|| ExecError::typ("rel must return a number"))?;
            return Ok(q.sgn() as i32);
        }
        match (&a.kind, &b.kind) {
            (Kind::Int(_) | Kind::Num(_), Kind::Int(_) | Kind::Num(_))
            | (Kind::Str(_), Kind::Str(_)) => cmp_values(a, b),
            _ => Err(ExecError::typ(format!(
                "cannot order {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    /// Assignment through an address. Object targets with a user assign
    /// method dispatch to it; everything else writes the value through.
    fn assign(&mut self, addr: &Addr, value: Value) -> Result<(), ExecError> {
        let current = self.read_addr(addr).unwrap_or_else(|_| Value::null());
        if current.subtype & SUB_PROTECT != 0 {
            return Err(ExecError::typ("assignment into protected value"));
        }
        if let Kind::Obj(o) = &current.kind {
            if self.method_index(&o.ty, OBJ_ASSIGN).is_some() {
                self.objcall(
                    OBJ_ASSIGN,
                    vec![Slot::Addr(addr.clone()), Slot::Val(value)],
                )?;
                return Ok(());
            }
        }
        self.write_addr(addr, value)
    }

    /// Flip the protection subtype flag on the value an address names,
    /// returning the previous setting.
    pub fn set_protect(&mut self, addr: &Addr, on: bool) -> Result<bool, ExecError> {
        fn flip(target: &mut Value, path: &[Step], on: bool) -> Result<bool, ExecError> {
            if path.is_empty() {
                let old = target.subtype & SUB_PROTECT != 0;
                if on {
                    target.subtype |= SUB_PROTECT;
                } else {
                    target.subtype &= !SUB_PROTECT;
                }
                return Ok(old);
            }
            match (&mut target.kind, &path[0]) {
                (Kind::Mat(m), Step::Mat(keys)) => {
                    let m = Rc::make_mut(m);
                    let off = m.offset(keys)?;
                    flip(&mut m.elems[off], &path[1..], on)
                }
                (Kind::Mat(m), Step::Fast(k)) => {
                    let m = Rc::make_mut(m);
                    let off = m.fast_offset(*k)?;
                    flip(&mut m.elems[off], &path[1..], on)
                }
                (Kind::Assoc(a), Step::Mat(keys)) => {
                    let a = Rc::make_mut(a);
                    flip(a.entry(keys)?, &path[1..], on)
                }
                (Kind::Obj(o), Step::Elem(id)) => {
                    let pos = o
                        .ty
                        .element_pos(*id)
                        .ok_or_else(|| ExecError::typ("element not in object"))?;
                    let o = Rc::make_mut(o);
                    flip(&mut o.elems[pos], &path[1..], on)
                }
                _ => Err(ExecError::typ("protect target cannot be resolved")),
            }
        }
        match &addr.base {
            Base::Global(id) => flip(self.rt.symbols.value_mut(*id), &addr.path, on),
            Base::Stack(i) => {
                let i = *i;
                match self.stack.get(i) {
                    None => Err(ExecError::typ("address outlived its frame")),
                    Some(Slot::Addr(inner)) => {
                        let mut full = inner.clone();
                        full.path.extend(addr.path.iter().cloned());
                        self.set_protect(&full, on)
                    }
                    Some(Slot::Val(_)) => {
                        let Slot::Val(target) = &mut self.stack[i] else {
                            unreachable!()
                        };
                        flip(target, &addr.path, on)
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Object dispatch
    // -----------------------------------------------------------------

    /// Resolve (and cache) the user function index for an object
    /// operator; None when no definition currently exists.
    fn method_index(&mut self, ty: &Rc<ObjectType>, action: usize) -> Option<usize> {
        let cached = ty.methods.borrow()[action];
        let index = match cached {
            Some(i) => i,
            None => {
                let name = format!("{}_{}", ty.name, OBJ_OPS[action].name);
                let i = self.rt.functions.index_of(&name);
                ty.methods.borrow_mut()[action] = Some(i);
                i
            }
        };
        self.rt.functions.get(index).map(|_| index)
    }

    /// Dispatch an overloaded operator for object operands.
    pub fn objcall(&mut self, action: usize, args: Vec<Slot>) -> Result<Value, ExecError> {
        let opinfo = &OBJ_OPS[action];
        let ty = args
            .iter()
            .find_map(|s| match s {
                Slot::Val(Value {
                    kind: Kind::Obj(o), ..
                }) => Some(o.ty.clone()),
                _ => None,
            })
            .or_else(|| {
                args.iter().find_map(|s| match s {
                    Slot::Addr(a) => match self.read_addr(a).ok()?.kind {
                        Kind::Obj(o) => Some(o.ty.clone()),
                        _ => None,
                    },
                    _ => None,
                })
            })
            .ok_or_else(|| ExecError::typ("object operation without object operand"))?;
        if args.len() != opinfo.args as usize {
            // pad with nulls up to the declared arity (rounding args etc.)
            let mut args = args;
            while args.len() < opinfo.args as usize {
                args.push(Slot::Val(Value::null()));
            }
            return self.objcall_resolved(&ty, action, args);
        }
        self.objcall_resolved(&ty, action, args)
    }

    fn objcall_resolved(
        &mut self,
        ty: &Rc<ObjectType>,
        action: usize,
        args: Vec<Slot>,
    ) -> Result<Value, ExecError> {
        let opinfo = &OBJ_OPS[action];
        if let Some(index) = self.method_index(ty, action) {
            let v = self.run_function(index, args)?;
            return match opinfo.ret {
                RetKind::Int => {
                    let n = v.as_number().and_then(|q| q.to_i64()).ok_or_else(|| {
                        ExecError::typ(format!(
                            "{}_{} must return an integer",
                            ty.name, opinfo.name
                        ))
                    })?;
                    Ok(Value::int(n))
                }
                _ => Ok(v),
            };
        }
        // no user routine: apply the declared fallback
        let arg_value = |vm: &Vm, i: usize| -> Result<Value, ExecError> {
            vm.slot_value(&args[i])
        };
        match opinfo.fallback {
            Fb::Print => {
                let v = arg_value(self, 0)?;
                let text = self.rt.format_value(&v);
                print!("{}", text);
                Ok(Value::null())
            }
            Fb::One => Ok(Value::num(Number::one())),
            Fb::Test => {
                let v = arg_value(self, 0)?;
                match &v.kind {
                    Kind::Obj(o) => {
                        let mut t = false;
                        for e in o.elems.clone() {
                            if self.test_value(&e)? {
                                t = true;
                                break;
                            }
                        }
                        Ok(Value::bool(t))
                    }
                    _ => Ok(Value::bool(v.test())),
                }
            }
            Fb::Cmp => {
                let a = arg_value(self, 0)?;
                let b = arg_value(self, 1)?;
                Ok(Value::bool(cmp_values(&a, &b)? != 0))
            }
            Fb::Pow => {
                let a = arg_value(self, 0)?;
                let e = arg_value(self, 1)?;
                self.obj_powi(&a, &e)
            }
            Fb::Inc => {
                let a = arg_value(self, 0)?;
                let one = Value::num(Number::one());
                self.objcall(OBJ_ADD, vec![Slot::Val(a), Slot::Val(one)])
            }
            Fb::Dec => {
                let a = arg_value(self, 0)?;
                let one = Value::num(Number::one());
                self.objcall(OBJ_SUB, vec![Slot::Val(a), Slot::Val(one)])
            }
            Fb::Square => {
                let a = arg_value(self, 0)?;
                self.objcall(OBJ_MUL, vec![Slot::Val(a.clone()), Slot::Val(a)])
            }
            Fb::Value => arg_value(self, 0),
            Fb::Assign => {
                let value = arg_value(self, 1)?;
                match &args[0] {
                    Slot::Addr(a) => {
                        let a = a.clone();
                        self.write_addr(&a, value)?;
                        Ok(Value::null())
                    }
                    Slot::Val(_) => Ok(value),
                }
            }
            Fb::None => Err(ExecError::typ(format!(
                "object routine {}_{} is not defined",
                ty.name, opinfo.name
            ))),
        }
    }

    /// Left-to-right square-and-multiply power over the type's mul,
    /// square and inv methods; integral exponents only.
    fn obj_powi(&mut self, base: &Value, exp: &Value) -> Result<Value, ExecError> {
        let q = exp
            .as_number()
            .ok_or_else(|| ExecError::typ("object exponent must be a number"))?;
        if !q.is_integer() {
            return Err(ExecError::domain("non-integral object exponent"));
        }
        let neg = q.is_negative();
        let mut e = q
            .abs()
            .to_i64()
            .ok_or_else(|| ExecError::domain("object exponent too large"))? as u64;
        if e == 0 {
            return self.objcall(crate::core::oop::OBJ_ONE, vec![Slot::Val(base.clone())]);
        }
        let mut acc: Option<Value> = None;
        let mut sq = base.clone();
        loop {
            if e & 1 == 1 {
                acc = Some(match acc {
                    None => sq.clone(),
                    Some(r) => {
                        self.objcall(OBJ_MUL, vec![Slot::Val(r), Slot::Val(sq.clone())])?
                    }
                });
            }
            e >>= 1;
            if e == 0 {
                break;
            }
            sq = self.objcall(OBJ_SQUARE, vec![Slot::Val(sq)])?;
        }
        let mut result = acc.expect("nonzero exponent");
        if neg {
            result = self.objcall(OBJ_INV, vec![Slot::Val(result)])?;
        }
        Ok(result)
    }

    // -----------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------

    /// Print a value, routing objects through their print method.
    pub fn print_value(&mut self, v: &Value, _unambig: bool) -> Result<(), ExecError> {
        if let Kind::Obj(o) = &v.kind {
            if self.method_index(&o.ty, OBJ_PRINT).is_some() {
                self.objcall(OBJ_PRINT, vec![Slot::Val(v.clone())])?;
                return Ok(());
            }
        }
        print!("{}", self.rt.format_value(v));
        Ok(())
    }

    fn show(&mut self, arg: i64) -> Result<(), ExecError> {
        match arg {
            1 => print!("{}", intrinsics::show_builtins()),
            3 => print!("{}", self.rt.functions.show()),
            5 => {
                for (name, doc) in crate::conf::PROPERTIES {
                    let v = self.rt.conf.get(name)?;
                    println!(
                        "{:16} {:8} {}",
                        name,
                        v.format_scalar(self.rt.conf.outmode, self.rt.conf.display, true),
                        doc
                    );
                }
            }
            12 | 15 => {
                println!("Constants:");
                for (i, q) in self.rt.constants_iter().enumerate() {
                    println!("{:5}: {}", i, q);
                }
            }
            13 => print!("{}", self.rt.symbols.show(false)),
            14 => print!("{}", self.rt.symbols.show(true)),
            17 | 18 => {
                println!("Strings:");
                for (i, s) in self.rt.strings_iter().enumerate() {
                    println!("{:5}: \"{}\"", i, s);
                }
            }
            n if n >= 19 => {
                let index = (n - 19) as usize;
                match self.rt.functions.get(index) {
                    Some(f) => print!("{}", f.disassemble()),
                    None => println!("function is undefined"),
                }
            }
            _ => println!("show: nothing to report for this item"),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

fn jump_target(code: &[i64], word: i64) -> Result<usize, ExecError> {
    if word < 0 || word as usize > code.len() {
        return Err(ExecError::typ("jump target out of range"));
    }
    Ok(word as usize)
}

fn list_index(len: usize, i: i64) -> Result<usize, ExecError> {
    if i < 0 || i as usize >= len {
        return Err(ExecError::domain(format!(
            "list index {} out of bounds [0, {}]",
            i,
            len as i64 - 1
        )));
    }
    Ok(i as usize)
}

fn block_index(len: usize, i: i64) -> Result<usize, ExecError> {
    if i < 0 || i as usize >= len {
        return Err(ExecError::domain(format!(
            "block index {} out of bounds [0, {}]",
            i,
            len as i64 - 1
        )));
    }
    Ok(i as usize)
}

/// Write through a descent path, cloning shared aggregates on the way.
fn write_through(target: &mut Value, path: &[Step], value: Value) -> Result<(), ExecError> {
    if path.is_empty() {
        if target.subtype & SUB_PROTECT != 0 {
            return Err(ExecError::typ("assignment into protected value"));
        }
        *target = value;
        return Ok(());
    }
    match (&mut target.kind, &path[0]) {
        (Kind::Mat(m), Step::Mat(keys)) => {
            let m = Rc::make_mut(m);
            let off = m.offset(keys)?;
            write_through(&mut m.elems[off], &path[1..], value)
        }
        (Kind::Mat(m), Step::Fast(k)) => {
            let m = Rc::make_mut(m);
            let off = m.fast_offset(*k)?;
            write_through(&mut m.elems[off], &path[1..], value)
        }
        (Kind::Mat(m), Step::Elem(i)) => {
            let m = Rc::make_mut(m);
            if *i >= m.elems.len() {
                return Err(ExecError::domain("matrix element out of range"));
            }
            write_through(&mut m.elems[*i], &path[1..], value)
        }
        (Kind::Assoc(a), Step::Mat(keys)) => {
            let a = Rc::make_mut(a);
            write_through(a.entry(keys)?, &path[1..], value)
        }
        (Kind::List(l), Step::Mat(keys)) if keys.len() == 1 => {
            let i = keys[0]
                .as_index()
                .ok_or_else(|| ExecError::typ("non-integer list index"))?;
            let i = list_index(l.len(), i)?;
            let l = Rc::make_mut(l);
            write_through(&mut l[i], &path[1..], value)
        }
        (Kind::List(l), Step::Fast(k)) => {
            let i = list_index(l.len(), *k)?;
            let l = Rc::make_mut(l);
            write_through(&mut l[i], &path[1..], value)
        }
        (Kind::Obj(o), Step::Elem(id)) => {
            let pos = o
                .ty
                .element_pos(*id)
                .ok_or_else(|| ExecError::typ("element not in object"))?;
            let o = Rc::make_mut(o);
            write_through(&mut o.elems[pos], &path[1..], value)
        }
        (Kind::Block(b), step) => {
            let i = match step {
                Step::Fast(k) => *k,
                Step::Mat(keys) if keys.len() == 1 => keys[0]
                    .as_index()
                    .ok_or_else(|| ExecError::typ("non-integer block index"))?,
                _ => return Err(ExecError::typ("bad block index")),
            };
            let i = block_index(b.data.len(), i)?;
            let byte = match &value.kind {
                Kind::Octet(x) => *x,
                _ => {
                    let n = value
                        .as_index()
                        .ok_or_else(|| ExecError::typ("block element must be an octet"))?;
                    u8::try_from(n)
                        .map_err(|_| ExecError::domain("octet value out of range"))?
                }
            };
            Rc::make_mut(b).data[i] = byte;
            Ok(())
        }
        (Kind::Null, _) => Err(ExecError::typ("indexing an undefined value")),
        _ => Err(ExecError::typ(format!(
            "cannot index a {}",
            target.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_through_clones_shared_matrices() {
        let m = Matrix::new(vec![MatDim { lo: 0, size: 2 }]).unwrap();
        let mut a = Value::mat(m);
        let alias = a.clone();
        write_through(&mut a, &[Step::Fast(0)], Value::int(9)).unwrap();
        let Kind::Mat(ma) = &a.kind else { panic!() };
        let Kind::Mat(mb) = &alias.kind else { panic!() };
        assert!(values_equal(&ma.elems[0], &Value::int(9)));
        assert!(mb.elems[0].is_null());
    }

    #[test]
    fn assoc_write_creates_entries() {
        let mut a = Value::assoc(crate::core::assoc::AssocMap::new());
        write_through(
            &mut a,
            &[Step::Mat(vec![Value::int(5)])],
            Value::string("x"),
        )
        .unwrap();
        let Kind::Assoc(map) = &a.kind else { panic!() };
        assert_eq!(map.len(), 1);
    }
}
