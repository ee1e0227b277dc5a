/// The dynamic value model.
///
/// `Value` couples a variant (`Kind`) with a secondary subtype flag word.
/// Heap variants hold `Rc` handles: copying a value bumps a reference
/// count, dropping the last handle frees the structure and its children.
/// Aggregate mutation goes through `Rc::make_mut`, so writers to a shared
/// handle clone first and never disturb other holders.
///
/// Addresses ("lvalues") are modeled as data, not pointers: a scope-
/// relative base plus an element-descent path. The executor projects an
/// address to a value (GETVALUE) or writes through it (ASSIGN family).

use crate::conf::Config;
use crate::core::assoc::AssocMap;
use crate::core::matrix::Matrix;
use crate::core::number::{Complex, Number, OutMode};
use crate::core::oop::ObjValue;
use crate::errors::ExecError;
use crate::random::{AddRand, BlumRng};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::rc::Rc;

// Subtype flags, orthogonal to the variant tag.
pub const SUB_NONE: u8 = 0;
/// Set when the value was loaded from a named variable slot.
pub const SUB_NAMED: u8 = 1;
/// Set by protect(): the value may not be assigned over.
pub const SUB_PROTECT: u8 = 2;

#[derive(Debug, Clone)]
pub struct Value {
    pub kind: Kind,
    pub subtype: u8,
}

#[derive(Debug, Clone)]
pub enum Kind {
    Null,
    Int(i64),
    Num(Rc<Number>),
    Com(Rc<Complex>),
    Str(Rc<str>),
    Mat(Rc<Matrix>),
    List(Rc<VecDeque<Value>>),
    Assoc(Rc<AssocMap>),
    Obj(Rc<ObjValue>),
    File(u64),
    Rand(Rc<AddRand>),
    Random(Rc<BlumRng>),
    Conf(Rc<Config>),
    Hash(Rc<HashState>),
    Block(Rc<Block>),
    Octet(u8),
    Ptr(Box<PtrVal>),
}

/// A mutable byte buffer with an append cursor.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub data: Vec<u8>,
    pub pos: usize,
}

/// Incremental hash accumulator exposed to user code.
#[derive(Debug, Clone)]
pub struct HashState {
    pub accum: u64,
}

impl Default for HashState {
    fn default() -> Self {
        HashState {
            accum: 0xcbf2_9ce4_8422_2325,
        }
    }
}

impl HashState {
    pub fn update(&mut self, h: u64) {
        self.accum ^= h;
        self.accum = self.accum.wrapping_mul(0x0000_0100_0000_01b3);
    }
}

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Base {
    /// Global variable by stable id.
    Global(usize),
    /// Absolute slot on the value stack; the executor resolves local
    /// and parameter indices to absolute slots when it emits these.
    Stack(usize),
}

#[derive(Debug, Clone)]
pub enum Step {
    /// Full multi-dimensional matrix index (or single assoc key tuple).
    Mat(Vec<Value>),
    /// Fast linear index into a matrix or block.
    Fast(i64),
    /// Object element by global element-name id.
    Elem(usize),
}

#[derive(Debug, Clone)]
pub struct Addr {
    pub base: Base,
    pub path: Vec<Step>,
}

impl Addr {
    pub fn new(base: Base) -> Self {
        Addr {
            base,
            path: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrKind {
    Value,
    Octet,
    Str,
    Number,
}

#[derive(Debug, Clone)]
pub struct PtrVal {
    pub kind: PtrKind,
    pub addr: Addr,
}

// ---------------------------------------------------------------------------
// Constructors and accessors
// ---------------------------------------------------------------------------

impl Value {
    pub fn null() -> Self {
        Kind::Null.into()
    }

    pub fn int(n: i64) -> Self {
        Kind::Int(n).into()
    }

    pub fn num(n: Number) -> Self {
        Kind::Num(Rc::new(n)).into()
    }

    pub fn num_rc(n: Rc<Number>) -> Self {
        Kind::Num(n).into()
    }

    pub fn com(c: Complex) -> Self {
        // complex values with zero imaginary part demote to rationals
        if c.is_real() {
            Value::num(c.re)
        } else {
            Kind::Com(Rc::new(c)).into()
        }
    }

    pub fn str_rc(s: Rc<str>) -> Self {
        Kind::Str(s).into()
    }

    pub fn string(s: impl AsRef<str>) -> Self {
        Kind::Str(Rc::from(s.as_ref())).into()
    }

    pub fn bool(b: bool) -> Self {
        Value::int(b as i64)
    }

    pub fn mat(m: Matrix) -> Self {
        Kind::Mat(Rc::new(m)).into()
    }

    pub fn list(l: VecDeque<Value>) -> Self {
        Kind::List(Rc::new(l)).into()
    }

    pub fn assoc(a: AssocMap) -> Self {
        Kind::Assoc(Rc::new(a)).into()
    }

    pub fn obj(o: ObjValue) -> Self {
        Kind::Obj(Rc::new(o)).into()
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, Kind::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self.kind, Kind::Int(_) | Kind::Num(_) | Kind::Com(_))
    }

    pub fn is_real(&self) -> bool {
        matches!(self.kind, Kind::Int(_) | Kind::Num(_))
    }

    /// Coerce a real operand to a rational; None for other variants.
    pub fn as_number(&self) -> Option<Number> {
        match &self.kind {
            Kind::Int(n) => Some(Number::from_i64(*n)),
            Kind::Num(n) => Some((**n).clone()),
            _ => None,
        }
    }

    pub fn as_complex(&self) -> Option<Complex> {
        match &self.kind {
            Kind::Int(n) => Some(Complex::new(Number::from_i64(*n), Number::zero())),
            Kind::Num(n) => Some(Complex::new((**n).clone(), Number::zero())),
            Kind::Com(c) => Some((**c).clone()),
            _ => None,
        }
    }

    /// Integer index extraction for matrix/list subscripts.
    pub fn as_index(&self) -> Option<i64> {
        match &self.kind {
            Kind::Int(n) => Some(*n),
            Kind::Num(n) => n.to_i64(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            Kind::Null => "null",
            Kind::Int(_) => "int",
            Kind::Num(_) => "rational",
            Kind::Com(_) => "complex",
            Kind::Str(_) => "string",
            Kind::Mat(_) => "matrix",
            Kind::List(_) => "list",
            Kind::Assoc(_) => "association",
            Kind::Obj(_) => "object",
            Kind::File(_) => "file",
            Kind::Rand(_) => "rand state",
            Kind::Random(_) => "random state",
            Kind::Conf(_) => "config state",
            Kind::Hash(_) => "hash state",
            Kind::Block(_) => "block",
            Kind::Octet(_) => "octet",
            Kind::Ptr(_) => "pointer",
        }
    }

    /// Fixed variant rank for the cross-variant total order used by CMP.
    pub fn variant_rank(&self) -> u8 {
        match &self.kind {
            Kind::Null => 0,
            Kind::Int(_) | Kind::Num(_) => 1,
            Kind::Com(_) => 2,
            Kind::Str(_) => 3,
            Kind::Mat(_) => 4,
            Kind::List(_) => 5,
            Kind::Assoc(_) => 6,
            Kind::Obj(_) => 7,
            Kind::File(_) => 8,
            Kind::Rand(_) => 9,
            Kind::Random(_) => 10,
            Kind::Conf(_) => 11,
            Kind::Hash(_) => 12,
            Kind::Block(_) => 13,
            Kind::Octet(_) => 14,
            Kind::Ptr(_) => 15,
        }
    }

    /// "Nonzero" truth test. Objects are handled a level up (the executor
    /// dispatches to the user `test` method or ORs the elements).
    pub fn test(&self) -> bool {
        match &self.kind {
            Kind::Null => false,
            Kind::Int(n) => *n != 0,
            Kind::Num(n) => !n.is_zero(),
            Kind::Com(c) => !c.is_zero(),
            Kind::Str(s) => !s.is_empty(),
            Kind::Mat(m) => m.elems.iter().any(|e| e.test()),
            Kind::List(l) => l.iter().any(|e| e.test()),
            Kind::Assoc(a) => !a.is_empty(),
            Kind::Obj(o) => o.elems.iter().any(|e| e.test()),
            Kind::Octet(b) => *b != 0,
            Kind::Block(b) => !b.data.is_empty(),
            _ => true,
        }
    }

    /// Content measure of the unary `#` operator: element counts for
    /// aggregates, byte lengths for strings and blocks, one-bit
    /// populations for numbers.
    pub fn content(&self) -> Result<i64, ExecError> {
        Ok(match &self.kind {
            Kind::Null => 0,
            Kind::Int(n) => Number::from_i64(*n).content() as i64,
            Kind::Num(n) => n.content() as i64,
            Kind::Com(c) => (c.re.content() + c.im.content()) as i64,
            Kind::Str(s) => s.len() as i64,
            Kind::Mat(m) => m.total() as i64,
            Kind::List(l) => l.len() as i64,
            Kind::Assoc(a) => a.len() as i64,
            Kind::Obj(o) => o.elems.len() as i64,
            Kind::Block(b) => b.data.len() as i64,
            Kind::Octet(_) => 1,
            other => {
                return Err(ExecError::typ(format!(
                    "no content for {}",
                    Value::from(other.clone()).type_name()
                )))
            }
        })
    }

    /// Render a scalar. Aggregates and objects are rendered by the
    /// runtime, which owns the object-type registry.
    pub fn format_scalar(&self, mode: OutMode, digits: u32, unambig: bool) -> String {
        match &self.kind {
            Kind::Null => String::new(),
            Kind::Int(n) => n.to_string(),
            Kind::Num(n) => n.format(mode, digits),
            Kind::Com(c) => c.format(mode, digits),
            Kind::Str(s) => {
                if unambig {
                    format!("\"{}\"", s)
                } else {
                    s.to_string()
                }
            }
            Kind::File(id) => format!("file {}", id),
            Kind::Octet(b) => format!("{}", b),
            Kind::Block(b) => format!("block: len {}", b.data.len()),
            Kind::Rand(_) => "rand state".into(),
            Kind::Random(_) => "random state".into(),
            Kind::Conf(_) => "config state".into(),
            Kind::Hash(_) => "hash state".into(),
            Kind::Ptr(_) => "pointer".into(),
            other => format!("<{}>", Value::from(other.clone()).type_name()),
        }
    }
}

impl From<Kind> for Value {
    fn from(kind: Kind) -> Self {
        Value {
            kind,
            subtype: SUB_NONE,
        }
    }
}

// ---------------------------------------------------------------------------
// Equality, ordering, hashing
// ---------------------------------------------------------------------------

pub fn values_equal(a: &Value, b: &Value) -> bool {
    matches!(cmp_values(a, b), Ok(0))
}

/// Three-valued comparison. Same-variant operands compare by content;
/// cross-variant operands order by the fixed variant rank. Real numbers
/// (Int and Num) compare numerically regardless of representation.
pub fn cmp_values(a: &Value, b: &Value) -> Result<i32, ExecError> {
    use Kind::*;
    let ord = |o: Ordering| match o {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    };
    match (&a.kind, &b.kind) {
        (Null, Null) => Ok(0),
        (Int(x), Int(y)) => Ok(ord(x.cmp(y))),
        (Int(_) | Num(_), Int(_) | Num(_)) => {
            let x = a.as_number().unwrap();
            let y = b.as_number().unwrap();
            Ok(ord(x.cmp(&y)))
        }
        (Int(_) | Num(_) | Com(_), Com(_)) | (Com(_), Int(_) | Num(_)) => {
            let x = a.as_complex().unwrap();
            let y = b.as_complex().unwrap();
            match x.re.cmp(&y.re) {
                Ordering::Equal => Ok(ord(x.im.cmp(&y.im))),
                o => Ok(ord(o)),
            }
        }
        (Str(x), Str(y)) => Ok(ord(x.as_bytes().cmp(y.as_bytes()))),
        (Mat(x), Mat(y)) => {
            if x.dims != y.dims {
                let shape = |m: &crate::core::matrix::Matrix| {
                    m.dims.iter().map(|d| (d.size, d.lo)).collect::<Vec<_>>()
                };
                return Ok(ord(shape(x).cmp(&shape(y))));
            }
            for (ex, ey) in x.elems.iter().zip(&y.elems) {
                let c = cmp_values(ex, ey)?;
                if c != 0 {
                    return Ok(c);
                }
            }
            Ok(0)
        }
        (List(x), List(y)) => {
            match x.len().cmp(&y.len()) {
                Ordering::Equal => {}
                o => return Ok(ord(o)),
            }
            for (ex, ey) in x.iter().zip(y.iter()) {
                let c = cmp_values(ex, ey)?;
                if c != 0 {
                    return Ok(c);
                }
            }
            Ok(0)
        }
        (Assoc(x), Assoc(y)) => Ok(if x.equals(y) { 0 } else { 1 }),
        (Obj(x), Obj(y)) => {
            if x.ty.id != y.ty.id || x.elems.len() != y.elems.len() {
                return Ok(1);
            }
            for (ex, ey) in x.elems.iter().zip(&y.elems) {
                if cmp_values(ex, ey)? != 0 {
                    return Ok(1);
                }
            }
            Ok(0)
        }
        (File(x), File(y)) => Ok(ord(x.cmp(y))),
        (Octet(x), Octet(y)) => Ok(ord(x.cmp(y))),
        (Block(x), Block(y)) => Ok(ord(x.data.cmp(&y.data))),
        (Rand(x), Rand(y)) => Ok(if Rc::ptr_eq(x, y) { 0 } else { 1 }),
        (Random(x), Random(y)) => Ok(if Rc::ptr_eq(x, y) { 0 } else { 1 }),
        (Conf(x), Conf(y)) => Ok(if Rc::ptr_eq(x, y) { 0 } else { 1 }),
        (Hash(x), Hash(y)) => Ok(ord(x.accum.cmp(&y.accum))),
        (Ptr(x), Ptr(y)) => Ok(if ptr_equal(x, y) { 0 } else { 1 }),
        _ => Ok(ord(a.variant_rank().cmp(&b.variant_rank()))),
    }
}

fn ptr_equal(a: &PtrVal, b: &PtrVal) -> bool {
    if a.kind != b.kind || a.addr.base != b.addr.base || a.addr.path.len() != b.addr.path.len() {
        return false;
    }
    a.addr.path.iter().zip(&b.addr.path).all(|(x, y)| match (x, y) {
        (Step::Fast(i), Step::Fast(j)) => i == j,
        (Step::Elem(i), Step::Elem(j)) => i == j,
        (Step::Mat(i), Step::Mat(j)) => {
            i.len() == j.len() && i.iter().zip(j).all(|(u, v)| values_equal(u, v))
        }
        _ => false,
    })
}

/// Deterministic value hash used for association keys. Int and Num hash
/// identically for equal numeric values.
pub fn hash_value(v: &Value) -> u64 {
    const BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut h = BASIS;
    let mut feed = |bytes: &[u8]| {
        for &b in bytes {
            h ^= b as u64;
            h = h.wrapping_mul(PRIME);
        }
    };
    match &v.kind {
        Kind::Null => feed(b"null"),
        Kind::Int(n) => {
            let q = Number::from_i64(*n);
            feed(b"num");
            feed(&q.numerator().to_signed_bytes_le());
            feed(&q.denominator().to_bytes_le());
        }
        Kind::Num(n) => {
            feed(b"num");
            feed(&n.numerator().to_signed_bytes_le());
            feed(&n.denominator().to_bytes_le());
        }
        Kind::Com(c) => {
            feed(b"com");
            feed(&c.re.numerator().to_signed_bytes_le());
            feed(&c.im.numerator().to_signed_bytes_le());
        }
        Kind::Str(s) => {
            feed(b"str");
            feed(s.as_bytes());
        }
        Kind::Mat(m) => {
            feed(b"mat");
            for e in &m.elems {
                let eh = hash_value(e);
                feed(&eh.to_le_bytes());
            }
        }
        Kind::List(l) => {
            feed(b"list");
            for e in l.iter() {
                let eh = hash_value(e);
                feed(&eh.to_le_bytes());
            }
        }
        Kind::Assoc(a) => {
            feed(b"assoc");
            feed(&(a.len() as u64).to_le_bytes());
        }
        Kind::Obj(o) => {
            feed(b"obj");
            feed(&(o.ty.id as u64).to_le_bytes());
            for e in &o.elems {
                let eh = hash_value(e);
                feed(&eh.to_le_bytes());
            }
        }
        Kind::File(id) => feed(&id.to_le_bytes()),
        Kind::Octet(b) => feed(&[*b]),
        Kind::Block(b) => feed(&b.data),
        Kind::Hash(hs) => feed(&hs.accum.to_le_bytes()),
        Kind::Rand(_) | Kind::Random(_) | Kind::Conf(_) | Kind::Ptr(_) => {
            feed(v.type_name().as_bytes())
        }
    }
    h
}

// ---------------------------------------------------------------------------
// Arithmetic dispatch (non-object operands)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumOp {
    Add,
    Sub,
    Mul,
    Div,
    Quo,
    Mod,
    Power,
    And,
    Or,
    Xor,
    SetMinus,
    LeftShift,
    RightShift,
    HashOp,
}

/// Binary arithmetic over non-object operands. Operands coerce to the
/// richer numeric type; matrices get elementwise/product handling.
/// Object operands must be routed through the object dispatcher first.
pub fn binary_op(op: NumOp, a: &Value, b: &Value) -> Result<Value, ExecError> {
    use Kind::*;
    // matrix cases first
    match (&a.kind, &b.kind, op) {
        (Mat(x), Mat(y), NumOp::Add) => {
            return Ok(Value::mat(x.zip_with(y, |p, q| binary_op(NumOp::Add, p, q))?))
        }
        (Mat(x), Mat(y), NumOp::Sub) => {
            return Ok(Value::mat(x.zip_with(y, |p, q| binary_op(NumOp::Sub, p, q))?))
        }
        (Mat(x), Mat(y), NumOp::Mul) => {
            return Ok(Value::mat(x.matmul(
                y,
                |p, q| binary_op(NumOp::Mul, p, q),
                |p, q| binary_op(NumOp::Add, p, q),
            )?))
        }
        (Mat(x), _, NumOp::Mul | NumOp::Div) if b.is_number() => {
            return Ok(Value::mat(x.map(|e| binary_op(op, e, b))?))
        }
        (_, Mat(y), NumOp::Mul) if a.is_number() => {
            return Ok(Value::mat(y.map(|e| binary_op(op, a, e))?))
        }
        _ => {}
    }
    if !a.is_number() || !b.is_number() {
        return Err(ExecError::typ(format!(
            "bad operands for arithmetic: {} and {}",
            a.type_name(),
            b.type_name()
        )));
    }
    // complex plane when either side is complex
    if matches!(a.kind, Com(_)) || matches!(b.kind, Com(_)) {
        let x = a.as_complex().unwrap();
        let y = b.as_complex().unwrap();
        let r = match op {
            NumOp::Add => x.add(&y),
            NumOp::Sub => x.sub(&y),
            NumOp::Mul => x.mul(&y),
            NumOp::Div => x.div(&y)?,
            NumOp::Power => {
                if !y.is_real() {
                    return Err(ExecError::domain("complex exponent"));
                }
                x.powi(&y.re)?
            }
            _ => {
                return Err(ExecError::typ("bad operation for complex operands"));
            }
        };
        return Ok(Value::com(r));
    }
    let x = a.as_number().unwrap();
    let y = b.as_number().unwrap();
    let r = match op {
        NumOp::Add => x.add(&y),
        NumOp::Sub => x.sub(&y),
        NumOp::Mul => x.mul(&y),
        NumOp::Div => x.div(&y)?,
        NumOp::Quo => x.quo(&y)?,
        NumOp::Mod => x.modulo(&y)?,
        NumOp::Power => x.powi(&y)?,
        NumOp::And => x.bit_and(&y)?,
        NumOp::Or => x.bit_or(&y)?,
        NumOp::Xor => x.bit_xor(&y)?,
        NumOp::SetMinus => x.bit_setminus(&y)?,
        NumOp::LeftShift => {
            let c = y
                .to_i64()
                .ok_or_else(|| ExecError::typ("non-integer shift count"))?;
            x.shift(c)?
        }
        NumOp::RightShift => {
            let c = y
                .to_i64()
                .ok_or_else(|| ExecError::typ("non-integer shift count"))?;
            x.shift(-c)?
        }
        NumOp::HashOp => {
            let ha = hash_value(a);
            let hb = hash_value(b);
            return Ok(Value::int(
                (ha.wrapping_mul(3).wrapping_add(hb) & 0x7fff_ffff_ffff_ffff) as i64,
            ));
        }
    };
    Ok(Value::num(r))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Plus,
    Invert,
    Square,
    Comp,
    BackSlash,
    Abs,
    Int,
    Frac,
    Conj,
    Norm,
    Re,
    Im,
}

/// Unary arithmetic over non-object operands.
pub fn unary_op(op: UnaryOp, v: &Value) -> Result<Value, ExecError> {
    use Kind::*;
    if let Mat(m) = &v.kind {
        return match op {
            UnaryOp::Negate | UnaryOp::Plus | UnaryOp::Conj => {
                Ok(Value::mat(m.map(|e| unary_op(op, e))?))
            }
            _ => Err(ExecError::typ("bad matrix operation")),
        };
    }
    if let Com(c) = &v.kind {
        return Ok(match op {
            UnaryOp::Negate => Value::com(c.neg()),
            UnaryOp::Plus => v.clone(),
            UnaryOp::Invert => Value::com(c.inv()?),
            UnaryOp::Square => Value::com(c.square()),
            UnaryOp::Conj => Value::com(c.conj()),
            UnaryOp::Norm => Value::num(c.norm()),
            UnaryOp::Re => Value::num(c.re.clone()),
            UnaryOp::Im => Value::num(c.im.clone()),
            UnaryOp::Abs | UnaryOp::Int | UnaryOp::Frac | UnaryOp::Comp | UnaryOp::BackSlash => {
                return Err(ExecError::typ("bad operation for complex operand"))
            }
        });
    }
    let x = v
        .as_number()
        .ok_or_else(|| ExecError::typ(format!("bad operand for arithmetic: {}", v.type_name())))?;
    Ok(Value::num(match op {
        UnaryOp::Negate => x.neg(),
        UnaryOp::Plus => x,
        UnaryOp::Invert => x.inv()?,
        UnaryOp::Square => x.square(),
        UnaryOp::Abs => x.abs(),
        UnaryOp::Int => x.int_part(),
        UnaryOp::Frac => x.frac_part(),
        UnaryOp::Conj => x,
        UnaryOp::Norm => x.square(),
        UnaryOp::Re => x,
        UnaryOp::Im => Number::zero(),
        UnaryOp::Comp => {
            // bitwise complement of an integer: -x - 1
            if !x.is_integer() {
                return Err(ExecError::typ("complement of non-integer"));
            }
            x.neg().sub(&Number::one())
        }
        UnaryOp::BackSlash => {
            // 2^x for integral x
            let n = x
                .to_i64()
                .ok_or_else(|| ExecError::domain("non-integral bit position"))?;
            Number::one().scale(n)
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_and_num_compare_numerically() {
        let a = Value::int(2);
        let b = Value::num(Number::from_i64(2));
        assert!(values_equal(&a, &b));
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn isnull_is_variant_exact() {
        assert!(Value::null().is_null());
        assert!(!Value::int(0).is_null());
        assert!(!Value::string("").is_null());
    }

    #[test]
    fn cross_variant_order_is_total() {
        let s = Value::string("x");
        let n = Value::int(3);
        assert_eq!(cmp_values(&n, &s).unwrap(), -1);
        assert_eq!(cmp_values(&s, &n).unwrap(), 1);
    }

    #[test]
    fn division_routes_domain_errors() {
        let e = binary_op(NumOp::Div, &Value::int(1), &Value::int(0));
        assert!(matches!(e, Err(ExecError::Domain(_))));
    }

    #[test]
    fn complex_demotes_to_real() {
        let i = Value::com(Complex::from_imaginary(Number::one()));
        let sq = binary_op(NumOp::Mul, &i, &i).unwrap();
        assert!(matches!(sq.kind, Kind::Num(_)));
        assert!(values_equal(&sq, &Value::int(-1)));
    }
}
