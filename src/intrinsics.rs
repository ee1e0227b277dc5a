/// Built-in functions.
///
/// One static table drives everything: the compiler consults it for
/// arity checking and opcode substitution, the executor dispatches CALL
/// through it. Builtins backed by a dedicated opcode never reach a
/// native handler; the compiler emits the opcode directly. Native
/// handlers receive raw argument slots, so builtins that mutate (append,
/// matfill, protect) get real addresses.

use crate::bytecode::Op;
use crate::core::assoc::AssocMap;
use crate::core::number::Number;
use crate::core::value::{hash_value, Block, HashState, Kind, Value};
use crate::errors::ExecError;
use crate::random::{AddRand, BlumRng};
use crate::vm::{Slot, Vm};
use num_bigint::BigInt;
use num_integer::Roots;
use num_traits::{Signed, ToPrimitive, Zero};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::rc::Rc;

pub enum BuiltinImpl {
    /// Compiles straight to this opcode when the argument count is
    /// exact; the handler path is never taken.
    Opcode(Op),
    Native(fn(&mut Vm, Vec<Slot>) -> Result<Value, ExecError>),
}

pub struct Builtin {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub imp: BuiltinImpl,
    pub doc: &'static str,
}

use BuiltinImpl::{Native, Opcode};

pub static BUILTINS: &[Builtin] = &[
    Builtin { name: "abs", min_args: 1, max_args: 1, imp: Opcode(Op::Abs), doc: "absolute value" },
    Builtin { name: "append", min_args: 2, max_args: usize::MAX, imp: Native(b_append), doc: "append values to the tail of a list" },
    Builtin { name: "argv", min_args: 0, max_args: 1, imp: Native(b_argv), doc: "command line string arguments" },
    Builtin { name: "assoc", min_args: 0, max_args: 0, imp: Native(b_assoc), doc: "create an association" },
    Builtin { name: "bit", min_args: 2, max_args: 2, imp: Opcode(Op::Bit), doc: "whether bit n is set" },
    Builtin { name: "blk", min_args: 0, max_args: 1, imp: Native(b_blk), doc: "create a block of octets" },
    Builtin { name: "char", min_args: 1, max_args: 1, imp: Native(b_char), doc: "character from octet value" },
    Builtin { name: "cmp", min_args: 2, max_args: 2, imp: Opcode(Op::Cmp), doc: "three-valued comparison" },
    Builtin { name: "config", min_args: 1, max_args: 2, imp: Native(b_config), doc: "read or set a configuration parameter" },
    Builtin { name: "conj", min_args: 1, max_args: 1, imp: Opcode(Op::Conjugate), doc: "complex conjugate" },
    Builtin { name: "delete", min_args: 2, max_args: 2, imp: Native(b_delete), doc: "delete a list element by position" },
    Builtin { name: "den", min_args: 1, max_args: 1, imp: Opcode(Op::Denominator), doc: "denominator of a rational" },
    Builtin { name: "epsilon", min_args: 0, max_args: 1, imp: Native(b_epsilon), doc: "read or set the error bound" },
    Builtin { name: "fact", min_args: 1, max_args: 1, imp: Native(b_fact), doc: "factorial" },
    Builtin { name: "fclose", min_args: 1, max_args: 1, imp: Native(b_fclose), doc: "close a file" },
    Builtin { name: "fgetline", min_args: 1, max_args: 1, imp: Native(b_fgetline), doc: "read one line from a file" },
    Builtin { name: "fopen", min_args: 2, max_args: 2, imp: Native(b_fopen), doc: "open a file: modes r and w" },
    Builtin { name: "fputs", min_args: 2, max_args: usize::MAX, imp: Native(b_fputs), doc: "write strings to a file" },
    Builtin { name: "frac", min_args: 1, max_args: 1, imp: Opcode(Op::FracPart), doc: "fractional part" },
    Builtin { name: "gcd", min_args: 2, max_args: usize::MAX, imp: Native(b_gcd), doc: "greatest common divisor" },
    Builtin { name: "hash", min_args: 1, max_args: usize::MAX, imp: Native(b_hash), doc: "hash one or more values" },
    Builtin { name: "hashfinal", min_args: 1, max_args: 1, imp: Native(b_hashfinal), doc: "finish an incremental hash" },
    Builtin { name: "hashinit", min_args: 0, max_args: 0, imp: Native(b_hashinit), doc: "start an incremental hash" },
    Builtin { name: "hashval", min_args: 2, max_args: usize::MAX, imp: Native(b_hashval), doc: "feed values to an incremental hash" },
    Builtin { name: "highbit", min_args: 1, max_args: 1, imp: Opcode(Op::HighBit), doc: "index of the highest set bit" },
    Builtin { name: "im", min_args: 1, max_args: 1, imp: Opcode(Op::Im), doc: "imaginary part" },
    Builtin { name: "insert", min_args: 3, max_args: usize::MAX, imp: Native(b_insert), doc: "insert values into a list" },
    Builtin { name: "int", min_args: 1, max_args: 1, imp: Opcode(Op::IntPart), doc: "integer part" },
    Builtin { name: "isassoc", min_args: 1, max_args: 1, imp: Opcode(Op::IsAssoc), doc: "whether value is an association" },
    Builtin { name: "isblk", min_args: 1, max_args: 1, imp: Opcode(Op::IsBlk), doc: "whether value is a block" },
    Builtin { name: "isconfig", min_args: 1, max_args: 1, imp: Opcode(Op::IsConfig), doc: "whether value is a config state" },
    Builtin { name: "isdefined", min_args: 1, max_args: 1, imp: Opcode(Op::IsDefined), doc: "whether a string names a function" },
    Builtin { name: "iseven", min_args: 1, max_args: 1, imp: Opcode(Op::IsEven), doc: "whether value is an even integer" },
    Builtin { name: "isfile", min_args: 1, max_args: 1, imp: Opcode(Op::IsFile), doc: "whether value is a file" },
    Builtin { name: "ishash", min_args: 1, max_args: 1, imp: Opcode(Op::IsHash), doc: "whether value is a hash state" },
    Builtin { name: "isint", min_args: 1, max_args: 1, imp: Opcode(Op::IsInt), doc: "whether value is an integer" },
    Builtin { name: "islist", min_args: 1, max_args: 1, imp: Opcode(Op::IsList), doc: "whether value is a list" },
    Builtin { name: "ismat", min_args: 1, max_args: 1, imp: Opcode(Op::IsMat), doc: "whether value is a matrix" },
    Builtin { name: "isnull", min_args: 1, max_args: 1, imp: Opcode(Op::IsNull), doc: "whether value is null" },
    Builtin { name: "isnum", min_args: 1, max_args: 1, imp: Opcode(Op::IsNum), doc: "whether value is a number" },
    Builtin { name: "isobj", min_args: 1, max_args: 1, imp: Opcode(Op::IsObj), doc: "whether value is an object" },
    Builtin { name: "isobjtype", min_args: 1, max_args: 1, imp: Opcode(Op::IsObjType), doc: "whether a string names an object type" },
    Builtin { name: "isoctet", min_args: 1, max_args: 1, imp: Opcode(Op::IsOctet), doc: "whether value is an octet" },
    Builtin { name: "isodd", min_args: 1, max_args: 1, imp: Opcode(Op::IsOdd), doc: "whether value is an odd integer" },
    Builtin { name: "isptr", min_args: 1, max_args: 1, imp: Opcode(Op::IsPtr), doc: "whether value is a pointer" },
    Builtin { name: "isqrt", min_args: 1, max_args: 1, imp: Native(b_isqrt), doc: "integer square root" },
    Builtin { name: "isrand", min_args: 1, max_args: 1, imp: Opcode(Op::IsRand), doc: "whether value is an additive random state" },
    Builtin { name: "israndom", min_args: 1, max_args: 1, imp: Opcode(Op::IsRandom), doc: "whether value is a Blum random state" },
    Builtin { name: "isreal", min_args: 1, max_args: 1, imp: Opcode(Op::IsReal), doc: "whether value is a real number" },
    Builtin { name: "issimple", min_args: 1, max_args: 1, imp: Opcode(Op::IsSimple), doc: "whether value is a simple type" },
    Builtin { name: "isstr", min_args: 1, max_args: 1, imp: Opcode(Op::IsStr), doc: "whether value is a string" },
    Builtin { name: "istype", min_args: 2, max_args: 2, imp: Opcode(Op::IsType), doc: "whether two values share a type" },
    Builtin { name: "links", min_args: 1, max_args: 1, imp: Opcode(Op::Links), doc: "reference count of a value" },
    Builtin { name: "list", min_args: 0, max_args: usize::MAX, imp: Native(b_list), doc: "create a list of values" },
    Builtin { name: "lowbit", min_args: 1, max_args: 1, imp: Opcode(Op::LowBit), doc: "index of the lowest set bit" },
    Builtin { name: "matdim", min_args: 1, max_args: 1, imp: Native(b_matdim), doc: "dimensionality of a matrix" },
    Builtin { name: "matfill", min_args: 2, max_args: 2, imp: Native(b_matfill), doc: "fill a matrix with a value" },
    Builtin { name: "max", min_args: 1, max_args: usize::MAX, imp: Native(b_max), doc: "largest of the arguments" },
    Builtin { name: "min", min_args: 1, max_args: usize::MAX, imp: Native(b_min), doc: "smallest of the arguments" },
    Builtin { name: "norm", min_args: 1, max_args: 1, imp: Opcode(Op::Norm), doc: "square of the absolute value" },
    Builtin { name: "null", min_args: 0, max_args: 0, imp: Native(b_null), doc: "the null value" },
    Builtin { name: "num", min_args: 1, max_args: 1, imp: Opcode(Op::Numerator), doc: "numerator of a rational" },
    Builtin { name: "ord", min_args: 1, max_args: 1, imp: Native(b_ord), doc: "octet value of a character" },
    Builtin { name: "param", min_args: 1, max_args: 1, imp: Native(b_param), doc: "value of the nth function argument" },
    Builtin { name: "pop", min_args: 1, max_args: 1, imp: Native(b_pop), doc: "remove and return the head of a list" },
    Builtin { name: "protect", min_args: 1, max_args: 2, imp: Native(b_protect), doc: "set or clear assignment protection" },
    Builtin { name: "push", min_args: 2, max_args: usize::MAX, imp: Native(b_push), doc: "push values onto the head of a list" },
    Builtin { name: "rand", min_args: 0, max_args: 2, imp: Native(b_rand), doc: "additive-55 pseudo-random value" },
    Builtin { name: "random", min_args: 0, max_args: 2, imp: Native(b_random), doc: "Blum-Blum-Shub pseudo-random value" },
    Builtin { name: "randombit", min_args: 1, max_args: 1, imp: Native(b_randombit), doc: "draw (or skip) Blum random bits" },
    Builtin { name: "re", min_args: 1, max_args: 1, imp: Opcode(Op::Re), doc: "real part" },
    Builtin { name: "remove", min_args: 1, max_args: 1, imp: Native(b_remove), doc: "remove and return the tail of a list" },
    Builtin { name: "saveval", min_args: 1, max_args: 1, imp: Opcode(Op::SaveVal), doc: "enable or disable old-value updates" },
    Builtin { name: "scale", min_args: 2, max_args: 2, imp: Opcode(Op::Scale), doc: "multiply by a power of two" },
    Builtin { name: "sgn", min_args: 1, max_args: 1, imp: Opcode(Op::Sgn), doc: "sign of a number" },
    Builtin { name: "size", min_args: 1, max_args: 1, imp: Native(b_size), doc: "element count of a value" },
    Builtin { name: "sqrt", min_args: 1, max_args: 2, imp: Native(b_sqrt), doc: "square root within an error bound" },
    Builtin { name: "srand", min_args: 0, max_args: 1, imp: Native(b_srand), doc: "seed the additive-55 generator" },
    Builtin { name: "srandom", min_args: 0, max_args: 4, imp: Native(b_srandom), doc: "seed the Blum-Blum-Shub generator" },
    Builtin { name: "str", min_args: 1, max_args: 1, imp: Native(b_str), doc: "convert a value to a string" },
    Builtin { name: "strcat", min_args: 1, max_args: usize::MAX, imp: Native(b_strcat), doc: "concatenate strings" },
    Builtin { name: "strlen", min_args: 1, max_args: 1, imp: Native(b_strlen), doc: "length of a string" },
    Builtin { name: "substr", min_args: 3, max_args: 3, imp: Native(b_substr), doc: "substring by position and length" },
    Builtin { name: "sum", min_args: 1, max_args: usize::MAX, imp: Native(b_sum), doc: "sum of the arguments" },
    Builtin { name: "swap", min_args: 2, max_args: 2, imp: Opcode(Op::Swap), doc: "exchange the values of two variables" },
    Builtin { name: "test", min_args: 1, max_args: 1, imp: Opcode(Op::Test), doc: "whether a value tests nonzero" },
    Builtin { name: "writeglobals", min_args: 1, max_args: 1, imp: Native(b_writeglobals), doc: "write global variables to a file" },
];

pub fn lookup(name: &str) -> Option<usize> {
    BUILTINS.binary_search_by(|b| b.name.cmp(name)).ok()
}

pub fn builtin(index: usize) -> &'static Builtin {
    &BUILTINS[index]
}

pub fn check_arity(index: usize, argc: usize) -> Result<(), String> {
    let b = &BUILTINS[index];
    if argc < b.min_args {
        return Err(format!(
            "Too few arguments for builtin function \"{}\"",
            b.name
        ));
    }
    if argc > b.max_args {
        return Err(format!(
            "Too many arguments for builtin function \"{}\"",
            b.name
        ));
    }
    Ok(())
}

/// Dispatch a CALL opcode.
pub fn call(vm: &mut Vm, index: usize, args: Vec<Slot>) -> Result<Value, ExecError> {
    let b = &BUILTINS[index];
    match &b.imp {
        Native(f) => f(vm, args),
        Opcode(_) => Err(ExecError::typ(format!(
            "builtin \"{}\" called with a bad argument count",
            b.name
        ))),
    }
}

/// Listing for `show builtins`.
pub fn show_builtins() -> String {
    let mut out = String::from("Name        Args    Description\n----        ----    -----------\n");
    for b in BUILTINS {
        let args = if b.max_args == usize::MAX {
            format!("{}+", b.min_args)
        } else if b.min_args == b.max_args {
            format!("{}", b.min_args)
        } else {
            format!("{}-{}", b.min_args, b.max_args)
        };
        let _ = writeln!(out, "{:11} {:7} {}", b.name, args, b.doc);
    }
    out
}

// ---------------------------------------------------------------------------
// Handler helpers
// ---------------------------------------------------------------------------

fn value_of(vm: &Vm, slot: &Slot) -> Result<Value, ExecError> {
    vm.slot_value(slot)
}

fn number_arg(vm: &Vm, slot: &Slot, what: &str) -> Result<Number, ExecError> {
    value_of(vm, slot)?
        .as_number()
        .ok_or_else(|| ExecError::typ(format!("{} must be a number", what)))
}

fn int_arg(vm: &Vm, slot: &Slot, what: &str) -> Result<i64, ExecError> {
    value_of(vm, slot)?
        .as_index()
        .ok_or_else(|| ExecError::typ(format!("{} must be an integer", what)))
}

fn str_arg(vm: &Vm, slot: &Slot, what: &str) -> Result<Rc<str>, ExecError> {
    match value_of(vm, slot)?.kind {
        Kind::Str(s) => Ok(s),
        _ => Err(ExecError::typ(format!("{} must be a string", what))),
    }
}

fn bigint_arg(vm: &Vm, slot: &Slot, what: &str) -> Result<BigInt, ExecError> {
    let q = number_arg(vm, slot, what)?;
    if !q.is_integer() {
        return Err(ExecError::typ(format!("{} must be an integer", what)));
    }
    Ok(q.numerator().clone())
}

/// Mutate a list argument in place; the argument must be an lvalue.
fn with_list<T>(
    vm: &mut Vm,
    slot: &Slot,
    f: impl FnOnce(&mut VecDeque<Value>) -> Result<T, ExecError>,
) -> Result<T, ExecError> {
    let addr = match slot {
        Slot::Addr(a) => a.clone(),
        Slot::Val(_) => return Err(ExecError::typ("list operation requires an lvalue")),
    };
    let current = vm.read_addr(&addr)?;
    let mut list = match current.kind {
        Kind::List(l) => (*l).clone(),
        _ => return Err(ExecError::typ("list operation on a non-list")),
    };
    let out = f(&mut list)?;
    vm.write_addr(&addr, Value::list(list))?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Native handlers
// ---------------------------------------------------------------------------

fn b_null(_vm: &mut Vm, _args: Vec<Slot>) -> Result<Value, ExecError> {
    Ok(Value::null())
}

fn b_list(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let mut l = VecDeque::with_capacity(args.len());
    for a in &args {
        l.push_back(value_of(vm, a)?);
    }
    Ok(Value::list(l))
}

fn b_append(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let mut values = Vec::new();
    for a in &args[1..] {
        values.push(value_of(vm, a)?);
    }
    with_list(vm, &args[0], |l| {
        for v in values {
            l.push_back(v);
        }
        Ok(())
    })?;
    Ok(Value::null())
}

fn b_push(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let mut values = Vec::new();
    for a in &args[1..] {
        values.push(value_of(vm, a)?);
    }
    with_list(vm, &args[0], |l| {
        for v in values {
            l.push_front(v);
        }
        Ok(())
    })?;
    Ok(Value::null())
}

fn b_pop(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    with_list(vm, &args[0], |l| Ok(l.pop_front().unwrap_or_else(Value::null)))
}

fn b_remove(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    with_list(vm, &args[0], |l| Ok(l.pop_back().unwrap_or_else(Value::null)))
}

fn b_insert(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let pos = int_arg(vm, &args[1], "insert position")?;
    let mut values = Vec::new();
    for a in &args[2..] {
        values.push(value_of(vm, a)?);
    }
    with_list(vm, &args[0], |l| {
        if pos < 0 || pos as usize > l.len() {
            return Err(ExecError::domain("insert position out of range"));
        }
        for (k, v) in values.into_iter().enumerate() {
            l.insert(pos as usize + k, v);
        }
        Ok(())
    })?;
    Ok(Value::null())
}

fn b_delete(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let pos = int_arg(vm, &args[1], "delete position")?;
    with_list(vm, &args[0], |l| {
        if pos < 0 || pos as usize >= l.len() {
            return Err(ExecError::domain("delete position out of range"));
        }
        Ok(l.remove(pos as usize).unwrap_or_else(Value::null))
    })
}

fn b_size(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let v = value_of(vm, &args[0])?;
    let n = match &v.kind {
        Kind::Null => 0,
        Kind::List(l) => l.len() as i64,
        Kind::Mat(m) => m.total() as i64,
        Kind::Assoc(a) => a.len() as i64,
        Kind::Str(s) => s.len() as i64,
        Kind::Block(b) => b.data.len() as i64,
        Kind::Obj(o) => o.elems.len() as i64,
        _ => 1,
    };
    Ok(Value::int(n))
}

fn b_assoc(_vm: &mut Vm, _args: Vec<Slot>) -> Result<Value, ExecError> {
    Ok(Value::assoc(AssocMap::new()))
}

fn b_blk(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let len = match args.first() {
        Some(a) => int_arg(vm, a, "block length")?,
        None => 0,
    };
    if !(0..=1 << 24).contains(&len) {
        return Err(ExecError::domain("block length out of range"));
    }
    Ok(Kind::Block(Rc::new(Block {
        data: vec![0; len as usize],
        pos: 0,
    }))
    .into())
}

fn b_matdim(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    match value_of(vm, &args[0])?.kind {
        Kind::Mat(m) => Ok(Value::int(m.dim() as i64)),
        _ => Err(ExecError::typ("matdim of a non-matrix")),
    }
}

fn b_matfill(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let fill = value_of(vm, &args[1])?;
    let addr = match &args[0] {
        Slot::Addr(a) => a.clone(),
        Slot::Val(_) => return Err(ExecError::typ("matfill requires an lvalue")),
    };
    let current = vm.read_addr(&addr)?;
    match current.kind {
        Kind::Mat(m) => {
            let mut m = (*m).clone();
            m.fill(&fill);
            vm.write_addr(&addr, Value::mat(m))?;
            Ok(Value::null())
        }
        _ => Err(ExecError::typ("matfill of a non-matrix")),
    }
}

fn b_fact(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let n = bigint_arg(vm, &args[0], "factorial argument")?;
    if n.is_negative() {
        return Err(ExecError::domain("factorial of a negative value"));
    }
    let n = n
        .to_u64()
        .filter(|&n| n <= 100_000)
        .ok_or_else(|| ExecError::domain("factorial argument too large"))?;
    let mut acc = BigInt::from(1);
    for k in 2..=n {
        acc *= k;
    }
    Ok(Value::num(Number::from_int(acc)))
}

fn b_gcd(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    use num_integer::Integer;
    let mut acc = BigInt::zero();
    for a in &args {
        let n = bigint_arg(vm, a, "gcd argument")?;
        acc = acc.gcd(&n);
    }
    Ok(Value::num(Number::from_int(acc)))
}

fn b_isqrt(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let n = bigint_arg(vm, &args[0], "isqrt argument")?;
    if n.is_negative() {
        return Err(ExecError::domain("isqrt of a negative value"));
    }
    Ok(Value::num(Number::from_int(n.sqrt())))
}

fn b_sqrt(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let x = number_arg(vm, &args[0], "sqrt argument")?;
    if x.is_negative() {
        return Err(ExecError::domain("sqrt of a negative value"));
    }
    let eps = match args.get(1) {
        Some(a) => number_arg(vm, a, "sqrt epsilon")?,
        None => vm.rt.conf.epsilon.clone(),
    };
    if eps.is_zero() || eps.is_negative() {
        return Err(ExecError::domain("sqrt epsilon must be positive"));
    }
    // sqrt(n/d) = isqrt(n*d*s^2) / (d*s) with 1/s below the error bound
    let s = eps.inv()?.int_part().add(&Number::one());
    let s_int = s.numerator().magnitude().clone();
    let n = x.numerator().magnitude() * x.denominator() * (&s_int * &s_int);
    let root = n.sqrt();
    let den = x.denominator() * &s_int;
    Ok(Value::num(Number::new(
        BigInt::from(root),
        BigInt::from(den),
    )?))
}

fn b_min(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    fold_extreme(vm, args, true)
}

fn b_max(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    fold_extreme(vm, args, false)
}

fn fold_extreme(vm: &mut Vm, args: Vec<Slot>, want_min: bool) -> Result<Value, ExecError> {
    let mut best: Option<Value> = None;
    for a in &args {
        let v = value_of(vm, a)?;
        if v.is_null() {
            continue;
        }
        let key = match &v.kind {
            Kind::Obj(_) => vm.objcall(
                if want_min {
                    crate::core::oop::OBJ_MIN
                } else {
                    crate::core::oop::OBJ_MAX
                },
                vec![Slot::Val(v.clone())],
            )?,
            _ => v.clone(),
        };
        best = Some(match best {
            None => key,
            Some(cur) => {
                let c = vm.rel_order(&key, &cur)?;
                if (want_min && c < 0) || (!want_min && c > 0) {
                    key
                } else {
                    cur
                }
            }
        });
    }
    Ok(best.unwrap_or_else(Value::null))
}

fn b_sum(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let mut acc: Option<Value> = None;
    for a in &args {
        let v = value_of(vm, a)?;
        if v.is_null() {
            continue;
        }
        let v = match &v.kind {
            Kind::Obj(_) => vm.objcall(crate::core::oop::OBJ_SUM, vec![Slot::Val(v.clone())])?,
            _ => v,
        };
        acc = Some(match acc {
            None => v,
            Some(cur) => {
                crate::core::value::binary_op(crate::core::value::NumOp::Add, &cur, &v)?
            }
        });
    }
    Ok(acc.unwrap_or_else(Value::null))
}

// ── strings ────────────────────────────────────────────────────────────────

fn b_str(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let v = value_of(vm, &args[0])?;
    let text = vm.rt.format_value(&v);
    Ok(Value::string(text))
}

fn b_strlen(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let s = str_arg(vm, &args[0], "strlen argument")?;
    Ok(Value::int(s.len() as i64))
}

fn b_strcat(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let mut out = String::new();
    for a in &args {
        out.push_str(&str_arg(vm, a, "strcat argument")?);
    }
    Ok(Value::string(out))
}

fn b_substr(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let s = str_arg(vm, &args[0], "substr argument")?;
    let start = int_arg(vm, &args[1], "substr position")?;
    let len = int_arg(vm, &args[2], "substr length")?;
    if start < 1 || len < 0 {
        return Err(ExecError::domain("bad substr position"));
    }
    let bytes = s.as_bytes();
    let from = (start - 1) as usize;
    if from >= bytes.len() {
        return Ok(Value::string(""));
    }
    let to = (from + len as usize).min(bytes.len());
    Ok(Value::string(String::from_utf8_lossy(&bytes[from..to])))
}

fn b_char(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let n = int_arg(vm, &args[0], "char argument")?;
    let b = u8::try_from(n).map_err(|_| ExecError::domain("char value out of range"))?;
    Ok(Value::string(String::from(b as char)))
}

fn b_ord(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let v = value_of(vm, &args[0])?;
    match &v.kind {
        Kind::Str(s) => Ok(Value::int(s.as_bytes().first().copied().unwrap_or(0) as i64)),
        Kind::Octet(b) => Ok(Value::int(*b as i64)),
        _ => Err(ExecError::typ("ord needs a string or octet")),
    }
}

// ── hashing ────────────────────────────────────────────────────────────────

fn b_hash(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let mut state = HashState::default();
    for a in &args {
        let v = value_of(vm, a)?;
        state.update(hash_value(&v));
    }
    Ok(Value::int((state.accum & 0x7fff_ffff_ffff_ffff) as i64))
}

fn b_hashinit(_vm: &mut Vm, _args: Vec<Slot>) -> Result<Value, ExecError> {
    Ok(Kind::Hash(Rc::new(HashState::default())).into())
}

fn b_hashval(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let mut state = match value_of(vm, &args[0])?.kind {
        Kind::Hash(h) => (*h).clone(),
        _ => return Err(ExecError::typ("hashval needs a hash state")),
    };
    for a in &args[1..] {
        let v = value_of(vm, a)?;
        state.update(hash_value(&v));
    }
    Ok(Kind::Hash(Rc::new(state)).into())
}

fn b_hashfinal(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    match value_of(vm, &args[0])?.kind {
        Kind::Hash(h) => Ok(Value::int((h.accum & 0x7fff_ffff_ffff_ffff) as i64)),
        _ => Err(ExecError::typ("hashfinal needs a hash state")),
    }
}

// ── protection ─────────────────────────────────────────────────────────────

fn b_protect(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let addr = match &args[0] {
        Slot::Addr(a) => a.clone(),
        Slot::Val(_) => return Err(ExecError::typ("protect requires an lvalue")),
    };
    let on = match args.get(1) {
        Some(a) => value_of(vm, a)?.test(),
        None => true,
    };
    let old = vm.set_protect(&addr, on)?;
    Ok(Value::bool(old))
}

// ── configuration ──────────────────────────────────────────────────────────

fn b_config(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let name = str_arg(vm, &args[0], "config name")?;
    match args.get(1) {
        None => vm.rt.conf.get(&name),
        Some(a) => {
            let value = value_of(vm, a)?;
            let old = vm.rt.conf.get(&name)?;
            vm.rt.conf.set(&name, &value)?;
            Ok(old)
        }
    }
}

fn b_epsilon(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let old = vm.rt.conf.epsilon.clone();
    if let Some(a) = args.first() {
        let v = value_of(vm, a)?;
        vm.rt.conf.set("epsilon", &v)?;
    }
    Ok(Value::num(old))
}

fn b_param(vm: &mut Vm, _args: Vec<Slot>) -> Result<Value, ExecError> {
    // compiled to an ARGVALUE opcode; a direct call has no frame to read
    let _ = vm;
    Err(ExecError::typ("param() is only valid inside a function"))
}

fn b_argv(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    match args.first() {
        None => Ok(Value::int(vm.rt.argv.len() as i64)),
        Some(a) => {
            let n = int_arg(vm, a, "argv index")?;
            match vm.rt.argv.get(n as usize) {
                Some(s) => Ok(Value::string(s)),
                None => Ok(Value::null()),
            }
        }
    }
}

// ── random generators ──────────────────────────────────────────────────────

fn b_srandom(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let prev: Value = Kind::Random(Rc::new(vm.rt.random.clone())).into();
    match args.len() {
        0 => Ok(prev),
        1 => {
            let v = value_of(vm, &args[0])?;
            match v.kind {
                Kind::Random(state) => {
                    vm.rt.random = (*state).clone();
                    Ok(prev)
                }
                _ => {
                    let seed = bigint_arg(vm, &args[0], "srandom seed")?;
                    vm.rt.random.seed1(&seed)?;
                    Ok(prev)
                }
            }
        }
        2 => {
            let seed = bigint_arg(vm, &args[0], "srandom seed")?;
            let newn = bigint_arg(vm, &args[1], "srandom modulus")?;
            vm.rt.random.seed2(&seed, &newn)?;
            Ok(prev)
        }
        3 | 4 => {
            let seed = bigint_arg(vm, &args[0], "srandom seed")?;
            let ip = bigint_arg(vm, &args[1], "srandom prime start")?;
            let iq = bigint_arg(vm, &args[2], "srandom prime start")?;
            let trials = match args.get(3) {
                Some(a) => u32::try_from(int_arg(vm, a, "srandom trials")?)
                    .map_err(|_| ExecError::domain("srandom trials out of range"))?,
                None => 25,
            };
            vm.rt.random.seed4(&seed, &ip, &iq, trials)?;
            Ok(prev)
        }
        _ => Err(ExecError::Arity {
            name: "srandom".into(),
            expected: "0 to 4".into(),
            got: args.len(),
        }),
    }
}

fn b_random(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    match args.len() {
        0 => {
            let bits = vm.rt.random.draw(64);
            Ok(Value::num(Number::from_int(BigInt::from(bits))))
        }
        1 => {
            let hi = bigint_arg(vm, &args[0], "random bound")?;
            let v = vm.rt.random.range(&BigInt::zero(), &hi)?;
            Ok(Value::num(Number::from_int(v)))
        }
        _ => {
            let lo = bigint_arg(vm, &args[0], "random bound")?;
            let hi = bigint_arg(vm, &args[1], "random bound")?;
            let v = vm.rt.random.range(&lo, &hi)?;
            Ok(Value::num(Number::from_int(v)))
        }
    }
}

fn b_randombit(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let n = int_arg(vm, &args[0], "randombit count")?;
    if n >= 0 {
        let bits = vm.rt.random.draw(n as u64);
        Ok(Value::num(Number::from_int(BigInt::from(bits))))
    } else {
        vm.rt.random.skip((-n) as u64);
        Ok(Value::int(-n))
    }
}

fn b_srand(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let prev: Value = Kind::Rand(Rc::new(vm.rt.rand.clone())).into();
    match args.first() {
        None => Ok(prev),
        Some(a) => {
            let v = value_of(vm, a)?;
            match v.kind {
                Kind::Rand(state) => {
                    vm.rt.rand = (*state).clone();
                    Ok(prev)
                }
                _ => {
                    let seed = int_arg(vm, a, "srand seed")?;
                    vm.rt.rand = AddRand::default();
                    vm.rt.rand.reseed(seed as u64);
                    Ok(prev)
                }
            }
        }
    }
}

fn b_rand(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    match args.len() {
        0 => {
            let v = vm.rt.rand.next_u64();
            Ok(Value::num(Number::from_int(BigInt::from(v))))
        }
        1 => {
            let hi = bigint_arg(vm, &args[0], "rand bound")?;
            let v = vm.rt.rand.range(&BigInt::zero(), &hi)?;
            Ok(Value::num(Number::from_int(v)))
        }
        _ => {
            let lo = bigint_arg(vm, &args[0], "rand bound")?;
            let hi = bigint_arg(vm, &args[1], "rand bound")?;
            let v = vm.rt.rand.range(&lo, &hi)?;
            Ok(Value::num(Number::from_int(v)))
        }
    }
}

// ── files ──────────────────────────────────────────────────────────────────

fn b_fopen(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let name = str_arg(vm, &args[0], "fopen name")?;
    let mode = str_arg(vm, &args[1], "fopen mode")?;
    let id = vm.rt.open_file(&name, &mode)?;
    Ok(Kind::File(id).into())
}

fn b_fclose(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    match value_of(vm, &args[0])?.kind {
        Kind::File(id) => {
            vm.rt.close_file(id)?;
            Ok(Value::null())
        }
        _ => Err(ExecError::typ("fclose needs a file")),
    }
}

fn b_fputs(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let id = match value_of(vm, &args[0])?.kind {
        Kind::File(id) => id,
        _ => return Err(ExecError::typ("fputs needs a file")),
    };
    for a in &args[1..] {
        let s = str_arg(vm, a, "fputs argument")?;
        vm.rt.write_file(id, &s)?;
    }
    Ok(Value::null())
}

fn b_fgetline(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    match value_of(vm, &args[0])?.kind {
        Kind::File(id) => match vm.rt.read_line(id)? {
            Some(line) => Ok(Value::string(line)),
            None => Ok(Value::null()),
        },
        _ => Err(ExecError::typ("fgetline needs a file")),
    }
}

fn b_writeglobals(vm: &mut Vm, args: Vec<Slot>) -> Result<Value, ExecError> {
    let name = str_arg(vm, &args[0], "writeglobals name")?;
    vm.rt.write_globals_file(&name)?;
    Ok(Value::null())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_for_binary_search() {
        for pair in BUILTINS.windows(2) {
            assert!(
                pair[0].name < pair[1].name,
                "{} out of order",
                pair[1].name
            );
        }
    }

    #[test]
    fn lookup_finds_known_names() {
        assert!(lookup("srandom").is_some());
        assert!(lookup("isnum").is_some());
        assert!(lookup("nosuch").is_none());
    }

    #[test]
    fn arity_bounds_are_enforced() {
        let idx = lookup("cmp").unwrap();
        assert!(check_arity(idx, 2).is_ok());
        assert!(check_arity(idx, 1).is_err());
        assert!(check_arity(idx, 3).is_err());
    }
}
