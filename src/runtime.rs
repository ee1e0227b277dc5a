/// The interpreter aggregate.
///
/// Everything that was process-global in a classic single-instance
/// design lives here: interned numeric constants and strings, the
/// global symbol table, the function store, object types and element
/// names, configuration, both random generators, the old-value slot and
/// the abort level. Independent interpreters are just independent
/// Runtime values; nothing is shared between them.

use crate::bytecode::FunctionTable;
use crate::compiler::{Command, Compiler};
use crate::conf::Config;
use crate::core::number::Number;
use crate::core::oop::ObjectType;
use crate::core::value::{Kind, Value};
use crate::errors::{CalcError, ExecError, SourcePos};
use crate::lexer::Lexer;
use crate::random::{AddRand, BlumRng};
use crate::symbol::SymbolTable;
use crate::vm::Vm;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::fs;
use std::io::{BufRead, BufReader, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::rc::Rc;

// Permission mask bits (-m).
pub const PERM_READ: u8 = 4;
pub const PERM_WRITE: u8 = 2;
pub const PERM_EXEC: u8 = 1;

/// Cooperative interrupt cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AbortLevel {
    None,
    /// The next long-running numeric operation gives up.
    Math,
    /// Unwind to the nearest top-level recovery point.
    Now,
}

enum FileHandle {
    Read(BufReader<fs::File>),
    Write(fs::File),
}

pub struct Runtime {
    pub conf: Config,
    pub symbols: SymbolTable,
    pub functions: FunctionTable,
    pub object_types: Vec<Rc<ObjectType>>,
    obj_index: HashMap<Rc<str>, usize>,
    pub element_names: Vec<Rc<str>>,
    elem_index: HashMap<Rc<str>, usize>,
    constants: Vec<Rc<Number>>,
    const_index: HashMap<String, usize>,
    strings: Vec<Rc<str>>,
    str_index: HashMap<Rc<str>, usize>,

    pub old_value: Value,
    pub save_enabled: bool,
    pub abort_level: AbortLevel,
    pub random: BlumRng,
    pub rand: AddRand,

    /// Strings made available to argv() by -s.
    pub argv: Vec<String>,
    /// -m permission mask; all bits set by default.
    pub perm: u8,
    /// -c: keep going after recoverable errors.
    pub continue_on_error: bool,
    /// Directories searched by `read`.
    pub calc_path: Vec<PathBuf>,
    /// Set when a quit statement ran; the message travels with it.
    pub quit: Option<Option<String>>,

    files: HashMap<u64, FileHandle>,
    next_file: u64,
    read_once: HashSet<PathBuf>,
    last_result: Value,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Runtime {
            conf: Config::default(),
            symbols: SymbolTable::new(),
            functions: FunctionTable::new(),
            object_types: Vec::new(),
            obj_index: HashMap::new(),
            element_names: Vec::new(),
            elem_index: HashMap::new(),
            constants: Vec::new(),
            const_index: HashMap::new(),
            strings: Vec::new(),
            str_index: HashMap::new(),
            old_value: Value::null(),
            save_enabled: true,
            abort_level: AbortLevel::None,
            random: BlumRng::default(),
            rand: AddRand::default(),
            argv: Vec::new(),
            perm: PERM_READ | PERM_WRITE | PERM_EXEC,
            continue_on_error: false,
            calc_path: vec![PathBuf::from(".")],
            quit: None,
            files: HashMap::new(),
            next_file: 0,
            read_once: HashSet::new(),
            last_result: Value::null(),
        }
    }

    // -----------------------------------------------------------------
    // Interning
    // -----------------------------------------------------------------

    /// Intern a numeric literal by text; identical literals share one
    /// constant slot.
    pub fn intern_number_text(&mut self, text: &str) -> Option<usize> {
        let q = Number::parse(text)?;
        Some(self.add_constant(q))
    }

    /// Intern a computed constant by value.
    pub fn add_constant(&mut self, q: Number) -> usize {
        let key = q.to_string();
        if let Some(&i) = self.const_index.get(&key) {
            return i;
        }
        let i = self.constants.len();
        self.constants.push(Rc::new(q));
        self.const_index.insert(key, i);
        i
    }

    pub fn constant(&self, index: usize) -> Rc<Number> {
        self.constants[index].clone()
    }

    pub fn constants_iter(&self) -> impl Iterator<Item = &Rc<Number>> {
        self.constants.iter()
    }

    pub fn intern_string(&mut self, s: &str) -> usize {
        if let Some(&i) = self.str_index.get(s) {
            return i;
        }
        let rc: Rc<str> = Rc::from(s);
        let i = self.strings.len();
        self.strings.push(rc.clone());
        self.str_index.insert(rc, i);
        i
    }

    pub fn string(&self, index: usize) -> Rc<str> {
        self.strings[index].clone()
    }

    pub fn strings_iter(&self) -> impl Iterator<Item = &Rc<str>> {
        self.strings.iter()
    }

    // -----------------------------------------------------------------
    // Object types and element names
    // -----------------------------------------------------------------

    pub fn add_element(&mut self, name: &str) -> usize {
        if let Some(&i) = self.elem_index.get(name) {
            return i;
        }
        let rc: Rc<str> = Rc::from(name);
        let i = self.element_names.len();
        self.element_names.push(rc.clone());
        self.elem_index.insert(rc, i);
        i
    }

    pub fn find_element(&self, name: &str) -> Option<usize> {
        self.elem_index.get(name).copied()
    }

    /// Define an object type. Redefining with the same element list is
    /// a no-op; a different element list is an error.
    pub fn define_object(&mut self, name: &str, elements: Vec<usize>) -> Result<usize, ()> {
        if let Some(&i) = self.obj_index.get(name) {
            if self.object_types[i].elements == elements {
                return Ok(i);
            }
            return Err(());
        }
        let rc: Rc<str> = Rc::from(name);
        let id = self.object_types.len();
        self.object_types
            .push(Rc::new(ObjectType::new(id, rc.clone(), elements)));
        self.obj_index.insert(rc, id);
        Ok(id)
    }

    pub fn find_object(&self, name: &str) -> Option<usize> {
        self.obj_index.get(name).copied()
    }

    pub fn object_type(&self, index: usize) -> Result<Rc<ObjectType>, ExecError> {
        self.object_types
            .get(index)
            .cloned()
            .ok_or_else(|| ExecError::resolve("object type is undefined"))
    }

    // -----------------------------------------------------------------
    // Value formatting
    // -----------------------------------------------------------------

    /// Render any value with the current output configuration. Objects
    /// get the default element-list rendering; the executor routes
    /// objects with a user print method before coming here.
    pub fn format_value(&self, v: &Value) -> String {
        let mode = self.conf.outmode;
        let digits = self.conf.display;
        match &v.kind {
            Kind::Mat(m) => {
                let mut out = String::from("mat [");
                for (i, d) in m.dims.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    if d.lo == 0 {
                        let _ = write!(out, "{}", d.size);
                    } else {
                        let _ = write!(out, "{}:{}", d.lo, d.lo + d.size as i64 - 1);
                    }
                }
                let _ = write!(out, "] ({} elements)", m.total());
                if m.total() <= 16 {
                    for (i, e) in m.elems.iter().enumerate() {
                        let _ = write!(out, "\n  [{}] = {}", i, self.format_value(e));
                    }
                }
                out
            }
            Kind::List(l) => {
                let mut out = format!("list ({} elements)", l.len());
                if l.len() <= 16 {
                    for e in l.iter() {
                        let _ = write!(out, "\n  {}", self.format_value(e));
                    }
                }
                out
            }
            Kind::Assoc(a) => format!("assoc ({} elements)", a.len()),
            Kind::Obj(o) => {
                let mut out = format!("obj {} {{", o.ty.name);
                for (i, e) in o.elems.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&e.format_scalar(mode, digits, true));
                }
                out.push('}');
                out
            }
            _ => v.format_scalar(mode, digits, false),
        }
    }

    // -----------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------

    fn check_perm(&self, bit: u8, what: &str) -> Result<(), ExecError> {
        if self.perm & bit == 0 {
            return Err(ExecError::IoPermission(what.into()));
        }
        Ok(())
    }

    pub fn open_file(&mut self, name: &str, mode: &str) -> Result<u64, ExecError> {
        let handle = match mode {
            "r" => {
                self.check_perm(PERM_READ, "opening files for reading")?;
                FileHandle::Read(BufReader::new(fs::File::open(name)?))
            }
            "w" => {
                self.check_perm(PERM_WRITE, "opening files for writing")?;
                FileHandle::Write(fs::File::create(name)?)
            }
            "a" => {
                self.check_perm(PERM_WRITE, "opening files for writing")?;
                FileHandle::Write(fs::OpenOptions::new().append(true).create(true).open(name)?)
            }
            _ => return Err(ExecError::domain(format!("unknown file mode \"{}\"", mode))),
        };
        self.next_file += 1;
        self.files.insert(self.next_file, handle);
        Ok(self.next_file)
    }

    pub fn close_file(&mut self, id: u64) -> Result<(), ExecError> {
        self.files
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ExecError::domain("file is not open"))
    }

    pub fn write_file(&mut self, id: u64, text: &str) -> Result<(), ExecError> {
        match self.files.get_mut(&id) {
            Some(FileHandle::Write(f)) => {
                f.write_all(text.as_bytes())?;
                Ok(())
            }
            Some(FileHandle::Read(_)) => Err(ExecError::typ("file is open for reading")),
            None => Err(ExecError::domain("file is not open")),
        }
    }

    pub fn read_line(&mut self, id: u64) -> Result<Option<String>, ExecError> {
        match self.files.get_mut(&id) {
            Some(FileHandle::Read(r)) => {
                let mut line = String::new();
                let n = r.read_line(&mut line)?;
                if n == 0 {
                    return Ok(None);
                }
                if line.ends_with('\n') {
                    line.pop();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                }
                Ok(Some(line))
            }
            Some(FileHandle::Write(_)) => Err(ExecError::typ("file is open for writing")),
            None => Err(ExecError::domain("file is not open")),
        }
    }

    pub fn write_globals_file(&mut self, name: &str) -> Result<(), ExecError> {
        self.check_perm(PERM_WRITE, "writing files")?;
        let text = self.symbols.write_globals();
        fs::write(name, text)?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Execution drivers
    // -----------------------------------------------------------------

    /// Compile and run a source string, command by command.
    pub fn execute_source(&mut self, text: &str, name: Option<&str>) -> Result<(), CalcError> {
        let mut lx = Lexer::new(text, name);
        self.run_commands(&mut lx)
    }

    /// Read a file through the search path and execute it inside its
    /// own file scope.
    pub fn execute_file(&mut self, path: &str) -> Result<(), CalcError> {
        self.check_perm(PERM_READ, "reading files")
            .map_err(|e| CalcError::exec(SourcePos::default(), e))?;
        let resolved = self
            .resolve_path(path)
            .ok_or_else(|| CalcError::exec(
                SourcePos::default(),
                ExecError::domain(format!("cannot find \"{}\"", path)),
            ))?;
        let text = fs::read_to_string(&resolved)?;
        self.symbols.enter_file_scope();
        let result = self.execute_source(&text, resolved.to_str());
        self.symbols.exit_file_scope();
        result
    }

    /// Convenience for embedding and tests: run source, return the last
    /// top-level expression value.
    pub fn eval(&mut self, src: &str) -> Result<Value, CalcError> {
        self.execute_source(src, None)?;
        Ok(self.last_result.clone())
    }

    pub fn last_value(&self) -> Value {
        self.last_result.clone()
    }

    /// Current value of a global variable, if defined.
    pub fn global_value(&self, name: &str) -> Option<Value> {
        self.symbols
            .find_global(name)
            .map(|i| self.symbols.get(i).value.clone())
    }

    fn run_commands(&mut self, lx: &mut Lexer) -> Result<(), CalcError> {
        loop {
            if self.quit.is_some() {
                return Ok(());
            }
            let mut compiler = Compiler::new(self, lx);
            let cmd = compiler.compile_command();
            let err = compiler.take_error();
            if let Some(e) = err {
                let aborted = e.aborted;
                if self.continue_on_error && !aborted && !self.conf.stoponerror {
                    eprintln!("{}", e);
                } else {
                    return Err(e.into());
                }
            }
            match cmd {
                Command::Eof => {
                    if lx.depth() > 1 {
                        lx.pop_source();
                        self.symbols.exit_file_scope();
                        continue;
                    }
                    return Ok(());
                }
                Command::Nothing | Command::Defined(_) => {}
                Command::Eval(index) => {
                    let pos = lx.pos();
                    if let Err(e) = self.run_top(index) {
                        match e {
                            ExecError::Quit { message } => {
                                self.quit = Some(message);
                                return Ok(());
                            }
                            e => {
                                self.abort_level = AbortLevel::None;
                                if self.continue_on_error && !self.conf.stoponerror {
                                    eprintln!("{}", CalcError::exec(pos, e));
                                } else {
                                    return Err(CalcError::exec(pos, e));
                                }
                            }
                        }
                    }
                }
                Command::Read { path, once } => {
                    let pos = lx.pos();
                    if let Err(e) = self.splice_read(lx, &path, once) {
                        if self.continue_on_error && !self.conf.stoponerror {
                            eprintln!("{}", CalcError::exec(pos, e));
                        } else {
                            return Err(CalcError::exec(pos, e));
                        }
                    }
                }
                Command::Write { path } => {
                    let pos = lx.pos();
                    if let Err(e) = self.write_globals_file(&path) {
                        return Err(CalcError::exec(pos, e));
                    }
                }
                Command::Cd(path) => {
                    let dir = match path {
                        Some(p) => PathBuf::from(p),
                        None => dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
                    };
                    if let Err(e) = std::env::set_current_dir(&dir) {
                        eprintln!("{}: {}", dir.display(), e);
                    }
                }
            }
        }
    }

    fn run_top(&mut self, index: usize) -> Result<(), ExecError> {
        let mut vm = Vm::new(self);
        let result = vm.run_function(index, Vec::new())?;
        self.last_result = result;
        Ok(())
    }

    /// `read file`: resolve through the search path and splice the text
    /// onto the token stream inside a new file scope.
    fn splice_read(&mut self, lx: &mut Lexer, path: &str, once: bool) -> Result<(), ExecError> {
        self.check_perm(PERM_READ, "reading files")?;
        let resolved = self
            .resolve_path(path)
            .ok_or_else(|| ExecError::domain(format!("cannot find \"{}\"", path)))?;
        let canon = resolved.canonicalize().unwrap_or_else(|_| resolved.clone());
        if once && !self.read_once.insert(canon) {
            return Ok(());
        }
        let text = fs::read_to_string(&resolved)?;
        lx.push_source(&text, resolved.to_str());
        self.symbols.enter_file_scope();
        Ok(())
    }

    /// Search for a readable file: as given, with the .cal suffix, then
    /// through each search-path directory. ~ expands when permitted.
    fn resolve_path(&self, name: &str) -> Option<PathBuf> {
        let name = if self.conf.tilde_ok && name.starts_with("~/") {
            match dirs::home_dir() {
                Some(home) => home.join(&name[2..]),
                None => PathBuf::from(name),
            }
        } else {
            PathBuf::from(name)
        };
        let candidates = |p: &Path| -> Vec<PathBuf> {
            let mut v = vec![p.to_path_buf()];
            if p.extension().is_none() {
                v.push(p.with_extension("cal"));
            }
            v
        };
        for c in candidates(&name) {
            if c.is_file() {
                return Some(c);
            }
        }
        if name.is_absolute() {
            return None;
        }
        for dir in &self.calc_path {
            for c in candidates(&dir.join(&name)) {
                if c.is_file() {
                    return Some(c);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::values_equal;

    #[test]
    fn constants_intern_by_value() {
        let mut rt = Runtime::new();
        let a = rt.intern_number_text("7").unwrap();
        let b = rt.intern_number_text("7").unwrap();
        let c = rt.add_constant(Number::from_i64(7));
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn strings_intern_by_content() {
        let mut rt = Runtime::new();
        let a = rt.intern_string("abc");
        let b = rt.intern_string("abc");
        assert_eq!(a, b);
        assert!(Rc::ptr_eq(&rt.string(a), &rt.string(b)));
    }

    #[test]
    fn eval_returns_the_last_expression() {
        let mut rt = Runtime::new();
        let v = rt.eval("2 + 3;").unwrap();
        assert!(values_equal(&v, &Value::int(5)));
    }

    #[test]
    fn object_types_tolerate_identical_redefinition() {
        let mut rt = Runtime::new();
        let x = rt.add_element("x");
        let a = rt.define_object("pt", vec![x]).unwrap();
        let b = rt.define_object("pt", vec![x]).unwrap();
        assert_eq!(a, b);
        let y = rt.add_element("y");
        assert!(rt.define_object("pt", vec![x, y]).is_err());
    }
}
