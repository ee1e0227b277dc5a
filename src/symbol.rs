/// Symbol tables: the three scope axes.
///
/// Globals and statics live in one table with stable ids (GLOBALADDR
/// operands index it directly). Each entry carries a file-scope level
/// (0 for true globals, 1 and up for statics) and a function-scope
/// level; lookup by name returns the live entry with the highest scope
/// pair. Leaving a file scope parks the statics it owned: they stop
/// resolving by name but keep their values for `show statics`.
///
/// Parameters and locals are per-function ordered name lists; their slot
/// indices become LOCALADDR / PARAMADDR operands.

use crate::core::number::OutMode;
use crate::core::value::{Kind, Value};
use std::fmt::Write as _;
use std::rc::Rc;

pub const SYM_UNDEFINED: u8 = 0;
pub const SYM_PARAM: u8 = 1;
pub const SYM_LOCAL: u8 = 2;
pub const SYM_GLOBAL: u8 = 3;
pub const SYM_STATIC: u8 = 4;

pub const SCOPE_GLOBAL: i32 = 0;
pub const SCOPE_STATIC: i32 = 1;
/// File scope of entries whose lexical scope has ended.
const SCOPE_PARKED: i32 = -1;

#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub name: Rc<str>,
    pub filescope: i32,
    pub funcscope: i32,
    pub value: Value,
}

impl GlobalVar {
    pub fn is_parked(&self) -> bool {
        self.filescope == SCOPE_PARKED
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    globals: Vec<GlobalVar>,
    filescope: i32,
    funcscope: i32,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn reset_scopes(&mut self) {
        self.filescope = SCOPE_GLOBAL;
        self.funcscope = 0;
    }

    pub fn enter_file_scope(&mut self) {
        self.filescope += 1;
        self.funcscope = 0;
    }

    /// Leaving a file scope parks every static it owned.
    pub fn exit_file_scope(&mut self) {
        if self.filescope == SCOPE_GLOBAL {
            return;
        }
        for g in self.globals.iter_mut() {
            if g.filescope >= self.filescope && g.filescope > SCOPE_GLOBAL {
                g.filescope = SCOPE_PARKED;
            }
        }
        self.filescope -= 1;
    }

    pub fn enter_func_scope(&mut self) {
        self.funcscope += 1;
    }

    pub fn exit_func_scope(&mut self) {
        for g in self.globals.iter_mut() {
            if g.funcscope >= self.funcscope && g.filescope > SCOPE_GLOBAL {
                g.filescope = SCOPE_PARKED;
            }
        }
        if self.funcscope > 0 {
            self.funcscope -= 1;
        }
    }

    /// Define (or find) a global or static, returning its stable id.
    /// A static is created at the current file and function scope; a
    /// plain global at scope zero. An existing entry at the same scope
    /// is reused.
    pub fn add_global(&mut self, name: &str, is_static: bool) -> usize {
        let (fscope, fnscope) = if is_static {
            (self.filescope.max(SCOPE_STATIC), self.funcscope)
        } else {
            (SCOPE_GLOBAL, 0)
        };
        if let Some(i) = self.globals.iter().position(|g| {
            &*g.name == name && g.filescope == fscope && g.funcscope == fnscope
        }) {
            return i;
        }
        self.globals.push(GlobalVar {
            name: Rc::from(name),
            filescope: fscope,
            funcscope: fnscope,
            value: Value::null(),
        });
        self.globals.len() - 1
    }

    /// The live entry with the highest scope for this name.
    pub fn find_global(&self, name: &str) -> Option<usize> {
        self.globals
            .iter()
            .enumerate()
            .filter(|(_, g)| &*g.name == name && !g.is_parked())
            .max_by_key(|(_, g)| (g.filescope, g.funcscope))
            .map(|(i, _)| i)
    }

    /// End the scope of a matching static early (it was shadowed by a
    /// new declaration of the same name).
    pub fn end_scope(&mut self, name: &str, to_global: bool) {
        for g in self.globals.iter_mut() {
            if &*g.name != name || g.is_parked() || g.filescope == SCOPE_GLOBAL {
                continue;
            }
            if to_global || (g.filescope == self.filescope && g.funcscope == self.funcscope) {
                g.filescope = SCOPE_PARKED;
            }
        }
    }

    pub fn get(&self, id: usize) -> &GlobalVar {
        &self.globals[id]
    }

    pub fn get_mut(&mut self, id: usize) -> &mut GlobalVar {
        &mut self.globals[id]
    }

    pub fn value_mut(&mut self, id: usize) -> &mut Value {
        &mut self.globals[id].value
    }

    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GlobalVar> {
        self.globals.iter()
    }

    /// Whether a name resolves to a global or a static right now.
    pub fn symbol_type(&self, name: &str) -> u8 {
        match self.find_global(name) {
            Some(i) if self.globals[i].filescope > SCOPE_GLOBAL => SYM_STATIC,
            Some(_) => SYM_GLOBAL,
            None => SYM_UNDEFINED,
        }
    }

    /// Reset every global value to null, keeping the names.
    pub fn clear_values(&mut self) {
        for g in self.globals.iter_mut() {
            g.value = Value::null();
        }
    }

    /// Emit re-readable assignments for writable scalar globals.
    pub fn write_globals(&self) -> String {
        let mut out = String::new();
        for g in &self.globals {
            if g.filescope != SCOPE_GLOBAL {
                continue;
            }
            let text = match &g.value.kind {
                Kind::Null => Some("null()".to_string()),
                Kind::Int(_) | Kind::Num(_) | Kind::Com(_) => {
                    Some(g.value.format_scalar(OutMode::Frac, 20, false))
                }
                Kind::Str(s) => Some(quote_string(s)),
                _ => None,
            };
            if let Some(text) = text {
                let _ = writeln!(out, "{} = {};", g.name, text);
            }
        }
        out
    }

    /// Listing for `show globals` (live globals) or `show statics`
    /// (live and parked statics).
    pub fn show(&self, statics: bool) -> String {
        let mut out = String::new();
        for g in &self.globals {
            let is_static = g.filescope != SCOPE_GLOBAL;
            if statics != is_static {
                continue;
            }
            let _ = writeln!(
                out,
                "{}{}  {}",
                g.name,
                if g.is_parked() { " (ended)" } else { "" },
                g.value.type_name()
            );
        }
        out
    }
}

fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ---------------------------------------------------------------------------
// Per-function parameter / local name lists
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct NameList {
    names: Vec<Rc<str>>,
}

impl NameList {
    pub fn clear(&mut self) {
        self.names.clear();
    }

    /// Add a name, returning its slot. Re-adding returns the old slot.
    pub fn add(&mut self, name: &str) -> usize {
        if let Some(i) = self.find(name) {
            return i;
        }
        self.names.push(Rc::from(name));
        self.names.len() - 1
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| &**n == name)
    }

    pub fn name(&self, slot: usize) -> Option<&str> {
        self.names.get(slot).map(|n| &**n)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_scope_shadows_lower() {
        let mut t = SymbolTable::new();
        let g = t.add_global("x", false);
        t.enter_file_scope();
        let s = t.add_global("x", true);
        assert_ne!(g, s);
        assert_eq!(t.find_global("x"), Some(s));
        t.exit_file_scope();
        assert_eq!(t.find_global("x"), Some(g));
    }

    #[test]
    fn parked_statics_stay_visible_to_show() {
        let mut t = SymbolTable::new();
        t.enter_file_scope();
        let s = t.add_global("counter", true);
        t.get_mut(s).value = Value::int(7);
        t.exit_file_scope();
        assert_eq!(t.find_global("counter"), None);
        assert!(t.show(true).contains("counter (ended)"));
    }

    #[test]
    fn write_globals_round_trip_text() {
        let mut t = SymbolTable::new();
        let a = t.add_global("a", false);
        t.get_mut(a).value = Value::string("hi\"there");
        let b = t.add_global("b", false);
        t.get_mut(b).value = Value::int(42);
        let text = t.write_globals();
        assert!(text.contains("a = \"hi\\\"there\";"));
        assert!(text.contains("b = 42;"));
    }

    #[test]
    fn name_lists_give_stable_slots() {
        let mut l = NameList::default();
        assert_eq!(l.add("p"), 0);
        assert_eq!(l.add("q"), 1);
        assert_eq!(l.add("p"), 0);
        assert_eq!(l.find("q"), Some(1));
        assert_eq!(l.name(1), Some("q"));
    }
}
