/// Jump labels with forward-reference patch chains.
///
/// A label starts undefined (offset -1). Using it before definition
/// appends an operand word holding the previous chain head and makes
/// that word the new head, so the pending references thread through the
/// opcode buffer itself. Defining the label walks the chain, overwriting
/// every link with the true offset.
///
/// User-named labels (goto targets) get a per-function table; any name
/// still undefined when the function ends is a compile error. The
/// compiler must clear its peephole window whenever a label is placed.

use crate::errors::ScanError;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct Label {
    /// Opcode offset of the label, -1 while undefined.
    pub offset: i64,
    /// Head of the patch chain threaded through operand slots, -1 if empty.
    pub chain: i64,
}

impl Default for Label {
    fn default() -> Self {
        Self::new()
    }
}

impl Label {
    pub fn new() -> Self {
        Label {
            offset: -1,
            chain: -1,
        }
    }

    pub fn clear(&mut self) {
        self.offset = -1;
        self.chain = -1;
    }

    pub fn is_set(&self) -> bool {
        self.offset >= 0
    }

    pub fn has_refs(&self) -> bool {
        self.chain >= 0
    }

    /// Reference this label here: appends one operand word to the code.
    pub fn use_at(&mut self, code: &mut Vec<i64>) {
        let here = code.len() as i64;
        if self.offset >= 0 {
            code.push(self.offset);
        } else {
            code.push(self.chain);
            self.chain = here;
        }
    }

    /// Define this label at the current emission offset and patch every
    /// pending reference.
    pub fn set(&mut self, code: &mut Vec<i64>) {
        let offset = code.len() as i64;
        let mut next = self.chain;
        while next >= 0 {
            let cur = next as usize;
            next = code[cur];
            code[cur] = offset;
        }
        self.chain = -1;
        self.offset = offset;
    }
}

/// Per-function table of user-named labels.
#[derive(Debug, Default)]
pub struct LabelTable {
    names: Vec<Rc<str>>,
    labels: Vec<Label>,
}

impl LabelTable {
    pub fn clear(&mut self) {
        self.names.clear();
        self.labels.clear();
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| &**n == name)
    }

    /// Define a named label at the current emission offset.
    pub fn define(&mut self, name: &str, code: &mut Vec<i64>) -> Result<(), ScanError> {
        match self.find(name) {
            Some(i) => {
                if self.labels[i].is_set() {
                    return Err(ScanError::Parse(format!(
                        "label \"{}\" is multiply defined",
                        name
                    )));
                }
                self.labels[i].set(code);
            }
            None => {
                let mut label = Label::new();
                label.set(code);
                self.names.push(Rc::from(name));
                self.labels.push(label);
            }
        }
        Ok(())
    }

    /// Reference a named label (goto), creating it if necessary.
    pub fn use_named(&mut self, name: &str, code: &mut Vec<i64>) {
        let i = match self.find(name) {
            Some(i) => i,
            None => {
                self.names.push(Rc::from(name));
                self.labels.push(Label::new());
                self.labels.len() - 1
            }
        };
        self.labels[i].use_at(code);
    }

    /// Names still undefined at endfunc.
    pub fn undefined(&self) -> Vec<Rc<str>> {
        self.names
            .iter()
            .zip(&self.labels)
            .filter(|(_, l)| !l.is_set())
            .map(|(n, _)| n.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_references_chain_through_operands() {
        let mut code: Vec<i64> = vec![100, 100]; // placeholder opcodes
        let mut label = Label::new();
        label.use_at(&mut code); // word 2 holds -1
        assert_eq!(code[2], -1);
        assert_eq!(label.chain, 2);
        code.push(100);
        label.use_at(&mut code); // word 4 holds 2, chain head moves
        assert_eq!(code[4], 2);
        assert_eq!(label.chain, 4);
        code.push(100);
        label.set(&mut code);
        assert_eq!(label.offset, 6);
        assert_eq!(code[2], 6);
        assert_eq!(code[4], 6);
        assert_eq!(label.chain, -1);
    }

    #[test]
    fn backward_references_patch_immediately() {
        let mut code: Vec<i64> = vec![100];
        let mut label = Label::new();
        label.set(&mut code);
        code.push(100);
        label.use_at(&mut code);
        assert_eq!(code[2], 1);
    }

    #[test]
    fn named_labels_report_undefined() {
        let mut code: Vec<i64> = Vec::new();
        let mut t = LabelTable::default();
        t.use_named("done", &mut code);
        assert_eq!(t.undefined(), vec![Rc::from("done")]);
        t.define("done", &mut code).unwrap();
        assert!(t.undefined().is_empty());
        assert!(t.define("done", &mut code).is_err());
    }
}
