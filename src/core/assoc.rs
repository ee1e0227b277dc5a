/// Associations — hash tables keyed by tuples of values.
///
/// Layout follows the classic chained design: a bucket vector indexed by
/// hash mod size, each bucket an ordered chain of elements compared by
/// (hash, dimension, per-element equality). Writes create missing entries
/// with a Null value; reads of missing entries yield Null without
/// inserting. The table grows to the next prime past count/CHAINLENGTH
/// once the growth is worth the rehash.

use crate::core::value::{hash_value, values_equal, Value};
use crate::errors::ExecError;

const MINHASHSIZE: usize = 31;
const CHAINLENGTH: usize = 10;
const GROWHASHSIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct AssocElem {
    pub hash: u64,
    pub keys: Vec<Value>,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct AssocMap {
    buckets: Vec<Vec<AssocElem>>,
    count: usize,
}

impl Default for AssocMap {
    fn default() -> Self {
        Self::new()
    }
}

impl AssocMap {
    pub fn new() -> Self {
        AssocMap {
            buckets: vec![Vec::new(); MINHASHSIZE],
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn key_hash(keys: &[Value]) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for k in keys {
            h ^= hash_value(k);
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        h
    }

    /// Read access: the stored value, or Null when the keys are absent.
    pub fn get(&self, keys: &[Value]) -> Value {
        let hash = Self::key_hash(keys);
        let chain = &self.buckets[(hash % self.buckets.len() as u64) as usize];
        for e in chain {
            if e.hash == hash && e.keys.len() == keys.len() && Self::same_keys(&e.keys, keys) {
                return e.value.clone();
            }
        }
        Value::null()
    }

    /// Write access: a mutable slot for the keys, created with a Null
    /// value when absent. Grows the table as a side effect of insertion.
    pub fn entry(&mut self, keys: &[Value]) -> Result<&mut Value, ExecError> {
        let hash = Self::key_hash(keys);
        let bucket = (hash % self.buckets.len() as u64) as usize;
        let pos = self.buckets[bucket]
            .iter()
            .position(|e| e.hash == hash && e.keys.len() == keys.len() && Self::same_keys(&e.keys, keys));
        match pos {
            Some(i) => Ok(&mut self.buckets[bucket][i].value),
            None => {
                self.buckets[bucket].push(AssocElem {
                    hash,
                    keys: keys.to_vec(),
                    value: Value::null(),
                });
                self.count += 1;
                self.resize(self.count / CHAINLENGTH);
                let bucket = (hash % self.buckets.len() as u64) as usize;
                let i = self.buckets[bucket]
                    .iter()
                    .position(|e| e.hash == hash && Self::same_keys(&e.keys, keys))
                    .expect("entry just inserted");
                Ok(&mut self.buckets[bucket][i].value)
            }
        }
    }

    fn same_keys(a: &[Value], b: &[Value]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
    }

    fn resize(&mut self, newsize: usize) {
        if newsize < self.buckets.len() + GROWHASHSIZE {
            return;
        }
        let newsize = next_prime(newsize);
        let mut buckets = vec![Vec::new(); newsize];
        for chain in self.buckets.drain(..) {
            for e in chain {
                let b = (e.hash % newsize as u64) as usize;
                buckets[b].push(e);
            }
        }
        self.buckets = buckets;
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssocElem> {
        self.buckets.iter().flat_map(|c| c.iter())
    }

    /// Structural equality: same size and every entry of `self` present
    /// in `other` with an equal value.
    pub fn equals(&self, other: &Self) -> bool {
        self.count == other.count
            && self
                .iter()
                .all(|e| values_equal(&other.get(&e.keys), &e.value))
    }
}

fn next_prime(n: usize) -> usize {
    let mut candidate = if n <= 2 { 2 } else { n };
    loop {
        if is_prime(candidate) {
            return candidate;
        }
        candidate += 1;
    }
}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_before_write_is_null_and_does_not_insert() {
        let mut a = AssocMap::new();
        assert!(a.get(&[Value::int(1)]).is_null());
        assert_eq!(a.len(), 0);
        *a.entry(&[Value::int(1)]).unwrap() = Value::int(42);
        assert_eq!(a.len(), 1);
        assert!(values_equal(&a.get(&[Value::int(1)]), &Value::int(42)));
    }

    #[test]
    fn tuple_keys_compare_per_element() {
        let mut a = AssocMap::new();
        *a.entry(&[Value::int(1), Value::int(2)]).unwrap() = Value::int(12);
        assert!(a.get(&[Value::int(2), Value::int(1)]).is_null());
        assert!(a.get(&[Value::int(1)]).is_null());
        assert!(values_equal(
            &a.get(&[Value::int(1), Value::int(2)]),
            &Value::int(12)
        ));
    }

    #[test]
    fn grows_past_the_chain_threshold() {
        let mut a = AssocMap::new();
        for i in 0..1000 {
            *a.entry(&[Value::int(i)]).unwrap() = Value::int(i);
        }
        assert_eq!(a.len(), 1000);
        for i in 0..1000 {
            assert!(values_equal(&a.get(&[Value::int(i)]), &Value::int(i)));
        }
    }
}
