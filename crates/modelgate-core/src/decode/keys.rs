//! Hash keys for dict entries and set members.
//!
//! Keys compare by value: `1 == 1.0 == True`, and tuples and frozensets are
//! equal when their contents are. Each key is reduced to a [`KeyId`] once,
//! so an insert is a hash lookup and a shared sub-tuple is keyed a single
//! time no matter how often it is referenced.

use std::collections::{HashMap, HashSet};

/// Canonical form of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(super) enum KeyId {
    None,
    /// Integers, bools and integral floats.
    Int(i64),
    /// Minimal little-endian two's complement, wider than 64 bits.
    BigInt(Vec<u8>),
    /// Non-integral float, by bit pattern.
    Float(u64),
    Str(String),
    Bytes(Vec<u8>),
    Type(String),
    /// Interned tuple or frozenset.
    Composite(usize),
    /// Anything else is only equal to itself.
    Identity(usize),
}

/// 2^63 as an `f64`.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

impl KeyId {
    pub(super) fn float(value: f64) -> Self {
        if value.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&value) {
            return Self::Int(value as i64);
        }
        Self::Float(value.to_bits())
    }

    /// Key for a `LONG1`/`LONG4` payload. Redundant sign bytes are dropped
    /// so the same number always keys the same way.
    pub(super) fn long(bytes: &[u8]) -> Self {
        let mut end = bytes.len();
        while end > 1 {
            let (last, prev) = (bytes[end - 1], bytes[end - 2]);
            let redundant = (last == 0x00 && prev & 0x80 == 0) || (last == 0xff && prev & 0x80 != 0);
            if !redundant {
                break;
            }
            end -= 1;
        }
        let bytes = &bytes[..end];
        if bytes.len() > 8 {
            return Self::BigInt(bytes.to_vec());
        }
        let negative = bytes.last().is_some_and(|b| b & 0x80 != 0);
        let mut buf = if negative { [0xff_u8; 8] } else { [0_u8; 8] };
        buf[..bytes.len()].copy_from_slice(bytes);
        Self::Int(i64::from_le_bytes(buf))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum CompositeKind {
    Tuple,
    FrozenSet,
}

/// Keys already computed for heap objects, and interned composites.
#[derive(Debug, Default)]
pub(super) struct KeyTable {
    by_object: HashMap<usize, KeyId>,
    composites: HashMap<(CompositeKind, Vec<KeyId>), usize>,
}

impl KeyTable {
    pub(super) fn cached(&self, heap_id: usize) -> Option<&KeyId> {
        self.by_object.get(&heap_id)
    }

    /// Only valid for objects that never change after allocation.
    pub(super) fn remember(&mut self, heap_id: usize, key: KeyId) {
        self.by_object.insert(heap_id, key);
    }

    pub(super) fn composite(&mut self, kind: CompositeKind, parts: Vec<KeyId>) -> KeyId {
        let next = self.composites.len();
        KeyId::Composite(*self.composites.entry((kind, parts)).or_insert(next))
    }
}

/// Insertion-ordered map with value-equality keys.
#[derive(Debug, Clone, Default)]
pub(super) struct KeyedMap<K, V> {
    pairs: Vec<(K, V)>,
    keys: Vec<KeyId>,
    index: HashMap<KeyId, usize>,
}

impl<K, V> KeyedMap<K, V> {
    pub(super) fn new() -> Self {
        Self {
            pairs: Vec::new(),
            keys: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// A repeated key keeps its first position and original key, and takes
    /// the new value.
    pub(super) fn insert(&mut self, id: KeyId, key: K, value: V) {
        match self.index.get(&id) {
            Some(&slot) => self.pairs[slot].1 = value,
            None => {
                self.index.insert(id.clone(), self.pairs.len());
                self.keys.push(id);
                self.pairs.push((key, value));
            }
        }
    }

    /// Insert every entry of `other`, in its order.
    pub(super) fn update(&mut self, other: Self) {
        for (id, (key, value)) in other.keys.into_iter().zip(other.pairs) {
            self.insert(id, key, value);
        }
    }

    pub(super) fn pairs(&self) -> &[(K, V)] {
        &self.pairs
    }
}

/// Insertion-ordered set with value-equality members.
#[derive(Debug, Clone, Default)]
pub(super) struct KeyedSet<T> {
    items: Vec<T>,
    index: HashSet<KeyId>,
}

impl<T> KeyedSet<T> {
    pub(super) fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashSet::new(),
        }
    }

    pub(super) fn insert(&mut self, id: KeyId, item: T) {
        if self.index.insert(id) {
            self.items.push(item);
        }
    }

    pub(super) fn items(&self) -> &[T] {
        &self.items
    }

    /// Member keys in a fixed order, for keying the set itself.
    pub(super) fn sorted_keys(&self) -> Vec<KeyId> {
        let mut keys: Vec<KeyId> = self.index.iter().cloned().collect();
        keys.sort();
        keys
    }
}
