//! The pickle virtual machine.
//!
//! Mutable containers live in an arena (`heap`) and the stack and memo hold
//! handles into it, so memo back-references share state the way the stream
//! expects. At `STOP` the root is copied out into an owned [`Value`] tree.
//!
//! `GLOBAL`, `STACK_GLOBAL` and `INST` are the only opcodes that name a type,
//! and each one goes through [`AdmissionPolicy::admit`]. Construction opcodes
//! only accept a [`Node::Type`] produced that way.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;

use tracing::debug;

use super::keys::{CompositeKind, KeyId, KeyTable, KeyedMap, KeyedSet};
use super::opcodes::*;
use super::reader::StreamReader;
use super::text;
use super::{DecodeError, DecodeLimits, Object, Value};
use crate::admission::{AdmissionPolicy, AdmittedType, BuiltinType, KnownType, TypeRef};

/// Stack and memo slot. Containers are always behind a heap handle.
#[derive(Debug, Clone, PartialEq)]
enum Node {
    None,
    Bool(bool),
    Int(i64),
    BigInt(Vec<u8>),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Type(AdmittedType),
    Ref(usize),
}

#[derive(Debug)]
enum HeapObj {
    List(Vec<Node>),
    Tuple(Vec<Node>),
    Dict(KeyedMap<Node, Node>),
    Set(KeyedSet<Node>),
    FrozenSet(KeyedSet<Node>),
    ByteArray(Vec<u8>),
    Object(ObjectNode),
}

#[derive(Debug)]
struct ObjectNode {
    class: AdmittedType,
    args: Vec<Node>,
    kwargs: Vec<(Node, Node)>,
    state: Option<Node>,
    items: Vec<Node>,
    entries: Vec<(Node, Node)>,
}

pub(crate) struct Machine<'a> {
    policy: &'a AdmissionPolicy,
    limits: &'a DecodeLimits,
    stack: Vec<Node>,
    marks: Vec<usize>,
    memo: HashMap<u32, Node>,
    heap: Vec<HeapObj>,
    keys: KeyTable,
    offset: u64,
}

impl<'a> Machine<'a> {
    pub(crate) fn new(policy: &'a AdmissionPolicy, limits: &'a DecodeLimits) -> Self {
        Self {
            policy,
            limits,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
            heap: Vec::new(),
            keys: KeyTable::default(),
            offset: 0,
        }
    }

    pub(crate) fn run<R: BufRead>(mut self, mut reader: StreamReader<R>) -> Result<Value, DecodeError> {
        loop {
            self.offset = reader.offset();
            let opcode = reader.read_u8()?;
            if opcode == STOP {
                let root = self.pop()?;
                debug!(
                    bytes = reader.offset(),
                    heap_objects = self.heap.len(),
                    memo_entries = self.memo.len(),
                    "pickle stream decoded"
                );
                return self.materialize(&root);
            }
            self.step(opcode, &mut reader)?;
        }
    }

    fn step<R: BufRead>(&mut self, opcode: u8, reader: &mut StreamReader<R>) -> Result<(), DecodeError> {
        match opcode {
            PROTO => {
                let protocol = reader.read_u8()?;
                if protocol > HIGHEST_PROTOCOL {
                    return Err(DecodeError::UnsupportedProtocol { protocol });
                }
            }
            // Framing is only a read-ahead hint.
            FRAME => {
                reader.read_array::<8>()?;
            }

            // Scalars
            NONE => self.push(Node::None)?,
            NEWTRUE => self.push(Node::Bool(true))?,
            NEWFALSE => self.push(Node::Bool(false))?,
            INT => {
                let line = reader.read_line()?;
                let node = match line.as_slice() {
                    b"01" => Node::Bool(true),
                    b"00" => Node::Bool(false),
                    digits => Node::Int(text::parse_i64(digits).map_err(|m| self.malformed(m))?),
                };
                self.push(node)?;
            }
            BININT => {
                let value = i32::from_le_bytes(reader.read_array()?);
                self.push(Node::Int(i64::from(value)))?;
            }
            BININT1 => {
                let value = reader.read_u8()?;
                self.push(Node::Int(i64::from(value)))?;
            }
            BININT2 => {
                let value = u16::from_le_bytes(reader.read_array()?);
                self.push(Node::Int(i64::from(value)))?;
            }
            LONG => {
                let line = reader.read_line()?;
                let value = text::parse_long(&line).map_err(|m| self.malformed(m))?;
                self.push(Node::Int(value))?;
            }
            LONG1 => {
                let len = reader.read_u8()?;
                let bytes = reader.read_bytes(u64::from(len))?;
                self.push(decode_long(bytes))?;
            }
            LONG4 => {
                let len = self.signed_len(i32::from_le_bytes(reader.read_array()?))?;
                let bytes = reader.read_bytes(len)?;
                self.push(decode_long(bytes))?;
            }
            FLOAT => {
                let line = reader.read_line()?;
                let value = text::parse_f64(&line).map_err(|m| self.malformed(m))?;
                self.push(Node::Float(value))?;
            }
            BINFLOAT => {
                let value = f64::from_be_bytes(reader.read_array()?);
                self.push(Node::Float(value))?;
            }

            // Byte strings. Protocol 0-2 `str` payloads are kept as bytes.
            STRING => {
                let line = reader.read_line()?;
                let bytes = text::parse_quoted_bytes(&line).map_err(|m| self.malformed(m))?;
                self.push(Node::Bytes(bytes))?;
            }
            BINSTRING => {
                let len = self.signed_len(i32::from_le_bytes(reader.read_array()?))?;
                let bytes = reader.read_bytes(len)?;
                self.push(Node::Bytes(bytes))?;
            }
            SHORT_BINSTRING | SHORT_BINBYTES => {
                let len = reader.read_u8()?;
                let bytes = reader.read_bytes(u64::from(len))?;
                self.push(Node::Bytes(bytes))?;
            }
            BINBYTES => {
                let len = u32::from_le_bytes(reader.read_array()?);
                let bytes = reader.read_bytes(u64::from(len))?;
                self.push(Node::Bytes(bytes))?;
            }
            BINBYTES8 => {
                let len = u64::from_le_bytes(reader.read_array()?);
                let bytes = reader.read_bytes(len)?;
                self.push(Node::Bytes(bytes))?;
            }
            BYTEARRAY8 => {
                let len = u64::from_le_bytes(reader.read_array()?);
                let bytes = reader.read_bytes(len)?;
                let node = self.alloc(HeapObj::ByteArray(bytes));
                self.push(node)?;
            }

            // Text strings
            UNICODE => {
                let line = reader.read_line()?;
                let text = text::parse_raw_unicode_escape(&line).map_err(|m| self.malformed(m))?;
                self.push(Node::Str(text))?;
            }
            SHORT_BINUNICODE => {
                let len = reader.read_u8()?;
                let bytes = reader.read_bytes(u64::from(len))?;
                let text = self.utf8(bytes)?;
                self.push(Node::Str(text))?;
            }
            BINUNICODE => {
                let len = u32::from_le_bytes(reader.read_array()?);
                let bytes = reader.read_bytes(u64::from(len))?;
                let text = self.utf8(bytes)?;
                self.push(Node::Str(text))?;
            }
            BINUNICODE8 => {
                let len = u64::from_le_bytes(reader.read_array()?);
                let bytes = reader.read_bytes(len)?;
                let text = self.utf8(bytes)?;
                self.push(Node::Str(text))?;
            }

            // Containers
            EMPTY_LIST => {
                let node = self.alloc(HeapObj::List(Vec::new()));
                self.push(node)?;
            }
            LIST => {
                let items = self.pop_mark()?;
                let node = self.alloc(HeapObj::List(items));
                self.push(node)?;
            }
            APPEND => {
                let value = self.pop()?;
                self.extend_top(vec![value])?;
            }
            APPENDS => {
                let items = self.pop_mark()?;
                self.extend_top(items)?;
            }
            EMPTY_TUPLE => {
                let node = self.alloc(HeapObj::Tuple(Vec::new()));
                self.push(node)?;
            }
            TUPLE => {
                let items = self.pop_mark()?;
                let node = self.alloc(HeapObj::Tuple(items));
                self.push(node)?;
            }
            TUPLE1 | TUPLE2 | TUPLE3 => {
                let n = usize::from(opcode - TUPLE1) + 1;
                let items = self.pop_n(n)?;
                let node = self.alloc(HeapObj::Tuple(items));
                self.push(node)?;
            }
            EMPTY_DICT => {
                let node = self.alloc(HeapObj::Dict(KeyedMap::new()));
                self.push(node)?;
            }
            DICT => {
                let items = self.pop_mark()?;
                let pairs = self.pairs(items)?;
                let dict = self.keyed_map(pairs)?;
                let node = self.alloc(HeapObj::Dict(dict));
                self.push(node)?;
            }
            SETITEM => {
                let value = self.pop()?;
                let key = self.pop()?;
                self.set_items_on_top(vec![(key, value)])?;
            }
            SETITEMS => {
                let items = self.pop_mark()?;
                let pairs = self.pairs(items)?;
                self.set_items_on_top(pairs)?;
            }
            EMPTY_SET => {
                let node = self.alloc(HeapObj::Set(KeyedSet::new()));
                self.push(node)?;
            }
            ADDITEMS => {
                let items = self.pop_mark()?;
                self.add_items_on_top(items)?;
            }
            FROZENSET => {
                let items = self.pop_mark()?;
                let set = self.keyed_set(items)?;
                let node = self.alloc(HeapObj::FrozenSet(set));
                self.push(node)?;
            }

            // Stack manipulation
            MARK => self.marks.push(self.stack.len()),
            POP => {
                if self.stack.len() > self.floor() {
                    self.stack.pop();
                } else {
                    self.pop_mark()?;
                }
            }
            POP_MARK => {
                self.pop_mark()?;
            }
            DUP => {
                let top = self.peek()?.clone();
                self.push(top)?;
            }

            // Memo
            GET => {
                let line = reader.read_line()?;
                let key = self.memo_key(&line)?;
                self.memo_get(key)?;
            }
            BINGET => {
                let key = reader.read_u8()?;
                self.memo_get(u32::from(key))?;
            }
            LONG_BINGET => {
                let key = u32::from_le_bytes(reader.read_array()?);
                self.memo_get(key)?;
            }
            PUT => {
                let line = reader.read_line()?;
                let key = self.memo_key(&line)?;
                self.memo_put(key)?;
            }
            BINPUT => {
                let key = reader.read_u8()?;
                self.memo_put(u32::from(key))?;
            }
            LONG_BINPUT => {
                let key = u32::from_le_bytes(reader.read_array()?);
                self.memo_put(key)?;
            }
            MEMOIZE => {
                let key = u32::try_from(self.memo.len())
                    .map_err(|_| self.malformed("memo index overflow"))?;
                self.memo_put(key)?;
            }

            // Type references: the admission seam
            GLOBAL => {
                let module = self.ascii_line(reader.read_line()?)?;
                let name = self.ascii_line(reader.read_line()?)?;
                let admitted = self.resolve(TypeRef::new(module, name))?;
                self.push(Node::Type(admitted))?;
            }
            STACK_GLOBAL => {
                let name = self.pop()?;
                let module = self.pop()?;
                let (Node::Str(module), Node::Str(name)) = (module, name) else {
                    return Err(self.malformed("STACK_GLOBAL requires str module and name"));
                };
                let admitted = self.resolve(TypeRef::new(module, name))?;
                self.push(Node::Type(admitted))?;
            }
            INST => {
                let module = self.ascii_line(reader.read_line()?)?;
                let name = self.ascii_line(reader.read_line()?)?;
                let admitted = self.resolve(TypeRef::new(module, name))?;
                let args = self.pop_mark()?;
                let node = self.construct(admitted, args, Vec::new())?;
                self.push(node)?;
            }

            // Construction
            OBJ => {
                let mut items = self.pop_mark()?;
                if items.is_empty() {
                    return Err(self.malformed("OBJ without a class"));
                }
                let class = items.remove(0);
                let class = self.expect_type(class, "OBJ")?;
                let node = self.construct(class, items, Vec::new())?;
                self.push(node)?;
            }
            REDUCE => {
                let args = self.pop()?;
                let callable = self.pop()?;
                let callable = self.expect_type(callable, "REDUCE")?;
                let args = self.tuple_items(&args, "REDUCE")?;
                let node = self.construct(callable, args, Vec::new())?;
                self.push(node)?;
            }
            NEWOBJ => {
                let args = self.pop()?;
                let class = self.pop()?;
                let class = self.expect_type(class, "NEWOBJ")?;
                let args = self.tuple_items(&args, "NEWOBJ")?;
                let node = self.construct(class, args, Vec::new())?;
                self.push(node)?;
            }
            NEWOBJ_EX => {
                let kwargs = self.pop()?;
                let args = self.pop()?;
                let class = self.pop()?;
                let class = self.expect_type(class, "NEWOBJ_EX")?;
                let args = self.tuple_items(&args, "NEWOBJ_EX")?;
                let kwargs = match kwargs {
                    Node::Ref(id) => match &self.heap[id] {
                        HeapObj::Dict(dict) => dict.pairs().to_vec(),
                        _ => return Err(self.malformed("NEWOBJ_EX kwargs must be a dict")),
                    },
                    _ => return Err(self.malformed("NEWOBJ_EX kwargs must be a dict")),
                };
                let node = self.construct(class, args, kwargs)?;
                self.push(node)?;
            }
            BUILD => {
                let state = self.pop()?;
                self.build_top(state)?;
            }

            // Anything resolved outside the stream itself
            EXT1 | EXT2 | EXT4 => {
                return Err(DecodeError::Unsupported {
                    opcode: "EXT",
                    offset: self.offset,
                    reason: "extension registry lookups are not supported",
                })
            }
            PERSID | BINPERSID => {
                return Err(DecodeError::Unsupported {
                    opcode: "PERSID",
                    offset: self.offset,
                    reason: "persistent ids are not supported",
                })
            }
            NEXT_BUFFER | READONLY_BUFFER => {
                return Err(DecodeError::Unsupported {
                    opcode: "NEXT_BUFFER",
                    offset: self.offset,
                    reason: "out-of-band buffers are not supported",
                })
            }

            other => {
                return Err(DecodeError::InvalidOpcode {
                    opcode: other,
                    offset: self.offset,
                })
            }
        }
        Ok(())
    }

    fn malformed(&self, message: impl Into<String>) -> DecodeError {
        DecodeError::Malformed {
            offset: self.offset,
            message: message.into(),
        }
    }

    fn resolve(&self, reference: TypeRef) -> Result<AdmittedType, DecodeError> {
        match self.policy.admit(&reference) {
            Ok(admitted) => Ok(admitted),
            Err(err) => {
                debug!(reference = %err.reference, rule = ?err.rule, offset = self.offset, "type reference rejected");
                Err(err.into())
            }
        }
    }

    // Stack

    fn floor(&self) -> usize {
        self.marks.last().copied().unwrap_or(0)
    }

    fn push(&mut self, node: Node) -> Result<(), DecodeError> {
        if self.stack.len() >= self.limits.max_stack_depth {
            return Err(DecodeError::LimitExceeded {
                limit: "stack depth",
                value: self.stack.len() as u64 + 1,
                max: self.limits.max_stack_depth as u64,
            });
        }
        self.stack.push(node);
        Ok(())
    }

    fn pop(&mut self) -> Result<Node, DecodeError> {
        if self.stack.len() <= self.floor() {
            return Err(self.malformed("stack underflow"));
        }
        self.stack
            .pop()
            .ok_or_else(|| self.malformed("stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Node>, DecodeError> {
        if self.stack.len() < self.floor() + n {
            return Err(self.malformed("stack underflow"));
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    fn pop_mark(&mut self) -> Result<Vec<Node>, DecodeError> {
        let mark = self
            .marks
            .pop()
            .ok_or_else(|| self.malformed("MARK not found"))?;
        Ok(self.stack.split_off(mark))
    }

    fn peek(&self) -> Result<&Node, DecodeError> {
        if self.stack.len() <= self.floor() {
            return Err(self.malformed("stack underflow"));
        }
        self.stack
            .last()
            .ok_or_else(|| self.malformed("stack underflow"))
    }

    fn top_ref(&self, opcode: &str) -> Result<usize, DecodeError> {
        match self.peek()? {
            Node::Ref(id) => Ok(*id),
            other => Err(self.malformed(format!("{opcode} target is {}", node_kind(other)))),
        }
    }

    // Memo

    fn memo_key(&self, line: &[u8]) -> Result<u32, DecodeError> {
        let key = text::parse_i64(line).map_err(|m| self.malformed(m))?;
        u32::try_from(key).map_err(|_| self.malformed(format!("invalid memo key {key}")))
    }

    fn memo_get(&mut self, key: u32) -> Result<(), DecodeError> {
        let node = self
            .memo
            .get(&key)
            .cloned()
            .ok_or_else(|| self.malformed(format!("memo key {key} not found")))?;
        self.push(node)
    }

    fn memo_put(&mut self, key: u32) -> Result<(), DecodeError> {
        let node = self.peek()?.clone();
        if !self.memo.contains_key(&key) && self.memo.len() >= self.limits.max_memo_entries {
            return Err(DecodeError::LimitExceeded {
                limit: "memo entries",
                value: self.memo.len() as u64 + 1,
                max: self.limits.max_memo_entries as u64,
            });
        }
        self.memo.insert(key, node);
        Ok(())
    }

    // Heap

    fn alloc(&mut self, obj: HeapObj) -> Node {
        self.heap.push(obj);
        Node::Ref(self.heap.len() - 1)
    }

    fn pairs(&self, items: Vec<Node>) -> Result<Vec<(Node, Node)>, DecodeError> {
        if items.len() % 2 != 0 {
            return Err(self.malformed("odd number of items for dict"));
        }
        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    fn extend_top(&mut self, items: Vec<Node>) -> Result<(), DecodeError> {
        let id = self.top_ref("APPEND")?;
        match &mut self.heap[id] {
            HeapObj::List(list) => list.extend(items),
            HeapObj::Object(object) => object.items.extend(items),
            other => {
                let kind = heap_kind(other);
                return Err(self.malformed(format!("APPEND target is {kind}")));
            }
        }
        Ok(())
    }

    fn set_items_on_top(&mut self, pairs: Vec<(Node, Node)>) -> Result<(), DecodeError> {
        let id = self.top_ref("SETITEM")?;
        if let HeapObj::Object(object) = &mut self.heap[id] {
            object.entries.extend(pairs);
            return Ok(());
        }
        let keyed = self.keyed(pairs)?;
        match &mut self.heap[id] {
            HeapObj::Dict(dict) => {
                for (key_id, (key, value)) in keyed {
                    dict.insert(key_id, key, value);
                }
                Ok(())
            }
            other => {
                let kind = heap_kind(other);
                Err(self.malformed(format!("SETITEM target is {kind}")))
            }
        }
    }

    fn add_items_on_top(&mut self, items: Vec<Node>) -> Result<(), DecodeError> {
        let id = self.top_ref("ADDITEMS")?;
        let keyed = self.keyed(items)?;
        match &mut self.heap[id] {
            HeapObj::Set(set) => {
                for (key_id, item) in keyed {
                    set.insert(key_id, item);
                }
                Ok(())
            }
            other => {
                let kind = heap_kind(other);
                Err(self.malformed(format!("ADDITEMS target is {kind}")))
            }
        }
    }

    fn keyed<T>(&mut self, entries: Vec<T>) -> Result<Vec<(KeyId, T)>, DecodeError>
    where
        T: KeyedEntry,
    {
        let mut keyed = Vec::with_capacity(entries.len());
        for entry in entries {
            let key_id = self.key_id(entry.key(), 0)?;
            keyed.push((key_id, entry));
        }
        Ok(keyed)
    }

    fn keyed_map(&mut self, pairs: Vec<(Node, Node)>) -> Result<KeyedMap<Node, Node>, DecodeError> {
        let mut dict = KeyedMap::new();
        for (key_id, (key, value)) in self.keyed(pairs)? {
            dict.insert(key_id, key, value);
        }
        Ok(dict)
    }

    fn keyed_set(&mut self, items: Vec<Node>) -> Result<KeyedSet<Node>, DecodeError> {
        let mut set = KeyedSet::new();
        for (key_id, item) in self.keyed(items)? {
            set.insert(key_id, item);
        }
        Ok(set)
    }

    /// Hash key of `node`. Scalars compare by value, tuples and frozensets
    /// by content, everything else by identity. Tuples and frozensets never
    /// change once allocated, so their keys are computed once and cached.
    fn key_id(&mut self, node: &Node, depth: usize) -> Result<KeyId, DecodeError> {
        let id = match node {
            Node::None => return Ok(KeyId::None),
            Node::Bool(b) => return Ok(KeyId::Int(i64::from(*b))),
            Node::Int(i) => return Ok(KeyId::Int(*i)),
            Node::BigInt(bytes) => return Ok(KeyId::long(bytes)),
            Node::Float(f) => return Ok(KeyId::float(*f)),
            Node::Str(s) => return Ok(KeyId::Str(s.clone())),
            Node::Bytes(b) => return Ok(KeyId::Bytes(b.clone())),
            Node::Type(admitted) => return Ok(KeyId::Type(admitted.to_string())),
            Node::Ref(id) => *id,
        };
        if let Some(key) = self.keys.cached(id) {
            return Ok(key.clone());
        }
        if depth > self.limits.max_nesting_depth {
            return Err(DecodeError::LimitExceeded {
                limit: "nesting depth",
                value: depth as u64,
                max: self.limits.max_nesting_depth as u64,
            });
        }

        let key = match &self.heap[id] {
            HeapObj::Tuple(items) => {
                let items = items.clone();
                let mut parts = Vec::with_capacity(items.len());
                for item in &items {
                    parts.push(self.key_id(item, depth + 1)?);
                }
                self.keys.composite(CompositeKind::Tuple, parts)
            }
            HeapObj::FrozenSet(set) => {
                let parts = set.sorted_keys();
                self.keys.composite(CompositeKind::FrozenSet, parts)
            }
            _ => return Ok(KeyId::Identity(id)),
        };
        self.keys.remember(id, key.clone());
        Ok(key)
    }

    fn build_top(&mut self, state: Node) -> Result<(), DecodeError> {
        let id = self.top_ref("BUILD")?;
        if state == Node::None {
            return Ok(());
        }
        let current = match &self.heap[id] {
            HeapObj::Object(object) => object.state.clone(),
            other => {
                let kind = heap_kind(other);
                return Err(self.malformed(format!("BUILD target is {kind}")));
            }
        };
        let incoming = match &state {
            Node::Ref(state_id) => match &self.heap[*state_id] {
                HeapObj::Dict(dict) => Some(dict.clone()),
                _ => None,
            },
            _ => None,
        };

        let new_state = match (current, incoming) {
            // A later dict state updates the object's own dict.
            (Some(Node::Ref(own)), Some(update)) if matches!(self.heap[own], HeapObj::Dict(_)) => {
                if let HeapObj::Dict(dict) = &mut self.heap[own] {
                    dict.update(update);
                }
                return Ok(());
            }
            // The object gets its own copy; the stream may still share the
            // state dict through the memo.
            (None, Some(copy)) => self.alloc(HeapObj::Dict(copy)),
            _ => state,
        };
        if let HeapObj::Object(object) = &mut self.heap[id] {
            object.state = Some(new_state);
        }
        Ok(())
    }

    // Construction

    fn expect_type(&self, node: Node, opcode: &str) -> Result<AdmittedType, DecodeError> {
        match node {
            Node::Type(admitted) => Ok(admitted),
            other => Err(self.malformed(format!(
                "{opcode} callable is {}, not an admitted type",
                node_kind(&other)
            ))),
        }
    }

    fn tuple_items(&self, node: &Node, opcode: &str) -> Result<Vec<Node>, DecodeError> {
        match node {
            Node::Ref(id) => match &self.heap[*id] {
                HeapObj::Tuple(items) => Ok(items.clone()),
                other => Err(self.malformed(format!(
                    "{opcode} arguments are {}, not a tuple",
                    heap_kind(other)
                ))),
            },
            other => Err(self.malformed(format!(
                "{opcode} arguments are {}, not a tuple",
                node_kind(other)
            ))),
        }
    }

    /// Elements produced by iterating a container, if it is one.
    fn iter_items(&self, node: &Node) -> Option<Vec<Node>> {
        match node {
            Node::Ref(id) => match &self.heap[*id] {
                HeapObj::List(items)
                | HeapObj::Tuple(items) => Some(items.clone()),
                HeapObj::Set(set) | HeapObj::FrozenSet(set) => Some(set.items().to_vec()),
                HeapObj::Dict(dict) => Some(dict.pairs().iter().map(|(k, _)| k.clone()).collect()),
                _ => None,
            },
            _ => None,
        }
    }

    fn construct(
        &mut self,
        class: AdmittedType,
        args: Vec<Node>,
        kwargs: Vec<(Node, Node)>,
    ) -> Result<Node, DecodeError> {
        if let (Some(KnownType::Builtin(builtin)), true) = (class.kind(), kwargs.is_empty()) {
            return self.construct_builtin(builtin, args);
        }
        Ok(self.alloc(HeapObj::Object(ObjectNode {
            class,
            args,
            kwargs,
            state: None,
            items: Vec::new(),
            entries: Vec::new(),
        })))
    }

    fn construct_builtin(&mut self, builtin: BuiltinType, args: Vec<Node>) -> Result<Node, DecodeError> {
        let obj = match builtin {
            BuiltinType::Dict | BuiltinType::OrderedDict => {
                let pairs = match args.as_slice() {
                    [] => Vec::new(),
                    [source] => self.dict_source(source)?,
                    _ => return Err(self.malformed("dict() takes at most one argument")),
                };
                HeapObj::Dict(self.keyed_map(pairs)?)
            }
            BuiltinType::List => HeapObj::List(self.sequence_arg(&args, "list")?),
            BuiltinType::Tuple => HeapObj::Tuple(self.sequence_arg(&args, "tuple")?),
            BuiltinType::Set => {
                let items = self.sequence_arg(&args, "set")?;
                HeapObj::Set(self.keyed_set(items)?)
            }
            BuiltinType::FrozenSet => {
                let items = self.sequence_arg(&args, "frozenset")?;
                HeapObj::FrozenSet(self.keyed_set(items)?)
            }
            BuiltinType::Bytes => return Ok(Node::Bytes(self.bytes_arg(&args)?)),
            BuiltinType::ByteArray => HeapObj::ByteArray(self.bytes_arg(&args)?),
        };
        Ok(self.alloc(obj))
    }

    fn dict_source(&self, source: &Node) -> Result<Vec<(Node, Node)>, DecodeError> {
        if let Node::Ref(id) = source {
            if let HeapObj::Dict(dict) = &self.heap[*id] {
                return Ok(dict.pairs().to_vec());
            }
        }
        let items = self
            .iter_items(source)
            .ok_or_else(|| self.malformed("dict() argument is not iterable"))?;
        items
            .iter()
            .map(|item| match self.iter_items(item).as_deref() {
                Some([key, value]) => Ok((key.clone(), value.clone())),
                _ => Err(self.malformed("dict() items must be key/value pairs")),
            })
            .collect()
    }

    fn sequence_arg(&self, args: &[Node], what: &str) -> Result<Vec<Node>, DecodeError> {
        match args {
            [] => Ok(Vec::new()),
            [source] => self
                .iter_items(source)
                .ok_or_else(|| self.malformed(format!("{what}() argument is not iterable"))),
            _ => Err(self.malformed(format!("{what}() takes at most one argument"))),
        }
    }

    fn bytes_arg(&self, args: &[Node]) -> Result<Vec<u8>, DecodeError> {
        match args {
            [] => Ok(Vec::new()),
            [Node::Bytes(bytes)] => Ok(bytes.clone()),
            [Node::Str(text), Node::Str(encoding)] => encode_str(text, encoding)
                .ok_or_else(|| self.malformed(format!("cannot encode str as {encoding}"))),
            [source] => {
                let items = self
                    .iter_items(source)
                    .ok_or_else(|| self.malformed("bytes() argument is not iterable"))?;
                items
                    .iter()
                    .map(|item| match item {
                        Node::Int(i) => u8::try_from(*i)
                            .map_err(|_| self.malformed("bytes() values must be in range(256)")),
                        _ => Err(self.malformed("bytes() values must be integers")),
                    })
                    .collect()
            }
            _ => Err(self.malformed("unsupported bytes() arguments")),
        }
    }

    fn utf8(&self, bytes: Vec<u8>) -> Result<String, DecodeError> {
        String::from_utf8(bytes).map_err(|_| self.malformed("invalid UTF-8 in string"))
    }

    fn ascii_line(&self, line: Vec<u8>) -> Result<String, DecodeError> {
        let text = self.utf8(line)?;
        if text.is_empty() {
            return Err(self.malformed("empty module or name in type reference"));
        }
        Ok(text)
    }

    fn signed_len(&self, len: i32) -> Result<u64, DecodeError> {
        u64::try_from(len).map_err(|_| self.malformed(format!("negative length {len}")))
    }

    // Output

    fn materialize(&self, root: &Node) -> Result<Value, DecodeError> {
        let mut walk = Walk {
            path: HashSet::new(),
            produced: 0,
        };
        self.to_value(root, 0, &mut walk)
    }

    fn to_value(&self, node: &Node, depth: usize, walk: &mut Walk) -> Result<Value, DecodeError> {
        walk.produced += 1;
        if walk.produced > self.limits.max_output_nodes {
            return Err(DecodeError::LimitExceeded {
                limit: "output nodes",
                value: walk.produced as u64,
                max: self.limits.max_output_nodes as u64,
            });
        }
        if depth > self.limits.max_nesting_depth {
            return Err(DecodeError::LimitExceeded {
                limit: "nesting depth",
                value: depth as u64,
                max: self.limits.max_nesting_depth as u64,
            });
        }

        let id = match node {
            Node::None => return Ok(Value::None),
            Node::Bool(b) => return Ok(Value::Bool(*b)),
            Node::Int(i) => return Ok(Value::Int(*i)),
            Node::BigInt(bytes) => return Ok(Value::BigInt(bytes.clone())),
            Node::Float(f) => return Ok(Value::Float(*f)),
            Node::Str(s) => return Ok(Value::String(s.clone())),
            Node::Bytes(b) => return Ok(Value::Bytes(b.clone())),
            Node::Type(admitted) => return Ok(Value::Type(admitted.clone())),
            Node::Ref(id) => *id,
        };

        // A container reached again while still being expanded is a cycle.
        if !walk.path.insert(id) {
            return Err(DecodeError::Cycle);
        }

        let depth = depth + 1;
        let value = match &self.heap[id] {
            HeapObj::List(items) => Value::List(self.to_values(items, depth, walk)?),
            HeapObj::Tuple(items) => Value::Tuple(self.to_values(items, depth, walk)?),
            HeapObj::Set(set) => Value::Set(self.to_values(set.items(), depth, walk)?),
            HeapObj::FrozenSet(set) => Value::FrozenSet(self.to_values(set.items(), depth, walk)?),
            HeapObj::Dict(dict) => Value::Dict(self.to_pairs(dict.pairs(), depth, walk)?),
            HeapObj::ByteArray(bytes) => Value::ByteArray(bytes.clone()),
            HeapObj::Object(object) => {
                let state = match &object.state {
                    Some(state) => Some(self.to_value(state, depth, walk)?),
                    None => None,
                };
                Value::Object(Box::new(Object {
                    class: object.class.clone(),
                    args: self.to_values(&object.args, depth, walk)?,
                    kwargs: self.to_pairs(&object.kwargs, depth, walk)?,
                    state,
                    items: self.to_values(&object.items, depth, walk)?,
                    entries: self.to_pairs(&object.entries, depth, walk)?,
                }))
            }
        };

        walk.path.remove(&id);
        Ok(value)
    }

    fn to_values(&self, items: &[Node], depth: usize, walk: &mut Walk) -> Result<Vec<Value>, DecodeError> {
        items
            .iter()
            .map(|item| self.to_value(item, depth, walk))
            .collect()
    }

    fn to_pairs(
        &self,
        pairs: &[(Node, Node)],
        depth: usize,
        walk: &mut Walk,
    ) -> Result<Vec<(Value, Value)>, DecodeError> {
        let mut out = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let key = self.to_value(key, depth, walk)?;
            let value = self.to_value(value, depth, walk)?;
            out.push((key, value));
        }
        Ok(out)
    }
}

/// Dict pairs and set members, keyed by their first element.
trait KeyedEntry {
    fn key(&self) -> &Node;
}

impl KeyedEntry for Node {
    fn key(&self) -> &Node {
        self
    }
}

impl KeyedEntry for (Node, Node) {
    fn key(&self) -> &Node {
        &self.0
    }
}

/// Materialization bookkeeping: heap ids on the current path and the
/// number of values produced so far.
struct Walk {
    path: HashSet<usize>,
    produced: usize,
}

/// Little-endian two's complement, as written by `LONG1` / `LONG4`.
fn decode_long(bytes: Vec<u8>) -> Node {
    if bytes.len() > 8 {
        return Node::BigInt(bytes);
    }
    let negative = bytes.last().is_some_and(|b| b & 0x80 != 0);
    let mut buf = if negative { [0xff_u8; 8] } else { [0_u8; 8] };
    buf[..bytes.len()].copy_from_slice(&bytes);
    Node::Int(i64::from_le_bytes(buf))
}

fn encode_str(text: &str, encoding: &str) -> Option<Vec<u8>> {
    match encoding.to_ascii_lowercase().replace('_', "-").as_str() {
        "latin-1" | "latin1" | "iso-8859-1" => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).ok())
            .collect(),
        "utf-8" | "utf8" => Some(text.as_bytes().to_vec()),
        "ascii" => text.is_ascii().then(|| text.as_bytes().to_vec()),
        _ => None,
    }
}

fn node_kind(node: &Node) -> &'static str {
    match node {
        Node::None => "None",
        Node::Bool(_) => "bool",
        Node::Int(_) | Node::BigInt(_) => "int",
        Node::Float(_) => "float",
        Node::Str(_) => "str",
        Node::Bytes(_) => "bytes",
        Node::Type(_) => "a type",
        Node::Ref(_) => "a container",
    }
}

fn heap_kind(obj: &HeapObj) -> &'static str {
    match obj {
        HeapObj::List(_) => "list",
        HeapObj::Tuple(_) => "tuple",
        HeapObj::Dict(_) => "dict",
        HeapObj::Set(_) => "set",
        HeapObj::FrozenSet(_) => "frozenset",
        HeapObj::ByteArray(_) => "bytearray",
        HeapObj::Object(_) => "object",
    }
}
