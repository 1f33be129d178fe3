use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn bool(self, value: bool) -> KeyValue {
        KeyValue::new(self, Value::Bool(value))
    }

    pub fn i64(self, value: i64) -> KeyValue {
        KeyValue::new(self, Value::I64(value))
    }

    pub fn f64(self, value: f64) -> KeyValue {
        KeyValue::new(self, Value::F64(value))
    }

    pub fn string(self, value: impl Into<String>) -> KeyValue {
        KeyValue::new(self, Value::String(value.into()))
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
}

// Floats compare by bit pattern so that a set is always equal to itself,
// NaN included.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Bool(b) => b.hash(state),
            Value::I64(i) => i.hash(state),
            Value::F64(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::I64(i) => write!(f, "{}", i),
            Value::F64(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::I64(i)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Key,
    pub value: Value,
}

impl KeyValue {
    pub fn new(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AttributeSet {
    pairs: Vec<KeyValue>,
}

impl AttributeSet {
    /// Builds the canonical set. When a key repeats, the value of its last
    /// occurrence in `kvs` is kept.
    pub fn new<I>(kvs: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        let mut kvs: Vec<KeyValue> = kvs.into_iter().collect();
        // Stable sort: equal keys keep their input order, so the last one
        // seen in each run is the last one the caller passed.
        kvs.sort_by(|a, b| a.key.cmp(&b.key));

        let mut pairs: Vec<KeyValue> = Vec::with_capacity(kvs.len());
        for kv in kvs {
            match pairs.last_mut() {
                Some(last) if last.key == kv.key => *last = kv,
                _ => pairs.push(kv),
            }
        }

        Self { pairs }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_slice(kvs: &[KeyValue]) -> Self {
        Self::new(kvs.iter().cloned())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.pairs
            .binary_search_by(|kv| kv.key.cmp(key))
            .ok()
            .map(|idx| &self.pairs[idx].value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KeyValue> {
        self.pairs.iter()
    }

    pub fn encoded(&self, encoder: &dyn Encoder) -> String {
        encoder.encode(&mut self.iter())
    }
}

impl<'a> IntoIterator for &'a AttributeSet {
    type Item = &'a KeyValue;
    type IntoIter = std::slice::Iter<'a, KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<KeyValue> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = KeyValue>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncoderId(usize);

impl EncoderId {
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

static NEXT_ENCODER_ID: AtomicUsize = AtomicUsize::new(1);

pub fn new_encoder_id() -> EncoderId {
    EncoderId(NEXT_ENCODER_ID.fetch_add(1, Ordering::Relaxed))
}

pub trait Encoder: Send + Sync {
    fn encode(&self, attributes: &mut dyn Iterator<Item = &KeyValue>) -> String;

    fn id(&self) -> EncoderId;
}

/// `key=value` pairs joined by `,`, with `\`, `,` and `=` escaped by a
/// leading `\` in both keys and values.
#[derive(Debug, Clone, Copy)]
pub struct DefaultEncoder {
    id: EncoderId,
}

impl DefaultEncoder {
    pub fn new() -> Self {
        Self {
            id: default_encoder_id(),
        }
    }
}

impl Default for DefaultEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_encoder_id() -> EncoderId {
    static ID: std::sync::OnceLock<EncoderId> = std::sync::OnceLock::new();
    *ID.get_or_init(new_encoder_id)
}

impl Encoder for DefaultEncoder {
    fn encode(&self, attributes: &mut dyn Iterator<Item = &KeyValue>) -> String {
        let mut out = String::new();
        for (idx, kv) in attributes.enumerate() {
            if idx > 0 {
                out.push(',');
            }
            push_escaped(&mut out, kv.key.as_str());
            out.push('=');
            push_escaped(&mut out, &kv.value.to_string());
        }
        out
    }

    fn id(&self) -> EncoderId {
        self.id
    }
}

fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        if matches!(c, '\\' | ',' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
}
