use std::{cmp::Ordering, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::value::{Str, Value, loose_eq, strict_eq, to_int};

/// Canonical array key: the union of integers and byte strings.
///
/// String keys that spell a canonical decimal integer are folded to integer
/// keys before they ever reach the table, so a `Key::Str` is guaranteed not
/// to look like an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Int(i64),
    Str(Rc<Str>),
}

impl Key {
    /// Folds a string key to an integer key when it is the canonical decimal
    /// spelling of an in-range integer: `"10"` folds, `"010"`, `"1.5"`,
    /// `"+1"` and `" 1"` do not. `"-0"` does not fold either.
    #[must_use]
    pub fn from_str_key(s: Rc<Str>) -> Self {
        match canonical_int(s.as_bytes()) {
            Some(i) => Self::Int(i),
            None => Self::Str(s),
        }
    }

    /// Converts an arbitrary value to its canonical key: null becomes `""`,
    /// bools and floats fold to integers, strings fold when canonical.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Str(Rc::new(Str::default())),
            Value::Bool(b) => Self::Int(i64::from(*b)),
            Value::Int(i) => Self::Int(*i),
            Value::Float(f) => Self::Int(*f as i64),
            Value::String(s) => Self::from_str_key(s.clone()),
            // arrays and objects are illegal keys; the caller warns and skips
            other => Self::Int(to_int(other)),
        }
    }

    /// Key as a value, for `foreach` and `array_keys`-style iteration.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(i) => Value::Int(*i),
            Self::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Canonical-integer-string test backing key folding.
fn canonical_int(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() || bytes == b"-" {
        return None;
    }
    let (digits, negative) = match bytes[0] {
        b'-' => (&bytes[1..], true),
        _ => (bytes, false),
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    // leading zeros (and "-0") keep the key a string
    if digits[0] == b'0' && (digits.len() > 1 || negative) {
        return None;
    }
    let text = std::str::from_utf8(bytes).ok()?;
    text.parse::<i64>().ok()
}

/// The ordered associative container.
///
/// Entries iterate in insertion order regardless of key type. A dense
/// next-index counter drives bare appends (`$a[] = v`) and advances whenever
/// an integer key at or above it is set, so appends never collide with
/// explicit keys.
#[derive(Debug, Clone, Default)]
pub struct Array {
    map: IndexMap<Key, Value, ahash::RandomState>,
    next_index: i64,
}

impl Array {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Inserts under the canonical form of `key`, replacing any previous
    /// entry at that key but keeping its position.
    pub fn set(&mut self, key: Key, value: Value) {
        if let Key::Int(i) = key
            && i >= self.next_index
        {
            self.next_index = i.saturating_add(1);
        }
        self.map.insert(key, value);
    }

    /// Bare append: assigns the next free integer index.
    pub fn append(&mut self, value: Value) {
        let key = Key::Int(self.next_index);
        self.next_index = self.next_index.saturating_add(1);
        self.map.insert(key, value);
    }

    #[must_use]
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.map.get(key)
    }

    #[must_use]
    pub fn get_mut(&mut self, key: &Key) -> Option<&mut Value> {
        self.map.get_mut(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &Key) -> bool {
        self.map.contains_key(key)
    }

    /// Removes an entry, preserving the order of the remaining entries.
    /// The next-index counter is deliberately not rewound.
    pub fn remove(&mut self, key: &Key) -> Option<Value> {
        self.map.shift_remove(key)
    }

    /// Appends a null slot and returns it for in-place filling — the
    /// `$a[][k] = v` path.
    pub fn append_slot(&mut self) -> &mut Value {
        let key = Key::Int(self.next_index);
        self.next_index = self.next_index.saturating_add(1);
        self.map.entry(key).or_insert(Value::Null)
    }

    /// `+` operator: entries of `self`, plus entries of `other` whose keys
    /// `self` lacks, in their original order.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (key, value) in &other.map {
            if !out.map.contains_key(key) {
                out.set(key.clone(), value.clone());
            }
        }
        out
    }

    /// Entry access that inserts `Value::Null` when missing; used for
    /// auto-vivification of nested assignment targets.
    pub fn get_or_insert_null(&mut self, key: Key) -> &mut Value {
        if let Key::Int(i) = key
            && i >= self.next_index
        {
            self.next_index = i.saturating_add(1);
        }
        self.map.entry(key).or_insert(Value::Null)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.map.iter()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Key> {
        self.map.keys().cloned().collect()
    }

    /// Merges `other` on top of `self`: string keys overwrite, integer keys
    /// are renumbered as appends. This is the `_REQUEST` merge rule.
    pub fn merge(&mut self, other: &Self) {
        for (key, value) in &other.map {
            match key {
                Key::Str(_) => self.set(key.clone(), value.clone()),
                Key::Int(_) => self.append(value.clone()),
            }
        }
    }

    /// Loose equality: same size and every key of `self` present in `other`
    /// with a loosely-equal value, order ignored.
    #[must_use]
    pub fn loose_eq(&self, other: &Self) -> bool {
        self.map.len() == other.map.len()
            && self
                .map
                .iter()
                .all(|(k, v)| other.map.get(k).is_some_and(|w| loose_eq(v, w)))
    }

    /// Identity: same key sequence in the same order with identical values.
    #[must_use]
    pub fn strict_eq(&self, other: &Self) -> bool {
        self.map.len() == other.map.len()
            && self
                .map
                .iter()
                .zip(other.map.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && strict_eq(va, vb))
    }

    /// Ordering: by size first, then element-wise in the key order of `self`.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match self.map.len().cmp(&other.map.len()) {
            Ordering::Equal => {}
            order => return order,
        }
        for (key, value) in &self.map {
            match other.map.get(key) {
                None => return Ordering::Greater,
                Some(w) => match crate::value::compare(value, w) {
                    Ordering::Equal => {}
                    order => return order,
                },
            }
        }
        Ordering::Equal
    }

    /// Rough byte estimate for the memory meter.
    #[must_use]
    pub fn estimate_size(&self) -> usize {
        self.map.len() * 48
    }
}

impl FromIterator<(Key, Value)> for Array {
    fn from_iter<I: IntoIterator<Item = (Key, Value)>>(iter: I) -> Self {
        let mut array = Self::new();
        for (key, value) in iter {
            array.set(key, value);
        }
        array
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skey(s: &str) -> Key {
        Key::from_str_key(Rc::new(Str::from(s)))
    }

    #[test]
    fn integer_like_string_keys_fold() {
        assert_eq!(skey("10"), Key::Int(10));
        assert_eq!(skey("-5"), Key::Int(-5));
        assert_eq!(skey("0"), Key::Int(0));
        assert!(matches!(skey("010"), Key::Str(_)));
        assert!(matches!(skey("+1"), Key::Str(_)));
        assert!(matches!(skey("1.5"), Key::Str(_)));
        assert!(matches!(skey("-0"), Key::Str(_)));
        assert!(matches!(skey("9223372036854775808"), Key::Str(_)));
    }

    #[test]
    fn folded_keys_share_one_entry() {
        let mut a = Array::new();
        a.set(skey("10"), Value::Int(1));
        a.set(Key::Int(10), Value::Int(2));
        assert_eq!(a.len(), 1);
        assert!(matches!(a.get(&Key::Int(10)), Some(Value::Int(2))));
    }

    #[test]
    fn append_follows_max_int_key() {
        let mut a = Array::new();
        a.append(Value::Int(0));
        a.set(Key::Int(9), Value::Int(9));
        a.append(Value::Int(10));
        assert!(matches!(a.get(&Key::Int(10)), Some(Value::Int(10))));
        a.set(Key::Int(-3), Value::Null);
        a.append(Value::Int(11));
        assert!(matches!(a.get(&Key::Int(11)), Some(Value::Int(11))));
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut a = Array::new();
        a.set(skey("z"), Value::Int(1));
        a.set(Key::Int(5), Value::Int(2));
        a.set(skey("a"), Value::Int(3));
        let keys: Vec<String> = a.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["z", "5", "a"]);
    }

    #[test]
    fn merge_renumbers_integer_keys() {
        let mut a = Array::new();
        a.set(Key::Int(0), Value::Int(1));
        let mut b = Array::new();
        b.set(Key::Int(0), Value::Int(2));
        b.set(skey("name"), Value::Int(3));
        a.merge(&b);
        assert_eq!(a.len(), 3);
        assert!(matches!(a.get(&Key::Int(1)), Some(Value::Int(2))));
        assert!(matches!(a.get(&skey("name")), Some(Value::Int(3))));
    }
}
