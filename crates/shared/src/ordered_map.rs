//! Insertion-ordered associative container.
//!
//! Holds portlet registries and parameter sets. Keys keep the position of
//! their first insertion; overwriting a key keeps its slot. Both key based and
//! index based access are supported, and `String` maps can be encoded to and
//! from the flat `k=v&k=v` wire format.

use std::{borrow::Borrow, collections::HashMap, hash::Hash};

pub const DEFAULT_SEPARATOR: &str = "&";
pub const DEFAULT_DELIMITER: &str = "=";

#[derive(Debug, Clone)]
pub struct OrderedMap<K, V> {
    order: Vec<K>,
    entries: HashMap<K, V>,
}

impl<K, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }
}

impl<K, V> OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites `key`, returning the previous value.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        let previous = self.entries.insert(key.clone(), value);
        if previous.is_none() {
            self.order.push(key);
        }
        previous
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.get(key)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.get_mut(key)
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let value = self.entries.remove(key)?;
        self.order
            .retain(|existing| <K as Borrow<Q>>::borrow(existing) != key);
        Some(value)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.contains_key(key)
    }

    pub fn size(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    /// Snapshot of the keys in insertion order.
    pub fn keys(&self) -> Vec<K> {
        self.order.clone()
    }

    pub fn get_by_index(&self, index: usize) -> Option<&V> {
        self.order.get(index).and_then(|key| self.entries.get(key))
    }

    pub fn get_key_by_index(&self, index: usize) -> Option<&K> {
        self.order.get(index)
    }

    pub fn remove_by_index(&mut self, index: usize) -> Option<(K, V)> {
        if index >= self.order.len() {
            return None;
        }
        let key = self.order.remove(index);
        let value = self.entries.remove(&key)?;
        Some((key, value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get_key_value(key))
    }

    pub fn values_iter(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Mutable access in insertion order.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&K, &mut V)) {
        for key in &self.order {
            if let Some(value) = self.entries.get_mut(key) {
                f(key, value);
            }
        }
    }

    /// Right-biased merge: values from `other` win on key collision, new keys
    /// are appended in `other`'s order.
    pub fn append(&mut self, other: OrderedMap<K, V>) {
        let OrderedMap { order, mut entries } = other;
        for key in order {
            if let Some(value) = entries.remove(&key) {
                self.put(key, value);
            }
        }
    }
}

impl<K, V> OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Snapshot of the values in insertion order.
    pub fn values(&self) -> Vec<V> {
        self.values_iter().cloned().collect()
    }
}

impl<K, V> OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: PartialEq,
{
    pub fn contains_value(&self, value: &V) -> bool {
        self.values_iter().any(|existing| existing == value)
    }

    /// Every key currently mapped to `value`, in insertion order.
    pub fn get_keys(&self, value: &V) -> Vec<K> {
        self.iter()
            .filter(|(_, existing)| *existing == value)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl<K, V> OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Ord + Clone,
{
    /// Sorted distinct values.
    pub fn unique(&self) -> Vec<V> {
        let mut values = self.values();
        values.sort();
        values.dedup();
        values
    }
}

impl<K, V> PartialEq for OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order && self.entries == other.entries
    }
}

impl<K, V> Eq for OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Eq,
{
}

impl<K, V> FromIterator<(K, V)> for OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.put(key, value);
        }
        map
    }
}

impl OrderedMap<String, String> {
    /// Parses `k=v<separator>k=v`. Segments without a delimiter become keys with
    /// an empty value; empty segments are skipped. With `decode`, keys and
    /// values are percent-decoded (undecodable text is kept verbatim).
    pub fn parse_string(text: &str, separator: &str, delimiter: &str, decode: bool) -> Self {
        let mut map = Self::new();
        let text = text.trim_start_matches(|c: char| c == '?' || c == '#');
        if text.is_empty() || separator.is_empty() || delimiter.is_empty() {
            return map;
        }
        for segment in text.split(separator) {
            if segment.is_empty() {
                continue;
            }
            let (key, value) = segment.split_once(delimiter).unwrap_or((segment, ""));
            if decode {
                map.put(decode_component(key), decode_component(value));
            } else {
                map.put(key.to_string(), value.to_string());
            }
        }
        map
    }

    /// `parse_string` with `&`, `=` and decoding.
    pub fn parse_query(text: &str) -> Self {
        Self::parse_string(text, DEFAULT_SEPARATOR, DEFAULT_DELIMITER, true)
    }

    pub fn stringify(&self, separator: &str, delimiter: &str, encode: bool) -> String {
        self.iter()
            .map(|(key, value)| {
                if encode {
                    format!(
                        "{}{delimiter}{}",
                        urlencoding::encode(key),
                        urlencoding::encode(value)
                    )
                } else {
                    format!("{key}{delimiter}{value}")
                }
            })
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// `stringify` with `&`, `=` and encoding.
    pub fn to_query(&self) -> String {
        self.stringify(DEFAULT_SEPARATOR, DEFAULT_DELIMITER, true)
    }
}

fn decode_component(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OrderedMap<String, String> {
        let mut map = OrderedMap::new();
        map.put("b".to_string(), "2".to_string());
        map.put("a".to_string(), "1".to_string());
        map.put("c".to_string(), "2".to_string());
        map
    }

    #[test]
    fn keeps_insertion_order_on_overwrite() {
        let mut map = sample();
        assert_eq!(map.put("b".to_string(), "9".to_string()), Some("2".to_string()));
        assert_eq!(map.keys(), vec!["b", "a", "c"]);
        assert_eq!(map.values(), vec!["9", "1", "2"]);
        assert_eq!(map.size(), 3);
    }

    #[test]
    fn index_access_follows_insertion_order() {
        let mut map = sample();
        assert_eq!(map.get_by_index(1).map(String::as_str), Some("1"));
        assert_eq!(map.get_key_by_index(2).map(String::as_str), Some("c"));
        assert_eq!(map.get_by_index(3), None);

        let removed = map.remove_by_index(0).expect("removed");
        assert_eq!(removed, ("b".to_string(), "2".to_string()));
        assert_eq!(map.keys(), vec!["a", "c"]);
        assert!(map.remove_by_index(5).is_none());
    }

    #[test]
    fn remove_drops_key_from_order() {
        let mut map = sample();
        assert_eq!(map.remove("a"), Some("1".to_string()));
        assert_eq!(map.remove("a"), None);
        assert!(!map.contains_key("a"));
        assert_eq!(map.keys(), vec!["b", "c"]);
    }

    #[test]
    fn duplicate_values_resolve_to_all_keys() {
        let map = sample();
        assert_eq!(map.get_keys(&"2".to_string()), vec!["b", "c"]);
        assert!(map.contains_value(&"1".to_string()));
        assert!(!map.contains_value(&"7".to_string()));
        assert_eq!(map.unique(), vec!["1", "2"]);
    }

    #[test]
    fn append_is_right_biased() {
        let mut left = sample();
        let mut right = OrderedMap::new();
        right.put("a".to_string(), "override".to_string());
        right.put("d".to_string(), "4".to_string());
        left.append(right);

        assert_eq!(left.keys(), vec!["b", "a", "c", "d"]);
        assert_eq!(left.get("a").map(String::as_str), Some("override"));
        assert_eq!(left.get("d").map(String::as_str), Some("4"));
    }

    #[test]
    fn stringify_and_parse_round_trip() {
        let mut map = sample();
        map.put("with space".to_string(), "ü/ä?".to_string());
        let encoded = map.to_query();
        assert_eq!(OrderedMap::parse_query(&encoded), map);

        let plain = sample().stringify(";", ":", false);
        assert_eq!(plain, "b:2;a:1;c:2");
        assert_eq!(OrderedMap::parse_string(&plain, ";", ":", false), sample());
    }

    #[test]
    fn parse_tolerates_leading_marker_and_bare_keys() {
        let map = OrderedMap::parse_query("?flag&k=v&&x=%2F");
        assert_eq!(map.keys(), vec!["flag", "k", "x"]);
        assert_eq!(map.get("flag").map(String::as_str), Some(""));
        assert_eq!(map.get("x").map(String::as_str), Some("/"));
    }
}
