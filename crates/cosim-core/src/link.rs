//! Attribute rename tables
//!
//! A producer publishes attributes under its own output names. Each consumer
//! holds a table translating those names into the local input names it
//! stores values under.

use std::collections::BTreeMap;

/// Per-node rename table: producer attribute name -> local input name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeLinks {
    map: BTreeMap<String, String>,
}

impl AttributeLinks {
    pub fn new() -> Self {
        AttributeLinks::default()
    }

    /// Add a rename. A later insert for the same producer name wins.
    pub fn insert(&mut self, produced: impl Into<String>, local: impl Into<String>) {
        self.map.insert(produced.into(), local.into());
    }

    /// Local key for a received attribute. Names without a rename entry
    /// are stored under their published name.
    pub fn resolve<'a>(&'a self, produced: &'a str) -> &'a str {
        self.map.get(produced).map(String::as_str).unwrap_or(produced)
    }

    pub fn get(&self, produced: &str) -> Option<&str> {
        self.map.get(produced).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for AttributeLinks {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        AttributeLinks {
            map: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for AttributeLinks {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_renamed() {
        let links: AttributeLinks = [("out", "in")].into_iter().collect();
        assert_eq!(links.resolve("out"), "in");
    }

    #[test]
    fn test_resolve_passthrough() {
        let links = AttributeLinks::new();
        assert_eq!(links.resolve("temperature"), "temperature");
    }

    #[test]
    fn test_iteration_is_sorted() {
        let mut links = AttributeLinks::new();
        links.insert("z", "1");
        links.insert("a", "2");
        let keys: Vec<_> = links.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "z"]);
    }
}
