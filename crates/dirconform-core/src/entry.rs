//! Directory entries and their multi-valued attributes.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::dn::Dn;

/// Attribute holding an entry's object classes.
pub const OBJECT_CLASS: &str = "objectClass";

/// Multi-valued attribute map.
///
/// Attribute names are case-insensitive; they are stored lower-cased.
/// Values keep their order of insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, Vec<String>>);

impl Attributes {
    /// Creates an empty attribute map.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.insert(name, values);
        self
    }

    /// Replaces every value of `name`.
    pub fn insert<I, V>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.0.insert(
            name.to_ascii_lowercase(),
            values.into_iter().map(Into::into).collect(),
        );
    }

    /// Appends values to `name`, skipping duplicates.
    pub fn extend<I, V>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let slot = self.0.entry(name.to_ascii_lowercase()).or_default();
        for value in values {
            let value = value.into();
            if !slot.iter().any(|existing| same_value(existing, &value)) {
                slot.push(value);
            }
        }
    }

    /// Removes the given values of `name`; drops the attribute once empty.
    pub fn remove_values<'v>(&mut self, name: &str, values: impl IntoIterator<Item = &'v str>) {
        let key = name.to_ascii_lowercase();
        if let Some(slot) = self.0.get_mut(&key) {
            for value in values {
                slot.retain(|existing| !same_value(existing, value));
            }
            if slot.is_empty() {
                self.0.remove(&key);
            }
        }
    }

    /// Removes the attribute entirely.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    /// Values of `name`; empty when the attribute is absent.
    #[must_use]
    pub fn get(&self, name: &str) -> &[String] {
        self.0
            .get(&name.to_ascii_lowercase())
            .map_or(&[], Vec::as_slice)
    }

    /// First value of `name`.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).first().map(String::as_str)
    }

    /// Returns `true` if `name` is present with at least one value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        !self.get(name).is_empty()
    }

    /// Returns `true` if `name` holds `value`.
    ///
    /// Values that parse as distinguished names are compared as DNs, the
    /// rest case-insensitively.
    #[must_use]
    pub fn contains_value(&self, name: &str, value: &str) -> bool {
        self.get(name).iter().any(|existing| same_value(existing, value))
    }

    /// Iterates over `(lower-cased name, values)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Returns `true` when no attribute is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = (&'a String, &'a Vec<String>);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Compares two attribute values the way the directory's matching rules do
/// for the attributes this engine touches.
pub(crate) fn same_value(a: &str, b: &str) -> bool {
    if a.eq_ignore_ascii_case(b) {
        return true;
    }
    if a.contains('=') && b.contains('=') {
        if let (Ok(left), Ok(right)) = (Dn::parse(a), Dn::parse(b)) {
            return left == right;
        }
    }
    a.to_lowercase() == b.to_lowercase()
}

/// A named node in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    #[serde(serialize_with = "serialize_dn")]
    dn: Dn,
    attributes: Attributes,
}

impl Entry {
    /// Creates an entry.
    #[must_use]
    pub const fn new(dn: Dn, attributes: Attributes) -> Self {
        Self { dn, attributes }
    }

    /// The entry's distinguished name.
    #[must_use]
    pub const fn dn(&self) -> &Dn {
        &self.dn
    }

    /// All attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Mutable attributes.
    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Moves the entry to a new DN, keeping its attributes.
    pub fn set_dn(&mut self, dn: Dn) {
        self.dn = dn;
    }

    /// Values of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> &[String] {
        self.attributes.get(name)
    }

    /// First value of `name`.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.attributes.first(name)
    }

    /// Values of `name` parsed as distinguished names. Unparsable values
    /// are skipped.
    #[must_use]
    pub fn dn_values(&self, name: &str) -> Vec<Dn> {
        self.get(name)
            .iter()
            .filter_map(|value| Dn::parse(value).ok())
            .collect()
    }

    /// Returns `true` if the entry carries `class`.
    #[must_use]
    pub fn has_object_class(&self, class: &str) -> bool {
        self.get(OBJECT_CLASS)
            .iter()
            .any(|value| value.eq_ignore_ascii_case(class))
    }
}

fn serialize_dn<S: serde::Serializer>(dn: &Dn, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(dn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_case_insensitive() {
        let attrs = Attributes::new().with("givenName", ["User"]);
        assert_eq!(attrs.first("givenname"), Some("User"));
        assert_eq!(attrs.first("GIVENNAME"), Some("User"));
        assert!(attrs.get("sn").is_empty());
    }

    #[test]
    fn test_extend_skips_duplicates() {
        let mut attrs = Attributes::new().with("member", ["uid=a,dc=ci"]);
        attrs.extend("member", ["UID=A,DC=CI", "uid=b,dc=ci"]);
        assert_eq!(attrs.get("member").len(), 2);
    }

    #[test]
    fn test_remove_values_drops_empty_attribute() {
        let mut attrs = Attributes::new().with("member", ["uid=a,dc=ci"]);
        attrs.remove_values("member", ["uid=A, dc=ci"]);
        assert!(!attrs.contains("member"));
    }

    #[test]
    fn test_dn_values_are_compared_structurally() {
        let entry = Entry::new(
            Dn::parse("cn=g,ou=groups,dc=ci").unwrap(),
            Attributes::new().with("member", ["uid=tuser, ou=people, dc=ci", "garbage"]),
        );
        assert!(entry.attributes().contains_value("member", "UID=tuser,ou=People,dc=ci"));
        assert_eq!(entry.dn_values("member").len(), 1);
    }

    #[test]
    fn test_object_class_lookup() {
        let entry = Entry::new(
            Dn::parse("cn=p,ou=policies,dc=ci").unwrap(),
            Attributes::new().with(OBJECT_CLASS, ["person", "pwdPolicy"]),
        );
        assert!(entry.has_object_class("pwdpolicy"));
        assert!(!entry.has_object_class("groupOfNames"));
    }
}
