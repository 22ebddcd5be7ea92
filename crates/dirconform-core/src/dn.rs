//! Distinguished names.
//!
//! A [`Dn`] is the ordered sequence of [`Rdn`] components naming an entry,
//! most specific first. Comparison ignores case on both attribute types and
//! values, matching the `caseIgnoreMatch` rule the relevant naming
//! attributes (`uid`, `cn`, `ou`, `dc`) use on the server. Display keeps
//! the spelling the DN was built with.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing a distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnError {
    /// A component between separators is empty.
    #[error("empty RDN component in {0:?}")]
    EmptyComponent(String),

    /// A component has no `=` separating type from value.
    #[error("RDN {0:?} has no attribute type")]
    MissingType(String),

    /// The input ends with a lone backslash.
    #[error("dangling escape in {0:?}")]
    DanglingEscape(String),

    /// Multi-valued RDNs (`a=b+c=d`) are not supported.
    #[error("multi-valued RDN {0:?} is not supported")]
    MultiValued(String),
}

/// One `type=value` component of a distinguished name.
#[derive(Debug, Clone)]
pub struct Rdn {
    attr: String,
    value: String,
}

impl Rdn {
    /// Creates a new RDN from an attribute type and an unescaped value.
    #[must_use]
    pub fn new(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attr: attr.into(),
            value: value.into(),
        }
    }

    /// Parses a single `type=value` component.
    ///
    /// # Errors
    ///
    /// Returns [`DnError`] when the component is malformed.
    pub fn parse(input: &str) -> Result<Self, DnError> {
        let parts = split_unescaped(input, ',')?;
        match parts.as_slice() {
            [single] => parse_component(single),
            _ => Err(DnError::MultiValued(input.to_string())),
        }
    }

    /// Attribute type, as spelled.
    #[must_use]
    pub fn attr(&self) -> &str {
        &self.attr
    }

    /// Unescaped attribute value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    fn normalized(&self) -> String {
        format!(
            "{}={}",
            self.attr.to_ascii_lowercase(),
            self.value.trim().to_lowercase()
        )
    }
}

impl PartialEq for Rdn {
    fn eq(&self, other: &Self) -> bool {
        self.attr.eq_ignore_ascii_case(&other.attr)
            && self.value.trim().to_lowercase() == other.value.trim().to_lowercase()
    }
}

impl Eq for Rdn {}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=", self.attr)?;
        for (idx, ch) in self.value.chars().enumerate() {
            let leading = idx == 0 && (ch == ' ' || ch == '#');
            if leading || matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=') {
                write!(f, "\\{ch}")?;
            } else {
                write!(f, "{ch}")?;
            }
        }
        Ok(())
    }
}

/// A distinguished name: RDN components, most specific first.
///
/// The empty DN names the root DSE and is also the identity of the
/// anonymous principal.
#[derive(Debug, Clone, Default)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    /// The empty DN.
    #[must_use]
    pub const fn root() -> Self {
        Self { rdns: Vec::new() }
    }

    /// Parses a DN in RFC 4514 string form.
    ///
    /// Whitespace around separators is ignored; an empty or blank input
    /// yields the root DN.
    ///
    /// # Errors
    ///
    /// Returns [`DnError`] when a component is malformed.
    pub fn parse(input: &str) -> Result<Self, DnError> {
        if input.trim().is_empty() {
            return Ok(Self::root());
        }
        let rdns = split_unescaped(input, '+')
            .and_then(|parts| match parts.as_slice() {
                [_] => split_unescaped(input, ','),
                _ => Err(DnError::MultiValued(input.to_string())),
            })?
            .iter()
            .map(|component| parse_component(component))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rdns })
    }

    /// Returns `true` for the empty DN.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Number of RDN components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    /// Returns `true` for the empty DN.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// The RDN components, most specific first.
    #[must_use]
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// The most specific component, if any.
    #[must_use]
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// The DN of the immediate superior, if any.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.rdns.is_empty() {
            None
        } else {
            Some(Self {
                rdns: self.rdns[1..].to_vec(),
            })
        }
    }

    /// Creates the DN of a direct child of `self`.
    #[must_use]
    pub fn child(&self, rdn: Rdn) -> Self {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Self { rdns }
    }

    /// Appends `suffix` below `self`: `ou=people` under `dc=example`
    /// yields `ou=people,dc=example`.
    #[must_use]
    pub fn under(&self, suffix: &Self) -> Self {
        let mut rdns = self.rdns.clone();
        rdns.extend(suffix.rdns.iter().cloned());
        Self { rdns }
    }

    /// Replaces the most specific component, keeping the superior.
    ///
    /// This is the DN an entry ends up with after a rename.
    #[must_use]
    pub fn with_rdn(&self, rdn: Rdn) -> Self {
        self.parent().unwrap_or_default().child(rdn)
    }

    /// Returns `true` if `self` equals `base` or sits anywhere below it.
    #[must_use]
    pub fn is_within(&self, base: &Self) -> bool {
        if base.rdns.len() > self.rdns.len() {
            return false;
        }
        let offset = self.rdns.len() - base.rdns.len();
        self.rdns[offset..] == base.rdns[..]
    }

    /// Returns `true` if `self` sits strictly below `base`.
    #[must_use]
    pub fn is_descendant_of(&self, base: &Self) -> bool {
        self.rdns.len() > base.rdns.len() && self.is_within(base)
    }

    /// Lower-cased canonical form, suitable as a map key.
    #[must_use]
    pub fn normalized(&self) -> String {
        self.rdns
            .iter()
            .map(Rdn::normalized)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.rdns == other.rdns
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl PartialOrd for Dn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized().cmp(&other.normalized())
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, rdn) in self.rdns.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{rdn}")?;
        }
        Ok(())
    }
}

impl FromStr for Dn {
    type Err = DnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Splits `input` on `sep` where the separator is not escaped.
///
/// Escape sequences are kept verbatim in the returned pieces so the caller
/// can still distinguish `\,` from `,`.
fn split_unescaped(input: &str, sep: char) -> Result<Vec<String>, DnError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            let next = chars
                .next()
                .ok_or_else(|| DnError::DanglingEscape(input.to_string()))?;
            current.push(ch);
            current.push(next);
        } else if ch == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    parts.push(current);
    Ok(parts)
}

fn parse_component(component: &str) -> Result<Rdn, DnError> {
    let trimmed = component.trim();
    if trimmed.is_empty() {
        return Err(DnError::EmptyComponent(component.to_string()));
    }
    let (attr, raw_value) = trimmed
        .split_once('=')
        .ok_or_else(|| DnError::MissingType(trimmed.to_string()))?;
    let attr = attr.trim();
    if attr.is_empty() || attr.contains('\\') {
        return Err(DnError::MissingType(trimmed.to_string()));
    }
    Ok(Rdn::new(attr, unescape(raw_value.trim(), trimmed)?))
}

fn unescape(raw: &str, context: &str) -> Result<String, DnError> {
    let mut out = Vec::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'\\' {
            let Some(&next) = bytes.get(idx + 1) else {
                return Err(DnError::DanglingEscape(context.to_string()));
            };
            let hex = bytes
                .get(idx + 1..idx + 3)
                .filter(|pair| pair.iter().all(u8::is_ascii_hexdigit))
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|pair| u8::from_str_radix(pair, 16).ok());
            if let Some(byte) = hex {
                out.push(byte);
                idx += 3;
            } else {
                out.push(next);
                idx += 2;
            }
        } else {
            out.push(bytes[idx]);
            idx += 1;
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_parse_simple_dn() {
        let dn = Dn::parse("uid=tuser,ou=people,dc=ci,dc=example,dc=com").unwrap();
        assert_eq!(dn.len(), 5);
        assert_eq!(dn.rdn().unwrap().attr(), "uid");
        assert_eq!(dn.rdn().unwrap().value(), "tuser");
        assert_eq!(dn.to_string(), "uid=tuser,ou=people,dc=ci,dc=example,dc=com");
    }

    #[test]
    fn test_blank_dn_is_root() {
        assert!(Dn::parse("").unwrap().is_root());
        assert!(Dn::parse("   ").unwrap().is_root());
        assert!(Dn::root().parent().is_none());
    }

    #[test]
    fn test_comparison_ignores_case_and_spacing() {
        let a = Dn::parse("UID=TUser, OU=People,dc=ci").unwrap();
        let b = Dn::parse("uid=tuser,ou=people,DC=CI").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.normalized(), b.normalized());
    }

    #[test]
    fn test_escaped_comma_stays_in_value() {
        let dn = Dn::parse(r"cn=Doe\, John,ou=people,dc=ci").unwrap();
        assert_eq!(dn.len(), 3);
        assert_eq!(dn.rdn().unwrap().value(), "Doe, John");
        assert_eq!(dn.to_string(), r"cn=Doe\, John,ou=people,dc=ci");
    }

    #[test]
    fn test_hex_escape() {
        let dn = Dn::parse(r"cn=a\2Cb,dc=ci").unwrap();
        assert_eq!(dn.rdn().unwrap().value(), "a,b");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Dn::parse("uid=a,,dc=ci"),
            Err(DnError::EmptyComponent(_))
        ));
        assert!(matches!(Dn::parse("people,dc=ci"), Err(DnError::MissingType(_))));
        assert!(matches!(Dn::parse(r"cn=a\"), Err(DnError::DanglingEscape(_))));
        assert!(matches!(
            Dn::parse("cn=a+sn=b,dc=ci"),
            Err(DnError::MultiValued(_))
        ));
    }

    #[test]
    fn test_hierarchy_helpers() {
        let base = Dn::parse("dc=ci,dc=example").unwrap();
        let people = Dn::parse("ou=people").unwrap().under(&base);
        assert_eq!(people.to_string(), "ou=people,dc=ci,dc=example");

        let user = people.child(Rdn::new("uid", "tuser"));
        assert!(user.is_descendant_of(&base));
        assert!(user.is_within(&people));
        assert!(people.is_within(&people));
        assert!(!people.is_descendant_of(&people));
        assert!(!base.is_within(&people));
        assert_eq!(user.parent().unwrap(), people);

        let renamed = user.with_rdn(Rdn::new("uid", "tuser-renamed"));
        assert_eq!(renamed.parent().unwrap(), people);
        assert_ne!(renamed, user);
    }

    #[test]
    fn test_escaped_special_before_hex_digit() {
        for value in ["+a", "=1f", ",c", ";0"] {
            let dn = Dn::root().child(Rdn::new("cn", value));
            let reparsed = Dn::parse(&dn.to_string()).unwrap();
            assert_eq!(reparsed.rdn().unwrap().value(), value);
        }
        let hex = Dn::parse("cn=a\\2cb").unwrap();
        assert_eq!(hex.rdn().unwrap().value(), "a,b");
    }

    #[test]
    fn test_rdn_parse_rejects_multiple_components() {
        assert!(Rdn::parse("uid=a").is_ok());
        assert!(Rdn::parse("uid=a,ou=b").is_err());
    }

    proptest! {
        #[test]
        fn prop_display_then_parse_is_identity(
            values in proptest::collection::vec("[a-zA-Z0-9 ,+=#\\\\-]{1,12}", 1..5)
        ) {
            let dn = values
                .iter()
                .fold(Dn::root(), |acc, value| acc.under(&Dn::root().child(Rdn::new("cn", value.trim_end()))));
            prop_assume!(dn.rdns().iter().all(|rdn| !rdn.value().is_empty()));
            let reparsed = Dn::parse(&dn.to_string()).unwrap();
            prop_assert_eq!(reparsed, dn);
        }
    }
}
