//! Typed search filters (RFC 4515 subset).
//!
//! Only the forms the scenario catalog needs are supported: presence,
//! equality and the `&`, `|`, `!` combinators. Substring and ordering
//! matches are rejected at parse time instead of being silently
//! misinterpreted.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::entry::{Entry, same_value};

/// Errors produced while parsing a filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// Input ended before the filter was complete.
    #[error("unexpected end of filter {0:?}")]
    UnexpectedEnd(String),

    /// A character appeared where it is not allowed.
    #[error("unexpected {found:?} at offset {offset} in filter {input:?}")]
    Unexpected {
        /// Whole input.
        input: String,
        /// Offending character.
        found: char,
        /// Byte offset.
        offset: usize,
    },

    /// Substring, approximate or ordering matches.
    #[error("unsupported filter item {0:?}")]
    Unsupported(String),

    /// Escaped bytes of a value do not form UTF-8.
    #[error("escaped value is not UTF-8 in filter {0:?}")]
    InvalidValue(String),
}

/// A parsed search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `(attr=*)`
    Present(String),
    /// `(attr=value)`
    Equality(String, String),
    /// `(&(..)(..))`
    And(Vec<Filter>),
    /// `(|(..)(..))`
    Or(Vec<Filter>),
    /// `(!(..))`
    Not(Box<Filter>),
}

impl Filter {
    /// Matches every entry.
    #[must_use]
    pub fn any() -> Self {
        Self::Present("objectClass".to_string())
    }

    /// `(attr=value)`.
    #[must_use]
    pub fn eq(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equality(attr.into(), value.into())
    }

    /// `(objectClass=class)`.
    #[must_use]
    pub fn object_class(class: impl Into<String>) -> Self {
        Self::eq("objectClass", class)
    }

    /// Conjunction of `filters`.
    #[must_use]
    pub fn and(filters: impl IntoIterator<Item = Self>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    /// Parses the textual form.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] when the input is malformed or uses an
    /// unsupported item type.
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        let mut parser = Parser {
            input,
            chars: input.char_indices().collect(),
            pos: 0,
        };
        let filter = parser.filter()?;
        parser.skip_ws();
        match parser.peek() {
            None => Ok(filter),
            Some((offset, found)) => Err(FilterError::Unexpected {
                input: input.to_string(),
                found,
                offset,
            }),
        }
    }

    /// Evaluates the filter against `entry`.
    #[must_use]
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Self::Present(attr) => {
                attr.eq_ignore_ascii_case("objectClass") || !entry.get(attr).is_empty()
            },
            Self::Equality(attr, value) => entry
                .get(attr)
                .iter()
                .any(|candidate| same_value(candidate, value)),
            Self::And(items) => items.iter().all(|item| item.matches(entry)),
            Self::Or(items) => items.iter().any(|item| item.matches(entry)),
            Self::Not(inner) => !inner.matches(entry),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present(attr) => write!(f, "({attr}=*)"),
            Self::Equality(attr, value) => {
                write!(f, "({attr}=")?;
                for ch in value.chars() {
                    match ch {
                        '*' => f.write_str("\\2a")?,
                        '(' => f.write_str("\\28")?,
                        ')' => f.write_str("\\29")?,
                        '\\' => f.write_str("\\5c")?,
                        '\0' => f.write_str("\\00")?,
                        other => write!(f, "{other}")?,
                    }
                }
                f.write_str(")")
            },
            Self::And(items) => {
                f.write_str("(&")?;
                for item in items {
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            },
            Self::Or(items) => {
                f.write_str("(|")?;
                for item in items {
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            },
            Self::Not(inner) => write!(f, "(!{inner})"),
        }
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<(usize, char)> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some((_, ch)) if ch.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn end(&self) -> FilterError {
        FilterError::UnexpectedEnd(self.input.to_string())
    }

    fn unexpected(&self, offset: usize, found: char) -> FilterError {
        FilterError::Unexpected {
            input: self.input.to_string(),
            found,
            offset,
        }
    }

    fn expect(&mut self, want: char) -> Result<(), FilterError> {
        self.skip_ws();
        match self.peek() {
            Some((_, ch)) if ch == want => {
                self.pos += 1;
                Ok(())
            },
            Some((offset, ch)) => Err(self.unexpected(offset, ch)),
            None => Err(self.end()),
        }
    }

    fn filter(&mut self) -> Result<Filter, FilterError> {
        self.expect('(')?;
        self.skip_ws();
        let filter = match self.peek() {
            Some((_, '&')) => {
                self.pos += 1;
                Filter::And(self.list()?)
            },
            Some((_, '|')) => {
                self.pos += 1;
                Filter::Or(self.list()?)
            },
            Some((_, '!')) => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            },
            Some(_) => self.item()?,
            None => return Err(self.end()),
        };
        self.expect(')')?;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>, FilterError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some((_, '(')) => items.push(self.filter()?),
                Some(_) => break,
                None => return Err(self.end()),
            }
        }
        Ok(items)
    }

    fn item(&mut self) -> Result<Filter, FilterError> {
        let mut attr = String::new();
        loop {
            match self.peek() {
                Some((_, '=')) => break,
                Some((_, ch)) if ch.is_ascii_alphanumeric() || ch == '-' || ch == ';' || ch == '.' => {
                    attr.push(ch);
                    self.pos += 1;
                },
                Some((_, ch)) if matches!(ch, '~' | '>' | '<' | ':') => {
                    return Err(FilterError::Unsupported(self.input.to_string()));
                },
                Some((offset, ch)) => return Err(self.unexpected(offset, ch)),
                None => return Err(self.end()),
            }
        }
        self.pos += 1;
        let mut raw = Vec::new();
        let mut wildcard = false;
        loop {
            match self.peek() {
                Some((_, ')')) => break,
                Some((offset, '(')) => return Err(self.unexpected(offset, '(')),
                Some((_, '\\')) => {
                    raw.push(self.escaped_byte()?);
                    self.pos += 3;
                },
                Some((_, ch)) => {
                    wildcard |= ch == '*';
                    let mut buf = [0; 4];
                    raw.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                    self.pos += 1;
                },
                None => return Err(self.end()),
            }
        }
        if attr.is_empty() {
            return Err(FilterError::Unsupported(self.input.to_string()));
        }
        if wildcard {
            return if raw == b"*" {
                Ok(Filter::Present(attr))
            } else {
                Err(FilterError::Unsupported(self.input.to_string()))
            };
        }
        let value = String::from_utf8(raw)
            .map_err(|_| FilterError::InvalidValue(self.input.to_string()))?;
        Ok(Filter::Equality(attr, value.trim().to_string()))
    }

    /// Decodes the `\XX` escape at the cursor.
    fn escaped_byte(&self) -> Result<u8, FilterError> {
        let mut value = 0u8;
        for step in 1..=2 {
            let (offset, ch) = *self.chars.get(self.pos + step).ok_or_else(|| self.end())?;
            let digit = ch.to_digit(16).ok_or_else(|| self.unexpected(offset, ch))?;
            value = value * 16 + u8::try_from(digit).map_err(|_| self.unexpected(offset, ch))?;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::Dn;
    use crate::entry::Attributes;

    fn person() -> Entry {
        Entry::new(
            Dn::parse("uid=tuser2,ou=people,dc=ci").unwrap(),
            Attributes::new()
                .with("objectClass", ["inetOrgPerson"])
                .with("uid", ["tuser2"])
                .with("memberOf", ["cn=fakeapp,ou=groups,dc=ci"]),
        )
    }

    #[test]
    fn test_parse_presence_and_equality() {
        assert_eq!(
            Filter::parse("(objectclass=*)").unwrap(),
            Filter::Present("objectclass".to_string())
        );
        assert_eq!(
            Filter::parse("(objectClass=groupOfNames)").unwrap(),
            Filter::object_class("groupOfNames")
        );
    }

    #[test]
    fn test_parse_conjunction_with_whitespace() {
        let filter = Filter::parse(
            "(& (objectclass=inetOrgPerson)   (memberOf=cn=fakeapp,ou=groups,dc=ci))",
        )
        .unwrap();
        assert_eq!(
            filter,
            Filter::and([
                Filter::eq("objectclass", "inetOrgPerson"),
                Filter::eq("memberOf", "cn=fakeapp,ou=groups,dc=ci"),
            ])
        );
        assert!(filter.matches(&person()));
    }

    #[test]
    fn test_display_escapes_values() {
        let filter = Filter::eq("cn", "a*(b)");
        assert_eq!(filter.to_string(), r"(cn=a\2a\28b\29)");
        assert_eq!(Filter::parse(&filter.to_string()).unwrap(), filter);
    }

    #[test]
    fn test_escaped_bytes_decode_as_utf8() {
        assert_eq!(
            Filter::parse(r"(cn=\2a)").unwrap(),
            Filter::eq("cn", "*")
        );
        assert_eq!(
            Filter::parse(r"(sn=Ren\c3\a9)").unwrap(),
            Filter::eq("sn", "Ren\u{e9}")
        );
        let accented = Filter::eq("sn", "\u{e9}*\u{e9}");
        assert_eq!(Filter::parse(&accented.to_string()).unwrap(), accented);
        assert!(matches!(
            Filter::parse(r"(cn=\ff)"),
            Err(FilterError::InvalidValue(_))
        ));
        assert!(matches!(
            Filter::parse(r"(cn=\zz)"),
            Err(FilterError::Unexpected { found: 'z', .. })
        ));
    }

    #[test]
    fn test_matches_dn_values_structurally() {
        let filter = Filter::eq("memberOf", "CN=FakeApp, ou=groups, dc=ci");
        assert!(filter.matches(&person()));
        assert!(!Filter::eq("memberOf", "cn=other,ou=groups,dc=ci").matches(&person()));
    }

    #[test]
    fn test_not_and_or() {
        let entry = person();
        assert!(Filter::Not(Box::new(Filter::eq("uid", "nobody"))).matches(&entry));
        assert!(
            Filter::Or(vec![Filter::eq("uid", "nobody"), Filter::eq("uid", "TUSER2")])
                .matches(&entry)
        );
    }

    #[test]
    fn test_rejects_malformed_and_unsupported() {
        assert!(matches!(
            Filter::parse("(objectclass=inetOrgPerson)uid"),
            Err(FilterError::Unexpected { .. })
        ));
        assert!(matches!(
            Filter::parse("(cn=ab*c)"),
            Err(FilterError::Unsupported(_))
        ));
        assert!(matches!(
            Filter::parse("(cn>=a)"),
            Err(FilterError::Unsupported(_))
        ));
        assert!(matches!(
            Filter::parse("(cn=a"),
            Err(FilterError::UnexpectedEnd(_))
        ));
    }
}
