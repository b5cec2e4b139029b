//! Symbolic references
//!
//! Mapping values refer to other objects in one of two forms:
//!
//! ```text
//! <party.customerperson>1042            object produced by legacy row 1042
//! <party.customerperson>lastName=Smith  existing object with lastName "Smith"
//! ```
//!
//! The canonical string form doubles as the resolution cache key. Row ids
//! and members containing `=` or `\` are escaped with `\` so that both forms
//! round-trip.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolicReference {
    /// Object produced by the legacy row `row_id`
    Row { archetype: String, row_id: String },
    /// Existing object whose `member` equals `value`
    NaturalKey {
        archetype: String,
        member: String,
        value: String,
    },
}

impl SymbolicReference {
    pub fn row(archetype: impl Into<String>, row_id: impl Into<String>) -> Self {
        SymbolicReference::Row {
            archetype: archetype.into(),
            row_id: row_id.into(),
        }
    }

    pub fn natural_key(
        archetype: impl Into<String>,
        member: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        SymbolicReference::NaturalKey {
            archetype: archetype.into(),
            member: member.into(),
            value: value.into(),
        }
    }

    pub fn archetype(&self) -> &str {
        match self {
            SymbolicReference::Row { archetype, .. }
            | SymbolicReference::NaturalKey { archetype, .. } => archetype,
        }
    }

    pub fn row_id(&self) -> Option<&str> {
        match self {
            SymbolicReference::Row { row_id, .. } => Some(row_id),
            SymbolicReference::NaturalKey { .. } => None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SymbolicReference::Row { archetype, row_id } => encode_row(archetype, row_id),
            SymbolicReference::NaturalKey {
                archetype,
                member,
                value,
            } => encode_natural_key(archetype, member, value),
        }
    }
}

impl fmt::Display for SymbolicReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// `<archetype>rowId`
pub fn encode_row(archetype: &str, row_id: &str) -> String {
    let mut encoded = String::with_capacity(archetype.len() + row_id.len() + 2);
    encoded.push('<');
    encoded.push_str(archetype);
    encoded.push('>');
    push_escaped(&mut encoded, row_id);
    encoded
}

/// `<archetype>member=value`. Only the member is escaped; the value runs to
/// the end of the string.
pub fn encode_natural_key(archetype: &str, member: &str, value: &str) -> String {
    let mut encoded = String::with_capacity(archetype.len() + member.len() + value.len() + 3);
    encoded.push('<');
    encoded.push_str(archetype);
    encoded.push('>');
    push_escaped(&mut encoded, member);
    encoded.push('=');
    encoded.push_str(value);
    encoded
}

fn push_escaped(encoded: &mut String, text: &str) {
    for c in text.chars() {
        if c == '=' || c == '\\' {
            encoded.push('\\');
        }
        encoded.push(c);
    }
}

/// Decode either reference form. Malformed input yields `None`.
pub fn decode(input: &str) -> Option<SymbolicReference> {
    let rest = input.strip_prefix('<')?;
    let close = rest.find('>')?;
    let archetype = &rest[..close];
    let body = &rest[close + 1..];
    if archetype.is_empty() || archetype.contains('<') || body.is_empty() {
        return None;
    }

    let mut unescaped = String::with_capacity(body.len());
    let mut chars = body.char_indices();
    while let Some((pos, c)) = chars.next() {
        match c {
            '\\' => {
                let (_, escaped) = chars.next()?;
                unescaped.push(escaped);
            }
            '=' => {
                if unescaped.is_empty() {
                    return None;
                }
                return Some(SymbolicReference::natural_key(
                    archetype,
                    unescaped,
                    &body[pos + 1..],
                ));
            }
            other => unescaped.push(other),
        }
    }
    Some(SymbolicReference::row(archetype, unescaped))
}
