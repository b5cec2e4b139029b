//! Target path expressions
//!
//! A mapping target describes where a column value lands in the object graph:
//!
//! ```text
//! path    := ('$' field)? segment+
//! segment := '<' archetype '>' member ('[' index ']')?
//! ```
//!
//! `<party.customerperson>contacts[0]<contact.location>address` reads as: the
//! `address` member of the `contact.location` held at position 0 of the
//! `contacts` collection of a `party.customerperson`.

use std::fmt;

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, digit1},
    combinator::{all_consuming, map_res, opt},
    error::{context, convert_error, VerboseError},
    multi::many1,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};

type ParseResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// One segment of a parsed path, linked to the segment nested inside it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Binding name (`$name`). Only ever set on the root node.
    pub field: Option<String>,
    pub archetype: String,
    pub name: String,
    /// Collection position. `None` means the member is not a collection.
    pub index: Option<usize>,
    pub child: Option<Box<Node>>,
}

impl Node {
    pub fn child(&self) -> Option<&Node> {
        self.child.as_deref()
    }

    pub fn is_collection(&self) -> bool {
        self.index.is_some()
    }

    /// Walk the chain from this node to the innermost leaf
    pub fn iter(&self) -> NodeIter<'_> {
        NodeIter { next: Some(self) }
    }

    pub fn leaf(&self) -> &Node {
        let mut node = self;
        while let Some(child) = node.child() {
            node = child;
        }
        node
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "${}", field)?;
        }
        for node in self.iter() {
            write!(f, "<{}>{}", node.archetype, node.name)?;
            if let Some(index) = node.index {
                write!(f, "[{}]", index)?;
            }
        }
        Ok(())
    }
}

pub struct NodeIter<'a> {
    next: Option<&'a Node>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.child();
        Some(current)
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Parse a path expression, returning `None` if it is malformed.
pub fn parse(input: &str) -> Option<Node> {
    parse_path(input).ok()
}

/// Parse a path expression, describing where parsing failed on error.
pub fn parse_path(input: &str) -> Result<Node, String> {
    match all_consuming(expression)(input) {
        Ok((_, (field, segments))) => build_chain(field, segments)
            .ok_or_else(|| format!("'{}' contains no segments", input)),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(convert_error(input, e)),
        Err(nom::Err::Incomplete(_)) => Err("Incomplete input".to_string()),
    }
}

// ============================================================================
// Internal Parsers
// ============================================================================

struct Segment<'a> {
    archetype: &'a str,
    name: &'a str,
    index: Option<usize>,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_archetype_char(c: char) -> bool {
    !matches!(c, '<' | '>' | '$' | '[' | ']') && !c.is_whitespace()
}

fn expression(input: &str) -> ParseResult<'_, (Option<&str>, Vec<Segment<'_>>)> {
    pair(opt(field), many1(segment))(input)
}

fn field(input: &str) -> ParseResult<'_, &str> {
    context("field reference", preceded(char('$'), take_while1(is_word_char)))(input)
}

fn segment(input: &str) -> ParseResult<'_, Segment<'_>> {
    let (input, (archetype, name, index)) = tuple((
        context(
            "archetype",
            delimited(char('<'), take_while1(is_archetype_char), char('>')),
        ),
        context("member name", take_while1(is_word_char)),
        opt(index),
    ))(input)?;
    Ok((
        input,
        Segment {
            archetype,
            name,
            index,
        },
    ))
}

fn index(input: &str) -> ParseResult<'_, usize> {
    context(
        "collection index",
        delimited(char('['), map_res(digit1, str::parse::<usize>), char(']')),
    )(input)
}

fn build_chain(field: Option<&str>, segments: Vec<Segment<'_>>) -> Option<Node> {
    let mut chain: Option<Box<Node>> = None;
    for segment in segments.into_iter().rev() {
        chain = Some(Box::new(Node {
            field: None,
            archetype: segment.archetype.to_string(),
            name: segment.name.to_string(),
            index: segment.index,
            child: chain,
        }));
    }
    let mut root = *chain?;
    root.field = field.map(str::to_string);
    Some(root)
}
