//! Boolean filter engine over service property maps.
//!
//! Filters are written in a parenthesized prefix grammar: `(&(a=1)(b=2))`,
//! `(|(a=1)(a=2))`, `(!(a=1))`, with leaf comparisons `=`, `>=`, `<=`, `~=`,
//! presence (`name=*`), substring wildcards (`name=f*o`) and the literal
//! `(*)` that matches everything. A parsed [`Filter`] is immutable and is
//! meant to be built once and reused for repeated matching.

pub mod error;
pub mod parser;

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::registry::properties::{value_text, Properties};
pub use error::FilterError;

/// A single predicate node in a parsed filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    /// `(*)`: matches every property map.
    All,
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
    /// `(key=*)`: the key is present, whatever its value.
    Present(String),
    Equals { key: String, value: String },
    /// `(key=f*o)`: lowercased pattern segments split on `*`.
    Substring { key: String, segments: Vec<String> },
    /// `(key~=value)`: case-insensitive equality.
    Approx { key: String, value: String },
    GreaterEq { key: String, value: String },
    LessEq { key: String, value: String },
}

/// An immutable, reusable predicate over a [`Properties`] map.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    node: FilterNode,
    source: String,
}

impl Filter {
    /// Parse a filter from its textual form.
    pub fn parse(input: &str) -> Result<Filter, FilterError> {
        parser::parse(input)
    }

    pub(crate) fn from_node(node: FilterNode, source: String) -> Filter {
        Filter { node, source }
    }

    /// Build a filter from a flat property-equality map: each key becomes an
    /// equality test, list values become an OR of per-element equalities, and
    /// multiple keys are combined with AND.
    pub fn from_properties(props: &Properties) -> Filter {
        let mut keys: Vec<&String> = props.keys().collect();
        keys.sort();

        let mut clauses = Vec::with_capacity(keys.len());
        for key in keys {
            match &props[key] {
                Value::Array(items) => {
                    let alts = items
                        .iter()
                        .map(|item| FilterNode::Equals {
                            key: key.clone(),
                            value: value_text(item),
                        })
                        .collect::<Vec<_>>();
                    if alts.len() == 1 {
                        clauses.push(alts.into_iter().next().unwrap());
                    } else {
                        clauses.push(FilterNode::Or(alts));
                    }
                }
                value => clauses.push(FilterNode::Equals {
                    key: key.clone(),
                    value: value_text(value),
                }),
            }
        }

        let node = match clauses.len() {
            0 => FilterNode::All,
            1 => clauses.into_iter().next().unwrap(),
            _ => FilterNode::And(clauses),
        };
        let source = node.to_string();
        Filter { node, source }
    }

    /// Evaluate this filter against a property map.
    pub fn matches(&self, props: &Properties) -> bool {
        self.node.matches(props)
    }

    pub fn node(&self) -> &FilterNode {
        &self.node
    }

    /// The textual form this filter was parsed from (or rendered to).
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Filter::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FilterNode {
    /// Evaluate this node against a property map.
    pub fn matches(&self, props: &Properties) -> bool {
        match self {
            FilterNode::All => true,
            FilterNode::And(children) => children.iter().all(|c| c.matches(props)),
            FilterNode::Or(children) => children.iter().any(|c| c.matches(props)),
            FilterNode::Not(child) => !child.matches(props),
            FilterNode::Present(key) => props.contains_key(key),
            FilterNode::Equals { key, value } => {
                leaf_matches(props, key, |v| value_text(v) == *value)
            }
            FilterNode::Substring { key, segments } => leaf_matches(props, key, |v| {
                wildcard_match(segments, &value_text(v).to_lowercase())
            }),
            FilterNode::Approx { key, value } => leaf_matches(props, key, |v| {
                value_text(v).eq_ignore_ascii_case(value)
            }),
            FilterNode::GreaterEq { key, value } => {
                leaf_matches(props, key, |v| compare(&value_text(v), value) >= 0)
            }
            FilterNode::LessEq { key, value } => {
                leaf_matches(props, key, |v| compare(&value_text(v), value) <= 0)
            }
        }
    }
}

impl fmt::Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterNode::All => write!(f, "(*)"),
            FilterNode::And(children) => {
                write!(f, "(&")?;
                for child in children {
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            FilterNode::Or(children) => {
                write!(f, "(|")?;
                for child in children {
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            FilterNode::Not(child) => write!(f, "(!{})", child),
            FilterNode::Present(key) => write!(f, "({}=*)", key),
            FilterNode::Equals { key, value } => write!(f, "({}={})", key, value),
            FilterNode::Substring { key, segments } => {
                write!(f, "({}={})", key, segments.join("*"))
            }
            FilterNode::Approx { key, value } => write!(f, "({}~={})", key, value),
            FilterNode::GreaterEq { key, value } => write!(f, "({}>={})", key, value),
            FilterNode::LessEq { key, value } => write!(f, "({}<={})", key, value),
        }
    }
}

/// Apply a leaf predicate to a property value. An array-valued property
/// matches when any of its elements does.
fn leaf_matches<F>(props: &Properties, key: &str, pred: F) -> bool
where
    F: Fn(&Value) -> bool,
{
    match props.get(key) {
        Some(Value::Array(items)) => items.iter().any(&pred),
        Some(value) => pred(value),
        None => false,
    }
}

/// Ordered comparison used by `>=` / `<=`: numeric when both sides parse as
/// numbers, lexicographic otherwise.
fn compare(left: &str, right: &str) -> i8 {
    let ordering = match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        (Ok(l), Ok(r)) => l.partial_cmp(&r).unwrap_or(std::cmp::Ordering::Equal),
        _ => left.cmp(right),
    };
    match ordering {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

/// Match lowercased `text` against pattern segments produced by splitting the
/// wildcard pattern on `*`. Empty first/last segments mean the pattern was
/// unanchored on that side.
fn wildcard_match(segments: &[String], text: &str) -> bool {
    match segments.len() {
        0 => return text.is_empty(),
        1 => return text == segments[0],
        _ => {}
    }

    let mut start = 0;
    let mut end = text.len();
    let last = segments.len() - 1;

    if !segments[0].is_empty() {
        if !text.starts_with(segments[0].as_str()) {
            return false;
        }
        start = segments[0].len();
    }
    if !segments[last].is_empty() {
        let suffix = segments[last].as_str();
        if end < start + suffix.len() || !text.ends_with(suffix) {
            return false;
        }
        end -= suffix.len();
    }
    for segment in &segments[1..last] {
        if segment.is_empty() {
            continue;
        }
        match text[start..end].find(segment.as_str()) {
            Some(offset) => start += offset + segment.len(),
            None => return false,
        }
    }
    true
}
