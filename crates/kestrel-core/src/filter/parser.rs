//! Recursive-descent parser for the filter grammar.

use crate::filter::{Filter, FilterError, FilterNode};

const FRAGMENT_LEN: usize = 32;

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

/// Parse a complete filter expression. Trailing garbage is an error.
pub fn parse(input: &str) -> Result<Filter, FilterError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(FilterError::invalid(input, "empty filter"));
    }

    let mut parser = Parser { src: trimmed, pos: 0 };
    let node = parser.parse_node()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error("unexpected text after filter"));
    }
    Ok(Filter::from_node(node, trimmed.to_string()))
}

impl<'a> Parser<'a> {
    fn parse_node(&mut self) -> Result<FilterNode, FilterError> {
        self.skip_ws();
        self.expect('(')?;
        self.skip_ws();

        let node = match self.peek() {
            Some('&') => {
                self.advance();
                FilterNode::And(self.parse_children()?)
            }
            Some('|') => {
                self.advance();
                FilterNode::Or(self.parse_children()?)
            }
            Some('!') => {
                self.advance();
                FilterNode::Not(Box::new(self.parse_node()?))
            }
            Some('*') if self.peek_at(1) == Some(')') => {
                self.advance();
                FilterNode::All
            }
            Some(_) => self.parse_leaf()?,
            None => return Err(self.error("unterminated filter")),
        };

        self.skip_ws();
        self.expect(')')?;
        Ok(node)
    }

    /// One or more parenthesized sub-expressions after `&` / `|`.
    fn parse_children(&mut self) -> Result<Vec<FilterNode>, FilterError> {
        let mut children = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some('(') => children.push(self.parse_node()?),
                _ if children.is_empty() => {
                    return Err(self.error("operator requires at least one sub-expression"));
                }
                _ => break,
            }
        }
        Ok(children)
    }

    /// `key=value`, `key=*`, `key=f*o`, `key>=value`, `key<=value`, `key~=value`.
    fn parse_leaf(&mut self) -> Result<FilterNode, FilterError> {
        let key_start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
                break;
            }
            self.advance();
        }
        let key = self.src[key_start..self.pos].trim().to_string();
        if key.is_empty() {
            return Err(self.error("comparison is missing an attribute name"));
        }

        let operator = match self.peek() {
            Some('=') => {
                self.advance();
                '='
            }
            Some(op @ ('<' | '>' | '~')) => {
                self.advance();
                if self.peek() != Some('=') {
                    return Err(self.error(format!("expected '=' after '{}'", op)));
                }
                self.advance();
                op
            }
            _ => return Err(self.error("expected a comparison operator")),
        };

        let value_start = self.pos;
        while let Some(c) = self.peek() {
            if c == ')' {
                break;
            }
            if c == '(' {
                return Err(self.error("'(' is not allowed inside a value"));
            }
            self.advance();
        }
        if self.at_end() {
            return Err(self.error("unterminated comparison"));
        }
        let value = self.src[value_start..self.pos].trim().to_string();

        Ok(match operator {
            '>' => FilterNode::GreaterEq { key, value },
            '<' => FilterNode::LessEq { key, value },
            '~' => FilterNode::Approx { key, value },
            _ if value == "*" => FilterNode::Present(key),
            _ if value.contains('*') => FilterNode::Substring {
                key,
                segments: value
                    .to_lowercase()
                    .split('*')
                    .map(str::to_string)
                    .collect(),
            },
            _ => FilterNode::Equals { key, value },
        })
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error(format!("expected '{}'", expected))),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(offset)
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    /// Error naming the offending fragment of input.
    fn error(&self, message: impl Into<String>) -> FilterError {
        let rest = &self.src[self.pos.min(self.src.len())..];
        let fragment: String = if rest.is_empty() {
            self.src.chars().rev().take(FRAGMENT_LEN).collect::<Vec<_>>().into_iter().rev().collect()
        } else {
            rest.chars().take(FRAGMENT_LEN).collect()
        };
        FilterError::invalid(fragment, message)
    }
}
