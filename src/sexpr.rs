//! S-expression reader for filter and aggregate source text.
//!
//! Filters arrive as source strings like `"(> ?a 25)"`; a leading `#` is
//! accepted and stripped. The reader produces a small literal tree; symbol
//! and literal *validation* happens in the consumers, which hold the
//! allow-lists.

use crate::error::QuadStreamError;

/// One parsed form.
#[derive(Debug, Clone, PartialEq)]
pub enum SExpr {
    Sym(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Nil,
    List(Vec<SExpr>),
}

impl SExpr {
    pub fn as_sym(&self) -> Option<&str> {
        match self {
            SExpr::Sym(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            SExpr::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Parse a single form. Trailing content after the form is rejected.
pub fn parse(src: &str) -> Result<SExpr, QuadStreamError> {
    let src = src.trim();
    let src = src.strip_prefix('#').unwrap_or(src);
    let mut reader = Reader { chars: src.char_indices().peekable(), src };
    let form = reader.read_form()?;
    reader.skip_ws();
    if reader.chars.peek().is_some() {
        return Err(invalid(src, "trailing content after expression"));
    }
    Ok(form)
}

fn invalid(src: &str, why: &str) -> QuadStreamError {
    QuadStreamError::InvalidFn(format!("{why} in {src:?}"))
}

struct Reader<'a> {
    src: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl Reader<'_> {
    fn skip_ws(&mut self) {
        while let Some((_, c)) = self.chars.peek() {
            if c.is_whitespace() || *c == ',' {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    fn read_form(&mut self) -> Result<SExpr, QuadStreamError> {
        self.skip_ws();
        match self.chars.peek().copied() {
            None => Err(invalid(self.src, "unexpected end of input")),
            Some((_, '(')) | Some((_, '[')) => self.read_list(),
            Some((_, ')')) | Some((_, ']')) => Err(invalid(self.src, "unexpected closing paren")),
            Some((_, '"')) => self.read_string(),
            Some(_) => self.read_atom(),
        }
    }

    fn read_list(&mut self) -> Result<SExpr, QuadStreamError> {
        let (_, open) = self.chars.next().unwrap();
        let close = if open == '(' { ')' } else { ']' };
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.chars.peek().copied() {
                None => return Err(invalid(self.src, "unterminated list")),
                Some((_, c)) if c == close => {
                    self.chars.next();
                    return Ok(SExpr::List(items));
                }
                Some((_, ')')) | Some((_, ']')) => {
                    return Err(invalid(self.src, "mismatched closing paren"));
                }
                Some(_) => items.push(self.read_form()?),
            }
        }
    }

    fn read_string(&mut self) -> Result<SExpr, QuadStreamError> {
        self.chars.next(); // opening quote
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err(invalid(self.src, "unterminated string")),
                Some((_, '"')) => return Ok(SExpr::Str(out)),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, c @ ('"' | '\\'))) => out.push(c),
                    _ => return Err(invalid(self.src, "bad string escape")),
                },
                Some((_, c)) => out.push(c),
            }
        }
    }

    fn read_atom(&mut self) -> Result<SExpr, QuadStreamError> {
        let mut atom = String::new();
        while let Some((_, c)) = self.chars.peek() {
            if c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | ',' | '"') {
                break;
            }
            atom.push(*c);
            self.chars.next();
        }
        debug_assert!(!atom.is_empty());
        Ok(match atom.as_str() {
            "true" => SExpr::Bool(true),
            "false" => SExpr::Bool(false),
            "nil" => SExpr::Nil,
            _ => {
                if let Ok(n) = atom.parse::<i64>() {
                    SExpr::Int(n)
                } else if let Ok(d) = atom.parse::<f64>()
                    && atom.chars().any(|c| c.is_ascii_digit())
                {
                    SExpr::Float(d)
                } else {
                    SExpr::Sym(atom)
                }
            }
        })
    }
}
