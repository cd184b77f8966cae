use std::fmt;

use crate::select::SelectError;

/// A boolean expression over block tags.
///
/// Grammar, loosest binding first:
/// `or := and ("||" and)*`, `and := unary ("&&" unary)*`,
/// `unary := "!" unary | "(" or ")" | tag`. The keywords `or`, `and` and
/// `not` are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagExpr {
    Tag(String),
    Not(Box<TagExpr>),
    And(Box<TagExpr>, Box<TagExpr>),
    Or(Box<TagExpr>, Box<TagExpr>),
}

impl TagExpr {
    pub fn parse(input: &str) -> Result<Self, SelectError> {
        let tokens = tokenize(input)?;
        let mut p = TokenParser {
            input,
            tokens,
            pos: 0,
        };
        let expr = p.parse_or()?;
        if let Some(tok) = p.tokens.get(p.pos) {
            return Err(p.error(format!("unexpected `{tok}`")));
        }
        Ok(expr)
    }

    pub fn eval(&self, tags: &[String]) -> bool {
        match self {
            Self::Tag(t) => tags.iter().any(|x| x == t),
            Self::Not(e) => !e.eval(tags),
            Self::And(a, b) => a.eval(tags) && b.eval(tags),
            Self::Or(a, b) => a.eval(tags) || b.eval(tags),
        }
    }

    pub fn and(self, other: TagExpr) -> TagExpr {
        Self::And(Box::new(self), Box::new(other))
    }
}

impl fmt::Display for TagExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(t) => f.write_str(t),
            Self::Not(e) => write!(f, "!{e}"),
            Self::And(a, b) => write!(f, "({a} && {b})"),
            Self::Or(a, b) => write!(f, "({a} || {b})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Tag(String),
    Not,
    And,
    Or,
    Open,
    Close,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(t) => f.write_str(t),
            Self::Not => f.write_str("!"),
            Self::And => f.write_str("&&"),
            Self::Or => f.write_str("||"),
            Self::Open => f.write_str("("),
            Self::Close => f.write_str(")"),
        }
    }
}

fn is_tag_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '/')
}

fn tokenize(input: &str) -> Result<Vec<Token>, SelectError> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '!' => {
                out.push(Token::Not);
                i += 1;
            }
            '(' => {
                out.push(Token::Open);
                i += 1;
            }
            ')' => {
                out.push(Token::Close);
                i += 1;
            }
            '&' | '|' if chars.get(i + 1) == Some(&c) => {
                out.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            c if is_tag_char(c) => {
                let start = i;
                while i < chars.len() && is_tag_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                out.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Tag(word),
                });
            }
            other => {
                return Err(SelectError::InvalidTagExpr {
                    input: input.to_string(),
                    message: format!("unexpected character `{other}`"),
                })
            }
        }
    }
    if out.is_empty() {
        return Err(SelectError::InvalidTagExpr {
            input: input.to_string(),
            message: "empty expression".to_string(),
        });
    }
    Ok(out)
}

struct TokenParser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenParser<'_> {
    fn error(&self, message: String) -> SelectError {
        SelectError::InvalidTagExpr {
            input: self.input.to_string(),
            message,
        }
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.tokens.get(self.pos) == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<TagExpr, SelectError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = TagExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<TagExpr, SelectError> {
        let mut lhs = self.parse_unary()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_unary()?;
            lhs = TagExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<TagExpr, SelectError> {
        let Some(tok) = self.tokens.get(self.pos).cloned() else {
            return Err(self.error("unexpected end of expression".to_string()));
        };
        self.pos += 1;
        match tok {
            Token::Not => Ok(TagExpr::Not(Box::new(self.parse_unary()?))),
            Token::Open => {
                let inner = self.parse_or()?;
                if !self.eat(&Token::Close) {
                    return Err(self.error("missing `)`".to_string()));
                }
                Ok(inner)
            }
            Token::Tag(t) => Ok(TagExpr::Tag(t)),
            other => Err(self.error(format!("unexpected `{other}`"))),
        }
    }
}
