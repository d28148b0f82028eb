use crate::error::{FormulaError, FormulaResult};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, anychar, char, digit1, multispace0, none_of, one_of},
    combinator::{map, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use std::fmt;

/// Reserved words of the formula language. Matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Where,
    If,
    Then,
    Else,
    And,
    Or,
    Not,
    In,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "WHERE" => Some(Keyword::Where),
            "IF" => Some(Keyword::If),
            "THEN" => Some(Keyword::Then),
            "ELSE" => Some(Keyword::Else),
            "AND" => Some(Keyword::And),
            "OR" => Some(Keyword::Or),
            "NOT" => Some(Keyword::Not),
            "IN" => Some(Keyword::In),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Keyword(Keyword),
    Number(String),
    /// Raw literal text, quotes included.
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    /// `->`, accepted as a member-access dot.
    Arrow,
    /// `=>`
    FatArrow,
    Caret,
    Plus,
    Minus,
    Star,
    Slash,
    /// A bare `=`. Equality, or a keyword argument when it follows `axis`/`index`.
    Eq,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "identifier '{}'", name),
            TokenKind::Keyword(kw) => write!(f, "keyword {:?}", kw),
            TokenKind::Number(n) => write!(f, "number {}", n),
            TokenKind::Str(s) => write!(f, "string {}", s),
            TokenKind::LParen => f.write_str("'('"),
            TokenKind::RParen => f.write_str("')'"),
            TokenKind::LBracket => f.write_str("'['"),
            TokenKind::RBracket => f.write_str("']'"),
            TokenKind::Comma => f.write_str("','"),
            TokenKind::Dot => f.write_str("'.'"),
            TokenKind::Arrow => f.write_str("'->'"),
            TokenKind::FatArrow => f.write_str("'=>'"),
            TokenKind::Caret => f.write_str("'^'"),
            TokenKind::Plus => f.write_str("'+'"),
            TokenKind::Minus => f.write_str("'-'"),
            TokenKind::Star => f.write_str("'*'"),
            TokenKind::Slash => f.write_str("'/'"),
            TokenKind::Eq => f.write_str("'='"),
            TokenKind::EqEq => f.write_str("'=='"),
            TokenKind::NotEq => f.write_str("'!='"),
            TokenKind::Lt => f.write_str("'<'"),
            TokenKind::Le => f.write_str("'<='"),
            TokenKind::Gt => f.write_str("'>'"),
            TokenKind::Ge => f.write_str("'>='"),
        }
    }
}

/// A token plus its byte span in the formula text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn is_keyword(&self, kw: Keyword) -> bool {
        self.kind == TokenKind::Keyword(kw)
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(name) => Some(name),
            _ => None,
        }
    }
}

// Integers, decimals and exponents. Signs are unary operators.
fn lex_number(input: &str) -> IResult<&str, TokenKind> {
    map(
        recognize(tuple((
            digit1,
            opt(pair(char('.'), digit1)),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
        |s: &str| TokenKind::Number(s.to_string()),
    )(input)
}

fn quoted<'a>(quote: char) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| {
        recognize(delimited(
            char(quote),
            many0(alt((
                recognize(preceded(char('\\'), anychar)),
                recognize(none_of(if quote == '"' { "\"\\" } else { "'\\" })),
            ))),
            char(quote),
        ))(input)
    }
}

fn lex_string(input: &str) -> IResult<&str, TokenKind> {
    map(alt((quoted('"'), quoted('\''))), |s: &str| TokenKind::Str(s.to_string()))(input)
}

fn lex_word(input: &str) -> IResult<&str, TokenKind> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0(alt((alphanumeric1, tag("_")))),
        )),
        |word: &str| match Keyword::from_word(word) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(word.to_string()),
        },
    )(input)
}

fn lex_operator(input: &str) -> IResult<&str, TokenKind> {
    alt((
        value(TokenKind::FatArrow, tag("=>")),
        value(TokenKind::Arrow, tag("->")),
        value(TokenKind::EqEq, tag("==")),
        value(TokenKind::NotEq, tag("!=")),
        value(TokenKind::NotEq, tag("<>")),
        value(TokenKind::Le, tag("<=")),
        value(TokenKind::Ge, tag(">=")),
    ))(input)
}

fn lex_punct(input: &str) -> IResult<&str, TokenKind> {
    alt((
        value(TokenKind::LParen, char('(')),
        value(TokenKind::RParen, char(')')),
        value(TokenKind::LBracket, char('[')),
        value(TokenKind::RBracket, char(']')),
        value(TokenKind::Comma, char(',')),
        value(TokenKind::Dot, char('.')),
        value(TokenKind::Caret, char('^')),
        value(TokenKind::Plus, char('+')),
        value(TokenKind::Minus, char('-')),
        value(TokenKind::Star, char('*')),
        value(TokenKind::Slash, char('/')),
        value(TokenKind::Eq, char('=')),
        value(TokenKind::Lt, char('<')),
        value(TokenKind::Gt, char('>')),
    ))(input)
}

fn lex_token(input: &str) -> IResult<&str, TokenKind> {
    alt((lex_number, lex_string, lex_word, lex_operator, lex_punct))(input)
}

/// Splits a formula into tokens, skipping whitespace.
pub fn tokenize(source: &str) -> FormulaResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = source;
    loop {
        let (after_ws, _) = multispace0::<&str, nom::error::Error<&str>>(rest)
            .map_err(|_| FormulaError::syntax(source.len() - rest.len(), "invalid whitespace"))?;
        rest = after_ws;
        if rest.is_empty() {
            break;
        }
        let start = source.len() - rest.len();
        match lex_token(rest) {
            Ok((next, kind)) => {
                let end = source.len() - next.len();
                tokens.push(Token { kind, start, end });
                rest = next;
            }
            Err(_) => {
                let message = match rest.chars().next() {
                    Some(q @ ('"' | '\'')) => format!("unterminated string literal starting with {}", q),
                    Some(c) => format!("unexpected character '{}'", c),
                    None => "unexpected end of input".to_string(),
                };
                return Err(FormulaError::syntax(start, message));
            }
        }
    }
    Ok(tokens)
}

/// Like [`tokenize`], but steps over characters the formula language does not
/// know. Used to scan text that may already contain generated code.
pub fn tokenize_lenient(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = source.trim_start();
    while let Some(c) = rest.chars().next() {
        let start = source.len() - rest.len();
        match lex_token(rest) {
            Ok((next, kind)) => {
                tokens.push(Token {
                    kind,
                    start,
                    end: source.len() - next.len(),
                });
                rest = next;
            }
            Err(_) => rest = &rest[c.len_utf8()..],
        }
        rest = rest.trim_start();
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_call_tokens() {
        assert_eq!(
            kinds("DIVIDE(Lx, 2.5)"),
            vec![
                TokenKind::Ident("DIVIDE".to_string()),
                TokenKind::LParen,
                TokenKind::Ident("Lx".to_string()),
                TokenKind::Comma,
                TokenKind::Number("2.5".to_string()),
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(
            kinds("roster where x"),
            vec![
                TokenKind::Ident("roster".to_string()),
                TokenKind::Keyword(Keyword::Where),
                TokenKind::Ident("x".to_string()),
            ]
        );
    }

    #[test]
    fn test_multi_char_operators() {
        assert_eq!(
            kinds("p => a->b <> c >= 1"),
            vec![
                TokenKind::Ident("p".to_string()),
                TokenKind::FatArrow,
                TokenKind::Ident("a".to_string()),
                TokenKind::Arrow,
                TokenKind::Ident("b".to_string()),
                TokenKind::NotEq,
                TokenKind::Ident("c".to_string()),
                TokenKind::Ge,
                TokenKind::Number("1".to_string()),
            ]
        );
    }

    #[test]
    fn test_string_literal_keeps_quotes_and_commas() {
        let tokens = tokenize("'a, b' \"say \\\"hi\\\"\"").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str("'a, b'".to_string()));
        assert_eq!(tokens[1].kind, TokenKind::Str("\"say \\\"hi\\\"\"".to_string()));
    }

    #[test]
    fn test_spans_slice_source() {
        let source = "  ABS(psi_in)^2";
        let tokens = tokenize(source).unwrap();
        assert_eq!(&source[tokens[0].start..tokens[0].end], "ABS");
        assert_eq!(&source[tokens[2].start..tokens[2].end], "psi_in");
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("a $ b").unwrap_err();
        assert_eq!(
            err,
            FormulaError::Syntax {
                position: 2,
                message: "unexpected character '$'".to_string()
            }
        );
    }

    #[test]
    fn test_lenient_skips_unknown_characters() {
        let tokens = tokenize_lenient("[item.x for item in self.xs][:3]");
        assert_eq!(tokens[1].kind, TokenKind::Ident("item".to_string()));
        assert!(tokens.iter().any(|t| t.is_keyword(Keyword::In)));
        assert!(!tokens.iter().any(|t| t.start == 29));
        assert_eq!(tokens[tokens.len() - 2].kind, TokenKind::Number("3".to_string()));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(tokenize("'oops"), Err(FormulaError::Syntax { position: 0, .. })));
    }
}
