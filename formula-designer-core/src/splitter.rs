use crate::error::{FormulaError, FormulaResult};
use crate::lexer::{tokenize, Token, TokenKind};

/// Splits the tokens between a call's parentheses on commas at depth zero.
///
/// An empty slice yields no arguments. Empty arguments (`f(a,,b)`) and
/// unbalanced parentheses are syntax errors.
pub fn split_top_level(tokens: &[Token]) -> FormulaResult<Vec<&[Token]>> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::LParen | TokenKind::LBracket => depth += 1,
            TokenKind::RParen | TokenKind::RBracket => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| FormulaError::syntax(token.start, "unbalanced closing bracket"))?;
            }
            TokenKind::Comma if depth == 0 => {
                if i == start {
                    return Err(FormulaError::syntax(token.start, "empty argument"));
                }
                args.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        let last = &tokens[tokens.len() - 1];
        return Err(FormulaError::syntax(last.end, "unclosed bracket"));
    }
    if start == tokens.len() {
        let last = &tokens[tokens.len() - 1];
        return Err(FormulaError::syntax(last.end, "empty argument"));
    }
    args.push(&tokens[start..]);
    Ok(args)
}

/// Index of the `)` closing the `(` at `open`.
pub fn matching_paren(tokens: &[Token], open: usize) -> FormulaResult<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(FormulaError::syntax(tokens[open].start, "unbalanced '('"))
}

/// Positions of the tokens at paren depth zero that satisfy `pred`.
pub fn top_level_positions(tokens: &[Token], pred: impl Fn(&Token) -> bool) -> Vec<usize> {
    let mut depth = 0usize;
    let mut found = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::LParen | TokenKind::LBracket => depth += 1,
            TokenKind::RParen | TokenKind::RBracket => depth = depth.saturating_sub(1),
            _ if depth == 0 && pred(token) => found.push(i),
            _ => {}
        }
    }
    found
}

/// Source text covered by a non-empty token slice.
pub fn slice_text<'a>(source: &'a str, tokens: &[Token]) -> &'a str {
    match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => &source[first.start..last.end],
        _ => "",
    }
}

/// Text-level form of [`split_top_level`]: the argument substrings of a call's
/// parenthesized body, trimmed.
pub fn split_arguments(args: &str) -> FormulaResult<Vec<String>> {
    let tokens = tokenize(args)?;
    Ok(split_top_level(&tokens)?
        .into_iter()
        .map(|arg| slice_text(args, arg).to_string())
        .collect())
}
