use crate::context::CodeFragment;
use crate::error::{FormulaError, FormulaResult};
use crate::lexer::{tokenize_lenient, Keyword, Token, TokenKind};
use crate::parser::Parser;
use crate::splitter::matching_paren;

impl<'a> Parser<'a> {
    /// Parses what follows an `IF` keyword.
    ///
    /// `IF (c) THEN a ELSE b` becomes `(a if c else b)`. Without `THEN` the
    /// call is the three-argument function form `IF(c, a, b)`. Branches are
    /// full expressions, so nested conditionals resolve innermost first.
    pub(crate) fn parse_if(&mut self, keyword: &'a Token) -> FormulaResult<CodeFragment> {
        let open = self.pos;
        match self.peek() {
            Some(token) if token.kind == TokenKind::LParen => {}
            _ => return Err(FormulaError::syntax(keyword.end, "expected '(' after IF")),
        }
        let tokens = self.tokens;
        let close = matching_paren(tokens, open)?;
        let condition = &tokens[open + 1..close];
        self.pos = close + 1;

        if !self.eat_keyword(Keyword::Then) {
            return self.translate_call("IF", condition);
        }
        if condition.is_empty() {
            return Err(FormulaError::syntax(tokens[open].start, "IF without a condition"));
        }

        let condition = self.sub(condition)?;
        let then_branch = self.parse_expression()?;
        if !self.eat_keyword(Keyword::Else) {
            let position = self.peek().map(|t| t.start).unwrap_or_else(|| self.end_offset());
            return Err(FormulaError::syntax(position, "expected ELSE"));
        }
        let else_branch = self.parse_expression()?;

        Ok(CodeFragment::combine(
            format!("({} if {} else {})", then_branch.code, condition.code, else_branch.code),
            [&condition, &then_branch, &else_branch],
        ))
    }
}

/// True if `text` still holds an `IF (...) THEN` pattern.
///
/// Unknown characters are skipped, so this can be run on generated code.
pub fn has_conditional(text: &str) -> bool {
    let tokens = tokenize_lenient(text);
    tokens.iter().enumerate().any(|(i, token)| {
        if !token.is_keyword(Keyword::If) || tokens.get(i + 1).map(|t| &t.kind) != Some(&TokenKind::LParen) {
            return false;
        }
        match matching_paren(&tokens, i + 1) {
            Ok(close) => tokens.get(close + 1).is_some_and(|t| t.is_keyword(Keyword::Then)),
            Err(_) => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_formula;

    #[test]
    fn test_simple_conditional() {
        let fragment = parse_formula("IF (score > 10) THEN ('high') ELSE ('low')").unwrap();
        assert_eq!(fragment.code, "('high' if (self.score > 10) else 'low')");
    }

    #[test]
    fn test_nested_conditionals() {
        let fragment = parse_formula(
            "IF (edge_count = 3) THEN ('Triangle') ELSE (IF (edge_count = 4) THEN ('Quad') ELSE ('Polygon'))",
        )
        .unwrap();
        assert_eq!(
            fragment.code,
            "('Triangle' if (self.edge_count == 3) else ('Quad' if (self.edge_count == 4) else 'Polygon'))"
        );
        assert!(!has_conditional(&fragment.code));
    }

    #[test]
    fn test_unparenthesized_branches() {
        let fragment = parse_formula("IF (a) THEN b + 1 ELSE 0").unwrap();
        assert_eq!(fragment.code, "((self.b + 1) if self.a else 0)");
    }

    #[test]
    fn test_conditional_carries_dependencies() {
        let fragment = parse_formula("IF (ready) THEN (SHIFT(psi, offsets)) ELSE (psi)").unwrap();
        assert!(fragment.building_blocks.contains("SHIFT"));
    }

    #[test]
    fn test_missing_else() {
        assert!(matches!(
            parse_formula("IF (a) THEN (b)"),
            Err(FormulaError::Syntax { .. })
        ));
        assert!(matches!(parse_formula("IF () THEN (b) ELSE (c)"), Err(FormulaError::Syntax { .. })));
        assert!(matches!(parse_formula("IF a THEN b ELSE c"), Err(FormulaError::Syntax { .. })));
    }

    #[test]
    fn test_has_conditional() {
        assert!(has_conditional("IF (a) THEN (b) ELSE (c)"));
        assert!(has_conditional("x + if (a > 1) then 2 else 3"));
        assert!(!has_conditional("IF(a, b, c)"));
        assert!(!has_conditional("(self.b if self.a else self.c)"));
        assert!(!has_conditional("[item.x for item in self.xs if item.ok]"));
    }
}
