use crate::aggregation;
use crate::context::CodeFragment;
use crate::error::{FormulaError, FormulaResult};
use crate::lexer::{tokenize, Keyword, Token, TokenKind};
use crate::signatures::{self, CallShape, FunctionSignature};
use crate::splitter::{matching_paren, slice_text, split_top_level};
use crate::subfield;

/// Name resolution context for one piece of a formula.
///
/// At the top level bare names are fields of the entity (`self`). Inside an
/// aggregation clause they are members of the element being iterated, and a
/// key lambda additionally binds its declared parameter to that element.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    element: Option<String>,
    param: Option<String>,
    depth: usize,
    nesting: usize,
}

impl Scope {
    pub fn entity() -> Self {
        Scope {
            element: None,
            param: None,
            depth: 0,
            nesting: 0,
        }
    }

    /// The expression that bare names are resolved against.
    pub fn receiver(&self) -> &str {
        self.element.as_deref().unwrap_or("self")
    }

    pub fn in_clause(&self) -> bool {
        self.element.is_some()
    }

    /// True if `name` is the lambda parameter bound in this scope.
    pub fn binds(&self, name: &str) -> bool {
        self.param.as_deref() == Some(name)
    }

    /// Variable name for the next comprehension opened from this scope.
    pub fn next_var(&self) -> String {
        match self.depth {
            0 => "item".to_string(),
            depth => format!("item{}", depth),
        }
    }

    pub fn element(&self, var: String) -> Scope {
        Scope {
            element: Some(var),
            param: None,
            depth: self.depth + 1,
            nesting: self.nesting,
        }
    }

    pub fn lambda(&self, param: &str) -> Scope {
        Scope {
            element: Some(param.to_string()),
            param: Some(param.to_string()),
            depth: self.depth + 1,
            nesting: self.nesting,
        }
    }
}

/// Deepest expression nesting accepted in one formula. Counts every
/// parenthesized group, call argument, clause and prefix operator.
pub const MAX_NESTING: usize = 64;

/// Translates one formula into host code.
///
/// An empty formula yields `None`. Every failure is local to the formula and
/// reported as a [`FormulaError`].
pub fn parse_formula(formula: &str) -> FormulaResult<CodeFragment> {
    let tokens = tokenize(formula)?;
    if tokens.is_empty() {
        return Ok(CodeFragment::new("None"));
    }
    Parser::parse_slice(formula, &tokens, &Scope::entity())
}

pub(crate) struct Parser<'a> {
    pub(crate) source: &'a str,
    pub(crate) tokens: &'a [Token],
    pub(crate) pos: usize,
    pub(crate) scope: Scope,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(source: &'a str, tokens: &'a [Token], scope: Scope) -> Self {
        Parser {
            source,
            tokens,
            pos: 0,
            scope,
        }
    }

    /// Parses `tokens` as exactly one expression.
    pub(crate) fn parse_slice(source: &'a str, tokens: &'a [Token], scope: &Scope) -> FormulaResult<CodeFragment> {
        if tokens.is_empty() {
            return Err(FormulaError::syntax(0, "expected an expression"));
        }
        let mut parser = Parser::new(source, tokens, scope.clone());
        let fragment = parser.parse_expression()?;
        if let Some(extra) = parser.peek() {
            return Err(FormulaError::syntax(extra.start, format!("unexpected {}", extra.kind)));
        }
        Ok(fragment)
    }

    pub(crate) fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&'a TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    pub(crate) fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_keyword(&mut self, kw: Keyword) -> bool {
        self.eat(&TokenKind::Keyword(kw))
    }

    pub(crate) fn end_offset(&self) -> usize {
        self.tokens.last().map(|t| t.end).unwrap_or(0)
    }

    pub(crate) fn expect(&mut self, kind: &TokenKind, what: &str) -> FormulaResult<&'a Token> {
        match self.peek() {
            Some(token) if &token.kind == kind => {
                self.pos += 1;
                Ok(token)
            }
            Some(token) => Err(FormulaError::syntax(
                token.start,
                format!("expected {}, found {}", what, token.kind),
            )),
            None => Err(FormulaError::syntax(self.end_offset(), format!("expected {}", what))),
        }
    }

    /// Parses a nested token slice in the current scope.
    pub(crate) fn sub(&self, tokens: &'a [Token]) -> FormulaResult<CodeFragment> {
        Parser::parse_slice(self.source, tokens, &self.scope)
    }

    pub(crate) fn parse_expression(&mut self) -> FormulaResult<CodeFragment> {
        self.nested(Self::parse_or)
    }

    // Runs `parse` one level deeper, failing the formula past MAX_NESTING.
    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> FormulaResult<CodeFragment>) -> FormulaResult<CodeFragment> {
        if self.scope.nesting >= MAX_NESTING {
            let position = self.peek().map(|t| t.start).unwrap_or_else(|| self.end_offset());
            return Err(FormulaError::syntax(
                position,
                format!("formula is nested more than {} levels deep", MAX_NESTING),
            ));
        }
        self.scope.nesting += 1;
        let result = parse(self);
        self.scope.nesting -= 1;
        result
    }

    fn parse_or(&mut self) -> FormulaResult<CodeFragment> {
        let mut left = self.parse_and()?;
        while self.eat_keyword(Keyword::Or) {
            let right = self.parse_and()?;
            left = binary("or", left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> FormulaResult<CodeFragment> {
        let mut left = self.parse_not()?;
        while self.eat_keyword(Keyword::And) {
            let right = self.parse_not()?;
            left = binary("and", left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> FormulaResult<CodeFragment> {
        if self.eat_keyword(Keyword::Not) {
            let operand = self.nested(Self::parse_not)?;
            return Ok(CodeFragment::combine(format!("(not {})", operand.code), [&operand]));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> FormulaResult<CodeFragment> {
        let left = self.parse_additive()?;
        let op = match self.peek_kind() {
            Some(TokenKind::Eq) | Some(TokenKind::EqEq) => "==",
            Some(TokenKind::NotEq) => "!=",
            Some(TokenKind::Lt) => "<",
            Some(TokenKind::Le) => "<=",
            Some(TokenKind::Gt) => ">",
            Some(TokenKind::Ge) => ">=",
            Some(TokenKind::Keyword(Keyword::In)) => "in",
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_additive()?;
        let op = match (op, right.code.as_str()) {
            ("==", "None") => "is",
            ("!=", "None") => "is not",
            (op, _) => op,
        };
        Ok(binary(op, left, right))
    }

    fn parse_additive(&mut self) -> FormulaResult<CodeFragment> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => "+",
                Some(TokenKind::Minus) => "-",
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_term()?;
            left = binary(op, left, right);
        }
    }

    fn parse_term(&mut self) -> FormulaResult<CodeFragment> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => "*",
                Some(TokenKind::Slash) => "/",
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> FormulaResult<CodeFragment> {
        if self.eat(&TokenKind::Minus) {
            let operand = self.nested(Self::parse_unary)?;
            let code = if is_number(&operand.code) {
                format!("-{}", operand.code)
            } else {
                format!("(-{})", operand.code)
            };
            return Ok(CodeFragment::combine(code, [&operand]));
        }
        if self.eat(&TokenKind::Plus) {
            return self.nested(Self::parse_unary);
        }
        self.parse_power()
    }

    // `x^2` is postfix and binds tighter than every infix operator.
    fn parse_power(&mut self) -> FormulaResult<CodeFragment> {
        let base = self.parse_primary()?;
        if self.eat(&TokenKind::Caret) {
            let exponent = self.nested(Self::parse_unary)?;
            return Ok(CodeFragment::combine(
                format!("({} ** {})", base.code, exponent.code),
                [&base, &exponent],
            ));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> FormulaResult<CodeFragment> {
        let Some(token) = self.advance() else {
            return Err(FormulaError::syntax(self.end_offset(), "unexpected end of formula"));
        };
        match &token.kind {
            TokenKind::Number(n) => Ok(CodeFragment::new(n.clone())),
            TokenKind::Str(s) => Ok(CodeFragment::new(s.clone())),
            TokenKind::LParen => self.parse_group(),
            TokenKind::LBracket => self.parse_list(),
            TokenKind::Keyword(Keyword::If) => self.parse_if(token),
            TokenKind::Ident(name) => {
                if self.peek_kind() == Some(&TokenKind::LParen) {
                    return self.parse_call(name);
                }
                if let Some(literal) = literal_keyword(name) {
                    return Ok(CodeFragment::new(literal));
                }
                self.parse_reference(token)
            }
            other => Err(FormulaError::syntax(token.start, format!("unexpected {}", other))),
        }
    }

    // After '(': a parenthesized expression, or a tuple for `IN (a, b)`.
    fn parse_group(&mut self) -> FormulaResult<CodeFragment> {
        let first = self.parse_expression()?;
        if !self.eat(&TokenKind::Comma) {
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(first);
        }
        let mut items = vec![first];
        loop {
            items.push(self.parse_expression()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        let codes: Vec<&str> = items.iter().map(|f| f.code.as_str()).collect();
        Ok(CodeFragment::combine(format!("({})", codes.join(", ")), &items))
    }

    fn parse_list(&mut self) -> FormulaResult<CodeFragment> {
        let mut items = Vec::new();
        if !self.eat(&TokenKind::RBracket) {
            loop {
                items.push(self.parse_expression()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBracket, "']'")?;
        }
        let codes: Vec<&str> = items.iter().map(|f| f.code.as_str()).collect();
        Ok(CodeFragment::combine(format!("[{}]", codes.join(", ")), &items))
    }

    fn parse_reference(&mut self, head: &'a Token) -> FormulaResult<CodeFragment> {
        let mut segments: Vec<&str> = vec![head.ident().unwrap_or_default()];
        let mut last = head;
        while matches!(self.peek_kind(), Some(TokenKind::Dot) | Some(TokenKind::Arrow)) {
            let dot = self.advance().unwrap_or(last);
            match self.advance() {
                Some(token) if token.ident().is_some() => {
                    segments.push(token.ident().unwrap_or_default());
                    last = token;
                }
                _ => return Err(FormulaError::syntax(dot.end, "expected a member name after '.'")),
            }
        }
        let text = &self.source[head.start..last.end];
        subfield::resolve_value(&segments, text, &self.scope).map(CodeFragment::new)
    }

    fn parse_call(&mut self, name: &str) -> FormulaResult<CodeFragment> {
        let open = self.pos;
        let tokens = self.tokens;
        let close = matching_paren(tokens, open)?;
        self.pos = close + 1;
        self.translate_call(name, &tokens[open + 1..close])
    }

    /// Resolves `name(args)`: relational forms first, then the signature table.
    pub(crate) fn translate_call(&self, name: &str, args: &'a [Token]) -> FormulaResult<CodeFragment> {
        let upper = name.to_ascii_uppercase();
        if aggregation::is_relational(&upper, args, &self.scope) {
            return aggregation::rewrite(&upper, args, self.source, &self.scope);
        }

        let signature = signatures::lookup(&upper).ok_or_else(|| FormulaError::UnknownFunction(upper.clone()))?;
        let args = split_top_level(args)?;
        if !signature.arity.accepts(args.len()) {
            return Err(FormulaError::ArityMismatch {
                name: upper,
                min: signature.min_arity(),
                max: signature.max_arity(),
                got: args.len(),
            });
        }

        match signature.shape {
            CallShape::Positional | CallShape::BuildingBlock => self.positional_call(signature, &args),
            CallShape::CollectionField => self.collection_field_call(signature, &args),
            CallShape::AxisKeyword => self.axis_call(signature, &args),
            CallShape::SliceKeywords => self.slice_call(signature, &args),
        }
    }

    fn positional(&self, signature: &FunctionSignature, arg: &'a [Token]) -> FormulaResult<CodeFragment> {
        if let Some((key, _)) = keyword_argument(arg) {
            return Err(FormulaError::keyword(
                signature.name,
                format!("unexpected keyword argument '{}'", key),
            ));
        }
        self.sub(arg)
    }

    fn positional_call(&self, signature: &FunctionSignature, args: &[&'a [Token]]) -> FormulaResult<CodeFragment> {
        let parts = args
            .iter()
            .map(|&arg| self.positional(signature, arg))
            .collect::<FormulaResult<Vec<_>>>()?;
        let codes: Vec<String> = parts.iter().map(|p| p.code.clone()).collect();
        let fragment = CodeFragment::combine(signature.fill(&codes, &[]), &parts);
        if signature.is_building_block() {
            Ok(fragment.with_building_block(signature.name))
        } else {
            Ok(fragment)
        }
    }

    fn collection_field_call(&self, signature: &FunctionSignature, args: &[&'a [Token]]) -> FormulaResult<CodeFragment> {
        let collection = self.positional(signature, args[0])?;
        let member = match args[1] {
            [token] => token.ident(),
            _ => None,
        }
        .ok_or_else(|| {
            FormulaError::clause(
                signature.name,
                format!("expected a member name, found '{}'", slice_text(self.source, args[1])),
            )
        })?;
        let var = self.scope.next_var();
        let code = signature.fill(&[collection.code.clone(), member.to_string()], &[("var", var.as_str())]);
        Ok(CodeFragment::combine(code, [&collection]))
    }

    fn axis_call(&self, signature: &FunctionSignature, args: &[&'a [Token]]) -> FormulaResult<CodeFragment> {
        let target = self.positional(signature, args[0])?;
        let Some(&axis_arg) = args.get(1) else {
            return Ok(CodeFragment::combine(signature.fill(&[target.code.clone()], &[]), [&target]));
        };
        let value = match keyword_argument(axis_arg) {
            Some(("axis", value)) => value,
            Some((key, _)) => {
                return Err(FormulaError::keyword(signature.name, format!("unexpected keyword '{}'", key)));
            }
            None => {
                return Err(FormulaError::keyword(
                    signature.name,
                    format!("expected axis=<n>, found '{}'", slice_text(self.source, axis_arg)),
                ));
            }
        };
        let axis = self.keyword_value(signature, "axis", value)?;
        let axis_text = format!(", axis={}", axis.code);
        let code = signature.fill(&[target.code.clone()], &[("axis", axis_text.as_str())]);
        Ok(CodeFragment::combine(code, [&target, &axis]))
    }

    fn slice_call(&self, signature: &FunctionSignature, args: &[&'a [Token]]) -> FormulaResult<CodeFragment> {
        let target = self.positional(signature, args[0])?;
        let mut axis: Option<CodeFragment> = None;
        let mut index: Option<CodeFragment> = None;
        for &arg in &args[1..] {
            let (key, value) = keyword_argument(arg).ok_or_else(|| {
                FormulaError::keyword(
                    signature.name,
                    format!("expected axis=<n> or index=<i>, found '{}'", slice_text(self.source, arg)),
                )
            })?;
            let slot = if key == "axis" { &mut axis } else { &mut index };
            if slot.is_some() {
                return Err(FormulaError::keyword(signature.name, format!("duplicate keyword '{}'", key)));
            }
            *slot = Some(self.keyword_value(signature, key, value)?);
        }
        let (Some(axis), Some(index)) = (axis, index) else {
            return Err(FormulaError::keyword(signature.name, "both axis= and index= are required"));
        };

        let code = match axis.code.parse::<i64>() {
            Ok(n) if n.unsigned_abs() > MAX_LITERAL_AXIS => {
                return Err(FormulaError::keyword(
                    signature.name,
                    format!("axis {} is out of range (at most {} either way)", n, MAX_LITERAL_AXIS),
                ));
            }
            Ok(n) => index_along(&target.code, n, &index.code),
            Err(_) => signature.fill(
                &[target.code.clone()],
                &[("axis", axis.code.as_str()), ("index", index.code.as_str())],
            ),
        };
        Ok(CodeFragment::combine(code, [&target, &axis, &index]))
    }

    fn keyword_value(&self, signature: &FunctionSignature, key: &str, value: &'a [Token]) -> FormulaResult<CodeFragment> {
        if value.is_empty() {
            return Err(FormulaError::keyword(signature.name, format!("missing value for {}=", key)));
        }
        self.sub(value)
    }
}

/// Largest literal `axis=` that is rewritten into explicit indexing.
const MAX_LITERAL_AXIS: u64 = 32;

fn binary(op: &str, left: CodeFragment, right: CodeFragment) -> CodeFragment {
    CodeFragment::combine(format!("({} {} {})", left.code, op, right.code), [&left, &right])
}

fn is_number(code: &str) -> bool {
    !code.is_empty() && code.parse::<f64>().is_ok() && !code.starts_with('-')
}

fn literal_keyword(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "true" => Some("True"),
        "false" => Some("False"),
        "null" | "none" => Some("None"),
        _ => None,
    }
}

/// Recognizes `axis=<value>` and `index=<value>` call arguments.
pub(crate) fn keyword_argument(arg: &[Token]) -> Option<(&'static str, &[Token])> {
    match arg {
        [Token { kind: TokenKind::Ident(name), .. }, Token { kind: TokenKind::Eq, .. }, value @ ..] => {
            if name.eq_ignore_ascii_case("axis") {
                Some(("axis", value))
            } else if name.eq_ignore_ascii_case("index") {
                Some(("index", value))
            } else {
                None
            }
        }
        _ => None,
    }
}

// Explicit indexing for a literal axis: axis 1 -> x[:, i], axis -2 -> x[..., i, :].
fn index_along(target: &str, axis: i64, index: &str) -> String {
    let steps = usize::try_from(axis.unsigned_abs()).unwrap_or(usize::MAX);
    if axis >= 0 {
        format!("{}[{}{}]", target, ":, ".repeat(steps), index)
    } else {
        format!("{}[..., {}{}]", target, index, ", :".repeat(steps - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(formula: &str) -> String {
        parse_formula(formula).unwrap().code
    }

    #[test]
    fn test_literals_and_references() {
        assert_eq!(code("42"), "42");
        assert_eq!(code("3.25"), "3.25");
        assert_eq!(code("'Triangle'"), "'Triangle'");
        assert_eq!(code("Lx"), "self.Lx");
        assert_eq!(code("true"), "True");
        assert_eq!(code(""), "None");
    }

    #[test]
    fn test_nested_arithmetic() {
        assert_eq!(
            code("FLOOR(DIVIDE(ADD(a,DIVIDE(b,2)),c))"),
            "math.floor(((self.a + (self.b / 2)) / self.c))"
        );
    }

    #[test]
    fn test_power_postfix() {
        assert_eq!(code("ABS(psi_in)^2"), "(np.abs(self.psi_in) ** 2)");
        assert_eq!(code("SUM(ABS(psi_in)^2)"), "np.sum((np.abs(self.psi_in) ** 2))");
    }

    #[test]
    fn test_linear_algebra() {
        assert_eq!(
            code("MATMUL(psi_in,TRANSPOSE(coin_matrix))"),
            "np.matmul(self.psi_in, self.coin_matrix.T)"
        );
        assert_eq!(code("CONJUGATE_TRANSPOSE(U)"), "self.U.conj().T");
        assert_eq!(code("IDENTITY(8)"), "np.eye(8, dtype=np.complex128)");
    }

    #[test]
    fn test_sum_axis_keyword() {
        assert_eq!(
            code("SUM(ABS(row_amp)^2, axis=-1)"),
            "np.sum((np.abs(self.row_amp) ** 2), axis=-1)"
        );
    }

    #[test]
    fn test_sum_rejects_positional_second_argument() {
        assert!(matches!(
            parse_formula("SUM(x, y)"),
            Err(FormulaError::MalformedKeywordArgument { .. })
        ));
        assert!(matches!(
            parse_formula("SUM(x, index=1)"),
            Err(FormulaError::MalformedKeywordArgument { .. })
        ));
        assert!(matches!(
            parse_formula("SUM(x, axis=)"),
            Err(FormulaError::MalformedKeywordArgument { .. })
        ));
    }

    #[test]
    fn test_slice_literal_axis() {
        assert_eq!(
            code("SLICE(psi_in, axis=0, index=detector_row)"),
            "self.psi_in[self.detector_row]"
        );
        assert_eq!(code("SLICE(psi_in, index=2, axis=1)"), "self.psi_in[:, 2]");
        assert_eq!(code("SLICE(psi_in, axis=-1, index=k)"), "self.psi_in[..., self.k]");
        assert_eq!(code("SLICE(psi_in, axis=-2, index=k)"), "self.psi_in[..., self.k, :]");
    }

    #[test]
    fn test_slice_dynamic_axis() {
        assert_eq!(
            code("SLICE(psi_in, axis=dim, index=k)"),
            "np.take(self.psi_in, self.k, axis=self.dim)"
        );
    }

    #[test]
    fn test_slice_keyword_errors() {
        for formula in [
            "SLICE(psi_in, axis=0, axis=1)",
            "SLICE(psi_in, axis=0, k)",
            "SLICE(psi_in, 0, 1)",
        ] {
            assert!(
                matches!(parse_formula(formula), Err(FormulaError::MalformedKeywordArgument { .. })),
                "{} should be a keyword error",
                formula
            );
        }
    }

    #[test]
    fn test_slice_axis_out_of_range() {
        for formula in [
            "SLICE(x, axis=-9223372036854775808, index=0)",
            "SLICE(x, axis=9223372036854775807, index=0)",
            "SLICE(x, axis=100000000000, index=0)",
            "SLICE(x, axis=33, index=0)",
        ] {
            assert!(
                matches!(parse_formula(formula), Err(FormulaError::MalformedKeywordArgument { .. })),
                "{} should be rejected",
                formula
            );
        }
        assert_eq!(code("SLICE(x, axis=-32, index=0)"), format!("self.x[..., 0{}]", ", :".repeat(31)));
    }

    #[test]
    fn test_keyword_in_positional_call() {
        assert!(matches!(
            parse_formula("ADD(axis=1, b)"),
            Err(FormulaError::MalformedKeywordArgument { .. })
        ));
    }

    #[test]
    fn test_building_block_tracking() {
        let fragment = parse_formula("SHIFT(MATMUL(psi_in, coin), offsets)").unwrap();
        assert_eq!(fragment.code, "SHIFT(np.matmul(self.psi_in, self.coin), self.offsets)");
        assert_eq!(fragment.building_blocks.iter().collect::<Vec<_>>(), vec!["SHIFT"]);
    }

    #[test]
    fn test_evolve_short_and_long_forms() {
        let short = parse_formula("EVOLVE(WavefunctionInitial.psi_init, steps_to_barrier, steps_after_barrier, collapse_barrier)")
            .unwrap();
        assert_eq!(
            short.code,
            "EVOLVE(self.WavefunctionInitial.psi_init, self.steps_to_barrier, self.steps_after_barrier, self.collapse_barrier)"
        );
        assert!(short.building_blocks.contains("EVOLVE"));

        let long = parse_formula("EVOLVE(psi, a, b, c, coin, offsets, row, x1, x2, x3)").unwrap();
        assert!(long.code.starts_with("EVOLVE(self.psi, "));
        assert!(parse_formula("EVOLVE(psi, a, b, c, coin, offsets, row, x1, x2, x3, x4)").is_ok());

        assert!(matches!(
            parse_formula("EVOLVE(a, b, c, d, e)"),
            Err(FormulaError::ArityMismatch { min: 4, max: 11, got: 5, .. })
        ));
    }

    #[test]
    fn test_unknown_function() {
        assert_eq!(
            parse_formula("frobnicate(x)"),
            Err(FormulaError::UnknownFunction("FROBNICATE".to_string()))
        );
    }

    #[test]
    fn test_arity_mismatch() {
        assert_eq!(
            parse_formula("ADD(a)"),
            Err(FormulaError::ArityMismatch {
                name: "ADD".to_string(),
                min: 2,
                max: 2,
                got: 1
            })
        );
    }

    #[test]
    fn test_collection_shortcuts() {
        assert_eq!(code("SUM_OVER(edges, length)"), "sum(item.length for item in self.edges)");
        assert_eq!(code("MAX_OVER(edges, length)"), "max(item.length for item in self.edges)");
        assert!(matches!(
            parse_formula("SUM_OVER(edges, ADD(a, b))"),
            Err(FormulaError::MalformedAggregationClause { .. })
        ));
    }

    #[test]
    fn test_function_form_if() {
        assert_eq!(
            code("IF( EQUAL(edge_count, 3), 'Triangle', IF( EQUAL(edge_count, 4), 'Quadrilateral', 'Polygon'))"),
            "('Triangle' if np.allclose(self.edge_count, 3) else ('Quadrilateral' if np.allclose(self.edge_count, 4) else 'Polygon'))"
        );
    }

    #[test]
    fn test_infix_operators() {
        assert_eq!(code("a + b * c"), "(self.a + (self.b * self.c))");
        assert_eq!(code("(a + b) * c"), "((self.a + self.b) * self.c)");
        assert_eq!(code("a = 1 AND NOT b"), "((self.a == 1) and (not self.b))");
        assert_eq!(code("a = null OR b <> 2"), "((self.a is None) or (self.b != 2))");
        assert_eq!(code("status IN ('open', 'held')"), "(self.status in ('open', 'held'))");
        assert_eq!(code("result in ['SINGLE','DOUBLE']"), "(self.result in ['SINGLE', 'DOUBLE'])");
        assert_eq!(code("[]"), "[]");
        assert_eq!(code("-a"), "(-self.a)");
        assert_eq!(code("SUBTRACT(0, -1)"), "(0 - -1)");
    }

    #[test]
    fn test_arrow_and_this() {
        assert_eq!(code("owner->name"), "self.owner.name");
        assert_eq!(code("this.id"), "self.id");
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |depth: usize| format!("{}x{}", "ABS(".repeat(depth), ")".repeat(depth));
        assert!(parse_formula(&nested(MAX_NESTING - 1)).is_ok());
        for formula in [
            nested(MAX_NESTING),
            nested(1000),
            format!("{}x{}", "(".repeat(1000), ")".repeat(1000)),
            format!("{}x", "-".repeat(1000)),
            format!("{}x", "NOT ".repeat(1000)),
            format!("x{}", "^x".repeat(1000)),
        ] {
            assert!(matches!(parse_formula(&formula), Err(FormulaError::Syntax { .. })));
        }
    }

    #[test]
    fn test_syntax_errors() {
        for formula in ["ADD(a, b", "a +", "ADD(a,,b)", "a b", ")", "a."] {
            assert!(
                matches!(parse_formula(formula), Err(FormulaError::Syntax { .. })),
                "{} should be a syntax error",
                formula
            );
        }
    }
}
