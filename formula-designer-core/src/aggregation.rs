//! Relational aggregations over entity collections.
//!
//! ```text
//! COUNT|SUM|AVG|MODE|EXISTS( [collection] [WHERE predicate] [=> projection] )
//! MINBY|MAXBY( [collection [WHERE predicate],] param => key )
//! TOPN( n, [collection [WHERE predicate],] param => key )
//! ```
//!
//! Each form becomes a generator or list comprehension over the collection.
//! An omitted collection ranges over the current receiver.

use crate::context::CodeFragment;
use crate::error::{FormulaError, FormulaResult};
use crate::lexer::{Keyword, Token, TokenKind};
use crate::parser::{Parser, Scope};
use crate::splitter::{slice_text, split_top_level, top_level_positions};
use crate::subfield;

pub const AGGREGATIONS: &[&str] = &["COUNT", "SUM", "AVG", "MINBY", "MAXBY", "MODE", "TOPN", "EXISTS"];

fn is_where(token: &Token) -> bool {
    token.is_keyword(Keyword::Where)
}

fn is_fat_arrow(token: &Token) -> bool {
    token.kind == TokenKind::FatArrow
}

/// Whether `name(args)` should be rewritten here rather than looked up in
/// the function table.
///
/// `SUM` is shared with the array reduction: it is relational only when its
/// arguments carry a top-level `WHERE` or `=>`, or name a field of a
/// collection (`edges.length`).
pub fn is_relational(name: &str, args: &[Token], scope: &Scope) -> bool {
    match name {
        "SUM" => {
            !top_level_positions(args, |t| is_where(t) || is_fat_arrow(t)).is_empty()
                || subfield::reference_segments(args)
                    .is_some_and(|segments| subfield::member_count(&segments, scope) >= 2)
        }
        _ => AGGREGATIONS.contains(&name),
    }
}

/// `collection [WHERE predicate] [=> projection]`
struct Clause<'t> {
    collection: &'t [Token],
    predicate: Option<&'t [Token]>,
    projection: Option<&'t [Token]>,
}

fn split_clause<'t>(name: &str, tokens: &'t [Token]) -> FormulaResult<Clause<'t>> {
    if let Some(&comma) = top_level_positions(tokens, |t| t.kind == TokenKind::Comma).first() {
        return Err(FormulaError::clause(
            name,
            format!("unexpected ',' at offset {}", tokens[comma].start),
        ));
    }

    let wheres = top_level_positions(tokens, is_where);
    if wheres.len() > 1 {
        return Err(FormulaError::clause(name, "only one WHERE is allowed"));
    }
    let arrows = top_level_positions(tokens, is_fat_arrow);
    if arrows.len() > 1 {
        return Err(FormulaError::clause(name, "only one '=>' is allowed"));
    }

    let where_at = wheres.first().copied();
    let arrow_at = arrows.first().copied();
    if let (Some(w), Some(a)) = (where_at, arrow_at) {
        if a < w {
            return Err(FormulaError::clause(name, "WHERE must come before '=>'"));
        }
    }

    let collection_end = where_at.or(arrow_at).unwrap_or(tokens.len());
    let predicate = match where_at {
        Some(w) => {
            let end = arrow_at.unwrap_or(tokens.len());
            let predicate = &tokens[w + 1..end];
            if predicate.is_empty() {
                return Err(FormulaError::clause(name, "WHERE without a predicate"));
            }
            Some(predicate)
        }
        None => None,
    };
    let projection = match arrow_at {
        Some(a) => {
            let projection = &tokens[a + 1..];
            if projection.is_empty() {
                return Err(FormulaError::clause(name, "'=>' without a projection"));
            }
            Some(projection)
        }
        None => None,
    };

    Ok(Clause {
        collection: &tokens[..collection_end],
        predicate,
        projection,
    })
}

/// `param => key`
fn split_lambda<'t>(name: &str, tokens: &'t [Token]) -> FormulaResult<(&'t str, &'t [Token])> {
    if top_level_positions(tokens, is_fat_arrow).is_empty() {
        return Err(FormulaError::clause(name, "missing required '=>'"));
    }
    match tokens {
        [param, arrow, key @ ..] if is_fat_arrow(arrow) => {
            let param = param
                .ident()
                .ok_or_else(|| FormulaError::clause(name, "lambda parameter must be a name"))?;
            if key.is_empty() {
                return Err(FormulaError::clause(name, "'=>' without a key"));
            }
            Ok((param, key))
        }
        _ => Err(FormulaError::clause(name, "lambda parameter must be a name")),
    }
}

fn translate_collection(tokens: &[Token], source: &str, scope: &Scope) -> FormulaResult<CodeFragment> {
    if tokens.is_empty() {
        return Ok(CodeFragment::new(scope.receiver()));
    }
    match subfield::reference_segments(tokens) {
        Some(segments) => {
            subfield::resolve_collection(&segments, slice_text(source, tokens), scope).map(CodeFragment::new)
        }
        None => Parser::parse_slice(source, tokens, scope),
    }
}

/// A collection with an optional filter, ready to feed a reducer.
struct Source {
    collection: CodeFragment,
    predicate: Option<CodeFragment>,
    var: String,
    inner: Scope,
}

impl Source {
    fn new(clause: &Clause<'_>, source: &str, scope: &Scope) -> FormulaResult<Self> {
        let collection = translate_collection(clause.collection, source, scope)?;
        let var = scope.next_var();
        let inner = scope.element(var.clone());
        let predicate = clause
            .predicate
            .map(|tokens| Parser::parse_slice(source, tokens, &inner))
            .transpose()?;
        Ok(Source {
            collection,
            predicate,
            var,
            inner,
        })
    }

    /// `value for var in collection [if predicate]`
    fn generator(&self, value: &str) -> String {
        let mut out = format!("{} for {} in {}", value, self.var, self.collection.code);
        if let Some(predicate) = &self.predicate {
            out.push_str(" if ");
            out.push_str(&predicate.code);
        }
        out
    }

    /// The collection itself, or a filtered generator over it.
    fn filtered(&self) -> String {
        match &self.predicate {
            Some(_) => format!("({})", self.generator(&self.var)),
            None => self.collection.code.clone(),
        }
    }

    fn parts(&self) -> Vec<&CodeFragment> {
        let mut parts = vec![&self.collection];
        parts.extend(self.predicate.iter());
        parts
    }
}

/// Rewrites a relational aggregation call into a comprehension.
pub fn rewrite(name: &str, args: &[Token], source: &str, scope: &Scope) -> FormulaResult<CodeFragment> {
    log::trace!("rewriting {} aggregation: {}", name, slice_text(source, args));
    match name {
        "MINBY" | "MAXBY" => keyed_extreme(name, args, source, scope),
        "TOPN" => top_n(args, source, scope),
        _ => reduce(name, args, source, scope),
    }
}

fn reduce(name: &str, args: &[Token], source: &str, scope: &Scope) -> FormulaResult<CodeFragment> {
    let clause = split_clause(name, args)?;
    let from = Source::new(&clause, source, scope)?;
    let projection = clause
        .projection
        .map(|tokens| Parser::parse_slice(source, tokens, &from.inner))
        .transpose()?;

    let plain = from.predicate.is_none() && projection.is_none();
    let code = match name {
        "COUNT" => match &projection {
            None if plain => format!("len({})", from.collection.code),
            None => format!("sum({})", from.generator("1")),
            Some(projection) => {
                let present = format!("{} is not None", projection.code);
                let condition = match &from.predicate {
                    Some(predicate) => format!("{} and {}", predicate.code, present),
                    None => present,
                };
                format!("sum(1 for {} in {} if {})", from.var, from.collection.code, condition)
            }
        },
        "SUM" | "AVG" | "MODE" => {
            let reducer = match name {
                "SUM" => "sum",
                "AVG" => "statistics.mean",
                _ => "statistics.mode",
            };
            if plain {
                format!("{}({})", reducer, from.collection.code)
            } else {
                let value = projection.as_ref().map(|p| p.code.as_str()).unwrap_or(&from.var);
                format!("{}({})", reducer, from.generator(value))
            }
        }
        "EXISTS" => {
            if plain {
                format!("(len({}) > 0)", from.collection.code)
            } else {
                let value = projection.as_ref().map(|p| p.code.as_str()).unwrap_or("True");
                format!("any({})", from.generator(value))
            }
        }
        _ => return Err(FormulaError::UnknownFunction(name.to_string())),
    };

    let mut parts = from.parts();
    parts.extend(projection.iter());
    let fragment = CodeFragment::combine(code, parts);
    if matches!(name, "AVG" | "MODE") {
        Ok(fragment.with_statistics())
    } else {
        Ok(fragment)
    }
}

// Splits `[collection [WHERE p],] param => key` into its source and lambda.
fn source_and_lambda<'t>(name: &str, parts: &[&'t [Token]]) -> FormulaResult<(Clause<'t>, &'t str, &'t [Token])> {
    let (clause, lambda) = match parts {
        [lambda] => (
            Clause {
                collection: &[],
                predicate: None,
                projection: None,
            },
            *lambda,
        ),
        [collection, lambda] => {
            let clause = split_clause(name, *collection)?;
            if clause.projection.is_some() {
                return Err(FormulaError::clause(
                    name,
                    "'=>' belongs to the key, after the collection",
                ));
            }
            (clause, *lambda)
        }
        _ => {
            return Err(FormulaError::clause(
                name,
                "expected [collection [WHERE predicate],] param => key",
            ));
        }
    };
    let (param, key) = split_lambda(name, lambda)?;
    Ok((clause, param, key))
}

fn keyed_extreme(name: &str, args: &[Token], source: &str, scope: &Scope) -> FormulaResult<CodeFragment> {
    let parts = split_top_level(args)?;
    let (clause, param, key) = source_and_lambda(name, &parts)?;
    let from = Source::new(&clause, source, scope)?;
    let key = Parser::parse_slice(source, key, &scope.lambda(param))?;

    let reducer = if name == "MINBY" { "min" } else { "max" };
    let code = format!(
        "{}({}, key=lambda {}: {})",
        reducer,
        from.filtered(),
        param,
        key.code
    );
    let mut parts = from.parts();
    parts.push(&key);
    Ok(CodeFragment::combine(code, parts))
}

fn top_n(args: &[Token], source: &str, scope: &Scope) -> FormulaResult<CodeFragment> {
    let parts = split_top_level(args)?;
    let Some((&count, rest)) = parts.split_first() else {
        return Err(FormulaError::clause("TOPN", "missing count"));
    };
    if rest.is_empty() {
        return Err(FormulaError::clause("TOPN", "missing param => key"));
    }
    let count = Parser::parse_slice(source, count, scope)?;
    let (clause, param, key) = source_and_lambda("TOPN", rest)?;
    let from = Source::new(&clause, source, scope)?;
    let key = Parser::parse_slice(source, key, &scope.lambda(param))?;

    let code = format!(
        "sorted({}, key=lambda {}: {}, reverse=True)[:{}]",
        from.filtered(),
        param,
        key.code,
        count.code
    );
    let mut parts = from.parts();
    parts.push(&count);
    parts.push(&key);
    Ok(CodeFragment::combine(code, parts))
}
