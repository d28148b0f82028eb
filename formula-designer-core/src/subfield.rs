use crate::error::{FormulaError, FormulaResult};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::parser::Scope;

/// Members reachable past the receiver inside an aggregation clause or a
/// collection position: the member itself plus one projected field.
const MAX_CLAUSE_DEPTH: usize = 2;

/// Splits a dotted reference (`a.b`, `a->b`) into its segments.
///
/// Returns `None` unless the tokens are exactly `ident ((.|->) ident)*`.
pub fn reference_segments(tokens: &[Token]) -> Option<Vec<&str>> {
    if tokens.len() % 2 == 0 {
        return None;
    }
    let mut segments = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        if i % 2 == 0 {
            segments.push(token.ident()?);
        } else if !matches!(token.kind, TokenKind::Dot | TokenKind::Arrow) {
            return None;
        }
    }
    Some(segments)
}

// Receiver expression plus the members that follow it.
fn split_receiver<'s>(segments: &'s [&'s str], scope: &Scope) -> (String, &'s [&'s str]) {
    match segments.split_first() {
        Some((&"this", rest)) => ("self".to_string(), rest),
        Some((head, rest)) if scope.binds(head) => (head.to_string(), rest),
        _ => (scope.receiver().to_string(), segments),
    }
}

/// Number of members that follow the receiver in `segments`.
pub fn member_count(segments: &[&str], scope: &Scope) -> usize {
    split_receiver(segments, scope).1.len()
}

fn member_path(receiver: &str, members: &[&str]) -> String {
    let mut path = receiver.to_string();
    for member in members {
        path.push('.');
        path.push_str(member);
    }
    path
}

/// Resolves a reference used as a value.
///
/// `this.x` always addresses the entity. At the top level any chain is a
/// plain attribute path; inside a clause at most one dot past the element's
/// member is allowed.
pub fn resolve_value(segments: &[&str], text: &str, scope: &Scope) -> FormulaResult<String> {
    let (receiver, members) = split_receiver(segments, scope);
    if scope.in_clause() && members.len() > MAX_CLAUSE_DEPTH {
        return Err(FormulaError::UnsupportedMultiDotReference(text.to_string()));
    }
    Ok(member_path(&receiver, members))
}

/// Resolves a reference naming the collection an aggregation ranges over.
///
/// `a` is the collection itself. `a.b` projects field `b` out of every
/// element of `a`. Anything deeper is rejected.
pub fn resolve_collection(segments: &[&str], text: &str, scope: &Scope) -> FormulaResult<String> {
    let (receiver, members) = split_receiver(segments, scope);
    match members {
        [] => Ok(receiver),
        [collection] => Ok(format!("{}.{}", receiver, collection)),
        [collection, field] => {
            let var = scope.next_var();
            Ok(format!("[{var}.{field} for {var} in {receiver}.{collection}]"))
        }
        _ => Err(FormulaError::UnsupportedMultiDotReference(text.to_string())),
    }
}

/// Translates the join condition of a derived-this relation.
///
/// Only `this.<collection>.<field>` is supported; it becomes a projection of
/// `field` over the entity's `collection`.
pub fn project_join_condition(condition: &str) -> FormulaResult<String> {
    let tokens = tokenize(condition)?;
    let segments = reference_segments(&tokens)
        .ok_or_else(|| FormulaError::UnsupportedJoinCondition(condition.trim().to_string()))?;
    match segments.as_slice() {
        ["this", _, _] => resolve_collection(&segments, condition.trim(), &Scope::entity()),
        ["this", _, _, ..] => Err(FormulaError::UnsupportedMultiDotReference(condition.trim().to_string())),
        _ => Err(FormulaError::UnsupportedJoinCondition(condition.trim().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments(text: &str) -> Vec<String> {
        let tokens = tokenize(text).unwrap();
        reference_segments(&tokens)
            .unwrap()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_reference_segments() {
        assert_eq!(segments("a"), vec!["a"]);
        assert_eq!(segments("this.edges.length"), vec!["this", "edges", "length"]);
        assert_eq!(segments("owner->name"), vec!["owner", "name"]);

        let tokens = tokenize("a.").unwrap();
        assert!(reference_segments(&tokens).is_none());
        let tokens = tokenize("f(a)").unwrap();
        assert!(reference_segments(&tokens).is_none());
    }

    #[test]
    fn test_value_at_top_level() {
        let scope = Scope::entity();
        assert_eq!(resolve_value(&["a"], "a", &scope).unwrap(), "self.a");
        assert_eq!(resolve_value(&["this", "a"], "this.a", &scope).unwrap(), "self.a");
        assert_eq!(
            resolve_value(&["Wave", "psi", "real"], "Wave.psi.real", &scope).unwrap(),
            "self.Wave.psi.real"
        );
    }

    #[test]
    fn test_value_inside_clause() {
        let scope = Scope::entity().element("item".to_string());
        assert_eq!(resolve_value(&["x"], "x", &scope).unwrap(), "item.x");
        assert_eq!(resolve_value(&["team", "city"], "team.city", &scope).unwrap(), "item.team.city");
        assert_eq!(resolve_value(&["this", "id"], "this.id", &scope).unwrap(), "self.id");
        assert!(matches!(
            resolve_value(&["a", "b", "c"], "a.b.c", &scope),
            Err(FormulaError::UnsupportedMultiDotReference(_))
        ));
    }

    #[test]
    fn test_value_inside_lambda() {
        let scope = Scope::entity().lambda("p");
        assert_eq!(resolve_value(&["p", "era"], "p.era", &scope).unwrap(), "p.era");
        assert_eq!(resolve_value(&["p"], "p", &scope).unwrap(), "p");
        assert_eq!(resolve_value(&["era"], "era", &scope).unwrap(), "p.era");
    }

    #[test]
    fn test_collection_projection() {
        let scope = Scope::entity();
        assert_eq!(resolve_collection(&["edges"], "edges", &scope).unwrap(), "self.edges");
        assert_eq!(
            resolve_collection(&["this", "edges", "length"], "this.edges.length", &scope).unwrap(),
            "[item.length for item in self.edges]"
        );
        assert_eq!(resolve_collection(&["this"], "this", &scope).unwrap(), "self");
        assert!(matches!(
            resolve_collection(&["this", "edges", "length", "unit"], "this.edges.length.unit", &scope),
            Err(FormulaError::UnsupportedMultiDotReference(_))
        ));
    }

    #[test]
    fn test_join_condition() {
        assert_eq!(
            project_join_condition("this.edges.length").unwrap(),
            "[item.length for item in self.edges]"
        );
        assert!(matches!(
            project_join_condition("this.edges.length.unit"),
            Err(FormulaError::UnsupportedMultiDotReference(_))
        ));
        assert!(matches!(
            project_join_condition("this.edges"),
            Err(FormulaError::UnsupportedJoinCondition(_))
        ));
        assert!(matches!(
            project_join_condition("edges.length"),
            Err(FormulaError::UnsupportedJoinCondition(_))
        ));
    }
}
