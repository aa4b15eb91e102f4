use crate::expressions::parser::parse_items_clause;
use crate::expressions::ExpressionSpan;

/// The shape an item clause must have, as reported in syntax errors.
///
/// Mirrors the `items_clause` grammar rule: one expression, whose body may
/// not contain its own closing delimiter.
pub const ITEMS_PATTERN: &str = r"^\s*(\w+(\s*,\s*\w+)*\s+in\s+)?(<%((?!%>).)+%>|\{\{((?!\}\}).)+\}\}|\{%((?!%\}).)+%\})\s*$";

/// An item clause split into its loop variables and items expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemsClause {
    /// The clause verbatim
    pub raw: String,
    /// Loop variable names; empty for a bare expression
    pub vars: Vec<String>,
    pub expression: ExpressionSpan,
}

impl ItemsClause {
    /// Split a clause, or `None` when it does not match [`ITEMS_PATTERN`].
    pub fn parse(raw: &str) -> Option<Self> {
        let parsed = parse_items_clause(raw)?;
        Some(Self {
            raw: raw.to_string(),
            vars: parsed.vars,
            expression: parsed.expression,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::ExpressionLanguage;

    #[test]
    fn test_parse_splits_vars_from_expression() {
        let clause = ItemsClause::parse("x, y in {{ zip(ctx('xs'), ctx('ys')) }}").unwrap();
        assert_eq!(clause.raw, "x, y in {{ zip(ctx('xs'), ctx('ys')) }}");
        assert_eq!(clause.vars, vec!["x", "y"]);

        let expression = &clause.expression;
        assert_eq!(expression.language, ExpressionLanguage::Jinja);
        assert_eq!(expression.text, "{{ zip(ctx('xs'), ctx('ys')) }}");
    }

    #[test]
    fn test_parse_keeps_blanks_in_raw() {
        let clause = ItemsClause::parse("  x in <% ctx(xs) %>  ").unwrap();
        assert_eq!(clause.raw, "  x in <% ctx(xs) %>  ");
        assert_eq!(clause.vars, vec!["x"]);
    }

    #[test]
    fn test_parse_rejects_bad_clauses() {
        assert!(ItemsClause::parse("foobar").is_none());
        assert!(ItemsClause::parse("foo bar in <% ctx(xs) %>").is_none());
    }

    #[test]
    fn test_parse_rejects_several_expressions() {
        assert!(ItemsClause::parse("x in <% a %> <% b %>").is_none());
        assert!(ItemsClause::parse("x in {{ a }}{{ b }}").is_none());

        // The reported pattern forbids the closing delimiter inside a body too
        assert!(ITEMS_PATTERN.contains("<%((?!%>).)+%>"));
        assert!(ITEMS_PATTERN.contains(r"\{\{((?!\}\}).)+\}\}"));
    }
}
