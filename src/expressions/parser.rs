//! Pest-backed scanning of embedded expressions
//!
//! The expression languages themselves are external; this parser only
//! understands what the core needs to know about them:
//!
//! - where a delimited expression starts and ends, and which language it is
//! - the loop-variable prefix of an item clause
//! - which workflow variables an expression body references
//! - the call-expression subset evaluated by [`super::CallEvaluator`]

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use serde_json::{Number, Value as JsonValue};

use super::{ExpressionError, ExpressionLanguage};

#[derive(Parser)]
#[grammar = "expressions/grammar.pest"]
struct ExpressionParser;

/* ===================== Delimited Expressions ===================== */

/// A delimited expression located inside some text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionSpan {
    pub language: ExpressionLanguage,
    /// The expression including its delimiters
    pub text: String,
    /// The expression without its delimiters
    pub body: String,
    /// Byte offset of the opening delimiter
    pub start: usize,
    /// Byte offset just past the closing delimiter
    pub end: usize,
}

fn expression_span(pair: Pair<'_, Rule>) -> Option<ExpressionSpan> {
    let span = pair.as_span();
    let text = pair.as_str().to_string();
    let inner = pair.into_inner().next()?;

    let language = match inner.as_rule() {
        Rule::yaql => ExpressionLanguage::Yaql,
        Rule::jinja => ExpressionLanguage::Jinja,
        _ => return None,
    };
    let body = inner.into_inner().next()?.as_str().to_string();

    Some(ExpressionSpan {
        language,
        text,
        body,
        start: span.start(),
        end: span.end(),
    })
}

/// Every delimited expression in `text`, in order of appearance.
pub fn find_expressions(text: &str) -> Vec<ExpressionSpan> {
    let Ok(mut pairs) = ExpressionParser::parse(Rule::template, text) else {
        return Vec::new();
    };
    let Some(template) = pairs.next() else {
        return Vec::new();
    };

    template
        .into_inner()
        .filter(|pair| pair.as_rule() == Rule::expression)
        .filter_map(expression_span)
        .collect()
}

/// The expression `text` consists of, if it is exactly one delimited
/// expression (surrounding blanks allowed).
pub fn parse_expression(text: &str) -> Option<ExpressionSpan> {
    let trimmed = text.trim();
    let offset = text.len() - text.trim_start().len();

    let mut found = find_expressions(trimmed);
    if found.len() != 1 || found[0].start != 0 || found[0].end != trimmed.len() {
        return None;
    }

    let mut span = found.remove(0);
    span.start += offset;
    span.end += offset;
    Some(span)
}

/* ===================== Item Clauses ===================== */

/// Loop variables and expression of a syntactically valid item clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedItems {
    pub vars: Vec<String>,
    pub expression: ExpressionSpan,
}

/// Parse `"<expr>"` or `"<name>[, <name>]* in <expr>"`.
///
/// Returns `None` when the clause does not match the pattern.
pub fn parse_items_clause(raw: &str) -> Option<ParsedItems> {
    let clause = ExpressionParser::parse(Rule::items_clause, raw).ok()?.next()?;

    let mut vars = Vec::new();
    let mut expression = None;

    for pair in clause.into_inner() {
        match pair.as_rule() {
            Rule::loop_vars => {
                vars.extend(pair.into_inner().map(|var| var.as_str().to_string()));
            }
            Rule::expression => expression = expression_span(pair),
            _ => {}
        }
    }

    Some(ParsedItems {
        vars,
        expression: expression?,
    })
}

/* ===================== Variable References ===================== */

/// Names of the workflow variables an expression body references, in order
/// of first appearance.
pub fn extract_variables(body: &str) -> Vec<String> {
    let Ok(mut pairs) = ExpressionParser::parse(Rule::references, body) else {
        return Vec::new();
    };
    let Some(references) = pairs.next() else {
        return Vec::new();
    };

    let mut names: Vec<String> = Vec::new();
    for pair in references.into_inner() {
        if pair.as_rule() != Rule::ctx_ref {
            continue;
        }
        if let Some(name) = pair.into_inner().find(|p| p.as_rule() == Rule::ctx_name) {
            let name = name.as_str().to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    names
}

/* ===================== Call Expressions ===================== */

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CallExpression {
    pub negated: bool,
    pub term: Term,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Term {
    Call(Call),
    Literal(JsonValue),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Call {
    pub name: String,
    pub args: Vec<Argument>,
    pub accessors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Argument {
    Literal(JsonValue),
    /// A bare identifier, passed as its name
    Name(String),
    Call(Call),
}

pub(crate) fn parse_call_expression(body: &str) -> Result<CallExpression, ExpressionError> {
    let syntax = |message: String| ExpressionError::Syntax {
        expression: body.to_string(),
        message,
    };

    let root = ExpressionParser::parse(Rule::call_expression, body)
        .map_err(|e| syntax(e.variant.message().to_string()))?
        .next()
        .ok_or_else(|| syntax("Empty expression".to_string()))?;

    let mut negated = false;
    let mut term = None;

    for pair in root.into_inner() {
        match pair.as_rule() {
            Rule::negation => negated = true,
            Rule::term => {
                let inner = pair
                    .into_inner()
                    .next()
                    .ok_or_else(|| syntax("Empty term".to_string()))?;
                term = Some(match inner.as_rule() {
                    Rule::call => Term::Call(build_call(inner)?),
                    _ => Term::Literal(build_literal(inner)?),
                });
            }
            _ => {}
        }
    }

    Ok(CallExpression {
        negated,
        term: term.ok_or_else(|| syntax("Missing term".to_string()))?,
    })
}

fn build_call(pair: Pair<'_, Rule>) -> Result<Call, ExpressionError> {
    let mut name = String::new();
    let mut args = Vec::new();
    let mut accessors = Vec::new();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::identifier => name = inner.as_str().to_string(),
            Rule::arguments => {
                for argument in inner.into_inner() {
                    args.push(build_argument(argument)?);
                }
            }
            Rule::accessor => {
                if let Some(field) = inner.into_inner().next() {
                    accessors.push(field.as_str().to_string());
                }
            }
            _ => {}
        }
    }

    Ok(Call {
        name,
        args,
        accessors,
    })
}

fn build_argument(pair: Pair<'_, Rule>) -> Result<Argument, ExpressionError> {
    let text = pair.as_str().to_string();
    let inner = pair.into_inner().next().ok_or_else(|| ExpressionError::Syntax {
        expression: text,
        message: "Empty argument".to_string(),
    })?;

    match inner.as_rule() {
        Rule::call => Ok(Argument::Call(build_call(inner)?)),
        Rule::identifier => Ok(Argument::Name(inner.as_str().to_string())),
        _ => Ok(Argument::Literal(build_literal(inner)?)),
    }
}

fn build_literal(pair: Pair<'_, Rule>) -> Result<JsonValue, ExpressionError> {
    let text = pair.as_str();
    let invalid = || ExpressionError::Syntax {
        expression: text.to_string(),
        message: "Invalid literal".to_string(),
    };

    match pair.as_rule() {
        Rule::string => Ok(JsonValue::String(
            pair.clone()
                .into_inner()
                .next()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
        )),
        Rule::number => {
            if let Ok(int) = text.parse::<i64>() {
                Ok(JsonValue::Number(int.into()))
            } else {
                let float = text.parse::<f64>().map_err(|_| invalid())?;
                Number::from_f64(float).map(JsonValue::Number).ok_or_else(invalid)
            }
        }
        Rule::boolean => Ok(JsonValue::Bool(text == "true")),
        Rule::null => Ok(JsonValue::Null),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_expression_languages() {
        let yaql = parse_expression("<% ctx(xs) %>").unwrap();
        assert_eq!(yaql.language, ExpressionLanguage::Yaql);
        assert_eq!(yaql.body, " ctx(xs) ");

        let jinja = parse_expression("  {{ ctx('xs') }} ").unwrap();
        assert_eq!(jinja.language, ExpressionLanguage::Jinja);
        assert_eq!(jinja.text, "{{ ctx('xs') }}");
        assert_eq!(jinja.start, 2);

        let block = parse_expression("{% if true %}").unwrap();
        assert_eq!(block.language, ExpressionLanguage::Jinja);

        assert!(parse_expression("foobar").is_none());
        assert!(parse_expression("<%%>").is_none());
        assert!(parse_expression("x <% ctx(xs) %>").is_none());
        assert!(parse_expression("<% a %> <% b %>").is_none());
    }

    #[test]
    fn test_find_expressions_in_mixed_text() {
        let found = find_expressions("Hello <% ctx(name) %>, you have {{ ctx('n') }} items");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].text, "<% ctx(name) %>");
        assert_eq!(found[1].language, ExpressionLanguage::Jinja);
        assert_eq!(&"Hello <% ctx(name) %>, you"[found[0].start..found[0].end], "<% ctx(name) %>");

        assert!(find_expressions("plain text").is_empty());
        assert!(find_expressions("unclosed <% ctx(x)").is_empty());
    }

    #[test]
    fn test_items_clause_forms() {
        let bare = parse_items_clause("<% ctx(xs) %>").unwrap();
        assert!(bare.vars.is_empty());

        let one = parse_items_clause("x in <% ctx(xs) %>").unwrap();
        assert_eq!(one.vars, vec!["x"]);

        let two = parse_items_clause("x, y in {{ zip(ctx('xs'), ctx('ys')) }}").unwrap();
        assert_eq!(two.vars, vec!["x", "y"]);
        assert_eq!(two.expression.language, ExpressionLanguage::Jinja);

        let three = parse_items_clause("x, y, z in <% zip(ctx(xs), ctx(ys), ctx(zs)) %>").unwrap();
        assert_eq!(three.vars, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_items_clause_spacing() {
        for raw in [
            " <% ctx(xs) %> ",
            "  <% ctx(xs) %>  ",
            " x in <% ctx(xs) %> ",
            "x  in  <% ctx(xs) %>",
            "x,y in <% zip(ctx(xs), ctx(ys)) %>",
            "x,  y in <% zip(ctx(xs), ctx(ys)) %>",
        ] {
            assert!(parse_items_clause(raw).is_some(), "{raw:?} should parse");
        }
    }

    #[test]
    fn test_items_clause_rejections() {
        for raw in [
            "foobar",
            "foo bar in <% zip(list(1, 2), list(a, b)) %>",
            "foo; bar in <% zip(list(1, 2), list(a, b)) %>",
            "x in",
            "x in foobar",
            "in <% ctx(xs) %>",
        ] {
            assert!(parse_items_clause(raw).is_none(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn test_extract_variables() {
        assert_eq!(extract_variables(" ctx(xs) "), vec!["xs"]);
        assert_eq!(extract_variables(" ctx('xs') + ctx(\"ys\") "), vec!["xs", "ys"]);
        assert_eq!(extract_variables(" ctx().batch_size "), vec!["batch_size"]);
        assert_eq!(
            extract_variables(" zip(ctx(xs), ctx(ys), ctx(xs)) "),
            vec!["xs", "ys"]
        );
        assert!(extract_variables(" succeeded() ").is_empty());
        assert!(extract_variables(" xctx(a) ").is_empty());
    }

    #[test]
    fn test_parse_call_expression() {
        let parsed = parse_call_expression(" not task_state(t1, 2) ").unwrap();
        assert!(parsed.negated);
        assert_eq!(
            parsed.term,
            Term::Call(Call {
                name: "task_state".to_string(),
                args: vec![Argument::Name("t1".to_string()), Argument::Literal(json!(2))],
                accessors: vec![],
            })
        );

        let parsed = parse_call_expression("result().fu.bar").unwrap();
        let Term::Call(call) = parsed.term else {
            unreachable!("expected a call");
        };
        assert_eq!(call.accessors, vec!["fu", "bar"]);

        let parsed = parse_call_expression(" 'done' ").unwrap();
        assert_eq!(parsed.term, Term::Literal(json!("done")));

        let parsed = parse_call_expression("true").unwrap();
        assert_eq!(parsed.term, Term::Literal(json!(true)));

        assert!(parse_call_expression("1 + 2").is_err());
    }
}
