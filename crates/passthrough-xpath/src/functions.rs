//! XPath 1.0 core function library.

use passthrough_types::{PassthroughError, Result};

use crate::eval::CallContext;
use crate::value::{Handle, Value};

const CORE: &[&str] = &[
    "true",
    "false",
    "not",
    "boolean",
    "number",
    "string",
    "concat",
    "contains",
    "starts-with",
    "substring",
    "substring-before",
    "substring-after",
    "string-length",
    "normalize-space",
    "translate",
    "count",
    "sum",
    "position",
    "last",
    "name",
    "local-name",
    "namespace-uri",
    "floor",
    "ceiling",
    "round",
];

pub(crate) fn is_core(name: &str) -> bool {
    CORE.contains(&name)
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        let expected = match (min, max) {
            (a, b) if a == b => format!("{a}"),
            (a, usize::MAX) => format!("at least {a}"),
            (a, b) => format!("{a} to {b}"),
        };
        return Err(PassthroughError::XPath(format!(
            "{name}() takes {expected} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

/// First argument, or the context node as a node-set when omitted.
fn arg_or_context(ctx: &CallContext<'_>, args: &mut Vec<Value>) -> Value {
    if args.is_empty() {
        Value::Nodes(vec![ctx.node])
    } else {
        args.remove(0)
    }
}

fn first_node(name: &str, value: Value) -> Result<Option<Handle>> {
    match value {
        Value::Nodes(nodes) => Ok(nodes.into_iter().next()),
        other => Err(PassthroughError::XPath(format!(
            "{name}() expects a node-set, got {}",
            other.type_name()
        ))),
    }
}

fn xpath_round(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() {
        n
    } else {
        (n + 0.5).floor()
    }
}

fn substring(s: &str, start: f64, len: Option<f64>) -> String {
    let start = xpath_round(start);
    let end = len.map_or(f64::INFINITY, |l| start + xpath_round(l));
    s.chars()
        .enumerate()
        .filter(|(i, _)| {
            let p = (*i + 1) as f64;
            p >= start && p < end
        })
        .map(|(_, c)| c)
        .collect()
}

fn translate(s: &str, from: &str, to: &str) -> String {
    let to: Vec<char> = to.chars().collect();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match from.chars().position(|f| f == c) {
            Some(i) => {
                if let Some(r) = to.get(i) {
                    out.push(*r);
                }
            }
            None => out.push(c),
        }
    }
    out
}

pub(crate) fn call_core(ctx: &CallContext<'_>, name: &str, mut args: Vec<Value>) -> Result<Value> {
    let ev = ctx.evaluator;
    let s = |v: &Value| ev.to_string(v);
    let n = |v: &Value| ev.to_number(v);
    let value = match name {
        "true" => {
            arity(name, &args, 0, 0)?;
            Value::Boolean(true)
        }
        "false" => {
            arity(name, &args, 0, 0)?;
            Value::Boolean(false)
        }
        "not" => {
            arity(name, &args, 1, 1)?;
            Value::Boolean(!args[0].to_boolean())
        }
        "boolean" => {
            arity(name, &args, 1, 1)?;
            Value::Boolean(args[0].to_boolean())
        }
        "number" => {
            arity(name, &args, 0, 1)?;
            Value::Number(n(&arg_or_context(ctx, &mut args)))
        }
        "string" => {
            arity(name, &args, 0, 1)?;
            Value::String(s(&arg_or_context(ctx, &mut args)))
        }
        "concat" => {
            arity(name, &args, 2, usize::MAX)?;
            Value::String(args.iter().map(s).collect())
        }
        "contains" => {
            arity(name, &args, 2, 2)?;
            Value::Boolean(s(&args[0]).contains(&s(&args[1])))
        }
        "starts-with" => {
            arity(name, &args, 2, 2)?;
            Value::Boolean(s(&args[0]).starts_with(&s(&args[1])))
        }
        "substring" => {
            arity(name, &args, 2, 3)?;
            let len = args.get(2).map(n);
            Value::String(substring(&s(&args[0]), n(&args[1]), len))
        }
        "substring-before" => {
            arity(name, &args, 2, 2)?;
            let (hay, needle) = (s(&args[0]), s(&args[1]));
            Value::String(
                hay.find(&needle)
                    .map(|i| hay[..i].to_string())
                    .unwrap_or_default(),
            )
        }
        "substring-after" => {
            arity(name, &args, 2, 2)?;
            let (hay, needle) = (s(&args[0]), s(&args[1]));
            Value::String(
                hay.find(&needle)
                    .map(|i| hay[i + needle.len()..].to_string())
                    .unwrap_or_default(),
            )
        }
        "string-length" => {
            arity(name, &args, 0, 1)?;
            Value::Number(s(&arg_or_context(ctx, &mut args)).chars().count() as f64)
        }
        "normalize-space" => {
            arity(name, &args, 0, 1)?;
            let text = s(&arg_or_context(ctx, &mut args));
            Value::String(text.split_whitespace().collect::<Vec<_>>().join(" "))
        }
        "translate" => {
            arity(name, &args, 3, 3)?;
            Value::String(translate(&s(&args[0]), &s(&args[1]), &s(&args[2])))
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Nodes(nodes) => Value::Number(nodes.len() as f64),
                other => {
                    return Err(PassthroughError::XPath(format!(
                        "count() expects a node-set, got {}",
                        other.type_name()
                    )))
                }
            }
        }
        "sum" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Nodes(nodes) => Value::Number(
                    nodes
                        .iter()
                        .map(|h| crate::value::parse_number(&ev.string_value(*h)))
                        .sum(),
                ),
                other => {
                    return Err(PassthroughError::XPath(format!(
                        "sum() expects a node-set, got {}",
                        other.type_name()
                    )))
                }
            }
        }
        "position" => {
            arity(name, &args, 0, 0)?;
            Value::Number(ctx.position as f64)
        }
        "last" => {
            arity(name, &args, 0, 0)?;
            Value::Number(ctx.size as f64)
        }
        "name" | "local-name" | "namespace-uri" => {
            arity(name, &args, 0, 1)?;
            let node = first_node(name, arg_or_context(ctx, &mut args))?;
            let qname = node.and_then(|h| ev.node_name(h));
            Value::String(match (name, qname) {
                (_, None) => String::new(),
                ("name", Some(q)) => q.prefixed(),
                ("local-name", Some(q)) => q.local,
                (_, Some(q)) => q.namespace.unwrap_or_default(),
            })
        }
        "floor" => {
            arity(name, &args, 1, 1)?;
            Value::Number(n(&args[0]).floor())
        }
        "ceiling" => {
            arity(name, &args, 1, 1)?;
            Value::Number(n(&args[0]).ceil())
        }
        "round" => {
            arity(name, &args, 1, 1)?;
            Value::Number(xpath_round(n(&args[0])))
        }
        other => {
            return Err(PassthroughError::XPath(format!(
                "unknown function '{other}'"
            )))
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_follows_xpath_rounding() {
        assert_eq!(substring("12345", 2.0, Some(3.0)), "234");
        assert_eq!(substring("12345", 1.5, Some(2.6)), "234");
        assert_eq!(substring("12345", 0.0, Some(3.0)), "12");
        assert_eq!(substring("12345", f64::NAN, Some(3.0)), "");
        assert_eq!(substring("12345", 2.0, None), "2345");
    }

    #[test]
    fn translate_maps_and_removes() {
        assert_eq!(translate("bar", "abc", "ABC"), "BAr");
        assert_eq!(translate("--aaa--", "abc-", "ABC"), "AAA");
    }

    #[test]
    fn round_half_up() {
        assert_eq!(xpath_round(2.5), 3.0);
        assert_eq!(xpath_round(-2.5), -2.0);
    }
}
