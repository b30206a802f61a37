//! Built-in `pt:` extension functions.

use chrono::{Duration, NaiveDateTime, Utc};

use passthrough_types::{PassthroughError, Result};
use passthrough_xpath::Value;

use super::{ExtensionRegistry, PtContext, BUILTIN_PREFIX};

/// Default timestamp format of label date-time fields.
pub const LABEL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

const UNITS: &[(&str, i32)] = &[("s", 0), ("ms", -3), ("microseconds", -6)];

pub fn register(reg: &mut ExtensionRegistry) {
    reg.register(BUILTIN_PREFIX, "context", context_get);
    reg.register(BUILTIN_PREFIX, "context.get", context_get);
    reg.register(BUILTIN_PREFIX, "self", self_node);
    reg.register(BUILTIN_PREFIX, "sequence", sequence);
    reg.register(BUILTIN_PREFIX, "datetime.add", datetime_add);
    reg.register(BUILTIN_PREFIX, "datetime.now", datetime_now);
}

fn arity(ctx: &PtContext<'_>, name: &str, args: &[Value], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(PassthroughError::eval(
            format!(
                "pt:{name}() takes {min} to {max} argument(s), got {}",
                args.len()
            ),
            ctx.location(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// context / self / sequence
// ---------------------------------------------------------------------------

/// `pt:context(key)`: a value from the client's context map.
pub fn context_get(ctx: &PtContext<'_>, args: Vec<Value>) -> Result<Value> {
    arity(ctx, "context", &args, 1, 1)?;
    let key = ctx.string(&args[0]);
    match ctx.context_value(&key) {
        Some(serde_json::Value::String(s)) => Ok(Value::String(s.clone())),
        Some(other) => Ok(Value::String(other.to_string())),
        None => Err(PassthroughError::eval(
            format!("context entry '{key}' has not been registered"),
            ctx.location(),
        )),
    }
}

/// `pt:self()`: the template node being resolved.
pub fn self_node(ctx: &PtContext<'_>, args: Vec<Value>) -> Result<Value> {
    arity(ctx, "self", &args, 0, 0)?;
    Ok(Value::Nodes(vec![ctx.t_elem()]))
}

/// `pt:sequence(a, b, ...)`: independent values for a multi-token fill.
pub fn sequence(ctx: &PtContext<'_>, args: Vec<Value>) -> Result<Value> {
    let mut out = Vec::with_capacity(args.len());
    for (i, arg) in args.into_iter().enumerate() {
        let n = i + 1;
        match arg {
            Value::Nodes(nodes) if nodes.is_empty() => {
                return Err(PassthroughError::eval(
                    format!("pt:sequence, argument {n}: empty node-set encountered"),
                    ctx.location(),
                ))
            }
            Value::Nodes(nodes) if nodes.len() > 1 => {
                return Err(PassthroughError::eval(
                    format!(
                        "pt:sequence, argument {n}: node-set with {} members cannot be added \
                         to sequence as XPath does not permit nested node-sets",
                        nodes.len()
                    ),
                    ctx.location(),
                ))
            }
            other => out.push(other),
        }
    }
    Ok(Value::Sequence(out))
}

// ---------------------------------------------------------------------------
// datetime
// ---------------------------------------------------------------------------

/// A timestamp that renders back with a fixed number of fractional digits.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelDatetime {
    datetime: NaiveDateTime,
    format: String,
    decimals: Option<usize>,
}

impl LabelDatetime {
    pub fn parse(input: &str, format: Option<&str>, decimals: Option<f64>) -> Result<Self> {
        let format = format.filter(|f| !f.is_empty()).unwrap_or(LABEL_FORMAT);
        let datetime = NaiveDateTime::parse_from_str(input.trim(), format)
            .map_err(|e| PassthroughError::XPath(format!("unable to parse datetime: {e}")))?;
        let decimals = if !format.contains("%.f") {
            None
        } else if let Some(d) = decimals {
            Some(d.max(0.0) as usize)
        } else {
            let input = input.trim();
            let digits = input
                .find('.')
                .map(|i| input[i + 1..].trim_end_matches(['Z', 'z']).len())
                .unwrap_or(0);
            Some(digits)
        };
        Ok(Self {
            datetime,
            format: format.to_string(),
            decimals,
        })
    }

    pub fn now(format: Option<&str>, decimals: Option<f64>) -> Self {
        let format = format.filter(|f| !f.is_empty()).unwrap_or(LABEL_FORMAT);
        let decimals = format
            .contains("%.f")
            .then(|| decimals.map_or(6, |d| d.max(0.0) as usize));
        Self {
            datetime: Utc::now().naive_utc(),
            format: format.to_string(),
            decimals,
        }
    }

    /// Shift by `delta` expressed in `unit` (`s`, `ms` or `microseconds`).
    pub fn add(&mut self, delta: f64, unit: &str) -> Result<()> {
        let exponent = UNITS
            .iter()
            .find(|(u, _)| *u == unit)
            .map(|(_, e)| *e)
            .ok_or_else(|| {
                let known: Vec<&str> = UNITS.iter().map(|(u, _)| *u).collect();
                PassthroughError::XPath(format!(
                    "unrecognised unit '{unit}', expected one of {}",
                    known.join(", ")
                ))
            })?;
        let nanos = delta * 10f64.powi(exponent) * 1e9;
        if !nanos.is_finite() {
            return Err(PassthroughError::XPath(format!("invalid delta '{delta}'")));
        }
        self.datetime += Duration::nanoseconds(nanos.round() as i64);
        Ok(())
    }
}

impl std::fmt::Display for LabelDatetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(decimals) = self.decimals else {
            return write!(f, "{}", self.datetime.format(&self.format));
        };
        let full = self
            .datetime
            .format(&self.format.replace("%.f", "%.9f"))
            .to_string();
        let (body, zone) = match full.char_indices().last() {
            Some((i, c)) if c.eq_ignore_ascii_case(&'z') => (&full[..i], &full[i..]),
            _ => (full.as_str(), ""),
        };
        let body = match body.find('.') {
            Some(dot) => {
                let end = (dot + decimals + 1).min(body.len());
                body[..end].trim_end_matches('.')
            }
            None => body,
        };
        write!(f, "{body}{zone}")
    }
}

fn optional_args(ctx: &PtContext<'_>, args: &[Value]) -> (Option<String>, Option<f64>) {
    let format = args.first().map(|v| ctx.string(v));
    let decimals = args.get(1).map(|v| ctx.evaluator().to_number(v));
    (format, decimals.filter(|d| !d.is_nan()))
}

/// `pt:datetime.add(timestamp, delta[, format[, decimals]])`.
pub fn datetime_add(ctx: &PtContext<'_>, args: Vec<Value>) -> Result<Value> {
    arity(ctx, "datetime.add", &args, 2, 4)?;
    let (format, decimals) = optional_args(ctx, &args[2..]);
    let timestamp = ctx.string(&args[0]);
    let mut dt = LabelDatetime::parse(&timestamp, format.as_deref(), decimals).map_err(|e| {
        PassthroughError::eval(format!("unable to parse datetime: {}", inner(e)), ctx.location())
    })?;

    let delta_error =
        |msg: String| PassthroughError::eval(format!("unable to add delta: {msg}"), ctx.location());
    let Value::Nodes(nodes) = &args[1] else {
        return Err(delta_error(format!(
            "expected a node-set, got {}",
            args[1].type_name()
        )));
    };
    let node = nodes
        .first()
        .ok_or_else(|| delta_error("empty node-set".into()))?;
    let unit = node
        .as_element()
        .and_then(|id| {
            ctx.evaluator()
                .document(node.doc)
                .ok()
                .and_then(|doc| doc.attribute(id, None, "unit").map(str::to_string))
        })
        .ok_or_else(|| delta_error("delta element has no unit attribute".into()))?;
    let text = ctx.evaluator().string_value(*node);
    let delta: f64 = text
        .trim()
        .parse()
        .map_err(|_| delta_error(format!("could not convert '{text}' to a number")))?;
    dt.add(delta, &unit).map_err(|e| delta_error(inner(e)))?;
    Ok(Value::String(dt.to_string()))
}

/// `pt:datetime.now([format[, decimals]])`: current UTC time.
pub fn datetime_now(ctx: &PtContext<'_>, args: Vec<Value>) -> Result<Value> {
    arity(ctx, "datetime.now", &args, 0, 2)?;
    let (format, decimals) = optional_args(ctx, &args);
    Ok(Value::String(
        LabelDatetime::now(format.as_deref(), decimals).to_string(),
    ))
}

fn inner(e: PassthroughError) -> String {
    match e {
        PassthroughError::XPath(msg) => msg
            .strip_prefix("unable to parse datetime: ")
            .map(str::to_string)
            .unwrap_or(msg),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_input_precision() {
        let mut dt = LabelDatetime::parse("2020-01-01T00:00:59.123Z", None, None).unwrap();
        dt.add(1.5, "s").unwrap();
        assert_eq!(dt.to_string(), "2020-01-01T00:01:00.623Z");
    }

    #[test]
    fn explicit_decimals() {
        let dt = LabelDatetime::parse("2020-01-01T00:00:00.123456Z", None, Some(2.0)).unwrap();
        assert_eq!(dt.to_string(), "2020-01-01T00:00:00.12Z");
        let dt = LabelDatetime::parse("2020-01-01T00:00:00.5Z", None, Some(0.0)).unwrap();
        assert_eq!(dt.to_string(), "2020-01-01T00:00:00Z");
        let dt = LabelDatetime::parse("2020-01-01T00:00:00.5Z", None, Some(-3.0)).unwrap();
        assert_eq!(dt.to_string(), "2020-01-01T00:00:00Z");
    }

    #[test]
    fn units() {
        let mut dt = LabelDatetime::parse("2020-01-01T00:00:00.000000Z", None, None).unwrap();
        dt.add(250.0, "ms").unwrap();
        dt.add(5.0, "microseconds").unwrap();
        assert_eq!(dt.to_string(), "2020-01-01T00:00:00.250005Z");
        let err = dt.add(1.0, "h").unwrap_err();
        assert!(err.to_string().contains("unrecognised unit 'h'"));
    }

    #[test]
    fn whole_seconds_without_fraction() {
        let mut dt = LabelDatetime::parse("2020-12-31T23:59:59Z", None, None).unwrap();
        dt.add(1.0, "s").unwrap();
        assert_eq!(dt.to_string(), "2021-01-01T00:00:00Z");
    }

    #[test]
    fn custom_format_without_fraction() {
        let mut dt = LabelDatetime::parse("2020-01-01 10:00", Some("%Y-%m-%d %H:%M"), Some(3.0))
            .unwrap();
        dt.add(-60.0, "s").unwrap();
        assert_eq!(dt.to_string(), "2020-01-01 09:59");
    }

    #[test]
    fn bad_timestamp() {
        assert!(LabelDatetime::parse("yesterday", None, None).is_err());
    }

    #[test]
    fn now_renders_six_digits_by_default() {
        let now = LabelDatetime::now(None, None).to_string();
        let fraction = now.rsplit('.').next().unwrap();
        assert_eq!(fraction.len(), "123456Z".len());
        assert!(now.ends_with('Z'));
    }
}
