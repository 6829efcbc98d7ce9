//! Template and expression rendering.
//!
//! Stride supports variable substitution in step configuration values using
//! `${variable}` syntax, and boolean `when` expressions over the same
//! variables. Both are compiled once at configuration-load time and rendered
//! against the run's variable mapping as late as possible, so that variables
//! set by earlier steps are visible to later ones.
//!
//! # Syntax
//!
//! - `${variable_name}` - replaced with the variable's value
//! - `$${escaped}` - produces literal `${escaped}` in output
//!
//! A string that consists of exactly one `${name}` reference renders to the
//! variable's underlying value, preserving its type; any other string
//! renders to a string. Non-string configuration values render to
//! themselves, unchanged.
//!
//! Rendering a reference to an unset variable fails with a render error
//! naming the step's address; sensitivity never affects rendering, only
//! display.

use crate::address::Address;
use crate::error::{Result, StrideError};
use crate::sensitive::{DisplayValue, SensitiveMap};
use serde_yaml::Value;

/// The variable mapping templates render against.
pub type Variables = SensitiveMap<Value>;

/// A segment of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    /// Literal text
    Literal(String),
    /// Variable reference: ${name}
    Variable(String),
}

/// Parse a string containing `${var}` interpolations.
fn parse_segments(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut chars = input.chars().peekable();
    let mut current_literal = String::new();

    while let Some(c) = chars.next() {
        if c == '$' {
            match chars.peek() {
                Some('$') => {
                    // Escaped: $$ becomes $
                    chars.next();
                    if chars.peek() == Some(&'{') {
                        // $${...} -> literal ${...}
                        chars.next();
                        current_literal.push('$');
                        current_literal.push('{');
                        while let Some(&c) = chars.peek() {
                            chars.next();
                            current_literal.push(c);
                            if c == '}' {
                                break;
                            }
                        }
                    } else {
                        current_literal.push('$');
                    }
                }
                Some('{') => {
                    chars.next();
                    if !current_literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut current_literal)));
                    }
                    let mut var_name = String::new();
                    while let Some(&c) = chars.peek() {
                        chars.next();
                        if c == '}' {
                            break;
                        }
                        var_name.push(c);
                    }
                    segments.push(Segment::Variable(var_name));
                }
                _ => current_literal.push(c),
            }
        } else {
            current_literal.push(c);
        }
    }

    if !current_literal.is_empty() {
        segments.push(Segment::Literal(current_literal));
    }

    segments
}

/// A configuration value compiled for late rendering.
#[derive(Debug, Clone)]
pub enum Template {
    /// Non-string value; renders to itself.
    Constant(Value),
    /// String value with zero or more `${var}` references.
    Text(Vec<Segment>),
}

impl Template {
    /// Compile a configuration value.
    pub fn parse(value: &Value) -> Self {
        match value {
            Value::String(s) => Template::Text(parse_segments(s)),
            other => Template::Constant(other.clone()),
        }
    }

    /// Render against the variable mapping.
    pub fn render(&self, vars: &Variables, addr: &Address) -> Result<Value> {
        match self {
            Template::Constant(v) => Ok(v.clone()),
            // A lone variable reference preserves the variable's type.
            Template::Text(segments) => {
                if let [Segment::Variable(name)] = segments.as_slice() {
                    return lookup(vars, name, addr).cloned();
                }

                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(text) => out.push_str(text),
                        Segment::Variable(name) => {
                            out.push_str(&lookup(vars, name, addr)?.display());
                        }
                    }
                }
                Ok(Value::String(out))
            }
        }
    }

    /// Render to a string form.
    pub fn render_string(&self, vars: &Variables, addr: &Address) -> Result<String> {
        Ok(self.render(vars, addr)?.display())
    }
}

fn lookup<'a>(vars: &'a Variables, name: &str, addr: &Address) -> Result<&'a Value> {
    vars.get(name)
        .ok_or_else(|| StrideError::render(format!("undefined variable \"{}\"", name), Some(addr)))
}

/// One side of a comparison, or the subject of a truthiness test.
#[derive(Debug, Clone)]
enum Operand {
    /// Quoted string, number, or boolean literal.
    Literal(Value),
    /// Variable reference by bare name; unset reads as null.
    Variable(String),
}

impl Operand {
    fn parse(token: &str) -> Self {
        let token = token.trim();
        if token.len() >= 2 {
            let bytes = token.as_bytes();
            if (bytes[0] == b'"' && bytes[token.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[token.len() - 1] == b'\'')
            {
                return Operand::Literal(Value::String(token[1..token.len() - 1].to_string()));
            }
        }
        if token == "true" {
            return Operand::Literal(Value::Bool(true));
        }
        if token == "false" {
            return Operand::Literal(Value::Bool(false));
        }
        if let Ok(n) = token.parse::<i64>() {
            return Operand::Literal(Value::Number(n.into()));
        }
        Operand::Variable(token.to_string())
    }

    fn eval(&self, vars: &Variables) -> Value {
        match self {
            Operand::Literal(v) => v.clone(),
            Operand::Variable(name) => vars.get(name).cloned().unwrap_or(Value::Null),
        }
    }
}

/// A compiled `when` condition.
///
/// Supported forms: a bare variable name (truthiness test), `a == b`,
/// `a != b`, each optionally prefixed with `!`. Operands are variable names
/// or quoted/numeric/boolean literals.
#[derive(Debug, Clone)]
pub struct Expression {
    negate: bool,
    lhs: Operand,
    comparison: Option<(bool, Operand)>, // (equality, rhs)
}

impl Expression {
    /// Compile an expression from a configuration value. Non-string values
    /// are treated as constant truthiness.
    pub fn parse(value: &Value, addr: &Address) -> Result<Self> {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(StrideError::config(
                    format!("expecting expression string, not {}", type_name(other)),
                    Some(addr),
                ))
            }
        };

        let mut text = text.trim();
        let mut negate = false;
        while let Some(rest) = text.strip_prefix('!') {
            // "!=" with no left operand is malformed, not a negation
            if rest.starts_with('=') {
                break;
            }
            negate = !negate;
            text = rest.trim_start();
        }

        if text.is_empty() {
            return Err(StrideError::config("empty expression", Some(addr)));
        }

        for (op, equality) in [("==", true), ("!=", false)] {
            if let Some(pos) = text.find(op) {
                let lhs = text[..pos].trim();
                let rhs = text[pos + 2..].trim();
                if lhs.is_empty() || rhs.is_empty() {
                    return Err(StrideError::config(
                        format!("missing operand in expression \"{}\"", text),
                        Some(addr),
                    ));
                }
                return Ok(Self {
                    negate,
                    lhs: Operand::parse(lhs),
                    comparison: Some((equality, Operand::parse(rhs))),
                });
            }
        }

        Ok(Self {
            negate,
            lhs: Operand::parse(text),
            comparison: None,
        })
    }

    /// Evaluate against the variable mapping.
    pub fn eval(&self, vars: &Variables) -> bool {
        let value = self.lhs.eval(vars);
        let result = match &self.comparison {
            Some((equality, rhs)) => {
                let rhs = rhs.eval(vars);
                let equal = value == rhs || value.display() == rhs.display();
                equal == *equality
            }
            None => truthy(&value),
        };
        result != self.negate
    }
}

/// Truthiness of a rendered value: null, false, zero, and the empty string
/// are false; everything else is true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Human-readable name of a YAML value's type, for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        Address::new("test.yml", 0, None)
    }

    fn vars(pairs: &[(&str, Value)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn plain_string_renders_unchanged() {
        let t = Template::parse(&Value::String("echo hello".into()));
        let out = t.render_string(&Variables::new(), &addr()).unwrap();
        assert_eq!(out, "echo hello");
    }

    #[test]
    fn substitutes_variables() {
        let t = Template::parse(&Value::String("echo ${x}".into()));
        let v = vars(&[("x", Value::Number(1.into()))]);
        assert_eq!(t.render_string(&v, &addr()).unwrap(), "echo 1");
    }

    #[test]
    fn lone_reference_preserves_type() {
        let t = Template::parse(&Value::String("${count}".into()));
        let v = vars(&[("count", Value::Number(3.into()))]);
        assert_eq!(t.render(&v, &addr()).unwrap(), Value::Number(3.into()));
    }

    #[test]
    fn escaped_reference_is_literal() {
        let t = Template::parse(&Value::String("$${x}".into()));
        let out = t.render_string(&Variables::new(), &addr()).unwrap();
        assert_eq!(out, "${x}");
    }

    #[test]
    fn non_string_renders_to_itself() {
        let t = Template::parse(&Value::Bool(true));
        assert_eq!(
            t.render(&Variables::new(), &addr()).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn undefined_variable_is_a_render_error() {
        let t = Template::parse(&Value::String("${missing}".into()));
        let err = t.render(&Variables::new(), &addr()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("missing"));
        assert!(msg.contains("test.yml step 1"));
    }

    #[test]
    fn sensitive_variables_still_render() {
        let mut v = vars(&[("secret", Value::String("hunter2".into()))]);
        v.declare_sensitive("secret");
        let t = Template::parse(&Value::String("use ${secret}".into()));
        assert_eq!(t.render_string(&v, &addr()).unwrap(), "use hunter2");
    }

    #[test]
    fn truthiness_expression() {
        let e = Expression::parse(&Value::String("flag".into()), &addr()).unwrap();
        assert!(e.eval(&vars(&[("flag", Value::Bool(true))])));
        assert!(!e.eval(&vars(&[("flag", Value::Bool(false))])));
        assert!(!e.eval(&Variables::new()));
        assert!(!e.eval(&vars(&[("flag", Value::String(String::new()))])));
        assert!(!e.eval(&vars(&[("flag", Value::Number(0.into()))])));
    }

    #[test]
    fn negated_expression() {
        let e = Expression::parse(&Value::String("!flag".into()), &addr()).unwrap();
        assert!(e.eval(&Variables::new()));
        assert!(!e.eval(&vars(&[("flag", Value::Bool(true))])));
    }

    #[test]
    fn equality_expression() {
        let e = Expression::parse(&Value::String("branch == \"main\"".into()), &addr()).unwrap();
        assert!(e.eval(&vars(&[("branch", Value::String("main".into()))])));
        assert!(!e.eval(&vars(&[("branch", Value::String("dev".into()))])));
    }

    #[test]
    fn inequality_expression() {
        let e = Expression::parse(&Value::String("count != 0".into()), &addr()).unwrap();
        assert!(e.eval(&vars(&[("count", Value::Number(2.into()))])));
        assert!(!e.eval(&vars(&[("count", Value::Number(0.into()))])));
    }

    #[test]
    fn comparison_coerces_display_forms() {
        let e = Expression::parse(&Value::String("count == '2'".into()), &addr()).unwrap();
        assert!(e.eval(&vars(&[("count", Value::Number(2.into()))])));
    }

    #[test]
    fn comparison_requires_both_operands() {
        let err = Expression::parse(&Value::String("!= b".into()), &addr()).unwrap_err();
        assert!(err.to_string().contains("missing operand"));
        assert!(Expression::parse(&Value::String("a ==".into()), &addr()).is_err());
        assert!(Expression::parse(&Value::String("== b".into()), &addr()).is_err());
    }

    #[test]
    fn mapping_is_not_an_expression() {
        let value: Value = serde_yaml::from_str("{a: 1}").unwrap();
        assert!(Expression::parse(&value, &addr()).is_err());
    }
}
