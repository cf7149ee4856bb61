//! Run-time values and the expression evaluator used by the Rust runtime.
//!
//! Values follow JavaScript conversion rules closely enough that a binding
//! written by the runtime reads the same as one written by the emitted module.

use crate::expression::{BinaryOp, Callee, Expr, LogicalOp, Stmt, UnaryOp, UpdateOp};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn str(value: impl Into<String>) -> Self {
        Value::Str(value.into())
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                match trimmed {
                    "" => 0.0,
                    "Infinity" | "+Infinity" => f64::INFINITY,
                    "-Infinity" => f64::NEG_INFINITY,
                    t if is_numeric_literal(t) => t.parse().unwrap_or(f64::NAN),
                    _ => f64::NAN,
                }
            }
            Value::Array(items) => match items.as_slice() {
                [] => 0.0,
                [only] => only.to_number(),
                _ => f64::NAN,
            },
        }
    }

    /// JavaScript `String(value)`.
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|v| match v {
                    Value::Undefined | Value::Null => String::new(),
                    other => other.to_js_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(_) => {
                tracing::warn!("object values are not supported, using undefined");
                Value::Undefined
            }
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        // Arrays compare by identity in JS; two evaluations never share one.
        (Value::Array(_), Value::Array(_)) => false,
        _ => a == b,
    }
}

fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Str(_), Value::Str(_)) | (Value::Bool(_), Value::Bool(_)) => a == b,
        (Value::Array(_), Value::Array(_)) => false,
        (Value::Array(_), _) => loose_equals(&Value::Str(a.to_js_string()), b),
        (_, Value::Array(_)) => loose_equals(a, &Value::Str(b.to_js_string())),
        _ => a.to_number() == b.to_number(),
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => a.to_number().partial_cmp(&b.to_number()),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Value {
    match op {
        BinaryOp::Add => match (&left, &right) {
            (Value::Str(_) | Value::Array(_), _) | (_, Value::Str(_) | Value::Array(_)) => {
                Value::Str(left.to_js_string() + &right.to_js_string())
            }
            _ => Value::Number(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Exp => Value::Number(left.to_number().powf(right.to_number())),
        BinaryOp::Eq => Value::Bool(loose_equals(&left, &right)),
        BinaryOp::NotEq => Value::Bool(!loose_equals(&left, &right)),
        BinaryOp::StrictEq => Value::Bool(strict_equals(&left, &right)),
        BinaryOp::StrictNotEq => Value::Bool(!strict_equals(&left, &right)),
        BinaryOp::Lt => Value::Bool(compare(&left, &right) == Some(Ordering::Less)),
        BinaryOp::LtEq => Value::Bool(matches!(
            compare(&left, &right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(compare(&left, &right) == Some(Ordering::Greater)),
        BinaryOp::GtEq => Value::Bool(matches!(
            compare(&left, &right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVALUATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Evaluates expressions against one instance's values.
pub struct Evaluator<'a> {
    values: &'a HashMap<String, Value>,
    locals: Vec<(String, Value)>,
}

impl<'a> Evaluator<'a> {
    pub fn new(values: &'a HashMap<String, Value>) -> Self {
        Self {
            values,
            locals: Vec::new(),
        }
    }

    fn lookup(&self, name: &str) -> Value {
        if let Some((_, v)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return v.clone();
        }
        self.values.get(name).cloned().unwrap_or_default()
    }

    fn is_bound(&self, name: &str) -> bool {
        self.locals.iter().any(|(n, _)| n == name) || self.values.contains_key(name)
    }

    pub fn eval(&mut self, expr: &Expr) -> Value {
        match expr {
            Expr::Undefined => Value::Undefined,
            Expr::Null => Value::Null,
            Expr::Bool { value } => Value::Bool(*value),
            Expr::Number { value } => Value::Number(*value),
            Expr::Str { value } => Value::Str(value.clone()),
            Expr::Ident { name } => self.lookup(name),
            Expr::Template {
                quasis,
                expressions,
            } => {
                let mut out = String::new();
                for (i, quasi) in quasis.iter().enumerate() {
                    out.push_str(quasi);
                    if let Some(e) = expressions.get(i) {
                        out.push_str(&self.eval(e).to_js_string());
                    }
                }
                Value::Str(out)
            }
            Expr::Array { elements } => Value::Array(elements.iter().map(|e| self.eval(e)).collect()),
            Expr::Unary { op, argument } => {
                let v = self.eval(argument);
                match op {
                    UnaryOp::Neg => Value::Number(-v.to_number()),
                    UnaryOp::Plus => Value::Number(v.to_number()),
                    UnaryOp::Not => Value::Bool(!v.truthy()),
                    UnaryOp::Typeof => Value::str(v.type_of()),
                }
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left);
                let r = self.eval(right);
                binary(*op, l, r)
            }
            Expr::Logical { op, left, right } => {
                let l = self.eval(left);
                let short = match op {
                    LogicalOp::And => !l.truthy(),
                    LogicalOp::Or => l.truthy(),
                    LogicalOp::Coalesce => !matches!(l, Value::Undefined | Value::Null),
                };
                if short {
                    l
                } else {
                    self.eval(right)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test).truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Call { callee, arguments } => self.call(callee, arguments),
            Expr::Member { object, property } => {
                if let Expr::Ident { name } = object.as_ref() {
                    if name == "Math" && !self.is_bound(name) {
                        return math_constant(property);
                    }
                }
                let target = self.eval(object);
                member(&target, property)
            }
            Expr::Index { object, index } => {
                let target = self.eval(object);
                let key = self.eval(index);
                match (&target, &key) {
                    (Value::Array(items), _) => index_of(key.to_number())
                        .and_then(|i| items.get(i).cloned())
                        .unwrap_or_default(),
                    (Value::Str(s), _) => index_of(key.to_number())
                        .and_then(|i| s.chars().nth(i))
                        .map(|c| Value::Str(c.to_string()))
                        .unwrap_or_default(),
                    _ => member(&target, &key.to_js_string()),
                }
            }
            Expr::Lambda { .. } => {
                tracing::warn!("function values are only supported as array method arguments");
                Value::Undefined
            }
        }
    }

    fn call(&mut self, callee: &Callee, arguments: &[Expr]) -> Value {
        match callee {
            Callee::Function { name } => {
                let args: Vec<Value> = arguments.iter().map(|a| self.eval(a)).collect();
                global_function(name, &args)
            }
            Callee::Method { object, method } => {
                if let Expr::Ident { name } = object.as_ref() {
                    if !self.is_bound(name) {
                        let args: Vec<Value> = arguments.iter().map(|a| self.eval(a)).collect();
                        match name.as_str() {
                            "Math" => return math_function(method, &args),
                            "console" => {
                                let line = args.iter().map(Value::to_js_string).collect::<Vec<_>>();
                                tracing::debug!(target: "component_console", method = %method, "{}", line.join(" "));
                                return Value::Undefined;
                            }
                            _ => {}
                        }
                    }
                }
                let receiver = self.eval(object);
                self.method(receiver, method, arguments)
            }
        }
    }

    fn call_lambda(&mut self, lambda: &Expr, args: Vec<Value>) -> Value {
        let Expr::Lambda { params, body } = lambda else {
            tracing::warn!("expected a function argument");
            return Value::Undefined;
        };
        let depth = self.locals.len();
        for (i, param) in params.iter().enumerate() {
            self.locals
                .push((param.clone(), args.get(i).cloned().unwrap_or_default()));
        }
        let result = self.eval(body);
        self.locals.truncate(depth);
        result
    }

    fn method(&mut self, receiver: Value, method: &str, arguments: &[Expr]) -> Value {
        if let Value::Array(items) = &receiver {
            if matches!(method, "map" | "filter" | "some" | "every") {
                let Some(lambda) = arguments.first() else {
                    return Value::Undefined;
                };
                let mut mapped = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let result =
                        self.call_lambda(lambda, vec![item.clone(), Value::Number(i as f64)]);
                    match method {
                        "map" => mapped.push(result),
                        "filter" if result.truthy() => mapped.push(item.clone()),
                        "some" if result.truthy() => return Value::Bool(true),
                        "every" if !result.truthy() => return Value::Bool(false),
                        _ => {}
                    }
                }
                return match method {
                    "some" => Value::Bool(false),
                    "every" => Value::Bool(true),
                    _ => Value::Array(mapped),
                };
            }
        }

        let args: Vec<Value> = arguments.iter().map(|a| self.eval(a)).collect();
        let arg_str = |i: usize| args.get(i).map(Value::to_js_string).unwrap_or_default();
        match (&receiver, method) {
            (_, "toString") => Value::Str(receiver.to_js_string()),
            (Value::Str(s), "toUpperCase") => Value::Str(s.to_uppercase()),
            (Value::Str(s), "toLowerCase") => Value::Str(s.to_lowercase()),
            (Value::Str(s), "trim") => Value::Str(s.trim().to_string()),
            (Value::Str(s), "includes") => Value::Bool(s.contains(&arg_str(0))),
            (Value::Str(s), "startsWith") => Value::Bool(s.starts_with(&arg_str(0))),
            (Value::Str(s), "endsWith") => Value::Bool(s.ends_with(&arg_str(0))),
            (Value::Number(n), "toFixed") => {
                let digits = args.first().map(|d| d.to_number()).unwrap_or(0.0);
                let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
                Value::Str(format!("{:.*}", digits, n))
            }
            (Value::Array(items), "join") => {
                let sep = match args.first() {
                    None | Some(Value::Undefined) => ",".to_string(),
                    Some(v) => v.to_js_string(),
                };
                Value::Str(
                    items
                        .iter()
                        .map(|v| match v {
                            Value::Undefined | Value::Null => String::new(),
                            other => other.to_js_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(&sep),
                )
            }
            (Value::Array(items), "includes") => {
                let needle = args.first().cloned().unwrap_or_default();
                Value::Bool(items.iter().any(|v| match (v, &needle) {
                    (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
                    _ => strict_equals(v, &needle),
                }))
            }
            (Value::Array(items), "indexOf") => {
                let needle = args.first().cloned().unwrap_or_default();
                let found = items.iter().position(|v| strict_equals(v, &needle));
                Value::Number(found.map(|i| i as f64).unwrap_or(-1.0))
            }
            _ => {
                tracing::warn!(method, receiver = receiver.type_of(), "unknown method, using undefined");
                Value::Undefined
            }
        }
    }
}

fn index_of(n: f64) -> Option<usize> {
    if n >= 0.0 && n.fract() == 0.0 {
        Some(n as usize)
    } else {
        None
    }
}

fn member(target: &Value, property: &str) -> Value {
    match (target, property) {
        (Value::Str(s), "length") => Value::Number(s.encode_utf16().count() as f64),
        (Value::Array(items), "length") => Value::Number(items.len() as f64),
        _ => {
            tracing::warn!(property, receiver = target.type_of(), "unknown property, using undefined");
            Value::Undefined
        }
    }
}

fn math_constant(name: &str) -> Value {
    match name {
        "PI" => Value::Number(std::f64::consts::PI),
        "E" => Value::Number(std::f64::consts::E),
        _ => {
            tracing::warn!(name, "unknown Math constant");
            Value::Undefined
        }
    }
}

fn math_function(name: &str, args: &[Value]) -> Value {
    let nums: Vec<f64> = args.iter().map(Value::to_number).collect();
    let first = nums.first().copied().unwrap_or(f64::NAN);
    let n = match name {
        "max" => nums.iter().copied().fold(f64::NEG_INFINITY, |acc, x| {
            if acc.is_nan() || x.is_nan() { f64::NAN } else { acc.max(x) }
        }),
        "min" => nums.iter().copied().fold(f64::INFINITY, |acc, x| {
            if acc.is_nan() || x.is_nan() { f64::NAN } else { acc.min(x) }
        }),
        "abs" => first.abs(),
        "floor" => first.floor(),
        "ceil" => first.ceil(),
        // JS rounds half up, towards positive infinity.
        "round" => (first + 0.5).floor(),
        "trunc" => first.trunc(),
        "sign" => {
            if first.is_nan() || first == 0.0 {
                first
            } else {
                first.signum()
            }
        }
        "sqrt" => first.sqrt(),
        "pow" => first.powf(nums.get(1).copied().unwrap_or(f64::NAN)),
        _ => {
            tracing::warn!(name, "unknown Math function");
            return Value::Undefined;
        }
    };
    Value::Number(n)
}

fn global_function(name: &str, args: &[Value]) -> Value {
    let first = args.first().cloned().unwrap_or_default();
    match name {
        "String" => Value::Str(if args.is_empty() { String::new() } else { first.to_js_string() }),
        "Number" => Value::Number(if args.is_empty() { 0.0 } else { first.to_number() }),
        "Boolean" => Value::Bool(first.truthy()),
        "isNaN" => Value::Bool(first.to_number().is_nan()),
        "parseFloat" => Value::Number(parse_float_prefix(first.to_js_string().trim_start())),
        "parseInt" => {
            let radix = args.get(1).map(Value::to_number).filter(|r| !r.is_nan() && *r != 0.0);
            Value::Number(parse_int_prefix(
                first.to_js_string().trim_start(),
                radix.map(|r| r as u32).unwrap_or(10),
            ))
        }
        _ => {
            tracing::warn!(name, "unknown global function");
            Value::Undefined
        }
    }
}

fn is_numeric_literal(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
}

fn parse_float_prefix(s: &str) -> f64 {
    if s.starts_with("Infinity") || s.starts_with("+Infinity") {
        return f64::INFINITY;
    }
    if s.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    let mut best = f64::NAN;
    for (i, c) in s.char_indices() {
        if !c.is_ascii_digit() && !matches!(c, '+' | '-' | '.' | 'e' | 'E') {
            break;
        }
        if let Ok(v) = s[..i + c.len_utf8()].parse::<f64>() {
            best = v;
        }
    }
    best
}

fn parse_int_prefix(s: &str, radix: u32) -> f64 {
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let mut value: Option<f64> = None;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => value = Some(value.unwrap_or(0.0) * f64::from(radix) + f64::from(d)),
            None => break,
        }
    }
    match value {
        Some(v) if negative => -v,
        Some(v) => v,
        None => f64::NAN,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATEMENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Run a handler body against an instance's values. Names passed to
/// `requestUpdate` statements are appended to `requested`.
pub fn execute(body: &[Stmt], values: &mut HashMap<String, Value>, requested: &mut Vec<String>) {
    for stmt in body {
        match stmt {
            Stmt::Assign { target, op, value } => {
                let rhs = Evaluator::new(values).eval(value);
                let next = match op.binary() {
                    None => rhs,
                    Some(bin) => {
                        let current = values.get(target).cloned().unwrap_or_default();
                        binary(bin, current, rhs)
                    }
                };
                values.insert(target.clone(), next);
            }
            Stmt::Update { target, op } => {
                let current = values.get(target).map(Value::to_number).unwrap_or(f64::NAN);
                let next = match op {
                    UpdateOp::Increment => current + 1.0,
                    UpdateOp::Decrement => current - 1.0,
                };
                values.insert(target.clone(), Value::Number(next));
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                let branch = if Evaluator::new(values).eval(test).truthy() {
                    consequent
                } else {
                    alternate
                };
                execute(branch, values, requested);
            }
            Stmt::Eval { expr } => {
                Evaluator::new(values).eval(expr);
            }
            Stmt::RequestUpdate { names } => {
                for name in names {
                    if !requested.contains(name) {
                        requested.push(name.clone());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{parse_expression, parse_statements};

    fn eval_with(code: &str, values: &[(&str, Value)]) -> Value {
        let map: HashMap<String, Value> = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let expr = parse_expression(code, "test").unwrap();
        Evaluator::new(&map).eval(&expr)
    }

    #[test]
    fn test_integers_print_without_fraction() {
        assert_eq!(Value::Number(4.0).to_js_string(), "4");
        assert_eq!(Value::Number(-0.0).to_js_string(), "0");
        assert_eq!(Value::Number(0.5).to_js_string(), "0.5");
        assert_eq!(Value::Number(f64::NAN).to_js_string(), "NaN");
    }

    #[test]
    fn test_string_concatenation_follows_js() {
        assert_eq!(eval_with("'n=' + count", &[("count", 3.into())]), Value::str("n=3"));
        assert_eq!(eval_with("1 + 2 + '3'", &[]), Value::str("33"));
    }

    #[test]
    fn test_template_and_builtins() {
        let v = eval_with(
            "`${name.toUpperCase()} has ${Math.max(a, b)} (${(a / 3).toFixed(2)})`",
            &[("name", "ada".into()), ("a", 1.into()), ("b", 7.into())],
        );
        assert_eq!(v, Value::str("ADA has 7 (0.33)"));
    }

    #[test]
    fn test_array_methods_with_lambdas() {
        let items = Value::Array(vec![1.into(), 2.into(), 3.into()]);
        let v = eval_with("items.filter(x => x > 1).map(x => x * scale).join('-')", &[
            ("items", items),
            ("scale", 10.into()),
        ]);
        assert_eq!(v, Value::str("20-30"));
    }

    #[test]
    fn test_parse_int_and_float_prefixes() {
        assert_eq!(eval_with("parseInt('42px')", &[]), Value::Number(42.0));
        assert_eq!(eval_with("parseFloat('3.5em')", &[]), Value::Number(3.5));
        assert!(eval_with("parseInt('px')", &[]).to_number().is_nan());
    }

    #[test]
    fn test_execute_handler_body() {
        let mut values = HashMap::new();
        values.insert("count".to_string(), Value::Number(1.0));
        values.insert("log".to_string(), Value::str(""));
        let body = parse_statements("count += 2; if (count > 2) { log = 'big' }", "h").unwrap();
        let mut requested = Vec::new();
        execute(&body, &mut values, &mut requested);
        assert_eq!(values["count"], Value::Number(3.0));
        assert_eq!(values["log"], Value::str("big"));
        assert!(requested.is_empty());
    }
}
