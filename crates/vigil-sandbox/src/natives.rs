//! Built-in routines visible to expressions.
//!
//! Only the allow-listed routines can be called. The denied ones still
//! resolve by name so that calling them reports a safety violation instead of
//! an unknown name.

use std::sync::Arc;

use crate::compile::is_reserved_name;
use crate::error::{SandboxError, SandboxResult};
use crate::ops::{self, dict_insert, BinOp};
use crate::value::{Number, Value};
use crate::SandboxOptions;

const ALLOWED: &[&str] = &[
    "abs", "all", "any", "bin", "bool", "chr", "dict", "divmod", "enumerate", "float", "getattr",
    "hasattr", "hex", "int", "len", "list", "max", "min", "oct", "ord", "pow", "range", "repr",
    "reversed", "round", "sorted", "str", "sum", "tuple", "type", "zip",
];

const DENIED: &[&str] = &[
    "__import__", "breakpoint", "compile", "delattr", "eval", "exec", "exit", "globals", "help",
    "input", "locals", "memoryview", "open", "print", "quit", "setattr", "vars",
];

const TYPES: &[&str] = &[
    "bool", "dict", "enumerate", "float", "int", "list", "range", "reversed", "str", "tuple", "type",
    "zip",
];

pub(crate) fn lookup(name: &str) -> Option<&'static str> {
    ALLOWED
        .iter()
        .chain(DENIED.iter())
        .find(|candidate| **candidate == name)
        .copied()
}

pub(crate) fn is_allowed(name: &str) -> bool {
    ALLOWED.contains(&name)
}

pub(crate) fn is_type(name: &str) -> bool {
    TYPES.contains(&name)
}

pub(crate) fn check_size(len: usize, options: &SandboxOptions) -> SandboxResult<()> {
    if len > options.max_collection_len {
        return Err(SandboxError::eval(format!(
            "result of {len} elements exceeds the limit of {}",
            options.max_collection_len
        )));
    }
    Ok(())
}

pub(crate) fn check_value_size(value: &Value, options: &SandboxOptions) -> SandboxResult<()> {
    match value {
        Value::Str(s) if s.len() > options.max_collection_len => {
            check_size(s.chars().count(), options)
        }
        Value::List(items) | Value::Tuple(items) => check_size(items.len(), options),
        Value::Dict(entries) => check_size(entries.len(), options),
        _ => Ok(()),
    }
}

/// Elements produced by iterating `value`: characters of a string, items of
/// a sequence, keys of a dict.
pub(crate) fn iterate(value: &Value) -> SandboxResult<Vec<Value>> {
    match value {
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Value::List(items) | Value::Tuple(items) => Ok(items.to_vec()),
        Value::Dict(entries) => Ok(entries.iter().map(|(key, _)| key.clone()).collect()),
        other => Err(SandboxError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

struct Args {
    name: &'static str,
    positional: Vec<Value>,
    keywords: Vec<(Arc<str>, Value)>,
}

impl Args {
    fn arity(&self, min: usize, max: usize) -> SandboxResult<()> {
        let given = self.positional.len();
        if (min..=max).contains(&given) {
            return Ok(());
        }
        let expected = if min == max {
            format!("exactly {min} argument{}", if min == 1 { "" } else { "s" })
        } else if max == usize::MAX {
            format!("at least {min} argument{}", if min == 1 { "" } else { "s" })
        } else {
            format!("from {min} to {max} arguments")
        };
        Err(SandboxError::type_error(format!(
            "{}() takes {expected} ({given} given)",
            self.name
        )))
    }

    fn keyword(&mut self, key: &str) -> Option<Value> {
        let idx = self.keywords.iter().position(|(k, _)| &**k == key)?;
        Some(self.keywords.remove(idx).1)
    }

    /// Positional argument `idx`, or the keyword of the same meaning.
    fn optional(&mut self, idx: usize, key: &str) -> Option<Value> {
        let by_keyword = self.keyword(key);
        self.positional.get(idx).cloned().or(by_keyword)
    }

    fn finish(&self) -> SandboxResult<()> {
        match self.keywords.first() {
            Some((key, _)) => Err(SandboxError::type_error(format!(
                "'{key}' is an invalid keyword argument for {}()",
                self.name
            ))),
            None => Ok(()),
        }
    }

    fn int(&self, idx: usize) -> SandboxResult<i64> {
        let value = &self.positional[idx];
        value.as_int().ok_or_else(|| not_an_integer(value))
    }
}

fn not_an_integer(value: &Value) -> SandboxError {
    SandboxError::type_error(format!(
        "'{}' object cannot be interpreted as an integer",
        value.type_name()
    ))
}

/// Calls an allow-listed routine. Denied routines are a safety violation.
pub(crate) fn call(
    name: &'static str,
    positional: Vec<Value>,
    keywords: Vec<(Arc<str>, Value)>,
    options: &SandboxOptions,
) -> SandboxResult<Value> {
    if !is_allowed(name) {
        return Err(SandboxError::safety(format!("call to '{name}' is not allowed")));
    }
    let mut args = Args {
        name,
        positional,
        keywords,
    };

    let value = match name {
        "abs" => {
            args.arity(1, 1)?;
            match args.positional[0].as_number() {
                Some(Number::Int(i)) => Value::Int(
                    i.checked_abs()
                        .ok_or_else(|| SandboxError::eval("OverflowError: integer overflow"))?,
                ),
                Some(Number::Float(f)) => Value::Float(f.abs()),
                None => {
                    return Err(SandboxError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        args.positional[0].type_name()
                    )))
                }
            }
        }
        "all" => {
            args.arity(1, 1)?;
            Value::Bool(iterate(&args.positional[0])?.iter().all(Value::truthy))
        }
        "any" => {
            args.arity(1, 1)?;
            Value::Bool(iterate(&args.positional[0])?.iter().any(Value::truthy))
        }
        "bin" | "hex" | "oct" => {
            args.arity(1, 1)?;
            let i = args.int(0)?;
            let digits = match name {
                "bin" => format!("0b{:b}", i.unsigned_abs()),
                "hex" => format!("0x{:x}", i.unsigned_abs()),
                _ => format!("0o{:o}", i.unsigned_abs()),
            };
            Value::str(if i < 0 { format!("-{digits}") } else { digits })
        }
        "bool" => {
            args.arity(0, 1)?;
            Value::Bool(args.positional.first().is_some_and(Value::truthy))
        }
        "chr" => {
            args.arity(1, 1)?;
            let i = args.int(0)?;
            let c = u32::try_from(i)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| SandboxError::value_error("chr() arg not in range(0x110000)"))?;
            Value::str(c.to_string())
        }
        "dict" => {
            args.arity(0, 1)?;
            let mut entries = Vec::new();
            if let Some(source) = args.positional.first() {
                match source {
                    Value::Dict(existing) => entries.extend(existing.iter().cloned()),
                    other => {
                        for (idx, item) in iterate(other)?.iter().enumerate() {
                            let pair = match item {
                                Value::List(pair) | Value::Tuple(pair) if pair.len() == 2 => pair,
                                _ => {
                                    return Err(SandboxError::type_error(format!(
                                        "cannot convert dictionary update sequence element #{idx} to a sequence"
                                    )))
                                }
                            };
                            dict_insert(&mut entries, pair[0].clone(), pair[1].clone())?;
                        }
                    }
                }
            }
            for (key, value) in std::mem::take(&mut args.keywords) {
                dict_insert(&mut entries, Value::Str(key), value)?;
            }
            Value::dict(entries)
        }
        "divmod" => {
            args.arity(2, 2)?;
            let (a, b) = (&args.positional[0], &args.positional[1]);
            Value::tuple([
                ops::binary(BinOp::FloorDiv, a, b, options)?,
                ops::binary(BinOp::Mod, a, b, options)?,
            ])
        }
        "enumerate" => {
            args.arity(1, 2)?;
            let start = match args.optional(1, "start") {
                Some(start) => start.as_int().ok_or_else(|| not_an_integer(&start))?,
                None => 0,
            };
            let items = iterate(&args.positional[0])?;
            let mut out = Vec::with_capacity(items.len());
            for (offset, item) in items.into_iter().enumerate() {
                let index = i64::try_from(offset)
                    .ok()
                    .and_then(|offset| start.checked_add(offset))
                    .ok_or_else(|| SandboxError::eval("OverflowError: integer overflow"))?;
                out.push(Value::tuple([Value::Int(index), item]));
            }
            Value::list(out)
        }
        "float" => {
            args.arity(0, 1)?;
            match args.positional.first() {
                None => Value::Float(0.0),
                Some(value) => Value::Float(to_float(value)?),
            }
        }
        "getattr" => {
            args.arity(2, 3)?;
            let name = attr_name(&args.positional[1])?;
            match ops::attr(&args.positional[0], name) {
                Some(found) => found,
                None => match args.positional.get(2) {
                    Some(default) => default.clone(),
                    None => return Err(ops::attribute_error(&args.positional[0], name)),
                },
            }
        }
        "hasattr" => {
            args.arity(2, 2)?;
            let name = attr_name(&args.positional[1])?;
            Value::Bool(ops::attr(&args.positional[0], name).is_some())
        }
        "int" => {
            args.arity(0, 2)?;
            let base = args.optional(1, "base");
            match (args.positional.first(), base) {
                (None, None) => Value::Int(0),
                (None, Some(_)) => {
                    return Err(SandboxError::type_error("int() missing string argument"))
                }
                (Some(Value::Str(text)), base) => {
                    let base = match base {
                        Some(base) => base.as_int().ok_or_else(|| not_an_integer(&base))?,
                        None => 10,
                    };
                    Value::Int(parse_int(text, base)?)
                }
                (Some(_), Some(_)) => {
                    return Err(SandboxError::type_error(
                        "int() can't convert non-string with explicit base",
                    ))
                }
                (Some(value), None) => Value::Int(to_int(value)?),
            }
        }
        "len" => {
            args.arity(1, 1)?;
            let value = &args.positional[0];
            let len = value.len().ok_or_else(|| {
                SandboxError::type_error(format!(
                    "object of type '{}' has no len()",
                    value.type_name()
                ))
            })?;
            Value::Int(i64::try_from(len).unwrap_or(i64::MAX))
        }
        "list" => {
            args.arity(0, 1)?;
            match args.positional.first() {
                Some(value) => Value::list(iterate(value)?),
                None => Value::list([]),
            }
        }
        "tuple" => {
            args.arity(0, 1)?;
            match args.positional.first() {
                Some(value) => Value::tuple(iterate(value)?),
                None => Value::tuple([]),
            }
        }
        "max" | "min" => extreme(&mut args, options)?,
        "ord" => {
            args.arity(1, 1)?;
            match &args.positional[0] {
                Value::Str(s) => {
                    let mut chars = s.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Value::Int(i64::from(u32::from(c))),
                        _ => {
                            return Err(SandboxError::type_error(format!(
                                "ord() expected a character, but string of length {} found",
                                s.chars().count()
                            )))
                        }
                    }
                }
                other => {
                    return Err(SandboxError::type_error(format!(
                        "ord() expected string of length 1, but {} found",
                        other.type_name()
                    )))
                }
            }
        }
        "pow" => {
            args.arity(2, 3)?;
            match args.positional.get(2) {
                None => ops::binary(BinOp::Pow, &args.positional[0], &args.positional[1], options)?,
                Some(_) => Value::Int(mod_pow(args.int(0)?, args.int(1)?, args.int(2)?)?),
            }
        }
        "range" => {
            args.arity(1, 3)?;
            let (start, stop, step) = match args.positional.len() {
                1 => (0, args.int(0)?, 1),
                2 => (args.int(0)?, args.int(1)?, 1),
                _ => (args.int(0)?, args.int(1)?, args.int(2)?),
            };
            Value::list(range(start, stop, step, options)?)
        }
        "repr" => {
            args.arity(1, 1)?;
            Value::str(args.positional[0].repr())
        }
        "str" => {
            args.arity(0, 1)?;
            match args.positional.first() {
                Some(value) => Value::str(value.to_string()),
                None => Value::str(""),
            }
        }
        "reversed" => {
            args.arity(1, 1)?;
            match &args.positional[0] {
                value @ (Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Dict(_)) => {
                    let mut items = iterate(value)?;
                    items.reverse();
                    Value::list(items)
                }
                other => {
                    return Err(SandboxError::type_error(format!(
                        "'{}' object is not reversible",
                        other.type_name()
                    )))
                }
            }
        }
        "round" => {
            args.arity(1, 2)?;
            let ndigits = args.optional(1, "ndigits").filter(|v| !matches!(v, Value::None));
            let ndigits = match ndigits {
                Some(n) => Some(n.as_int().ok_or_else(|| not_an_integer(&n))?),
                None => None,
            };
            round(&args.positional[0], ndigits)?
        }
        "sorted" => {
            args.arity(1, 1)?;
            let key = args.keyword("key");
            let reverse = args.keyword("reverse").is_some_and(|v| v.truthy());
            args.finish()?;
            Value::list(sorted(iterate(&args.positional[0])?, key.as_ref(), reverse, options)?)
        }
        "sum" => {
            args.arity(1, 2)?;
            let start = args.optional(1, "start").unwrap_or(Value::Int(0));
            if matches!(start, Value::Str(_)) {
                return Err(SandboxError::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            let mut total = start;
            for item in iterate(&args.positional[0])? {
                total = ops::binary(BinOp::Add, &total, &item, options)?;
            }
            total
        }
        "type" => {
            args.arity(1, 1)?;
            type_of(&args.positional[0])
        }
        "zip" => {
            let columns = args
                .positional
                .iter()
                .map(iterate)
                .collect::<SandboxResult<Vec<_>>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            Value::list((0..rows).map(|row| Value::tuple(columns.iter().map(|c| c[row].clone()))))
        }
        other => {
            return Err(SandboxError::safety(format!("call to '{other}' is not allowed")));
        }
    };

    args.finish()?;
    check_value_size(&value, options)?;
    Ok(value)
}

fn attr_name(value: &Value) -> SandboxResult<&str> {
    match value {
        Value::Str(name) if is_reserved_name(name) => Err(SandboxError::safety(format!(
            "access to reserved name '{name}' is not allowed"
        ))),
        Value::Str(name) => Ok(&**name),
        other => Err(SandboxError::type_error(format!(
            "attribute name must be string, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(value: &Value) -> SandboxResult<f64> {
    match value {
        Value::Str(text) => {
            let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
            cleaned.parse::<f64>().map_err(|_| {
                SandboxError::value_error(format!(
                    "could not convert string to float: {}",
                    value.repr()
                ))
            })
        }
        other => other.as_number().map(Number::as_f64).ok_or_else(|| {
            SandboxError::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn to_int(value: &Value) -> SandboxResult<i64> {
    match value.as_number() {
        Some(Number::Int(i)) => Ok(i),
        Some(Number::Float(f)) => float_to_int(f),
        None => Err(SandboxError::type_error(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            value.type_name()
        ))),
    }
}

fn float_to_int(f: f64) -> SandboxResult<i64> {
    if f.is_nan() {
        return Err(SandboxError::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(SandboxError::eval(
            "OverflowError: cannot convert float infinity to integer",
        ));
    }
    let truncated = f.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(SandboxError::eval("OverflowError: integer overflow"));
    }
    Ok(truncated as i64)
}

fn parse_int(text: &str, base: i64) -> SandboxResult<i64> {
    let invalid = || {
        SandboxError::value_error(format!(
            "invalid literal for int() with base {base}: {}",
            Value::str(text).repr()
        ))
    };
    if base != 0 && !(2..=36).contains(&base) {
        return Err(SandboxError::value_error("int() base must be >= 2 and <= 36, or 0"));
    }

    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = digits.to_ascii_lowercase();
    let (radix, digits) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &lower[2..]),
        (0 | 8, Some("0o")) => (8, &lower[2..]),
        (0 | 2, Some("0b")) => (2, &lower[2..]),
        (0, _) => (10, lower.as_str()),
        (base, _) => (base as u32, lower.as_str()),
    };
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__")
    {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let magnitude = u64::from_str_radix(&cleaned, radix).map_err(|_| invalid())?;
    let value = if negative {
        0i64.checked_sub_unsigned(magnitude)
    } else {
        i64::try_from(magnitude).ok()
    };
    value.ok_or_else(|| SandboxError::eval("OverflowError: integer overflow"))
}

fn mod_pow(base: i64, exp: i64, modulus: i64) -> SandboxResult<i64> {
    if modulus == 0 {
        return Err(SandboxError::value_error("pow() 3rd argument cannot be 0"));
    }
    if exp < 0 {
        return Err(SandboxError::value_error(
            "pow() 2nd argument cannot be negative when 3rd argument specified",
        ));
    }
    let m = i128::from(modulus);
    let mut result: i128 = 1;
    let mut b = i128::from(base).rem_euclid(m.abs());
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = (result * b).rem_euclid(m.abs());
        }
        b = (b * b).rem_euclid(m.abs());
        e >>= 1;
    }
    result %= m.abs();
    // Result takes the sign of the modulus.
    if m < 0 && result != 0 {
        result += m;
    }
    i64::try_from(result).map_err(|_| SandboxError::eval("OverflowError: integer overflow"))
}

fn range(start: i64, stop: i64, step: i64, options: &SandboxOptions) -> SandboxResult<Vec<Value>> {
    if step == 0 {
        return Err(SandboxError::value_error("range() arg 3 must not be zero"));
    }
    let (start_w, stop_w, step_w) = (i128::from(start), i128::from(stop), i128::from(step));
    let len = if step > 0 && start_w < stop_w {
        (stop_w - start_w - 1) / step_w + 1
    } else if step < 0 && start_w > stop_w {
        (start_w - stop_w - 1) / -step_w + 1
    } else {
        0
    };
    check_size(usize::try_from(len).unwrap_or(usize::MAX), options)?;
    Ok((0..len)
        .map(|i| Value::Int((start_w + i * step_w) as i64))
        .collect())
}

fn round(value: &Value, ndigits: Option<i64>) -> SandboxResult<Value> {
    match (value.as_number(), ndigits) {
        (Some(Number::Int(i)), None) => Ok(Value::Int(i)),
        (Some(Number::Int(i)), Some(n)) if n >= 0 => Ok(Value::Int(i)),
        (Some(Number::Int(i)), Some(n)) => {
            let Some(factor) = u32::try_from(-n).ok().and_then(|n| 10i128.checked_pow(n)) else {
                return Ok(Value::Int(0));
            };
            let x = i128::from(i);
            let mut q = x.div_euclid(factor);
            let r = x.rem_euclid(factor);
            if 2 * r > factor || (2 * r == factor && q % 2 != 0) {
                q += 1;
            }
            i64::try_from(q * factor)
                .map(Value::Int)
                .map_err(|_| SandboxError::eval("OverflowError: integer overflow"))
        }
        (Some(Number::Float(f)), None) => Ok(Value::Int(float_to_int(f.round_ties_even())?)),
        (Some(Number::Float(f)), Some(n)) => {
            if !f.is_finite() {
                return Ok(Value::Float(f));
            }
            let n = i32::try_from(n.clamp(-400, 400)).unwrap_or(0);
            let rounded = if n >= 0 {
                let m = 10f64.powi(n);
                let scaled = f * m;
                if scaled.is_finite() {
                    scaled.round_ties_even() / m
                } else {
                    f
                }
            } else {
                let m = 10f64.powi(-n);
                (f / m).round_ties_even() * m
            };
            Ok(Value::Float(rounded))
        }
        (None, _) => Err(SandboxError::type_error(format!(
            "type {} doesn't define __round__ method",
            value.type_name()
        ))),
    }
}

fn apply_key(key: Option<&Value>, item: &Value, options: &SandboxOptions) -> SandboxResult<Value> {
    match key {
        None | Some(Value::None) => Ok(item.clone()),
        Some(Value::Native(name)) => call(*name, vec![item.clone()], Vec::new(), options),
        Some(other) => Err(SandboxError::type_error(format!(
            "'{}' object is not callable",
            other.type_name()
        ))),
    }
}

fn sorted(
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
    options: &SandboxOptions,
) -> SandboxResult<Vec<Value>> {
    let mut keyed = items
        .into_iter()
        .map(|item| Ok((apply_key(key, &item, options)?, item)))
        .collect::<SandboxResult<Vec<_>>>()?;

    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        let (lhs, rhs) = if reverse { (b, a) } else { (a, b) };
        match ops::compare(ops::CmpOp::Lt, lhs, rhs) {
            Ok(true) => std::cmp::Ordering::Less,
            Ok(false) => match ops::compare(ops::CmpOp::Lt, rhs, lhs) {
                Ok(true) => std::cmp::Ordering::Greater,
                Ok(false) => std::cmp::Ordering::Equal,
                Err(err) => {
                    failure.get_or_insert(err);
                    std::cmp::Ordering::Equal
                }
            },
            Err(err) => {
                failure.get_or_insert(err);
                std::cmp::Ordering::Equal
            }
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(keyed.into_iter().map(|(_, item)| item).collect()),
    }
}

fn extreme(args: &mut Args, options: &SandboxOptions) -> SandboxResult<Value> {
    args.arity(1, usize::MAX)?;
    let key = args.keyword("key");
    let default = args.keyword("default");
    args.finish()?;

    let items = if args.positional.len() == 1 {
        iterate(&args.positional[0])?
    } else {
        if default.is_some() {
            return Err(SandboxError::type_error(format!(
                "Cannot specify a default for {}() with multiple positional arguments",
                args.name
            )));
        }
        args.positional.clone()
    };
    let wanted = if args.name == "max" {
        ops::CmpOp::Gt
    } else {
        ops::CmpOp::Lt
    };

    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let item_key = apply_key(key.as_ref(), &item, options)?;
        let replace = match &best {
            None => true,
            Some((best_key, _)) => ops::compare(wanted, &item_key, best_key)?,
        };
        if replace {
            best = Some((item_key, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(SandboxError::value_error(format!(
            "{}() arg is an empty sequence",
            args.name
        ))),
    }
}

fn type_of(value: &Value) -> Value {
    match value {
        Value::Bool(_) => Value::Native("bool"),
        Value::Int(_) => Value::Native("int"),
        Value::Float(_) => Value::Native("float"),
        Value::Str(_) => Value::Native("str"),
        Value::List(_) => Value::Native("list"),
        Value::Tuple(_) => Value::Native("tuple"),
        Value::Dict(_) => Value::Native("dict"),
        Value::Native(name) if is_type(name) => Value::Native("type"),
        other => Value::str(format!("<class '{}'>", other.type_name())),
    }
}
