//! Read-only operators over [`Value`]s.

use std::sync::Arc;

use crate::error::{SandboxError, SandboxResult};
use crate::methods;
use crate::natives::{check_size, iterate};
use crate::value::{dict_get, Number, Value};
use crate::SandboxOptions;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
        }
    }

    /// Operator of an augmented assignment token such as `+=`.
    pub(crate) fn from_augmented(text: &str) -> Option<BinOp> {
        let op = match text.strip_suffix('=')? {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "//" => BinOp::FloorDiv,
            "%" => BinOp::Mod,
            "**" => BinOp::Pow,
            "<<" => BinOp::LShift,
            ">>" => BinOp::RShift,
            "&" => BinOp::BitAnd,
            "|" => BinOp::BitOr,
            "^" => BinOp::BitXor,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Pos,
    Invert,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }
}

fn overflow() -> SandboxError {
    SandboxError::eval("OverflowError: integer overflow")
}

fn zero_division(message: &str) -> SandboxError {
    SandboxError::eval(format!("ZeroDivisionError: {message}"))
}

fn unsupported(op: BinOp, lhs: &Value, rhs: &Value) -> SandboxError {
    SandboxError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        lhs.type_name(),
        rhs.type_name()
    ))
}

pub(crate) fn binary(
    op: BinOp,
    lhs: &Value,
    rhs: &Value,
    options: &SandboxOptions,
) -> SandboxResult<Value> {
    if let (Value::Bool(a), Value::Bool(b)) = (lhs, rhs) {
        match op {
            BinOp::BitAnd => return Ok(Value::Bool(a & b)),
            BinOp::BitOr => return Ok(Value::Bool(a | b)),
            BinOp::BitXor => return Ok(Value::Bool(a ^ b)),
            _ => {}
        }
    }
    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
        return match (a, b) {
            (Number::Int(x), Number::Int(y)) => int_op(op, x, y),
            _ => float_op(op, a.as_f64(), b.as_f64()).ok_or_else(|| unsupported(op, lhs, rhs))?,
        };
    }

    let result = match (op, lhs, rhs) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            ensure_len(a.chars().count().saturating_add(b.chars().count()), options)?;
            Value::str(format!("{a}{b}"))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            ensure_len(a.len().saturating_add(b.len()), options)?;
            Value::List(a.iter().chain(b.iter()).cloned().collect())
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            ensure_len(a.len().saturating_add(b.len()), options)?;
            Value::Tuple(a.iter().chain(b.iter()).cloned().collect())
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let count = repeat_count(n);
            ensure_len(s.chars().count().saturating_mul(count), options)?;
            Value::str(s.repeat(count))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if n.as_int().is_some() =>
        {
            Value::List(repeat_items(items, repeat_count(n), options)?)
        }
        (BinOp::Mul, Value::Tuple(items), n) | (BinOp::Mul, n, Value::Tuple(items))
            if n.as_int().is_some() =>
        {
            Value::Tuple(repeat_items(items, repeat_count(n), options)?)
        }
        (BinOp::BitOr, Value::Dict(a), Value::Dict(b)) => {
            let mut entries: Vec<(Value, Value)> = a.to_vec();
            for (key, value) in b.iter() {
                dict_insert(&mut entries, key.clone(), value.clone())?;
            }
            ensure_len(entries.len(), options)?;
            Value::dict(entries)
        }
        _ => return Err(unsupported(op, lhs, rhs)),
    };
    Ok(result)
}

fn repeat_count(n: &Value) -> usize {
    n.as_int()
        .map(|n| usize::try_from(n.max(0)).unwrap_or(usize::MAX))
        .unwrap_or(0)
}

fn repeat_items(items: &[Value], count: usize, options: &SandboxOptions) -> SandboxResult<Arc<[Value]>> {
    ensure_len(items.len().saturating_mul(count), options)?;
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    Ok(out.into())
}

fn ensure_len(len: usize, options: &SandboxOptions) -> SandboxResult<()> {
    check_size(len, options)
}

fn int_op(op: BinOp, x: i64, y: i64) -> SandboxResult<Value> {
    let value = match op {
        BinOp::Add => Value::Int(x.checked_add(y).ok_or_else(overflow)?),
        BinOp::Sub => Value::Int(x.checked_sub(y).ok_or_else(overflow)?),
        BinOp::Mul => Value::Int(x.checked_mul(y).ok_or_else(overflow)?),
        BinOp::Div => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            Value::Float(x as f64 / y as f64)
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            Value::Int(floor_div(x, y).ok_or_else(overflow)?)
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_division("integer modulo by zero"));
            }
            Value::Int(floor_mod(x, y))
        }
        BinOp::Pow => {
            if y >= 0 {
                let exp = u32::try_from(y).map_err(|_| overflow())?;
                Value::Int(x.checked_pow(exp).ok_or_else(overflow)?)
            } else if x == 0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            } else {
                Value::Float((x as f64).powf(y as f64))
            }
        }
        BinOp::LShift => {
            if y < 0 {
                return Err(SandboxError::value_error("negative shift count"));
            }
            if x == 0 {
                Value::Int(0)
            } else {
                let shift = u32::try_from(y).ok().filter(|s| *s < 64).ok_or_else(overflow)?;
                let shifted = x << shift;
                if shifted >> shift != x {
                    return Err(overflow());
                }
                Value::Int(shifted)
            }
        }
        BinOp::RShift => {
            if y < 0 {
                return Err(SandboxError::value_error("negative shift count"));
            }
            if y >= 64 {
                Value::Int(if x < 0 { -1 } else { 0 })
            } else {
                Value::Int(x >> y)
            }
        }
        BinOp::BitAnd => Value::Int(x & y),
        BinOp::BitOr => Value::Int(x | y),
        BinOp::BitXor => Value::Int(x ^ y),
    };
    Ok(value)
}

/// `None` for operators that have no float meaning (bitwise ops).
fn float_op(op: BinOp, x: f64, y: f64) -> Option<SandboxResult<Value>> {
    let value = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Some(Err(zero_division("float division by zero")));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Some(Err(zero_division("float floor division by zero")));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Some(Err(zero_division("float modulo")));
            }
            let r = x % y;
            if r != 0.0 && (r < 0.0) != (y < 0.0) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Some(Err(zero_division("0.0 cannot be raised to a negative power")));
            }
            if x < 0.0 && y.fract() != 0.0 {
                return Some(Err(SandboxError::value_error(
                    "negative number cannot be raised to a fractional power",
                )));
            }
            x.powf(y)
        }
        BinOp::LShift | BinOp::RShift | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
            return None
        }
    };
    Some(Ok(Value::Float(value)))
}

pub(crate) fn floor_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if x % y != 0 && ((x < 0) != (y < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

pub(crate) fn floor_mod(x: i64, y: i64) -> i64 {
    // `checked_rem` only fails for MIN % -1, whose result is 0.
    let r = x.checked_rem(y).unwrap_or(0);
    if r != 0 && ((r < 0) != (y < 0)) {
        r + y
    } else {
        r
    }
}

pub(crate) fn unary(op: UnaryOp, operand: &Value) -> SandboxResult<Value> {
    let bad = |symbol: &str| {
        SandboxError::type_error(format!(
            "bad operand type for unary {symbol}: '{}'",
            operand.type_name()
        ))
    };
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
        UnaryOp::Neg => match operand.as_number() {
            Some(Number::Int(i)) => Ok(Value::Int(i.checked_neg().ok_or_else(overflow)?)),
            Some(Number::Float(f)) => Ok(Value::Float(-f)),
            None => Err(bad("-")),
        },
        UnaryOp::Pos => match operand.as_number() {
            Some(Number::Int(i)) => Ok(Value::Int(i)),
            Some(Number::Float(f)) => Ok(Value::Float(f)),
            None => Err(bad("+")),
        },
        UnaryOp::Invert => match operand.as_int() {
            Some(i) => Ok(Value::Int(!i)),
            None => Err(bad("~")),
        },
    }
}

pub(crate) fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> SandboxResult<bool> {
    let ordering = |expected: &dyn Fn(std::cmp::Ordering) -> bool| -> SandboxResult<bool> {
        match lhs.compare_to(rhs) {
            Some(ordering) => Ok(expected(ordering)),
            // NaN compares false against everything.
            None if lhs.as_number().is_some() && rhs.as_number().is_some() => Ok(false),
            None => Err(SandboxError::type_error(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                lhs.type_name(),
                rhs.type_name()
            ))),
        }
    };
    match op {
        CmpOp::Eq => Ok(lhs.equals(rhs)),
        CmpOp::NotEq => Ok(!lhs.equals(rhs)),
        CmpOp::Lt => ordering(&|o| o.is_lt()),
        CmpOp::LtE => ordering(&|o| o.is_le()),
        CmpOp::Gt => ordering(&|o| o.is_gt()),
        CmpOp::GtE => ordering(&|o| o.is_ge()),
        CmpOp::In => contains(rhs, lhs),
        CmpOp::NotIn => contains(rhs, lhs).map(|found| !found),
        CmpOp::Is => Ok(identical(lhs, rhs)),
        CmpOp::IsNot => Ok(!identical(lhs, rhs)),
    }
}

pub(crate) fn contains(container: &Value, needle: &Value) -> SandboxResult<bool> {
    match container {
        Value::Str(haystack) => match needle {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(SandboxError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|item| item.equals(needle))),
        Value::Dict(entries) => {
            ensure_hashable(needle)?;
            Ok(dict_get(entries, needle).is_some())
        }
        other => Err(SandboxError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn identical(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b),
        (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => Arc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
        (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
        (Value::Native(a), Value::Native(b)) => a == b,
        _ => false,
    }
}

/// Attribute read without error reporting; used by `getattr`/`hasattr`.
pub(crate) fn attr(value: &Value, name: &str) -> Option<Value> {
    match value {
        Value::Object(object) => object.field(name).cloned(),
        _ => None,
    }
}

pub(crate) fn get_attr(value: &Value, name: &str) -> SandboxResult<Value> {
    if let Some(found) = attr(value, name) {
        return Ok(found);
    }
    if methods::is_known(value, name) {
        return Err(SandboxError::eval(format!(
            "method '{name}' of '{}' objects can only be called directly",
            value.type_name()
        )));
    }
    Err(attribute_error(value, name))
}

pub(crate) fn attribute_error(value: &Value, name: &str) -> SandboxError {
    SandboxError::eval(format!(
        "AttributeError: '{}' object has no attribute '{name}'",
        value.type_name()
    ))
}

pub(crate) fn get_item(value: &Value, index: &Value) -> SandboxResult<Value> {
    match value {
        Value::List(items) | Value::Tuple(items) => {
            let kind = value.type_name();
            let Some(i) = index.as_int() else {
                return Err(SandboxError::type_error(format!(
                    "{kind} indices must be integers or slices, not {}",
                    index.type_name()
                )));
            };
            normalize_index(i, items.len())
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| SandboxError::eval(format!("IndexError: {kind} index out of range")))
        }
        Value::Str(s) => {
            let Some(i) = index.as_int() else {
                return Err(SandboxError::type_error(format!(
                    "string indices must be integers, not '{}'",
                    index.type_name()
                )));
            };
            let len = s.chars().count();
            normalize_index(i, len)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::str(c.to_string()))
                .ok_or_else(|| SandboxError::eval("IndexError: string index out of range"))
        }
        Value::Dict(entries) => {
            ensure_hashable(index)?;
            dict_get(entries, index)
                .cloned()
                .ok_or_else(|| SandboxError::eval(format!("KeyError: {}", index.repr())))
        }
        other => Err(SandboxError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn normalize_index(i: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let i = if i < 0 { i.checked_add(len)? } else { i };
    if (0..len).contains(&i) {
        usize::try_from(i).ok()
    } else {
        None
    }
}

pub(crate) fn get_slice(
    value: &Value,
    lower: &Value,
    upper: &Value,
    step: &Value,
) -> SandboxResult<Value> {
    let bound = |v: &Value| -> SandboxResult<Option<i64>> {
        match v {
            Value::None => Ok(None),
            other => other.as_int().map(Some).ok_or_else(|| {
                SandboxError::type_error("slice indices must be integers or None")
            }),
        }
    };
    let (lower, upper) = (bound(lower)?, bound(upper)?);
    let step = bound(step)?.unwrap_or(1);
    if step == 0 {
        return Err(SandboxError::value_error("slice step cannot be zero"));
    }

    match value {
        Value::List(items) => Ok(Value::List(
            slice_indices(items.len(), lower, upper, step)
                .into_iter()
                .map(|i| items[i].clone())
                .collect(),
        )),
        Value::Tuple(items) => Ok(Value::Tuple(
            slice_indices(items.len(), lower, upper, step)
                .into_iter()
                .map(|i| items[i].clone())
                .collect(),
        )),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::str(
                slice_indices(chars.len(), lower, upper, step)
                    .into_iter()
                    .map(|i| chars[i])
                    .collect::<String>(),
            ))
        }
        Value::Dict(_) => Err(SandboxError::type_error("unhashable type: 'slice'")),
        other => Err(SandboxError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Element positions selected by `[lower:upper:step]` on a sequence of
/// `len` elements. `step` is non-zero.
fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<usize> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let clamp = |bound: i64, low: i64, high: i64| -> i64 {
        let bound = if bound < 0 { bound.saturating_add(len) } else { bound };
        bound.clamp(low, high)
    };

    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |b| clamp(b, 0, len));
        let stop = upper.map_or(len, |b| clamp(b, 0, len));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i = match i.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
    } else {
        let start = lower.map_or(len - 1, |b| clamp(b, -1, len - 1));
        let stop = upper.map_or(-1, |b| clamp(b, -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i = match i.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
    }
    out
}

/// Inserts or replaces `key`, keeping first-insertion order.
pub(crate) fn dict_insert(
    entries: &mut Vec<(Value, Value)>,
    key: Value,
    value: Value,
) -> SandboxResult<()> {
    ensure_hashable(&key)?;
    match entries.iter_mut().find(|(existing, _)| existing.equals(&key)) {
        Some(slot) => slot.1 = value,
        None => entries.push((key, value)),
    }
    Ok(())
}

/// Lists and dicts, and tuples holding either, cannot be dict keys.
pub(crate) fn ensure_hashable(key: &Value) -> SandboxResult<()> {
    match key {
        Value::List(_) | Value::Dict(_) => Err(SandboxError::type_error(format!(
            "unhashable type: '{}'",
            key.type_name()
        ))),
        Value::Tuple(items) => items.iter().try_for_each(ensure_hashable),
        _ => Ok(()),
    }
}

/// Unpacks an iterable into exactly `expected` values.
pub(crate) fn unpack(value: &Value, expected: usize) -> SandboxResult<Vec<Value>> {
    let items = iterate(value)?;
    if items.len() != expected {
        let problem = if items.len() < expected {
            "not enough"
        } else {
            "too many"
        };
        return Err(SandboxError::value_error(format!(
            "{problem} values to unpack (expected {expected}, got {})",
            items.len()
        )));
    }
    Ok(items)
}
