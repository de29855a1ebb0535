//! Methods that read their receiver and never change it.

use std::sync::Arc;

use crate::error::{SandboxError, SandboxResult};
use crate::natives::{check_size, iterate};
use crate::ops;
use crate::value::{dict_get, Value};
use crate::SandboxOptions;

const STR_METHODS: &[&str] = &[
    "count", "endswith", "find", "index", "isalpha", "isdigit", "isspace", "join", "lower",
    "lstrip", "replace", "rstrip", "split", "startswith", "strip", "title", "upper",
];

const SEQUENCE_METHODS: &[&str] = &["count", "index"];

const DICT_METHODS: &[&str] = &["get", "items", "keys", "values"];

/// Methods that exist on the receiver's type but change it.
const MUTATING_METHODS: &[(&str, &[&str])] = &[
    (
        "list",
        &["append", "clear", "copy", "extend", "insert", "pop", "remove", "reverse", "sort"],
    ),
    (
        "dict",
        &["clear", "copy", "fromkeys", "pop", "popitem", "setdefault", "update"],
    ),
];

fn pure_methods(receiver: &Value) -> &'static [&'static str] {
    match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) | Value::Tuple(_) => SEQUENCE_METHODS,
        Value::Dict(_) => DICT_METHODS,
        _ => &[],
    }
}

pub(crate) fn is_pure(receiver: &Value, name: &str) -> bool {
    pure_methods(receiver).contains(&name)
}

/// Whether `name` is a method of the receiver's type at all.
pub(crate) fn is_known(receiver: &Value, name: &str) -> bool {
    is_pure(receiver, name)
        || MUTATING_METHODS
            .iter()
            .any(|(ty, methods)| *ty == receiver.type_name() && methods.contains(&name))
}

struct MethodArgs<'a> {
    receiver: &'a Value,
    name: &'a str,
    positional: Vec<Value>,
}

impl MethodArgs<'_> {
    fn arity(&self, min: usize, max: usize) -> SandboxResult<()> {
        let given = self.positional.len();
        if (min..=max).contains(&given) {
            return Ok(());
        }
        Err(SandboxError::type_error(format!(
            "{}.{}() takes {} ({given} given)",
            self.receiver.type_name(),
            self.name,
            if min == max {
                format!("exactly {min} arguments")
            } else {
                format!("from {min} to {max} arguments")
            }
        )))
    }

    fn str_arg(&self, idx: usize) -> SandboxResult<&str> {
        match self.positional.get(idx) {
            Some(Value::Str(s)) => Ok(&**s),
            Some(other) => Err(SandboxError::type_error(format!(
                "must be str, not {}",
                other.type_name()
            ))),
            None => Err(SandboxError::type_error(format!(
                "{}() missing required argument",
                self.name
            ))),
        }
    }

    /// Optional string argument where `None` means "absent".
    fn opt_str_arg(&self, idx: usize) -> SandboxResult<Option<&str>> {
        match self.positional.get(idx) {
            None | Some(Value::None) => Ok(None),
            Some(_) => self.str_arg(idx).map(Some),
        }
    }

    fn opt_int_arg(&self, idx: usize, default: i64) -> SandboxResult<i64> {
        match self.positional.get(idx) {
            None => Ok(default),
            Some(value) => value.as_int().ok_or_else(|| {
                SandboxError::type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    value.type_name()
                ))
            }),
        }
    }
}

/// Calls a method from the pure allow-list. Anything else is a safety
/// violation.
pub(crate) fn call(
    receiver: &Value,
    name: &str,
    positional: Vec<Value>,
    keywords: Vec<(Arc<str>, Value)>,
    options: &SandboxOptions,
) -> SandboxResult<Value> {
    if !is_pure(receiver, name) {
        return Err(SandboxError::safety(format!(
            "call to method '{name}' of '{}' object is not allowed",
            receiver.type_name()
        )));
    }
    if let Some((key, _)) = keywords.first() {
        return Err(SandboxError::type_error(format!(
            "{}() takes no keyword argument '{key}'",
            name
        )));
    }
    let args = MethodArgs {
        receiver,
        name,
        positional,
    };

    let value = match receiver {
        Value::Str(s) => str_method(s, &args, options)?,
        Value::List(items) | Value::Tuple(items) => sequence_method(receiver, items, &args)?,
        Value::Dict(entries) => dict_method(entries, &args)?,
        _ => unreachable_method(receiver, name)?,
    };
    crate::natives::check_value_size(&value, options)?;
    Ok(value)
}

fn unreachable_method(receiver: &Value, name: &str) -> SandboxResult<Value> {
    Err(SandboxError::safety(format!(
        "call to method '{name}' of '{}' object is not allowed",
        receiver.type_name()
    )))
}

fn char_index(s: &str, byte_idx: usize) -> i64 {
    i64::try_from(s[..byte_idx].chars().count()).unwrap_or(i64::MAX)
}

fn str_method(s: &str, args: &MethodArgs<'_>, options: &SandboxOptions) -> SandboxResult<Value> {
    let value = match args.name {
        "upper" => {
            args.arity(0, 0)?;
            Value::str(s.to_uppercase())
        }
        "lower" => {
            args.arity(0, 0)?;
            Value::str(s.to_lowercase())
        }
        "title" => {
            args.arity(0, 0)?;
            let mut out = String::with_capacity(s.len());
            let mut previous_cased = false;
            for c in s.chars() {
                if c.is_alphabetic() {
                    if previous_cased {
                        out.extend(c.to_lowercase());
                    } else {
                        out.extend(c.to_uppercase());
                    }
                    previous_cased = true;
                } else {
                    out.push(c);
                    previous_cased = false;
                }
            }
            Value::str(out)
        }
        "strip" | "lstrip" | "rstrip" => {
            args.arity(0, 1)?;
            let chars = args.opt_str_arg(0)?;
            let matches = |c: char| match chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            Value::str(match args.name {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            })
        }
        "startswith" | "endswith" => {
            args.arity(1, 1)?;
            let candidates: Vec<Value> = match &args.positional[0] {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            let mut found = false;
            for candidate in &candidates {
                let Value::Str(affix) = candidate else {
                    return Err(SandboxError::type_error(format!(
                        "{} first arg must be str or a tuple of str, not {}",
                        args.name,
                        candidate.type_name()
                    )));
                };
                found |= if args.name == "startswith" {
                    s.starts_with(&**affix)
                } else {
                    s.ends_with(&**affix)
                };
            }
            Value::Bool(found)
        }
        "split" => {
            args.arity(0, 2)?;
            let sep = args.opt_str_arg(0)?;
            let max_split = args.opt_int_arg(1, -1)?;
            let parts = split(s, sep, max_split)?;
            check_size(parts.len(), options)?;
            Value::list(parts.into_iter().map(Value::str))
        }
        "join" => {
            args.arity(1, 1)?;
            let items = iterate(&args.positional[0])?;
            let mut pieces = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                match item {
                    Value::Str(piece) => pieces.push(piece.clone()),
                    other => {
                        return Err(SandboxError::type_error(format!(
                            "sequence item {idx}: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            let total = pieces
                .iter()
                .map(|p| p.chars().count())
                .sum::<usize>()
                .saturating_add(s.chars().count().saturating_mul(pieces.len().saturating_sub(1)));
            check_size(total, options)?;
            Value::str(pieces.iter().map(|p| &**p).collect::<Vec<_>>().join(s))
        }
        "replace" => {
            args.arity(2, 3)?;
            let old = args.str_arg(0)?;
            let new = args.str_arg(1)?;
            let count = args.opt_int_arg(2, -1)?;
            let occurrences = if old.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(old).count()
            };
            let replaced = match usize::try_from(count) {
                Ok(limit) => occurrences.min(limit),
                Err(_) => occurrences,
            };
            let estimate = s
                .chars()
                .count()
                .saturating_add(replaced.saturating_mul(new.chars().count()));
            check_size(estimate, options)?;
            Value::str(match usize::try_from(count) {
                Ok(limit) => s.replacen(old, new, limit),
                Err(_) => s.replace(old, new),
            })
        }
        "find" | "index" => {
            args.arity(1, 1)?;
            let needle = args.str_arg(0)?;
            match s.find(needle) {
                Some(byte_idx) => Value::Int(char_index(s, byte_idx)),
                None if args.name == "find" => Value::Int(-1),
                None => return Err(SandboxError::value_error("substring not found")),
            }
        }
        "count" => {
            args.arity(1, 1)?;
            let needle = args.str_arg(0)?;
            let count = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Value::Int(i64::try_from(count).unwrap_or(i64::MAX))
        }
        "isdigit" => {
            args.arity(0, 0)?;
            Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        }
        "isalpha" => {
            args.arity(0, 0)?;
            Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic))
        }
        "isspace" => {
            args.arity(0, 0)?;
            Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace))
        }
        other => return unreachable_method(args.receiver, other),
    };
    Ok(value)
}

fn split(s: &str, sep: Option<&str>, max_split: i64) -> SandboxResult<Vec<String>> {
    let limit = usize::try_from(max_split).ok();
    match sep {
        Some("") => Err(SandboxError::value_error("empty separator")),
        Some(sep) => Ok(match limit {
            Some(limit) => s.splitn(limit + 1, sep).map(str::to_string).collect(),
            None => s.split(sep).map(str::to_string).collect(),
        }),
        None => {
            let mut parts = Vec::new();
            let mut rest = s.trim_start();
            while !rest.is_empty() {
                if limit.is_some_and(|limit| parts.len() >= limit) {
                    parts.push(rest.to_string());
                    break;
                }
                match rest.find(char::is_whitespace) {
                    Some(end) => {
                        parts.push(rest[..end].to_string());
                        rest = rest[end..].trim_start();
                    }
                    None => {
                        parts.push(rest.to_string());
                        break;
                    }
                }
            }
            Ok(parts)
        }
    }
}

fn sequence_method(receiver: &Value, items: &[Value], args: &MethodArgs<'_>) -> SandboxResult<Value> {
    args.arity(1, 1)?;
    let needle = &args.positional[0];
    match args.name {
        "count" => Ok(Value::Int(
            i64::try_from(items.iter().filter(|item| item.equals(needle)).count())
                .unwrap_or(i64::MAX),
        )),
        "index" => match items.iter().position(|item| item.equals(needle)) {
            Some(idx) => Ok(Value::Int(i64::try_from(idx).unwrap_or(i64::MAX))),
            None if matches!(receiver, Value::Tuple(_)) => Err(SandboxError::value_error(
                "tuple.index(x): x not in tuple",
            )),
            None => Err(SandboxError::value_error(format!(
                "{} is not in list",
                needle.repr()
            ))),
        },
        other => unreachable_method(receiver, other),
    }
}

fn dict_method(entries: &[(Value, Value)], args: &MethodArgs<'_>) -> SandboxResult<Value> {
    match args.name {
        "keys" => {
            args.arity(0, 0)?;
            Ok(Value::list(entries.iter().map(|(k, _)| k.clone())))
        }
        "values" => {
            args.arity(0, 0)?;
            Ok(Value::list(entries.iter().map(|(_, v)| v.clone())))
        }
        "items" => {
            args.arity(0, 0)?;
            Ok(Value::list(
                entries
                    .iter()
                    .map(|(k, v)| Value::tuple([k.clone(), v.clone()])),
            ))
        }
        "get" => {
            args.arity(1, 2)?;
            ops::ensure_hashable(&args.positional[0])?;
            Ok(dict_get(entries, &args.positional[0])
                .cloned()
                .or_else(|| args.positional.get(1).cloned())
                .unwrap_or(Value::None))
        }
        other => unreachable_method(args.receiver, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_str(s: &str, name: &str, args: Vec<Value>) -> SandboxResult<Value> {
        call(&Value::str(s), name, args, Vec::new(), &SandboxOptions::default())
    }

    #[test]
    fn mutating_methods_are_known_but_not_pure() {
        let list = Value::list([Value::Int(1)]);
        assert!(is_known(&list, "append"));
        assert!(!is_pure(&list, "append"));
        let err = call(&list, "append", vec![Value::Int(2)], Vec::new(), &SandboxOptions::default())
            .unwrap_err();
        assert!(err.is_safety_violation());
    }

    #[test]
    fn string_methods() {
        assert_eq!(call_str("Hi", "upper", vec![]).unwrap(), Value::str("HI"));
        assert_eq!(call_str("  x ", "strip", vec![]).unwrap(), Value::str("x"));
        assert_eq!(call_str("xxaxx", "strip", vec![Value::str("x")]).unwrap(), Value::str("a"));
        assert_eq!(call_str("hello world", "title", vec![]).unwrap(), Value::str("Hello World"));
        assert_eq!(call_str("héllo", "find", vec![Value::str("l")]).unwrap(), Value::Int(2));
        assert_eq!(call_str("abc", "find", vec![Value::str("z")]).unwrap(), Value::Int(-1));
        assert!(call_str("abc", "index", vec![Value::str("z")]).is_err());
        assert_eq!(
            call_str("file.tar.gz", "endswith", vec![Value::tuple([Value::str(".zip"), Value::str(".gz")])])
                .unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            call_str("-", "join", vec![Value::list([Value::str("a"), Value::str("b")])]).unwrap(),
            Value::str("a-b")
        );
    }

    #[test]
    fn split_matches_host_semantics() {
        assert_eq!(split("  a  b c ", None, -1).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(split("a b  c", None, 1).unwrap(), vec!["a", "b  c"]);
        assert_eq!(split("a,,b", Some(","), -1).unwrap(), vec!["a", "", "b"]);
        assert_eq!(split("a,b,c", Some(","), 1).unwrap(), vec!["a", "b,c"]);
        assert!(split("a", Some(""), -1).is_err());
    }

    #[test]
    fn dict_get_with_default() {
        let dict = Value::dict([(Value::str("a"), Value::Int(1))]);
        let options = SandboxOptions::default();
        let get = |args| call(&dict, "get", args, Vec::new(), &options).unwrap();
        assert_eq!(get(vec![Value::str("a")]), Value::Int(1));
        assert_eq!(get(vec![Value::str("b")]), Value::None);
        assert_eq!(get(vec![Value::str("b"), Value::Int(0)]), Value::Int(0));
    }
}
