//! Snapshotting host values into [`Value`]s.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::value::{Object, Value};

/// Converts a host value into an immutable [`Value`] snapshot.
///
/// Implemented for primitives, strings, sequences, maps and small tuples.
/// Other serializable types can go through [`Value::from_serialize`] or
/// [`Object::from_serialize`].
pub trait Capture {
    fn capture(&self) -> Value;
}

impl Capture for Value {
    fn capture(&self) -> Value {
        self.clone()
    }
}

impl Capture for Object {
    fn capture(&self) -> Value {
        Value::Object(Arc::new(self.clone()))
    }
}

impl<T: Capture + ?Sized> Capture for &T {
    fn capture(&self) -> Value {
        (**self).capture()
    }
}

impl<T: Capture + ?Sized> Capture for Box<T> {
    fn capture(&self) -> Value {
        (**self).capture()
    }
}

impl<T: Capture + ?Sized> Capture for Arc<T> {
    fn capture(&self) -> Value {
        (**self).capture()
    }
}

impl Capture for () {
    fn capture(&self) -> Value {
        Value::None
    }
}

impl Capture for bool {
    fn capture(&self) -> Value {
        Value::Bool(*self)
    }
}

macro_rules! capture_lossless_int {
    ($($ty:ty),*) => {
        $(impl Capture for $ty {
            fn capture(&self) -> Value {
                Value::Int(i64::from(*self))
            }
        })*
    };
}

capture_lossless_int!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! capture_wide_int {
    ($($ty:ty),*) => {
        $(impl Capture for $ty {
            fn capture(&self) -> Value {
                // Out-of-range values degrade to a float rather than wrap.
                match i64::try_from(*self) {
                    Ok(value) => Value::Int(value),
                    Err(_) => Value::Float(*self as f64),
                }
            }
        })*
    };
}

capture_wide_int!(u64, usize, isize, i128, u128);

impl Capture for f32 {
    fn capture(&self) -> Value {
        Value::Float(f64::from(*self))
    }
}

impl Capture for f64 {
    fn capture(&self) -> Value {
        Value::Float(*self)
    }
}

impl Capture for char {
    fn capture(&self) -> Value {
        Value::str(self.to_string())
    }
}

impl Capture for str {
    fn capture(&self) -> Value {
        Value::str(self)
    }
}

impl Capture for String {
    fn capture(&self) -> Value {
        Value::str(self)
    }
}

impl<T: Capture> Capture for Option<T> {
    fn capture(&self) -> Value {
        match self {
            Some(value) => value.capture(),
            None => Value::None,
        }
    }
}

impl<T: Capture> Capture for [T] {
    fn capture(&self) -> Value {
        Value::list(self.iter().map(Capture::capture))
    }
}

impl<T: Capture, const N: usize> Capture for [T; N] {
    fn capture(&self) -> Value {
        self.as_slice().capture()
    }
}

impl<T: Capture> Capture for Vec<T> {
    fn capture(&self) -> Value {
        self.as_slice().capture()
    }
}

impl<K: Capture, V: Capture> Capture for BTreeMap<K, V> {
    fn capture(&self) -> Value {
        Value::dict(self.iter().map(|(k, v)| (k.capture(), v.capture())))
    }
}

impl<K: Capture, V: Capture, S> Capture for HashMap<K, V, S> {
    fn capture(&self) -> Value {
        Value::dict(self.iter().map(|(k, v)| (k.capture(), v.capture())))
    }
}

macro_rules! capture_tuple {
    ($($name:ident),+) => {
        impl<$($name: Capture),+> Capture for ($($name,)+) {
            #[allow(non_snake_case)]
            fn capture(&self) -> Value {
                let ($($name,)+) = self;
                Value::tuple([$($name.capture()),+])
            }
        }
    };
}

capture_tuple!(A);
capture_tuple!(A, B);
capture_tuple!(A, B, C);
capture_tuple!(A, B, C, D);

impl Value {
    /// Snapshots any serializable value. Structs and maps become dicts.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Value> {
        Ok(Value::from(serde_json::to_value(value)?))
    }
}

impl Object {
    /// Snapshots a serializable struct as an object whose fields are readable
    /// with attribute syntax (`order.total`). Non-struct values are stored in
    /// a single `value` field.
    pub fn from_serialize<T: Serialize + ?Sized>(
        type_name: &str,
        value: &T,
    ) -> serde_json::Result<Object> {
        let mut object = Object::new(type_name);
        match serde_json::to_value(value)? {
            serde_json::Value::Object(map) => {
                for (name, field) in map {
                    object = object.with_field(name, Value::from(field));
                }
            }
            other => object = object.with_field("value", Value::from(other)),
        }
        Ok(object)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::str(s),
            serde_json::Value::Array(items) => Value::list(items.into_iter().map(Value::from)),
            serde_json::Value::Object(map) => {
                Value::dict(map.into_iter().map(|(k, v)| (Value::str(k), Value::from(v))))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::str(value)
    }
}

/// Builds a [`Scope`](crate::Scope) of locals from variables in the calling
/// frame, capturing each by reference.
///
/// ```
/// let total = 12.5;
/// let items = vec!["a", "b"];
/// let scope = vigil_sandbox::scope!(total, items, count = items.len());
/// assert!(scope.resolve("count").is_some());
/// ```
#[macro_export]
macro_rules! scope {
    (@acc $scope:ident;) => {};
    (@acc $scope:ident; $name:ident = $value:expr $(, $($rest:tt)*)?) => {
        $scope.insert_local(stringify!($name), $crate::Capture::capture(&$value));
        $crate::scope!(@acc $scope; $($($rest)*)?);
    };
    (@acc $scope:ident; $name:ident $(, $($rest:tt)*)?) => {
        $scope.insert_local(stringify!($name), $crate::Capture::capture(&$name));
        $crate::scope!(@acc $scope; $($($rest)*)?);
    };
    ($($body:tt)*) => {{
        #[allow(unused_mut)]
        let mut scope = $crate::Scope::new();
        $crate::scope!(@acc scope; $($body)*);
        scope
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Order {
        id: u32,
        items: Vec<&'static str>,
        note: Option<String>,
    }

    #[test]
    fn primitives_and_collections() {
        assert_eq!(7u8.capture(), Value::Int(7));
        assert_eq!(u64::MAX.capture(), Value::Float(u64::MAX as f64));
        assert_eq!(Some("x").capture(), Value::str("x"));
        assert_eq!(None::<i32>.capture(), Value::None);
        assert_eq!(vec![1, 2].capture().to_string(), "[1, 2]");
        assert_eq!((1, "a").capture().to_string(), "(1, 'a')");
    }

    #[test]
    fn serializable_structs_become_objects() {
        let order = Order {
            id: 4,
            items: vec!["tea"],
            note: None,
        };
        let object = Object::from_serialize("Order", &order).unwrap();
        assert_eq!(object.field("id"), Some(&Value::Int(4)));
        assert_eq!(object.field("note"), Some(&Value::None));

        let dict = Value::from_serialize(&order).unwrap();
        assert!(matches!(dict, Value::Dict(_)));
    }

    #[test]
    fn scope_macro_captures_by_reference() {
        let total = 12.5;
        let items = vec!["a".to_string()];
        let scope = crate::scope!(total, items, count = items.len());

        assert_eq!(scope.resolve("total"), Some(Value::Float(12.5)));
        assert_eq!(scope.resolve("count"), Some(Value::Int(1)));
        assert_eq!(items.len(), 1);
    }
}
