use std::collections::BTreeMap;

use crate::natives;
use crate::value::Value;

/// Variables visible to an expression: captured locals, then globals, then
/// the built-in routines.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    locals: BTreeMap<String, Value>,
    globals: BTreeMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_local(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.locals.insert(name.into(), value);
        self
    }

    pub fn insert_global(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.globals.insert(name.into(), value);
        self
    }

    pub fn with_local(mut self, name: impl Into<String>, value: impl crate::Capture) -> Self {
        self.locals.insert(name.into(), value.capture());
        self
    }

    pub fn with_global(mut self, name: impl Into<String>, value: impl crate::Capture) -> Self {
        self.globals.insert(name.into(), value.capture());
        self
    }

    pub fn locals(&self) -> &BTreeMap<String, Value> {
        &self.locals
    }

    pub fn globals(&self) -> &BTreeMap<String, Value> {
        &self.globals
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty() && self.globals.is_empty()
    }

    pub fn resolve(&self, name: &str) -> Option<Value> {
        self.locals
            .get(name)
            .or_else(|| self.globals.get(name))
            .cloned()
            .or_else(|| natives::lookup(name).map(Value::Native))
    }
}
