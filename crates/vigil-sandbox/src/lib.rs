//! Side-effect-free evaluation of watch expressions and breakpoint conditions.
//!
//! Expressions use a small dynamically typed syntax and are evaluated against a
//! [`Scope`] captured at the moment a probe fires. Evaluation can read
//! anything in the scope but can never change it:
//!
//! - names reaching interpreter internals (`__class__`, `__setattr__`, ...)
//!   are rejected when the expression is compiled;
//! - every compiled instruction is classified as immutable, mutable or
//!   context-dependent, and a watchdog inspects each one before it runs;
//! - only allow-listed built-ins and read-only methods can be called.
//!
//! ```
//! use vigil_sandbox::{scope, Sandbox};
//!
//! let sandbox = Sandbox::new();
//! let items = vec![3, 1, 2];
//! let scope = scope!(items);
//! assert_eq!(sandbox.evaluate_to_string("sorted(items)[-1] * 2", &scope), "6");
//! assert_eq!(
//!     sandbox.evaluate_to_string("items.append(4)", &scope),
//!     "<Safety violation: call to method 'append' of 'list' object is not allowed>"
//! );
//! ```

mod ast;
mod capture;
mod compile;
mod error;
mod lexer;
mod methods;
mod natives;
mod ops;
mod parser;
mod scope;
mod value;
mod vm;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub use crate::capture::Capture;
pub use crate::compile::Effect;
pub use crate::error::{SandboxError, SandboxResult};
pub use crate::scope::Scope;
pub use crate::value::{Object, Value};

/// Limits applied to every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxOptions {
    /// Instructions one evaluation may execute before it is aborted.
    pub max_steps: u64,
    /// Longest string or collection an evaluation may produce.
    pub max_collection_len: usize,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            max_collection_len: 100_000,
        }
    }
}

/// Outcome of compiling one expression text. Failures are kept so that a
/// bad expression is diagnosed once.
#[derive(Debug)]
pub struct Compiled {
    source: String,
    program: Result<compile::Program, SandboxError>,
}

impl Compiled {
    fn new(source: &str) -> Self {
        let program = compile::compile(source);
        if let Err(err) = &program {
            tracing::debug!(target: "vigil.sandbox", expression = source, error = %err, "expression failed to compile");
        }
        Self {
            source: source.to_owned(),
            program,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_ok(&self) -> bool {
        self.program.is_ok()
    }

    pub fn error(&self) -> Option<&SandboxError> {
        self.program.as_ref().err()
    }

    /// Static effect of each compiled instruction, in program order. Empty
    /// when compilation failed.
    pub fn effects(&self) -> Vec<Effect> {
        match &self.program {
            Ok(program) => program.code.iter().map(|instr| instr.effect()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn evaluate(&self, scope: &Scope, options: &SandboxOptions) -> SandboxResult<Value> {
        match &self.program {
            Ok(program) => vm::run(program, scope, options),
            Err(err) => Err(err.clone()),
        }
    }
}

/// Compiles, caches and evaluates expressions. Cheap to share behind an
/// [`Arc`]; every method takes `&self`.
#[derive(Debug, Default)]
pub struct Sandbox {
    options: SandboxOptions,
    cache: RwLock<HashMap<String, Arc<Compiled>>>,
}

impl Sandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: SandboxOptions) -> Self {
        Self {
            options,
            cache: RwLock::default(),
        }
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// Compiled form of `text`, from the cache when possible.
    ///
    /// Concurrent first compiles of the same text may both do the work; the
    /// first one stored is returned to everyone afterwards.
    pub fn compile(&self, text: &str) -> Arc<Compiled> {
        if let Some(hit) = self.cache.read().get(text) {
            return Arc::clone(hit);
        }
        let compiled = Arc::new(Compiled::new(text));
        Arc::clone(
            self.cache
                .write()
                .entry(text.to_owned())
                .or_insert(compiled),
        )
    }

    pub fn evaluate(&self, text: &str, scope: &Scope) -> SandboxResult<Value> {
        self.compile(text).evaluate(scope, &self.options)
    }

    /// Evaluates a breakpoint condition; empty containers, zero and `None` are false.
    pub fn evaluate_condition(&self, text: &str, scope: &Scope) -> SandboxResult<bool> {
        self.evaluate(text, scope).map(|value| value.truthy())
    }

    /// Rendered result, or the error marker when evaluation failed.
    pub fn evaluate_to_string(&self, text: &str, scope: &Scope) -> String {
        match self.evaluate(text, scope) {
            Ok(value) => value.to_string(),
            Err(err) => err.marker(),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}
