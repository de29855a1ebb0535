//! Stack machine executing a [`Program`] under a watchdog.
//!
//! Before any instruction runs the watchdog checks its [`Effect`]: MUTABLE
//! instructions abort evaluation, CONTEXTUAL ones must resolve to a target
//! known to be side-effect free, and every instruction counts against the
//! step budget.

use std::sync::Arc;

use crate::compile::{Effect, Instr, Program};
use crate::error::{SandboxError, SandboxResult};
use crate::methods;
use crate::natives;
use crate::ops;
use crate::scope::Scope;
use crate::value::Value;
use crate::SandboxOptions;

pub(crate) fn run(program: &Program, scope: &Scope, options: &SandboxOptions) -> SandboxResult<Value> {
    Vm {
        code: &program.code,
        scope,
        options,
        stack: Vec::new(),
        steps: 0,
    }
    .run()
}

struct Vm<'a> {
    code: &'a [Instr],
    scope: &'a Scope,
    options: &'a SandboxOptions,
    stack: Vec<Value>,
    steps: u64,
}

impl Vm<'_> {
    fn run(mut self) -> SandboxResult<Value> {
        let code = self.code;
        let mut pc = 0;
        while let Some(instr) = code.get(pc) {
            self.steps += 1;
            if self.steps > self.options.max_steps {
                return Err(SandboxError::StepLimit(self.options.max_steps));
            }
            self.inspect(instr, pc)?;

            pc += 1;
            match instr {
                Instr::Const(value) => self.stack.push(value.clone()),
                Instr::LoadName(name) => {
                    let value = self.scope.resolve(name).ok_or_else(|| {
                        SandboxError::eval(format!("NameError: name '{name}' is not defined"))
                    })?;
                    self.stack.push(value);
                }
                Instr::LoadAttr(name) => {
                    let value = self.pop()?;
                    self.stack.push(ops::get_attr(&value, name)?);
                }
                Instr::LoadItem => {
                    let index = self.pop()?;
                    let value = self.pop()?;
                    self.stack.push(ops::get_item(&value, &index)?);
                }
                Instr::LoadSlice => {
                    let step = self.pop()?;
                    let upper = self.pop()?;
                    let lower = self.pop()?;
                    let value = self.pop()?;
                    self.stack.push(ops::get_slice(&value, &lower, &upper, &step)?);
                }
                Instr::Unary(op) => {
                    let operand = self.pop()?;
                    self.stack.push(ops::unary(*op, &operand)?);
                }
                Instr::Binary(op) => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    self.stack.push(ops::binary(*op, &lhs, &rhs, self.options)?);
                }
                Instr::Compare(op) => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    self.stack.push(Value::Bool(ops::compare(*op, &lhs, &rhs)?));
                }
                Instr::BuildList(n) => {
                    let items = self.pop_n(*n)?;
                    self.stack.push(Value::list(items));
                }
                Instr::BuildTuple(n) => {
                    let items = self.pop_n(*n)?;
                    self.stack.push(Value::tuple(items));
                }
                Instr::BuildDict(n) => {
                    let flat = self.pop_n(n * 2)?;
                    let mut entries = Vec::with_capacity(*n);
                    let mut flat = flat.into_iter();
                    while let (Some(key), Some(value)) = (flat.next(), flat.next()) {
                        ops::dict_insert(&mut entries, key, value)?;
                    }
                    self.stack.push(Value::dict(entries));
                }
                Instr::UnpackSequence(n) => {
                    let value = self.pop()?;
                    let items = ops::unpack(&value, *n)?;
                    self.stack.extend(items.into_iter().rev());
                }
                Instr::Dup => {
                    let top = self.peek(0)?.clone();
                    self.stack.push(top);
                }
                Instr::Pop => {
                    self.pop()?;
                }
                Instr::Call { argc, keywords } => {
                    let (positional, keywords) = self.pop_args(*argc, keywords)?;
                    let callee = self.pop()?;
                    let result = self.call(&callee, positional, keywords)?;
                    self.stack.push(result);
                }
                Instr::CallMethod {
                    name,
                    argc,
                    keywords,
                } => {
                    let (positional, keywords) = self.pop_args(*argc, keywords)?;
                    let receiver = self.pop()?;
                    let result = match ops::attr(&receiver, name) {
                        Some(callee) => self.call(&callee, positional, keywords)?,
                        None => methods::call(&receiver, name, positional, keywords, self.options)?,
                    };
                    self.stack.push(result);
                }
                Instr::Jump(target) => pc = *target,
                Instr::JumpIfFalseOrPop(target) => {
                    if self.peek(0)?.truthy() {
                        self.pop()?;
                    } else {
                        pc = *target;
                    }
                }
                Instr::JumpIfTrueOrPop(target) => {
                    if self.peek(0)?.truthy() {
                        pc = *target;
                    } else {
                        self.pop()?;
                    }
                }
                Instr::PopJumpIfFalse(target) => {
                    if !self.pop()?.truthy() {
                        pc = *target;
                    }
                }
                Instr::Return => return self.pop(),
                mutable => return Err(SandboxError::safety(mutable.violation())),
            }
        }
        Err(SandboxError::eval("program ended without a result"))
    }

    /// The watchdog. Runs before `instr` executes.
    fn inspect(&self, instr: &Instr, pc: usize) -> SandboxResult<()> {
        match instr.effect() {
            Effect::Immutable => Ok(()),
            Effect::Mutable => {
                tracing::debug!(target: "vigil.sandbox", pc, ?instr, "blocked mutating instruction");
                Err(SandboxError::safety(instr.violation()))
            }
            Effect::Contextual => match instr {
                Instr::Jump(target)
                | Instr::JumpIfFalseOrPop(target)
                | Instr::JumpIfTrueOrPop(target)
                | Instr::PopJumpIfFalse(target) => {
                    if *target > pc {
                        Ok(())
                    } else {
                        Err(SandboxError::safety(format!(
                            "backward jump from {pc} to {target} is not allowed"
                        )))
                    }
                }
                Instr::Call { argc, keywords } => {
                    let callee = self.peek(argc + keywords.len())?;
                    check_callee(callee)
                }
                Instr::CallMethod {
                    name,
                    argc,
                    keywords,
                } => {
                    let receiver = self.peek(argc + keywords.len())?;
                    match ops::attr(receiver, name) {
                        Some(callee) => check_callee(&callee),
                        None if methods::is_pure(receiver, name) => Ok(()),
                        None => {
                            tracing::debug!(
                                target: "vigil.sandbox",
                                method = %name,
                                receiver = receiver.type_name(),
                                "blocked method call"
                            );
                            Err(SandboxError::safety(format!(
                                "call to method '{name}' of '{}' object is not allowed",
                                receiver.type_name()
                            )))
                        }
                    }
                }
                other => Err(SandboxError::safety(format!(
                    "instruction {other:?} is not recognized as safe"
                ))),
            },
        }
    }

    fn call(
        &self,
        callee: &Value,
        positional: Vec<Value>,
        keywords: Vec<(Arc<str>, Value)>,
    ) -> SandboxResult<Value> {
        match callee {
            Value::Native(name) => natives::call(*name, positional, keywords, self.options),
            other => Err(not_callable(other)),
        }
    }

    fn pop(&mut self) -> SandboxResult<Value> {
        self.stack.pop().ok_or_else(stack_underflow)
    }

    fn pop_n(&mut self, n: usize) -> SandboxResult<Vec<Value>> {
        let at = self.stack.len().checked_sub(n).ok_or_else(stack_underflow)?;
        Ok(self.stack.split_off(at))
    }

    fn pop_args(
        &mut self,
        argc: usize,
        keywords: &[Arc<str>],
    ) -> SandboxResult<(Vec<Value>, Vec<(Arc<str>, Value)>)> {
        let keyword_values = self.pop_n(keywords.len())?;
        let positional = self.pop_n(argc)?;
        Ok((
            positional,
            keywords.iter().cloned().zip(keyword_values).collect(),
        ))
    }

    /// The value `depth` slots below the top of the stack.
    fn peek(&self, depth: usize) -> SandboxResult<&Value> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|at| self.stack.get(at))
            .ok_or_else(stack_underflow)
    }
}

fn check_callee(callee: &Value) -> SandboxResult<()> {
    match callee {
        Value::Native(name) if natives::is_allowed(name) => Ok(()),
        Value::Native(name) => {
            tracing::debug!(target: "vigil.sandbox", native = *name, "blocked native call");
            Err(SandboxError::safety(format!("call to '{name}' is not allowed")))
        }
        Value::Object(object) => Err(SandboxError::safety(format!(
            "call to '{}' object is not allowed",
            object.type_name()
        ))),
        // Plain data is never callable; executing the call reports the
        // TypeError.
        _ => Ok(()),
    }
}

fn not_callable(value: &Value) -> SandboxError {
    SandboxError::type_error(format!("'{}' object is not callable", value.type_name()))
}

fn stack_underflow() -> SandboxError {
    SandboxError::eval("internal error: evaluation stack underflow")
}
