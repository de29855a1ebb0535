//! Lowers parsed expressions to a linear instruction vector.
//!
//! Every [`Instr`] carries a static [`Effect`] classification that the
//! watchdog consults before executing it.

use std::sync::Arc;

use crate::ast::Expr;
use crate::error::{SandboxError, SandboxResult};
use crate::ops::{BinOp, CmpOp, UnaryOp};
use crate::parser;
use crate::value::Value;

/// Names tied to object construction, destruction and mutation protocols.
const RESERVED_NAMES: &[&str] = &[
    "__call__",
    "__del__",
    "__delattr__",
    "__delete__",
    "__delitem__",
    "__delslice__",
    "__new__",
    "__set__",
    "__setattr__",
    "__setitem__",
    "__setslice__",
];

/// Whether an expression may not reference `name` at all.
///
/// Besides the protocol names above, every dunder is reserved: they reach
/// interpreter internals (`__class__`, `__globals__`, ...) rather than data.
pub(crate) fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
        || (name.len() > 4 && name.starts_with("__") && name.ends_with("__"))
}

/// Static classification of an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Effect {
    /// Always safe to execute.
    Immutable,
    /// Writes, deletes, imports or raises. Never executed.
    Mutable,
    /// Safe only when the watchdog recognizes the concrete target.
    Contextual,
}

#[derive(Debug, Clone)]
pub(crate) enum Instr {
    Const(Value),
    LoadName(Arc<str>),
    LoadAttr(Arc<str>),
    /// Pops index, then container.
    LoadItem,
    /// Pops step, upper, lower, then container.
    LoadSlice,
    Unary(UnaryOp),
    Binary(BinOp),
    Compare(CmpOp),
    BuildList(usize),
    BuildTuple(usize),
    /// Pops `2 * n` values pushed as key, value, key, value, ...
    BuildDict(usize),
    /// Replaces the top of the stack with its `n` elements, first element on
    /// top.
    UnpackSequence(usize),
    Dup,
    Pop,
    Call {
        argc: usize,
        keywords: Arc<[Arc<str>]>,
    },
    CallMethod {
        name: Arc<str>,
        argc: usize,
        keywords: Arc<[Arc<str>]>,
    },
    Jump(usize),
    JumpIfFalseOrPop(usize),
    JumpIfTrueOrPop(usize),
    PopJumpIfFalse(usize),
    Return,

    StoreName(Arc<str>),
    StoreAttr(Arc<str>),
    StoreItem,
    StoreSlice,
    DeleteName(Arc<str>),
    DeleteAttr(Arc<str>),
    DeleteItem,
    DeleteSlice,
    Import(Arc<str>),
    Raise,
}

impl Instr {
    pub(crate) fn effect(&self) -> Effect {
        match self {
            Instr::Const(_)
            | Instr::LoadName(_)
            | Instr::LoadAttr(_)
            | Instr::LoadItem
            | Instr::LoadSlice
            | Instr::Unary(_)
            | Instr::Binary(_)
            | Instr::Compare(_)
            | Instr::BuildList(_)
            | Instr::BuildTuple(_)
            | Instr::BuildDict(_)
            | Instr::UnpackSequence(_)
            | Instr::Dup
            | Instr::Pop
            | Instr::Return => Effect::Immutable,

            Instr::Call { .. }
            | Instr::CallMethod { .. }
            | Instr::Jump(_)
            | Instr::JumpIfFalseOrPop(_)
            | Instr::JumpIfTrueOrPop(_)
            | Instr::PopJumpIfFalse(_) => Effect::Contextual,

            Instr::StoreName(_)
            | Instr::StoreAttr(_)
            | Instr::StoreItem
            | Instr::StoreSlice
            | Instr::DeleteName(_)
            | Instr::DeleteAttr(_)
            | Instr::DeleteItem
            | Instr::DeleteSlice
            | Instr::Import(_)
            | Instr::Raise => Effect::Mutable,
        }
    }

    /// Description of the effect a MUTABLE instruction would have had.
    pub(crate) fn violation(&self) -> String {
        match self {
            Instr::StoreName(name) => format!("assignment to name '{name}' is not allowed"),
            Instr::StoreAttr(name) => format!("assignment to attribute '{name}' is not allowed"),
            Instr::StoreItem => "item assignment is not allowed".to_owned(),
            Instr::StoreSlice => "slice assignment is not allowed".to_owned(),
            Instr::DeleteName(name) => format!("deletion of name '{name}' is not allowed"),
            Instr::DeleteAttr(name) => format!("deletion of attribute '{name}' is not allowed"),
            Instr::DeleteItem => "item deletion is not allowed".to_owned(),
            Instr::DeleteSlice => "slice deletion is not allowed".to_owned(),
            Instr::Import(module) => format!("import of '{module}' is not allowed"),
            Instr::Raise => "raising exceptions is not allowed".to_owned(),
            other => format!("instruction {other:?} is not allowed"),
        }
    }

    fn jump_target_mut(&mut self) -> Option<&mut usize> {
        match self {
            Instr::Jump(target)
            | Instr::JumpIfFalseOrPop(target)
            | Instr::JumpIfTrueOrPop(target)
            | Instr::PopJumpIfFalse(target) => Some(target),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Program {
    pub(crate) code: Vec<Instr>,
}

/// Parses `text`, rejects reserved names, and generates code.
pub(crate) fn compile(text: &str) -> SandboxResult<Program> {
    let statements = parser::parse(text)?;
    for statement in &statements {
        scan_reserved(statement)?;
    }

    let mut gen = CodeGen { code: Vec::new() };
    let last = statements.len() - 1;
    for (i, statement) in statements.iter().enumerate() {
        let produces_value = gen.statement(statement)?;
        match (produces_value, i == last) {
            (true, true) => {}
            (true, false) => gen.emit(Instr::Pop),
            (false, true) => gen.emit(Instr::Const(Value::None)),
            (false, false) => {}
        }
    }
    gen.emit(Instr::Return);
    Ok(Program { code: gen.code })
}

fn scan_reserved(statement: &Expr) -> SandboxResult<()> {
    let mut found: Option<String> = None;
    statement.walk(&mut |node| {
        if found.is_some() {
            return;
        }
        let name = match node {
            Expr::Name(name) | Expr::Attr { name, .. } | Expr::Walrus { name, .. } => name,
            Expr::Call { keywords, .. } => {
                if let Some((name, _)) = keywords.iter().find(|(name, _)| is_reserved_name(name)) {
                    found = Some(name.clone());
                }
                return;
            }
            Expr::Import(module) => {
                if let Some(part) = module.split('.').find(|part| is_reserved_name(part)) {
                    found = Some(part.to_owned());
                }
                return;
            }
            _ => return,
        };
        if is_reserved_name(name) {
            found = Some(name.clone());
        }
    });
    match found {
        Some(name) => Err(SandboxError::safety(format!(
            "access to reserved name '{name}' is not allowed"
        ))),
        None => Ok(()),
    }
}

struct CodeGen {
    code: Vec<Instr>,
}

impl CodeGen {
    fn emit(&mut self, instr: Instr) {
        self.code.push(instr);
    }

    /// Emits a jump with a placeholder target and returns its position.
    fn emit_jump(&mut self, instr: Instr) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    fn patch_to_here(&mut self, at: usize) -> SandboxResult<()> {
        let here = self.code.len();
        match self.code.get_mut(at).and_then(Instr::jump_target_mut) {
            Some(target) => {
                *target = here;
                Ok(())
            }
            None => Err(SandboxError::compile(format!(
                "internal error: no jump to patch at {at}"
            ))),
        }
    }

    /// Returns whether the statement leaves a value on the stack.
    fn statement(&mut self, statement: &Expr) -> SandboxResult<bool> {
        match statement {
            Expr::Assign { targets, value } => {
                self.expr(value)?;
                for (i, target) in targets.iter().enumerate() {
                    if i + 1 < targets.len() {
                        self.emit(Instr::Dup);
                    }
                    self.store(target)?;
                }
                Ok(false)
            }
            Expr::AugAssign { target, op, value } => {
                // Reads have no effects, so evaluating the target twice is
                // equivalent to evaluating it once.
                self.expr(target)?;
                self.expr(value)?;
                self.emit(Instr::Binary(*op));
                self.store(target)?;
                Ok(false)
            }
            Expr::Delete(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(false)
            }
            Expr::Import(module) => {
                self.emit(Instr::Import(module.as_str().into()));
                let bound = module.trim_start_matches('.').split('.').next().unwrap_or("");
                self.emit(Instr::StoreName(bound.into()));
                Ok(false)
            }
            Expr::Raise(value) => {
                if let Some(value) = value {
                    self.expr(value)?;
                }
                self.emit(Instr::Raise);
                Ok(false)
            }
            other => {
                self.expr(other)?;
                Ok(true)
            }
        }
    }

    fn store(&mut self, target: &Expr) -> SandboxResult<()> {
        match target {
            Expr::Name(name) => self.emit(Instr::StoreName(name.as_str().into())),
            Expr::Attr { value, name } => {
                self.expr(value)?;
                self.emit(Instr::StoreAttr(name.as_str().into()));
            }
            Expr::Index { value, index } => {
                self.expr(value)?;
                self.expr(index)?;
                self.emit(Instr::StoreItem);
            }
            Expr::Slice { .. } => {
                self.slice_parts(target)?;
                self.emit(Instr::StoreSlice);
            }
            Expr::List(items) | Expr::Tuple(items) => {
                self.emit(Instr::UnpackSequence(items.len()));
                for item in items {
                    self.store(item)?;
                }
            }
            other => {
                return Err(SandboxError::compile(format!(
                    "cannot assign to {}",
                    other.describe()
                )))
            }
        }
        Ok(())
    }

    fn delete(&mut self, target: &Expr) -> SandboxResult<()> {
        match target {
            Expr::Name(name) => self.emit(Instr::DeleteName(name.as_str().into())),
            Expr::Attr { value, name } => {
                self.expr(value)?;
                self.emit(Instr::DeleteAttr(name.as_str().into()));
            }
            Expr::Index { value, index } => {
                self.expr(value)?;
                self.expr(index)?;
                self.emit(Instr::DeleteItem);
            }
            Expr::Slice { .. } => {
                self.slice_parts(target)?;
                self.emit(Instr::DeleteSlice);
            }
            Expr::List(items) | Expr::Tuple(items) => {
                for item in items {
                    self.delete(item)?;
                }
            }
            other => {
                return Err(SandboxError::compile(format!(
                    "cannot delete {}",
                    other.describe()
                )))
            }
        }
        Ok(())
    }

    /// Pushes container, lower, upper and step of a slice expression.
    fn slice_parts(&mut self, slice: &Expr) -> SandboxResult<()> {
        let Expr::Slice {
            value,
            lower,
            upper,
            step,
        } = slice
        else {
            return Err(SandboxError::compile("internal error: expected a slice"));
        };
        self.expr(value)?;
        for part in [lower, upper, step] {
            match part {
                Some(part) => self.expr(part)?,
                None => self.emit(Instr::Const(Value::None)),
            }
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> SandboxResult<()> {
        match expr {
            Expr::Const(value) => self.emit(Instr::Const(value.clone())),
            Expr::Name(name) => self.emit(Instr::LoadName(name.as_str().into())),
            Expr::Attr { value, name } => {
                self.expr(value)?;
                self.emit(Instr::LoadAttr(name.as_str().into()));
            }
            Expr::Index { value, index } => {
                self.expr(value)?;
                self.expr(index)?;
                self.emit(Instr::LoadItem);
            }
            Expr::Slice { .. } => {
                self.slice_parts(expr)?;
                self.emit(Instr::LoadSlice);
            }
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                let method = match &**func {
                    Expr::Attr { value, name } => {
                        self.expr(value)?;
                        Some(name)
                    }
                    other => {
                        self.expr(other)?;
                        None
                    }
                };
                for arg in args {
                    self.expr(arg)?;
                }
                for (_, arg) in keywords {
                    self.expr(arg)?;
                }
                let names: Arc<[Arc<str>]> =
                    keywords.iter().map(|(name, _)| Arc::from(name.as_str())).collect();
                match method {
                    Some(name) => self.emit(Instr::CallMethod {
                        name: name.as_str().into(),
                        argc: args.len(),
                        keywords: names,
                    }),
                    None => self.emit(Instr::Call {
                        argc: args.len(),
                        keywords: names,
                    }),
                }
            }
            Expr::Unary { op, operand } => {
                self.expr(operand)?;
                self.emit(Instr::Unary(*op));
            }
            Expr::Binary { op, lhs, rhs } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.emit(Instr::Binary(*op));
            }
            Expr::Compare { op, lhs, rhs } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.emit(Instr::Compare(*op));
            }
            Expr::And(lhs, rhs) => {
                self.expr(lhs)?;
                let jump = self.emit_jump(Instr::JumpIfFalseOrPop(0));
                self.expr(rhs)?;
                self.patch_to_here(jump)?;
            }
            Expr::Or(lhs, rhs) => {
                self.expr(lhs)?;
                let jump = self.emit_jump(Instr::JumpIfTrueOrPop(0));
                self.expr(rhs)?;
                self.patch_to_here(jump)?;
            }
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond)?;
                let to_else = self.emit_jump(Instr::PopJumpIfFalse(0));
                self.expr(then)?;
                let to_end = self.emit_jump(Instr::Jump(0));
                self.patch_to_here(to_else)?;
                self.expr(otherwise)?;
                self.patch_to_here(to_end)?;
            }
            Expr::List(items) => {
                for item in items {
                    self.expr(item)?;
                }
                self.emit(Instr::BuildList(items.len()));
            }
            Expr::Tuple(items) => {
                for item in items {
                    self.expr(item)?;
                }
                self.emit(Instr::BuildTuple(items.len()));
            }
            Expr::Dict(entries) => {
                for (key, value) in entries {
                    self.expr(key)?;
                    self.expr(value)?;
                }
                self.emit(Instr::BuildDict(entries.len()));
            }
            Expr::Walrus { name, value } => {
                self.expr(value)?;
                self.emit(Instr::Dup);
                self.emit(Instr::StoreName(name.as_str().into()));
            }
            Expr::Assign { .. }
            | Expr::AugAssign { .. }
            | Expr::Delete(_)
            | Expr::Import(_)
            | Expr::Raise(_) => {
                return Err(SandboxError::compile(format!(
                    "{} is not valid inside an expression",
                    expr.describe()
                )))
            }
        }
        Ok(())
    }
}
