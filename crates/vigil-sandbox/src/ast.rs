use crate::ops::{BinOp, CmpOp, UnaryOp};
use crate::value::Value;

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Const(Value),
    Name(String),
    Attr {
        value: Box<Expr>,
        name: String,
    },
    Index {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        value: Box<Expr>,
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<(String, Expr)>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),

    // Statement forms. They parse so that they can be rejected as effects.
    Assign {
        targets: Vec<Expr>,
        value: Box<Expr>,
    },
    AugAssign {
        target: Box<Expr>,
        op: BinOp,
        value: Box<Expr>,
    },
    Walrus {
        name: String,
        value: Box<Expr>,
    },
    Delete(Vec<Expr>),
    Import(String),
    Raise(Option<Box<Expr>>),
}

impl Expr {
    /// Human description used in "cannot assign to ..." diagnostics.
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Expr::Const(_) => "literal",
            Expr::Name(_) => "name",
            Expr::Attr { .. } => "attribute",
            Expr::Index { .. } => "subscript",
            Expr::Slice { .. } => "slice",
            Expr::Call { .. } => "function call",
            Expr::Unary { .. } | Expr::Binary { .. } => "expression",
            Expr::Compare { .. } => "comparison",
            Expr::And(..) | Expr::Or(..) => "expression",
            Expr::IfElse { .. } => "conditional expression",
            Expr::List(_) => "list",
            Expr::Tuple(_) => "tuple",
            Expr::Dict(_) => "dict literal",
            Expr::Assign { .. } | Expr::AugAssign { .. } => "assignment",
            Expr::Walrus { .. } => "named expression",
            Expr::Delete(_) | Expr::Import(_) | Expr::Raise(_) => "statement",
        }
    }

    /// Calls `f` on this node and every node below it.
    pub(crate) fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Const(_) | Expr::Name(_) | Expr::Import(_) => {}
            Expr::Attr { value, .. } => value.walk(f),
            Expr::Index { value, index } => {
                value.walk(f);
                index.walk(f);
            }
            Expr::Slice {
                value,
                lower,
                upper,
                step,
            } => {
                value.walk(f);
                for part in [lower, upper, step].into_iter().flatten() {
                    part.walk(f);
                }
            }
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                func.walk(f);
                args.iter().for_each(|arg| arg.walk(f));
                keywords.iter().for_each(|(_, arg)| arg.walk(f));
            }
            Expr::Unary { operand, .. } => operand.walk(f),
            Expr::Binary { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => {
                cond.walk(f);
                then.walk(f);
                otherwise.walk(f);
            }
            Expr::List(items) | Expr::Tuple(items) | Expr::Delete(items) => {
                items.iter().for_each(|item| item.walk(f));
            }
            Expr::Dict(entries) => {
                for (key, value) in entries {
                    key.walk(f);
                    value.walk(f);
                }
            }
            Expr::Assign { targets, value } => {
                targets.iter().for_each(|target| target.walk(f));
                value.walk(f);
            }
            Expr::AugAssign { target, value, .. } => {
                target.walk(f);
                value.walk(f);
            }
            Expr::Walrus { value, .. } => value.walk(f),
            Expr::Raise(value) => {
                if let Some(value) = value {
                    value.walk(f);
                }
            }
        }
    }
}
