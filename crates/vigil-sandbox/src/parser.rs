//! Recursive-descent parser producing [`Expr`] trees.
//!
//! Binary operators use precedence climbing. Statement forms that would
//! mutate state are accepted here and rejected later, when the compiled
//! instructions are inspected.

use crate::ast::Expr;
use crate::error::{SandboxError, SandboxResult};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::ops::{BinOp, CmpOp, UnaryOp};
use crate::value::Value;

/// Longest accepted expression, in tokens. Bounds the recursion depth of
/// every later pass over the tree.
const MAX_TOKENS: usize = 2_000;
const MAX_NESTING: usize = 64;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
    "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in",
    "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with",
    "yield",
];

const UNSUPPORTED_STATEMENTS: &[&str] = &[
    "assert", "async", "await", "break", "class", "continue", "def", "elif", "else", "except",
    "finally", "for", "global", "if", "nonlocal", "pass", "return", "try", "while", "with", "yield",
];

/// Parses a `;`-separated sequence of statements.
pub(crate) fn parse(text: &str) -> SandboxResult<Vec<Expr>> {
    let tokens = tokenize(text)?;
    if tokens.len() > MAX_TOKENS {
        return Err(SandboxError::compile(format!(
            "expression is too long ({} tokens, limit {MAX_TOKENS})",
            tokens.len()
        )));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };

    let mut statements = Vec::new();
    loop {
        if parser.at_end() {
            break;
        }
        statements.push(parser.parse_statement()?);
        if parser.at_kind(TokenKind::Semi) {
            parser.bump();
            continue;
        }
        if !parser.at_end() {
            return Err(parser.unexpected("end of expression"));
        }
    }

    if statements.is_empty() {
        return Err(SandboxError::compile("empty expression"));
    }
    Ok(statements)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_n(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned()?;
        self.pos += 1;
        Some(token)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn at_kind(&self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|t| t.kind == kind)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.peek()
            .is_some_and(|t| t.kind == TokenKind::Name && t.text == keyword)
    }

    fn at_not_in(&self) -> bool {
        self.at_keyword("not")
            && self
                .peek_n(1)
                .is_some_and(|t| t.kind == TokenKind::Name && t.text == "in")
    }

    fn eat_kind(&mut self, kind: TokenKind) -> bool {
        if self.at_kind(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_kind(&mut self, kind: TokenKind, what: &str) -> SandboxResult<Token> {
        if self.at_kind(kind) {
            if let Some(token) = self.bump() {
                return Ok(token);
            }
        }
        Err(self.unexpected(what))
    }

    fn expect_keyword(&mut self, keyword: &str) -> SandboxResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{keyword}'")))
        }
    }

    fn expect_identifier(&mut self) -> SandboxResult<String> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Name && !KEYWORDS.contains(&token.text.as_str()) => {
                let name = token.text.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn unexpected(&self, expected: &str) -> SandboxError {
        match self.peek() {
            Some(token) => SandboxError::compile(format!(
                "invalid syntax: expected {expected}, found '{}' at offset {}",
                token.text, token.offset
            )),
            None => SandboxError::compile(format!(
                "invalid syntax: expected {expected}, found end of expression"
            )),
        }
    }

    fn enter(&mut self) -> SandboxResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(SandboxError::compile("expression is nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // Statements.

    fn parse_statement(&mut self) -> SandboxResult<Expr> {
        if self.eat_keyword("del") {
            let targets = self.parse_target_list()?;
            for target in &targets {
                check_target(target)?;
            }
            return Ok(Expr::Delete(targets));
        }
        if self.eat_keyword("import") {
            return self.parse_import();
        }
        if self.eat_keyword("from") {
            let module = self.parse_dotted_name()?;
            self.expect_keyword("import")?;
            // Only the module matters; the imported names are not bound
            // before the import itself is rejected.
            while !self.at_end() && !self.at_kind(TokenKind::Semi) {
                self.bump();
            }
            return Ok(Expr::Import(module));
        }
        if self.eat_keyword("raise") {
            if self.at_end() || self.at_kind(TokenKind::Semi) {
                return Ok(Expr::Raise(None));
            }
            let value = self.parse_expression()?;
            return Ok(Expr::Raise(Some(Box::new(value))));
        }
        if let Some(token) = self.peek() {
            if token.kind == TokenKind::Name && UNSUPPORTED_STATEMENTS.contains(&token.text.as_str())
            {
                return Err(SandboxError::compile(format!(
                    "'{}' statements are not supported",
                    token.text
                )));
            }
        }

        let first = self.parse_expression_list()?;
        if self.at_kind(TokenKind::Assign) {
            let mut targets = vec![first];
            let mut value;
            loop {
                self.bump();
                value = self.parse_expression_list()?;
                if !self.at_kind(TokenKind::Assign) {
                    break;
                }
                targets.push(value);
            }
            for target in &targets {
                check_target(target)?;
            }
            return Ok(Expr::Assign {
                targets,
                value: Box::new(value),
            });
        }
        if self.at_kind(TokenKind::AugAssign) {
            let token = self.bump().ok_or_else(|| self.unexpected("operator"))?;
            let op = BinOp::from_augmented(&token.text)
                .ok_or_else(|| SandboxError::compile(format!("unknown operator '{}'", token.text)))?;
            if matches!(first, Expr::List(_) | Expr::Tuple(_)) {
                return Err(SandboxError::compile(format!(
                    "'{}' is an illegal expression for augmented assignment",
                    first.describe()
                )));
            }
            check_target(&first)?;
            let value = self.parse_expression_list()?;
            return Ok(Expr::AugAssign {
                target: Box::new(first),
                op,
                value: Box::new(value),
            });
        }
        Ok(first)
    }

    fn parse_import(&mut self) -> SandboxResult<Expr> {
        let module = self.parse_dotted_name()?;
        while !self.at_end() && !self.at_kind(TokenKind::Semi) {
            self.bump();
        }
        Ok(Expr::Import(module))
    }

    fn parse_dotted_name(&mut self) -> SandboxResult<String> {
        let mut name = String::new();
        while self.eat_kind(TokenKind::Dot) {
            name.push('.');
        }
        name.push_str(&self.expect_identifier()?);
        while self.eat_kind(TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_identifier()?);
        }
        Ok(name)
    }

    fn parse_target_list(&mut self) -> SandboxResult<Vec<Expr>> {
        let mut targets = vec![self.parse_or()?];
        while self.eat_kind(TokenKind::Comma) {
            if self.at_end() || self.at_kind(TokenKind::Semi) {
                break;
            }
            targets.push(self.parse_or()?);
        }
        Ok(targets)
    }

    // Expressions.

    /// `a, b, c` at statement level forms a tuple.
    fn parse_expression_list(&mut self) -> SandboxResult<Expr> {
        let first = self.parse_expression()?;
        if !self.at_kind(TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_kind(TokenKind::Comma) {
            if self.at_end()
                || self.at_kind(TokenKind::Semi)
                || self.at_kind(TokenKind::RBracket)
                || self.at_kind(TokenKind::Assign)
                || self.at_kind(TokenKind::AugAssign)
            {
                break;
            }
            items.push(self.parse_expression()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_expression(&mut self) -> SandboxResult<Expr> {
        self.enter()?;
        let result = self.parse_expression_inner();
        self.leave();
        result
    }

    fn parse_expression_inner(&mut self) -> SandboxResult<Expr> {
        if self.at_keyword("lambda") {
            return Err(SandboxError::compile("lambda expressions are not supported"));
        }
        if self.at_kind(TokenKind::Name)
            && self.peek_n(1).is_some_and(|t| t.kind == TokenKind::Walrus)
        {
            let name = self.expect_identifier()?;
            self.bump();
            let value = self.parse_expression()?;
            return Ok(Expr::Walrus {
                name,
                value: Box::new(value),
            });
        }

        let body = self.parse_or()?;
        if !self.eat_keyword("if") {
            return Ok(body);
        }
        let cond = self.parse_or()?;
        self.expect_keyword("else")?;
        let otherwise = self.parse_expression()?;
        Ok(Expr::IfElse {
            cond: Box::new(cond),
            then: Box::new(body),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_or(&mut self) -> SandboxResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> SandboxResult<Expr> {
        let mut lhs = self.parse_not()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> SandboxResult<Expr> {
        if self.eat_keyword("not") {
            self.enter()?;
            let operand = self.parse_not();
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand?),
            });
        }
        self.parse_comparison()
    }

    /// `a < b < c` becomes `a < b and b < c`.
    fn parse_comparison(&mut self) -> SandboxResult<Expr> {
        let first = self.parse_binary_expr(0)?;
        let mut operands = vec![first];
        let mut ops = Vec::new();
        while let Some(op) = self.comparison_op() {
            ops.push(op);
            operands.push(self.parse_binary_expr(0)?);
        }
        if ops.is_empty() {
            return Ok(operands.remove(0));
        }

        let mut chain: Option<Expr> = None;
        for (i, op) in ops.into_iter().enumerate() {
            let pair = Expr::Compare {
                op,
                lhs: Box::new(operands[i].clone()),
                rhs: Box::new(operands[i + 1].clone()),
            };
            chain = Some(match chain {
                None => pair,
                Some(prev) => Expr::And(Box::new(prev), Box::new(pair)),
            });
        }
        chain.ok_or_else(|| self.unexpected("comparison"))
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let kind = self.peek()?.kind;
        let op = match kind {
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::NotEq,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::LtEq => CmpOp::LtE,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::GtEq => CmpOp::GtE,
            TokenKind::Name if self.at_not_in() => {
                self.pos += 2;
                return Some(CmpOp::NotIn);
            }
            TokenKind::Name if self.at_keyword("in") => CmpOp::In,
            TokenKind::Name if self.at_keyword("is") => {
                self.pos += 1;
                if self.eat_keyword("not") {
                    return Some(CmpOp::IsNot);
                }
                return Some(CmpOp::Is);
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn binary_op(&self) -> Option<(BinOp, u8)> {
        let op = match self.peek()?.kind {
            TokenKind::Pipe => (BinOp::BitOr, 1),
            TokenKind::Caret => (BinOp::BitXor, 2),
            TokenKind::Amp => (BinOp::BitAnd, 3),
            TokenKind::LShift => (BinOp::LShift, 4),
            TokenKind::RShift => (BinOp::RShift, 4),
            TokenKind::Plus => (BinOp::Add, 5),
            TokenKind::Minus => (BinOp::Sub, 5),
            TokenKind::Star => (BinOp::Mul, 6),
            TokenKind::Slash => (BinOp::Div, 6),
            TokenKind::DoubleSlash => (BinOp::FloorDiv, 6),
            TokenKind::Percent => (BinOp::Mod, 6),
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary_expr(&mut self, min_prec: u8) -> SandboxResult<Expr> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = self.binary_op() {
            if prec < min_prec {
                break;
            }
            self.bump();
            // All of these operators are left-associative.
            let rhs = self.parse_binary_expr(prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> SandboxResult<Expr> {
        let op = match self.peek().map(|t| t.kind) {
            Some(TokenKind::Minus) => UnaryOp::Neg,
            Some(TokenKind::Plus) => UnaryOp::Pos,
            Some(TokenKind::Tilde) => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        self.bump();
        self.enter()?;
        let operand = self.parse_unary();
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    /// `**` binds tighter than a unary operator on its left and looser than
    /// one on its right: `-2 ** -1` is `-(2 ** (-1))`.
    fn parse_power(&mut self) -> SandboxResult<Expr> {
        let base = self.parse_postfix()?;
        if !self.eat_kind(TokenKind::DoubleStar) {
            return Ok(base);
        }
        self.enter()?;
        let exponent = self.parse_unary();
        self.leave();
        Ok(Expr::Binary {
            op: BinOp::Pow,
            lhs: Box::new(base),
            rhs: Box::new(exponent?),
        })
    }

    fn parse_postfix(&mut self) -> SandboxResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat_kind(TokenKind::Dot) {
                let name = self.expect_identifier()?;
                expr = Expr::Attr {
                    value: Box::new(expr),
                    name,
                };
            } else if self.eat_kind(TokenKind::LParen) {
                let (args, keywords) = self.parse_call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    keywords,
                };
            } else if self.eat_kind(TokenKind::LBracket) {
                expr = self.parse_subscript(expr)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_call_args(&mut self) -> SandboxResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut keywords: Vec<(String, Expr)> = Vec::new();
        while !self.at_kind(TokenKind::RParen) {
            if self.at_kind(TokenKind::Star) || self.at_kind(TokenKind::DoubleStar) {
                return Err(SandboxError::compile("argument unpacking is not supported"));
            }
            let is_keyword = self.at_kind(TokenKind::Name)
                && self.peek_n(1).is_some_and(|t| t.kind == TokenKind::Assign);
            if is_keyword {
                let name = self.expect_identifier()?;
                self.bump();
                if keywords.iter().any(|(existing, _)| *existing == name) {
                    return Err(SandboxError::compile(format!(
                        "keyword argument repeated: {name}"
                    )));
                }
                keywords.push((name, self.parse_expression()?));
            } else {
                if !keywords.is_empty() {
                    return Err(SandboxError::compile(
                        "positional argument follows keyword argument",
                    ));
                }
                args.push(self.parse_expression()?);
            }
            if self.at_keyword("for") {
                return Err(SandboxError::compile("comprehensions are not supported"));
            }
            if !self.eat_kind(TokenKind::Comma) {
                break;
            }
        }
        self.expect_kind(TokenKind::RParen, "')'")?;
        Ok((args, keywords))
    }

    fn parse_subscript(&mut self, value: Expr) -> SandboxResult<Expr> {
        let lower = if self.at_kind(TokenKind::Colon) {
            None
        } else {
            Some(self.parse_expression_list()?)
        };

        if !self.eat_kind(TokenKind::Colon) {
            self.expect_kind(TokenKind::RBracket, "']'")?;
            let index = lower.ok_or_else(|| self.unexpected("index"))?;
            return Ok(Expr::Index {
                value: Box::new(value),
                index: Box::new(index),
            });
        }

        let bound = |parser: &mut Self| -> SandboxResult<Option<Box<Expr>>> {
            if parser.at_kind(TokenKind::Colon) || parser.at_kind(TokenKind::RBracket) {
                Ok(None)
            } else {
                Ok(Some(Box::new(parser.parse_expression()?)))
            }
        };
        let upper = bound(self)?;
        let step = if self.eat_kind(TokenKind::Colon) {
            bound(self)?
        } else {
            None
        };
        self.expect_kind(TokenKind::RBracket, "']'")?;
        Ok(Expr::Slice {
            value: Box::new(value),
            lower: lower.map(Box::new),
            upper,
            step,
        })
    }

    fn parse_atom(&mut self) -> SandboxResult<Expr> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("expression"));
        };
        match token.kind {
            TokenKind::Int => {
                self.bump();
                parse_int_literal(&token.text).map(|i| Expr::Const(Value::Int(i)))
            }
            TokenKind::Float => {
                self.bump();
                let cleaned = token.text.replace('_', "");
                cleaned
                    .parse::<f64>()
                    .map(|f| Expr::Const(Value::Float(f)))
                    .map_err(|_| {
                        SandboxError::compile(format!("invalid float literal '{}'", token.text))
                    })
            }
            TokenKind::Str => {
                // Adjacent literals concatenate.
                let mut text = String::new();
                while let Some(part) = self.peek().filter(|t| t.kind == TokenKind::Str) {
                    text.push_str(&part.text);
                    self.pos += 1;
                }
                Ok(Expr::Const(Value::str(text)))
            }
            TokenKind::Name => match token.text.as_str() {
                "True" => {
                    self.bump();
                    Ok(Expr::Const(Value::Bool(true)))
                }
                "False" => {
                    self.bump();
                    Ok(Expr::Const(Value::Bool(false)))
                }
                "None" => {
                    self.bump();
                    Ok(Expr::Const(Value::None))
                }
                _ => Ok(Expr::Name(self.expect_identifier()?)),
            },
            TokenKind::LParen => {
                self.bump();
                self.enter()?;
                let inner = self.parse_parenthesized();
                self.leave();
                inner
            }
            TokenKind::LBracket => {
                self.bump();
                self.enter()?;
                let items = self.parse_sequence_items(TokenKind::RBracket, "']'");
                self.leave();
                Ok(Expr::List(items?))
            }
            TokenKind::LBrace => {
                self.bump();
                self.enter()?;
                let dict = self.parse_dict();
                self.leave();
                dict
            }
            TokenKind::Unknown => Err(SandboxError::compile(format!(
                "invalid character '{}' at offset {}",
                token.text, token.offset
            ))),
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_parenthesized(&mut self) -> SandboxResult<Expr> {
        if self.eat_kind(TokenKind::RParen) {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.parse_expression()?;
        if self.at_keyword("for") {
            return Err(SandboxError::compile("comprehensions are not supported"));
        }
        if self.eat_kind(TokenKind::RParen) {
            return Ok(first);
        }
        self.expect_kind(TokenKind::Comma, "',' or ')'")?;
        let mut items = vec![first];
        items.extend(self.parse_sequence_items(TokenKind::RParen, "')'")?);
        Ok(Expr::Tuple(items))
    }

    fn parse_sequence_items(&mut self, close: TokenKind, what: &str) -> SandboxResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.at_kind(close) {
            if self.at_kind(TokenKind::Star) {
                return Err(SandboxError::compile("iterable unpacking is not supported"));
            }
            items.push(self.parse_expression()?);
            if self.at_keyword("for") {
                return Err(SandboxError::compile("comprehensions are not supported"));
            }
            if !self.eat_kind(TokenKind::Comma) {
                break;
            }
        }
        self.expect_kind(close, what)?;
        Ok(items)
    }

    fn parse_dict(&mut self) -> SandboxResult<Expr> {
        let mut entries = Vec::new();
        while !self.at_kind(TokenKind::RBrace) {
            if self.at_kind(TokenKind::DoubleStar) {
                return Err(SandboxError::compile("dict unpacking is not supported"));
            }
            let key = self.parse_expression()?;
            if !self.eat_kind(TokenKind::Colon) {
                return Err(SandboxError::compile("set displays are not supported"));
            }
            let value = self.parse_expression()?;
            if self.at_keyword("for") {
                return Err(SandboxError::compile("comprehensions are not supported"));
            }
            entries.push((key, value));
            if !self.eat_kind(TokenKind::Comma) {
                break;
            }
        }
        self.expect_kind(TokenKind::RBrace, "'}'")?;
        Ok(Expr::Dict(entries))
    }
}

fn check_target(target: &Expr) -> SandboxResult<()> {
    match target {
        Expr::Name(_) | Expr::Attr { .. } | Expr::Index { .. } | Expr::Slice { .. } => Ok(()),
        Expr::List(items) | Expr::Tuple(items) => items.iter().try_for_each(check_target),
        other => Err(SandboxError::compile(format!(
            "cannot assign to {}",
            other.describe()
        ))),
    }
}

fn parse_int_literal(text: &str) -> SandboxResult<i64> {
    let cleaned = text.replace('_', "");
    let lower = cleaned.to_ascii_lowercase();
    let parsed = if let Some(digits) = lower.strip_prefix("0x") {
        i64::from_str_radix(digits, 16)
    } else if let Some(digits) = lower.strip_prefix("0o") {
        i64::from_str_radix(digits, 8)
    } else if let Some(digits) = lower.strip_prefix("0b") {
        i64::from_str_radix(digits, 2)
    } else {
        if lower.len() > 1 && lower.starts_with('0') && lower.bytes().any(|b| b != b'0') {
            return Err(SandboxError::compile(format!(
                "leading zeros in decimal integer literals are not permitted: '{text}'"
            )));
        }
        lower.parse::<i64>()
    };
    parsed.map_err(|err| match err.kind() {
        std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow => {
            SandboxError::compile(format!("integer literal '{text}' is too large"))
        }
        _ => SandboxError::compile(format!("invalid integer literal '{text}'")),
    })
}
