//! Expression and handler lowering.
//!
//! Expression and handler sources arrive as JavaScript text. They are parsed
//! with oxc and lowered into a small owned IR that the dependency analysis,
//! the JS emitter and the Rust runtime all share.

use crate::validate::CompileError;
use oxc_allocator::Allocator;
use oxc_ast::ast::{
    AssignmentTarget, BindingPattern, Expression, SimpleAssignmentTarget, Statement,
};
use oxc_parser::Parser;
use oxc_span::SourceType;
use oxc_syntax::operator::{
    AssignmentOperator, BinaryOperator, LogicalOperator, UnaryOperator, UpdateOperator,
};
use serde::{Deserialize, Serialize};

/// Name of the explicit batching call accepted inside handler bodies.
pub const REQUEST_UPDATE: &str = "requestUpdate";

// ═══════════════════════════════════════════════════════════════════════════════
// IR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Expr {
    Undefined,
    Null,
    Bool {
        value: bool,
    },
    Number {
        value: f64,
    },
    Str {
        value: String,
    },
    Ident {
        name: String,
    },
    Template {
        quasis: Vec<String>,
        expressions: Vec<Expr>,
    },
    Array {
        elements: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        argument: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Call {
        callee: Callee,
        arguments: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
}

/// Call targets are never dependencies; method receivers are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Callee {
    Function { name: String },
    Method { object: Box<Expr>, method: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    Typeof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Exp,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogicalOp {
    And,
    Or,
    Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateOp {
    Increment,
    Decrement,
}

/// A lowered handler statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Stmt {
    Assign {
        target: String,
        op: AssignOp,
        value: Expr,
    },
    Update {
        target: String,
        op: UpdateOp,
    },
    If {
        test: Expr,
        consequent: Vec<Stmt>,
        alternate: Vec<Stmt>,
    },
    Eval {
        expr: Expr,
    },
    RequestUpdate {
        names: Vec<String>,
    },
}

impl BinaryOp {
    pub fn as_js(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Exp => "**",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::StrictEq => "===",
            Self::StrictNotEq => "!==",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

impl LogicalOp {
    pub fn as_js(self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
            Self::Coalesce => "??",
        }
    }
}

impl AssignOp {
    pub fn as_js(self) -> &'static str {
        match self {
            Self::Assign => "=",
            Self::Add => "+=",
            Self::Sub => "-=",
            Self::Mul => "*=",
            Self::Div => "/=",
            Self::Rem => "%=",
        }
    }

    /// The binary operator a compound assignment applies.
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            Self::Assign => None,
            Self::Add => Some(BinaryOp::Add),
            Self::Sub => Some(BinaryOp::Sub),
            Self::Mul => Some(BinaryOp::Mul),
            Self::Div => Some(BinaryOp::Div),
            Self::Rem => Some(BinaryOp::Rem),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAME EXTRACTION
// ═══════════════════════════════════════════════════════════════════════════════

impl Expr {
    pub fn ident(name: &str) -> Self {
        Expr::Ident {
            name: name.to_string(),
        }
    }

    /// Free identifiers read by the expression, in first-occurrence order.
    ///
    /// Lambda parameters are bound and excluded. Plain call targets are not
    /// reads; see [`Expr::call_targets`].
    pub fn free_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut bound = Vec::new();
        collect_free(self, &mut bound, &mut out);
        out
    }

    /// Names used as plain function-call targets.
    pub fn call_targets(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_call_targets(self, &mut out);
        out
    }

    fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Template { expressions, .. } => expressions.iter().collect(),
            Expr::Array { elements } => elements.iter().collect(),
            Expr::Unary { argument, .. } => vec![argument],
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                vec![left, right]
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => vec![test, consequent, alternate],
            Expr::Call { callee, arguments } => {
                let mut out: Vec<&Expr> = Vec::new();
                if let Callee::Method { object, .. } = callee {
                    out.push(object);
                }
                out.extend(arguments.iter());
                out
            }
            Expr::Member { object, .. } => vec![object],
            Expr::Index { object, index } => vec![object, index],
            Expr::Lambda { body, .. } => vec![body],
            _ => vec![],
        }
    }
}

fn collect_free(expr: &Expr, bound: &mut Vec<String>, out: &mut Vec<String>) {
    match expr {
        Expr::Ident { name } => {
            if !bound.contains(name) && !out.contains(name) {
                out.push(name.clone());
            }
        }
        Expr::Lambda { params, body } => {
            let depth = bound.len();
            bound.extend(params.iter().cloned());
            collect_free(body, bound, out);
            bound.truncate(depth);
        }
        other => {
            for child in other.children() {
                collect_free(child, bound, out);
            }
        }
    }
}

fn collect_call_targets(expr: &Expr, out: &mut Vec<String>) {
    if let Expr::Call {
        callee: Callee::Function { name },
        ..
    } = expr
    {
        if !out.contains(name) {
            out.push(name.clone());
        }
    }
    for child in expr.children() {
        collect_call_targets(child, out);
    }
}

impl Stmt {
    /// Every expression the statement evaluates.
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            Stmt::Assign { value, .. } => vec![value],
            Stmt::Update { .. } | Stmt::RequestUpdate { .. } => vec![],
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                let mut out = vec![test];
                for s in consequent.iter().chain(alternate.iter()) {
                    out.extend(s.expressions());
                }
                out
            }
            Stmt::Eval { expr } => vec![expr],
        }
    }
}

/// Names a handler body assigns, in first-assignment order.
pub fn assigned_names(body: &[Stmt]) -> Vec<String> {
    let mut out = Vec::new();
    collect_assigned(body, &mut out);
    out
}

fn collect_assigned(body: &[Stmt], out: &mut Vec<String>) {
    for stmt in body {
        match stmt {
            Stmt::Assign { target, .. } | Stmt::Update { target, .. } => {
                if !out.contains(target) {
                    out.push(target.clone());
                }
            }
            Stmt::If {
                consequent,
                alternate,
                ..
            } => {
                collect_assigned(consequent, out);
                collect_assigned(alternate, out);
            }
            Stmt::Eval { .. } | Stmt::RequestUpdate { .. } => {}
        }
    }
}

/// Names a handler body explicitly requests an update for.
pub fn requested_names(body: &[Stmt]) -> Vec<String> {
    let mut out = Vec::new();
    for stmt in body {
        match stmt {
            Stmt::RequestUpdate { names } => {
                for n in names {
                    if !out.contains(n) {
                        out.push(n.clone());
                    }
                }
            }
            Stmt::If {
                consequent,
                alternate,
                ..
            } => {
                for n in requested_names(consequent)
                    .into_iter()
                    .chain(requested_names(alternate))
                {
                    if !out.contains(&n) {
                        out.push(n);
                    }
                }
            }
            _ => {}
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOWERING
// ═══════════════════════════════════════════════════════════════════════════════

fn source_type() -> SourceType {
    SourceType::default().with_module(true)
}

/// Parse and lower a single expression.
pub fn parse_expression(code: &str, origin: &str) -> Result<Expr, CompileError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, code, source_type()).parse_expression();

    match ret {
        Ok(expr) => Lowerer { code, origin }.expr(&expr),
        Err(errors) => Err(CompileError::InvalidExpression {
            code: code.to_string(),
            origin: origin.to_string(),
            reason: format!("Invalid expression syntax: {:?}", errors),
        }),
    }
}

/// Parse and lower a handler body.
///
/// Accepts a statement list (`count += 1; total = count * 2`) or a single
/// arrow function whose body is lowered in its place (`() => count++`).
pub fn parse_statements(code: &str, origin: &str) -> Result<Vec<Stmt>, CompileError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, code, source_type()).parse();

    if !ret.errors.is_empty() {
        return Err(CompileError::InvalidExpression {
            code: code.to_string(),
            origin: origin.to_string(),
            reason: format!("Invalid handler syntax: {:?}", ret.errors),
        });
    }

    let lowerer = Lowerer { code, origin };
    let mut out = Vec::new();
    for stmt in &ret.program.body {
        lowerer.statement(stmt, &mut out)?;
    }
    Ok(out)
}

struct Lowerer<'s> {
    code: &'s str,
    origin: &'s str,
}

impl<'s> Lowerer<'s> {
    fn unsupported(&self, what: &str) -> CompileError {
        CompileError::InvalidExpression {
            code: self.code.to_string(),
            origin: self.origin.to_string(),
            reason: format!("{} is not supported", what),
        }
    }

    fn statement(&self, stmt: &Statement, out: &mut Vec<Stmt>) -> Result<(), CompileError> {
        match stmt {
            Statement::ExpressionStatement(es) => self.effect(&es.expression, out),
            Statement::BlockStatement(block) => {
                for s in &block.body {
                    self.statement(s, out)?;
                }
                Ok(())
            }
            Statement::IfStatement(if_stmt) => {
                let test = self.expr(&if_stmt.test)?;
                let mut consequent = Vec::new();
                self.statement(&if_stmt.consequent, &mut consequent)?;
                let mut alternate = Vec::new();
                if let Some(alt) = &if_stmt.alternate {
                    self.statement(alt, &mut alternate)?;
                }
                out.push(Stmt::If {
                    test,
                    consequent,
                    alternate,
                });
                Ok(())
            }
            Statement::EmptyStatement(_) => Ok(()),
            _ => Err(self.unsupported("this statement kind")),
        }
    }

    /// Lower an expression evaluated for its effect.
    fn effect(&self, expr: &Expression, out: &mut Vec<Stmt>) -> Result<(), CompileError> {
        match expr {
            Expression::ParenthesizedExpression(paren) => self.effect(&paren.expression, out),
            Expression::SequenceExpression(seq) => {
                for e in &seq.expressions {
                    self.effect(e, out)?;
                }
                Ok(())
            }
            Expression::ArrowFunctionExpression(arrow) => {
                if !arrow.params.items.is_empty() {
                    return Err(self.unsupported("a handler with parameters"));
                }
                for s in &arrow.body.statements {
                    self.statement(s, out)?;
                }
                Ok(())
            }
            Expression::AssignmentExpression(assign) => {
                let target = match &assign.left {
                    AssignmentTarget::AssignmentTargetIdentifier(id) => id.name.to_string(),
                    _ => return Err(self.unsupported("assignment to a member or pattern")),
                };
                let op = match assign.operator {
                    AssignmentOperator::Assign => AssignOp::Assign,
                    AssignmentOperator::Addition => AssignOp::Add,
                    AssignmentOperator::Subtraction => AssignOp::Sub,
                    AssignmentOperator::Multiplication => AssignOp::Mul,
                    AssignmentOperator::Division => AssignOp::Div,
                    AssignmentOperator::Remainder => AssignOp::Rem,
                    _ => return Err(self.unsupported("this assignment operator")),
                };
                let value = self.expr(&assign.right)?;
                out.push(Stmt::Assign { target, op, value });
                Ok(())
            }
            Expression::UpdateExpression(update) => {
                let target = match &update.argument {
                    SimpleAssignmentTarget::AssignmentTargetIdentifier(id) => id.name.to_string(),
                    _ => return Err(self.unsupported("update of a member")),
                };
                let op = match update.operator {
                    UpdateOperator::Increment => UpdateOp::Increment,
                    UpdateOperator::Decrement => UpdateOp::Decrement,
                };
                out.push(Stmt::Update { target, op });
                Ok(())
            }
            Expression::CallExpression(call) => {
                if let Expression::Identifier(id) = &call.callee {
                    if id.name == REQUEST_UPDATE {
                        out.push(Stmt::RequestUpdate {
                            names: self.request_update_names(call.arguments.iter().filter_map(|a| a.as_expression()).collect())?,
                        });
                        return Ok(());
                    }
                }
                out.push(Stmt::Eval {
                    expr: self.expr(expr)?,
                });
                Ok(())
            }
            other => {
                out.push(Stmt::Eval {
                    expr: self.expr(other)?,
                });
                Ok(())
            }
        }
    }

    fn request_update_names(&self, args: Vec<&Expression>) -> Result<Vec<String>, CompileError> {
        let [Expression::ArrayExpression(arr)] = args.as_slice() else {
            return Err(self.unsupported("requestUpdate without a single array of names"));
        };
        let mut names = Vec::new();
        for elem in &arr.elements {
            match elem.as_expression() {
                Some(Expression::StringLiteral(s)) => names.push(s.value.to_string()),
                _ => return Err(self.unsupported("a non-literal name in requestUpdate")),
            }
        }
        Ok(names)
    }

    fn boxed(&self, expr: &Expression) -> Result<Box<Expr>, CompileError> {
        Ok(Box::new(self.expr(expr)?))
    }

    fn expr(&self, expr: &Expression) -> Result<Expr, CompileError> {
        let lowered = match expr {
            Expression::NullLiteral(_) => Expr::Null,
            Expression::BooleanLiteral(b) => Expr::Bool { value: b.value },
            Expression::NumericLiteral(n) => Expr::Number { value: n.value },
            Expression::StringLiteral(s) => Expr::Str {
                value: s.value.to_string(),
            },
            Expression::Identifier(id) => match id.name.to_string().as_str() {
                "undefined" => Expr::Undefined,
                "NaN" => Expr::Number { value: f64::NAN },
                "Infinity" => Expr::Number {
                    value: f64::INFINITY,
                },
                name => Expr::ident(name),
            },
            Expression::TemplateLiteral(tpl) => {
                let quasis = tpl
                    .quasis
                    .iter()
                    .map(|q| match &q.value.cooked {
                        Some(cooked) => cooked.to_string(),
                        None => q.value.raw.to_string(),
                    })
                    .collect();
                let expressions = tpl
                    .expressions
                    .iter()
                    .map(|e| self.expr(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Expr::Template {
                    quasis,
                    expressions,
                }
            }
            Expression::ArrayExpression(arr) => {
                let mut elements = Vec::new();
                for elem in &arr.elements {
                    match elem.as_expression() {
                        Some(e) => elements.push(self.expr(e)?),
                        None => return Err(self.unsupported("spread or hole in an array")),
                    }
                }
                Expr::Array { elements }
            }
            Expression::ParenthesizedExpression(paren) => self.expr(&paren.expression)?,
            Expression::UnaryExpression(unary) => {
                let op = match unary.operator {
                    UnaryOperator::UnaryNegation => UnaryOp::Neg,
                    UnaryOperator::UnaryPlus => UnaryOp::Plus,
                    UnaryOperator::LogicalNot => UnaryOp::Not,
                    UnaryOperator::Typeof => UnaryOp::Typeof,
                    _ => return Err(self.unsupported("this unary operator")),
                };
                Expr::Unary {
                    op,
                    argument: self.boxed(&unary.argument)?,
                }
            }
            Expression::BinaryExpression(bin) => {
                let op = match bin.operator {
                    BinaryOperator::Addition => BinaryOp::Add,
                    BinaryOperator::Subtraction => BinaryOp::Sub,
                    BinaryOperator::Multiplication => BinaryOp::Mul,
                    BinaryOperator::Division => BinaryOp::Div,
                    BinaryOperator::Remainder => BinaryOp::Rem,
                    BinaryOperator::Exponential => BinaryOp::Exp,
                    BinaryOperator::Equality => BinaryOp::Eq,
                    BinaryOperator::Inequality => BinaryOp::NotEq,
                    BinaryOperator::StrictEquality => BinaryOp::StrictEq,
                    BinaryOperator::StrictInequality => BinaryOp::StrictNotEq,
                    BinaryOperator::LessThan => BinaryOp::Lt,
                    BinaryOperator::LessEqualThan => BinaryOp::LtEq,
                    BinaryOperator::GreaterThan => BinaryOp::Gt,
                    BinaryOperator::GreaterEqualThan => BinaryOp::GtEq,
                    _ => return Err(self.unsupported("this binary operator")),
                };
                Expr::Binary {
                    op,
                    left: self.boxed(&bin.left)?,
                    right: self.boxed(&bin.right)?,
                }
            }
            Expression::LogicalExpression(logical) => {
                let op = match logical.operator {
                    LogicalOperator::And => LogicalOp::And,
                    LogicalOperator::Or => LogicalOp::Or,
                    LogicalOperator::Coalesce => LogicalOp::Coalesce,
                };
                Expr::Logical {
                    op,
                    left: self.boxed(&logical.left)?,
                    right: self.boxed(&logical.right)?,
                }
            }
            Expression::ConditionalExpression(cond) => Expr::Conditional {
                test: self.boxed(&cond.test)?,
                consequent: self.boxed(&cond.consequent)?,
                alternate: self.boxed(&cond.alternate)?,
            },
            Expression::CallExpression(call) => {
                let callee = match &call.callee {
                    Expression::Identifier(id) => Callee::Function {
                        name: id.name.to_string(),
                    },
                    Expression::StaticMemberExpression(member) => Callee::Method {
                        object: self.boxed(&member.object)?,
                        method: member.property.name.to_string(),
                    },
                    _ => return Err(self.unsupported("this call target")),
                };
                let mut arguments = Vec::new();
                for arg in &call.arguments {
                    match arg.as_expression() {
                        Some(e) => arguments.push(self.expr(e)?),
                        None => return Err(self.unsupported("spread arguments")),
                    }
                }
                Expr::Call { callee, arguments }
            }
            Expression::StaticMemberExpression(member) => Expr::Member {
                object: self.boxed(&member.object)?,
                property: member.property.name.to_string(),
            },
            Expression::ComputedMemberExpression(member) => Expr::Index {
                object: self.boxed(&member.object)?,
                index: self.boxed(&member.expression)?,
            },
            Expression::ArrowFunctionExpression(arrow) => {
                let mut params = Vec::new();
                for param in &arrow.params.items {
                    match &param.pattern {
                        BindingPattern::BindingIdentifier(id) => params.push(id.name.to_string()),
                        _ => return Err(self.unsupported("destructuring parameters")),
                    }
                }
                if !arrow.expression {
                    return Err(self.unsupported("a block-bodied arrow function in an expression"));
                }
                let body = match arrow.body.statements.first() {
                    Some(Statement::ExpressionStatement(es)) => self.expr(&es.expression)?,
                    _ => return Err(self.unsupported("an empty arrow function")),
                };
                Expr::Lambda {
                    params,
                    body: Box::new(body),
                }
            }
            Expression::AssignmentExpression(_) | Expression::UpdateExpression(_) => {
                return Err(self.unsupported("assignment inside an expression"));
            }
            _ => return Err(self.unsupported("this expression kind")),
        };
        Ok(lowered)
    }
}
