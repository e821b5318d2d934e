use std::{
    fmt::Display,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::tokenizer::Token;

#[derive(Debug)]
pub struct Program(pub Vec<Statement>);

/// Identity of an expression node, used as the key of the resolver's side table.
///
/// Ids come from a process-wide counter so that programs parsed at different
/// times (one per REPL submission) never share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(usize);

static NEXT_EXPR_ID: AtomicUsize = AtomicUsize::new(0);

impl ExprId {
    pub fn fresh() -> Self {
        ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone)]
pub enum Statement {
    Expression(Expression),
    Print(Expression),
    Let(Token, Option<Expression>),
    Const(Token, Expression),
    Block(Vec<Statement>),
    If(Expression, Box<Statement>, Option<Box<Statement>>),
    While(Expression, Box<Statement>),
    Function(Rc<FunctionDecl>),
    Return(Token, Option<Expression>),
    Class(ClassDecl),
}

#[derive(Debug)]
pub struct FunctionDecl {
    pub name: Token,
    pub params: Vec<Token>,
    pub body: Vec<Statement>,
}

impl FunctionDecl {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: Token,
    /// Always an `Expression::Variable` of kind `VariableKind::Identifier`.
    pub superclass: Option<Expression>,
    pub methods: Vec<Rc<FunctionDecl>>,
    pub static_methods: Vec<Rc<FunctionDecl>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Identifier,
    This,
    Super,
}

#[derive(Debug, Clone)]
pub enum Expression {
    Literal(Literal),
    Variable {
        id: ExprId,
        name: Token,
        kind: VariableKind,
    },
    Assign {
        id: ExprId,
        name: Token,
        value: Box<Expression>,
    },
    Unary(UnaryOperator, Token, Box<Expression>),
    Binary(Box<Expression>, InfixOperator, Token, Box<Expression>),
    Logical(Box<Expression>, LogicalOperator, Box<Expression>),
    Grouping(Box<Expression>),
    Call {
        callee: Box<Expression>,
        paren: Token,
        args: Vec<Expression>,
    },
    AccessProperty {
        object: Box<Expression>,
        name: Token,
        is_super_access: bool,
    },
    SetProperty {
        object: Box<Expression>,
        name: Token,
        value: Box<Expression>,
    },
}

impl Expression {
    pub fn variable(name: Token, kind: VariableKind) -> Self {
        Expression::Variable {
            id: ExprId::fresh(),
            name,
            kind,
        }
    }

    pub fn assign(name: Token, value: Expression) -> Self {
        Expression::Assign {
            id: ExprId::fresh(),
            name,
            value: Box::new(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Not,
    Truthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Plus,
    Minus,
    Multiply,
    Divide,
    Mod,
    NullCoalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

impl Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for statement in &self.0 {
            writeln!(f, "{}", statement)?;
        }
        Ok(())
    }
}

fn write_list<T: Display>(f: &mut std::fmt::Formatter<'_>, items: &[T]) -> std::fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i != 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_function(
    f: &mut std::fmt::Formatter<'_>,
    prefix: &str,
    decl: &FunctionDecl,
) -> std::fmt::Result {
    write!(f, "{prefix}{}(", decl.name.lexeme)?;
    let params: Vec<_> = decl.params.iter().map(|p| p.lexeme.as_str()).collect();
    write_list(f, &params)?;
    writeln!(f, ") {{")?;
    for statement in &decl.body {
        writeln!(f, "{statement}")?;
    }
    write!(f, "}}")
}

impl Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Statement::Expression(expr) => write!(f, "{};", expr),
            Statement::Print(expr) => write!(f, "print {};", expr),
            Statement::Let(name, Some(expr)) => write!(f, "let {} = {};", name.lexeme, expr),
            Statement::Let(name, None) => write!(f, "let {};", name.lexeme),
            Statement::Const(name, expr) => write!(f, "const {} = {};", name.lexeme, expr),
            Statement::Block(statements) => {
                writeln!(f, "{{")?;
                for statement in statements {
                    writeln!(f, "{}", statement)?;
                }
                write!(f, "}}")
            }
            Statement::If(condition, then_branch, else_branch) => {
                write!(f, "if ({}) {}", condition, then_branch)?;
                if let Some(else_branch) = else_branch {
                    write!(f, " else {}", else_branch)?;
                }
                Ok(())
            }
            Statement::While(condition, body) => write!(f, "while ({}) {}", condition, body),
            Statement::Function(decl) => write_function(f, "function ", decl),
            Statement::Return(_, Some(expr)) => write!(f, "return {};", expr),
            Statement::Return(_, None) => write!(f, "return;"),
            Statement::Class(class) => {
                write!(f, "class {}", class.name.lexeme)?;
                if let Some(superclass) = &class.superclass {
                    write!(f, " extends {}", superclass)?;
                }
                writeln!(f, " {{")?;
                for method in &class.methods {
                    write_function(f, "", method)?;
                    writeln!(f)?;
                }
                for method in &class.static_methods {
                    write_function(f, "static ", method)?;
                    writeln!(f)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Literal(literal) => write!(f, "{}", literal),
            Expression::Variable { name, .. } => write!(f, "{}", name.lexeme),
            Expression::Assign { name, value, .. } => write!(f, "{} = {}", name.lexeme, value),
            Expression::Unary(op, _, right) => write!(f, "({} {})", op, right),
            Expression::Binary(left, op, _, right) => write!(f, "({} {} {})", op, left, right),
            Expression::Logical(left, op, right) => write!(f, "({} {} {})", op, left, right),
            Expression::Grouping(expr) => write!(f, "({})", expr),
            Expression::Call { callee, args, .. } => {
                write!(f, "{}(", callee)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expression::AccessProperty { object, name, .. } => {
                write!(f, "{}.{}", object, name.lexeme)
            }
            Expression::SetProperty {
                object,
                name,
                value,
            } => write!(f, "{}.{} = {}", object, name.lexeme, value),
        }
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "\"{}\"", s),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => write!(f, "null"),
        }
    }
}

impl Display for InfixOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InfixOperator::Equal => write!(f, "=="),
            InfixOperator::NotEqual => write!(f, "!="),
            InfixOperator::LessThan => write!(f, "<"),
            InfixOperator::LessThanOrEqual => write!(f, "<="),
            InfixOperator::GreaterThan => write!(f, ">"),
            InfixOperator::GreaterThanOrEqual => write!(f, ">="),
            InfixOperator::Plus => write!(f, "+"),
            InfixOperator::Minus => write!(f, "-"),
            InfixOperator::Multiply => write!(f, "*"),
            InfixOperator::Divide => write!(f, "/"),
            InfixOperator::Mod => write!(f, "mod"),
            InfixOperator::NullCoalesce => write!(f, "??"),
        }
    }
}

impl Display for LogicalOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalOperator::And => write!(f, "and"),
            LogicalOperator::Or => write!(f, "or"),
        }
    }
}

impl Display for UnaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOperator::Negate => write!(f, "-"),
            UnaryOperator::Not => write!(f, "!"),
            UnaryOperator::Truthy => write!(f, "!!"),
        }
    }
}
