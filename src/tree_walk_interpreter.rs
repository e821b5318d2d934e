mod callable;
mod class;
mod environment;

use std::{
    cell::RefCell,
    fmt::{Debug, Display},
    rc::Rc,
};

use rustc_hash::FxHashMap;

use crate::{
    ast::{
        ClassDecl, ExprId, Expression, FunctionDecl, InfixOperator, Literal, LogicalOperator,
        Program, Statement, UnaryOperator,
    },
    resolver::Locals,
    tokenizer::Token,
};

use self::{
    callable::{Callable, UserFunction},
    class::{Class, Instance},
};

pub use self::environment::EnvironmentError;

use self::environment::Environment;

#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    String(String),
    Boolean(bool),
    Callable(Callable),
    Instance(Rc<RefCell<Instance>>),
    Null,
}

impl Value {
    fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    fn is_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Callable(a), Value::Callable(b)) => a.ptr_eq(b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::Callable(Callable::Function(_)) => "function",
            Value::Callable(Callable::Class(_)) => "class",
            Value::Instance(_) => "instance",
            Value::Null => "null",
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Callable(c) => write!(f, "{}", c),
            Value::Instance(instance) => {
                write!(f, "<{} instance>", instance.borrow().class.name)
            }
            Value::Null => write!(f, "null"),
        }
    }
}

/// Outcome of executing a statement. `Return` unwinds to the nearest call.
#[derive(Debug)]
enum Flow {
    Normal,
    Return(Value),
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Undefined variable <{name}> at line {line}")]
    UndefinedVariable { name: String, line: usize },
    #[error("Assignment to constant variable <{name}> at line {line}")]
    AssignmentToConstant { name: String, line: usize },
    #[error("Identifier <{name}> has already been declared at line {line}")]
    IdentifierAlreadyDeclared { name: String, line: usize },
    #[error("<{name}> expected {expected} arguments, got {got} at line {line}")]
    InvalidNumberOfArguments {
        name: String,
        expected: usize,
        got: usize,
        line: usize,
    },
    #[error("Object {object} is not callable at line {line}")]
    ObjectNotCallable { object: String, line: usize },
    #[error("Invalid access of property <{name}> on {object} at line {line}")]
    InvalidPropertyAccess {
        name: String,
        object: String,
        line: usize,
    },
    #[error("Type mismatch: {message} at line {line}")]
    TypeMismatch { message: String, line: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Runtime error: {kind}\n    while executing: {current_statement}")]
    Execution {
        kind: RuntimeError,
        current_statement: Statement,
    },
}

impl ExecutionError {
    pub fn kind(&self) -> &RuntimeError {
        match self {
            ExecutionError::Execution { kind, .. } => kind,
        }
    }
}

pub struct Interpreter {
    globals: Rc<RefCell<Environment>>,
    environment: Rc<RefCell<Environment>>,
    locals: Locals,
    stdout: Rc<RefCell<dyn std::io::Write>>,
}

impl Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("globals", &self.globals)
            .field("environment", &self.environment.as_ptr())
            .field("locals", &self.locals.len())
            .finish()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Rc::new(RefCell::new(std::io::stdout())))
    }
}

impl Interpreter {
    pub fn new(stdout: Rc<RefCell<dyn std::io::Write>>) -> Self {
        let globals = Environment::boxed(None);

        Self {
            environment: globals.clone(),
            globals,
            locals: FxHashMap::default(),
            stdout,
        }
    }

    /// Installs resolved binding depths. Tables from successive programs
    /// accumulate; ids are unique across programs.
    pub fn resolve(&mut self, locals: Locals) {
        self.locals.extend(locals);
    }

    pub fn interpret(&mut self, program: &Program) -> Result<(), ExecutionError> {
        for statement in program.0.iter() {
            tracing::debug!(%statement, "executing statement");
            if let Err(kind) = self.execute(statement) {
                return Err(ExecutionError::Execution {
                    kind,
                    current_statement: statement.clone(),
                });
            }
        }

        Ok(())
    }

    /// Runs `program`, reporting a runtime error instead of returning it.
    /// Returns whether the program completed.
    pub fn run(&mut self, program: &Program) -> bool {
        match self.interpret(program) {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(kind = %error.kind(), "runtime error");
                eprintln!("{error}");
                false
            }
        }
    }

    fn execute(&mut self, statement: &Statement) -> Result<Flow, RuntimeError> {
        match statement {
            Statement::Expression(expression) => {
                self.evaluate(expression)?;
            }
            Statement::Print(expression) => {
                let value = self.evaluate(expression)?;
                writeln!(self.stdout.borrow_mut(), "{}", value)?;
            }
            Statement::Let(name, initializer) => {
                let value = match initializer {
                    Some(initializer) => self.evaluate(initializer)?,
                    None => Value::Null,
                };
                self.define(name, value, false)?;
            }
            Statement::Const(name, initializer) => {
                let value = self.evaluate(initializer)?;
                self.define(name, value, true)?;
            }
            Statement::Block(statements) => {
                let environment = Environment::boxed(Some(self.environment.clone()));
                return self.execute_block(statements, environment);
            }
            Statement::If(condition, then_branch, else_branch) => {
                if self.evaluate(condition)?.is_truthy() {
                    return self.execute(then_branch);
                } else if let Some(else_branch) = else_branch {
                    return self.execute(else_branch);
                }
            }
            Statement::While(condition, body) => {
                while self.evaluate(condition)?.is_truthy() {
                    if let Flow::Return(value) = self.execute(body)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            Statement::Function(declaration) => {
                let function = UserFunction {
                    declaration: declaration.clone(),
                    closure: self.environment.clone(),
                };
                self.define(
                    &declaration.name,
                    Value::Callable(Callable::Function(Rc::new(function))),
                    false,
                )?;
            }
            Statement::Return(_, value) => {
                let value = match value {
                    Some(value) => self.evaluate(value)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
            Statement::Class(class) => self.declare_class(class)?,
        }

        Ok(Flow::Normal)
    }

    fn execute_block(
        &mut self,
        statements: &[Statement],
        environment: Rc<RefCell<Environment>>,
    ) -> Result<Flow, RuntimeError> {
        self.execute_in_scope(environment, |interpreter| {
            for statement in statements {
                if let Flow::Return(value) = interpreter.execute(statement)? {
                    return Ok(Flow::Return(value));
                }
            }
            Ok(Flow::Normal)
        })
    }

    fn execute_in_scope<T>(
        &mut self,
        environment: Rc<RefCell<Environment>>,
        f: impl FnOnce(&mut Self) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let prev = std::mem::replace(&mut self.environment, environment);
        let result = f(self);
        self.environment = prev;
        result
    }

    fn define(&mut self, name: &Token, value: Value, is_const: bool) -> Result<(), RuntimeError> {
        self.environment
            .borrow_mut()
            .define(&name.lexeme, value, is_const)
            .map_err(|e| e.at_line(name.line))
    }

    fn declare_class(&mut self, class: &ClassDecl) -> Result<(), RuntimeError> {
        let name = &class.name;

        let superclass = match &class.superclass {
            Some(expression) => match self.evaluate(expression)? {
                Value::Callable(Callable::Class(superclass)) => Some(superclass),
                other => {
                    return Err(RuntimeError::TypeMismatch {
                        message: format!(
                            "superclass of <{}> must be a class, found {}",
                            name.lexeme,
                            other.type_name()
                        ),
                        line: name.line,
                    })
                }
            },
            None => None,
        };

        // Bound before the methods are built so they can refer to the class.
        // A failed superclass leaves no binding behind.
        self.define(name, Value::Null, false)?;

        let closure = self.environment.clone();
        let functions = |declarations: &[Rc<FunctionDecl>]| {
            declarations
                .iter()
                .map(|declaration| {
                    let function = UserFunction {
                        declaration: declaration.clone(),
                        closure: closure.clone(),
                    };
                    (declaration.name.lexeme.clone(), Rc::new(function))
                })
                .collect::<FxHashMap<_, _>>()
        };

        let class = Class {
            name: name.lexeme.clone(),
            superclass,
            methods: functions(&class.methods),
            static_methods: functions(&class.static_methods),
        };

        Environment::assign_at(
            &self.environment,
            0,
            &name.lexeme,
            Value::Callable(Callable::Class(Rc::new(class))),
        )
        .map_err(|e| e.at_line(name.line))
    }

    fn look_up_variable(&self, id: ExprId, name: &Token) -> Result<Value, RuntimeError> {
        let value = match self.locals.get(&id) {
            Some(depth) => Environment::get_at(&self.environment, *depth, &name.lexeme),
            None => self.globals.borrow().get(&name.lexeme),
        };
        value.map_err(|e| e.at_line(name.line))
    }

    fn evaluate(&mut self, expression: &Expression) -> Result<Value, RuntimeError> {
        match expression {
            Expression::Literal(literal) => Ok(match literal {
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Boolean(b) => Value::Boolean(*b),
                Literal::Null => Value::Null,
            }),
            Expression::Variable { id, name, .. } => self.look_up_variable(*id, name),
            Expression::Assign { id, name, value } => {
                let value = self.evaluate(value)?;
                let assigned = match self.locals.get(id) {
                    Some(depth) => {
                        Environment::assign_at(&self.environment, *depth, &name.lexeme, value.clone())
                    }
                    None => self
                        .globals
                        .borrow_mut()
                        .assign(&name.lexeme, value.clone()),
                };
                assigned.map_err(|e| e.at_line(name.line))?;
                Ok(value)
            }
            Expression::Grouping(expression) => self.evaluate(expression),
            Expression::Unary(op, token, right) => {
                let right = self.evaluate(right)?;
                match (op, right) {
                    (UnaryOperator::Negate, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOperator::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
                    (UnaryOperator::Truthy, value) => Ok(Value::Boolean(value.is_truthy())),
                    (op, value) => Err(RuntimeError::TypeMismatch {
                        message: format!("cannot apply {} to {}", op, value.type_name()),
                        line: token.line,
                    }),
                }
            }
            Expression::Logical(left, op, right) => {
                let left = self.evaluate(left)?;
                let short_circuits = match op {
                    LogicalOperator::Or => left.is_truthy(),
                    LogicalOperator::And => !left.is_truthy(),
                };
                if short_circuits {
                    Ok(left)
                } else {
                    self.evaluate(right)
                }
            }
            Expression::Binary(left, InfixOperator::NullCoalesce, _, right) => {
                match self.evaluate(left)? {
                    Value::Null => self.evaluate(right),
                    left => Ok(left),
                }
            }
            Expression::Binary(left, op, token, right) => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                self.binary(*op, token, left, right)
            }
            Expression::Call {
                callee,
                paren,
                args,
            } => {
                let callee = self.evaluate(callee)?;
                let args = args
                    .iter()
                    .map(|arg| self.evaluate(arg))
                    .collect::<Result<Vec<_>, _>>()?;

                match callee {
                    Value::Callable(callable) => callable.call(self, args, paren.line),
                    other => Err(RuntimeError::ObjectNotCallable {
                        object: other.to_string(),
                        line: paren.line,
                    }),
                }
            }
            Expression::AccessProperty {
                object,
                name,
                is_super_access: true,
            } => self.super_access(object, name),
            Expression::AccessProperty { object, name, .. } => match self.evaluate(object)? {
                Value::Instance(instance) => Instance::get(&instance, name),
                Value::Callable(Callable::Class(class)) => class.get_static(name),
                other => Err(RuntimeError::InvalidPropertyAccess {
                    name: name.lexeme.clone(),
                    object: other.to_string(),
                    line: name.line,
                }),
            },
            Expression::SetProperty {
                object,
                name,
                value,
            } => match self.evaluate(object)? {
                Value::Instance(instance) => {
                    let value = self.evaluate(value)?;
                    instance.borrow_mut().set(name, value.clone());
                    Ok(value)
                }
                other => Err(RuntimeError::InvalidPropertyAccess {
                    name: name.lexeme.clone(),
                    object: other.to_string(),
                    line: name.line,
                }),
            },
        }
    }

    /// `super.name`: the method is looked up from the superclass bound in the
    /// method's frame, and bound to the `this` living in that same frame.
    fn super_access(&mut self, object: &Expression, name: &Token) -> Result<Value, RuntimeError> {
        let Expression::Variable { id, name: keyword, .. } = object else {
            return Err(RuntimeError::InvalidPropertyAccess {
                name: name.lexeme.clone(),
                object: object.to_string(),
                line: name.line,
            });
        };

        let superclass = match self.look_up_variable(*id, keyword)? {
            Value::Callable(Callable::Class(class)) => class,
            other => {
                return Err(RuntimeError::InvalidPropertyAccess {
                    name: name.lexeme.clone(),
                    object: other.to_string(),
                    line: name.line,
                })
            }
        };

        let this = match self.locals.get(id) {
            Some(depth) => Environment::get_at(&self.environment, *depth, "this"),
            None => self.globals.borrow().get("this"),
        }
        .map_err(|e| e.at_line(keyword.line))?;

        match this {
            Value::Instance(instance) => Instance::get_method(&instance, &superclass, name),
            other => Err(RuntimeError::InvalidPropertyAccess {
                name: name.lexeme.clone(),
                object: other.to_string(),
                line: name.line,
            }),
        }
    }

    fn binary(
        &self,
        op: InfixOperator,
        token: &Token,
        left: Value,
        right: Value,
    ) -> Result<Value, RuntimeError> {
        let value = match (op, &left, &right) {
            (InfixOperator::Equal, _, _) => Value::Boolean(left.is_equal(&right)),
            (InfixOperator::NotEqual, _, _) => Value::Boolean(!left.is_equal(&right)),
            (InfixOperator::Plus, Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (InfixOperator::Plus, Value::String(_), _) | (InfixOperator::Plus, _, Value::String(_)) => {
                Value::String(format!("{}{}", left, right))
            }
            (InfixOperator::Minus, Value::Number(a), Value::Number(b)) => Value::Number(a - b),
            (InfixOperator::Multiply, Value::Number(a), Value::Number(b)) => Value::Number(a * b),
            (InfixOperator::Divide, Value::Number(a), Value::Number(b)) => Value::Number(a / b),
            (InfixOperator::Mod, Value::Number(a), Value::Number(b)) => Value::Number(a % b),
            (InfixOperator::LessThan, Value::Number(a), Value::Number(b)) => Value::Boolean(a < b),
            (InfixOperator::LessThanOrEqual, Value::Number(a), Value::Number(b)) => {
                Value::Boolean(a <= b)
            }
            (InfixOperator::GreaterThan, Value::Number(a), Value::Number(b)) => {
                Value::Boolean(a > b)
            }
            (InfixOperator::GreaterThanOrEqual, Value::Number(a), Value::Number(b)) => {
                Value::Boolean(a >= b)
            }
            _ => {
                return Err(RuntimeError::TypeMismatch {
                    message: format!(
                        "cannot apply {} to {} and {}",
                        op,
                        left.type_name(),
                        right.type_name()
                    ),
                    line: token.line,
                })
            }
        };

        Ok(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ast::VariableKind, tokenizer::TokenType};

    fn token(lexeme: &str) -> Token {
        Token {
            token_type: TokenType::Identifier,
            lexeme: lexeme.to_string(),
            line: 1,
        }
    }

    #[test]
    fn test_super_access_on_non_variable_is_an_error() {
        let program = Program(vec![Statement::Expression(Expression::AccessProperty {
            object: Box::new(Expression::Literal(Literal::Number(1.0))),
            name: token("get"),
            is_super_access: true,
        })]);

        let output = Rc::new(RefCell::new(Vec::new()));
        let mut interpreter = Interpreter::new(output.clone());
        let error = interpreter.interpret(&program).unwrap_err();

        assert!(matches!(
            error.kind(),
            RuntimeError::InvalidPropertyAccess { name, line: 1, .. } if name == "get"
        ));
    }

    #[test]
    fn test_run_reports_and_stops_at_first_error() {
        let program = Program(vec![
            Statement::Print(Expression::Literal(Literal::Number(1.0))),
            Statement::Print(Expression::variable(
                token("nope"),
                VariableKind::Identifier,
            )),
            Statement::Print(Expression::Literal(Literal::Number(2.0))),
        ]);

        let output = Rc::new(RefCell::new(Vec::new()));
        let mut interpreter = Interpreter::new(output.clone());

        assert!(!interpreter.run(&program));
        assert_eq!(String::from_utf8(output.take()).unwrap(), "1\n");
    }
}
