use std::{cell::RefCell, fmt::Display, rc::Rc};

use crate::ast::FunctionDecl;

use super::{
    class::{Class, Instance},
    environment::Environment,
    Flow, Interpreter, RuntimeError, Value,
};

/// A function or method together with the environment it closes over.
pub struct UserFunction {
    pub declaration: Rc<FunctionDecl>,
    pub closure: Rc<RefCell<Environment>>,
}

impl std::fmt::Debug for UserFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserFunction")
            .field("name", &self.declaration.name.lexeme)
            .field("arity", &self.declaration.arity())
            .field("closure", &self.closure.as_ptr())
            .finish()
    }
}

impl UserFunction {
    pub fn name(&self) -> &str {
        &self.declaration.name.lexeme
    }

    /// Wraps the closure in a frame holding `this`, plus `super` when the
    /// class the method was found on has a superclass.
    pub fn bind(
        &self,
        instance: &Rc<RefCell<Instance>>,
        superclass: Option<&Rc<Class>>,
    ) -> Result<UserFunction, RuntimeError> {
        let line = self.declaration.name.line;
        let environment = Environment::boxed(Some(self.closure.clone()));
        {
            let mut frame = environment.borrow_mut();
            frame
                .define("this", Value::Instance(instance.clone()), false)
                .map_err(|e| e.at_line(line))?;
            if let Some(superclass) = superclass {
                frame
                    .define(
                        "super",
                        Value::Callable(Callable::Class(superclass.clone())),
                        false,
                    )
                    .map_err(|e| e.at_line(line))?;
            }
        }

        Ok(UserFunction {
            declaration: self.declaration.clone(),
            closure: environment,
        })
    }

    pub fn call(
        &self,
        interpreter: &mut Interpreter,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let environment = Environment::boxed(Some(self.closure.clone()));
        {
            let mut frame = environment.borrow_mut();
            for (param, value) in self.declaration.params.iter().zip(args) {
                frame
                    .define(&param.lexeme, value, false)
                    .map_err(|e| e.at_line(param.line))?;
            }
        }

        match interpreter.execute_block(&self.declaration.body, environment)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Null),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Callable {
    Function(Rc<UserFunction>),
    Class(Rc<Class>),
}

impl Callable {
    pub fn arity(&self) -> usize {
        match self {
            Callable::Function(function) => function.declaration.arity(),
            Callable::Class(class) => class.arity(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Callable::Function(function) => function.name(),
            Callable::Class(class) => &class.name,
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(callee = %self, line = line))]
    pub fn call(
        &self,
        interpreter: &mut Interpreter,
        args: Vec<Value>,
        line: usize,
    ) -> Result<Value, RuntimeError> {
        if args.len() != self.arity() {
            return Err(RuntimeError::InvalidNumberOfArguments {
                name: self.name().to_string(),
                expected: self.arity(),
                got: args.len(),
                line,
            });
        }

        match self {
            Callable::Function(function) => function.call(interpreter, args),
            Callable::Class(class) => class.instantiate(interpreter, args, line),
        }
    }

    pub fn ptr_eq(&self, other: &Callable) -> bool {
        match (self, other) {
            (Callable::Function(a), Callable::Function(b)) => Rc::ptr_eq(a, b),
            (Callable::Class(a), Callable::Class(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Display for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callable::Function(function) => write!(f, "<function {}>", function.name()),
            Callable::Class(class) => write!(f, "<class {}>", class.name),
        }
    }
}
