use std::{cell::RefCell, fmt::Debug, rc::Rc};

use rustc_hash::FxHashMap;

use super::{RuntimeError, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvironmentError {
    #[error("Identifier <{0}> has already been declared")]
    AlreadyDeclared(String),
    #[error("Undefined variable <{0}>")]
    Undefined(String),
    #[error("Assignment to constant variable <{0}>")]
    AssignmentToConstant(String),
}

impl EnvironmentError {
    pub fn at_line(self, line: usize) -> RuntimeError {
        match self {
            EnvironmentError::AlreadyDeclared(name) => {
                RuntimeError::IdentifierAlreadyDeclared { name, line }
            }
            EnvironmentError::Undefined(name) => RuntimeError::UndefinedVariable { name, line },
            EnvironmentError::AssignmentToConstant(name) => {
                RuntimeError::AssignmentToConstant { name, line }
            }
        }
    }
}

/// One frame of bindings. Mutable and constant bindings live in separate
/// tables; a name may appear in at most one of them per frame.
#[derive(Default)]
pub struct Environment {
    values: FxHashMap<String, Value>,
    constants: FxHashMap<String, Value>,
    parent: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn new(parent: Option<Rc<RefCell<Environment>>>) -> Self {
        Self {
            values: FxHashMap::default(),
            constants: FxHashMap::default(),
            parent,
        }
    }

    pub fn boxed(parent: Option<Rc<RefCell<Environment>>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(parent)))
    }

    pub fn define(&mut self, name: &str, value: Value, is_const: bool) -> Result<(), EnvironmentError> {
        if self.values.contains_key(name) || self.constants.contains_key(name) {
            return Err(EnvironmentError::AlreadyDeclared(name.to_string()));
        }

        if is_const {
            self.constants.insert(name.to_string(), value);
        } else {
            self.values.insert(name.to_string(), value);
        }

        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Value, EnvironmentError> {
        if let Some(value) = self.get_local(name) {
            return Ok(value);
        }

        match &self.parent {
            Some(parent) => parent.borrow().get(name),
            None => Err(EnvironmentError::Undefined(name.to_string())),
        }
    }

    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), EnvironmentError> {
        if self.constants.contains_key(name) {
            return Err(EnvironmentError::AssignmentToConstant(name.to_string()));
        }

        if let Some(slot) = self.values.get_mut(name) {
            *slot = value;
            return Ok(());
        }

        match &self.parent {
            Some(parent) => parent.borrow_mut().assign(name, value),
            None => Err(EnvironmentError::Undefined(name.to_string())),
        }
    }

    /// Looks `name` up in the frame exactly `hops` parents above `environment`,
    /// without searching further.
    pub fn get_at(
        environment: &Rc<RefCell<Environment>>,
        hops: usize,
        name: &str,
    ) -> Result<Value, EnvironmentError> {
        Self::ancestor(environment, hops)
            .borrow()
            .get_local(name)
            .ok_or_else(|| EnvironmentError::Undefined(name.to_string()))
    }

    pub fn assign_at(
        environment: &Rc<RefCell<Environment>>,
        hops: usize,
        name: &str,
        value: Value,
    ) -> Result<(), EnvironmentError> {
        let frame = Self::ancestor(environment, hops);
        let mut frame = frame.borrow_mut();

        if frame.constants.contains_key(name) {
            return Err(EnvironmentError::AssignmentToConstant(name.to_string()));
        }

        match frame.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(EnvironmentError::Undefined(name.to_string())),
        }
    }

    fn get_local(&self, name: &str) -> Option<Value> {
        self.values
            .get(name)
            .or_else(|| self.constants.get(name))
            .cloned()
    }

    fn ancestor(environment: &Rc<RefCell<Environment>>, hops: usize) -> Rc<RefCell<Environment>> {
        let mut frame = environment.clone();
        for _ in 0..hops {
            let parent = frame.borrow().parent.clone();
            frame = match parent {
                Some(parent) => parent,
                None => return frame,
            };
        }
        frame
    }
}

impl Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut values: Vec<_> = self.values.keys().collect();
        values.sort();
        let mut constants: Vec<_> = self.constants.keys().collect();
        constants.sort();

        f.debug_struct("Environment")
            .field("values", &values)
            .field("constants", &constants)
            .field("parent", &self.parent.as_ref().map(|p| p.as_ptr()))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn number(value: &Result<Value, EnvironmentError>) -> f64 {
        match value {
            Ok(Value::Number(n)) => *n,
            other => panic!("expected a number, got {:?}", other),
        }
    }

    #[test]
    fn test_define_rejects_duplicates_in_either_table() {
        let mut environment = Environment::new(None);
        environment.define("a", Value::Number(1.0), false).unwrap();
        environment.define("b", Value::Number(2.0), true).unwrap();

        assert_eq!(
            environment.define("a", Value::Null, true).unwrap_err(),
            EnvironmentError::AlreadyDeclared("a".to_string())
        );
        assert_eq!(
            environment.define("b", Value::Null, false).unwrap_err(),
            EnvironmentError::AlreadyDeclared("b".to_string())
        );
    }

    #[test]
    fn test_get_and_assign_walk_parents() {
        let globals = Environment::boxed(None);
        globals
            .borrow_mut()
            .define("a", Value::Number(1.0), false)
            .unwrap();
        let inner = Environment::boxed(Some(globals.clone()));

        assert_eq!(number(&inner.borrow().get("a")), 1.0);
        inner.borrow_mut().assign("a", Value::Number(5.0)).unwrap();
        assert_eq!(number(&globals.borrow().get("a")), 5.0);

        assert_eq!(
            inner.borrow().get("missing").unwrap_err(),
            EnvironmentError::Undefined("missing".to_string())
        );
        assert_eq!(
            inner
                .borrow_mut()
                .assign("missing", Value::Null)
                .unwrap_err(),
            EnvironmentError::Undefined("missing".to_string())
        );
    }

    #[test]
    fn test_constants_cannot_be_assigned() {
        let globals = Environment::boxed(None);
        globals
            .borrow_mut()
            .define("c", Value::Number(1.0), true)
            .unwrap();
        let inner = Environment::boxed(Some(globals.clone()));

        assert_eq!(
            inner.borrow_mut().assign("c", Value::Number(2.0)).unwrap_err(),
            EnvironmentError::AssignmentToConstant("c".to_string())
        );
        assert_eq!(
            Environment::assign_at(&inner, 1, "c", Value::Number(2.0)).unwrap_err(),
            EnvironmentError::AssignmentToConstant("c".to_string())
        );
        assert_eq!(number(&globals.borrow().get("c")), 1.0);
    }

    #[test]
    fn test_constant_shadowing_mutable_blocks_assignment() {
        let globals = Environment::boxed(None);
        globals
            .borrow_mut()
            .define("x", Value::Number(1.0), false)
            .unwrap();
        let inner = Environment::boxed(Some(globals.clone()));
        inner
            .borrow_mut()
            .define("x", Value::Number(2.0), true)
            .unwrap();

        assert_eq!(
            inner.borrow_mut().assign("x", Value::Number(3.0)).unwrap_err(),
            EnvironmentError::AssignmentToConstant("x".to_string())
        );
    }

    #[test]
    fn test_get_at_does_not_search_further() {
        let globals = Environment::boxed(None);
        globals
            .borrow_mut()
            .define("a", Value::Number(1.0), false)
            .unwrap();
        let middle = Environment::boxed(Some(globals.clone()));
        middle
            .borrow_mut()
            .define("a", Value::Number(2.0), false)
            .unwrap();
        let inner = Environment::boxed(Some(middle.clone()));

        assert_eq!(number(&Environment::get_at(&inner, 1, "a")), 2.0);
        assert_eq!(number(&Environment::get_at(&inner, 2, "a")), 1.0);
        assert_eq!(
            Environment::get_at(&inner, 0, "a").unwrap_err(),
            EnvironmentError::Undefined("a".to_string())
        );

        Environment::assign_at(&inner, 2, "a", Value::Number(10.0)).unwrap();
        assert_eq!(number(&globals.borrow().get("a")), 10.0);
        assert_eq!(number(&middle.borrow().get("a")), 2.0);
    }
}
