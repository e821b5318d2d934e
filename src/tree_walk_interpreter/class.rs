use std::{cell::RefCell, rc::Rc};

use rustc_hash::FxHashMap;

use crate::tokenizer::Token;

use super::{
    callable::{Callable, UserFunction},
    Interpreter, RuntimeError, Value,
};

pub const CONSTRUCTOR: &str = "constructor";

pub struct Class {
    pub name: String,
    pub superclass: Option<Rc<Class>>,
    pub methods: FxHashMap<String, Rc<UserFunction>>,
    pub static_methods: FxHashMap<String, Rc<UserFunction>>,
}

impl std::fmt::Debug for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field(
                "superclass",
                &self.superclass.as_ref().map(|c| c.name.clone()),
            )
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field(
                "static_methods",
                &self.static_methods.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Class {
    /// Finds a method on this class or the nearest ancestor defining it,
    /// returning the class it was found on alongside it.
    pub fn find_method(&self, name: &str) -> Option<(&Class, &Rc<UserFunction>)> {
        match self.methods.get(name) {
            Some(method) => Some((self, method)),
            None => self
                .superclass
                .as_ref()
                .and_then(|superclass| superclass.find_method(name)),
        }
    }

    pub fn find_static_method(&self, name: &str) -> Option<&Rc<UserFunction>> {
        self.static_methods.get(name).or_else(|| {
            self.superclass
                .as_ref()
                .and_then(|superclass| superclass.find_static_method(name))
        })
    }

    pub fn arity(&self) -> usize {
        self.find_method(CONSTRUCTOR)
            .map_or(0, |(_, constructor)| constructor.declaration.arity())
    }

    /// Creates an instance and runs every constructor along the inheritance
    /// chain on it, root class first, each with its own arity check.
    pub fn instantiate(
        self: &Rc<Self>,
        interpreter: &mut Interpreter,
        args: Vec<Value>,
        line: usize,
    ) -> Result<Value, RuntimeError> {
        let instance = Rc::new(RefCell::new(Instance {
            class: self.clone(),
            properties: FxHashMap::default(),
        }));

        let mut lineage: Vec<&Class> =
            std::iter::successors(Some(self.as_ref()), |class| class.superclass.as_deref())
                .collect();
        lineage.reverse();

        for class in lineage {
            let Some(constructor) = class.methods.get(CONSTRUCTOR) else {
                continue;
            };

            if constructor.declaration.arity() != args.len() {
                return Err(RuntimeError::InvalidNumberOfArguments {
                    name: format!("{}.{}", class.name, CONSTRUCTOR),
                    expected: constructor.declaration.arity(),
                    got: args.len(),
                    line,
                });
            }

            constructor
                .bind(&instance, class.superclass.as_ref())?
                .call(interpreter, args.clone())?;
        }

        Ok(Value::Instance(instance))
    }

    pub fn get_static(&self, name: &Token) -> Result<Value, RuntimeError> {
        self.find_static_method(&name.lexeme)
            .map(|method| Value::Callable(Callable::Function(method.clone())))
            .ok_or_else(|| RuntimeError::InvalidPropertyAccess {
                name: name.lexeme.clone(),
                object: format!("<class {}>", self.name),
                line: name.line,
            })
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub properties: FxHashMap<String, Value>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.name)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Instance {
    /// Own properties shadow methods; methods are bound to `instance` on access.
    pub fn get(instance: &Rc<RefCell<Instance>>, name: &Token) -> Result<Value, RuntimeError> {
        let property = instance.borrow().properties.get(&name.lexeme).cloned();
        if let Some(value) = property {
            return Ok(value);
        }

        let class = instance.borrow().class.clone();
        Self::get_method(instance, &class, name)
    }

    /// Looks a method up starting at `class` rather than the instance's own
    /// class. Used for `super.name`.
    pub fn get_method(
        instance: &Rc<RefCell<Instance>>,
        class: &Class,
        name: &Token,
    ) -> Result<Value, RuntimeError> {
        match class.find_method(&name.lexeme) {
            Some((owner, method)) => {
                let bound = method.bind(instance, owner.superclass.as_ref())?;
                Ok(Value::Callable(Callable::Function(Rc::new(bound))))
            }
            None => Err(RuntimeError::InvalidPropertyAccess {
                name: name.lexeme.clone(),
                object: format!("<{} instance>", instance.borrow().class.name),
                line: name.line,
            }),
        }
    }

    pub fn set(&mut self, name: &Token, value: Value) {
        self.properties.insert(name.lexeme.clone(), value);
    }
}
