use rustc_hash::FxHashMap;

use crate::{
    ast::{ExprId, Expression, FunctionDecl, Program, Statement, VariableKind},
    tokenizer::Token,
};

/// Side table from expression identity to the number of environments to
/// climb at runtime. Expressions missing from the table are globals.
pub type Locals = FxHashMap<ExprId, usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingState {
    Declared,
    Defined,
}

/// What kind of code region is being resolved. Passed down the recursion
/// rather than stored, so leaving a nested function restores the caller's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    None,
    Function,
    Method,
    Constructor,
    SubclassMethod,
}

impl ScopeKind {
    fn allows_this(self) -> bool {
        matches!(
            self,
            ScopeKind::Method | ScopeKind::Constructor | ScopeKind::SubclassMethod
        )
    }

    fn allows_super(self) -> bool {
        self == ScopeKind::SubclassMethod
    }

    /// Kind of a function declared inside a region of this kind. Closures
    /// inside methods keep access to `this` and `super`.
    fn nested_function(self) -> ScopeKind {
        if self.allows_this() {
            self
        } else {
            ScopeKind::Function
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Cannot read local variable <{name}> in its own initializer (line {line})")]
    OwnInitializer { name: String, line: usize },
    #[error("Cannot return from top-level code (line {line})")]
    ReturnOutsideFunction { line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveWarning {
    #[error("Redeclaring variable <{name}> (line {line})")]
    Redeclaration { name: String, line: usize },
    #[error("Cannot use 'this' outside of a method (line {line})")]
    ThisOutsideMethod { line: usize },
    #[error("Cannot use 'super' outside of a subclass method (line {line})")]
    SuperOutsideSubclass { line: usize },
    #[error("Class <{name}> cannot inherit from itself (line {line})")]
    InheritsFromItself { name: String, line: usize },
}

#[derive(Debug)]
pub struct ResolveErrors {
    pub errors: Vec<ResolveError>,
    pub warnings: Vec<ResolveWarning>,
}

impl std::error::Error for ResolveErrors {}

impl std::fmt::Display for ResolveErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Found {} errors during resolution", self.errors.len())?;
        for error in &self.errors {
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub locals: Locals,
    pub warnings: Vec<ResolveWarning>,
}

/// Static scope analysis. The global scope is never pushed: names that are not
/// found in any local scope are left out of the side table and looked up
/// dynamically in the global environment.
#[derive(Debug, Default)]
pub struct Resolver {
    scopes: Vec<FxHashMap<String, BindingState>>,
    locals: Locals,
    warnings: Vec<ResolveWarning>,
}

impl Resolver {
    pub fn new() -> Resolver {
        Resolver::default()
    }

    /// Resolves every top-level statement. A fatal error abandons the
    /// statement it occurred in; the remaining statements are still checked
    /// so all fatal errors are reported together.
    pub fn resolve(&mut self, program: &Program) -> Result<Resolution, ResolveErrors> {
        let mut errors = Vec::new();

        for statement in &program.0 {
            if let Err(error) = self.resolve_statement(statement, ScopeKind::None) {
                tracing::warn!(%error, "resolution error");
                errors.push(error);
                self.scopes.clear();
            }
        }

        let locals = std::mem::take(&mut self.locals);
        let warnings = std::mem::take(&mut self.warnings);

        if !errors.is_empty() {
            return Err(ResolveErrors { errors, warnings });
        }

        Ok(Resolution { locals, warnings })
    }

    fn resolve_statement(
        &mut self,
        statement: &Statement,
        kind: ScopeKind,
    ) -> Result<(), ResolveError> {
        match statement {
            Statement::Block(statements) => {
                self.begin_scope();
                for statement in statements {
                    self.resolve_statement(statement, kind)?;
                }
                self.end_scope();
            }
            Statement::Expression(expression) | Statement::Print(expression) => {
                self.resolve_expression(expression, kind)?
            }
            Statement::Let(name, initializer) => {
                self.declare(name);
                if let Some(initializer) = initializer {
                    self.resolve_expression(initializer, kind)?;
                }
                self.define(&name.lexeme);
            }
            Statement::Const(name, initializer) => {
                self.declare(name);
                self.resolve_expression(initializer, kind)?;
                self.define(&name.lexeme);
            }
            Statement::Function(decl) => {
                self.declare(&decl.name);
                self.define(&decl.name.lexeme);
                self.resolve_function(decl, kind.nested_function())?;
            }
            Statement::If(condition, then_branch, else_branch) => {
                self.resolve_expression(condition, kind)?;
                self.resolve_statement(then_branch, kind)?;
                if let Some(else_branch) = else_branch {
                    self.resolve_statement(else_branch, kind)?;
                }
            }
            Statement::While(condition, body) => {
                self.resolve_expression(condition, kind)?;
                self.resolve_statement(body, kind)?;
            }
            Statement::Return(keyword, value) => {
                if kind == ScopeKind::None {
                    return Err(ResolveError::ReturnOutsideFunction { line: keyword.line });
                }

                if let Some(value) = value {
                    self.resolve_expression(value, kind)?;
                }
            }
            Statement::Class(class) => {
                if let Some(superclass) = &class.superclass {
                    if let Expression::Variable { name, .. } = superclass {
                        if name.lexeme == class.name.lexeme {
                            self.warn(ResolveWarning::InheritsFromItself {
                                name: name.lexeme.clone(),
                                line: name.line,
                            });
                        }
                    }
                    self.resolve_expression(superclass, kind)?;
                }

                // The superclass is evaluated before the class name is bound.
                self.declare(&class.name);
                self.define(&class.name.lexeme);

                let is_subclass = class.superclass.is_some();

                self.begin_scope();
                self.define("this");
                if is_subclass {
                    self.define("super");
                }

                for method in &class.methods {
                    let method_kind = if is_subclass {
                        ScopeKind::SubclassMethod
                    } else if method.name.lexeme == "constructor" {
                        ScopeKind::Constructor
                    } else {
                        ScopeKind::Method
                    };
                    self.resolve_function(method, method_kind)?;
                }

                self.end_scope();

                // Static methods are not bound to an instance, so they close
                // over the class's defining scope directly.
                for method in &class.static_methods {
                    self.resolve_function(method, ScopeKind::Function)?;
                }
            }
        }

        Ok(())
    }

    fn resolve_expression(
        &mut self,
        expression: &Expression,
        kind: ScopeKind,
    ) -> Result<(), ResolveError> {
        match expression {
            Expression::Variable {
                id,
                name,
                kind: VariableKind::Identifier,
            } => {
                if let Some(scope) = self.scopes.last() {
                    if scope.get(&name.lexeme) == Some(&BindingState::Declared) {
                        return Err(ResolveError::OwnInitializer {
                            name: name.lexeme.clone(),
                            line: name.line,
                        });
                    }
                }
                self.resolve_local(*id, &name.lexeme);
            }
            Expression::Variable {
                id,
                name,
                kind: VariableKind::This,
            } => {
                if !kind.allows_this() {
                    self.warn(ResolveWarning::ThisOutsideMethod { line: name.line });
                }
                self.resolve_local(*id, "this");
            }
            Expression::Variable {
                id,
                name,
                kind: VariableKind::Super,
            } => {
                if !kind.allows_super() {
                    self.warn(ResolveWarning::SuperOutsideSubclass { line: name.line });
                }
                self.resolve_local(*id, "super");
            }
            Expression::Assign { id, name, value } => {
                self.resolve_expression(value, kind)?;
                self.resolve_local(*id, &name.lexeme);
            }
            Expression::Literal(_) => {}
            Expression::Grouping(expression) => self.resolve_expression(expression, kind)?,
            Expression::Unary(_, _, right) => self.resolve_expression(right, kind)?,
            Expression::Binary(left, _, _, right) | Expression::Logical(left, _, right) => {
                self.resolve_expression(left, kind)?;
                self.resolve_expression(right, kind)?;
            }
            Expression::Call { callee, args, .. } => {
                self.resolve_expression(callee, kind)?;
                for arg in args {
                    self.resolve_expression(arg, kind)?;
                }
            }
            Expression::AccessProperty { object, .. } => {
                self.resolve_expression(object, kind)?;
            }
            Expression::SetProperty { object, value, .. } => {
                self.resolve_expression(object, kind)?;
                self.resolve_expression(value, kind)?;
            }
        };

        Ok(())
    }

    fn resolve_local(&mut self, id: ExprId, name: &str) {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(name) {
                tracing::trace!(name, depth, "resolved local");
                self.locals.insert(id, depth);
                return;
            }
        }
    }

    fn resolve_function(
        &mut self,
        decl: &FunctionDecl,
        kind: ScopeKind,
    ) -> Result<(), ResolveError> {
        self.begin_scope();

        for param in &decl.params {
            self.declare(param);
            self.define(&param.lexeme);
        }
        for statement in &decl.body {
            self.resolve_statement(statement, kind)?;
        }

        self.end_scope();

        Ok(())
    }

    fn begin_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &Token) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };

        let redeclared = scope
            .insert(name.lexeme.clone(), BindingState::Declared)
            .is_some();

        if redeclared {
            self.warn(ResolveWarning::Redeclaration {
                name: name.lexeme.clone(),
                line: name.line,
            });
        }
    }

    fn define(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), BindingState::Defined);
        }
    }

    fn warn(&mut self, warning: ResolveWarning) {
        tracing::warn!(%warning, "resolution warning");
        self.warnings.push(warning);
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{parser, tokenizer};

    fn parse(source: &str) -> Program {
        parser::program(&tokenizer::tokens(source).tokens).expect("program should parse")
    }

    /// Depth recorded for every variable named `name`, in source order.
    fn depths(program: &Program, resolution: &Resolution, name: &str) -> Vec<Option<usize>> {
        fn walk_statement(s: &Statement, out: &mut Vec<(ExprId, String)>) {
            match s {
                Statement::Expression(e) | Statement::Print(e) | Statement::Const(_, e) => {
                    walk_expression(e, out)
                }
                Statement::Let(_, e) => e.iter().for_each(|e| walk_expression(e, out)),
                Statement::Block(b) => b.iter().for_each(|s| walk_statement(s, out)),
                Statement::If(c, t, e) => {
                    walk_expression(c, out);
                    walk_statement(t, out);
                    e.iter().for_each(|e| walk_statement(e, out));
                }
                Statement::While(c, b) => {
                    walk_expression(c, out);
                    walk_statement(b, out);
                }
                Statement::Function(f) => f.body.iter().for_each(|s| walk_statement(s, out)),
                Statement::Return(_, e) => e.iter().for_each(|e| walk_expression(e, out)),
                Statement::Class(c) => {
                    c.superclass.iter().for_each(|e| walk_expression(e, out));
                    c.methods
                        .iter()
                        .chain(&c.static_methods)
                        .for_each(|m| m.body.iter().for_each(|s| walk_statement(s, out)));
                }
            }
        }
        fn walk_expression(e: &Expression, out: &mut Vec<(ExprId, String)>) {
            match e {
                Expression::Variable { id, name, .. } => out.push((*id, name.lexeme.clone())),
                Expression::Assign { id, name, value } => {
                    walk_expression(value, out);
                    out.push((*id, name.lexeme.clone()));
                }
                Expression::Literal(_) => {}
                Expression::Unary(_, _, e) | Expression::Grouping(e) => walk_expression(e, out),
                Expression::Binary(l, _, _, r) | Expression::Logical(l, _, r) => {
                    walk_expression(l, out);
                    walk_expression(r, out);
                }
                Expression::Call { callee, args, .. } => {
                    walk_expression(callee, out);
                    args.iter().for_each(|a| walk_expression(a, out));
                }
                Expression::AccessProperty { object, .. } => walk_expression(object, out),
                Expression::SetProperty { object, value, .. } => {
                    walk_expression(object, out);
                    walk_expression(value, out);
                }
            }
        }

        let mut found = Vec::new();
        program.0.iter().for_each(|s| walk_statement(s, &mut found));
        found
            .into_iter()
            .filter(|(_, n)| n == name)
            .map(|(id, _)| resolution.locals.get(&id).copied())
            .collect()
    }

    #[test]
    fn test_globals_are_not_recorded() {
        let program = parse("let a = 1; print a; a = 2;");
        let resolution = Resolver::new().resolve(&program).unwrap();
        assert!(resolution.locals.is_empty());
    }

    #[test]
    fn test_local_depths() {
        let program = parse(
            r#"
            function outer(a) {
                let b = a;
                {
                    print a + b;
                    b = 3;
                }
                function inner() { return a; }
                return inner;
            }
            "#,
        );
        let resolution = Resolver::new().resolve(&program).unwrap();
        assert_eq!(depths(&program, &resolution, "a"), vec![Some(0), Some(1), Some(1)]);
        assert_eq!(depths(&program, &resolution, "b"), vec![Some(1), Some(1)]);
        assert_eq!(depths(&program, &resolution, "inner"), vec![Some(0)]);
    }

    #[test]
    fn test_this_and_super_depths() {
        let program = parse(
            r#"
            class A { get() { return 1; } }
            class B extends A {
                get() {
                    function helper() { return this; }
                    return super.get() + this.v;
                }
            }
            "#,
        );
        let resolution = Resolver::new().resolve(&program).unwrap();
        assert!(resolution.warnings.is_empty());
        assert_eq!(depths(&program, &resolution, "this"), vec![Some(2), Some(1)]);
        assert_eq!(depths(&program, &resolution, "super"), vec![Some(1)]);
        assert_eq!(depths(&program, &resolution, "A"), vec![None]);
    }

    #[test]
    fn test_own_initializer_is_fatal() {
        let program = parse("{ let x = x; } print 1;");
        let err = Resolver::new().resolve(&program).unwrap_err();
        assert_eq!(
            err.errors,
            vec![ResolveError::OwnInitializer {
                name: "x".to_string(),
                line: 1
            }]
        );
    }

    #[test]
    fn test_return_outside_function_is_fatal() {
        let program = parse("return 1;\nfunction f() { return 2; }\nreturn;");
        let err = Resolver::new().resolve(&program).unwrap_err();
        assert_eq!(
            err.errors,
            vec![
                ResolveError::ReturnOutsideFunction { line: 1 },
                ResolveError::ReturnOutsideFunction { line: 3 },
            ]
        );
    }

    #[test]
    fn test_non_fatal_warnings() {
        let program = parse(
            r#"
            print this;
            class A extends A { m() { return super.m(); } }
            class C { m() { return super.m(); } }
            { let x = 1; let x = 2; }
            "#,
        );
        let resolution = Resolver::new().resolve(&program).unwrap();
        assert_eq!(
            resolution.warnings,
            vec![
                ResolveWarning::ThisOutsideMethod { line: 2 },
                ResolveWarning::InheritsFromItself {
                    name: "A".to_string(),
                    line: 3
                },
                ResolveWarning::SuperOutsideSubclass { line: 4 },
                ResolveWarning::Redeclaration {
                    name: "x".to_string(),
                    line: 5
                },
            ]
        );
    }

    #[test]
    fn test_redeclaration_still_checks_own_initializer() {
        let program = parse("{ let x = 1; let x = x; }");
        let err = Resolver::new().resolve(&program).unwrap_err();
        assert_eq!(
            err.errors,
            vec![ResolveError::OwnInitializer {
                name: "x".to_string(),
                line: 1
            }]
        );
        assert_eq!(
            err.warnings,
            vec![ResolveWarning::Redeclaration {
                name: "x".to_string(),
                line: 1
            }]
        );
    }

    #[test]
    fn test_static_methods_cannot_use_this() {
        let program = parse("class A { static make() { return this; } }");
        let resolution = Resolver::new().resolve(&program).unwrap();
        assert_eq!(
            resolution.warnings,
            vec![ResolveWarning::ThisOutsideMethod { line: 1 }]
        );
    }
}
