use std::{cell::RefCell, cmp::Reverse, rc::Rc};

use crate::{
    ast::{
        ClassDecl, Expression, FunctionDecl, InfixOperator, Literal, LogicalOperator, Program,
        Statement, UnaryOperator, VariableKind,
    },
    tokenizer::{Token, TokenType},
};

/// Calls and function declarations accept at most this many arguments/parameters.
pub const MAX_ARGUMENTS: usize = 254;

type ParseResult<'a, T> = Result<(T, &'a [Token]), ParseErrorWithContext>;

#[derive(Debug)]
pub struct ParseErrors(pub Vec<ParseErrorWithContext>);

impl std::error::Error for ParseErrors {}

impl std::fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Found {} errors during parsing", self.0.len())?;
        for error in &self.0 {
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl From<ParseErrorWithContext> for ParseErrors {
    fn from(error: ParseErrorWithContext) -> Self {
        ParseErrors(vec![error])
    }
}

impl ParseErrors {
    /// Number of tokens left after the furthest error, counted from the
    /// offending token to the end of input.
    fn remaining(&self) -> usize {
        self.0.iter().map(|e| e.remaining).min().unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct ParseErrorWithContext {
    pub error: ParseError,
    pub rules: Vec<&'static str>,
    pub token: Option<Token>,
    remaining: usize,
}

impl std::fmt::Display for ParseErrorWithContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "While parsing {}", self.rules.join(" > "))?;
        write!(f, "{}", self.error)?;
        match &self.token {
            Some(token) if token.token_type == TokenType::Eof => {
                write!(f, " at end of file (line {})", token.line)
            }
            Some(token) => write!(f, " at line {} but found \"{}\"", token.line, token.lexeme),
            None => Ok(()),
        }
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Expected \"{0}\"")]
    Expected(TokenType),
    #[error("Expected one of {0:?}")]
    ExpectedOneOf(Vec<TokenType>),
    #[error("Expected identifier")]
    ExpectedIdentifier,
    #[error("Expected expression")]
    ExpectedExpression,
    #[error("Invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("Can't have more than 254 arguments")]
    TooManyArguments,
    #[error("Can't have more than 254 parameters")]
    TooManyParameters,
}

#[derive(Debug)]
struct ParseContext {
    stack: RefCell<Vec<&'static str>>,
    /// Diagnostics that do not abort the current declaration.
    reported: RefCell<Vec<ParseErrorWithContext>>,
}

impl ParseContext {
    fn new() -> Self {
        Self {
            stack: RefCell::new(vec![]),
            reported: RefCell::new(vec![]),
        }
    }

    fn push(&self, name: &'static str) -> ParseContextGuard {
        self.stack.borrow_mut().push(name);
        ParseContextGuard::new(self)
    }

    fn pop(&self) {
        self.stack.borrow_mut().pop();
    }

    fn error(&self, error: ParseError, tokens: &[Token]) -> ParseErrorWithContext {
        ParseErrorWithContext {
            error,
            rules: self.stack.borrow().clone(),
            token: tokens.first().cloned(),
            remaining: tokens.len(),
        }
    }

    fn report(&self, error: ParseError, tokens: &[Token]) {
        let error = self.error(error, tokens);
        tracing::warn!(%error, "parse diagnostic");
        self.reported.borrow_mut().push(error);
    }
}

struct ParseContextGuard<'a> {
    context: &'a ParseContext,
}

impl<'a> ParseContextGuard<'a> {
    fn new(context: &'a ParseContext) -> Self {
        Self { context }
    }
}

impl<'a> Drop for ParseContextGuard<'a> {
    fn drop(&mut self) {
        self.context.pop();
    }
}

/// Parses a whole token stream. Parsing never stops at the first error: after
/// a failed declaration the parser synchronizes on the next statement keyword
/// and carries on, so every independent error ends up in `ParseErrors`.
pub fn program(tokens: &[Token]) -> Result<Program, ParseErrors> {
    let context = ParseContext::new();
    let mut statements = Vec::new();
    let mut tokens = tokens;
    let mut errors = Vec::new();

    let _guard = context.push("program");

    while !at_end(tokens) {
        match declaration(&context, tokens) {
            Ok((stmt, rest)) => {
                statements.push(stmt);
                tokens = rest;
            }
            Err(err) => {
                tokens = synchronize(resume_point(tokens, &err));
                for error in &err.0 {
                    tracing::warn!(%error, "parse error");
                }
                errors.extend(err.0);
            }
        }
    }

    errors.append(&mut context.reported.borrow_mut());

    if !errors.is_empty() {
        errors.sort_by_key(|e| Reverse(e.remaining));
        return Err(ParseErrors(errors));
    }

    Ok(Program(statements))
}

fn at_end(tokens: &[Token]) -> bool {
    matches!(
        tokens.first().map(Token::token_type),
        None | Some(TokenType::Eof)
    )
}

/// Position to resume from after `err` was raised by a declaration starting at
/// `tokens`: the offending token, but always at least one token further.
fn resume_point<'a>(tokens: &'a [Token], err: &ParseErrors) -> &'a [Token] {
    let skip = tokens
        .len()
        .saturating_sub(err.remaining())
        .max(1)
        .min(tokens.len());
    &tokens[skip..]
}

fn synchronize(tokens: &[Token]) -> &[Token] {
    let mut tokens = tokens;
    while let Some(token) = tokens.first() {
        match token.token_type() {
            TokenType::Class
            | TokenType::Function
            | TokenType::Let
            | TokenType::For
            | TokenType::If
            | TokenType::While
            | TokenType::Print
            | TokenType::Return
            | TokenType::Eof => break,
            _ => tokens = &tokens[1..],
        }
    }
    tokens
}

fn declaration<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrors> {
    let _guard = context.push("declaration");
    match tokens.first().map(Token::token_type) {
        Some(TokenType::Class) => class_declaration(context, &tokens[1..]),
        Some(TokenType::Function) => {
            let (decl, rest) = function(context, &tokens[1..], "function")?;
            Ok((Statement::Function(Rc::new(decl)), rest))
        }
        Some(TokenType::Let) => Ok(let_declaration(context, &tokens[1..])?),
        Some(TokenType::Const) => Ok(const_declaration(context, &tokens[1..])?),
        _ => statement(context, tokens),
    }
}

fn let_declaration<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Statement> {
    let _guard = context.push("let_declaration");
    let (name, tokens) = match_identifier(context, tokens)?;
    let (initializer, tokens) = match tokens.first().map(Token::token_type) {
        Some(TokenType::Equal) => {
            let (expr, rest) = expression(context, &tokens[1..])?;
            (Some(expr), rest)
        }
        _ => (None, tokens),
    };
    let tokens = consume(context, tokens, TokenType::Semicolon)?;
    Ok((Statement::Let(name, initializer), tokens))
}

fn const_declaration<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> ParseResult<'a, Statement> {
    let _guard = context.push("const_declaration");
    let (name, tokens) = match_identifier(context, tokens)?;
    let tokens = consume(context, tokens, TokenType::Equal)?;
    let (initializer, tokens) = expression(context, tokens)?;
    let tokens = consume(context, tokens, TokenType::Semicolon)?;
    Ok((Statement::Const(name, initializer), tokens))
}

fn class_declaration<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrors> {
    let _guard = context.push("class_declaration");
    let (name, tokens) = match_identifier(context, tokens)?;

    let (superclass, tokens) = match tokens.first().map(Token::token_type) {
        Some(TokenType::Extends) => {
            let (superclass, rest) = match_identifier(context, &tokens[1..])?;
            (
                Some(Expression::variable(superclass, VariableKind::Identifier)),
                rest,
            )
        }
        _ => (None, tokens),
    };

    let mut tokens = consume(context, tokens, TokenType::LeftBrace)?;
    let mut methods = Vec::new();
    let mut static_methods = Vec::new();

    loop {
        match tokens.first().map(Token::token_type) {
            Some(TokenType::RightBrace) => {
                tokens = &tokens[1..];
                break;
            }
            Some(TokenType::Static) => {
                let (method, rest) = function(context, &tokens[1..], "static method")?;
                static_methods.push(Rc::new(method));
                tokens = rest;
            }
            None | Some(TokenType::Eof) => {
                return Err(context
                    .error(ParseError::Expected(TokenType::RightBrace), tokens)
                    .into())
            }
            _ => {
                let (method, rest) = function(context, tokens, "method")?;
                methods.push(Rc::new(method));
                tokens = rest;
            }
        }
    }

    Ok((
        Statement::Class(ClassDecl {
            name,
            superclass,
            methods,
            static_methods,
        }),
        tokens,
    ))
}

fn function<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    kind: &'static str,
) -> Result<(FunctionDecl, &'a [Token]), ParseErrors> {
    let _guard = context.push(kind);
    let (name, tokens) = match_identifier(context, tokens)?;
    let mut tokens = consume(context, tokens, TokenType::LeftParen)?;
    let mut params = vec![];
    loop {
        if let Some(TokenType::RightParen) = tokens.first().map(Token::token_type) {
            tokens = &tokens[1..];
            break;
        }

        if params.len() == MAX_ARGUMENTS {
            context.report(ParseError::TooManyParameters, tokens);
        }

        let (param, rest) = match_identifier(context, tokens)?;
        params.push(param);
        tokens = rest;

        match tokens.first().map(Token::token_type) {
            Some(TokenType::Comma) => tokens = &tokens[1..],
            Some(TokenType::RightParen) => {
                tokens = &tokens[1..];
                break;
            }
            _ => {
                return Err(context
                    .error(
                        ParseError::ExpectedOneOf(vec![TokenType::Comma, TokenType::RightParen]),
                        tokens,
                    )
                    .into())
            }
        }
    }
    let tokens = consume(context, tokens, TokenType::LeftBrace)?;
    let (body, tokens) = block(context, tokens)?;
    Ok((FunctionDecl { name, params, body }, tokens))
}

fn statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrors> {
    let _guard = context.push("statement");
    match tokens.first().map(Token::token_type) {
        Some(TokenType::Print) => Ok(print_statement(context, &tokens[1..])?),
        Some(TokenType::Return) => Ok(return_statement(context, tokens)?),
        Some(TokenType::LeftBrace) => {
            let (statements, rest) = block(context, &tokens[1..])?;
            Ok((Statement::Block(statements), rest))
        }
        Some(TokenType::If) => if_statement(context, &tokens[1..]),
        Some(TokenType::While) => while_statement(context, &tokens[1..]),
        Some(TokenType::For) => for_statement(context, &tokens[1..]),
        _ => Ok(expression_statement(context, tokens)?),
    }
}

fn return_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> ParseResult<'a, Statement> {
    let _guard = context.push("return_statement");
    let keyword = tokens[0].clone();
    let tokens = &tokens[1..];
    let (value, tokens) = match tokens.first().map(Token::token_type) {
        Some(TokenType::Semicolon) => (None, tokens),
        _ => {
            let (value, rest) = expression(context, tokens)?;
            (Some(value), rest)
        }
    };
    let tokens = consume(context, tokens, TokenType::Semicolon)?;
    Ok((Statement::Return(keyword, value), tokens))
}

fn while_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrors> {
    let _guard = context.push("while_statement");
    let tokens = consume(context, tokens, TokenType::LeftParen)?;
    let (condition, tokens) = expression(context, tokens)?;
    let tokens = consume(context, tokens, TokenType::RightParen)?;
    let (body, tokens) = statement(context, tokens)?;
    Ok((Statement::While(condition, Box::new(body)), tokens))
}

fn if_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrors> {
    let _guard = context.push("if_statement");
    let tokens = consume(context, tokens, TokenType::LeftParen)?;
    let (condition, tokens) = expression(context, tokens)?;
    let tokens = consume(context, tokens, TokenType::RightParen)?;
    let (then_branch, tokens) = statement(context, tokens)?;
    if let Some(TokenType::Else) = tokens.first().map(Token::token_type) {
        let (else_branch, tokens) = statement(context, &tokens[1..])?;
        Ok((
            Statement::If(
                condition,
                Box::new(then_branch),
                Some(Box::new(else_branch)),
            ),
            tokens,
        ))
    } else {
        Ok((
            Statement::If(condition, Box::new(then_branch), None),
            tokens,
        ))
    }
}

/// `for (init; condition; increment) body` becomes
/// `{ init; while (condition) { body; increment; } }`.
fn for_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrors> {
    let _guard = context.push("for_statement");
    let tokens = consume(context, tokens, TokenType::LeftParen)?;

    let (initializer, tokens) = match tokens.first().map(Token::token_type) {
        Some(TokenType::Semicolon) => (None, &tokens[1..]),
        Some(TokenType::Let) => {
            let (initializer, rest) = let_declaration(context, &tokens[1..])?;
            (Some(initializer), rest)
        }
        _ => {
            let (initializer, rest) = expression_statement(context, tokens)?;
            (Some(initializer), rest)
        }
    };

    let (condition, tokens) = match tokens.first().map(Token::token_type) {
        Some(TokenType::Semicolon) => (Expression::Literal(Literal::Boolean(true)), tokens),
        _ => expression(context, tokens)?,
    };

    let tokens = consume(context, tokens, TokenType::Semicolon)?;

    let (increment, tokens) = match tokens.first().map(Token::token_type) {
        Some(TokenType::RightParen) => (None, tokens),
        _ => {
            let (increment, rest) = expression(context, tokens)?;
            (Some(increment), rest)
        }
    };

    let tokens = consume(context, tokens, TokenType::RightParen)?;

    let (mut body, tokens) = statement(context, tokens)?;

    if let Some(increment) = increment {
        body = Statement::Block(vec![body, Statement::Expression(increment)]);
    }

    let mut desugared = Statement::While(condition, Box::new(body));

    if let Some(initializer) = initializer {
        desugared = Statement::Block(vec![initializer, desugared]);
    }

    Ok((desugared, tokens))
}

/// Parses declarations up to and including the closing brace. The opening
/// brace has already been consumed. Errors inside the block are recovered
/// locally and reported through the context, so only a missing closing brace
/// fails the block itself.
fn block<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Vec<Statement>, &'a [Token]), ParseErrors> {
    let _guard = context.push("block");
    let mut statements = Vec::new();
    let mut tokens = tokens;

    while !at_end(tokens) {
        if tokens[0].token_type() == &TokenType::RightBrace {
            return Ok((statements, &tokens[1..]));
        }

        match declaration(context, tokens) {
            Ok((stmt, rest)) => {
                statements.push(stmt);
                tokens = rest;
            }
            Err(err) => {
                tokens = synchronize(resume_point(tokens, &err));
                for error in err.0 {
                    tracing::warn!(%error, "parse error");
                    context.reported.borrow_mut().push(error);
                }
            }
        }
    }

    Err(context
        .error(ParseError::Expected(TokenType::RightBrace), tokens)
        .into())
}

fn expression_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> ParseResult<'a, Statement> {
    let _guard = context.push("expression_statement");
    let (expr, tokens) = expression(context, tokens)?;
    let tokens = consume(context, tokens, TokenType::Semicolon)?;
    Ok((Statement::Expression(expr), tokens))
}

fn print_statement<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Statement> {
    let _guard = context.push("print_statement");
    let (expr, rest) = expression(context, tokens)?;
    let tokens = consume(context, rest, TokenType::Semicolon)?;
    Ok((Statement::Print(expr), tokens))
}

fn expression<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("expression");
    assignment(context, tokens)
}

fn assignment<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("assignment");
    let (expr, rest) = logical_or(context, tokens)?;

    let Some(TokenType::Equal) = rest.first().map(Token::token_type) else {
        return Ok((expr, rest));
    };

    let equals = rest;
    let (value, rest) = assignment(context, &rest[1..])?;

    match expr {
        Expression::Variable {
            name,
            kind: VariableKind::Identifier,
            ..
        } => Ok((Expression::assign(name, value), rest)),
        Expression::AccessProperty { object, name, .. } => Ok((
            Expression::SetProperty {
                object,
                name,
                value: Box::new(value),
            },
            rest,
        )),
        expr => {
            context.report(ParseError::InvalidAssignmentTarget, equals);
            Ok((expr, rest))
        }
    }
}

fn binary<'a, Op>(
    context: &ParseContext,
    precedence: impl Fn(&ParseContext, &'a [Token]) -> ParseResult<'a, Expression>,
    operator: impl Fn(&TokenType) -> Option<Op>,
    fold: impl Fn(Expression, Op, &Token, Expression) -> Expression,
    tokens: &'a [Token],
) -> ParseResult<'a, Expression> {
    let (mut expr, mut tokens) = precedence(context, tokens)?;

    while let Some(token) = tokens.first() {
        let op = match operator(token.token_type()) {
            Some(op) => op,
            None => break,
        };
        let (right, rest) = precedence(context, &tokens[1..])?;
        expr = fold(expr, op, token, right);
        tokens = rest;
    }

    Ok((expr, tokens))
}

fn infix(left: Expression, op: InfixOperator, token: &Token, right: Expression) -> Expression {
    Expression::Binary(Box::new(left), op, token.clone(), Box::new(right))
}

fn logical(left: Expression, op: LogicalOperator, _: &Token, right: Expression) -> Expression {
    Expression::Logical(Box::new(left), op, Box::new(right))
}

fn logical_or<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("logical_or");
    binary(
        context,
        logical_and,
        |token_type| match token_type {
            TokenType::Or => Some(LogicalOperator::Or),
            _ => None,
        },
        logical,
        tokens,
    )
}

fn logical_and<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("logical_and");
    binary(
        context,
        equality,
        |token_type| match token_type {
            TokenType::And => Some(LogicalOperator::And),
            _ => None,
        },
        logical,
        tokens,
    )
}

fn equality<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("equality");
    binary(
        context,
        comparison,
        |token_type| match token_type {
            TokenType::EqualEqual => Some(InfixOperator::Equal),
            TokenType::BangEqual => Some(InfixOperator::NotEqual),
            _ => None,
        },
        infix,
        tokens,
    )
}

fn comparison<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("comparison");
    binary(
        context,
        addition,
        |token_type| match token_type {
            TokenType::Less => Some(InfixOperator::LessThan),
            TokenType::LessEqual => Some(InfixOperator::LessThanOrEqual),
            TokenType::Greater => Some(InfixOperator::GreaterThan),
            TokenType::GreaterEqual => Some(InfixOperator::GreaterThanOrEqual),
            _ => None,
        },
        infix,
        tokens,
    )
}

fn addition<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("addition");
    binary(
        context,
        modulo,
        |token_type| match token_type {
            TokenType::Plus => Some(InfixOperator::Plus),
            TokenType::Minus => Some(InfixOperator::Minus),
            _ => None,
        },
        infix,
        tokens,
    )
}

fn modulo<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("mod");
    binary(
        context,
        multiplication,
        |token_type| match token_type {
            TokenType::Mod => Some(InfixOperator::Mod),
            _ => None,
        },
        infix,
        tokens,
    )
}

fn multiplication<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> ParseResult<'a, Expression> {
    let _guard = context.push("multiplication");
    binary(
        context,
        null_coalescing,
        |token_type| match token_type {
            TokenType::Star => Some(InfixOperator::Multiply),
            TokenType::Slash => Some(InfixOperator::Divide),
            _ => None,
        },
        infix,
        tokens,
    )
}

fn null_coalescing<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> ParseResult<'a, Expression> {
    let _guard = context.push("null_coalescing");
    binary(
        context,
        unary,
        |token_type| match token_type {
            TokenType::QuestionQuestion => Some(InfixOperator::NullCoalesce),
            _ => None,
        },
        infix,
        tokens,
    )
}

fn unary<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("unary");

    let operator = match tokens.first().map(Token::token_type) {
        Some(TokenType::Minus) => UnaryOperator::Negate,
        Some(TokenType::Bang) => UnaryOperator::Not,
        Some(TokenType::BangBang) => UnaryOperator::Truthy,
        _ => return call(context, tokens),
    };

    let (right, rest) = unary(context, &tokens[1..])?;
    Ok((
        Expression::Unary(operator, tokens[0].clone(), Box::new(right)),
        rest,
    ))
}

fn call<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("call");
    let (mut expr, mut tokens) = primary(context, tokens)?;

    loop {
        match tokens.first().map(Token::token_type) {
            Some(TokenType::LeftParen) => {
                let (call, rest) = finish_call(context, expr, &tokens[1..])?;
                expr = call;
                tokens = rest;
            }
            Some(TokenType::Dot) => {
                let (name, rest) = match_identifier(context, &tokens[1..])?;
                let is_super_access = matches!(
                    expr,
                    Expression::Variable {
                        kind: VariableKind::Super,
                        ..
                    }
                );
                expr = Expression::AccessProperty {
                    object: Box::new(expr),
                    name,
                    is_super_access,
                };
                tokens = rest;
            }
            _ => break,
        }
    }

    Ok((expr, tokens))
}

fn finish_call<'a>(
    context: &ParseContext,
    callee: Expression,
    tokens: &'a [Token],
) -> ParseResult<'a, Expression> {
    let mut args = Vec::new();
    let mut tokens = tokens;

    loop {
        if let Some(TokenType::RightParen) = tokens.first().map(Token::token_type) {
            break;
        }

        if args.len() == MAX_ARGUMENTS {
            context.report(ParseError::TooManyArguments, tokens);
        }

        let (arg, rest) = expression(context, tokens)?;
        args.push(arg);
        tokens = rest;

        match tokens.first().map(Token::token_type) {
            Some(TokenType::Comma) => tokens = &tokens[1..],
            Some(TokenType::RightParen) => break,
            _ => {
                return Err(context.error(
                    ParseError::ExpectedOneOf(vec![TokenType::Comma, TokenType::RightParen]),
                    tokens,
                ))
            }
        }
    }

    let paren = tokens[0].clone();
    Ok((
        Expression::Call {
            callee: Box::new(callee),
            paren,
            args,
        },
        &tokens[1..],
    ))
}

fn primary<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("primary");
    let Some(token) = tokens.first() else {
        return Err(context.error(ParseError::ExpectedExpression, tokens));
    };

    let expr = match token.token_type() {
        TokenType::Number(n) => Expression::Literal(Literal::Number(*n)),
        TokenType::String(s) => Expression::Literal(Literal::String(s.clone())),
        TokenType::True => Expression::Literal(Literal::Boolean(true)),
        TokenType::False => Expression::Literal(Literal::Boolean(false)),
        TokenType::Null => Expression::Literal(Literal::Null),
        TokenType::Identifier => Expression::variable(token.clone(), VariableKind::Identifier),
        TokenType::This => Expression::variable(token.clone(), VariableKind::This),
        TokenType::Super => Expression::variable(token.clone(), VariableKind::Super),
        TokenType::LeftParen => {
            let (expr, rest) = expression(context, &tokens[1..])?;
            let tokens = consume(context, rest, TokenType::RightParen)?;
            return Ok((Expression::Grouping(Box::new(expr)), tokens));
        }
        _ => return Err(context.error(ParseError::ExpectedExpression, tokens)),
    };

    Ok((expr, &tokens[1..]))
}

fn consume<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    token_type: TokenType,
) -> Result<&'a [Token], ParseErrorWithContext> {
    match tokens.first().map(Token::token_type) {
        Some(t) if t == &token_type => Ok(&tokens[1..]),
        _ => Err(context.error(ParseError::Expected(token_type), tokens)),
    }
}

fn match_identifier<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Token> {
    match tokens.first() {
        Some(token) if token.token_type == TokenType::Identifier => {
            Ok((token.clone(), &tokens[1..]))
        }
        _ => Err(context.error(ParseError::ExpectedIdentifier, tokens)),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::tokenizer::tokens;

    fn parse(source: &str) -> Result<Program, ParseErrors> {
        program(&tokens(source).tokens)
    }

    fn errors(source: &str) -> Vec<ParseError> {
        parse(source)
            .expect_err("program should fail to parse")
            .0
            .into_iter()
            .map(|e| e.error)
            .collect()
    }

    #[test]
    fn test_precedence() {
        let program = parse("print 1 + 2 * 3 mod 4 - -5;").unwrap();
        assert_eq!(program.to_string(), "print (- (+ 1 (mod (* 2 3) 4)) (- 5));\n");
    }

    #[test]
    fn test_null_coalescing_binds_tighter_than_multiplication() {
        let program = parse("a * b ?? c;").unwrap();
        assert_eq!(program.to_string(), "(* a (?? b c));\n");
    }

    #[test]
    fn test_logical_and_assignment() {
        let program = parse("x = a or b and !!c;").unwrap();
        assert_eq!(program.to_string(), "x = (or a (and b (!! c)));\n");
    }

    #[test]
    fn test_for_desugars_into_while() {
        let program = parse("for (let i = 0; i < 3; i = i + 1) print i;").unwrap();
        let [Statement::Block(outer)] = program.0.as_slice() else {
            panic!("expected a block, got {program}");
        };
        assert!(matches!(outer[0], Statement::Let(..)));
        let Statement::While(_, body) = &outer[1] else {
            panic!("expected a while loop");
        };
        let Statement::Block(body) = body.as_ref() else {
            panic!("expected body and increment");
        };
        assert!(matches!(body[0], Statement::Print(_)));
        assert!(matches!(body[1], Statement::Expression(Expression::Assign { .. })));
    }

    #[test]
    fn test_for_without_clauses() {
        let program = parse("for (;;) print 1;").unwrap();
        assert_eq!(program.to_string(), "while (true) print 1;\n");
    }

    #[test]
    fn test_class_declaration() {
        let program =
            parse("class B extends A { constructor(x) { this.x = x; } static make() { return B(1); } }")
                .unwrap();
        let [Statement::Class(class)] = program.0.as_slice() else {
            panic!("expected a class");
        };
        assert_eq!(class.name.lexeme, "B");
        assert!(class.superclass.is_some());
        assert_eq!(class.methods.len(), 1);
        assert_eq!(class.methods[0].arity(), 1);
        assert_eq!(class.static_methods[0].name.lexeme, "make");
    }

    #[test]
    fn test_super_access_is_marked() {
        let program = parse("super.get().value;").unwrap();
        let [Statement::Expression(Expression::AccessProperty {
            object,
            is_super_access,
            ..
        })] = program.0.as_slice()
        else {
            panic!("expected property access");
        };
        assert!(!is_super_access);
        let Expression::Call { callee, .. } = object.as_ref() else {
            panic!("expected call");
        };
        assert!(matches!(
            callee.as_ref(),
            Expression::AccessProperty {
                is_super_access: true,
                ..
            }
        ));
    }

    #[test]
    fn test_reports_multiple_errors() {
        assert_eq!(
            errors("let = 1; print 2; let y = ;"),
            vec![ParseError::ExpectedIdentifier, ParseError::ExpectedExpression]
        );
    }

    #[test]
    fn test_missing_semicolon_resumes_at_next_statement() {
        let err = parse("let a = 1 print a; print ;").unwrap_err();
        assert_eq!(err.0.len(), 2);
        assert_eq!(err.0[0].error, ParseError::Expected(TokenType::Semicolon));
        assert_eq!(err.0[0].token.as_ref().unwrap().lexeme, "print");
    }

    #[test]
    fn test_const_requires_initializer() {
        assert_eq!(
            errors("const x;"),
            vec![ParseError::Expected(TokenType::Equal)]
        );
    }

    #[test]
    fn test_invalid_assignment_target_is_not_fatal() {
        let err = parse("1 + 2 = 3; print 4;").unwrap_err();
        assert_eq!(err.0.len(), 1);
        assert_eq!(err.0[0].error, ParseError::InvalidAssignmentTarget);
    }

    #[test]
    fn test_too_many_arguments() {
        let args = vec!["1"; MAX_ARGUMENTS + 1].join(", ");
        assert_eq!(
            errors(&format!("f({args});")),
            vec![ParseError::TooManyArguments]
        );
        let args = vec!["1"; MAX_ARGUMENTS].join(", ");
        assert!(parse(&format!("f({args});")).is_ok());
    }

    #[test]
    fn test_unclosed_block() {
        assert_eq!(
            errors("{ print 1;"),
            vec![ParseError::Expected(TokenType::RightBrace)]
        );
    }
}
