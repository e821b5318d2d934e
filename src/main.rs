use std::io::Write;

use clap::{Args, Parser, Subcommand};
use toy::{
    parser::ParseErrors,
    resolver::{ResolveErrors, Resolver},
    tokenizer::{TokenType, TokenizeError},
    tree_walk_interpreter::Interpreter,
};

#[derive(Debug, Parser)]
#[command(about = "Tree-walking interpreter for the toy scripting language")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    pub fn command(&self) -> &Command {
        self.command.as_ref().unwrap_or(&Command::Repl)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a source file
    Run(FileArgs),
    /// Start an interactive session (the default)
    Repl,
    /// Print the token stream of a source file
    Tokens(FileArgs),
}

#[derive(Debug, Args)]
struct FileArgs {
    file: String,
}

fn main() {
    init_tracing();

    let args = Cli::parse();

    let ok = match args.command() {
        Command::Repl => repl_command(),
        Command::Run(args) => run_command(args),
        Command::Tokens(args) => tokens_command(args),
    };

    if !ok {
        std::process::exit(1);
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Only initialize if RUST_LOG is set
    if std::env::var("RUST_LOG").is_ok() {
        let filter = EnvFilter::from_default_env();
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true),
            )
            .with(filter)
            .init();
    }
}

#[derive(Debug, thiserror::Error)]
enum InterpretError {
    #[error("Found {} errors during tokenizing", .0.len())]
    Tokenize(Vec<TokenizeError>),
    #[error(transparent)]
    Parse(#[from] ParseErrors),
    #[error(transparent)]
    Resolve(#[from] ResolveErrors),
    #[error("Execution stopped by a runtime error")]
    Execution,
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// A resolver and interpreter pair that outlives individual programs, so
/// globals declared by one REPL submission are visible to the next.
#[derive(Debug, Default)]
struct Session {
    resolver: Resolver,
    interpreter: Interpreter,
}

impl Session {
    fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let tokenized = toy::tokenizer::tokens(source);
        for error in &tokenized.errors {
            eprintln!("{error}");
        }

        let program = toy::parser::program(&tokenized.tokens)?;

        let resolution = self.resolver.resolve(&program)?;
        for warning in &resolution.warnings {
            eprintln!("Warning: {warning}");
        }
        self.interpreter.resolve(resolution.locals);

        if !self.interpreter.run(&program) {
            return Err(InterpretError::Execution);
        }

        if !tokenized.is_ok() {
            return Err(InterpretError::Tokenize(tokenized.errors));
        }

        Ok(())
    }
}

fn repl_command() -> bool {
    println!("Welcome to the toy REPL!");
    println!("EOF to exit. (Ctrl+D on *nix, Ctrl+Z on Windows)");

    let mut session = Session::default();
    let mut source = String::new();

    loop {
        let prompt = if source.is_empty() { "> " } else { ". " };
        print!("{prompt}");
        if let Err(e) = std::io::stdout().flush() {
            eprintln!("Error: {e}");
            return false;
        }

        let mut line = String::new();
        let read = match std::io::stdin().read_line(&mut line) {
            Ok(read) => read,
            Err(e) => {
                eprintln!("Error: {e}");
                return false;
            }
        };

        if read == 0 {
            break;
        }

        source.push_str(&line);
        if brace_depth(&source) > 0 {
            continue;
        }

        if let Err(e) = session.interpret(&source) {
            eprintln!("Error: {e}");
        }

        source.clear();
    }

    true
}

/// Open `{` minus closed `}` tokens, so braces inside strings and comments
/// do not count. A submission is complete once this drops to zero or below.
fn brace_depth(source: &str) -> isize {
    toy::tokenizer::tokens(source)
        .tokens
        .iter()
        .fold(0, |depth, token| match token.token_type {
            TokenType::LeftBrace => depth + 1,
            TokenType::RightBrace => depth - 1,
            _ => depth,
        })
}

fn run_command(args: &FileArgs) -> bool {
    let source = match std::fs::read_to_string(&args.file) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Could not read {}: {e}", args.file);
            return false;
        }
    };

    match Session::default().interpret(&source) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("{e}");
            false
        }
    }
}

fn tokens_command(args: &FileArgs) -> bool {
    let result = std::fs::read_to_string(&args.file)
        .map_err(InterpretError::from)
        .and_then(|source| dump_tokens(&source));

    match result {
        Ok(()) => true,
        Err(e) => {
            eprintln!("{e}");
            false
        }
    }
}

fn dump_tokens(source: &str) -> Result<(), InterpretError> {
    let tokenized = toy::tokenizer::tokens(source);
    let mut stdout = std::io::stdout().lock();

    let mut line = 0;
    for token in &tokenized.tokens {
        if token.line != line {
            write!(stdout, "{:4} ", token.line)?;
            line = token.line;
        } else {
            write!(stdout, "   | ")?;
        }

        let kind = match &token.token_type {
            TokenType::String(_) => "String".to_string(),
            TokenType::Number(_) => "Number".to_string(),
            other => format!("{:?}", other),
        };
        writeln!(stdout, "{:<16} {}", kind, token.lexeme)?;
    }

    for error in &tokenized.errors {
        eprintln!("{error}");
    }

    if !tokenized.is_ok() {
        return Err(InterpretError::Tokenize(tokenized.errors));
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::brace_depth;

    #[test]
    fn test_brace_depth() {
        assert_eq!(brace_depth("print 1;"), 0);
        assert_eq!(brace_depth("function f() {\n"), 1);
        assert_eq!(brace_depth("function f() {\n  if (x) { print x; }\n}"), 0);
        assert_eq!(brace_depth("}"), -1);
        assert_eq!(brace_depth("print \"{\";"), 0);
        assert_eq!(brace_depth("// {\n/* { */ print 1;"), 0);
    }
}
