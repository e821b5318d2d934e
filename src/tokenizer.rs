use std::fmt::Display;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    // Single-character tokens
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,

    // One or two character tokens
    Bang,
    BangBang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Question,
    QuestionQuestion,

    // Literals
    Identifier,
    String(String),
    Number(f64),

    // Keywords
    And,
    Or,
    Mod,
    Class,
    Else,
    False,
    For,
    Function,
    If,
    Null,
    Print,
    Return,
    Super,
    This,
    True,
    Let,
    Const,
    While,
    Extends,
    Static,

    // End of file
    Eof,
}

impl Eq for TokenType {}

impl Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            TokenType::LeftParen => "(",
            TokenType::RightParen => ")",
            TokenType::LeftBrace => "{",
            TokenType::RightBrace => "}",
            TokenType::Comma => ",",
            TokenType::Dot => ".",
            TokenType::Minus => "-",
            TokenType::Plus => "+",
            TokenType::Semicolon => ";",
            TokenType::Slash => "/",
            TokenType::Star => "*",
            TokenType::Bang => "!",
            TokenType::BangBang => "!!",
            TokenType::BangEqual => "!=",
            TokenType::Equal => "=",
            TokenType::EqualEqual => "==",
            TokenType::Greater => ">",
            TokenType::GreaterEqual => ">=",
            TokenType::Less => "<",
            TokenType::LessEqual => "<=",
            TokenType::Question => "?",
            TokenType::QuestionQuestion => "??",
            TokenType::Identifier => "identifier",
            TokenType::String(s) => return write!(f, "\"{s}\""),
            TokenType::Number(n) => return write!(f, "{n}"),
            TokenType::And => "and",
            TokenType::Or => "or",
            TokenType::Mod => "mod",
            TokenType::Class => "class",
            TokenType::Else => "else",
            TokenType::False => "false",
            TokenType::For => "for",
            TokenType::Function => "function",
            TokenType::If => "if",
            TokenType::Null => "null",
            TokenType::Print => "print",
            TokenType::Return => "return",
            TokenType::Super => "super",
            TokenType::This => "this",
            TokenType::True => "true",
            TokenType::Let => "let",
            TokenType::Const => "const",
            TokenType::While => "while",
            TokenType::Extends => "extends",
            TokenType::Static => "static",
            TokenType::Eof => "end of file",
        };
        write!(f, "{text}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub line: usize,
}

impl Token {
    pub fn token_type(&self) -> &TokenType {
        &self.token_type
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizeError {
    #[error("Unexpected character <{character}> on line <{line}>")]
    UnexpectedCharacter { character: char, line: usize },
    #[error("Unterminated string on line {line}")]
    UnterminatedString { line: usize },
    #[error("Unterminated block comment starting at line {line}")]
    UnterminatedComment { line: usize },
}

/// Output of a tokenizer run. `tokens` always ends with a single `Eof` token,
/// even when `errors` is non-empty.
#[derive(Debug)]
pub struct Tokenized {
    pub tokens: Vec<Token>,
    pub errors: Vec<TokenizeError>,
}

impl Tokenized {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn tokens(source: &str) -> Tokenized {
    let mut tokenizer = Tokenizer::new(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    loop {
        match tokenizer.token() {
            Ok(token) => {
                let eof = token.token_type == TokenType::Eof;
                tokens.push(token);
                if eof {
                    break;
                }
            }
            Err(error) => {
                tracing::warn!(%error, "tokenizer recovered");
                errors.push(error);
            }
        }
    }

    Tokenized { tokens, errors }
}

pub struct Tokenizer<'a> {
    remaining: &'a str,
    line: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            remaining: source,
            line: 1,
        }
    }

    /// Produces the next token. Every error path consumes input, so calling
    /// this repeatedly always reaches `Eof`.
    pub fn token(&mut self) -> Result<Token, TokenizeError> {
        self.skip_trivia()?;

        let line = self.line;
        let source = self.remaining;

        if source.is_empty() {
            return Ok(Token {
                token_type: TokenType::Eof,
                lexeme: String::new(),
                line,
            });
        }

        if source.starts_with('"') {
            return self.string();
        }

        let matched = maximal(
            &[
                // Single-character tokens
                left_paren,
                right_paren,
                left_brace,
                right_brace,
                comma,
                dot,
                minus,
                plus,
                semicolon,
                slash,
                star,
                // one or two character tokens
                bang,
                bang_bang,
                bang_equal,
                equal,
                equal_equal,
                greater,
                greater_equal,
                less,
                less_equal,
                question,
                question_question,
                // literals and keywords
                identifier,
                number,
            ],
            source,
        );

        match matched {
            Some((token_type, rest)) => {
                let lexeme = &source[..source.len() - rest.len()];
                self.advance_to(rest);
                Ok(Token {
                    token_type,
                    lexeme: lexeme.to_string(),
                    line,
                })
            }
            None => {
                let mut chars = source.chars();
                let character = chars.next().unwrap_or_default();
                self.advance_to(chars.as_str());
                Err(TokenizeError::UnexpectedCharacter { character, line })
            }
        }
    }

    fn skip_trivia(&mut self) -> Result<(), TokenizeError> {
        loop {
            if let Some(((), rest)) = maximal(&[whitespace, line_comment], self.remaining) {
                self.advance_to(rest);
                continue;
            }

            if let Some(body) = self.remaining.strip_prefix("/*") {
                let line = self.line;
                match body.find("*/") {
                    Some(end) => {
                        self.advance_to(&body[end + 2..]);
                        continue;
                    }
                    None => {
                        self.advance_to("");
                        return Err(TokenizeError::UnterminatedComment { line });
                    }
                }
            }

            return Ok(());
        }
    }

    fn string(&mut self) -> Result<Token, TokenizeError> {
        let line = self.line;
        let source = self.remaining;
        let mut value = String::new();
        let mut chars = source.char_indices().skip(1);

        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    let len = i + c.len_utf8();
                    self.advance_to(&source[len..]);
                    return Ok(Token {
                        token_type: TokenType::String(value),
                        lexeme: source[..len].to_string(),
                        line,
                    });
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, escaped @ ('"' | '\\'))) => value.push(escaped),
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => break,
                },
                _ => value.push(c),
            }
        }

        self.advance_to("");
        Err(TokenizeError::UnterminatedString { line })
    }

    /// Moves the cursor to `rest`, a suffix of the remaining input, counting
    /// the newlines skipped over.
    fn advance_to(&mut self, rest: &'a str) {
        let consumed = &self.remaining[..self.remaining.len() - rest.len()];
        self.line += consumed.matches('\n').count();
        self.remaining = rest;
    }
}

fn maximal<'a, T: std::fmt::Debug>(
    parsers: &[fn(&str) -> Option<(T, &str)>],
    source: &'a str,
) -> Option<(T, &'a str)> {
    let mut min_left = source.len() + 1;
    let mut max_match = None;

    let matching_parsers = parsers.iter().filter_map(|parser| parser(source));
    for (m, rest) in matching_parsers {
        let left = rest.len();
        if left < min_left {
            min_left = left;
            max_match = Some((m, rest));
        }
    }

    max_match
}

fn whitespace(source: &str) -> Option<((), &str)> {
    let len = source
        .chars()
        .take_while(|c| c.is_whitespace())
        .map(char::len_utf8)
        .sum();
    if len > 0 {
        Some(((), &source[len..]))
    } else {
        None
    }
}

fn line_comment(source: &str) -> Option<((), &str)> {
    if source.starts_with("//") {
        let len = source
            .chars()
            .take_while(|c| *c != '\n')
            .map(char::len_utf8)
            .sum();
        Some(((), &source[len..]))
    } else {
        None
    }
}

macro_rules! match_literal {
    ($name:ident, $word:literal, $token:expr) => {
        fn $name(source: &str) -> Option<(TokenType, &str)> {
            source.strip_prefix($word).map(|rest| ($token, rest))
        }
    };
}

match_literal! { left_paren, "(", TokenType::LeftParen }
match_literal! { right_paren, ")", TokenType::RightParen }
match_literal! { left_brace, "{", TokenType::LeftBrace }
match_literal! { right_brace, "}", TokenType::RightBrace }
match_literal! { comma, ",", TokenType::Comma }
match_literal! { dot, ".", TokenType::Dot }
match_literal! { minus, "-", TokenType::Minus }
match_literal! { plus, "+", TokenType::Plus }
match_literal! { semicolon, ";", TokenType::Semicolon }
match_literal! { slash, "/", TokenType::Slash }
match_literal! { star, "*", TokenType::Star }
match_literal! { bang, "!", TokenType::Bang }
match_literal! { equal, "=", TokenType::Equal }
match_literal! { greater, ">", TokenType::Greater }
match_literal! { less, "<", TokenType::Less }
match_literal! { bang_bang, "!!", TokenType::BangBang }
match_literal! { bang_equal, "!=", TokenType::BangEqual }
match_literal! { equal_equal, "==", TokenType::EqualEqual }
match_literal! { greater_equal, ">=", TokenType::GreaterEqual }
match_literal! { less_equal, "<=", TokenType::LessEqual }
match_literal! { question, "?", TokenType::Question }
match_literal! { question_question, "??", TokenType::QuestionQuestion }

fn keyword(word: &str) -> Option<TokenType> {
    let token_type = match word {
        "and" => TokenType::And,
        "or" => TokenType::Or,
        "mod" => TokenType::Mod,
        "class" => TokenType::Class,
        "else" => TokenType::Else,
        "false" => TokenType::False,
        "for" => TokenType::For,
        "function" => TokenType::Function,
        "if" => TokenType::If,
        "null" => TokenType::Null,
        "print" => TokenType::Print,
        "return" => TokenType::Return,
        "super" => TokenType::Super,
        "this" => TokenType::This,
        "true" => TokenType::True,
        "let" => TokenType::Let,
        "const" => TokenType::Const,
        "while" => TokenType::While,
        "extends" => TokenType::Extends,
        "static" => TokenType::Static,
        _ => return None,
    };
    Some(token_type)
}

fn identifier(source: &str) -> Option<(TokenType, &str)> {
    let len = source
        .chars()
        .take_while(|c| c.is_ascii_alphabetic() || *c == '_')
        .map(char::len_utf8)
        .sum::<usize>();

    if len == 0 {
        return None;
    }

    let word = &source[..len];
    Some((keyword(word).unwrap_or(TokenType::Identifier), &source[len..]))
}

fn number(source: &str) -> Option<(TokenType, &str)> {
    let integer = source.chars().take_while(char::is_ascii_digit).count();
    if integer == 0 {
        return None;
    }

    let mut len = integer;
    if let Some(fraction) = source[len..].strip_prefix('.') {
        let digits = fraction.chars().take_while(char::is_ascii_digit).count();
        if digits > 0 {
            len += 1 + digits;
        }
    }

    let value = source[..len].parse().ok()?;
    Some((TokenType::Number(value), &source[len..]))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn types(source: &str) -> Vec<TokenType> {
        tokens(source)
            .tokens
            .into_iter()
            .map(|token| token.token_type)
            .collect()
    }

    #[test]
    fn test_tokens() {
        let source = "let x = 1;";
        let expected = vec![
            TokenType::Let,
            TokenType::Identifier,
            TokenType::Equal,
            TokenType::Number(1.0),
            TokenType::Semicolon,
            TokenType::Eof,
        ];
        assert_eq!(types(source), expected);
    }

    #[test]
    fn test_tokens_with_comments() {
        let source = "let x = 1; // comment\n/* block\ncomment */ x";
        let tokenized = tokens(source);
        assert!(tokenized.is_ok());
        let kinds: Vec<_> = tokenized.tokens.iter().map(Token::token_type).collect();
        assert_eq!(
            kinds,
            vec![
                &TokenType::Let,
                &TokenType::Identifier,
                &TokenType::Equal,
                &TokenType::Number(1.0),
                &TokenType::Semicolon,
                &TokenType::Identifier,
                &TokenType::Eof,
            ]
        );
        assert_eq!(tokenized.tokens[5].line, 3);
    }

    #[test]
    fn test_tokens_with_string() {
        let tokenized = tokens("const x = \"hello\";");
        assert_eq!(
            tokenized.tokens[3],
            Token {
                token_type: TokenType::String("hello".to_string()),
                lexeme: "\"hello\"".to_string(),
                line: 1,
            }
        );
    }

    #[test]
    fn test_escaped_quote_does_not_end_string() {
        let tokenized = tokens(r#""say \"hi\"""#);
        assert!(tokenized.is_ok());
        assert_eq!(
            tokenized.tokens[0].token_type,
            TokenType::String("say \"hi\"".to_string())
        );
    }

    #[test]
    fn test_tokens_with_number() {
        assert_eq!(
            types("12.5 3. 7"),
            vec![
                TokenType::Number(12.5),
                TokenType::Number(3.0),
                TokenType::Dot,
                TokenType::Number(7.0),
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            types("class classy extends static functions function mod"),
            vec![
                TokenType::Class,
                TokenType::Identifier,
                TokenType::Extends,
                TokenType::Static,
                TokenType::Identifier,
                TokenType::Function,
                TokenType::Mod,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_maximal_munch_operators() {
        assert_eq!(
            types("! !! != = == < <= > >= ? ??"),
            vec![
                TokenType::Bang,
                TokenType::BangBang,
                TokenType::BangEqual,
                TokenType::Equal,
                TokenType::EqualEqual,
                TokenType::Less,
                TokenType::LessEqual,
                TokenType::Greater,
                TokenType::GreaterEqual,
                TokenType::Question,
                TokenType::QuestionQuestion,
                TokenType::Eof,
            ]
        );
        assert_eq!(
            types("a==b"),
            vec![
                TokenType::Identifier,
                TokenType::EqualEqual,
                TokenType::Identifier,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_unexpected_character_is_skipped() {
        let tokenized = tokens("let @x # = 1;");
        assert_eq!(
            tokenized.errors,
            vec![
                TokenizeError::UnexpectedCharacter {
                    character: '@',
                    line: 1
                },
                TokenizeError::UnexpectedCharacter {
                    character: '#',
                    line: 1
                },
            ]
        );
        assert_eq!(tokenized.tokens.len(), 6);
    }

    #[test]
    fn test_unterminated_string_still_ends_with_eof() {
        let tokenized = tokens("print 1;\nprint \"oops");
        assert_eq!(
            tokenized.errors,
            vec![TokenizeError::UnterminatedString { line: 2 }]
        );
        let kinds: Vec<_> = tokenized.tokens.iter().map(Token::token_type).collect();
        assert_eq!(
            kinds,
            vec![
                &TokenType::Print,
                &TokenType::Number(1.0),
                &TokenType::Semicolon,
                &TokenType::Print,
                &TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_block_comment() {
        let tokenized = tokens("x /* never closed\n\n");
        assert_eq!(
            tokenized.errors,
            vec![TokenizeError::UnterminatedComment { line: 1 }]
        );
        assert_eq!(types("x /* never closed"), vec![TokenType::Identifier, TokenType::Eof]);
    }

    #[test]
    fn test_relexing_lexemes_preserves_kinds() {
        let source = r#"
            class B extends A { get() { return super.get() + 1; } }
            let s = "a b" ?? null; const n = !!(4.25 mod 2) <= 3;
            for (let i = 0; i < 3;) { print i; i = i + 1; }
        "#;
        let first = tokens(source);
        let rebuilt = first
            .tokens
            .iter()
            .map(|token| token.lexeme.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let second = tokens(&rebuilt);
        assert_eq!(types(source), second.tokens.into_iter().map(|t| t.token_type).collect::<Vec<_>>());
    }
}
