// SQL lexer - tokenizes SQL statements

use super::token::Token;
use crate::error::{Error, Result};

pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
        }
    }

    /// Get the next token from the input
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments();

        let Some(ch) = self.current_char() else {
            return Ok(Token::Eof);
        };

        let token = match ch {
            '-' => {
                self.advance();
                Token::Minus
            }
            '*' => {
                self.advance();
                Token::Star
            }
            '(' => {
                self.advance();
                Token::LeftParen
            }
            ')' => {
                self.advance();
                Token::RightParen
            }
            ',' => {
                self.advance();
                Token::Comma
            }
            ';' => {
                self.advance();
                Token::Semicolon
            }
            '\'' => Token::String(self.read_delimited('\'', '\'', "string literal")?),
            '"' => Token::QuotedIdentifier(self.read_delimited('"', '"', "quoted identifier")?),
            '[' => Token::QuotedIdentifier(self.read_delimited('[', ']', "bracketed identifier")?),
            '@' | ':' | '$' => self.read_parameter()?,
            c if c.is_alphabetic() || c == '_' => self.read_identifier(),
            c if c.is_ascii_digit() => self.read_number(),
            other => {
                return Err(Error::Syntax(format!(
                    "unexpected character '{}' at offset {}",
                    other, self.position
                )))
            }
        };

        Ok(token)
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    /// Skip whitespace and `--` line comments
    fn skip_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '-' && self.peek() == Some('-') {
                while let Some(ch) = self.current_char() {
                    self.advance();
                    if ch == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    /// Read an identifier or keyword
    fn read_identifier(&mut self) -> Token {
        let identifier = self.read_word();
        Token::keyword_from_str(&identifier).unwrap_or(Token::Identifier(identifier))
    }

    fn read_parameter(&mut self) -> Result<Token> {
        let start = self.position;
        self.advance(); // Skip sigil
        let name = self.read_word();
        if name.is_empty() {
            return Err(Error::Syntax(format!("empty parameter name at offset {start}")));
        }
        Ok(Token::Parameter(name))
    }

    /// Reads text up to `close`; a doubled `close` stands for itself.
    fn read_delimited(&mut self, open: char, close: char, what: &str) -> Result<String> {
        let start = self.position;
        debug_assert_eq!(self.current_char(), Some(open));
        self.advance();

        let mut text = String::new();
        while let Some(ch) = self.current_char() {
            self.advance();
            if ch == close {
                if self.current_char() == Some(close) {
                    text.push(close);
                    self.advance();
                } else {
                    return Ok(text);
                }
            } else {
                text.push(ch);
            }
        }
        Err(Error::Syntax(format!("unterminated {what} starting at offset {start}")))
    }

    fn read_number(&mut self) -> Token {
        let mut number = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() {
                number.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Token::Number(number)
    }

    /// Tokenize the entire input, ending with `Token::Eof`
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }
}
