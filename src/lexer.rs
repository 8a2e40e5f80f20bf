//! Handwritten lexer for Schist

use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(i64),

    // Identifiers
    Ident(String),      // lowercase start
    UpperIdent(String), // uppercase start (constructors)

    // Keywords
    Val,
    Rec,
    Data,
    Let,
    In,
    If,
    Then,
    Else,
    Fun,
    Match,
    With,
    Try,
    Catch,
    Throw,
    NewChan,
    Send,
    Recv,
    SendP,
    RecvP,
    Close,

    // Delimiters
    LParen,   // (
    RParen,   // )
    Semi,     // ;
    SemiSemi, // ;;

    // Operators
    Arrow,   // ->
    Bar,     // |
    Eq,      // =
    Plus,    // +
    Minus,   // -
    Star,    // *
    Slash,   // /
    Percent, // %
    AndAnd,  // &&
    OrOr,    // ||

    // Special
    Eof,
}

#[derive(Error, Debug)]
pub enum LexError {
    #[error("unexpected character {0:?} at byte {1}")]
    UnexpectedChar(char, usize),
    #[error("number too large at byte {0}")]
    NumberTooLarge(usize),
}

pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            pos: 0,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token == Token::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.advance() {
            if c == '\n' {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        loop {
            self.skip_whitespace();

            let start = self.pos;
            let c = match self.advance() {
                Some(c) => c,
                None => return Ok(Token::Eof),
            };

            return match c {
                '(' => Ok(Token::LParen),
                ')' => Ok(Token::RParen),
                '|' => {
                    if self.peek() == Some('|') {
                        self.advance();
                        Ok(Token::OrOr)
                    } else {
                        Ok(Token::Bar)
                    }
                }
                ';' => {
                    if self.peek() == Some(';') {
                        self.advance();
                        Ok(Token::SemiSemi)
                    } else {
                        Ok(Token::Semi)
                    }
                }
                '=' => Ok(Token::Eq),
                '+' => Ok(Token::Plus),
                '*' => Ok(Token::Star),
                '/' => Ok(Token::Slash),
                '%' => Ok(Token::Percent),
                '-' => match self.peek() {
                    Some('-') => {
                        self.skip_line_comment();
                        continue;
                    }
                    Some('>') => {
                        self.advance();
                        Ok(Token::Arrow)
                    }
                    _ => Ok(Token::Minus),
                },
                '&' => {
                    if self.peek() == Some('&') {
                        self.advance();
                        Ok(Token::AndAnd)
                    } else {
                        Err(LexError::UnexpectedChar('&', start))
                    }
                }
                c if c.is_ascii_digit() => self.number(c, start),
                c if c.is_alphabetic() || c == '_' => Ok(self.word(c)),
                c => Err(LexError::UnexpectedChar(c, start)),
            };
        }
    }

    fn number(&mut self, first: char, start: usize) -> Result<Token, LexError> {
        let mut text = String::from(first);
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|_| LexError::NumberTooLarge(start))
    }

    fn word(&mut self, first: char) -> Token {
        let mut text = String::from(first);
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '\'' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        match text.as_str() {
            "val" => Token::Val,
            "rec" => Token::Rec,
            "data" => Token::Data,
            "let" => Token::Let,
            "in" => Token::In,
            "if" => Token::If,
            "then" => Token::Then,
            "else" => Token::Else,
            "fun" => Token::Fun,
            "match" => Token::Match,
            "with" => Token::With,
            "try" => Token::Try,
            "catch" => Token::Catch,
            "throw" => Token::Throw,
            "newchan" => Token::NewChan,
            "send" => Token::Send,
            "recv" => Token::Recv,
            "sendp" => Token::SendP,
            "recvp" => Token::RecvP,
            "close" => Token::Close,
            _ => {
                if first.is_uppercase() {
                    Token::UpperIdent(text)
                } else {
                    Token::Ident(text)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        Lexer::new(input).tokenize().unwrap()
    }

    #[test]
    fn test_arithmetic_tokens() {
        assert_eq!(
            lex("1 + 2 * 3"),
            vec![
                Token::Int(1),
                Token::Plus,
                Token::Int(2),
                Token::Star,
                Token::Int(3),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_keywords_and_idents() {
        assert_eq!(
            lex("let c = newchan in Cons"),
            vec![
                Token::Let,
                Token::Ident("c".into()),
                Token::Eq,
                Token::NewChan,
                Token::In,
                Token::UpperIdent("Cons".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_arrow_minus_comment() {
        assert_eq!(
            lex("x -> y - 1 -- ignored -> here\n2"),
            vec![
                Token::Ident("x".into()),
                Token::Arrow,
                Token::Ident("y".into()),
                Token::Minus,
                Token::Int(1),
                Token::Int(2),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_bars_and_semis() {
        assert_eq!(
            lex("| || ; ;;"),
            vec![
                Token::Bar,
                Token::OrOr,
                Token::Semi,
                Token::SemiSemi,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_lone_ampersand_rejected() {
        assert!(Lexer::new("a & b").tokenize().is_err());
    }
}
