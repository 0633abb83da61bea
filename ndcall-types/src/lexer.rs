#![forbid(unsafe_code)]

use logos::Logos;

use crate::error::ParseError;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum RawToken {
    #[token("->")]
    Arrow,
    #[token("...")]
    Ellipsis,
    #[token("*")]
    Star,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("?")]
    Question,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    #[regex(r"[0-9][0-9_]*", |lex| parse_dim(lex.slice()))]
    Int(Option<usize>),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn parse_dim(s: &str) -> Option<usize> {
    if s.ends_with('_') || s.contains("__") {
        return None;
    }
    s.replace('_', "").parse::<usize>().ok()
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Arrow,
    Ellipsis,
    Star,
    Comma,
    Colon,
    Question,
    LParen,
    RParen,
    Int(usize),
    Ident(String),
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub len: usize,
}

pub fn lex(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut lexer = RawToken::lexer(src);

    while let Some(raw) = lexer.next() {
        let span = lexer.span();
        let kind = match raw {
            Ok(RawToken::Arrow) => TokenKind::Arrow,
            Ok(RawToken::Ellipsis) => TokenKind::Ellipsis,
            Ok(RawToken::Star) => TokenKind::Star,
            Ok(RawToken::Comma) => TokenKind::Comma,
            Ok(RawToken::Colon) => TokenKind::Colon,
            Ok(RawToken::Question) => TokenKind::Question,
            Ok(RawToken::LParen) => TokenKind::LParen,
            Ok(RawToken::RParen) => TokenKind::RParen,
            Ok(RawToken::Int(Some(n))) => TokenKind::Int(n),
            Ok(RawToken::Int(None)) => {
                return Err(ParseError::at(
                    "invalid dimension size",
                    span.start,
                    span.len(),
                ));
            }
            Ok(RawToken::Ident(s)) => TokenKind::Ident(s),
            Err(()) => {
                return Err(ParseError::at(
                    format!("unexpected character '{}'", lexer.slice()),
                    span.start,
                    span.len(),
                ));
            }
        };
        tokens.push(Token {
            kind,
            start: span.start,
            len: span.len(),
        });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        start: src.len(),
        len: 0,
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_signature_punctuation() {
        assert_eq!(
            kinds("(Dims... * T, n: ?int64) -> T"),
            vec![
                TokenKind::LParen,
                TokenKind::Ident("Dims".into()),
                TokenKind::Ellipsis,
                TokenKind::Star,
                TokenKind::Ident("T".into()),
                TokenKind::Comma,
                TokenKind::Ident("n".into()),
                TokenKind::Colon,
                TokenKind::Question,
                TokenKind::Ident("int64".into()),
                TokenKind::RParen,
                TokenKind::Arrow,
                TokenKind::Ident("T".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn rejects_stray_characters() {
        let err = lex("3 * int32 $").unwrap_err();
        assert!(err.message.contains('$'));
    }

    #[test]
    fn digit_separators() {
        assert_eq!(kinds("1_000"), vec![TokenKind::Int(1000), TokenKind::Eof]);
    }
}
