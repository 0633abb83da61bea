#![forbid(unsafe_code)]

use crate::error::ParseError;
use crate::lexer::{lex, Token, TokenKind};
use crate::signature::{KwdParam, Signature};
use crate::types::{ScalarKind, Type};

pub fn parse_type(src: &str) -> Result<Type, ParseError> {
    let tokens = lex(src)?;
    let mut p = Parser::new(&tokens);
    let ty = p.parse_type()?;
    p.expect_eof()?;
    Ok(ty)
}

pub fn parse_signature(src: &str) -> Result<Signature, ParseError> {
    let tokens = lex(src)?;
    let mut p = Parser::new(&tokens);
    let sig = p.parse_signature()?;
    p.expect_eof()?;
    Ok(sig)
}

struct Parser<'a> {
    tokens: &'a [Token],
    idx: usize,
}

fn is_var_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Parser { tokens, idx: 0 }
    }

    fn peek(&self) -> &Token {
        // `lex` always terminates the stream with Eof.
        &self.tokens[self.idx.min(self.tokens.len() - 1)]
    }

    fn peek_kind_at(&self, ahead: usize) -> &TokenKind {
        let i = (self.idx + ahead).min(self.tokens.len() - 1);
        &self.tokens[i].kind
    }

    fn bump(&mut self) -> Token {
        let t = self.peek().clone();
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        t
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let t = self.peek();
        ParseError::at(message, t.start, t.len)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ParseError> {
        if *self.peek_kind_at(0) == kind {
            Ok(self.bump())
        } else {
            Err(self.error_here(format!("expected {what}")))
        }
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        if *self.peek_kind_at(0) == TokenKind::Eof {
            Ok(())
        } else {
            Err(self.error_here("unexpected trailing input"))
        }
    }

    fn parse_type(&mut self) -> Result<Type, ParseError> {
        let tok = self.peek().clone();
        let next = self.peek_kind_at(1).clone();
        let after = self.peek_kind_at(2).clone();
        match (&tok.kind, &next, &after) {
            (TokenKind::Int(size), TokenKind::Star, _) => {
                let size = *size;
                self.bump();
                self.bump();
                Ok(Type::fixed_dim(size, self.parse_type()?))
            }
            (TokenKind::Ellipsis, TokenKind::Star, _) => {
                self.bump();
                self.bump();
                Ok(Type::ellipsis(None, self.parse_type()?))
            }
            (TokenKind::Ident(name), TokenKind::Ellipsis, TokenKind::Star) => {
                if !is_var_name(name) {
                    return Err(self.error_here("ellipsis names must start with an uppercase letter"));
                }
                let name = name.clone();
                self.bump();
                self.bump();
                self.bump();
                Ok(Type::ellipsis(Some(&name), self.parse_type()?))
            }
            (TokenKind::Ident(name), TokenKind::Star, _) => {
                if !is_var_name(name) {
                    return Err(self.error_here(format!(
                        "'{name}' cannot be used as a dimension; symbolic dims start with an uppercase letter"
                    )));
                }
                let name = name.clone();
                self.bump();
                self.bump();
                Ok(Type::symbolic_dim(name, self.parse_type()?))
            }
            (TokenKind::Ident(name), _, _) => {
                let ty = match name.as_str() {
                    "void" => Type::Void,
                    "Any" => Type::Any,
                    n => match ScalarKind::from_name(n) {
                        Some(kind) => Type::Scalar(kind),
                        None if is_var_name(n) => Type::TypeVar(n.to_string()),
                        None => return Err(self.error_here(format!("unknown type '{n}'"))),
                    },
                };
                self.bump();
                Ok(ty)
            }
            (TokenKind::Int(_), _, _) => Err(self.error_here("expected '*' after dimension size")),
            _ => Err(self.error_here("expected a type")),
        }
    }

    fn parse_signature(&mut self) -> Result<Signature, ParseError> {
        self.expect(TokenKind::LParen, "'('")?;

        let mut params = Vec::new();
        let mut kwds: Vec<KwdParam> = Vec::new();

        if *self.peek_kind_at(0) != TokenKind::RParen {
            loop {
                let is_kwd = matches!(
                    (self.peek_kind_at(0), self.peek_kind_at(1)),
                    (TokenKind::Ident(_), TokenKind::Colon)
                );
                if is_kwd {
                    let name_tok = self.bump();
                    let TokenKind::Ident(name) = name_tok.kind else {
                        return Err(self.error_here("expected keyword name"));
                    };
                    if kwds.iter().any(|k| k.name == name) {
                        return Err(ParseError::at(
                            format!("duplicate keyword '{name}'"),
                            name_tok.start,
                            name_tok.len,
                        ));
                    }
                    self.bump();
                    let optional = *self.peek_kind_at(0) == TokenKind::Question;
                    if optional {
                        self.bump();
                    }
                    let ty = self.parse_type()?;
                    kwds.push(KwdParam { name, ty, optional });
                } else {
                    if !kwds.is_empty() {
                        return Err(self.error_here("positional parameter after keyword parameter"));
                    }
                    params.push(self.parse_type()?);
                }

                if *self.peek_kind_at(0) == TokenKind::Comma {
                    self.bump();
                    continue;
                }
                break;
            }
        }

        self.expect(TokenKind::RParen, "')'")?;
        self.expect(TokenKind::Arrow, "'->'")?;
        let ret = self.parse_type()?;

        Ok(Signature { params, kwds, ret })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_dims() {
        let t = parse_type("3 * N * Dims... * float64").unwrap();
        assert_eq!(
            t,
            Type::fixed_dim(
                3,
                Type::symbolic_dim("N", Type::ellipsis(Some("Dims"), Type::Scalar(ScalarKind::Float64)))
            )
        );
    }

    #[test]
    fn lowercase_unknown_names_are_errors() {
        let err = parse_type("int33").unwrap_err();
        assert!(err.message.contains("int33"));
        let err = parse_type("n * int32").unwrap_err();
        assert!(err.message.contains("dimension"));
    }

    #[test]
    fn keyword_after_positional_only() {
        let sig = parse_signature("(T, T, scale: ?float64) -> T").unwrap();
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.kwds, vec![KwdParam::optional("scale", Type::Scalar(ScalarKind::Float64))]);

        assert!(parse_signature("(x: int32, T) -> T").is_err());
        assert!(parse_signature("(x: int32, x: int32) -> void").is_err());
    }

    #[test]
    fn empty_parameter_list() {
        let sig = parse_signature("() -> void").unwrap();
        assert!(sig.params.is_empty());
        assert_eq!(sig.ret, Type::Void);
    }

    #[test]
    fn trailing_input_is_rejected() {
        let err = parse_type("int32 int32").unwrap_err();
        assert_eq!(err.message, "unexpected trailing input");
    }
}
