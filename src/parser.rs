use thiserror::Error;

use crate::ast::{BinaryOp, Node, NodeKind, Program};
use crate::token::{Span, Token, TokenKind};

/// Binding powers, lowest to highest. `parse_expression(min)` keeps
/// consuming infix operators while the next token binds more tightly
/// than `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    Lowest,
    Assign,
    If,
    Equals,
    LessGreater,
    Sum,
    Product,
    Prefix,
    Array,
    Call,
}

fn precedence_of(kind: &TokenKind<'_>) -> Precedence {
    match kind {
        TokenKind::Assign
        | TokenKind::ColonAssign
        | TokenKind::PlusAssign
        | TokenKind::MinusAssign => Precedence::Assign,
        TokenKind::If => Precedence::If,
        TokenKind::Eq | TokenKind::NotEq => Precedence::Equals,
        TokenKind::Lt | TokenKind::Gt | TokenKind::LtEq | TokenKind::GtEq => {
            Precedence::LessGreater
        }
        TokenKind::Plus | TokenKind::Minus | TokenKind::Shl | TokenKind::Shr => Precedence::Sum,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent | TokenKind::StarStar => {
            Precedence::Product
        }
        TokenKind::LBracket => Precedence::Array,
        TokenKind::LParen | TokenKind::Dot => Precedence::Call,
        _ => Precedence::Lowest,
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("syntax error on line: {line}: unexpected token '{found}', expected {expected}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: usize,
    },
    #[error("syntax error on line: {line}: unexpected token '{found}'")]
    UnexpectedExpressionStart { found: String, line: usize },
    #[error("syntax error on line: {line}: unexpected end of input")]
    UnexpectedEof { line: usize },
    #[error("syntax error on line: {line}: 'for' takes one or three header clauses, got {count}")]
    MalformedForHeader { count: usize, line: usize },
    #[error("syntax error on line: {line}: non-logical operator '{op}' in condition")]
    NonLogicalCondition { op: String, line: usize },
    #[error("syntax error on line: {line}: invalid assignment target")]
    InvalidAssignmentTarget { line: usize },
    #[error("syntax error on line: {line}: can only call named functions")]
    InvalidCallTarget { line: usize },
    #[error("syntax error on line: {line}: '{keyword}' is reserved")]
    ReservedKeyword { keyword: String, line: usize },
    #[error("syntax error on line: {line}: operator '{operator}' is reserved")]
    ReservedOperator { operator: String, line: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(mut tokens: Vec<Token<'a>>) -> Self {
        if tokens.is_empty() {
            tokens.push(Token::new(TokenKind::EOF, Span::default()));
        }
        Self { tokens, pos: 0 }
    }

    pub fn parse_program(mut self) -> ParseResult<Program> {
        let mut statements = Vec::new();
        while !matches!(self.current().kind, TokenKind::EOF) {
            statements.push(self.parse_expression(Precedence::Lowest)?);
        }
        Ok(Program { statements })
    }

    fn parse_expression(&mut self, min: Precedence) -> ParseResult<Node> {
        let mut left = self.parse_prefix()?;

        loop {
            let token = *self.current();
            if precedence_of(&token.kind) <= min {
                break;
            }
            left = match token.kind {
                TokenKind::Plus => self.parse_infix(left, BinaryOp::Add)?,
                TokenKind::Minus => self.parse_infix(left, BinaryOp::Sub)?,
                TokenKind::Star => self.parse_infix(left, BinaryOp::Mul)?,
                TokenKind::Slash => self.parse_infix(left, BinaryOp::Div)?,
                TokenKind::Percent => self.parse_infix(left, BinaryOp::Rem)?,
                TokenKind::Eq => self.parse_infix(left, BinaryOp::Eq)?,
                TokenKind::NotEq => self.parse_infix(left, BinaryOp::NotEq)?,
                TokenKind::Lt => self.parse_infix(left, BinaryOp::Lt)?,
                TokenKind::Gt => self.parse_infix(left, BinaryOp::Gt)?,
                TokenKind::LtEq => self.parse_infix(left, BinaryOp::LtEq)?,
                TokenKind::GtEq => self.parse_infix(left, BinaryOp::GtEq)?,
                TokenKind::Assign => self.parse_assign(left)?,
                TokenKind::LParen => self.parse_call(left)?,
                TokenKind::ColonAssign
                | TokenKind::PlusAssign
                | TokenKind::MinusAssign
                | TokenKind::StarStar
                | TokenKind::Shl
                | TokenKind::Shr
                | TokenKind::Dot => {
                    return Err(ParseError::ReservedOperator {
                        operator: token.kind.to_string(),
                        line: token.span.line,
                    });
                }
                _ => break,
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> ParseResult<Node> {
        let token = *self.current();
        let span = token.span;
        match token.kind {
            TokenKind::Int(value) => {
                self.advance();
                Ok(Node::new(NodeKind::Int(value), span))
            }
            TokenKind::Float(value) => {
                self.advance();
                Ok(Node::new(NodeKind::Float(value), span))
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Node::new(NodeKind::Str(value.to_string()), span))
            }
            TokenKind::True => {
                self.advance();
                Ok(Node::new(NodeKind::Bool(true), span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Node::new(NodeKind::Bool(false), span))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                match self.current().kind {
                    TokenKind::Increment => {
                        self.advance();
                        Ok(Node::new(NodeKind::Increment(name.to_string()), span))
                    }
                    TokenKind::Decrement => {
                        self.advance();
                        Ok(Node::new(NodeKind::Decrement(name.to_string()), span))
                    }
                    _ => Ok(Node::new(NodeKind::Ident(name.to_string()), span)),
                }
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression(Precedence::Lowest)?;
                self.expect_rparen()?;
                Ok(expr)
            }
            TokenKind::LBracket => self.parse_array(span),
            TokenKind::Func => self.parse_function(span),
            TokenKind::If => self.parse_if(span),
            TokenKind::For => self.parse_for(span),
            TokenKind::Return => self.parse_return(span),
            TokenKind::Var
            | TokenKind::Class
            | TokenKind::Elif
            | TokenKind::Forever
            | TokenKind::Break
            | TokenKind::Continue
            | TokenKind::Import
            | TokenKind::Async
            | TokenKind::Await
            | TokenKind::Struct => Err(ParseError::ReservedKeyword {
                keyword: token.kind.to_string(),
                line: span.line,
            }),
            TokenKind::EOF => Err(ParseError::UnexpectedEof { line: span.line }),
            other => Err(ParseError::UnexpectedExpressionStart {
                found: other.to_string(),
                line: span.line,
            }),
        }
    }

    fn parse_infix(&mut self, left: Node, op: BinaryOp) -> ParseResult<Node> {
        let token = *self.current();
        self.advance();
        let right = self.parse_expression(precedence_of(&token.kind))?;
        Ok(Node::new(
            NodeKind::Infix {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            token.span,
        ))
    }

    fn parse_assign(&mut self, left: Node) -> ParseResult<Node> {
        let token = *self.current();
        let NodeKind::Ident(name) = left.kind else {
            return Err(ParseError::InvalidAssignmentTarget {
                line: token.span.line,
            });
        };
        self.advance();
        // Parsing the right-hand side below the `=` level makes chained
        // assignment right-associative.
        let value = self.parse_expression(Precedence::Lowest)?;
        Ok(Node::new(
            NodeKind::Assign {
                name,
                value: Box::new(value),
            },
            left.span,
        ))
    }

    fn parse_call(&mut self, left: Node) -> ParseResult<Node> {
        let line = self.current().span.line;
        let NodeKind::Ident(name) = left.kind else {
            return Err(ParseError::InvalidCallTarget { line });
        };
        self.advance(); // (
        let mut args = Vec::new();
        if !matches!(self.current().kind, TokenKind::RParen) {
            args.push(self.parse_expression(Precedence::Lowest)?);
            while matches!(self.current().kind, TokenKind::Comma) {
                self.advance();
                args.push(self.parse_expression(Precedence::Lowest)?);
            }
        }
        self.expect_rparen()?;
        Ok(Node::new(NodeKind::Call { name, args }, left.span))
    }

    fn parse_array(&mut self, span: Span) -> ParseResult<Node> {
        self.advance(); // [
        let mut elements = Vec::new();
        if !matches!(self.current().kind, TokenKind::RBracket) {
            elements.push(self.parse_expression(Precedence::Lowest)?);
            while matches!(self.current().kind, TokenKind::Comma) {
                self.advance();
                elements.push(self.parse_expression(Precedence::Lowest)?);
            }
        }
        self.expect_rbracket()?;
        Ok(Node::new(NodeKind::Array(elements), span))
    }

    fn parse_function(&mut self, span: Span) -> ParseResult<Node> {
        self.advance(); // func
        let name = self.expect_identifier()?;
        self.expect_lparen()?;

        let mut params = Vec::new();
        while !matches!(self.current().kind, TokenKind::RParen) {
            params.push(self.expect_identifier()?);
            match self.current().kind {
                TokenKind::Comma => self.advance(),
                TokenKind::RParen => break,
                _ => {
                    return Err(self.unexpected("',' or ')'"));
                }
            }
        }
        self.expect_rparen()?;
        self.expect_lbrace()?;
        let mut body = self.parse_block()?;

        // Every function body ends in a return so a call always yields a
        // value; synthesize `return nil` when the source omits it.
        let needs_return = !matches!(
            body.last(),
            Some(Node {
                kind: NodeKind::Return(_),
                ..
            })
        );
        if needs_return {
            body.push(Node::new(
                NodeKind::Return(Some(Box::new(Node::new(NodeKind::Nil, span)))),
                span,
            ));
        }

        Ok(Node::new(NodeKind::Function { name, params, body }, span))
    }

    fn parse_if(&mut self, span: Span) -> ParseResult<Node> {
        self.advance(); // if
        let condition = self.parse_expression(Precedence::Lowest)?;
        if let NodeKind::Infix { op, .. } = &condition.kind {
            if op.is_arithmetic() {
                return Err(ParseError::NonLogicalCondition {
                    op: op.to_string(),
                    line: condition.span.line,
                });
            }
        }
        self.expect_lbrace()?;
        let consequence = self.parse_block()?;

        let alternative = if matches!(self.current().kind, TokenKind::Else) {
            self.advance();
            self.expect_lbrace()?;
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(Node::new(
            NodeKind::If {
                condition: Box::new(condition),
                consequence,
                alternative,
            },
            span,
        ))
    }

    fn parse_for(&mut self, span: Span) -> ParseResult<Node> {
        self.advance(); // for

        let mut components = Vec::new();
        if matches!(self.current().kind, TokenKind::LBrace) {
            self.advance();
        } else {
            loop {
                components.push(self.parse_expression(Precedence::Lowest)?);
                match self.current().kind {
                    TokenKind::Semicolon => self.advance(),
                    TokenKind::LBrace => {
                        self.advance();
                        break;
                    }
                    _ => return Err(self.unexpected("';' or '{'")),
                }
            }
        }

        let body = self.parse_block()?;

        let (init, condition, update) = match components.len() {
            0 => (None, None, None),
            1 => {
                let mut drain = components.into_iter();
                (None, drain.next().map(Box::new), None)
            }
            3 => {
                let mut drain = components.into_iter();
                (
                    drain.next().map(Box::new),
                    drain.next().map(Box::new),
                    drain.next().map(Box::new),
                )
            }
            count => {
                return Err(ParseError::MalformedForHeader {
                    count,
                    line: span.line,
                });
            }
        };

        Ok(Node::new(
            NodeKind::For {
                init,
                condition,
                update,
                body,
            },
            span,
        ))
    }

    fn parse_return(&mut self, span: Span) -> ParseResult<Node> {
        self.advance(); // return
        let value = match self.current().kind {
            TokenKind::RBrace | TokenKind::Semicolon | TokenKind::EOF => None,
            _ => Some(Box::new(self.parse_expression(Precedence::Lowest)?)),
        };
        Ok(Node::new(NodeKind::Return(value), span))
    }

    /// Parses statements up to and including the closing `}`. The opening
    /// brace has already been consumed.
    fn parse_block(&mut self) -> ParseResult<Vec<Node>> {
        let mut statements = Vec::new();
        loop {
            match self.current().kind {
                TokenKind::RBrace => {
                    self.advance();
                    return Ok(statements);
                }
                TokenKind::EOF => {
                    return Err(ParseError::UnexpectedEof {
                        line: self.current().span.line,
                    });
                }
                _ => statements.push(self.parse_expression(Precedence::Lowest)?),
            }
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        if let TokenKind::Identifier(name) = self.current().kind {
            self.advance();
            Ok(name.to_string())
        } else {
            Err(self.unexpected("identifier"))
        }
    }

    fn expect_lparen(&mut self) -> ParseResult<()> {
        if matches!(self.current().kind, TokenKind::LParen) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected("'('"))
        }
    }

    fn expect_rparen(&mut self) -> ParseResult<()> {
        if matches!(self.current().kind, TokenKind::RParen) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected("')'"))
        }
    }

    fn expect_lbrace(&mut self) -> ParseResult<()> {
        if matches!(self.current().kind, TokenKind::LBrace) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected("'{'"))
        }
    }

    fn expect_rbracket(&mut self) -> ParseResult<()> {
        if matches!(self.current().kind, TokenKind::RBracket) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected("']'"))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.current();
        if matches!(token.kind, TokenKind::EOF) {
            ParseError::UnexpectedEof {
                line: token.span.line,
            }
        } else {
            ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: token.kind.to_string(),
                line: token.span.line,
            }
        }
    }

    fn current(&self) -> &Token<'a> {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }
}

pub fn parse_tokens(tokens: Vec<Token<'_>>) -> ParseResult<Program> {
    Parser::new(tokens).parse_program()
}

/// Convenience wrapper for callers that start from source text.
pub fn parse_source(source: &str) -> anyhow::Result<Program> {
    let tokens = crate::lexer::tokenize(source)?;
    Ok(parse_tokens(tokens)?)
}
