//! Recursive-descent XPath 1.0 parser over the token stream.

use passthrough_types::{PassthroughError, Result};

use crate::ast::{Axis, BinaryOp, Expr, LocationPath, NodeTest, Step};
use crate::lexer::{tokenize, Spanned, Token};

const NODE_TYPES: &[&str] = &["text", "node", "comment", "processing-instruction"];

struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(expression: &'a str, tokens: Vec<Spanned>) -> Self {
        Self {
            expression,
            tokens,
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_name(&mut self, name: &str) -> bool {
        if matches!(self.peek(), Some(Token::Name(n)) if n == name) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn error(&self, message: impl Into<String>) -> PassthroughError {
        let offset = self
            .tokens
            .get(self.pos)
            .map(|s| s.offset)
            .unwrap_or(self.expression.len());
        PassthroughError::XPathSyntax {
            expression: self.expression.to_string(),
            offset,
            message: message.into(),
        }
    }

    // --- operator precedence levels ---

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_name("or") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.equality_expr()?;
        while self.eat_name("and") {
            let right = self.equality_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr>,
        op_for: fn(&Token) -> Option<BinaryOp>,
    ) -> Result<Expr> {
        let mut left = next(self)?;
        while let Some(op) = self.peek().and_then(op_for) {
            self.pos += 1;
            let right = next(self)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality_expr(&mut self) -> Result<Expr> {
        self.binary_level(Self::relational_expr, |t| match t {
            Token::Eq => Some(BinaryOp::Eq),
            Token::NotEq => Some(BinaryOp::NotEq),
            _ => None,
        })
    }

    fn relational_expr(&mut self) -> Result<Expr> {
        self.binary_level(Self::additive_expr, |t| match t {
            Token::Lt => Some(BinaryOp::Lt),
            Token::Le => Some(BinaryOp::Le),
            Token::Gt => Some(BinaryOp::Gt),
            Token::Ge => Some(BinaryOp::Ge),
            _ => None,
        })
    }

    fn additive_expr(&mut self) -> Result<Expr> {
        self.binary_level(Self::multiplicative_expr, |t| match t {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    // In operator position `*` multiplies and `div`/`mod` are operators.
    fn multiplicative_expr(&mut self) -> Result<Expr> {
        self.binary_level(Self::unary_expr, |t| match t {
            Token::Star => Some(BinaryOp::Mul),
            Token::Name(n) if n == "div" => Some(BinaryOp::Div),
            Token::Name(n) if n == "mod" => Some(BinaryOp::Mod),
            _ => None,
        })
    }

    fn unary_expr(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            let inner = self.unary_expr()?;
            return Ok(Expr::Negate(Box::new(inner)));
        }
        self.union_expr()
    }

    fn union_expr(&mut self) -> Result<Expr> {
        let mut left = self.path_expr()?;
        while self.eat(&Token::Pipe) {
            let right = self.path_expr()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // --- paths ---

    fn starts_primary(&self) -> bool {
        match self.peek() {
            Some(Token::Literal(_) | Token::Number(_) | Token::LParen) => true,
            Some(Token::Name(n)) => {
                self.peek_at(1) == Some(&Token::LParen) && !NODE_TYPES.contains(&n.as_str())
            }
            _ => false,
        }
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                Token::Dot
                    | Token::DoubleDot
                    | Token::At
                    | Token::Star
                    | Token::Name(_)
                    | Token::PrefixWildcard(_)
            )
        )
    }

    fn path_expr(&mut self) -> Result<Expr> {
        if self.starts_primary() {
            let primary = self.primary_expr()?;
            let mut predicates = Vec::new();
            while self.peek() == Some(&Token::LBracket) {
                predicates.push(self.predicate()?);
            }
            let mut steps = Vec::new();
            if matches!(self.peek(), Some(Token::Slash | Token::DoubleSlash)) {
                self.continue_path(&mut steps)?;
            }
            if predicates.is_empty() && steps.is_empty() {
                return Ok(primary);
            }
            return Ok(Expr::Filter {
                primary: Box::new(primary),
                predicates,
                steps,
            });
        }
        self.location_path().map(Expr::Path)
    }

    fn location_path(&mut self) -> Result<LocationPath> {
        let mut steps = Vec::new();
        match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                if self.starts_step() {
                    steps.push(self.step()?);
                    self.continue_path(&mut steps)?;
                }
                Ok(LocationPath {
                    absolute: true,
                    steps,
                })
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                steps.push(Step::descendant_or_self());
                steps.push(self.step()?);
                self.continue_path(&mut steps)?;
                Ok(LocationPath {
                    absolute: true,
                    steps,
                })
            }
            _ => {
                steps.push(self.step()?);
                self.continue_path(&mut steps)?;
                Ok(LocationPath {
                    absolute: false,
                    steps,
                })
            }
        }
    }

    /// Consume `('/' | '//') Step` repetitions.
    fn continue_path(&mut self, steps: &mut Vec<Step>) -> Result<()> {
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.pos += 1;
                    steps.push(self.step()?);
                }
                Some(Token::DoubleSlash) => {
                    self.pos += 1;
                    steps.push(Step::descendant_or_self());
                    steps.push(self.step()?);
                }
                _ => return Ok(()),
            }
        }
    }

    fn step(&mut self) -> Result<Step> {
        if self.eat(&Token::Dot) {
            return Ok(Step {
                axis: Axis::SelfAxis,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }
        if self.eat(&Token::DoubleDot) {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }

        let axis = if self.eat(&Token::At) {
            Axis::Attribute
        } else if let (Some(Token::Name(name)), Some(Token::ColonColon)) =
            (self.peek(), self.peek_at(1))
        {
            let axis = Axis::from_name(name)
                .ok_or_else(|| self.error(format!("unknown axis '{name}'")))?;
            self.pos += 2;
            axis
        } else {
            Axis::Child
        };

        let test = self.node_test()?;
        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            predicates.push(self.predicate()?);
        }
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn node_test(&mut self) -> Result<NodeTest> {
        let start = self.pos;
        match self.advance() {
            Some(Token::Star) => Ok(NodeTest::Any),
            Some(Token::PrefixWildcard(prefix)) => Ok(NodeTest::Namespace(prefix)),
            Some(Token::Name(name)) => {
                if self.peek() == Some(&Token::LParen) && NODE_TYPES.contains(&name.as_str()) {
                    self.pos += 1;
                    self.expect(Token::RParen, "')' after node type test")?;
                    return match name.as_str() {
                        "text" => Ok(NodeTest::Text),
                        "node" => Ok(NodeTest::Node),
                        "comment" => Ok(NodeTest::Comment),
                        _ => Err(self.error("processing-instruction() is not supported")),
                    };
                }
                let (prefix, local) = split_name(&name);
                Ok(NodeTest::Name {
                    prefix: prefix.map(String::from),
                    local: local.to_string(),
                })
            }
            _ => {
                self.pos = start;
                Err(self.error("expected a node test"))
            }
        }
    }

    fn predicate(&mut self) -> Result<Expr> {
        self.expect(Token::LBracket, "'['")?;
        let expr = self.or_expr()?;
        self.expect(Token::RBracket, "']'")?;
        Ok(expr)
    }

    fn primary_expr(&mut self) -> Result<Expr> {
        let start = self.pos;
        match self.advance() {
            Some(Token::Literal(s)) => Ok(Expr::Literal(s)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Name(name)) => {
                self.expect(Token::LParen, "'('")?;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.or_expr()?);
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(Token::RParen, "',' or ')' in argument list")?;
                        break;
                    }
                }
                let (prefix, local) = split_name(&name);
                Ok(Expr::Function {
                    prefix: prefix.map(String::from),
                    name: local.to_string(),
                    args,
                })
            }
            _ => {
                self.pos = start;
                Err(self.error("expected an expression"))
            }
        }
    }
}

fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

/// Parse an XPath 1.0 expression.
pub fn parse(expression: &str) -> Result<Expr> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(PassthroughError::XPathSyntax {
            expression: expression.to_string(),
            offset: 0,
            message: "empty expression".into(),
        });
    }
    let mut parser = Parser::new(expression, tokens);
    let expr = parser.or_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_descendant_path() {
        let expr = parse("//pds:logical_identifier").unwrap();
        let Expr::Path(path) = expr else {
            panic!("expected a path");
        };
        assert!(path.absolute);
        assert_eq!(path.steps.len(), 2);
        assert_eq!(path.steps[0], Step::descendant_or_self());
        assert_eq!(
            path.steps[1].test,
            NodeTest::Name {
                prefix: Some("pds".into()),
                local: "logical_identifier".into()
            }
        );
    }

    #[test]
    fn star_is_multiplication_in_operator_position() {
        let expr = parse("2 * 3").unwrap();
        assert!(matches!(expr, Expr::Binary(BinaryOp::Mul, _, _)));
        let expr = parse("count(*)").unwrap();
        assert!(matches!(expr, Expr::Function { ref name, .. } if name == "count"));
    }

    #[test]
    fn operator_names_and_precedence() {
        let expr = parse("1 + 2 * 3 = 7 and not(false())").unwrap();
        let Expr::And(left, _) = expr else {
            panic!("expected and");
        };
        assert!(matches!(*left, Expr::Binary(BinaryOp::Eq, _, _)));
        assert!(matches!(parse("6 div 2").unwrap(), Expr::Binary(BinaryOp::Div, _, _)));
    }

    #[test]
    fn prefixed_function_call() {
        let expr = parse("pt:context('mission')").unwrap();
        assert_eq!(
            expr,
            Expr::Function {
                prefix: Some("pt".into()),
                name: "context".into(),
                args: vec![Expr::Literal("mission".into())],
            }
        );
    }

    #[test]
    fn filter_expression_with_path() {
        let expr = parse("(//a | //b)[1]/@id").unwrap();
        let Expr::Filter {
            predicates, steps, ..
        } = expr
        else {
            panic!("expected filter");
        };
        assert_eq!(predicates.len(), 1);
        assert_eq!(steps[0].axis, Axis::Attribute);
    }

    #[test]
    fn explicit_axes_and_node_types() {
        let expr = parse("ancestor-or-self::*/text()").unwrap();
        let Expr::Path(path) = expr else {
            panic!("expected a path");
        };
        assert_eq!(path.steps[0].axis, Axis::AncestorOrSelf);
        assert_eq!(path.steps[1].test, NodeTest::Text);
    }

    #[test]
    fn root_only_path() {
        let Expr::Path(path) = parse("/").unwrap() else {
            panic!("expected a path");
        };
        assert!(path.absolute && path.steps.is_empty());
    }

    #[test]
    fn errors_carry_offsets() {
        let err = parse("a[1").unwrap_err();
        assert!(matches!(err, PassthroughError::XPathSyntax { offset: 3, .. }));
        let err = parse("foo::bar").unwrap_err();
        assert!(err.to_string().contains("unknown axis"));
        assert!(parse("").is_err());
        assert!(parse("1 2").is_err());
    }
}
