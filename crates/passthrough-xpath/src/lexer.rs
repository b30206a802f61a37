use winnow::ascii::{digit0, digit1, multispace0};
use winnow::combinator::{alt, delimited, opt};
use winnow::error::{ContextError, ErrMode};
use winnow::token::{take_till, take_while};
use winnow::{ModalResult, Parser};

use passthrough_types::{PassthroughError, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Slash,
    DoubleSlash,
    Dot,
    DoubleDot,
    At,
    ColonColon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Pipe,
    Plus,
    Minus,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Star,
    Literal(String),
    Number(f64),
    /// NCName or `prefix:local`. Operator names (`and`, `div`, ...) are left to the parser.
    Name(String),
    /// `prefix:*`
    PrefixWildcard(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn ws<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    multispace0.parse_next(input)
}

fn ncname<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1, |c: char| c.is_alphabetic() || c == '_'),
        take_while(0.., |c: char| {
            c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
        }),
    )
        .take()
        .parse_next(input)
}

fn name(input: &mut &str) -> ModalResult<Token> {
    let prefix = ncname.parse_next(input)?;
    if let Some(rest) = input.strip_prefix(':') {
        if let Some(after) = rest.strip_prefix('*') {
            *input = after;
            return Ok(Token::PrefixWildcard(prefix.to_string()));
        }
        let mut after = rest;
        if let Ok(local) = ncname.parse_next(&mut after) {
            *input = after;
            return Ok(Token::Name(format!("{prefix}:{local}")));
        }
    }
    Ok(Token::Name(prefix.to_string()))
}

fn number(input: &mut &str) -> ModalResult<f64> {
    let s: &str = alt(((digit1, opt(('.', digit0))).take(), ('.', digit1).take()))
        .parse_next(input)?;
    s.parse()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))
}

fn string_literal(input: &mut &str) -> ModalResult<String> {
    alt((
        delimited('"', take_till(0.., '"'), '"'),
        delimited('\'', take_till(0.., '\''), '\''),
    ))
    .map(String::from)
    .parse_next(input)
}

fn operator(input: &mut &str) -> ModalResult<Token> {
    alt((
        alt((
            "//".value(Token::DoubleSlash),
            "/".value(Token::Slash),
            "::".value(Token::ColonColon),
            "!=".value(Token::NotEq),
            "<=".value(Token::Le),
            ">=".value(Token::Ge),
            "..".value(Token::DoubleDot),
        )),
        alt((
            '@'.value(Token::At),
            '('.value(Token::LParen),
            ')'.value(Token::RParen),
            '['.value(Token::LBracket),
            ']'.value(Token::RBracket),
            ','.value(Token::Comma),
            '|'.value(Token::Pipe),
            '+'.value(Token::Plus),
            '-'.value(Token::Minus),
            '='.value(Token::Eq),
            '<'.value(Token::Lt),
            '>'.value(Token::Gt),
            '*'.value(Token::Star),
        )),
    ))
    .parse_next(input)
}

fn token(input: &mut &str) -> ModalResult<Token> {
    alt((
        operator,
        string_literal.map(Token::Literal),
        number.map(Token::Number),
        '.'.value(Token::Dot),
        name,
    ))
    .parse_next(input)
}

/// Split an expression into tokens with their byte offsets.
pub(crate) fn tokenize(expression: &str) -> Result<Vec<Spanned>> {
    let mut input = expression;
    let mut tokens = Vec::new();
    loop {
        let _ = ws.parse_next(&mut input);
        if input.is_empty() {
            break;
        }
        let offset = expression.len() - input.len();
        match token.parse_next(&mut input) {
            Ok(token) => tokens.push(Spanned { token, offset }),
            Err(_) => {
                let found = input.chars().next().unwrap_or_default();
                let message = if matches!(found, '"' | '\'') {
                    "unterminated string literal".to_string()
                } else {
                    format!("unexpected character '{found}'")
                };
                return Err(PassthroughError::XPathSyntax {
                    expression: expression.to_string(),
                    offset,
                    message,
                });
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(expr: &str) -> Vec<Token> {
        tokenize(expr).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn path_with_prefixes_and_predicate() {
        assert_eq!(
            kinds("//pds:Time_Coordinates[1]/@unit"),
            vec![
                Token::DoubleSlash,
                Token::Name("pds:Time_Coordinates".into()),
                Token::LBracket,
                Token::Number(1.0),
                Token::RBracket,
                Token::Slash,
                Token::At,
                Token::Name("unit".into()),
            ]
        );
    }

    #[test]
    fn axis_separator_is_not_a_prefix() {
        assert_eq!(
            kinds("child::pds:*"),
            vec![
                Token::Name("child".into()),
                Token::ColonColon,
                Token::PrefixWildcard("pds".into()),
            ]
        );
    }

    #[test]
    fn dotted_function_names_and_literals() {
        assert_eq!(
            kinds("pt:datetime.add('2020-01-01T00:00:00Z', 1.5)"),
            vec![
                Token::Name("pt:datetime.add".into()),
                Token::LParen,
                Token::Literal("2020-01-01T00:00:00Z".into()),
                Token::Comma,
                Token::Number(1.5),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn dots_and_numbers() {
        assert_eq!(
            kinds("../. .5"),
            vec![Token::DoubleDot, Token::Slash, Token::Dot, Token::Number(0.5)]
        );
    }

    #[test]
    fn unterminated_literal_reports_offset() {
        let err = tokenize("concat('a, 'b')").unwrap_err();
        match err {
            PassthroughError::XPathSyntax { offset, .. } => assert_eq!(offset, 13),
            other => panic!("unexpected error: {other}"),
        }
    }
}
