//! Query Parser
//!
//! Parses search strings into an `Expr` tree.
//!
//! # Supported Syntax
//!
//! ```text
//! or      := and (("or" | "|") and)*
//! and     := not (("and" | "&")? not)*        juxtaposition is AND
//! not     := ("not" | "!" | "-") not | primary
//! primary := "(" or ")" | token
//! token   := [key ":"] value
//! value   := ( "quoted text" | bare )+
//! ```
//!
//! # Examples
//!
//! ```text
//! tag:red
//! tag:red prop:"name=^al"
//! (tag:cat | tag:dog) -tag:sold
//! revrel:"likes"=1
//! likes.tag:"dog"
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, multispace0, multispace1, satisfy},
    combinator::{map, not, opt, value, verify},
    multi::{many0, many1},
    sequence::{delimited, preceded, terminated},
    IResult,
};

use crate::query::ast::{Expr, Token};
use crate::query::error::{QueryError, QueryResult};

/// Parse a query string into an expression tree
pub fn parse_query(input: &str) -> QueryResult<Expr> {
    let input = input.trim();
    if input.is_empty() {
        return Err(QueryError::Parse("Empty query".to_string()));
    }

    match parse_or(input) {
        Ok((remaining, expr)) => {
            if remaining.trim().is_empty() {
                Ok(expr)
            } else {
                Err(QueryError::Parse(format!(
                    "Unexpected input after query: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(e) => Err(QueryError::Parse(format!("Parse error: {:?}", e))),
    }
}

/// Characters allowed in an unquoted value
fn is_bare_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | '"' | '|' | '&')
}

/// Characters allowed in a token key
fn is_key_char(c: char) -> bool {
    is_bare_char(c) && c != ':'
}

/// Case-insensitive keyword not followed by a value character
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(word), not(satisfy(is_bare_char)))
}

/// `or` / `|`
fn or_operator(input: &str) -> IResult<&str, ()> {
    value(
        (),
        delimited(multispace0, alt((keyword("or"), tag("|"))), multispace0),
    )(input)
}

/// `and` / `&` / plain whitespace
fn and_operator(input: &str) -> IResult<&str, ()> {
    alt((
        value(
            (),
            delimited(multispace0, alt((keyword("and"), tag("&"))), multispace0),
        ),
        value((), multispace1),
    ))(input)
}

/// `not` / `!` / `-`
fn not_operator(input: &str) -> IResult<&str, ()> {
    value(
        (),
        terminated(alt((keyword("not"), tag("!"), tag("-"))), multispace0),
    )(input)
}

fn parse_or(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_and(input)?;
    let (input, rest) = many0(preceded(or_operator, parse_and))(input)?;
    Ok((input, rest.into_iter().fold(first, Expr::or)))
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_not(input)?;
    let (input, rest) = many0(preceded(and_operator, parse_not))(input)?;
    Ok((input, rest.into_iter().fold(first, Expr::and)))
}

fn parse_not(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(not_operator, parse_not), Expr::not),
        parse_primary,
    ))(input)
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    alt((
        delimited(
            terminated(char('('), multispace0),
            parse_or,
            preceded(multispace0, char(')')),
        ),
        map(parse_token, Expr::Token),
    ))(input)
}

/// Bare operator words never start a token
fn reserved(input: &str) -> IResult<&str, &str> {
    alt((keyword("and"), keyword("or"), keyword("not")))(input)
}

fn parse_token(input: &str) -> IResult<&str, Token> {
    let (input, _) = not(reserved)(input)?;
    let (input, key) = opt(terminated(take_while1(is_key_char), char(':')))(input)?;
    let (input, value) = verify(parse_value, |v: &str| !v.is_empty())(input)?;

    Ok((
        input,
        Token {
            key: key.map(str::to_string),
            value,
        },
    ))
}

/// Concatenation of quoted and bare segments
fn parse_value(input: &str) -> IResult<&str, String> {
    let (input, segments) = many1(alt((parse_quoted, take_while1(is_bare_char))))(input)?;
    Ok((input, segments.concat()))
}

fn parse_quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while(|c| c != '"'), char('"'))(input)
}
