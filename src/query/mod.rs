//! entitydb Query Engine
//!
//! Resolves boolean search expressions into sets of entity ids:
//!
//! - **AST**: expression tree and `[key:]value` tokens
//! - **Parser**: parse query strings into the AST
//! - **Executor**: evaluate the AST against the indices
//!
//! # Query Language
//!
//! ```text
//! tag:<t>                      ids tagged t (any casing)
//! prop:<name>[op<value>]       =  =^prefix  suffix^  ~contains  <  >
//! rel:[<label>=]<id>           ids relating to <id>
//! revrel:[<label>=]<id>        ids <id> relates to
//! id:<n>                       the single id n
//! *                            every id
//! a.b.<token>                  ids reaching <token> via a then b
//! a..b.<token>                 same, walking the edges backwards
//! ```
//!
//! Tokens combine with `and` (or juxtaposition), `or`, `not` and parentheses.
//!
//! # Examples
//!
//! ```rust,ignore
//! let ctx = SearchContext::new(&tags, &props, &rels);
//! let ids = search(&ctx, "tag:person likes.tag:dog", &SearchOptions::first(10))?;
//! ```

mod ast;
mod error;
mod executor;
mod parser;

pub use ast::{Expr, RelPath, Token};
pub use error::{QueryError, QueryResult};
pub use executor::{search, QueryExecutor, SearchContext, SearchOptions};
pub use parser::parse_query;
