// SQL module - the statement surface of a connection: CREATE TABLE,
// INSERT ... VALUES and SELECT ... FROM, in `;`-separated batches

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::*;
pub use lexer::Lexer;
pub use parser::{parse_sql, Parser};
pub use token::Token;
