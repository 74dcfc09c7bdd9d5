// SQL parser - converts tokens to AST

use super::ast::*;
use super::lexer::Lexer;
use super::token::Token;
use crate::access::{DataType, Value};
use crate::error::{Error, Result};

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(sql: &str) -> Result<Self> {
        let tokens = Lexer::new(sql).tokenize()?;
        Ok(Parser {
            tokens,
            position: 0,
        })
    }

    /// Parse a `;`-separated batch. Empty statements are skipped.
    pub fn parse_batch(&mut self) -> Result<Vec<Statement>> {
        let mut statements = vec![];
        loop {
            while self.match_token(&Token::Semicolon) {
                self.advance();
            }
            if self.match_token(&Token::Eof) {
                return Ok(statements);
            }
            statements.push(self.parse()?);
            if !self.match_token(&Token::Eof) {
                self.expect_token(Token::Semicolon)?;
            }
        }
    }

    /// Parse a SQL statement
    pub fn parse(&mut self) -> Result<Statement> {
        match self.current_token() {
            Token::Select => self.parse_select(),
            Token::Insert => self.parse_insert(),
            Token::Create => self.parse_create_table(),
            other => Err(Error::Syntax(format!("expected SQL statement, found {other}"))),
        }
    }

    /// Parse a SELECT statement
    fn parse_select(&mut self) -> Result<Statement> {
        self.expect_token(Token::Select)?;

        let projections = if self.match_token(&Token::Star) {
            self.advance();
            vec![SelectItem::AllColumns]
        } else {
            self.parse_identifier_list()?
                .into_iter()
                .map(SelectItem::Column)
                .collect()
        };

        self.expect_token(Token::From)?;
        let table_name = self.expect_identifier()?;

        Ok(Statement::Select(SelectStatement {
            projections,
            table_name,
        }))
    }

    /// Parse an INSERT statement
    fn parse_insert(&mut self) -> Result<Statement> {
        self.expect_token(Token::Insert)?;
        self.expect_token(Token::Into)?;
        let table_name = self.expect_identifier()?;

        let columns = if self.match_token(&Token::LeftParen) {
            self.advance();
            let columns = self.parse_identifier_list()?;
            self.expect_token(Token::RightParen)?;
            Some(columns)
        } else {
            None
        };

        self.expect_token(Token::Values)?;
        let mut values = vec![];
        loop {
            self.expect_token(Token::LeftParen)?;
            let mut row = vec![self.parse_expression()?];
            while self.match_token(&Token::Comma) {
                self.advance();
                row.push(self.parse_expression()?);
            }
            self.expect_token(Token::RightParen)?;
            values.push(row);

            if !self.match_token(&Token::Comma) {
                break;
            }
            self.advance();
        }

        Ok(Statement::Insert(InsertStatement {
            table_name,
            columns,
            values,
        }))
    }

    /// Parse a CREATE TABLE statement
    fn parse_create_table(&mut self) -> Result<Statement> {
        self.expect_token(Token::Create)?;
        self.expect_token(Token::Table)?;
        let table_name = self.expect_identifier()?;

        self.expect_token(Token::LeftParen)?;
        let mut columns = vec![self.parse_column_definition()?];
        while self.match_token(&Token::Comma) {
            self.advance();
            columns.push(self.parse_column_definition()?);
        }
        self.expect_token(Token::RightParen)?;

        Ok(Statement::CreateTable(CreateTableStatement {
            table_name,
            columns,
        }))
    }

    fn parse_column_definition(&mut self) -> Result<ColumnDefinition> {
        let name = self.expect_identifier()?;
        let type_name = self.expect_identifier()?;
        let data_type = DataType::from_sql_name(&type_name)?;

        // Length modifiers such as VARCHAR(20) are accepted and ignored.
        if self.match_token(&Token::LeftParen) {
            self.advance();
            match self.current_token() {
                Token::Number(_) => self.advance(),
                other => return Err(Error::Syntax(format!("expected type length, found {other}"))),
            }
            self.expect_token(Token::RightParen)?;
        }

        let not_null = match self.current_token() {
            Token::Not => {
                self.advance();
                self.expect_token(Token::Null)?;
                true
            }
            Token::Null => {
                self.advance();
                false
            }
            _ => false,
        };

        Ok(ColumnDefinition {
            name,
            data_type,
            not_null,
        })
    }

    fn parse_expression(&mut self) -> Result<Expression> {
        let expression = match self.current_token() {
            Token::Number(n) => Expression::Literal(Value::Integer(parse_integer(&n)?)),
            Token::Minus => {
                self.advance();
                match self.current_token() {
                    Token::Number(n) => {
                        Expression::Literal(Value::Integer(parse_integer(&format!("-{n}"))?))
                    }
                    other => return Err(Error::Syntax(format!("expected number after '-', found {other}"))),
                }
            }
            Token::String(s) => Expression::Literal(Value::Text(s)),
            Token::True => Expression::Literal(Value::Boolean(true)),
            Token::False => Expression::Literal(Value::Boolean(false)),
            Token::Null => Expression::Literal(Value::Null),
            Token::Parameter(name) => Expression::Parameter(name),
            other => return Err(Error::Syntax(format!("expected a value, found {other}"))),
        };
        self.advance();
        Ok(expression)
    }

    fn parse_identifier_list(&mut self) -> Result<Vec<String>> {
        let mut identifiers = vec![];

        loop {
            identifiers.push(self.expect_identifier()?);
            if !self.match_token(&Token::Comma) {
                break;
            }
            self.advance();
        }

        Ok(identifiers)
    }

    // Helper methods

    /// Get current token
    fn current_token(&self) -> Token {
        self.tokens
            .get(self.position)
            .cloned()
            .unwrap_or(Token::Eof)
    }

    /// Advance to next token
    fn advance(&mut self) {
        if self.position + 1 < self.tokens.len() {
            self.position += 1;
        }
    }

    /// Check if current token matches
    fn match_token(&self, token: &Token) -> bool {
        self.current_token() == *token
    }

    /// Expect a specific token
    fn expect_token(&mut self, token: Token) -> Result<()> {
        if self.current_token() == token {
            self.advance();
            Ok(())
        } else {
            Err(Error::Syntax(format!(
                "expected {}, found {}",
                token,
                self.current_token()
            )))
        }
    }

    /// Expect a bare or quoted identifier
    fn expect_identifier(&mut self) -> Result<String> {
        match self.current_token() {
            Token::Identifier(name) | Token::QuotedIdentifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(Error::Syntax(format!("expected identifier, found {other}"))),
        }
    }
}

fn parse_integer(text: &str) -> Result<i64> {
    text.parse()
        .map_err(|_| Error::Syntax(format!("integer literal {text} out of range")))
}

/// Parses a `;`-separated batch of statements.
pub fn parse_sql(sql: &str) -> Result<Vec<Statement>> {
    Parser::new(sql)?.parse_batch()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(sql: &str) -> Result<Statement> {
        Parser::new(sql)?.parse()
    }

    #[test]
    fn test_parse_select() -> Result<()> {
        assert_eq!(
            parse_one("SELECT id FROM [MainTable]")?,
            Statement::Select(SelectStatement {
                projections: vec![SelectItem::Column("id".into())],
                table_name: "MainTable".into(),
            })
        );
        assert_eq!(
            parse_one("select * from t")?,
            Statement::Select(SelectStatement {
                projections: vec![SelectItem::AllColumns],
                table_name: "t".into(),
            })
        );
        Ok(())
    }

    #[test]
    fn test_parse_insert() -> Result<()> {
        let statement = parse_one("INSERT INTO DummyTable (Id) VALUES (@id), (-2), (NULL)")?;
        assert_eq!(
            statement,
            Statement::Insert(InsertStatement {
                table_name: "DummyTable".into(),
                columns: Some(vec!["Id".into()]),
                values: vec![
                    vec![Expression::Parameter("id".into())],
                    vec![Expression::Literal(Value::Integer(-2))],
                    vec![Expression::Literal(Value::Null)],
                ],
            })
        );
        assert!(statement.is_write());
        Ok(())
    }

    #[test]
    fn test_parse_create_table() -> Result<()> {
        assert_eq!(
            parse_one("CREATE TABLE [MainTable] ([id] int NOT NULL, name VARCHAR(20), ok bool NULL)")?,
            Statement::CreateTable(CreateTableStatement {
                table_name: "MainTable".into(),
                columns: vec![
                    ColumnDefinition {
                        name: "id".into(),
                        data_type: DataType::Integer,
                        not_null: true,
                    },
                    ColumnDefinition {
                        name: "name".into(),
                        data_type: DataType::Text,
                        not_null: false,
                    },
                    ColumnDefinition {
                        name: "ok".into(),
                        data_type: DataType::Boolean,
                        not_null: false,
                    },
                ],
            })
        );
        Ok(())
    }

    #[test]
    fn test_parse_batch() -> Result<()> {
        let statements = parse_sql(
            "CREATE TABLE [MainTable] ([id] int NOT NULL);
             CREATE TABLE [DummyTable] ([id] int NOT NULL);",
        )?;
        assert_eq!(statements.len(), 2);
        assert!(parse_sql(" ; ")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_syntax_errors() {
        for sql in [
            "SELECT FROM t",
            "INSERT INTO t VALUES 1",
            "CREATE TABLE t ()",
            "CREATE TABLE t (a blob)",
            "SELECT * FROM t t2",
            "UPDATE t SET a = 1",
            "INSERT INTO t VALUES (99999999999999999999)",
        ] {
            assert!(matches!(parse_sql(sql), Err(Error::Syntax(_))), "{sql}");
        }
    }
}
