// SQL tokens for lexical analysis

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Identifier(String),
    /// `"name"` or `[name]`; never treated as a keyword.
    QuotedIdentifier(String),
    Number(String),
    String(String),
    /// Named parameter without its sigil (`@id`, `:id` and `$id` all give `id`).
    Parameter(String),

    // Keywords
    Select,
    From,
    Insert,
    Into,
    Values,
    Create,
    Table,
    Not,
    Null,
    True,
    False,

    // Operators
    Minus,
    Star,

    // Delimiters
    LeftParen,
    RightParen,
    Comma,
    Semicolon,

    // Special
    Eof,
}

impl Token {
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            Token::Select
                | Token::From
                | Token::Insert
                | Token::Into
                | Token::Values
                | Token::Create
                | Token::Table
                | Token::Not
                | Token::Null
                | Token::True
                | Token::False
        )
    }

    /// Convert a string to a keyword token if it matches
    pub fn keyword_from_str(s: &str) -> Option<Token> {
        match s.to_uppercase().as_str() {
            "SELECT" => Some(Token::Select),
            "FROM" => Some(Token::From),
            "INSERT" => Some(Token::Insert),
            "INTO" => Some(Token::Into),
            "VALUES" => Some(Token::Values),
            "CREATE" => Some(Token::Create),
            "TABLE" => Some(Token::Table),
            "NOT" => Some(Token::Not),
            "NULL" => Some(Token::Null),
            "TRUE" => Some(Token::True),
            "FALSE" => Some(Token::False),
            _ => None,
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Identifier(s) => write!(f, "{s}"),
            Token::QuotedIdentifier(s) => write!(f, "\"{s}\""),
            Token::Number(n) => write!(f, "{n}"),
            Token::String(s) => write!(f, "'{s}'"),
            Token::Parameter(p) => write!(f, "@{p}"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::LeftParen => write!(f, "("),
            Token::RightParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
            Token::Eof => write!(f, "end of input"),
            keyword => write!(f, "{}", format!("{keyword:?}").to_uppercase()),
        }
    }
}
