use std::fmt;

/// Source position of a token or AST node. Lines and columns are 1-based;
/// the column resets at every newline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind<'a> {
    Identifier(&'a str),
    Int(i64),
    Float(f64),
    Str(&'a str),
    True,
    False,

    // Keywords
    Func,
    Return,
    If,
    Else,
    For,
    // Reserved keywords: tokenized, rejected by the parser.
    Var,
    Class,
    Elif,
    Forever,
    Break,
    Continue,
    Import,
    Async,
    Await,
    Struct,

    // Operators
    Plus,        // +
    Minus,       // -
    Star,        // *
    Slash,       // /
    Percent,     // %
    StarStar,    // ** (reserved)
    Assign,      // =
    ColonAssign, // := (reserved)
    PlusAssign,  // += (reserved)
    MinusAssign, // -= (reserved)
    Increment,   // ++
    Decrement,   // --
    Shl,         // << (reserved)
    Shr,         // >> (reserved)

    // Comparators
    Eq,    // ==
    NotEq, // !=
    Lt,    // <
    Gt,    // >
    LtEq,  // <=
    GtEq,  // >=

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot, // reserved
    Colon,
    Semicolon,

    EOF,
}

pub fn lookup_keyword(ident: &str) -> Option<TokenKind<'static>> {
    let kind = match ident {
        "func" => TokenKind::Func,
        "return" => TokenKind::Return,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "for" => TokenKind::For,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "var" => TokenKind::Var,
        "class" => TokenKind::Class,
        "elif" => TokenKind::Elif,
        "forever" => TokenKind::Forever,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "import" => TokenKind::Import,
        "async" => TokenKind::Async,
        "await" => TokenKind::Await,
        "struct" => TokenKind::Struct,
        _ => return None,
    };
    Some(kind)
}

impl fmt::Display for TokenKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Identifier(name) => return f.write_str(name),
            TokenKind::Int(value) => return write!(f, "{value}"),
            TokenKind::Float(value) => return write!(f, "{value}"),
            TokenKind::Str(value) => return write!(f, "\"{value}\""),
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Func => "func",
            TokenKind::Return => "return",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::For => "for",
            TokenKind::Var => "var",
            TokenKind::Class => "class",
            TokenKind::Elif => "elif",
            TokenKind::Forever => "forever",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Import => "import",
            TokenKind::Async => "async",
            TokenKind::Await => "await",
            TokenKind::Struct => "struct",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::StarStar => "**",
            TokenKind::Assign => "=",
            TokenKind::ColonAssign => ":=",
            TokenKind::PlusAssign => "+=",
            TokenKind::MinusAssign => "-=",
            TokenKind::Increment => "++",
            TokenKind::Decrement => "--",
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            TokenKind::Eq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LtEq => "<=",
            TokenKind::GtEq => ">=",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Colon => ":",
            TokenKind::Semicolon => ";",
            TokenKind::EOF => "end of input",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind<'a>, span: Span) -> Self {
        Self { kind, span }
    }
}
