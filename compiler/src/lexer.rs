//! Tokenizer for Bloch source, built on `logos`.
//!
//! `tokenize` is the external-collaborator boundary the parser consumes:
//! it never sees raw source text, only a `Vec<(Token, line, column)>`.

use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*[^/])*\*/")]
pub enum Token {
    // Primitive type keywords
    #[token("int")]
    KwInt,
    #[token("long")]
    KwLong,
    #[token("float")]
    KwFloat,
    #[token("bit")]
    KwBit,
    #[token("boolean")]
    KwBoolean,
    #[token("string")]
    KwString,
    #[token("char")]
    KwChar,
    #[token("qubit")]
    KwQubit,
    #[token("void")]
    KwVoid,

    // Declaration keywords
    #[token("class")]
    KwClass,
    #[token("function")]
    KwFunction,
    #[token("import")]
    KwImport,
    #[token("constructor")]
    KwConstructor,
    #[token("destructor")]
    KwDestructor,
    #[token("default")]
    KwDefault,
    #[token("extends")]
    KwExtends,

    // Modifier keywords
    #[token("final")]
    KwFinal,
    #[token("static")]
    KwStatic,
    #[token("abstract")]
    KwAbstract,
    #[token("virtual")]
    KwVirtual,
    #[token("override")]
    KwOverride,
    #[token("public")]
    KwPublic,
    #[token("private")]
    KwPrivate,
    #[token("protected")]
    KwProtected,

    // Control flow keywords
    #[token("if")]
    KwIf,
    #[token("else")]
    KwElse,
    #[token("for")]
    KwFor,
    #[token("while")]
    KwWhile,
    #[token("return")]
    KwReturn,

    // Quantum keywords
    #[token("measure")]
    KwMeasure,
    #[token("reset")]
    KwReset,
    #[token("destroy")]
    KwDestroy,
    #[token("echo")]
    KwEcho,

    // Expression keywords
    #[token("new")]
    KwNew,
    #[token("this")]
    KwThis,
    #[token("super")]
    KwSuper,
    #[token("true")]
    KwTrue,
    #[token("false")]
    KwFalse,
    #[token("null")]
    KwNull,

    // Literals
    #[regex(r"[0-9]+L", |lex| lex.slice()[..lex.slice().len() - 1].parse().ok())]
    LongLiteral(i64),
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse().ok())]
    FloatLiteral(f64),
    #[regex(r"[0-9]+", |lex| lex.slice().parse().ok())]
    IntegerLiteral(i64),
    #[regex(r"0b[01]", |lex| lex.slice().as_bytes()[2] - b'0')]
    BitLiteral(u8),
    #[regex(r"'([^'\\]|\\.)'", |lex| parse_char_literal(lex.slice()))]
    CharLiteral(char),
    #[regex(r#""([^"\\]|\\.)*""#, |lex| parse_string_literal(lex.slice()))]
    StringLiteral(String),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Operators
    #[token("==")]
    OpEq,
    #[token("!=")]
    OpNeq,
    #[token("<=")]
    OpLe,
    #[token(">=")]
    OpGe,
    #[token("<")]
    OpLt,
    #[token(">")]
    OpGt,
    #[token("&&")]
    OpAndAnd,
    #[token("||")]
    OpOrOr,
    #[token("++")]
    OpIncrement,
    #[token("--")]
    OpDecrement,
    #[token("+")]
    OpPlus,
    #[token("-")]
    OpMinus,
    #[token("*")]
    OpStar,
    #[token("/")]
    OpSlash,
    #[token("%")]
    OpPercent,
    #[token("!")]
    OpBang,
    #[token("&")]
    OpAmp,
    #[token("|")]
    OpPipe,
    #[token("^")]
    OpCaret,
    #[token("~")]
    OpTilde,
    #[token("=")]
    OpAssign,
    #[token("?")]
    OpQuestion,
    #[token("->")]
    Arrow,

    // Punctuation
    #[token("(")]
    ParenOpen,
    #[token(")")]
    ParenClose,
    #[token("{")]
    BraceOpen,
    #[token("}")]
    BraceClose,
    #[token("[")]
    BracketOpen,
    #[token("]")]
    BracketClose,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,
    #[token("@")]
    At,
}

fn parse_char_literal(slice: &str) -> Option<char> {
    let inner = &slice[1..slice.len() - 1];
    if let Some(stripped) = inner.strip_prefix('\\') {
        escape_char(stripped)
    } else {
        inner.chars().next()
    }
}

fn parse_string_literal(slice: &str) -> String {
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escape_char(&escaped.to_string()).unwrap_or(escaped));
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn escape_char(s: &str) -> Option<char> {
    match s {
        "n" => Some('\n'),
        "t" => Some('\t'),
        "r" => Some('\r'),
        "0" => Some('\0'),
        "\\" => Some('\\'),
        "'" => Some('\''),
        "\"" => Some('"'),
        other => other.chars().next(),
    }
}

/// Every token, tagged with its 1-based (line, column) in the source.
pub type SpannedToken = (Token, usize, usize);

/// Runs the lexer across `source`, reporting any unrecognized character as
/// a `BlochError::Lexical` rather than silently dropping it.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, crate::error::BlochError> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let (line, column) = line_col_at(source, span.start);
        match result {
            Ok(token) => tokens.push((token, line, column)),
            Err(()) => {
                return Err(crate::error::BlochError::lexical(
                    line,
                    column,
                    format!("unexpected character '{}'", lexer.slice()),
                ));
            }
        }
    }

    Ok(tokens)
}

fn line_col_at(source: &str, byte_pos: usize) -> (usize, usize) {
    let prefix = &source[..byte_pos];
    let line = prefix.matches('\n').count() + 1;
    let line_start = prefix.rfind('\n').map(|p| p + 1).unwrap_or(0);
    let column = byte_pos - line_start + 1;
    (line, column)
}

/// Names recognized as built-in quantum gates, consulted by both
/// the semantic analyser and the evaluator via the shared gate table in
/// `crate::semantics::symbols::BUILTIN_GATES`.
pub fn is_gate_name(name: &str) -> bool {
    matches!(name, "h" | "x" | "y" | "z" | "rx" | "ry" | "rz" | "cx")
}
