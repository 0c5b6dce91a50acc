use crate::error::LowerError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifier or keyword; the parser tells them apart
    Word(String),
    /// Quoted string literal (content without quotes, escapes resolved)
    Str(String),
    /// Integer literal
    Int(i64),
    /// Decimal literal, kept as written
    Float(String),
    // Punctuation
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Semi,
    Dot,
    Colon,
    Question,
    Assign,
    Arrow, // =>
    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    // Comparison
    EqEq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    // Logical
    AndAnd,
    OrOr,
    Coalesce, // ??
    Bang,
    // Flatten markers
    At,
    AtNullish, // @?
    // End of input
    Eof,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
    pub column: u32,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

pub fn lex(src: &str, filename: &str) -> Result<Vec<Spanned>, LowerError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut pos = 0usize;
    let mut line: u32 = 1;
    let mut line_start = 0usize;

    while pos < chars.len() {
        let c = chars[pos];
        let next = chars.get(pos + 1).copied();

        // Line comment
        if c == '/' && next == Some('/') {
            while pos < chars.len() && chars[pos] != '\n' {
                pos += 1;
            }
            continue;
        }

        let tok_line = line;
        let tok_col = (pos - line_start) as u32 + 1;

        // Block comment
        if c == '/' && next == Some('*') {
            pos += 2;
            loop {
                if pos >= chars.len() {
                    return Err(LowerError::lex(
                        filename,
                        tok_line,
                        tok_col,
                        "unterminated block comment",
                    ));
                }
                if chars[pos] == '\n' {
                    line += 1;
                    line_start = pos + 1;
                }
                if chars[pos] == '*' && chars.get(pos + 1) == Some(&'/') {
                    pos += 2;
                    break;
                }
                pos += 1;
            }
            continue;
        }

        // Whitespace
        if c.is_whitespace() {
            if c == '\n' {
                line += 1;
                line_start = pos + 1;
            }
            pos += 1;
            continue;
        }

        let push = |tokens: &mut Vec<Spanned>, token: Token| {
            tokens.push(Spanned {
                token,
                line: tok_line,
                column: tok_col,
            });
        };

        // String literal
        if c == '"' {
            pos += 1;
            let mut s = String::new();
            loop {
                if pos >= chars.len() || chars[pos] == '\n' {
                    return Err(LowerError::lex(
                        filename,
                        tok_line,
                        tok_col,
                        "unterminated string literal",
                    ));
                }
                let sc = chars[pos];
                if sc == '"' {
                    pos += 1;
                    break;
                }
                if sc == '\\' {
                    pos += 1;
                    if pos >= chars.len() {
                        return Err(LowerError::lex(
                            filename,
                            tok_line,
                            tok_col,
                            "unterminated escape in string",
                        ));
                    }
                    match chars[pos] {
                        '"' => s.push('"'),
                        '\\' => s.push('\\'),
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        other => {
                            s.push('\\');
                            s.push(other);
                        }
                    }
                    pos += 1;
                    continue;
                }
                s.push(sc);
                pos += 1;
            }
            push(&mut tokens, Token::Str(s));
            continue;
        }

        // Number
        if c.is_ascii_digit() {
            let start = pos;
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
            if chars.get(pos) == Some(&'.')
                && chars.get(pos + 1).is_some_and(|d| d.is_ascii_digit())
            {
                pos += 1; // consume '.'
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
                let s: String = chars[start..pos].iter().collect();
                push(&mut tokens, Token::Float(s));
            } else {
                let s: String = chars[start..pos].iter().collect();
                let n: i64 = s.parse().map_err(|_| {
                    LowerError::lex(filename, tok_line, tok_col, format!("invalid integer '{}'", s))
                })?;
                push(&mut tokens, Token::Int(n));
            }
            continue;
        }

        // Two-character operators
        let pair = match (c, next) {
            ('=', Some('>')) => Some(Token::Arrow),
            ('=', Some('=')) => Some(Token::EqEq),
            ('!', Some('=')) => Some(Token::Neq),
            ('<', Some('=')) => Some(Token::Lte),
            ('>', Some('=')) => Some(Token::Gte),
            ('&', Some('&')) => Some(Token::AndAnd),
            ('|', Some('|')) => Some(Token::OrOr),
            ('?', Some('?')) => Some(Token::Coalesce),
            ('@', Some('?')) => Some(Token::AtNullish),
            _ => None,
        };
        if let Some(token) = pair {
            push(&mut tokens, token);
            pos += 2;
            continue;
        }

        let single = match c {
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            ';' => Some(Token::Semi),
            '.' => Some(Token::Dot),
            ':' => Some(Token::Colon),
            '?' => Some(Token::Question),
            '=' => Some(Token::Assign),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            '!' => Some(Token::Bang),
            '@' => Some(Token::At),
            _ => None,
        };
        if let Some(token) = single {
            push(&mut tokens, token);
            pos += 1;
            continue;
        }

        // Identifier / keyword
        if is_ident_start(c) {
            let start = pos;
            while pos < chars.len() && is_ident_continue(chars[pos]) {
                pos += 1;
            }
            let word: String = chars[start..pos].iter().collect();
            push(&mut tokens, Token::Word(word));
            continue;
        }

        return Err(LowerError::lex(
            filename,
            tok_line,
            tok_col,
            format!("unexpected character '{}'", c),
        ));
    }

    tokens.push(Spanned {
        token: Token::Eof,
        line,
        column: (pos - line_start) as u32 + 1,
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        lex(src, "t.obs")
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn stacked_and_nullish_markers() {
        assert_eq!(
            kinds("@@?a"),
            vec![
                Token::At,
                Token::AtNullish,
                Token::Word("a".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn context_arrow_and_coalesce() {
        assert_eq!(
            kinds("@ => x ?? 1"),
            vec![
                Token::At,
                Token::Arrow,
                Token::Word("x".into()),
                Token::Coalesce,
                Token::Int(1),
                Token::Eof
            ]
        );
    }

    #[test]
    fn minus_is_never_folded_into_a_literal() {
        assert_eq!(
            kinds("a-1"),
            vec![
                Token::Word("a".into()),
                Token::Minus,
                Token::Int(1),
                Token::Eof
            ]
        );
    }

    #[test]
    fn columns_restart_on_each_line() {
        let tokens = lex("let a = 1;\n  @b", "t.obs").unwrap();
        let at = tokens.iter().find(|s| s.token == Token::At).unwrap();
        assert_eq!((at.line, at.column), (2, 3));
    }

    #[test]
    fn unterminated_string_reports_its_start() {
        let err = lex("let s = \"abc", "t.obs").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Lex);
        assert_eq!((err.line, err.column), (1, 9));
    }

    #[test]
    fn dollar_is_an_identifier_character() {
        assert_eq!(
            kinds("$a x$1"),
            vec![
                Token::Word("$a".into()),
                Token::Word("x$1".into()),
                Token::Eof
            ]
        );
    }
}
