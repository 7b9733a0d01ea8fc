use crate::error::ConvertError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    /// A field name, a keyword (`and`, `or`, `in`, `true`, `false`, `null`) or a backtick-quoted name.
    Name { name: String, quoted: bool },
    /// `$name`. `$` alone is the empty name, `$$` is the name `$`.
    Variable(String),
    Dot,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    LeftParen,
    RightParen,
    Comma,
    Colon,
    Semicolon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Ampersand,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Assign,
}

#[derive(Debug, Clone)]
pub(crate) struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, ConvertError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (position, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // comments
        if c == '/' && matches!(chars.get(i + 1), Some((_, '*'))) {
            i += 2;

            loop {
                match (chars.get(i), chars.get(i + 1)) {
                    (Some((_, '*')), Some((_, '/'))) => {
                        i += 2;
                        break;
                    }
                    (Some(_), _) => i += 1,
                    (None, _) => return Err(syntax(position, "unterminated comment")),
                }
            }

            continue;
        }

        let (token, consumed) = match c {
            '.' => (Token::Dot, 1),
            '[' => (Token::LeftBracket, 1),
            ']' => (Token::RightBracket, 1),
            '{' => (Token::LeftBrace, 1),
            '}' => (Token::RightBrace, 1),
            '(' => (Token::LeftParen, 1),
            ')' => (Token::RightParen, 1),
            ',' => (Token::Comma, 1),
            ';' => (Token::Semicolon, 1),
            '?' => (Token::Question, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '&' => (Token::Ampersand, 1),
            '=' => (Token::Equal, 1),
            ':' if next_is(&chars, i, '=') => (Token::Assign, 2),
            ':' => (Token::Colon, 1),
            '!' if next_is(&chars, i, '=') => (Token::NotEqual, 2),
            '<' if next_is(&chars, i, '=') => (Token::LessEqual, 2),
            '<' => (Token::Less, 1),
            '>' if next_is(&chars, i, '=') => (Token::GreaterEqual, 2),
            '>' => (Token::Greater, 1),
            '"' | '\'' => {
                let (value, consumed) = string_literal(&chars, i)?;
                (Token::Str(value), consumed)
            }
            '`' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|(_, c)| *c == '`')
                    .ok_or_else(|| syntax(position, "unterminated quoted name"))?;

                let name = chars[i + 1..i + 1 + end].iter().map(|(_, c)| c).collect();
                (Token::Name { name, quoted: true }, end + 2)
            }
            '$' => {
                if next_is(&chars, i, '$') {
                    (Token::Variable("$".to_string()), 2)
                } else {
                    let name: String = chars[i + 1..]
                        .iter()
                        .map(|(_, c)| *c)
                        .take_while(|c| is_name_char(*c))
                        .collect();

                    let consumed = name.chars().count() + 1;
                    (Token::Variable(name), consumed)
                }
            }
            c if c.is_ascii_digit() => {
                let text: String = chars[i..]
                    .iter()
                    .map(|(_, c)| *c)
                    .enumerate()
                    .take_while(|(n, c)| c.is_ascii_digit() || *c == '.' || exponent_char(&chars, i, *n, *c))
                    .map(|(_, c)| c)
                    .collect();

                // `a.0` style paths are not numbers; only accept a dot followed by a digit.
                let text = match text.find('.') {
                    Some(dot) if !text[dot + 1..].starts_with(|c: char| c.is_ascii_digit()) => text[..dot].to_string(),
                    _ => text,
                };

                let value = text
                    .parse::<f64>()
                    .map_err(|_| syntax(position, format!("invalid number '{text}'")))?;

                (Token::Number(value), text.chars().count())
            }
            c if is_name_char(c) => {
                let name: String = chars[i..].iter().map(|(_, c)| *c).take_while(|c| is_name_char(*c)).collect();
                let consumed = name.chars().count();

                (Token::Name { name, quoted: false }, consumed)
            }
            other => return Err(syntax(position, format!("unexpected character '{other}'"))),
        };

        tokens.push(Spanned { token, position });
        i += consumed;
    }

    Ok(tokens)
}

fn next_is(chars: &[(usize, char)], i: usize, expected: char) -> bool {
    matches!(chars.get(i + 1), Some((_, c)) if *c == expected)
}

fn exponent_char(chars: &[(usize, char)], start: usize, offset: usize, c: char) -> bool {
    if offset == 0 {
        return false;
    }

    let previous = chars[start + offset - 1].1;

    match c {
        'e' | 'E' => previous.is_ascii_digit(),
        '+' | '-' => matches!(previous, 'e' | 'E'),
        _ => false,
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn string_literal(chars: &[(usize, char)], start: usize) -> Result<(String, usize), ConvertError> {
    let (position, quote) = chars[start];
    let mut value = String::new();
    let mut i = start + 1;

    loop {
        let Some((_, c)) = chars.get(i) else {
            return Err(syntax(position, "unterminated string"));
        };

        match *c {
            c if c == quote => return Ok((value, i - start + 1)),
            '\\' => {
                let Some((escape_position, escaped)) = chars.get(i + 1) else {
                    return Err(syntax(position, "unterminated string"));
                };

                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    'b' => value.push('\u{8}'),
                    'f' => value.push('\u{c}'),
                    '"' | '\'' | '\\' | '/' => value.push(*escaped),
                    'u' => {
                        let hex: String = chars.iter().skip(i + 2).take(4).map(|(_, c)| *c).collect();

                        let decoded = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| syntax(*escape_position, "invalid unicode escape"))?;

                        value.push(decoded);
                        i += 4;
                    }
                    other => return Err(syntax(*escape_position, format!("invalid escape '\\{other}'"))),
                }

                i += 2;
            }
            c => {
                value.push(c);
                i += 1;
            }
        }
    }
}

fn syntax(position: usize, message: impl Into<String>) -> ConvertError {
    ConvertError::Syntax {
        position,
        message: message.into(),
    }
}
