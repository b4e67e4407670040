//! Tokenizer for branch condition expressions.

use super::ConditionError;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Str(String),
    Int(i64),
    Float(f64),
    Null,
    True,
    False,
    /// Bare name; never valid in a well-formed condition.
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Minus,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Not,
    In,
}

/// Split an expression into tokens.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        match c {
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '[' => tokens.push(Token::LBracket),
            ']' => tokens.push(Token::RBracket),
            ',' => tokens.push(Token::Comma),
            '-' => tokens.push(Token::Minus),
            '=' | '!' | '<' | '>' => {
                let next = chars.get(pos + 1).copied();
                let token = match (c, next) {
                    ('=', Some('=')) => Token::Eq,
                    ('!', Some('=')) => Token::Ne,
                    ('<', Some('=')) => Token::Le,
                    ('>', Some('=')) => Token::Ge,
                    ('<', _) => Token::Lt,
                    ('>', _) => Token::Gt,
                    _ => {
                        return Err(ConditionError::Lex {
                            position: pos,
                            message: format!("unexpected character '{}'", c),
                        })
                    }
                };
                if matches!(token, Token::Eq | Token::Ne | Token::Le | Token::Ge) {
                    pos += 1;
                }
                tokens.push(token);
            }
            '\'' | '"' => {
                let (s, end) = read_string(&chars, pos)?;
                tokens.push(Token::Str(s));
                pos = end;
                continue;
            }
            c if c.is_ascii_digit() => {
                let (token, end) = read_number(&chars, pos)?;
                tokens.push(token);
                pos = end;
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    pos += 1;
                }
                let word: String = chars[start..pos].iter().collect();
                tokens.push(keyword(word));
                continue;
            }
            other => {
                return Err(ConditionError::Lex {
                    position: pos,
                    message: format!("unexpected character '{}'", other),
                })
            }
        }

        pos += 1;
    }

    Ok(tokens)
}

fn keyword(word: String) -> Token {
    match word.as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "in" => Token::In,
        "null" | "None" => Token::Null,
        "true" | "True" => Token::True,
        "false" | "False" => Token::False,
        _ => Token::Ident(word),
    }
}

/// Read a quoted string starting at `start`; returns the value and the index after the closing quote.
fn read_string(chars: &[char], start: usize) -> Result<(String, usize), ConditionError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut pos = start + 1;

    while pos < chars.len() {
        let c = chars[pos];
        if c == quote {
            return Ok((out, pos + 1));
        }
        if c == '\\' {
            match chars.get(pos + 1) {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some('"') => out.push('"'),
                Some(other) => {
                    out.push('\\');
                    out.push(*other);
                }
                None => break,
            }
            pos += 2;
            continue;
        }
        out.push(c);
        pos += 1;
    }

    Err(ConditionError::Lex {
        position: start,
        message: "unterminated string literal".to_string(),
    })
}

fn read_number(chars: &[char], start: usize) -> Result<(Token, usize), ConditionError> {
    let mut pos = start;
    let mut is_float = false;

    while pos < chars.len() && chars[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos + 1 < chars.len() && chars[pos] == '.' && chars[pos + 1].is_ascii_digit() {
        is_float = true;
        pos += 1;
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
        let mut exp = pos + 1;
        if exp < chars.len() && (chars[exp] == '+' || chars[exp] == '-') {
            exp += 1;
        }
        if exp < chars.len() && chars[exp].is_ascii_digit() {
            is_float = true;
            pos = exp;
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }

    let text: String = chars[start..pos].iter().collect();
    let invalid = || ConditionError::Lex {
        position: start,
        message: format!("invalid number '{}'", text),
    };

    let token = if is_float {
        Token::Float(text.parse().map_err(|_| invalid())?)
    } else {
        match text.parse::<i64>() {
            Ok(n) => Token::Int(n),
            // Out-of-range integers degrade to floats
            Err(_) => Token::Float(text.parse().map_err(|_| invalid())?),
        }
    };

    Ok((token, pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_comparison() {
        let tokens = tokenize("'10' == 10").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Str("10".to_string()), Token::Eq, Token::Int(10)]
        );
    }

    #[test]
    fn test_tokenize_operators() {
        let tokens = tokenize("a != b <= c >= d < e > f").unwrap();
        let ops: Vec<_> = tokens
            .into_iter()
            .filter(|t| !matches!(t, Token::Ident(_)))
            .collect();
        assert_eq!(
            ops,
            vec![Token::Ne, Token::Le, Token::Ge, Token::Lt, Token::Gt]
        );
    }

    #[test]
    fn test_tokenize_keywords_and_literals() {
        let tokens = tokenize("None is null True true False false not in and or").unwrap();
        assert_eq!(tokens[0], Token::Null);
        assert_eq!(tokens[1], Token::Ident("is".to_string()));
        assert_eq!(tokens[2], Token::Null);
        assert_eq!(tokens[3], Token::True);
        assert_eq!(tokens[4], Token::True);
        assert_eq!(tokens[5], Token::False);
        assert_eq!(tokens[6], Token::False);
        assert_eq!(&tokens[7..], &[Token::Not, Token::In, Token::And, Token::Or]);
    }

    #[test]
    fn test_tokenize_string_escapes() {
        let tokens = tokenize(r"'it\'s' 'a\\b' 'keep null'").unwrap();
        assert_eq!(tokens[0], Token::Str("it's".to_string()));
        assert_eq!(tokens[1], Token::Str("a\\b".to_string()));
        assert_eq!(tokens[2], Token::Str("keep null".to_string()));
    }

    #[test]
    fn test_tokenize_numbers() {
        let tokens = tokenize("1.5 2e3 7").unwrap();
        assert_eq!(tokens, vec![Token::Float(1.5), Token::Float(2000.0), Token::Int(7)]);
    }

    #[test]
    fn test_tokenize_errors() {
        assert!(tokenize("'open").is_err());
        assert!(tokenize("a = b").is_err());
        assert!(tokenize("a; b").is_err());
    }
}
