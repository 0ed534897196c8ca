use super::ast::{Expr, OperationDecl, Statement, Stmt};
use crate::core::{DbError, Result, Value};
use crate::schema::is_identifier;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Var(String),
    Str(String),
    Int(i64),
    Float(f64),
    Dot,
    Eq,
    Comma,
    LParen,
    RParen,
    LBrace,
    RBrace,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "{}", w),
            Token::Var(v) => write!(f, "${}", v),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Int(i) => write!(f, "{}", i),
            Token::Float(x) => write!(f, "{}", x),
            Token::Dot => write!(f, "."),
            Token::Eq => write!(f, "="),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
        }
    }
}

/// Parses an operation script into declarations. Errors carry `Line N:`.
///
/// ```text
/// operation getCaveByGid(gid) {
///     return find Cave $gid
/// }
/// ```
pub fn parse_script(script_id: &str, source: &str) -> Result<Vec<OperationDecl>> {
    let mut operations = Vec::new();
    let mut current: Option<OperationDecl> = None;

    for (line_idx, raw_line) in source.lines().enumerate() {
        let line = line_idx + 1;
        let tokens = tokenize(raw_line).map_err(|msg| parse_error(script_id, line, msg))?;
        if tokens.is_empty() {
            continue;
        }
        if current.is_some() && tokens == [Token::RBrace] {
            operations.extend(current.take());
            continue;
        }
        let mut cursor = Cursor::new(&tokens);

        match current.as_mut() {
            None => {
                let decl = parse_header(&mut cursor, line)
                    .map_err(|msg| parse_error(script_id, line, msg))?;
                current = Some(decl);
            }
            Some(decl) => {
                let stmt = parse_statement(&mut cursor)
                    .map_err(|msg| parse_error(script_id, line, msg))?;
                decl.body.push(Statement { line, stmt });
            }
        }
    }

    if let Some(open) = current {
        return Err(parse_error(
            script_id,
            open.line,
            format!("operation '{}' is not closed with '}}'", open.name),
        ));
    }

    Ok(operations)
}

fn parse_error(script_id: &str, line: usize, message: impl AsRef<str>) -> DbError {
    DbError::script_parse(script_id, format!("Line {}: {}", line, message.as_ref()))
}

type ParseResult<T> = std::result::Result<T, String>;

// ============================================================================
// Tokenizer
// ============================================================================

fn tokenize(line: &str) -> ParseResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => break,
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '{' => {
                chars.next();
                tokens.push(Token::LBrace);
            }
            '}' => {
                chars.next();
                tokens.push(Token::RBrace);
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, 'n')) => text.push('\n'),
                            Some((_, 't')) => text.push('\t'),
                            Some((_, other)) => text.push(other),
                            None => break,
                        },
                        other => text.push(other),
                    }
                }
                if !closed {
                    return Err("unterminated string literal".into());
                }
                tokens.push(Token::Str(text));
            }
            '$' => {
                chars.next();
                let name = take_while(&mut chars, line, |c| c.is_ascii_alphanumeric() || c == '_');
                if !is_identifier(name) {
                    return Err(format!("invalid variable name '${}'", name));
                }
                tokens.push(Token::Var(name.to_string()));
            }
            c if c.is_ascii_digit() || c == '-' => {
                chars.next();
                let rest = take_while(&mut chars, line, |c| c.is_ascii_digit() || c == '.');
                let literal = &line[start..start + c.len_utf8() + rest.len()];
                if literal.contains('.') {
                    let value = literal
                        .parse::<f64>()
                        .map_err(|_| format!("invalid number '{}'", literal))?;
                    tokens.push(Token::Float(value));
                } else {
                    let value = literal
                        .parse::<i64>()
                        .map_err(|_| format!("invalid number '{}'", literal))?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let word = take_while(&mut chars, line, |c| c.is_ascii_alphanumeric() || c == '_');
                tokens.push(Token::Word(word.to_string()));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

fn take_while<'a>(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    line: &'a str,
    accept: impl Fn(char) -> bool,
) -> &'a str {
    let start = chars.peek().map_or(line.len(), |&(idx, _)| idx);
    let mut end = start;
    while let Some(&(idx, c)) = chars.peek() {
        if !accept(c) {
            break;
        }
        end = idx + c.len_utf8();
        chars.next();
    }
    &line[start..end]
}

// ============================================================================
// Parser
// ============================================================================

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == word)
    }

    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        match self.next() {
            Some(token) if *token == expected => Ok(()),
            Some(token) => Err(format!("expected '{}', found '{}'", expected, token)),
            None => Err(format!("expected '{}' at end of line", expected)),
        }
    }

    fn expect_word(&mut self, word: &str) -> ParseResult<()> {
        match self.next() {
            Some(Token::Word(w)) if w == word => Ok(()),
            Some(token) => Err(format!("expected '{}', found '{}'", word, token)),
            None => Err(format!("expected '{}' at end of line", word)),
        }
    }

    fn expect_ident(&mut self, what: &str) -> ParseResult<String> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w.clone()),
            Some(token) => Err(format!("expected {}, found '{}'", what, token)),
            None => Err(format!("expected {} at end of line", what)),
        }
    }

    fn expect_var(&mut self) -> ParseResult<String> {
        match self.next() {
            Some(Token::Var(v)) => Ok(v.clone()),
            Some(token) => Err(format!("expected a $variable, found '{}'", token)),
            None => Err("expected a $variable at end of line".into()),
        }
    }

    /// `$var.member`
    fn expect_member(&mut self) -> ParseResult<(String, String)> {
        let var = self.expect_var()?;
        self.expect(Token::Dot)?;
        let member = self.expect_ident("a member name")?;
        Ok((var, member))
    }

    fn finish(&self) -> ParseResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(format!("unexpected '{}'", token)),
        }
    }
}

fn parse_header(cursor: &mut Cursor<'_>, line: usize) -> ParseResult<OperationDecl> {
    cursor.expect_word("operation")?;
    let name = cursor.expect_ident("an operation name")?;
    cursor.expect(Token::LParen)?;

    let mut params = Vec::new();
    if !matches!(cursor.peek(), Some(Token::RParen)) {
        loop {
            params.push(cursor.expect_ident("a parameter name")?);
            match cursor.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                Some(token) => return Err(format!("expected ',' or ')', found '{}'", token)),
                None => return Err("unclosed parameter list".into()),
            }
        }
    } else {
        cursor.next();
    }

    let mutates = if cursor.peek_word("mutates") {
        cursor.next();
        Some(true)
    } else if cursor.peek_word("readonly") {
        cursor.next();
        Some(false)
    } else {
        None
    };

    cursor.expect(Token::LBrace)?;
    cursor.finish()?;

    Ok(OperationDecl {
        name,
        params,
        mutates,
        line,
        body: Vec::new(),
    })
}

fn parse_statement(cursor: &mut Cursor<'_>) -> ParseResult<Stmt> {
    let keyword = cursor.expect_ident("a statement")?;
    let stmt = match keyword.as_str() {
        "let" => {
            let name = cursor.expect_ident("a variable name")?;
            cursor.expect(Token::Eq)?;
            Stmt::Let {
                name,
                value: parse_expr(cursor)?,
            }
        }
        "set" => {
            let (var, attribute) = cursor.expect_member()?;
            cursor.expect(Token::Eq)?;
            Stmt::Set {
                var,
                attribute,
                value: parse_expr(cursor)?,
            }
        }
        "link" | "unlink" => {
            let (var, relationship) = cursor.expect_member()?;
            cursor.expect(Token::Eq)?;
            let value = parse_expr(cursor)?;
            if keyword == "link" {
                Stmt::Link {
                    var,
                    relationship,
                    value,
                }
            } else {
                Stmt::Unlink {
                    var,
                    relationship,
                    value,
                }
            }
        }
        "delete" => Stmt::Delete(parse_expr(cursor)?),
        "require" => {
            let condition = parse_expr(cursor)?;
            cursor.expect_word("else")?;
            let message = match cursor.next() {
                Some(Token::Str(s)) => s.clone(),
                _ => return Err("expected a message string after 'else'".into()),
            };
            Stmt::Require { condition, message }
        }
        "return" => {
            if cursor.at_end() {
                Stmt::Return(None)
            } else {
                Stmt::Return(Some(parse_expr(cursor)?))
            }
        }
        other => return Err(format!("unknown statement '{}'", other)),
    };
    cursor.finish()?;
    Ok(stmt)
}

fn parse_expr(cursor: &mut Cursor<'_>) -> ParseResult<Expr> {
    let token = cursor
        .next()
        .ok_or_else(|| "expected an expression at end of line".to_string())?;

    let expr = match token {
        Token::Str(s) => Expr::Literal(Value::Text(s.clone())),
        Token::Int(i) => Expr::Literal(Value::Integer(*i)),
        Token::Float(f) => Expr::Literal(Value::Float(*f)),
        Token::Var(name) => {
            if matches!(cursor.peek(), Some(Token::Dot)) {
                cursor.next();
                let member = cursor.expect_ident("a member name")?;
                Expr::Member {
                    var: name.clone(),
                    member,
                }
            } else {
                Expr::Var(name.clone())
            }
        }
        Token::Word(word) => match word.as_str() {
            "true" => Expr::Literal(Value::Boolean(true)),
            "false" => Expr::Literal(Value::Boolean(false)),
            "null" => Expr::Literal(Value::Null),
            "all" => Expr::All(cursor.expect_ident("a type name")?),
            "find" => {
                let type_name = cursor.expect_ident("a type name")?;
                Expr::Find {
                    type_name,
                    gid: Box::new(parse_expr(cursor)?),
                }
            }
            "select" => {
                let type_name = cursor.expect_ident("a type name")?;
                cursor.expect_word("where")?;
                let attribute = cursor.expect_ident("an attribute name")?;
                cursor.expect(Token::Eq)?;
                Expr::Select {
                    type_name,
                    attribute,
                    value: Box::new(parse_expr(cursor)?),
                }
            }
            "count" => Expr::Count(Box::new(parse_expr(cursor)?)),
            "create" => {
                let type_name = cursor.expect_ident("a type name")?;
                cursor.expect_word("in")?;
                let (parent, relationship) = cursor.expect_member()?;
                let gid = if cursor.peek_word("as") {
                    cursor.next();
                    Some(Box::new(parse_expr(cursor)?))
                } else {
                    None
                };
                Expr::Create {
                    type_name,
                    parent,
                    relationship,
                    gid,
                }
            }
            other => return Err(format!("expected an expression, found '{}'", other)),
        },
        other => return Err(format!("expected an expression, found '{}'", other)),
    };
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_and_body() {
        let source = r#"
            # creates a defect on a cave
            operation createDefect(caveGid, gid, severity) mutates {
                let cave = find Cave $caveGid
                require $cave else "cave not found"
                let defect = create Defect in $cave.defects as $gid
                set $defect.severity = $severity
                return $defect
            }

            operation countCaves() {
                return count all Cave
            }
        "#;

        let ops = parse_script("defects.ops", source).unwrap();
        assert_eq!(ops.len(), 2);

        let create = &ops[0];
        assert_eq!(create.name, "createDefect");
        assert_eq!(create.params, vec!["caveGid", "gid", "severity"]);
        assert_eq!(create.mutates, Some(true));
        assert_eq!(create.line, 3);
        assert_eq!(create.body.len(), 5);
        assert_eq!(
            create.body[2].stmt,
            Stmt::Let {
                name: "defect".into(),
                value: Expr::Create {
                    type_name: "Defect".into(),
                    parent: "cave".into(),
                    relationship: "defects".into(),
                    gid: Some(Box::new(Expr::Var("gid".into()))),
                },
            }
        );

        assert_eq!(ops[1].mutates, None);
        assert_eq!(
            ops[1].body[0].stmt,
            Stmt::Return(Some(Expr::Count(Box::new(Expr::All("Cave".into())))))
        );
    }

    #[test]
    fn test_literals_and_comments() {
        let source = "operation f() readonly {\n  return \"http://x # not a comment\" # trailing\n}\n";
        let ops = parse_script("f.ops", source).unwrap();
        assert_eq!(ops[0].mutates, Some(false));
        assert_eq!(
            ops[0].body[0].stmt,
            Stmt::Return(Some(Expr::Literal(Value::Text(
                "http://x # not a comment".into()
            ))))
        );

        let source = "operation g() {\n  set $root.area = -2.5\n}\n";
        let ops = parse_script("g.ops", source).unwrap();
        assert_eq!(
            ops[0].body[0].stmt,
            Stmt::Set {
                var: "root".into(),
                attribute: "area".into(),
                value: Expr::Literal(Value::Float(-2.5)),
            }
        );
    }

    #[test]
    fn test_errors_report_line_numbers() {
        let source = "operation f() {\n  return 1\n  frobnicate $x\n}\n";
        match parse_script("bad.ops", source).unwrap_err() {
            DbError::ScriptParse { script, message } => {
                assert_eq!(script, "bad.ops");
                assert!(message.starts_with("Line 3:"), "{}", message);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let source = "operation f() {\n  return 1\n";
        match parse_script("open.ops", source).unwrap_err() {
            DbError::ScriptParse { message, .. } => {
                assert!(message.starts_with("Line 1:"), "{}", message);
                assert!(message.contains("not closed"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let source = "operation f() {\n  return $a $b\n}\n";
        assert!(parse_script("t.ops", source).is_err());
    }
}
