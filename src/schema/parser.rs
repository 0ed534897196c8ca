use super::{AttributeDef, AttributeType, EnumDef, RelationshipDef, RelationshipKind, TypeDef};
use crate::core::{DbError, Result};

/// Schema declarations as written, before cross-reference validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredSchema {
    pub namespace: String,
    pub root_type: String,
    pub types: Vec<TypeDef>,
    pub enums: Vec<EnumDef>,
}

enum Block {
    Type(TypeDef),
    Enum(EnumDef),
}

/// Parse the schema DSL.
///
/// Syntax:
/// ```text
/// namespace "http://heritage.example/catalog/1.0"
/// root Catalog
///
/// enum Severity {
///   minor
///   severe
/// }
///
/// abstract type Artifact {
///   name: string
///   severity: Severity
///   reference: contains AssetReference
///   defects: contains Defect[]
///   related: refers Artifact[]
/// }
///
/// type Cave extends Artifact {
/// }
/// ```
pub fn parse_schema(input: &str) -> Result<DeclaredSchema> {
    let mut namespace = None;
    let mut root_type = None;
    let mut types = Vec::new();
    let mut enums = Vec::new();
    let mut current: Option<Block> = None;

    for (line_idx, raw_line) in input.lines().enumerate() {
        let line_no = line_idx + 1;
        let line = strip_comment(raw_line).trim();

        if line.is_empty() {
            continue;
        }

        if let Some(active) = current.as_mut() {
            if line == "}" {
                match current.take() {
                    Some(Block::Type(def)) => types.push(def),
                    Some(Block::Enum(def)) => enums.push(def),
                    None => {
                        return Err(schema_error(line_no, "unexpected '}'"));
                    }
                }
                continue;
            }

            match active {
                Block::Type(def) => parse_member(line, line_no, def)?,
                Block::Enum(def) => {
                    for literal in line.split(',').map(str::trim).filter(|l| !l.is_empty()) {
                        if !is_identifier(literal) {
                            return Err(schema_error(
                                line_no,
                                format!("invalid enum literal '{}'", literal),
                            ));
                        }
                        def.literals.push(literal.to_string());
                    }
                }
            }
            continue;
        }

        let mut words = line.split_whitespace();
        match words.next() {
            Some("namespace") => {
                let rest = line["namespace".len()..].trim();
                let uri = parse_quoted(rest).ok_or_else(|| {
                    schema_error(line_no, "expected namespace \"<uri>\"")
                })?;
                if namespace.replace(uri).is_some() {
                    return Err(schema_error(line_no, "namespace declared twice"));
                }
            }
            Some("root") => {
                let name = expect_single_identifier(words, line_no, "root")?;
                if root_type.replace(name).is_some() {
                    return Err(schema_error(line_no, "root declared twice"));
                }
            }
            Some("enum") => {
                current = Some(Block::Enum(parse_enum_header(line, line_no)?));
            }
            Some("type") | Some("abstract") => {
                current = Some(Block::Type(parse_type_header(line, line_no)?));
            }
            _ => {
                return Err(schema_error(
                    line_no,
                    "expected 'namespace', 'root', 'enum' or 'type'",
                ));
            }
        }
    }

    if let Some(unclosed) = current {
        let name = match unclosed {
            Block::Type(def) => def.name,
            Block::Enum(def) => def.name,
        };
        return Err(DbError::SchemaError(format!(
            "Unclosed declaration '{}' (missing closing '}}')",
            name
        )));
    }

    let namespace = namespace
        .ok_or_else(|| DbError::SchemaError("Schema is missing 'namespace'".into()))?;
    let root_type =
        root_type.ok_or_else(|| DbError::SchemaError("Schema is missing 'root'".into()))?;

    Ok(DeclaredSchema {
        namespace,
        root_type,
        types,
        enums,
    })
}

fn parse_enum_header(line: &str, line_no: usize) -> Result<EnumDef> {
    let Some(body) = line.strip_suffix('{') else {
        return Err(schema_error(line_no, "enum declaration must end with '{'"));
    };
    let mut words = body.split_whitespace();
    words.next();
    let name = expect_single_identifier(words, line_no, "enum")?;
    Ok(EnumDef {
        name,
        literals: Vec::new(),
    })
}

fn parse_type_header(line: &str, line_no: usize) -> Result<TypeDef> {
    let Some(body) = line.strip_suffix('{') else {
        return Err(schema_error(line_no, "type declaration must end with '{'"));
    };

    let mut words = body.split_whitespace().peekable();
    let is_abstract = words.next_if_eq(&"abstract").is_some();
    if words.next() != Some("type") {
        return Err(schema_error(line_no, "expected 'type <Name> {'"));
    }

    let name = words
        .next()
        .filter(|name| is_identifier(name))
        .ok_or_else(|| schema_error(line_no, "invalid type name"))?
        .to_string();

    let supertype = match words.next() {
        None => None,
        Some("extends") => Some(
            words
                .next()
                .filter(|name| is_identifier(name))
                .ok_or_else(|| schema_error(line_no, "expected supertype after 'extends'"))?
                .to_string(),
        ),
        Some(other) => {
            return Err(schema_error(
                line_no,
                format!("unexpected '{}' in type header", other),
            ));
        }
    };

    if let Some(extra) = words.next() {
        return Err(schema_error(
            line_no,
            format!("unexpected '{}' in type header", extra),
        ));
    }

    Ok(TypeDef {
        name,
        supertype,
        is_abstract,
        attributes: Vec::new(),
        relationships: Vec::new(),
    })
}

fn parse_member(line: &str, line_no: usize, def: &mut TypeDef) -> Result<()> {
    let line = line.trim_end_matches(',').trim();
    let (name_raw, rhs) = line.split_once(':').ok_or_else(|| {
        schema_error(line_no, "expected member format '<name>: <type>'")
    })?;

    let name = name_raw.trim();
    if !is_identifier(name) {
        return Err(schema_error(
            line_no,
            format!("invalid member name '{}'", name),
        ));
    }

    let tokens = rhs.split_whitespace().collect::<Vec<_>>();
    match tokens.as_slice() {
        [kind @ ("contains" | "refers"), target] => {
            let (target, many) = match target.strip_suffix("[]") {
                Some(base) => (base, true),
                None => (*target, false),
            };
            if !is_identifier(target) {
                return Err(schema_error(
                    line_no,
                    format!("invalid relationship target '{}'", target),
                ));
            }
            let kind = if *kind == "contains" {
                RelationshipKind::Composition
            } else {
                RelationshipKind::Reference
            };
            def.relationships.push(RelationshipDef {
                name: name.to_string(),
                target: target.to_string(),
                kind,
                many,
            });
        }
        [type_token] => {
            let attr_type = parse_attribute_type(type_token).ok_or_else(|| {
                schema_error(line_no, format!("unknown attribute type '{}'", type_token))
            })?;
            def.attributes.push(AttributeDef {
                name: name.to_string(),
                attr_type,
            });
        }
        [] => {
            return Err(schema_error(
                line_no,
                format!("member '{}' is missing type", name),
            ));
        }
        _ => {
            return Err(schema_error(
                line_no,
                format!("cannot parse type of member '{}'", name),
            ));
        }
    }

    Ok(())
}

fn parse_attribute_type(token: &str) -> Option<AttributeType> {
    match token {
        "string" | "text" => Some(AttributeType::String),
        "int" | "integer" => Some(AttributeType::Int),
        "long" => Some(AttributeType::Long),
        "float" => Some(AttributeType::Float),
        "double" => Some(AttributeType::Double),
        "bool" | "boolean" => Some(AttributeType::Boolean),
        other if is_identifier(other) => Some(AttributeType::Enum(other.to_string())),
        _ => None,
    }
}

fn expect_single_identifier<'a>(
    mut words: impl Iterator<Item = &'a str>,
    line_no: usize,
    keyword: &str,
) -> Result<String> {
    let name = words
        .next()
        .filter(|name| is_identifier(name))
        .ok_or_else(|| schema_error(line_no, format!("expected a name after '{}'", keyword)))?;
    if words.next().is_some() {
        return Err(schema_error(
            line_no,
            format!("unexpected tokens after '{} {}'", keyword, name),
        ));
    }
    Ok(name.to_string())
}

fn parse_quoted(text: &str) -> Option<String> {
    text.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|inner| !inner.contains('"'))
        .map(str::to_string)
}

fn schema_error(line_no: usize, message: impl AsRef<str>) -> DbError {
    DbError::SchemaError(format!("Line {}: {}", line_no, message.as_ref()))
}

/// Cuts a `#` or `//` comment. Markers inside double quotes are text.
pub(crate) fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut quoted = false;
    for (idx, &byte) in bytes.iter().enumerate() {
        match byte {
            b'"' => quoted = !quoted,
            b'#' if !quoted => return &line[..idx],
            b'/' if !quoted && bytes.get(idx + 1) == Some(&b'/') => return &line[..idx],
            _ => {}
        }
    }
    line
}

pub(crate) fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }

    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_types_enums_and_relationships() {
        let source = r#"
            namespace "urn:heritage"   # stable id
            root Catalog

            enum Severity {
              minor, moderate
              severe
            }

            type Catalog {
              caves: contains Cave[]
            }

            abstract type Artifact {
              name: string
              severity: Severity
            }

            type Cave extends Artifact {
              neighbour: refers Cave
            }
        "#;

        let declared = parse_schema(source).unwrap();
        assert_eq!(declared.namespace, "urn:heritage");
        assert_eq!(declared.root_type, "Catalog");
        assert_eq!(declared.enums[0].literals, vec!["minor", "moderate", "severe"]);
        assert_eq!(declared.types.len(), 3);

        let catalog = &declared.types[0];
        assert_eq!(catalog.relationships[0].kind, RelationshipKind::Composition);
        assert!(catalog.relationships[0].many);

        let artifact = &declared.types[1];
        assert!(artifact.is_abstract);
        assert_eq!(
            artifact.attributes[1].attr_type,
            AttributeType::Enum("Severity".into())
        );

        let cave = &declared.types[2];
        assert_eq!(cave.supertype.as_deref(), Some("Artifact"));
        assert_eq!(cave.relationships[0].kind, RelationshipKind::Reference);
        assert!(!cave.relationships[0].many);
    }

    #[test]
    fn report_line_numbers() {
        let source = "namespace \"urn:x\"\nroot A\ntype A {\n  name string\n}\n";
        match parse_schema(source).unwrap_err() {
            DbError::SchemaError(msg) => assert!(msg.starts_with("Line 4:"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn reject_unclosed_block() {
        let source = "namespace \"urn:x\"\nroot A\ntype A {\n  name: string\n";
        match parse_schema(source).unwrap_err() {
            DbError::SchemaError(msg) => assert!(msg.contains("Unclosed declaration 'A'")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn quoted_uri_keeps_comment_markers() {
        let source = "namespace \"http://x.example/ns#v1\" // trailing\nroot A # root\ntype A {\n  name: string // label\n}\n";
        let declared = parse_schema(source).unwrap();
        assert_eq!(declared.namespace, "http://x.example/ns#v1");
        assert_eq!(declared.types[0].attributes.len(), 1);
        assert_eq!(strip_comment("a: string // note"), "a: string ");
        assert_eq!(strip_comment("\"#\" # note"), "\"#\" ");
    }

    #[test]
    fn shipped_schema_parses() {
        let declared =
            parse_schema(include_str!("../../resources/schema/heritage.schema")).unwrap();
        assert_eq!(declared.namespace, "http://heritage.example/catalog/1.0");
    }
}
