//! Schema: the fixed type description every document conforms to.
//!
//! A schema is parsed once from its DSL source, validated, and shared
//! read-only (`Arc<Schema>`) by the store, the script compiler and the
//! record mapper.

mod parser;

use crate::core::{DbError, Result, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

pub use parser::{DeclaredSchema, parse_schema};
pub(crate) use parser::is_identifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Int,
    Long,
    Float,
    Double,
    Boolean,
    Enum(String),
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Long => write!(f, "long"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::Boolean => write!(f, "boolean"),
            Self::Enum(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDef {
    pub name: String,
    pub attr_type: AttributeType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// Owning; the child lives and dies with its container.
    Composition,
    /// Non-owning link to a node contained elsewhere.
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDef {
    pub name: String,
    pub target: String,
    pub kind: RelationshipKind,
    pub many: bool,
}

impl RelationshipDef {
    pub fn is_composition(&self) -> bool {
        self.kind == RelationshipKind::Composition
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    pub name: String,
    pub supertype: Option<String>,
    pub is_abstract: bool,
    pub attributes: Vec<AttributeDef>,
    pub relationships: Vec<RelationshipDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub name: String,
    pub literals: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Schema {
    namespace: String,
    root_type: String,
    types: Vec<TypeDef>,
    enums: Vec<EnumDef>,
    type_index: HashMap<String, usize>,
    enum_index: HashMap<String, usize>,
}

impl Schema {
    /// Parses and validates schema DSL source.
    pub fn parse(source: &str) -> Result<Self> {
        let declared = parse_schema(source)?;
        Self::from_parts(
            declared.namespace,
            declared.root_type,
            declared.types,
            declared.enums,
        )
    }

    /// Loads the schema resource from disk. A missing file is `NotFound`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                DbError::NotFound(format!("schema file '{}'", path.display()))
            } else {
                DbError::Io(format!(
                    "Failed to read schema '{}': {}",
                    path.display(),
                    err
                ))
            }
        })?;
        Self::parse(&source)
    }

    pub fn from_parts(
        namespace: String,
        root_type: String,
        types: Vec<TypeDef>,
        enums: Vec<EnumDef>,
    ) -> Result<Self> {
        let mut type_index = HashMap::new();
        for (idx, ty) in types.iter().enumerate() {
            if type_index.insert(ty.name.clone(), idx).is_some() {
                return Err(DbError::SchemaError(format!(
                    "Type '{}' is declared more than once",
                    ty.name
                )));
            }
        }

        let mut enum_index = HashMap::new();
        for (idx, en) in enums.iter().enumerate() {
            if type_index.contains_key(&en.name) || enum_index.insert(en.name.clone(), idx).is_some()
            {
                return Err(DbError::SchemaError(format!(
                    "Name '{}' is declared more than once",
                    en.name
                )));
            }
            if en.literals.is_empty() {
                return Err(DbError::SchemaError(format!(
                    "Enum '{}' must declare at least one literal",
                    en.name
                )));
            }
            let unique = en.literals.iter().collect::<HashSet<_>>();
            if unique.len() != en.literals.len() {
                return Err(DbError::SchemaError(format!(
                    "Enum '{}' declares a literal more than once",
                    en.name
                )));
            }
        }

        let schema = Self {
            namespace,
            root_type,
            types,
            enums,
            type_index,
            enum_index,
        };
        schema.validate()?;
        Ok(schema)
    }

    fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(DbError::SchemaError("Schema namespace is empty".into()));
        }

        for ty in &self.types {
            if let Some(supertype) = &ty.supertype {
                if !self.type_index.contains_key(supertype) {
                    return Err(DbError::SchemaError(format!(
                        "Type '{}' extends unknown type '{}'",
                        ty.name, supertype
                    )));
                }
            }

            for attr in &ty.attributes {
                if let AttributeType::Enum(enum_name) = &attr.attr_type {
                    if !self.enum_index.contains_key(enum_name) {
                        return Err(DbError::SchemaError(format!(
                            "Attribute '{}.{}' uses unknown type '{}'",
                            ty.name, attr.name, enum_name
                        )));
                    }
                }
            }

            for rel in &ty.relationships {
                if !self.type_index.contains_key(&rel.target) {
                    return Err(DbError::SchemaError(format!(
                        "Relationship '{}.{}' targets unknown type '{}'",
                        ty.name, rel.name, rel.target
                    )));
                }
            }
        }

        // Inheritance must be acyclic before member lookups walk the chain.
        for ty in &self.types {
            let mut seen = HashSet::new();
            let mut current = Some(ty.name.as_str());
            while let Some(name) = current {
                if !seen.insert(name) {
                    return Err(DbError::SchemaError(format!(
                        "Inheritance cycle detected at type '{}'",
                        ty.name
                    )));
                }
                current = self
                    .type_def(name)
                    .and_then(|def| def.supertype.as_deref());
            }
        }

        for ty in &self.types {
            let attributes = self.attributes(&ty.name);
            let relationships = self.relationships(&ty.name);
            let mut members = HashSet::new();
            for name in attributes
                .iter()
                .map(|attr| attr.name.as_str())
                .chain(relationships.iter().map(|rel| rel.name.as_str()))
            {
                if !members.insert(name) {
                    return Err(DbError::SchemaError(format!(
                        "Type '{}' declares member '{}' more than once (including inherited members)",
                        ty.name, name
                    )));
                }
            }
        }

        let root = self.type_def(&self.root_type).ok_or_else(|| {
            DbError::SchemaError(format!("Root type '{}' is not declared", self.root_type))
        })?;
        if root.is_abstract {
            return Err(DbError::SchemaError(format!(
                "Root type '{}' cannot be abstract",
                self.root_type
            )));
        }

        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn root_type(&self) -> &str {
        &self.root_type
    }

    pub fn types(&self) -> &[TypeDef] {
        &self.types
    }

    pub fn enums(&self) -> &[EnumDef] {
        &self.enums
    }

    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.type_index.get(name).map(|idx| &self.types[*idx])
    }

    pub fn require_type(&self, name: &str) -> Result<&TypeDef> {
        self.type_def(name)
            .ok_or_else(|| DbError::SchemaMismatch(format!("Unknown type '{}'", name)))
    }

    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.enum_index.get(name).map(|idx| &self.enums[*idx])
    }

    /// Type chain from the most general supertype down to `type_name`.
    fn lineage(&self, type_name: &str) -> Vec<&TypeDef> {
        let mut chain = Vec::new();
        let mut current = self.type_def(type_name);
        while let Some(def) = current {
            chain.push(def);
            current = def.supertype.as_deref().and_then(|name| self.type_def(name));
        }
        chain.reverse();
        chain
    }

    /// All attributes of a type, inherited ones first.
    pub fn attributes(&self, type_name: &str) -> Vec<&AttributeDef> {
        self.lineage(type_name)
            .into_iter()
            .flat_map(|def| def.attributes.iter())
            .collect()
    }

    /// All relationships of a type, inherited ones first.
    pub fn relationships(&self, type_name: &str) -> Vec<&RelationshipDef> {
        self.lineage(type_name)
            .into_iter()
            .flat_map(|def| def.relationships.iter())
            .collect()
    }

    pub fn compositions(&self, type_name: &str) -> Vec<&RelationshipDef> {
        self.relationships(type_name)
            .into_iter()
            .filter(|rel| rel.is_composition())
            .collect()
    }

    pub fn attribute(&self, type_name: &str, attribute: &str) -> Result<&AttributeDef> {
        self.attributes(type_name)
            .into_iter()
            .find(|attr| attr.name == attribute)
            .ok_or_else(|| DbError::UnknownAttribute {
                type_name: type_name.to_string(),
                attribute: attribute.to_string(),
            })
    }

    pub fn relationship(&self, type_name: &str, relationship: &str) -> Result<&RelationshipDef> {
        self.relationships(type_name)
            .into_iter()
            .find(|rel| rel.name == relationship)
            .ok_or_else(|| DbError::UnknownRelationship {
                type_name: type_name.to_string(),
                relationship: relationship.to_string(),
            })
    }

    pub fn has_member(&self, type_name: &str, member: &str) -> bool {
        self.attribute(type_name, member).is_ok() || self.relationship(type_name, member).is_ok()
    }

    /// True when `type_name` is `ancestor` or inherits from it.
    pub fn conforms_to(&self, type_name: &str, ancestor: &str) -> bool {
        self.lineage(type_name)
            .iter()
            .any(|def| def.name == ancestor)
    }

    /// Normalizes a value for storage in an attribute, rejecting ill-typed values.
    pub fn coerce_attribute(&self, def: &AttributeDef, value: Value) -> Result<Value> {
        let mismatch = |value: &Value| {
            DbError::TypeMismatch(format!(
                "Attribute '{}' expects {}, got {}",
                def.name,
                def.attr_type,
                value.type_name()
            ))
        };

        match (&def.attr_type, value) {
            (_, Value::Null) => Ok(Value::Null),
            (AttributeType::String, Value::Text(s)) => Ok(Value::Text(s)),
            (AttributeType::Boolean, Value::Boolean(b)) => Ok(Value::Boolean(b)),
            (AttributeType::Int, Value::Integer(i)) => {
                if i32::try_from(i).is_err() {
                    return Err(DbError::TypeMismatch(format!(
                        "Attribute '{}' expects int, value {} is out of range",
                        def.name, i
                    )));
                }
                Ok(Value::Integer(i))
            }
            (AttributeType::Long, Value::Integer(i)) => Ok(Value::Integer(i)),
            (AttributeType::Float | AttributeType::Double, Value::Float(f)) => Ok(Value::Float(f)),
            (AttributeType::Float | AttributeType::Double, Value::Integer(i)) => {
                Ok(Value::Float(i as f64))
            }
            (AttributeType::Enum(enum_name), Value::Text(literal) | Value::Enum(literal)) => {
                let known = self
                    .enum_def(enum_name)
                    .is_some_and(|en| en.literals.iter().any(|l| *l == literal));
                if !known {
                    return Err(DbError::TypeMismatch(format!(
                        "'{}' is not a literal of enum {} (attribute '{}')",
                        literal, enum_name, def.name
                    )));
                }
                Ok(Value::Enum(literal))
            }
            (_, other) => Err(mismatch(&other)),
        }
    }
}
