//! In-memory document: a rooted node graph conforming to a [`Schema`].
//!
//! Nodes live in an arena keyed by [`Gid`]. Composition links own their
//! targets (each non-root node has exactly one container); reference links
//! are plain pointers that are scrubbed when their target is deleted.

mod codec;
mod graph;

use crate::core::{DbError, Gid, Result, Value};
use crate::schema::{RelationshipDef, Schema, TypeDef};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

pub use codec::{DOCUMENT_FORMAT_VERSION, DocumentFile, NodeEntry};

static NULL_VALUE: Value = Value::Null;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Containment {
    pub parent: Gid,
    pub relationship: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    gid: Gid,
    type_name: String,
    attributes: BTreeMap<String, Value>,
    links: BTreeMap<String, Vec<Gid>>,
    container: Option<Containment>,
}

impl Node {
    fn new(gid: Gid, type_name: impl Into<String>) -> Self {
        Self {
            gid,
            type_name: type_name.into(),
            attributes: BTreeMap::new(),
            links: BTreeMap::new(),
            container: None,
        }
    }

    fn links_of(&self, relationship: &str) -> &[Gid] {
        self.links
            .get(relationship)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Clone)]
pub struct Document {
    schema: Arc<Schema>,
    root: Gid,
    nodes: HashMap<Gid, Node>,
}

impl Document {
    /// Creates an empty document holding only a root node of the schema's root type.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_root_gid(schema, Gid::generate())
    }

    pub fn with_root_gid(schema: Arc<Schema>, root: Gid) -> Self {
        let root_node = Node::new(root.clone(), schema.root_type());
        let mut nodes = HashMap::new();
        nodes.insert(root.clone(), root_node);
        Self {
            schema,
            root,
            nodes,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn root(&self) -> &Gid {
        &self.root
    }

    pub fn root_node(&self) -> NodeRef<'_> {
        NodeRef {
            document: self,
            node: &self.nodes[&self.root],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn contains(&self, gid: &Gid) -> bool {
        self.nodes.contains_key(gid)
    }

    pub fn node(&self, gid: &Gid) -> Option<NodeRef<'_>> {
        self.nodes.get(gid).map(|node| NodeRef {
            document: self,
            node,
        })
    }

    pub fn require_node(&self, gid: &Gid) -> Result<NodeRef<'_>> {
        self.node(gid)
            .ok_or_else(|| DbError::Execution(format!("Node '{}' does not exist", gid)))
    }

    /// Every node gid, depth first from the root in composition declaration order.
    pub fn document_order(&self) -> Vec<Gid> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root.clone()];
        while let Some(gid) = stack.pop() {
            let Some(node) = self.nodes.get(&gid) else {
                continue;
            };
            let mut children = Vec::new();
            for rel in self.schema.compositions(&node.type_name) {
                children.extend(node.links_of(&rel.name).iter().cloned());
            }
            stack.extend(children.into_iter().rev());
            order.push(gid);
        }
        order
    }

    /// Nodes whose type is `type_name` or one of its subtypes, in document order.
    pub fn all_of_type(&self, type_name: &str) -> Vec<Gid> {
        self.document_order()
            .into_iter()
            .filter(|gid| {
                self.nodes
                    .get(gid)
                    .is_some_and(|node| self.schema.conforms_to(&node.type_name, type_name))
            })
            .collect()
    }

    /// Looks up `gid` and checks that it is an instance of `type_name`.
    pub fn find(&self, type_name: &str, gid: &Gid) -> Option<NodeRef<'_>> {
        self.node(gid)
            .filter(|node| self.schema.conforms_to(node.type_name(), type_name))
    }

    pub fn attribute(&self, gid: &Gid, attribute: &str) -> Result<Value> {
        self.require_node(gid)?.attribute(attribute).cloned()
    }

    pub fn linked(&self, gid: &Gid, relationship: &str) -> Result<Vec<Gid>> {
        let node = self.require_node(gid)?;
        self.schema.relationship(node.type_name(), relationship)?;
        Ok(node.node.links_of(relationship).to_vec())
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.schema.namespace() == other.schema.namespace()
            && self.root == other.root
            && self.nodes == other.nodes
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("schema", &self.schema.namespace())
            .field("root", &self.root)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

/// Borrowed, schema-aware view of one node.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    document: &'a Document,
    node: &'a Node,
}

impl<'a> NodeRef<'a> {
    pub fn gid(&self) -> &'a Gid {
        &self.node.gid
    }

    pub fn type_name(&self) -> &'a str {
        &self.node.type_name
    }

    pub fn type_def(&self) -> Option<&'a TypeDef> {
        self.document.schema.type_def(&self.node.type_name)
    }

    pub fn document(&self) -> &'a Document {
        self.document
    }

    /// Attribute value; `Null` when declared but unset, an error when the
    /// node's type does not declare the attribute.
    pub fn attribute(&self, name: &str) -> Result<&'a Value> {
        self.document.schema.attribute(&self.node.type_name, name)?;
        Ok(self.node.attributes.get(name).unwrap_or(&NULL_VALUE))
    }

    /// Set attributes only, by name.
    pub fn attributes(&self) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        self.node
            .attributes
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn relationship(&self, name: &str) -> Result<&'a RelationshipDef> {
        self.document.schema.relationship(&self.node.type_name, name)
    }

    /// Targets of any relationship, composition or reference.
    pub fn linked(&self, name: &str) -> Result<Vec<NodeRef<'a>>> {
        self.relationship(name)?;
        Ok(self.resolve(self.node.links_of(name)))
    }

    /// Children held by a composition; references are rejected.
    pub fn composed(&self, name: &str) -> Result<Vec<NodeRef<'a>>> {
        let rel = self.relationship(name)?;
        if !rel.is_composition() {
            return Err(DbError::TypeMismatch(format!(
                "'{}.{}' is a reference, not a composition",
                self.node.type_name, name
            )));
        }
        Ok(self.resolve(self.node.links_of(name)))
    }

    pub fn container(&self) -> Option<NodeRef<'a>> {
        self.node
            .container
            .as_ref()
            .and_then(|containment| self.document.node(&containment.parent))
    }

    pub fn containment(&self) -> Option<&'a Containment> {
        self.node.container.as_ref()
    }

    fn resolve(&self, gids: &[Gid]) -> Vec<NodeRef<'a>> {
        let document = self.document;
        gids.iter().filter_map(|gid| document.node(gid)).collect()
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("gid", &self.node.gid)
            .field("type", &self.node.type_name)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::schema::Schema;
    use std::sync::Arc;

    pub const SCHEMA: &str = r#"
        namespace "urn:heritage:test"
        root Catalog

        enum Severity {
            minor
            severe
        }

        type Catalog {
            caves: contains Cave[]
        }

        type Cave {
            name: string
            label: string
            reference: contains AssetReference
            defects: contains Defect[]
            neighbours: refers Cave[]
        }

        type Defect {
            severity: Severity
            area: double
            reference: contains AssetReference
            seenIn: refers Cave
        }

        type AssetReference {
            modelLocation: string
        }
    "#;

    pub fn schema() -> Arc<Schema> {
        Arc::new(Schema::parse(SCHEMA).unwrap())
    }
}
