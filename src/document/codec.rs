use super::{Containment, Document, Node};
use crate::core::{DbError, Gid, Result, Value};
use crate::schema::Schema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const DOCUMENT_FORMAT_VERSION: u16 = 1;

/// On-disk form of a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFile {
    pub format_version: u16,
    pub schema: String,
    pub saved_at: DateTime<Utc>,
    pub root: Gid,
    pub nodes: Vec<NodeEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub gid: Gid,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, Vec<Gid>>,
}

impl Document {
    pub fn to_file(&self) -> DocumentFile {
        let nodes = self
            .document_order()
            .into_iter()
            .filter_map(|gid| self.nodes.get(&gid))
            .map(|node| NodeEntry {
                gid: node.gid.clone(),
                type_name: node.type_name.clone(),
                attributes: node.attributes.clone(),
                links: node.links.clone(),
            })
            .collect();

        DocumentFile {
            format_version: DOCUMENT_FORMAT_VERSION,
            schema: self.schema.namespace().to_string(),
            saved_at: Utc::now(),
            root: self.root.clone(),
            nodes,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.to_file())
            .map_err(|e| DbError::Persist(format!("Failed to encode document: {}", e)))
    }

    pub fn decode(schema: Arc<Schema>, bytes: &[u8]) -> Result<Self> {
        let file: DocumentFile = serde_json::from_slice(bytes)
            .map_err(|e| DbError::CorruptDocument(format!("Malformed document: {}", e)))?;
        Self::from_file(schema, file)
    }

    /// Rebuilds a document from its file form, checking every node against
    /// the schema and the containment tree for consistency.
    pub fn from_file(schema: Arc<Schema>, file: DocumentFile) -> Result<Self> {
        if file.format_version != DOCUMENT_FORMAT_VERSION {
            return Err(DbError::CorruptDocument(format!(
                "Unsupported format version {}",
                file.format_version
            )));
        }
        if file.schema != schema.namespace() {
            return Err(DbError::SchemaMismatch(format!(
                "Document was written for schema '{}', expected '{}'",
                file.schema,
                schema.namespace()
            )));
        }

        let mut nodes: HashMap<Gid, Node> = HashMap::with_capacity(file.nodes.len());
        for entry in file.nodes {
            let def = schema.require_type(&entry.type_name)?;
            if def.is_abstract {
                return Err(DbError::SchemaMismatch(format!(
                    "Node '{}' has abstract type '{}'",
                    entry.gid, entry.type_name
                )));
            }

            let mut attributes = BTreeMap::new();
            for (name, value) in entry.attributes {
                let attr = schema
                    .attribute(&entry.type_name, &name)
                    .map_err(|e| DbError::SchemaMismatch(e.to_string()))?;
                let value = schema
                    .coerce_attribute(attr, value)
                    .map_err(|e| DbError::SchemaMismatch(e.to_string()))?;
                if !value.is_null() {
                    attributes.insert(name, value);
                }
            }

            for rel_name in entry.links.keys() {
                schema
                    .relationship(&entry.type_name, rel_name)
                    .map_err(|e| DbError::SchemaMismatch(e.to_string()))?;
            }

            let node = Node {
                gid: entry.gid.clone(),
                type_name: entry.type_name,
                attributes,
                links: entry.links.into_iter().filter(|(_, t)| !t.is_empty()).collect(),
                container: None,
            };
            if nodes.insert(entry.gid.clone(), node).is_some() {
                return Err(DbError::CorruptDocument(format!(
                    "Duplicate node gid '{}'",
                    entry.gid
                )));
            }
        }

        let mut containments = Vec::new();
        for node in nodes.values() {
            for (rel_name, targets) in &node.links {
                let rel = schema.relationship(&node.type_name, rel_name)?;
                if !rel.many && targets.len() > 1 {
                    return Err(DbError::CorruptDocument(format!(
                        "'{}.{}' on node '{}' is single-valued but holds {} targets",
                        node.type_name,
                        rel_name,
                        node.gid,
                        targets.len()
                    )));
                }
                for target in targets {
                    let target_node = nodes.get(target).ok_or_else(|| {
                        DbError::CorruptDocument(format!(
                            "Node '{}' links to missing node '{}' via '{}'",
                            node.gid, target, rel_name
                        ))
                    })?;
                    if !schema.conforms_to(&target_node.type_name, &rel.target) {
                        return Err(DbError::SchemaMismatch(format!(
                            "'{}.{}' holds {}, found {}",
                            node.type_name, rel_name, rel.target, target_node.type_name
                        )));
                    }
                    if rel.is_composition() {
                        containments.push((
                            target.clone(),
                            Containment {
                                parent: node.gid.clone(),
                                relationship: rel_name.clone(),
                            },
                        ));
                    }
                }
            }
        }

        for (child, containment) in containments {
            if let Some(node) = nodes.get_mut(&child) {
                if node.container.replace(containment).is_some() {
                    return Err(DbError::CorruptDocument(format!(
                        "Node '{}' is contained more than once",
                        child
                    )));
                }
            }
        }

        let root = nodes.get(&file.root).ok_or_else(|| {
            DbError::CorruptDocument(format!("Root node '{}' is missing", file.root))
        })?;
        if !schema.conforms_to(&root.type_name, schema.root_type()) {
            return Err(DbError::SchemaMismatch(format!(
                "Root node has type '{}', expected '{}'",
                root.type_name,
                schema.root_type()
            )));
        }
        if root.container.is_some() {
            return Err(DbError::CorruptDocument("Root node is contained by another node".into()));
        }

        let document = Self {
            schema,
            root: file.root,
            nodes,
        };
        let reachable = document.document_order().len();
        if reachable != document.nodes.len() {
            return Err(DbError::CorruptDocument(format!(
                "{} node(s) are not reachable from the root",
                document.nodes.len() - reachable
            )));
        }
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_support::schema;
    use serde_json::json;

    fn sample() -> Document {
        let mut doc = Document::with_root_gid(schema(), Gid::new("root"));
        let root = doc.root().clone();
        let cave = doc
            .create_child(&root, "caves", "Cave", Some(Gid::new("c16")))
            .unwrap();
        doc.set_attribute(&cave, "name", Value::from("Cave 16")).unwrap();
        doc.set_attribute(&cave, "label", Value::from("Library Cave"))
            .unwrap();
        let reference = doc
            .create_child(&cave, "reference", "AssetReference", Some(Gid::new("r1")))
            .unwrap();
        doc.set_attribute(&reference, "modelLocation", Value::from("m.glb"))
            .unwrap();
        let defect = doc
            .create_child(&cave, "defects", "Defect", Some(Gid::new("d1")))
            .unwrap();
        doc.set_attribute(&defect, "severity", Value::from("minor")).unwrap();
        doc.link(&defect, "seenIn", &cave).unwrap();
        doc
    }

    #[test]
    fn test_decode_restores_graph() {
        let doc = sample();
        let bytes = doc.encode().unwrap();
        let decoded = Document::decode(schema(), &bytes).unwrap();
        assert_eq!(decoded, doc);
        let defect = decoded.node(&Gid::new("d1")).unwrap();
        assert_eq!(defect.container().unwrap().gid(), &Gid::new("c16"));
    }

    #[test]
    fn test_nodes_written_in_document_order() {
        let file = sample().to_file();
        let order = file
            .nodes
            .iter()
            .map(|n| n.gid.as_str())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["root", "c16", "r1", "d1"]);
        assert_eq!(file.schema, "urn:heritage:test");
    }

    fn raw(nodes: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "format_version": 1,
            "schema": "urn:heritage:test",
            "saved_at": "2024-05-01T10:00:00Z",
            "root": "root",
            "nodes": nodes,
        }))
        .unwrap()
    }

    #[test]
    fn test_dangling_link_is_corrupt() {
        let bytes = raw(json!([
            {"gid": "root", "type": "Catalog", "links": {"caves": ["ghost"]}}
        ]));
        let err = Document::decode(schema(), &bytes).unwrap_err();
        assert!(matches!(err, DbError::CorruptDocument(_)), "{:?}", err);
    }

    #[test]
    fn test_unknown_type_is_schema_mismatch() {
        let bytes = raw(json!([
            {"gid": "root", "type": "Catalog", "links": {"caves": ["x"]}},
            {"gid": "x", "type": "Pagoda"}
        ]));
        let err = Document::decode(schema(), &bytes).unwrap_err();
        assert!(matches!(err, DbError::SchemaMismatch(_)), "{:?}", err);
    }

    #[test]
    fn test_orphan_node_is_corrupt() {
        let bytes = raw(json!([
            {"gid": "root", "type": "Catalog"},
            {"gid": "lost", "type": "Cave"}
        ]));
        let err = Document::decode(schema(), &bytes).unwrap_err();
        assert!(matches!(err, DbError::CorruptDocument(_)), "{:?}", err);
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let err = Document::decode(schema(), b"not json").unwrap_err();
        assert!(matches!(err, DbError::CorruptDocument(_)));
    }

    #[test]
    fn test_wrong_namespace_is_schema_mismatch() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&raw(json!([{"gid": "root", "type": "Catalog"}]))).unwrap();
        value["schema"] = json!("urn:other");
        let bytes = serde_json::to_vec(&value).unwrap();
        let err = Document::decode(schema(), &bytes).unwrap_err();
        assert!(matches!(err, DbError::SchemaMismatch(_)));
    }
}
