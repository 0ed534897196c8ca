use super::{Containment, Document, Node};
use crate::core::{DbError, Gid, Result, Value};
use crate::schema::RelationshipDef;
use std::collections::HashSet;

impl Document {
    /// Creates a node of `type_name` inside the composition `relationship`
    /// of `parent`. A single-valued composition that is already occupied has
    /// its previous child deleted first.
    pub fn create_child(
        &mut self,
        parent: &Gid,
        relationship: &str,
        type_name: &str,
        gid: Option<Gid>,
    ) -> Result<Gid> {
        let parent_type = self.require_node(parent)?.type_name().to_string();
        let rel = self.schema.relationship(&parent_type, relationship)?.clone();
        if !rel.is_composition() {
            return Err(DbError::TypeMismatch(format!(
                "'{}.{}' is a reference; nodes can only be created in compositions",
                parent_type, relationship
            )));
        }

        let def = self.schema.require_type(type_name)?;
        if def.is_abstract {
            return Err(DbError::TypeMismatch(format!(
                "Cannot create an instance of abstract type '{}'",
                type_name
            )));
        }
        if !self.schema.conforms_to(type_name, &rel.target) {
            return Err(DbError::TypeMismatch(format!(
                "'{}.{}' holds {}, not {}",
                parent_type, relationship, rel.target, type_name
            )));
        }

        let gid = gid.unwrap_or_else(Gid::generate);
        if self.nodes.contains_key(&gid) {
            return Err(DbError::Execution(format!(
                "A node with gid '{}' already exists",
                gid
            )));
        }

        if !rel.many {
            let previous = self.linked(parent, relationship)?;
            for old in previous {
                self.delete(&old)?;
            }
        }

        let mut node = Node::new(gid.clone(), type_name);
        node.container = Some(Containment {
            parent: parent.clone(),
            relationship: relationship.to_string(),
        });
        self.nodes.insert(gid.clone(), node);
        self.push_link(parent, relationship, gid.clone());
        Ok(gid)
    }

    /// Stores an attribute after schema coercion. Setting `Null` unsets it.
    pub fn set_attribute(&mut self, gid: &Gid, attribute: &str, value: Value) -> Result<()> {
        let type_name = self.require_node(gid)?.type_name().to_string();
        let def = self.schema.attribute(&type_name, attribute)?;
        let value = self.schema.coerce_attribute(def, value)?;

        let node = self.node_mut(gid)?;
        if value.is_null() {
            node.attributes.remove(attribute);
        } else {
            node.attributes.insert(attribute.to_string(), value);
        }
        Ok(())
    }

    /// Adds `target` to a reference. Single-valued references are replaced.
    pub fn link(&mut self, source: &Gid, relationship: &str, target: &Gid) -> Result<()> {
        let rel = self.reference_def(source, relationship)?;
        let target_type = self.require_node(target)?.type_name().to_string();
        if !self.schema.conforms_to(&target_type, &rel.target) {
            return Err(DbError::TypeMismatch(format!(
                "'{}' refers to {}, not {}",
                relationship, rel.target, target_type
            )));
        }

        let node = self.node_mut(source)?;
        let targets = node.links.entry(relationship.to_string()).or_default();
        if !rel.many {
            targets.clear();
        }
        if !targets.contains(target) {
            targets.push(target.clone());
        }
        Ok(())
    }

    /// Removes `target` from a reference; returns whether it was linked.
    pub fn unlink(&mut self, source: &Gid, relationship: &str, target: &Gid) -> Result<bool> {
        self.reference_def(source, relationship)?;
        let node = self.node_mut(source)?;
        let Some(targets) = node.links.get_mut(relationship) else {
            return Ok(false);
        };
        let before = targets.len();
        targets.retain(|gid| gid != target);
        let removed = targets.len() != before;
        if targets.is_empty() {
            node.links.remove(relationship);
        }
        Ok(removed)
    }

    /// Empties a reference.
    pub fn clear_reference(&mut self, source: &Gid, relationship: &str) -> Result<()> {
        self.reference_def(source, relationship)?;
        self.node_mut(source)?.links.remove(relationship);
        Ok(())
    }

    /// Deletes a node with everything it owns and drops references into the
    /// removed subtree. Returns the number of nodes removed.
    pub fn delete(&mut self, gid: &Gid) -> Result<usize> {
        if *gid == self.root {
            return Err(DbError::Execution("The root node cannot be deleted".into()));
        }
        let containment = self
            .require_node(gid)?
            .containment()
            .cloned()
            .ok_or_else(|| DbError::Execution(format!("Node '{}' has no container", gid)))?;

        let mut removed = HashSet::new();
        let mut stack = vec![gid.clone()];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.remove(&current) else {
                continue;
            };
            for rel in self.schema.compositions(&node.type_name) {
                stack.extend(node.links_of(&rel.name).iter().cloned());
            }
            removed.insert(current);
        }

        if let Some(parent) = self.nodes.get_mut(&containment.parent) {
            if let Some(children) = parent.links.get_mut(&containment.relationship) {
                children.retain(|child| child != gid);
                if children.is_empty() {
                    parent.links.remove(&containment.relationship);
                }
            }
        }

        for node in self.nodes.values_mut() {
            node.links.retain(|_, targets| {
                targets.retain(|target| !removed.contains(target));
                !targets.is_empty()
            });
        }

        Ok(removed.len())
    }

    fn reference_def(&self, source: &Gid, relationship: &str) -> Result<RelationshipDef> {
        let type_name = self.require_node(source)?.type_name();
        let rel = self.schema.relationship(type_name, relationship)?;
        if rel.is_composition() {
            return Err(DbError::TypeMismatch(format!(
                "'{}.{}' is a composition; use create and delete instead of link",
                type_name, relationship
            )));
        }
        Ok(rel.clone())
    }

    fn node_mut(&mut self, gid: &Gid) -> Result<&mut Node> {
        self.nodes
            .get_mut(gid)
            .ok_or_else(|| DbError::Execution(format!("Node '{}' does not exist", gid)))
    }

    fn push_link(&mut self, source: &Gid, relationship: &str, target: Gid) {
        if let Some(node) = self.nodes.get_mut(source) {
            node.links
                .entry(relationship.to_string())
                .or_default()
                .push(target);
        }
    }
}
