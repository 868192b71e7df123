//! Node snapshots
//!
//! `NodeInfo` is the JSON form of a node used for inspection and by backup archives:
//! `{path, name, children?, properties: [{name, value | values}]}`. Binary properties are
//! never included.

use crate::error::RepoError;
use crate::store::{path, NodeSession};
use crate::types::{NodeData, Property, PropertyMap, PropertyValue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<PropertyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<PropertyValue>>,
}

impl PropertyInfo {
    fn from_property(name: &str, property: &Property) -> Self {
        match property {
            Property::Single(v) => Self {
                name: name.to_string(),
                value: Some(v.clone()),
                values: None,
            },
            Property::Multiple(vs) => Self {
                name: name.to_string(),
                value: None,
                values: Some(vs.clone()),
            },
        }
    }

    /// The stored form; `None` for an entry carrying neither form.
    pub fn to_property(&self) -> Option<Property> {
        match (&self.value, &self.values) {
            (Some(v), _) => Some(Property::Single(v.clone())),
            (None, Some(vs)) => Some(Property::Multiple(vs.clone())),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Repository path, `/` for the top-level node.
    pub path: String,
    pub name: String,
    /// Present only in recursive snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<NodeInfo>>,
    #[serde(default)]
    pub properties: Vec<PropertyInfo>,
}

impl NodeInfo {
    /// Snapshot of one node without children.
    pub fn from_node(node: &NodeData) -> Self {
        Self {
            path: node.path.clone(),
            name: node.name.clone(),
            children: None,
            properties: node
                .properties
                .iter()
                .filter(|(_, p)| !p.is_binary())
                .map(|(name, p)| PropertyInfo::from_property(name, p))
                .collect(),
        }
    }

    pub fn property_map(&self) -> PropertyMap {
        self.properties
            .iter()
            .filter_map(|p| p.to_property().map(|v| (p.name.clone(), v)))
            .collect()
    }

    pub fn property(&self, name: &str) -> Option<&PropertyInfo> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Number of nodes in this snapshot, including itself.
    pub fn count(&self) -> usize {
        let mut total = 0;
        let mut pending = vec![self];
        while let Some(info) = pending.pop() {
            total += 1;
            if let Some(children) = &info.children {
                pending.extend(children.iter());
            }
        }
        total
    }
}

struct Frame {
    info: NodeInfo,
    children: Vec<NodeInfo>,
    pending: std::vec::IntoIter<String>,
}

impl Frame {
    fn new(node: NodeData) -> Self {
        let info = NodeInfo::from_node(&node);
        Self {
            info,
            children: Vec::new(),
            pending: node.children.into_iter(),
        }
    }

    fn finish(mut self) -> NodeInfo {
        self.info.children = Some(self.children);
        self.info
    }
}

/// Read a snapshot of `node_path`, including the whole subtree when `recursive`.
///
/// Built with an explicit work list so deep trees don't exhaust the stack.
pub fn read_node_info<S: NodeSession + ?Sized>(
    session: &S,
    node_path: &str,
    recursive: bool,
) -> Result<NodeInfo, RepoError> {
    let root = session.get_node(node_path)?;
    if !recursive {
        return Ok(NodeInfo::from_node(&root));
    }

    let mut stack = vec![Frame::new(root)];
    let mut result = None;
    while let Some(frame) = stack.last_mut() {
        if let Some(child) = frame.pending.next() {
            let child_path = path::child(&frame.info.path, &child);
            let node = session.get_node(&child_path)?;
            stack.push(Frame::new(node));
            continue;
        }
        if let Some(done) = stack.pop() {
            let info = done.finish();
            match stack.last_mut() {
                Some(parent) => parent.children.push(info),
                None => result = Some(info),
            }
        }
    }
    result.ok_or_else(|| RepoError::NodeNotFound(node_path.to_string()))
}
