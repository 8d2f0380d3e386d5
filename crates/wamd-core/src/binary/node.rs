//! Binary node tree
//!
//! A node is a tag, an ordered attribute map and optional content (raw bytes
//! or child nodes). Nodes are built once with [`NodeBuilder`] and not mutated
//! afterwards.

use std::borrow::Cow;
use std::fmt;

use smallvec::SmallVec;

use crate::errors::AddressError;
use crate::jid::Jid;

// ----------------------------------------------------------------------------
// Attribute Values
// ----------------------------------------------------------------------------

/// Attribute value. Equality compares wire representations, so a number and
/// the string of its digits are equal.
#[derive(Debug, Clone)]
pub enum AttributeValue {
    String(String),
    Number(i64),
    Jid(Jid),
    Bytes(Vec<u8>),
    Nodes(Vec<Node>),
}

enum WireForm<'a> {
    Text(Cow<'a, [u8]>),
    List(&'a [Node]),
}

impl AttributeValue {
    fn wire_form(&self) -> WireForm<'_> {
        match self {
            AttributeValue::String(s) => WireForm::Text(Cow::Borrowed(s.as_bytes())),
            AttributeValue::Number(n) => WireForm::Text(Cow::Owned(n.to_string().into_bytes())),
            AttributeValue::Jid(jid) => WireForm::Text(Cow::Owned(jid.to_string().into_bytes())),
            AttributeValue::Bytes(bytes) => WireForm::Text(Cow::Borrowed(bytes)),
            // An empty list shares its tag with the empty string
            AttributeValue::Nodes(nodes) if nodes.is_empty() => WireForm::Text(Cow::Borrowed(&[])),
            AttributeValue::Nodes(nodes) => WireForm::List(nodes),
        }
    }

    /// Textual form of scalar values
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            AttributeValue::String(s) => Some(Cow::Borrowed(s)),
            AttributeValue::Number(n) => Some(Cow::Owned(n.to_string())),
            AttributeValue::Jid(jid) => Some(Cow::Owned(jid.to_string())),
            AttributeValue::Bytes(bytes) => Some(String::from_utf8_lossy(bytes)),
            AttributeValue::Nodes(_) => None,
        }
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self.wire_form(), other.wire_form()) {
            (WireForm::Text(a), WireForm::Text(b)) => a == b,
            (WireForm::List(a), WireForm::List(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::Number(i64::from(value))
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        i64::try_from(value)
            .map(AttributeValue::Number)
            .unwrap_or_else(|_| AttributeValue::String(value.to_string()))
    }
}

impl From<Jid> for AttributeValue {
    fn from(value: Jid) -> Self {
        AttributeValue::Jid(value)
    }
}

impl From<&Jid> for AttributeValue {
    fn from(value: &Jid) -> Self {
        AttributeValue::Jid(value.clone())
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(value: Vec<u8>) -> Self {
        AttributeValue::Bytes(value)
    }
}

// ----------------------------------------------------------------------------
// Attributes
// ----------------------------------------------------------------------------

/// Insertion-ordered attribute map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(SmallVec<[(String, AttributeValue); 4]>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, keeping the original position on replace
    pub fn insert<K: Into<String>>(&mut self, key: K, value: AttributeValue) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Node
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    Bytes(Vec<u8>),
    Nodes(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub description: String,
    pub attributes: Attributes,
    pub content: Option<NodeContent>,
}

impl Node {
    pub fn builder<T: Into<String>>(description: T) -> NodeBuilder {
        NodeBuilder::new(description)
    }

    pub fn tag(&self) -> &str {
        &self.description
    }

    pub fn attr(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// String attribute in textual form (numbers and JIDs are rendered)
    pub fn attr_str(&self, key: &str) -> Option<Cow<'_, str>> {
        self.attributes.get(key)?.as_text()
    }

    /// Attribute parsed as a JID. `Ok(None)` when absent.
    pub fn attr_jid(&self, key: &str) -> Result<Option<Jid>, AddressError> {
        match self.attributes.get(key) {
            None => Ok(None),
            Some(AttributeValue::Jid(jid)) => Ok(Some(jid.clone())),
            Some(other) => match other.as_text() {
                Some(text) => Jid::parse(&text).map(Some),
                None => Err(AddressError::malformed(key, "attribute is a node list")),
            },
        }
    }

    pub fn attr_u64(&self, key: &str) -> Option<u64> {
        match self.attributes.get(key)? {
            AttributeValue::Number(n) => u64::try_from(*n).ok(),
            other => other.as_text()?.parse().ok(),
        }
    }

    /// Child nodes; empty when the content is bytes or absent
    pub fn children(&self) -> &[Node] {
        match &self.content {
            Some(NodeContent::Nodes(nodes)) => nodes,
            _ => &[],
        }
    }

    pub fn child(&self, tag: &str) -> Option<&Node> {
        self.children().iter().find(|n| n.description == tag)
    }

    pub fn children_by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children().iter().filter(move |n| n.description == tag)
    }

    /// Follow a path of child tags
    pub fn child_path(&self, path: &[&str]) -> Option<&Node> {
        path.iter().try_fold(self, |node, tag| node.child(tag))
    }

    pub fn content_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            Some(NodeContent::Bytes(bytes)) => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.description)?;
        for (key, value) in self.attributes.iter() {
            match value.as_text() {
                Some(text) => write!(f, " {key}=\"{text}\"")?,
                None => write!(f, " {key}=[..]")?,
            }
        }
        match &self.content {
            None => write!(f, "/>"),
            Some(NodeContent::Bytes(bytes)) => {
                let shown = &bytes[..bytes.len().min(32)];
                write!(f, ">{}", hex::encode(shown))?;
                if bytes.len() > shown.len() {
                    write!(f, "..({} bytes)", bytes.len())?;
                }
                write!(f, "</{}>", self.description)
            }
            Some(NodeContent::Nodes(nodes)) => {
                write!(f, ">")?;
                for node in nodes {
                    write!(f, "{node}")?;
                }
                write!(f, "</{}>", self.description)
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

/// Fluent constructor for [`Node`]
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    description: String,
    attributes: Attributes,
    content: Option<NodeContent>,
}

impl NodeBuilder {
    pub fn new<T: Into<String>>(description: T) -> Self {
        Self {
            description: description.into(),
            attributes: Attributes::new(),
            content: None,
        }
    }

    pub fn attr<K: Into<String>, V: Into<AttributeValue>>(mut self, key: K, value: V) -> Self {
        self.attributes.insert(key, value.into());
        self
    }

    /// Set the attribute only when a value is present
    pub fn opt_attr<K: Into<String>, V: Into<AttributeValue>>(self, key: K, value: Option<V>) -> Self {
        match value {
            Some(value) => self.attr(key, value),
            None => self,
        }
    }

    pub fn children<I: IntoIterator<Item = Node>>(mut self, children: I) -> Self {
        self.content = Some(NodeContent::Nodes(children.into_iter().collect()));
        self
    }

    pub fn child(mut self, child: Node) -> Self {
        match &mut self.content {
            Some(NodeContent::Nodes(nodes)) => nodes.push(child),
            _ => self.content = Some(NodeContent::Nodes(vec![child])),
        }
        self
    }

    pub fn bytes<B: Into<Vec<u8>>>(mut self, bytes: B) -> Self {
        self.content = Some(NodeContent::Bytes(bytes.into()));
        self
    }

    pub fn build(self) -> Node {
        Node {
            description: self.description,
            attributes: self.attributes,
            content: self.content,
        }
    }
}
