//! Ordered document tree shared by both OFX dialects.
//!
//! A parsed file is a tree of [`Node`]s: scalars at the leaves, records for
//! tagged aggregates and sequences for repeated aggregates. Records keep
//! insertion order because both serializers replay it.

use std::fmt;

use chrono::NaiveDateTime;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// Name of the single root aggregate of every OFX body.
pub const ROOT_TAG: &str = "OFX";

/// Rendering of coerced OFX timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfxVersion {
    /// Tag-stream (SGML-like) dialect.
    V1,
    /// XML dialect.
    V2,
}

impl OfxVersion {
    pub fn number(self) -> u8 {
        match self {
            OfxVersion::V1 => 1,
            OfxVersion::V2 => 2,
        }
    }
}

impl fmt::Display for OfxVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    Text(String),
    /// Timestamp already converted to the target timezone.
    Timestamp(NaiveDateTime),
    Null,
}

impl Scalar {
    pub fn text(value: impl Into<String>) -> Self {
        Scalar::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(s) => f.write_str(s),
            Scalar::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
            Scalar::Null => Ok(()),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Text(s) => serializer.serialize_str(s),
            Scalar::Timestamp(_) => serializer.collect_str(self),
            Scalar::Null => serializer.serialize_none(),
        }
    }
}

/// One step of a structural path: a field name or a position in a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Name(String),
    Index(usize),
}

impl Segment {
    pub fn name(name: impl Into<String>) -> Self {
        Segment::Name(name.into())
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Name(name) => f.write_str(name),
            Segment::Index(i) => write!(f, "{i}"),
        }
    }
}

/// Ordered field map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Node)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.position(name).map(|i| &self.fields[i].1)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Node> {
        let i = self.position(name)?;
        Some(&mut self.fields[i].1)
    }

    /// Text of a scalar field, if present.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_scalar()?.as_text()
    }

    /// Set a field, keeping its position when it already exists.
    pub fn insert(&mut self, name: impl Into<String>, node: Node) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.fields[i].1 = node,
            None => self.fields.push((name, node)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Node> {
        let i = self.position(name)?;
        Some(self.fields.remove(i).1)
    }

    /// Field node, created as an empty record when missing.
    pub fn entry(&mut self, name: &str) -> &mut Node {
        let i = match self.position(name) {
            Some(i) => i,
            None => {
                self.fields.push((name.to_string(), Node::Record(Record::new())));
                self.fields.len() - 1
            }
        };
        &mut self.fields[i].1
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Node)> {
        self.fields.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(k, _)| k == name)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    Record(Record),
    Sequence(Vec<Node>),
}

impl Node {
    pub fn text(value: impl Into<String>) -> Self {
        Node::Scalar(Scalar::text(value))
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Node::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Node::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Node::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Node]> {
        match self {
            Node::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Node at a structural path relative to this one.
    pub fn at(&self, path: &[Segment]) -> Option<&Node> {
        let mut cursor = self;
        for segment in path {
            cursor = match (segment, cursor) {
                (Segment::Name(name), Node::Record(r)) => r.get(name)?,
                (Segment::Index(i), Node::Sequence(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(cursor)
    }

    pub fn at_mut(&mut self, path: &[Segment]) -> Option<&mut Node> {
        let mut cursor = self;
        for segment in path {
            cursor = match (segment, cursor) {
                (Segment::Name(name), Node::Record(r)) => r.get_mut(name)?,
                (Segment::Index(i), Node::Sequence(items)) => items.get_mut(*i)?,
                _ => return None,
            };
        }
        Some(cursor)
    }

    /// This node as a record, replacing it when it is anything else.
    pub(crate) fn vivify_record(&mut self) -> &mut Record {
        if !matches!(self, Node::Record(_)) {
            *self = Node::Record(Record::new());
        }
        match self {
            Node::Record(r) => r,
            _ => unreachable!("node was just made a record"),
        }
    }

    /// This node as a sequence, replacing it when it is anything else.
    /// Intermediate nodes start as empty records, so the first index
    /// written under a field turns it into a sequence.
    pub(crate) fn vivify_sequence(&mut self) -> &mut Vec<Node> {
        if !matches!(self, Node::Sequence(_)) {
            *self = Node::Sequence(Vec::new());
        }
        match self {
            Node::Sequence(items) => items,
            _ => unreachable!("node was just made a sequence"),
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Scalar(s) => s.serialize(serializer),
            Node::Record(r) => r.serialize(serializer),
            Node::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// Ordered header block, kept apart from the body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    entries: Vec<(String, Scalar)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Scalar) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// A parsed OFX file: dialect, header block and the body under `<OFX>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOfx {
    pub version: OfxVersion,
    pub headers: Headers,
    pub document: Node,
}

impl ParsedOfx {
    /// Pretty JSON of the form `{"headers": {...}, "OFX": {...}}`.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for ParsedOfx {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("headers", &self.headers)?;
        map.serialize_entry(ROOT_TAG, &self.document)?;
        map.end()
    }
}
