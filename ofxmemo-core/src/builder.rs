//! Builds a document tree from `(path, value)` assignments.

use tracing::debug;

use crate::alias::{AliasRules, Resolution};
use crate::coerce::{ParserOptions, coerce};
use crate::document::{Node, Record, Segment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Stored,
    /// An alias rule dropped a field on the path; nothing was written.
    Dropped,
}

enum Step {
    Field(String),
    Slot(usize),
}

pub struct DocumentBuilder<'a> {
    root: Node,
    aliases: &'a AliasRules,
    options: &'a ParserOptions,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(aliases: &'a AliasRules, options: &'a ParserOptions) -> Self {
        Self {
            root: Node::Record(Record::new()),
            aliases,
            options,
        }
    }

    /// Store the coerced `raw` value at `path`, creating intermediate records
    /// and sequence slots as needed.
    pub fn assign(&mut self, path: &[Segment], raw: &str) -> Assignment {
        // Aliases match on the logical path: names only, indexes skipped.
        let mut field_path: Vec<&str> = Vec::with_capacity(path.len());
        let mut steps = Vec::with_capacity(path.len());
        for segment in path {
            match segment {
                Segment::Name(name) => {
                    field_path.push(name);
                    match self.aliases.resolve(&field_path, name) {
                        Resolution::Drop => {
                            debug!(path = %field_path.join("/"), "alias dropped field");
                            return Assignment::Dropped;
                        }
                        Resolution::Keep(stored) => steps.push(Step::Field(stored)),
                    }
                }
                Segment::Index(i) => steps.push(Step::Slot(*i)),
            }
        }

        let mut cursor = &mut self.root;
        for step in &steps {
            cursor = match step {
                Step::Field(name) => cursor.vivify_record().entry(name),
                Step::Slot(i) => {
                    let items = cursor.vivify_sequence();
                    while items.len() <= *i {
                        items.push(Node::Record(Record::new()));
                    }
                    &mut items[*i]
                }
            };
        }
        *cursor = Node::Scalar(coerce(raw, self.options));
        Assignment::Stored
    }

    /// The top-level record holding every assigned root field.
    pub fn finish(self) -> Record {
        match self.root {
            Node::Record(r) => r,
            _ => Record::new(),
        }
    }
}
