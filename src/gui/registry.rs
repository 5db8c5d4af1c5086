use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;

pub const TAG_LEN: usize = 4;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} tag {tag:?} is not four ASCII alphanumerics")]
    MalformedTag { kind: &'static str, tag: String },
    #[error("{kind} tag {tag} is used by both {existing} and {name}")]
    DuplicateTag {
        kind: &'static str,
        tag: String,
        existing: String,
        name: String,
    },
    #[error("{kind} {name} is already registered")]
    DuplicateName { kind: &'static str, name: String },
}

/// Something resolvable from the short tag embedded in callback tokens.
pub trait Registered {
    fn tag(&self) -> &str;
    fn name(&self) -> &str;
}

pub fn is_valid_tag(tag: &str) -> bool {
    tag.len() == TAG_LEN && tag.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Tag to class table. Registration fails on any tag or name clash.
pub struct Registry<T> {
    kind: &'static str,
    by_tag: HashMap<String, T>,
    names: HashSet<String>,
}

impl<T: Registered> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Registry {
            kind,
            by_tag: HashMap::new(),
            names: HashSet::new(),
        }
    }

    pub fn register(&mut self, item: T) -> Result<(), RegistryError> {
        let tag = item.tag().to_string();
        let name = item.name().to_string();
        if !is_valid_tag(&tag) {
            return Err(RegistryError::MalformedTag {
                kind: self.kind,
                tag,
            });
        }
        if self.names.contains(&name) {
            return Err(RegistryError::DuplicateName {
                kind: self.kind,
                name,
            });
        }
        if let Some(existing) = self.by_tag.get(&tag) {
            return Err(RegistryError::DuplicateTag {
                kind: self.kind,
                tag,
                existing: existing.name().to_string(),
                name,
            });
        }
        self.names.insert(name);
        self.by_tag.insert(tag, item);
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<&T> {
        self.by_tag.get(tag)
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("names", &self.names)
            .finish()
    }
}
