//! The nested key/value group model.
//!
//! A [`Group`] holds ordered named attributes and ordered named child
//! groups. Paths are `/`-separated child names relative to a root; the
//! empty path is the root itself.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Attr {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    StrArray(Vec<String>),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl Attr {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attr::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attr::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attr::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int_array(&self) -> Option<&[i64]> {
        match self {
            Attr::IntArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_array(&self) -> Option<&[String]> {
        match self {
            Attr::StrArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Attr::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// A node of the group tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub attrs: IndexMap<String, Attr>,
    pub groups: IndexMap<String, Group>,
}

impl Group {
    pub fn new() -> Self {
        Group::default()
    }

    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.get(name)
    }

    pub fn set_attr(&mut self, name: &str, attr: Attr) {
        self.attrs.insert(name.to_string(), attr);
    }

    pub fn with_attr(mut self, name: &str, attr: Attr) -> Self {
        self.set_attr(name, attr);
        self
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// The child `name`, created empty if missing.
    pub fn ensure_group(&mut self, name: &str) -> &mut Group {
        self.groups.entry(name.to_string()).or_default()
    }

    pub fn with_group(mut self, name: &str, group: Group) -> Self {
        self.groups.insert(name.to_string(), group);
        self
    }

    pub fn get_path(&self, path: &str) -> Option<&Group> {
        split_path(path)
            .into_iter()
            .try_fold(self, |group, name| group.groups.get(name))
    }

    pub fn get_path_mut(&mut self, path: &str) -> Option<&mut Group> {
        split_path(path)
            .into_iter()
            .try_fold(self, |group, name| group.groups.get_mut(name))
    }

    /// The group at `path`, creating every missing ancestor.
    pub fn ensure_path(&mut self, path: &str) -> &mut Group {
        split_path(path)
            .into_iter()
            .fold(self, |group, name| group.ensure_group(name))
    }

    /// Detaches and returns the group at `path`. The root cannot be removed.
    pub fn remove_path(&mut self, path: &str) -> Option<Group> {
        let parts = split_path(path);
        let (last, parents) = parts.split_last()?;
        let mut group = self;
        for name in parents {
            group = group.groups.get_mut(*name)?;
        }
        group.groups.shift_remove(*last)
    }

    /// Number of groups in this subtree, including this one.
    pub fn count_groups(&self) -> usize {
        1 + self.groups.values().map(Group::count_groups).sum::<usize>()
    }
}

/// Non-empty components of a `/`-separated path.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|p| !p.is_empty()).collect()
}

/// Canonical form of a path: no leading, trailing or doubled slashes.
pub fn normalize_path(path: &str) -> String {
    split_path(path).join("/")
}

pub fn join_path(parent: &str, name: &str) -> String {
    let parent = normalize_path(parent);
    if parent.is_empty() {
        normalize_path(name)
    } else {
        format!("{parent}/{}", normalize_path(name))
    }
}
