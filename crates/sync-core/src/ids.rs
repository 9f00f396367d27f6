//! Template and index identifiers — the two content-addressed DAGs described
//! in spec §3. IDs are opaque `u64` newtypes; ID `1` is reserved for each
//! DAG's root and is never returned by `PaidRegistry::allocate`.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexId(pub u64);

impl TemplateId {
    pub const ROOT: TemplateId = TemplateId(1);
}

impl IndexId {
    pub const ROOT: IndexId = IndexId(1);
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structural kind of a template DAG edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChildType {
    Single,
    Set,
    Intersection,
}

impl fmt::Display for ChildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChildType::Single => "single",
            ChildType::Set => "set",
            ChildType::Intersection => "intersection",
        };
        f.write_str(s)
    }
}

/// A node in the template DAG. Content-addressed by
/// `(parent_id, child_type, child_name, referred_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TemplateEntry {
    pub parent_id: TemplateId,
    pub child_type: ChildType,
    pub child_name: String,
    pub referred_id: Option<TemplateId>,
}

impl TemplateEntry {
    pub fn new(
        parent_id: TemplateId,
        child_type: ChildType,
        child_name: impl Into<String>,
        referred_id: Option<TemplateId>,
    ) -> Self {
        Self { parent_id, child_type, child_name: child_name.into(), referred_id }
    }

    /// Canonical key per spec §4.2: `"parentId:childType:childName[:referredId]"`.
    pub fn canonical_key(&self) -> String {
        match self.referred_id {
            Some(referred) => format!(
                "{}:{}:{}:{}",
                self.parent_id.0, self.child_type, self.child_name, referred.0
            ),
            None => format!("{}:{}:{}", self.parent_id.0, self.child_type, self.child_name),
        }
    }
}

/// A node in the index DAG. Exactly one of `append`/`compose` is set.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Append(String),
    Compose(IndexId),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    pub prefix_id: IndexId,
    pub kind: IndexKind,
}

impl IndexEntry {
    pub fn append(prefix_id: IndexId, discriminator: impl Into<String>) -> Self {
        Self { prefix_id, kind: IndexKind::Append(discriminator.into()) }
    }

    pub fn compose(prefix_id: IndexId, composed: IndexId) -> Self {
        Self { prefix_id, kind: IndexKind::Compose(composed) }
    }

    /// Canonical key per spec §4.2: `"prefixId:<urlencoded-append>"` or
    /// `"prefixId;composeId"`.
    pub fn canonical_key(&self) -> String {
        match &self.kind {
            IndexKind::Append(discriminator) => {
                format!("{}:{}", self.prefix_id.0, urlencoding::encode(discriminator))
            }
            IndexKind::Compose(composed) => format!("{};{}", self.prefix_id.0, composed.0),
        }
    }
}

/// `(templateId, indexId, path)` — the key space for application state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementIdent {
    pub template_id: TemplateId,
    pub index_id: IndexId,
    pub path: String,
}

impl ElementIdent {
    pub fn new(template_id: TemplateId, index_id: IndexId, path: impl Into<String>) -> Self {
        Self { template_id, index_id, path: path.into() }
    }
}

impl fmt::Display for ElementIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.template_id.0, self.index_id.0, self.path)
    }
}
