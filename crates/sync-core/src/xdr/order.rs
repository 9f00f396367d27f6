//! DAG-first declaration ordering, shared by the live `define` control
//! message path ([`crate::xdr::codec`]) and the file-export codec
//! ([`crate::xdr::memory`]). Neither path can replay a definition before
//! its own parents are known, so both funnel through
//! [`new_template_declarations`]/[`new_index_declarations`].

use crate::ids::{ChildType, IndexId, IndexKind, TemplateId};
use crate::paid::PaidLookup;
use std::collections::HashSet;

/// One entry of a `define` message's `list`, or one row of an export
/// file's `template`/`index` array.
#[derive(Clone, Debug, PartialEq)]
pub enum DefEntry {
    Template {
        id: TemplateId,
        parent_id: TemplateId,
        child_type: ChildType,
        child_name: String,
        referred_id: Option<TemplateId>,
    },
    Index {
        id: IndexId,
        prefix_id: IndexId,
        append: Option<String>,
        compose: Option<IndexId>,
    },
}

/// Every template ancestor of `id` not already in `declared`, root-first,
/// followed by `id` itself if it was not already declared. Marks
/// everything it returns as declared in `declared` as it goes, so repeated
/// calls across a batch of wanted IDs never emit the same entry twice.
pub fn new_template_declarations(
    registry: &dyn PaidLookup,
    id: TemplateId,
    declared: &mut HashSet<TemplateId>,
    out: &mut Vec<DefEntry>,
) {
    if id == TemplateId::ROOT || declared.contains(&id) {
        return;
    }
    declared.insert(id);
    if let Some(entry) = registry.template_entry(id) {
        new_template_declarations(registry, entry.parent_id, declared, out);
        if let Some(referred) = entry.referred_id {
            new_template_declarations(registry, referred, declared, out);
        }
        out.push(DefEntry::Template {
            id,
            parent_id: entry.parent_id,
            child_type: entry.child_type,
            child_name: entry.child_name,
            referred_id: entry.referred_id,
        });
    }
}

/// Index-DAG counterpart of [`new_template_declarations`]; an index may
/// depend on both its `prefixId` and, for `compose` entries, another
/// index.
pub fn new_index_declarations(
    registry: &dyn PaidLookup,
    id: IndexId,
    declared: &mut HashSet<IndexId>,
    out: &mut Vec<DefEntry>,
) {
    if id == IndexId::ROOT || declared.contains(&id) {
        return;
    }
    declared.insert(id);
    if let Some(entry) = registry.index_entry(id) {
        new_index_declarations(registry, entry.prefix_id, declared, out);
        let (append, compose) = match &entry.kind {
            IndexKind::Append(discriminator) => (Some(discriminator.clone()), None),
            IndexKind::Compose(composed) => {
                new_index_declarations(registry, *composed, declared, out);
                (None, Some(*composed))
            }
        };
        out.push(DefEntry::Index { id, prefix_id: entry.prefix_id, append, compose });
    }
}
