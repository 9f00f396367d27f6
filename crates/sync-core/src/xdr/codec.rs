//! Per-connection XDR codec: marshals `Value`s to wire JSON with
//! declare-before-use template/index definitions, and unmarshals wire JSON
//! back, translating the peer's IDs through this connection's
//! remote→local map. See spec §4.3.

use super::order::{new_index_declarations, new_template_declarations, DefEntry};
use super::wire;
use crate::error::{Result, SyncError};
use crate::ids::{IndexEntry, IndexId, TemplateEntry, TemplateId};
use crate::paid::PaidLookup;
use crate::value::Value;
use serde_json::Value as Json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct XdrCodec {
    registry: Arc<dyn PaidLookup>,
    declared_templates: HashSet<TemplateId>,
    declared_indices: HashSet<IndexId>,
    remote_to_local_template: HashMap<u64, TemplateId>,
    remote_to_local_index: HashMap<u64, IndexId>,
}

impl XdrCodec {
    pub fn new(registry: Arc<dyn PaidLookup>) -> Self {
        Self {
            registry,
            declared_templates: HashSet::new(),
            declared_indices: HashSet::new(),
            remote_to_local_template: HashMap::new(),
            remote_to_local_index: HashMap::new(),
        }
    }

    /// Clears all declaration and translation state. Called on reconnect:
    /// a fresh connection (even to the same peer) cannot assume the peer
    /// remembers anything declared over the old one.
    pub fn reset(&mut self) {
        self.declared_templates.clear();
        self.declared_indices.clear();
        self.remote_to_local_template.clear();
        self.remote_to_local_index.clear();
    }

    /// Definitions that must be sent (in order) before `value`'s marshalled
    /// form, plus the marshalled form itself.
    pub fn marshal(&mut self, value: &Value) -> (Vec<DefEntry>, Json) {
        let defs = self.declarations_for(value);
        (defs, wire::to_json(value))
    }

    /// Same as [`XdrCodec::marshal`] but for a batch of values sharing one
    /// `define` message (the write/resourceUpdate message bodies carry
    /// several elements at once).
    pub fn marshal_batch(&mut self, values: &[&Value]) -> (Vec<DefEntry>, Vec<Json>) {
        let mut defs = Vec::new();
        for value in values {
            defs.extend(self.declarations_for(value));
        }
        let bodies = values.iter().map(|v| wire::to_json(v)).collect();
        (defs, bodies)
    }

    fn declarations_for(&mut self, value: &Value) -> Vec<DefEntry> {
        let mut defs = Vec::new();
        for (template_id, index_id) in value.referenced_ids() {
            new_template_declarations(&*self.registry, template_id, &mut self.declared_templates, &mut defs);
            new_index_declarations(&*self.registry, index_id, &mut self.declared_indices, &mut defs);
        }
        defs
    }

    /// Applies an inbound `define` list in order, growing the remote→local
    /// translation maps by invoking the local registry.
    pub fn apply_define(&mut self, list: &[DefEntry]) -> Result<()> {
        for entry in list {
            match entry {
                DefEntry::Template { id, parent_id, child_type, child_name, referred_id } => {
                    let local_parent = self.local_template(*parent_id)?;
                    let local_referred = match referred_id {
                        Some(r) => Some(self.local_template(*r)?),
                        None => None,
                    };
                    let local_id = self.registry.get_template_by_entry(
                        local_parent,
                        *child_type,
                        child_name.clone(),
                        local_referred,
                    );
                    self.remote_to_local_template.insert(id.0, local_id);
                }
                DefEntry::Index { id, prefix_id, append, compose } => {
                    let local_prefix = self.local_index(*prefix_id)?;
                    let kind_entry = match (append, compose) {
                        (Some(discriminator), None) => IndexEntry::append(local_prefix, discriminator.clone()),
                        (None, Some(composed)) => {
                            let local_composed = self.local_index(*composed)?;
                            IndexEntry::compose(local_prefix, local_composed)
                        }
                        _ => {
                            return Err(SyncError::decode(
                                "index definition must set exactly one of append/compose",
                            ))
                        }
                    };
                    let local_id = self.registry.get_index_by_entry(kind_entry);
                    self.remote_to_local_index.insert(id.0, local_id);
                }
            }
        }
        Ok(())
    }

    fn local_template(&self, remote: TemplateId) -> Result<TemplateId> {
        if remote == TemplateId::ROOT {
            return Ok(TemplateId::ROOT);
        }
        self.remote_to_local_template
            .get(&remote.0)
            .copied()
            .ok_or_else(|| SyncError::undeclared_id("template", remote.0))
    }

    fn local_index(&self, remote: IndexId) -> Result<IndexId> {
        if remote == IndexId::ROOT {
            return Ok(IndexId::ROOT);
        }
        self.remote_to_local_index
            .get(&remote.0)
            .copied()
            .ok_or_else(|| SyncError::undeclared_id("index", remote.0))
    }

    /// Decodes wire JSON back to a `Value`, translating any embedded
    /// element references through this connection's remote→local map.
    pub fn unmarshal(&self, json: &Json) -> Result<Value> {
        let value = wire::from_json(json)?;
        self.translate_inbound(value)
    }

    fn translate_inbound(&self, value: Value) -> Result<Value> {
        match value {
            Value::ElementReference { template_id, index_id } => Ok(Value::ElementReference {
                template_id: self.local_template(template_id)?,
                index_id: self.local_index(index_id)?,
            }),
            Value::Sequence(items) => Ok(Value::Sequence(
                items.into_iter().map(|v| self.translate_inbound(v)).collect::<Result<_>>()?,
            )),
            Value::Negation(items) => Ok(Value::Negation(
                items.into_iter().map(|v| self.translate_inbound(v)).collect::<Result<_>>()?,
            )),
            Value::ComparisonFunction { terms, direction } => Ok(Value::ComparisonFunction {
                terms: terms.into_iter().map(|v| self.translate_inbound(v)).collect::<Result<_>>()?,
                direction,
            }),
            Value::Range { lo, hi, lo_inclusive, hi_inclusive } => Ok(Value::Range {
                lo: Box::new(self.translate_inbound(*lo)?),
                hi: Box::new(self.translate_inbound(*hi)?),
                lo_inclusive,
                hi_inclusive,
            }),
            Value::AttributeValue(map) => {
                let mut translated = crate::value::AttributeMap::new();
                for (k, v) in map.iter() {
                    translated.insert(k.clone(), self.translate_inbound(v.clone())?);
                }
                Ok(Value::AttributeValue(translated))
            }
            other => Ok(other),
        }
    }

    /// Every declared (local) template/index entry, in declare-before-use
    /// order, for use by the file-export codec which shares this
    /// ordering rule without a live connection's incremental state.
    pub fn declared_template_entries(&self, registry: &dyn PaidLookup) -> Vec<(TemplateId, TemplateEntry)> {
        self.declared_templates
            .iter()
            .filter_map(|id| registry.template_entry(*id).map(|e| (*id, e)))
            .collect()
    }

    pub fn declared_index_entries(&self, registry: &dyn PaidLookup) -> Vec<(IndexId, IndexEntry)> {
        self.declared_indices
            .iter()
            .filter_map(|id| registry.index_entry(*id).map(|e| (*id, e)))
            .collect()
    }
}
