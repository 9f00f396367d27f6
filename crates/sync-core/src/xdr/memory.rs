//! File-export/import codec: the same wire form as the live protocol,
//! targeting a single in-memory JSON document instead of a connection
//! (spec §4.3, "memory codec"). Shares declaration ordering with the live
//! path via [`crate::xdr::order`], but keeps its own translation maps
//! since there is no persistent connection to hold them.

use super::order::{new_index_declarations, new_template_declarations, DefEntry};
use super::wire;
use crate::error::{Result, SyncError};
use crate::ids::{ChildType, IndexEntry, IndexId, TemplateId};
use crate::paid::PaidRegistry;
use crate::value::{AttributeMap, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateDefJson {
    #[serde(rename = "templateId")]
    pub template_id: u64,
    #[serde(rename = "parentId")]
    pub parent_id: u64,
    #[serde(rename = "childType")]
    pub child_type: String,
    #[serde(rename = "childName")]
    pub child_name: String,
    #[serde(rename = "referredId", skip_serializing_if = "Option::is_none")]
    pub referred_id: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexDefJson {
    #[serde(rename = "indexId")]
    pub index_id: u64,
    #[serde(rename = "prefixId")]
    pub prefix_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportElement {
    pub ident: String,
    pub value: serde_json::Value,
}

/// `{template: [...], index: [...], data: [xdrAppStateElement]}` — the
/// export file shape from spec §6.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExportFile {
    pub template: Vec<TemplateDefJson>,
    pub index: Vec<IndexDefJson>,
    pub data: Vec<ExportElement>,
}

pub(crate) fn child_type_to_str(ty: ChildType) -> &'static str {
    match ty {
        ChildType::Single => "single",
        ChildType::Set => "set",
        ChildType::Intersection => "intersection",
    }
}

pub(crate) fn parse_child_type(s: &str) -> Result<ChildType> {
    match s {
        "single" => Ok(ChildType::Single),
        "set" => Ok(ChildType::Set),
        "intersection" => Ok(ChildType::Intersection),
        other => Err(SyncError::decode(format!("unknown childType {other:?}"))),
    }
}

/// Dumps the full registry plus `elements` to an [`ExportFile`], in
/// DAG-first declare-before-use order.
pub fn export(registry: &PaidRegistry, elements: &[(String, Value)]) -> ExportFile {
    let mut declared_templates = std::collections::HashSet::new();
    let mut declared_indices = std::collections::HashSet::new();
    let mut defs = Vec::new();
    for (id, _) in registry.all_templates() {
        new_template_declarations(registry, id, &mut declared_templates, &mut defs);
    }
    for (id, _) in registry.all_indices() {
        new_index_declarations(registry, id, &mut declared_indices, &mut defs);
    }

    let mut template = Vec::new();
    let mut index = Vec::new();
    for def in defs {
        match def {
            DefEntry::Template { id, parent_id, child_type, child_name, referred_id } => {
                template.push(TemplateDefJson {
                    template_id: id.0,
                    parent_id: parent_id.0,
                    child_type: child_type_to_str(child_type).to_string(),
                    child_name,
                    referred_id: referred_id.map(|r| r.0),
                });
            }
            DefEntry::Index { id, prefix_id, append, compose } => {
                index.push(IndexDefJson {
                    index_id: id.0,
                    prefix_id: prefix_id.0,
                    append,
                    compose: compose.map(|c| c.0),
                });
            }
        }
    }

    let data = elements
        .iter()
        .map(|(ident, value)| ExportElement { ident: ident.clone(), value: wire::to_json(value) })
        .collect();

    ExportFile { template, index, data }
}

/// Replays `file`'s definitions into `registry` (assigning possibly-new
/// local IDs), then unmarshals `data`, returning `(ident, Value)` pairs
/// with element references translated to the freshly-assigned local IDs.
pub fn import(registry: &PaidRegistry, file: &ExportFile) -> Result<Vec<(String, Value)>> {
    let mut template_map: HashMap<u64, TemplateId> = HashMap::new();
    let mut index_map: HashMap<u64, IndexId> = HashMap::new();

    for def in &file.template {
        let parent_id = resolve_template(&template_map, def.parent_id)?;
        let referred_id = match def.referred_id {
            Some(r) => Some(resolve_template(&template_map, r)?),
            None => None,
        };
        let child_type = parse_child_type(&def.child_type)?;
        let local_id = registry.get_template_by_entry(parent_id, child_type, def.child_name.clone(), referred_id);
        template_map.insert(def.template_id, local_id);
    }

    for def in &file.index {
        let prefix_id = resolve_index(&index_map, def.prefix_id)?;
        let entry = match (&def.append, def.compose) {
            (Some(discriminator), None) => IndexEntry::append(prefix_id, discriminator.clone()),
            (None, Some(composed)) => {
                let local_composed = resolve_index(&index_map, composed)?;
                IndexEntry::compose(prefix_id, local_composed)
            }
            _ => {
                return Err(SyncError::decode("index definition must set exactly one of append/compose"))
            }
        };
        let local_id = registry.get_index_by_entry(entry);
        index_map.insert(def.index_id, local_id);
    }

    file.data
        .iter()
        .map(|elem| {
            let value = wire::from_json(&elem.value)?;
            let translated = translate(value, &template_map, &index_map)?;
            Ok((elem.ident.clone(), translated))
        })
        .collect()
}

fn resolve_template(map: &HashMap<u64, TemplateId>, remote: u64) -> Result<TemplateId> {
    if remote == TemplateId::ROOT.0 {
        return Ok(TemplateId::ROOT);
    }
    map.get(&remote).copied().ok_or_else(|| SyncError::undeclared_id("template", remote))
}

fn resolve_index(map: &HashMap<u64, IndexId>, remote: u64) -> Result<IndexId> {
    if remote == IndexId::ROOT.0 {
        return Ok(IndexId::ROOT);
    }
    map.get(&remote).copied().ok_or_else(|| SyncError::undeclared_id("index", remote))
}

fn translate(
    value: Value,
    template_map: &HashMap<u64, TemplateId>,
    index_map: &HashMap<u64, IndexId>,
) -> Result<Value> {
    match value {
        Value::ElementReference { template_id, index_id } => Ok(Value::ElementReference {
            template_id: resolve_template(template_map, template_id.0)?,
            index_id: resolve_index(index_map, index_id.0)?,
        }),
        Value::Sequence(items) => Ok(Value::Sequence(
            items.into_iter().map(|v| translate(v, template_map, index_map)).collect::<Result<_>>()?,
        )),
        Value::Negation(items) => Ok(Value::Negation(
            items.into_iter().map(|v| translate(v, template_map, index_map)).collect::<Result<_>>()?,
        )),
        Value::ComparisonFunction { terms, direction } => Ok(Value::ComparisonFunction {
            terms: terms.into_iter().map(|v| translate(v, template_map, index_map)).collect::<Result<_>>()?,
            direction,
        }),
        Value::Range { lo, hi, lo_inclusive, hi_inclusive } => Ok(Value::Range {
            lo: Box::new(translate(*lo, template_map, index_map)?),
            hi: Box::new(translate(*hi, template_map, index_map)?),
            lo_inclusive,
            hi_inclusive,
        }),
        Value::AttributeValue(map) => {
            let mut translated = AttributeMap::new();
            for (k, v) in map.iter() {
                translated.insert(k.clone(), translate(v.clone(), template_map, index_map)?);
            }
            Ok(Value::AttributeValue(translated))
        }
        other => Ok(other),
    }
}
