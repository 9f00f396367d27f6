//! In-memory `Value` ↔ wire JSON. Template/index IDs inside
//! [`Value::ElementReference`] are carried here as already-translated
//! `u64`s — translating between local and remote ID spaces is
//! [`crate::xdr::codec::XdrCodec`]'s job, not this module's.

use crate::error::{Result, SyncError};
use crate::ids::{IndexId, TemplateId};
use crate::value::{AttributeMap, Number, SortDirection, SubstringTerm, Value};
use serde_json::{json, Value as Json};

/// Primitives pass through as plain JSON; everything else is an object
/// tagged by `type` (spec §4.3).
pub fn to_json(value: &Value) -> Json {
    match value {
        Value::String(s) => Json::String(s.clone()),
        Value::Boolean(b) => Json::Bool(*b),
        Value::Null => Json::Null,
        Value::Number(n) if n.is_finite() => match n {
            Number::Finite(v) => json_number(*v),
            _ => unreachable!(),
        },
        Value::Number(n) => json!({ "type": "number", "text": n.text() }),
        Value::Undefined => json!({ "type": "undefined" }),
        Value::Sequence(items) => {
            json!({ "type": "orderedSet", "items": items.iter().map(to_json).collect::<Vec<_>>() })
        }
        Value::Range { lo, hi, lo_inclusive, hi_inclusive } => json!({
            "type": "range",
            "lo": to_json(lo),
            "hi": to_json(hi),
            "loInclusive": lo_inclusive,
            "hiInclusive": hi_inclusive,
        }),
        Value::AttributeValue(map) => json!({
            "type": "attributeValue",
            "value": attribute_map_to_json(map),
        }),
        Value::Negation(items) => {
            json!({ "type": "negation", "items": items.iter().map(to_json).collect::<Vec<_>>() })
        }
        Value::ComparisonFunction { terms, direction } => json!({
            "type": "comparisonFunction",
            "terms": terms.iter().map(to_json).collect::<Vec<_>>(),
            "direction": match direction {
                SortDirection::Ascending => "ascending",
                SortDirection::Descending => "descending",
            },
        }),
        Value::SubstringQuery(terms) => json!({
            "type": "subStringQuery",
            "terms": terms.iter().map(|t| match t {
                SubstringTerm::Literal(s) => json!({ "literal": s }),
                SubstringTerm::Regex(s) => json!({ "regex": s }),
            }).collect::<Vec<_>>(),
        }),
        Value::Projector => json!({ "type": "projector" }),
        Value::ElementReference { template_id, index_id } => json!({
            "type": "elementReference",
            "templateId": template_id.0,
            "indexId": index_id.0,
        }),
        Value::Delete => json!({ "type": "xdrDelete" }),
    }
}

fn json_number(v: f64) -> Json {
    serde_json::Number::from_f64(v).map(Json::Number).unwrap_or(Json::Null)
}

fn attribute_map_to_json(map: &AttributeMap) -> Json {
    let mut obj = serde_json::Map::new();
    for (k, v) in map.iter() {
        obj.insert(k.clone(), to_json(v));
    }
    Json::Object(obj)
}

pub fn from_json(json: &Json) -> Result<Value> {
    match json {
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Bool(b) => Ok(Value::Boolean(*b)),
        Json::Null => Ok(Value::Null),
        Json::Number(n) => {
            let v = n.as_f64().ok_or_else(|| SyncError::decode("number out of f64 range"))?;
            Ok(Value::Number(Number::finite(v)))
        }
        Json::Array(_) => Err(SyncError::decode("bare JSON array is not a valid wire value")),
        Json::Object(obj) => {
            let ty = obj
                .get("type")
                .and_then(Json::as_str)
                .ok_or_else(|| SyncError::decode("object value missing 'type' discriminator"))?;
            decode_tagged(ty, obj)
        }
    }
}

fn decode_tagged(ty: &str, obj: &serde_json::Map<String, Json>) -> Result<Value> {
    match ty {
        "undefined" => Ok(Value::Undefined),
        "number" => {
            let text = field_str(obj, "text")?;
            match text {
                "Infinity" => Ok(Value::Number(Number::Infinity)),
                "-Infinity" => Ok(Value::Number(Number::NegInfinity)),
                "NaN" => Ok(Value::Number(Number::NaN)),
                other => Err(SyncError::decode(format!("unexpected tagged number text {other:?}"))),
            }
        }
        "orderedSet" => {
            let items = field_array(obj, "items")?;
            Ok(Value::Sequence(items.iter().map(from_json).collect::<Result<_>>()?))
        }
        "range" => {
            let lo = from_json(obj.get("lo").ok_or_else(|| SyncError::decode("range missing lo"))?)?;
            let hi = from_json(obj.get("hi").ok_or_else(|| SyncError::decode("range missing hi"))?)?;
            let lo_inclusive = field_bool(obj, "loInclusive")?;
            let hi_inclusive = field_bool(obj, "hiInclusive")?;
            Ok(Value::Range { lo: Box::new(lo), hi: Box::new(hi), lo_inclusive, hi_inclusive })
        }
        "attributeValue" => {
            let value = obj
                .get("value")
                .and_then(Json::as_object)
                .ok_or_else(|| SyncError::decode("attributeValue missing 'value' object"))?;
            let mut map = AttributeMap::new();
            for (k, v) in value {
                map.insert(k.clone(), from_json(v)?);
            }
            Ok(Value::AttributeValue(map))
        }
        "negation" => {
            let items = field_array(obj, "items")?;
            Ok(Value::Negation(items.iter().map(from_json).collect::<Result<_>>()?))
        }
        "comparisonFunction" => {
            let terms = field_array(obj, "terms")?;
            let direction = match field_str(obj, "direction")? {
                "ascending" => SortDirection::Ascending,
                "descending" => SortDirection::Descending,
                other => return Err(SyncError::decode(format!("unknown sort direction {other:?}"))),
            };
            Ok(Value::ComparisonFunction {
                terms: terms.iter().map(from_json).collect::<Result<_>>()?,
                direction,
            })
        }
        "subStringQuery" => {
            let terms = field_array(obj, "terms")?;
            let terms = terms
                .iter()
                .map(|t| {
                    let t = t.as_object().ok_or_else(|| SyncError::decode("substring term not an object"))?;
                    if let Some(lit) = t.get("literal").and_then(Json::as_str) {
                        Ok(SubstringTerm::Literal(lit.to_string()))
                    } else if let Some(re) = t.get("regex").and_then(Json::as_str) {
                        Ok(SubstringTerm::Regex(re.to_string()))
                    } else {
                        Err(SyncError::decode("substring term missing 'literal'/'regex'"))
                    }
                })
                .collect::<Result<_>>()?;
            Ok(Value::SubstringQuery(terms))
        }
        "projector" => Ok(Value::Projector),
        "elementReference" => {
            let template_id = TemplateId(field_u64(obj, "templateId")?);
            let index_id = IndexId(field_u64(obj, "indexId")?);
            Ok(Value::ElementReference { template_id, index_id })
        }
        "xdrDelete" => Ok(Value::Delete),
        other => Err(SyncError::decode(format!("unknown wire value type {other:?}"))),
    }
}

fn field_str<'a>(obj: &'a serde_json::Map<String, Json>, key: &str) -> Result<&'a str> {
    obj.get(key)
        .and_then(Json::as_str)
        .ok_or_else(|| SyncError::decode(format!("missing string field '{key}'")))
}

fn field_bool(obj: &serde_json::Map<String, Json>, key: &str) -> Result<bool> {
    obj.get(key)
        .and_then(Json::as_bool)
        .ok_or_else(|| SyncError::decode(format!("missing bool field '{key}'")))
}

fn field_u64(obj: &serde_json::Map<String, Json>, key: &str) -> Result<u64> {
    obj.get(key)
        .and_then(Json::as_u64)
        .ok_or_else(|| SyncError::decode(format!("missing integer field '{key}'")))
}

fn field_array<'a>(obj: &'a serde_json::Map<String, Json>, key: &str) -> Result<&'a Vec<Json>> {
    obj.get(key)
        .and_then(Json::as_array)
        .ok_or_else(|| SyncError::decode(format!("missing array field '{key}'")))
}
