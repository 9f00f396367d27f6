//! Pure logic behind the `dbio` binary (`src/main.rs`), split out so the
//! merge/describe rules can be unit tested without touching the
//! filesystem.

use std::collections::BTreeMap;
use sync_core::xdr::memory::{export, import, ExportFile};
use sync_core::{PaidRegistry, Result, Value};

/// Decodes every element in `file` against a fresh registry, translating
/// template/index references to the freshly-assigned local IDs.
pub fn decode(file: &ExportFile) -> Result<Vec<(String, Value)>> {
    let registry = PaidRegistry::new();
    import(&registry, file)
}

/// Re-encodes `elements` into a canonical, self-contained [`ExportFile`]:
/// every template/index the elements reference is declared in
/// declare-before-use order, regardless of what order the caller built
/// `elements` in.
pub fn encode(elements: &[(String, Value)]) -> ExportFile {
    let registry = PaidRegistry::new();
    export(&registry, elements)
}

/// Merges `incoming` on top of `base` by identifier — `incoming` wins on
/// collision — then re-encodes the result. `base: None` is equivalent to
/// an empty store (the `--override` CLI flag).
pub fn merge(base: Option<&ExportFile>, incoming: &ExportFile) -> Result<ExportFile> {
    let mut merged: BTreeMap<String, Value> = BTreeMap::new();
    if let Some(base) = base {
        for (ident, value) in decode(base)? {
            merged.insert(ident, value);
        }
    }
    for (ident, value) in decode(incoming)? {
        merged.insert(ident, value);
    }
    let elements: Vec<(String, Value)> = merged.into_iter().collect();
    Ok(encode(&elements))
}

/// One `ident => value` display line, sorted by identifier, as printed by
/// `dbio print`.
pub fn describe_lines(file: &ExportFile) -> Result<Vec<String>> {
    let mut elements = decode(file)?;
    elements.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(elements.into_iter().map(|(ident, value)| format!("{ident} => {value:?}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{ChildType, TemplateId};

    fn element_with_template(ident: &str, n: f64) -> (Vec<(String, Value)>, ExportFile) {
        let registry = PaidRegistry::new();
        let template =
            registry.get_template_by_entry(TemplateId::ROOT, ChildType::Single, "context", None);
        let index = sync_core::IndexId::ROOT;
        let elements = vec![(
            ident.to_string(),
            Value::AttributeValue(
                [("x".to_string(), Value::number(n)), ("ref".to_string(), Value::ElementReference {
                    template_id: template,
                    index_id: index,
                })]
                .into_iter()
                .collect(),
            ),
        )];
        let file = export(&registry, &elements);
        (elements, file)
    }

    #[test]
    fn clear_then_decode_is_empty() {
        let cleared = ExportFile::default();
        assert!(decode(&cleared).unwrap().is_empty());
    }

    #[test]
    fn encode_decode_round_trips_element_references() {
        let (original, file) = element_with_template("1:1:context.x", 42.0);
        let decoded = decode(&file).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].0, original[0].0);
        assert_eq!(decoded[0].1, original[0].1);
    }

    #[test]
    fn merge_incoming_wins_on_collision() {
        let (_, base) = element_with_template("7:1:a", 1.0);
        let (_, incoming) = element_with_template("7:1:a", 2.0);
        let merged = merge(Some(&base), &incoming).unwrap();
        let decoded = decode(&merged).unwrap();
        assert_eq!(decoded.len(), 1);
        match &decoded[0].1 {
            Value::AttributeValue(map) => assert_eq!(map.get("x"), Some(&Value::number(2.0))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn merge_union_preserves_disjoint_identifiers() {
        let (_, base) = element_with_template("7:1:a", 1.0);
        let (_, incoming) = element_with_template("7:1:b", 2.0);
        let merged = merge(Some(&base), &incoming).unwrap();
        let decoded = decode(&merged).unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn override_ignores_base_entirely() {
        let (_, base) = element_with_template("7:1:a", 1.0);
        let (_, incoming) = element_with_template("7:1:b", 2.0);
        let merged = merge(None, &incoming).unwrap();
        let decoded = decode(&merged).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].0, "7:1:b");

        let _ = base; // base never consulted when override-equivalent None is passed
    }

    #[test]
    fn describe_lines_sorted_by_identifier() {
        let (_, a) = element_with_template("2:1:z", 1.0);
        let (_, b) = element_with_template("2:1:a", 1.0);
        let merged = merge(Some(&a), &b).unwrap();
        let lines = describe_lines(&merged).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("2:1:a"));
        assert!(lines[1].starts_with("2:1:z"));
    }
}
