//
// walker.rs
// Dicom-Deid-rs
//
// Recursive search and replace over a DICOM dataset, descending into every sequence item at any depth.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;

use dicom::core::dictionary::DataDictionary;
use dicom::core::value::{DataSetSequence, Value};
use dicom::core::{DataElement, Length, PrimitiveValue, Tag};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::InMemDicomObject;

/// A decoded dataset (or a sequence item, which has the same shape).
pub type Record = InMemDicomObject<StandardDataDictionary>;

/// Keyword -> replacement text.
pub type Replacements = BTreeMap<String, String>;

/// Dictionary keyword for a tag. Private and unknown tags have none.
pub fn keyword_of(tag: Tag) -> Option<&'static str> {
    StandardDataDictionary.by_tag(tag).map(|e| e.alias)
}

/// Every value held by `keyword`, at any depth, in pre-order.
///
/// Sequence elements are never collected themselves; their items are searched instead.
pub fn collect(record: &Record, keyword: &str) -> Vec<String> {
    let mut found = Vec::new();
    collect_into(record, keyword, &mut found);
    found
}

fn collect_into(record: &Record, keyword: &str, found: &mut Vec<String>) {
    for elem in record.iter() {
        match elem.value() {
            Value::Sequence(seq) => {
                for item in seq.items() {
                    collect_into(item, keyword, found);
                }
            }
            _ => {
                if keyword_of(elem.header().tag) != Some(keyword) {
                    continue;
                }
                // Binary values cannot be compared as text, so they are not reported.
                if let Ok(text) = elem.to_str() {
                    found.push(clean(&text));
                }
            }
        }
    }
}

/// Value of `keyword` in the top level only.
pub fn top_level(record: &Record, keyword: &str) -> Option<String> {
    record
        .iter()
        .filter(|e| !matches!(e.value(), Value::Sequence(_)))
        .find(|e| keyword_of(e.header().tag) == Some(keyword))
        .and_then(|e| e.to_str().ok())
        .map(|text| clean(&text))
}

/// Overwrite every occurrence of every mapped keyword, at any depth.
///
/// Items are rewritten before the sequence holding them is considered. A mapped
/// keyword that names a sequence is emptied, since a sequence cannot hold text.
pub fn replace(record: &mut Record, mapping: &Replacements) {
    let elements: Vec<_> = std::mem::replace(record, Record::new_empty())
        .into_iter()
        .collect();

    for elem in elements {
        let tag = elem.header().tag;
        let vr = elem.vr();
        let replacement = keyword_of(tag).and_then(|k| mapping.get(k));
        let items = elem.items().map(|items| items.to_vec());

        let rebuilt = match (items, replacement) {
            (Some(_), Some(_)) => DataElement::new(tag, vr, sequence_of(Vec::new())),
            (Some(mut items), None) => {
                for item in items.iter_mut() {
                    replace(item, mapping);
                }
                DataElement::new(tag, vr, sequence_of(items))
            }
            (None, Some(value)) => DataElement::new(tag, vr, text_value(value)),
            (None, None) => elem,
        };
        record.put(rebuilt);
    }
}

fn sequence_of<P>(items: Vec<Record>) -> Value<Record, P> {
    Value::Sequence(DataSetSequence::new(items, Length::UNDEFINED))
}

pub(crate) fn text_value(value: &str) -> PrimitiveValue {
    if value.is_empty() {
        PrimitiveValue::Empty
    } else {
        PrimitiveValue::from(value)
    }
}

fn clean(text: &str) -> String {
    text.trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}
