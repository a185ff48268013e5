//! Decoding of captured values.
//!
//! The server encodes every captured value as a JSON array:
//!
//! ```text
//! [repr, type_index, meta, [label, child], [label, child], ...]
//! ```
//!
//! `type_index` is an index into the call's type names for expressions,
//! `-1` for an exception (whose repr is the message) and `-2` for a
//! statement that ran. A `len` key in `meta` adds a synthetic `len()`
//! child.
//!
//! Decoding is shallow: [`ValueTree::decode`] checks and decodes one level
//! and keeps the child entries raw; [`ValueTree::children`] decodes the next
//! level on demand. A shape mismatch is a protocol error and surfaces as
//! [`BirdseyeError::MalformedValue`].

use std::rc::Rc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{BirdseyeError, BirdseyeResult};
use crate::trace::{CallData, NodeId};

/// Type index of an exception value.
const EXCEPTION_TYPE_INDEX: i64 = -1;

/// Type index of a statement that ran.
const STATEMENT_TYPE_INDEX: i64 = -2;

/// Label of the synthetic length child.
pub const LENGTH_LABEL: &str = "len()";

// ============================================================================
// Type Table
// ============================================================================

/// Type names of one call, shared by all of its decoded values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeTable {
    names: Vec<String>,
    num_special: usize,
}

impl TypeTable {
    /// Table of `names`, the first `num_special` of which are builtins.
    pub fn new(names: Vec<String>, num_special: usize) -> Self {
        TypeTable { names, num_special }
    }

    /// Table of a call's captured data.
    pub fn from_call_data(data: &CallData) -> Self {
        TypeTable::new(data.type_names.clone(), data.num_special_types)
    }

    /// Name of a type index.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Whether a type index is one of the well-known builtin types.
    pub fn is_special(&self, index: usize) -> bool {
        index < self.num_special
    }

    /// Icon category for an expression of the given type.
    pub fn icon(&self, index: usize) -> ValueIcon {
        if !self.is_special(index) {
            return ValueIcon::Value;
        }
        match self.name(index) {
            Some("list" | "tuple") => ValueIcon::Sequence,
            Some("set" | "dict" | "frozenset") => ValueIcon::Mapping,
            Some("int" | "float" | "long" | "complex") => ValueIcon::Primitive,
            _ => ValueIcon::Value,
        }
    }
}

/// Icon category shown next to an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueIcon {
    /// Lists and tuples.
    Sequence,
    /// Sets and dicts.
    Mapping,
    /// Numbers.
    Primitive,
    /// Everything else.
    Value,
}

// ============================================================================
// Value Tree
// ============================================================================

/// What a decoded value is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueKind {
    /// An expression's value.
    Expression {
        type_index: usize,
        type_name: String,
        repr: String,
        icon: ValueIcon,
    },
    /// A statement that ran.
    Statement,
    /// An exception raised while evaluating the node.
    Exception { message: String },
    /// The synthetic length of a container.
    Length { len: u64 },
}

/// One decoded captured value, with lazily decoded children.
#[derive(Debug, Clone)]
pub struct ValueTree {
    node: NodeId,
    label: String,
    kind: ValueKind,
    meta: Map<String, Value>,
    raw_children: Vec<Value>,
    types: Rc<TypeTable>,
}

impl ValueTree {
    /// Decode the top level of `raw`, the value of `node`, as `label`.
    pub fn decode(
        node: NodeId,
        label: impl Into<String>,
        raw: &Value,
        types: &Rc<TypeTable>,
    ) -> BirdseyeResult<Self> {
        let items = raw
            .as_array()
            .ok_or_else(|| BirdseyeError::malformed(node, "value is not an array"))?;
        if items.len() < 3 {
            return Err(BirdseyeError::malformed(
                node,
                format!("value has {} items, expected at least 3", items.len()),
            ));
        }
        let repr = items[0]
            .as_str()
            .ok_or_else(|| BirdseyeError::malformed(node, "repr is not a string"))?;
        let type_index = items[1]
            .as_i64()
            .ok_or_else(|| BirdseyeError::malformed(node, "type index is not an integer"))?;
        let meta = match &items[2] {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => return Err(BirdseyeError::malformed(node, "meta is not an object")),
        };

        let kind = match type_index {
            STATEMENT_TYPE_INDEX => ValueKind::Statement,
            EXCEPTION_TYPE_INDEX => ValueKind::Exception {
                message: repr.to_string(),
            },
            index if index >= 0 => {
                let index = index as usize;
                let type_name = types.name(index).ok_or_else(|| {
                    BirdseyeError::malformed(node, format!("unknown type index {}", index))
                })?;
                ValueKind::Expression {
                    type_index: index,
                    type_name: type_name.to_string(),
                    repr: repr.to_string(),
                    icon: types.icon(index),
                }
            }
            other => {
                return Err(BirdseyeError::malformed(
                    node,
                    format!("invalid type index {}", other),
                ))
            }
        };

        Ok(ValueTree {
            node,
            label: label.into(),
            kind,
            meta,
            raw_children: items[3..].to_vec(),
            types: Rc::clone(types),
        })
    }

    fn length(node: NodeId, len: u64, types: &Rc<TypeTable>) -> Self {
        ValueTree {
            node,
            label: LENGTH_LABEL.to_string(),
            kind: ValueKind::Length { len },
            meta: Map::new(),
            raw_children: Vec::new(),
            types: Rc::clone(types),
        }
    }

    /// Label shown before the value (source text or child key).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Decoded kind.
    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    /// Extra information attached by the server.
    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    /// Node whose value this is (or is nested in).
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Whether this is an exception.
    pub fn is_exception(&self) -> bool {
        matches!(self.kind, ValueKind::Exception { .. })
    }

    /// Whether this is a statement that ran.
    pub fn is_statement(&self) -> bool {
        matches!(self.kind, ValueKind::Statement)
    }

    /// A statement with nothing attached; not worth showing.
    pub fn is_not_interesting(&self) -> bool {
        self.is_statement() && self.meta.is_empty()
    }

    /// The repr for expressions, the message for exceptions.
    pub fn repr(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::Expression { repr, .. } => Some(repr),
            ValueKind::Exception { message } => Some(message),
            ValueKind::Statement | ValueKind::Length { .. } => None,
        }
    }

    /// Container length reported in `meta`, if any.
    fn meta_len(&self) -> Option<u64> {
        let len = self.meta.get("len")?;
        len.as_u64().or_else(|| len.as_f64().map(|f| f as u64))
    }

    /// Whether expanding this value would show anything.
    pub fn has_children(&self) -> bool {
        !self.raw_children.is_empty() || self.meta_len().is_some()
    }

    /// Decode the next level: labelled children in server order, then
    /// `len()` when the value reports a length.
    pub fn children(&self) -> BirdseyeResult<Vec<ValueTree>> {
        let mut children = Vec::with_capacity(self.raw_children.len() + 1);
        for entry in &self.raw_children {
            let (label, raw) = match entry.as_array().map(Vec::as_slice) {
                Some([Value::String(label), raw]) => (label, raw),
                _ => {
                    return Err(BirdseyeError::malformed(
                        self.node,
                        format!("child of {:?} is not a [label, value] pair", self.label),
                    ))
                }
            };
            children.push(ValueTree::decode(self.node, label.as_str(), raw, &self.types)?);
        }
        if let Some(len) = self.meta_len() {
            children.push(ValueTree::length(self.node, len, &self.types));
        }
        Ok(children)
    }

    /// One-line rendering of the value (without the label).
    pub fn describe(&self) -> String {
        match &self.kind {
            ValueKind::Expression {
                type_name, repr, ..
            } => format!("{{{}}} {}", type_name, repr),
            ValueKind::Statement => "statement ran fine".to_string(),
            ValueKind::Exception { message } => message.clone(),
            ValueKind::Length { len } => len.to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn types() -> Rc<TypeTable> {
        Rc::new(TypeTable::new(
            vec![
                "list".to_string(),
                "int".to_string(),
                "dict".to_string(),
                "Foo".to_string(),
            ],
            3,
        ))
    }

    mod decode_tests {
        use super::*;

        #[test]
        fn expression_with_labelled_child() {
            let raw = json!(["[1]", 0, {}, ["item", ["1", 1, {}]]]);
            let tree = ValueTree::decode(5, "xs", &raw, &types()).unwrap();
            assert!(matches!(
                tree.kind(),
                ValueKind::Expression { type_index: 0, icon: ValueIcon::Sequence, .. }
            ));
            assert!(!tree.is_not_interesting());
            let children = tree.children().unwrap();
            assert_eq!(children.len(), 1);
            assert_eq!(children[0].label(), "item");
            assert_eq!(children[0].describe(), "{int} 1");
        }

        #[test]
        fn statement_and_exception() {
            let statement = ValueTree::decode(1, "s", &json!(["", -2, {}]), &types()).unwrap();
            assert!(statement.is_statement());
            assert!(statement.is_not_interesting());
            assert_eq!(statement.repr(), None);

            let annotated =
                ValueTree::decode(1, "s", &json!(["", -2, {"inner_calls": ["x"]}]), &types())
                    .unwrap();
            assert!(!annotated.is_not_interesting());

            let error =
                ValueTree::decode(2, "e", &json!(["ZeroDivisionError", -1, {}]), &types()).unwrap();
            assert!(error.is_exception());
            assert_eq!(error.repr(), Some("ZeroDivisionError"));
            assert_eq!(error.describe(), "ZeroDivisionError");
        }

        #[test]
        fn length_child_comes_last() {
            let raw = json!(["{1: 2}", 2, {"len": 1}, ["1", ["2", 1, {}]]]);
            let tree = ValueTree::decode(3, "d", &raw, &types()).unwrap();
            assert!(tree.has_children());
            let children = tree.children().unwrap();
            assert_eq!(children.len(), 2);
            assert_eq!(children[1].label(), LENGTH_LABEL);
            assert_eq!(children[1].kind(), &ValueKind::Length { len: 1 });
            assert!(!children[1].has_children());
        }

        #[test]
        fn float_length_is_accepted() {
            let raw = json!(["[]", 0, {"len": 0.0}]);
            let tree = ValueTree::decode(3, "xs", &raw, &types()).unwrap();
            assert_eq!(tree.children().unwrap()[0].describe(), "0");
        }

        #[test]
        fn icons_only_for_special_types() {
            let types = types();
            assert_eq!(types.icon(1), ValueIcon::Primitive);
            assert_eq!(types.icon(2), ValueIcon::Mapping);
            assert_eq!(types.icon(3), ValueIcon::Value);
        }
    }

    mod malformed_tests {
        use super::*;

        fn is_malformed(raw: Value) -> bool {
            matches!(
                ValueTree::decode(7, "x", &raw, &types()),
                Err(BirdseyeError::MalformedValue { node: 7, .. })
            )
        }

        #[test]
        fn rejects_bad_shapes() {
            assert!(is_malformed(json!({"repr": "1"})));
            assert!(is_malformed(json!(["1", 0])));
            assert!(is_malformed(json!([1, 0, {}])));
            assert!(is_malformed(json!(["1", "int", {}])));
            assert!(is_malformed(json!(["1", 0, []])));
            assert!(is_malformed(json!(["1", 99, {}])));
            assert!(is_malformed(json!(["1", -3, {}])));
        }

        #[test]
        fn bad_child_fails_on_expansion_only() {
            let raw = json!(["[1]", 0, {}, ["item"]]);
            let tree = ValueTree::decode(7, "xs", &raw, &types()).unwrap();
            assert!(matches!(
                tree.children(),
                Err(BirdseyeError::MalformedValue { node: 7, .. })
            ));
        }
    }
}
