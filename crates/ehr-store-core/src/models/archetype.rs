//! Archetype instance trees and their JSON codec.
//!
//! An archetype instance is a node with a type tag and a field mapping whose
//! values may themselves be archetype instances, plain mappings, or lists, to
//! any depth. On the wire a node is `{"archetype": <string>, "data": <object>}`.
//!
//! Nested objects carry no explicit discriminator: during decoding an object is
//! taken to be an embedded archetype instance if and only if it has both the
//! `archetype` and `data` members. A plain mapping that happens to use both
//! keys is reinterpreted as an embedded instance. Only the top-level node is
//! schema-checked; nested embedded instances are not validated.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

use super::{EntityKind, ModelError, ModelResult};

/// Wire member holding a node's type tag.
pub const ARCHETYPE_KEY: &str = "archetype";
/// Wire member holding a node's field mapping.
pub const DATA_KEY: &str = "data";

/// Field mapping of an archetype instance (keys unique, order insignificant).
pub type Fields = BTreeMap<String, FieldValue>;

/// A value stored in an archetype instance field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Ordered sequence
    List(Vec<FieldValue>),
    /// Plain associative value
    Map(Fields),
    /// Embedded archetype instance
    Archetype(ArchetypeNode),
    /// Object carrying both reserved keys without being a well-formed node
    /// (non-string or empty tag, non-object data, or extra members).
    ///
    /// Decoding treats it as an embedded instance but performs no validation,
    /// so its members are kept exactly as they arrived.
    Tagged(TaggedObject),
}

impl FieldValue {
    /// Encode to the wire form.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Number(n) => Value::Number(n.clone()),
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::List(items) => Value::Array(items.iter().map(FieldValue::to_json).collect()),
            FieldValue::Map(fields) | FieldValue::Tagged(TaggedObject(fields)) => {
                Value::Object(encode_fields(fields))
            }
            FieldValue::Archetype(node) => node.to_json(),
        }
    }

    /// Decode a nested wire value. Never fails: nested data is not validated.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => FieldValue::Number(n.clone()),
            Value::String(s) => FieldValue::String(s.clone()),
            Value::Array(items) => FieldValue::List(items.iter().map(FieldValue::from_json).collect()),
            Value::Object(members) if is_archetype(members) => decode_embedded(members),
            Value::Object(members) => FieldValue::Map(decode_fields(members)),
        }
    }

    /// True for values decoding treats as embedded archetype instances.
    pub fn is_embedded_archetype(&self) -> bool {
        matches!(self, FieldValue::Archetype(_) | FieldValue::Tagged(_))
    }

    pub fn as_archetype(&self) -> Option<&ArchetypeNode> {
        match self {
            FieldValue::Archetype(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            FieldValue::Map(fields) => Some(fields),
            _ => None,
        }
    }
}

/// Members of a malformed embedded instance. Only produced by decoding, so
/// every value holds both reserved keys and re-encodes to the same object.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedObject(Fields);

impl TaggedObject {
    pub fn members(&self) -> &Fields {
        &self.0
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value.into())
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Number(value.into())
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Number(value.into())
    }
}

/// Non-finite floats have no JSON form and become `Null`.
impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(FieldValue::Null, FieldValue::Number)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<ArchetypeNode> for FieldValue {
    fn from(value: ArchetypeNode) -> Self {
        FieldValue::Archetype(value)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(value: Vec<FieldValue>) -> Self {
        FieldValue::List(value)
    }
}

impl From<Fields> for FieldValue {
    fn from(value: Fields) -> Self {
        FieldValue::Map(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// An instance of a named archetype.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchetypeNode {
    archetype: String,
    data: Fields,
}

impl ArchetypeNode {
    /// Create a node. The type tag must be non-empty.
    pub fn new(archetype: impl Into<String>, data: Fields) -> ModelResult<Self> {
        let archetype = archetype.into();
        if archetype.is_empty() {
            return Err(ModelError::EmptyTypeTag);
        }
        Ok(Self { archetype, data })
    }

    /// Add or replace a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.data.insert(name.into(), value.into());
        self
    }

    /// The archetype this node instantiates.
    pub fn archetype(&self) -> &str {
        &self.archetype
    }

    pub fn data(&self) -> &Fields {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Fields {
        &mut self.data
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.data.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.data.insert(name.into(), value.into())
    }

    /// Encode to `{"archetype": ..., "data": {...}}`.
    pub fn to_json(&self) -> Value {
        let mut members = Map::new();
        members.insert(ARCHETYPE_KEY.into(), Value::String(self.archetype.clone()));
        members.insert(DATA_KEY.into(), Value::Object(encode_fields(&self.data)));
        Value::Object(members)
    }

    /// Decode from the wire form.
    ///
    /// The top-level object must hold exactly a non-empty string `archetype`
    /// and an object `data`. Nested values are decoded without validation.
    pub fn from_json(value: &Value) -> ModelResult<Self> {
        let members = value
            .as_object()
            .ok_or_else(|| invalid("expected a JSON object"))?;

        let archetype = match members.get(ARCHETYPE_KEY) {
            Some(Value::String(tag)) if !tag.is_empty() => tag,
            Some(Value::String(_)) => return Err(invalid("'archetype' must not be empty")),
            Some(_) => return Err(invalid("'archetype' must be a string")),
            None => return Err(invalid("missing required member 'archetype'")),
        };

        let data = match members.get(DATA_KEY) {
            Some(Value::Object(data)) => data,
            Some(_) => return Err(invalid("'data' must be an object")),
            None => return Err(invalid("missing required member 'data'")),
        };

        if let Some(extra) = members
            .keys()
            .find(|key| key.as_str() != ARCHETYPE_KEY && key.as_str() != DATA_KEY)
        {
            return Err(invalid(format!("unexpected member '{}'", extra)));
        }

        Ok(Self {
            archetype: archetype.clone(),
            data: decode_fields(data),
        })
    }

    /// Count this node and every embedded archetype instance below it.
    pub fn node_count(&self) -> usize {
        1 + self.data.values().map(count_nodes).sum::<usize>()
    }
}

impl Serialize for ArchetypeNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ArchetypeNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(D::Error::custom)
    }
}

fn invalid(reason: impl Into<String>) -> ModelError {
    ModelError::invalid(EntityKind::ArchetypeInstance, reason)
}

/// Reserved-key test deciding whether a nested object is an embedded instance.
fn is_archetype(members: &Map<String, Value>) -> bool {
    members.contains_key(ARCHETYPE_KEY) && members.contains_key(DATA_KEY)
}

fn decode_embedded(members: &Map<String, Value>) -> FieldValue {
    let well_formed = members.len() == 2;
    match (members.get(ARCHETYPE_KEY), members.get(DATA_KEY)) {
        (Some(Value::String(tag)), Some(Value::Object(data))) if well_formed && !tag.is_empty() => {
            FieldValue::Archetype(ArchetypeNode {
                archetype: tag.clone(),
                data: decode_fields(data),
            })
        }
        _ => FieldValue::Tagged(TaggedObject(decode_fields(members))),
    }
}

fn decode_fields(members: &Map<String, Value>) -> Fields {
    members
        .iter()
        .map(|(key, value)| (key.clone(), FieldValue::from_json(value)))
        .collect()
}

fn encode_fields(fields: &Fields) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect()
}

fn count_nodes(value: &FieldValue) -> usize {
    match value {
        FieldValue::Archetype(node) => node.node_count(),
        FieldValue::Tagged(TaggedObject(fields)) => {
            1 + fields.values().map(count_nodes).sum::<usize>()
        }
        FieldValue::List(items) => items.iter().map(count_nodes).sum(),
        FieldValue::Map(fields) => fields.values().map(count_nodes).sum(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blood_pressure() -> ArchetypeNode {
        ArchetypeNode::new("openEHR-EHR-OBSERVATION.blood_pressure.v1", Fields::new())
            .unwrap()
            .with_field("systolic", 120)
            .with_field("diastolic", 80)
            .with_field("position", "sitting")
    }

    #[test]
    fn test_empty_type_tag_rejected() {
        let result = ArchetypeNode::new("", Fields::new());
        assert_eq!(result, Err(ModelError::EmptyTypeTag));
    }

    #[test]
    fn test_encode_flat_node() {
        let node = blood_pressure();
        assert_eq!(
            node.to_json(),
            json!({
                "archetype": "openEHR-EHR-OBSERVATION.blood_pressure.v1",
                "data": {"systolic": 120, "diastolic": 80, "position": "sitting"}
            })
        );
    }

    #[test]
    fn test_encode_nested_structures() {
        let mut cuff = Fields::new();
        cuff.insert("size".into(), "adult".into());

        let node = ArchetypeNode::new("composition.encounter.v1", Fields::new())
            .unwrap()
            .with_field("content", vec![FieldValue::from(blood_pressure()), FieldValue::Null])
            .with_field("device", cuff)
            .with_field("context", blood_pressure());

        let encoded = node.to_json();
        assert_eq!(encoded["data"]["content"][0]["archetype"], json!("openEHR-EHR-OBSERVATION.blood_pressure.v1"));
        assert_eq!(encoded["data"]["content"][1], Value::Null);
        assert_eq!(encoded["data"]["device"], json!({"size": "adult"}));
        assert_eq!(encoded["data"]["context"]["data"]["systolic"], json!(120));
    }

    #[test]
    fn test_decode_missing_archetype() {
        let err = ArchetypeNode::from_json(&json!({"data": {}})).unwrap_err();
        assert_eq!(err.entity(), Some(EntityKind::ArchetypeInstance));
    }

    #[test]
    fn test_decode_missing_data() {
        let err = ArchetypeNode::from_json(&json!({"archetype": "x"})).unwrap_err();
        assert_eq!(err.entity(), Some(EntityKind::ArchetypeInstance));
    }

    #[test]
    fn test_decode_wrong_types() {
        assert!(ArchetypeNode::from_json(&json!({"archetype": 1, "data": {}})).is_err());
        assert!(ArchetypeNode::from_json(&json!({"archetype": "x", "data": []})).is_err());
        assert!(ArchetypeNode::from_json(&json!({"archetype": "", "data": {}})).is_err());
        assert!(ArchetypeNode::from_json(&json!(["archetype", "data"])).is_err());
    }

    #[test]
    fn test_decode_rejects_extra_top_level_members() {
        let result = ArchetypeNode::from_json(&json!({"archetype": "x", "data": {}, "extra": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_embedded_node() {
        let wire = json!({
            "archetype": "composition.encounter.v1",
            "data": {
                "vitals": {"archetype": "observation.pulse.v1", "data": {"rate": 72}},
                "notes": {"text": "stable"}
            }
        });
        let node = ArchetypeNode::from_json(&wire).unwrap();

        let vitals = node.get("vitals").and_then(FieldValue::as_archetype).unwrap();
        assert_eq!(vitals.archetype(), "observation.pulse.v1");
        assert_eq!(vitals.get("rate").and_then(FieldValue::as_f64), Some(72.0));

        let notes = node.get("notes").and_then(FieldValue::as_map).unwrap();
        assert_eq!(notes.get("text").and_then(FieldValue::as_str), Some("stable"));
        assert_eq!(node.node_count(), 2);
    }

    #[test]
    fn test_decode_embedded_nodes_inside_lists() {
        let wire = json!({
            "archetype": "section.vitals.v1",
            "data": {
                "items": [
                    {"archetype": "observation.pulse.v1", "data": {"rate": 60}},
                    [{"archetype": "observation.pulse.v1", "data": {"rate": 61}}],
                    {"plain": true},
                    "text"
                ]
            }
        });
        let node = ArchetypeNode::from_json(&wire).unwrap();
        let items = node.get("items").and_then(FieldValue::as_list).unwrap();

        assert!(items[0].as_archetype().is_some());
        let inner = items[1].as_list().unwrap();
        assert!(inner[0].as_archetype().is_some());
        assert!(items[2].as_map().is_some());
        assert_eq!(items[3].as_str(), Some("text"));
        assert_eq!(node.to_json(), wire);
    }

    #[test]
    fn test_plain_mapping_with_reserved_keys_is_reinterpreted() {
        // A plain value using both reserved keys cannot be told apart from an
        // embedded instance and decodes as one.
        let mut plain = Fields::new();
        plain.insert(ARCHETYPE_KEY.into(), "not really an archetype".into());
        plain.insert(DATA_KEY.into(), FieldValue::Map(Fields::new()));

        let node = ArchetypeNode::new("observation.note.v1", Fields::new())
            .unwrap()
            .with_field("meta", plain);

        let decoded = ArchetypeNode::from_json(&node.to_json()).unwrap();
        let meta = decoded.get("meta").unwrap();
        assert!(meta.is_embedded_archetype());
        assert_eq!(meta.as_archetype().unwrap().archetype(), "not really an archetype");
        assert_ne!(decoded, node);
        assert_eq!(decoded.to_json(), node.to_json());
    }

    #[test]
    fn test_nested_malformed_nodes_pass_through() {
        let wire = json!({
            "archetype": "composition.encounter.v1",
            "data": {
                "level1": {
                    "archetype": "section.v1",
                    "data": {
                        "level2": {"archetype": 42, "data": "not an object"},
                        "extra": {"archetype": "x", "data": {}, "comment": "extra member"}
                    }
                }
            }
        });
        let node = ArchetypeNode::from_json(&wire).unwrap();

        let level1 = node.get("level1").and_then(FieldValue::as_archetype).unwrap();
        assert!(matches!(level1.get("level2"), Some(FieldValue::Tagged(_))));
        assert!(matches!(level1.get("extra"), Some(FieldValue::Tagged(_))));
        assert_eq!(node.to_json(), wire);
    }

    #[test]
    fn test_decoded_malformed_node_survives_reuse() {
        let wire = json!({"archetype": "", "data": {"note": "empty tag"}});
        let tagged = FieldValue::from_json(&wire);
        let FieldValue::Tagged(object) = &tagged else {
            panic!("expected a malformed embedded instance, got {:?}", tagged);
        };
        assert_eq!(object.members().len(), 2);
        assert_eq!(object.members().get(ARCHETYPE_KEY), Some(&FieldValue::from("")));

        // Moved into a freshly built tree it still round-trips
        let tree = ArchetypeNode::new("holder", Fields::new())
            .unwrap()
            .with_field("kept", tagged);
        let decoded = ArchetypeNode::from_json(&tree.to_json()).unwrap();
        assert_eq!(decoded, tree);
        assert_eq!(tree.node_count(), 2);
    }

    #[test]
    fn test_mapping_with_one_reserved_key_stays_plain() {
        let wire = json!({
            "archetype": "x",
            "data": {"a": {"archetype": "only tag"}, "b": {"data": {}}}
        });
        let node = ArchetypeNode::from_json(&wire).unwrap();
        assert!(node.get("a").and_then(FieldValue::as_map).is_some());
        assert!(node.get("b").and_then(FieldValue::as_map).is_some());
    }

    #[test]
    fn test_serde_roundtrip() {
        let node = blood_pressure();
        let text = serde_json::to_string(&node).unwrap();
        let parsed: ArchetypeNode = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, node);

        let bad: Result<ArchetypeNode, _> = serde_json::from_str(r#"{"data": {}}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_non_finite_float_becomes_null() {
        assert_eq!(FieldValue::from(f64::NAN), FieldValue::Null);
        assert_eq!(FieldValue::from(None::<i64>), FieldValue::Null);
    }
}
