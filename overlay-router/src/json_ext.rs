//! JSON helpers shared by the GraphQL wire types.

pub use serde_json_bytes::ByteString;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = serde_json_bytes::Map<ByteString, Value>;

/// Keep only the entries of `object` whose key satisfies `keep`.
pub(crate) fn retain_keys(object: &Object, mut keep: impl FnMut(&str) -> bool) -> Object {
    object
        .iter()
        .filter(|(key, _)| keep(key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
