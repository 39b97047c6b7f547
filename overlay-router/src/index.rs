//! Which fields must be stripped from queries sent to the remote server.

use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::schema::OverlaySchema;

/// Type name to the names of its extension fields.
///
/// Built from the origin tags of an [`OverlaySchema`], optionally joined with
/// fields declared by configuration: a field the remote type also has but that
/// should be resolved locally cannot be told apart structurally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionFieldIndex {
    fields: IndexMap<String, IndexSet<String>>,
}

impl ExtensionFieldIndex {
    /// Every field tagged as an extension field in `schema`.
    pub fn from_schema(schema: &OverlaySchema) -> Self {
        let mut index = Self::default();
        for (type_name, field_name) in schema.extension_fields() {
            index.insert(type_name.as_str(), field_name.as_str());
        }
        index
    }

    /// The union of this index and `overrides`.
    pub fn with_overrides<T, F>(mut self, overrides: impl IntoIterator<Item = (T, F)>) -> Self
    where
        T: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        for (type_name, fields) in overrides {
            let entry = self.fields.entry(type_name.into()).or_default();
            entry.extend(fields.into_iter().map(Into::into));
        }
        self.fields.retain(|_, fields| !fields.is_empty());
        self
    }

    fn insert(&mut self, type_name: &str, field_name: &str) {
        self.fields
            .entry(type_name.to_string())
            .or_default()
            .insert(field_name.to_string());
    }

    /// Whether `type_name.field_name` is resolved locally.
    pub fn contains(&self, type_name: &str, field_name: &str) -> bool {
        self.fields
            .get(type_name)
            .is_some_and(|fields| fields.contains(field_name))
    }

    /// The extension fields of `type_name`.
    pub fn fields(&self, type_name: &str) -> impl Iterator<Item = &str> {
        self.fields
            .get(type_name)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `(type, fields)` pairs, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, impl Iterator<Item = &str>)> {
        self.fields.iter().map(|(type_name, fields)| {
            (type_name.as_str(), fields.iter().map(String::as_str))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::introspection::OriginSchema;
    use crate::schema::Bootstrap;
    use crate::schema::OverlayOptions;
    use crate::schema::overlay;

    fn schema() -> OverlaySchema {
        let base = OriginSchema::from_sdl(
            "type Query { person: Person }\ntype Person { name: String friend: Person }",
        )
        .unwrap();
        overlay(
            &base,
            &Bootstrap::builtin().unwrap(),
            &["extend type Person { pet: Pet }\ntype Pet { kind: String }"],
            OverlayOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn indexes_extension_fields() {
        let index = ExtensionFieldIndex::from_schema(&schema());
        assert!(index.contains("Person", "pet"));
        assert!(index.contains("Pet", "kind"));
        assert!(!index.contains("Person", "name"));
        assert!(!index.contains("Query", "person"));
        assert_eq!(index.fields("Person").collect::<Vec<_>>(), vec!["pet"]);
        assert_eq!(index.fields("Missing").count(), 0);
    }

    #[test]
    fn from_schema_is_deterministic() {
        let first = ExtensionFieldIndex::from_schema(&schema());
        let second = ExtensionFieldIndex::from_schema(&schema());
        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|(ty, _)| ty).collect::<Vec<_>>(),
            vec!["Person", "Pet"]
        );
    }

    #[test]
    fn overrides_are_joined() {
        let overrides = HashMap::from([("Person", vec!["friend"]), ("Query", vec![])]);
        let index = ExtensionFieldIndex::from_schema(&schema()).with_overrides(overrides);
        assert!(index.contains("Person", "pet"));
        assert!(index.contains("Person", "friend"));
        assert!(!index.contains("Query", "person"));
        assert_eq!(
            index.iter().map(|(ty, _)| ty).collect::<Vec<_>>(),
            vec!["Person", "Pet"]
        );
    }

    #[test]
    fn empty_index() {
        let index = ExtensionFieldIndex::default();
        assert!(index.is_empty());
        assert!(!ExtensionFieldIndex::default()
            .with_overrides([("Person", ["pet"])])
            .is_empty());
    }
}
