//! Typed transformation of executable documents.
//!
//! A [`Visitor`] walks a document together with the schema: each field is
//! visited with the name of its parent type and its definition, each
//! selection set with the type it selects on. Every hook returns the node to
//! keep in the output, or `None` to remove it. The input document is never
//! modified.

use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::schema::FieldLookupError;
use tower::BoxError;

/// Transform a document with the given visitor.
///
/// Fragment definitions are visited before operations.
pub(crate) fn document(
    visitor: &mut impl Visitor,
    document: &ast::Document,
) -> Result<ast::Document, BoxError> {
    let mut new = ast::Document::new();
    new.sources = document.sources.clone();

    for definition in &document.definitions {
        if let ast::Definition::FragmentDefinition(def) = definition {
            if let Some(new_def) = visitor.fragment_definition(def)? {
                new.definitions
                    .push(ast::Definition::FragmentDefinition(new_def));
            }
        }
    }

    for definition in &document.definitions {
        if let ast::Definition::OperationDefinition(def) = definition {
            let root_type = visitor
                .schema()
                .root_operation(def.operation_type)
                .ok_or("missing root operation definition")?
                .clone();
            if let Some(new_def) = visitor.operation(&root_type, def)? {
                new.definitions
                    .push(ast::Definition::OperationDefinition(new_def));
            }
        }
    }
    Ok(new)
}

pub(crate) trait Visitor: Sized {
    fn schema(&self) -> &apollo_compiler::Schema;

    /// Transform an operation definition.
    ///
    /// Call the [`operation`] free function for the default behavior.
    /// Return `Ok(None)` to remove this operation.
    fn operation(
        &mut self,
        root_type: &str,
        def: &Node<ast::OperationDefinition>,
    ) -> Result<Option<Node<ast::OperationDefinition>>, BoxError> {
        operation(self, root_type, def)
    }

    /// Transform a fragment definition.
    ///
    /// Call the [`fragment_definition`] free function for the default behavior.
    /// Return `Ok(None)` to remove this fragment.
    fn fragment_definition(
        &mut self,
        def: &Node<ast::FragmentDefinition>,
    ) -> Result<Option<Node<ast::FragmentDefinition>>, BoxError> {
        fragment_definition(self, def)
    }

    /// Transform a field within a selection set.
    ///
    /// Call the [`field`] free function for the default behavior.
    /// Return `Ok(None)` to remove this field.
    fn field(
        &mut self,
        _parent_type: &str,
        field_def: &ast::FieldDefinition,
        def: &Node<ast::Field>,
    ) -> Result<Option<Node<ast::Field>>, BoxError> {
        field(self, field_def, def)
    }

    /// Transform a fragment spread within a selection set.
    ///
    /// Return `Ok(None)` to remove this fragment spread.
    fn fragment_spread(
        &mut self,
        def: &Node<ast::FragmentSpread>,
    ) -> Result<Option<Node<ast::FragmentSpread>>, BoxError> {
        Ok(Some(def.clone()))
    }

    /// Transform an inline fragment within a selection set.
    ///
    /// Call the [`inline_fragment`] free function for the default behavior.
    /// Return `Ok(None)` to remove this inline fragment.
    fn inline_fragment(
        &mut self,
        parent_type: &str,
        def: &Node<ast::InlineFragment>,
    ) -> Result<Option<Node<ast::InlineFragment>>, BoxError> {
        inline_fragment(self, parent_type, def)
    }

    /// Transform a non-empty selection set, once its selections are known.
    ///
    /// Call the [`selection_set`] free function for the default behavior.
    /// Return `Ok(None)` when nothing is left to select.
    fn selection_set(
        &mut self,
        parent_type: &str,
        set: &[ast::Selection],
    ) -> Result<Option<Vec<ast::Selection>>, BoxError> {
        selection_set(self, parent_type, set)
    }
}

/// The default behavior for transforming an operation.
///
/// Returns `Ok(None)` if all selections are removed.
pub(crate) fn operation(
    visitor: &mut impl Visitor,
    root_type: &str,
    def: &Node<ast::OperationDefinition>,
) -> Result<Option<Node<ast::OperationDefinition>>, BoxError> {
    let Some(selection_set) = visitor.selection_set(root_type, &def.selection_set)? else {
        return Ok(None);
    };
    let mut def = def.clone();
    def.make_mut().selection_set = selection_set;
    Ok(Some(def))
}

/// The default behavior for transforming a fragment definition.
///
/// Returns `Ok(None)` if all selections are removed.
pub(crate) fn fragment_definition(
    visitor: &mut impl Visitor,
    def: &Node<ast::FragmentDefinition>,
) -> Result<Option<Node<ast::FragmentDefinition>>, BoxError> {
    let Some(selection_set) = visitor.selection_set(&def.type_condition, &def.selection_set)?
    else {
        return Ok(None);
    };
    let mut def = def.clone();
    def.make_mut().selection_set = selection_set;
    Ok(Some(def))
}

/// The default behavior for transforming a field within a selection set.
///
/// Returns `Ok(None)` if the field had nested selections and they're all removed.
pub(crate) fn field(
    visitor: &mut impl Visitor,
    field_def: &ast::FieldDefinition,
    def: &Node<ast::Field>,
) -> Result<Option<Node<ast::Field>>, BoxError> {
    if def.selection_set.is_empty() {
        return Ok(Some(def.clone()));
    }
    let Some(selection_set) =
        visitor.selection_set(field_def.ty.inner_named_type(), &def.selection_set)?
    else {
        return Ok(None);
    };
    let mut def = def.clone();
    def.make_mut().selection_set = selection_set;
    Ok(Some(def))
}

/// The default behavior for transforming an inline fragment.
///
/// Returns `Ok(None)` if all selections within the fragment are removed.
pub(crate) fn inline_fragment(
    visitor: &mut impl Visitor,
    parent_type: &str,
    def: &Node<ast::InlineFragment>,
) -> Result<Option<Node<ast::InlineFragment>>, BoxError> {
    let Some(selection_set) = visitor.selection_set(parent_type, &def.selection_set)? else {
        return Ok(None);
    };
    let mut def = def.clone();
    def.make_mut().selection_set = selection_set;
    Ok(Some(def))
}

/// The default behavior for transforming a selection set: transform each
/// selection, dropping the removed ones.
pub(crate) fn selection_set(
    visitor: &mut impl Visitor,
    parent_type: &str,
    set: &[ast::Selection],
) -> Result<Option<Vec<ast::Selection>>, BoxError> {
    let mut selections = Vec::with_capacity(set.len());
    for selection in set {
        match selection {
            ast::Selection::Field(def) => {
                let field_def = visitor
                    .schema()
                    .type_field(parent_type, &def.name)
                    .map_err(|e| match e {
                        FieldLookupError::NoSuchType => format!("type `{parent_type}` not defined"),
                        FieldLookupError::NoSuchField(_, _) => {
                            format!("no field `{}` in type `{parent_type}`", &def.name)
                        }
                    })?
                    .node
                    .clone();
                if let Some(def) = visitor.field(parent_type, &field_def, def)? {
                    selections.push(ast::Selection::Field(def));
                }
            }
            ast::Selection::FragmentSpread(def) => {
                if let Some(def) = visitor.fragment_spread(def)? {
                    selections.push(ast::Selection::FragmentSpread(def));
                }
            }
            ast::Selection::InlineFragment(def) => {
                let fragment_type = def
                    .type_condition
                    .as_deref()
                    .unwrap_or(parent_type)
                    .to_string();
                if let Some(def) = visitor.inline_fragment(&fragment_type, def)? {
                    selections.push(ast::Selection::InlineFragment(def));
                }
            }
        }
    }
    Ok((!selections.is_empty()).then_some(selections))
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;
    use pretty_assertions::assert_eq;

    use super::*;

    const SCHEMA: &str = r#"
        type Query {
          a: String
          b: Int
          secret: String
          next: Query
        }
    "#;

    struct RemoveField {
        schema: Schema,
        name: &'static str,
        visited: Vec<String>,
    }

    impl Visitor for RemoveField {
        fn schema(&self) -> &Schema {
            &self.schema
        }

        fn field(
            &mut self,
            parent_type: &str,
            field_def: &ast::FieldDefinition,
            def: &Node<ast::Field>,
        ) -> Result<Option<Node<ast::Field>>, BoxError> {
            self.visited.push(format!("{parent_type}.{}", def.name));
            if def.name.as_str() == self.name {
                return Ok(None);
            }
            field(self, field_def, def)
        }
    }

    fn transform(query: &str, name: &'static str) -> (String, Vec<String>) {
        let mut visitor = RemoveField {
            schema: Schema::parse(SCHEMA, "schema.graphql").unwrap(),
            name,
            visited: Vec::new(),
        };
        let document = ast::Document::parse(query, "query.graphql").unwrap();
        let new = super::document(&mut visitor, &document).unwrap();
        (new.to_string(), visitor.visited)
    }

    fn normalized(query: &str) -> String {
        ast::Document::parse(query, "expected.graphql")
            .unwrap()
            .to_string()
    }

    #[test]
    fn removes_fields_and_empty_selection_sets() {
        let (query, visited) = transform(
            "query { a next { secret } ...F }\nfragment F on Query { b secret }",
            "secret",
        );
        assert_eq!(
            query,
            normalized("fragment F on Query { b }\nquery { a ...F }")
        );
        assert_eq!(
            visited,
            vec!["Query.b", "Query.secret", "Query.a", "Query.next", "Query.secret"]
        );
    }

    #[test]
    fn inline_fragments_use_their_type_condition() {
        let (query, _) = transform("{ ... on Query { secret b } ... { secret } }", "secret");
        assert_eq!(query, normalized("{ ... on Query { b } }"));
    }

    #[test]
    fn unknown_fields_are_errors() {
        let mut visitor = RemoveField {
            schema: Schema::parse(SCHEMA, "schema.graphql").unwrap(),
            name: "secret",
            visited: Vec::new(),
        };
        let document = ast::Document::parse("{ nope }", "query.graphql").unwrap();
        let err = super::document(&mut visitor, &document).unwrap_err();
        assert_eq!(err.to_string(), "no field `nope` in type `Query`");
    }

    #[test]
    fn input_document_is_untouched() {
        let mut visitor = RemoveField {
            schema: Schema::parse(SCHEMA, "schema.graphql").unwrap(),
            name: "a",
            visited: Vec::new(),
        };
        let document = ast::Document::parse("{ a b }", "query.graphql").unwrap();
        let before = document.to_string();
        super::document(&mut visitor, &document).unwrap();
        assert_eq!(document.to_string(), before);
    }
}
