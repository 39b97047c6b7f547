//! Rewriting client queries for the remote server.
//!
//! Selections of extension fields are removed, as are fragments typed on
//! extension types and applications of extension directives. Every nested selection
//! set asks for `__typename` so each object of the remote response tells its
//! concrete type. Operation selection sets get `__typename` only when nothing
//! else is left to select. Variables and fragments no longer used after
//! stripping are removed too.

use std::collections::HashSet;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::name;
use indexmap::IndexMap;
use indexmap::IndexSet;
use tower::BoxError;

use crate::error::ParseErrors;
use crate::error::RewriteError;
use crate::index::ExtensionFieldIndex;
use crate::query::transform;
use crate::schema::OverlaySchema;

const TYPENAME: Name = name!("__typename");

/// The result of [`rewrite_document`].
#[derive(Debug, Clone)]
pub struct RewrittenQuery {
    /// The rewritten document.
    pub document: ast::Document,
    /// The rewritten document, printed.
    pub query: String,
    /// Variables whose definition was removed, because only stripped
    /// selections used them.
    pub removed_variables: IndexSet<String>,
}

impl RewrittenQuery {
    /// The variables declared by the operation that would be executed for
    /// `operation_name`.
    pub fn operation_variables(&self, operation_name: Option<&str>) -> Option<IndexSet<&str>> {
        let mut operations = self.document.definitions.iter().filter_map(|definition| {
            match definition {
                ast::Definition::OperationDefinition(operation) => Some(operation),
                _ => None,
            }
        });
        let operation = match operation_name {
            Some(name) => operations.find(|operation| {
                operation.name.as_ref().is_some_and(|n| n.as_str() == name)
            }),
            None => operations.next(),
        }?;
        Some(
            operation
                .variables
                .iter()
                .map(|variable| variable.name.as_str())
                .collect(),
        )
    }
}

/// Rewrite `query` so that it only selects fields the remote server knows.
pub fn rewrite(
    schema: &OverlaySchema,
    index: &ExtensionFieldIndex,
    query: &str,
) -> Result<String, RewriteError> {
    let document = ast::Document::parse(query, "query.graphql")
        .map_err(|invalid| ParseErrors::from_list(&invalid.errors))?;
    Ok(rewrite_document(schema, index, &document)?.query)
}

/// Rewrite an already parsed query. `document` is left untouched.
pub fn rewrite_document(
    schema: &OverlaySchema,
    index: &ExtensionFieldIndex,
    document: &ast::Document,
) -> Result<RewrittenQuery, RewriteError> {
    let span = tracing::info_span!("rewrite");
    let _guard = span.enter();

    let mut visitor = StripExtensionFields {
        schema,
        index,
        local_fragments: local_fragments(schema, document),
        at_operation_root: false,
        stripped: 0,
    };
    let stripped = transform::document(&mut visitor, document)
        .map_err(|err| RewriteError::Traversal(err.to_string()))?;
    let (document, removed_variables) = remove_unused(stripped);
    tracing::debug!(
        stripped = visitor.stripped,
        removed_variables = removed_variables.len(),
        "rewrote query"
    );
    Ok(RewrittenQuery {
        query: document.to_string(),
        document,
        removed_variables,
    })
}

struct StripExtensionFields<'a> {
    schema: &'a OverlaySchema,
    index: &'a ExtensionFieldIndex,
    /// Fragment definitions typed on an extension type.
    local_fragments: HashSet<Name>,
    at_operation_root: bool,
    stripped: usize,
}

impl StripExtensionFields<'_> {
    /// `directives` without the ones the remote server does not know, if any
    /// had to be removed.
    fn strip_directives(&mut self, directives: &ast::DirectiveList) -> Option<ast::DirectiveList> {
        if !directives
            .iter()
            .any(|directive| self.schema.is_extension_directive(&directive.name))
        {
            return None;
        }
        let kept: Vec<_> = directives
            .iter()
            .filter(|directive| !self.schema.is_extension_directive(&directive.name))
            .cloned()
            .collect();
        self.stripped += directives.len() - kept.len();
        Some(ast::DirectiveList(kept))
    }
}

impl transform::Visitor for StripExtensionFields<'_> {
    fn schema(&self) -> &apollo_compiler::Schema {
        self.schema.schema()
    }

    fn operation(
        &mut self,
        root_type: &str,
        def: &Node<ast::OperationDefinition>,
    ) -> Result<Option<Node<ast::OperationDefinition>>, BoxError> {
        self.at_operation_root = true;
        let Some(mut def) = transform::operation(self, root_type, def)? else {
            return Ok(None);
        };
        if let Some(directives) = self.strip_directives(&def.directives) {
            def.make_mut().directives = directives;
        }
        let variables = def
            .variables
            .iter()
            .map(|variable| match self.strip_directives(&variable.directives) {
                Some(directives) => {
                    let mut variable = variable.clone();
                    variable.make_mut().directives = directives;
                    variable
                }
                None => variable.clone(),
            })
            .collect();
        def.make_mut().variables = variables;
        Ok(Some(def))
    }

    fn fragment_definition(
        &mut self,
        def: &Node<ast::FragmentDefinition>,
    ) -> Result<Option<Node<ast::FragmentDefinition>>, BoxError> {
        if self.local_fragments.contains(&def.name) {
            tracing::trace!(fragment = %def.name, "stripping extension fragment");
            self.stripped += 1;
            return Ok(None);
        }
        let Some(mut def) = transform::fragment_definition(self, def)? else {
            return Ok(None);
        };
        if let Some(directives) = self.strip_directives(&def.directives) {
            def.make_mut().directives = directives;
        }
        Ok(Some(def))
    }

    fn field(
        &mut self,
        parent_type: &str,
        field_def: &ast::FieldDefinition,
        def: &Node<ast::Field>,
    ) -> Result<Option<Node<ast::Field>>, BoxError> {
        if self.index.contains(parent_type, &def.name) {
            tracing::trace!(parent_type, field = %def.name, "stripping extension field");
            self.stripped += 1;
            return Ok(None);
        }
        let Some(mut def) = transform::field(self, field_def, def)? else {
            return Ok(None);
        };
        if let Some(directives) = self.strip_directives(&def.directives) {
            def.make_mut().directives = directives;
        }
        Ok(Some(def))
    }

    fn fragment_spread(
        &mut self,
        def: &Node<ast::FragmentSpread>,
    ) -> Result<Option<Node<ast::FragmentSpread>>, BoxError> {
        if self.local_fragments.contains(&def.fragment_name) {
            self.stripped += 1;
            return Ok(None);
        }
        let mut def = def.clone();
        if let Some(directives) = self.strip_directives(&def.directives) {
            def.make_mut().directives = directives;
        }
        Ok(Some(def))
    }

    fn inline_fragment(
        &mut self,
        parent_type: &str,
        def: &Node<ast::InlineFragment>,
    ) -> Result<Option<Node<ast::InlineFragment>>, BoxError> {
        if def
            .type_condition
            .as_ref()
            .is_some_and(|type_condition| self.schema.is_extension_type(type_condition))
        {
            tracing::trace!(parent_type, "stripping extension inline fragment");
            self.stripped += 1;
            return Ok(None);
        }
        let Some(mut def) = transform::inline_fragment(self, parent_type, def)? else {
            return Ok(None);
        };
        if let Some(directives) = self.strip_directives(&def.directives) {
            def.make_mut().directives = directives;
        }
        Ok(Some(def))
    }

    fn selection_set(
        &mut self,
        parent_type: &str,
        set: &[ast::Selection],
    ) -> Result<Option<Vec<ast::Selection>>, BoxError> {
        let at_operation_root = std::mem::take(&mut self.at_operation_root);
        let mut selections = transform::selection_set(self, parent_type, set)?.unwrap_or_default();
        if at_operation_root && !selections.is_empty() {
            return Ok(Some(selections));
        }
        if !has_typename(&selections) {
            selections.push(ast::Selection::Field(Node::new(ast::Field {
                alias: None,
                name: TYPENAME,
                arguments: Vec::new(),
                directives: ast::DirectiveList::new(),
                selection_set: Vec::new(),
            })));
        }
        Ok(Some(selections))
    }
}

/// Names of the fragment definitions of `document` typed on an extension type.
fn local_fragments(schema: &OverlaySchema, document: &ast::Document) -> HashSet<Name> {
    document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            ast::Definition::FragmentDefinition(fragment)
                if schema.is_extension_type(&fragment.type_condition) =>
            {
                Some(fragment.name.clone())
            }
            _ => None,
        })
        .collect()
}

/// Whether `__typename` is unconditionally selected under its own name.
fn has_typename(selections: &[ast::Selection]) -> bool {
    selections.iter().any(|selection| match selection {
        ast::Selection::Field(field) => {
            field.name == TYPENAME && field.alias.is_none() && field.directives.is_empty()
        }
        _ => false,
    })
}

/// Remove variable definitions no operation uses anymore, and fragments no
/// operation reaches anymore.
fn remove_unused(mut document: ast::Document) -> (ast::Document, IndexSet<String>) {
    let fragments: IndexMap<Name, Node<ast::FragmentDefinition>> = document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            ast::Definition::FragmentDefinition(fragment) => {
                Some((fragment.name.clone(), fragment.clone()))
            }
            _ => None,
        })
        .collect();

    let mut reachable = IndexSet::new();
    let mut removed_variables = IndexSet::new();
    for definition in &mut document.definitions {
        let ast::Definition::OperationDefinition(operation) = definition else {
            continue;
        };
        let mut usage = Usage::default();
        usage.directives(&operation.directives);
        usage.selection_set(&operation.selection_set);
        while let Some(name) = usage.pending_fragments.pop() {
            if let Some(fragment) = fragments.get(&name) {
                usage.directives(&fragment.directives);
                usage.selection_set(&fragment.selection_set);
            }
        }

        if operation
            .variables
            .iter()
            .any(|variable| !usage.variables.contains(&variable.name))
        {
            let operation = operation.make_mut();
            operation.variables.retain(|variable| {
                let used = usage.variables.contains(&variable.name);
                if !used {
                    removed_variables.insert(variable.name.to_string());
                }
                used
            });
        }
        reachable.extend(usage.fragments);
    }

    document.definitions.retain(|definition| match definition {
        ast::Definition::FragmentDefinition(fragment) => reachable.contains(&fragment.name),
        _ => true,
    });
    (document, removed_variables)
}

#[derive(Default)]
struct Usage {
    variables: IndexSet<Name>,
    fragments: IndexSet<Name>,
    pending_fragments: Vec<Name>,
}

impl Usage {
    fn selection_set(&mut self, set: &[ast::Selection]) {
        for selection in set {
            match selection {
                ast::Selection::Field(field) => {
                    for argument in &field.arguments {
                        self.value(&argument.value);
                    }
                    self.directives(&field.directives);
                    self.selection_set(&field.selection_set);
                }
                ast::Selection::FragmentSpread(spread) => {
                    self.directives(&spread.directives);
                    if self.fragments.insert(spread.fragment_name.clone()) {
                        self.pending_fragments.push(spread.fragment_name.clone());
                    }
                }
                ast::Selection::InlineFragment(inline) => {
                    self.directives(&inline.directives);
                    self.selection_set(&inline.selection_set);
                }
            }
        }
    }

    fn directives(&mut self, directives: &ast::DirectiveList) {
        for directive in directives.iter() {
            for argument in &directive.arguments {
                self.value(&argument.value);
            }
        }
    }

    fn value(&mut self, value: &ast::Value) {
        match value {
            ast::Value::Variable(name) => {
                self.variables.insert(name.clone());
            }
            ast::Value::List(items) => items.iter().for_each(|item| self.value(item)),
            ast::Value::Object(entries) => entries.iter().for_each(|(_, value)| self.value(value)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::introspection::OriginSchema;
    use crate::schema::Bootstrap;
    use crate::schema::OverlayOptions;
    use crate::schema::overlay;

    const BASE: &str = r#"
        type Query {
          person(id: ID): Person
          people: [Person]
          search: [Result]
        }

        union Result = Person

        interface Named {
          name: String
        }

        type Person implements Named {
          name: String
          age: Int
        }
    "#;

    const EXTENSION: &str = r#"
        extend type Person {
          pet(kind: String): Pet
        }

        type Pet {
          kind: String
        }

        extend type Query {
          pets: [Pet]
        }

        extend union Result = Pet

        directive @local(if: Boolean) on QUERY | FIELD | FRAGMENT_SPREAD | INLINE_FRAGMENT
    "#;

    fn schema() -> OverlaySchema {
        overlay(
            &OriginSchema::from_sdl(BASE).unwrap(),
            &Bootstrap::builtin().unwrap(),
            &[EXTENSION],
            OverlayOptions::default(),
        )
        .unwrap()
    }

    fn index(schema: &OverlaySchema) -> ExtensionFieldIndex {
        ExtensionFieldIndex::from_schema(schema)
    }

    fn normalized(query: &str) -> String {
        ast::Document::parse(query, "expected.graphql")
            .unwrap()
            .to_string()
    }

    fn assert_rewrites(query: &str, expected: &str) {
        let schema = schema();
        assert_eq!(
            rewrite(&schema, &index(&schema), query).unwrap(),
            normalized(expected)
        );
    }

    #[test]
    fn strips_extension_fields_and_asks_for_typename() {
        assert_rewrites("{ person { name pet } }", "{ person { name __typename } }");
    }

    #[test]
    fn does_not_descend_into_stripped_fields() {
        assert_rewrites(
            "{ person { pet(kind: \"cat\") { kind } age } people { name } }",
            "{ person { age __typename } people { name __typename } }",
        );
    }

    #[test]
    fn operation_root_keeps_a_selection() {
        assert_rewrites("{ pets { kind } }", "{ __typename }");
        assert_rewrites("query Pets { pets }", "query Pets { __typename }");
    }

    #[test]
    fn rewriting_is_idempotent() {
        let schema = schema();
        let index = index(&schema);
        for query in [
            "{ person { name pet } }",
            "{ __typename person { __typename name } }",
            "query { person { ... on Person { pet age } } }",
            "{ pets }",
        ] {
            let once = rewrite(&schema, &index, query).unwrap();
            let twice = rewrite(&schema, &index, &once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn existing_typename_is_not_duplicated() {
        assert_rewrites(
            "{ person { __typename name } }",
            "{ person { __typename name } }",
        );
        // An aliased one does not count.
        assert_rewrites(
            "{ person { kind: __typename } }",
            "{ person { kind: __typename __typename } }",
        );
    }

    #[test]
    fn strips_inside_fragments() {
        assert_rewrites(
            r#"
            query {
              person {
                ...P
                ... on Person { pet }
                ... on Named { name }
              }
            }

            fragment P on Person {
              name
              pet { kind }
            }
            "#,
            r#"
            fragment P on Person {
              name
              __typename
            }

            query {
              person {
                ...P
                ... on Person { __typename }
                ... on Named { name __typename }
                __typename
              }
            }
            "#,
        );
    }

    #[test]
    fn removes_unused_variables_and_fragments() {
        let schema = schema();
        let document = ast::Document::parse(
            r#"
            query Q($id: ID, $kind: String) {
              person(id: $id) {
                pet(kind: $kind) { ...K }
              }
            }

            fragment K on Pet { kind }
            "#,
            "query.graphql",
        )
        .unwrap();
        let rewritten = rewrite_document(&schema, &index(&schema), &document).unwrap();
        assert_eq!(
            rewritten.query,
            normalized("query Q($id: ID) { person(id: $id) { __typename } }")
        );
        assert_eq!(
            rewritten.removed_variables,
            IndexSet::from(["kind".to_string()])
        );
        assert_eq!(
            rewritten.operation_variables(Some("Q")),
            Some(IndexSet::from(["id"]))
        );
        assert_eq!(rewritten.operation_variables(Some("Other")), None);
    }

    #[test]
    fn keeps_variables_used_in_directives_and_fragments() {
        assert_rewrites(
            r#"
            query Q($skip: Boolean!, $id: ID) {
              person(id: $id) @skip(if: $skip) { ...N }
            }

            fragment N on Person { name @include(if: $skip) }
            "#,
            r#"
            fragment N on Person { name @include(if: $skip) __typename }

            query Q($skip: Boolean!, $id: ID) {
              person(id: $id) @skip(if: $skip) { ...N __typename }
            }
            "#,
        );
    }

    #[test]
    fn strips_inline_fragments_on_extension_types() {
        assert_rewrites(
            "{ search { ... on Pet { kind } ... on Person { name } } }",
            "{ search { ... on Person { name __typename } __typename } }",
        );
        assert_rewrites(
            "{ search { ... on Pet { kind } } }",
            "{ search { __typename } }",
        );
    }

    #[test]
    fn strips_fragments_on_extension_types() {
        let schema = schema();
        let rewritten = rewrite(
            &schema,
            &index(&schema),
            r#"
            query {
              search { ...PetFields ...PersonFields }
            }

            fragment PetFields on Pet { kind }
            fragment PersonFields on Person { name }
            "#,
        )
        .unwrap();
        assert!(!rewritten.contains("Pet"), "{rewritten}");
        assert_eq!(
            rewritten,
            normalized(
                r#"
                fragment PersonFields on Person { name __typename }

                query { search { ...PersonFields __typename } }
                "#
            )
        );
    }

    #[test]
    fn strips_extension_directives() {
        let schema = schema();
        let document = ast::Document::parse(
            r#"
            query Q($local: Boolean, $skip: Boolean!) @local {
              person @local(if: $local) {
                name @skip(if: $skip) @local
                ... on Person @local { age }
                ...N @local
              }
            }

            fragment N on Person { name }
            "#,
            "query.graphql",
        )
        .unwrap();
        let rewritten = rewrite_document(&schema, &index(&schema), &document).unwrap();
        assert_eq!(
            rewritten.query,
            normalized(
                r#"
                fragment N on Person { name __typename }

                query Q($skip: Boolean!) {
                  person {
                    name @skip(if: $skip)
                    ... on Person { age __typename }
                    ...N
                    __typename
                  }
                }
                "#
            )
        );
        assert_eq!(
            rewritten.removed_variables,
            IndexSet::from(["local".to_string()])
        );
    }

    #[test]
    fn overrides_strip_remote_fields() {
        let schema = schema();
        let index = index(&schema).with_overrides([("Person", ["age"])]);
        assert_eq!(
            rewrite(&schema, &index, "{ person { name age } }").unwrap(),
            normalized("{ person { name __typename } }")
        );
    }

    #[test]
    fn meta_fields_are_kept() {
        assert_rewrites(
            "{ __schema { queryType { name } } }",
            "{ __schema { queryType { name __typename } __typename } }",
        );
    }

    #[test]
    fn original_document_is_untouched() {
        let schema = schema();
        let document = ast::Document::parse("{ person { name pet } }", "query.graphql").unwrap();
        let before = document.to_string();
        rewrite_document(&schema, &index(&schema), &document).unwrap();
        assert_eq!(document.to_string(), before);
    }

    #[test]
    fn syntax_errors_are_parse_errors() {
        let schema = schema();
        assert!(matches!(
            rewrite(&schema, &index(&schema), "{ person { name "),
            Err(RewriteError::Parse(_))
        ));
    }

    #[test]
    fn unknown_fields_fail_the_traversal() {
        let schema = schema();
        assert_eq!(
            rewrite(&schema, &index(&schema), "{ person { nope } }"),
            Err(RewriteError::Traversal(
                "no field `nope` in type `Person`".to_string()
            ))
        );
    }
}
