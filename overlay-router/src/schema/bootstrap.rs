//! The reserved vocabulary every overlay starts from.
//!
//! Extension SDL written for mocking tools commonly re-declares the `@fake`,
//! `@listLength` and `@examples` directives (and the types they use) so the
//! file is valid SDL on its own. Those copies are dropped before merging: the
//! bootstrap document is the single definition of that vocabulary.

use std::sync::Arc;

use apollo_compiler::ast;
use indexmap::IndexSet;

use crate::error::OverlayError;
use crate::error::ParseErrors;

const BUILTIN_BOOTSTRAP_SDL: &str = include_str!("bootstrap.graphql");
const BOOTSTRAP_PATH: &str = "bootstrap.graphql";

/// An immutable bootstrap document and the definition names it reserves.
///
/// Directive names are reserved as `@name` so they never collide with a type
/// of the same name.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    document: Arc<ast::Document>,
    reserved: IndexSet<String>,
}

impl Bootstrap {
    /// The vocabulary used by mocking directives (`@fake`, `@listLength`, `@examples`).
    pub fn builtin() -> Result<Self, OverlayError> {
        Self::parse(BUILTIN_BOOTSTRAP_SDL)
    }

    /// A bootstrap made of arbitrary SDL.
    pub fn parse(sdl: &str) -> Result<Self, OverlayError> {
        let document = apollo_compiler::parser::Parser::new()
            .parse_ast(sdl, BOOTSTRAP_PATH)
            .map_err(|invalid| ParseErrors::from_list(&invalid.errors))?;
        let reserved = document
            .definitions
            .iter()
            .filter_map(definition_name)
            .collect();
        Ok(Self {
            document: Arc::new(document),
            reserved,
        })
    }

    /// A bootstrap that reserves nothing.
    pub fn empty() -> Self {
        Self {
            document: Arc::new(ast::Document::new()),
            reserved: IndexSet::new(),
        }
    }

    pub fn document(&self) -> &ast::Document {
        &self.document
    }

    /// Reserved names, in declaration order.
    pub fn reserved_names(&self) -> impl Iterator<Item = &str> {
        self.reserved.iter().map(String::as_str)
    }

    /// Whether `definition` redeclares part of the reserved vocabulary.
    pub fn is_reserved(&self, definition: &ast::Definition) -> bool {
        definition_name(definition).is_some_and(|name| self.reserved.contains(&name))
    }

    /// `document` without the definitions this bootstrap reserves.
    pub(crate) fn filter(&self, mut document: ast::Document) -> ast::Document {
        let before = document.definitions.len();
        document
            .definitions
            .retain(|definition| !self.is_reserved(definition));
        let dropped = before - document.definitions.len();
        if dropped > 0 {
            tracing::debug!(dropped, "ignoring redeclared bootstrap definitions");
        }
        document
    }
}

/// The name a definition is reserved under; schema definitions have none.
fn definition_name(definition: &ast::Definition) -> Option<String> {
    let name = definition.name()?;
    Some(match definition {
        ast::Definition::DirectiveDefinition(_) => format!("@{name}"),
        _ => name.to_string(),
    })
}
