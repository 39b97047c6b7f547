//! Schema overlay: merging extension SDL onto a remote schema.
//!
//! Every field of the merged schema carries a [`FieldOrigin`] telling whether
//! it was declared by the remote schema or by one of the extension documents.
//! The tag is computed once, when the schema is built, and never changes.

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::name;
use apollo_compiler::parser::FileId;
use apollo_compiler::parser::Parser;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;
use indexmap::IndexSet;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::error::Diagnostic;
use crate::error::OverlayError;
use crate::error::ParseErrors;
use crate::error::SchemaOverlayError;
use crate::introspection::OriginSchema;

mod bootstrap;
mod default_values;
pub(crate) mod legacy;

pub use bootstrap::Bootstrap;

/// Where a field of an overlay schema was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldOrigin {
    /// Declared by the remote schema.
    Native,
    /// Declared by an extension document, resolved locally.
    Extension,
}

impl FieldOrigin {
    pub fn is_extension(self) -> bool {
        matches!(self, FieldOrigin::Extension)
    }
}

/// Options for [`overlay`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayOptions {
    /// Skip schema validation and the default value check. Build errors are
    /// logged and the partially built schema is used.
    pub skip_validation: bool,
}

/// The sha256 hash of a piece of SDL text, hex encoded.
///
/// Whitespace and comments affect the hash.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Deserialize, Serialize)]
pub struct SchemaHash(Arc<String>);

impl SchemaHash {
    pub fn new(sdl: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(sdl);
        let hash = format!("{:x}", hasher.finalize());
        Self(Arc::new(hash))
    }

    /// Return the hash as a hexadecimal string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for SchemaHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.as_str())
    }
}

/// A field of an overlay schema, together with its origin.
#[derive(Debug, Clone, Copy)]
pub struct OverlayField<'a> {
    pub name: &'a Name,
    pub definition: &'a Component<FieldDefinition>,
    pub origin: FieldOrigin,
}

/// A merged schema where every object and interface field is tagged with its origin.
///
/// Types and directives the remote server does not know (declared by an
/// extension document or by the bootstrap) are recorded too.
///
/// Immutable once built, and cheap to clone.
#[derive(Debug, Clone)]
pub struct OverlaySchema {
    schema: Arc<Valid<Schema>>,
    origins: Arc<IndexMap<Name, IndexMap<Name, FieldOrigin>>>,
    local: Arc<LocalDefinitions>,
    hash: SchemaHash,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct LocalDefinitions {
    types: IndexSet<Name>,
    directives: IndexSet<Name>,
}

impl OverlaySchema {
    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    /// The origin of `type_name.field_name`, if the schema has such a field.
    ///
    /// Meta fields (`__typename`, ...) have no origin.
    pub fn field_origin(&self, type_name: &str, field_name: &str) -> Option<FieldOrigin> {
        self.origins.get(type_name)?.get(field_name).copied()
    }

    /// The fields of an object or interface type, in declaration order.
    pub fn fields<'a>(&'a self, type_name: &str) -> impl Iterator<Item = OverlayField<'a>> + 'a {
        let fields = match self.schema.types.get(type_name) {
            Some(ExtendedType::Object(object)) => Some(&object.fields),
            Some(ExtendedType::Interface(interface)) => Some(&interface.fields),
            _ => None,
        };
        let origins = self.origins.get(type_name);
        fields.into_iter().flatten().map(move |(name, definition)| {
            let origin = origins
                .and_then(|origins| origins.get(name))
                .copied()
                .unwrap_or(FieldOrigin::Native);
            OverlayField {
                name,
                definition,
                origin,
            }
        })
    }

    /// Every `(type, field)` pair declared by an extension document.
    pub fn extension_fields(&self) -> impl Iterator<Item = (&Name, &Name)> {
        self.origins.iter().flat_map(|(type_name, fields)| {
            fields
                .iter()
                .filter(|(_, origin)| origin.is_extension())
                .map(move |(field_name, _)| (type_name, field_name))
        })
    }

    /// Whether `type_name` is defined outside the remote schema.
    pub fn is_extension_type(&self, type_name: &str) -> bool {
        self.local.types.contains(type_name)
    }

    /// Whether the directive `@name` is defined outside the remote schema.
    pub fn is_extension_directive(&self, name: &str) -> bool {
        self.local.directives.contains(name)
    }

    /// Types defined outside the remote schema, in schema order.
    pub fn extension_types(&self) -> impl Iterator<Item = &Name> {
        self.local.types.iter()
    }

    /// The merged schema printed as SDL.
    pub fn to_sdl(&self) -> String {
        self.schema.to_string()
    }

    /// Hash of the printed merged schema.
    pub fn schema_hash(&self) -> &SchemaHash {
        &self.hash
    }
}

/// Merge `extensions` onto `base`.
///
/// The bootstrap vocabulary is always part of the result; redeclarations of it
/// in `base` or in `extensions` are dropped. When neither the bootstrap nor the
/// base declares a `schema` definition, root operations are taken from the
/// base object types named `Query`, `Mutation` and `Subscription`.
///
/// Fields declared by any of the `extensions` are tagged
/// [`FieldOrigin::Extension`], every other field [`FieldOrigin::Native`].
///
/// Unless validation is skipped, every build error, validation error and
/// invalid default value is collected into a single [`SchemaOverlayError`].
pub fn overlay(
    base: &OriginSchema,
    bootstrap: &Bootstrap,
    extensions: &[&str],
    options: OverlayOptions,
) -> Result<OverlaySchema, OverlayError> {
    let span = tracing::info_span!("overlay", extensions = extensions.len());
    let _guard = span.enter();

    let base_document = bootstrap.filter(base.document().clone());
    let layers = extensions
        .iter()
        .enumerate()
        .map(|(index, sdl)| parse_extension(bootstrap, index, sdl))
        .collect::<Result<Vec<_>, _>>()?;

    let mut builder = Schema::builder()
        .add_ast(bootstrap.document())
        .add_ast(&base_document);
    if let Some(schema_definition) = default_root_operations(bootstrap, &base_document) {
        let mut document = ast::Document::new();
        document.definitions.push(schema_definition);
        builder = builder.add_ast(&document);
    }
    let extension_files: HashSet<FileId> = layers
        .iter()
        .flat_map(|layer| layer.sources.keys().copied())
        .collect();
    for layer in &layers {
        builder = builder.add_ast(layer);
    }

    let mut errors = Vec::new();
    let schema = match builder.build() {
        Ok(schema) => schema,
        Err(invalid) if options.skip_validation => {
            tracing::warn!(
                errors = invalid.errors.len(),
                "ignoring overlay build errors"
            );
            invalid.partial
        }
        Err(invalid) => {
            errors.extend(Diagnostic::from_list(&invalid.errors));
            invalid.partial
        }
    };

    let schema = if options.skip_validation {
        Valid::assume_valid(schema)
    } else {
        let schema = match schema.validate() {
            Ok(valid) => valid.into_inner(),
            Err(invalid) => {
                errors.extend(Diagnostic::from_list(&invalid.errors));
                invalid.partial
            }
        };
        // The compiler may already flag some of the same literals.
        for diagnostic in default_values::validate(&schema) {
            let duplicate = errors.iter().any(|error| {
                !error.locations.is_empty() && error.locations == diagnostic.locations
            });
            if !duplicate {
                errors.push(diagnostic);
            }
        }
        if !errors.is_empty() {
            tracing::debug!(errors = errors.len(), "overlay failed validation");
            return Err(SchemaOverlayError { errors }.into());
        }
        Valid::assume_valid(schema)
    };

    let origins = tag_fields(&schema, &extension_files);
    let local_files: HashSet<FileId> = extension_files
        .iter()
        .copied()
        .chain(bootstrap.document().sources.keys().copied())
        .collect();
    let local = local_definitions(&schema, &local_files);
    let hash = SchemaHash::new(&schema.to_string());
    tracing::debug!(
        extension_fields = origins
            .values()
            .flat_map(|fields| fields.values())
            .filter(|origin| origin.is_extension())
            .count(),
        "overlay built"
    );
    Ok(OverlaySchema {
        schema: Arc::new(schema),
        origins: Arc::new(origins),
        local: Arc::new(local),
        hash,
    })
}

fn parse_extension(
    bootstrap: &Bootstrap,
    index: usize,
    sdl: &str,
) -> Result<ast::Document, OverlayError> {
    let normalized = legacy::normalize(sdl);
    let document = Parser::new()
        .parse_ast(normalized, format!("extension-{index}.graphql"))
        .map_err(|invalid| ParseErrors::from_list(&invalid.errors))?;
    Ok(bootstrap.filter(document))
}

/// A `schema` definition naming the conventional root types, when none is declared.
fn default_root_operations(
    bootstrap: &Bootstrap,
    base: &ast::Document,
) -> Option<ast::Definition> {
    let declared = bootstrap
        .document()
        .definitions
        .iter()
        .chain(&base.definitions)
        .any(|definition| matches!(definition, ast::Definition::SchemaDefinition(_)));
    if declared {
        return None;
    }

    let intermediate = match Schema::builder()
        .add_ast(bootstrap.document())
        .add_ast(base)
        .build()
    {
        Ok(schema) => schema,
        // Reported when building the full overlay.
        Err(invalid) => invalid.partial,
    };
    let root_operations: Vec<_> = [
        (OperationType::Query, name!("Query")),
        (OperationType::Mutation, name!("Mutation")),
        (OperationType::Subscription, name!("Subscription")),
    ]
    .into_iter()
    .filter(|(_, type_name)| {
        intermediate
            .types
            .get(type_name)
            .is_some_and(|ty| ty.is_object())
    })
    .map(Node::new)
    .collect();
    if root_operations.is_empty() {
        return None;
    }
    Some(ast::Definition::SchemaDefinition(Node::new(
        ast::SchemaDefinition {
            description: None,
            directives: ast::DirectiveList::new(),
            root_operations,
        },
    )))
}

fn tag_fields(
    schema: &Schema,
    extension_files: &HashSet<FileId>,
) -> IndexMap<Name, IndexMap<Name, FieldOrigin>> {
    let origin_of = |field: &Component<FieldDefinition>| match field.location() {
        Some(location) if extension_files.contains(&location.file_id()) => FieldOrigin::Extension,
        _ => FieldOrigin::Native,
    };
    schema
        .types
        .iter()
        .filter(|(_, ty)| !ty.is_built_in())
        .filter_map(|(type_name, ty)| {
            let fields = match ty {
                ExtendedType::Object(object) => &object.fields,
                ExtendedType::Interface(interface) => &interface.fields,
                _ => return None,
            };
            let origins = fields
                .iter()
                .map(|(field_name, field)| (field_name.clone(), origin_of(field)))
                .collect();
            Some((type_name.clone(), origins))
        })
        .collect()
}

/// Types and directives whose definition (not extension) lives in one of `files`.
fn local_definitions(schema: &Schema, files: &HashSet<FileId>) -> LocalDefinitions {
    let is_local = |location: Option<apollo_compiler::parser::SourceSpan>| {
        location.is_some_and(|location| files.contains(&location.file_id()))
    };
    let types = schema
        .types
        .iter()
        .filter(|(_, ty)| {
            is_local(match ty {
                ExtendedType::Scalar(def) => def.location(),
                ExtendedType::Object(def) => def.location(),
                ExtendedType::Interface(def) => def.location(),
                ExtendedType::Union(def) => def.location(),
                ExtendedType::Enum(def) => def.location(),
                ExtendedType::InputObject(def) => def.location(),
            })
        })
        .map(|(name, _)| name.clone())
        .collect();
    let directives = schema
        .directive_definitions
        .iter()
        .filter(|(_, def)| is_local(def.location()))
        .map(|(name, _)| name.clone())
        .collect();
    LocalDefinitions { types, directives }
}
