//! Loading the remote schema.
//!
//! The remote server is asked for its schema with the standard introspection
//! query, and the result is encoded back into SDL. Only what SDL can express
//! is kept: built-in scalars, introspection types and the specified
//! directives are left out.

use std::fmt;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::parser::Parser;
use serde::Deserialize;
use serde_json_bytes::Value;

use crate::error::IntrospectionError;
use crate::error::OverlayError;
use crate::error::ParseErrors;
use crate::schema::legacy;
use crate::upstream;
use crate::upstream::Upstream;
use crate::upstream::UpstreamRequest;

/// The introspection query sent to the remote server.
///
/// Nests `ofType` seven levels deep, enough for `[[[T!]!]!]!` style types.
pub const INTROSPECTION_QUERY: &str = r#"
query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    subscriptionType { name }
    types {
      ...FullType
    }
    directives {
      name
      description
      locations
      args {
        ...InputValue
      }
    }
  }
}

fragment FullType on __Type {
  kind
  name
  description
  fields(includeDeprecated: true) {
    name
    description
    args {
      ...InputValue
    }
    type {
      ...TypeRef
    }
    isDeprecated
    deprecationReason
  }
  inputFields {
    ...InputValue
  }
  interfaces {
    ...TypeRef
  }
  enumValues(includeDeprecated: true) {
    name
    description
    isDeprecated
    deprecationReason
  }
  possibleTypes {
    ...TypeRef
  }
}

fragment InputValue on __InputValue {
  name
  description
  type { ...TypeRef }
  defaultValue
}

fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType {
          kind
          name
          ofType {
            kind
            name
            ofType {
              kind
              name
              ofType {
                kind
                name
              }
            }
          }
        }
      }
    }
  }
}
"#;

const ORIGIN_PATH: &str = "origin.graphql";

// Types we never encode to SDL.
const BUILT_IN_SCALARS: [&str; 5] = ["Boolean", "Float", "String", "Int", "ID"];

// Directives we never encode to SDL.
const SPECIFIED_DIRECTIVES: [&str; 5] = ["skip", "include", "deprecated", "specifiedBy", "oneOf"];

/// The remote schema, as an SDL document.
#[derive(Debug, Clone)]
pub struct OriginSchema {
    document: Arc<ast::Document>,
}

impl OriginSchema {
    /// Introspect the remote server.
    pub async fn fetch(upstream: &dyn Upstream) -> Result<Self, IntrospectionError> {
        let response = upstream
            .call(
                UpstreamRequest::builder()
                    .query(INTROSPECTION_QUERY)
                    .operation_name("IntrospectionQuery")
                    .build(),
            )
            .await?;
        let data = upstream::into_data(response)?.ok_or(IntrospectionError::MissingData)?;
        let origin = Self::from_introspection(&data)?;
        tracing::info!(
            definitions = origin.document.definitions.len(),
            "loaded remote schema"
        );
        Ok(origin)
    }

    /// Encode an introspection result (the `data` of the introspection response).
    pub fn from_introspection(data: &Value) -> Result<Self, IntrospectionError> {
        let data: IntrospectionData = serde_json_bytes::from_value(data.clone())
            .map_err(|err| IntrospectionError::Decode {
                reason: err.to_string(),
            })?;
        let sdl = data.schema.to_string();
        Ok(Self::parse(sdl)?)
    }

    /// A remote schema given as SDL, legacy dialect included.
    pub fn from_sdl(sdl: &str) -> Result<Self, OverlayError> {
        Self::parse(legacy::normalize(sdl).into_owned())
    }

    fn parse(sdl: String) -> Result<Self, OverlayError> {
        let document = Parser::new()
            .parse_ast(sdl, ORIGIN_PATH)
            .map_err(|invalid| ParseErrors::from_list(&invalid.errors))?;
        Ok(Self {
            document: Arc::new(document),
        })
    }

    pub fn document(&self) -> &ast::Document {
        &self.document
    }

    /// The remote schema printed as SDL.
    pub fn sdl(&self) -> String {
        self.document.to_string()
    }
}

#[derive(Debug, Deserialize)]
struct IntrospectionData {
    #[serde(rename = "__schema")]
    schema: IntrospectionSchema,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionSchema {
    query_type: Option<NamedRef>,
    mutation_type: Option<NamedRef>,
    subscription_type: Option<NamedRef>,
    types: Vec<FullType>,
    #[serde(default)]
    directives: Vec<DirectiveDefinition>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
    List,
    NonNull,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullType {
    kind: TypeKind,
    name: String,
    description: Option<String>,
    fields: Option<Vec<Field>>,
    input_fields: Option<Vec<InputValue>>,
    interfaces: Option<Vec<TypeRef>>,
    enum_values: Option<Vec<EnumValue>>,
    possible_types: Option<Vec<TypeRef>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Field {
    name: String,
    description: Option<String>,
    #[serde(default)]
    args: Vec<InputValue>,
    #[serde(rename = "type")]
    ty: TypeRef,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputValue {
    name: String,
    description: Option<String>,
    #[serde(rename = "type")]
    ty: TypeRef,
    default_value: Option<String>,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnumValue {
    name: String,
    description: Option<String>,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeRef {
    kind: TypeKind,
    name: Option<String>,
    of_type: Option<Box<TypeRef>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectiveDefinition {
    name: String,
    description: Option<String>,
    #[serde(default)]
    args: Vec<InputValue>,
    locations: Vec<String>,
}

/// Encodes the schema into SDL.
///
/// Malformed names or types are written as is: parsing the output reports
/// them.
impl Display for IntrospectionSchema {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.write_schema_definition(f)?;

        for directive in &self.directives {
            if SPECIFIED_DIRECTIVES.contains(&directive.name.as_str()) {
                continue;
            }
            write_description(f, "", directive.description.as_deref())?;
            write!(f, "directive @{}", directive.name)?;
            write_arguments(f, &directive.args)?;
            writeln!(f, " on {}\n", directive.locations.join(" | "))?;
        }

        for ty in &self.types {
            if ty.name.starts_with("__") || BUILT_IN_SCALARS.contains(&ty.name.as_str()) {
                continue;
            }
            write!(f, "{ty}")?;
        }
        Ok(())
    }
}

impl IntrospectionSchema {
    /// A `schema` definition, only written when root types have
    /// unconventional names.
    fn write_schema_definition(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let roots = [
            ("query", "Query", &self.query_type),
            ("mutation", "Mutation", &self.mutation_type),
            ("subscription", "Subscription", &self.subscription_type),
        ];
        let conventional = roots.iter().all(|(_, default, root)| {
            root.as_ref().is_none_or(|root| root.name == *default)
        });
        if conventional {
            return Ok(());
        }
        writeln!(f, "schema {{")?;
        for (operation, _, root) in roots {
            if let Some(root) = root {
                writeln!(f, "  {operation}: {}", root.name)?;
            }
        }
        writeln!(f, "}}\n")
    }
}

impl Display for FullType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_description(f, "", self.description.as_deref())?;
        match self.kind {
            TypeKind::Scalar => writeln!(f, "scalar {}", self.name)?,
            TypeKind::Object | TypeKind::Interface => {
                let keyword = if self.kind == TypeKind::Object {
                    "type"
                } else {
                    "interface"
                };
                write!(f, "{keyword} {}", self.name)?;
                let interfaces: Vec<_> = self
                    .interfaces
                    .iter()
                    .flatten()
                    .filter_map(|interface| interface.name.as_deref())
                    .collect();
                if !interfaces.is_empty() {
                    write!(f, " implements {}", interfaces.join(" & "))?;
                }
                let fields = self.fields.as_deref().unwrap_or_default();
                if fields.is_empty() {
                    return writeln!(f, "\n");
                }
                writeln!(f, " {{")?;
                for field in fields {
                    write_description(f, "  ", field.description.as_deref())?;
                    write!(f, "  {}", field.name)?;
                    write_arguments(f, &field.args)?;
                    write!(f, ": {}", field.ty)?;
                    write_deprecation(
                        f,
                        field.is_deprecated,
                        field.deprecation_reason.as_deref(),
                    )?;
                    writeln!(f)?;
                }
                writeln!(f, "}}")?;
            }
            TypeKind::Union => {
                let members: Vec<_> = self
                    .possible_types
                    .iter()
                    .flatten()
                    .filter_map(|member| member.name.as_deref())
                    .collect();
                write!(f, "union {}", self.name)?;
                if !members.is_empty() {
                    write!(f, " = {}", members.join(" | "))?;
                }
                writeln!(f)?;
            }
            TypeKind::Enum => {
                let values = self.enum_values.as_deref().unwrap_or_default();
                if values.is_empty() {
                    return writeln!(f, "enum {}\n", self.name);
                }
                writeln!(f, "enum {} {{", self.name)?;
                for value in values {
                    write_description(f, "  ", value.description.as_deref())?;
                    write!(f, "  {}", value.name)?;
                    write_deprecation(
                        f,
                        value.is_deprecated,
                        value.deprecation_reason.as_deref(),
                    )?;
                    writeln!(f)?;
                }
                writeln!(f, "}}")?;
            }
            TypeKind::InputObject => {
                let fields = self.input_fields.as_deref().unwrap_or_default();
                if fields.is_empty() {
                    return writeln!(f, "input {}\n", self.name);
                }
                writeln!(f, "input {} {{", self.name)?;
                for field in fields {
                    write_description(f, "  ", field.description.as_deref())?;
                    write!(f, "  {field}")?;
                    writeln!(f)?;
                }
                writeln!(f, "}}")?;
            }
            TypeKind::List | TypeKind::NonNull => {
                tracing::warn!(name = %self.name, "ignoring wrapping type in introspection types");
            }
        }
        writeln!(f)
    }
}

impl Display for TypeRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (self.kind, &self.of_type) {
            (TypeKind::NonNull, Some(inner)) => write!(f, "{inner}!"),
            (TypeKind::List, Some(inner)) => write!(f, "[{inner}]"),
            _ => write!(f, "{}", self.name.as_deref().unwrap_or_default()),
        }
    }
}

/// `name: Type = default`, with a trailing deprecation.
impl Display for InputValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)?;
        // Already a GraphQL literal.
        if let Some(default_value) = &self.default_value {
            write!(f, " = {default_value}")?;
        }
        write_deprecation(f, self.is_deprecated, self.deprecation_reason.as_deref())
    }
}

fn write_arguments(f: &mut Formatter<'_>, args: &[InputValue]) -> fmt::Result {
    if args.is_empty() {
        return Ok(());
    }
    write!(f, "(")?;
    for (index, arg) in args.iter().enumerate() {
        if index > 0 {
            write!(f, ", ")?;
        }
        if let Some(description) = &arg.description {
            write!(f, "{} ", string_literal(description))?;
        }
        write!(f, "{arg}")?;
    }
    write!(f, ")")
}

fn write_deprecation(
    f: &mut Formatter<'_>,
    is_deprecated: bool,
    reason: Option<&str>,
) -> fmt::Result {
    match (is_deprecated, reason) {
        (false, _) => Ok(()),
        (true, Some(reason)) => write!(f, " @deprecated(reason: {})", string_literal(reason)),
        (true, None) => write!(f, " @deprecated"),
    }
}

fn write_description(
    f: &mut Formatter<'_>,
    indent: &str,
    description: Option<&str>,
) -> fmt::Result {
    match description {
        Some(description) => writeln!(f, "{indent}{}", string_literal(description)),
        None => Ok(()),
    }
}

/// JSON string escapes are all valid GraphQL string escapes.
fn string_literal(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}
