//! Types related to GraphQL requests, responses, etc.

mod request;
mod response;

use heck::ToShoutySnakeCase;
pub use request::Request;
pub use response::Response;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Value;

use crate::json_ext::Object;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
/// The error location
pub struct Location {
    /// The line number
    pub line: u32,
    /// The column number
    pub column: u32,
}

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as may be found in the `errors` field of a GraphQL [`Response`].
///
/// Converted to (or from) JSON with serde.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[non_exhaustive]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the error in the GraphQL document of the originating request.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// If this is a field error, the JSON path to that field in [`Response::data`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Value>,

    /// The optional GraphQL extensions for this error.
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Error {
    /// Returns a builder that builds a GraphQL [`Error`] from its components.
    ///
    /// `.message()` is required. `.extension_code()` sets the `code` extension
    /// unless `.extensions()` already carries one.
    #[builder(visibility = "pub")]
    fn new(
        message: String,
        locations: Vec<Location>,
        path: Option<Value>,
        extension_code: Option<String>,
        extensions: Option<Object>,
    ) -> Self {
        let mut extensions = extensions.unwrap_or_default();
        if let Some(code) = extension_code {
            extensions
                .entry("code")
                .or_insert(Value::String(ByteString::from(code)));
        }
        Self {
            message,
            locations,
            path,
            extensions,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Trait used to get extension type from an error
pub trait ErrorExtension
where
    Self: Sized,
{
    /// Get the error code, e.g. `GRAPHQL_VALIDATION_FAILED`.
    fn extension_code(&self) -> String {
        std::any::type_name::<Self>().to_shouty_snake_case()
    }

    /// Extra entries for the `extensions` object.
    fn custom_extension_details(&self) -> Option<Object> {
        None
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn error_builder_sets_code_once() {
        let mut extensions = Object::new();
        extensions.insert("code", json!("ALREADY_THERE"));
        let error = Error::builder()
            .message("boom")
            .extension_code("IGNORED")
            .extensions(extensions)
            .build();
        assert_eq!(error.extensions.get("code"), Some(&json!("ALREADY_THERE")));

        let error = Error::builder()
            .message("boom")
            .extension_code("SET")
            .build();
        assert_eq!(error.extensions.get("code"), Some(&json!("SET")));
    }

    #[test]
    fn error_serialization_skips_empty_fields() {
        let error = Error::builder().message("boom").build();
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            serde_json::json!({ "message": "boom" })
        );
    }
}
