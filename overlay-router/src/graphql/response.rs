use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::Value;

use crate::graphql::Error;
use crate::json_ext::Object;

/// A graphql primary response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// The optional graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Error>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Response {
    /// Constructor
    #[builder(visibility = "pub")]
    fn new(data: Option<Value>, errors: Vec<Error>, extensions: Option<Object>) -> Self {
        Self {
            data,
            errors,
            extensions: extensions.unwrap_or_default(),
        }
    }

    /// Create a [`Response`] from the supplied bytes.
    ///
    /// A body that is valid JSON but not a GraphQL response object is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Response, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Whether the remote server reported any error.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
