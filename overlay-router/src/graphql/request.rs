use serde::Deserialize;
use serde::Serialize;

use crate::json_ext::Object;

/// A GraphQL `Request` used to represent both client and upstream requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Request {
    /// The GraphQL operation (e.g., query, mutation) string.
    ///
    /// A request without a query asks for the merged schema only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// The (optional) GraphQL operation name.
    ///
    /// When specified, it must match an operation of the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    /// The (optional) GraphQL variables in the form of a JSON object.
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub variables: Object,

    /// The (optional) GraphQL `extensions` of a GraphQL request.
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Request {
    #[builder(visibility = "pub")]
    /// This is the constructor (or builder) to use when constructing a GraphQL
    /// `Request`.
    ///
    /// The optionality of parameters on this constructor match the runtime
    /// requirements which are necessary to create a valid GraphQL `Request`.
    fn new(
        query: Option<String>,
        operation_name: Option<String>,
        variables: Option<Object>,
        extensions: Option<Object>,
    ) -> Self {
        Self {
            query,
            operation_name,
            variables: variables.unwrap_or_default(),
            extensions: extensions.unwrap_or_default(),
        }
    }
}
