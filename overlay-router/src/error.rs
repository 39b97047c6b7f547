//! Overlay router errors.
use apollo_compiler::validation::DiagnosticList;
use displaydoc::Display;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::Value;
use thiserror::Error;

pub use crate::configuration::ConfigurationError;
use crate::graphql;
use crate::graphql::ErrorExtension;
use crate::graphql::Location;
use crate::json_ext::Object;

/// A single diagnostic produced while parsing or validating a GraphQL document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The diagnostic message.
    pub message: String,
    /// Where the diagnostic points to in its source text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
}

impl Diagnostic {
    pub(crate) fn new(message: impl Into<String>, locations: Vec<Location>) -> Self {
        Self {
            message: message.into(),
            locations,
        }
    }

    pub(crate) fn from_list(list: &DiagnosticList) -> Vec<Diagnostic> {
        list.iter()
            .map(|diagnostic| {
                let error = diagnostic.unstable_to_json_compat();
                Diagnostic {
                    message: error.message,
                    locations: error
                        .locations
                        .iter()
                        .map(|location| Location {
                            line: location.line as u32,
                            column: location.column as u32,
                        })
                        .collect(),
                }
            })
            .collect()
    }

    fn to_graphql_error(&self, code: &str) -> graphql::Error {
        graphql::Error::builder()
            .message(self.message.clone())
            .locations(self.locations.clone())
            .extension_code(code)
            .build()
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.locations.first() {
            Some(location) => write!(
                f,
                "{} ({}:{})",
                self.message, location.line, location.column
            ),
            None => write!(f, "{}", self.message),
        }
    }
}

fn join(errors: &[Diagnostic]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Syntax errors in SDL or query text.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{}", join(&self.errors))]
pub struct ParseErrors {
    /// Every syntax error, in source order.
    pub errors: Vec<Diagnostic>,
}

impl ParseErrors {
    pub(crate) fn from_list(list: &DiagnosticList) -> Self {
        Self {
            errors: Diagnostic::from_list(list),
        }
    }
}

impl ErrorExtension for ParseErrors {
    fn extension_code(&self) -> String {
        "PARSING_ERROR".to_string()
    }
}

/// The merged extension and base SDL failed validation.
///
/// All validation errors are kept, in the order they were found.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{}", join(&self.errors))]
pub struct SchemaOverlayError {
    /// The underlying validation errors.
    pub errors: Vec<Diagnostic>,
}

impl ErrorExtension for SchemaOverlayError {
    fn extension_code(&self) -> String {
        "SCHEMA_OVERLAY_INVALID".to_string()
    }
}

/// A client query failed validation against the merged schema.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{}", join(&self.errors))]
pub struct QueryValidationErrors {
    /// The underlying validation errors.
    pub errors: Vec<Diagnostic>,
}

impl ErrorExtension for QueryValidationErrors {
    fn extension_code(&self) -> String {
        "GRAPHQL_VALIDATION_FAILED".to_string()
    }
}

/// Errors produced while building an overlay schema.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum OverlayError {
    /// SDL parsing failed: {0}
    Parse(#[from] ParseErrors),

    /// schema overlay validation failed: {0}
    Validation(#[from] SchemaOverlayError),
}

impl ErrorExtension for OverlayError {
    fn extension_code(&self) -> String {
        match self {
            OverlayError::Parse(err) => err.extension_code(),
            OverlayError::Validation(err) => err.extension_code(),
        }
    }
}

/// Errors related to the upstream GraphQL server.
///
/// Note that these are reported separately from local parse and validation
/// errors: the request was valid, the remote side failed.
#[derive(Error, Display, Debug, Clone, PartialEq)]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum UpstreamError {
    /// HTTP fetch failed from upstream: {reason}
    ///
    /// note that this relates to a transport error and not a GraphQL error
    Transport {
        /// The reason the fetch failed.
        reason: String,
    },

    /// upstream responded with HTTP status {status}
    Http {
        /// The HTTP status code.
        status: u16,
        /// The response body, if it could be read.
        body: Option<String>,
    },

    /// upstream response was malformed: {reason}
    MalformedResponse {
        /// The reason the deserialization failed.
        reason: String,
    },

    /// upstream returned GraphQL errors
    GraphQL {
        /// The errors as returned by the upstream server.
        errors: Vec<graphql::Error>,
        /// Partial data that came along with the errors.
        data: Option<Value>,
    },
}

impl ErrorExtension for UpstreamError {
    fn extension_code(&self) -> String {
        match self {
            UpstreamError::Transport { .. } => "UPSTREAM_TRANSPORT_ERROR",
            UpstreamError::Http { .. } => "UPSTREAM_HTTP_ERROR",
            UpstreamError::MalformedResponse { .. } => "UPSTREAM_MALFORMED_RESPONSE",
            UpstreamError::GraphQL { .. } => "UPSTREAM_GRAPHQL_ERROR",
        }
        .to_string()
    }

    fn custom_extension_details(&self) -> Option<Object> {
        match self {
            UpstreamError::Http { status, .. } => {
                let mut obj = Object::new();
                obj.insert("http", serde_json_bytes::json!({ "status": status }));
                Some(obj)
            }
            _ => None,
        }
    }
}

/// Errors while loading the origin schema through introspection.
#[derive(Error, Display, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum IntrospectionError {
    /// introspection request failed: {0}
    Upstream(#[from] UpstreamError),

    /// introspection response did not contain any data
    MissingData,

    /// introspection response could not be decoded: {reason}
    Decode {
        /// The reason the decoding failed.
        reason: String,
    },

    /// introspected schema is invalid: {0}
    Schema(#[from] OverlayError),
}

/// Errors while rewriting a query.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RewriteError {
    /// query parsing failed: {0}
    Parse(#[from] ParseErrors),

    /// could not rewrite query: {0}
    Traversal(String),
}

impl ErrorExtension for RewriteError {
    fn extension_code(&self) -> String {
        match self {
            RewriteError::Parse(err) => err.extension_code(),
            RewriteError::Traversal(_) => "QUERY_REWRITE_FAILED".to_string(),
        }
    }
}

/// Errors surfaced by the proxy for a single request.
#[derive(Error, Display, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ProxyError {
    /// {0}
    Overlay(#[from] OverlayError),

    /// query parsing failed: {0}
    Parse(#[from] ParseErrors),

    /// query validation failed: {0}
    Validation(#[from] QueryValidationErrors),

    /// Unknown operation named "{0}"
    UnknownOperation(String),

    /// Must provide operation name if query contains multiple operations.
    MissingOperationName,

    /// {0}
    Rewrite(#[from] RewriteError),

    /// {0}
    Upstream(#[from] UpstreamError),
}

impl ErrorExtension for ProxyError {
    fn extension_code(&self) -> String {
        match self {
            ProxyError::Overlay(err) => err.extension_code(),
            ProxyError::Parse(err) => err.extension_code(),
            ProxyError::Validation(err) => err.extension_code(),
            ProxyError::UnknownOperation(_) | ProxyError::MissingOperationName => {
                "GRAPHQL_VALIDATION_FAILED".to_string()
            }
            ProxyError::Rewrite(err) => err.extension_code(),
            ProxyError::Upstream(err) => err.extension_code(),
        }
    }
}

impl ProxyError {
    /// Whether the error was detected before any upstream call was made.
    pub fn is_local(&self) -> bool {
        !matches!(self, ProxyError::Upstream(_))
    }

    /// Convert the error to GraphQL errors, one per underlying diagnostic.
    ///
    /// Upstream GraphQL errors are passed through as the upstream sent them.
    pub fn to_graphql_errors(&self) -> Vec<graphql::Error> {
        let code = self.extension_code();
        let diagnostics = match self {
            ProxyError::Overlay(OverlayError::Parse(err)) | ProxyError::Parse(err) => &err.errors,
            ProxyError::Overlay(OverlayError::Validation(err)) => &err.errors,
            ProxyError::Validation(err) => &err.errors,
            ProxyError::Upstream(UpstreamError::GraphQL { errors, .. }) => {
                return errors.clone();
            }
            ProxyError::Upstream(err) => {
                return vec![
                    graphql::Error::builder()
                        .message(self.to_string())
                        .extension_code(code)
                        .and_extensions(err.custom_extension_details())
                        .build(),
                ];
            }
            _ => {
                return vec![
                    graphql::Error::builder()
                        .message(self.to_string())
                        .extension_code(code)
                        .build(),
                ];
            }
        };
        diagnostics
            .iter()
            .map(|diagnostic| diagnostic.to_graphql_error(&code))
            .collect()
    }

    /// Convert the error to an appropriate response.
    pub fn to_response(&self) -> graphql::Response {
        let data = match self {
            ProxyError::Upstream(UpstreamError::GraphQL { data, .. }) => data.clone(),
            _ => None,
        };
        graphql::Response::builder()
            .and_data(data)
            .errors(self.to_graphql_errors())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn diagnostics(n: usize) -> Vec<Diagnostic> {
        (0..n)
            .map(|i| {
                Diagnostic::new(
                    format!("error {i}"),
                    vec![Location {
                        line: i as u32 + 1,
                        column: 1,
                    }],
                )
            })
            .collect()
    }

    #[test]
    fn schema_overlay_error_lists_every_sub_error() {
        let err = ProxyError::from(OverlayError::from(SchemaOverlayError {
            errors: diagnostics(3),
        }));
        let errors = err.to_graphql_errors();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[2].message, "error 2");
        assert_eq!(errors[2].locations, vec![Location { line: 3, column: 1 }]);
        assert_eq!(
            errors[0].extensions.get("code"),
            Some(&json!("SCHEMA_OVERLAY_INVALID"))
        );
        assert_eq!(
            err.to_string(),
            "schema overlay validation failed: error 0 (1:1)\n\nerror 1 (2:1)\n\nerror 2 (3:1)"
        );
    }

    #[test]
    fn upstream_graphql_errors_are_passed_through_with_partial_data() {
        let upstream = vec![graphql::Error::builder().message("remote boom").build()];
        let err = ProxyError::from(UpstreamError::GraphQL {
            errors: upstream.clone(),
            data: Some(json!({"person": null})),
        });
        assert!(!err.is_local());
        let response = err.to_response();
        assert_eq!(response.errors, upstream);
        assert_eq!(response.data, Some(json!({"person": null})));
    }

    #[test]
    fn upstream_http_error_carries_status() {
        let err = ProxyError::from(UpstreamError::Http {
            status: 502,
            body: None,
        });
        let errors = err.to_graphql_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].extensions.get("code"),
            Some(&json!("UPSTREAM_HTTP_ERROR"))
        );
        assert_eq!(
            errors[0].extensions.get("http"),
            Some(&json!({ "status": 502 }))
        );
    }

    #[test]
    fn upstream_error_messages() {
        assert_eq!(
            UpstreamError::Transport {
                reason: "connection refused".to_string()
            }
            .to_string(),
            "HTTP fetch failed from upstream: connection refused"
        );
        assert_eq!(
            UpstreamError::Http {
                status: 503,
                body: None
            }
            .to_string(),
            "upstream responded with HTTP status 503"
        );
    }

    #[test]
    fn local_errors_are_flagged_local() {
        assert!(ProxyError::MissingOperationName.is_local());
        assert!(ProxyError::UnknownOperation("Q".into()).is_local());
    }
}
