//! The proxy orchestrator.
//!
//! Per request: get the merged schema for the extension SDL (from the cache,
//! or by building it), parse and validate the client query against it,
//! rewrite it, forward it upstream, and hand the remote data back as the root
//! value for local execution of the extension fields.

use std::sync::Arc;

use apollo_compiler::ast;
use http::HeaderMap;
use http::HeaderName;
use indexmap::IndexMap;
use serde_json_bytes::Value;
use tower::BoxError;

use crate::cache::Overlay;
use crate::cache::OverlayCache;
use crate::configuration::Configuration;
use crate::error::Diagnostic;
use crate::error::OverlayError;
use crate::error::ParseErrors;
use crate::error::ProxyError;
use crate::error::QueryValidationErrors;
use crate::error::UpstreamError;
use crate::graphql;
use crate::index::ExtensionFieldIndex;
use crate::introspection::OriginSchema;
use crate::json_ext;
use crate::json_ext::Object;
use crate::query::rewrite_document;
use crate::schema::Bootstrap;
use crate::schema::OverlayOptions;
use crate::schema::OverlaySchema;
use crate::schema::overlay;
use crate::upstream::HttpUpstream;
use crate::upstream::Upstream;
use crate::upstream::UpstreamRequest;
use crate::upstream::into_data;

/// What the proxy hands back for a request.
#[derive(Debug, Clone)]
pub enum ProxyResponse {
    /// The request had no query: only the merged schema is returned.
    Introspection { schema: OverlaySchema },
    /// The remote part of the query was executed.
    Execution {
        schema: OverlaySchema,
        /// The remote `data`, to resolve the extension fields against.
        root_value: Object,
    },
}

impl ProxyResponse {
    pub fn schema(&self) -> &OverlaySchema {
        match self {
            ProxyResponse::Introspection { schema } | ProxyResponse::Execution { schema, .. } => {
                schema
            }
        }
    }

    pub fn root_value(&self) -> Option<&Object> {
        match self {
            ProxyResponse::Introspection { .. } => None,
            ProxyResponse::Execution { root_value, .. } => Some(root_value),
        }
    }
}

/// Sits between clients and the remote server.
///
/// The origin schema is loaded once; merged schemas are cached per distinct
/// extension SDL and shared by every request.
pub struct Proxy {
    origin: OriginSchema,
    bootstrap: Bootstrap,
    extensions: Vec<String>,
    extension_fields: IndexMap<String, Vec<String>>,
    options: OverlayOptions,
    propagate_headers: Vec<HeaderName>,
    upstream: Arc<dyn Upstream>,
    cache: OverlayCache,
}

#[buildstructor::buildstructor]
impl Proxy {
    /// `extensions` are merged into every schema, before the extension SDL of
    /// a request. `extension_fields` are stripped from queries on top of the
    /// fields the extensions declare. Without a `bootstrap`, the builtin one
    /// is used.
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)]
    fn new(
        origin: OriginSchema,
        upstream: Arc<dyn Upstream>,
        bootstrap: Option<Bootstrap>,
        extensions: Vec<String>,
        extension_fields: Option<IndexMap<String, Vec<String>>>,
        options: Option<OverlayOptions>,
        propagate_headers: Vec<HeaderName>,
        cache_capacity: Option<std::num::NonZeroUsize>,
    ) -> Result<Self, OverlayError> {
        let bootstrap = match bootstrap {
            Some(bootstrap) => bootstrap,
            None => Bootstrap::builtin()?,
        };
        Ok(Self {
            origin,
            bootstrap,
            extensions,
            extension_fields: extension_fields.unwrap_or_default(),
            options: options.unwrap_or_default(),
            propagate_headers,
            upstream,
            cache: cache_capacity.map(OverlayCache::new).unwrap_or_default(),
        })
    }

    /// Create a proxy for `configuration`: introspect the remote server and
    /// read the configured extension files.
    pub async fn from_configuration(configuration: &Configuration) -> Result<Self, BoxError> {
        let upstream = HttpUpstream::builder()
            .url(configuration.upstream.url.clone())
            .timeout(configuration.upstream.timeout)
            .headers(configuration.upstream.headers.insert_headers()?)
            .build()?;
        let origin = OriginSchema::fetch(&upstream).await?;

        let mut extensions = Vec::with_capacity(configuration.overlay.extensions.len());
        for path in &configuration.overlay.extensions {
            let sdl = tokio::fs::read_to_string(path)
                .await
                .map_err(|err| format!("could not read {}: {err}", path.display()))?;
            extensions.push(sdl);
        }

        let proxy = Proxy::builder()
            .origin(origin)
            .upstream(Arc::new(upstream) as Arc<dyn Upstream>)
            .extensions(extensions)
            .extension_fields(configuration.overlay.extension_fields.clone())
            .options(OverlayOptions {
                skip_validation: configuration.overlay.skip_validation,
            })
            .propagate_headers(configuration.upstream.headers.propagate_headers()?)
            .cache_capacity(configuration.overlay.cache_capacity)
            .build()?;
        // Fail at startup rather than on the first request.
        proxy.merged_schema(None)?;
        Ok(proxy)
    }

    pub fn origin(&self) -> &OriginSchema {
        &self.origin
    }

    /// The merged schema for the configured extensions plus `extension_sdl`.
    pub fn merged_schema(&self, extension_sdl: Option<&str>) -> Result<OverlaySchema, ProxyError> {
        Ok(self.overlay(extension_sdl)?.schema)
    }

    /// The extension field index matching [`Proxy::merged_schema`].
    pub fn extension_field_index(
        &self,
        extension_sdl: Option<&str>,
    ) -> Result<Arc<ExtensionFieldIndex>, ProxyError> {
        Ok(self.overlay(extension_sdl)?.index)
    }

    fn overlay(&self, extension_sdl: Option<&str>) -> Result<Overlay, ProxyError> {
        let mut extensions: Vec<&str> = self.extensions.iter().map(String::as_str).collect();
        extensions.extend(extension_sdl);
        let key = OverlayCache::key(&extensions);
        let overlay = self.cache.get_or_build(key, || {
            let schema = overlay(&self.origin, &self.bootstrap, &extensions, self.options)?;
            let index = ExtensionFieldIndex::from_schema(&schema)
                .with_overrides(self.extension_fields.clone());
            Ok(Overlay {
                schema,
                index: Arc::new(index),
            })
        })?;
        Ok(overlay)
    }

    /// Handle one client request.
    ///
    /// Requests without a query return the merged schema without calling the
    /// remote server. Parse and validation failures, and operation name
    /// mismatches, are reported before any remote call.
    pub async fn handle(
        &self,
        extension_sdl: Option<&str>,
        request: graphql::Request,
        headers: &HeaderMap,
    ) -> Result<ProxyResponse, ProxyError> {
        let Overlay { schema, index } = self.overlay(extension_sdl)?;
        let Some(query) = request.query else {
            tracing::debug!("request without query, returning the merged schema");
            return Ok(ProxyResponse::Introspection { schema });
        };

        let document = ast::Document::parse(query, "query.graphql")
            .map_err(|invalid| ParseErrors::from_list(&invalid.errors))?;
        document
            .to_executable_validate(schema.schema())
            .map_err(|invalid| QueryValidationErrors {
                errors: Diagnostic::from_list(&invalid.errors),
            })?;
        check_operation_name(&document, request.operation_name.as_deref())?;

        let rewritten = rewrite_document(&schema, &index, &document)?;
        let variables = match rewritten.operation_variables(request.operation_name.as_deref()) {
            Some(declared) => {
                json_ext::retain_keys(&request.variables, |name| declared.contains(name))
            }
            None => request.variables,
        };

        let upstream_request = UpstreamRequest::builder()
            .query(rewritten.query)
            .and_operation_name(request.operation_name)
            .variables(variables)
            .headers(self.propagated(headers))
            .build();
        let response = self.upstream.call(upstream_request).await?;
        let root_value = match into_data(response)? {
            None | Some(Value::Null) => Object::new(),
            Some(Value::Object(data)) => data,
            Some(_) => {
                return Err(UpstreamError::MalformedResponse {
                    reason: "response data is not an object".to_string(),
                }
                .into());
            }
        };
        Ok(ProxyResponse::Execution { schema, root_value })
    }

    fn propagated(&self, headers: &HeaderMap) -> HeaderMap {
        let mut propagated = HeaderMap::new();
        for name in &self.propagate_headers {
            for value in headers.get_all(name) {
                propagated.append(name.clone(), value.clone());
            }
        }
        propagated
    }
}

fn check_operation_name(
    document: &ast::Document,
    operation_name: Option<&str>,
) -> Result<(), ProxyError> {
    let mut operations = document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            ast::Definition::OperationDefinition(operation) => Some(operation),
            _ => None,
        });
    match operation_name {
        Some(name) => {
            if operations.any(|operation| operation.name.as_ref().is_some_and(|n| n.as_str() == name)) {
                Ok(())
            } else {
                Err(ProxyError::UnknownOperation(name.to_string()))
            }
        }
        None if operations.count() == 1 => Ok(()),
        None => Err(ProxyError::MissingOperationName),
    }
}
