//! The remote GraphQL server.

use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use http::HeaderValue;
use http::header::CONTENT_TYPE;
use serde_json_bytes::Value;
use tracing::Instrument;
use url::Url;

use crate::error::UpstreamError;
use crate::graphql;
use crate::json_ext::Object;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A request sent to the remote server.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpstreamRequest {
    pub query: String,
    pub operation_name: Option<String>,
    pub variables: Object,
    /// Headers to send along with the request, on top of the ones the
    /// transport always sends.
    pub headers: HeaderMap,
}

#[buildstructor::buildstructor]
impl UpstreamRequest {
    #[builder(visibility = "pub")]
    fn new(
        query: String,
        operation_name: Option<String>,
        variables: Option<Object>,
        headers: Option<HeaderMap>,
    ) -> Self {
        Self {
            query,
            operation_name,
            variables: variables.unwrap_or_default(),
            headers: headers.unwrap_or_default(),
        }
    }
}

/// Sends GraphQL requests to the remote server.
///
/// A response carrying GraphQL `errors` is still a successful call; callers
/// decide what to do with those (see [`into_data`]).
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    async fn call(&self, request: UpstreamRequest) -> Result<graphql::Response, UpstreamError>;
}

/// The response data, or [`UpstreamError::GraphQL`] if the response has errors.
///
/// Partial data is kept in the error.
pub fn into_data(response: graphql::Response) -> Result<Option<Value>, UpstreamError> {
    if response.has_errors() {
        return Err(UpstreamError::GraphQL {
            errors: response.errors,
            data: response.data,
        });
    }
    Ok(response.data)
}

/// [`Upstream`] over HTTP: a JSON `POST` per request.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    url: Url,
    headers: HeaderMap,
}

#[buildstructor::buildstructor]
impl HttpUpstream {
    /// `headers` are sent with every request, before request specific ones.
    #[builder(visibility = "pub")]
    fn new(
        url: Url,
        timeout: Option<Duration>,
        headers: Option<HeaderMap>,
    ) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .tcp_keepalive(Some(Duration::from_secs(5)))
            .build()
            .map_err(|err| UpstreamError::Transport {
                reason: err.to_string(),
            })?;
        Ok(Self {
            client,
            url,
            headers: headers.unwrap_or_default(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn call(&self, request: UpstreamRequest) -> Result<graphql::Response, UpstreamError> {
        let span = tracing::info_span!(
            "upstream_request",
            url = %self.url,
            operation_name = request.operation_name.as_deref().unwrap_or_default(),
        );
        async move {
            let mut headers = self.headers.clone();
            headers.extend(request.headers);
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            let body = graphql::Request::builder()
                .query(request.query)
                .and_operation_name(request.operation_name)
                .variables(request.variables)
                .build();

            tracing::trace!(query = ?body.query, "sending upstream request");
            let response = self
                .client
                .post(self.url.clone())
                .headers(headers)
                .json(&body)
                .send()
                .await
                .map_err(|err| UpstreamError::Transport {
                    reason: err.to_string(),
                })?;
            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(|err| UpstreamError::Transport {
                    reason: err.to_string(),
                })?;

            if !status.is_success() {
                // Many servers answer invalid requests with a 4xx and a GraphQL body.
                if let Ok(graphql) = graphql::Response::from_bytes(&bytes) {
                    if graphql.has_errors() {
                        tracing::debug!(%status, "upstream returned GraphQL errors");
                        return Ok(graphql);
                    }
                }
                return Err(UpstreamError::Http {
                    status: status.as_u16(),
                    body: Some(String::from_utf8_lossy(&bytes).into_owned()),
                });
            }

            graphql::Response::from_bytes(&bytes).map_err(|err| UpstreamError::MalformedResponse {
                reason: err.to_string(),
            })
        }
        .instrument(span)
        .await
    }
}
