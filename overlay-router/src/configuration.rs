//! Logic for loading configuration in to an object model

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use displaydoc::Display;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use indexmap::IndexMap;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::cache::DEFAULT_CAPACITY;
use crate::upstream::DEFAULT_TIMEOUT;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not read configuration from {path}: {error}
    CannotRead {
        path: String,
        error: std::io::Error,
    },
    /// could not deserialize configuration: {0}
    DeserializeConfigError(#[from] serde_yaml::Error),
    /// invalid header name '{0}'
    InvalidHeaderName(String),
    /// invalid value for header '{0}'
    InvalidHeaderValue(String),
}

/// The configuration for the overlay router.
///
/// Can be created through `serde::Deserialize` from various formats,
/// or inline in Rust code with the builders.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// The remote GraphQL server.
    pub upstream: Upstream,

    /// How extensions are merged onto the remote schema.
    #[serde(default)]
    pub overlay: Overlay,
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder(visibility = "pub")]
    fn new(upstream: Upstream, overlay: Option<Overlay>) -> Self {
        Self {
            upstream,
            overlay: overlay.unwrap_or_default(),
        }
    }

    /// Parse configuration from a string in YAML syntax.
    ///
    /// Header names and values are checked too.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        let configuration: Configuration = serde_yaml::from_str(yaml)?;
        configuration.upstream.headers.insert_headers()?;
        configuration.upstream.headers.propagate_headers()?;
        Ok(configuration)
    }

    /// Read configuration from a YAML file.
    pub fn read(path: impl Into<PathBuf>) -> Result<Self, ConfigurationError> {
        let path = path.into();
        let yaml = std::fs::read_to_string(&path).map_err(|error| ConfigurationError::CannotRead {
            path: path.display().to_string(),
            error,
        })?;
        Self::from_yaml(&yaml)
    }
}

impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_yaml(s)
    }
}

/// Remote server configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Upstream {
    /// The URL of the remote GraphQL endpoint.
    pub url: Url,

    /// Timeout of each remote request, in human-readable format; defaults to 30s
    #[serde(with = "humantime_serde", default = "default_timeout")]
    #[schemars(with = "String", default = "default_timeout")]
    pub timeout: Duration,

    /// Headers sent to the remote server.
    #[serde(default)]
    pub headers: Headers,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

#[buildstructor::buildstructor]
impl Upstream {
    #[builder(visibility = "pub")]
    fn new(url: Url, timeout: Option<Duration>, headers: Option<Headers>) -> Self {
        Self {
            url,
            timeout: timeout.unwrap_or_else(default_timeout),
            headers: headers.unwrap_or_default(),
        }
    }
}

/// Headers sent to the remote server.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Headers {
    /// Names of client request headers copied to the remote request.
    #[serde(default)]
    pub propagate: Vec<String>,

    /// Headers added to every remote request.
    #[serde(default)]
    #[schemars(with = "std::collections::HashMap<String, String>")]
    pub insert: IndexMap<String, String>,
}

impl Headers {
    pub(crate) fn propagate_headers(&self) -> Result<Vec<HeaderName>, ConfigurationError> {
        self.propagate
            .iter()
            .map(|name| header_name(name))
            .collect()
    }

    pub(crate) fn insert_headers(&self) -> Result<HeaderMap, ConfigurationError> {
        let mut headers = HeaderMap::with_capacity(self.insert.len());
        for (name, value) in &self.insert {
            let value = HeaderValue::from_str(value)
                .map_err(|_| ConfigurationError::InvalidHeaderValue(name.clone()))?;
            headers.insert(header_name(name)?, value);
        }
        Ok(headers)
    }
}

fn header_name(name: &str) -> Result<HeaderName, ConfigurationError> {
    HeaderName::from_str(name).map_err(|_| ConfigurationError::InvalidHeaderName(name.to_string()))
}

/// Schema overlay configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Overlay {
    /// Extension SDL files merged onto the remote schema, in order.
    #[serde(default)]
    pub extensions: Vec<PathBuf>,

    /// Skip validation of the merged schema.
    #[serde(default)]
    pub skip_validation: bool,

    /// How many merged schemas are kept in memory; defaults to 32
    #[serde(default = "default_cache_capacity")]
    #[schemars(default = "default_cache_capacity")]
    pub cache_capacity: NonZeroUsize,

    /// Fields resolved locally even though the remote type declares them,
    /// by type name.
    #[serde(default)]
    #[schemars(with = "std::collections::HashMap<String, Vec<String>>")]
    pub extension_fields: IndexMap<String, Vec<String>>,
}

fn default_cache_capacity() -> NonZeroUsize {
    DEFAULT_CAPACITY
}

impl Default for Overlay {
    fn default() -> Self {
        Self {
            extensions: Vec::new(),
            skip_validation: false,
            cache_capacity: default_cache_capacity(),
            extension_fields: IndexMap::new(),
        }
    }
}

/// The JSON schema of the configuration file.
pub fn generate_config_schema() -> RootSchema {
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });
    settings
        .into_generator()
        .into_root_schema_for::<Configuration>()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn minimal_configuration() {
        let configuration = Configuration::from_yaml("upstream:\n  url: http://localhost:4001/graphql\n")
            .unwrap();
        assert_eq!(
            configuration,
            Configuration::builder()
                .upstream(
                    Upstream::builder()
                        .url(Url::parse("http://localhost:4001/graphql").unwrap())
                        .build()
                )
                .build()
        );
        assert_eq!(configuration.upstream.timeout, Duration::from_secs(30));
        assert_eq!(configuration.overlay.cache_capacity.get(), 32);
    }

    #[test]
    fn full_configuration() {
        let configuration: Configuration = r#"
upstream:
  url: https://example.com/graphql
  timeout: 2s 500ms
  headers:
    propagate:
      - authorization
    insert:
      x-client-name: overlay-router
overlay:
  extensions:
    - extensions/pets.graphql
  skip_validation: true
  cache_capacity: 4
  extension_fields:
    Person: [friends]
"#
        .parse()
        .unwrap();
        assert_eq!(configuration.upstream.timeout, Duration::from_millis(2500));
        assert_eq!(
            configuration.upstream.headers.propagate_headers().unwrap(),
            vec![HeaderName::from_static("authorization")]
        );
        assert_eq!(
            configuration
                .upstream
                .headers
                .insert_headers()
                .unwrap()
                .get("x-client-name"),
            Some(&HeaderValue::from_static("overlay-router"))
        );
        assert_eq!(
            configuration.overlay.extensions,
            vec![PathBuf::from("extensions/pets.graphql")]
        );
        assert!(configuration.overlay.skip_validation);
        assert_eq!(configuration.overlay.cache_capacity.get(), 4);
        assert_eq!(
            configuration.overlay.extension_fields.get("Person"),
            Some(&vec!["friends".to_string()])
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = Configuration::from_yaml(
            "upstream:\n  url: http://localhost:4001\n  retries: 3\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::DeserializeConfigError(_)));
        assert!(err.to_string().contains("retries"));
    }

    #[test]
    fn upstream_url_is_required() {
        assert!(Configuration::from_yaml("overlay:\n  skip_validation: true\n").is_err());
        assert!(Configuration::from_yaml("upstream:\n  url: not a url\n").is_err());
    }

    #[test]
    fn invalid_headers_are_rejected() {
        let err = Configuration::from_yaml(
            "upstream:\n  url: http://localhost:4001\n  headers:\n    propagate: [\"bad header\"]\n",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "invalid header name 'bad header'");

        let err = Configuration::from_yaml(
            "upstream:\n  url: http://localhost:4001\n  headers:\n    insert:\n      x-a: \"line\\nbreak\"\n",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "invalid value for header 'x-a'");
    }

    #[test]
    fn zero_cache_capacity_is_rejected() {
        assert!(Configuration::from_yaml(
            "upstream:\n  url: http://localhost:4001\noverlay:\n  cache_capacity: 0\n"
        )
        .is_err());
    }

    #[test]
    fn reads_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "upstream:\n  url: http://localhost:4001").unwrap();
        let configuration = Configuration::read(file.path()).unwrap();
        assert_eq!(configuration.upstream.url.as_str(), "http://localhost:4001/");

        let err = Configuration::read("/does/not/exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigurationError::CannotRead { .. }));
    }

    #[test]
    fn config_schema_describes_every_section() {
        let schema = serde_json::to_value(generate_config_schema()).unwrap();
        let properties = &schema["properties"];
        assert!(properties["upstream"].is_object());
        assert!(properties["overlay"].is_object());
        assert_eq!(schema["additionalProperties"], serde_json::json!(false));
        assert_eq!(schema["required"], serde_json::json!(["upstream"]));
    }
}
