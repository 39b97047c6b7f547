//! Main entry point for the CLI command.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use clap::Parser;
use clap::Subcommand;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::configuration;
use crate::configuration::Configuration;
use crate::configuration::generate_config_schema;
use crate::proxy::Proxy;
use crate::query::rewrite;

/// Options for the overlay router
#[derive(Parser, Debug)]
#[command(
    name = "overlay-router",
    about = "Overlay locally defined schema extensions onto a remote GraphQL server"
)]
pub(crate) struct Opt {
    /// Log level (off|error|warn|info|debug|trace).
    #[arg(
        long = "log",
        default_value = "info",
        alias = "log-level",
        env = "OVERLAY_ROUTER_LOG",
        global = true
    )]
    log_level: String,

    /// Output logs as JSON.
    #[arg(long, env = "OVERLAY_ROUTER_JSON_LOGS", global = true)]
    json_logs: bool,

    /// Configuration file location.
    #[arg(short, long = "config", env = "OVERLAY_ROUTER_CONFIG_PATH", global = true)]
    config_path: Option<PathBuf>,

    /// URL of the remote GraphQL server, overriding the configured one.
    #[arg(long, env = "OVERLAY_ROUTER_UPSTREAM", global = true)]
    upstream: Option<Url>,

    /// Extension SDL file, merged after the configured ones. Can be repeated.
    #[arg(long = "extension", value_name = "PATH", global = true)]
    extensions: Vec<PathBuf>,

    /// Prints the configuration schema.
    #[arg(long)]
    config_schema: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Print the merged schema.
    Schema,
    /// Print a query as it would be sent to the remote server.
    Rewrite {
        /// File containing the client query.
        query_file: PathBuf,
    },
}

impl Opt {
    fn configuration(&self) -> Result<Configuration> {
        let mut configuration = match (&self.config_path, &self.upstream) {
            (Some(path), _) => Configuration::read(path)
                .with_context(|| format!("could not load configuration {}", path.display()))?,
            (None, Some(url)) => Configuration::builder()
                .upstream(configuration::Upstream::builder().url(url.clone()).build())
                .build(),
            (None, None) => {
                return Err(anyhow!(
                    "no remote server: use --upstream or --config to configure one"
                ));
            }
        };
        if let Some(url) = &self.upstream {
            configuration.upstream.url = url.clone();
        }
        configuration
            .overlay
            .extensions
            .extend(self.extensions.iter().cloned());
        Ok(configuration)
    }
}

/// This is the main overlay router entrypoint.
pub fn main() -> Result<()> {
    let opt = Opt::parse();

    if opt.config_schema {
        let schema = generate_config_schema();
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    init_logging(&opt)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(opt))
}

fn init_logging(opt: &Opt) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&opt.log_level).context("could not parse log configuration")?,
        )
        .with_writer(std::io::stderr);
    let result = if opt.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|err| anyhow!("could not set up logging: {err}"))
}

async fn run(opt: Opt) -> Result<()> {
    let Some(command) = &opt.command else {
        return Err(anyhow!(
            "a command is required, see `overlay-router --help`"
        ));
    };
    let configuration = opt.configuration()?;
    let proxy = Proxy::from_configuration(&configuration)
        .await
        .map_err(|err| anyhow!("could not start: {err}"))?;

    match command {
        Command::Schema => {
            let schema = proxy.merged_schema(None)?;
            println!("{}", schema.to_sdl());
        }
        Command::Rewrite { query_file } => {
            let query = tokio::fs::read_to_string(query_file)
                .await
                .with_context(|| format!("could not read {}", query_file.display()))?;
            let schema = proxy.merged_schema(None)?;
            let index = proxy.extension_field_index(None)?;
            println!("{}", rewrite(&schema, &index, &query)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_commands() {
        let opt = Opt::try_parse_from([
            "overlay-router",
            "--upstream",
            "http://localhost:4001/graphql",
            "rewrite",
            "query.graphql",
            "--extension",
            "pets.graphql",
        ])
        .unwrap();
        assert_eq!(
            opt.command,
            Some(Command::Rewrite {
                query_file: PathBuf::from("query.graphql")
            })
        );
        assert_eq!(opt.extensions, vec![PathBuf::from("pets.graphql")]);
        assert_eq!(opt.log_level, "info");
    }

    #[test]
    fn command_line_overrides_configuration() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "upstream:\n  url: http://localhost:4001\noverlay:\n  extensions: [a.graphql]"
        )
        .unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let opt = Opt::try_parse_from([
            "overlay-router",
            "--config",
            path.as_str(),
            "--upstream",
            "http://remote:4002/",
            "--extension",
            "b.graphql",
            "schema",
        ])
        .unwrap();
        let configuration = opt.configuration().unwrap();
        assert_eq!(configuration.upstream.url.as_str(), "http://remote:4002/");
        assert_eq!(
            configuration.overlay.extensions,
            vec![PathBuf::from("a.graphql"), PathBuf::from("b.graphql")]
        );
    }

    #[test]
    fn requires_a_remote_server() {
        let opt = Opt::try_parse_from(["overlay-router", "schema"]).unwrap();
        assert!(opt.configuration().is_err());
    }
}
