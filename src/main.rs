//! Purpose: `bookstack` CLI entry point; starts one catalog process per invocation.
//! Role: Binary crate root; parses args, builds the runtime, runs the chosen process.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Each subcommand is an independent process with its own store handle.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};

mod serve;
mod web;

use bookstack::api::{
    DEFAULT_UPSTREAM, Error, ErrorKind, RecordStore, StoreUri, connect, to_exit_code,
};
use serve::{Role, ServeConfig, StoreConfig};
use web::WebConfig;

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(code);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `bookstack --help`."));
            }
        },
    };

    dispatch(cli.command)?;
    Ok(0)
}

#[derive(Parser)]
#[command(
    name = "bookstack",
    version,
    about = "Book catalog services: read, write, and web gateway",
    long_about = None,
    after_help = r#"EXAMPLES
  $ bookstack provision --store file:./data
  $ bookstack write --bind 127.0.0.1:8082 --store file:./data
  $ bookstack read --bind 127.0.0.1:8081 --store file:./data
  $ bookstack web --bind 127.0.0.1:8080 --upstream http://127.0.0.1:8081

Logging follows RUST_LOG (default: info)."#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Serve GET /api/books, /api/authors, /api/years")]
    Read {
        #[arg(long, default_value = "127.0.0.1:8081", help = "Address to listen on")]
        bind: SocketAddr,
        #[command(flatten)]
        store: StoreArgs,
    },
    #[command(about = "Serve POST /api/books")]
    Write {
        #[arg(long, default_value = "127.0.0.1:8082", help = "Address to listen on")]
        bind: SocketAddr,
        #[arg(
            long,
            default_value_t = 1024 * 1024,
            help = "Largest accepted request body in bytes"
        )]
        max_body_bytes: u64,
        #[command(flatten)]
        store: StoreArgs,
    },
    #[command(about = "Serve JSON views composed from the read service")]
    Web {
        #[arg(long, default_value = "127.0.0.1:8080", help = "Address to listen on")]
        bind: SocketAddr,
        #[arg(long, default_value = DEFAULT_UPSTREAM, help = "Read service base URL")]
        upstream: String,
        #[arg(long, help = "Per-request upstream deadline in milliseconds (default: none)")]
        upstream_timeout_ms: Option<u64>,
        #[arg(long = "cors-origin", help = "Allowed browser origin (repeatable; default: any)")]
        cors_origins: Vec<String>,
    },
    #[command(about = "Create the collection and its unique id index, then exit")]
    Provision {
        #[command(flatten)]
        store: StoreArgs,
    },
}

#[derive(Args, Clone, Debug)]
struct StoreArgs {
    #[arg(
        long,
        default_value = "file:./data",
        help = "Document store: memory:, file:<dir>, or a directory path",
        value_hint = ValueHint::AnyPath
    )]
    store: String,
    #[arg(long, default_value = "catalog", help = "Database name")]
    database: String,
    #[arg(long, default_value = "books", help = "Collection name")]
    collection: String,
    #[arg(
        long,
        default_value_t = 10_000,
        help = "Store connection deadline in milliseconds"
    )]
    connect_timeout_ms: u64,
}

impl StoreArgs {
    fn into_config(self) -> Result<StoreConfig, Error> {
        Ok(StoreConfig {
            uri: StoreUri::parse(&self.store)?,
            database: self.database,
            collection: self.collection,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        })
    }
}

fn dispatch(command: Command) -> Result<(), Error> {
    match command {
        Command::Read { bind, store } => {
            let config = ServeConfig {
                role: Role::Read,
                bind,
                store: store.into_config()?,
                max_body_bytes: 1024 * 1024,
            };
            runtime()?.block_on(serve::serve(config))
        }
        Command::Write {
            bind,
            max_body_bytes,
            store,
        } => {
            let config = ServeConfig {
                role: Role::Write,
                bind,
                store: store.into_config()?,
                max_body_bytes,
            };
            runtime()?.block_on(serve::serve(config))
        }
        Command::Web {
            bind,
            upstream,
            upstream_timeout_ms,
            cors_origins,
        } => {
            let config = WebConfig {
                bind,
                upstream,
                upstream_timeout: upstream_timeout_ms.map(Duration::from_millis),
                cors_origins,
            };
            runtime()?.block_on(web::serve_web(config))
        }
        Command::Provision { store } => {
            let config = store.into_config()?;
            if config.connect_timeout.is_zero() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("--connect-timeout-ms must be greater than zero"));
            }
            let report = runtime()?.block_on(provision(config))?;
            emit_json(&report);
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start runtime")
                .with_source(err)
        })
}

async fn provision(config: StoreConfig) -> Result<Value, Error> {
    let handle = connect(&config.uri, config.connect_timeout).await?;
    let describe = handle.describe();
    let records = RecordStore::new(handle);
    let collection = serve::run_blocking(move || {
        records.provision(&config.database, &config.collection)
    })
    .await?;
    Ok(json!({
        "store": describe,
        "database": collection.database(),
        "collection": collection.name(),
        "unique": ["id"],
    }))
}

fn emit_json(value: &Value) {
    let json = serde_json::to_string(value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("error: ").to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::Validation => "invalid book payload",
        ErrorKind::DuplicateId => "duplicate book id",
        ErrorKind::StoreUnavailable => "document store unavailable",
        ErrorKind::ProvisioningFailed => "provisioning failed",
        ErrorKind::UpstreamUnavailable => "upstream unavailable",
        ErrorKind::Conflict => "already exists",
        ErrorKind::Permission => "permission denied",
        ErrorKind::Corrupt => "corrupt data",
        ErrorKind::Io => "i/o error",
    }
    .to_string()
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    if let Some(offset) = err.offset() {
        lines.push(format!("offset: {offset}"));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, error_json, error_text};
    use bookstack::api::{Error, ErrorKind, StoreUri};
    use clap::Parser;
    use serde_json::json;

    #[test]
    fn error_json_carries_kind_hint_and_offset() {
        let err = Error::new(ErrorKind::Corrupt)
            .with_message("invalid document json")
            .with_hint("Inspect the collection file.")
            .with_path("/tmp/books.jsonl")
            .with_offset(42);
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], json!("Corrupt"));
        assert_eq!(value["error"]["offset"], json!(42));
        assert_eq!(value["error"]["path"], json!("/tmp/books.jsonl"));
        assert_eq!(value["error"]["hint"], json!("Inspect the collection file."));
    }

    #[test]
    fn error_text_falls_back_to_kind_message() {
        let text = error_text(&Error::new(ErrorKind::DuplicateId));
        assert!(text.starts_with("error: duplicate book id"));
    }

    #[test]
    fn store_flags_default_to_local_file_store() {
        let cli = Cli::try_parse_from(["bookstack", "provision"]).expect("parse");
        let Command::Provision { store } = cli.command else {
            panic!("expected provision");
        };
        assert_eq!(store.database, "catalog");
        assert_eq!(store.collection, "books");
        assert_eq!(store.connect_timeout_ms, 10_000);
        let config = store.into_config().expect("config");
        assert_eq!(config.uri, StoreUri::File("./data".into()));
    }

    #[test]
    fn web_accepts_repeated_cors_origins() {
        let cli = Cli::try_parse_from([
            "bookstack",
            "web",
            "--cors-origin",
            "http://a.example",
            "--cors-origin",
            "http://b.example",
        ])
        .expect("parse");
        let Command::Web {
            upstream,
            cors_origins,
            upstream_timeout_ms,
            ..
        } = cli.command
        else {
            panic!("expected web");
        };
        assert_eq!(upstream, "http://books-get:8081");
        assert_eq!(cors_origins.len(), 2);
        assert_eq!(upstream_timeout_ms, None);
    }
}
