//! entitydb CLI
//!
//! Command-line interface for an entitydb data directory:
//! - Search entities
//! - Create entities, tag them, set properties and relations
//! - Inspect entities and store statistics

use anyhow::Context;
use clap::{Parser, Subcommand};
use entitydb::config::{generate_default_config, Config, LoggingConfig};
use entitydb::storage::{parse_id, PropValue};
use entitydb::store::EntityStore;
use entitydb::query::SearchOptions;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "entitydb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Embedded entity store with tags, properties and relations")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory (overrides the config file)
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search entities
    Search {
        /// Query, e.g. 'tag:person likes.tag:dog'
        query: String,
        /// Keep the first N results
        #[arg(long)]
        first: Option<usize>,
        /// Keep the last N results
        #[arg(long)]
        last: Option<usize>,
        /// Inclusive start position
        #[arg(long)]
        start: Option<usize>,
        /// Inclusive end position
        #[arg(long)]
        end: Option<usize>,
        /// Only ids greater than this
        #[arg(long)]
        after: Option<u64>,
        /// Only ids less than this
        #[arg(long)]
        before: Option<u64>,
    },

    /// Create an entity and print its id
    Create {
        /// Tags to add
        #[arg(short, long)]
        tag: Vec<String>,
        /// Properties in name=value format
        #[arg(short, long)]
        prop: Vec<String>,
    },

    /// Add or remove a tag
    Tag {
        id: String,
        tag: String,
        #[arg(long)]
        remove: bool,
    },

    /// Set or remove a property
    Prop {
        id: String,
        name: String,
        /// Value (true/false and numbers are stored typed)
        value: Option<String>,
        #[arg(long)]
        remove: bool,
    },

    /// Add or remove a relation
    Rel {
        from: String,
        to: String,
        #[arg(short, long)]
        label: Option<String>,
        #[arg(long)]
        remove: bool,
    },

    /// Show everything known about an entity
    Show { id: String },

    /// Show store statistics
    Stats,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("Failed to write {:?}", path))?;
                eprintln!("Wrote default config to {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.to_string_lossy().to_string();
    }
    init_logging(&config.logging);

    let store = EntityStore::open(config.store_config())
        .await
        .with_context(|| format!("Failed to open store at {}", config.storage.data_dir))?;

    let output = run(&store, cli.command).await;
    store.close().await?;
    println!("{}", serde_json::to_string_pretty(&output?)?);
    Ok(())
}

async fn run(store: &EntityStore, command: Commands) -> anyhow::Result<serde_json::Value> {
    let value = match command {
        Commands::Search {
            query,
            first,
            last,
            start,
            end,
            after,
            before,
        } => {
            let options = SearchOptions {
                first,
                last,
                start,
                end,
                after,
                before,
            };
            let ids = store.search(&query, &options).await?;
            serde_json::json!(ids)
        }

        Commands::Create { tag, prop } => {
            let entity = store.create_entity();
            for t in &tag {
                entity.tag(t).await?;
            }
            for p in &prop {
                let (name, value) = p
                    .split_once('=')
                    .with_context(|| format!("Expected name=value, got '{}'", p))?;
                entity.prop(name, parse_prop_value(value)).await?;
            }
            serde_json::json!({ "id": entity.id() })
        }

        Commands::Tag { id, tag, remove } => {
            let entity = store.entity(parse_id(&id)?);
            let changed = if remove {
                entity.untag(&tag).await?
            } else {
                entity.tag(&tag).await?
            };
            serde_json::json!({ "id": entity.id(), "changed": changed })
        }

        Commands::Prop {
            id,
            name,
            value,
            remove,
        } => {
            let entity = store.entity(parse_id(&id)?);
            let changed = match (remove, value) {
                (true, _) => entity.remove_prop(&name).await?,
                (false, Some(value)) => entity.prop(&name, parse_prop_value(&value)).await?,
                (false, None) => anyhow::bail!("A value is required unless --remove is given"),
            };
            serde_json::json!({ "id": entity.id(), "changed": changed })
        }

        Commands::Rel {
            from,
            to,
            label,
            remove,
        } => {
            let entity = store.entity(parse_id(&from)?);
            let to = parse_id(&to)?;
            let changed = if remove {
                entity.unrel(to, label.as_deref()).await
            } else {
                entity.rel(to, label.as_deref()).await
            };
            serde_json::json!({ "from": entity.id(), "to": to, "changed": changed })
        }

        Commands::Show { id } => {
            let view = store.entity(parse_id(&id)?).view().await;
            serde_json::to_value(view)?
        }

        Commands::Stats => serde_json::to_value(store.stats().await)?,

        Commands::Config { .. } => anyhow::bail!("config does not need a store"),
    };
    Ok(value)
}

/// `true`/`false` and numbers become typed values, anything else a string
fn parse_prop_value(raw: &str) -> PropValue {
    match raw {
        "true" => PropValue::Bool(true),
        "false" => PropValue::Bool(false),
        _ => raw
            .parse::<f64>()
            .map(PropValue::Number)
            .unwrap_or_else(|_| PropValue::from(raw)),
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("entitydb={}", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prop_value() {
        assert_eq!(parse_prop_value("true"), PropValue::Bool(true));
        assert_eq!(parse_prop_value("42"), PropValue::Number(42.0));
        assert_eq!(parse_prop_value("Rex"), PropValue::from("Rex"));
        assert_eq!(parse_prop_value("True"), PropValue::from("True"));
    }

    #[test]
    fn test_cli_parses_search_options() {
        let cli = Cli::parse_from(["entitydb", "--data-dir", "/tmp/db", "search", "tag:a", "--first", "2"]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/db")));
        match cli.command {
            Commands::Search { query, first, .. } => {
                assert_eq!(query, "tag:a");
                assert_eq!(first, Some(2));
            }
            _ => panic!("expected search"),
        }
    }
}
