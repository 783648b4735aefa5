use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsstation_core::{AppConfig, Category, QueryService, SortOrder};

mod commands;

#[derive(Parser)]
#[command(name = "newsstation")]
#[command(author, version, about = "A real-time news aggregator with a JSON API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP API and the background cache warmer
    Serve {
        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    #[command(flatten)]
    Query(QueryCommand),
}

/// One-shot commands answered from the aggregator without starting the server
#[derive(Subcommand, Debug)]
enum QueryCommand {
    /// List one page of a category
    News {
        /// Category (realtime, technology, world, business, ...)
        #[arg(short, long)]
        category: Option<Category>,
        #[arg(long)]
        page: Option<i64>,
        #[arg(short, long)]
        limit: Option<i64>,
        /// Bypass the cache and refetch every source
        #[arg(short, long)]
        refresh: bool,
        /// newest, oldest, popular or source
        #[arg(short, long, default_value = "newest")]
        sort: SortOrder,
    },
    /// Show one article
    Article {
        id: String,
        /// Open the article in the default browser
        #[arg(short, long)]
        open: bool,
    },
    /// Print the full content of an article
    Content { id: String },
    /// Article counts per category
    Categories,
    /// Most popular articles right now
    Trending {
        #[arg(short, long)]
        limit: Option<i64>,
    },
    /// Search titles and summaries
    Search {
        query: String,
        #[arg(short, long)]
        category: Option<Category>,
        /// Only match articles from this source id
        #[arg(long)]
        source: Option<String>,
        #[arg(short, long)]
        limit: Option<i64>,
    },
    /// Articles of a single source
    Source {
        id: String,
        #[arg(short, long)]
        category: Option<Category>,
        #[arg(short, long)]
        limit: Option<i64>,
        #[arg(short, long)]
        refresh: bool,
    },
    /// List the configured sources
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load()?;
    if let Some(Commands::Serve { host, port }) = &cli.command {
        if let Some(host) = host {
            config.server.host = host.clone();
        }
        if let Some(port) = port {
            config.server.port = *port;
        }
    }
    let config = Arc::new(config);

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let default_category = config.default_category()?;

    match cli.command {
        Some(Commands::Query(command)) => {
            let query = commands::build_services(&config).await?;
            run_query(&query, command, default_category).await
        }
        Some(Commands::Serve { .. }) | None => commands::serve::run(config).await,
    }
}

async fn run_query(query: &QueryService, command: QueryCommand, default_category: Category) -> Result<()> {
    match command {
        QueryCommand::News {
            category,
            page,
            limit,
            refresh,
            sort,
        } => {
            let category = category.unwrap_or(default_category);
            commands::news::list(query, category, page, limit, refresh, sort).await
        }
        QueryCommand::Article { id, open } => commands::news::article(query, &id, open).await,
        QueryCommand::Content { id } => commands::news::content(query, &id).await,
        QueryCommand::Categories => commands::news::categories(query).await,
        QueryCommand::Trending { limit } => commands::news::trending(query, limit).await,
        QueryCommand::Search {
            query: text,
            category,
            source,
            limit,
        } => commands::news::search(query, &text, category, source.as_deref(), limit).await,
        QueryCommand::Source {
            id,
            category,
            limit,
            refresh,
        } => {
            let category = category.unwrap_or(default_category);
            commands::news::source(query, &id, category, limit, refresh).await
        }
        QueryCommand::Sources => commands::sources::run(query).await,
    }
}
