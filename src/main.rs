//! # hybrid-sql CLI (`hsql`)
//!
//! Ask natural-language questions of a PostgreSQL database. Answers combine
//! a similarity search over ingested table rows with an LLM-driven SQL agent.
//!
//! ## Usage
//!
//! ```bash
//! hsql --config ./config/hsql.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hsql init` | Create the pgvector extension and collection tables |
//! | `hsql ingest` | Embed table rows that are not yet in the vector store |
//! | `hsql exec "<sql>"` | Run an operator statement (CREATE / ALTER) |
//! | `hsql search "<query>"` | Show the closest stored rows |
//! | `hsql ask "<question>"` | Answer one question |
//! | `hsql chat` | Interactive chat session |
//! | `hsql tables` | List database tables |
//! | `hsql serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! hsql init
//! hsql ingest --table products --table orders
//! hsql ask "What are the top 5 products by price?"
//! hsql exec "ALTER TABLE products ADD COLUMN rating int" --port 5432
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use hybrid_sql::config::{self, Config};
use hybrid_sql::connection::ConnectionConfig;
use hybrid_sql::embedding::{check_startup_token, create_embedder, Embedder};
use hybrid_sql::ingest::{populate_vector_store, refresh_message, IngestOptions, IngestReport};
use hybrid_sql::relational::{execute_statement, PgRelationalStore, RelationalStore};
use hybrid_sql::search::SearchFactory;
use hybrid_sql::session::ConversationSession;
use hybrid_sql::vector_store::{create_vector_store, VectorStore};
use hybrid_sql::{logging, migrate, server};

/// hybrid-sql: natural-language questions over a PostgreSQL database.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; built-in defaults are used when it does not exist.
#[derive(Parser)]
#[command(
    name = "hsql",
    about = "Hybrid search over PostgreSQL: vector retrieval plus an LLM SQL agent",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hsql.toml")]
    config: PathBuf,

    /// Database host (overrides `[db].host`).
    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    user: Option<String>,

    #[arg(long, global = true)]
    password: Option<String>,

    #[arg(long, global = true)]
    database: Option<String>,

    #[arg(long, global = true)]
    port: Option<String>,

    /// Chat model API key for `ask` and `chat` (defaults to the
    /// `[llm].api_key_env` variable).
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the pgvector extension and collection tables. Idempotent.
    Init,

    /// Embed rows from the configured tables into the vector store.
    ///
    /// Rows whose text already has a match in the store are skipped.
    Ingest {
        /// Table to read (repeatable). Defaults to `[ingest].tables`.
        #[arg(long = "table")]
        tables: Vec<String>,

        /// Read and probe without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run one SQL statement and print the outcome.
    Exec {
        sql: String,
    },

    /// Show the stored rows closest to a query.
    Search {
        query: String,

        #[arg(long)]
        k: Option<usize>,
    },

    /// Answer one question.
    Ask {
        question: String,
    },

    /// Interactive chat. `/clear`, `/sql <stmt>`, `/refresh`, `/quit`.
    Chat,

    /// List tables in the database.
    Tables,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

impl Cli {
    /// Apply the connection flags on top of `[db]`.
    fn apply_overrides(&self, conn: &mut ConnectionConfig) {
        let overrides = [
            (&self.host, &mut conn.host),
            (&self.user, &mut conn.user),
            (&self.password, &mut conn.password),
            (&self.database, &mut conn.database),
            (&self.port, &mut conn.port),
        ];
        for (flag, field) in overrides {
            if let Some(value) = flag {
                *field = value.clone();
            }
        }
    }
}

async fn open_vector_store(cfg: &Config) -> Result<Arc<dyn VectorStore>> {
    check_startup_token(&cfg.embedding)?;
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&cfg.embedding)?);
    create_vector_store(&cfg.vector_store, embedder).await
}

fn ingest_options(cfg: &Config, dry_run: bool) -> IngestOptions {
    IngestOptions {
        probe_k: cfg.retrieval.probe_k,
        duplicate_max_distance: cfg.ingest.duplicate_max_distance,
        dry_run,
    }
}

fn print_report(report: &IngestReport) {
    println!("ingest{}", if report.dry_run { " (dry-run)" } else { "" });
    println!("  tables scanned: {}", report.tables_scanned);
    println!("  rows scanned: {}", report.rows_scanned);
    println!("  skipped duplicates: {}", report.skipped_duplicates);
    for (table, error) in &report.failed_tables {
        println!("  failed: {} ({})", table, error);
    }
    println!("{}", report.message());
}

async fn run_chat(
    cfg: &Config,
    conn: &ConnectionConfig,
    api_key: Option<&str>,
) -> Result<()> {
    let store = open_vector_store(cfg).await?;
    let factory = SearchFactory::from_config(cfg, store.clone());
    let search = factory.build(conn, api_key)?;
    let mut session = ConversationSession::new();

    for turn in session.turns() {
        println!("assistant> {}", turn.content);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("you> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" => break,
            "/clear" => {
                session.clear();
                println!("assistant> {}", session.turns()[0].content);
            }
            "/refresh" => {
                let adapter = factory.adapter(conn);
                let line = refresh_message(
                    adapter.as_ref(),
                    store.as_ref(),
                    &cfg.ingest.tables,
                    &ingest_options(cfg, false),
                )
                .await;
                println!("{}", line);
            }
            _ => {
                if let Some(sql) = input.strip_prefix("/sql ") {
                    let adapter = factory.adapter(conn);
                    println!("{}", execute_statement(adapter.as_ref(), sql).await);
                    continue;
                }
                let reply = session.ask(input, &search).await;
                println!("assistant> {}", reply.content);
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = if matches!(cli.command, Commands::Serve) {
        config::load_config(&cli.config)?
    } else {
        config::load_or_default(&cli.config)?
    };
    cli.apply_overrides(&mut cfg.db.connection);
    logging::init(&cfg.logging);

    let conn = cfg.db.connection.clone();
    if let Some(advisory) = conn.advisory() {
        eprintln!("{}", advisory);
    }
    let api_key = cli.api_key.as_deref();

    match &cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Vector store initialized successfully.");
        }
        Commands::Ingest { tables, dry_run } => {
            let store = open_vector_store(&cfg).await?;
            let tables = if tables.is_empty() {
                cfg.ingest.tables.clone()
            } else {
                tables.clone()
            };
            let db = PgRelationalStore::from_connection(&conn);
            let report =
                populate_vector_store(&db, store.as_ref(), &tables, &ingest_options(&cfg, *dry_run))
                    .await?;
            print_report(&report);
        }
        Commands::Exec { sql } => {
            let db = PgRelationalStore::from_connection(&conn);
            println!("{}", execute_statement(&db, sql).await);
        }
        Commands::Search { query, k } => {
            let store = open_vector_store(&cfg).await?;
            let hits = store
                .similarity_search_with_score(query, k.unwrap_or(cfg.retrieval.k))
                .await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {} / {}",
                    i + 1,
                    hit.distance,
                    hit.document.metadata.table,
                    hit.document.metadata.id
                );
                for line in hit.document.content.lines() {
                    println!("    {}", line);
                }
            }
        }
        Commands::Ask { question } => {
            let store = open_vector_store(&cfg).await?;
            let search = SearchFactory::from_config(&cfg, store).build(&conn, api_key)?;
            println!("{}", search.answer(question).await);
        }
        Commands::Chat => {
            run_chat(&cfg, &conn, api_key).await?;
        }
        Commands::Tables => {
            let db = PgRelationalStore::from_connection(&conn);
            for table in db.list_tables().await? {
                println!("{}", table);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
