//! # JedAI CLI (`jedai`)
//!
//! ## Usage
//!
//! ```bash
//! jedai --config ./config/jedai.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `jedai init` | Create the SQLite database and schema |
//! | `jedai index [--rebuild]` | Index the configured course materials |
//! | `jedai search "<query>"` | Show the best-matching passages |
//! | `jedai ask "<question>"` | Answer a question with citations |
//! | `jedai status` | Show what is indexed |
//! | `jedai clear` | Empty the index |

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use jedai::assistant::Assistant;
use jedai::{config, logging, migrate};
use jedai_core::error::CoreError;
use jedai_core::models::{Answer, IdeContext, IndexReport, RetrievedChunk};

/// JedAI: ask questions about your course materials.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/jedai.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "jedai",
    about = "JedAI: answers grounded in your course materials",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/jedai.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Index every file under `[materials] root`.
    ///
    /// Re-indexing a document replaces its chunks, and documents deleted
    /// from the materials root are dropped. Failures are reported per
    /// document and do not stop the run.
    Index {
        /// Clear the index first. Required after changing the embedding provider.
        #[arg(long)]
        rebuild: bool,
    },

    /// Show the passages that best match a query.
    Search {
        query: String,

        /// Number of passages (default: `retrieval.default_k`).
        #[arg(long)]
        k: Option<i64>,
    },

    /// Answer a question using the indexed course material.
    ///
    /// The answer is printed as the model streams it. Ctrl-C cancels a
    /// pending answer.
    Ask {
        question: String,

        #[arg(long)]
        k: Option<i64>,

        /// Project name from the editor.
        #[arg(long)]
        project: Option<String>,

        /// File open in the editor.
        #[arg(long)]
        file: Option<String>,

        /// Selected code.
        #[arg(long)]
        selection: Option<String>,

        #[arg(long)]
        language: Option<String>,

        /// Cursor line in `--file`.
        #[arg(long)]
        line: Option<u32>,
    },

    /// Show document and chunk counts and the representation scheme.
    Status,

    /// Remove every document from the index.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(ExitCode::SUCCESS);
    }

    let assistant = Assistant::open(&cfg).await?;
    let code = match cli.command {
        Commands::Init => ExitCode::SUCCESS,
        Commands::Index { rebuild } => {
            let report = assistant.index_materials(rebuild).await?;
            print_report(&report);
            if report.failures.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Commands::Search { query, k } => {
            let results = assistant.search(&query, k).await?;
            print_results(&results);
            ExitCode::SUCCESS
        }
        Commands::Ask {
            question,
            k,
            project,
            file,
            selection,
            language,
            line,
        } => {
            let ide = IdeContext {
                project_name: project,
                file_path: file,
                selected_code: selection,
                language,
                line_number: line,
            };
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let mut streamed = String::new();
            let result = assistant
                .ask_streaming(&question, Some(&ide), k, &cancel, &mut |piece: &str| {
                    print!("{}", piece);
                    std::io::stdout().flush().ok();
                    streamed.push_str(piece);
                })
                .await;

            match result {
                Ok(answer) => {
                    print_answer(&answer, &streamed);
                    ExitCode::SUCCESS
                }
                Err(CoreError::Cancelled) => {
                    if !streamed.is_empty() {
                        println!();
                    }
                    eprintln!("Cancelled.");
                    ExitCode::from(130)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Status => {
            let status = assistant.status().await?;
            println!("Database:   {}", cfg.db.path.display());
            println!("Indexed:    {}", if status.indexed { "yes" } else { "no" });
            println!("Documents:  {}", status.documents);
            println!("Chunks:     {}", status.chunks);
            println!(
                "Scheme:     {}",
                status.indexed_scheme.as_deref().unwrap_or("(none)")
            );
            if !status.scheme_matches() {
                println!(
                    "Warning: config produces '{}'; run `jedai index --rebuild`",
                    status.configured_scheme
                );
            }
            ExitCode::SUCCESS
        }
        Commands::Clear => {
            assistant.clear().await?;
            println!("Index cleared.");
            ExitCode::SUCCESS
        }
    };

    assistant.close().await;
    Ok(code)
}

fn print_report(report: &IndexReport) {
    println!(
        "Indexed {}/{} documents ({} chunks) in {} ms",
        report.succeeded(),
        report.stats.total_documents,
        report.stats.total_chunks,
        report.stats.indexing_time_ms
    );
    for failure in &report.failures {
        println!("  failed: {}: {}", failure.document_id, failure.error);
    }
    for id in &report.removed {
        println!("  removed: {}", id);
    }
}

fn print_results(results: &[RetrievedChunk]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    for (i, r) in results.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, r.score, r.citation_label());
        let snippet: String = r.content().chars().take(240).collect();
        println!("    {}", snippet.replace('\n', " "));
    }
}

/// Finish an answer whose text may already be on screen as `streamed`.
fn print_answer(answer: &Answer, streamed: &str) {
    if streamed.trim() == answer.content() {
        println!();
    } else {
        if !streamed.is_empty() {
            println!();
            println!();
        }
        println!("{}", answer.content());
    }
    if !answer.citations().is_empty() {
        println!();
        println!("Sources:");
        for c in answer.citations() {
            println!("  - {}", c.citation_label());
        }
    }
}
