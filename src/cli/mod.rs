//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ragloop",
    version,
    about = "Answer questions over your documents with a bounded retrieval loop",
    long_about = "Ragloop searches a local document index with hybrid keyword and vector search, \
                  reranks what it finds, rewrites the search when the evidence falls short, and \
                  streams a grounded answer together with a trace of every retrieval round."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/ragloop/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the config file (e.g., "fast", "thorough")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question and stream a grounded answer
    Ask {
        /// Question to ask
        question: String,

        /// Print every turn event as a JSON line instead of plain text
        #[arg(long)]
        json: bool,

        /// JSON file with prior conversation turns ([{"role": "user", "content": "..."}])
        #[arg(long, value_name = "FILE")]
        history: Option<PathBuf>,
    },

    /// Run one round of hybrid search and reranking without generating
    Search {
        /// Search query text
        query: String,

        /// Number of candidates to retrieve before reranking
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Import pre-chunked passages from a JSON-lines file
    Import {
        /// File with one {"doc_id": "...", "text": "..."} object per line
        file: PathBuf,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask_with_global_flags() {
        let cli = Cli::parse_from([
            "ragloop",
            "ask",
            "what is the refund window?",
            "--json",
            "--profile",
            "fast",
            "-v",
        ]);

        assert!(cli.verbose);
        assert_eq!(cli.profile.as_deref(), Some("fast"));
        match cli.command {
            Commands::Ask {
                question,
                json,
                history,
            } => {
                assert_eq!(question, "what is the refund window?");
                assert!(json);
                assert!(history.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_search_limit() {
        let cli = Cli::parse_from(["ragloop", "search", "refunds", "-n", "5"]);
        match cli.command {
            Commands::Search { limit, json, .. } => {
                assert_eq!(limit, 5);
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
