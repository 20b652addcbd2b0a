use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::history::HistoryFilter;
use crate::models::{Capability, CatalogFilter};

#[derive(Parser, Debug)]
#[command(name = "model-arena")]
#[command(version = "0.3.0")]
#[command(about = "Compare LLM responses side by side with real-time streaming")]
pub struct Args {
    /// Config file (defaults to ./model-arena.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Browse the model catalog
    Models(ModelsArgs),
    /// Stream one prompt to several models and print the results
    Compare(CompareArgs),
    /// List past comparisons
    History(HistoryArgs),
    /// Print a previously exported history file
    Import {
        path: PathBuf,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct ModelsArgs {
    /// Group models by provider
    #[arg(long)]
    pub grouped: bool,

    /// List provider names only
    #[arg(long)]
    pub providers: bool,

    /// Show the capability → model map
    #[arg(long)]
    pub capabilities: bool,

    /// Show aggregate catalog stats
    #[arg(long)]
    pub stats: bool,

    #[arg(long)]
    pub provider: Option<String>,

    /// text, vision, reasoning, coding, mathematics, function-calling
    #[arg(long, value_parser = parse_capability)]
    pub capability: Option<Capability>,

    /// Case-insensitive search over name, description, provider, capabilities
    #[arg(long)]
    pub search: Option<String>,
}

impl ModelsArgs {
    pub fn filter(&self) -> CatalogFilter {
        CatalogFilter {
            capability: self.capability,
            provider: self.provider.clone(),
            query: self.search.clone(),
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct CompareArgs {
    /// Model ID to include (repeat for each model)
    #[arg(long = "model", short = 'm', required_unless_present = "session")]
    pub models: Vec<String>,

    /// Reuse an existing session instead of creating one
    #[arg(long)]
    pub session: Option<String>,

    /// Use the non-streaming HTTP endpoint
    #[arg(long)]
    pub http: bool,

    /// Leave the session open after the comparison
    #[arg(long)]
    pub keep_session: bool,

    /// Prompt sent to every model
    pub prompt: String,
}

#[derive(clap::Args, Debug, Default)]
pub struct HistoryArgs {
    /// Restrict to one session
    #[arg(long)]
    pub session: Option<String>,

    /// Match prompt or response text
    #[arg(long)]
    pub search: Option<String>,

    /// Match any model ID containing this string
    #[arg(long)]
    pub provider: Option<String>,

    /// Write the listed items to this file as JSON
    #[arg(long)]
    pub export: Option<PathBuf>,
}

impl HistoryArgs {
    pub fn filter(&self) -> HistoryFilter {
        HistoryFilter {
            query: self.search.clone(),
            provider: self.provider.clone(),
            ..HistoryFilter::default()
        }
    }
}

fn parse_capability(s: &str) -> Result<Capability, String> {
    match Capability::parse(s) {
        Capability::Unknown => Err(format!("unknown capability: {s}")),
        c => Ok(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_parse_models_and_prompt() {
        let args = Args::parse_from(["arena", "compare", "-m", "gpt-4o", "--model", "claude-3", "hello world"]);
        match args.command {
            Command::Compare(c) => {
                assert_eq!(c.models, vec!["gpt-4o", "claude-3"]);
                assert_eq!(c.prompt, "hello world");
                assert!(!c.http);
                assert!(!c.keep_session);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_compare_requires_models_without_session() {
        assert!(Args::try_parse_from(["arena", "compare", "hi"]).is_err());
    }

    #[test]
    fn test_compare_session_makes_models_optional() {
        let args = Args::try_parse_from(["arena", "compare", "--session", "s1", "hi"]).unwrap();
        match args.command {
            Command::Compare(c) => {
                assert!(c.models.is_empty());
                assert_eq!(c.session.as_deref(), Some("s1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let args = Args::parse_from(["arena", "models", "--config", "alt.toml"]);
        assert_eq!(args.config, Some(PathBuf::from("alt.toml")));
    }

    #[test]
    fn test_models_capability_parsed() {
        let args = Args::parse_from(["arena", "models", "--capability", "vision", "--search", "gpt"]);
        match args.command {
            Command::Models(m) => {
                let f = m.filter();
                assert_eq!(f.capability, Some(Capability::Vision));
                assert_eq!(f.query.as_deref(), Some("gpt"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_models_unknown_capability_rejected() {
        assert!(Args::try_parse_from(["arena", "models", "--capability", "telepathy"]).is_err());
    }

    #[test]
    fn test_history_export_path() {
        let args = Args::parse_from(["arena", "history", "--export", "out.json", "--provider", "gpt"]);
        match args.command {
            Command::History(h) => {
                assert_eq!(h.export, Some(PathBuf::from("out.json")));
                assert_eq!(h.filter().provider.as_deref(), Some("gpt"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_import_path() {
        let args = Args::parse_from(["arena", "import", "saved.json"]);
        assert!(matches!(args.command, Command::Import { path } if path == PathBuf::from("saved.json")));
    }
}
