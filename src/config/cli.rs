use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::predicate::{Predicate, SortKey};

/// Command-line arguments for the tracker-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "tracker-cache",
    version,
    about = "Query an in-memory task index built from a snapshot"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "TRACKER_CACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run one query on behalf of an actor and print the match as JSON.
    Query(QueryArgs),
    /// Load one shard and print its index statistics.
    Stats(StatsArgs),
    /// List the shards present in the snapshot.
    Shards,
}

#[derive(Debug, Args, Clone)]
pub struct QueryArgs {
    /// Actor the query runs for.
    #[arg(long, value_name = "NAME")]
    pub actor: String,

    /// Extra shard affiliation for the actor; may be repeated.
    #[arg(long = "affiliation", value_name = "SHARD")]
    pub affiliations: Vec<String>,

    /// Predicate in `property<op>value[,value...]` form; may be repeated.
    #[arg(long = "where", value_name = "PREDICATE")]
    pub predicates: Vec<Predicate>,

    /// Sort key in `property[:asc|:desc]` form; may be repeated.
    #[arg(long = "order", value_name = "KEY")]
    pub order: Vec<SortKey>,

    /// Number of matches to skip.
    #[arg(long, value_name = "COUNT")]
    pub offset: Option<usize>,

    /// Maximum number of matches to return.
    #[arg(long, value_name = "COUNT")]
    pub length: Option<usize>,
}

impl QueryArgs {
    /// Every predicate the flags describe, result controls last.
    pub fn all_predicates(&self) -> Vec<Predicate> {
        let mut predicates = self.predicates.clone();
        if !self.order.is_empty() {
            predicates.push(Predicate::order(self.order.clone()));
        }
        if let Some(offset) = self.offset {
            predicates.push(Predicate::offset(offset));
        }
        if let Some(length) = self.length {
            predicates.push(Predicate::length(length));
        }
        predicates
    }
}

#[derive(Debug, Args, Clone)]
pub struct StatsArgs {
    /// Shard (project) to load.
    #[arg(long = "project", value_name = "SHARD")]
    pub project: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the snapshot file tasks are loaded from.
    #[arg(long = "snapshot", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub snapshot: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the page length used when a query names none.
    #[arg(long = "cache-default-page-length", value_name = "COUNT")]
    pub default_page_length: Option<u64>,

    /// Override the largest page length a query may request.
    #[arg(long = "cache-max-page-length", value_name = "COUNT")]
    pub max_page_length: Option<u64>,
}
