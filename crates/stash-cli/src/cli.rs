use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stash", about = "Content-addressable build cache", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML file with a [cache] table; defaults to the environment.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store a file in the blob store and print its digest
    Put(PutArgs),
    /// Write a blob to stdout
    Cat(CatArgs),
    /// Check which blobs are present
    Has(HasArgs),
    /// Print the ID of a derivation described in TOML
    Id(IdArgs),
    /// List packages and their state
    Ls,
    /// Remove idle, unreferenced packages
    Prune(PruneArgs),
}

#[derive(Args)]
pub struct PutArgs {
    pub file: PathBuf,
}

#[derive(Args)]
pub struct CatArgs {
    /// Digest as `<hex hash>/<size>`
    pub digest: String,
    #[arg(long, default_value_t = 0)]
    pub offset: u64,
    /// Bytes to read; 0 reads to the end
    #[arg(long, default_value_t = 0)]
    pub limit: u64,
}

#[derive(Args)]
pub struct HasArgs {
    #[arg(required = true)]
    pub digests: Vec<String>,
}

#[derive(Args)]
pub struct IdArgs {
    pub file: PathBuf,
}

#[derive(Args)]
pub struct PruneArgs {
    /// Idle time before a package may be removed; overrides the config
    #[arg(long)]
    pub ttl_secs: Option<u64>,
    /// Maximum removal attempts, 0 for no limit; overrides the config
    #[arg(long)]
    pub max: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_put() {
        let cli = Cli::try_parse_from(["stash", "put", "a.bin"]).unwrap();
        if let Command::Put(args) = cli.command {
            assert_eq!(args.file, PathBuf::from("a.bin"));
        } else { panic!("wrong command"); }
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn parse_cat_range() {
        let cli = Cli::try_parse_from(["stash", "cat", "ab/3", "--offset", "1", "--limit", "2"]).unwrap();
        if let Command::Cat(args) = cli.command {
            assert_eq!((args.digest.as_str(), args.offset, args.limit), ("ab/3", 1, 2));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn has_needs_a_digest() {
        assert!(Cli::try_parse_from(["stash", "has"]).is_err());
        let cli = Cli::try_parse_from(["stash", "has", "a/1", "b/2"]).unwrap();
        if let Command::Has(args) = cli.command {
            assert_eq!(args.digests.len(), 2);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_prune_with_globals() {
        let cli = Cli::try_parse_from([
            "stash", "prune", "--ttl-secs", "60", "--max", "3", "-v", "--format", "json",
            "--config", "stash.toml",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("stash.toml")));
        if let Command::Prune(args) = cli.command {
            assert_eq!(args.ttl_secs, Some(60));
            assert_eq!(args.max, Some(3));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_ls() {
        let cli = Cli::try_parse_from(["stash", "ls"]).unwrap();
        assert!(matches!(cli.command, Command::Ls));
    }
}
