use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "encore",
    about = "Encore - warm, inspect and serve the offline asset cache of a static site",
    version,
    author
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output (also mirrors diagnostics to connected pages)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Site origin, e.g. https://user.github.io/letter/
    #[arg(long, global = true)]
    pub origin: Option<String>,

    /// Directory holding cache partitions and the state database
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Keep the preferred track in memory only
    #[arg(long, global = true)]
    pub no_persist: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install, activate and prefetch a manifest, then report what is cached
    Warm {
        /// Manifest file: a JSON array of asset URLs or {"assets": [...]}
        #[arg(short, long)]
        manifest: PathBuf,

        /// Preferred track, fetched ahead of everything else
        #[arg(short, long)]
        preferred: Option<String>,
    },

    /// Serve the site through the cache
    Serve {
        /// Address to listen on [default: 127.0.0.1:8080]
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },

    /// List cache partitions and the stored preferred track
    Status,
}
