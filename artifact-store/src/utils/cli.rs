use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Repository root path
    #[arg(
        long,
        env = "ARTIFACT_STORE_ROOTDIR",
        default_value = "/var/lib/artifact-store"
    )]
    pub root: PathBuf,

    /// Directory uploads are staged in before being moved into the repository
    #[arg(long, env = "ARTIFACT_STORE_STAGING_DIR")]
    pub staging_dir: Option<PathBuf>,

    /// Storage quota, e.g. `unlimited`, `10GB` or `85%`
    #[arg(short, long, env = "ARTIFACT_STORE_QUOTA", default_value = "unlimited")]
    pub quota: String,

    /// Seconds an unused location lock is kept before eviction
    #[arg(long, env = "ARTIFACT_STORE_LOCK_IDLE_SECONDS", default_value_t = 180)]
    pub lock_idle_secs: u64,

    /// List directories before files
    #[arg(
        long,
        env = "ARTIFACT_STORE_DIRECTORIES_FIRST",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub directories_first: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store a local file at a location
    Put { location: String, file: PathBuf },
    /// Write the content of a location to stdout
    Get { location: String },
    /// Print the details of a location as JSON
    Stat { location: String },
    /// List the immediate children of a location
    Ls {
        #[arg(default_value = "")]
        location: String,
    },
    /// Delete a file or a directory tree
    Rm { location: String },
    /// Print the number of bytes stored in the repository
    Usage,
}
