use clap::{Parser, Subcommand};
use sectorfs::io::{NUM_SECTORS, SECTOR_SIZE};
use std::path::PathBuf;

#[derive(Parser)]
#[command(about = "Inspect and modify a sectorfs disk image")]
pub struct Cli {
    /// Disk image backing the file system
    #[arg(long, short)]
    pub disk: PathBuf,

    /// Number of sectors on the disk
    #[arg(long, default_value_t = NUM_SECTORS)]
    pub sectors: usize,

    /// Bytes per sector
    #[arg(long, default_value_t = SECTOR_SIZE)]
    pub sector_size: usize,

    /// Directory to change into before running the command, repeatable
    #[arg(long)]
    pub cd: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Lay out an empty file system, destroying the image contents
    Format,
    /// Copy a host file into the current directory
    Cp { host: PathBuf, name: String },
    /// Print a file to stdout
    Cat { name: String },
    /// List the current directory
    Ls,
    Mkdir { name: String },
    /// Remove a file or an empty directory
    Rm { name: String },
    /// Print headers, the bitmap and the current directory
    Dump,
}
