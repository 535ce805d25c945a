use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::presets::Preset;

/// Structural patcher for disassembled smali trees
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/smalipatch/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply built-in presets and/or a TOML plan to the unpacked tree
    Patch {
        /// Presets to run (all of them when neither presets nor --plan are given)
        #[arg(value_enum)]
        presets: Vec<Preset>,

        /// Extra plan file with `[[plan]]` entries
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Root of the unpacked tree, overriding the config
        #[arg(long)]
        root: Option<PathBuf>,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Files patched in parallel (0 = one per core)
        #[arg(long)]
        workers: Option<usize>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Disassemble one dex file into a smali directory
    Disassemble { dex: PathBuf, out_dir: PathBuf },
    /// Assemble a smali directory into a dex file
    Assemble { smali_dir: PathBuf, out_dex: PathBuf },
    /// Disassemble every dex file in a directory into `smali_<name>/`
    Unpack { dir: PathBuf },
    /// Assemble every `smali_classes*` directory in a directory
    Repack { dir: PathBuf },
}
