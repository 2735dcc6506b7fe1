//! Command-line interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tracebuild")]
#[command(version)]
#[command(about = "Reconstructs declarative build targets by tracing a build", long_about = None)]
pub struct Cli {
    /// The name of the project.  Default is to guess from the name of the
    /// project root directory.
    #[arg(long, global = true, default_value = "")]
    pub project_name: String,

    /// The directory containing the source code, if different to the
    /// current directory.
    #[arg(long, global = true)]
    pub project_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs a command and writes a trace to <NAME>.trace.
    ///
    /// Give the same name to the analyze commands later.
    Trace {
        name: String,
        /// The build command to run, e.g. `make -j4`.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Analyzes the trace of a configure step; writes <NAME>.outputs.
    AnalyzeConf { name: String },

    /// Analyzes the trace of a compile; writes <MAKE_NAME>.targets.
    ///
    /// analyze-install must have been run on INSTALL_NAME first.
    AnalyzeMake {
        make_name: String,
        install_name: String,
    },

    /// Analyzes the trace of a `make install`; writes <NAME>.files.
    AnalyzeInstall { name: String },

    /// Writes a build.ninja from an analyzed trace.
    GenNinja {
        make_name: String,
        /// Build directory the generated rules place their outputs in.
        #[arg(long, default_value = "build")]
        build_directory: String,
    },

    /// Prints a human-readable representation of a record file.
    Dump { filename: PathBuf },
}
