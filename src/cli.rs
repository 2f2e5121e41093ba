use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::tracker::Fingerprinter;

pub const USAGE: &str = "Missing arguments: [sourceDir] [targetDir] [classPath]";

#[derive(Debug, Clone, Parser)]
#[command(name = "class-rebuild")]
#[command(about = "Incrementally recompile a Java source tree based on class ABI changes")]
pub struct Cli {
    #[arg(value_name = "SOURCE_DIR")]
    pub source_dir: Option<PathBuf>,

    #[arg(value_name = "TARGET_DIR")]
    pub target_dir: Option<PathBuf>,

    #[arg(value_name = "CLASSPATH")]
    pub classpath: Option<String>,

    #[arg(long, value_name = "FILE")]
    pub state: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    pub javac: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Fingerprinter::ModifiedTime)]
    pub fingerprint: Fingerprinter,

    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Delete persisted state first, forcing a full build.
    #[arg(long)]
    pub clean: bool,

    /// Exit with status 2 when any source fails to compile.
    #[arg(long)]
    pub fail_on_error: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
