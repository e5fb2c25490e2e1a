use std::path::PathBuf;

use clap::Parser;

/// Marksheet grading and workflow sidecar.
///
/// Reads one JSON request per line on stdin and writes one JSON response
/// per line on stdout. Logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "marksheetd", version)]
pub struct Cli {
    /// Workspace directory to open at startup (same as `workspace.select`).
    #[arg(short, long, env = "MARKSHEETD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
