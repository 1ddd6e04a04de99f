//! compile_commands.json emission.
//!
//! Clangd and most static analyzers consume the database as a JSON array
//! of `{directory, file, command}` objects, one per compiled source file.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::dep::DependencyRecord;

/// A single entry of the compilation database.
#[derive(Debug, Serialize)]
pub struct CompileCommand {
    /// Working directory for the compilation, the project root.
    pub directory: String,
    /// Source file path as the report wrote it.
    pub file: String,
    /// Full compilation command as one space-joined string.
    pub command: String,
}

/// Build one database entry per record, in record order.
///
/// Records sharing a source path all pass through; nothing in the
/// pipeline keys on the path, which keeps re-runs byte-identical.
pub fn generate(
    records: &[DependencyRecord],
    root: &Path,
    compiler: &Path,
    extra_includes: &[PathBuf],
) -> Vec<CompileCommand> {
    records
        .iter()
        .map(|record| {
            let file = record.source_path.display().to_string();
            let mut command = vec![compiler.display().to_string()];
            command.extend(record.arguments.iter().cloned());
            command.extend(
                extra_includes
                    .iter()
                    .map(|dir| format!("-I{}", dir.display())),
            );
            command.push(file.clone());
            CompileCommand {
                directory: root.display().to_string(),
                file,
                command: command.join(" "),
            }
        })
        .collect()
}

/// Write the database to `<out_dir>/compile_commands.json` and return the
/// written path.
pub fn write(commands: &[CompileCommand], out_dir: &Path) -> io::Result<PathBuf> {
    let outfile = out_dir.join("compile_commands.json");
    let out = std::fs::File::create(&outfile)?;
    serde_json::to_writer_pretty(out, commands)?;
    Ok(outfile)
}
