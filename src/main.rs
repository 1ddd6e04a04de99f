use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use async_recursion::async_recursion;
use clap::Parser;
use colored::*;

mod compilations;
mod dep;
mod watch;

/// Generate compile_commands.json from a Keil MDK project's `.dep` report.
#[derive(Parser, Debug)]
#[clap(about, version, author)]
struct Args {
    /// Project root; defaults to the current directory.
    #[clap(long)]
    root: Option<PathBuf>,
    /// The `.dep` report; searched for under the project root if omitted.
    #[clap(long)]
    dep_file: Option<PathBuf>,
    /// Directory receiving compile_commands.json.
    #[clap(short, long)]
    out_dir: PathBuf,
    /// Compiler executable put at the front of every command.
    #[clap(short, long)]
    compiler: PathBuf,
    /// Extra include directory appended to every command; repeatable.
    #[clap(short = 'I', long = "include-dir")]
    include_dirs: Vec<PathBuf>,
    /// Keep watching the `.dep` report and regenerate on change.
    #[clap(short, long)]
    watch: bool,
}

/// Resolved inputs of one generation run.
pub struct Pipeline {
    pub root: PathBuf,
    pub dep_file: PathBuf,
    pub out_dir: PathBuf,
    pub compiler: PathBuf,
    pub include_dirs: Vec<PathBuf>,
}

impl Pipeline {
    /// Read, parse and emit once; returns the written database path.
    pub async fn generate(&self) -> anyhow::Result<PathBuf> {
        let text = tokio::fs::read_to_string(&self.dep_file)
            .await
            .with_context(|| format!("reading {}", self.dep_file.display()))?;
        let records =
            dep::parse(&text).with_context(|| format!("parsing {}", self.dep_file.display()))?;
        let commands =
            compilations::generate(&records, &self.root, &self.compiler, &self.include_dirs);
        compilations::write(&commands, &self.out_dir)
            .with_context(|| format!("writing into {}", self.out_dir.display()))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("{} {:#}", "error".red(), e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let Args {
        root,
        dep_file,
        out_dir,
        compiler,
        include_dirs,
        watch,
    } = args;

    let root = match root {
        Some(root) => root,
        None => {
            println!("no project root given, using the current directory");
            std::env::current_dir().context("resolving the current directory")?
        }
    };
    if !root.exists() {
        bail!("project root {} does not exist", root.display());
    }

    let dep_file = resolve_dep_file(&root, dep_file).await?;
    if !dep_file.exists() {
        bail!(".dep report {} not found", dep_file.display());
    }

    let out_dir = complete_against_root(&root, out_dir, "output directory");

    let pipeline = Pipeline {
        root,
        dep_file,
        out_dir,
        compiler,
        include_dirs,
    };

    if watch {
        watch::run(&pipeline).await;
    } else {
        let outfile = pipeline.generate().await?;
        println!("{} {}", "generated".green(), outfile.display());
    }
    Ok(())
}

/// Complete a relative path against the project root, with a notice.
fn complete_against_root(root: &Path, path: PathBuf, what: &str) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        let completed = root.join(path);
        println!("{what} is relative, completed as {}", completed.display());
        completed
    }
}

/// Use the given `.dep` report, or search the project root for one.
async fn resolve_dep_file(root: &Path, dep_file: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = dep_file {
        return Ok(complete_against_root(root, path, ".dep report path"));
    }

    println!("no .dep report given, searching {}", root.display());
    let mut found = Vec::new();
    find_dep_files(root, &mut found)
        .await
        .with_context(|| format!("searching {}", root.display()))?;

    match found.as_slice() {
        [] => bail!("no .dep report found in {}", root.display()),
        [one] => {
            println!("using {}", one.display());
            Ok(one.clone())
        }
        [first, ..] => {
            eprintln!(
                "{} {} .dep reports found in {}, pass --dep-file to pick one; using {}",
                "warning".yellow(),
                found.len(),
                root.display(),
                first.display()
            );
            Ok(first.clone())
        }
    }
}

/// Collect every `*.dep` file under `dir`.
#[async_recursion(?Send)]
async fn find_dep_files(dir: &Path, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        let ty = entry.file_type().await?;
        if ty.is_file() {
            if entry.path().extension().map_or(false, |e| e == "dep") {
                found.push(entry.path());
            }
        } else if ty.is_dir() {
            find_dep_files(&entry.path(), found).await?;
        }
    }
    Ok(())
}
