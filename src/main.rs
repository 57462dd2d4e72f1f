//! Mold CLI
//!
//! Usage:
//!   mold [OPTIONS] <DIR> [VIEW]
//!
//! Options:
//!   -l, --layout <FILE>   Layout file, relative to the template root
//!   -r, --root <DIR>      Subdirectory of DIR holding the templates
//!   -e, --ext <EXT>       Recognised template extension (repeatable)
//!   -d, --data <FILE>     Render data (JSON, or TOML by extension)
//!   -c, --config <FILE>   Configuration file (TOML format)
//!       --list            List the composed views
//!   -t, --text            Do not HTML-escape printed values
//!   -v, --verbose         Log composition details
//!   -h, --help            Print help

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use mold::{Config, Engine, Error, Escape};

#[derive(Parser)]
#[command(name = "mold")]
#[command(about = "Compose and render layouts, views and partials")]
struct Cli {
    /// Template directory
    dir: PathBuf,

    /// View to render
    view: Option<String>,

    /// Layout file, relative to the template root
    #[arg(short, long)]
    layout: Option<String>,

    /// Subdirectory of DIR holding the templates
    #[arg(short, long)]
    root: Option<String>,

    /// Recognised template extension (repeatable)
    #[arg(short, long = "ext")]
    exts: Vec<String>,

    /// Render data file (JSON, or TOML when it ends in .toml)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Configuration file (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List the composed views and exit
    #[arg(long)]
    list: bool,

    /// Print values without HTML escaping
    #[arg(short, long)]
    text: bool,

    /// Log composition details
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    // Load configuration, then let flags override it
    let mut config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(layout) = &cli.layout {
        config = config.with_layout(layout.clone());
    }
    if let Some(root) = &cli.root {
        config = config.with_root(root.clone());
    }
    if !cli.exts.is_empty() {
        config = config.with_exts(cli.exts.clone());
    }
    if cli.text {
        config = config.with_escape(Escape::Plain);
    }

    let templates = mold::source::template_root(&cli.dir, &config);
    let engine = match Engine::new(&cli.dir, config) {
        Ok(engine) => engine,
        Err(e) => {
            report(&templates, &e);
            std::process::exit(1);
        }
    };

    if cli.list {
        for view in engine.views() {
            println!("{}", view);
        }
        return;
    }

    let Some(view) = &cli.view else {
        eprintln!("Error: no view given (use --list to see the available views)");
        std::process::exit(2);
    };

    let data = match &cli.data {
        Some(path) => match load_data(path) {
            Ok(data) => data,
            Err(e) => {
                eprintln!("Error reading data '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Value::Null,
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = engine.render(&mut out, view, &data) {
        let _ = out.flush();
        report(&templates, &e);
        std::process::exit(1);
    }
    let _ = out.flush();
}

/// Read render data from JSON or TOML
fn load_data(path: &Path) -> Result<Value, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        let table: toml::Table = toml::from_str(&content).map_err(|e| e.to_string())?;
        serde_json::to_value(table).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&content).map_err(|e| e.to_string())
    }
}

/// Print an error; syntax errors get a source excerpt
fn report(templates: &Path, error: &Error) {
    if let Error::Parse { location, source } = error {
        if let Ok(text) = fs::read_to_string(templates.join(&location.file)) {
            eprint!("{}", source.format(&text, &location.file));
            return;
        }
    }
    eprintln!("Error: {}", error);
}
