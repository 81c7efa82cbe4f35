//! SiteMark command-line host
//!
//! Replays an editing script against a JSON project file:
//!
//! ```text
//! sitemark [--store <file> | --project <name>] [--config <file>] [--shortcuts] <script.json>
//! ```

mod script;
mod surface;

use script::{Runner, Script, ScriptError, Summary, seed_node_types};
use sitemark_core::{Editor, EditorConfig, FilePersistence, ShortcutRegistry};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use surface::LogSurface;

const USAGE: &str =
    "usage: sitemark [--store <file> | --project <name>] [--config <file>] [--shortcuts] <script.json>";

#[derive(Debug, Default, PartialEq)]
struct Args {
    script: Option<PathBuf>,
    store: Option<PathBuf>,
    project: Option<String>,
    config: Option<PathBuf>,
    shortcuts: bool,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut parsed = Args::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--store" => parsed.store = Some(value(&mut args, "--store")?.into()),
                "--project" => parsed.project = Some(value(&mut args, "--project")?),
                "--config" => parsed.config = Some(value(&mut args, "--config")?.into()),
                "--shortcuts" => parsed.shortcuts = true,
                flag if flag.starts_with("--") => return Err(format!("unknown option {flag}")),
                _ if parsed.script.is_some() => return Err(format!("unexpected argument {arg}")),
                _ => parsed.script = Some(PathBuf::from(&arg)),
            }
        }
        Ok(parsed)
    }
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("{flag} needs a value"))
}

fn open_store(args: &Args) -> Result<FilePersistence, ScriptError> {
    let store = match (&args.store, &args.project) {
        (Some(path), _) => FilePersistence::open(path)?,
        (None, Some(name)) => FilePersistence::default_location(name)?,
        (None, None) => FilePersistence::default_location("default")?,
    };
    log::info!("Using project file {}", store.path().display());
    Ok(store)
}

async fn run(args: &Args, script_path: &std::path::Path) -> Result<Summary, Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => EditorConfig::load(path)?,
        None => EditorConfig::default(),
    };
    let script = Script::load(script_path)?;
    let store = open_store(args)?;

    let mut document = store.load_document()?;
    if seed_node_types(&mut document) {
        store.save_node_types(&document)?;
    }

    let editor = Editor::new(document, Arc::new(store), config);
    let mut runner = Runner::new(editor, LogSurface::new(), &script);
    let summary = runner.run(&script.steps).await;
    let surface = runner.session().surface();
    if surface.alerts() > 0 {
        log::warn!("{} errors were shown to the user", surface.alerts());
    }
    if surface.is_captured() {
        log::warn!("Script ended in the middle of a drag");
    }
    Ok(summary)
}

fn main() -> ExitCode {
    env_logger::init();
    log::info!("Starting SiteMark");

    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    if args.shortcuts {
        ShortcutRegistry::print_all();
    }
    let Some(script_path) = args.script.clone() else {
        if args.shortcuts {
            return ExitCode::SUCCESS;
        }
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    match pollster::block_on(run(&args, &script_path)) {
        Ok(summary) => {
            println!("{summary}");
            if summary.failures > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            log::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
