use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use romtext_core::rom::RomLayout;
use romtext_core::{run, RomTextError, Settings};

#[derive(Debug, Parser)]
#[command(name = "romtext", version, about = "Message text compressor for cartridge images")]
struct Args {
    /// ROM image to read (`.gz` images are decompressed).
    #[arg(long)]
    input: PathBuf,

    /// Where to write the rewritten image.
    #[arg(long, required_unless_present = "dump")]
    output: Option<PathBuf>,

    /// Entity references (JSON) that decide which messages are live.
    #[arg(long)]
    refs: Option<PathBuf>,

    /// Replacement texts (JSON object keyed by "pp:ii").
    #[arg(long)]
    edits: Option<PathBuf>,

    /// Write every message as JSON before anything is changed.
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Override the built-in table addresses (JSON).
    #[arg(long)]
    layout: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    reflow: bool,

    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

fn settings(args: Args) -> Result<Settings, RomTextError> {
    let layout = match &args.layout {
        Some(path) => RomLayout::from_json_file(path)?,
        None => RomLayout::default(),
    };
    Ok(Settings {
        input_path: args.input,
        output_path: args.output,
        refs_path: args.refs,
        edits_path: args.edits,
        dump_path: args.dump,
        reflow: args.reflow,
        debug: args.debug,
        layout,
    })
}

fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    let result = settings(args).and_then(|settings| {
        tracing::debug!(?settings, "starting");
        run(settings)
    });
    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
