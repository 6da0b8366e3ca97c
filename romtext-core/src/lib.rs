use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub mod abbrev;
pub mod codec;
pub mod messages;
pub mod reflow;
pub mod rom;
pub mod usage;
pub mod words;
pub mod writer;

#[cfg(test)]
mod testutil;

use abbrev::Abbreviation;
use codec::CodecError;
use messages::{load_edits, Messages};
use rom::{Rom, RomLayout};
use usage::{EntityRefs, MessageId, Usage};
use writer::Writer;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub input_path: PathBuf,
    /// Where the rewritten image goes. Without it the run only dumps.
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    /// Entity references deciding which slots are live.
    #[serde(default)]
    pub refs_path: Option<PathBuf>,
    #[serde(default)]
    pub edits_path: Option<PathBuf>,
    #[serde(default)]
    pub dump_path: Option<PathBuf>,
    #[serde(default)]
    pub reflow: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub layout: RomLayout,
}

#[derive(Debug, Error)]
pub enum RomTextError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("message {mid}: {source}")]
    Codec {
        mid: MessageId,
        #[source]
        source: CodecError,
    },
    #[error("no free space for {label} ({len} bytes) in pages ${start_page:02x}..=${end_page:02x}")]
    NoSpace {
        label: String,
        len: usize,
        start_page: usize,
        end_page: usize,
    },
    #[error("address ${0:05x} is outside the ROM image")]
    OutOfBounds(usize),
}

pub type Result<T> = std::result::Result<T, RomTextError>;

fn report_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".report.txt");
    PathBuf::from(name)
}

fn build_report(settings: &Settings, messages: &Messages, usage: &Usage, table: &[Abbreviation]) -> String {
    let mut log = String::new();
    let _ = writeln!(log, "input: {}", settings.input_path.display());
    let _ = writeln!(
        log,
        "abbreviations: {} ({} bytes)",
        table.len(),
        abbrev::table_length(table)
    );
    for abbr in table {
        let code: Vec<String> = abbr.bytes.iter().map(|b| format!("{:02x}", b)).collect();
        let _ = writeln!(
            log,
            "  [{}] {:?} in {} messages",
            code.join(" "),
            abbr.text,
            abbr.mids.len()
        );
    }

    log.push_str("messages:\n");
    for m in messages.messages(Some(usage)) {
        let labels: Vec<&str> = usage
            .labels(&m.mid())
            .map(|l| l.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let _ = writeln!(log, "  {} @ ${:05x} ({})", m.mid(), m.addr, labels.join(", "));
        let _ = writeln!(log, "    {}", m.hex);
    }
    log
}

pub fn run(settings: Settings) -> Result<()> {
    if !settings.input_path.exists() {
        return Err(RomTextError::Config(format!(
            "Input path does not exist: {}",
            settings.input_path.display()
        )));
    }
    if settings.output_path.is_none() && settings.dump_path.is_none() {
        return Err(RomTextError::Config(
            "nothing to do: give an output path, a dump path or both".to_string(),
        ));
    }

    let mut rom = Rom::load(&settings.input_path)?;
    info!(
        path = %settings.input_path.display(),
        header = rom.has_header(),
        prg = rom.prg().len(),
        "loaded image"
    );
    let layout = &settings.layout;
    let mut messages = Messages::load(rom.prg(), layout)?;

    let refs = match &settings.refs_path {
        Some(path) => Some(EntityRefs::from_json_file(path)?),
        None => None,
    };
    let usage = messages.uses(refs.as_ref());
    if usage.is_empty() {
        warn!("no message slot is live; every address table entry will be null");
    }
    info!(
        live = messages.messages(Some(&usage)).count(),
        total = messages.messages(None).count(),
        "collected message usage"
    );

    if let Some(path) = &settings.dump_path {
        let dump = messages.dump(&usage);
        fs::write(path, serde_json::to_string_pretty(&dump)?)?;
        info!(path = %path.display(), entries = dump.len(), "wrote text dump");
    }

    let Some(output) = &settings.output_path else {
        return Ok(());
    };

    if let Some(path) = &settings.edits_path {
        let edits = load_edits(path)?;
        let applied = messages.apply_edits(&edits)?;
        info!(applied, "applied text edits");
    }
    if settings.reflow {
        let fixed = messages.fix_all(&usage);
        info!(fixed, "reflowed overflowing messages");
    }

    let table = {
        let mut writer = Writer::new(rom.prg_mut());
        for &(start, end) in &layout.message_space {
            writer.alloc(start, end)?;
        }
        messages.write(&mut writer, &usage)?
    };
    rom.save(output)?;
    info!(path = %output.display(), "wrote image");

    if settings.debug {
        let log = build_report(&settings, &messages, &usage, &table);
        fs::write(report_path(output), log)?;
    }

    Ok(())
}
