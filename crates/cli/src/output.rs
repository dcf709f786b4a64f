//! Result writers.
//!
//! JSON files carry the exterior shape `{"config":<echo>,"data":[...]}`;
//! the writer is a small state machine tracking the first-record flag so
//! records join with commas and no closure lives in the data model. CSV
//! uses the fixed header; raw is one line per record.

use kestrel_common::ScanRecord;
use std::io::{self, Write};

pub const CSV_HEADER: &str = "ip,port,url,status,title,host,language,midware,frame,vuln,extract";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Json,
    Csv,
    Raw,
}

impl OutputMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "json" => Some(OutputMode::Json),
            "csv" => Some(OutputMode::Csv),
            "raw" => Some(OutputMode::Raw),
            _ => None,
        }
    }
}

/// Sequential record writer over any byte sink.
pub struct RecordWriter<W: Write> {
    inner: W,
    mode: OutputMode,
    first: bool,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W, mode: OutputMode) -> Self {
        Self {
            inner,
            mode,
            first: true,
        }
    }

    /// Write the file preamble: JSON opens the envelope with the echoed
    /// config, CSV writes the fixed header.
    pub fn open(&mut self, config_json: &str) -> io::Result<()> {
        match self.mode {
            OutputMode::Json => {
                write!(self.inner, "{{\"config\":{},\"data\":[", config_json)
            }
            OutputMode::Csv => writeln!(self.inner, "{}", CSV_HEADER),
            OutputMode::Raw => Ok(()),
        }
    }

    /// Write one pre-serialized JSON value (sink entries are plain
    /// strings, main records are objects).
    pub fn write_value(&mut self, value: &serde_json::Value) -> io::Result<()> {
        match self.mode {
            OutputMode::Json => {
                if self.first {
                    self.first = false;
                } else {
                    self.inner.write_all(b",")?;
                }
                self.inner.write_all(value.to_string().as_bytes())
            }
            OutputMode::Csv | OutputMode::Raw => {
                // sinks only ever use json; scalar fallback keeps this total
                writeln!(self.inner, "{}", value.as_str().unwrap_or_default())
            }
        }
    }

    pub fn write_record(&mut self, record: &ScanRecord) -> io::Result<()> {
        match self.mode {
            OutputMode::Json => {
                let value = serde_json::to_value(record)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                self.write_value(&value)
            }
            OutputMode::Csv => writeln!(self.inner, "{}", csv_row(record)),
            OutputMode::Raw => writeln!(self.inner, "{}", raw_row(record)),
        }
    }

    /// Close the JSON envelope and flush.
    pub fn close(&mut self) -> io::Result<()> {
        if self.mode == OutputMode::Json {
            self.inner.write_all(b"]}")?;
        }
        self.inner.flush()
    }
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_row(record: &ScanRecord) -> String {
    let frames = record
        .frames
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("&&");
    let vulns = record
        .vulns
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("&&");
    let extract = record.extract.join("&&");
    [
        record.ip.to_string(),
        record.port.to_string(),
        record.url.clone().unwrap_or_default(),
        record.status.clone().unwrap_or_default(),
        record.title.clone().unwrap_or_default(),
        record.host.clone().unwrap_or_default(),
        record.language.clone().unwrap_or_default(),
        record.midware.clone().unwrap_or_default(),
        frames,
        vulns,
        extract,
    ]
    .iter()
    .map(|f| csv_field(f))
    .collect::<Vec<_>>()
    .join(",")
}

fn raw_row(record: &ScanRecord) -> String {
    let frames = record
        .frames
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{}:{} {} {}",
        record.ip,
        record.port,
        record.protocol,
        frames
    )
}

/// Human summary on stdout.
pub fn print_results(records: &[ScanRecord]) {
    if records.is_empty() {
        println!("no live services found");
        return;
    }
    println!("{:-<78}", "");
    println!(
        "{:<22} {:<7} {:<8} {:<24} {:<14}",
        "HOST", "PORT", "STATUS", "FRAMEWORKS", "TITLE"
    );
    println!("{:-<78}", "");
    for record in records {
        let frames = record
            .frames
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let vulns = record
            .vulns
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<22} {:<7} {:<8} {:<24} {:<14}",
            record.ip.to_string(),
            record.port,
            record.status.as_deref().unwrap_or("-"),
            frames,
            record.title.as_deref().unwrap_or("")
        );
        if !vulns.is_empty() {
            println!("    vulns: {}", vulns);
        }
    }
    println!("{:-<78}", "");
}
