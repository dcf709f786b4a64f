use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "kestrel")]
#[command(version)]
#[command(about = "Recursive heuristic network scanner and service fingerprinter", long_about = None)]
pub struct Cli {
    /// Targets: comma-separated IPs or CIDRs. '-' reads targets from stdin
    #[arg(long = "ip")]
    pub ip: Option<String>,

    /// Newline-delimited target file
    #[arg(short = 'l', long = "list")]
    pub list_file: Option<PathBuf>,

    /// Previously emitted JSON result file; re-scans its (ip, port) pairs
    #[arg(short = 'j', long = "json")]
    pub json_file: Option<PathBuf>,

    /// How to interpret stdin when '-ip -' is given
    #[arg(long = "stdin-type", default_value = "list", value_parser = ["list", "json"])]
    pub stdin_type: String,

    /// Port spec: numbers, ranges (80-90), groups (top1, web, db, win, icmp)
    #[arg(short = 'p', long = "ports", default_value = "top1")]
    pub ports: String,

    /// Scan mode: default|s|sb|sc|ss|a
    #[arg(short = 'm', long = "mode", default_value = "default", value_parser = ["default", "s", "sb", "sc", "ss", "a"])]
    pub mode: String,

    /// Worker pool size
    #[arg(short = 't', long = "threads", default_value_t = 4000)]
    pub threads: usize,

    /// Active-rule escalation level (0 disables active probes)
    #[arg(long = "level", default_value_t = 1)]
    pub level: i32,

    /// Connect/read timeout in seconds
    #[arg(long = "timeout", default_value_t = 2)]
    pub timeout: u64,

    /// Main result file
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    /// Result file format
    #[arg(long = "file-format", default_value = "json", value_parser = ["json", "csv", "raw"])]
    pub file_format: String,

    /// Side sink: live /16 ranges
    #[arg(long = "smart-b-file")]
    pub smart_b_file: Option<PathBuf>,

    /// Side sink: live /24 ranges
    #[arg(long = "smart-c-file")]
    pub smart_c_file: Option<PathBuf>,

    /// Side sink: alive hosts
    #[arg(long = "alive-file")]
    pub alive_file: Option<PathBuf>,

    /// Harvest regex applied to response text; matches land in the
    /// record and the _extract sink
    #[arg(long = "extract")]
    pub extract: Option<String>,

    /// Fingerprint rule file (JSON); defaults to the embedded set
    #[arg(long = "fingers")]
    pub fingers: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
