//! Launcher: validation, wiring, and output.

use crate::args::Cli;
use crate::output::{print_results, OutputMode, RecordWriter};
use ipnet::Ipv4Net;
use kestrel_common::{
    KestrelError, KestrelResult, ScanConfig, ScanMode, ScanRecord, ScanStats,
};
use kestrel_engine::{aggregator, EngineConfig, ScanController, ScanReport};
use kestrel_fingerprint::FingerDb;
use kestrel_probe::{has_raw_socket_priv, ProbeDispatcher, TlsClientFactory};
use kestrel_targets::{expand_port_tokens, expand_ports, TargetSet};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::io::{BufWriter, Read};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

enum Input {
    Targets(Vec<String>),
    Rescan(Vec<(Ipv4Addr, u16)>),
}

enum Work {
    Targets(TargetSet),
    Rescan(Vec<(Ipv4Addr, u16)>),
}

pub async fn run(cli: Cli) -> KestrelResult<()> {
    validate_flags(&cli)?;

    let mut plan = expand_ports(&cli.ports)?;
    if plan.icmp && !has_raw_socket_priv() {
        warn!("current user cannot open raw sockets, icmp probes dropped");
        plan.drop_icmp();
    }
    if plan.ports.is_empty() && !plan.icmp {
        return Err(KestrelError::Config(
            "no scannable ports left after privilege checks".to_string(),
        ));
    }

    let fingers = Arc::new(load_fingers(&cli)?);
    info!("loaded {} fingerprint(s)", fingers.len());

    let extract = match &cli.extract {
        Some(pattern) => Some(
            Regex::new(pattern)
                .map_err(|e| KestrelError::Config(format!("bad extract regex: {}", e)))?,
        ),
        None => None,
    };

    let tls = TlsClientFactory::new()
        .map_err(|e| KestrelError::Io(std::io::Error::other(e.to_string())))?;
    let timeout = Duration::from_secs(cli.timeout.max(1));
    let dispatcher = Arc::new(ProbeDispatcher::new(tls).with_timeouts(timeout, timeout));

    let work = match gather_input(&cli)? {
        Input::Rescan(pairs) => Work::Rescan(pairs),
        Input::Targets(tokens) => Work::Targets(TargetSet::parse(tokens).await?),
    };
    let mode = match &work {
        Work::Targets(set) => resolve_mode(parse_mode(&cli.mode), &set.cidrs),
        Work::Rescan(_) => ScanMode::Default,
    };

    let config_echo = ScanConfig {
        target: target_name(&cli),
        ports: cli.ports.clone(),
        mode,
        threads: cli.threads,
        level: cli.level,
        timeout: cli.timeout,
    };

    let engine_config = EngineConfig {
        mode,
        threads: cli.threads.max(1),
        level: cli.level,
        ports: plan.ports.clone(),
        icmp: plan.icmp,
        extract,
        ..EngineConfig::default()
    };

    info!(
        "starting scan: mode={} threads={} level={} ports={}",
        mode.as_str(),
        engine_config.threads,
        engine_config.level,
        engine_config.ports.len()
    );

    let controller = ScanController::new(dispatcher, fingers, engine_config);
    let stop = controller.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next batch boundary");
            stop.store(true, Ordering::Relaxed);
        }
    });

    let (agg, handle) = aggregator::spawn();
    let started = Instant::now();
    let run_result = match &work {
        Work::Rescan(pairs) => controller.run_pairs(pairs.clone(), &agg).await,
        Work::Targets(set) => controller.run(set, &agg).await,
    };
    drop(agg);
    let report = handle.finish().await;

    match run_result {
        Ok(()) => {}
        // a cancelled scan still flushes what it has
        Err(KestrelError::Cancelled) => warn!("scan cancelled, writing partial results"),
        Err(e) => return Err(e),
    }

    summarize(&report, started.elapsed());
    write_outputs(&cli, &config_echo, &report);
    Ok(())
}

/// Argument-combination rules; violations exit 1.
pub fn validate_flags(cli: &Cli) -> KestrelResult<()> {
    if cli.ip.is_none() && cli.list_file.is_none() && cli.json_file.is_none() {
        return Err(KestrelError::Config(
            "cannot find target, set -ip, -l, -j, or stdin".to_string(),
        ));
    }
    if cli.json_file.is_some() && cli.list_file.is_some() {
        return Err(KestrelError::Config(
            "cannot set -j and -l at the same time".to_string(),
        ));
    }
    if cli.json_file.is_some() || (cli.ip.as_deref() == Some("-") && cli.stdin_type == "json") {
        if cli.ports != "top1" {
            warn!("json input cannot configure ports, -p ignored");
        }
        if cli.mode != "default" {
            warn!("json input cannot configure mode, default scanning");
        }
    }
    Ok(())
}

fn parse_mode(s: &str) -> ScanMode {
    // clap's value_parser restricts the strings already
    ScanMode::parse(s).unwrap_or(ScanMode::Default)
}

/// Auto mode picks smart scanning as soon as the input holds at least one
/// /24-or-larger range.
pub fn resolve_mode(mode: ScanMode, cidrs: &[Ipv4Net]) -> ScanMode {
    if mode != ScanMode::Auto {
        return mode;
    }
    let resolved = if cidrs.iter().any(|net| net.prefix_len() <= 24) {
        ScanMode::Smart
    } else {
        ScanMode::Default
    };
    info!("auto mode resolved to {}", resolved.as_str());
    resolved
}

fn load_fingers(cli: &Cli) -> KestrelResult<FingerDb> {
    match &cli.fingers {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            FingerDb::load(&content, &expand_port_tokens)
        }
        None => FingerDb::load_default(&expand_port_tokens),
    }
}

fn gather_input(cli: &Cli) -> KestrelResult<Input> {
    if let Some(path) = &cli.json_file {
        let content = fs::read_to_string(path)?;
        return Ok(Input::Rescan(parse_result_pairs(&content)?));
    }
    if cli.ip.as_deref() == Some("-") {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .map_err(KestrelError::Io)?;
        if cli.stdin_type == "json" {
            return Ok(Input::Rescan(parse_result_pairs(&content)?));
        }
        return Ok(Input::Targets(
            content.lines().map(str::to_string).collect(),
        ));
    }
    if let Some(path) = &cli.list_file {
        let content = fs::read_to_string(path)?;
        return Ok(Input::Targets(
            content.lines().map(str::to_string).collect(),
        ));
    }
    let ip = cli.ip.clone().unwrap_or_default();
    Ok(Input::Targets(ip.split(',').map(str::to_string).collect()))
}

#[derive(Deserialize)]
struct ResultFile {
    #[serde(default)]
    #[allow(dead_code)]
    config: serde_json::Value,
    #[serde(default)]
    data: Vec<ScanRecord>,
}

/// Extract unique (ip, port) pairs from a previously emitted JSON file.
pub fn parse_result_pairs(content: &str) -> KestrelResult<Vec<(Ipv4Addr, u16)>> {
    let file: ResultFile = serde_json::from_str(content)
        .map_err(|e| KestrelError::Config(format!("bad result json: {}", e)))?;
    let mut seen = std::collections::HashSet::new();
    let mut pairs = Vec::new();
    for record in &file.data {
        if seen.insert((record.ip, record.port)) {
            pairs.push((record.ip, record.port));
        }
    }
    if pairs.is_empty() {
        return Err(KestrelError::Config(
            "result json carries no targets".to_string(),
        ));
    }
    Ok(pairs)
}

fn target_name(cli: &Cli) -> String {
    if let Some(path) = &cli.list_file {
        path.display().to_string()
    } else if let Some(path) = &cli.json_file {
        path.display().to_string()
    } else if cli.mode == "a" {
        "auto".to_string()
    } else {
        cli.ip.clone().unwrap_or_default()
    }
}

fn summarize(report: &ScanReport, elapsed: Duration) {
    let mut stats = ScanStats {
        alive_b: report.smart_b.len(),
        alive_c: report.smart_c.len(),
        alive_hosts: report.alive.len(),
        elapsed,
        ..Default::default()
    };
    for record in report.records() {
        stats.record(record);
    }
    info!(
        "scan finished in {:.1}s: {} open, {} identified, {} vuln(s), {} alive host(s)",
        stats.elapsed.as_secs_f64(),
        stats.open,
        stats.identified,
        stats.vulns,
        stats.alive_hosts
    );
}

fn open_writer(path: &Path, mode: OutputMode) -> Option<RecordWriter<BufWriter<fs::File>>> {
    match fs::File::create(path) {
        Ok(file) => Some(RecordWriter::new(BufWriter::new(file), mode)),
        Err(e) => {
            warn!("cannot create {}: {}", path.display(), e);
            None
        }
    }
}

/// Sink failures log and continue; they never abort a finished scan.
fn write_outputs(cli: &Cli, config: &ScanConfig, report: &ScanReport) {
    print_results(report.records());

    if let Some(path) = &cli.file {
        let mode = OutputMode::parse(&cli.file_format).unwrap_or(OutputMode::Json);
        if let Some(mut writer) = open_writer(path, mode) {
            let result = writer
                .open(&config.to_json("scan"))
                .and_then(|_| {
                    report
                        .records()
                        .iter()
                        .try_for_each(|record| writer.write_record(record))
                })
                .and_then(|_| writer.close());
            if let Err(e) = result {
                warn!("write {} failed: {}", path.display(), e);
            }
        }
        write_extract_sink(path, report);
    }

    // sb mode has no /16 emission; its dedicated sink is smart_c
    if config.mode != ScanMode::SmartB {
        write_net_sink(cli.smart_b_file.as_deref(), config, "smartb", &report.smart_b);
    }
    write_net_sink(cli.smart_c_file.as_deref(), config, "smartc", &report.smart_c);
    if let Some(path) = &cli.alive_file {
        let values: Vec<String> = report.alive.iter().map(ToString::to_string).collect();
        write_string_sink(path, config, "ping", &values);
    }
}

fn write_extract_sink(main_path: &Path, report: &ScanReport) {
    let lines: Vec<String> = report
        .records()
        .iter()
        .filter(|r| !r.extract.is_empty())
        .map(|r| format!("{}:{} {}", r.ip, r.port, r.extract.join(" ")))
        .collect();
    if lines.is_empty() {
        return;
    }
    let mut path = PathBuf::from(main_path);
    path.set_file_name(format!(
        "{}_extract",
        main_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "result".to_string())
    ));
    if let Err(e) = fs::write(&path, lines.join("\n") + "\n") {
        warn!("write {} failed: {}", path.display(), e);
    }
}

fn write_net_sink(path: Option<&Path>, config: &ScanConfig, kind: &str, nets: &[Ipv4Net]) {
    let Some(path) = path else { return };
    let values: Vec<String> = nets.iter().map(ToString::to_string).collect();
    write_string_sink(path, config, kind, &values);
}

fn write_string_sink(path: &Path, config: &ScanConfig, kind: &str, values: &[String]) {
    let Some(mut writer) = open_writer(path, OutputMode::Json) else {
        return;
    };
    let result = writer
        .open(&config.to_json(kind))
        .and_then(|_| {
            values
                .iter()
                .try_for_each(|v| writer.write_value(&serde_json::Value::String(v.clone())))
        })
        .and_then(|_| writer.close());
    if let Err(e) = result {
        warn!("write {} failed: {}", path.display(), e);
    }
}
