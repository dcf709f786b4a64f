//! Result aggregation.
//!
//! Many submitters, one consumer: workers push through a bounded channel
//! and a single task owns all mutable state. Dedup keys on
//! (ip, port, protocol) and keeps the record with the most identification.
//! The channel capacity is the pending-write buffer; overflow drops the
//! event with a warning rather than stalling probe workers.

use ipnet::Ipv4Net;
use kestrel_common::ScanRecord;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

const DEFAULT_BUFFER: usize = 4096;

enum Event {
    Record(ScanRecord),
    AliveB(Ipv4Net),
    AliveC(Ipv4Net),
    AliveHost(Ipv4Addr),
}

/// Cloneable submission handle held by probe workers.
#[derive(Clone)]
pub struct Aggregator {
    tx: mpsc::Sender<Event>,
}

impl Aggregator {
    fn push(&self, event: Event) {
        if self.tx.try_send(event).is_err() {
            warn!("aggregator buffer full, dropping one event");
        }
    }

    pub fn submit(&self, record: ScanRecord) {
        self.push(Event::Record(record));
    }

    pub fn alive_b(&self, net: Ipv4Net) {
        self.push(Event::AliveB(net));
    }

    pub fn alive_c(&self, net: Ipv4Net) {
        self.push(Event::AliveC(net));
    }

    pub fn alive_host(&self, ip: Ipv4Addr) {
        self.push(Event::AliveHost(ip));
    }
}

/// Owned by the caller; resolves to the final report once every
/// submission handle is dropped.
pub struct AggregatorHandle {
    join: JoinHandle<ScanReport>,
}

impl AggregatorHandle {
    /// Await the consumer. All `Aggregator` clones must be dropped first or
    /// this never resolves.
    pub async fn finish(self) -> ScanReport {
        self.join.await.unwrap_or_default()
    }
}

/// Final collected output: deduplicated records plus the tier side sinks.
#[derive(Debug, Default)]
pub struct ScanReport {
    records: Vec<ScanRecord>,
    pub smart_b: Vec<Ipv4Net>,
    pub smart_c: Vec<Ipv4Net>,
    pub alive: Vec<Ipv4Addr>,
}

impl ScanReport {
    /// Consume the report as a finite, non-restartable record sequence.
    pub fn into_records(self) -> impl Iterator<Item = ScanRecord> {
        self.records.into_iter()
    }

    #[must_use]
    pub fn records(&self) -> &[ScanRecord] {
        &self.records
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Start the consumer task with the default buffer.
pub fn spawn() -> (Aggregator, AggregatorHandle) {
    spawn_with_buffer(DEFAULT_BUFFER)
}

pub fn spawn_with_buffer(buffer: usize) -> (Aggregator, AggregatorHandle) {
    let (tx, mut rx) = mpsc::channel(buffer.max(1));
    let join = tokio::spawn(async move {
        let mut by_key: HashMap<(Ipv4Addr, u16, kestrel_common::Protocol), usize> = HashMap::new();
        let mut report = ScanReport::default();
        let mut seen_hosts = std::collections::HashSet::new();

        while let Some(event) = rx.recv().await {
            match event {
                Event::Record(record) => match by_key.get(&record.key()) {
                    Some(&slot) => {
                        if record.population() > report.records[slot].population() {
                            report.records[slot] = record;
                        }
                    }
                    None => {
                        by_key.insert(record.key(), report.records.len());
                        report.records.push(record);
                    }
                },
                Event::AliveB(net) => {
                    if !report.smart_b.contains(&net) {
                        report.smart_b.push(net);
                    }
                }
                Event::AliveC(net) => {
                    if !report.smart_c.contains(&net) {
                        report.smart_c.push(net);
                    }
                }
                Event::AliveHost(ip) => {
                    if seen_hosts.insert(ip) {
                        report.alive.push(ip);
                    }
                }
            }
        }
        report
    });
    (Aggregator { tx }, AggregatorHandle { join })
}
