//! Connection registry
//!
//! Connections register with a [`Registry`] once connected and ask it for a
//! self-description blob, which travels in the handshake and answers health
//! checks. The blob is a flat `&key=value&` list:
//!
//! ```text
//! &time=2024-05-01T12:00:00Z&privategroup=#scautopick#host&hostname=host&
//! ips=10.0.0.5&programname=scautopick&pid=4242&cpuusage=3&totalmemory=16318504&
//! memusage=20480&sentmessages=17&receivedmessages=230&messagequeuesize=0&
//! summedmessagequeuesize=231&summedmessagesize=9120&
//! ```
//!
//! [`ConnectionInfo::start`] runs a sampling timer: every `delay` it samples
//! the process CPU usage, and every [`SAMPLES_PER_REPORT`] samples it
//! publishes the blob of each connected connection to `STATUS_GROUP`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::SecondsFormat;
use parking_lot::{Mutex, RwLock};
use sysinfo::{Pid, ProcessRefreshKind, System};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use types::Clock;

use crate::connection::SystemConnection;
use crate::stats::MessageStat;

/// Time between two CPU samples.
pub const DEFAULT_REPORT_DELAY: Duration = Duration::from_secs(3);

/// CPU samples per published status report; also the averaging window.
pub const SAMPLES_PER_REPORT: usize = 4;

/// What a connection reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub id: u64,
    pub client_name: String,
    pub private_group: String,
    pub stats: MessageStat,
    pub queue_size: usize,
}

pub trait Registry: Send + Sync {
    fn register_connection(&self, connection: &Arc<SystemConnection>);

    fn unregister_connection(&self, id: u64);

    /// Status blob for handshakes and health-check replies.
    fn info(&self, status: &ConnectionStatus) -> String;
}

/// Appends extra `key=value&` pairs to every rendered blob.
pub type InfoCallback = Box<dyn Fn(&ConnectionStatus, &mut String) + Send + Sync>;

/// Rolling CPU average. The first sample fills the whole window.
#[derive(Debug, Default)]
struct CpuWindow {
    samples: Vec<f64>,
    next: usize,
    average: f64,
}

impl CpuWindow {
    fn record(&mut self, sample: f64) {
        if self.samples.is_empty() {
            self.samples = vec![sample; SAMPLES_PER_REPORT];
        } else {
            self.samples[self.next] = sample;
        }
        self.next = (self.next + 1) % self.samples.len();
        self.average = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
    }
}

/// Default registry: host and process facts, the connection list and the
/// status reporting timer.
pub struct ConnectionInfo {
    clock: Arc<dyn Clock>,
    hostname: String,
    ips: String,
    program_name: String,
    pid: u32,
    total_memory_kb: u64,
    delay: Duration,
    system: Mutex<System>,
    cpu: Mutex<CpuWindow>,
    connections: Mutex<BTreeMap<u64, Weak<SystemConnection>>>,
    callback: RwLock<Option<InfoCallback>>,
    reporter: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionInfo {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let program_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_default();

        let mut system = System::new();
        system.refresh_memory();
        let total_memory_kb = system.total_memory() / 1024;

        Self {
            clock,
            ips: resolve_ips(&hostname),
            hostname,
            program_name,
            pid: std::process::id(),
            total_memory_kb,
            delay: DEFAULT_REPORT_DELAY,
            system: Mutex::new(system),
            cpu: Mutex::new(CpuWindow::default()),
            connections: Mutex::new(BTreeMap::new()),
            callback: RwLock::new(None),
            reporter: Mutex::new(None),
        }
    }

    /// Interval between CPU samples. Reports go out every
    /// `delay * SAMPLES_PER_REPORT`.
    pub fn with_report_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// IPv4 addresses of this host, space separated.
    pub fn ips(&self) -> &str {
        &self.ips
    }

    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn report_delay(&self) -> Duration {
        self.delay
    }

    /// Ids of registered connections, ascending.
    pub fn registered(&self) -> Vec<u64> {
        self.connections.lock().keys().copied().collect()
    }

    /// Current status of a registered connection that is still alive.
    pub fn status_of(&self, id: u64) -> Option<ConnectionStatus> {
        let connection = self.connections.lock().get(&id).and_then(Weak::upgrade)?;
        Some(connection.status_snapshot())
    }

    /// Install the info callback. Fails if one is already installed.
    pub fn set_info_callback(&self, callback: InfoCallback) -> bool {
        let mut slot = self.callback.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(callback);
        true
    }

    pub fn clear_info_callback(&self) {
        *self.callback.write() = None;
    }

    /// Start the sampling timer. Returns false if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut reporter = self.reporter.lock();
        if reporter.as_ref().is_some_and(|task| !task.is_finished()) {
            return false;
        }

        let registry = Arc::downgrade(self);
        let delay = self.delay;
        *reporter = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + delay, delay);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut samples = 0usize;
            loop {
                ticks.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.sample_cpu();
                samples += 1;
                if samples % SAMPLES_PER_REPORT == 0 {
                    registry.publish_reports().await;
                }
            }
        }));
        info!(delay_ms = delay.as_millis() as u64, "Started state of health reporting");
        true
    }

    /// Stop the sampling timer. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        match self.reporter.lock().take() {
            Some(task) => {
                task.abort();
                info!("Stopped state of health reporting");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.reporter
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Average CPU usage of this process over the sampling window, in percent.
    pub fn cpu_usage(&self) -> f64 {
        self.cpu.lock().average
    }

    fn sample_cpu(&self) {
        let pid = Pid::from(self.pid as usize);
        let usage = {
            let mut system = self.system.lock();
            system.refresh_process_specifics(pid, ProcessRefreshKind::new().with_cpu());
            system.process(pid).map_or(0.0, |p| f64::from(p.cpu_usage()))
        };
        self.cpu.lock().record(usage);
    }

    /// Resident memory of this process in kB, or -1 if unknown.
    fn memory_usage_kb(&self) -> i64 {
        let pid = Pid::from(self.pid as usize);
        let mut system = self.system.lock();
        if !system.refresh_process_specifics(pid, ProcessRefreshKind::new().with_memory()) {
            return -1;
        }
        system
            .process(pid)
            .map_or(-1, |p| i64::try_from(p.memory() / 1024).unwrap_or(-1))
    }

    async fn publish_reports(&self) {
        let connections: Vec<Arc<SystemConnection>> = self
            .connections
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();

        for connection in connections {
            if !connection.is_connected() {
                continue;
            }
            if let Err(e) = connection.send_status_report().await {
                debug!(connection_id = connection.id(), error = %e, "Sending status message to STATUS_GROUP failed");
            }
        }
    }
}

impl Registry for ConnectionInfo {
    fn register_connection(&self, connection: &Arc<SystemConnection>) {
        debug!(connection_id = connection.id(), private_group = %connection.private_group(), "Registering connection");
        self.connections
            .lock()
            .insert(connection.id(), Arc::downgrade(connection));
    }

    fn unregister_connection(&self, id: u64) {
        if self.connections.lock().remove(&id).is_some() {
            debug!(connection_id = id, "Unregistered connection");
        }
    }

    fn info(&self, status: &ConnectionStatus) -> String {
        let time = self.clock.now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let cpu_usage = self.cpu_usage() as i64;
        let memory_usage = self.memory_usage_kb();

        let mut out = String::from("&");
        let pairs: [(&str, &dyn std::fmt::Display); 14] = [
            ("time", &time),
            ("privategroup", &status.private_group),
            ("hostname", &self.hostname),
            ("ips", &self.ips),
            ("programname", &self.program_name),
            ("pid", &self.pid),
            ("cpuusage", &cpu_usage),
            ("totalmemory", &self.total_memory_kb),
            ("memusage", &memory_usage),
            ("sentmessages", &status.stats.sent_messages),
            ("receivedmessages", &status.stats.received_messages),
            ("messagequeuesize", &status.queue_size),
            ("summedmessagequeuesize", &status.stats.summed_queue_depth),
            ("summedmessagesize", &status.stats.sent_bytes),
        ];
        for (key, value) in pairs {
            let _ = write!(out, "{key}={value}&");
        }
        if let Some(callback) = self.callback.read().as_ref() {
            callback(status, &mut out);
        }
        out
    }
}

impl Drop for ConnectionInfo {
    fn drop(&mut self) {
        if let Some(task) = self.reporter.get_mut().take() {
            task.abort();
        }
    }
}

fn resolve_ips(hostname: &str) -> String {
    let mut ips: Vec<String> = Vec::new();
    if let Ok(addrs) = (hostname, 0).to_socket_addrs() {
        for addr in addrs {
            if let IpAddr::V4(ip) = addr.ip() {
                let ip = ip.to_string();
                if !ips.contains(&ip) {
                    ips.push(ip);
                }
            }
        }
    }
    ips.join(" ")
}

/// Split an info blob back into key/value pairs.
pub fn parse_info(blob: &str) -> BTreeMap<String, String> {
    blob.split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
