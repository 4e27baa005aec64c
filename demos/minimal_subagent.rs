//! Minimal end-to-end wiring: a reactor, a subagent engine registered
//! under a small OID subtree, and a fixed set of constant counters.
//! Connects to whatever AgentX master is listening on the default
//! `127.0.0.1:705` (e.g. `snmpd` configured with `master agentx`).
//!
//! Run with: `cargo run --example minimal_subagent`
//!
//! This is the library's "thin main" shape kept separate from `agentxd`
//! (which adds a CLI and live-incrementing counters) so a reader can see
//! the smallest possible wiring in one file, the way mio's own
//! `examples/tcp_server.rs` stays minimal next to its fuller integration
//! tests.

use std::sync::Arc;
use std::time::Duration;

use agentx_kvstats::agentx::{AgentxConfig, CounterSource, Engine, Oid, OidValue, Registry, ValueSource, VariantKind};
use agentx_kvstats::reactor::Reactor;

struct FixedCounters;

impl CounterSource for FixedCounters {
    fn get_named_counter(&self, name: &str) -> Option<u64> {
        match name {
            "uptime_seconds" => Some(0),
            _ => None,
        }
    }

    fn get_tick(&self, _id: u32) -> Option<u64> {
        None
    }
}

fn main() {
    env_logger::init();

    // 1.3.6.1.4.1.38693.5.1, the rocksdb ticker-table prefix from
    // `original_source/stats_table.cpp`'s doc comment.
    let prefix = Oid::from([1, 3, 6, 1, 4, 1, 38693u32, 5, 1]);

    let source: Arc<dyn CounterSource> = Arc::new(FixedCounters);
    let mut registry = Registry::new();
    registry
        .register(
            &prefix,
            OidValue::new(Oid::from([1]), VariantKind::Counter64, ValueSource::Named("uptime_seconds".into()), &source),
        )
        .expect("first registration under an empty registry cannot collide");

    let config = AgentxConfig::new(prefix, "RocksMonitor");
    let engine = Engine::new(config, registry);

    let mut reactor = Reactor::new().expect("reactor construction failed");
    let handle = reactor.handle().expect("reactor handle");
    handle.attach(Box::new(engine)).expect("attach");

    let worker = reactor.run_threaded();
    std::thread::sleep(Duration::from_secs(5));
    let _ = handle.stop();
    let _ = worker.join();
}
