#![allow(dead_code)]

use simkernel::{HostId, LinkId, Platform, PlatformBuilder};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-6
}

/// A single host computing 1 Gflop/s.
pub fn one_host() -> (Platform, HostId) {
    let mut builder = PlatformBuilder::new();
    let host = builder.add_host("alice", 1e9).unwrap();
    (builder.build(), host)
}

/// Two 1 Gflop/s hosts joined by a 1 MB/s link with 1 ms latency.
pub fn two_hosts() -> (PlatformBuilder, HostId, HostId, LinkId) {
    let mut builder = PlatformBuilder::new();
    let a = builder.add_host("alice", 1e9).unwrap();
    let b = builder.add_host("bob", 1e9).unwrap();
    let link = builder.add_link("alice-bob", 1e6, 0.001).unwrap();
    builder.add_route(a, b, &[link]).unwrap();
    (builder, a, b, link)
}
