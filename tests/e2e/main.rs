//! E2E tests using containerlab
//!
//! Needs a `ripster:latest` image with the binary at /usr/local/bin/ripster.
//! Run with: cargo test --test e2e -- --ignored
//!
//! Topology:
//!   client (10.0.1.2) -- r1 -- 10.0.12.0/24 -- r2 -- server (10.0.2.2)
//!
//! Neither router has a static route to the far subnet; it is learned over
//! RIP.

mod clab;

use clab::Lab;
use std::path::PathBuf;
use std::time::Duration;

fn topology() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/clab/topology.yml")
}

fn lab_with_routers() -> Lab {
    let lab = Lab::deploy(topology()).expect("failed to deploy lab");
    for node in ["r1", "r2"] {
        assert!(lab.start_router(node), "ripster failed on {node}: {}", lab.router_log(node));
    }
    lab
}

#[test]
#[ignore] // Requires containerlab and sudo
fn test_ping_router_interface() {
    let lab = lab_with_routers();
    assert!(lab.ping("client", "10.0.1.1", 3), "client should reach r1");
    assert!(lab.ping("server", "10.0.2.1", 3), "server should reach r2");
}

#[test]
#[ignore] // Requires containerlab and sudo
fn test_forwarding_over_learned_routes() {
    let lab = lab_with_routers();
    assert!(
        lab.wait_for_ping("client", "10.0.2.2", Duration::from_secs(30)),
        "RIP did not converge: {}",
        lab.router_log("r1")
    );
    assert!(lab.ping("server", "10.0.1.2", 3));
    assert!(lab.router_log("r1").contains("RIP route installed"));
}

#[test]
#[ignore] // Requires containerlab and sudo
fn test_ttl_exceeded_from_first_hop() {
    let lab = lab_with_routers();
    assert!(lab.wait_for_ping("client", "10.0.2.2", Duration::from_secs(30)));

    let output = lab.ping_output("client", "10.0.2.2", Some(1));
    assert!(output.contains("10.0.1.1"), "unexpected ping output: {output}");
}

#[test]
#[ignore] // Requires containerlab and sudo
fn test_route_expires_when_neighbor_stops() {
    let lab = lab_with_routers();
    assert!(lab.wait_for_ping("client", "10.0.2.2", Duration::from_secs(30)));

    lab.stop_router("r2");
    // route timeout in r1.toml is 15s
    std::thread::sleep(Duration::from_secs(20));

    assert!(!lab.ping("client", "10.0.2.2", 1));
    let output = lab.ping_output("client", "10.0.2.2", None);
    assert!(output.contains("Unreachable"), "unexpected ping output: {output}");
}
