//! Tokio tasks driving a [`Router`]
//!
//! Each interface gets a receive task feeding the router and a transmit
//! task draining that interface's outbox. Timers run as their own tasks.
//! The router never blocks on I/O; frames it returns are pushed into the
//! outboxes.

use crate::capture::Capture;
use crate::dataplane::{Outbound, Router};
use crate::protocol::ethernet::MAX_FRAME_SIZE;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Granularity of the ARP retry scheduler
pub const ARP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Transmit queues, one per interface
#[derive(Debug, Default)]
pub struct Outboxes {
    senders: HashMap<String, UnboundedSender<Vec<u8>>>,
}

impl Outboxes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the queue for `interface` and return its consumer end.
    pub fn channel(&mut self, interface: &str) -> UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = unbounded_channel();
        self.senders.insert(interface.to_string(), tx);
        rx
    }

    pub fn dispatch(&self, frames: Outbound) {
        for (interface, frame) in frames {
            match self.senders.get(&interface) {
                Some(tx) => {
                    if tx.send(frame).is_err() {
                        warn!("transmit task for {} has stopped", interface);
                    }
                }
                None => warn!("no outbox for {}", interface),
            }
        }
    }
}

/// Start the receive and transmit tasks of one interface.
///
/// The receive task ends when the capture reports end of stream (a zero
/// length read); the transmit task ends when every sender is dropped.
pub fn spawn_interface<C: Capture + 'static>(
    router: Arc<Router>,
    name: String,
    capture: Arc<C>,
    mut outbox: UnboundedReceiver<Vec<u8>>,
    outboxes: Arc<Outboxes>,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let rx_router = Arc::clone(&router);
    let rx_capture = Arc::clone(&capture);
    let rx_name = name.clone();

    let rx = tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_FRAME_SIZE + 4];
        loop {
            match rx_capture.recv(&mut buf).await {
                Ok(0) => {
                    debug!("capture on {} closed", rx_name);
                    break;
                }
                Ok(len) => {
                    let frames = rx_router.process_packet(&rx_name, &buf[..len]);
                    outboxes.dispatch(frames);
                }
                Err(e) => {
                    error!("receive error on {}: {}", rx_name, e);
                    rx_router.metrics().record_rx_error(&rx_name);
                }
            }
        }
    });

    let tx = tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            match capture.send(&frame).await {
                Ok(_) => router.metrics().record_tx(&name, frame.len()),
                Err(e) => {
                    warn!("failed to send on {}: {}", name, e);
                    router.metrics().record_tx_error(&name);
                }
            }
        }
    });

    (rx, tx)
}

/// Start the ARP retry scheduler and, when RIP is enabled, the RIP
/// update and aging timers. The RIP table requests are queued before any
/// timer task is spawned.
pub fn spawn_timers(router: Arc<Router>, outboxes: Arc<Outboxes>) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();
    outboxes.dispatch(router.start_rip());

    let arp_router = Arc::clone(&router);
    let arp_outboxes = Arc::clone(&outboxes);
    tasks.push(tokio::spawn(async move {
        let mut ticker = interval(ARP_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let now = ticker.tick().await.into_std();
            arp_outboxes.dispatch(arp_router.poll_arp(now));
        }
    }));

    let Some(timers) = router.rip_timers() else {
        return tasks;
    };
    info!(
        "RIP enabled: updates every {:?}, timeout {:?}",
        timers.update_interval, timers.route_timeout
    );

    let rip_router = Arc::clone(&router);
    tasks.push(tokio::spawn(async move {
        let mut ticker = interval(timers.update_interval);
        loop {
            ticker.tick().await;
            outboxes.dispatch(rip_router.rip_advertise());
        }
    }));

    tasks.push(tokio::spawn(async move {
        let mut ticker = interval(timers.aging_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let now = ticker.tick().await.into_std();
            router.rip_age(now);
        }
    }));

    tasks
}
