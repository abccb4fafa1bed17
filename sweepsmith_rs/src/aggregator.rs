//! Combined progress of independent workers.
//!
//! Every worker registers with one [`ProgressAggregator`] and gets a
//! [`ProgressClient`]. Clients send their absolute count as a small
//! `{client_id, count}` message over a [`ProgressTransport`]; the aggregator
//! drains pending messages, keeps the latest count per client, and a
//! background updater periodically renders the combined percentage.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::progress::{ProgressBar, ProgressReporter, percentage};

/// Wire format of one progress update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub client_id: usize,
    pub count: u64,
}

/// "Send a small message over an addressable channel". Delivery is best
/// effort; only the latest count per client matters.
pub trait ProgressTransport: Send + Sync {
    fn send(&self, message: ProgressMessage) -> Result<()>;
}

/// In-process transport backed by the aggregator's own channel.
pub struct ChannelTransport {
    tx: mpsc::Sender<ProgressMessage>,
}

impl ProgressTransport for ChannelTransport {
    fn send(&self, message: ProgressMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| anyhow!("progress aggregator is gone"))
    }
}

/// Fire-and-forget JSON datagrams to an aggregator's [`UdpReceiver`].
pub struct UdpTransport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpTransport {
    pub fn connect(target: impl ToSocketAddrs) -> Result<Self> {
        let target = target
            .to_socket_addrs()
            .context("Unable to resolve progress address")?
            .next()
            .ok_or_else(|| anyhow!("progress address resolved to nothing"))?;
        let bind_addr: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).context("Unable to bind progress socket")?;
        Ok(Self { socket, target })
    }
}

impl ProgressTransport for UdpTransport {
    fn send(&self, message: ProgressMessage) -> Result<()> {
        let payload = serde_json::to_vec(&message)?;
        self.socket
            .send_to(&payload, self.target)
            .with_context(|| format!("Unable to send progress to {}", self.target))?;
        Ok(())
    }
}

/// Non-blocking socket the aggregator drains on every poll.
pub struct UdpReceiver {
    socket: UdpSocket,
}

impl UdpReceiver {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let socket = UdpSocket::bind(addr).context("Unable to bind progress receiver")?;
        socket
            .set_nonblocking(true)
            .context("Unable to make progress receiver non-blocking")?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Every datagram currently queued. Malformed payloads are skipped.
    pub fn drain(&self) -> Vec<ProgressMessage> {
        let mut messages = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => match serde_json::from_slice(&buf[..len]) {
                    Ok(message) => messages.push(message),
                    Err(error) => debug!(%from, %error, "Ignoring malformed progress datagram"),
                },
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) => {
                    warn!(%error, "Progress receiver failed");
                    break;
                }
            }
        }
        messages
    }
}

/// Handle a worker uses to report its own absolute count.
#[derive(Clone)]
pub struct ProgressClient {
    client_id: usize,
    final_count: u64,
    transport: Arc<dyn ProgressTransport>,
}

impl ProgressClient {
    /// Client for an id issued by an aggregator elsewhere, reachable at
    /// `addr` over UDP.
    pub fn udp(client_id: usize, final_count: u64, addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self {
            client_id,
            final_count,
            transport: Arc::new(UdpTransport::connect(addr)?),
        })
    }

    pub fn client_id(&self) -> usize {
        self.client_id
    }

    pub fn final_count(&self) -> u64 {
        self.final_count
    }

    /// Record `count` as this client's current progress.
    pub fn advance(&self, count: u64) -> Result<()> {
        self.transport.send(ProgressMessage {
            client_id: self.client_id,
            count,
        })
    }
}

impl std::fmt::Debug for ProgressClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressClient")
            .field("client_id", &self.client_id)
            .field("final_count", &self.final_count)
            .finish()
    }
}

impl ProgressReporter for ProgressClient {
    fn report(&mut self, count: u64) -> Result<()> {
        self.advance(count)
    }

    fn finish(&mut self) -> Result<()> {
        self.advance(self.final_count)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    final_count: u64,
    count: u64,
}

#[derive(Default)]
struct Updater {
    starts: usize,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    slots: Mutex<Vec<Slot>>,
    tx: mpsc::Sender<ProgressMessage>,
    rx: Mutex<mpsc::Receiver<ProgressMessage>>,
    receivers: Mutex<Vec<UdpReceiver>>,
    bar: Mutex<Option<ProgressBar>>,
    poll_interval: Duration,
    completed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Poisoning only means a renderer panicked; the counts are still usable.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    /// Apply every pending message, last write wins per client.
    fn drain(&self) {
        let mut messages: Vec<ProgressMessage> = lock(&self.rx).try_iter().collect();
        for receiver in lock(&self.receivers).iter() {
            messages.extend(receiver.drain());
        }
        if messages.is_empty() {
            return;
        }
        let mut slots = lock(&self.slots);
        for message in messages {
            match slots.get_mut(message.client_id) {
                Some(slot) => slot.count = message.count,
                None => debug!(client_id = message.client_id, "Progress from unknown client"),
            }
        }
    }

    /// Summed counts (each capped at its client's final count) and the
    /// summed final counts.
    fn totals(&self) -> (u64, u64) {
        self.drain();
        lock(&self.slots).iter().fold((0, 0), |(count, total), slot| {
            (count + slot.count.min(slot.final_count), total + slot.final_count)
        })
    }

    /// Redraw the combined bar. Nothing is drawn until some client has
    /// registered, and only the final render ends the line.
    fn render(&self) {
        let (count, total) = self.totals();
        if total == 0 {
            return;
        }
        if let Some(bar) = lock(&self.bar).as_mut() {
            bar.set_final_count(total);
            if let Err(error) = bar.redraw(count) {
                warn!(?error, "Progress render failed");
            }
        }
    }

    fn render_final(&self) {
        let (_, total) = self.totals();
        if let Some(bar) = lock(&self.bar).as_mut() {
            bar.set_final_count(total);
            if let Err(error) = bar.finish() {
                warn!(?error, "Progress render failed");
            }
        }
    }
}

/// Registry of progress clients plus the background updater rendering
/// their combined percentage. Cloning yields another handle to the same
/// aggregator.
///
/// The updater thread only holds the render state. Dropping the last
/// handle drops the stop channel, which ends a still-running updater.
#[derive(Clone)]
pub struct ProgressAggregator {
    inner: Arc<Inner>,
    updater: Arc<Mutex<Updater>>,
}

impl ProgressAggregator {
    /// `bar` receives the renders; `None` keeps the aggregate silent.
    pub fn new(poll_interval: Duration, bar: Option<ProgressBar>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(Vec::new()),
                tx,
                rx: Mutex::new(rx),
                receivers: Mutex::new(Vec::new()),
                bar: Mutex::new(bar),
                poll_interval,
                completed: AtomicBool::new(false),
            }),
            updater: Arc::new(Mutex::new(Updater::default())),
        }
    }

    fn register_slot(&self, final_count: u64) -> usize {
        let mut slots = lock(&self.inner.slots);
        slots.push(Slot {
            final_count,
            count: 0,
        });
        slots.len() - 1
    }

    /// Register an in-process client contributing `final_count` units.
    pub fn register(&self, final_count: u64) -> ProgressClient {
        let client_id = self.register_slot(final_count);
        debug!(client_id, final_count, "Registered progress client");
        ProgressClient {
            client_id,
            final_count,
            transport: Arc::new(ChannelTransport {
                tx: self.inner.tx.clone(),
            }),
        }
    }

    /// Start listening for UDP progress on `addr`; returns the bound address
    /// remote clients should send to.
    pub fn listen_udp(&self, addr: impl ToSocketAddrs) -> Result<SocketAddr> {
        let receiver = UdpReceiver::bind(addr)?;
        let local = receiver.local_addr()?;
        lock(&self.inner.receivers).push(receiver);
        Ok(local)
    }

    /// Register a client that reports over UDP to `addr` (an address
    /// returned by [`ProgressAggregator::listen_udp`]).
    pub fn register_udp(&self, final_count: u64, addr: SocketAddr) -> Result<ProgressClient> {
        let client_id = self.register_slot(final_count);
        debug!(client_id, final_count, %addr, "Registered UDP progress client");
        ProgressClient::udp(client_id, final_count, addr)
    }

    pub fn num_clients(&self) -> usize {
        lock(&self.inner.slots).len()
    }

    pub fn final_count(&self) -> u64 {
        lock(&self.inner.slots).iter().map(|s| s.final_count).sum()
    }

    /// Current aggregate percentage; 100 once the updater has been fully
    /// stopped.
    pub fn percentage(&self) -> u64 {
        if self.inner.completed.load(Ordering::SeqCst) {
            return 100;
        }
        let (count, total) = self.inner.totals();
        percentage(count, total)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.updater).starts > 0
    }

    /// Start the background updater. Nested calls only bump a counter.
    pub fn start(&self) -> Result<()> {
        let mut updater = lock(&self.updater);
        updater.starts += 1;
        if updater.starts > 1 {
            return Ok(());
        }

        self.inner.completed.store(false, Ordering::SeqCst);
        if let Some(bar) = lock(&self.inner.bar).as_mut() {
            bar.reopen();
        }
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("progress-aggregator".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(inner.poll_interval) {
                        Err(RecvTimeoutError::Timeout) => inner.render(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                inner.render_final();
            });
        match spawned {
            Ok(handle) => {
                updater.stop_tx = Some(stop_tx);
                updater.handle = Some(handle);
                Ok(())
            }
            Err(error) => {
                updater.starts = 0;
                Err(error).context("Unable to spawn progress-aggregator thread")
            }
        }
    }

    /// Match one [`ProgressAggregator::start`]. The last matching call
    /// renders 100% and joins the updater; unmatched calls do nothing.
    pub fn stop(&self) {
        let mut updater = lock(&self.updater);
        if updater.starts == 0 {
            return;
        }
        updater.starts -= 1;
        if updater.starts > 0 {
            return;
        }
        if let Some(stop_tx) = updater.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = updater.handle.take() {
            if handle.join().is_err() {
                warn!("progress-aggregator thread panicked");
            }
        }
        self.inner.completed.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("clients", &self.num_clients())
            .field("final_count", &self.final_count())
            .finish()
    }
}
