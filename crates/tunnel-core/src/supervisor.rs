//! The tunnel supervisor: one SSH session, kept alive.
//!
//! `start()` binds the listeners, dials the session, and then sits in a
//! two-armed select loop: `reconnect` carries session-death errors from
//! the disconnect watcher and triggers a re-dial over the same listeners;
//! `done` carries a terminal error (or `None` for a requested stop) from
//! any worker and ends the run.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, warn};

use warren_types::{ChannelSpec, Endpoint, TunnelSettings};

use crate::channel::{ChannelMultiplexer, run_accept_loop};
use crate::error::{TunnelError, TunnelResult};
use crate::server::ServerIdentity;
use crate::transport::{RusshTransport, Session, Transport};

/// A tunnel ready to be started. Owns its server identity, channel set,
/// and settings exclusively for the duration of the run.
#[derive(Debug)]
pub struct Tunnel<T: Transport> {
    server: ServerIdentity,
    settings: TunnelSettings,
    multiplexer: ChannelMultiplexer,
    transport: T,

    session_tx: watch::Sender<Option<Arc<T::Session>>>,
    reconnect_tx: mpsc::Sender<TunnelError>,
    reconnect_rx: mpsc::Receiver<TunnelError>,
    done_tx: mpsc::Sender<Option<TunnelError>>,
    done_rx: mpsc::Receiver<Option<TunnelError>>,
    ready_tx: watch::Sender<bool>,

    keep_alive_stop: Option<mpsc::Sender<()>>,
    watch_off: Option<mpsc::Sender<()>>,
}

/// Handle for observing and stopping a running tunnel.
#[derive(Clone)]
pub struct TunnelHandle {
    done_tx: mpsc::Sender<Option<TunnelError>>,
    ready_rx: watch::Receiver<bool>,
}

impl TunnelHandle {
    /// Ask the tunnel to stop. Idempotent; extra requests are discarded.
    pub fn stop(&self) {
        let _ = self.done_tx.try_send(None);
    }

    /// Wait until every channel has entered its accept loop.
    pub async fn ready(&mut self) {
        while !*self.ready_rx.borrow() {
            if self.ready_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Build a russh-backed tunnel from a reconciled server identity and
/// channel set.
pub fn new_tunnel(
    server: ServerIdentity,
    channels: Vec<ChannelSpec>,
    settings: TunnelSettings,
) -> TunnelResult<Tunnel<RusshTransport>> {
    let transport = RusshTransport::for_server(&server)?;
    Tunnel::with_transport(transport, server, channels, settings)
}

impl<T: Transport> Tunnel<T> {
    /// Build a tunnel over an explicit transport implementation.
    pub fn with_transport(
        transport: T,
        server: ServerIdentity,
        channels: Vec<ChannelSpec>,
        settings: TunnelSettings,
    ) -> TunnelResult<Self> {
        for channel in &channels {
            if channel.local.is_empty() || channel.remote.is_empty() {
                return Err(TunnelError::InvalidChannel {
                    local: channel.local.to_string(),
                    remote: channel.remote.to_string(),
                });
            }
            if !channel.remote.has_port() {
                return Err(TunnelError::MissingRemotePort {
                    address: channel.remote.to_string(),
                });
            }
        }

        let (session_tx, _) = watch::channel(None);
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = mpsc::channel(1);
        let (ready_tx, _) = watch::channel(false);

        Ok(Self {
            server,
            settings,
            multiplexer: ChannelMultiplexer::new(channels),
            transport,
            session_tx,
            reconnect_tx,
            reconnect_rx,
            done_tx,
            done_rx,
            ready_tx,
            keep_alive_stop: None,
            watch_off: None,
        })
    }

    /// A handle that outlives `start()` for readiness checks and stops.
    pub fn handle(&self) -> TunnelHandle {
        TunnelHandle {
            done_tx: self.done_tx.clone(),
            ready_rx: self.ready_tx.subscribe(),
        }
    }

    /// Bind local listeners for every channel. Called by `start()`, but
    /// also usable up front to observe OS-assigned ports early.
    pub async fn listen(&self) -> TunnelResult<()> {
        self.multiplexer.listen().await
    }

    /// The current local endpoints, in channel order.
    pub async fn local_endpoints(&self) -> Vec<Endpoint> {
        self.multiplexer.local_endpoints().await
    }

    /// Run the tunnel until it is stopped or fails fatally.
    pub async fn start(mut self) -> TunnelResult<()> {
        debug!(server = %self.server, channels = self.multiplexer.len(), "starting tunnel");
        self.connect().await;

        loop {
            tokio::select! {
                Some(err) = self.reconnect_rx.recv() => {
                    warn!(error = %err, "connection to ssh server got interrupted");
                    self.teardown_session().await;
                    debug!(server = %self.server, "re-establishing the tunnel after disconnection");
                    if let Err(err) = self.dial().await {
                        let _ = self.done_tx.try_send(Some(err));
                    }
                }
                outcome = self.done_rx.recv() => {
                    self.teardown_session().await;
                    return match outcome.flatten() {
                        Some(err) => Err(err),
                        None => Ok(()),
                    };
                }
            }
        }
    }

    /// First connection: bind listeners, dial, then start the per-channel
    /// accept loops and the readiness consolidator.
    async fn connect(&mut self) {
        if let Err(err) = self.multiplexer.listen().await {
            let _ = self.done_tx.try_send(Some(err));
            return;
        }
        if let Err(err) = self.dial().await {
            let _ = self.done_tx.try_send(Some(err));
            return;
        }
        self.spawn_channel_loops();
    }

    /// Establish one SSH session, retrying according to the settings. On
    /// success the session is published to the accept workers and the
    /// keep-alive and disconnect-watch tasks are spawned.
    async fn dial(&mut self) -> TunnelResult<()> {
        let retries = self.settings.connection_retries;
        let mut attempts: i32 = 0;
        let session = loop {
            match self
                .transport
                .dial(&self.server, self.settings.dial_timeout)
                .await
            {
                Ok(session) => break session,
                Err(err) => {
                    debug!(server = %self.server, attempts, error = %err, "error while connecting to ssh server");
                    if retries < 0 {
                        return Err(TunnelError::ReconnectExhausted {
                            attempts: 1,
                            source: Box::new(err),
                        });
                    }
                    attempts += 1;
                    if retries > 0 && attempts == retries {
                        error!(server = %self.server, attempts, "maximum number of connection retries to the ssh server reached");
                        return Err(TunnelError::ReconnectExhausted {
                            attempts: attempts as u32,
                            source: Box::new(err),
                        });
                    }
                    sleep(self.settings.wait_and_retry).await;
                }
            }
        };

        let session = Arc::new(session);
        self.session_tx.send_replace(Some(Arc::clone(&session)));
        self.spawn_keep_alive(Arc::clone(&session));
        if self.settings.connection_retries > 0 {
            self.spawn_disconnect_watch(session);
        }
        debug!(server = %self.server, "connection to the ssh server is established");
        Ok(())
    }

    fn spawn_channel_loops(&mut self) {
        let expected = self.multiplexer.len();
        let (first_pass_tx, mut first_pass_rx) = mpsc::channel::<()>(expected.max(1));

        // Consolidate the per-channel first-pass signals into a single
        // ready transition.
        let ready_tx = self.ready_tx.clone();
        tokio::spawn(async move {
            for _ in 0..expected {
                if first_pass_rx.recv().await.is_none() {
                    return;
                }
            }
            let _ = ready_tx.send(true);
        });

        for channel in self.multiplexer.channels() {
            tokio::spawn(run_accept_loop(
                Arc::clone(channel),
                self.session_tx.subscribe(),
                first_pass_tx.clone(),
                self.done_tx.clone(),
            ));
        }
    }

    fn spawn_keep_alive(&mut self, session: Arc<T::Session>) {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        self.keep_alive_stop = Some(stop_tx);
        let period = self.settings.keep_alive_interval;

        tokio::spawn(async move {
            debug!("start sending keep alive packets");
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = session.keep_alive().await {
                            warn!(error = %err, "error sending keep alive request to ssh server");
                        }
                    }
                    _ = stop_rx.recv() => {
                        debug!("stop sending keep alive packets");
                        return;
                    }
                }
            }
        });
    }

    /// One watcher per session: pushes the session-termination error onto
    /// `reconnect`, or exits silently when told to stand down.
    fn spawn_disconnect_watch(&mut self, session: Arc<T::Session>) {
        let (off_tx, mut off_rx) = mpsc::channel::<()>(1);
        self.watch_off = Some(off_tx);
        let reconnect_tx = self.reconnect_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                err = session.wait_closed() => {
                    let _ = reconnect_tx.try_send(err);
                }
                _ = off_rx.recv() => {}
            }
        });
    }

    /// Retire the keep-alive and watcher tasks and close the current
    /// session, leaving the listeners untouched.
    async fn teardown_session(&mut self) {
        if let Some(stop) = self.keep_alive_stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(off) = self.watch_off.take() {
            let _ = off.try_send(());
        }
        let session = self.session_tx.send_replace(None);
        if let Some(session) = session {
            session.close().await;
        }
    }
}

