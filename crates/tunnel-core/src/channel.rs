//! Channel pairing and the accept→dial→copy pipelines.
//!
//! A [`Channel`] owns one local listener for the lifetime of a tunnel run;
//! the listener survives SSH reconnects so clients keep a stable local
//! address. Each accepted connection dials the remote target over whatever
//! session is current at that moment and moves bytes in both directions
//! until either side closes.

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, copy, split};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};

use warren_types::{ChannelSpec, Endpoint, expand_address};

use crate::config::SshConfig;
use crate::error::{TunnelError, TunnelResult};
use crate::transport::Session;

const RANDOM_PORT_ADDRESS: &str = "127.0.0.1:0";

/// Shared pointer to the current session. Replaced atomically by the
/// supervisor on every reconnect; accept workers read it per accepted
/// connection, never caching a session across streams.
pub(crate) type SessionCell<S> = watch::Receiver<Option<Arc<S>>>;

/// Runtime state of one forwarding pair.
#[derive(Debug)]
pub struct Channel {
    remote: Endpoint,
    local: Mutex<Endpoint>,
    listener: Mutex<Option<Arc<TcpListener>>>,
}

impl Channel {
    fn new(spec: ChannelSpec) -> Self {
        Self {
            remote: spec.remote,
            local: Mutex::new(spec.local),
            listener: Mutex::new(None),
        }
    }

    /// The remote target this channel forwards to.
    pub fn remote(&self) -> &Endpoint {
        &self.remote
    }

    /// The local endpoint, reflecting the actually bound address once the
    /// listener exists.
    pub async fn local(&self) -> Endpoint {
        self.local.lock().await.clone()
    }

    async fn listener(&self) -> Option<Arc<TcpListener>> {
        self.listener.lock().await.clone()
    }
}

/// Owns the listener set of a tunnel and serves its accept loops.
#[derive(Debug)]
pub struct ChannelMultiplexer {
    channels: Vec<Arc<Channel>>,
}

impl ChannelMultiplexer {
    pub fn new(specs: Vec<ChannelSpec>) -> Self {
        Self {
            channels: specs.into_iter().map(|spec| Arc::new(Channel::new(spec))).collect(),
        }
    }

    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Bind a TCP listener for every channel that does not have one yet,
    /// recording the actually bound address so OS-assigned ports become
    /// observable. Idempotent across reconnects.
    pub async fn listen(&self) -> TunnelResult<()> {
        for channel in &self.channels {
            let mut slot = channel.listener.lock().await;
            if slot.is_some() {
                continue;
            }
            let mut local = channel.local.lock().await;
            // A bind address without a port implies an OS-assigned one.
            let address = if local.has_port() {
                local.to_string()
            } else {
                format!("{}:0", local.host)
            };
            let listener =
                TcpListener::bind(&address)
                    .await
                    .map_err(|source| TunnelError::ListenFailed {
                        address: address.clone(),
                        source,
                    })?;
            let bound = listener
                .local_addr()
                .map_err(|source| TunnelError::ListenFailed { address, source })?;
            *local = Endpoint::new(bound.ip().to_string(), bound.port().to_string());
            *slot = Some(Arc::new(listener));
        }
        Ok(())
    }

    /// The current local endpoints, in channel order.
    pub async fn local_endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            endpoints.push(channel.local().await);
        }
        endpoints
    }
}

/// Accept loop for one channel. Signals `ready` exactly once on the first
/// pass, then serves until a failure is reported on `done`.
pub(crate) async fn run_accept_loop<S: Session>(
    channel: Arc<Channel>,
    sessions: SessionCell<S>,
    ready_tx: mpsc::Sender<()>,
    done_tx: mpsc::Sender<Option<TunnelError>>,
) {
    let Some(listener) = channel.listener().await else {
        let _ = done_tx.try_send(Some(TunnelError::channel(
            "channel has no listener; listen() must run before serving",
        )));
        return;
    };

    let local_endpoint = channel.local().await;
    info!(
        local = %local_endpoint,
        remote = %channel.remote(),
        "tunnel channel is waiting for connections"
    );
    let _ = ready_tx.send(()).await;
    drop(ready_tx);

    loop {
        if let Err(err) = forward_once(&listener, &channel, &sessions).await {
            let _ = done_tx.try_send(Some(err));
            return;
        }
    }
}

/// Accept one local connection, dial its remote counterpart on the current
/// session, and spawn the two copy tasks.
async fn forward_once<S: Session>(
    listener: &TcpListener,
    channel: &Channel,
    sessions: &SessionCell<S>,
) -> TunnelResult<()> {
    let (local_stream, peer) = listener
        .accept()
        .await
        .map_err(|err| TunnelError::channel(format!("error while establishing local connection: {err}")))?;

    debug!(peer = %peer, remote = %channel.remote(), "local connection established");

    let session = current_session(sessions).await?;
    let remote_stream = session
        .open_stream(channel.remote())
        .await
        .map_err(|err| TunnelError::channel(format!("remote dial error: {err}")))?;
    local_stream.set_nodelay(true).ok();

    spawn_copy_tasks(local_stream, remote_stream);

    let local_endpoint = channel.local().await;
    debug!(
        local = %local_endpoint,
        remote = %channel.remote(),
        "tunnel channel has been established"
    );
    Ok(())
}

/// Read the current session, waiting out a reconnection window if one is
/// in progress. Fails once the supervisor has gone away for good.
async fn current_session<S: Session>(sessions: &SessionCell<S>) -> TunnelResult<Arc<S>> {
    let mut sessions = sessions.clone();
    loop {
        if let Some(session) = sessions.borrow().clone() {
            return Ok(session);
        }
        if sessions.changed().await.is_err() {
            return Err(TunnelError::channel(
                "tunnel channel can't be established: missing connection to the ssh server",
            ));
        }
    }
}

/// Two independent copy tasks so half-close propagates per direction.
fn spawn_copy_tasks(local: TcpStream, remote: crate::transport::SessionStream) {
    let (mut local_read, mut local_write) = local.into_split();
    let (mut remote_read, mut remote_write) = split(remote);

    tokio::spawn(async move {
        if let Err(err) = copy(&mut local_read, &mut remote_write).await {
            warn!(error = %err, "local to remote copy ended with error");
        }
        let _ = remote_write.shutdown().await;
    });
    tokio::spawn(async move {
        if let Err(err) = copy(&mut remote_read, &mut local_write).await {
            warn!(error = %err, "remote to local copy ended with error");
        }
        let _ = local_write.shutdown().await;
    });
}

/// Normalise the given local and remote address lists into forwarding
/// pairs.
///
/// With both lists empty the pair comes from the server's `LocalForward`
/// stanza. Extra locals are truncated; missing or empty locals become
/// loopback binds with OS-assigned ports. Every address is canonicalised,
/// and every remote must carry a port.
pub fn build_channels(
    server_name: &str,
    local: Vec<String>,
    remote: Vec<String>,
    ssh_config: &SshConfig,
) -> TunnelResult<Vec<ChannelSpec>> {
    let (mut local, remote) = if local.is_empty() && remote.is_empty() {
        let forward = ssh_config.get(server_name).local_forward.ok_or_else(|| {
            TunnelError::LocalForwardMissing {
                host: server_name.to_string(),
            }
        })?;
        (vec![forward.local], vec![forward.remote])
    } else if local.len() > remote.len() {
        if remote.is_empty() {
            return Err(TunnelError::NoRemoteGiven);
        }
        (local[..remote.len()].to_vec(), remote)
    } else if local.len() < remote.len() {
        let mut padded = Vec::with_capacity(remote.len());
        for index in 0..remote.len() {
            match local.get(index) {
                Some(address) if !address.is_empty() => padded.push(address.clone()),
                _ => padded.push(RANDOM_PORT_ADDRESS.to_string()),
            }
        }
        (padded, remote)
    } else {
        (local, remote)
    };

    for address in &mut local {
        *address = expand_address(address);
    }

    let mut channels = Vec::with_capacity(remote.len());
    for (index, remote_address) in remote.iter().enumerate() {
        let remote_address = expand_address(remote_address);
        let remote = Endpoint::parse(&remote_address);
        if !remote.has_port() {
            return Err(TunnelError::MissingRemotePort {
                address: remote_address,
            });
        }
        channels.push(ChannelSpec::new(Endpoint::parse(&local[index]), remote));
    }

    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn pairs_equal_length_lists_index_wise() {
        let channels = build_channels(
            "server",
            addresses(&["127.0.0.1:8080", ":9090"]),
            addresses(&["a:1", "b:2"]),
            &SshConfig::empty(),
        )
        .unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].local.to_string(), "127.0.0.1:8080");
        assert_eq!(channels[1].local.to_string(), "127.0.0.1:9090");
        assert_eq!(channels[1].remote.to_string(), "b:2");
    }

    #[test]
    fn empty_local_list_gets_random_ports() {
        let channels = build_channels(
            "server",
            Vec::new(),
            addresses(&["a:1", "b:2", "c:3"]),
            &SshConfig::empty(),
        )
        .unwrap();
        assert_eq!(channels.len(), 3);
        for (channel, remote) in channels.iter().zip(["a:1", "b:2", "c:3"]) {
            assert_eq!(channel.local.to_string(), "127.0.0.1:0");
            assert_eq!(channel.remote.to_string(), remote);
        }
    }

    #[test]
    fn partial_local_list_is_padded() {
        let channels = build_channels(
            "server",
            addresses(&["x:1", ""]),
            addresses(&["a:9", "b:9", "c:9"]),
            &SshConfig::empty(),
        )
        .unwrap();
        let locals: Vec<String> = channels.iter().map(|c| c.local.to_string()).collect();
        assert_eq!(locals, vec!["x:1", "127.0.0.1:0", "127.0.0.1:0"]);
    }

    #[test]
    fn extra_locals_are_truncated() {
        let channels = build_channels(
            "server",
            addresses(&["x:1", "y:2", "z:3"]),
            addresses(&["a:9"]),
            &SshConfig::empty(),
        )
        .unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].local.to_string(), "x:1");
    }

    #[test]
    fn locals_without_remotes_are_rejected() {
        let err = build_channels(
            "server",
            addresses(&["x:1", "y:2"]),
            Vec::new(),
            &SshConfig::empty(),
        )
        .unwrap_err();
        assert!(matches!(err, TunnelError::NoRemoteGiven));
    }

    #[test]
    fn falls_back_to_the_local_forward_stanza() {
        let config =
            SshConfig::parse("Host server\n  LocalForward 5432 db.internal:5432\n").unwrap();
        let channels = build_channels("server", Vec::new(), Vec::new(), &config).unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].local.to_string(), "127.0.0.1:5432");
        assert_eq!(channels[0].remote.to_string(), "db.internal:5432");
    }

    #[test]
    fn missing_local_forward_is_an_error() {
        let err =
            build_channels("server", Vec::new(), Vec::new(), &SshConfig::empty()).unwrap_err();
        assert!(matches!(err, TunnelError::LocalForwardMissing { .. }));
    }

    #[test]
    fn remote_without_port_is_rejected() {
        let err = build_channels(
            "server",
            addresses(&[":8080"]),
            addresses(&["remotehost"]),
            &SshConfig::empty(),
        )
        .unwrap_err();
        assert!(matches!(err, TunnelError::MissingRemotePort { .. }));
    }

    #[test]
    fn addresses_are_canonicalised() {
        let channels = build_channels(
            "server",
            addresses(&[":8080"]),
            addresses(&[":443"]),
            &SshConfig::empty(),
        )
        .unwrap();
        assert_eq!(channels[0].local.to_string(), "127.0.0.1:8080");
        assert_eq!(channels[0].remote.to_string(), "127.0.0.1:443");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn listen_binds_once_and_reports_assigned_ports() {
        let specs = build_channels(
            "server",
            Vec::new(),
            addresses(&["a:1", "b:2"]),
            &SshConfig::empty(),
        )
        .unwrap();
        let multiplexer = ChannelMultiplexer::new(specs);
        multiplexer.listen().await.unwrap();

        let first = multiplexer.local_endpoints().await;
        assert_eq!(first.len(), 2);
        for endpoint in &first {
            assert_ne!(endpoint.port, "0");
        }
        assert_ne!(first[0].port, first[1].port);

        // A second listen pass keeps the existing listeners and addresses.
        multiplexer.listen().await.unwrap();
        assert_eq!(multiplexer.local_endpoints().await, first);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn portless_local_bind_gets_an_assigned_port() {
        let specs = vec![ChannelSpec::new(
            Endpoint::parse("127.0.0.1"),
            Endpoint::parse("a:1"),
        )];
        let multiplexer = ChannelMultiplexer::new(specs);
        multiplexer.listen().await.unwrap();
        let endpoint = multiplexer.local_endpoints().await.remove(0);
        assert!(endpoint.has_port());
        assert_ne!(endpoint.port, "0");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn listen_reports_bind_failures() {
        let specs = vec![ChannelSpec::new(
            Endpoint::parse("255.255.255.255:1"),
            Endpoint::parse("a:1"),
        )];
        let multiplexer = ChannelMultiplexer::new(specs);
        let err = multiplexer.listen().await.unwrap_err();
        assert!(matches!(err, TunnelError::ListenFailed { .. }));
    }
}
