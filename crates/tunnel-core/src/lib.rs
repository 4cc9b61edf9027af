//! Supervisory engine for resilient SSH tunnels.
//!
//! The crate wires four pieces together: a reconciler that fuses CLI
//! arguments with ssh-config stanzas into a [`ServerIdentity`], a channel
//! multiplexer that pairs local listeners with remote targets, a
//! supervisor that keeps one SSH session alive across disconnects, and an
//! alias expander that turns a saved record into all of the above.
//!
//! The SSH wire protocol itself is consumed through the [`Transport`] and
//! [`Session`] seams, with a russh-backed implementation in
//! [`transport::RusshTransport`].

pub mod alias;
pub mod channel;
pub mod config;
pub mod error;
pub mod hostkeys;
pub mod keys;
pub mod server;
pub mod supervisor;
pub mod transport;

pub use alias::{ExpandedAlias, expand_alias};
pub use channel::{Channel, ChannelMultiplexer, build_channels};
pub use config::{ConfigHost, LocalForward, SshConfig};
pub use error::{TunnelError, TunnelResult};
pub use keys::{FileKeyProvider, SecretsProvider};
pub use server::{ServerIdentity, new_server, reconcile};
pub use supervisor::{Tunnel, TunnelHandle, new_tunnel};
pub use transport::{RusshTransport, Session, SessionStream, Transport};
