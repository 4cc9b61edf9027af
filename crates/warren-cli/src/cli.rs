use clap::{Args, Parser, Subcommand};

use warren_types::AliasRecord;

/// Tool to create ssh tunnels focused on resiliency.
#[derive(Debug, Parser)]
#[command(name = "warren", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a tunnel from the given flags, optionally seeded by an alias
    Start(StartArgs),
    /// Manage saved tunnel aliases
    Alias {
        #[command(subcommand)]
        command: AliasCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum AliasCommand {
    /// Save the given flags under a name
    Save {
        /// Name of the alias
        name: String,
        #[command(flatten)]
        args: StartArgs,
    },
    /// Delete a saved alias
    Remove {
        /// Name of the alias
        name: String,
    },
    /// List saved aliases
    List,
}

#[derive(Debug, Default, Args)]
pub struct StartArgs {
    /// Saved alias to load; explicitly given flags take precedence
    #[arg(long, value_name = "NAME")]
    pub alias: Option<String>,
    /// Set server address: [<user>@]<host>[:<port>]
    #[arg(short = 's', long, value_name = "ADDRESS")]
    pub server: Option<String>,
    /// Set source endpoint address: [<host>]:<port> (repeatable)
    #[arg(short = 'S', long = "source", value_name = "ADDRESS")]
    pub source: Vec<String>,
    /// Set destination endpoint address: [<host>]:<port> (repeatable)
    #[arg(short = 'd', long = "destination", value_name = "ADDRESS")]
    pub destination: Vec<String>,
    /// Set server authentication key file path
    #[arg(short = 'k', long, value_name = "PATH")]
    pub key: Option<String>,
    /// Increase log verbosity
    #[arg(short = 'v', long)]
    pub verbose: bool,
    /// Skip host key validation when connecting to the ssh server
    #[arg(short = 'i', long)]
    pub insecure: bool,
    /// Time interval for keep alive packets to be sent, in seconds
    #[arg(short = 'K', long = "keep-alive-interval", value_name = "SECONDS")]
    pub keep_alive_interval: Option<u64>,
    /// Maximum number of connection retries to the ssh server;
    /// provide 0 to never give up or a negative number to disable
    #[arg(short = 'R', long = "connection-retries", value_name = "COUNT", allow_hyphen_values = true)]
    pub connection_retries: Option<i32>,
    /// Time to wait before trying to reconnect to the ssh server, in seconds
    #[arg(short = 'w', long = "retry-wait", value_name = "SECONDS")]
    pub retry_wait: Option<u64>,
    /// SSH server connection timeout, in seconds
    #[arg(short = 't', long, value_name = "SECONDS")]
    pub timeout: Option<u64>,
    /// Set ssh config file path
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<String>,
}

impl StartArgs {
    /// Merge these flags over `base`: explicitly given values win, the
    /// record fills the rest.
    pub fn into_record(self, base: Option<AliasRecord>) -> AliasRecord {
        let mut record = base.unwrap_or_default();
        if let Some(server) = self.server {
            record.server = server;
        }
        if !self.source.is_empty() {
            record.source = self.source;
        }
        if !self.destination.is_empty() {
            record.destination = self.destination;
        }
        if let Some(key) = self.key {
            record.key = key;
        }
        if self.verbose {
            record.verbose = true;
        }
        if self.insecure {
            record.insecure = true;
        }
        if let Some(interval) = self.keep_alive_interval {
            record.keep_alive_interval = Some(interval);
        }
        if let Some(retries) = self.connection_retries {
            record.connection_retries = Some(retries);
        }
        if let Some(wait) = self.retry_wait {
            record.retry_wait = Some(wait);
        }
        if let Some(timeout) = self.timeout {
            record.timeout = Some(timeout);
        }
        if let Some(config) = self.config {
            record.config = config;
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> StartArgs {
        let mut argv = vec!["warren", "start"];
        argv.extend_from_slice(values);
        match Cli::parse_from(argv).command {
            Command::Start(args) => args,
            other => panic!("expected start command, got {other:?}"),
        }
    }

    #[test]
    fn parses_repeatable_endpoints() {
        let parsed = args(&[
            "-s", "alice@bastion:2222",
            "-S", ":8080",
            "-S", ":8081",
            "-d", "a:80",
            "-d", "b:80",
        ]);
        assert_eq!(parsed.server.as_deref(), Some("alice@bastion:2222"));
        assert_eq!(parsed.source, vec![":8080", ":8081"]);
        assert_eq!(parsed.destination, vec!["a:80", "b:80"]);
    }

    #[test]
    fn accepts_negative_connection_retries() {
        let parsed = args(&["-s", "h", "-R", "-1"]);
        assert_eq!(parsed.connection_retries, Some(-1));
    }

    #[test]
    fn explicit_flags_override_the_loaded_record() {
        let base = AliasRecord {
            server: "old@server".into(),
            source: vec![":1".into()],
            destination: vec!["x:1".into()],
            connection_retries: Some(5),
            ..AliasRecord::default()
        };
        let merged = args(&["-s", "new@server", "-d", "y:2"]).into_record(Some(base));
        assert_eq!(merged.server, "new@server");
        assert_eq!(merged.destination, vec!["y:2"]);
        // Untouched fields come from the record.
        assert_eq!(merged.source, vec![":1"]);
        assert_eq!(merged.connection_retries, Some(5));
    }

    #[test]
    fn flags_alone_build_a_record() {
        let record = args(&["-s", "alice@host", "-i", "-K", "15"]).into_record(None);
        assert_eq!(record.server, "alice@host");
        assert!(record.insecure);
        assert_eq!(record.keep_alive_interval, Some(15));
        assert_eq!(record.connection_retries, None);
    }
}
