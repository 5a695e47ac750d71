// CLI commands for the message host

use crate::fmsg::config::HostConfig;
use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// Message host CLI
#[derive(Debug, Parser)]
#[command(name = "fmsgd")]
#[command(about = "Federated message host with challenge-verified delivery")]
pub struct FmsgCli {
    #[command(flatten)]
    pub host: HostArgs,

    #[command(subcommand)]
    pub command: FmsgCommand,
}

/// Host settings shared by every subcommand
#[derive(Debug, Args)]
pub struct HostArgs {
    /// JSON configuration file; flags and environment override its values
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Domain served by this host
    #[arg(long, env = "FMSG_DOMAIN", global = true)]
    pub domain: Option<String>,

    /// Root directory for bodies and mailboxes
    #[arg(long, env = "FMSG_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "FMSG_LISTEN_IP", global = true)]
    pub listen_ip: Option<IpAddr>,

    /// Port to listen on
    #[arg(long, env = "FMSG_PORT", global = true)]
    pub port: Option<u16>,

    /// Port dialled on remote hosts
    #[arg(long, env = "FMSG_REMOTE_PORT", global = true)]
    pub remote_port: Option<u16>,

    /// Send timeout in seconds
    #[arg(long, env = "FMSG_SEND_TIMEOUT", global = true)]
    pub send_timeout: Option<u64>,

    /// Receive timeout in seconds
    #[arg(long, env = "FMSG_RECEIVE_TIMEOUT", global = true)]
    pub receive_timeout: Option<u64>,

    /// Largest accepted body in bytes
    #[arg(long, global = true)]
    pub max_message_size: Option<u32>,

    /// Accept messages that ask to skip the challenge
    #[arg(long, global = true)]
    pub allow_skip_challenge: bool,
}

/// Message host subcommands
#[derive(Debug, Subcommand)]
pub enum FmsgCommand {
    /// Run the host until interrupted
    Serve,

    /// Send a message, answering challenges while it is in flight
    Send {
        /// Sender address, e.g. @alice@example.com
        #[arg(short, long)]
        from: String,

        /// Recipient address (repeatable)
        #[arg(short, long, required = true)]
        to: Vec<String>,

        /// Optional topic
        #[arg(long)]
        topic: Option<String>,

        /// MIME type of the body
        #[arg(long = "type", default_value = "text/plain;charset=utf-8")]
        mime_type: String,

        /// Mark the message important
        #[arg(long)]
        important: bool,

        /// Ask recipients not to reply
        #[arg(long)]
        no_reply: bool,

        /// Ask the receiver to skip the challenge
        #[arg(long)]
        no_challenge: bool,

        /// Port of the receiving hosts (default: remote port)
        #[arg(long)]
        to_port: Option<u16>,

        /// File holding the message body
        body: PathBuf,
    },
}

impl HostArgs {
    /// Build the host configuration: file (or defaults), then flags and environment
    pub fn to_config(&self) -> crate::fmsg::Result<HostConfig> {
        let mut config = match &self.config {
            Some(path) => HostConfig::load(path)?,
            None => HostConfig::default(),
        };

        if let Some(domain) = &self.domain {
            config.domain = domain.clone();
        }
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(ip) = self.listen_ip {
            config.listen_ip = ip;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(port) = self.remote_port {
            config.remote_port = port;
        }
        if let Some(secs) = self.send_timeout {
            config.send_timeout_ms = secs * 1000;
        }
        if let Some(secs) = self.receive_timeout {
            config.receive_timeout_ms = secs * 1000;
        }
        if let Some(size) = self.max_message_size {
            config.max_message_size = size;
        }
        if self.allow_skip_challenge {
            config.allow_skip_challenge = true;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_send() {
        let args = vec![
            "fmsgd",
            "--domain",
            "d1",
            "send",
            "--from",
            "@a@d1",
            "--to",
            "@b@d2",
            "--to",
            "@c@d3",
            "--important",
            "body.txt",
        ];

        let cli = FmsgCli::try_parse_from(args).unwrap();
        assert_eq!(cli.host.domain.as_deref(), Some("d1"));
        match cli.command {
            FmsgCommand::Send {
                from,
                to,
                important,
                mime_type,
                body,
                ..
            } => {
                assert_eq!(from, "@a@d1");
                assert_eq!(to, vec!["@b@d2", "@c@d3"]);
                assert!(important);
                assert_eq!(mime_type, "text/plain;charset=utf-8");
                assert_eq!(body, PathBuf::from("body.txt"));
            }
            _ => panic!("Wrong command parsed"),
        }
    }

    #[test]
    fn test_send_requires_recipient() {
        let args = vec!["fmsgd", "send", "--from", "@a@d1", "body.txt"];
        assert!(FmsgCli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = vec![
            "fmsgd",
            "serve",
            "--domain",
            "example.com",
            "--port",
            "4000",
            "--receive-timeout",
            "5",
            "--allow-skip-challenge",
        ];

        let cli = FmsgCli::try_parse_from(args).unwrap();
        let config = cli.host.to_config().unwrap();
        assert_eq!(config.domain, "example.com");
        assert_eq!(config.port, 4000);
        assert_eq!(config.receive_timeout_ms, 5000);
        assert!(config.allow_skip_challenge);
    }

    #[test]
    fn test_invalid_domain_rejected() {
        let args = vec!["fmsgd", "serve", "--domain", "bad domain"];
        let cli = FmsgCli::try_parse_from(args).unwrap();
        assert!(cli.host.to_config().is_err());
    }
}
