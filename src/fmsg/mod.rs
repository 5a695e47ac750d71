// Federated message host
//
// Hosts exchange messages over direct TCP connections. Before accepting a
// body the receiving host dials back to the sender's domain and asks for
// the hash of the message, proving the sender controls that domain and
// holds the body it is sending.

pub mod address;
pub mod cli;
pub mod code;
pub mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod flags;
pub mod hash;
pub mod host;
pub mod io;
pub mod message;
pub mod mime;
pub mod outgoing;
pub mod resolver;
pub mod store;

pub use address::Address;
pub use cli::{FmsgCli, FmsgCommand};
pub use code::RejectAcceptCode;
pub use codec::{decode_header, encode_header, header_hash};
pub use commands::execute_command;
pub use config::HostConfig;
pub use error::{FmsgError, Result};
pub use flags::MessageFlags;
pub use hash::{HeaderHash, MessageHash};
pub use host::{DeliveryOutcome, DeliveryReport, Host};
pub use message::Message;
pub use outgoing::OutgoingRegistry;
pub use resolver::{DnsResolver, Resolver, StaticResolver};
pub use store::Store;
