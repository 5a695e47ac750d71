//! fmsgd - federated store-and-forward message host
//!
//! This library provides the message codec, mailbox store and the host
//! that sends messages to other domains and verifies incoming messages by
//! challenging the sender's domain before accepting them.

pub mod fmsg;

pub use fmsg::{Address, FmsgError, Host, HostConfig, Message, RejectAcceptCode, Store};
