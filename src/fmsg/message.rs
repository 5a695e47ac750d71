// Message header model and body reference

use crate::fmsg::address::Address;
use crate::fmsg::error::{FmsgError, Result};
use crate::fmsg::flags::MessageFlags;
use crate::fmsg::hash::MessageHash;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

/// Length of the optional parent id
pub const PID_LEN: usize = 32;

/// Default MIME type used by `set_body_utf8`
pub const TEXT_UTF8: &str = "text/plain;charset=utf-8";

/// Whether the message was built locally or decoded off the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// The unit of transfer.
///
/// The body is never held in memory: outgoing messages reference a local
/// file, incoming ones are streamed straight from the socket to storage.
#[derive(Debug)]
pub struct Message {
    direction: Direction,
    flags: MessageFlags,
    pid: Option<[u8; PID_LEN]>,
    from: Address,
    to: Vec<Address>,
    timestamp: i64,
    topic: Option<String>,
    mime_type: String,
    body_path: Option<PathBuf>,
    body_len: Option<u64>,
    remote_endpoint: Option<SocketAddr>,
    message_hash: OnceCell<MessageHash>,
}

impl Message {
    /// Create an outgoing message
    pub fn new(from: Address, to: Vec<Address>) -> Self {
        Self {
            direction: Direction::Outgoing,
            flags: MessageFlags::empty(),
            pid: None,
            from,
            to,
            timestamp: 0,
            topic: None,
            mime_type: String::new(),
            body_path: None,
            body_len: None,
            remote_endpoint: None,
            message_hash: OnceCell::new(),
        }
    }

    /// Create an outgoing message from address strings
    pub fn parse(from: &str, to: &[&str]) -> Result<Self> {
        let from = Address::parse(from)?;
        let to = to
            .iter()
            .map(|addr| Address::parse(addr))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(from, to))
    }

    /// Assemble a message decoded from the wire
    pub(crate) fn incoming(
        flags: MessageFlags,
        pid: Option<[u8; PID_LEN]>,
        from: Address,
        to: Vec<Address>,
        timestamp: i64,
        topic: Option<String>,
        mime_type: String,
    ) -> Self {
        Self {
            direction: Direction::Incoming,
            flags,
            pid,
            from,
            to,
            timestamp,
            topic,
            mime_type,
            body_path: None,
            body_len: None,
            remote_endpoint: None,
            message_hash: OnceCell::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_incoming(&self) -> bool {
        self.direction == Direction::Incoming
    }

    /// Flags as they go on the wire, `HAS_PID` derived from the parent id
    pub fn flags(&self) -> MessageFlags {
        let mut flags = self.flags;
        flags.set(MessageFlags::HAS_PID, self.pid.is_some());
        flags
    }

    pub fn is_important(&self) -> bool {
        self.flags.is_important()
    }

    pub fn is_no_reply(&self) -> bool {
        self.flags.is_no_reply()
    }

    pub fn is_no_challenge(&self) -> bool {
        self.flags.is_no_challenge()
    }

    pub fn is_under_duress(&self) -> bool {
        self.flags.is_under_duress()
    }

    pub fn set_important(&mut self) {
        self.flags.insert(MessageFlags::IMPORTANT);
    }

    pub fn unset_important(&mut self) {
        self.flags.remove(MessageFlags::IMPORTANT);
    }

    pub fn set_no_reply(&mut self) {
        self.flags.insert(MessageFlags::NO_REPLY);
    }

    pub fn unset_no_reply(&mut self) {
        self.flags.remove(MessageFlags::NO_REPLY);
    }

    pub fn set_no_challenge(&mut self) {
        self.flags.insert(MessageFlags::NO_CHALLENGE);
    }

    pub fn unset_no_challenge(&mut self) {
        self.flags.remove(MessageFlags::NO_CHALLENGE);
    }

    pub fn set_under_duress(&mut self) {
        self.flags.insert(MessageFlags::UNDER_DURESS);
    }

    pub fn unset_under_duress(&mut self) {
        self.flags.remove(MessageFlags::UNDER_DURESS);
    }

    pub fn pid(&self) -> Option<&[u8; PID_LEN]> {
        self.pid.as_ref()
    }

    pub fn set_pid(&mut self, pid: Option<[u8; PID_LEN]>) {
        self.pid = pid;
    }

    pub fn from(&self) -> &Address {
        &self.from
    }

    pub fn to(&self) -> &[Address] {
        &self.to
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn set_topic(&mut self, topic: Option<String>) {
        self.topic = topic.filter(|t| !t.is_empty());
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Set the MIME type without touching the body reference
    pub fn set_mime_type(&mut self, mime_type: impl Into<String>) -> Result<()> {
        let mime_type = mime_type.into();
        validate_mime_type(&mime_type)?;
        self.mime_type = mime_type;
        Ok(())
    }

    /// Point the message at a body file on disk
    pub fn set_body(&mut self, mime_type: impl Into<String>, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let metadata = std::fs::metadata(&path).map_err(|e| {
            FmsgError::invalid_message(format!("body file {}: {}", path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(FmsgError::invalid_message(format!(
                "body {} is not a file",
                path.display()
            )));
        }

        self.set_mime_type(mime_type)?;
        self.body_len = Some(metadata.len());
        self.body_path = Some(path);
        self.message_hash = OnceCell::new();
        Ok(())
    }

    pub fn set_body_utf8(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.set_body(TEXT_UTF8, path)
    }

    pub fn body_path(&self) -> Option<&Path> {
        self.body_path.as_deref()
    }

    pub fn body_len(&self) -> Option<u64> {
        self.body_len
    }

    pub(crate) fn set_body_len(&mut self, len: u64) {
        self.body_len = Some(len);
    }

    pub fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.remote_endpoint
    }

    pub(crate) fn set_remote_endpoint(&mut self, endpoint: SocketAddr) {
        self.remote_endpoint = Some(endpoint);
    }

    /// Recipients at `domain`, in their original order
    pub fn recipients_at(&self, domain: &str) -> Vec<Address> {
        self.to.iter().filter(|r| r.is_at(domain)).cloned().collect()
    }

    /// Distinct recipient domains in first-seen order, compared case-insensitively
    pub fn destination_domains(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.to
            .iter()
            .filter(|r| seen.insert(r.domain().to_ascii_lowercase()))
            .map(|r| r.domain().to_string())
            .collect()
    }

    /// Check the header is complete before it can be encoded.
    ///
    /// Outgoing messages must also reference an existing body file.
    pub fn validate_header(&self) -> Result<()> {
        if self.mime_type.is_empty() {
            return Err(FmsgError::invalid_message("type is required"));
        }
        validate_mime_type(&self.mime_type)?;
        if self.to.is_empty() {
            return Err(FmsgError::invalid_message(
                "at least one recipient in to is required",
            ));
        }
        if self.timestamp < 1 {
            return Err(FmsgError::invalid_message("timestamp must be set"));
        }

        if self.direction == Direction::Outgoing {
            match &self.body_path {
                Some(path) if path.is_file() => {}
                Some(path) => {
                    return Err(FmsgError::invalid_message(format!(
                        "body file {} not found",
                        path.display()
                    )))
                }
                None => return Err(FmsgError::invalid_message("body is required")),
            }
        }

        Ok(())
    }

    /// SHA-256 of the body file, computed once and cached
    pub async fn message_hash(&self) -> Result<MessageHash> {
        let path = self
            .body_path
            .as_deref()
            .ok_or_else(|| FmsgError::InvalidOperation("message has no body file".to_string()))?;

        let hash = self
            .message_hash
            .get_or_try_init(|| MessageHash::of_file(path))
            .await?;
        Ok(*hash)
    }
}

fn validate_mime_type(mime_type: &str) -> Result<()> {
    if mime_type.is_empty() {
        return Err(FmsgError::invalid_message("type is required"));
    }
    if !mime_type.is_ascii() {
        return Err(FmsgError::invalid_message(format!(
            "type must be ASCII: {:?}",
            mime_type
        )));
    }
    if mime_type.len() > u8::MAX as usize {
        return Err(FmsgError::invalid_message(format!(
            "type longer than 255 bytes: {}",
            mime_type
        )));
    }
    Ok(())
}
