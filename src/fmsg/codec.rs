// Binary header codec
//
// Header layout, all integers little-endian:
//   version(1) flags(1) [pid(32)] from(1+n) count(1) to(1+n)*count
//   timestamp(i64) topic(1+n, 0 = absent) type(1+n)
// The body size (u32) and body bytes follow the header on the wire but are
// not part of it and are not covered by the header hash.

use crate::fmsg::address::Address;
use crate::fmsg::error::{FmsgError, Result};
use crate::fmsg::flags::MessageFlags;
use crate::fmsg::hash::{HeaderHash, HASH_LEN};
use crate::fmsg::message::{Message, PID_LEN};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Version byte of a message header
pub const MESSAGE_VERSION: u8 = 1;

/// Version byte that marks a challenge connection
pub const CHALLENGE_MARKER: u8 = 255;

/// Wire length of a challenge request: marker byte + header hash
pub const CHALLENGE_LEN: usize = 1 + HASH_LEN;

/// Encode the message header exactly as it is sent.
///
/// Fails with `InvalidMessage` if the header does not validate.
pub fn encode_header(msg: &Message) -> Result<Vec<u8>> {
    msg.validate_header()?;

    if msg.to().len() > u8::MAX as usize {
        return Err(FmsgError::invalid_message(format!(
            "too many recipients: {}",
            msg.to().len()
        )));
    }

    let mut buf = Vec::with_capacity(128);
    buf.push(MESSAGE_VERSION);
    buf.push(msg.flags().bits());
    if let Some(pid) = msg.pid() {
        buf.extend_from_slice(pid);
    }
    put_prefixed(&mut buf, &msg.from().to_string(), "from")?;
    buf.push(msg.to().len() as u8);
    for addr in msg.to() {
        put_prefixed(&mut buf, &addr.to_string(), "recipient")?;
    }
    buf.extend_from_slice(&msg.timestamp().to_le_bytes());
    match msg.topic() {
        Some(topic) => put_prefixed(&mut buf, topic, "topic")?,
        None => buf.push(0),
    }
    put_prefixed(&mut buf, msg.mime_type(), "type")?;

    Ok(buf)
}

/// Encode the header and hash it
pub fn header_hash(msg: &Message) -> Result<HeaderHash> {
    Ok(HeaderHash::of(&encode_header(msg)?))
}

/// Build the payload of a challenge connection
pub fn encode_challenge(hash: &HeaderHash) -> [u8; CHALLENGE_LEN] {
    let mut buf = [0u8; CHALLENGE_LEN];
    buf[0] = CHALLENGE_MARKER;
    buf[1..].copy_from_slice(hash.as_bytes());
    buf
}

/// Decode a full header, version byte included
pub async fn decode_header<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let version = reader.read_u8().await.map_err(truncated)?;
    if version != MESSAGE_VERSION {
        return Err(FmsgError::decode(format!("unsupported version: {}", version)));
    }
    decode_after_version(reader).await
}

/// Decode the remainder of a header once the version byte has been consumed
pub async fn decode_after_version<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let flags = MessageFlags::from_bits_retain(reader.read_u8().await.map_err(truncated)?);

    let pid = if flags.has_pid() {
        let mut pid = [0u8; PID_LEN];
        reader.read_exact(&mut pid).await.map_err(truncated)?;
        Some(pid)
    } else {
        None
    };

    let from = read_address(reader).await?;

    let count = reader.read_u8().await.map_err(truncated)?;
    let mut to = Vec::with_capacity(count as usize);
    for _ in 0..count {
        to.push(read_address(reader).await?);
    }

    let timestamp = reader.read_i64_le().await.map_err(truncated)?;

    let topic = read_prefixed(reader).await?;
    let topic = if topic.is_empty() { None } else { Some(topic) };

    let mime_type = read_prefixed(reader).await?;
    if mime_type.is_empty() || !mime_type.is_ascii() {
        return Err(FmsgError::decode(format!("invalid type: {:?}", mime_type)));
    }

    Ok(Message::incoming(flags, pid, from, to, timestamp, topic, mime_type))
}

fn put_prefixed(buf: &mut Vec<u8>, value: &str, field: &str) -> Result<()> {
    let bytes = value.as_bytes();
    let len = u8::try_from(bytes.len()).map_err(|_| {
        FmsgError::invalid_message(format!("{} longer than 255 bytes", field))
    })?;
    buf.push(len);
    buf.extend_from_slice(bytes);
    Ok(())
}

async fn read_prefixed<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u8().await.map_err(truncated)? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await.map_err(truncated)?;
    String::from_utf8(bytes).map_err(|e| FmsgError::decode(format!("invalid UTF-8: {}", e)))
}

async fn read_address<R>(reader: &mut R) -> Result<Address>
where
    R: AsyncRead + Unpin,
{
    let text = read_prefixed(reader).await?;
    Address::parse(&text).map_err(|e| FmsgError::decode(e.to_string()))
}

fn truncated(err: std::io::Error) -> FmsgError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        FmsgError::decode("truncated header")
    } else {
        FmsgError::Io(err)
    }
}
