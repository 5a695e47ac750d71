// Protocol engine: listener, send path, receive path and challenge
//
// Inbound connection states:
//   AwaitVersion -> ChallengeReply
//               -> Decode -> CheckRecipients -> CheckSize -> RejectTooBig
//                                                        -> Challenge -> StoreAndRespond
// Any protocol failure drops the connection without a response.

use crate::fmsg::address::Address;
use crate::fmsg::code::RejectAcceptCode;
use crate::fmsg::codec::{self, CHALLENGE_MARKER, MESSAGE_VERSION};
use crate::fmsg::config::HostConfig;
use crate::fmsg::error::{FmsgError, Result};
use crate::fmsg::hash::{HeaderHash, MessageHash, HASH_LEN};
use crate::fmsg::io::{copy_exact, read_up_to, timed};
use crate::fmsg::message::Message;
use crate::fmsg::outgoing::OutgoingRegistry;
use crate::fmsg::resolver::{DnsResolver, Resolver};
use crate::fmsg::store::Store;
use futures::future::join_all;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Result of attempting one destination domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// One code per recipient, in the order the recipients were listed
    Delivered(Vec<(Address, RejectAcceptCode)>),
    /// The remote host rejected every recipient at once
    Rejected(RejectAcceptCode),
    /// Connection, timeout or protocol failure; nothing was delivered
    Failed(String),
}

/// Per-domain report returned by `Host::send`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub domain: String,
    pub recipients: Vec<Address>,
    pub outcome: DeliveryOutcome,
}

impl DeliveryReport {
    /// Recipients the remote host accepted
    pub fn accepted(&self) -> Vec<&Address> {
        match &self.outcome {
            DeliveryOutcome::Delivered(codes) => codes
                .iter()
                .filter(|(_, code)| code.is_accept())
                .map(|(addr, _)| addr)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A message host serving one domain
pub struct Host {
    config: Arc<HostConfig>,
    store: Store,
    outgoing: OutgoingRegistry,
    resolver: Arc<dyn Resolver>,
    listening: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Host {
    /// Create a host resolving domains through the system DNS
    pub fn new(config: HostConfig) -> Result<Self> {
        Self::with_resolver(config, Arc::new(DnsResolver))
    }

    pub fn with_resolver(config: HostConfig, resolver: Arc<dyn Resolver>) -> Result<Self> {
        config.validate()?;
        let store = Store::new(&config);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            store,
            outgoing: OutgoingRegistry::new(),
            resolver,
            listening: AtomicBool::new(false),
            shutdown,
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn outgoing(&self) -> &OutgoingRegistry {
        &self.outgoing
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = SocketAddr::new(self.config.listen_ip, self.config.port);
        let listener = TcpListener::bind(addr).await?;
        Ok(listener)
    }

    /// Bind and serve until `stop` is called
    pub async fn listen(self: Arc<Self>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections until `stop` is called.
    ///
    /// Each connection runs in its own task; in-flight handlers are left to
    /// finish after the listener closes.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FmsgError::InvalidOperation("already listening".to_string()));
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        tracing::info!(
            "Listening on {} for {}",
            listener.local_addr()?,
            self.config.domain
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let host = Arc::clone(&self);
                            tokio::spawn(async move {
                                host.handle_connection(stream, peer).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.wait_for(|stopped| *stopped) => {
                    tracing::info!("Listener shutting down");
                    break;
                }
            }
        }

        drop(listener);
        self.shutdown.send_replace(false);
        self.listening.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Stop accepting connections and close the listening socket
    pub fn stop(&self) -> Result<()> {
        if !self.is_listening() {
            return Err(FmsgError::InvalidOperation(
                "cannot stop because not listening".to_string(),
            ));
        }
        self.shutdown.send_replace(true);
        Ok(())
    }

    /// Send a message to every recipient domain on `port`.
    ///
    /// The header is validated up front and nothing is sent if it fails,
    /// nor while a message with a byte-identical header is still in flight.
    /// Destinations are attempted concurrently and independently; the
    /// message stays answerable to challenges until all have finished.
    pub async fn send(&self, message: Arc<Message>, port: u16) -> Result<Vec<DeliveryReport>> {
        message.validate_header()?;
        let header = codec::encode_header(&message)?;
        let header_hash = HeaderHash::of(&header);

        let body_path = message
            .body_path()
            .ok_or_else(|| FmsgError::invalid_message("body is required"))?;
        let body_len = tokio::fs::metadata(body_path).await?.len();
        let body_size = u32::try_from(body_len).map_err(|_| {
            FmsgError::invalid_message(format!("body of {} bytes is too large", body_len))
        })?;

        let _entry = self.outgoing.register(header_hash, Arc::clone(&message))?;
        tracing::debug!("Registered outgoing {}", header_hash.short());

        let domains = message.destination_domains();
        let attempts = domains.iter().map(|domain| {
            self.send_to_domain(&message, domain, &header, body_size, port)
        });
        let reports = join_all(attempts).await;

        Ok(reports)
    }

    async fn send_to_domain(
        &self,
        message: &Message,
        domain: &str,
        header: &[u8],
        body_size: u32,
        port: u16,
    ) -> DeliveryReport {
        let recipients = message.recipients_at(domain);

        let outcome = match self
            .deliver_to_domain(message, domain, &recipients, header, body_size, port)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Failed to send to {}: {}", domain, e);
                DeliveryOutcome::Failed(e.to_string())
            }
        };

        DeliveryReport {
            domain: domain.to_string(),
            recipients,
            outcome,
        }
    }

    async fn deliver_to_domain(
        &self,
        message: &Message,
        domain: &str,
        recipients: &[Address],
        header: &[u8],
        body_size: u32,
        port: u16,
    ) -> Result<DeliveryOutcome> {
        let ips = self.resolver.resolve(domain).await?;
        let mut stream = self.connect_any(&ips, port).await?;
        let send_timeout = self.config.send_timeout();

        timed(send_timeout, "sending header", stream.write_all(header)).await?;
        timed(
            send_timeout,
            "sending body size",
            stream.write_u32_le(body_size),
        )
        .await?;

        let body_result = match message.body_path() {
            Some(path) => {
                let mut body = tokio::fs::File::open(path).await?;
                copy_exact(
                    &mut body,
                    &mut stream,
                    u64::from(body_size),
                    send_timeout,
                    send_timeout,
                )
                .await
                .map(|_| ())
            }
            None => Ok(()),
        };

        // A host rejecting before the body (TooBig, FutureTime, ...) closes
        // while we are still writing; its answer is already queued for us.
        let mut response = vec![0u8; recipients.len()];
        let read_result = read_up_to(&mut stream, &mut response, self.config.receive_timeout()).await;
        let _ = stream.shutdown().await;

        let count = match (body_result, read_result) {
            (Ok(()), read) => read?,
            (Err(e), Ok(count)) if count > 0 => {
                tracing::debug!("{} answered before the body was sent: {}", domain, e);
                count
            }
            (Err(e), _) => return Err(e),
        };

        Ok(interpret_response(domain, recipients, &response[..count]))
    }

    async fn connect_any(&self, ips: &[IpAddr], port: u16) -> Result<TcpStream> {
        let mut last_err = None;

        for ip in ips {
            let addr = SocketAddr::new(*ip, port);
            match timed(
                self.config.connect_timeout(),
                "connecting",
                TcpStream::connect(addr),
            )
            .await
            {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| FmsgError::protocol("no addresses to connect to")))
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream, peer: SocketAddr) {
        tracing::debug!("Connection from {}", peer);

        if let Err(e) = self.process_connection(&mut stream, peer).await {
            if e.is_protocol() {
                tracing::warn!("Dropped connection from {}: {}", peer, e);
            } else {
                tracing::error!("Connection from {} failed: {}", peer, e);
            }
        }

        let _ = stream.shutdown().await;
    }

    async fn process_connection(&self, stream: &mut TcpStream, peer: SocketAddr) -> Result<()> {
        let receive_timeout = self.config.receive_timeout();
        let send_timeout = self.config.send_timeout();

        let version = timed(receive_timeout, "reading version", stream.read_u8()).await?;

        if version == CHALLENGE_MARKER {
            return self.answer_challenge(stream, peer).await;
        }
        if version != MESSAGE_VERSION {
            return Err(FmsgError::decode(format!("unsupported version: {}", version)));
        }

        let mut message = match tokio::time::timeout(
            receive_timeout,
            codec::decode_after_version(stream),
        )
        .await
        {
            Ok(decoded) => decoded?,
            Err(_) => return Err(FmsgError::Timeout("reading header".to_string())),
        };
        message.set_remote_endpoint(peer);

        let size = timed(receive_timeout, "reading body size", stream.read_u32_le()).await?;
        message.set_body_len(u64::from(size));

        let recipients = message.recipients_at(&self.config.domain);
        if recipients.is_empty() {
            return Err(FmsgError::protocol(format!(
                "no recipients for {}",
                self.config.domain
            )));
        }

        tracing::info!(
            "Message from {} for {} recipient(s), {} bytes",
            message.from(),
            recipients.len(),
            size
        );

        if let Some(code) = self.precheck(&message, size) {
            tracing::info!("Rejecting message from {}: {}", message.from(), code);
            return respond(stream, &[code], send_timeout).await;
        }

        let expected = if message.is_no_challenge() {
            if !self.config.allow_skip_challenge {
                return Err(FmsgError::protocol(format!(
                    "{} asked to skip the challenge",
                    message.from()
                )));
            }
            None
        } else {
            Some(self.challenge(&message).await?)
        };

        let codes = self
            .store
            .store_incoming(&message, &recipients, stream, size, expected.as_ref())
            .await?;

        respond(stream, &codes, send_timeout).await
    }

    /// Size and timestamp checks that reject before the body is read
    fn precheck(&self, message: &Message, size: u32) -> Option<RejectAcceptCode> {
        if size > self.config.max_message_size {
            return Some(RejectAcceptCode::TooBig);
        }

        let now = chrono::Utc::now().timestamp();
        if message.timestamp() > now.saturating_add(self.config.max_future_skew_secs) {
            return Some(RejectAcceptCode::FutureTime);
        }
        if let Some(max_age) = self.config.max_message_age_secs {
            if message.timestamp() < now.saturating_sub(max_age) {
                return Some(RejectAcceptCode::PastTime);
            }
        }

        None
    }

    /// Reply to a challenge for one of our outgoing messages
    async fn answer_challenge(&self, stream: &mut TcpStream, peer: SocketAddr) -> Result<()> {
        let mut bytes = [0u8; HASH_LEN];
        timed(
            self.config.receive_timeout(),
            "reading challenge",
            stream.read_exact(&mut bytes),
        )
        .await?;
        let header_hash = HeaderHash::from_bytes(bytes);

        let message = self.outgoing.get(&header_hash).ok_or_else(|| {
            FmsgError::protocol(format!(
                "unknown challenge {} from {}",
                header_hash.short(),
                peer
            ))
        })?;

        let message_hash = message.message_hash().await?;
        tracing::debug!(
            "Answering challenge {} from {} with {}",
            header_hash.short(),
            peer,
            message_hash.short()
        );

        timed(
            self.config.send_timeout(),
            "answering challenge",
            stream.write_all(message_hash.as_bytes()),
        )
        .await
    }

    /// Ask the claimed sender for the hash of the message it is sending.
    ///
    /// The sender's domain must resolve to the address the message came
    /// from, and the challenge is dialled to that domain's resolved
    /// addresses, never back over the inbound connection.
    async fn challenge(&self, message: &Message) -> Result<MessageHash> {
        let peer = message
            .remote_endpoint()
            .ok_or_else(|| FmsgError::protocol("message has no remote endpoint"))?;
        let peer_ip = peer.ip().to_canonical();
        let domain = message.from().domain();

        let resolved = self
            .resolver
            .resolve(domain)
            .await
            .map_err(|e| FmsgError::protocol(format!("resolving {}: {}", domain, e)))?;
        let resolved: Vec<IpAddr> = resolved.into_iter().map(|ip| ip.to_canonical()).collect();

        if !resolved.contains(&peer_ip) {
            return Err(FmsgError::protocol(format!(
                "from domain {} does not resolve to sender IP {}",
                domain, peer_ip
            )));
        }

        // Try the address the message arrived from first
        let mut dial_order = vec![peer_ip];
        dial_order.extend(resolved.into_iter().filter(|ip| *ip != peer_ip));

        let header_hash = codec::header_hash(message)?;
        tracing::debug!("Challenging {} for {}", domain, header_hash.short());

        let mut conn = self
            .connect_any(&dial_order, self.config.remote_port)
            .await
            .map_err(|e| FmsgError::protocol(format!("challenge connect to {}: {}", domain, e)))?;

        timed(
            self.config.send_timeout(),
            "sending challenge",
            conn.write_all(&codec::encode_challenge(&header_hash)),
        )
        .await
        .map_err(|e| FmsgError::protocol(format!("challenge to {}: {}", domain, e)))?;

        let mut reply = [0u8; HASH_LEN];
        timed(
            self.config.receive_timeout(),
            "reading challenge response",
            conn.read_exact(&mut reply),
        )
        .await
        .map_err(|e| FmsgError::protocol(format!("challenge response from {}: {}", domain, e)))?;
        let _ = conn.shutdown().await;

        Ok(MessageHash::from_bytes(reply))
    }
}

async fn respond(
    stream: &mut TcpStream,
    codes: &[RejectAcceptCode],
    limit: std::time::Duration,
) -> Result<()> {
    let bytes: Vec<u8> = codes.iter().map(|code| code.as_byte()).collect();
    timed(limit, "sending response", stream.write_all(&bytes)).await?;
    timed(limit, "flushing response", stream.flush()).await
}

/// Turn the raw response from a remote host into an outcome
pub fn interpret_response(
    domain: &str,
    recipients: &[Address],
    response: &[u8],
) -> DeliveryOutcome {
    if response.is_empty() {
        tracing::warn!("Failed to send to {}: connection closed without response", domain);
        return DeliveryOutcome::Failed("connection closed without response".to_string());
    }

    let codes: Vec<RejectAcceptCode> = response
        .iter()
        .map(|byte| {
            RejectAcceptCode::try_from(*byte).unwrap_or_else(|unknown| {
                tracing::warn!("Unknown response code {} from {}", unknown, domain);
                RejectAcceptCode::Undisclosed
            })
        })
        .collect();

    if codes.len() == 1 && codes[0].is_host_level() {
        tracing::warn!("Message rejected by {}: {}", domain, codes[0]);
        return DeliveryOutcome::Rejected(codes[0]);
    }

    if codes.len() != recipients.len() {
        tracing::warn!(
            "Received unexpected number of codes from {}, expected: {}, got: {}",
            domain,
            recipients.len(),
            codes.len()
        );
    }

    let results: Vec<(Address, RejectAcceptCode)> =
        recipients.iter().cloned().zip(codes).collect();
    for (addr, code) in &results {
        tracing::info!("{}\t{}", addr, code);
    }

    DeliveryOutcome::Delivered(results)
}
