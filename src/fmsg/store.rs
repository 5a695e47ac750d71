// On-disk persistence: outgoing bodies and recipient mailboxes
//
// Layout under the data directory:
//   <timestamp>.<ext>          outgoing bodies
//   <user>/<timestamp>.<ext>   delivered mail
//   tmp/                       bodies being received

use crate::fmsg::address::Address;
use crate::fmsg::code::RejectAcceptCode;
use crate::fmsg::config::HostConfig;
use crate::fmsg::error::{FmsgError, Result};
use crate::fmsg::hash::MessageHash;
use crate::fmsg::io::copy_exact;
use crate::fmsg::message::Message;
use crate::fmsg::mime;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Filesystem store rooted at the configured data directory
#[derive(Debug, Clone)]
pub struct Store {
    data_dir: PathBuf,
    incoming_dir: PathBuf,
    receive_timeout: Duration,
    create_mailboxes: bool,
}

impl Store {
    pub fn new(config: &HostConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            incoming_dir: config.incoming_dir(),
            receive_timeout: config.receive_timeout(),
            create_mailboxes: config.create_mailboxes,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding `user`'s delivered mail
    pub fn mailbox(&self, user: &str) -> PathBuf {
        self.data_dir.join(user)
    }

    /// File name a message body is stored under
    pub fn file_name(message: &Message) -> String {
        format!(
            "{}.{}",
            message.timestamp(),
            mime::extension_for(message.mime_type())
        )
    }

    /// Write an outgoing body and point the message at it.
    ///
    /// Assigns the current UTC time if the message has no timestamp yet.
    /// An existing file at the derived path is never overwritten.
    pub async fn store_outgoing(&self, message: &mut Message, bytes: &[u8]) -> Result<PathBuf> {
        if message.mime_type().is_empty() {
            return Err(FmsgError::invalid_message("type is required"));
        }
        if message.timestamp() < 1 {
            message.set_timestamp(chrono::Utc::now().timestamp());
        }

        fs::create_dir_all(&self.data_dir).await?;
        let path = self.data_dir.join(Self::file_name(message));

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        let mime_type = message.mime_type().to_string();
        message.set_body(mime_type, &path)?;

        tracing::debug!("Stored outgoing body at {}", path.display());
        Ok(path)
    }

    /// Receive a body of `size` bytes and deliver it to `recipients`.
    ///
    /// The body is streamed into a private temporary file that is removed on
    /// every exit path. When `expected` is given the body must hash to it,
    /// otherwise `HashMismatch` is returned and nothing is delivered. Each
    /// recipient gets its own outcome code.
    pub async fn store_incoming<R>(
        &self,
        message: &Message,
        recipients: &[Address],
        stream: &mut R,
        size: u32,
        expected: Option<&MessageHash>,
    ) -> Result<Vec<RejectAcceptCode>>
    where
        R: AsyncRead + Unpin,
    {
        fs::create_dir_all(&self.incoming_dir).await?;
        let incoming_dir = self.incoming_dir.clone();
        let temp = tokio::task::spawn_blocking(move || tempfile::NamedTempFile::new_in(incoming_dir))
            .await
            .map_err(|e| FmsgError::Io(std::io::Error::new(ErrorKind::Other, e)))??;

        let mut file = File::from_std(temp.reopen()?);
        copy_exact(
            stream,
            &mut file,
            u64::from(size),
            self.receive_timeout,
            self.receive_timeout,
        )
        .await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = expected {
            let actual = MessageHash::of_file(temp.path()).await?;
            if actual != *expected {
                return Err(FmsgError::HashMismatch {
                    expected: *expected,
                    actual,
                });
            }
        }

        let file_name = Self::file_name(message);
        let mut codes = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let code = self.deliver(temp.path(), recipient, &file_name).await;
            tracing::info!("Delivery to {}: {}", recipient, code);
            codes.push(code);
        }

        Ok(codes)
    }

    async fn deliver(&self, source: &Path, recipient: &Address, file_name: &str) -> RejectAcceptCode {
        let user = recipient.user();
        if !is_safe_component(user) {
            tracing::warn!("Refusing mailbox name for {}", recipient);
            return RejectAcceptCode::UserUnknown;
        }

        let mailbox = self.mailbox(user);
        if mailbox == self.incoming_dir {
            return RejectAcceptCode::UserUnknown;
        }
        if self.create_mailboxes {
            if let Err(e) = fs::create_dir_all(&mailbox).await {
                tracing::warn!("Failed to create mailbox {}: {}", mailbox.display(), e);
                return RejectAcceptCode::InsufficientResources;
            }
        } else if !fs::metadata(&mailbox).await.map(|m| m.is_dir()).unwrap_or(false) {
            return RejectAcceptCode::UserUnknown;
        }

        let dest = mailbox.join(file_name);
        match copy_no_clobber(source, &dest).await {
            Ok(()) => RejectAcceptCode::Accept,
            // Answered with a per-user code so a lone recipient is not
            // read as a rejection of the whole message
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::warn!("{} already exists, not overwriting", dest.display());
                RejectAcceptCode::UserFull
            }
            Err(e) => {
                tracing::warn!("Failed to deliver to {}: {}", dest.display(), e);
                RejectAcceptCode::InsufficientResources
            }
        }
    }
}

/// Copy `source` to a new file at `dest`, failing if `dest` exists
async fn copy_no_clobber(source: &Path, dest: &Path) -> std::io::Result<()> {
    let mut out = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .await?;

    let result = async {
        let mut input = File::open(source).await?;
        tokio::io::copy(&mut input, &mut out).await?;
        out.flush().await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(dest).await;
    }
    result
}

fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
