// Two-segment message addresses of the form @user@domain

use crate::fmsg::error::{FmsgError, Result};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// A message address, rendered as `@user@domain`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    user: String,
    domain: String,
}

impl Address {
    /// Build from parts, checking the domain is a syntactically valid hostname
    pub fn new(user: impl Into<String>, domain: impl Into<String>) -> Result<Self> {
        let domain = domain.into();
        if !is_valid_hostname(&domain) {
            return Err(FmsgError::InvalidAddress(format!(
                "invalid DNS name: {:?}",
                domain
            )));
        }

        Ok(Self {
            user: user.into(),
            domain,
        })
    }

    /// Parse `@user@domain`. No DNS resolution is attempted.
    pub fn parse(text: &str) -> Result<Self> {
        let rest = text
            .strip_prefix('@')
            .ok_or_else(|| FmsgError::InvalidAddress(format!("missing leading @: {:?}", text)))?;

        let (user, domain) = rest
            .split_once('@')
            .ok_or_else(|| FmsgError::InvalidAddress(format!("missing second @: {:?}", text)))?;

        Self::new(user, domain)
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Case-insensitive domain comparison
    pub fn is_at(&self, domain: &str) -> bool {
        self.domain.eq_ignore_ascii_case(domain)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}@{}", self.user, self.domain)
    }
}

impl FromStr for Address {
    type Err = FmsgError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Hostname syntax check: an IP literal, or dot-separated labels of
/// ASCII letters, digits and inner hyphens.
pub fn is_valid_hostname(name: &str) -> bool {
    if name.parse::<IpAddr>().is_ok() {
        return true;
    }

    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > MAX_HOSTNAME_LEN {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}
