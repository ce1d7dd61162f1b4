//! Magnet link parsing
//!
//! Only the parts the streamer needs are extracted: the content identifier
//! from the `xt` topic, the advisory `dn` display name and the `tr` trackers.

use std::fmt;
use std::str::FromStr;

use data_encoding::BASE32;
use url::Url;

const BTIH_PREFIX: &str = "urn:btih:";

/// SHA-1 hash identifying one shareable content item.
///
/// 20-byte hash of the info dictionary. Used as the unique key for sessions
/// and rendered as lowercase hex everywhere it leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parses a 40 character hex string.
    ///
    /// # Errors
    /// - `MagnetError::InvalidInfoHash` - Wrong length or non-hex characters
    pub fn from_hex(value: &str) -> Result<Self, MagnetError> {
        let mut hash = [0u8; 20];
        hex::decode_to_slice(value, &mut hash).map_err(|_| MagnetError::InvalidInfoHash {
            value: value.to_string(),
        })?;
        Ok(Self(hash))
    }

    /// Parses the 32 character base32 form some clients still emit.
    ///
    /// # Errors
    /// - `MagnetError::InvalidInfoHash` - Wrong length or characters outside the alphabet
    pub fn from_base32(value: &str) -> Result<Self, MagnetError> {
        let invalid = || MagnetError::InvalidInfoHash {
            value: value.to_string(),
        };

        let decoded = BASE32
            .decode(value.to_ascii_uppercase().as_bytes())
            .map_err(|_| invalid())?;
        let hash: [u8; 20] = decoded.try_into().map_err(|_| invalid())?;

        Ok(Self(hash))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for InfoHash {
    type Err = MagnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.len() {
            40 => Self::from_hex(s),
            32 => Self::from_base32(s),
            _ => Err(MagnetError::InvalidInfoHash {
                value: s.to_string(),
            }),
        }
    }
}

/// Errors raised while decoding a magnet link.
#[derive(Debug, thiserror::Error)]
pub enum MagnetError {
    #[error("Invalid magnet link: {reason}")]
    InvalidLink { reason: String },

    #[error("Magnet link has no btih exact topic")]
    MissingInfoHash,

    #[error("Invalid info hash: {value}")]
    InvalidInfoHash { value: String },
}

/// Decoded magnet link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    /// Content identifier from the `xt=urn:btih:` topic
    pub info_hash: InfoHash,
    /// Advisory display name from `dn`
    pub display_name: Option<String>,
    /// Tracker URLs from `tr`, in link order
    pub trackers: Vec<String>,
    /// The link exactly as supplied, handed to the retrieval engine
    pub uri: String,
}

impl MagnetLink {
    /// Parses a `magnet:?xt=urn:btih:...` link.
    ///
    /// Query values are percent- and plus-decoded. When several `xt` topics
    /// are present the first btih topic wins.
    ///
    /// # Errors
    /// - `MagnetError::InvalidLink` - Not a URL or not the magnet scheme
    /// - `MagnetError::MissingInfoHash` - No btih exact topic
    /// - `MagnetError::InvalidInfoHash` - Topic hash is malformed
    pub fn parse(link: &str) -> Result<Self, MagnetError> {
        let url = Url::parse(link.trim()).map_err(|e| MagnetError::InvalidLink {
            reason: e.to_string(),
        })?;

        if url.scheme() != "magnet" {
            return Err(MagnetError::InvalidLink {
                reason: format!("unexpected scheme '{}'", url.scheme()),
            });
        }

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" if info_hash.is_none() => {
                    if let Some(hash) = value.strip_prefix(BTIH_PREFIX) {
                        info_hash = Some(hash.parse::<InfoHash>()?);
                    }
                }
                "dn" if display_name.is_none() && !value.trim().is_empty() => {
                    display_name = Some(value.into_owned());
                }
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }

        Ok(Self {
            info_hash: info_hash.ok_or(MagnetError::MissingInfoHash)?,
            display_name,
            trackers,
            uri: link.trim().to_string(),
        })
    }

    /// Display name, falling back to the hex identifier.
    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.info_hash.to_string())
    }
}

impl FromStr for MagnetLink {
    type Err = MagnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
