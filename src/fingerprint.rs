// Track fingerprint module
// Identifies "the same listen" across snapshots and restarts

use crate::snapshot::Snapshot;
use std::fmt;

const FIELD_SEPARATOR: char = '\u{1f}';

/// MD5 fingerprint over a track's identity fields, as lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a snapshot
    ///
    /// Only title, artist, album, album artist and source URL take part.
    /// Multi-valued artist fields are joined in their original order, and
    /// empty fields still contribute their (empty) slot.
    pub fn of(snapshot: &Snapshot) -> Self {
        Self::from_fields(&[
            snapshot.title.as_str(),
            snapshot.artist().as_str(),
            snapshot.album.as_str(),
            snapshot.album_artist().as_str(),
            snapshot.source_url.as_str(),
        ])
    }

    fn from_fields(fields: &[&str]) -> Self {
        let mut input = String::new();
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                input.push(FIELD_SEPARATOR);
            }
            input.push_str(field);
        }
        Self(format!("{:x}", md5::compute(input.as_bytes())))
    }

    /// Rebuild a fingerprint read back from storage
    pub fn from_stored(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(Self(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
