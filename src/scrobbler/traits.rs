// Common types for scrobbling services

use crate::snapshot::Snapshot;

/// A completed listen, built at the moment the engine decides to scrobble
#[derive(Debug, Clone, PartialEq)]
pub struct ScrobbleRequest {
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub album_artists: Option<Vec<String>>,
    /// How long the track was listened to, in seconds
    pub duration: Option<f64>,
    /// Full track length in seconds
    pub length: Option<f64>,
    /// Unix timestamp of the listen
    pub timestamp: Option<i64>,
}

impl ScrobbleRequest {
    /// Build a request from the snapshot that crossed the threshold
    pub fn from_snapshot(snapshot: &Snapshot, timestamp: i64) -> Self {
        let album = Some(snapshot.album.clone()).filter(|a| !a.is_empty());
        let album_artists = Some(snapshot.album_artists.clone()).filter(|a| !a.is_empty());

        Self {
            title: snapshot.title.clone(),
            artists: snapshot.artists.clone(),
            album,
            album_artists,
            duration: Some(snapshot.position_seconds),
            length: Some(snapshot.length_seconds),
            timestamp: Some(timestamp),
        }
    }
}

/// Acknowledgement returned by the service
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    Json(serde_json::Value),
    Text(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ScrobbleError {
    /// Network failure or timeout
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: attohttpc::Error,
    },

    /// The service answered with a non-success status
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    /// The response body could not be decoded
    #[error("invalid response from {endpoint}: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },
}

/// A remote service that accepts completed listens
///
/// Calls are synchronous; the caller blocks on the result and never issues
/// concurrent submissions.
pub trait ScrobbleClient {
    fn submit(&self, request: &ScrobbleRequest) -> Result<Ack, ScrobbleError>;
}
