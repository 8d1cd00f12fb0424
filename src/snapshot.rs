// Snapshot module
// Point-in-time observation of a media player

use std::fmt;

/// Separator used when a multi-valued artist field is rendered as one string
pub const ARTIST_SEPARATOR: &str = ", ";

/// Playback status as reported by the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
    #[default]
    Unknown,
}

impl PlaybackStatus {
    /// Parse the MPRIS `PlaybackStatus` property value
    pub fn from_mpris(value: &str) -> Self {
        match value {
            "Playing" => Self::Playing,
            "Paused" => Self::Paused,
            "Stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// An artist field as delivered by the player, either a single string or a list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtistField {
    One(String),
    Many(Vec<String>),
}

impl ArtistField {
    /// Normalize into list form, preserving order
    pub fn into_list(self) -> Vec<String> {
        match self {
            Self::One(artist) if artist.is_empty() => Vec::new(),
            Self::One(artist) => vec![artist],
            Self::Many(artists) => artists,
        }
    }
}

/// Join an artist list into its display string
pub fn join_artists(artists: &[String]) -> String {
    artists.join(ARTIST_SEPARATOR)
}

/// One observation of the player state
///
/// Snapshots are built whole by the player bridge and never mutated
/// afterwards; a new observation always produces a new value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub track_id: Option<String>,
    pub title: String,
    pub artists: Vec<String>,
    pub album: String,
    pub album_artists: Vec<String>,
    pub track_number: i32,
    pub source_url: String,
    pub length_seconds: f64,
    pub position_seconds: f64,
    pub status: PlaybackStatus,
}

impl Snapshot {
    /// Artists joined into one display string
    pub fn artist(&self) -> String {
        join_artists(&self.artists)
    }

    /// Album artists joined into one display string
    pub fn album_artist(&self) -> String {
        join_artists(&self.album_artists)
    }

    /// Whether the track length is usable for a completion percentage
    pub fn has_length(&self) -> bool {
        self.length_seconds.is_finite() && self.length_seconds > 0.0
    }

    /// Elapsed position as a percentage of the track length
    ///
    /// Returns `None` when the length is unknown (zero), since no completion
    /// percentage can be computed for such a source.
    pub fn play_percentage(&self) -> Option<f64> {
        if !self.has_length() {
            return None;
        }
        Some(self.position_seconds / self.length_seconds * 100.0)
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    /// Track length rendered as `mm:ss`
    pub fn format_length(&self) -> String {
        format_clock(self.length_seconds)
    }

    /// Play position rendered as `mm:ss`
    pub fn format_position(&self) -> String {
        format_clock(self.position_seconds)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Track ID: {}", self.track_id.as_deref().unwrap_or("-"))?;
        writeln!(f, "Title: {}", self.title)?;
        writeln!(f, "Artist: {}", self.artist())?;
        writeln!(f, "Album: {}", self.album)?;
        writeln!(f, "Album Artist: {}", self.album_artist())?;
        writeln!(f, "Track Number: {}", self.track_number)?;
        writeln!(f, "Length: {} {}", self.length_seconds, self.format_length())?;
        writeln!(f, "URL: {}", self.source_url)?;
        writeln!(
            f,
            "Play Position: {} {}",
            self.position_seconds,
            self.format_position()
        )?;
        match self.play_percentage() {
            Some(pct) => writeln!(f, "Play Percentage: {:.2}", pct)?,
            None => writeln!(f, "Play Percentage: n/a")?,
        }
        write!(f, "Status: {}", self.status)
    }
}

fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}
