// Player bridge module
// Reads MPRIS2 players over the D-Bus session bus

use crate::snapshot::{ArtistField, PlaybackStatus, Snapshot};
use crate::text_cleanup::TextCleaner;
use anyhow::{Context, Result};
use std::collections::HashMap;
use zbus::blocking::fdo::{DBusProxy, PropertiesProxy};
use zbus::blocking::Connection;
use zbus::names::InterfaceName;
use zbus::zvariant::{OwnedValue, Value};

pub const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";
const MPRIS_PATH: &str = "/org/mpris/MediaPlayer2";
const PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Source of player observations
pub trait PlayerBridge {
    /// Bus names of all available players
    fn list_players(&self) -> Result<Vec<String>>;

    /// Observe a player, `None` if it has no current track
    fn snapshot(&self, uri: &str) -> Result<Option<Snapshot>>;
}

/// Pick the configured player if present, otherwise the first one found
pub fn select_player(players: &[String], wanted: Option<&str>) -> Option<String> {
    match wanted {
        Some(uri) => players.iter().find(|p| p.as_str() == uri).cloned(),
        None => players.first().cloned(),
    }
}

/// Track metadata pulled out of the MPRIS `Metadata` dictionary
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackMetadata {
    pub track_id: Option<String>,
    pub title: String,
    pub artists: Option<ArtistField>,
    pub album: String,
    pub album_artists: Option<ArtistField>,
    pub track_number: i32,
    pub url: String,
    /// Length in microseconds
    pub length_micros: i64,
}

impl TrackMetadata {
    fn from_dict(dict: &HashMap<String, OwnedValue>) -> Self {
        let get = |key: &str| dict.get(key).map(|v| &**v);

        Self {
            track_id: get("mpris:trackid").and_then(value_to_string),
            title: get("xesam:title").and_then(value_to_string).unwrap_or_default(),
            artists: get("xesam:artist").and_then(value_to_artists),
            album: get("xesam:album").and_then(value_to_string).unwrap_or_default(),
            album_artists: get("xesam:albumArtist").and_then(value_to_artists),
            track_number: get("xesam:trackNumber")
                .and_then(value_to_i64)
                .and_then(|n| i32::try_from(n).ok())
                .unwrap_or(0),
            url: get("xesam:url").and_then(value_to_string).unwrap_or_default(),
            length_micros: get("mpris:length").and_then(value_to_i64).unwrap_or(0),
        }
    }

    /// Combine metadata with the live position and status into a snapshot
    pub fn into_snapshot(
        self,
        position_micros: i64,
        status: PlaybackStatus,
        cleaner: &TextCleaner,
    ) -> Snapshot {
        let artists = self.artists.map(ArtistField::into_list).unwrap_or_default();
        let album_artists = self
            .album_artists
            .map(ArtistField::into_list)
            .unwrap_or_default();

        Snapshot {
            track_id: self.track_id,
            title: cleaner.clean(&self.title),
            artists: cleaner.clean_list(artists),
            album: cleaner.clean(&self.album),
            album_artists: cleaner.clean_list(album_artists),
            track_number: self.track_number,
            source_url: self.url,
            length_seconds: self.length_micros as f64 / MICROS_PER_SECOND,
            position_seconds: position_micros as f64 / MICROS_PER_SECOND,
            status,
        }
    }

    fn is_empty(&self) -> bool {
        self.title.is_empty() && self.url.is_empty() && self.track_id.is_none()
    }
}

fn value_to_string(value: &Value<'_>) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.to_string()),
        Value::ObjectPath(p) => Some(p.to_string()),
        Value::Value(inner) => value_to_string(inner),
        _ => None,
    }
}

fn value_to_artists(value: &Value<'_>) -> Option<ArtistField> {
    match value {
        Value::Str(s) => Some(ArtistField::One(s.to_string())),
        Value::Array(items) => Some(ArtistField::Many(
            items.iter().filter_map(value_to_string).collect(),
        )),
        Value::Value(inner) => value_to_artists(inner),
        _ => None,
    }
}

fn value_to_i64(value: &Value<'_>) -> Option<i64> {
    match value {
        Value::I64(n) => Some(*n),
        Value::U64(n) => i64::try_from(*n).ok(),
        Value::I32(n) => Some(i64::from(*n)),
        Value::U32(n) => Some(i64::from(*n)),
        Value::F64(n) => Some(*n as i64),
        Value::Value(inner) => value_to_i64(inner),
        _ => None,
    }
}

/// MPRIS2 bridge on the session bus
pub struct MprisBridge {
    connection: Connection,
    cleaner: TextCleaner,
}

impl MprisBridge {
    pub fn connect(cleaner: TextCleaner) -> Result<Self> {
        let connection = Connection::session().context("Failed to connect to the D-Bus session bus")?;
        Ok(Self {
            connection,
            cleaner,
        })
    }

    /// Properties proxy for a player
    ///
    /// Properties are read through explicit `Get` calls; Position never
    /// appears in PropertiesChanged, so a property cache would freeze it.
    fn properties(&self, uri: &str) -> Result<PropertiesProxy<'static>> {
        let build = || -> zbus::Result<PropertiesProxy<'static>> {
            PropertiesProxy::builder(&self.connection)
                .destination(uri.to_string())?
                .path(MPRIS_PATH)?
                .build()
        };
        build().with_context(|| format!("Failed to create proxy for {}", uri))
    }
}

impl PlayerBridge for MprisBridge {
    fn list_players(&self) -> Result<Vec<String>> {
        let dbus = DBusProxy::new(&self.connection).context("Failed to create D-Bus proxy")?;
        let names = dbus.list_names().context("Failed to list bus names")?;

        let mut players: Vec<String> = names
            .into_iter()
            .map(|name| name.to_string())
            .filter(|name| name.starts_with(MPRIS_PREFIX))
            .collect();
        players.sort();
        Ok(players)
    }

    fn snapshot(&self, uri: &str) -> Result<Option<Snapshot>> {
        let properties = self.properties(uri)?;
        let interface = InterfaceName::from_static_str_unchecked(PLAYER_INTERFACE);
        let get = |name: &str| {
            properties
                .get(interface.clone(), name)
                .with_context(|| format!("Failed to read {} of {}", name, uri))
        };

        let status = String::try_from(get("PlaybackStatus")?)?;
        let metadata = HashMap::<String, OwnedValue>::try_from(get("Metadata")?)?;
        // Some players do not implement Position
        let position = get("Position")
            .ok()
            .and_then(|value| value_to_i64(&value))
            .unwrap_or(0);

        let metadata = TrackMetadata::from_dict(&metadata);
        if metadata.is_empty() {
            return Ok(None);
        }

        Ok(Some(metadata.into_snapshot(
            position,
            PlaybackStatus::from_mpris(&status),
            &self.cleaner,
        )))
    }
}
