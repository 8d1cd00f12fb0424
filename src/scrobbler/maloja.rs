// Maloja scrobbler implementation
// API Documentation: https://github.com/krateng/maloja/blob/master/API.md

use super::traits::{Ack, ScrobbleClient, ScrobbleError, ScrobbleRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_PREFIX: &str = "apis/mlj_1";
const RECENT_PAGE_SIZE: u32 = 10;

/// JSON body of `newscrobble`
#[derive(Debug, Serialize)]
struct NewScrobble<'a> {
    artists: &'a [String],
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    album: Option<&'a str>,
    #[serde(rename = "albumartists", skip_serializing_if = "Option::is_none")]
    album_artists: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    #[serde(rename = "time", skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
}

impl<'a> From<&'a ScrobbleRequest> for NewScrobble<'a> {
    fn from(request: &'a ScrobbleRequest) -> Self {
        Self {
            artists: &request.artists,
            title: &request.title,
            album: request.album.as_deref(),
            album_artists: request.album_artists.as_deref(),
            duration: request.duration.map(whole_seconds),
            length: request.length.map(whole_seconds),
            timestamp: request.timestamp,
        }
    }
}

fn whole_seconds(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    }
}

/// One entry of the recent scrobbles listing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecentScrobble {
    pub time: i64,
    pub track: RecentTrack,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecentTrack {
    pub title: String,
    pub artists: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScrobbleList {
    list: Vec<RecentScrobble>,
}

pub struct MalojaClient {
    api_url: String,
    api_key: String,
    timeout: Duration,
}

impl MalojaClient {
    pub fn new(api_url: String, api_key: String, timeout: Duration) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}/{}", self.api_url, API_PREFIX, name)
    }

    /// Check that the server is reachable and accepts the API key
    pub fn test_connection(&self) -> Result<Ack, ScrobbleError> {
        const ENDPOINT: &str = "test";

        let response = attohttpc::get(self.endpoint(ENDPOINT))
            .param("key", &self.api_key)
            .timeout(self.timeout)
            .send()
            .map_err(|source| ScrobbleError::Transport {
                endpoint: ENDPOINT,
                source,
            })?;

        read_ack(ENDPOINT, response)
    }

    /// Fetch the most recent scrobbles on the server
    pub fn recent_scrobbles(&self) -> Result<Vec<RecentScrobble>, ScrobbleError> {
        const ENDPOINT: &str = "scrobbles";

        let response = attohttpc::get(self.endpoint(ENDPOINT))
            .param("key", &self.api_key)
            .param("page", 1)
            .param("perpage", RECENT_PAGE_SIZE)
            .timeout(self.timeout)
            .send()
            .map_err(|source| ScrobbleError::Transport {
                endpoint: ENDPOINT,
                source,
            })?;

        match read_ack(ENDPOINT, response)? {
            Ack::Json(value) => {
                let listing: ScrobbleList =
                    serde_json::from_value(value).map_err(|e| ScrobbleError::Decode {
                        endpoint: ENDPOINT,
                        message: e.to_string(),
                    })?;
                Ok(listing.list)
            }
            Ack::Text(body) => Err(ScrobbleError::Decode {
                endpoint: ENDPOINT,
                message: format!("expected JSON, got: {}", body),
            }),
        }
    }
}

impl ScrobbleClient for MalojaClient {
    fn submit(&self, request: &ScrobbleRequest) -> Result<Ack, ScrobbleError> {
        const ENDPOINT: &str = "newscrobble";

        log::debug!(
            "Scrobbling to Maloja ({}): {} - {}",
            self.api_url,
            request.artists.join(", "),
            request.title
        );

        let body = NewScrobble::from(request);
        let response = attohttpc::post(self.endpoint(ENDPOINT))
            .param("key", &self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .and_then(|builder| builder.send())
            .map_err(|source| ScrobbleError::Transport {
                endpoint: ENDPOINT,
                source,
            })?;

        read_ack(ENDPOINT, response)
    }
}

/// Turn a response into an [`Ack`], or an error for any non-200 status
fn read_ack(endpoint: &'static str, response: attohttpc::Response) -> Result<Ack, ScrobbleError> {
    let status = response.status();
    let is_json = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    let body = response
        .text()
        .map_err(|source| ScrobbleError::Transport { endpoint, source })?;

    if status.as_u16() != 200 {
        return Err(ScrobbleError::Status {
            endpoint,
            status: status.as_u16(),
            body,
        });
    }

    if is_json {
        if let Ok(value) = serde_json::from_str(&body) {
            return Ok(Ack::Json(value));
        }
    }
    Ok(Ack::Text(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve a single canned HTTP response and hand back the raw request
    fn serve_once(
        status_line: &'static str,
        content_type: &'static str,
        body: &'static str,
    ) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);

            let mut request = String::new();
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
                let end = line == "\r\n";
                request.push_str(&line);
                if end {
                    break;
                }
            }
            let mut body_buf = vec![0; content_length];
            reader.read_exact(&mut body_buf).unwrap();
            request.push_str(&String::from_utf8(body_buf).unwrap());

            let response = format!(
                "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                content_type,
                body.len(),
                body
            );
            reader.get_mut().write_all(response.as_bytes()).unwrap();
            request
        });

        (url, handle)
    }

    fn request() -> ScrobbleRequest {
        ScrobbleRequest {
            title: "A".to_string(),
            artists: vec!["X".to_string()],
            album: Some("Album".to_string()),
            album_artists: None,
            duration: Some(110.4),
            length: Some(200.0),
            timestamp: Some(1_700_000_000),
        }
    }

    #[test]
    fn test_payload_shape() {
        let req = request();
        let value = serde_json::to_value(NewScrobble::from(&req)).unwrap();
        assert_eq!(
            value,
            json!({
                "artists": ["X"],
                "title": "A",
                "album": "Album",
                "duration": 110,
                "length": 200,
                "time": 1_700_000_000,
            })
        );
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let client = MalojaClient::new(
            "https://maloja.example.org/".to_string(),
            "key".to_string(),
            Duration::from_secs(1),
        );
        assert_eq!(
            client.endpoint("newscrobble"),
            "https://maloja.example.org/apis/mlj_1/newscrobble"
        );
    }

    #[test]
    fn test_submit_success() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK",
            "application/json",
            r#"{"status":"success"}"#,
        );
        let client = MalojaClient::new(url, "secret".to_string(), Duration::from_secs(5));

        let ack = client.submit(&request()).unwrap();
        assert_eq!(ack, Ack::Json(json!({"status": "success"})));

        let raw = server.join().unwrap();
        assert!(raw.starts_with("POST /apis/mlj_1/newscrobble?key=secret"));
        assert!(raw.contains(r#""title":"A""#));
    }

    #[test]
    fn test_submit_error_status() {
        let (url, server) = serve_once("HTTP/1.1 403 Forbidden", "text/plain", "bad key");
        let client = MalojaClient::new(url, "wrong".to_string(), Duration::from_secs(5));

        match client.submit(&request()) {
            Err(ScrobbleError::Status { status, body, .. }) => {
                assert_eq!(status, 403);
                assert_eq!(body, "bad key");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        server.join().unwrap();
    }

    #[test]
    fn test_submit_unreachable() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = MalojaClient::new(
            format!("http://127.0.0.1:{}", port),
            "key".to_string(),
            Duration::from_secs(2),
        );
        assert!(matches!(
            client.submit(&request()),
            Err(ScrobbleError::Transport { .. })
        ));
    }

    #[test]
    fn test_recent_scrobbles() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK",
            "application/json",
            r#"{"status":"ok","list":[{"time":1700000000,"track":{"title":"A","artists":["X"]}}]}"#,
        );
        let client = MalojaClient::new(url, "secret".to_string(), Duration::from_secs(5));

        let recent = client.recent_scrobbles().unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].time, 1_700_000_000);
        assert_eq!(recent[0].track.title, "A");
        assert_eq!(recent[0].track.artists, vec!["X".to_string()]);

        let raw = server.join().unwrap();
        assert!(raw.starts_with("GET /apis/mlj_1/scrobbles?"));
        assert!(raw.contains("perpage=10"));
    }
}
