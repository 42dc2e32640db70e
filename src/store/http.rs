//! REST client for the survey backend.
//!
//! Speaks plain HTTP/1.1 over a blocking TcpStream, one connection per
//! request (`Connection: close`). Routes:
//!
//! ```text
//! POST   {base}/projects/{project}/{sensor}/        -> {"id": n, ...}
//! GET    {base}/projects/{project}/{sensor}/        -> [record, ...]
//! GET    {base}/projects/{project}/{sensor}/{id}/   -> record
//! PUT    {base}/projects/{project}/{sensor}/{id}/
//! DELETE {base}/projects/{project}/{sensor}/{id}/
//! ```

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde_json::Value;

use super::{ApiError, ApiResult, SensorStore};
use crate::config::ApiConfig;
use crate::error::{Result, SurveyError};
use crate::measurement::records::{ProjectId, RecordId, SensorRecord, StoredRecord};
use crate::telemetry::messages::SensorKind;

/// Largest response body accepted
const MAX_RESPONSE_BYTES: u64 = 4 * 1024 * 1024;

/// URL path segment for each sensor's resource
fn resource(kind: SensorKind) -> &'static str {
    match kind {
        SensorKind::Imx477 => "imx477",
        SensorKind::TfLuna => "tfluna",
        SensorKind::Mpu6050 => "mpu6050",
    }
}

#[derive(Debug, Clone, PartialEq)]
struct BaseUrl {
    host: String,
    port: u16,
    prefix: String,
}

impl BaseUrl {
    fn parse(url: &str) -> Result<Self> {
        let rest = url.strip_prefix("http://").ok_or_else(|| {
            SurveyError::Config(format!("API URL must start with http://: {}", url))
        })?;
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        // Bracketed IPv6 hosts keep their colons
        let port_sep = match authority.rfind(']') {
            Some(close) => authority[close..].find(':').map(|i| close + i),
            None => authority.rfind(':'),
        };
        let (host, port) = match port_sep {
            Some(i) => {
                let p = &authority[i + 1..];
                let port = p
                    .parse::<u16>()
                    .map_err(|_| SurveyError::Config(format!("Invalid API port: {}", p)))?;
                (&authority[..i], port)
            }
            None => (authority, 80),
        };
        if host.is_empty() {
            return Err(SurveyError::Config(format!("API URL has no host: {}", url)));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            prefix: path.trim_end_matches('/').to_string(),
        })
    }

    fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Parsed HTTP response
struct Response {
    status: u16,
    body: String,
}

impl Response {
    fn json(&self) -> ApiResult<Value> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// [`SensorStore`] backed by the survey REST API
pub struct HttpSensorStore {
    base: BaseUrl,
    timeout: Duration,
    token: Option<String>,
}

impl HttpSensorStore {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        Ok(Self {
            base: BaseUrl::parse(&config.base_url)?,
            timeout: config.timeout(),
            token: config.token.clone(),
        })
    }

    fn collection_path(&self, project: ProjectId, kind: SensorKind) -> String {
        format!(
            "{}/projects/{}/{}/",
            self.base.prefix,
            project,
            resource(kind)
        )
    }

    fn record_path(&self, project: ProjectId, kind: SensorKind, id: RecordId) -> String {
        format!(
            "{}/projects/{}/{}/{}/",
            self.base.prefix,
            project,
            resource(kind),
            id
        )
    }

    /// Send one request; non-2xx statuses come back as `Ok` for the caller to classify
    fn send(&self, method: &str, path: &str, body: Option<&Value>) -> ApiResult<Response> {
        let host = self.base.host.trim_start_matches('[').trim_end_matches(']');
        let addr = (host, self.base.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                ApiError::ConnectionLost(format!("cannot resolve {}", self.base.host))
            })?;

        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let payload = match body {
            Some(v) => serde_json::to_vec(v)?,
            None => Vec::new(),
        };

        let mut head = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\nAccept: application/json\r\nConnection: close\r\n",
            method,
            path,
            self.base.host_header()
        );
        if let Some(token) = &self.token {
            head.push_str(&format!("Authorization: Bearer {}\r\n", token));
        }
        if body.is_some() {
            head.push_str("Content-Type: application/json\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", payload.len()));

        stream.write_all(head.as_bytes())?;
        stream.write_all(&payload)?;
        stream.flush()?;

        let mut raw = Vec::new();
        stream
            .take(MAX_RESPONSE_BYTES + 1)
            .read_to_end(&mut raw)?;
        if raw.len() as u64 > MAX_RESPONSE_BYTES {
            return Err(ApiError::InvalidResponse(format!(
                "response exceeds {} bytes",
                MAX_RESPONSE_BYTES
            )));
        }

        let response = parse_response(&raw)?;
        tracing::debug!("{} {} -> {}", method, path, response.status);
        Ok(response)
    }

    /// Send and fail on any non-success status
    fn request(&self, method: &str, path: &str, body: Option<&Value>) -> ApiResult<Response> {
        let response = self.send(method, path, body)?;
        match ApiError::from_status(response.status, &response.body) {
            Some(err) => {
                tracing::warn!("{} {} failed: {}", method, path, err);
                Err(err)
            }
            None => Ok(response),
        }
    }

    fn decode_record(
        project: ProjectId,
        kind: SensorKind,
        value: &Value,
    ) -> ApiResult<StoredRecord> {
        let id = value
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| ApiError::InvalidResponse("record without id".into()))?;
        Ok(StoredRecord {
            id: RecordId(id),
            project_id: project,
            record: SensorRecord::from_json(kind, value)?,
        })
    }
}

impl SensorStore for HttpSensorStore {
    fn create(&self, project: ProjectId, record: &SensorRecord) -> ApiResult<RecordId> {
        let path = self.collection_path(project, record.kind());
        let body = record.to_json()?;
        let created = self.request("POST", &path, Some(&body))?.json()?;
        created
            .get("id")
            .and_then(Value::as_u64)
            .map(RecordId)
            .ok_or_else(|| ApiError::InvalidResponse("create response has no id".into()))
    }

    fn get(
        &self,
        project: ProjectId,
        kind: SensorKind,
        id: RecordId,
    ) -> ApiResult<Option<StoredRecord>> {
        let path = self.record_path(project, kind, id);
        let value = match self.request("GET", &path, None) {
            Ok(response) => response.json()?,
            Err(ApiError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        if value.is_null() {
            return Ok(None);
        }
        Self::decode_record(project, kind, &value).map(Some)
    }

    fn list(&self, project: ProjectId, kind: SensorKind) -> ApiResult<Vec<StoredRecord>> {
        let path = self.collection_path(project, kind);
        let value = match self.request("GET", &path, None) {
            Ok(response) => response.json()?,
            Err(ApiError::NotFound) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items
                .iter()
                .map(|item| Self::decode_record(project, kind, item))
                .collect(),
            other => Err(ApiError::InvalidResponse(format!(
                "expected a list of records, got {}",
                other
            ))),
        }
    }

    fn update(&self, project: ProjectId, id: RecordId, record: &SensorRecord) -> ApiResult<()> {
        let path = self.record_path(project, record.kind(), id);
        let body = record.to_json()?;
        self.request("PUT", &path, Some(&body))?;
        Ok(())
    }

    fn delete(&self, project: ProjectId, kind: SensorKind, id: RecordId) -> ApiResult<()> {
        let path = self.record_path(project, kind, id);
        self.request("DELETE", &path, None)?;
        Ok(())
    }
}

/// Split a raw HTTP/1.1 response into status and body
fn parse_response(raw: &[u8]) -> ApiResult<Response> {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| ApiError::InvalidResponse("truncated response headers".into()))?;
    let head = std::str::from_utf8(&raw[..split])
        .map_err(|_| ApiError::InvalidResponse("non-UTF-8 headers".into()))?;
    let mut body = &raw[split + 4..];

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| ApiError::InvalidResponse(format!("bad status line: {}", status_line)))?;

    let mut chunked = false;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            let len = value.parse::<usize>().map_err(|_| {
                ApiError::InvalidResponse(format!("bad Content-Length: {}", value))
            })?;
            body = body.get(..len).ok_or_else(|| {
                ApiError::InvalidResponse(format!(
                    "truncated body: {} of {} bytes",
                    body.len(),
                    len
                ))
            })?;
        } else if name.eq_ignore_ascii_case("transfer-encoding")
            && value.eq_ignore_ascii_case("chunked")
        {
            chunked = true;
        }
    }

    let body = if chunked {
        decode_chunked(body)?
    } else {
        body.to_vec()
    };

    Ok(Response {
        status,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn decode_chunked(mut data: &[u8]) -> ApiResult<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let line_end = data
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| ApiError::InvalidResponse("truncated chunk header".into()))?;
        let size_text = std::str::from_utf8(&data[..line_end])
            .map_err(|_| ApiError::InvalidResponse("bad chunk header".into()))?;
        let size_text = size_text.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_text, 16)
            .map_err(|_| ApiError::InvalidResponse(format!("bad chunk size: {}", size_text)))?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(out);
        }
        if data.len() < size {
            return Err(ApiError::InvalidResponse("truncated chunk".into()));
        }
        out.extend_from_slice(&data[..size]);
        data = data.get(size + 2..).unwrap_or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::messages::DistanceReading;
    use std::io::BufRead;
    use std::io::BufReader;
    use std::net::TcpListener;
    use std::thread;

    /// Request as received by the fake server
    struct Seen {
        request_line: String,
        headers: Vec<String>,
        body: String,
    }

    /// Serve one canned response per entry, returning what each request looked like
    fn serve(responses: Vec<&'static str>) -> (String, thread::JoinHandle<Vec<Seen>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/api", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for response in responses {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                let mut headers = Vec::new();
                let mut content_length = 0;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    let line = line.trim_end().to_string();
                    if line.is_empty() {
                        break;
                    }
                    if let Some(v) = line.strip_prefix("Content-Length: ") {
                        content_length = v.parse().unwrap();
                    }
                    headers.push(line);
                }
                let mut body = vec![0u8; content_length];
                reader.read_exact(&mut body).unwrap();
                let mut stream = stream;
                stream.write_all(response.as_bytes()).unwrap();
                seen.push(Seen {
                    request_line: request_line.trim_end().to_string(),
                    headers,
                    body: String::from_utf8(body).unwrap(),
                });
            }
            seen
        });
        (url, handle)
    }

    fn store(url: &str, token: Option<&str>) -> HttpSensorStore {
        HttpSensorStore::new(&ApiConfig {
            base_url: url.to_string(),
            timeout_ms: 2000,
            token: token.map(str::to_string),
        })
        .unwrap()
    }

    fn reading() -> SensorRecord {
        SensorRecord::Distance(DistanceReading {
            distance_m: 1.2,
            signal_strength: 5000,
            temperature_c: 25.0,
        })
    }

    #[test]
    fn test_short_body_reported_as_truncated() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 20\r\n\r\n{\"id\":1}";
        let Err(ApiError::InvalidResponse(message)) = parse_response(raw) else {
            panic!("expected invalid response");
        };
        assert!(message.contains("truncated body"), "{}", message);

        let exact = b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\n\r\n{\"id\":1}trailing";
        assert_eq!(parse_response(exact).unwrap().body, "{\"id\":1}");
    }

    #[test]
    fn test_oversized_response_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request);
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\n\r\n[");
            let filler = vec![b' '; 64 * 1024];
            let mut sent = 0u64;
            while sent <= MAX_RESPONSE_BYTES {
                if stream.write_all(&filler).is_err() {
                    break;
                }
                sent += filler.len() as u64;
            }
        });

        let err = store(&url, None)
            .list(1, SensorKind::TfLuna)
            .unwrap_err();
        assert!(
            matches!(&err, ApiError::InvalidResponse(m) if m.contains("exceeds")),
            "{:?}",
            err
        );
        server.join().unwrap();
    }

    #[test]
    fn test_base_url_parse() {
        let base = BaseUrl::parse("http://10.0.0.5:8000/api/").unwrap();
        assert_eq!(base.host, "10.0.0.5");
        assert_eq!(base.port, 8000);
        assert_eq!(base.prefix, "/api");

        let base = BaseUrl::parse("http://survey.local").unwrap();
        assert_eq!(base.port, 80);
        assert_eq!(base.prefix, "");

        assert!(BaseUrl::parse("https://survey.local").is_err());
        assert!(BaseUrl::parse("http://host:notaport/").is_err());
    }

    #[test]
    fn test_create_posts_record() {
        let (url, server) = serve(vec![
            "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nContent-Length: 9\r\n\r\n{\"id\":17}",
        ]);
        let id = store(&url, Some("secret")).create(42, &reading()).unwrap();
        assert_eq!(id, RecordId(17));

        let seen = server.join().unwrap();
        assert_eq!(seen[0].request_line, "POST /api/projects/42/tfluna/ HTTP/1.1");
        assert!(seen[0]
            .headers
            .iter()
            .any(|h| h == "Authorization: Bearer secret"));
        let body: Value = serde_json::from_str(&seen[0].body).unwrap();
        assert_eq!(body["distancia_m"], 1.2);
    }

    #[test]
    fn test_update_puts_to_record() {
        let (url, server) = serve(vec!["HTTP/1.1 204 No Content\r\n\r\n"]);
        store(&url, None).update(42, RecordId(2), &reading()).unwrap();

        let seen = server.join().unwrap();
        assert_eq!(seen[0].request_line, "PUT /api/projects/42/tfluna/2/ HTTP/1.1");
        assert!(!seen[0].headers.iter().any(|h| h.starts_with("Authorization")));
    }

    #[test]
    fn test_not_found_reads_are_empty() {
        let (url, server) = serve(vec![
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n",
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n",
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n",
        ]);
        let store = store(&url, None);
        assert_eq!(store.get(42, SensorKind::TfLuna, RecordId(9)).unwrap(), None);
        assert!(store.list(42, SensorKind::Imx477).unwrap().is_empty());
        assert_eq!(
            store.update(42, RecordId(9), &reading()),
            Err(ApiError::NotFound)
        );
        server.join().unwrap();
    }

    #[test]
    fn test_list_decodes_records() {
        let (url, server) = serve(vec![
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
             43\r\n[{\"id\":4,\"distancia_m\":1.2,\"fuerza_senal\":5000,\"temperatura\":25.0}]\r\n0\r\n\r\n",
        ]);
        let records = store(&url, None).list(42, SensorKind::TfLuna).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, RecordId(4));
        assert_eq!(records[0].record, reading());
        server.join().unwrap();
    }

    #[test]
    fn test_error_statuses() {
        let (url, server) = serve(vec![
            "HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\n\r\n",
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\n\r\noops",
        ]);
        let store = store(&url, None);
        assert_eq!(
            store.create(42, &reading()),
            Err(ApiError::NotAuthenticated)
        );
        let err = store.create(42, &reading()).unwrap_err();
        assert!(err.is_retryable());
        server.join().unwrap();
    }

    #[test]
    fn test_refused_connection_is_connection_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = store(&url, None).create(1, &reading()).unwrap_err();
        assert!(matches!(err, ApiError::ConnectionLost(_)));
    }
}
