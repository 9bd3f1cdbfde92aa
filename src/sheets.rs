use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{SheetsCredentials, SheetsSettings};
use crate::models::Grid;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token exchange failed ({status}): {body}")]
    TokenRejected { status: u16, body: String },
    #[error("token response had no access_token")]
    MissingAccessToken,
    #[error("sheet {sheet:?} request failed ({status}): {body}")]
    SheetRejected {
        sheet: String,
        status: u16,
        body: String,
    },
    #[error("invalid Sheets endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("fetch cancelled")]
    Cancelled,
    #[error("fetch timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Read-only client for `spreadsheets.values.get`.
pub struct SheetsClient {
    http: reqwest::Client,
    credentials: SheetsCredentials,
    settings: SheetsSettings,
}

impl SheetsClient {
    pub fn new(credentials: SheetsCredentials, settings: SheetsSettings) -> Self {
        Self::with_http_client(reqwest::Client::new(), credentials, settings)
    }

    pub fn with_http_client(
        http: reqwest::Client,
        credentials: SheetsCredentials,
        settings: SheetsSettings,
    ) -> Self {
        SheetsClient {
            http,
            credentials,
            settings,
        }
    }

    /// Trades the refresh token for a bearer token.
    pub async fn exchange_token(&self) -> Result<String, NetworkError> {
        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let resp = self
            .http
            .post(&self.credentials.token_url)
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NetworkError::TokenRejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = resp.json().await?;
        token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(NetworkError::MissingAccessToken)
    }

    pub fn values_url(&self, sheet: &str) -> Result<reqwest::Url, NetworkError> {
        let base = &self.settings.api_base;
        let mut url = reqwest::Url::parse(base)
            .map_err(|e| NetworkError::InvalidEndpoint(format!("{base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| NetworkError::InvalidEndpoint(base.clone()))?
            .pop_if_empty()
            .extend([
                "spreadsheets",
                self.settings.spreadsheet_id.as_str(),
                "values",
                sheet,
            ]);
        url.query_pairs_mut().append_pair("alt", "json");
        Ok(url)
    }

    /// One token exchange plus one GET. No retries.
    pub async fn fetch_grid(&self, sheet: &str) -> Result<Grid, NetworkError> {
        let url = self.values_url(sheet)?;
        let token = self.exchange_token().await?;
        debug!(%url, "requesting sheet values");

        let resp = self.http.get(url).bearer_auth(token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NetworkError::SheetRejected {
                sheet: sheet.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let range: ValueRange = resp.json().await?;
        Ok(range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    /// Races the fetch against `cancel` and the configured timeout, so a
    /// caller that has gone away never receives a late result.
    pub async fn fetch_until(
        &self,
        sheet: &str,
        cancel: impl Future<Output = ()>,
    ) -> Result<Grid, NetworkError> {
        let timeout = self.settings.timeout;
        tokio::select! {
            biased;
            _ = cancel => {
                warn!(sheet, "sheet fetch cancelled");
                Err(NetworkError::Cancelled)
            }
            result = tokio::time::timeout(timeout, self.fetch_grid(sheet)) => {
                result.unwrap_or(Err(NetworkError::TimedOut(timeout)))
            }
        }
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves.
pub async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}

/// Offline source: `<dir>/<sheet name>.csv`, read without a header row.
#[derive(Debug, Clone)]
pub struct CsvDirectory {
    pub dir: PathBuf,
}

impl CsvDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CsvDirectory { dir: dir.into() }
    }

    pub fn load(&self, sheet: &str) -> anyhow::Result<Grid> {
        let path = self.dir.join(format!("{sheet}.csv"));
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let mut grid = Grid::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("malformed CSV in {}", path.display()))?;
            grid.push(record.iter().map(str::to_string).collect());
        }
        Ok(grid)
    }
}

pub enum GridSource {
    Sheets(SheetsClient),
    Csv(CsvDirectory),
}

impl GridSource {
    pub async fn load(&self, sheet: &str) -> anyhow::Result<Grid> {
        let grid = match self {
            GridSource::Sheets(client) => client
                .fetch_until(sheet, shutdown_signal())
                .await
                .with_context(|| format!("failed to load sheet {sheet:?}"))?,
            GridSource::Csv(dir) => dir.load(sheet)?,
        };
        info!(sheet, rows = grid.len(), "loaded sheet");
        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn credentials(token_url: String) -> SheetsCredentials {
        SheetsCredentials {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            refresh_token: "refresh-token".to_string(),
            token_url,
        }
    }

    fn client_for(base: &str, timeout: Duration) -> SheetsClient {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        SheetsClient::with_http_client(
            http,
            credentials(format!("{base}/token")),
            SheetsSettings {
                spreadsheet_id: "sheet-id".to_string(),
                api_base: format!("{base}/v4"),
                timeout,
            },
        )
    }

    fn header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n")
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 2048];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = header_end(&buf) {
                let head = String::from_utf8_lossy(&buf[..end]).to_string();
                let length = head
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        if name.eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                while buf.len() < end + 4 + length {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                break;
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Answers one connection per canned response, in order, and returns the
    /// raw requests it saw.
    async fn stub_server(
        responses: Vec<(u16, &'static str)>,
    ) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                seen.push(read_request(&mut socket).await);
                let response = format!(
                    "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
            seen
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn fetches_grid_with_bearer_token() {
        let (base, server) = stub_server(vec![
            (200, r#"{"access_token":"tok-123","expires_in":3599}"#),
            (
                200,
                r#"{"range":"'Late Cancellations'!A1:C2","values":[["Location","Jan-2024","Feb-2024"],["Kwality House",3,"5"]]}"#,
            ),
        ])
        .await;
        let client = client_for(&base, Duration::from_secs(5));

        let grid = client.fetch_grid("Late Cancellations").await.unwrap();
        assert_eq!(
            grid,
            vec![
                vec!["Location", "Jan-2024", "Feb-2024"],
                vec!["Kwality House", "3", "5"],
            ]
        );

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /token"));
        assert!(requests[0].contains("grant_type=refresh_token"));
        assert!(requests[0].contains("refresh_token=refresh-token"));
        assert!(requests[1]
            .starts_with("GET /v4/spreadsheets/sheet-id/values/Late%20Cancellations"));
        assert!(requests[1]
            .to_lowercase()
            .contains("authorization: bearer tok-123"));
    }

    #[tokio::test]
    async fn missing_values_is_an_empty_grid() {
        let (base, _server) = stub_server(vec![
            (200, r#"{"access_token":"tok"}"#),
            (200, r#"{"range":"Sales!A1:A1"}"#),
        ])
        .await;
        let grid = client_for(&base, Duration::from_secs(5))
            .fetch_grid("Sales")
            .await
            .unwrap();
        assert!(grid.is_empty());
    }

    #[tokio::test]
    async fn rejected_token_is_a_network_error() {
        let (base, _server) = stub_server(vec![(400, r#"{"error":"invalid_grant"}"#)]).await;
        let err = client_for(&base, Duration::from_secs(5))
            .fetch_grid("Sales")
            .await
            .unwrap_err();
        match err {
            NetworkError::TokenRejected { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn token_without_access_token_is_rejected() {
        let (base, _server) = stub_server(vec![(200, r#"{"expires_in":10}"#)]).await;
        let err = client_for(&base, Duration::from_secs(5))
            .exchange_token()
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::MissingAccessToken));
    }

    #[tokio::test]
    async fn failed_sheet_request_is_a_network_error() {
        let (base, _server) = stub_server(vec![
            (200, r#"{"access_token":"tok"}"#),
            (403, r#"{"error":{"code":403}}"#),
        ])
        .await;
        let err = client_for(&base, Duration::from_secs(5))
            .fetch_grid("Sales")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NetworkError::SheetRejected { status: 403, .. }
        ));
    }

    #[tokio::test]
    async fn cancellation_wins_over_fetch() {
        let client = client_for("http://127.0.0.1:9", Duration::from_secs(5));
        let err = client
            .fetch_until("Sales", std::future::ready(()))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Cancelled));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        // Connections queue in the backlog but are never answered.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let client = client_for(&base, Duration::from_millis(200));

        let err = client
            .fetch_until("Sales", std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::TimedOut(_)));
        drop(listener);
    }

    #[test]
    fn sheet_names_are_encoded_as_one_segment() {
        let client = client_for("http://localhost", Duration::from_secs(1));
        let url = client.values_url("Sales / 2025").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost/v4/spreadsheets/sheet-id/values/Sales%20%2F%202025?alt=json"
        );
    }

    #[test]
    fn reads_offline_csv_grid() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("Late Cancellations.csv")).unwrap();
        writeln!(file, "Location,Jan-2024,Feb-2024").unwrap();
        writeln!(file, "\"Kwality House, Kemps Corner\",3,5").unwrap();
        writeln!(file, "Late Cancellations by Class").unwrap();

        let grid = CsvDirectory::new(dir.path())
            .load("Late Cancellations")
            .unwrap();
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[1][0], "Kwality House, Kemps Corner");
        assert_eq!(grid[2].len(), 1);
    }

    #[test]
    fn missing_csv_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = CsvDirectory::new(dir.path()).load("Sales").unwrap_err();
        assert!(err.to_string().contains("Sales.csv"));
    }
}
