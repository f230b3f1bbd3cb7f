//! Sorted collections behind a Redis-over-HTTP endpoint.
//!
//! Speaks the Upstash REST dialect: a single command is a JSON array posted to
//! the base URL, a transaction is an array of commands posted to
//! `/multi-exec`, and every reply is an object with either `result` or `error`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{trace, warn};

use crate::error::{LimiterError, Result};

use super::sorted_set::SortedSetBackend;

/// One reply object from the REST endpoint.
#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl Reply {
    fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(LimiterError::unavailable(format!("Error from Redis REST: {}", error))),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A [`SortedSetBackend`] talking to a Redis REST endpoint.
#[derive(Debug, Clone)]
pub struct RestSortedSet {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl RestSortedSet {
    /// Connect to `url` authenticating with a bearer `token`.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url, token)
    }

    /// Like [`new`](Self::new) but with a caller-configured client (timeouts, proxies).
    pub fn with_client(client: reqwest::Client, url: impl Into<String>, token: impl Into<String>) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        Self {
            client,
            url,
            token: token.into(),
        }
    }

    /// The base URL, without a trailing slash.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let url = format!("{}{}", self.url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Redis REST request failed");
                LimiterError::unavailable(format!("Redis REST request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Redis REST returned an error status");
            return Err(LimiterError::unavailable(format!("Error from Redis REST: {}", status)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| LimiterError::unavailable(format!("invalid Redis REST reply: {}", e)))
    }
}

#[async_trait]
impl SortedSetBackend for RestSortedSet {
    async fn add_prune_count(&self, key: &str, member: &str, score: u64, start: u64) -> Result<u64> {
        let transaction = json!([
            ["ZADD", key, score.to_string(), member],
            ["ZREMRANGEBYSCORE", key, "-inf", format!("({}", start)],
            ["ZCOUNT", key, start.to_string(), score.to_string()],
        ]);

        let replies: Vec<Reply> = self.post("/multi-exec", &transaction).await?;
        if replies.len() != 3 {
            return Err(LimiterError::unavailable(format!(
                "expected 3 transaction replies, got {}",
                replies.len()
            )));
        }

        let mut results = Vec::with_capacity(3);
        for reply in replies {
            results.push(reply.into_result()?);
        }

        let count = results[2]
            .as_u64()
            .ok_or_else(|| LimiterError::unavailable(format!("invalid ZCOUNT reply: {}", results[2])))?;

        trace!(key = %key, count = count, "Redis REST transaction");
        Ok(count)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let reply: Reply = self.post("", &json!(["DEL", key])).await?;
        reply.into_result()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// A captured HTTP request: request line, headers, body.
    struct Captured {
        head: String,
        body: Value,
    }

    /// Serve exactly one HTTP request with `status` and `body`, reporting what was received.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];

            let head_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client closed before sending headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
            let content_length: usize = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse().ok())
                        .flatten()
                })
                .unwrap_or(0);
            while buf.len() < head_end + content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client closed before sending the body");
                buf.extend_from_slice(&chunk[..n]);
            }
            let request_body = serde_json::from_slice(&buf[head_end..head_end + content_length])
                .unwrap_or(Value::Null);

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(Captured { head, body: request_body });
        });

        (format!("http://{}/", addr), rx)
    }

    #[test]
    fn test_trailing_slash_is_stripped() {
        let backend = RestSortedSet::new("https://example.upstash.io/", "token");
        assert_eq!(backend.url(), "https://example.upstash.io");
    }

    #[tokio::test]
    async fn test_increment_sends_one_transaction() {
        let (url, captured) =
            serve_once("200 OK", r#"[{"result":1},{"result":2},{"result":4}]"#).await;
        let backend = RestSortedSet::new(url, "secret");

        let count = backend.add_prune_count("svc:user1", "m-1", 5_000, 4_000).await.unwrap();
        assert_eq!(count, 4);

        let captured = captured.await.unwrap();
        assert!(captured.head.starts_with("POST /multi-exec "));
        assert!(captured.head.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert_eq!(
            captured.body,
            json!([
                ["ZADD", "svc:user1", "5000", "m-1"],
                ["ZREMRANGEBYSCORE", "svc:user1", "-inf", "(4000"],
                ["ZCOUNT", "svc:user1", "4000", "5000"],
            ])
        );
    }

    #[tokio::test]
    async fn test_delete_sends_del_command() {
        let (url, captured) = serve_once("200 OK", r#"{"result":1}"#).await;
        let backend = RestSortedSet::new(url, "secret");

        backend.delete("svc:user1").await.unwrap();

        let captured = captured.await.unwrap();
        assert!(captured.head.starts_with("POST / "));
        assert_eq!(captured.body, json!(["DEL", "svc:user1"]));
    }

    #[tokio::test]
    async fn test_error_status_is_unavailable() {
        let (url, _captured) = serve_once("503 Service Unavailable", "{}").await;
        let backend = RestSortedSet::new(url, "secret");

        let err = backend.delete("k").await.unwrap_err();
        assert!(err.is_store_unavailable());
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_error_reply_is_unavailable() {
        let (url, _captured) = serve_once(
            "200 OK",
            r#"[{"result":1},{"error":"WRONGTYPE Operation against a key holding the wrong kind of value"},{"result":1}]"#,
        )
        .await;
        let backend = RestSortedSet::new(url, "secret");

        let err = backend.add_prune_count("k", "m", 10, 5).await.unwrap_err();
        assert!(err.to_string().contains("WRONGTYPE"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = RestSortedSet::new(format!("http://{}", addr), "secret");
        let err = backend.delete("k").await.unwrap_err();
        assert!(err.is_store_unavailable());
    }
}
