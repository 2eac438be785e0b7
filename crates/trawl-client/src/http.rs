use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use trawl_core::error::AppError;
use trawl_core::job::{Job, JobRequest};
use trawl_core::traits::{Engine, FetchContext};
use url::Url;

const USER_AGENT: &str = "Trawl/0.1";

/// Plain HTTP engine for static pages.
///
/// Issues a GET for the job URL (with `req.params` appended to the query
/// string), records status, final URL and body on the job, and runs the
/// registered parser over the body. The job's timeout, when set, overrides
/// the client-wide one. Extra request headers can be supplied through the
/// `headers` object of the engine options.
#[derive(Clone)]
pub struct HttpEngine {
    client: Client,
    timeout: Duration,
}

impl HttpEngine {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    /// Use a preconfigured client (proxies, TLS settings, cookies).
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl Engine for HttpEngine {
    async fn fetch(&self, job: &mut Job, ctx: &FetchContext) -> Result<(), AppError> {
        let url = request_url(&job.req)?;
        let timeout = job.req.timeout.unwrap_or(self.timeout);

        let mut request = self.client.get(url.clone()).timeout(timeout);
        if let Some(Value::Object(headers)) = ctx.options.engine.get("headers") {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::timeout(timeout)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        job.res.status = Some(status.as_u16());
        job.res.url = Some(response.url().to_string());
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;
        tracing::debug!(job_id = %job.id, bytes = body.len(), "Fetched body");

        job.res.data = ctx.parse(&body, &job.req)?;
        job.res.body = Some(body);
        Ok(())
    }
}

/// Build the request URL: only http/https, with `params` appended as query pairs.
fn request_url(req: &JobRequest) -> Result<Url, AppError> {
    let mut url =
        Url::parse(&req.url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::HttpError(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    if !req.params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &req.params {
            match value {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        pairs.append_pair(key, &query_value(item));
                    }
                }
                other => {
                    pairs.append_pair(key, &query_value(other));
                }
            }
        }
    }

    Ok(url)
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use trawl_core::job::{FeedSpec, create_job};

    use super::*;

    /// Serve one canned HTTP response on a local port and return its base URL.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}")
    }

    fn engine() -> HttpEngine {
        let client = Client::builder().no_proxy().build().unwrap();
        HttpEngine::with_client(client, Duration::from_secs(5))
    }

    #[test]
    fn test_params_become_query_pairs() {
        let mut params = serde_json::Map::new();
        params.insert("q".into(), json!("rust lang"));
        params.insert("page".into(), json!(2));
        params.insert("tag".into(), json!(["a", "b"]));
        params.insert("skip".into(), Value::Null);
        let job = create_job(
            FeedSpec::new("https://example.com/search").with_params(params).into(),
            None,
        )
        .unwrap();

        let url = request_url(&job.req).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("q".into(), "rust lang".into())));
        assert!(pairs.contains(&("page".into(), "2".into())));
        assert!(pairs.contains(&("tag".into(), "a".into())));
        assert!(pairs.contains(&("tag".into(), "b".into())));
        assert!(!pairs.iter().any(|(k, _)| k == "skip"));
    }

    #[test]
    fn test_rejects_non_http_schemes() {
        let job = create_job("file:///etc/passwd".into(), None).unwrap();
        let err = request_url(&job.req).unwrap_err();
        assert!(err.to_string().contains("not allowed"));

        let job = create_job("not a url".into(), None).unwrap();
        assert!(matches!(request_url(&job.req), Err(AppError::HttpError(_))));
    }

    #[tokio::test]
    async fn test_fetch_records_body_and_parses() {
        let base = serve_once("200 OK", "<h1>Hello</h1>").await;
        let mut job = create_job(format!("{base}/page").into(), None).unwrap();
        let ctx = FetchContext {
            parser: Some(Arc::new(|body: &str, _req: &JobRequest| {
                Ok(json!({"length": body.len()}))
            })),
            ..FetchContext::default()
        };

        engine().fetch(&mut job, &ctx).await.unwrap();

        assert_eq!(job.res.status, Some(200));
        assert_eq!(job.res.body.as_deref(), Some("<h1>Hello</h1>"));
        assert_eq!(job.res.data, Some(json!({"length": 14})));
        assert!(job.res.url.as_deref().unwrap().ends_with("/page"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let base = serve_once("404 Not Found", "missing").await;
        let mut job = create_job(base.into(), None).unwrap();

        let err = engine()
            .fetch(&mut job, &FetchContext::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::HttpError(ref msg) if msg.contains("404")));
        assert_eq!(job.res.status, Some(404));
        assert!(job.res.body.is_none());
    }

    #[tokio::test]
    async fn test_timeout_reports_milliseconds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut job = create_job(format!("http://{addr}/slow").into(), None).unwrap();
        job.req.timeout = Some(Duration::from_millis(200));

        let err = engine()
            .fetch(&mut job, &FetchContext::default())
            .await
            .unwrap_err();

        assert_eq!(err, AppError::Timeout(200));
    }
}
