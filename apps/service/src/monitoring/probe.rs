use anyhow::{Result, anyhow, bail};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::{Instant, timeout};
use tracing::debug;
use url::Url;

use super::timing::SLOW_THRESHOLD;
use super::types::{ProbeOutcome, ProbeResult};

/// Port both reachability checks talk to.
pub const PROBE_PORT: u16 = 80;

/// Literal request line sent by the socket check.
const REQUEST_LINE: &[u8] = b"GET / HTTP/1.1\r\n\r\n";

/// A single reachability check.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    /// Reach `host` and return the time from connection start to the
    /// first response byte.
    async fn check(&self, host: &str, timeout: Duration) -> Result<Duration>;
}

/// Raw TCP check: connect, send a bare request line, read one byte
pub struct SocketChecker {
    port: u16,
}

impl SocketChecker {
    pub fn new() -> Self {
        Self { port: PROBE_PORT }
    }

    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

impl Default for SocketChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Checker for SocketChecker {
    async fn check(&self, host: &str, _timeout: Duration) -> Result<Duration> {
        let addr = lookup_host((host, self.port))
            .await
            .map_err(|e| anyhow!("Failed to resolve {}: {}", host, e))?
            .next()
            .ok_or_else(|| anyhow!("No address found for {}", host))?;

        let start = Instant::now();
        let mut stream =
            TcpStream::connect(addr).await.map_err(|e| anyhow!("TCP connection failed: {}", e))?;
        stream.write_all(REQUEST_LINE).await?;

        let mut first = [0u8; 1];
        if stream.read(&mut first).await? == 0 {
            bail!("Connection closed before the first response byte");
        }
        Ok(start.elapsed())
    }
}

/// URL-connection check: `GET http://host:80/`, uncached, first byte only
pub struct HttpChecker {
    client: reqwest::Client,
    port: u16,
}

impl HttpChecker {
    pub fn new() -> Result<Self> {
        Self::with_port(PROBE_PORT)
    }

    pub fn with_port(port: u16) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Self { client, port })
    }

    fn url_for(&self, host: &str) -> Result<Url> {
        let mut url = Url::parse("http://localhost/")?;
        url.set_host(Some(host)).map_err(|e| anyhow!("Invalid probe host {}: {}", host, e))?;
        url.set_port(Some(self.port)).map_err(|_| anyhow!("Cannot set port on {}", host))?;
        Ok(url)
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, host: &str, timeout: Duration) -> Result<Duration> {
        let url = self.url_for(host)?;
        let start = Instant::now();

        let mut response = self
            .client
            .get(url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header(reqwest::header::PRAGMA, "no-cache")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

        // Redirects count as a live server, like any 2xx.
        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            bail!("HTTP check failed with status code: {}", status.as_u16());
        }

        // Headers already arrived; touch the body for the first byte if any.
        response.chunk().await.map_err(|e| anyhow!("HTTP read failed: {}", e))?;
        Ok(start.elapsed())
    }
}

/// Runs the socket check and then the HTTP check against one host
pub struct ReachabilityProbe {
    socket: Box<dyn Checker>,
    http: Box<dyn Checker>,
    slow_threshold: Duration,
}

impl ReachabilityProbe {
    pub fn new() -> Result<Self> {
        Ok(Self::with_checkers(Box::new(SocketChecker::new()), Box::new(HttpChecker::new()?)))
    }

    pub fn with_checkers(socket: Box<dyn Checker>, http: Box<dyn Checker>) -> Self {
        Self { socket, http, slow_threshold: SLOW_THRESHOLD }
    }

    /// Probe `host`. The checks run one after the other, each cut off at
    /// `per_test_timeout`, so the whole probe takes at most twice that.
    pub async fn probe(&self, host: &str, per_test_timeout: Duration) -> ProbeOutcome {
        let socket = self.run_check("socket", self.socket.as_ref(), host, per_test_timeout).await;
        let http = self.run_check("http", self.http.as_ref(), host, per_test_timeout).await;
        ProbeOutcome::new(socket, http)
    }

    async fn run_check(
        &self,
        name: &str,
        checker: &dyn Checker,
        host: &str,
        per_test_timeout: Duration,
    ) -> ProbeResult {
        let result = match timeout(per_test_timeout, checker.check(host, per_test_timeout)).await {
            Ok(Ok(elapsed)) => self.classify(elapsed),
            Ok(Err(e)) => {
                debug!("{} check against {} failed: {:#}", name, host, e);
                ProbeResult::Fail
            }
            Err(_) => {
                debug!("{} check against {} timed out after {:?}", name, host, per_test_timeout);
                ProbeResult::Fail
            }
        };
        debug!("{} check against {}: {}", name, host, result);
        result
    }

    fn classify(&self, elapsed: Duration) -> ProbeResult {
        if elapsed > self.slow_threshold { ProbeResult::Slow } else { ProbeResult::Pass }
    }
}
