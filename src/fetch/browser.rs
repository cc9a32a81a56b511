//! Full-render fetching via the headless-browser service.
//!
//! The service (a Browserless-compatible `/content` endpoint) launches and
//! pools the actual browser; this client sends one render request per fetch
//! and holds no page resources past return, so a dropped ack never leaks a
//! page. Client construction is process-wide and single-flight: concurrent
//! first callers coalesce on one initialization.

use super::{DEFAULT_TIMEOUT, FetchRequest, FetchResponse, simple};
use crate::error::{Result, ScrapeError};
use rand::Rng;
use serde_json::json;
use tokio::sync::OnceCell;

/// Injected before any page script runs. Fixed string: the core never
/// evaluates code derived from external input.
const STEALTH_INIT_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', {
  get: () => [{ name: 'Chrome PDF Plugin' }, { name: 'Chrome PDF Viewer' }, { name: 'Native Client' }],
});
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
window.chrome = window.chrome || { runtime: {} };
const originalQuery = window.navigator.permissions.query;
window.navigator.permissions.query = (parameters) =>
  parameters.name === 'notifications'
    ? Promise.resolve({ state: Notification.permission })
    : originalQuery(parameters);
"#;

/// Dwell bounds for the service's human-interaction pass (mouse move, short
/// scroll) between navigation and capture.
const DWELL_MS: (u64, u64) = (100, 1500);

pub struct BrowserFetcher {
    base_url: String,
    token: Option<String>,
    client: OnceCell<reqwest::Client>,
}

impl BrowserFetcher {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client: OnceCell::new(),
        }
    }

    /// Shared client, built once. `OnceCell` coalesces concurrent first
    /// callers onto a single initialization.
    async fn client(&self) -> Result<&reqwest::Client> {
        self.client
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .connect_timeout(std::time::Duration::from_secs(10))
                    .build()
                    .map_err(|e| ScrapeError::FetchNetwork(format!("browser client init: {e}")))
            })
            .await
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let timeout = request.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = self.client().await?;

        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let body = self.render_request(&request, timeout);

        let response = client
            .post(&endpoint)
            // the render itself may take the full page timeout
            .timeout(timeout + std::time::Duration::from_secs(10))
            .json(&body)
            .send()
            .await
            .map_err(|e| simple::classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::FetchHttp(status.as_u16()));
        }

        let final_url = response
            .headers()
            .get("x-response-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .unwrap_or_else(|| request.url.clone());

        let html = response
            .bytes()
            .await
            .map_err(|e| simple::classify(e, timeout))?
            .to_vec();

        Ok(FetchResponse {
            body: html,
            status: status.as_u16(),
            final_url,
            content_type: Some("text/html".to_string()),
        })
    }

    /// Build the render payload: fresh randomized fingerprint per request,
    /// networkidle navigation, optional selector wait, stealth overrides
    /// installed before page load.
    fn render_request(&self, request: &FetchRequest, timeout: std::time::Duration) -> serde_json::Value {
        let mut rng = rand::rng();
        let viewport_width: u32 = rng.random_range(1280..=1920);
        let viewport_height: u32 = rng.random_range(800..=1080);
        let dwell_ms: u64 = rng.random_range(DWELL_MS.0..=DWELL_MS.1);

        let mut body = json!({
            "url": request.url,
            "gotoOptions": {
                "waitUntil": "networkidle2",
                "timeout": timeout.as_millis() as u64,
            },
            "viewport": {
                "width": viewport_width,
                "height": viewport_height,
            },
            "addScriptTag": [{ "content": STEALTH_INIT_SCRIPT }],
            "humanLike": {
                "mouseMove": true,
                "scroll": true,
                "dwellMs": dwell_ms,
            },
        });

        if let Some(ref selector) = request.wait_for_selector {
            body["waitForSelector"] = json!({
                "selector": selector,
                "timeout": timeout.as_millis() as u64,
            });
        }

        body
    }
}
