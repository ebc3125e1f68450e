//! Minimal W3C WebDriver client, enough to drive chromedriver through the hub

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::{PAGE_LOAD_TIMEOUT, PAGE_POLL_INTERVAL};

/// W3C element reference key
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// The browser operations the scraper needs
#[async_trait]
pub trait Browser: Send {
    /// Navigate and wait until the page has a `<body>`
    async fn goto(&mut self, url: &str) -> Result<()>;

    async fn page_source(&mut self) -> Result<String>;

    /// Click the first link whose text matches. Returns false when no such
    /// link is on the page.
    async fn click_link(&mut self, text: &str, partial: bool) -> Result<bool>;

    async fn back(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Error reported by the WebDriver server
#[derive(Debug, Clone)]
pub struct WebDriverError {
    pub error: String,
    pub message: String,
}

impl fmt::Display for WebDriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WebDriver error '{}': {}", self.error, self.message)
    }
}

impl std::error::Error for WebDriverError {}

/// Chrome capabilities: headless, downloads land in `download_dir` without prompting
pub fn chrome_capabilities(download_dir: &Path) -> Value {
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": {
                    "args": [
                        "--headless",
                        "--no-sandbox",
                        "--disable-dev-shm-usage",
                        "--disable-gpu",
                        "--window-size=1920,1080"
                    ],
                    "prefs": {
                        "download.default_directory": download_dir.to_string_lossy(),
                        "download.prompt_for_download": false,
                        "download.directory_upgrade": true,
                        "safebrowsing.enabled": true
                    }
                }
            }
        }
    })
}

/// A live session on a WebDriver server (chromedriver)
pub struct WebDriverSession {
    client: Client,
    base_url: String,
    session_id: String,
    page_load_timeout: Duration,
    closed: bool,
}

impl WebDriverSession {
    pub async fn start(webdriver_url: &str, download_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(download_dir).await?;
        let download_dir = std::path::absolute(download_dir)?;

        let client = Client::new();
        let base_url = webdriver_url.trim_end_matches('/').to_string();

        let response = client
            .post(format!("{}/session", base_url))
            .json(&chrome_capabilities(&download_dir))
            .send()
            .await
            .with_context(|| format!("Failed to reach WebDriver at {}", base_url))?;
        let value = Self::unwrap_response(response).await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("WebDriver response has no sessionId"))?
            .to_string();

        info!("Chrome WebDriver session {} started", session_id);
        Ok(Self {
            client,
            base_url,
            session_id,
            page_load_timeout: PAGE_LOAD_TIMEOUT,
            closed: false,
        })
    }

    /// Send a session command and return its `value`
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        debug!("WebDriver {} {}", method, url);

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("WebDriver request to {} failed", url))?;
        Self::unwrap_response(response).await
    }

    async fn unwrap_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context("WebDriver returned a non-JSON response")?;
        let value = body.get("value").cloned().unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(value);
        }

        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Err(WebDriverError {
            error: field("error"),
            message: field("message"),
        }
        .into())
    }

    /// Locate one element, `None` when the page has no match
    async fn find_element(&self, using: &str, selector: &str) -> Result<Option<String>> {
        let result = self
            .command(
                Method::POST,
                "/element",
                Some(json!({ "using": using, "value": selector })),
            )
            .await;

        match result {
            Ok(value) => Ok(value
                .get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(str::to_string)),
            Err(e) if is_no_such_element(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn wait_for_body(&self) -> Result<()> {
        let deadline = Instant::now() + self.page_load_timeout;
        loop {
            if self.find_element("css selector", "body").await?.is_some() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(anyhow!(
                    "Page body did not appear within {:?}",
                    self.page_load_timeout
                ));
            }
            tokio::time::sleep(PAGE_POLL_INTERVAL).await;
        }
    }
}

fn is_no_such_element(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<WebDriverError>()
        .is_some_and(|e| e.error == "no such element")
}

#[async_trait]
impl Browser for WebDriverSession {
    async fn goto(&mut self, url: &str) -> Result<()> {
        info!("Loading page: {}", url);
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        self.wait_for_body().await
    }

    async fn page_source(&mut self) -> Result<String> {
        let value = self.command(Method::GET, "/source", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("WebDriver page source is not a string"))
    }

    async fn click_link(&mut self, text: &str, partial: bool) -> Result<bool> {
        let using = if partial {
            "partial link text"
        } else {
            "link text"
        };
        let Some(element) = self.find_element(using, text).await? else {
            return Ok(false);
        };

        self.command(
            Method::POST,
            &format!("/element/{}/click", element),
            Some(json!({})),
        )
        .await?;
        self.wait_for_body().await?;
        Ok(true)
    }

    async fn back(&mut self) -> Result<()> {
        self.command(Method::POST, "/back", Some(json!({})))
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.command(Method::DELETE, "", None).await?;
        self.closed = true;
        info!("WebDriver closed");
        Ok(())
    }
}
