//! Headless Chromium sessions driven over CDP.
//!
//! Each session owns one browser process and one page. Images, stylesheets,
//! fonts and media are failed at the network layer so only the document,
//! scripts and XHR traffic are fetched.

use crate::checker::{CheckError, PageSession, SessionFactory};
use crate::config::BrowserConfig;
use crate::retry::ErrorKind;
use chromiumoxide::browser::{Browser, BrowserConfig as LaunchConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, ResourceType, SetUserAgentOverrideParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;

const LAUNCH_ARGS: &[&str] = &[
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-accelerated-2d-canvas",
    "--disable-gpu",
    "--disable-software-rasterizer",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-default-apps",
    "--disable-sync",
    "--metrics-recording-only",
    "--mute-audio",
    "--no-first-run",
    "--disable-features=AudioServiceOutOfProcess",
    "--disable-dbus",
    "--ignore-certificate-errors",
];

const SELECTOR_POLL: Duration = Duration::from_millis(250);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Launches a fresh Chromium for every attempt.
pub struct ChromeSessionFactory {
    config: BrowserConfig,
}

impl ChromeSessionFactory {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    fn launch_config(&self) -> Result<LaunchConfig, String> {
        let c = &self.config;
        let mut builder = LaunchConfig::builder()
            .no_sandbox()
            .args(LAUNCH_ARGS.iter().copied())
            .window_size(c.viewport_width, c.viewport_height)
            .viewport(Viewport {
                width: c.viewport_width,
                height: c.viewport_height,
                ..Viewport::default()
            })
            .request_timeout(c.load_timeout())
            .enable_request_intercept();
        if let Some(ref exe) = c.executable {
            builder = builder.chrome_executable(exe);
        }
        builder.build()
    }
}

impl SessionFactory for ChromeSessionFactory {
    type Session = ChromeSession;

    async fn open(&self) -> Result<ChromeSession, CheckError> {
        let launch = self
            .launch_config()
            .map_err(|e| CheckError::new(ErrorKind::Unclassified, e))?;

        let (mut browser, mut handler) = Browser::launch(launch).await.map_err(|e| {
            CheckError::new(
                ErrorKind::ResourceExhaustion,
                format!("failed to launch browser: {e}"),
            )
        })?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "browser handler stopped");
                    break;
                }
            }
        });

        match prepare_page(&browser, &self.config).await {
            Ok((page, interceptor)) => {
                tracing::debug!("browser session opened");
                Ok(ChromeSession {
                    browser,
                    page,
                    handler: handler_task,
                    interceptor,
                    load_timeout: self.config.load_timeout(),
                    content_wait_timeout: self.config.content_wait_timeout(),
                    settle: self.config.settle_delay(),
                })
            }
            Err(e) => {
                if let Err(close_err) = shutdown_browser(&mut browser).await {
                    tracing::warn!(error = %close_err, "failed to close browser after setup error");
                }
                handler_task.abort();
                Err(CheckError::classified(format!("failed to prepare page: {e}")))
            }
        }
    }
}

/// Open the working tab, set the user agent, and start request interception.
async fn prepare_page(
    browser: &Browser,
    config: &BrowserConfig,
) -> Result<(Page, JoinHandle<()>), CdpError> {
    let page = browser.new_page("about:blank").await?;
    page.set_user_agent(user_agent_override(config)).await?;

    let mut paused = page.event_listener::<EventRequestPaused>().await?;
    let blocked = config.blocked_resource_types.clone();
    let intercept_page = page.clone();
    let interceptor = tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let outcome = if is_blocked(&event.resource_type, &blocked) {
                intercept_page
                    .execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(|_| ())
            } else {
                intercept_page
                    .execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ())
            };
            if let Err(e) = outcome {
                tracing::debug!(error = %e, url = %event.request.url, "request interception failed");
            }
        }
    });

    Ok((page, interceptor))
}

fn user_agent_override(config: &BrowserConfig) -> SetUserAgentOverrideParams {
    SetUserAgentOverrideParams::new(config.user_agent.clone())
}

fn is_blocked(resource: &ResourceType, blocked: &[String]) -> bool {
    let name = resource.as_ref();
    blocked.iter().any(|b| b.eq_ignore_ascii_case(name))
}

/// Close the browser gracefully, killing the process if that does not work.
async fn shutdown_browser(browser: &mut Browser) -> Result<(), String> {
    let graceful = tokio::time::timeout(CLOSE_TIMEOUT, async {
        browser.close().await.map_err(|e| e.to_string())?;
        browser.wait().await.map_err(|e| e.to_string())?;
        Ok::<(), String>(())
    })
    .await
    .unwrap_or_else(|_| Err(format!("browser did not exit within {}s", CLOSE_TIMEOUT.as_secs())));

    if let Err(ref reason) = graceful {
        tracing::warn!(reason = %reason, "graceful browser close failed, killing process");
        if let Some(Err(e)) = browser.kill().await {
            return Err(format!("{reason}; kill failed: {e}"));
        }
    }
    graceful
}

/// One live Chromium process with a single page.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    interceptor: JoinHandle<()>,
    load_timeout: Duration,
    content_wait_timeout: Duration,
    settle: Duration,
}

impl ChromeSession {
    async fn wait_for_selector(&self, selector: &str) -> Result<(), CheckError> {
        let poll = async {
            while self.page.find_element(selector).await.is_err() {
                tokio::time::sleep(SELECTOR_POLL).await;
            }
        };
        tokio::time::timeout(self.content_wait_timeout, poll)
            .await
            .map_err(|_| {
                CheckError::new(
                    ErrorKind::ContentWaitTimeout,
                    format!(
                        "{selector:?} not present after {}s",
                        self.content_wait_timeout.as_secs()
                    ),
                )
            })
    }
}

impl PageSession for ChromeSession {
    async fn load(&mut self, url: &str, ready_selector: &str) -> Result<String, CheckError> {
        tracing::info!(url, "loading website");
        match tokio::time::timeout(self.load_timeout, self.page.goto(url)).await {
            Err(_) => {
                return Err(CheckError::new(
                    ErrorKind::NavigationTimeout,
                    format!("page did not load within {}s", self.load_timeout.as_secs()),
                ))
            }
            Ok(Err(CdpError::Timeout)) => {
                return Err(CheckError::new(
                    ErrorKind::NavigationTimeout,
                    "navigation request timed out",
                ))
            }
            Ok(Err(e)) => return Err(CheckError::classified(format!("navigation failed: {e}"))),
            Ok(Ok(_)) => {}
        }

        tracing::info!(selector = ready_selector, "waiting for content to load");
        self.wait_for_selector(ready_selector).await?;
        tokio::time::sleep(self.settle).await;

        self.page
            .content()
            .await
            .map_err(|e| CheckError::classified(format!("failed to read page content: {e}")))
    }

    async fn close(mut self) -> Result<(), CheckError> {
        self.interceptor.abort();
        let result = shutdown_browser(&mut self.browser).await;
        self.handler.abort();
        result.map_err(CheckError::classified)
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        // Browser's own Drop kills the child process if close() never ran.
        self.interceptor.abort();
        self.handler.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked() -> Vec<String> {
        BrowserConfig::default().blocked_resource_types
    }

    #[test]
    fn test_blocks_heavy_resource_types() {
        for resource in [
            ResourceType::Image,
            ResourceType::Stylesheet,
            ResourceType::Font,
            ResourceType::Media,
        ] {
            assert!(is_blocked(&resource, &blocked()), "{resource:?} should be blocked");
        }
    }

    #[test]
    fn test_allows_document_script_and_xhr() {
        for resource in [
            ResourceType::Document,
            ResourceType::Script,
            ResourceType::Xhr,
            ResourceType::Fetch,
        ] {
            assert!(!is_blocked(&resource, &blocked()), "{resource:?} should pass");
        }
    }

    #[test]
    fn test_user_agent_override_uses_configured_agent() {
        let config = BrowserConfig {
            user_agent: "slotwatch-test/1.0".to_string(),
            ..BrowserConfig::default()
        };
        let params = user_agent_override(&config);
        assert_eq!(params.user_agent, "slotwatch-test/1.0");
        assert!(params.accept_language.is_none());
    }

    #[test]
    fn test_empty_block_list_allows_everything() {
        assert!(!is_blocked(&ResourceType::Image, &[]));
    }

    #[test]
    fn test_launch_config_builds_with_defaults() {
        let factory = ChromeSessionFactory::new(BrowserConfig::default());
        // Fails only when no Chromium can be located on this host.
        if let Err(e) = factory.launch_config() {
            assert!(!e.is_empty());
        }
    }
}
