//! Browser session management
//!
//! Launches and controls a single Chrome instance over the DevTools
//! Protocol. Every session gets a fresh throwaway profile directory, so no
//! history, cache, or cookies survive between sessions or leak onto disk
//! after teardown.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, HandleJavaScriptDialogParams, PrintToPdfParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tempfile::TempDir;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::BrowserError;

/// How often element polls re-check the page.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Find the Chrome/Chromium executable from a fixed ordered list of install
/// paths. `CHROME_EXECUTABLE` overrides the search.
pub fn find_chrome() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    let candidates: Vec<PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = vec![
            PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ];
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(PathBuf::from(format!(
                r"{}\Google\Chrome\Application\chrome.exe",
                local
            )));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    } else {
        vec![
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/google-chrome-stable"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

/// Configuration for a browser session
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Path to Chrome/Chromium executable (auto-detected when unset)
    pub chrome_path: Option<String>,
    /// Run in headless mode
    pub headless: bool,
    /// Per-operation timeout in seconds
    pub timeout_secs: u64,
    /// Window width
    pub window_width: u32,
    /// Window height
    pub window_height: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            timeout_secs: 25,
            // Matches the portals' expected desktop layout and keeps
            // captures consistent across records.
            window_width: 1360,
            window_height: 768,
        }
    }
}

/// A browser session: one live Chrome process plus its isolated profile.
///
/// Sessions are never repaired in place. After a fatal error the whole
/// session is closed and a new one launched (see
/// `ChromeSessionManager::recreate`).
pub struct BrowserSession {
    /// Unique session ID (used in logs and the profile path)
    pub id: String,
    /// The browser instance
    browser: Arc<RwLock<Option<Browser>>>,
    /// Current active page
    page: Arc<RwLock<Option<Page>>>,
    /// Whether the Chrome process is still connected
    alive: Arc<AtomicBool>,
    /// Default timeout for waits
    timeout: Duration,
    /// Profile storage; removed from disk when the session is dropped
    _profile_dir: TempDir,
}

impl BrowserSession {
    /// Launch a new browser session with the given config.
    pub async fn launch(config: SessionConfig) -> Result<Self, BrowserError> {
        let session_id = format!("session-{}", &uuid::Uuid::new_v4().to_string()[..8]);

        let chrome_path = match config.chrome_path.as_ref().map(PathBuf::from) {
            Some(p) => p,
            None => find_chrome().ok_or_else(|| {
                BrowserError::LaunchFailed(
                    "No Chrome/Chromium executable found in known install paths. \
                     Set CHROME_EXECUTABLE to override."
                        .to_string(),
                )
            })?,
        };

        let profile_dir = tempfile::Builder::new()
            .prefix(&format!("portal-runner-{}-", session_id))
            .tempdir()
            .map_err(|e| BrowserError::LaunchFailed(format!("profile dir: {e}")))?;

        info!(
            "Launching browser session {} (headless: {}, profile: {})",
            session_id,
            config.headless,
            profile_dir.path().display()
        );

        let mut builder = BrowserConfig::builder()
            .chrome_executable(&chrome_path)
            .user_data_dir(profile_dir.path())
            .viewport(Viewport {
                width: config.window_width,
                height: config.window_height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .window_size(config.window_width, config.window_height)
            // Private mode: no history, no cache, no cookies
            .arg("--incognito")
            .arg("--disable-application-cache")
            .arg("--disk-cache-size=0")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-extensions")
            .arg("--disable-plugins-discovery")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--mute-audio")
            .arg(format!(
                "--window-size={},{}",
                config.window_width, config.window_height
            ));

        if config.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        let browser_config = builder
            .build()
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // Spawn handler in background; when it ends, Chrome has disconnected.
        let alive_flag = Arc::new(AtomicBool::new(true));
        let alive_for_handler = alive_flag.clone();
        let session_id_clone = session_id.clone();
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Session {} CDP handler error: {}", session_id_clone, e);
                }
            }
            warn!(
                "Session {} Chrome disconnected (event handler ended)",
                session_id_clone
            );
            alive_for_handler.store(false, Ordering::Relaxed);
        });

        // Chrome opens with one blank tab; take it as the working page and
        // close any extras.
        let page = {
            let mut pages = browser
                .pages()
                .await
                .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

            let main_page = if !pages.is_empty() {
                pages.remove(0)
            } else {
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?
            };

            for extra in pages {
                let _ = extra.close().await;
            }

            main_page
        };

        info!("Browser session {} created", session_id);

        Ok(Self {
            id: session_id,
            browser: Arc::new(RwLock::new(Some(browser))),
            page: Arc::new(RwLock::new(Some(page))),
            alive: alive_flag,
            timeout: Duration::from_secs(config.timeout_secs),
            _profile_dir: profile_dir,
        })
    }

    /// Get session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check if the Chrome process is still connected
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Default per-operation timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Navigate the working page to a URL, bounded by the session timeout.
    pub async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        debug!("Session {} navigating to: {}", self.id, url);
        tokio::time::timeout(self.timeout, page.goto(url))
            .await
            .map_err(|_| BrowserError::Timeout(format!("navigation to {url}")))?
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        Ok(())
    }

    /// Block until the working page finishes its in-flight navigation.
    pub async fn wait_for_navigation(&self) -> Result<(), BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        tokio::time::timeout(self.timeout, page.wait_for_navigation())
            .await
            .map_err(|_| BrowserError::Timeout("navigation".into()))?
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        Ok(())
    }

    /// Execute JavaScript on the working page, bounded by the session
    /// timeout. Returns `Null` when the script yields no value.
    pub async fn evaluate(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        let result = tokio::time::timeout(self.timeout, page.evaluate(script))
            .await
            .map_err(|_| BrowserError::Timeout("script evaluation".into()))?
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(result
            .into_value::<serde_json::Value>()
            .unwrap_or(serde_json::Value::Null))
    }

    /// Poll until `selector` is present on the working page.
    pub async fn wait_for_element(&self, selector: &str) -> Result<(), BrowserError> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            {
                let page = self.page.read().await;
                let page = page
                    .as_ref()
                    .ok_or(BrowserError::ConnectionLost("No active page".into()))?;
                if page.find_element(selector).await.is_ok() {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "waiting for element {selector}"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Click an element by selector.
    pub async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        let element = page
            .find_element(selector)
            .await
            .map_err(|e| BrowserError::ElementNotFound(format!("{selector}: {e}")))?;

        element
            .click()
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(())
    }

    /// Click at viewport coordinates via raw CDP mouse events.
    pub async fn click_at(&self, x: f64, y: f64) -> Result<(), BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        let mouse_down = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .unwrap();
        page.execute(mouse_down)
            .await
            .map_err(|e| BrowserError::JavaScriptError(format!("CDP mouseDown failed: {e}")))?;

        tokio::time::sleep(Duration::from_millis(60)).await;

        let mouse_up = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .unwrap();
        page.execute(mouse_up)
            .await
            .map_err(|e| BrowserError::JavaScriptError(format!("CDP mouseUp failed: {e}")))?;

        Ok(())
    }

    /// Viewport bounding box of an element: (x, y, width, height).
    pub async fn element_box(&self, selector: &str) -> Result<(f64, f64, f64, f64), BrowserError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return null; \
             const r = el.getBoundingClientRect(); \
             return {{x: r.x, y: r.y, w: r.width, h: r.height}}; }})()",
            sel = serde_json::to_string(selector).unwrap_or_default()
        );
        let value = self.evaluate(&script).await?;
        let obj = value
            .as_object()
            .ok_or_else(|| BrowserError::ElementNotFound(selector.to_string()))?;

        let field = |name: &str| obj.get(name).and_then(|v| v.as_f64()).unwrap_or(0.0);
        Ok((field("x"), field("y"), field("w"), field("h")))
    }

    /// Type text into an element (clicks it first to focus).
    pub async fn type_into(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        let element = page
            .find_element(selector)
            .await
            .map_err(|e| BrowserError::ElementNotFound(format!("{selector}: {e}")))?;

        element.click().await.ok();
        element
            .type_str(text)
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(())
    }

    /// Set a `<select>` element by option value and fire its change events.
    pub async fn select_value(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
             el.value = {val}; \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); \
             return el.value === {val}; }})()",
            sel = serde_json::to_string(selector).unwrap_or_default(),
            val = serde_json::to_string(value).unwrap_or_default()
        );
        match self.evaluate(&script).await? {
            serde_json::Value::Bool(true) => Ok(()),
            _ => Err(BrowserError::ElementNotFound(format!(
                "select {selector} has no option '{value}'"
            ))),
        }
    }

    /// Set a `<select>` element by visible option text and fire its change
    /// events.
    pub async fn select_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
             const idx = Array.from(el.options).findIndex(o => o.text.trim() === {txt}); \
             if (idx < 0) return false; \
             el.selectedIndex = idx; \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); \
             return true; }})()",
            sel = serde_json::to_string(selector).unwrap_or_default(),
            txt = serde_json::to_string(text.trim()).unwrap_or_default()
        );
        match self.evaluate(&script).await? {
            serde_json::Value::Bool(true) => Ok(()),
            _ => Err(BrowserError::ElementNotFound(format!(
                "select {selector} has no option with text '{text}'"
            ))),
        }
    }

    /// Attach a local file to a file input via CDP.
    pub async fn set_file_input(&self, selector: &str, path: &str) -> Result<(), BrowserError> {
        use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;

        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        let element = page
            .find_element(selector)
            .await
            .map_err(|e| BrowserError::ElementNotFound(format!("{selector}: {e}")))?;

        let params = SetFileInputFilesParams {
            files: vec![path.to_string()],
            node_id: None,
            backend_node_id: Some(element.backend_node_id),
            object_id: Some(element.remote_object_id.clone()),
        };

        page.execute(params)
            .await
            .map_err(|e| BrowserError::JavaScriptError(format!("file upload failed: {e}")))?;

        Ok(())
    }

    /// Current URL of the working page.
    pub async fn current_url(&self) -> Result<String, BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        page.url()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?
            .ok_or_else(|| BrowserError::ConnectionLost("No URL".into()))
    }

    /// Full HTML of the working page.
    pub async fn content(&self) -> Result<String, BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        page.content()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))
    }

    /// Render the working page to a PDF via `Page.printToPDF`.
    pub async fn print_to_pdf(&self) -> Result<Vec<u8>, BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        Self::print_page_to_pdf(page).await
    }

    /// Render any page (working page or popup target) to a PDF.
    pub async fn print_page_to_pdf(page: &Page) -> Result<Vec<u8>, BrowserError> {
        let params = PrintToPdfParams {
            print_background: Some(true),
            margin_top: Some(0.4),
            margin_bottom: Some(0.4),
            margin_left: Some(0.4),
            margin_right: Some(0.4),
            ..Default::default()
        };

        page.pdf(params)
            .await
            .map_err(|e| BrowserError::JavaScriptError(format!("printToPDF failed: {e}")))
    }

    /// Capture a PNG screenshot of the working page.
    pub async fn screenshot_png(&self) -> Result<Vec<u8>, BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        page.screenshot(
            ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .full_page(true)
                .build(),
        )
        .await
        .map_err(|e| BrowserError::JavaScriptError(format!("screenshot failed: {e}")))
    }

    /// Accept any open JavaScript dialog (alert/confirm). Best-effort: the
    /// call fails harmlessly when no dialog is showing.
    pub async fn dismiss_dialog(&self) {
        let page = self.page.read().await;
        if let Some(page) = page.as_ref() {
            let params = HandleJavaScriptDialogParams {
                accept: true,
                prompt_text: None,
            };
            let _ = page.execute(params).await;
        }
    }

    /// All open pages/targets, including out-of-process iframes and popups.
    pub async fn pages(&self) -> Result<Vec<Page>, BrowserError> {
        let browser = self.browser.read().await;
        let browser = browser
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("Browser closed".into()))?;

        browser
            .pages()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))
    }

    /// Find an open target whose URL contains `fragment`. Cross-origin
    /// iframes (like challenge widgets) surface as separate targets under
    /// site isolation, so this is how their DOM becomes reachable.
    pub async fn page_matching(&self, fragment: &str) -> Result<Option<Page>, BrowserError> {
        for page in self.pages().await? {
            if let Ok(Some(url)) = page.url().await {
                if url.contains(fragment) {
                    return Ok(Some(page));
                }
            }
        }
        Ok(None)
    }

    /// Close the browser session. The profile directory is removed when the
    /// session value is dropped.
    pub async fn close(&self) -> Result<(), BrowserError> {
        // Mark as not alive first to prevent new operations
        self.alive.store(false, Ordering::Relaxed);

        // 1. Close page first (stops navigation/JS execution)
        {
            let mut page = self.page.write().await;
            if let Some(p) = page.take() {
                let _ = p.close().await;
            }
        }

        // 2. Close browser: graceful close, brief grace period, then force
        //    kill so no Chrome child processes linger.
        {
            let mut browser = self.browser.write().await;
            if let Some(mut b) = browser.take() {
                let _ = b.close().await;
                tokio::time::sleep(Duration::from_millis(500)).await;
                let _ = b.kill().await;
            }
        }

        info!("Browser session {} closed", self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_headless_desktop() {
        let config = SessionConfig::default();
        assert!(config.headless);
        assert_eq!((config.window_width, config.window_height), (1360, 768));
        assert_eq!(config.timeout_secs, 25);
    }
}
