use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{browser::default_executable, Browser, LaunchOptions, Tab};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};

use crate::types::CaptureError;

/// Launches one isolated render session per capture. Implementations block,
/// callers are expected to run them off the async executor.
pub trait RenderEngine: Send + Sync {
    fn launch(
        &self,
        viewport: (u32, u32),
        navigation_timeout: Duration,
    ) -> Result<Arc<dyn RenderSession>, CaptureError>;
}

pub trait RenderSession: Send + Sync {
    /// Navigates and waits until the page has settled its network activity.
    fn navigate(&self, url: &str) -> Result<(), CaptureError>;
    /// PNG bytes of the current viewport.
    fn screenshot(&self) -> Result<Vec<u8>, CaptureError>;
    /// Tears the session down. Must be idempotent and safe to call while
    /// another thread is blocked in `navigate`.
    fn close(&self);
}

pub struct ChromeEngine {
    executable: PathBuf,
    sandbox: bool,
    idle_browser_timeout: Duration,
}

impl ChromeEngine {
    pub fn new(idle_browser_timeout: Duration) -> Result<Self, CaptureError> {
        let executable = default_executable().map_err(CaptureError::Launch)?;
        // chrome's sandbox can't run inside most containers
        let sandbox = std::env::var("IN_DOCKER").is_err();
        Ok(ChromeEngine {
            executable,
            sandbox,
            idle_browser_timeout,
        })
    }
}

impl RenderEngine for ChromeEngine {
    fn launch(
        &self,
        viewport: (u32, u32),
        navigation_timeout: Duration,
    ) -> Result<Arc<dyn RenderSession>, CaptureError> {
        let options = LaunchOptions::default_builder()
            .path(Some(self.executable.clone()))
            .window_size(Some(viewport))
            .idle_browser_timeout(self.idle_browser_timeout)
            .ignore_certificate_errors(true)
            .sandbox(self.sandbox)
            .build()
            .map_err(|e| CaptureError::Launch(e.to_string()))?;
        let browser = Browser::new(options).map_err(|e| CaptureError::Launch(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| CaptureError::Launch(format!("could not create new tab: {}", e)))?;
        tab.set_default_timeout(navigation_timeout);

        debug!("launched browser with pid {:?}", browser.get_process_id());
        Ok(Arc::new(ChromeSession {
            pid: browser.get_process_id(),
            _browser: browser,
            tab,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct ChromeSession {
    pid: Option<u32>,
    _browser: Browser,
    tab: Arc<Tab>,
    closed: AtomicBool,
}

impl RenderSession for ChromeSession {
    fn navigate(&self, url: &str) -> Result<(), CaptureError> {
        self.tab
            .navigate_to(url)
            .map_err(|e| CaptureError::Render(format!("could not navigate to {}: {}", url, e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| CaptureError::Render(format!("navigation of {} failed: {}", url, e)))?;
        Ok(())
    }

    fn screenshot(&self) -> Result<Vec<u8>, CaptureError> {
        self.tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| {
                CaptureError::Render(format!(
                    "screenshot for {} could not be captured: {}",
                    self.tab.get_url(),
                    e
                ))
            })
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pid = match self.pid {
            Some(pid) => pid,
            None => return,
        };
        let mut s = System::new();
        let pid = Pid::from_u32(pid);
        s.refresh_process(pid);
        if let Some(process) = s.process(pid) {
            debug!("killing browser process with id {}", pid);
            process.kill();
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.close();
    }
}
