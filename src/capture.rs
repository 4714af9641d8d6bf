use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::{task, time::sleep};

use crate::{
    browser_controller::{RenderEngine, RenderSession},
    types::CaptureError,
    utils::{screenshot_path, PARTIAL_SUFFIX},
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct CaptureOptions {
    // extra wait after navigation for pages that keep loading content
    #[builder(default = "Duration::from_secs(5)")]
    settle_delay: Duration,
    // hard ceiling for launch + navigation + settle + screenshot
    #[builder(default = "Duration::from_secs(45)")]
    ceiling: Duration,
    // the renderer's own navigation timeout
    #[builder(default = "Duration::from_secs(30)")]
    navigation_timeout: Duration,
    #[builder(default = "(1280, 720)")]
    viewport: (u32, u32),
}

impl CaptureOptions {
    pub fn default_builder() -> CaptureOptionsBuilder {
        CaptureOptionsBuilder::default()
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }
}

/// Closes the session on every exit path, including the future being
/// dropped by the ceiling.
struct SessionGuard(Arc<dyn RenderSession>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        debug!("closing render session");
        self.0.close();
    }
}

pub struct CaptureEngine {
    engine: Arc<dyn RenderEngine>,
    options: CaptureOptions,
}

impl CaptureEngine {
    pub fn new(engine: Arc<dyn RenderEngine>, options: CaptureOptions) -> Result<Self, CaptureError> {
        let budget = options.navigation_timeout + options.settle_delay;
        if options.ceiling <= budget {
            return Err(CaptureError::Budget {
                ceiling: options.ceiling,
                budget,
            });
        }
        Ok(CaptureEngine { engine, options })
    }

    /// Renders `url` into `output_dir/images/<sanitized_name>.png`.
    pub async fn capture(
        &self,
        url: &str,
        sanitized_name: &str,
        output_dir: &Path,
    ) -> Result<PathBuf, CaptureError> {
        let path = screenshot_path(output_dir, sanitized_name);
        let ceiling = self.options.ceiling;
        match tokio::time::timeout(ceiling, self.render(url, path)).await {
            Ok(res) => res,
            Err(_) => {
                warn!("screenshot of {} abandoned after {:?}", url, ceiling);
                Err(CaptureError::Timeout(ceiling))
            }
        }
    }

    async fn render(&self, url: &str, path: PathBuf) -> Result<PathBuf, CaptureError> {
        let engine = self.engine.clone();
        let viewport = self.options.viewport;
        let navigation_timeout = self.options.navigation_timeout;
        let session =
            task::spawn_blocking(move || engine.launch(viewport, navigation_timeout)).await??;
        let _guard = SessionGuard(session.clone());

        let s = session.clone();
        let u = url.to_string();
        task::spawn_blocking(move || s.navigate(&u)).await??;

        debug!("sleeping {:?} before capturing {}", self.options.settle_delay, url);
        sleep(self.options.settle_delay).await;

        let s = session.clone();
        let png = task::spawn_blocking(move || s.screenshot()).await??;

        // a half-written file must never look like a finished artifact
        let mut partial = path.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);
        tokio::fs::write(&partial, png)
            .await
            .map_err(|source| CaptureError::Io {
                path: partial.clone(),
                source,
            })?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|source| CaptureError::Io {
                path: path.clone(),
                source,
            })?;
        debug!("saved screenshot of {} to {:?}", url, path);
        Ok(path)
    }
}
