use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use trawl_core::error::AppError;
use trawl_core::job::Job;
use trawl_core::traits::{Engine, FetchContext};

/// Headless-browser engine using Chromium via the Chrome DevTools Protocol.
///
/// One Chromium process is shared by all clones; each job opens its own
/// tab. When an automation script is registered, it is evaluated in the
/// rendered page and its JSON result lands in `res.data`. Otherwise the
/// rendered HTML is stored as the body and handed to the parser.
#[derive(Clone)]
pub struct BrowserEngine {
    browser: Arc<Browser>,
    timeout: Duration,
}

enum Rendered {
    Script(serde_json::Value),
    Html(String),
}

impl BrowserEngine {
    /// Launches a headless Chromium browser with a 30 s navigation timeout.
    pub async fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30)).await
    }

    pub async fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();
        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::Generic(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::Generic(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled for the connection to make progress.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            timeout,
        })
    }

    /// Render one page in a fresh tab. The tab is closed whatever the outcome.
    async fn render(
        &self,
        url: &str,
        script: Option<String>,
        timeout: Duration,
    ) -> Result<(Rendered, Option<String>), AppError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::Generic(format!("Failed to open tab: {e}")))?;

        let outcome = tokio::time::timeout(timeout, read_page(&page, url, script))
            .await
            .unwrap_or_else(|_| Err(AppError::timeout(timeout)));

        if let Err(e) = page.close().await {
            tracing::debug!(%url, "Failed to close tab: {e}");
        }
        outcome
    }
}

async fn read_page(
    page: &Page,
    url: &str,
    script: Option<String>,
) -> Result<(Rendered, Option<String>), AppError> {
    page.goto(url)
        .await
        .map_err(|e| AppError::HttpError(format!("Failed to navigate to {url}: {e}")))?;

    page.find_element("body")
        .await
        .map_err(|e| AppError::HttpError(format!("Page did not render body: {e}")))?;

    let rendered = match script {
        Some(source) => {
            let value = page
                .evaluate(source)
                .await
                .map_err(|e| AppError::Script(e.to_string()))?
                .into_value::<serde_json::Value>()
                .map_err(|e| AppError::Script(format!("Script result is not JSON: {e}")))?;
            Rendered::Script(value)
        }
        None => Rendered::Html(page.content().await.map_err(|e| {
            AppError::HttpError(format!("Failed to read page content: {e}"))
        })?),
    };

    let final_url = page.url().await.ok().flatten();
    Ok((rendered, final_url))
}

impl Engine for BrowserEngine {
    async fn fetch(&self, job: &mut Job, ctx: &FetchContext) -> Result<(), AppError> {
        let timeout = job.req.timeout.unwrap_or(self.timeout);
        let script = match &ctx.script {
            Some(source) => Some(source.resolve(&job.req).await?),
            None => None,
        };

        let (rendered, final_url) = self.render(&job.req.url, script, timeout).await?;

        job.res.url = final_url;
        match rendered {
            Rendered::Script(value) => job.res.data = Some(value),
            Rendered::Html(html) => {
                job.res.data = ctx.parse(&html, &job.req)?;
                job.res.body = Some(html);
            }
        }
        Ok(())
    }
}

/// Locate a Chrome/Chromium binary, preferring `$CHROME_BIN`.
///
/// Snap-packaged Chromium ships a wrapper that strips headless flags, so the
/// real binary inside the snap is checked first. `None` leaves the lookup to
/// chromiumoxide.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use trawl_core::ScriptSource;
    use trawl_core::job::create_job;

    use super::*;

    async fn open_tabs(engine: &BrowserEngine) -> usize {
        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.browser.pages().await.unwrap().len()
    }

    fn with_script(source: &str) -> FetchContext {
        FetchContext {
            script: Some(ScriptSource::inline(source)),
            ..FetchContext::default()
        }
    }

    #[tokio::test]
    #[ignore = "needs a local Chromium"]
    async fn test_tab_closed_when_script_fails_or_times_out() {
        let engine = BrowserEngine::with_timeout(Duration::from_secs(10))
            .await
            .unwrap();
        let baseline = open_tabs(&engine).await;

        let mut job = create_job("about:blank".into(), None).unwrap();
        let err = engine
            .fetch(&mut job, &with_script("throw new Error('nope')"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Script(_)));
        assert_eq!(open_tabs(&engine).await, baseline);

        let mut job = create_job("about:blank".into(), None).unwrap();
        job.req.timeout = Some(Duration::from_millis(300));
        let err = engine
            .fetch(&mut job, &with_script("new Promise(() => {})"))
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Timeout(300));
        assert_eq!(open_tabs(&engine).await, baseline);
    }
}
