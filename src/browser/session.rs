//! The authenticated browser session: launch, login, teardown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use secrecy::ExposeSecret;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{BrowserSettings, Credentials, PortalSettings, WaitSettings, BROWSER_ENV};

use super::dom::{wait_for_element, wait_for_location};
use super::{classify, UiError};

const LOGIN_USER_SELECTOR: &str = "input[name='userVO.loginCode']";
const LOGIN_PASSWORD_SELECTOR: &str = "input[name='userVO.password']";
const LOGIN_SUBMIT_SELECTOR: &str = ".GifButtonPtr";
const POST_LOGIN_DIALOG_CLOSE: &str = ".close-btn";
const WINDOW_POLL: Duration = Duration::from_millis(250);

/// An exclusive, authenticated browser session.
///
/// Exactly one page is active at a time and all navigation goes
/// through it. The portal opens a second window on login, so the
/// active page is replaced once after a successful credential submit.
pub struct Session {
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
    staging_dir: PathBuf,
    // Held so the throwaway profile outlives the browser process.
    _profile_dir: tempfile::TempDir,
}

impl Session {
    /// Launch the browser with downloads routed into `staging_dir`.
    pub async fn launch(settings: &BrowserSettings, staging_dir: &Path) -> Result<Self> {
        let executable = resolve_executable(settings)?;
        info!(executable = %executable, headless = settings.headless, "launching browser");

        let profile_dir =
            tempfile::TempDir::new().context("Failed to create browser profile directory")?;
        write_profile_preferences(profile_dir.path(), staging_dir)?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(&executable)
            .viewport(None)
            .user_data_dir(profile_dir.path())
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-gpu")
            .arg("--disable-notifications")
            .arg("--disable-popup-blocking");
        if !settings.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to configure browser: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let page = browser.new_page("about:blank").await?;
        route_downloads(&page, staging_dir).await?;
        dismiss_unexpected_dialogs(&page).await?;

        Ok(Self {
            browser,
            handler_task,
            page,
            staging_dir: staging_dir.to_path_buf(),
            _profile_dir: profile_dir,
        })
    }

    /// The active page all navigation goes through.
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Authenticate against the portal.
    ///
    /// Submitting credentials opens a second window; the session blocks
    /// (bounded) until it exists, makes it the active page, then blocks
    /// again until the landing marker shows up in the URL. `Ok(false)`
    /// on either timeout so the caller can abort the run cleanly.
    pub async fn login(
        &mut self,
        portal: &PortalSettings,
        waits: &WaitSettings,
        credentials: &Credentials,
    ) -> Result<bool> {
        self.page.goto(portal.login_url.as_str()).await?;
        debug!(url = %portal.login_url, "login page requested");

        let username =
            wait_for_element(&self.page, LOGIN_USER_SELECTOR, waits.element_wait).await?;
        username.focus().await?;
        username.type_str(&credentials.login).await?;

        let password = self
            .page
            .find_element(LOGIN_PASSWORD_SELECTOR)
            .await
            .map_err(|err| classify(LOGIN_PASSWORD_SELECTOR, err))?;
        password.focus().await?;
        password.type_str(credentials.password.expose_secret()).await?;

        let submit = self
            .page
            .find_element(LOGIN_SUBMIT_SELECTOR)
            .await
            .map_err(|err| classify(LOGIN_SUBMIT_SELECTOR, err))?;
        submit.click().await?;
        info!("credentials submitted");

        if !self.switch_to_new_window(waits.window_wait).await? {
            error!("login window never opened");
            return Ok(false);
        }

        if !wait_for_location(&self.page, &portal.landing_marker, waits.element_wait).await? {
            error!(marker = %portal.landing_marker, "post-login landing page never appeared");
            return Ok(false);
        }
        info!("login landing reached");

        self.dismiss_post_login_dialog(waits.dialog_wait).await;

        Ok(true)
    }

    /// Wait for a second window to open and make it the active page.
    async fn switch_to_new_window(&mut self, timeout: Duration) -> Result<bool> {
        let original = self.page.target_id().clone();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let pages = self.browser.pages().await?;
            if let Some(page) = pages.into_iter().find(|p| *p.target_id() != original) {
                page.bring_to_front().await?;
                // Download routing and dialog handling are per target;
                // the new window needs its own before any download is
                // triggered from it.
                route_downloads(&page, &self.staging_dir).await?;
                dismiss_unexpected_dialogs(&page).await?;
                self.page = page;
                debug!("switched to newly opened window");
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(WINDOW_POLL).await;
        }
    }

    /// Best-effort dismissal of the optional informational dialog shown
    /// after login. Absence within the bound is success.
    async fn dismiss_post_login_dialog(&self, timeout: Duration) {
        match wait_for_element(&self.page, POST_LOGIN_DIALOG_CLOSE, timeout).await {
            Ok(close) => match close.click().await {
                Ok(_) => info!("dismissed post-login dialog"),
                Err(err) => warn!(error = %err, "failed to dismiss post-login dialog"),
            },
            Err(UiError::Timeout { .. }) => debug!("no post-login dialog"),
            Err(err) => warn!(error = %err, "unexpected failure probing for post-login dialog"),
        }
    }

    /// Tear the session down. Runs on every exit path, regardless of
    /// run outcome.
    pub async fn close(self) {
        let Session {
            browser,
            handler_task,
            _profile_dir,
            ..
        } = self;
        drop(browser);
        handler_task.abort();
    }
}

/// Chrome reads these once at profile creation: password-manager
/// surfaces are disabled and PDFs download instead of rendering in the
/// viewer.
fn write_profile_preferences(profile_dir: &Path, staging_dir: &Path) -> Result<()> {
    let default_dir = profile_dir.join("Default");
    std::fs::create_dir_all(&default_dir).with_context(|| {
        format!(
            "Failed to create profile directory: {}",
            default_dir.display()
        )
    })?;

    let preferences = serde_json::json!({
        "credentials_enable_service": false,
        "profile": {
            "password_manager_enabled": false,
        },
        "download": {
            "default_directory": staging_dir.display().to_string(),
            "prompt_for_download": false,
            "directory_upgrade": true,
        },
        "plugins": {
            "always_open_pdf_externally": true,
        },
    });

    let path = default_dir.join("Preferences");
    std::fs::write(&path, serde_json::to_string(&preferences)?)
        .with_context(|| format!("Failed to write profile preferences: {}", path.display()))?;
    Ok(())
}

/// Cancel any JavaScript dialog the portal throws up unprompted; an
/// unanswered dialog would block every subsequent protocol command.
async fn dismiss_unexpected_dialogs(page: &Page) -> Result<()> {
    let mut dialogs = page.event_listener::<EventJavascriptDialogOpening>().await?;
    let page = page.clone();
    tokio::spawn(async move {
        while let Some(dialog) = dialogs.next().await {
            warn!(message = %dialog.message, "dismissing unexpected dialog");
            let _ = page.execute(HandleJavaScriptDialogParams::new(false)).await;
        }
    });
    Ok(())
}

async fn route_downloads(page: &Page, staging_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(staging_dir).with_context(|| {
        format!(
            "Failed to create staging directory: {}",
            staging_dir.display()
        )
    })?;

    let params = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::Allow)
        .download_path(staging_dir.display().to_string())
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build download params: {e}"))?;
    page.execute(params).await?;

    Ok(())
}

fn resolve_executable(settings: &BrowserSettings) -> Result<String> {
    if let Some(path) = &settings.executable {
        return Ok(path.display().to_string());
    }
    if let Ok(path) = std::env::var(BROWSER_ENV) {
        if !path.is_empty() {
            return Ok(path);
        }
    }
    find_browser().with_context(|| {
        format!("Chrome/Chromium not found; set [browser].executable or {BROWSER_ENV}")
    })
}

/// Probe PATH and the usual install locations for a Chrome/Chromium
/// binary.
fn find_browser() -> Option<String> {
    for name in ["google-chrome", "chromium"] {
        if let Ok(output) = std::process::Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(path);
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/run/current-system/sw/bin/chromium",
    ];
    candidates
        .into_iter()
        .find(|candidate| Path::new(candidate).exists())
        .map(|candidate| candidate.to_string())
}
