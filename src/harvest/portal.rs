//! The invoice-page seam the harvester drives.

use std::time::Duration;

use async_trait::async_trait;

use crate::browser::dom::{option_entries, select_by_value, wait_for_element};
use crate::browser::{Session, UiError};
use crate::config::{PortalSettings, WaitSettings};

const ACCOUNT_SELECT: &str = "select[name='BAN']";
const INVOICE_SELECT: &str = "select[name='billDueDate']";
const DOWNLOAD_TRIGGER: &str = "input[src='/webbow/images/bot_ok.gif']";
const SCROLL_SETTLE: Duration = Duration::from_millis(500);

/// One entry of the invoice selector: the raw compound date token and
/// the text shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceOption {
    pub value: String,
    pub label: String,
}

/// Operations the harvester needs from the invoice page.
///
/// Implemented live against the browser session, and by scripted fakes
/// in the integration tests. Every mutating selection may re-render
/// the page, so implementations report invalidated element references
/// as [`UiError::Stale`] and callers re-drive the operation.
#[async_trait]
pub trait InvoicePortal: Send + Sync {
    /// Navigate to the invoice listing and wait for the account
    /// selector to appear.
    async fn open_invoice_page(&self) -> Result<(), UiError>;

    /// Snapshot the identifiers of every selectable billing account.
    async fn account_ids(&self) -> Result<Vec<String>, UiError>;

    /// Re-locate the account selector and select `account` by value.
    async fn select_account(&self, account: &str) -> Result<(), UiError>;

    /// Enumerate the invoice options currently offered for the
    /// selected account.
    async fn invoice_options(&self) -> Result<Vec<InvoiceOption>, UiError>;

    /// Make the option carrying `value` the active selection.
    async fn select_invoice(&self, value: &str) -> Result<(), UiError>;

    /// Click the download trigger for the active selection.
    async fn request_download(&self) -> Result<(), UiError>;
}

/// Live portal backed by the authenticated session.
pub struct LivePortal<'s> {
    session: &'s Session,
    portal: PortalSettings,
    waits: WaitSettings,
}

impl<'s> LivePortal<'s> {
    pub fn new(session: &'s Session, portal: PortalSettings, waits: WaitSettings) -> Self {
        Self {
            session,
            portal,
            waits,
        }
    }
}

#[async_trait]
impl InvoicePortal for LivePortal<'_> {
    async fn open_invoice_page(&self) -> Result<(), UiError> {
        let page = self.session.page();
        page.goto(self.portal.invoices_url.as_str()).await?;
        wait_for_element(page, ACCOUNT_SELECT, self.waits.page_ready).await?;
        Ok(())
    }

    async fn account_ids(&self) -> Result<Vec<String>, UiError> {
        let page = self.session.page();
        wait_for_element(page, ACCOUNT_SELECT, self.waits.element_wait).await?;
        let entries = option_entries(page, ACCOUNT_SELECT).await?;
        Ok(entries
            .into_iter()
            .map(|(value, _)| value)
            .filter(|value| !value.is_empty())
            .collect())
    }

    async fn select_account(&self, account: &str) -> Result<(), UiError> {
        let page = self.session.page();
        wait_for_element(page, ACCOUNT_SELECT, self.waits.element_wait).await?;
        select_by_value(page, ACCOUNT_SELECT, account).await
    }

    async fn invoice_options(&self) -> Result<Vec<InvoiceOption>, UiError> {
        let page = self.session.page();
        wait_for_element(page, INVOICE_SELECT, self.waits.element_wait).await?;
        let entries = option_entries(page, INVOICE_SELECT).await?;
        Ok(entries
            .into_iter()
            .map(|(value, label)| InvoiceOption { value, label })
            .collect())
    }

    async fn select_invoice(&self, value: &str) -> Result<(), UiError> {
        let page = self.session.page();
        wait_for_element(page, INVOICE_SELECT, self.waits.element_wait).await?;
        select_by_value(page, INVOICE_SELECT, value).await
    }

    async fn request_download(&self) -> Result<(), UiError> {
        let page = self.session.page();
        let trigger = wait_for_element(page, DOWNLOAD_TRIGGER, self.waits.element_wait).await?;
        trigger
            .scroll_into_view()
            .await
            .map_err(|err| crate::browser::classify(DOWNLOAD_TRIGGER, err))?;
        // Let any scroll animation finish before the click lands.
        tokio::time::sleep(SCROLL_SETTLE).await;
        trigger
            .click()
            .await
            .map_err(|err| crate::browser::classify(DOWNLOAD_TRIGGER, err))?;
        Ok(())
    }
}
