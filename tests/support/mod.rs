use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use contafetch::browser::UiError;
use contafetch::harvest::{InvoiceOption, InvoicePortal};

const INVOICE_SELECT: &str = "select[name='billDueDate']";

/// How a fake invoice behaves once its download is requested.
#[derive(Debug, Clone)]
pub enum FakeDownload {
    /// Write `name` into staging after `delay`.
    File { name: String, delay: Duration },
    /// Leave an in-progress marker in staging for the whole watch
    /// window.
    NeverCompletes,
}

#[derive(Debug, Clone)]
pub struct FakeInvoice {
    pub option: InvoiceOption,
    pub download: FakeDownload,
}

impl FakeInvoice {
    pub fn new(value: &str, label: &str, download: FakeDownload) -> Self {
        Self {
            option: InvoiceOption {
                value: value.to_string(),
                label: label.to_string(),
            },
            download,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeAccount {
    pub id: String,
    pub invoices: Vec<FakeInvoice>,
}

impl FakeAccount {
    pub fn new(id: &str, invoices: Vec<FakeInvoice>) -> Self {
        Self {
            id: id.to_string(),
            invoices,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    selected_account: Option<String>,
    selected_invoice: Option<String>,
    stale_invoice_options: u32,
    invoice_options_calls: u32,
    download_requests: u32,
}

/// Scripted invoice portal: canned accounts and options, optional
/// staleness injection, downloads simulated by dropping files into the
/// staging directory.
pub struct FakePortal {
    staging_dir: PathBuf,
    accounts: Vec<FakeAccount>,
    state: Mutex<State>,
}

impl FakePortal {
    pub fn new(staging_dir: &Path, accounts: Vec<FakeAccount>) -> Self {
        Self {
            staging_dir: staging_dir.to_path_buf(),
            accounts,
            state: Mutex::new(State::default()),
        }
    }

    /// Fail the next `count` invoice enumerations with a stale
    /// reference before succeeding.
    pub fn with_stale_invoice_options(self, count: u32) -> Self {
        self.state.lock().unwrap().stale_invoice_options = count;
        self
    }

    pub fn invoice_options_calls(&self) -> u32 {
        self.state.lock().unwrap().invoice_options_calls
    }

    pub fn download_requests(&self) -> u32 {
        self.state.lock().unwrap().download_requests
    }

    fn selected_account(&self) -> Option<FakeAccount> {
        let state = self.state.lock().unwrap();
        let id = state.selected_account.clone()?;
        self.accounts.iter().find(|a| a.id == id).cloned()
    }
}

#[async_trait]
impl InvoicePortal for FakePortal {
    async fn open_invoice_page(&self) -> Result<(), UiError> {
        Ok(())
    }

    async fn account_ids(&self) -> Result<Vec<String>, UiError> {
        Ok(self.accounts.iter().map(|a| a.id.clone()).collect())
    }

    async fn select_account(&self, account: &str) -> Result<(), UiError> {
        if !self.accounts.iter().any(|a| a.id == account) {
            return Err(UiError::NotFound {
                selector: format!("account option {account}"),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.selected_account = Some(account.to_string());
        state.selected_invoice = None;
        Ok(())
    }

    async fn invoice_options(&self) -> Result<Vec<InvoiceOption>, UiError> {
        {
            let mut state = self.state.lock().unwrap();
            state.invoice_options_calls += 1;
            if state.stale_invoice_options > 0 {
                state.stale_invoice_options -= 1;
                return Err(UiError::Stale {
                    selector: INVOICE_SELECT.to_string(),
                });
            }
        }

        let account = self.selected_account().ok_or(UiError::NotFound {
            selector: INVOICE_SELECT.to_string(),
        })?;
        Ok(account
            .invoices
            .iter()
            .map(|invoice| invoice.option.clone())
            .collect())
    }

    async fn select_invoice(&self, value: &str) -> Result<(), UiError> {
        let account = self.selected_account().ok_or(UiError::NotFound {
            selector: INVOICE_SELECT.to_string(),
        })?;
        if !account.invoices.iter().any(|i| i.option.value == value) {
            return Err(UiError::NotFound {
                selector: format!("invoice option {value}"),
            });
        }
        self.state.lock().unwrap().selected_invoice = Some(value.to_string());
        Ok(())
    }

    async fn request_download(&self) -> Result<(), UiError> {
        let selected = self
            .state
            .lock()
            .unwrap()
            .selected_invoice
            .clone()
            .ok_or(UiError::NotFound {
                selector: "download trigger".to_string(),
            })?;

        let account = self.selected_account().ok_or(UiError::NotFound {
            selector: "download trigger".to_string(),
        })?;
        let invoice = account
            .invoices
            .iter()
            .find(|i| i.option.value == selected)
            .ok_or(UiError::NotFound {
                selector: "download trigger".to_string(),
            })?;

        self.state.lock().unwrap().download_requests += 1;

        match &invoice.download {
            FakeDownload::File { name, delay } => {
                let path = self.staging_dir.join(name);
                let delay = *delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    std::fs::write(&path, b"%PDF-1.4 fake invoice").unwrap();
                });
            }
            FakeDownload::NeverCompletes => {
                std::fs::write(
                    self.staging_dir.join("fatura.pdf.crdownload"),
                    b"partial",
                )
                .unwrap();
            }
        }

        Ok(())
    }
}
