//! Page-level helpers shared by login and harvesting.

use std::time::Duration;

use chromiumoxide::{Element, Page};

use super::{classify, UiError};

const ELEMENT_POLL: Duration = Duration::from_millis(250);

/// Wait (bounded) for an element matching `selector` to be present.
///
/// Absence while the bound is still running is expected and keeps
/// polling; any driver failure other than "not there yet" propagates
/// immediately.
pub async fn wait_for_element(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Result<Element, UiError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match page.find_element(selector).await {
            Ok(element) => return Ok(element),
            Err(err) => match classify(selector, err) {
                UiError::NotFound { .. } | UiError::Stale { .. } => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(UiError::Timeout {
                            what: format!("element {selector}"),
                            timeout,
                        });
                    }
                    tokio::time::sleep(ELEMENT_POLL).await;
                }
                other => return Err(other),
            },
        }
    }
}

/// Wait (bounded) for the page URL to contain `marker`. `false` means
/// the bound elapsed, which callers treat as a structural failure of
/// the current step, not an error.
pub async fn wait_for_location(
    page: &Page,
    marker: &str,
    timeout: Duration,
) -> Result<bool, UiError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let url = page
            .url()
            .await
            .map_err(|err| classify("page location", err))?
            .unwrap_or_default();
        if url.contains(marker) {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(ELEMENT_POLL).await;
    }
}

/// Select an option on a `<select>` by value and fire its change
/// handler. Going through script is the one portable way to drive a
/// select over the protocol, and it is immune to option-element
/// staleness from list re-renders.
pub async fn select_by_value(page: &Page, selector: &str, value: &str) -> Result<(), UiError> {
    let script = format!(
        r#"(function() {{
            const select = document.querySelector({sel});
            if (!select) return false;
            select.value = {val};
            select.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return true;
        }})()"#,
        sel = js_string(selector),
        val = js_string(value),
    );

    let found = page
        .evaluate(script)
        .await
        .map_err(|err| classify(selector, err))?
        .into_value::<bool>()
        .map_err(|err| UiError::Script {
            selector: selector.to_string(),
            message: err.to_string(),
        })?;

    if found {
        Ok(())
    } else {
        Err(UiError::NotFound {
            selector: selector.to_string(),
        })
    }
}

/// Read `(value, text)` for every option under `selector`.
pub async fn option_entries(
    page: &Page,
    selector: &str,
) -> Result<Vec<(String, String)>, UiError> {
    let option_selector = format!("{selector} option");
    let elements = page
        .find_elements(option_selector.clone())
        .await
        .map_err(|err| classify(&option_selector, err))?;

    let mut entries = Vec::with_capacity(elements.len());
    for element in elements {
        let value = element
            .attribute("value")
            .await
            .map_err(|err| classify(&option_selector, err))?
            .unwrap_or_default();
        let text = element
            .inner_text()
            .await
            .map_err(|err| classify(&option_selector, err))?
            .unwrap_or_default();
        entries.push((value, text.trim().to_string()));
    }
    Ok(entries)
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_quotes_and_escapes() {
        assert_eq!(js_string("plain"), "\"plain\"");
        assert_eq!(js_string("a\"b"), "\"a\\\"b\"");
        assert_eq!(
            js_string("select[name='BAN']"),
            "\"select[name='BAN']\""
        );
    }
}
