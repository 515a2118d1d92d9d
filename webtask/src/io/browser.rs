//! Browser control surface.
//!
//! The [`Browser`] trait is what the task loop drives. [`CdpBrowser`] talks
//! to an already running Chrome over the DevTools protocol; tests use
//! scripted browsers that never touch a real one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser as ChromeBrowser, Tab};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::types::BrowserAction;

/// Keep the DevTools connection open while a human authenticates.
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Text summary of the page: title, URL, interactive elements and visible text.
const SNAPSHOT_JS: &str = "(()=>{const lines=[];\
lines.push('Title: '+document.title);lines.push('URL: '+location.href);lines.push('');\
lines.push('Interactive elements:');\
const sel=(el)=>{if(el.id){return '#'+CSS.escape(el.id);}\
if(el.name){return el.tagName.toLowerCase()+'[name=\"'+el.name+'\"]';}\
const p=el.parentElement;if(!p){return el.tagName.toLowerCase();}\
const i=Array.prototype.indexOf.call(p.children,el)+1;\
return el.tagName.toLowerCase()+':nth-child('+i+')';};\
document.querySelectorAll('a,button,input,select,textarea,[role=button]').forEach((el)=>{\
const r=el.getBoundingClientRect();if(r.width===0&&r.height===0){return;}\
const label=(el.innerText||el.value||el.placeholder||el.getAttribute('aria-label')||'').trim().slice(0,80);\
lines.push('- '+el.tagName.toLowerCase()+(el.type?'['+el.type+']':'')+' '+sel(el)+(label?' \"'+label+'\"':''));});\
lines.push('');lines.push('Visible text:');lines.push((document.body&&document.body.innerText)||'');\
return lines.join('\\n');})()";

/// Result of a browser action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Text(String),
    /// PNG bytes from a `screenshot` action.
    Image(Vec<u8>),
}

/// Abstraction over a live browser session.
pub trait Browser {
    fn navigate(&self, url: &str) -> Result<()>;
    fn click(&self, selector: &str) -> Result<()>;
    fn type_text(&self, selector: &str, text: &str) -> Result<()>;
    /// Text rendering of the current page.
    fn snapshot(&self) -> Result<String>;
    /// Evaluate a script in the page and return its value as text.
    fn evaluate(&self, script: &str) -> Result<String>;
    /// PNG screenshot of the current viewport.
    fn screenshot(&self) -> Result<Vec<u8>>;

    /// Run one engine-requested action.
    fn perform(&self, action: &BrowserAction) -> Result<Observation> {
        match action {
            BrowserAction::Navigate { url } => {
                self.navigate(url)?;
                Ok(Observation::Text(format!("navigated to {url}")))
            }
            BrowserAction::Click { selector } => {
                self.click(selector)?;
                Ok(Observation::Text(format!("clicked {selector}")))
            }
            BrowserAction::Type { selector, text } => {
                self.type_text(selector, text)?;
                Ok(Observation::Text(format!(
                    "typed {} characters into {selector}",
                    text.chars().count()
                )))
            }
            BrowserAction::Snapshot => self.snapshot().map(Observation::Text),
            BrowserAction::Evaluate { script } => self.evaluate(script).map(Observation::Text),
            BrowserAction::Screenshot => self.screenshot().map(Observation::Image),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Ask the DevTools HTTP endpoint for the browser websocket URL.
pub fn debugger_ws_url(cdp_port: u16) -> Result<String> {
    let url = format!("http://127.0.0.1:{cdp_port}/json/version");
    let info: VersionInfo = reqwest::blocking::get(&url)
        .with_context(|| format!("request {url}"))?
        .error_for_status()
        .with_context(|| format!("request {url}"))?
        .json()
        .with_context(|| format!("parse {url}"))?;
    Ok(info.web_socket_debugger_url)
}

/// Browser session over the Chrome DevTools protocol.
pub struct CdpBrowser {
    /// Owns the websocket connection the tab runs over.
    _browser: ChromeBrowser,
    tab: Arc<Tab>,
}

impl CdpBrowser {
    /// Attach to Chrome listening on `cdp_port` and open a fresh tab.
    #[instrument(skip_all, fields(cdp_port))]
    pub fn connect(cdp_port: u16) -> Result<Self> {
        let ws_url = debugger_ws_url(cdp_port)?;
        debug!(ws_url = %ws_url, "connecting to chrome");
        let browser = ChromeBrowser::connect_with_timeout(ws_url, IDLE_CONNECTION_TIMEOUT)
            .map_err(|e| anyhow!("connect to chrome on port {cdp_port}: {e}"))?;
        let tab = browser
            .new_tab()
            .map_err(|e| anyhow!("open chrome tab: {e}"))?;
        info!(cdp_port, "connected to chrome");
        Ok(Self {
            _browser: browser,
            tab,
        })
    }
}

impl Browser for CdpBrowser {
    fn navigate(&self, url: &str) -> Result<()> {
        debug!(url, "navigating");
        self.tab
            .navigate_to(url)
            .map_err(|e| anyhow!("navigate to {url}: {e}"))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| anyhow!("wait for {url}: {e}"))?;
        Ok(())
    }

    fn click(&self, selector: &str) -> Result<()> {
        let element = self
            .tab
            .wait_for_element(selector)
            .map_err(|e| anyhow!("element not found: {selector}: {e}"))?;
        element
            .click()
            .map_err(|e| anyhow!("click {selector}: {e}"))?;
        Ok(())
    }

    fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let element = self
            .tab
            .wait_for_element(selector)
            .map_err(|e| anyhow!("element not found: {selector}: {e}"))?;
        element
            .click()
            .map_err(|e| anyhow!("focus {selector}: {e}"))?;
        element
            .type_into(text)
            .map_err(|e| anyhow!("type into {selector}: {e}"))?;
        Ok(())
    }

    fn snapshot(&self) -> Result<String> {
        self.evaluate(SNAPSHOT_JS)
    }

    fn evaluate(&self, script: &str) -> Result<String> {
        let result = self
            .tab
            .evaluate(script, true)
            .map_err(|e| anyhow!("evaluate script: {e}"))?;
        Ok(match result.value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text,
            Some(other) => other.to_string(),
        })
    }

    fn screenshot(&self) -> Result<Vec<u8>> {
        self.tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| anyhow!("capture screenshot: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingBrowser {
        calls: RefCell<Vec<String>>,
    }

    impl Browser for RecordingBrowser {
        fn navigate(&self, url: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("navigate {url}"));
            Ok(())
        }
        fn click(&self, selector: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("click {selector}"));
            Err(anyhow!("element not found: {selector}"))
        }
        fn type_text(&self, selector: &str, text: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("type {selector} {text}"));
            Ok(())
        }
        fn snapshot(&self) -> Result<String> {
            Ok("Title: Example Domain".to_string())
        }
        fn evaluate(&self, script: &str) -> Result<String> {
            Ok(script.len().to_string())
        }
        fn screenshot(&self) -> Result<Vec<u8>> {
            Ok(vec![0x89, b'P', b'N', b'G'])
        }
    }

    #[test]
    fn perform_dispatches_actions() {
        let browser = RecordingBrowser::default();
        let out = browser
            .perform(&BrowserAction::Type {
                selector: "input[name=\"q\"]".to_string(),
                text: "rust".to_string(),
            })
            .expect("type");
        assert_eq!(
            out,
            Observation::Text("typed 4 characters into input[name=\"q\"]".to_string())
        );
        assert_eq!(
            browser.perform(&BrowserAction::Snapshot).expect("snapshot"),
            Observation::Text("Title: Example Domain".to_string())
        );
        assert!(matches!(
            browser.perform(&BrowserAction::Screenshot).expect("shot"),
            Observation::Image(bytes) if bytes.len() == 4
        ));
        assert_eq!(
            browser.calls.borrow().as_slice(),
            ["type input[name=\"q\"] rust".to_string()]
        );
    }

    #[test]
    fn perform_propagates_browser_errors() {
        let browser = RecordingBrowser::default();
        let err = browser
            .perform(&BrowserAction::Click {
                selector: "#missing".to_string(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("element not found: #missing"));
    }

    #[test]
    fn snapshot_script_is_an_iife() {
        assert!(SNAPSHOT_JS.starts_with("(()=>{"));
        assert!(SNAPSHOT_JS.ends_with("})()"));
    }
}
