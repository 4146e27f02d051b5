use anyhow::{anyhow, Context, Result};
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::{browser::default_executable, Browser, LaunchOptions, Tab};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};

use crate::types::PageResult;

// absolute urls of every <script src>, in document order
const SCRIPT_SOURCES_JS: &str = r#"JSON.stringify(
    Array.from(document.querySelectorAll("script"))
        .map((s) => s.src)
        .filter((src) => !!src)
)"#;

// chrome fires it once no more than 2 connections were open for 500ms
const NETWORK_ALMOST_IDLE: &str = "networkAlmostIdle";

/// Loads a single page and reports the scripts it ended up with.
pub trait PageInspector: Send + Sync {
    fn inspect(&self, url: &str) -> Result<PageResult>;
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct InspectorOptions {
    // bounds every browser call, including the wait for network idle
    #[builder(default = "Duration::from_secs(30)")]
    timeout: Duration,
    #[builder(default = "(1920, 1080)")]
    window_size: (u32, u32),
    #[builder(default = "self.default_sandbox()")]
    sandbox: bool,
}

impl InspectorOptions {
    pub fn default_builder() -> InspectorOptionsBuilder {
        InspectorOptionsBuilder::default()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl InspectorOptionsBuilder {
    fn default_sandbox(&self) -> bool {
        // chrome cannot sandbox itself inside most containers
        std::env::var("IN_DOCKER").is_err()
    }
}

/// Launches a brand new browser for every inspected page.
pub struct ChromeInspector {
    options: InspectorOptions,
}

impl ChromeInspector {
    pub fn new(options: InspectorOptions) -> Self {
        ChromeInspector { options }
    }
}

impl PageInspector for ChromeInspector {
    fn inspect(&self, url: &str) -> Result<PageResult> {
        let browser = BrowserController::new(&self.options)?;
        // the browser process is killed when `browser` goes out of scope,
        // whichever way we leave this function
        browser.inspect(url)
    }
}

/// Follows the main navigation of a tab: its redirects and whether its
/// network has settled.
#[derive(Debug, Default)]
struct NavigationState {
    main_loader: Option<String>,
    redirects: Vec<String>,
    network_almost_idle: bool,
}

impl NavigationState {
    fn on_event(&mut self, event: &Event) {
        match event {
            Event::NetworkRequestWillBeSent(e) => {
                let params = &e.params;
                // navigation requests share their id with the loader
                if self.main_loader.is_none() && params.request_id == params.loader_id {
                    self.main_loader = Some(params.loader_id.clone());
                }
                if params.redirect_response.is_some()
                    && self.main_loader.as_ref() == Some(&params.request_id)
                {
                    self.redirects.push(params.request.url.clone());
                }
            }
            Event::PageLifecycleEvent(e) => {
                if e.params.name == NETWORK_ALMOST_IDLE
                    && self.main_loader.as_ref() == Some(&e.params.loader_id)
                {
                    self.network_almost_idle = true;
                }
            }
            _ => {}
        }
    }

    fn final_url(&self, requested_url: &str) -> String {
        self.redirects
            .last()
            .cloned()
            .unwrap_or_else(|| requested_url.to_string())
    }
}

type SharedNavigation = Arc<(Mutex<NavigationState>, Condvar)>;

pub struct BrowserController {
    browser: Browser,
    options: InspectorOptions,
}

impl BrowserController {
    pub fn new(options: &InspectorOptions) -> Result<Self> {
        let executable = default_executable().map_err(|e| anyhow!(e))?;
        let launch_options = LaunchOptions::default_builder()
            .path(Some(executable))
            .window_size(Some(options.window_size))
            .idle_browser_timeout(options.timeout)
            // warning only do this if in docker env
            .sandbox(options.sandbox)
            .build()
            .map_err(|e| anyhow!("invalid browser launch options: {}", e))?;
        let browser = Browser::new(launch_options).context("browser launching error")?;

        Ok(BrowserController {
            browser,
            options: options.clone(),
        })
    }

    pub fn inspect(&self, url: &str) -> Result<PageResult> {
        // we create a new incognito window (no context)
        let ctx = self
            .browser
            .new_context()
            .context("could not create incognito context")?;
        let tab = ctx.new_tab().context("could not create new tab")?;
        tab.set_default_timeout(self.options.timeout);

        let navigation: SharedNavigation = Arc::new((
            Mutex::new(NavigationState::default()),
            Condvar::new(),
        ));
        let listener_state = navigation.clone();
        tab.add_event_listener(Arc::new(move |event: &Event| {
            let (state, settled) = &*listener_state;
            if let Ok(mut state) = state.lock() {
                state.on_event(event);
                if state.network_almost_idle {
                    settled.notify_all();
                }
            }
        }))
        .context("could not listen to network events")?;
        // registering a response handler switches the Network domain on
        tab.register_response_handling("network-idle", Box::new(|_params, _fetch_body| {}))
            .context("could not enable network events")?;

        debug!("navigating to {}", url);
        tab.navigate_to(url)
            .context(format!("could not navigate to {}", url))?
            .wait_until_navigated()
            .context(format!("navigation to {} did not complete", url))?;

        wait_for_network_idle(&navigation, self.options.timeout, url)?;

        let scripts = Self::script_sources(&tab)
            .context(format!("could not list the scripts of {}", url))?;

        let final_url = {
            let state = navigation
                .0
                .lock()
                .map_err(|_| anyhow!("navigation state poisoned for {}", url))?;
            if !state.redirects.is_empty() {
                debug!("{} redirected through {:?}", url, state.redirects);
            }
            state.final_url(url)
        };

        Ok(PageResult {
            requested_url: url.to_string(),
            final_url,
            scripts,
        })
    }

    fn script_sources(tab: &Arc<Tab>) -> Result<Vec<String>> {
        let res = tab.evaluate(SCRIPT_SOURCES_JS, false)?;
        match res.value {
            Some(serde_json::Value::String(json)) => Ok(serde_json::from_str(&json)?),
            other => Err(anyhow!("unexpected script list {:?}", other)),
        }
    }

    pub fn kill(&self) -> bool {
        let pid = match self.browser.get_process_id() {
            Some(pid) => pid,
            None => return false,
        };
        let mut s = System::new();
        let pid = Pid::from_u32(pid);
        if !s.refresh_process(pid) {
            return false;
        }
        if let Some(process) = s.process(pid) {
            debug!("killing process with id {}", pid);
            return process.kill();
        }
        false
    }
}

/// Blocks until the main navigation reports `networkAlmostIdle`.
fn wait_for_network_idle(navigation: &SharedNavigation, timeout: Duration, url: &str) -> Result<()> {
    let (state, settled) = &**navigation;
    let state = state
        .lock()
        .map_err(|_| anyhow!("navigation state poisoned for {}", url))?;
    let (state, _) = settled
        .wait_timeout_while(state, timeout, |s| !s.network_almost_idle)
        .map_err(|_| anyhow!("navigation state poisoned for {}", url))?;
    if !state.network_almost_idle {
        return Err(anyhow!(
            "timed out after {:?} waiting for network idle on {}",
            timeout,
            url
        ));
    }
    debug!("network idle on {}", url);
    Ok(())
}

impl Drop for BrowserController {
    fn drop(&mut self) {
        debug!("killing browser process...");
        self.kill();
    }
}
