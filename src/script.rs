//! Configurable browser step sequence.
//!
//! A [`ScriptConfig`] is an ordered list of named steps read from the
//! `[script]` section of `rondo.toml`. [`ScriptedSequence`] replays it against
//! a [`BrowserSession`] for every item. Step values are templates over
//! `{id}`, `{date}` and `{field.NAME}`.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::engine::{Completion, StepSequence};
use crate::error::{RondoError, StepError};
use crate::item::PreparedItem;
use crate::webdriver::{BrowserSession, WebDriverClient, WebDriverError};

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptConfig {
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
}

/// One named step; the name is what failures and the ledger report.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptStep {
    pub name: String,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Navigate {
        url: String,
    },
    WaitFor {
        selector: String,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        #[serde(default = "default_poll_ms")]
        poll_ms: u64,
    },
    Clear {
        selector: String,
    },
    Type {
        selector: String,
        value: String,
    },
    Click {
        selector: String,
    },
    /// Click when the element shows up in time, otherwise move on.
    OptionalClick {
        selector: String,
        #[serde(default = "default_optional_timeout_ms")]
        timeout_ms: u64,
        #[serde(default = "default_poll_ms")]
        poll_ms: u64,
    },
    /// Wait for an operator to fill a field (e.g. a captcha), up to `timeout_ms`.
    WaitUntilFilled {
        selector: String,
        #[serde(default = "default_min_len")]
        min_len: usize,
        #[serde(default = "default_fill_timeout_ms")]
        timeout_ms: u64,
        #[serde(default = "default_poll_ms")]
        poll_ms: u64,
    },
    Pause {
        ms: u64,
    },
    /// The item counts as already handled when `selector` appears in time.
    DetectHandled {
        selector: String,
        #[serde(default = "default_optional_timeout_ms")]
        timeout_ms: u64,
        #[serde(default = "default_poll_ms")]
        poll_ms: u64,
    },
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_optional_timeout_ms() -> u64 {
    2_000
}

fn default_fill_timeout_ms() -> u64 {
    120_000
}

fn default_poll_ms() -> u64 {
    250
}

fn default_min_len() -> usize {
    1
}

/// Expand `{id}`, `{date}` and `{field.NAME}` in `template`.
///
/// Returns `None` when the template names a field the item does not carry,
/// which turns the step into a no-op. Unknown placeholders are kept verbatim.
pub fn render(template: &str, item: &PreparedItem) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Some(out);
        };
        let key = &after[..end];
        match key {
            "id" => out.push_str(item.id()),
            "date" => out.push_str(&item.date),
            _ => match key.strip_prefix("field.") {
                Some(name) => out.push_str(&item.field(name)?.to_string()),
                None => {
                    out.push('{');
                    out.push_str(key);
                    out.push('}');
                }
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Some(out)
}

/// Poll `check` until it yields a value or `timeout` runs out.
async fn poll_until<T, F, Fut>(
    timeout: Duration,
    poll: Duration,
    mut check: F,
) -> Result<Option<T>, WebDriverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, WebDriverError>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(found) = check().await? {
            return Ok(Some(found));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        sleep(poll.min(deadline - now)).await;
    }
}

async fn find_optional(
    client: &WebDriverClient,
    session: &str,
    selector: &str,
) -> Result<Option<String>, WebDriverError> {
    match client.find_element(session, selector).await {
        Ok(element) => Ok(Some(element)),
        Err(e) if e.is_no_such_element() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Replays a [`ScriptConfig`] inside a browser session.
pub struct ScriptedSequence {
    steps: Vec<ScriptStep>,
}

impl ScriptedSequence {
    /// The first step must navigate so every attempt starts from a fresh page.
    pub fn new(config: ScriptConfig) -> Result<Self, RondoError> {
        let Some(first) = config.steps.first() else {
            return Err(RondoError::Config("[script] has no steps".into()));
        };
        if !matches!(first.action, Action::Navigate { .. }) {
            return Err(RondoError::Config(format!(
                "first script step `{}` must be a navigate action",
                first.name
            )));
        }
        Ok(Self {
            steps: config.steps,
        })
    }

    async fn run_step(
        &self,
        session: &BrowserSession,
        step: &ScriptStep,
        item: &PreparedItem,
    ) -> Result<Option<Completion>, StepError> {
        let client = session.client();
        let sid = session.id();
        let name = step.name.as_str();
        let at = |e: WebDriverError| e.at_step(name);

        match &step.action {
            Action::Navigate { url } => {
                let Some(url) = render(url, item) else {
                    return Ok(None);
                };
                client.navigate(sid, &url).await.map_err(at)?;
            }
            Action::WaitFor {
                selector,
                timeout_ms,
                poll_ms,
            } => {
                let found = poll_until(
                    Duration::from_millis(*timeout_ms),
                    Duration::from_millis(*poll_ms),
                    || async move { find_optional(client, sid, selector).await },
                )
                .await
                .map_err(at)?;
                if found.is_none() {
                    return Err(StepError::failed(
                        name,
                        format!("timed out after {timeout_ms}ms waiting for `{selector}`"),
                    ));
                }
            }
            Action::Clear { selector } => {
                let element = client.find_element(sid, selector).await.map_err(at)?;
                client.clear(sid, &element).await.map_err(at)?;
            }
            Action::Type { selector, value } => {
                let Some(text) = render(value, item) else {
                    debug!(item_id = item.id(), step = name, "optional field absent, step skipped");
                    return Ok(None);
                };
                let element = client.find_element(sid, selector).await.map_err(at)?;
                client.send_keys(sid, &element, &text).await.map_err(at)?;
            }
            Action::Click { selector } => {
                let element = client.find_element(sid, selector).await.map_err(at)?;
                client.click(sid, &element).await.map_err(at)?;
            }
            Action::OptionalClick {
                selector,
                timeout_ms,
                poll_ms,
            } => {
                let found = poll_until(
                    Duration::from_millis(*timeout_ms),
                    Duration::from_millis(*poll_ms),
                    || async move { find_optional(client, sid, selector).await },
                )
                .await
                .map_err(at)?;
                if let Some(element) = found {
                    client.click(sid, &element).await.map_err(at)?;
                }
            }
            Action::WaitUntilFilled {
                selector,
                min_len,
                timeout_ms,
                poll_ms,
            } => {
                let element = client.find_element(sid, selector).await.map_err(at)?;
                let element = element.as_str();
                let min_len = *min_len;
                let filled = poll_until(
                    Duration::from_millis(*timeout_ms),
                    Duration::from_millis(*poll_ms),
                    || async move {
                        client
                            .property(sid, element, "value")
                            .await
                            .map(|value| value.filter(|v| v.trim().chars().count() >= min_len))
                    },
                )
                .await
                .map_err(at)?;
                if filled.is_none() {
                    return Err(StepError::failed(
                        name,
                        format!("`{selector}` was not filled within {timeout_ms}ms"),
                    ));
                }
            }
            Action::Pause { ms } => sleep(Duration::from_millis(*ms)).await,
            Action::DetectHandled {
                selector,
                timeout_ms,
                poll_ms,
            } => {
                let found = poll_until(
                    Duration::from_millis(*timeout_ms),
                    Duration::from_millis(*poll_ms),
                    || async move { find_optional(client, sid, selector).await },
                )
                .await
                .map_err(at)?;
                if found.is_some() {
                    return Ok(Some(Completion::AlreadyHandled));
                }
            }
        }
        Ok(None)
    }
}

impl StepSequence<BrowserSession> for ScriptedSequence {
    async fn execute(
        &self,
        handle: &mut BrowserSession,
        item: &PreparedItem,
    ) -> Result<Completion, StepError> {
        for step in &self.steps {
            debug!(item_id = item.id(), step = step.name.as_str(), "running step");
            if let Some(completion) = self.run_step(handle, step, item).await? {
                return Ok(completion);
            }
        }
        Ok(Completion::Done)
    }
}
