//! Browser-backed sessions for the pool.

use std::sync::Arc;

use tracing::{debug, warn};

use super::client::WebDriverClient;
use crate::error::SessionError;
use crate::session::{Placement, SessionFactory, SessionHandle};

pub struct WebDriverFactory {
    client: Arc<WebDriverClient>,
    browser: String,
}

impl WebDriverFactory {
    pub fn new(client: WebDriverClient, browser: impl Into<String>) -> Self {
        Self {
            client: Arc::new(client),
            browser: browser.into(),
        }
    }
}

impl SessionFactory for WebDriverFactory {
    type Handle = BrowserSession;

    async fn create(&self, slot: usize, placement: Placement) -> Result<BrowserSession, SessionError> {
        let id = self
            .client
            .new_session(&self.browser)
            .await
            .map_err(|e| SessionError::Create {
                slot,
                message: e.to_string(),
            })?;
        debug!(slot, session = %id, "browser session created");

        // A window that refuses to move is still usable.
        if let Err(e) = self.client.set_window_rect(&id, placement).await {
            warn!(slot, error = %e, "could not place browser window");
        }

        Ok(BrowserSession {
            client: Arc::clone(&self.client),
            id,
        })
    }
}

/// One remote browser session.
pub struct BrowserSession {
    client: Arc<WebDriverClient>,
    id: String,
}

impl BrowserSession {
    pub fn client(&self) -> &WebDriverClient {
        &self.client
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl SessionHandle for BrowserSession {
    async fn probe(&mut self) -> Result<(), SessionError> {
        self.client
            .current_url(&self.id)
            .await
            .map(|_| ())
            .map_err(|e| SessionError::Probe(e.to_string()))
    }

    async fn close(self) -> Result<(), SessionError> {
        self.client
            .delete_session(&self.id)
            .await
            .map_err(|e| SessionError::Close(e.to_string()))
    }
}
