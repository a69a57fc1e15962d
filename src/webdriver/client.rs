use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use super::error::WebDriverError;
use super::types::{
    BrowserMatch, Capabilities, ElementRef, Envelope, ErrorValue, LocatorRequest,
    NavigateRequest, NewSessionRequest, NewSessionValue, SendKeysRequest,
};
use crate::session::Placement;

/// Thin W3C WebDriver client. One instance is shared by every session in the pool.
pub struct WebDriverClient {
    client: Client,
    base_url: String,
}

impl WebDriverClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, WebDriverError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, WebDriverError> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let value = serde_json::from_str::<Envelope<ErrorValue>>(&body)
                .map(|e| e.value)
                .unwrap_or(ErrorValue {
                    error: "unknown error".to_string(),
                    message: body,
                });
            return Err(WebDriverError::Protocol {
                status: status.as_u16(),
                error: value.error,
                message: value.message,
            });
        }

        serde_json::from_str::<Envelope<T>>(&body)
            .map(|e| e.value)
            .map_err(|e| WebDriverError::Unexpected(e.to_string()))
    }

    pub async fn new_session(&self, browser: &str) -> Result<String, WebDriverError> {
        let req = NewSessionRequest {
            capabilities: Capabilities {
                always_match: BrowserMatch {
                    browser_name: browser.to_string(),
                },
            },
        };
        let value: NewSessionValue = self
            .send(self.client.post(self.url("session")).json(&req))
            .await?;
        Ok(value.session_id)
    }

    pub async fn delete_session(&self, session: &str) -> Result<(), WebDriverError> {
        let _: serde_json::Value = self
            .send(self.client.delete(self.url(&format!("session/{session}"))))
            .await?;
        Ok(())
    }

    pub async fn set_window_rect(
        &self,
        session: &str,
        placement: Placement,
    ) -> Result<(), WebDriverError> {
        let _: serde_json::Value = self
            .send(
                self.client
                    .post(self.url(&format!("session/{session}/window/rect")))
                    .json(&placement),
            )
            .await?;
        Ok(())
    }

    pub async fn navigate(&self, session: &str, url: &str) -> Result<(), WebDriverError> {
        let req = NavigateRequest {
            url: url.to_string(),
        };
        let _: serde_json::Value = self
            .send(
                self.client
                    .post(self.url(&format!("session/{session}/url")))
                    .json(&req),
            )
            .await?;
        Ok(())
    }

    pub async fn current_url(&self, session: &str) -> Result<String, WebDriverError> {
        self.send(self.client.get(self.url(&format!("session/{session}/url"))))
            .await
    }

    /// Look up a single element by CSS selector and return its opaque reference.
    pub async fn find_element(&self, session: &str, css: &str) -> Result<String, WebDriverError> {
        let req = LocatorRequest {
            using: "css selector",
            value: css.to_string(),
        };
        let element: ElementRef = self
            .send(
                self.client
                    .post(self.url(&format!("session/{session}/element")))
                    .json(&req),
            )
            .await?;
        Ok(element.id)
    }

    pub async fn send_keys(
        &self,
        session: &str,
        element: &str,
        text: &str,
    ) -> Result<(), WebDriverError> {
        let req = SendKeysRequest {
            text: text.to_string(),
        };
        let _: serde_json::Value = self
            .send(
                self.client
                    .post(self.url(&format!("session/{session}/element/{element}/value")))
                    .json(&req),
            )
            .await?;
        Ok(())
    }

    pub async fn clear(&self, session: &str, element: &str) -> Result<(), WebDriverError> {
        self.element_command(session, element, "clear").await
    }

    pub async fn click(&self, session: &str, element: &str) -> Result<(), WebDriverError> {
        self.element_command(session, element, "click").await
    }

    async fn element_command(
        &self,
        session: &str,
        element: &str,
        command: &str,
    ) -> Result<(), WebDriverError> {
        let _: serde_json::Value = self
            .send(
                self.client
                    .post(self.url(&format!("session/{session}/element/{element}/{command}")))
                    .json(&serde_json::json!({})),
            )
            .await?;
        Ok(())
    }

    /// Read a DOM property as text. Non-string values come back as `None`.
    pub async fn property(
        &self,
        session: &str,
        element: &str,
        name: &str,
    ) -> Result<Option<String>, WebDriverError> {
        let value: serde_json::Value = self
            .send(
                self.client
                    .get(self.url(&format!("session/{session}/element/{element}/property/{name}"))),
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }
}
