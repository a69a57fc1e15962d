pub mod client;
pub mod error;
pub mod session;
pub mod types;

pub use client::WebDriverClient;
pub use error::WebDriverError;
pub use session::{BrowserSession, WebDriverFactory};
