//! Tipos de erro para o cliente WebDriver.
//!
//! Define [`WebDriverError`] e a classificação que decide se uma falha
//! derrubou a sessão inteira ou apenas o passo atual.

use thiserror::Error;

use crate::error::StepError;

/// Códigos de erro do protocolo que indicam que a sessão não existe mais.
const SESSION_GONE: &[&str] = &["invalid session id", "no such window", "session not created"];

/// Erros que podem ocorrer ao conversar com o servidor WebDriver.
#[derive(Debug, Error)]
pub enum WebDriverError {
    /// Erro retornado pelo servidor (ex.: `no such element`, `timeout`).
    #[error("webdriver error `{error}` (status {status}): {message}")]
    Protocol {
        status: u16,
        error: String,
        message: String,
    },

    /// Falha de rede subjacente (conexão recusada, timeout, DNS).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Resposta que não segue o formato do protocolo.
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl WebDriverError {
    /// Verdadeiro quando o navegador ou o driver não responde mais pela sessão.
    ///
    /// Timeouts de requisição contam como falha do passo, não da sessão.
    pub fn is_session_lost(&self) -> bool {
        match self {
            WebDriverError::Protocol { error, .. } => SESSION_GONE.contains(&error.as_str()),
            WebDriverError::Network(e) => !e.is_timeout(),
            WebDriverError::Unexpected(_) => false,
        }
    }

    pub fn is_no_such_element(&self) -> bool {
        matches!(self, WebDriverError::Protocol { error, .. } if error == "no such element")
    }

    /// Converte em [`StepError`] atribuído ao passo `step`.
    pub fn at_step(self, step: &str) -> StepError {
        if self.is_session_lost() {
            StepError::session_lost(step, self.to_string())
        } else {
            StepError::failed(step, self.to_string())
        }
    }
}
