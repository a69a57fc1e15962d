//! Tipos de dados para requisições e respostas do protocolo W3C WebDriver.
//!
//! Toda resposta do servidor vem embrulhada em `{"value": ...}`; o
//! [`Envelope`] desembrulha esse formato para qualquer tipo de carga.

use serde::{Deserialize, Serialize};

/// Envelope padrão das respostas do WebDriver.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub value: T,
}

/// Corpo da requisição para `POST /session`.
#[derive(Debug, Clone, Serialize)]
pub struct NewSessionRequest {
    pub capabilities: Capabilities,
}

/// Capacidades exigidas do navegador.
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    #[serde(rename = "alwaysMatch")]
    pub always_match: BrowserMatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowserMatch {
    #[serde(rename = "browserName")]
    pub browser_name: String,
}

/// Resposta de `POST /session`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSessionValue {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Corpo de erro retornado pelo servidor (ex.: `no such element`).
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorValue {
    pub error: String,
    #[serde(default)]
    pub message: String,
}

/// Estratégia de localização de elementos; sempre seletor CSS aqui.
#[derive(Debug, Clone, Serialize)]
pub struct LocatorRequest {
    pub using: &'static str,
    pub value: String,
}

/// Referência opaca a um elemento da página. A chave é fixa no protocolo.
#[derive(Debug, Clone, Deserialize)]
pub struct ElementRef {
    #[serde(rename = "element-6066-11e4-a52e-4f735466cecf")]
    pub id: String,
}

/// Texto a ser digitado em um elemento.
#[derive(Debug, Clone, Serialize)]
pub struct SendKeysRequest {
    pub text: String,
}

/// Corpo de `POST /session/{id}/url`.
#[derive(Debug, Clone, Serialize)]
pub struct NavigateRequest {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_ref_uses_protocol_key() {
        let json = r#"{"value": {"element-6066-11e4-a52e-4f735466cecf": "el-1"}}"#;
        let parsed: Envelope<ElementRef> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.value.id, "el-1");
    }

    #[test]
    fn new_session_request_shape() {
        let req = NewSessionRequest {
            capabilities: Capabilities {
                always_match: BrowserMatch {
                    browser_name: "chrome".into(),
                },
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["capabilities"]["alwaysMatch"]["browserName"], "chrome");
    }
}
