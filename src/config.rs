//! Configuração do rondo carregada a partir de `rondo.toml`.
//!
//! A struct [`RondoConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `RONDO_WEBDRIVER_URL` tem precedência sobre o arquivo,
//! e as flags da CLI têm precedência sobre ambos.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engine::{RetryConfig, ScheduleConfig};
use crate::error::RondoError;
use crate::script::ScriptConfig;
use crate::session::Layout;

/// Arquivo lido quando `--config` não é informado.
pub const DEFAULT_CONFIG_FILE: &str = "rondo.toml";

/// Configuração de nível superior carregada de `rondo.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct RondoConfig {
    /// Número de sessões paralelas (tamanho do pool).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Política de retentativa por item.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Pausas entre rodadas e recuperação do pool.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Posicionamento das janelas na tela.
    #[serde(default)]
    pub layout: Layout,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub webdriver: WebDriverConfig,

    /// Sequência de passos executada no navegador; obrigatória para `run`.
    #[serde(default)]
    pub script: Option<ScriptConfig>,
}

/// Onde o ledger de conclusões é gravado.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

/// Conexão com o servidor WebDriver (chromedriver, geckodriver, Selenium).
#[derive(Debug, Clone, Deserialize)]
pub struct WebDriverConfig {
    #[serde(default = "default_webdriver_url")]
    pub url: String,

    #[serde(default = "default_browser")]
    pub browser: String,

    /// Timeout de cada requisição HTTP, em segundos.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Valor padrão para o tamanho do pool: 4 sessões.
fn default_pool_size() -> usize {
    4
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("logs/ledger.jsonl")
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_browser() -> String {
    "chrome".to_string()
}

// Valor padrão para o timeout de requisição: 30s.
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: default_webdriver_url(),
            browser: default_browser(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for RondoConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            retry: RetryConfig::default(),
            schedule: ScheduleConfig::default(),
            layout: Layout::default(),
            ledger: LedgerConfig::default(),
            webdriver: WebDriverConfig::default(),
            script: None,
        }
    }
}

/// Valores vindos da linha de comando que sobrescrevem o arquivo.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub pool_size: Option<usize>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub ledger: Option<PathBuf>,
}

impl RondoConfig {
    /// Carrega a configuração de `path`, ou de `rondo.toml` no diretório atual.
    /// Usa valores padrão se o arquivo implícito não existir; um arquivo
    /// informado explicitamente precisa existir.
    pub fn load(path: Option<&Path>) -> Result<Self, RondoError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração para a URL.
        if let Ok(url) = std::env::var("RONDO_WEBDRIVER_URL")
            && !url.is_empty()
        {
            config.webdriver.url = url;
        }

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, RondoError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RondoError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(toml::from_str::<RondoConfig>(&contents)?)
    }

    /// Aplica as flags da CLI por cima dos valores carregados.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(n) = overrides.pool_size {
            self.pool_size = n;
        }
        if let Some(n) = overrides.max_attempts {
            self.retry.max_attempts = n;
        }
        if let Some(ms) = overrides.base_delay_ms {
            self.retry.base_delay_ms = ms;
        }
        if let Some(path) = &overrides.ledger {
            self.ledger.path = path.clone();
        }
    }

    /// Rejeita valores que deixariam o motor sem sessões ou sem tentativas.
    pub fn validate(&self) -> Result<(), RondoError> {
        if self.pool_size == 0 {
            return Err(RondoError::Config("pool_size must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(RondoError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        let layout = &self.layout;
        if layout.columns == 0 || layout.screen_width == 0 || layout.screen_height == 0 {
            return Err(RondoError::Config(
                "layout columns and screen dimensions must be non-zero".into(),
            ));
        }
        if layout.scale_factor.is_nan() || layout.scale_factor <= 0.0 {
            return Err(RondoError::Config(
                "layout.scale_factor must be positive".into(),
            ));
        }
        if self.webdriver.request_timeout_secs == 0 {
            return Err(RondoError::Config(
                "webdriver.request_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BackoffPolicy;

    #[test]
    fn default_config_values() {
        let config = RondoConfig::default();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.schedule.pool_recovery_deadline_secs, 300);
        assert_eq!(config.ledger.path, PathBuf::from("logs/ledger.jsonl"));
        assert_eq!(config.webdriver.browser, "chrome");
        assert!(config.script.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r##"
            pool_size = 2

            [retry]
            max_attempts = 5
            policy = "exponential"

            [ledger]
            path = "out/done.jsonl"

            [[script.steps]]
            name = "open"
            action = "navigate"
            url = "https://example.test/{id}"
        "##;
        let config: RondoConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.policy, BackoffPolicy::Exponential);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.ledger.path, PathBuf::from("out/done.jsonl"));
        assert_eq!(config.layout.columns, 2);
        assert_eq!(config.script.map(|s| s.steps.len()), Some(1));
    }

    #[test]
    fn example_config_is_valid() {
        let config: RondoConfig =
            toml::from_str(include_str!("../rondo.example.toml")).unwrap();
        config.validate().unwrap();
        let script = config.script.unwrap();
        assert!(crate::script::ScriptedSequence::new(script).is_ok());
    }

    #[test]
    fn overrides_win_over_file() {
        let mut config = RondoConfig::default();
        config.apply(&Overrides {
            pool_size: Some(8),
            max_attempts: None,
            base_delay_ms: Some(10),
            ledger: Some(PathBuf::from("elsewhere.jsonl")),
        });
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 10);
        assert_eq!(config.ledger.path, PathBuf::from("elsewhere.jsonl"));
    }

    #[test]
    fn validate_rejects_zero_values() {
        let mut config = RondoConfig::default();
        config.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = RondoConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = RondoConfig::default();
        config.layout.columns = 0;
        assert!(config.validate().is_err());

        let mut config = RondoConfig::default();
        config.layout.scale_factor = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "pool_size = 3\n").unwrap();
        let config = RondoConfig::load(Some(&path)).unwrap();
        assert_eq!(config.pool_size, 3);
    }

    #[test]
    fn load_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RondoConfig::load(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
