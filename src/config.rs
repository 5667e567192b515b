//! Configuração do fluentctl carregada a partir de `fluentctl.toml`.
//!
//! A struct [`FluentConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `FLUENTCTL_CAPABILITIES` tem precedência sobre o
//! arquivo para o caminho do registro de capacidades.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::FluentError;
use crate::orchestrator::DeckMode;
use crate::policy::{RiskLevel, RiskPolicy, UserRole};

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "fluentctl.toml";

/// Variável de ambiente que sobrescreve `capabilities_path`.
pub const CAPABILITIES_ENV: &str = "FLUENTCTL_CAPABILITIES";

/// Configuração de nível superior carregada de `fluentctl.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct FluentConfig {
    /// Caminho do documento de capacidades (TOML ou JSON).
    #[serde(default = "default_capabilities_path")]
    pub capabilities_path: PathBuf,

    /// Classe de líquido usada quando nem o passo nem o job definem uma.
    #[serde(default = "default_liquid_class")]
    pub default_liquid_class: String,

    /// Papel assumido quando a CLI não recebe `--role`.
    #[serde(default = "default_role")]
    pub default_role: UserRole,

    /// Se jobs concluídos atualizam o deck compartilhado.
    #[serde(default)]
    pub deck_mode: DeckMode,

    /// Número de workers concorrentes que drenam a fila.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Ajustes da política de risco.
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Tabela `[policy]`: níveis por operação e limiar de escalonamento.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    /// Sobrescreve o mapeamento padrão operação → nível de risco.
    #[serde(default)]
    pub levels: BTreeMap<String, RiskLevel>,

    /// Transferências acima deste volume (uL) exigem confirmação.
    #[serde(default)]
    pub confirm_above_ul: Option<f64>,
}

impl PolicyConfig {
    /// Constrói a [`RiskPolicy`] efetiva a partir dos defaults.
    pub fn to_policy(&self) -> RiskPolicy {
        RiskPolicy::default()
            .with_overrides(&self.levels)
            .with_confirm_threshold(self.confirm_above_ul)
    }
}

// Valor padrão para o registro: "capabilities.toml".
fn default_capabilities_path() -> PathBuf {
    PathBuf::from("capabilities.toml")
}

// Valor padrão para a classe de líquido: "Water".
fn default_liquid_class() -> String {
    crate::compiler::DEFAULT_LIQUID_CLASS.to_string()
}

// Valor padrão para o papel: operador.
fn default_role() -> UserRole {
    UserRole::Operator
}

// Valor padrão para workers: 1.
fn default_workers() -> usize {
    1
}

impl Default for FluentConfig {
    fn default() -> Self {
        Self {
            capabilities_path: default_capabilities_path(),
            default_liquid_class: default_liquid_class(),
            default_role: default_role(),
            deck_mode: DeckMode::default(),
            workers: default_workers(),
            policy: PolicyConfig::default(),
        }
    }
}

impl FluentConfig {
    /// Carrega a configuração de `fluentctl.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Carrega a configuração de `path`, caindo nos defaults se o arquivo
    /// não existir.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<FluentConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Ok(capabilities) = std::env::var(CAPABILITIES_ENV)
            && !capabilities.is_empty()
        {
            config.capabilities_path = PathBuf::from(capabilities);
        }

        if config.workers == 0 {
            return Err(FluentError::Config("workers must be at least 1".to_string()).into());
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = FluentConfig::default();
        assert_eq!(config.capabilities_path, PathBuf::from("capabilities.toml"));
        assert_eq!(config.default_liquid_class, "Water");
        assert_eq!(config.default_role, UserRole::Operator);
        assert_eq!(config.deck_mode, DeckMode::Isolated);
        assert_eq!(config.workers, 1);
        assert!(config.policy.levels.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            default_liquid_class = "DMSO"
            deck_mode = "shared"
            workers = 4

            [policy]
            confirm_above_ul = 500.0

            [policy.levels]
            wash = "confirm"
        "#;
        let config: FluentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.default_liquid_class, "DMSO");
        assert_eq!(config.deck_mode, DeckMode::Shared);
        assert_eq!(config.workers, 4);
        assert_eq!(config.default_role, UserRole::Operator);
        assert_eq!(config.policy.levels["wash"], RiskLevel::Confirm);
        assert_eq!(config.policy.confirm_above_ul, Some(500.0));
    }

    #[test]
    fn policy_table_builds_risk_policy() {
        use crate::ir::{IrStep, Operation, WashArgs};

        let policy = PolicyConfig {
            levels: BTreeMap::from([("wash".to_string(), RiskLevel::Block)]),
            confirm_above_ul: None,
        }
        .to_policy();
        let wash = IrStep::new("w", Operation::Wash(WashArgs::default()));
        assert_eq!(policy.classify(&wash), RiskLevel::Block);
        assert_eq!(
            policy.classify(&IrStep::new("d", Operation::Decontaminate)),
            RiskLevel::Confirm
        );
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_role = \"supervisor\"").unwrap();
        let config = FluentConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_role, UserRole::Supervisor);
    }

    #[test]
    fn load_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers = \"many\"").unwrap();
        assert!(FluentConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn zero_workers_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers = 0").unwrap();
        let err = FluentConfig::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("workers must be at least 1"));
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FluentConfig::load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.workers, 1);
    }
}
