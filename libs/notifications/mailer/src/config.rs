//! Email client configuration

use crate::transporter::ProviderOptions;
use core_config::{env_optional, env_required, env_with_prefix, ConfigError, FromEnv};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

/// Configuration consumed by [`EmailClient`](crate::EmailClient)
///
/// Everything besides `transporter` and `template_dir` is handed to the
/// provider adapter untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EmailClientConfig {
    /// Provider id, e.g. `mailgun`
    pub transporter: String,
    #[serde(default, alias = "templateDir")]
    pub template_dir: Option<PathBuf>,
    #[serde(flatten)]
    pub options: ProviderOptions,
}

impl EmailClientConfig {
    pub fn new(transporter: impl Into<String>) -> Self {
        Self {
            transporter: transporter.into(),
            ..Default::default()
        }
    }

    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = Some(dir.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// `EMAIL_*` variables read by the client or CLI, never passed to providers
const CLIENT_KEYS: &[&str] = &["transporter", "template_dir", "from"];

impl FromEnv for EmailClientConfig {
    /// `EMAIL_TRANSPORTER` is required, `EMAIL_TEMPLATE_DIR` is optional and
    /// every other `EMAIL_*` variable except `EMAIL_FROM` becomes a
    /// lower-cased provider option.
    fn from_env() -> Result<Self, ConfigError> {
        let transporter = env_required("EMAIL_TRANSPORTER")?;
        let template_dir = env_optional("EMAIL_TEMPLATE_DIR").map(PathBuf::from);

        let options = env_with_prefix("EMAIL_")
            .into_iter()
            .filter(|(key, _)| !CLIENT_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key, Value::String(value)))
            .collect();

        Ok(Self {
            transporter,
            template_dir,
            options,
        })
    }
}
