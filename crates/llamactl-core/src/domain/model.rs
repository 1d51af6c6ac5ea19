//! Model definitions and engine command-line parameters.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Number;

/// Parameter names rendered with a single dash (`-ngl 99` rather than `--ngl 99`).
pub const SHORT_FLAGS: &[&str] = &[
    "c", "t", "n", "b", "e", "s", "l", "j", "r", "v", "m", "a", "ngl", "tb", "ub", "np", "sm",
    "ts", "mg", "mu", "sp", "cb", "to", "fa", "nr", "dt", "lv", "dev", "hf", "dr", "td", "cd",
    "md", "mv", "nkvo", "ctk", "ctv", "nocb", "ngld", "cmoe", "ncmoe", "cmoed", "ncmoed", "hfr",
    "hff", "hft", "hfd", "hfv", "hffv", "hfrd", "hfrv", "jf", "otd", "sps", "tbd", "devd", "kvu",
];

/// Render a parameter name as a command-line flag.
pub fn flag_for(name: &str) -> String {
    if SHORT_FLAGS.contains(&name) {
        format!("-{name}")
    } else {
        format!("--{name}")
    }
}

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(Number),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Value of an engine parameter.
///
/// `null` and `[]` are boolean flags, a list repeats the flag per element,
/// anything else is a single `flag value` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CliValue {
    Flag,
    List(Vec<Scalar>),
    Scalar(Scalar),
}

impl CliValue {
    fn push_args(&self, flag: &str, args: &mut Vec<String>) {
        match self {
            Self::Flag => args.push(flag.to_string()),
            Self::List(items) if items.is_empty() => args.push(flag.to_string()),
            Self::List(items) => {
                for item in items {
                    args.push(flag.to_string());
                    args.push(item.to_string());
                }
            }
            Self::Scalar(value) => {
                args.push(flag.to_string());
                args.push(value.to_string());
            }
        }
    }
}

impl From<Scalar> for CliValue {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

/// Engine parameters for one model.
///
/// The structured fields are the older configuration format; they are
/// folded into `cli_params` by [`ModelParameters::migrate_legacy`] when the
/// configuration is loaded and are not read afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_ctx: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_gpu_layers: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_threads: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f64>,

    pub cli_params: BTreeMap<String, CliValue>,
}

impl ModelParameters {
    /// Move the structured fields into `cli_params`.
    ///
    /// A legacy field is dropped without effect when `cli_params` already
    /// sets the same option under its long or short name.
    pub fn migrate_legacy(&mut self) {
        let unsigned = |value: u64| Scalar::Number(value.into());
        let float = |value: f64| Number::from_f64(value).map(Scalar::Number);

        let migrations: [(&str, &[&str], Option<Scalar>); 7] = [
            ("ctx-size", &["c"], self.n_ctx.take().map(unsigned)),
            ("n-gpu-layers", &["ngl"], self.n_gpu_layers.take().map(unsigned)),
            ("threads", &["t"], self.n_threads.take().map(unsigned)),
            ("temp", &[], self.temperature.take().and_then(float)),
            ("top-p", &[], self.top_p.take().and_then(float)),
            ("top-k", &[], self.top_k.take().map(unsigned)),
            ("repeat-penalty", &[], self.repeat_penalty.take().and_then(float)),
        ];

        for (name, aliases, value) in migrations {
            let Some(value) = value else { continue };
            let present = self.cli_params.contains_key(name)
                || aliases.iter().any(|alias| self.cli_params.contains_key(*alias));
            if !present {
                self.cli_params
                    .insert(name.to_string(), CliValue::Scalar(value));
            }
        }
    }

    /// Render `cli_params` as engine arguments.
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (name, value) in &self.cli_params {
            value.push_args(&flag_for(name), &mut args);
        }
        args
    }

    pub fn has_legacy_fields(&self) -> bool {
        self.n_ctx.is_some()
            || self.n_gpu_layers.is_some()
            || self.n_threads.is_some()
            || self.temperature.is_some()
            || self.top_p.is_some()
            || self.top_k.is_some()
            || self.repeat_penalty.is_some()
    }
}

/// Descriptive metadata shown in model listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelMetadata {
    pub description: String,
    pub parameter_count: String,
    pub quantization: String,
    pub family: String,
    pub capabilities: Vec<String>,
}

/// A configured model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Unique identifier (`[A-Za-z0-9_-]+`).
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Path to the `.gguf` / `.bin` artifact.
    pub path: PathBuf,
    #[serde(default)]
    pub parameters: ModelParameters,
    #[serde(default)]
    pub metadata: ModelMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(json: &str) -> ModelParameters {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn renders_flags_lists_and_values() {
        let p = params(
            r#"{"cli_params": {
                "ngl": 99,
                "context-shift": null,
                "no-webui": [],
                "lora": ["a.gguf", "b.gguf"],
                "temp": 0.7,
                "jinja": true
            }}"#,
        );
        assert_eq!(
            p.to_cli_args(),
            vec![
                "--context-shift",
                "--jinja",
                "true",
                "--lora",
                "a.gguf",
                "--lora",
                "b.gguf",
                "-ngl",
                "99",
                "--no-webui",
                "--temp",
                "0.7",
            ]
        );
    }

    #[test]
    fn short_table_uses_single_dash() {
        assert_eq!(flag_for("c"), "-c");
        assert_eq!(flag_for("kvu"), "-kvu");
        assert_eq!(flag_for("ctx-size"), "--ctx-size");
    }

    #[test]
    fn legacy_fields_migrate_once() {
        let mut p = params(r#"{"n_ctx": 4096, "n_gpu_layers": 99, "temperature": 0.5}"#);
        assert!(p.has_legacy_fields());
        p.migrate_legacy();
        assert!(!p.has_legacy_fields());
        assert_eq!(
            p.to_cli_args(),
            vec!["--ctx-size", "4096", "--n-gpu-layers", "99", "--temp", "0.5"]
        );
    }

    #[test]
    fn legacy_field_yields_to_alias() {
        let mut p = params(r#"{"n_ctx": 4096, "n_threads": 8, "cli_params": {"c": 8192, "threads": 4}}"#);
        p.migrate_legacy();
        assert_eq!(p.to_cli_args(), vec!["-c", "8192", "--threads", "4"]);
    }

    #[test]
    fn model_config_defaults_optional_sections() {
        let model: ModelConfig =
            serde_json::from_str(r#"{"id": "m1", "name": "Model", "path": "/m/a.gguf"}"#).unwrap();
        assert!(model.parameters.cli_params.is_empty());
        assert!(model.metadata.description.is_empty());
    }
}
