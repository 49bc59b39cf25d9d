use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use classifier_module::{OpenAiConfig, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL};

pub const DEFAULT_AGENT_NAME: &str = "basic-agent";
pub const DEFAULT_GMAIL_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";
pub const DEFAULT_GMAIL_QUERY: &str = "has:attachment";
pub const DEFAULT_PRINT_SUFFIXES: &[&str] = &[".pdf", ".html"];

const DEFAULT_LOOP_DELAY_SECS: u64 = 300;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 60;
const DEFAULT_GMAIL_PAGE_SIZE: u32 = 100;
const MAX_GMAIL_PAGE_SIZE: u32 = 500;
const DEFAULT_CLASSIFIER_MAX_INPUT_CHARS: usize = 48_000;
const DEFAULT_API_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PRINT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {key}")]
    MissingEnv { key: &'static str },
    #[error("required file not found: {}", path.display())]
    MissingFile { path: PathBuf },
    #[error("another agent instance holds {}", path.display())]
    LockHeld { path: PathBuf },
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Every file and directory the agent owns, derived from one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPaths {
    pub root: PathBuf,
    pub downloads_dir: PathBuf,
    pub results_dir: PathBuf,
    pub analysis_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub heartbeat_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub history_path: PathBuf,
    pub processed_messages_path: PathBuf,
    pub memory_path: PathBuf,
    pub unhandled_path: PathBuf,
    pub results_path: PathBuf,
    pub heartbeat_path: PathBuf,
    pub diagnostic_path: PathBuf,
    pub lock_path: PathBuf,
}

impl AgentPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let results_dir = root.join("results");
        let heartbeat_dir = root.join("heartbeat");
        Self {
            downloads_dir: root.join("downloads"),
            analysis_dir: root.join("analysis"),
            logs_dir: root.join("logs"),
            archive_dir: root.join("archive"),
            history_path: root.join("downloaded_attachments.json"),
            processed_messages_path: root.join("processed_messages.json"),
            memory_path: root.join("categorization_memory.json"),
            unhandled_path: root.join("unhandled_filedata.json"),
            results_path: results_dir.join("gmail_downloader.jsonl"),
            heartbeat_path: heartbeat_dir.join("agent.status.json"),
            diagnostic_path: heartbeat_dir.join("diagnostic.status.json"),
            lock_path: root.join("agent.lock"),
            results_dir,
            heartbeat_dir,
            root,
        }
    }

    pub fn directories(&self) -> [&Path; 6] {
        [
            &self.downloads_dir,
            &self.results_dir,
            &self.analysis_dir,
            &self.logs_dir,
            &self.heartbeat_dir,
            &self.archive_dir,
        ]
    }

    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        for dir in self.directories() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Read-only settings built once at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_name: String,
    pub paths: AgentPaths,
    pub loop_delay: Duration,
    pub heartbeat_interval: Duration,
    pub credentials_path: Option<PathBuf>,
    pub token_path: PathBuf,
    pub gmail_api_base_url: String,
    pub gmail_query: String,
    pub gmail_page_size: u32,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub classifier_max_input_chars: usize,
    pub api_timeout: Duration,
    pub printer_name: Option<String>,
    pub print_command: String,
    pub print_timeout: Duration,
    pub print_suffixes: Vec<String>,
}

impl AgentConfig {
    /// Defaults for every setting, rooted at `root`. Required credentials are unset.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let paths = AgentPaths::new(root);
        Self {
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            token_path: paths.root.join("token.json"),
            paths,
            loop_delay: Duration::from_secs(DEFAULT_LOOP_DELAY_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            credentials_path: None,
            gmail_api_base_url: DEFAULT_GMAIL_API_BASE_URL.to_string(),
            gmail_query: DEFAULT_GMAIL_QUERY.to_string(),
            gmail_page_size: DEFAULT_GMAIL_PAGE_SIZE,
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            classifier_max_input_chars: DEFAULT_CLASSIFIER_MAX_INPUT_CHARS,
            api_timeout: Duration::from_secs(DEFAULT_API_TIMEOUT_SECS),
            printer_name: None,
            print_command: print_task_module::DEFAULT_PRINT_COMMAND.to_string(),
            print_timeout: Duration::from_secs(DEFAULT_PRINT_TIMEOUT_SECS),
            print_suffixes: DEFAULT_PRINT_SUFFIXES
                .iter()
                .map(|suffix| suffix.to_string())
                .collect(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let root = match env_var_non_empty("AGENT_ROOT") {
            Some(raw) => resolve_path(raw)?,
            None => env::current_dir().map_err(|source| ConfigError::Io {
                path: PathBuf::from("."),
                source,
            })?,
        };
        let mut config = Self::with_root(root);

        if let Some(name) = env_var_non_empty("AGENT_NAME") {
            config.agent_name = name;
        }
        config.loop_delay = env_secs("AGENT_LOOP_DELAY_SECS", DEFAULT_LOOP_DELAY_SECS);
        config.heartbeat_interval = env_secs(
            "AGENT_HEARTBEAT_INTERVAL_SECS",
            DEFAULT_HEARTBEAT_INTERVAL_SECS,
        );

        config.credentials_path = env_var_non_empty("GMAIL_CREDENTIALS_PATH")
            .map(resolve_path)
            .transpose()?;
        if let Some(raw) = env_var_non_empty("GMAIL_TOKEN_PATH") {
            config.token_path = resolve_path(raw)?;
        }
        if let Some(base_url) = env_var_non_empty("GMAIL_API_BASE_URL") {
            config.gmail_api_base_url = base_url;
        }
        if let Some(query) = env_var_non_empty("GMAIL_QUERY") {
            config.gmail_query = query;
        }
        config.gmail_page_size = env_u64("GMAIL_PAGE_SIZE", DEFAULT_GMAIL_PAGE_SIZE as u64)
            .min(MAX_GMAIL_PAGE_SIZE as u64) as u32;

        config.openai_api_key = env_var_non_empty("OPENAI_API_KEY");
        if let Some(base_url) = env_var_non_empty("OPENAI_API_BASE_URL") {
            config.openai_base_url = base_url;
        }
        if let Some(model) = env_var_non_empty("OPENAI_MODEL") {
            config.openai_model = model;
        }
        config.classifier_max_input_chars = env_u64(
            "CLASSIFIER_MAX_INPUT_CHARS",
            DEFAULT_CLASSIFIER_MAX_INPUT_CHARS as u64,
        ) as usize;
        config.api_timeout = env_secs("API_TIMEOUT_SECS", DEFAULT_API_TIMEOUT_SECS);

        config.printer_name = env_var_non_empty("PRINTER_NAME");
        if let Some(command) = env_var_non_empty("PRINT_COMMAND") {
            config.print_command = command;
        }
        config.print_timeout = env_secs("PRINT_TIMEOUT_SECS", DEFAULT_PRINT_TIMEOUT_SECS);
        if let Some(raw) = env_var_non_empty("PRINT_SUFFIXES") {
            let suffixes = parse_suffixes(&raw);
            if !suffixes.is_empty() {
                config.print_suffixes = suffixes;
            }
        }

        Ok(config)
    }

    /// Credentials file path, or the error startup checks report when it is unset.
    pub fn require_credentials_path(&self) -> Result<&Path, ConfigError> {
        self.credentials_path
            .as_deref()
            .ok_or(ConfigError::MissingEnv {
                key: "GMAIL_CREDENTIALS_PATH",
            })
    }

    pub fn classifier_config(&self) -> Result<OpenAiConfig, ConfigError> {
        let api_key = self.openai_api_key.clone().ok_or(ConfigError::MissingEnv {
            key: "OPENAI_API_KEY",
        })?;
        let mut classifier = OpenAiConfig::new(api_key);
        classifier.base_url = self.openai_base_url.clone();
        classifier.model = self.openai_model.clone();
        classifier.timeout = self.api_timeout;
        Ok(classifier)
    }
}

/// Split a comma list like `pdf, .HTML` into `[".pdf", ".html"]`.
pub fn parse_suffixes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_ascii_lowercase())
        .filter(|item| !item.is_empty() && item != ".")
        .map(|item| {
            if item.starts_with('.') {
                item
            } else {
                format!(".{item}")
            }
        })
        .collect()
}

fn env_var_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_var_non_empty(key)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_u64(key, default))
}

fn resolve_path(raw: String) -> Result<PathBuf, ConfigError> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = env::current_dir().map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(cwd.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const KEYS: &[&str] = &[
        "AGENT_ROOT",
        "AGENT_NAME",
        "AGENT_LOOP_DELAY_SECS",
        "GMAIL_CREDENTIALS_PATH",
        "GMAIL_TOKEN_PATH",
        "GMAIL_PAGE_SIZE",
        "OPENAI_API_KEY",
        "PRINT_SUFFIXES",
        "PRINTER_NAME",
    ];

    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn clear() -> Self {
            let saved = KEYS
                .iter()
                .map(|key| {
                    let previous = env::var(key).ok();
                    env::remove_var(key);
                    (*key, previous)
                })
                .collect();
            Self { saved }
        }

        fn set(&self, key: &str, value: &str) {
            env::set_var(key, value);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, previous) in &self.saved {
                match previous {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn paths_follow_root_layout() {
        let paths = AgentPaths::new("/srv/agent");
        assert_eq!(paths.downloads_dir, PathBuf::from("/srv/agent/downloads"));
        assert_eq!(
            paths.results_path,
            PathBuf::from("/srv/agent/results/gmail_downloader.jsonl")
        );
        assert_eq!(
            paths.heartbeat_path,
            PathBuf::from("/srv/agent/heartbeat/agent.status.json")
        );
        assert_eq!(paths.lock_path, PathBuf::from("/srv/agent/agent.lock"));
    }

    #[test]
    fn from_env_applies_defaults_and_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let guard = EnvGuard::clear();
        let temp = tempfile::TempDir::new().unwrap();
        guard.set("AGENT_ROOT", temp.path().to_str().unwrap());
        guard.set("AGENT_LOOP_DELAY_SECS", "0");
        guard.set("GMAIL_PAGE_SIZE", "9000");
        guard.set("OPENAI_API_KEY", " sk-test ");
        guard.set("PRINT_SUFFIXES", "PDF, .Txt");
        guard.set("PRINTER_NAME", "office");

        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.paths.root, temp.path());
        assert_eq!(config.agent_name, DEFAULT_AGENT_NAME);
        assert_eq!(config.loop_delay, Duration::from_secs(300));
        assert_eq!(config.gmail_page_size, 500);
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.print_suffixes, vec![".pdf", ".txt"]);
        assert_eq!(config.printer_name.as_deref(), Some("office"));
        assert_eq!(config.token_path, temp.path().join("token.json"));
        assert!(config.credentials_path.is_none());
    }

    #[test]
    fn missing_required_values_are_reported_by_key() {
        let config = AgentConfig::with_root("/tmp/agent");
        match config.require_credentials_path() {
            Err(ConfigError::MissingEnv { key }) => assert_eq!(key, "GMAIL_CREDENTIALS_PATH"),
            other => panic!("unexpected: {other:?}"),
        }
        match config.classifier_config() {
            Err(ConfigError::MissingEnv { key }) => assert_eq!(key, "OPENAI_API_KEY"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_suffixes_normalizes_entries() {
        assert_eq!(parse_suffixes(" .PDF,html,, . "), vec![".pdf", ".html"]);
    }
}
