pub mod analyzer;
pub mod config;
pub mod dispatcher;
pub mod extract;
pub mod fetcher;
pub mod gmail;
pub mod google_auth;
pub mod heartbeat;
pub mod history_store;
pub mod json_store;
pub mod memory;
pub mod orchestrator;
pub mod startup;
pub mod telemetry;
pub mod unhandled;
pub mod watchdog;

pub use analyzer::{AnalysisReport, AnalysisResult, ClassifyOutcome, FileAnalyzer, FileContext};
pub use config::{AgentConfig, AgentPaths, ConfigError};
pub use dispatcher::{DispatchAction, DispatchReport, Dispatcher, LprAction};
pub use fetcher::{AttachmentFetcher, AttachmentStream, FetchError, FetchEvent, FetchReport};
pub use gmail::{GmailClient, MailError, MailProvider};
pub use heartbeat::{AgentState, HeartbeatStatus};
pub use history_store::{DownloadRecord, HistoryStore};
pub use json_store::{JsonStore, StoreError};
pub use memory::{CategorizationEntry, CategorizationMemory};
pub use orchestrator::{build_agent, Agent, AgentError, CycleReport};
pub use unhandled::{UnhandledEntry, UnhandledLog, UnhandledReason};
