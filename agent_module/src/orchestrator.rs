//! Cycle sequencing: Fetcher, then Analyzer, then Dispatcher, on a fixed
//! interval. The heartbeat file is refreshed every heartbeat interval, both
//! while idle and from a helper thread while a cycle runs.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use classifier_module::{Classifier, ClassifierError, OpenAiClassifier};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::analyzer::{AnalysisReport, FileAnalyzer};
use crate::config::{AgentConfig, ConfigError};
use crate::dispatcher::{DispatchAction, DispatchReport, Dispatcher, LprAction};
use crate::fetcher::{AttachmentFetcher, FetchReport};
use crate::gmail::{GmailClient, MailError, MailProvider};
use crate::google_auth::{GoogleAuth, GoogleAuthConfig, GoogleAuthError};
use crate::heartbeat::{write_heartbeat, AgentState, HeartbeatStatus};
use crate::history_store::HistoryStore;
use crate::memory::CategorizationMemory;
use crate::unhandled::UnhandledLog;

const SLEEP_SLICE: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] GoogleAuthError),
    #[error(transparent)]
    Mail(#[from] MailError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// `None` when the stage was skipped because its state could not be loaded.
    pub fetch: Option<FetchReport>,
    pub analysis: Option<AnalysisReport>,
    pub dispatch: Option<DispatchReport>,
}

pub struct Agent<M, C, A> {
    config: AgentConfig,
    mail: M,
    classifier: C,
    action: A,
    state: AgentState,
    cycles_completed: u64,
}

/// Gmail, OpenAI and `lpr` wired from configuration. Builds blocking HTTP
/// clients, so call it off the async runtime.
pub fn build_agent(
    config: AgentConfig,
) -> Result<Agent<GmailClient, OpenAiClassifier, LprAction>, AgentError> {
    let credentials_path = config.require_credentials_path()?;
    let mut auth_config = GoogleAuthConfig::from_files(&config.token_path, credentials_path)?;
    auth_config.timeout = Some(config.api_timeout);
    let auth = GoogleAuth::new(auth_config)?;
    let mail = GmailClient::new(config.gmail_api_base_url.clone(), auth, config.api_timeout)?;
    let classifier = OpenAiClassifier::new(config.classifier_config()?)?;
    let action = LprAction::from_config(&config);
    Ok(Agent::new(config, mail, classifier, action))
}

impl<M, C, A> Agent<M, C, A>
where
    M: MailProvider,
    C: Classifier,
    A: DispatchAction,
{
    pub fn new(config: AgentConfig, mail: M, classifier: C, action: A) -> Self {
        Self {
            config,
            mail,
            classifier,
            action,
            state: AgentState::Idle,
            cycles_completed: 0,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    /// One Fetcher → Analyzer → Dispatcher pass. Stages whose state file
    /// cannot be loaded are skipped. The heartbeat stays fresh for the whole
    /// pass, however long the stages take.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.state = AgentState::Running;
        self.beat();

        let config = &self.config;
        let cycles_completed = self.cycles_completed;
        let this = &*self;
        let report = thread::scope(|scope| {
            // Dropped on return or unwind, which stops the heartbeat thread.
            let (_running, stopped) = bounded::<()>(0);
            scope.spawn(move || beat_while_running(config, cycles_completed, stopped));
            this.run_stages()
        });

        self.cycles_completed += 1;
        self.state = AgentState::Idle;
        self.beat();
        info!(
            "cycle {} complete: {}",
            self.cycles_completed,
            serde_json::to_string(&report).unwrap_or_default()
        );
        report
    }

    fn run_stages(&self) -> CycleReport {
        let mut report = CycleReport::default();
        let paths = &self.config.paths;

        match HistoryStore::open(paths) {
            Ok(mut history) => {
                let fetcher = AttachmentFetcher::new(&self.mail, &self.config);
                report.fetch = Some(fetcher.run(&mut history));
            }
            Err(err) => error!("skipping fetch stage: {}", err),
        }

        let mut unhandled = match UnhandledLog::load(&paths.unhandled_path) {
            Ok(unhandled) => Some(unhandled),
            Err(err) => {
                error!("skipping analysis and dispatch stages: {}", err);
                None
            }
        };

        let mut results = Vec::new();
        if let Some(unhandled) = unhandled.as_mut() {
            match CategorizationMemory::load(&paths.memory_path) {
                Ok(mut memory) => {
                    let analyzer = FileAnalyzer::new(&self.classifier, &self.config);
                    match analyzer.run(&mut memory, unhandled) {
                        Ok(run) => {
                            report.analysis = Some(run.report);
                            results = run.results;
                        }
                        Err(err) => error!("analysis stage failed: {}", err),
                    }
                }
                Err(err) => error!("skipping analysis stage: {}", err),
            }

            let dispatcher = Dispatcher::new(&self.action, &self.config);
            report.dispatch = Some(dispatcher.dispatch(&results, unhandled));
        }
        report
    }

    /// Run cycles until `stop_flag` is set. The first cycle starts immediately.
    pub fn run_loop(&mut self, stop_flag: &AtomicBool) {
        info!(
            "Starting {} with {}s interval",
            self.config.agent_name,
            self.config.loop_delay.as_secs()
        );

        while !stop_flag.load(Ordering::Relaxed) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle()));
            if let Err(payload) = outcome {
                error!("cycle panicked: {}", panic_message(payload.as_ref()));
                self.state = AgentState::Idle;
                self.beat();
            }
            self.idle(stop_flag);
        }

        info!("{} stopped", self.config.agent_name);
    }

    fn idle(&mut self, stop_flag: &AtomicBool) {
        let started = Instant::now();
        let mut last_beat = Instant::now();
        while !stop_flag.load(Ordering::Relaxed) {
            let elapsed = started.elapsed();
            if elapsed >= self.config.loop_delay {
                return;
            }
            if last_beat.elapsed() >= self.config.heartbeat_interval {
                self.beat();
                last_beat = Instant::now();
            }
            thread::sleep(SLEEP_SLICE.min(self.config.loop_delay - elapsed));
        }
    }

    fn beat(&self) {
        beat(&self.config, self.state, self.cycles_completed);
    }
}

fn beat(config: &AgentConfig, state: AgentState, cycles_completed: u64) {
    let status = HeartbeatStatus::alive(&config.agent_name, state, cycles_completed);
    match write_heartbeat(&config.paths.heartbeat_path, &status) {
        Ok(()) => debug!("heartbeat written ({:?})", state),
        Err(err) => error!("failed to write heartbeat: {}", err),
    }
}

/// Writes a `Running` heartbeat every interval until the sender side of
/// `stopped` is dropped.
fn beat_while_running(config: &AgentConfig, cycles_completed: u64, stopped: Receiver<()>) {
    loop {
        match stopped.recv_timeout(config.heartbeat_interval) {
            Err(RecvTimeoutError::Timeout) => beat(config, AgentState::Running, cycles_completed),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::BoxError;
    use crate::gmail::{Message, MessagePage};
    use crate::heartbeat::read_heartbeat;
    use classifier_module::Classification;
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct EmptyInbox {
        stop_after_listing: Option<Arc<AtomicBool>>,
        panic_on_list: bool,
    }

    impl MailProvider for EmptyInbox {
        fn list_messages(
            &self,
            _query: &str,
            _page_size: u32,
            _page_token: Option<&str>,
        ) -> Result<MessagePage, MailError> {
            if let Some(flag) = &self.stop_after_listing {
                flag.store(true, Ordering::Relaxed);
            }
            if self.panic_on_list {
                panic!("inbox exploded");
            }
            Ok(MessagePage::default())
        }

        fn get_message(&self, _message_id: &str) -> Result<Message, MailError> {
            unreachable!("no messages are listed")
        }

        fn get_attachment(&self, _message_id: &str, _attachment_id: &str) -> Result<Vec<u8>, MailError> {
            unreachable!("no messages are listed")
        }
    }

    struct NoopClassifier;

    impl Classifier for NoopClassifier {
        fn classify(&self, _filename: &str, _text: &str) -> Result<Classification, ClassifierError> {
            Ok(Classification {
                summary: "noop".to_string(),
                contains_structured_data: false,
                notes: String::new(),
                category: None,
            })
        }
    }

    /// Sleeps before answering, then notes how old the heartbeat file is.
    struct SlowClassifier {
        delay: Duration,
        heartbeat_path: PathBuf,
        observed: RefCell<Vec<(AgentState, Duration)>>,
    }

    impl Classifier for SlowClassifier {
        fn classify(&self, filename: &str, text: &str) -> Result<Classification, ClassifierError> {
            thread::sleep(self.delay);
            if let Ok(Some(status)) = read_heartbeat(&self.heartbeat_path) {
                self.observed
                    .borrow_mut()
                    .push((status.state, status.age(chrono::Utc::now())));
            }
            NoopClassifier.classify(filename, text)
        }
    }

    struct NoopAction;

    impl DispatchAction for NoopAction {
        fn name(&self) -> &str {
            "noop"
        }

        fn execute(&self, _path: &Path) -> Result<String, BoxError> {
            Ok(String::new())
        }
    }

    fn agent(temp: &TempDir, inbox: EmptyInbox) -> Agent<EmptyInbox, NoopClassifier, NoopAction> {
        let config = AgentConfig::with_root(temp.path());
        config.paths.ensure_dirs().unwrap();
        Agent::new(config, inbox, NoopClassifier, NoopAction)
    }

    #[test]
    fn empty_inbox_cycle_leaves_history_untouched() {
        let temp = TempDir::new().unwrap();
        let mut agent = agent(
            &temp,
            EmptyInbox {
                stop_after_listing: None,
                panic_on_list: false,
            },
        );
        let report = agent.run_cycle();

        let fetch = report.fetch.unwrap();
        assert_eq!(fetch.downloaded, 0);
        assert!(!fetch.aborted);
        assert!(!agent.config().paths.history_path.exists());
        assert_eq!(agent.state(), AgentState::Idle);
        assert_eq!(agent.cycles_completed(), 1);

        let heartbeat = read_heartbeat(&agent.config().paths.heartbeat_path)
            .unwrap()
            .unwrap();
        assert_eq!(heartbeat.state, AgentState::Idle);
        assert_eq!(heartbeat.cycles_completed, 1);
        assert_eq!(heartbeat.agent_name, "basic-agent");
    }

    #[test]
    fn malformed_history_skips_only_fetch() {
        let temp = TempDir::new().unwrap();
        let mut agent = agent(
            &temp,
            EmptyInbox {
                stop_after_listing: None,
                panic_on_list: false,
            },
        );
        let history_path = agent.config().paths.history_path.clone();
        std::fs::write(&history_path, "{broken").unwrap();

        let report = agent.run_cycle();
        assert!(report.fetch.is_none());
        assert!(report.analysis.is_some());
        assert!(report.dispatch.is_some());
        assert_eq!(std::fs::read_to_string(&history_path).unwrap(), "{broken");
    }

    #[test]
    fn run_loop_stops_when_flag_is_set() {
        let temp = TempDir::new().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let mut agent = agent(
            &temp,
            EmptyInbox {
                stop_after_listing: Some(stop.clone()),
                panic_on_list: false,
            },
        );
        agent.run_loop(&stop);
        assert_eq!(agent.cycles_completed(), 1);
    }

    #[test]
    fn run_loop_survives_a_panicking_cycle() {
        let temp = TempDir::new().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let mut agent = agent(
            &temp,
            EmptyInbox {
                stop_after_listing: Some(stop.clone()),
                panic_on_list: true,
            },
        );
        agent.run_loop(&stop);
        assert_eq!(agent.cycles_completed(), 0);
        assert_eq!(agent.state(), AgentState::Idle);
        assert!(agent.config().paths.heartbeat_path.exists());
    }

    #[test]
    fn heartbeat_stays_fresh_during_a_slow_cycle() {
        let temp = TempDir::new().unwrap();
        let mut config = AgentConfig::with_root(temp.path());
        config.paths.ensure_dirs().unwrap();
        config.heartbeat_interval = Duration::from_millis(100);
        for index in 0..4 {
            std::fs::write(
                config.paths.downloads_dir.join(format!("note{index}.txt")),
                "quarterly numbers",
            )
            .unwrap();
        }
        let classifier = SlowClassifier {
            delay: Duration::from_millis(400),
            heartbeat_path: config.paths.heartbeat_path.clone(),
            observed: RefCell::new(Vec::new()),
        };
        let inbox = EmptyInbox {
            stop_after_listing: None,
            panic_on_list: false,
        };
        let mut agent = Agent::new(config, inbox, &classifier, NoopAction);

        let report = agent.run_cycle();
        assert_eq!(report.analysis.unwrap().classified, 4);

        let observed = classifier.observed.borrow();
        assert_eq!(observed.len(), 4);
        for (state, age) in observed.iter() {
            assert_eq!(*state, AgentState::Running);
            assert!(*age < Duration::from_millis(350), "heartbeat {age:?} old");
        }
        drop(observed);

        let last = read_heartbeat(&agent.config().paths.heartbeat_path)
            .unwrap()
            .unwrap();
        assert_eq!(last.state, AgentState::Idle);
        assert_eq!(last.cycles_completed, 1);
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
