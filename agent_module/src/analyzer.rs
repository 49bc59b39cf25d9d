//! Analysis stage: text extraction, memory lookup and classification of
//! every downloaded file that has not been analyzed yet.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use classifier_module::Classifier;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::extract::{extract_text, filetype, truncate_chars, Extraction};
use crate::fetcher::load_download_results;
use crate::json_store::{write_json_atomic, StoreError};
use crate::memory::{CategorizationEntry, CategorizationMemory, UNCATEGORIZED};
use crate::unhandled::{UnhandledEntry, UnhandledLog, UnhandledReason};

const UNKNOWN_CONTEXT: &str = "(unknown)";

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub file_path: PathBuf,
    pub summary: String,
    pub contains_structured_data: bool,
    pub notes: String,
    pub category: String,
    pub from_memory: bool,
    pub subject: String,
    pub sender: String,
}

impl AnalysisResult {
    pub fn filename(&self) -> String {
        self.file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyOutcome {
    Cached(AnalysisResult),
    Classified(AnalysisResult),
    Unhandled(UnhandledEntry),
}

/// Mail context a downloaded file arrived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContext {
    pub subject: String,
    pub sender: String,
}

impl Default for FileContext {
    fn default() -> Self {
        Self {
            subject: UNKNOWN_CONTEXT.to_string(),
            sender: UNKNOWN_CONTEXT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    pub files_seen: usize,
    pub already_analyzed: usize,
    pub cached: usize,
    pub classified: usize,
    pub unhandled: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisRun {
    pub results: Vec<AnalysisResult>,
    pub report: AnalysisReport,
}

#[derive(Debug, Serialize)]
struct AnalysisRecord<'a> {
    filename: String,
    filetype: String,
    analyzed_at: DateTime<Utc>,
    #[serde(flatten)]
    result: &'a AnalysisResult,
}

pub struct FileAnalyzer<'a, C: Classifier + ?Sized> {
    classifier: &'a C,
    config: &'a AgentConfig,
}

impl<'a, C: Classifier + ?Sized> FileAnalyzer<'a, C> {
    pub fn new(classifier: &'a C, config: &'a AgentConfig) -> Self {
        Self { classifier, config }
    }

    /// The file's name in the download directory.
    pub fn file_key(path: &Path) -> String {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn analysis_path(&self, path: &Path) -> PathBuf {
        self.config
            .paths
            .analysis_dir
            .join(format!("{}.analysis.json", Self::file_key(path)))
    }

    pub fn classify(
        &self,
        path: &Path,
        context: &FileContext,
        memory: &mut CategorizationMemory,
        unhandled: &mut UnhandledLog,
    ) -> Result<ClassifyOutcome, AnalyzerError> {
        let key = Self::file_key(path);

        if let Some(entry) = memory.lookup(&key) {
            debug!("{} found in categorization memory", key);
            return Ok(ClassifyOutcome::Cached(AnalysisResult {
                file_path: path.to_path_buf(),
                summary: entry.summary.clone().unwrap_or_default(),
                contains_structured_data: entry.contains_structured_data.unwrap_or(false),
                notes: entry.notes.clone().unwrap_or_default(),
                category: entry.category().to_string(),
                from_memory: true,
                subject: context.subject.clone(),
                sender: context.sender.clone(),
            }));
        }

        let filetype = filetype(path);
        let unhandled_entry = |reason: UnhandledReason, detail: String| {
            UnhandledEntry::new(key.clone(), reason)
                .with_filetype(filetype.clone())
                .with_detail(detail)
                .with_context(&context.subject, &context.sender)
        };

        let text = match extract_text(path) {
            Ok(Extraction::Text(text)) if text.trim().is_empty() => {
                let entry = unhandled_entry(UnhandledReason::NoText, "no text extracted".into());
                unhandled.record(entry.clone());
                return Ok(ClassifyOutcome::Unhandled(entry));
            }
            Ok(Extraction::Text(text)) => text,
            Ok(Extraction::Binary) => {
                let entry = unhandled_entry(
                    UnhandledReason::BinaryType,
                    format!("binary .{filetype} files are not analyzed"),
                );
                unhandled.record(entry.clone());
                return Ok(ClassifyOutcome::Unhandled(entry));
            }
            Ok(Extraction::Unsupported) => {
                let entry = unhandled_entry(
                    UnhandledReason::UnsupportedType,
                    format!("unsupported file type `{filetype}`"),
                );
                unhandled.record(entry.clone());
                return Ok(ClassifyOutcome::Unhandled(entry));
            }
            Err(err) => {
                warn!("{}", err);
                let entry = unhandled_entry(UnhandledReason::ExtractionFailed, err.to_string());
                unhandled.record(entry.clone());
                return Ok(ClassifyOutcome::Unhandled(entry));
            }
        };

        let input = truncate_chars(&text, self.config.classifier_max_input_chars);
        let classification = match self.classifier.classify(&key, input) {
            Ok(classification) => classification,
            Err(err) => {
                error!("classification failed for {}: {}", key, err);
                let entry = unhandled_entry(UnhandledReason::ClassifierFailed, err.to_string());
                unhandled.record(entry.clone());
                return Ok(ClassifyOutcome::Unhandled(entry));
            }
        };

        let category = classification
            .category
            .clone()
            .filter(|category| !category.trim().is_empty())
            .unwrap_or_else(|| UNCATEGORIZED.to_string());
        memory.remember(
            &key,
            CategorizationEntry {
                category: Some(category.clone()),
                summary: Some(classification.summary.clone()),
                contains_structured_data: Some(classification.contains_structured_data),
                notes: Some(classification.notes.clone()),
                filetype: Some(filetype.clone()),
                source: Some(context.sender.clone()),
                classified_at: Some(Utc::now().to_rfc3339()),
            },
        )?;
        info!("classified {} as {}", key, category);

        Ok(ClassifyOutcome::Classified(AnalysisResult {
            file_path: path.to_path_buf(),
            summary: classification.summary,
            contains_structured_data: classification.contains_structured_data,
            notes: classification.notes,
            category,
            from_memory: false,
            subject: context.subject.clone(),
            sender: context.sender.clone(),
        }))
    }

    /// Analyze every file in `downloads/` that has no analysis file yet.
    pub fn run(
        &self,
        memory: &mut CategorizationMemory,
        unhandled: &mut UnhandledLog,
    ) -> Result<AnalysisRun, AnalyzerError> {
        let files = list_files(&self.config.paths.downloads_dir)?;
        let contexts = load_download_results(&self.config.paths.results_path);
        let mut run = AnalysisRun::default();

        for path in files {
            run.report.files_seen += 1;
            if self.analysis_path(&path).exists() {
                run.report.already_analyzed += 1;
                continue;
            }

            let context = contexts
                .get(&Self::file_key(&path))
                .map(|result| FileContext {
                    subject: result.subject.clone(),
                    sender: result.sender.clone(),
                })
                .unwrap_or_default();

            match self.classify(&path, &context, memory, unhandled) {
                Ok(ClassifyOutcome::Cached(result)) => {
                    run.report.cached += 1;
                    self.save_analysis(&result);
                    run.results.push(result);
                }
                Ok(ClassifyOutcome::Classified(result)) => {
                    run.report.classified += 1;
                    self.save_analysis(&result);
                    run.results.push(result);
                }
                Ok(ClassifyOutcome::Unhandled(_)) => run.report.unhandled += 1,
                Err(err) => {
                    error!("analysis of {} failed: {}", path.display(), err);
                    run.report.errors += 1;
                }
            }
        }

        if let Err(err) = unhandled.flush() {
            error!("failed to save unhandled list: {}", err);
        }
        info!(
            "analysis finished: {} file(s), {} cached, {} classified, {} unhandled",
            run.report.files_seen, run.report.cached, run.report.classified, run.report.unhandled
        );
        Ok(run)
    }

    fn save_analysis(&self, result: &AnalysisResult) {
        let record = AnalysisRecord {
            filename: result.filename(),
            filetype: filetype(&result.file_path),
            analyzed_at: Utc::now(),
            result,
        };
        let path = self.analysis_path(&result.file_path);
        match write_json_atomic(&path, &record) {
            Ok(()) => debug!("saved analysis {}", path.display()),
            Err(err) => error!("failed to save analysis for {}: {}", record.filename, err),
        }
    }
}

/// Regular, non-hidden files sorted by name. A missing directory is empty.
pub(crate) fn list_files(dir: &Path) -> Result<Vec<PathBuf>, AnalyzerError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(AnalyzerError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| AnalyzerError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if path.is_file() && !hidden {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use classifier_module::{Classification, ClassifierError};
    use std::cell::RefCell;
    use tempfile::TempDir;

    struct RecordingClassifier {
        calls: RefCell<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingClassifier {
        fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                fail: false,
            }
        }
    }

    impl Classifier for RecordingClassifier {
        fn classify(&self, filename: &str, text: &str) -> Result<Classification, ClassifierError> {
            self.calls
                .borrow_mut()
                .push((filename.to_string(), text.to_string()));
            if self.fail {
                return Err(ClassifierError::EmptyResponse);
            }
            Ok(Classification {
                summary: format!("summary of {filename}"),
                contains_structured_data: true,
                notes: String::new(),
                category: None,
            })
        }
    }

    struct Fixture {
        _temp: TempDir,
        config: AgentConfig,
        memory: CategorizationMemory,
        unhandled: UnhandledLog,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let config = AgentConfig::with_root(temp.path());
        config.paths.ensure_dirs().unwrap();
        let memory = CategorizationMemory::load(&config.paths.memory_path).unwrap();
        let unhandled = UnhandledLog::load(&config.paths.unhandled_path).unwrap();
        Fixture {
            _temp: temp,
            config,
            memory,
            unhandled,
        }
    }

    fn write_download(config: &AgentConfig, name: &str, body: &[u8]) -> PathBuf {
        let path = config.paths.downloads_dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn memory_hit_skips_classifier() {
        let mut fx = fixture();
        fs::write(
            &fx.config.paths.memory_path,
            r#"{"report.pdf": {"category": "invoice"}}"#,
        )
        .unwrap();
        let mut memory = CategorizationMemory::load(&fx.config.paths.memory_path).unwrap();
        let path = write_download(&fx.config, "report.pdf", b"%PDF-1.4 not really");
        let classifier = RecordingClassifier::new();
        let analyzer = FileAnalyzer::new(&classifier, &fx.config);

        let outcome = analyzer
            .classify(&path, &FileContext::default(), &mut memory, &mut fx.unhandled)
            .unwrap();
        match outcome {
            ClassifyOutcome::Cached(result) => {
                assert_eq!(result.category, "invoice");
                assert!(result.from_memory);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(classifier.calls.borrow().is_empty());
    }

    #[test]
    fn unsupported_file_is_unhandled_without_classifier_call() {
        let mut fx = fixture();
        let path = write_download(&fx.config, "setup.exe", b"MZ");
        let classifier = RecordingClassifier::new();
        let analyzer = FileAnalyzer::new(&classifier, &fx.config);

        let outcome = analyzer
            .classify(&path, &FileContext::default(), &mut fx.memory, &mut fx.unhandled)
            .unwrap();
        assert!(matches!(
            outcome,
            ClassifyOutcome::Unhandled(UnhandledEntry {
                reason: UnhandledReason::UnsupportedType,
                ..
            })
        ));
        assert!(fx.unhandled.contains("setup.exe", UnhandledReason::UnsupportedType));
        assert!(classifier.calls.borrow().is_empty());
    }

    #[test]
    fn blank_text_is_no_text() {
        let mut fx = fixture();
        let path = write_download(&fx.config, "blank.txt", b"  \n\t ");
        let classifier = RecordingClassifier::new();
        let analyzer = FileAnalyzer::new(&classifier, &fx.config);

        let outcome = analyzer
            .classify(&path, &FileContext::default(), &mut fx.memory, &mut fx.unhandled)
            .unwrap();
        assert!(matches!(outcome, ClassifyOutcome::Unhandled(_)));
        assert!(fx.unhandled.contains("blank.txt", UnhandledReason::NoText));
    }

    #[test]
    fn classified_text_is_truncated_and_remembered() {
        let mut fx = fixture();
        fx.config.classifier_max_input_chars = 5;
        let path = write_download(&fx.config, "notes.txt", b"0123456789");
        let classifier = RecordingClassifier::new();
        let analyzer = FileAnalyzer::new(&classifier, &fx.config);

        let outcome = analyzer
            .classify(&path, &FileContext::default(), &mut fx.memory, &mut fx.unhandled)
            .unwrap();
        match outcome {
            ClassifyOutcome::Classified(result) => {
                assert_eq!(result.category, UNCATEGORIZED);
                assert!(!result.from_memory);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            classifier.calls.borrow().as_slice(),
            &[("notes.txt".to_string(), "01234".to_string())]
        );

        let reloaded = CategorizationMemory::load(&fx.config.paths.memory_path).unwrap();
        let entry = reloaded.lookup("notes.txt").unwrap();
        assert_eq!(entry.summary.as_deref(), Some("summary of notes.txt"));
        assert_eq!(entry.filetype.as_deref(), Some("txt"));
    }

    #[test]
    fn classifier_failure_is_recorded_and_retried_later() {
        let mut fx = fixture();
        write_download(&fx.config, "a.txt", b"alpha");
        write_download(&fx.config, "b.txt", b"beta");
        let mut classifier = RecordingClassifier::new();
        classifier.fail = true;
        let analyzer = FileAnalyzer::new(&classifier, &fx.config);

        let run = analyzer.run(&mut fx.memory, &mut fx.unhandled).unwrap();
        assert_eq!(run.report.unhandled, 2);
        assert!(run.results.is_empty());
        assert_eq!(classifier.calls.borrow().len(), 2);
        assert!(fx.unhandled.contains("a.txt", UnhandledReason::ClassifierFailed));
        assert!(fx.config.paths.unhandled_path.exists());

        let healthy = RecordingClassifier::new();
        let analyzer = FileAnalyzer::new(&healthy, &fx.config);
        let run = analyzer.run(&mut fx.memory, &mut fx.unhandled).unwrap();
        assert_eq!(run.report.classified, 2);
    }

    #[test]
    fn run_writes_analysis_files_and_skips_them_next_time() {
        let mut fx = fixture();
        write_download(&fx.config, "a.txt", b"alpha");
        write_download(&fx.config, ".partial", b"ignored");
        let classifier = RecordingClassifier::new();
        let analyzer = FileAnalyzer::new(&classifier, &fx.config);

        let first = analyzer.run(&mut fx.memory, &mut fx.unhandled).unwrap();
        assert_eq!(first.report.files_seen, 1);
        assert_eq!(first.report.classified, 1);
        let analysis_path = fx.config.paths.analysis_dir.join("a.txt.analysis.json");
        let saved: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&analysis_path).unwrap()).unwrap();
        assert_eq!(saved["filename"], "a.txt");
        assert_eq!(saved["subject"], UNKNOWN_CONTEXT);
        assert_eq!(saved["category"], UNCATEGORIZED);

        let second = analyzer.run(&mut fx.memory, &mut fx.unhandled).unwrap();
        assert_eq!(second.report.already_analyzed, 1);
        assert!(second.results.is_empty());
        assert_eq!(classifier.calls.borrow().len(), 1);
    }
}
