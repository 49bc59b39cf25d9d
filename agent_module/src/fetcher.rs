//! Attachment download stage.
//!
//! [`AttachmentStream`] lazily walks a paginated message search and yields
//! attachment bytes; [`AttachmentFetcher`] stores new blobs under
//! `downloads/`, records them in the [`HistoryStore`] and appends one JSON
//! line per stored file to the results file.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::gmail::{decode_base64url, MailError, MailProvider, MessageRef};
use crate::history_store::{DownloadRecord, HistoryStore};
use crate::json_store::StoreError;

const MAX_STORED_NAME_CHARS: usize = 120;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("listing page failed: {source}")]
    Page {
        #[source]
        source: MailError,
    },
    #[error("message {message_id} failed: {source}")]
    Message {
        message_id: String,
        #[source]
        source: MailError,
    },
    #[error("attachment {filename} of message {message_id} failed: {source}")]
    Attachment {
        message_id: String,
        filename: String,
        #[source]
        source: MailError,
    },
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentBlob {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    Attachment(AttachmentBlob),
    /// Every attachment part of the message has been attempted.
    MessageDone {
        message_id: String,
        attachment_count: usize,
        complete: bool,
    },
    /// Message was already processed in an earlier cycle.
    Skipped { message_id: String },
}

struct PendingPart {
    filename: String,
    attachment_id: Option<String>,
    inline_data: Option<String>,
}

struct MessageCursor {
    message_id: String,
    subject: String,
    sender: String,
    parts: VecDeque<PendingPart>,
    total: usize,
    failed: bool,
}

/// Lazy, finite sequence over one search. Ends when the page cursor is
/// exhausted or after the first listing failure.
pub struct AttachmentStream<'a, M: MailProvider + ?Sized> {
    provider: &'a M,
    query: String,
    page_size: u32,
    skip: HashSet<String>,
    next_page: Option<String>,
    listed_first_page: bool,
    finished: bool,
    pending: VecDeque<MessageRef>,
    current: Option<MessageCursor>,
}

impl<'a, M: MailProvider + ?Sized> AttachmentStream<'a, M> {
    pub fn new(provider: &'a M, query: impl Into<String>, page_size: u32) -> Self {
        Self {
            provider,
            query: query.into(),
            page_size,
            skip: HashSet::new(),
            next_page: None,
            listed_first_page: false,
            finished: false,
            pending: VecDeque::new(),
            current: None,
        }
    }

    /// Message ids to report as `Skipped` without fetching them.
    pub fn skipping(mut self, message_ids: impl IntoIterator<Item = String>) -> Self {
        self.skip.extend(message_ids);
        self
    }

    fn next_part(&mut self) -> Option<Result<FetchEvent, FetchError>> {
        let cursor = self.current.as_mut()?;
        let Some(part) = cursor.parts.pop_front() else {
            let done = self.current.take()?;
            return Some(Ok(FetchEvent::MessageDone {
                message_id: done.message_id,
                attachment_count: done.total,
                complete: !done.failed,
            }));
        };

        let bytes = match (&part.inline_data, &part.attachment_id) {
            (Some(data), _) if !data.is_empty() => decode_base64url(data),
            (_, Some(attachment_id)) => self
                .provider
                .get_attachment(&cursor.message_id, attachment_id),
            _ => Ok(Vec::new()),
        };
        Some(match bytes {
            Ok(bytes) => Ok(FetchEvent::Attachment(AttachmentBlob {
                message_id: cursor.message_id.clone(),
                subject: cursor.subject.clone(),
                sender: cursor.sender.clone(),
                filename: part.filename,
                bytes,
            })),
            Err(source) => {
                cursor.failed = true;
                Err(FetchError::Attachment {
                    message_id: cursor.message_id.clone(),
                    filename: part.filename,
                    source,
                })
            }
        })
    }

    fn open_message(&mut self, message_ref: MessageRef) -> Option<Result<FetchEvent, FetchError>> {
        if self.skip.contains(&message_ref.id) {
            return Some(Ok(FetchEvent::Skipped {
                message_id: message_ref.id,
            }));
        }
        match self.provider.get_message(&message_ref.id) {
            Ok(message) => {
                let parts: VecDeque<PendingPart> = message
                    .attachment_parts()
                    .into_iter()
                    .map(|part| PendingPart {
                        filename: part.filename.clone(),
                        attachment_id: part
                            .body
                            .as_ref()
                            .and_then(|body| body.attachment_id.clone()),
                        inline_data: part.body.as_ref().and_then(|body| body.data.clone()),
                    })
                    .collect();
                debug!(
                    "message {} has {} attachment part(s)",
                    message_ref.id,
                    parts.len()
                );
                self.current = Some(MessageCursor {
                    subject: message.subject().to_string(),
                    sender: message.sender().to_string(),
                    total: parts.len(),
                    parts,
                    failed: false,
                    message_id: message_ref.id,
                });
                None
            }
            Err(source) => Some(Err(FetchError::Message {
                message_id: message_ref.id,
                source,
            })),
        }
    }
}

impl<M: MailProvider + ?Sized> Iterator for AttachmentStream<'_, M> {
    type Item = Result<FetchEvent, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_some() {
                return self.next_part();
            }
            if let Some(message_ref) = self.pending.pop_front() {
                match self.open_message(message_ref) {
                    Some(item) => return Some(item),
                    None => continue,
                }
            }
            if self.finished || (self.listed_first_page && self.next_page.is_none()) {
                self.finished = true;
                return None;
            }

            let page = self.provider.list_messages(
                &self.query,
                self.page_size,
                self.next_page.as_deref(),
            );
            self.listed_first_page = true;
            match page {
                Ok(page) => {
                    self.pending.extend(page.messages);
                    self.next_page = page.next_page_token.filter(|token| !token.is_empty());
                }
                Err(source) => {
                    self.finished = true;
                    return Some(Err(FetchError::Page { source }));
                }
            }
        }
    }
}

/// One line of `results/gmail_downloader.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub filename: String,
    pub stored_path: PathBuf,
    pub content_hash: String,
    pub attachment_name: String,
    pub message_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
    pub downloaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub messages_seen: usize,
    pub messages_skipped: usize,
    pub attachments_seen: usize,
    pub downloaded: usize,
    pub duplicates: usize,
    pub item_errors: usize,
    pub aborted: bool,
}

#[derive(Debug)]
enum StoreOutcome {
    Downloaded,
    Duplicate,
}

pub struct AttachmentFetcher<'a, M: MailProvider + ?Sized> {
    provider: &'a M,
    config: &'a AgentConfig,
}

impl<'a, M: MailProvider + ?Sized> AttachmentFetcher<'a, M> {
    pub fn new(provider: &'a M, config: &'a AgentConfig) -> Self {
        Self { provider, config }
    }

    pub fn stream(&self, history: &HistoryStore) -> AttachmentStream<'a, M> {
        AttachmentStream::new(
            self.provider,
            self.config.gmail_query.clone(),
            self.config.gmail_page_size,
        )
        .skipping(history.processed_message_ids().map(str::to_string))
    }

    pub fn run(&self, history: &mut HistoryStore) -> FetchReport {
        let mut report = FetchReport::default();
        let mut failed_messages: HashSet<String> = HashSet::new();
        info!("fetching attachments for query `{}`", self.config.gmail_query);

        for event in self.stream(history) {
            match event {
                Ok(FetchEvent::Attachment(blob)) => {
                    report.attachments_seen += 1;
                    match self.store_blob(&blob, history) {
                        Ok(StoreOutcome::Downloaded) => report.downloaded += 1,
                        Ok(StoreOutcome::Duplicate) => report.duplicates += 1,
                        Err(err) => {
                            error!("failed to store {}: {}", blob.filename, err);
                            report.item_errors += 1;
                            failed_messages.insert(blob.message_id);
                        }
                    }
                }
                Ok(FetchEvent::MessageDone {
                    message_id,
                    attachment_count,
                    complete,
                }) => {
                    report.messages_seen += 1;
                    if complete && !failed_messages.contains(&message_id) {
                        history.mark_message_processed(&message_id, attachment_count);
                        if let Err(err) = history.save() {
                            error!("failed to save processed message {}: {}", message_id, err);
                        }
                    }
                }
                Ok(FetchEvent::Skipped { message_id }) => {
                    debug!("message {} already processed", message_id);
                    report.messages_seen += 1;
                    report.messages_skipped += 1;
                }
                Err(err @ FetchError::Page { .. }) => {
                    error!("aborting remaining pages: {}", err);
                    report.aborted = true;
                }
                Err(err) => {
                    warn!("{}", err);
                    report.item_errors += 1;
                    if let FetchError::Message { .. } = err {
                        report.messages_seen += 1;
                    }
                }
            }
        }

        info!(
            "fetch finished: {} message(s), {} new file(s), {} duplicate(s), {} error(s){}",
            report.messages_seen,
            report.downloaded,
            report.duplicates,
            report.item_errors,
            if report.aborted { ", aborted" } else { "" }
        );
        report
    }

    fn store_blob(
        &self,
        blob: &AttachmentBlob,
        history: &mut HistoryStore,
    ) -> Result<StoreOutcome, FetchError> {
        let content_hash = content_hash(&blob.bytes);
        if history.has(&content_hash) {
            debug!("skipping duplicate {} ({})", blob.filename, content_hash);
            return Ok(StoreOutcome::Duplicate);
        }

        let stored_name = stored_filename(&content_hash, &blob.filename);
        let downloads_dir = &self.config.paths.downloads_dir;
        fs::create_dir_all(downloads_dir).map_err(|source| FetchError::Io {
            path: downloads_dir.clone(),
            source,
        })?;
        let stored_path = downloads_dir.join(&stored_name);
        write_blob(&stored_path, &blob.bytes)?;

        // The result line goes first so a persisted hash always has one.
        let downloaded_at = Utc::now();
        append_result(
            &self.config.paths.results_path,
            &DownloadResult {
                filename: stored_name,
                stored_path: stored_path.clone(),
                content_hash: content_hash.clone(),
                attachment_name: blob.filename.clone(),
                message_id: blob.message_id.clone(),
                subject: blob.subject.clone(),
                sender: blob.sender.clone(),
                downloaded_at,
            },
        )?;

        history.record(DownloadRecord {
            content_hash,
            original_filename: blob.filename.clone(),
            stored_path,
            downloaded_at,
            message_id: blob.message_id.clone(),
            subject: blob.subject.clone(),
            sender: blob.sender.clone(),
        });
        history.save()?;
        info!("downloaded {} from message {}", blob.filename, blob.message_id);
        Ok(StoreOutcome::Downloaded)
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// `<hash>_<name>` with path separators and unusual characters replaced.
pub fn stored_filename(content_hash: &str, original: &str) -> String {
    let base = original
        .rsplit(|ch| ch == '/' || ch == '\\')
        .next()
        .unwrap_or(original);
    let mut sanitized: String = base
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, '.' | '-' | '_' | ' ') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    sanitized = sanitized.trim().trim_start_matches('.').to_string();
    if sanitized.is_empty() {
        sanitized = "attachment".to_string();
    }
    if sanitized.chars().count() > MAX_STORED_NAME_CHARS {
        let extension = Path::new(&sanitized)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .filter(|ext| ext.chars().count() < 16)
            .unwrap_or_default();
        let keep = MAX_STORED_NAME_CHARS - extension.chars().count();
        let stem: String = sanitized.chars().take(keep).collect();
        sanitized = format!("{stem}{extension}");
    }
    format!("{content_hash}_{sanitized}")
}

/// Writes through a hidden `.part` sibling so `downloads/` never holds a
/// truncated file.
fn write_blob(path: &Path, bytes: &[u8]) -> Result<(), FetchError> {
    let io_err = |source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = path.with_file_name(format!(".{file_name}.part"));
    fs::write(&partial, bytes).map_err(io_err)?;
    fs::rename(&partial, path).map_err(io_err)
}

fn append_result(path: &Path, result: &DownloadResult) -> Result<(), FetchError> {
    let io_err = |source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let line = serde_json::to_string(result).map_err(|source| {
        FetchError::Store(StoreError::Serialize {
            path: path.to_path_buf(),
            source,
        })
    })?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    writeln!(file, "{line}").map_err(io_err)
}

/// Latest download result per stored filename. Unreadable lines are skipped.
pub fn load_download_results(path: &Path) -> HashMap<String, DownloadResult> {
    let mut results = HashMap::new();
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return results,
        Err(err) => {
            warn!("cannot read {}: {}", path.display(), err);
            return results;
        }
    };
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("stopped reading {}: {}", path.display(), err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DownloadResult>(&line) {
            Ok(result) => {
                results.insert(result.filename.clone(), result);
            }
            Err(err) => warn!("{}:{} skipped: {}", path.display(), index + 1, err),
        }
    }
    results
}
