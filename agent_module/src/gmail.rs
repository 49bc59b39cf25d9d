//! Gmail REST v1 client behind the [`MailProvider`] seam.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error};

use crate::google_auth::{GoogleAuth, GoogleAuthError};

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail auth error: {0}")]
    Auth(#[from] GoogleAuthError),
    #[error("mail http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mail api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected mail api response from {endpoint}: {source}")]
    Parse {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("attachment data is not valid base64url: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// One page of a message search.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub part_id: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    #[serde(default)]
    data: String,
}

impl Message {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload.as_ref().and_then(|payload| {
            payload
                .headers
                .iter()
                .find(|header| header.name.eq_ignore_ascii_case(name))
                .map(|header| header.value.as_str())
        })
    }

    pub fn subject(&self) -> &str {
        self.header("Subject").unwrap_or("(no subject)")
    }

    pub fn sender(&self) -> &str {
        self.header("From").unwrap_or("(unknown sender)")
    }

    /// Depth-first walk of the MIME tree collecting attachment parts.
    pub fn attachment_parts(&self) -> Vec<&MessagePart> {
        let mut found = Vec::new();
        if let Some(payload) = &self.payload {
            collect_attachments(payload, &mut found);
        }
        found
    }
}

impl MessagePart {
    /// Named part carrying either an attachment id or inline data.
    pub fn is_attachment(&self) -> bool {
        if self.filename.trim().is_empty() {
            return false;
        }
        self.body.as_ref().is_some_and(|body| {
            body.attachment_id.as_deref().is_some_and(|id| !id.is_empty())
                || body.data.as_deref().is_some_and(|data| !data.is_empty())
        })
    }
}

fn collect_attachments<'a>(part: &'a MessagePart, found: &mut Vec<&'a MessagePart>) {
    if part.is_attachment() {
        found.push(part);
    }
    for child in &part.parts {
        collect_attachments(child, found);
    }
}

/// Gmail serves base64url, sometimes padded.
pub fn decode_base64url(data: &str) -> Result<Vec<u8>, MailError> {
    let cleaned: String = data
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect();
    Ok(URL_SAFE_NO_PAD.decode(cleaned.trim_end_matches('='))?)
}

pub trait MailProvider {
    fn list_messages(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage, MailError>;

    fn get_message(&self, message_id: &str) -> Result<Message, MailError>;

    fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>, MailError>;
}

impl<P: MailProvider + ?Sized> MailProvider for &P {
    fn list_messages(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage, MailError> {
        (**self).list_messages(query, page_size, page_token)
    }

    fn get_message(&self, message_id: &str) -> Result<Message, MailError> {
        (**self).get_message(message_id)
    }

    fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>, MailError> {
        (**self).get_attachment(message_id, attachment_id)
    }
}

#[derive(Debug, Clone)]
pub struct GmailClient {
    base_url: String,
    auth: GoogleAuth,
    client: reqwest::blocking::Client,
}

impl GmailClient {
    pub fn new(
        base_url: impl Into<String>,
        auth: GoogleAuth,
        timeout: Duration,
    ) -> Result<Self, MailError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            client,
        })
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, MailError> {
        let token = self.auth.get_access_token()?;
        debug!("GET {}", url);
        let response = self.client.get(url).bearer_auth(token).send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            error!("gmail request failed: {} - {}", status, body);
            return Err(MailError::Api {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|source| MailError::Parse {
            endpoint: url.to_string(),
            source,
        })
    }
}

impl MailProvider for GmailClient {
    fn list_messages(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage, MailError> {
        let mut url = format!(
            "{}/users/me/messages?q={}&maxResults={}",
            self.base_url,
            urlencoding::encode(query),
            page_size
        );
        if let Some(token) = page_token {
            url.push_str("&pageToken=");
            url.push_str(&urlencoding::encode(token));
        }
        self.get_json(&url)
    }

    fn get_message(&self, message_id: &str) -> Result<Message, MailError> {
        let url = format!(
            "{}/users/me/messages/{}?format=full",
            self.base_url,
            urlencoding::encode(message_id)
        );
        self.get_json(&url)
    }

    fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>, MailError> {
        let url = format!(
            "{}/users/me/messages/{}/attachments/{}",
            self.base_url,
            urlencoding::encode(message_id),
            urlencoding::encode(attachment_id)
        );
        let body: AttachmentBody = self.get_json(&url)?;
        decode_base64url(&body.data)
    }
}
