// Scheduling service client: uploads media to a social set and submits
// drafts for the connected platforms. Synchronous on purpose; every call
// runs to completion before the next step starts.

use crate::config::Settings;
use crate::errors::{truncate_body, AppError, AppResult};
use chrono::{DateTime, FixedOffset};
use reqwest::blocking::{Body, Client};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

const TRANSFER_BODY_CHARS: usize = 300;
const PUBLISH_BODY_CHARS: usize = 500;

/// Separator that splits X text into a thread of several posts.
pub const THREAD_SEPARATOR: &str = "\n\n\n\n";

/// Target platform of a draft. The wire name is the key used under
/// `platforms` in the draft payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Platform {
    X,
    LinkedIn,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::X, Platform::LinkedIn];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::X => "x",
            Platform::LinkedIn => "linkedin",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::X => "X",
            Platform::LinkedIn => "LinkedIn",
        }
    }

    /// Whether text may be split into a multi-post thread.
    pub fn supports_threads(&self) -> bool {
        matches!(self, Platform::X)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When the service should publish the draft.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Schedule {
    Now,
    #[default]
    NextFreeSlot,
    At(DateTime<FixedOffset>),
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Now => f.write_str("now"),
            Schedule::NextFreeSlot => f.write_str("next-free-slot"),
            Schedule::At(at) => f.write_str(&at.to_rfc3339()),
        }
    }
}

impl FromStr for Schedule {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "now" => Ok(Schedule::Now),
            "next-free-slot" => Ok(Schedule::NextFreeSlot),
            other => DateTime::parse_from_rfc3339(other)
                .map(Schedule::At)
                .map_err(|_| {
                    AppError::validation(
                        "schedule",
                        "expected 'now', 'next-free-slot' or an RFC 3339 time",
                    )
                }),
        }
    }
}

impl Serialize for Schedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Processing state reported by the media status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaStatus {
    Pending,
    Ready,
    Failed,
}

impl MediaStatus {
    /// Anything other than `ready` or `failed` is still pending.
    fn from_wire(raw: Option<&str>) -> Self {
        match raw {
            Some("ready") => MediaStatus::Ready,
            Some("failed") => MediaStatus::Failed,
            _ => MediaStatus::Pending,
        }
    }
}

/// A tracked upload and the last status observed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle {
    pub media_id: String,
    pub status: MediaStatus,
}

/// Media the service has reported as `ready`. Only the client creates
/// these, so a draft can never reference unprocessed media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyMedia(String);

impl ReadyMedia {
    pub(crate) fn observed(media_id: &str) -> Self {
        ReadyMedia(media_id.to_string())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Response of the upload-URL request.
#[derive(Debug, Deserialize)]
pub struct UploadTarget {
    pub media_id: String,
    pub upload_url: String,
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    file_name: &'a str,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: Option<String>,
}

/// One post on one platform.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub platform: Platform,
    pub text: String,
    pub media: Vec<ReadyMedia>,
    pub schedule: Schedule,
}

impl PublishRequest {
    pub fn new(platform: Platform, text: &str) -> Self {
        PublishRequest {
            platform,
            text: text.to_string(),
            media: Vec::new(),
            schedule: Schedule::default(),
        }
    }

    pub fn with_media(mut self, media: &[ReadyMedia]) -> Self {
        self.media = media.to_vec();
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Split into posts. Only thread-capable platforms split on
    /// `THREAD_SEPARATOR`; media attaches to the first post.
    fn posts(&self) -> Vec<PostPayload> {
        let mut posts: Vec<PostPayload> =
            if self.platform.supports_threads() && self.text.contains(THREAD_SEPARATOR) {
                self.text
                    .split(THREAD_SEPARATOR)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PostPayload::text)
                    .collect()
            } else {
                vec![PostPayload::text(self.text.trim())]
            };

        if let Some(first) = posts.first_mut() {
            first.media_ids = self.media.iter().map(|m| m.id().to_string()).collect();
        }
        posts
    }

    fn to_payload(&self) -> DraftPayload {
        let mut platforms = BTreeMap::new();
        platforms.insert(
            self.platform.as_str(),
            PlatformPayload {
                enabled: true,
                posts: self.posts(),
                settings: PlatformSettings {},
            },
        );
        DraftPayload {
            platforms,
            publish_at: self.schedule.clone(),
        }
    }
}

#[derive(Serialize)]
struct DraftPayload {
    platforms: BTreeMap<&'static str, PlatformPayload>,
    publish_at: Schedule,
}

#[derive(Serialize)]
struct PlatformPayload {
    enabled: bool,
    posts: Vec<PostPayload>,
    settings: PlatformSettings,
}

#[derive(Serialize)]
struct PlatformSettings {}

#[derive(Debug, Serialize)]
struct PostPayload {
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    media_ids: Vec<String>,
}

impl PostPayload {
    fn text(text: &str) -> Self {
        PostPayload {
            text: text.to_string(),
            media_ids: Vec::new(),
        }
    }
}

/// The service may return the draft id as a string or a number, so keep
/// it loose until it is rendered.
#[derive(Deserialize)]
struct DraftResponse {
    #[serde(default)]
    id: serde_json::Value,
}

/// Service-assigned identifier of a submitted draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    pub draft_id: String,
}

/// Blocking client bound to one social set. Holds the bearer token headers
/// and the polling parameters used while media is processed.
#[derive(Clone)]
pub struct SchedulerClient {
    client: Client,
    base_url: String,
    social_set_id: String,
    headers: HeaderMap,
    poll_attempts: u32,
    poll_interval: Duration,
    scratch_dir: Option<PathBuf>,
}

impl SchedulerClient {
    pub fn new(settings: &Settings) -> AppResult<Self> {
        let client = Client::builder().timeout(settings.http_timeout).build()?;
        Ok(SchedulerClient {
            client,
            base_url: settings.typefully_base_url.trim_end_matches('/').to_string(),
            social_set_id: settings.social_set_id.clone(),
            headers: auth_headers(&settings.typefully_api_key)?,
            poll_attempts: settings.poll_attempts,
            poll_interval: settings.poll_interval,
            scratch_dir: settings.scratch_dir.clone(),
        })
    }

    fn social_set_url(&self, path: &str) -> String {
        format!(
            "{}/v2/social-sets/{}/{}",
            self.base_url, self.social_set_id, path
        )
    }

    /// Ask the service for a media id and a pre-signed upload URL.
    pub fn request_upload(&self, file_name: &str) -> AppResult<UploadTarget> {
        let res = self
            .client
            .post(self.social_set_url("media/upload"))
            .headers(self.headers.clone())
            .json(&UploadRequest { file_name })
            .send()?;
        let status = res.status();
        let txt = res.text().unwrap_or_else(|_| "".into());
        if !status.is_success() {
            return Err(AppError::UploadSetup {
                status: status.as_u16(),
                body: truncate_body(&txt, TRANSFER_BODY_CHARS),
            });
        }
        let target: UploadTarget = serde_json::from_str(&txt)?;
        log::info!("Got upload URL, media_id: {}", target.media_id);
        Ok(target)
    }

    /// PUT the bytes to the pre-signed URL. The bytes are spooled to a
    /// temporary file that is removed when this returns, whatever the outcome.
    /// No auth or content-type headers: the URL's signature covers the request.
    pub fn transfer(&self, upload_url: &str, bytes: &[u8], extension: &str) -> AppResult<()> {
        let spool = self.spool(bytes, extension)?;
        log::debug!(
            "Spooled {} bytes to {}",
            bytes.len(),
            spool.path().display()
        );

        let body = Body::from(spool.reopen()?);
        let res = self.client.put(upload_url).body(body).send()?;
        let status = res.status();
        if !status.is_success() {
            let txt = res.text().unwrap_or_else(|_| "".into());
            return Err(AppError::Transfer {
                status: status.as_u16(),
                body: truncate_body(&txt, TRANSFER_BODY_CHARS),
            });
        }
        log::info!("Uploaded {} bytes", bytes.len());
        Ok(())
    }

    fn spool(&self, bytes: &[u8], extension: &str) -> AppResult<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        let suffix = format!(".{}", extension);
        builder.prefix("socialpost-upload-").suffix(&suffix);
        let mut file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(bytes)?;
        file.flush()?;
        Ok(file)
    }

    /// One observation of the media's processing status.
    pub fn media_status(&self, media_id: &str) -> AppResult<MediaHandle> {
        let res = self
            .client
            .get(self.social_set_url(&format!("media/{}", media_id)))
            .headers(self.headers.clone())
            .send()?;
        let status = res.status();
        let txt = res.text()?;
        if !status.is_success() {
            return Err(AppError::StatusCheck {
                status: status.as_u16(),
                body: truncate_body(&txt, TRANSFER_BODY_CHARS),
            });
        }
        let parsed: StatusResponse = serde_json::from_str(&txt)?;
        Ok(MediaHandle {
            media_id: media_id.to_string(),
            status: MediaStatus::from_wire(parsed.status.as_deref()),
        })
    }

    /// Poll until the media is `ready` or `failed`, at most `poll_attempts`
    /// observations spaced by `poll_interval`. A status check that errors
    /// counts as a pending observation.
    pub fn wait_until_ready(&self, media_id: &str) -> AppResult<ReadyMedia> {
        for attempt in 1..=self.poll_attempts {
            if attempt > 1 {
                thread::sleep(self.poll_interval);
            }
            match self.media_status(media_id) {
                Ok(handle) => match handle.status {
                    MediaStatus::Ready => {
                        log::info!("Media {} ready after {} checks", media_id, attempt);
                        return Ok(ReadyMedia::observed(media_id));
                    }
                    MediaStatus::Failed => {
                        return Err(AppError::Processing {
                            media_id: media_id.to_string(),
                        });
                    }
                    MediaStatus::Pending => log::debug!(
                        "Waiting for processing... ({}/{})",
                        attempt,
                        self.poll_attempts
                    ),
                },
                Err(e) => log::warn!(
                    "Status check {}/{} for {} failed: {}",
                    attempt,
                    self.poll_attempts,
                    media_id,
                    e
                ),
            }
        }
        Err(AppError::Timeout {
            media_id: media_id.to_string(),
            attempts: self.poll_attempts,
        })
    }

    /// Full upload: request target, transfer, wait for processing.
    pub fn upload_media(&self, bytes: &[u8], file_name: &str) -> AppResult<ReadyMedia> {
        if bytes.is_empty() {
            return Err(AppError::validation("image", "no image data to upload"));
        }
        let target = self.request_upload(file_name)?;
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png");
        self.transfer(&target.upload_url, bytes, extension)?;
        self.wait_until_ready(&target.media_id)
    }

    /// Submit a draft for one platform. Never retried.
    pub fn publish(&self, req: &PublishRequest) -> AppResult<PublishResult> {
        if req.text.trim().is_empty() {
            return Err(AppError::validation("text", "post text is empty"));
        }
        let payload = req.to_payload();
        let res = self
            .client
            .post(self.social_set_url("drafts"))
            .headers(self.headers.clone())
            .json(&payload)
            .send()?;
        let status = res.status();
        let txt = res.text().unwrap_or_else(|_| "".into());
        if !status.is_success() {
            return Err(AppError::Publish {
                platform: req.platform,
                status: status.as_u16(),
                body: truncate_body(&txt, PUBLISH_BODY_CHARS),
            });
        }
        let draft: DraftResponse = serde_json::from_str(&txt)?;
        let draft_id = match draft.id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => "N/A".to_string(),
            other => other.to_string(),
        };
        log::info!("Published to {}: draft {}", req.platform, draft_id);
        Ok(PublishResult { draft_id })
    }
}

/// Bearer token plus JSON content type, sent on every call to the service.
fn auth_headers(token: &str) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    let val = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| AppError::Config("TYPEFULLY_API_KEY is not a valid header value".into()))?;
    headers.insert(AUTHORIZATION, val);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}
