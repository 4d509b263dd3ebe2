// One parameterized run: image, then media upload, then a draft per platform.
// Image and upload failures are not fatal; publishing continues without
// media. Every platform gets exactly one attempt regardless of the others.

use crate::api::{
    Platform, PublishRequest, PublishResult, ReadyMedia, Schedule, SchedulerClient,
};
use crate::config::Settings;
use crate::errors::{AppError, AppResult};
use crate::imagegen::{GenerationRequest, ImageGenerator};
use std::path::{Path, PathBuf};

/// Where the post image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Generate(GenerationRequest),
    File(PathBuf),
}

/// Everything one run needs. Build with `Campaign::builder()`.
#[derive(Debug, Clone)]
pub struct Campaign {
    pub image: Option<ImageSource>,
    pub posts: Vec<(Platform, String)>,
    pub schedule: Schedule,
    pub save_image_to: Option<PathBuf>,
    /// File name sent to the service, without extension.
    pub upload_name: String,
}

impl Campaign {
    pub fn builder() -> CampaignBuilder {
        CampaignBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct CampaignBuilder {
    prompt: Option<String>,
    aspect_ratio: Option<String>,
    image_size: Option<String>,
    image_file: Option<PathBuf>,
    posts: Vec<(Platform, String)>,
    schedule: Schedule,
    save_image_to: Option<PathBuf>,
    upload_name: Option<String>,
}

impl CampaignBuilder {
    pub fn image_prompt(mut self, prompt: &str) -> Self {
        self.prompt = Some(prompt.to_string());
        self
    }

    pub fn aspect_ratio(mut self, aspect_ratio: &str) -> Self {
        self.aspect_ratio = Some(aspect_ratio.to_string());
        self
    }

    pub fn image_size(mut self, image_size: &str) -> Self {
        self.image_size = Some(image_size.to_string());
        self
    }

    /// Use an existing image instead of generating one.
    pub fn image_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_file = Some(path.into());
        self
    }

    pub fn post(mut self, platform: Platform, text: &str) -> Self {
        self.posts.retain(|(p, _)| *p != platform);
        self.posts.push((platform, text.to_string()));
        self
    }

    pub fn post_from_file(self, platform: Platform, path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(self.post(platform, text.trim()))
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn save_image_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_image_to = Some(path.into());
        self
    }

    pub fn upload_name(mut self, name: &str) -> Self {
        self.upload_name = Some(name.to_string());
        self
    }

    pub fn build(self) -> AppResult<Campaign> {
        if self.posts.is_empty() {
            return Err(AppError::validation(
                "posts",
                "at least one platform needs post text",
            ));
        }
        if let Some((platform, _)) = self.posts.iter().find(|(_, t)| t.trim().is_empty()) {
            return Err(AppError::validation(
                "posts",
                &format!("{} post text is empty", platform.display_name()),
            ));
        }
        if self.prompt.is_some() && self.image_file.is_some() {
            return Err(AppError::validation(
                "image",
                "give either a prompt or an image file, not both",
            ));
        }

        let image = match (self.prompt, self.image_file) {
            (Some(prompt), None) => {
                let mut req = GenerationRequest::new(&prompt);
                if let Some(ar) = &self.aspect_ratio {
                    req = req.with_aspect_ratio(ar);
                }
                if let Some(size) = &self.image_size {
                    req = req.with_image_size(size);
                }
                Some(ImageSource::Generate(req))
            }
            (None, Some(path)) => Some(ImageSource::File(path)),
            _ => None,
        };

        Ok(Campaign {
            image,
            posts: self.posts,
            schedule: self.schedule,
            save_image_to: self.save_image_to,
            upload_name: self.upload_name.unwrap_or_else(|| "post-image".into()),
        })
    }
}

/// Steps reported to the caller while a run progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Image,
    Upload,
    Publish(Platform),
}

#[derive(Debug)]
pub enum Event<'a> {
    Started(Stage),
    Succeeded(Stage, String),
    Failed(Stage, &'a AppError),
}

#[derive(Debug)]
pub struct PlatformOutcome {
    pub platform: Platform,
    pub result: AppResult<PublishResult>,
}

/// What happened in each step of a run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub image_bytes: Option<usize>,
    pub image_error: Option<AppError>,
    pub media: Option<ReadyMedia>,
    pub upload_error: Option<AppError>,
    pub publishes: Vec<PlatformOutcome>,
}

impl RunReport {
    pub fn all_published(&self) -> bool {
        self.publishes.iter().all(|o| o.result.is_ok())
    }

    pub fn failed_platforms(&self) -> Vec<Platform> {
        self.publishes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.platform)
            .collect()
    }
}

struct ImageData {
    bytes: Vec<u8>,
    extension: String,
}

pub struct Pipeline {
    generator: ImageGenerator,
    scheduler: SchedulerClient,
}

impl Pipeline {
    pub fn new(settings: &Settings) -> AppResult<Self> {
        Ok(Pipeline {
            generator: ImageGenerator::new(settings)?,
            scheduler: SchedulerClient::new(settings)?,
        })
    }

    pub fn run(&self, campaign: &Campaign) -> RunReport {
        self.run_with(campaign, |_| {})
    }

    /// Run every step, reporting progress through `on_event`.
    pub fn run_with<F>(&self, campaign: &Campaign, mut on_event: F) -> RunReport
    where
        F: FnMut(Event<'_>),
    {
        let mut report = RunReport::default();

        let image = campaign.image.as_ref().and_then(|source| {
            on_event(Event::Started(Stage::Image));
            match self.load_image(source) {
                Ok(image) => {
                    report.image_bytes = Some(image.bytes.len());
                    on_event(Event::Succeeded(
                        Stage::Image,
                        format!("{} bytes", image.bytes.len()),
                    ));
                    Some(image)
                }
                Err(e) => {
                    log::warn!("Continuing without image: {}", e);
                    on_event(Event::Failed(Stage::Image, &e));
                    report.image_error = Some(e);
                    None
                }
            }
        });

        if let (Some(image), Some(path)) = (&image, &campaign.save_image_to) {
            if let Err(e) = save_image(path, &image.bytes) {
                log::warn!("Could not save image to {}: {}", path.display(), e);
            }
        }

        if let Some(image) = image {
            on_event(Event::Started(Stage::Upload));
            let file_name = format!("{}.{}", campaign.upload_name, image.extension);
            match self.scheduler.upload_media(&image.bytes, &file_name) {
                Ok(media) => {
                    on_event(Event::Succeeded(
                        Stage::Upload,
                        format!("media id {}", media.id()),
                    ));
                    report.media = Some(media);
                }
                Err(e) => {
                    log::warn!("Continuing without image: {}", e);
                    on_event(Event::Failed(Stage::Upload, &e));
                    report.upload_error = Some(e);
                }
            }
        }

        let media: Vec<ReadyMedia> = report.media.iter().cloned().collect();
        for (platform, text) in &campaign.posts {
            let stage = Stage::Publish(*platform);
            on_event(Event::Started(stage));
            let req = PublishRequest::new(*platform, text)
                .with_media(&media)
                .with_schedule(campaign.schedule.clone());
            let result = self.scheduler.publish(&req);
            match &result {
                Ok(draft) => on_event(Event::Succeeded(stage, format!("draft {}", draft.draft_id))),
                Err(e) => {
                    log::error!("{} publishing failed: {}", platform.display_name(), e);
                    on_event(Event::Failed(stage, e));
                }
            }
            report.publishes.push(PlatformOutcome {
                platform: *platform,
                result,
            });
        }

        report
    }

    /// Generate an image and upload it, without publishing anything.
    pub fn test_image(&self, req: &GenerationRequest) -> AppResult<(usize, ReadyMedia)> {
        let image = self.generator.generate(req)?;
        let file_name = format!("test-image.{}", image.extension());
        let media = self.scheduler.upload_media(&image.bytes, &file_name)?;
        Ok((image.bytes.len(), media))
    }

    fn load_image(&self, source: &ImageSource) -> AppResult<ImageData> {
        match source {
            ImageSource::Generate(req) => {
                let image = self.generator.generate(req)?;
                Ok(ImageData {
                    extension: image.extension().to_string(),
                    bytes: image.bytes,
                })
            }
            ImageSource::File(path) => {
                let bytes = std::fs::read(path)?;
                let extension = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("png")
                    .to_ascii_lowercase();
                Ok(ImageData { bytes, extension })
            }
        }
    }
}

fn save_image(path: &Path, bytes: &[u8]) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    log::info!("Image saved: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_settings;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use mockito::{Matcher, Server};
    use serde_json::json;

    const DRAFTS_PATH: &str = "/v2/social-sets/273/drafts";

    fn pipeline(gemini: &Server, typefully: &Server, scratch: &Path) -> Pipeline {
        let settings = test_settings(&gemini.url(), &typefully.url()).with_scratch_dir(scratch);
        Pipeline::new(&settings).unwrap()
    }

    /// Upload-URL, transfer and status mocks. The upload-URL mock is first,
    /// the transfer mock second and it only matches `body`.
    fn mock_media_flow(server: &mut Server, file_name: &str, body: &str) -> Vec<mockito::Mock> {
        let target = json!({"media_id": "m-9", "upload_url": format!("{}/s3/put", server.url())});
        vec![
            server
                .mock("POST", "/v2/social-sets/273/media/upload")
                .match_body(Matcher::Json(json!({ "file_name": file_name })))
                .with_status(200)
                .with_body(target.to_string())
                .expect(1)
                .create(),
            server
                .mock("PUT", "/s3/put")
                .match_body(body)
                .with_status(200)
                .expect(1)
                .create(),
            server
                .mock("GET", "/v2/social-sets/273/media/m-9")
                .with_status(200)
                .with_body(r#"{"status":"ready"}"#)
                .create(),
        ]
    }

    #[test]
    fn builder_requires_a_post() {
        let err = Campaign::builder().image_prompt("x").build().unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn builder_rejects_prompt_and_file_together() {
        let err = Campaign::builder()
            .post(Platform::X, "hi")
            .image_prompt("x")
            .image_file("a.png")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("not both"));
    }

    #[test]
    fn builder_keeps_last_text_per_platform() {
        let campaign = Campaign::builder()
            .post(Platform::X, "draft one")
            .post(Platform::LinkedIn, "li")
            .post(Platform::X, "draft two")
            .image_prompt("robots")
            .aspect_ratio("1:1")
            .build()
            .unwrap();
        assert_eq!(
            campaign.posts,
            vec![
                (Platform::LinkedIn, "li".to_string()),
                (Platform::X, "draft two".to_string())
            ]
        );
        match campaign.image {
            Some(ImageSource::Generate(req)) => assert_eq!(req.aspect_ratio, "1:1"),
            other => panic!("unexpected image source: {other:?}"),
        }
        assert_eq!(campaign.upload_name, "post-image");
    }

    #[test]
    fn post_text_can_come_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x-post.txt");
        std::fs::write(&path, "\n  from disk \n").unwrap();
        let campaign = Campaign::builder()
            .post_from_file(Platform::X, &path)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(campaign.posts[0].1, "from disk");
    }

    #[test]
    fn generation_failure_still_publishes_without_media() {
        let mut gemini = Server::new();
        let mut typefully = Server::new();
        let scratch = tempfile::tempdir().unwrap();
        let models = gemini.mock("POST", Matcher::Any).with_status(500).expect(2).create();
        let upload = typefully
            .mock("POST", "/v2/social-sets/273/media/upload")
            .expect(0)
            .create();
        let drafts = typefully
            .mock("POST", DRAFTS_PATH)
            .match_body(Matcher::Json(json!({
                "platforms": {"x": {"enabled": true, "posts": [{"text": "hello"}], "settings": {}}},
                "publish_at": "now"
            })))
            .with_status(200)
            .with_body(r#"{"id":"d-1"}"#)
            .expect(1)
            .create();

        let campaign = Campaign::builder()
            .image_prompt("waves")
            .post(Platform::X, "hello")
            .schedule(Schedule::Now)
            .build()
            .unwrap();
        let report = pipeline(&gemini, &typefully, scratch.path()).run(&campaign);

        assert!(matches!(report.image_error, Some(AppError::Generation { .. })));
        assert!(report.media.is_none());
        assert!(report.all_published());
        models.assert();
        upload.assert();
        drafts.assert();
    }

    #[test]
    fn one_platform_failing_does_not_stop_the_other() {
        let gemini = Server::new();
        let mut typefully = Server::new();
        let scratch = tempfile::tempdir().unwrap();
        let x = typefully
            .mock("POST", DRAFTS_PATH)
            .match_body(Matcher::PartialJson(json!({"platforms": {"x": {"enabled": true}}})))
            .with_status(500)
            .with_body("boom")
            .expect(1)
            .create();
        let linkedin = typefully
            .mock("POST", DRAFTS_PATH)
            .match_body(Matcher::PartialJson(json!({"platforms": {"linkedin": {"enabled": true}}})))
            .with_status(200)
            .with_body(r#"{"id":"li-1"}"#)
            .expect(1)
            .create();

        let campaign = Campaign::builder()
            .post(Platform::X, "x text")
            .post(Platform::LinkedIn, "linkedin text")
            .build()
            .unwrap();
        let report = pipeline(&gemini, &typefully, scratch.path()).run(&campaign);

        assert_eq!(report.publishes.len(), 2);
        assert_eq!(report.failed_platforms(), vec![Platform::X]);
        let li = &report.publishes[1];
        assert_eq!(li.result.as_ref().unwrap().draft_id, "li-1");
        x.assert();
        linkedin.assert();
    }

    #[test]
    fn generated_image_is_uploaded_and_attached() {
        let mut gemini = Server::new();
        let mut typefully = Server::new();
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let saved = out.path().join("nested").join("image.jpg");

        let image = json!({"candidates": [{"content": {"parts": [
            {"inlineData": {"mimeType": "image/jpeg", "data": STANDARD.encode(b"jpeg!")}}
        ]}}]});
        let _model = gemini
            .mock("POST", Matcher::Regex("gemini-3-pro-image-preview".into()))
            .with_status(200)
            .with_body(image.to_string())
            .create();
        let media_mocks = mock_media_flow(&mut typefully, "post-image.jpg", "jpeg!");
        let drafts = typefully
            .mock("POST", DRAFTS_PATH)
            .match_body(Matcher::PartialJson(json!({
                "platforms": {"linkedin": {"posts": [{"text": "post", "media_ids": ["m-9"]}]}}
            })))
            .with_status(200)
            .with_body(r#"{"id":"d-2"}"#)
            .expect(1)
            .create();

        let campaign = Campaign::builder()
            .image_prompt("skyline")
            .post(Platform::LinkedIn, "post")
            .save_image_to(&saved)
            .build()
            .unwrap();

        let mut stages = Vec::new();
        let report =
            pipeline(&gemini, &typefully, scratch.path()).run_with(&campaign, |event| {
                if let Event::Succeeded(stage, _) = event {
                    stages.push(stage);
                }
            });

        assert_eq!(report.image_bytes, Some(5));
        assert_eq!(report.media.as_ref().map(|m| m.id()), Some("m-9"));
        assert!(report.all_published());
        assert_eq!(
            stages,
            vec![Stage::Image, Stage::Upload, Stage::Publish(Platform::LinkedIn)]
        );
        assert_eq!(std::fs::read(&saved).unwrap(), b"jpeg!");
        media_mocks[0].assert();
        media_mocks[1].assert();
        drafts.assert();
    }

    fn png_response(bytes: &[u8]) -> String {
        json!({"candidates": [{"content": {"parts": [
            {"text": "here you go"},
            {"inlineData": {"mimeType": "image/png", "data": STANDARD.encode(bytes)}}
        ]}}]})
        .to_string()
    }

    #[test]
    fn test_image_uploads_without_publishing() {
        let mut gemini = Server::new();
        let mut typefully = Server::new();
        let scratch = tempfile::tempdir().unwrap();
        let _model = gemini
            .mock("POST", Matcher::Regex("gemini-3-pro-image-preview".into()))
            .with_status(200)
            .with_body(png_response(b"png-bytes"))
            .create();
        let media_mocks = mock_media_flow(&mut typefully, "test-image.png", "png-bytes");
        let drafts = typefully.mock("POST", DRAFTS_PATH).expect(0).create();

        let (size, media) = pipeline(&gemini, &typefully, scratch.path())
            .test_image(&GenerationRequest::new("waves"))
            .unwrap();

        assert_eq!(size, 9);
        assert_eq!(media.id(), "m-9");
        media_mocks[0].assert();
        media_mocks[1].assert();
        drafts.assert();
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_image_stops_before_upload_when_generation_fails() {
        let mut gemini = Server::new();
        let mut typefully = Server::new();
        let scratch = tempfile::tempdir().unwrap();
        let models = gemini
            .mock("POST", Matcher::Any)
            .with_status(503)
            .with_body("overloaded")
            .expect(2)
            .create();
        let upload = typefully.mock("POST", Matcher::Any).expect(0).create();
        let put = typefully.mock("PUT", Matcher::Any).expect(0).create();

        let err = pipeline(&gemini, &typefully, scratch.path())
            .test_image(&GenerationRequest::new("waves"))
            .unwrap_err();

        assert!(matches!(err, AppError::Generation { .. }));
        models.assert();
        upload.assert();
        put.assert();
    }
}
