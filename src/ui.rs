// UI layer: command line parsing with `clap`, an interactive menu with
// `dialoguer`, and `indicatif` spinners while each step runs. All network
// work is delegated to `pipeline`.

use crate::api::{Platform, Schedule};
use crate::imagegen::GenerationRequest;
use crate::pipeline::{Campaign, Event, Pipeline, RunReport, Stage};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dialoguer::{Confirm, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

pub const TEST_PROMPT: &str =
    "Abstract digital art with flowing blue and purple waves, modern tech aesthetic, no text";

const ASPECT_RATIOS: [&str; 4] = ["16:9", "1:1", "4:3", "9:16"];

#[derive(Parser, Debug)]
#[command(
    name = "socialpost",
    version,
    about = "Generate a post image and publish drafts to X and LinkedIn"
)]
pub struct Cli {
    /// Load environment variables from this file instead of ./.env
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Show info-level logs
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate (or load) an image, upload it and publish the posts
    Run(RunArgs),
    /// Generate an image and upload it without publishing anything
    TestImage {
        #[arg(long, default_value = TEST_PROMPT)]
        prompt: String,
        #[arg(long, default_value = "16:9")]
        aspect_ratio: String,
    },
    /// Interactive menu (default)
    Menu,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Prompt for the generated image
    #[arg(long)]
    pub prompt: Option<String>,
    /// Attach an existing image instead of generating one
    #[arg(long, conflicts_with = "prompt")]
    pub image: Option<PathBuf>,
    #[arg(long, default_value = "16:9")]
    pub aspect_ratio: String,
    #[arg(long, default_value = "2K")]
    pub image_size: String,
    /// Text for X. Separate thread posts with three blank lines
    #[arg(long, conflicts_with = "x_file")]
    pub x_text: Option<String>,
    #[arg(long)]
    pub x_file: Option<PathBuf>,
    #[arg(long, conflicts_with = "linkedin_file")]
    pub linkedin_text: Option<String>,
    #[arg(long)]
    pub linkedin_file: Option<PathBuf>,
    /// `now`, `next-free-slot` or an RFC 3339 time
    #[arg(long, default_value = "now", value_parser = parse_schedule)]
    pub schedule: Schedule,
    /// Also write the image to this path
    #[arg(long)]
    pub save_image: Option<PathBuf>,
    #[arg(long, default_value = "post-image")]
    pub upload_name: String,
}

fn parse_schedule(raw: &str) -> Result<Schedule, String> {
    raw.parse().map_err(|e: crate::errors::AppError| e.to_string())
}

impl RunArgs {
    pub fn into_campaign(self) -> Result<Campaign> {
        let mut builder = Campaign::builder()
            .aspect_ratio(&self.aspect_ratio)
            .image_size(&self.image_size)
            .schedule(self.schedule)
            .upload_name(&self.upload_name);
        if let Some(prompt) = &self.prompt {
            builder = builder.image_prompt(prompt);
        }
        if let Some(image) = self.image {
            builder = builder.image_file(image);
        }
        if let Some(path) = self.save_image {
            builder = builder.save_image_to(path);
        }
        if let Some(text) = &self.x_text {
            builder = builder.post(Platform::X, text);
        }
        if let Some(path) = &self.x_file {
            builder = builder
                .post_from_file(Platform::X, path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
        }
        if let Some(text) = &self.linkedin_text {
            builder = builder.post(Platform::LinkedIn, text);
        }
        if let Some(path) = &self.linkedin_file {
            builder = builder
                .post_from_file(Platform::LinkedIn, path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
        }
        Ok(builder.build()?)
    }
}

/// Run a parsed command. Returns `false` when something the user asked for
/// did not happen, so `main` can exit non-zero.
pub fn dispatch(pipeline: &Pipeline, command: Command) -> Result<bool> {
    match command {
        Command::Run(args) => {
            let campaign = args.into_campaign()?;
            Ok(publish_campaign(pipeline, &campaign))
        }
        Command::TestImage {
            prompt,
            aspect_ratio,
        } => {
            let req = GenerationRequest::new(&prompt).with_aspect_ratio(&aspect_ratio);
            Ok(test_image_upload(pipeline, &req))
        }
        Command::Menu => {
            main_menu(pipeline)?;
            Ok(true)
        }
    }
}

/// Main interactive menu, loops until "Exit" is chosen.
pub fn main_menu(pipeline: &Pipeline) -> Result<()> {
    loop {
        let items = vec!["Generate image & publish", "Test image upload", "Exit"];
        let selection = Select::new().items(&items).default(0).interact()?;
        match selection {
            0 => {
                if let Some(campaign) = collect_campaign()? {
                    publish_campaign(pipeline, &campaign);
                }
            }
            1 => {
                let prompt: String = Input::new()
                    .with_prompt("Image prompt")
                    .default(TEST_PROMPT.to_string())
                    .interact_text()?;
                test_image_upload(pipeline, &GenerationRequest::new(&prompt));
            }
            _ => break,
        }
    }
    Ok(())
}

/// Ask for everything a campaign needs. `None` if the user backs out.
fn collect_campaign() -> Result<Option<Campaign>> {
    let prompt: String = Input::new()
        .with_prompt("Image prompt (blank for no image)")
        .allow_empty(true)
        .interact_text()?;

    let mut builder = Campaign::builder();
    if !prompt.trim().is_empty() {
        let ratio = Select::new()
            .with_prompt("Aspect ratio")
            .items(&ASPECT_RATIOS)
            .default(0)
            .interact()?;
        builder = builder
            .image_prompt(&prompt)
            .aspect_ratio(ASPECT_RATIOS[ratio]);
    }

    for platform in Platform::ALL {
        let wanted = Confirm::new()
            .with_prompt(format!("Publish to {}?", platform.display_name()))
            .default(true)
            .interact()?;
        if !wanted {
            continue;
        }
        let sources = vec!["Read from file", "Type text"];
        match Select::new().items(&sources).default(0).interact()? {
            0 => {
                let path: String = Input::new()
                    .with_prompt(format!("{} post file", platform.display_name()))
                    .interact_text()?;
                match builder.post_from_file(platform, &PathBuf::from(path.trim())) {
                    Ok(b) => builder = b,
                    Err(e) => {
                        println!("Could not read post file: {}", e);
                        return Ok(None);
                    }
                }
            }
            _ => {
                let text: String = Input::new()
                    .with_prompt(format!("{} post text", platform.display_name()))
                    .interact_text()?;
                builder = builder.post(platform, &text);
            }
        }
    }

    let schedules = vec!["now", "next-free-slot", "at a specific time"];
    let schedule = match Select::new()
        .with_prompt("When")
        .items(&schedules)
        .default(0)
        .interact()?
    {
        0 => Schedule::Now,
        1 => Schedule::NextFreeSlot,
        _ => Input::<String>::new()
            .with_prompt("Time (RFC 3339, e.g. 2026-01-05T09:00:00-05:00)")
            .validate_with(|s: &String| {
                s.parse::<Schedule>()
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
            .interact_text()?
            .parse::<Schedule>()?,
    };

    match builder.schedule(schedule).build() {
        Ok(campaign) => Ok(Some(campaign)),
        Err(e) => {
            println!("{}", e);
            Ok(None)
        }
    }
}

fn spinner(msg: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(msg);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

fn stage_label(stage: Stage) -> String {
    match stage {
        Stage::Image => "Preparing image...".into(),
        Stage::Upload => "Uploading image...".into(),
        Stage::Publish(p) => format!("Publishing to {}...", p.display_name()),
    }
}

/// Run the full pipeline with a spinner per step and print a summary.
pub fn publish_campaign(pipeline: &Pipeline, campaign: &Campaign) -> bool {
    println!("{}", "=".repeat(60));
    println!("Publishing to {}", platform_list(campaign));
    println!("{}", "=".repeat(60));

    let mut current: Option<ProgressBar> = None;
    let report = pipeline.run_with(campaign, |event| match event {
        Event::Started(stage) => current = Some(spinner(stage_label(stage))),
        Event::Succeeded(stage, detail) => {
            if let Some(s) = current.take() {
                s.finish_with_message(format!("✓ {} {}", stage_label(stage), detail));
            }
        }
        Event::Failed(stage, err) => {
            if let Some(s) = current.take() {
                s.finish_with_message(format!("✗ {} {}", stage_label(stage), err));
            }
            if matches!(stage, Stage::Image | Stage::Upload) {
                println!("  Continuing without image...");
            }
        }
    });

    print_summary(&report)
}

fn platform_list(campaign: &Campaign) -> String {
    campaign
        .posts
        .iter()
        .map(|(p, _)| p.display_name())
        .collect::<Vec<_>>()
        .join(" and ")
}

fn print_summary(report: &RunReport) -> bool {
    println!();
    for outcome in &report.publishes {
        match &outcome.result {
            Ok(draft) => println!(
                "✓ {}: draft ID {}",
                outcome.platform.display_name(),
                draft.draft_id
            ),
            Err(e) => println!("✗ {}: {}", outcome.platform.display_name(), e),
        }
    }
    let ok = report.all_published();
    if ok {
        println!("✓ Published to every platform. Check the drafts in your scheduler.");
    }
    ok
}

/// Generate and upload a single image, reporting the media id.
pub fn test_image_upload(pipeline: &Pipeline, req: &GenerationRequest) -> bool {
    let s = spinner("Generating and uploading test image...".into());
    match pipeline.test_image(req) {
        Ok((size, media)) => {
            s.finish_with_message(format!(
                "✓ Image upload test passed: {} bytes, media ID {}",
                size,
                media.id()
            ));
            true
        }
        Err(e) => {
            s.finish_with_message(format!("✗ Failed: {}", e));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ImageSource;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("socialpost").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn run_args_build_a_campaign() {
        let cli = parse(&[
            "run",
            "--prompt",
            "city at night",
            "--aspect-ratio",
            "1:1",
            "--x-text",
            "hello",
            "--schedule",
            "next-free-slot",
        ]);
        let Some(Command::Run(args)) = cli.command else {
            panic!("expected run");
        };
        let campaign = args.into_campaign().unwrap();
        assert_eq!(campaign.posts, vec![(Platform::X, "hello".to_string())]);
        assert_eq!(campaign.schedule, Schedule::NextFreeSlot);
        match campaign.image {
            Some(ImageSource::Generate(req)) => {
                assert_eq!(req.prompt, "city at night");
                assert_eq!(req.aspect_ratio, "1:1");
                assert_eq!(req.image_size, "2K");
            }
            other => panic!("unexpected image source: {other:?}"),
        }
    }

    #[test]
    fn schedule_defaults_to_now() {
        let cli = parse(&["run", "--linkedin-text", "hi"]);
        let Some(Command::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.schedule, Schedule::Now);
        assert!(args.into_campaign().unwrap().image.is_none());
    }

    #[test]
    fn bad_schedule_is_rejected_by_parser() {
        let result =
            Cli::try_parse_from(["socialpost", "run", "--x-text", "a", "--schedule", "soon"]);
        assert!(result.is_err());
    }

    #[test]
    fn prompt_and_image_conflict() {
        let result = Cli::try_parse_from([
            "socialpost", "run", "--x-text", "a", "--prompt", "p", "--image", "a.png",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn run_without_posts_fails_to_build() {
        let cli = parse(&["run", "--prompt", "p"]);
        let Some(Command::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert!(args.into_campaign().is_err());
    }

    #[test]
    fn test_image_uses_default_prompt() {
        let cli = parse(&["test-image"]);
        match cli.command {
            Some(Command::TestImage { prompt, aspect_ratio }) => {
                assert_eq!(prompt, TEST_PROMPT);
                assert_eq!(aspect_ratio, "16:9");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn no_subcommand_means_menu() {
        let cli = parse(&["--verbose"]);
        assert!(cli.command.is_none());
        assert!(cli.verbose);
    }
}
