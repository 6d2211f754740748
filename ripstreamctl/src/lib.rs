mod prompt;

use std::io;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use ripstream_core::{
    load_rip_config, DownloadReport, JobPaths, JobRequest, NotificationStatus, Pipeline,
    Priority, RipConfig, RunReport, SegmentRange, StageStatus, Termination, UrlTemplate,
};
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub use prompt::Prompter;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ripstream_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Template(#[from] ripstream_core::TemplateError),
    #[error(transparent)]
    Range(#[from] ripstream_core::RangeError),
    #[error(transparent)]
    Notify(#[from] ripstream_core::NotifyError),
    #[error(transparent)]
    Pipeline(#[from] ripstream_core::PipelineError),
    #[error("invalid {field}: {input:?} is not a non-negative integer")]
    InvalidNumber { field: &'static str, input: String },
    #[error("input closed while waiting for {0}")]
    MissingInput(String),
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Download .ts segments from a URL template and combine them into an .mp4 file",
    long_about = None
)]
pub struct Cli {
    /// Video name (like "S01E01 - Title")
    pub video_name: Option<String>,
    /// URL template, using {} or {:03d} for number placeholders
    #[arg(long, alias = "url_template", value_name = "URL")]
    pub url_template: Option<String>,
    /// First number in URL template to download
    #[arg(long, alias = "first_number", value_name = "INT")]
    pub first_number: Option<u64>,
    /// Last number to download; without it segments are fetched until the server answers 404
    #[arg(long, alias = "last_number", value_name = "INT")]
    pub last_number: Option<u64>,
    /// Send a Pushover notification when transcoding finishes (default)
    #[arg(long, overrides_with = "no_notify")]
    pub notify: bool,
    /// Disable the Pushover notification
    #[arg(long = "no-notify", overrides_with = "notify")]
    pub no_notify: bool,
    /// Priority of the notification: -2, -1, 0, 1 or 2
    #[arg(
        long,
        alias = "notification_level",
        value_name = "LEVEL",
        default_value_t = 0,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i64).range(-2..=2)
    )]
    pub notification_level: i64,
    /// Path to a ripstream.toml file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Directory job folders are created in (overrides paths.working_root)
    #[arg(long)]
    pub working_root: Option<PathBuf>,
    /// Hide download and combine progress bars
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Verbose logging (RUST_LOG takes precedence)
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    pub fn notify_enabled(&self) -> bool {
        !self.no_notify
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;
    let request = {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut prompter = Prompter::new(stdin.lock(), stdout.lock());
        context.resolve_request(&cli, &mut prompter)?
    };
    tracing::debug!(job = %request.name, template = ?request.template.as_ref().map(|t| t.as_str()), range = ?request.range, "resolved job");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(async {
        let pipeline = Pipeline::new(context.config.clone())?;
        pipeline.run(&request).await
    })?;
    render(&report, cli.format)
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: RipConfig,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => load_rip_config(path)?,
            None => RipConfig::default(),
        };
        if let Some(root) = &cli.working_root {
            config.paths.working_root = root.clone();
        }
        if cli.no_progress {
            config.display.show_progress = false;
        }
        config.validate()?;
        Ok(Self { config })
    }

    /// Fills in whatever the command line left out by asking on the prompter.
    /// No template is needed once the raw segment directory exists.
    fn resolve_request<R, W>(&self, cli: &Cli, prompter: &mut Prompter<R, W>) -> Result<JobRequest>
    where
        R: io::BufRead,
        W: io::Write,
    {
        let priority = Priority::try_from(cli.notification_level)?;
        let name = match &cli.video_name {
            Some(name) => name.clone(),
            None => prompter
                .ask("Video name (like \"S01E01 - Title\"): ")?
                .trim()
                .to_string(),
        };
        let paths = JobPaths::new(&self.config, &name)?;
        let request = JobRequest::new(name).with_notification(cli.notify_enabled(), priority);
        if paths.raw_dir.is_dir() {
            return Ok(request);
        }

        let template = match &cli.url_template {
            Some(raw) => UrlTemplate::parse(raw)?,
            None => {
                prompter.say(
                    "Please type a URL template and use \"{}\" as the placeholder for the video number.",
                )?;
                prompter.say(
                    "If there are leading zeros in the video number use \"{:03d}\" as the placeholder instead (e.g. for \"000\").",
                )?;
                prompter.say("Example: https://example.com/videos{:03d}.ts")?;
                UrlTemplate::parse(prompter.ask("URL template: ")?.trim())?
            }
        };
        let interactive = cli.url_template.is_none();

        let first = match cli.first_number {
            Some(first) => first,
            None if interactive => parse_index(
                &prompter.ask("First index (inclusive, default = 0): ")?,
                "first index",
            )?
            .unwrap_or(0),
            None => 0,
        };
        let last = match cli.last_number {
            Some(last) => Some(last),
            None if interactive => parse_index(
                &prompter.ask(
                    "Last index (inclusive, leave empty to download until the server answers 404): ",
                )?,
                "last index",
            )?,
            None => None,
        };
        let range = match last {
            Some(last) => SegmentRange::bounded(first, last)?,
            None => SegmentRange::unbounded(first),
        };
        Ok(request.with_template(template, range))
    }
}

fn parse_index(input: &str, field: &'static str) -> Result<Option<u64>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| AppError::InvalidNumber {
            field,
            input: trimmed.to_string(),
        })
}

impl DisplayFallback for RunReport {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        match &self.download {
            StageStatus::Completed(report) => lines.push(describe_download(report)),
            StageStatus::Skipped { existing } => lines.push(format!(
                "'{}' directory exists. Skipped download.",
                existing.display()
            )),
        }
        match &self.combine {
            StageStatus::Completed(report) => lines.push(format!(
                "Combined {} segments ({} bytes).",
                report.segments, report.bytes
            )),
            StageStatus::Skipped { existing } => lines.push(format!(
                "'{}' already exists. Skipped combining.",
                existing.display()
            )),
        }
        if let StageStatus::Skipped { existing } = &self.transcode {
            lines.push(format!(
                "'{}' already exists. Skipped transcoding.",
                existing.display()
            ));
        }
        match &self.notification {
            NotificationStatus::Sent => lines.push("Notification sent.".to_string()),
            NotificationStatus::Disabled => {}
            NotificationStatus::MissingCredentials { path } => lines.push(format!(
                "Notification skipped: create {} to receive push notifications.",
                path.display()
            )),
            NotificationStatus::Failed { error } => {
                lines.push(format!("Notification failed: {error}"))
            }
        }
        match &self.transcode {
            StageStatus::Completed(report) => {
                lines.push(format!("Transcode finished: {}", report.output.display()))
            }
            StageStatus::Skipped { .. } => {
                lines.push(format!("Output file: {}", self.output.display()))
            }
        }
        lines.join("\n")
    }
}

fn describe_download(report: &DownloadReport) -> String {
    let ending = match &report.termination {
        Termination::RangeExhausted => "range complete".to_string(),
        Termination::EndOfSequence { index } => {
            format!("index {index} not found, sequence ended")
        }
        Termination::TransportError { index, detail } => {
            format!("stopped at index {index}: {detail}")
        }
    };
    format!("Downloaded {} segments ({ending}).", report.segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ripstream_core::{Stage, TranscodeReport};
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["ripstream"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn context(root: &TempDir) -> AppContext {
        let mut config = RipConfig::default();
        config.paths.working_root = root.path().to_path_buf();
        AppContext { config }
    }

    fn resolve(
        context: &AppContext,
        cli: &Cli,
        input: &str,
    ) -> (Result<JobRequest>, String) {
        let mut output = Vec::new();
        let result = {
            let mut prompter = Prompter::new(Cursor::new(input.as_bytes()), &mut output);
            context.resolve_request(cli, &mut prompter)
        };
        (result, String::from_utf8(output).unwrap())
    }

    #[test]
    fn parses_legacy_flag_spellings() {
        let cli = cli(&[
            "S01E01 - Title",
            "--url_template",
            "http://example.test/{}.ts",
            "--first_number",
            "3",
            "--last_number",
            "9",
            "--no-notify",
            "--notification_level",
            "-2",
        ]);
        assert_eq!(cli.video_name.as_deref(), Some("S01E01 - Title"));
        assert_eq!(cli.first_number, Some(3));
        assert_eq!(cli.last_number, Some(9));
        assert!(!cli.notify_enabled());
        assert_eq!(cli.notification_level, -2);
    }

    #[test]
    fn notify_defaults_on_and_last_flag_wins() {
        assert!(cli(&["job"]).notify_enabled());
        assert!(cli(&["job", "--no-notify", "--notify"]).notify_enabled());
    }

    #[test]
    fn rejects_out_of_range_priority() {
        assert!(Cli::try_parse_from(["ripstream", "job", "--notification-level", "3"]).is_err());
        assert!(Cli::try_parse_from(["ripstream", "job", "--first-number", "-1"]).is_err());
    }

    #[test]
    fn full_command_line_needs_no_prompt() {
        let root = TempDir::new().unwrap();
        let cli = cli(&[
            "show",
            "--url-template",
            "http://example.test/v{:03d}.ts",
            "--last-number",
            "2",
        ]);
        let (request, prompts) = resolve(&context(&root), &cli, "");
        let request = request.unwrap();
        assert_eq!(request.range, Some(SegmentRange::Bounded { first: 0, last: 2 }));
        assert!(request.notify);
        assert!(prompts.is_empty());
    }

    #[test]
    fn template_without_last_number_probes_until_not_found() {
        let root = TempDir::new().unwrap();
        let cli = cli(&["show", "--url-template", "http://example.test/{}.ts", "--first-number", "4"]);
        let (request, _) = resolve(&context(&root), &cli, "");
        assert_eq!(
            request.unwrap().range,
            Some(SegmentRange::Unbounded { first: 4 })
        );
    }

    #[test]
    fn interactive_flow_asks_for_everything() {
        let root = TempDir::new().unwrap();
        let cli = cli(&[]);
        let (request, prompts) = resolve(
            &context(&root),
            &cli,
            "S01E02 - Next\nhttp://example.test/v{:03d}.ts\n\n12\n",
        );
        let request = request.unwrap();
        assert_eq!(request.name, "S01E02 - Next");
        assert_eq!(
            request.template.unwrap().render(5),
            "http://example.test/v005.ts"
        );
        assert_eq!(request.range, Some(SegmentRange::Bounded { first: 0, last: 12 }));
        assert!(prompts.contains("Video name"));
        assert!(prompts.contains("URL template: "));
        assert!(prompts.contains("Last index"));
    }

    #[test]
    fn interactive_empty_last_index_means_unbounded() {
        let root = TempDir::new().unwrap();
        let cli = cli(&["job"]);
        let (request, _) = resolve(&context(&root), &cli, "http://example.test/{}.ts\n7\n\n");
        assert_eq!(
            request.unwrap().range,
            Some(SegmentRange::Unbounded { first: 7 })
        );
    }

    #[test]
    fn existing_download_skips_template_prompts() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("job/raw-ts-videos")).unwrap();
        let cli = cli(&[]);
        let (request, prompts) = resolve(&context(&root), &cli, "job\n");
        let request = request.unwrap();
        assert!(request.template.is_none());
        assert!(!prompts.contains("URL template"));
    }

    #[test]
    fn invalid_prompt_answers_fail_before_any_download() {
        let root = TempDir::new().unwrap();
        let cli = cli(&["job"]);
        let (result, _) = resolve(&context(&root), &cli, "http://example.test/{:.2f}.ts\n");
        assert!(matches!(result, Err(AppError::Template(_))));

        let (result, _) = resolve(&context(&root), &cli, "http://example.test/{}.ts\nabc\n");
        assert!(matches!(result, Err(AppError::InvalidNumber { .. })));

        let (result, _) = resolve(&context(&root), &cli, "http://example.test/{}.ts\n5\n2\n");
        assert!(matches!(result, Err(AppError::Range(_))));
        assert!(!root.path().join("job").exists());
    }

    #[test]
    fn closed_input_is_reported() {
        let root = TempDir::new().unwrap();
        let (result, _) = resolve(&context(&root), &cli(&[]), "");
        assert!(matches!(result, Err(AppError::MissingInput(_))));
    }

    fn sample_report() -> RunReport {
        RunReport {
            job: "job".into(),
            working_dir: PathBuf::from("job"),
            output: PathBuf::from("job/job.mp4"),
            download: StageStatus::Completed(DownloadReport {
                segments: 10,
                first_index: Some(0),
                last_index: Some(9),
                termination: Termination::EndOfSequence { index: 10 },
            }),
            combine: StageStatus::Skipped {
                existing: PathBuf::from("job/job.ts"),
            },
            transcode: StageStatus::Completed(TranscodeReport {
                input: PathBuf::from("job/job.ts"),
                output: PathBuf::from("job/job.mp4"),
            }),
            notification: NotificationStatus::Disabled,
            stages: vec![Stage::Downloading, Stage::Transcoding, Stage::Done],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn text_report_lists_stage_decisions() {
        let text = sample_report().display();
        assert!(text.contains("Downloaded 10 segments (index 10 not found, sequence ended)."));
        assert!(text.contains("'job/job.ts' already exists. Skipped combining."));
        assert!(text.ends_with("Transcode finished: job/job.mp4"));
    }

    #[test]
    fn skipped_transcode_still_names_output() {
        let mut report = sample_report();
        report.transcode = StageStatus::Skipped {
            existing: PathBuf::from("job/job.mp4"),
        };
        report.notification = NotificationStatus::MissingCredentials {
            path: PathBuf::from("/home/u/.pushoverrc"),
        };
        let text = report.display();
        assert!(text.contains("'job/job.mp4' already exists. Skipped transcoding."));
        assert!(text.contains("create /home/u/.pushoverrc"));
        assert!(text.ends_with("Output file: job/job.mp4"));
    }

    #[test]
    fn json_report_tags_stage_status() {
        let value = serde_json::to_value(sample_report()).unwrap();
        assert_eq!(value["download"]["status"], "completed");
        assert_eq!(value["download"]["termination"]["kind"], "end_of_sequence");
        assert_eq!(value["combine"]["status"], "skipped");
        assert_eq!(value["notification"]["status"], "disabled");
        assert_eq!(
            value["stages"],
            serde_json::json!(["downloading", "transcoding", "done"])
        );
    }
}
