//! The `mcqforge generate` command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;

use mcqforge_core::engine::ProgressReporter;
use mcqforge_core::model::{GenerationRequest, McqCandidate, Strategy, OPTION_KEYS};
use mcqforge_core::report::{AttemptFailure, GenerationReport};
use mcqforge_providers::config::{build_generator, load_config_from};

use crate::OutputFormat;

/// Console progress reporter.
struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn on_attempt_start(&self, topic: &str, attempt: u32) {
        eprintln!("  Asking: {topic} (attempt {attempt})");
    }

    fn on_accepted(&self, topic: &str, attempt: u32, question: &McqCandidate) {
        eprintln!("  OK: {topic} [{attempt}] {}", question.question());
    }

    fn on_rejected(&self, topic: &str, attempt: u32, failure: &AttemptFailure) {
        eprintln!("  REJECTED: {topic} [{attempt}] {failure}");
    }

    fn on_complete(&self, report: &GenerationReport) {
        let note = if report.budget_exhausted {
            " (retry budget exhausted)"
        } else {
            ""
        };
        eprintln!(
            "\nComplete: {} :: {}/{} questions in {} attempts{note} ({:.1}s)",
            report.topic,
            report.questions.len(),
            report.requested,
            report.attempts,
            report.duration_ms as f64 / 1000.0,
        );
    }
}

/// Questions for one topic, as written to the output.
#[derive(Serialize)]
struct TopicQuestions<'a> {
    topic: &'a str,
    complete: bool,
    questions: &'a [McqCandidate],
}

pub async fn execute(
    topics: Vec<String>,
    count: usize,
    strategy: Option<Strategy>,
    format: OutputFormat,
    output: Option<PathBuf>,
    report_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config_from(config_path.as_deref())?;
    if let Some(strategy) = strategy {
        config.generation.strategy = strategy;
    }

    tracing::debug!(engine = ?config.engine, topics = topics.len(), count, "starting generation");

    let generator = build_generator(&config).await?;
    let reporter = ConsoleReporter;

    eprintln!(
        "mcqforge v{}: {} topic(s) x {} question(s), {} strategy",
        env!("CARGO_PKG_VERSION"),
        topics.len(),
        count,
        generator.config().strategy,
    );
    eprintln!();

    // All topics share one model handle; the handle serializes the calls.
    let requests: Vec<GenerationRequest> = topics
        .iter()
        .map(|topic| GenerationRequest::new(topic.as_str(), count))
        .collect();
    let reports = join_all(
        requests
            .iter()
            .map(|request| generator.run(request, &reporter)),
    )
    .await
    .into_iter()
    .collect::<Result<Vec<_>, _>>()?;

    if let Some(dir) = &report_dir {
        save_reports(&reports, dir)?;
    }

    let rendered = match format {
        OutputFormat::Json => render_json(&reports)?,
        OutputFormat::Table => render_table(&reports),
    };

    match &output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Questions saved to: {}", path.display());
        }
        None => println!("{rendered}"),
    }

    Ok(())
}

fn save_reports(reports: &[GenerationReport], dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H%M%S");

    for (i, report) in reports.iter().enumerate() {
        let path = dir.join(format!("report-{timestamp}-{i}-{}.json", slug(&report.topic)));
        report.save_json(&path)?;
        eprintln!("Report saved to: {}", path.display());
    }
    Ok(())
}

fn slug(topic: &str) -> String {
    let slug: String = topic
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    slug.trim_matches('-').chars().take(40).collect()
}

fn render_json(reports: &[GenerationReport]) -> Result<String> {
    let out: Vec<TopicQuestions<'_>> = reports
        .iter()
        .map(|r| TopicQuestions {
            topic: &r.topic,
            complete: r.is_complete(),
            questions: &r.questions,
        })
        .collect();
    Ok(serde_json::to_string_pretty(&out)?)
}

fn render_table(reports: &[GenerationReport]) -> String {
    use comfy_table::{Cell, Table};

    let mut table = Table::new();
    table.set_header(vec!["Topic", "#", "Question", "Options", "Answer"]);

    for report in reports {
        if report.questions.is_empty() {
            table.add_row(vec![
                Cell::new(&report.topic),
                Cell::new("-"),
                Cell::new("(no valid questions)"),
                Cell::new(""),
                Cell::new(""),
            ]);
        }
        for (i, question) in report.questions.iter().enumerate() {
            let options = OPTION_KEYS
                .iter()
                .zip(question.options())
                .map(|(key, text)| format!("{key}: {text}"))
                .collect::<Vec<_>>()
                .join("\n");
            table.add_row(vec![
                Cell::new(&report.topic),
                Cell::new(i + 1),
                Cell::new(question.question()),
                Cell::new(options),
                Cell::new(question.answer()),
            ]);
        }
    }

    table.to_string()
}
