//! Retry orchestrator.
//!
//! Drives prompt → model → sanitizer → validator in a bounded loop until the
//! requested number of questions is accepted or the retry budget runs out.
//! Running out of budget is not an error: the caller gets whatever was
//! accepted, and the report says so.

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{self, GenerationError, ProviderError};
use crate::invoker::{CachePolicy, ModelInvoker, Verdict};
use crate::model::{GenerationRequest, McqCandidate, Strategy};
use crate::report::{AttemptFailure, GenerationReport, RejectionRecord};
use crate::traits::{BATCH_MAX_TOKENS, SINGLE_MAX_TOKENS};
use crate::validator::Rejection;
use crate::{prompt, sanitizer, validator};

/// Longest pause honoured for a rate-limit hint.
const MAX_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(5);

/// Configuration for the generator.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Model calls allowed per requested question.
    pub retries_per_question: u32,
    /// Largest count a single request may ask for.
    pub max_count: usize,
    /// Single-object or array prompting.
    pub strategy: Strategy,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            retries_per_question: 3,
            max_count: 10,
            strategy: Strategy::Single,
        }
    }
}

/// Progress reporting trait.
pub trait ProgressReporter: Send + Sync {
    fn on_attempt_start(&self, topic: &str, attempt: u32);
    fn on_accepted(&self, topic: &str, attempt: u32, question: &McqCandidate);
    fn on_rejected(&self, topic: &str, attempt: u32, failure: &AttemptFailure);
    fn on_complete(&self, report: &GenerationReport);
}

/// No-op progress reporter.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_attempt_start(&self, _: &str, _: u32) {}
    fn on_accepted(&self, _: &str, _: u32, _: &McqCandidate) {}
    fn on_rejected(&self, _: &str, _: u32, _: &AttemptFailure) {}
    fn on_complete(&self, _: &GenerationReport) {}
}

/// Attempt outcome that is not a question.
enum AttemptError {
    /// Stop the whole run.
    Fatal(GenerationError),
    /// Record and try again.
    Recoverable(AttemptFailure),
}

/// Mutable state of one run.
struct Run<'a> {
    topic: &'a str,
    count: usize,
    attempts: u32,
    accepted: Vec<McqCandidate>,
    rejections: Vec<RejectionRecord>,
    progress: &'a dyn ProgressReporter,
}

impl Run<'_> {
    fn accept(&mut self, candidate: McqCandidate) {
        debug!(topic = self.topic, attempt = self.attempts, question = candidate.question(), "accepted");
        self.progress
            .on_accepted(self.topic, self.attempts, &candidate);
        self.accepted.push(candidate);
    }

    fn reject(&mut self, failure: AttemptFailure) {
        warn!(topic = self.topic, attempt = self.attempts, "rejected: {failure}");
        self.progress.on_rejected(self.topic, self.attempts, &failure);
        self.rejections.push(RejectionRecord {
            attempt: self.attempts,
            failure,
        });
    }

    fn is_full(&self) -> bool {
        self.accepted.len() >= self.count
    }
}

/// The MCQ generator.
#[derive(Clone)]
pub struct Generator {
    invoker: ModelInvoker,
    config: GeneratorConfig,
}

impl Generator {
    pub fn new(invoker: ModelInvoker, config: GeneratorConfig) -> Self {
        Self { invoker, config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate up to `count` validated questions about `topic`.
    pub async fn generate(
        &self,
        topic: &str,
        count: usize,
    ) -> Result<Vec<McqCandidate>, GenerationError> {
        let request = GenerationRequest::new(topic, count);
        Ok(self.run(&request, &NoopReporter).await?.questions)
    }

    /// Generate questions and return the full diagnostic report.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<GenerationReport, GenerationError> {
        request.validate(self.config.max_count)?;

        let start = Instant::now();
        let mut run = Run {
            topic: &request.topic,
            count: request.count,
            attempts: 0,
            accepted: Vec::with_capacity(request.count),
            rejections: Vec::new(),
            progress,
        };

        let max_attempts = match self.config.strategy {
            Strategy::Single => {
                let max = self
                    .config
                    .retries_per_question
                    .saturating_mul(u32::try_from(request.count).unwrap_or(u32::MAX));
                self.run_single(&mut run, max).await?;
                max
            }
            Strategy::Batch => {
                let max = self.config.retries_per_question;
                self.run_batch(&mut run, max).await?;
                max
            }
        };

        let Run {
            attempts,
            mut accepted,
            rejections,
            ..
        } = run;
        accepted.truncate(request.count);
        let budget_exhausted = accepted.len() < request.count;

        let report = GenerationReport {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            topic: request.topic.clone(),
            requested: request.count,
            strategy: self.config.strategy,
            engine: self.invoker.handle().engine_name().to_string(),
            attempts,
            max_attempts,
            questions: accepted,
            rejections,
            budget_exhausted,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if budget_exhausted {
            warn!(
                topic = %report.topic,
                accepted = report.questions.len(),
                requested = report.requested,
                attempts = report.attempts,
                "retry budget exhausted"
            );
        } else {
            info!(
                topic = %report.topic,
                accepted = report.questions.len(),
                attempts = report.attempts,
                "generation complete"
            );
        }
        progress.on_complete(&report);

        Ok(report)
    }

    /// One object per model call.
    async fn run_single(&self, run: &mut Run<'_>, max_attempts: u32) -> Result<(), GenerationError> {
        let prompt = prompt::single_question(run.topic);

        while !run.is_full() && run.attempts < max_attempts {
            run.attempts += 1;
            run.progress.on_attempt_start(run.topic, run.attempts);

            let accepted = &run.accepted;
            let judged = self
                .invoker
                .invoke_with(&prompt, SINGLE_MAX_TOKENS, policy(run.attempts), |raw| {
                    let outcome = parse(raw).and_then(|value| {
                        validator::validate(&first_object(value), accepted)
                            .map_err(AttemptFailure::Validation)
                    });
                    match outcome {
                        Ok(candidate) => Verdict::Keep(Ok(candidate)),
                        Err(failure) => Verdict::Discard(Err(failure)),
                    }
                })
                .await;

            match judged {
                Ok(Ok(candidate)) => run.accept(candidate),
                Ok(Err(failure)) => run.reject(failure),
                Err(e) => match self.classify(e).await {
                    AttemptError::Fatal(e) => return Err(e),
                    AttemptError::Recoverable(failure) => run.reject(failure),
                },
            }
        }

        Ok(())
    }

    /// One array of the remaining count per model call.
    async fn run_batch(&self, run: &mut Run<'_>, max_rounds: u32) -> Result<(), GenerationError> {
        while !run.is_full() && run.attempts < max_rounds {
            run.attempts += 1;
            run.progress.on_attempt_start(run.topic, run.attempts);

            let remaining = run.count - run.accepted.len();
            let prompt = prompt::batch(run.topic, remaining);

            let accepted = &run.accepted;
            let judged = self
                .invoker
                .invoke_with(&prompt, BATCH_MAX_TOKENS, policy(run.attempts), |raw| {
                    match parse(raw).map(|value| screen_batch(value, accepted, remaining)) {
                        Ok(items) if items.iter().filter(|i| i.is_ok()).count() >= remaining => {
                            Verdict::Keep(Ok(items))
                        }
                        other => Verdict::Discard(other),
                    }
                })
                .await;

            match judged {
                Ok(Ok(items)) => {
                    for item in items {
                        match item {
                            Ok(candidate) => run.accept(candidate),
                            Err(r) => run.reject(AttemptFailure::Validation(r)),
                        }
                    }
                }
                Ok(Err(failure)) => run.reject(failure),
                Err(e) => match self.classify(e).await {
                    AttemptError::Fatal(e) => return Err(e),
                    AttemptError::Recoverable(failure) => run.reject(failure),
                },
            }
        }

        Ok(())
    }

    async fn classify(&self, err: anyhow::Error) -> AttemptError {
        if error::is_permanent(&err) {
            return AttemptError::Fatal(GenerationError::ModelUnavailable(format!("{err:#}")));
        }

        if let Some(ms) = err
            .downcast_ref::<ProviderError>()
            .and_then(ProviderError::retry_after_ms)
        {
            tokio::time::sleep(Duration::from_millis(ms).min(MAX_RATE_LIMIT_PAUSE)).await;
        }

        AttemptError::Recoverable(AttemptFailure::Inference(format!("{err:#}")))
    }
}

/// Only the first attempt of a run may reuse cached output; retries must
/// reach the model or they would see the same text again.
fn policy(attempt: u32) -> CachePolicy {
    if attempt == 1 {
        CachePolicy::Use
    } else {
        CachePolicy::Refresh
    }
}

/// Sanitize raw model text and parse the fragment.
fn parse(raw: &str) -> Result<Value, AttemptFailure> {
    let fragment = sanitizer::extract(raw).ok_or(AttemptFailure::NoFragment)?;
    debug!(fragment = %fragment, "sanitized");
    serde_json::from_str(&fragment).map_err(|e| AttemptFailure::MalformedJson(e.to_string()))
}

/// Validate batch elements in order, stopping once `wanted` are accepted.
/// Duplicates are checked against `accepted` and earlier elements alike.
fn screen_batch(
    value: Value,
    accepted: &[McqCandidate],
    wanted: usize,
) -> Vec<Result<McqCandidate, Rejection>> {
    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut seen = accepted.to_vec();
    let mut screened = Vec::with_capacity(items.len());
    for item in items {
        if seen.len() - accepted.len() >= wanted {
            break;
        }
        let outcome = validator::validate(&item, &seen);
        if let Ok(candidate) = &outcome {
            seen.push(candidate.clone());
        }
        screened.push(outcome);
    }
    screened
}

/// Models asked for one object sometimes wrap it in an array anyway.
fn first_object(value: Value) -> Value {
    match value {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::invoker::ModelHandle;
    use crate::traits::{InferenceEngine, InferenceRequest};

    const GOOD: &str = r#"{"question":"What did she do yesterday?","answer":"did.","option1":"do.","option2":"does.","option3":"did.","option4":"done."}"#;

    fn mcq(question: &str) -> String {
        format!(
            r#"{{"question":"{question}","answer":"went.","option1":"go.","option2":"goes.","option3":"went.","option4":"gone."}}"#
        )
    }

    /// Replays scripted outputs, then repeats the last one.
    struct Scripted {
        outputs: Mutex<VecDeque<anyhow::Result<String>>>,
        fallback: String,
        calls: Arc<AtomicU32>,
        delay: Duration,
    }

    impl Scripted {
        fn new(outputs: Vec<&str>) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            let fallback = outputs.last().map(|s| s.to_string()).unwrap_or_default();
            let engine = Self {
                outputs: Mutex::new(outputs.into_iter().map(|s| Ok(s.to_string())).collect()),
                fallback,
                calls: Arc::clone(&calls),
                delay: Duration::ZERO,
            };
            (engine, calls)
        }

        fn failing(error: ProviderError) -> (Self, Arc<AtomicU32>) {
            let (engine, calls) = Self::new(vec![]);
            engine.outputs.lock().unwrap().push_back(Err(error.into()));
            (engine, calls)
        }
    }

    #[async_trait]
    impl InferenceEngine for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn load(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn run(&self, _: &InferenceRequest) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.outputs.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    async fn generator(engine: Scripted, config: GeneratorConfig) -> Generator {
        let handle = ModelHandle::open(Box::new(engine), 16).await.unwrap();
        Generator::new(ModelInvoker::new(Arc::new(handle)), config)
    }

    fn assert_invariants(questions: &[McqCandidate]) {
        for (i, q) in questions.iter().enumerate() {
            assert!(q.question().ends_with('?'));
            assert!(q.options().iter().all(|o| o.ends_with('.')));
            for (j, o) in q.options().iter().enumerate() {
                assert!(!q.options()[j + 1..].contains(o));
            }
            assert_eq!(q.options().iter().filter(|o| *o == q.answer()).count(), 1);
            assert!(questions[i + 1..].iter().all(|o| o.question() != q.question()));
        }
    }

    #[tokio::test]
    async fn single_valid_response_end_to_end() {
        let (engine, calls) = Scripted::new(vec![GOOD]);
        let generator = generator(engine, GeneratorConfig::default()).await;

        let questions = generator.generate("past simple tense", 1).await.unwrap();
        assert_eq!(questions.len(), 1);
        let q = &questions[0];
        assert_eq!(q.question(), "What did she do yesterday?");
        assert_eq!(q.answer(), "did.");
        assert_eq!(q.options(), &["do.", "does.", "did.", "done."].map(String::from));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn always_invalid_output_stops_at_budget() {
        let (engine, calls) = Scripted::new(vec!["I am not sure what you mean."]);
        let generator = generator(engine, GeneratorConfig::default()).await;

        let report = generator
            .run(&GenerationRequest::new("articles", 4), &NoopReporter)
            .await
            .unwrap();
        assert!(report.questions.is_empty());
        assert!(report.budget_exhausted);
        assert_eq!(report.attempts, 12);
        assert_eq!(report.max_attempts, 12);
        assert_eq!(report.rejections.len(), 12);
        assert_eq!(calls.load(Ordering::SeqCst), 12);
        assert!(report
            .rejections
            .iter()
            .all(|r| r.failure == AttemptFailure::NoFragment));
    }

    #[tokio::test]
    async fn recovers_from_noise_and_duplicates() {
        let first = mcq("Where did they go?");
        let second = mcq("When did he go?");
        let script = vec![
            "Here is your question:",
            r#"{"question": "Broken", "answer": "#,
            first.as_str(),
            first.as_str(),
            r#"{"question":"Which is right?","answer":"go.","option1":"a.","option2":"b.","option3":"c.","option4":"d."}"#,
            second.as_str(),
        ];
        let (engine, calls) = Scripted::new(script);
        let generator = generator(engine, GeneratorConfig::default()).await;

        let report = generator
            .run(&GenerationRequest::new("past simple tense", 2), &NoopReporter)
            .await
            .unwrap();

        assert_invariants(&report.questions);
        assert_eq!(report.questions.len(), 2);
        assert_eq!(report.questions[0].question(), "Where did they go?");
        assert_eq!(report.questions[1].question(), "When did he go?");
        assert!(!report.budget_exhausted);
        assert_eq!(report.attempts, 6);
        assert_eq!(calls.load(Ordering::SeqCst), 6);

        let failures: Vec<_> = report.rejections.iter().map(|r| &r.failure).collect();
        assert_eq!(failures[0], &AttemptFailure::NoFragment);
        assert!(matches!(failures[1], AttemptFailure::NoFragment));
        assert_eq!(
            failures[2],
            &AttemptFailure::Validation(validator::Rejection::DuplicateQuestion)
        );
        assert_eq!(
            failures[3],
            &AttemptFailure::Validation(validator::Rejection::AnswerNotAnOption)
        );
    }

    #[tokio::test]
    async fn result_never_exceeds_count() {
        let outputs: Vec<String> = (0..10).map(|i| mcq(&format!("Question {i}?"))).collect();
        let (engine, _) = Scripted::new(outputs.iter().map(String::as_str).collect());
        let generator = generator(engine, GeneratorConfig::default()).await;

        for n in 1..=3 {
            let questions = generator.generate(&format!("topic {n}"), n).await.unwrap();
            assert!(questions.len() <= n);
            assert_invariants(&questions);
        }
    }

    #[tokio::test]
    async fn cached_output_serves_identical_requests() {
        let (engine, calls) = Scripted::new(vec![GOOD]);
        let generator = generator(engine, GeneratorConfig::default()).await;

        let a = generator.generate("past simple tense", 1).await.unwrap();
        let b = generator.generate("past simple tense", 1).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_output_never_reaches_a_waiting_caller() {
        let (mut engine, calls) = Scripted::new(vec!["no json here", GOOD]);
        engine.delay = Duration::from_millis(20);
        let config = GeneratorConfig {
            retries_per_question: 1,
            ..GeneratorConfig::default()
        };
        let generator = generator(engine, config).await;

        let request = GenerationRequest::new("past simple tense", 1);
        let (a, b) = tokio::join!(
            generator.run(&request, &NoopReporter),
            generator.run(&request, &NoopReporter)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        // The second caller must reach the model instead of replaying the
        // first caller's rejected text from the cache.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(a.questions.len() + b.questions.len(), 1);
        let rejections: Vec<_> = a.rejections.iter().chain(&b.rejections).collect();
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].failure, AttemptFailure::NoFragment);
    }

    #[tokio::test]
    async fn rejected_output_is_not_cached() {
        let (engine, calls) = Scripted::new(vec!["no json here", GOOD]);
        let config = GeneratorConfig {
            retries_per_question: 1,
            ..GeneratorConfig::default()
        };
        let generator = generator(engine, config).await;

        let first = generator.generate("past simple tense", 1).await.unwrap();
        let second = generator.generate("past simple tense", 1).await.unwrap();
        assert!(first.is_empty());
        assert_eq!(second.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(generator.invoker.handle().cache_stats().await.entries, 1);
    }

    #[tokio::test]
    async fn array_wrapped_single_object_is_accepted() {
        let wrapped = format!("[{GOOD}]");
        let (engine, _) = Scripted::new(vec![wrapped.as_str()]);
        let generator = generator(engine, GeneratorConfig::default()).await;

        let questions = generator.generate("past simple tense", 1).await.unwrap();
        assert_eq!(questions.len(), 1);
    }

    #[tokio::test]
    async fn transient_engine_errors_are_retried() {
        let (engine, calls) = Scripted::failing(ProviderError::NetworkError("reset".into()));
        engine.outputs.lock().unwrap().push_back(Ok(GOOD.to_string()));
        let generator = generator(engine, GeneratorConfig::default()).await;

        let report = generator
            .run(&GenerationRequest::new("past simple tense", 1), &NoopReporter)
            .await
            .unwrap();
        assert_eq!(report.questions.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            report.rejections[0].failure,
            AttemptFailure::Inference(_)
        ));
    }

    #[tokio::test]
    async fn permanent_engine_error_is_model_unavailable() {
        let (engine, calls) = Scripted::failing(ProviderError::ModelNotFound("gemma".into()));
        let generator = generator(engine, GeneratorConfig::default()).await;

        let err = generator.generate("articles", 3).await.unwrap_err();
        assert!(matches!(err, GenerationError::ModelUnavailable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_requests_fail_before_model_work() {
        let (engine, calls) = Scripted::new(vec![GOOD]);
        let generator = generator(engine, GeneratorConfig::default()).await;

        assert!(matches!(
            generator.generate("", 1).await,
            Err(GenerationError::InvalidRequest(_))
        ));
        assert!(matches!(
            generator.generate("articles", 0).await,
            Err(GenerationError::InvalidRequest(_))
        ));
        assert!(matches!(
            generator.generate("articles", 11).await,
            Err(GenerationError::InvalidRequest(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_strategy_requests_remainder() {
        let a = mcq("Where did they go?");
        let b = mcq("When did he go?");
        let c = mcq("Why did we go?");
        let round1 = format!("Here are your questions:\n```json\n[{a}, {a},]\n```");
        let round2 = format!("[{b}, {c}, {}]", mcq("Who went?"));
        let (engine, calls) = Scripted::new(vec![round1.as_str(), round2.as_str()]);
        let config = GeneratorConfig {
            strategy: Strategy::Batch,
            ..GeneratorConfig::default()
        };
        let generator = generator(engine, config).await;

        let report = generator
            .run(&GenerationRequest::new("past simple tense", 3), &NoopReporter)
            .await
            .unwrap();
        assert_eq!(report.questions.len(), 3);
        assert_invariants(&report.questions);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.max_attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            report.rejections[0].failure,
            AttemptFailure::Validation(validator::Rejection::DuplicateQuestion)
        );
    }

    #[tokio::test]
    async fn batch_strategy_bounded_by_rounds() {
        let (engine, calls) = Scripted::new(vec!["[]"]);
        let config = GeneratorConfig {
            strategy: Strategy::Batch,
            retries_per_question: 2,
            ..GeneratorConfig::default()
        };
        let generator = generator(engine, config).await;

        let report = generator
            .run(&GenerationRequest::new("articles", 5), &NoopReporter)
            .await
            .unwrap();
        assert!(report.questions.is_empty());
        assert!(report.budget_exhausted);
        assert_eq!(report.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn screen_batch_stops_when_enough_are_accepted() {
        let a = mcq("Where did they go?");
        let b = mcq("When did he go?");
        let value: Value = serde_json::from_str(&format!("[{a}, {a}, {b}, {}]", mcq("Who went?"))).unwrap();

        let screened = screen_batch(value, &[], 2);
        assert_eq!(screened.len(), 3);
        assert!(screened[0].is_ok());
        assert_eq!(screened[1], Err(Rejection::DuplicateQuestion));
        assert!(screened[2].is_ok());
    }

    #[test]
    fn first_object_unwraps_arrays() {
        assert_eq!(first_object(serde_json::json!([1, 2])), serde_json::json!(1));
        assert_eq!(first_object(serde_json::json!([])), serde_json::json!([]));
        assert_eq!(first_object(serde_json::json!({"a": 1})), serde_json::json!({"a": 1}));
    }
}
