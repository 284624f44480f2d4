//! Structural and semantic checks on candidate questions.
//!
//! Checks run in a fixed order and stop at the first failure. There is no
//! field-level repair: a candidate either passes everything or is dropped.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{McqCandidate, OPTION_KEYS};

/// Why a candidate was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", content = "field", rename_all = "snake_case")]
pub enum Rejection {
    #[error("candidate is not a JSON object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` is not text")]
    NotText(&'static str),

    #[error("field `{0}` is empty")]
    EmptyField(&'static str),

    #[error("question does not end with a question mark")]
    MissingQuestionMark,

    #[error("option `{0}` does not end with a period")]
    OptionWithoutPeriod(&'static str),

    #[error("options are not pairwise distinct")]
    DuplicateOptions,

    #[error("answer does not match any option")]
    AnswerNotAnOption,

    #[error("question repeats one already accepted")]
    DuplicateQuestion,
}

/// Validate one candidate object against the questions accepted so far.
pub fn validate(candidate: &Value, accepted: &[McqCandidate]) -> Result<McqCandidate, Rejection> {
    let object = candidate.as_object().ok_or(Rejection::NotAnObject)?;

    let question = text_field(object, "question")?;
    let answer = text_field(object, "answer")?;
    let options = [
        text_field(object, OPTION_KEYS[0])?,
        text_field(object, OPTION_KEYS[1])?,
        text_field(object, OPTION_KEYS[2])?,
        text_field(object, OPTION_KEYS[3])?,
    ];

    let fields = [("question", question), ("answer", answer)]
        .into_iter()
        .chain(OPTION_KEYS.into_iter().zip(options));
    for (key, value) in fields {
        if value.trim().is_empty() {
            return Err(Rejection::EmptyField(key));
        }
    }

    if !question.ends_with('?') {
        return Err(Rejection::MissingQuestionMark);
    }

    if let Some(i) = options.iter().position(|o| !o.ends_with('.')) {
        return Err(Rejection::OptionWithoutPeriod(OPTION_KEYS[i]));
    }

    for (i, a) in options.iter().enumerate() {
        if options[i + 1..].contains(a) {
            return Err(Rejection::DuplicateOptions);
        }
    }

    if !options.contains(&answer) {
        return Err(Rejection::AnswerNotAnOption);
    }

    if accepted.iter().any(|c| c.question() == question) {
        return Err(Rejection::DuplicateQuestion);
    }

    Ok(McqCandidate::new(
        question.to_string(),
        answer.to_string(),
        options.map(str::to_string),
    ))
}

fn text_field<'a>(object: &'a Map<String, Value>, key: &'static str) -> Result<&'a str, Rejection> {
    match object.get(key) {
        None => Err(Rejection::MissingField(key)),
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(Rejection::NotText(key)),
    }
}
