//! Prompt construction.

/// Prompt asking for exactly one question as a single JSON object.
pub fn single_question(topic: &str) -> String {
    format!(
        r#"Generate a single multiple choice question (MCQ) about the English grammar topic "{topic}" in valid JSON format.
Return only one JSON object with these keys: "question", "answer", "option1", "option2", "option3", "option4".
The question must end with a question mark. The answer and all four options must end with a period.
The answer must be exactly the same text as one of the four options, and the four options must all be different.
Do NOT include any array brackets, markdown, or additional text."#
    )
}

/// Prompt asking for a JSON array of `count` questions.
pub fn batch(topic: &str, count: usize) -> String {
    format!(
        r#"Generate a JSON array with exactly {count} multiple choice questions about the English grammar topic "{topic}".
Each item must be an object with keys: "question", "answer", "option1", "option2", "option3", "option4".
Questions must end with a question mark and all options and the answer must end with a period.
Every question must be different, and each answer must be exactly the same text as one of its options.
Return only the JSON array, with no additional text or formatting."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_prompt_names_topic_and_keys() {
        let prompt = single_question("past simple tense");
        assert!(prompt.contains("\"past simple tense\""));
        for key in ["question", "answer", "option1", "option4"] {
            assert!(prompt.contains(&format!("\"{key}\"")), "missing {key}");
        }
        assert!(prompt.contains("question mark"));
    }

    #[test]
    fn single_prompt_is_deterministic() {
        assert_eq!(single_question("articles"), single_question("articles"));
        assert_ne!(single_question("articles"), single_question("modals"));
    }

    #[test]
    fn batch_prompt_states_count() {
        let prompt = batch("modal verbs", 4);
        assert!(prompt.contains("exactly 4 multiple choice questions"));
        assert!(prompt.contains("JSON array"));
    }
}
