//! services/api/src/adapters/format_detector.rs
//!
//! Implements the `FormatDetectionService` port with a line-based heuristic.

use async_trait::async_trait;
use quiz_core::ports::{FormatDetectionService, PortResult};
use regex::Regex;

const MIN_QUESTIONS: usize = 2;
const MIN_OPTIONS: usize = 4;

/// Recognizes text that is already laid out as numbered questions with lettered options.
#[derive(Clone)]
pub struct HeuristicFormatDetector {
    question_line: Regex,
    option_line: Regex,
}

impl HeuristicFormatDetector {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            // "1. ...", "2) ...", "Q3: ...", "Question 4. ..."
            question_line: Regex::new(r"(?mi)^\s*(?:q(?:uestion)?\s*)?\d{1,3}\s*[.):]\s+\S")?,
            // "A) ...", "(b) ...", "c. ...", "D: ..."
            option_line: Regex::new(r"(?m)^\s*\(?[A-Fa-f]\s*[.):]\s+\S")?,
        })
    }

    pub fn is_formatted(&self, text: &str) -> bool {
        let questions = self.question_line.find_iter(text).count();
        if questions < MIN_QUESTIONS {
            return false;
        }
        self.option_line.find_iter(text).count() >= MIN_OPTIONS
    }
}

#[async_trait]
impl FormatDetectionService for HeuristicFormatDetector {
    async fn looks_like_formatted_quiz(&self, text: &str) -> PortResult<bool> {
        Ok(self.is_formatted(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_questions_with_options_are_detected() {
        let detector = HeuristicFormatDetector::new().unwrap();
        let text = "\
1. What is the capital of France?
A) Berlin
B) Paris
C) Rome
2. Which planet is red?
a. Venus
b. Mars
";
        assert!(detector.is_formatted(text));
    }

    #[test]
    fn prose_is_not_a_quiz() {
        let detector = HeuristicFormatDetector::new().unwrap();
        let text = "The French Revolution began in 1789. A. Smith wrote about it.\n\
                    It changed Europe.";
        assert!(!detector.is_formatted(text));
    }

    #[test]
    fn numbered_list_without_options_is_not_a_quiz() {
        let detector = HeuristicFormatDetector::new().unwrap();
        assert!(!detector.is_formatted("1. Mitochondria\n2. Ribosomes\n3. Nucleus"));
    }

    #[tokio::test]
    async fn port_answer_matches_heuristic() {
        let detector = HeuristicFormatDetector::new().unwrap();
        let text = "Q1: one?\n(A) x\n(B) y\nQ2: two?\n(C) z\n(D) w";
        assert!(detector.looks_like_formatted_quiz(text).await.unwrap());
        assert!(detector.looks_like_formatted_quiz(text).await.unwrap());
    }
}
