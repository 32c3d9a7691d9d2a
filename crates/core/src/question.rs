use std::collections::BTreeSet;

/// The biographical questions Narra asks, in interview order.
pub const DEFAULT_QUESTIONS: [&str; 12] = [
    "Could you tell me your full name, including your middle name?",
    "Do you have a maiden name?",
    "Have you had any other names in the past?",
    "What is your birthdate?",
    "Where were you born? If you know, I'd love to hear which hospital too.",
    "Where did you grow up?",
    "Can you tell me your parents' full names?",
    "Where are they originally from?",
    "Where was your mother originally from?",
    "Looking back through your family tree, what's your cultural background?",
    "Do you have any siblings? If so, can you tell me their names and where they and you fall in birth order?",
    "I'd love to hear about some of your interests, hobbies, or passions. What kinds of things do you enjoy?",
];

/// A fixed, ordered list of interview questions.
///
/// A question is identified by its exact text. Two prompts that differ only by case or
/// punctuation are different questions and will both be asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionBank {
    questions: Vec<String>,
}

impl QuestionBank {
    pub fn new<I, S>(questions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            questions: questions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn all(&self) -> &[String] {
        &self.questions
    }

    /// Questions not yet in `asked`, in bank order.
    pub fn remaining(&self, asked: &BTreeSet<String>) -> Vec<String> {
        self.questions
            .iter()
            .filter(|q| !asked.contains(q.as_str()))
            .cloned()
            .collect()
    }

    pub fn contains(&self, question: &str) -> bool {
        self.questions.iter().any(|q| q == question)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

impl Default for QuestionBank {
    fn default() -> Self {
        Self::new(DEFAULT_QUESTIONS)
    }
}
