//! Prompt templates sent to the AI generator.

use crate::problem::Session;

/// Prompt asking for one word problem as strict JSON.
pub const PROBLEM_PROMPT: &str = r#"Generate a single math word problem for Singapore Primary 5 students, aligned with the 2021 MOE syllabus (topics: whole numbers, fractions, decimals, ratios, percentages, area/volume of triangles/cubes, angles, geometry).
The problem should be engaging and realistic. Return ONLY valid JSON with two fields:
{"problem_text": "The full problem text here.", "correct_answer": numerical_answer_as_number}.
Example: {"problem_text": "A shop sold 120 pencils. On Tuesday, it sold 2/3 of Monday's amount. How many pencils were sold on Tuesday?", "correct_answer": 80}"#;

/// Returns the prompt used to generate a new problem.
#[must_use]
pub const fn problem_prompt() -> &'static str {
    PROBLEM_PROMPT
}

/// Builds the prompt asking for feedback on a graded answer.
#[must_use]
pub fn feedback_prompt(session: &Session, user_answer: f64, is_correct: bool) -> String {
    format!(
        "Generate encouraging feedback for a Primary 5 student on this math problem: \"{problem}\"\n\
         Correct answer: {correct}. Student's answer: {answer}. Correct? {is_correct}.\n\
         Provide 2-4 sentences: Praise effort, explain any mistake (e.g., fractions, ratios), suggest a tip. \
         Keep it positive and age-appropriate.",
        problem = session.problem.problem_text,
        correct = session.problem.correct_answer,
        answer = user_answer,
    )
}
