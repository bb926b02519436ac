use crate::storage::models::{AnswerLetter, TopicRecord};

fn taxonomy_listing(taxonomy: &[TopicRecord]) -> String {
    if taxonomy.is_empty() {
        return "(none yet - this is the first upload, propose a new topic and chapter)".to_string();
    }
    taxonomy
        .iter()
        .map(|topic| {
            let chapters = if topic.chapters.is_empty() {
                "(no chapters)".to_string()
            } else {
                topic.chapters.join("; ")
            };
            format!("- {}: {}", topic.name, chapters)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn classification_prompt(text: &str, taxonomy: &[TopicRecord]) -> String {
    format!(
        r#"You are organising a pediatric medical exam question bank.
Existing topics and their chapters:
{taxonomy}

Read the source material below and decide where it belongs. Reuse an existing
topic and chapter when one fits; otherwise propose a concise new name.
Estimate how many high-quality MCQs and flashcards the material supports.

Return a JSON object with exactly these fields:
{{
  "suggestedTopic": string,
  "suggestedChapter": string,
  "estimatedMcqCount": integer,
  "estimatedFlashcardCount": integer,
  "sourceReference": string  // book/article title or a short description of the source
}}

Source material:
"""
{text}
""""#,
        taxonomy = taxonomy_listing(taxonomy),
        text = text,
    )
}

pub fn generation_prompt(text: &str, topic: &str, chapter: &str, mcq_count: u32, flashcard_count: u32) -> String {
    format!(
        r#"You are a pediatric medical educator writing exam preparation material
for the topic "{topic}", chapter "{chapter}".

From the source material below create EXACTLY {mcq_count} multiple-choice
questions and EXACTLY {flashcard_count} flashcards. Every MCQ has exactly four
options, a single correct answer letter (A, B, C or D) and a short explanation.

Return a JSON object:
{{
  "mcqs": [{{"question": string, "options": [string, string, string, string], "answer": "A"|"B"|"C"|"D", "explanation": string}}],
  "flashcards": [{{"front": string, "back": string}}]
}}

Source material:
"""
{text}
""""#,
    )
}

pub fn explanation_prompt(question: &str, options: &[String; 4], answer: AnswerLetter) -> String {
    let options_text = options
        .iter()
        .zip(['A', 'B', 'C', 'D'])
        .map(|(opt, letter)| format!("{}. {}", letter, opt))
        .collect::<Vec<_>>()
        .join("\n");
    let correct = &options[answer.index()];

    format!(
        r#"You are a concise pediatric medical expert.
Explain this MCQ. Structure:
**Correct Answer Explanation:** [Explain why.]
**Incorrect Options Explanation:** [Briefly explain why each is wrong.]
Question: {question}
Options:
{options_text}
Correct Answer: {answer}. {correct}

Provide your explanation without conversational filler."#,
    )
}

pub fn advice_prompt(strong_topics: &[String], weak_topics: &[String], overall_accuracy: f64) -> String {
    let list = |topics: &[String]| {
        if topics.is_empty() {
            "None yet".to_string()
        } else {
            topics.join(", ")
        }
    };
    format!(
        r#"You are an encouraging medical study advisor.
User's performance:
- Accuracy: {accuracy:.1}%
- Strong Topics: {strong}
- Weak Topics: {weak}
Provide short, actionable advice in markdown with two sections:
**Areas to Consolidate** and **Areas for Revision**.
Keep it under 150 words."#,
        accuracy = overall_accuracy,
        strong = list(strong_topics),
        weak = list(weak_topics),
    )
}
