use ammonia;

/// Clean teacher-authored rich text (quiz descriptions, question text,
/// explanations) using the ammonia library.
///
/// Safe formatting tags (like <b>, <p>) are preserved; <script>, <iframe>
/// and event-handler attributes are stripped before the text is stored and
/// later rendered to students.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

pub fn clean_opt(input: Option<String>) -> Option<String> {
    input.map(|s| clean_html(&s))
}
