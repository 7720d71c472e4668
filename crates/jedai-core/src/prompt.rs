//! Prompt construction for the answer synthesizer.

use std::fmt::Write as _;

use crate::models::{IdeContext, RetrievedChunk};

const SYSTEM_PROMPT: &str = "You are a teaching assistant for a programming course. \
Answer the student's question clearly and concisely. When course material excerpts \
are provided, base the answer on them and cite each excerpt you use with its \
bracketed number, for example [1]. If the excerpts do not cover the question, say so.";

const GENERAL_SYSTEM_PROMPT: &str = "You are a teaching assistant for a programming course. \
No course material matched this question, so answer from general knowledge and keep \
the answer short.";

/// A chat-style prompt: system instructions plus one user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// How many leading excerpts made it into `user` (numbered `[1]..=[n]`).
    pub excerpts: usize,
}

impl Prompt {
    /// Flatten into a single completion-style string.
    pub fn to_plain_text(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    max_context_chars: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(12_000)
    }
}

impl PromptBuilder {
    pub fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars }
    }

    /// Prompt with numbered excerpts. Excerpts are added in rank order until
    /// the context budget runs out; the first one is always included, cut to
    /// fit if necessary.
    pub fn grounded(
        &self,
        question: &str,
        ide: Option<&IdeContext>,
        chunks: &[RetrievedChunk],
    ) -> Prompt {
        let mut user = String::from("Course material excerpts:\n");
        let mut used = 0;
        let mut excerpts = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            let remaining = self.max_context_chars.saturating_sub(used);
            let text = chunk.content();
            let body = if text.len() <= remaining {
                text
            } else if i == 0 {
                truncate_at_char_boundary(text, remaining)
            } else {
                break;
            };
            let _ = write!(user, "\n[{}] ({})\n{}\n", i + 1, chunk.citation_label(), body);
            used += body.len();
            excerpts += 1;
        }

        push_ide_context(&mut user, ide);
        let _ = write!(
            user,
            "\nQuestion: {}\n\nAnswer using the excerpts above and cite them by number.",
            question.trim()
        );

        Prompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
            excerpts,
        }
    }

    /// Prompt without course material.
    pub fn general(&self, question: &str, ide: Option<&IdeContext>) -> Prompt {
        let mut user = String::new();
        push_ide_context(&mut user, ide);
        let _ = write!(user, "\nQuestion: {}", question.trim());
        Prompt {
            system: GENERAL_SYSTEM_PROMPT.to_string(),
            user: user.trim_start().to_string(),
            excerpts: 0,
        }
    }
}

fn push_ide_context(out: &mut String, ide: Option<&IdeContext>) {
    let Some(ide) = ide.filter(|c| !c.is_empty()) else {
        return;
    };
    out.push_str("\nEditor context:\n");
    if let Some(project) = &ide.project_name {
        let _ = writeln!(out, "Project: {}", project);
    }
    if let Some(file) = &ide.file_path {
        let _ = writeln!(out, "File: {}", file);
    }
    if let Some(language) = &ide.language {
        let _ = writeln!(out, "Language: {}", language);
    }
    if let Some(line) = ide.line_number {
        let _ = writeln!(out, "Line: {}", line);
    }
    if let Some(code) = &ide.selected_code {
        let fence = ide.language.as_deref().unwrap_or("");
        let _ = writeln!(out, "Selected code:\n```{}\n{}\n```", fence.to_lowercase(), code);
    }
}

/// 1-based excerpt numbers referenced as `[n]` in `text`, sorted and
/// deduplicated, limited to `1..=max`.
pub fn referenced_excerpts(text: &str, max: usize) -> Vec<usize> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        rest = &rest[open + 1..];
        let digits: &str = &rest[..rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len())];
        if !digits.is_empty() && rest[digits.len()..].starts_with(']') {
            if let Ok(n) = digits.parse::<usize>() {
                if (1..=max).contains(&n) {
                    found.push(n);
                }
            }
        }
    }
    found.sort_unstable();
    found.dedup();
    found
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if max >= s.len() {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, PageSpan};

    fn chunk(doc: &str, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                id: doc.into(),
                document_id: doc.into(),
                chunk_index: 0,
                text: text.into(),
                pages: PageSpan::Page { page: 3 },
                hash: String::new(),
            },
            score: 0.9,
            source: format!("{}.pdf", doc),
        }
    }

    #[test]
    fn grounded_prompt_numbers_excerpts_and_includes_context() {
        let ide = IdeContext {
            file_path: Some("src/Main.java".into()),
            language: Some("Java".into()),
            selected_code: Some("int f(int n)".into()),
            ..Default::default()
        };
        let p = PromptBuilder::default().grounded(
            "What is recursion?",
            Some(&ide),
            &[chunk("l1", "Recursion..."), chunk("l2", "Base case...")],
        );
        assert_eq!(p.excerpts, 2);
        assert!(p.user.contains("[1] (l1.pdf, p. 3)"));
        assert!(p.user.contains("[2] (l2.pdf, p. 3)"));
        assert!(p.user.contains("File: src/Main.java"));
        assert!(p.user.contains("```java\nint f(int n)\n```"));
        assert!(p.user.contains("Question: What is recursion?"));
    }

    #[test]
    fn grounded_prompt_respects_budget() {
        let long = "x".repeat(50);
        let p = PromptBuilder::new(60).grounded("q", None, &[chunk("a", &long), chunk("b", &long)]);
        assert_eq!(p.excerpts, 1);

        let p = PromptBuilder::new(10).grounded("q", None, &[chunk("a", &long)]);
        assert_eq!(p.excerpts, 1);
        assert!(p.user.contains(&"x".repeat(10)));
        assert!(!p.user.contains(&"x".repeat(11)));
    }

    #[test]
    fn general_prompt_has_no_excerpts() {
        let p = PromptBuilder::default().general("Why?", Some(&IdeContext::default()));
        assert_eq!(p.excerpts, 0);
        assert_eq!(p.user, "Question: Why?");
    }

    #[test]
    fn finds_bracketed_references() {
        assert_eq!(referenced_excerpts("See [2] and [1], also [2].", 3), vec![1, 2]);
        assert_eq!(referenced_excerpts("[7] [0] [x] [", 3), Vec::<usize>::new());
        assert_eq!(referenced_excerpts("a[3]", 3), vec![3]);
    }
}
