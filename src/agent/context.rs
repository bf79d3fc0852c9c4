//! Prompt assembly: the system prompt and the per-run message list.

use std::path::Path;

use tracing::warn;

use super::message::{Message, Role};

/// Used when the workspace has no `AGENTS.md`.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful agent that does things. You have access to tools: run_shell (run shell commands), read_file (read file contents), and write_file (write content to a file). Use them when needed to answer the user. Be concise. If you run commands or edit files, summarize what you did and the result.";

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Build the system prompt from workspace files.
///
/// `AGENTS.md` replaces the default prompt; `TOOLS.md` and each
/// `skills/<name>/SKILL.md` (sorted by name) are appended as sections.
pub fn load_system_prompt(workspace: &Path) -> String {
    let mut prompt = read_trimmed(&workspace.join("AGENTS.md"))
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

    if let Some(tools) = read_trimmed(&workspace.join("TOOLS.md")) {
        prompt.push_str(SECTION_SEPARATOR);
        prompt.push_str(&tools);
    }

    for (name, skill) in load_skills(&workspace.join("skills")) {
        prompt.push_str(SECTION_SEPARATOR);
        prompt.push_str(&format!("## Skill: {}\n\n{}", name, skill));
    }

    prompt
}

fn read_trimmed(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content.trim().to_string()),
        Err(e) => {
            warn!("Skipping unreadable {:?}: {}", path, e);
            None
        }
    }
}

fn load_skills(dir: &Path) -> Vec<(String, String)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut skills: Vec<(String, String)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            read_trimmed(&e.path().join("SKILL.md")).map(|skill| (name, skill))
        })
        .collect();
    skills.sort_by(|a, b| a.0.cmp(&b.0));
    skills
}

/// Messages for one run: system prompt, prior history minus any system
/// messages, then the new user message.
pub fn build_messages(system_prompt: &str, history: &[Message], user_message: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system_prompt));
    messages.extend(history.iter().filter(|m| m.role != Role::System).cloned());
    messages.push(Message::user(user_message));
    messages
}
