//! Prompt builders for the pipeline stages.

use crate::toon;
use graft_core::model::RepoContent;

/// Per-file character budget when embedding sources compactly.
const TOON_FILE_BUDGET: usize = 1_200;

/// Per-file character budget for the verbose fallback prompt.
const PLAIN_FILE_BUDGET: usize = 2_000;

/// Log lines carried into the research prompt for context.
const RESEARCH_LOG_LINES: usize = 10;

/// Strict output contract shared by both analysis prompt forms.
const ANALYSIS_OUTPUT_RULES: &str = r#"CRITICAL INSTRUCTIONS:
- You MUST respond with ONLY a valid JSON object
- NO explanations before or after the JSON
- NO markdown code blocks
- Your ENTIRE response must be parseable as JSON

REQUIRED JSON STRUCTURE:
{
  "main_modules": ["core module names from the source repo"],
  "dependencies": ["package requirements like 'fastapi>=0.100.0'"],
  "affected_files": [
    {
      "path": "relative/path/in/target/project.py",
      "reason": "why this file needs changes",
      "confidence": 85,
      "changes": ["specific change 1", "specific change 2"]
    }
  ],
  "risks": ["potential issue 1"],
  "implementation_steps": ["1. First actionable step", "2. Second step"]
}

NOW ANALYZE THE REPOSITORY AND RESPOND WITH VALID JSON ONLY:"#;

/// Primary analysis prompt: sources embedded in compact TOON form.
pub fn analysis_prompt(
    instructions: &str,
    files: &RepoContent,
    target_context: Option<&str>,
) -> String {
    let mut prompt = format!(
        "You are an expert code integration assistant. Analyze this repository and provide integration recommendations.\n\n\
         USER INSTRUCTIONS:\n{}\n\n\
         SOURCE REPOSITORY (token-oriented notation; truncated flags mark cut content):\n{}\n",
        instructions,
        toon::encode_files(files, TOON_FILE_BUDGET)
    );

    if let Some(context) = target_context {
        prompt.push_str(&format!("\nTARGET PROJECT CONTEXT:\n{}\n", context));
    }

    prompt.push('\n');
    prompt.push_str(ANALYSIS_OUTPUT_RULES);
    prompt
}

/// Fallback analysis prompt: plain sectioned file dump. Used when the
/// compact form fails so the run degrades instead of dying.
pub fn analysis_prompt_plain(
    instructions: &str,
    files: &RepoContent,
    target_context: Option<&str>,
) -> String {
    let mut prompt = format!(
        "You are an expert code integration assistant. Analyze this repository and provide integration recommendations.\n\n\
         USER INSTRUCTIONS:\n{}\n\n\
         SOURCE REPOSITORY FILES:\n",
        instructions
    );

    for (path, content) in files {
        let truncated: String = content.chars().take(PLAIN_FILE_BUDGET).collect();
        prompt.push_str(&format!("\n--- {} ---\n{}\n", path, truncated));
    }

    if let Some(context) = target_context {
        prompt.push_str(&format!("\nTARGET PROJECT CONTEXT:\n{}\n", context));
    }

    prompt.push('\n');
    prompt.push_str(ANALYSIS_OUTPUT_RULES);
    prompt
}

/// Per-file modification prompt for the implementation stage.
pub fn modification_prompt(instructions: &str, path: &str, original: &str) -> String {
    format!(
        "You are an expert developer. Modify the following file according to the instructions.\n\n\
         FILE: {}\n\n\
         ORIGINAL CODE:\n```\n{}\n```\n\n\
         INSTRUCTIONS:\n{}\n\n\
         Provide the complete modified file. Keep the change minimal, preserve\n\
         existing style, and include error handling where behavior changes.\n\n\
         MODIFIED CODE:\n```",
        path, original, instructions
    )
}

/// Research prompt for the grounded-search model, embedding the failure
/// and the tail of the execution logs.
pub fn research_prompt(error_message: &str, failed_code: &str, logs: &[String]) -> String {
    let mut logs_snippet = String::new();
    if !logs.is_empty() {
        let tail_start = logs.len().saturating_sub(RESEARCH_LOG_LINES);
        let tail = &logs[tail_start..];
        logs_snippet = format!(
            "\n## Execution Logs (last {} lines)\n{}\n",
            tail.len(),
            tail.join("\n")
        );
    }

    format!(
        "You are a research agent helping debug a code integration issue.\n\n\
         ## Problem Context\n\
         - **Error**: {}\n\n\
         ## Failed Code\n```\n{}\n```\n{}\n\
         ## Your Mission\n\n\
         1. Analyze the error, failed code, and logs.\n\
         2. Search the web (GitHub, StackOverflow, docs, etc.) for similar issues.\n\
         3. Propose concrete, minimal fixes and code snippets.\n\n\
         Format your answer with sections:\n\
         - Summary\n\
         - Root Cause\n\
         - Suggested Fixes\n\
         - Code Snippets\n\
         - Search Queries Used\n",
        error_message, failed_code, logs_snippet
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> RepoContent {
        let mut files = RepoContent::new();
        files.insert("main.py".to_string(), "print('Hello')".to_string());
        files
    }

    #[test]
    fn analysis_prompt_embeds_instructions_and_schema() {
        let prompt = analysis_prompt("Add logging", &snapshot(), None);
        assert!(prompt.contains("Add logging"));
        assert!(prompt.contains("main.py"));
        assert!(prompt.contains("REQUIRED JSON STRUCTURE"));
        assert!(prompt.contains("affected_files"));
    }

    #[test]
    fn plain_prompt_uses_sectioned_files() {
        let prompt = analysis_prompt_plain("Add logging", &snapshot(), Some("target: cli tool"));
        assert!(prompt.contains("--- main.py ---"));
        assert!(prompt.contains("target: cli tool"));
    }

    #[test]
    fn modification_prompt_carries_file_and_instructions() {
        let prompt = modification_prompt("Use f-strings", "main.py", "print('x')");
        assert!(prompt.contains("FILE: main.py"));
        assert!(prompt.contains("print('x')"));
        assert!(prompt.contains("Use f-strings"));
    }

    #[test]
    fn research_prompt_keeps_only_the_log_tail() {
        let logs: Vec<String> = (0..25).map(|i| format!("log line {}", i)).collect();
        let prompt = research_prompt("ImportError: no module named x", "import x", &logs);
        assert!(prompt.contains("last 10 lines"));
        assert!(prompt.contains("log line 24"));
        assert!(!prompt.contains("log line 14\n"));
        assert!(prompt.contains("Search Queries Used"));
    }

    #[test]
    fn research_prompt_omits_log_section_when_empty() {
        let prompt = research_prompt("boom", "code", &[]);
        assert!(!prompt.contains("Execution Logs"));
    }
}
