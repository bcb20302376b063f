//! Implementation stage: rewrite each file in the snapshot according to
//! the instructions, isolating per-file failures so one bad file never
//! aborts the batch.

use super::client::{CompletionModel, GenerateRequest};
use super::parse::extract_code_block;
use super::prompts::modification_prompt;
use graft_adapters::util::debug_log;
use graft_core::model::{FileError, ImplementationOutcome, ModifiedFile, RepoContent};
use std::fs;
use std::path::Path;

const IMPLEMENTATION_MAX_TOKENS: u32 = 3_000;

/// Persist a backup of the original content under the backup root.
/// Best-effort: failure is logged and the modification proceeds without
/// a recorded backup path.
fn backup_file(backup_root: &Path, path: &str, content: &str) -> Option<String> {
    let backup_path = backup_root.join(format!("{}.bak", path));
    if let Some(parent) = backup_path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            debug_log(&format!("failed to create backup dir for {}: {}", path, err));
            return None;
        }
    }
    match fs::write(&backup_path, content) {
        Ok(()) => Some(backup_path.to_string_lossy().into_owned()),
        Err(err) => {
            debug_log(&format!("failed to create backup for {}: {}", path, err));
            None
        }
    }
}

/// Attempt to modify every file in the snapshot. Files are visited one at
/// a time in snapshot order to keep backup reasoning simple and bound
/// quota usage. `success` is true only when no file recorded an error.
pub async fn implement_changes(
    client: &dyn CompletionModel,
    repo_content: &RepoContent,
    instructions: &str,
    backup_root: Option<&Path>,
) -> ImplementationOutcome {
    let mut outcome = ImplementationOutcome {
        success: true,
        ..Default::default()
    };

    for (path, original) in repo_content {
        let prompt = modification_prompt(instructions, path, original);
        let request = GenerateRequest::new(prompt).with_max_tokens(IMPLEMENTATION_MAX_TOKENS);

        match client.generate(request).await {
            Ok(response) => {
                let modified = extract_code_block(&response.text);
                if !modified.is_empty() && modified != *original {
                    let backup_path =
                        backup_root.and_then(|root| backup_file(root, path, original));
                    outcome.modified_files.push(ModifiedFile {
                        path: path.clone(),
                        original_content: original.clone(),
                        modified_content: modified,
                        backup_path,
                        changes_made: vec!["Modified according to instructions.".to_string()],
                    });
                    outcome
                        .execution_logs
                        .push(format!("File '{}' modified successfully.", path));
                } else {
                    outcome
                        .execution_logs
                        .push(format!("No changes needed for file '{}'.", path));
                }
            }
            Err(err) => {
                let message = format!("Error processing file '{}': {}", path, err);
                debug_log(&message);
                outcome.errors.push(FileError {
                    message,
                    file_path: Some(path.clone()),
                    line_number: None,
                });
            }
        }
    }

    outcome.success = outcome.errors.is_empty();
    outcome
}
