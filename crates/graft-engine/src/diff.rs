//! Line-level diffing between two repository snapshots.
//!
//! Produces unified diffs with three lines of context. Matching is
//! anchor-based: common prefix/suffix first, then lines unique to both
//! sides as anchors, recursing between them. Regions without anchors are
//! emitted as plain replacements.

use graft_core::model::{DiffReport, FileDiff, RepoContent};
use std::collections::{BTreeSet, HashMap};

const CONTEXT_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Equal,
    Delete,
    Insert,
    Replace,
}

#[derive(Debug, Clone, Copy)]
struct Opcode {
    tag: Tag,
    a0: usize,
    a1: usize,
    b0: usize,
    b1: usize,
}

/// Matching runs `(a_start, b_start, len)` in ascending order.
fn common_runs(a: &[&str], b: &[&str]) -> Vec<(usize, usize, usize)> {
    let mut runs = Vec::new();
    recurse(a, b, 0, a.len(), 0, b.len(), &mut runs);
    runs
}

fn recurse(
    a: &[&str],
    b: &[&str],
    mut a0: usize,
    mut a1: usize,
    mut b0: usize,
    mut b1: usize,
    runs: &mut Vec<(usize, usize, usize)>,
) {
    // Common prefix.
    let mut prefix = 0;
    while a0 + prefix < a1 && b0 + prefix < b1 && a[a0 + prefix] == b[b0 + prefix] {
        prefix += 1;
    }
    if prefix > 0 {
        runs.push((a0, b0, prefix));
        a0 += prefix;
        b0 += prefix;
    }

    // Common suffix (recorded after the middle is handled).
    let mut suffix = 0;
    while a1 > a0 && b1 > b0 && a[a1 - 1] == b[b1 - 1] {
        a1 -= 1;
        b1 -= 1;
        suffix += 1;
    }

    if a0 < a1 && b0 < b1 {
        let anchors = unique_anchors(a, b, a0, a1, b0, b1);
        if !anchors.is_empty() {
            let (mut prev_a, mut prev_b) = (a0, b0);
            for (ai, bi) in anchors {
                recurse(a, b, prev_a, ai, prev_b, bi, runs);
                runs.push((ai, bi, 1));
                prev_a = ai + 1;
                prev_b = bi + 1;
            }
            recurse(a, b, prev_a, a1, prev_b, b1, runs);
        }
        // No anchors: the middle is a plain replacement.
    }

    if suffix > 0 {
        runs.push((a1, b1, suffix));
    }
}

/// Longest increasing chain of lines that appear exactly once on each
/// side of the range.
fn unique_anchors(
    a: &[&str],
    b: &[&str],
    a0: usize,
    a1: usize,
    b0: usize,
    b1: usize,
) -> Vec<(usize, usize)> {
    let mut a_seen: HashMap<&str, (usize, usize)> = HashMap::new();
    for (idx, line) in a[a0..a1].iter().enumerate() {
        let entry = a_seen.entry(*line).or_insert((0, a0 + idx));
        entry.0 += 1;
    }
    let mut b_seen: HashMap<&str, (usize, usize)> = HashMap::new();
    for (idx, line) in b[b0..b1].iter().enumerate() {
        let entry = b_seen.entry(*line).or_insert((0, b0 + idx));
        entry.0 += 1;
    }

    let mut pairs: Vec<(usize, usize)> = Vec::new();
    for (idx, line) in a[a0..a1].iter().enumerate() {
        if a_seen.get(line).is_some_and(|(count, _)| *count == 1) {
            if let Some((1, b_idx)) = b_seen.get(line) {
                pairs.push((a0 + idx, *b_idx));
            }
        }
    }

    longest_increasing_chain(&pairs)
}

/// Longest subsequence of `pairs` (already ascending in the first
/// coordinate) with strictly increasing second coordinates.
fn longest_increasing_chain(pairs: &[(usize, usize)]) -> Vec<(usize, usize)> {
    if pairs.is_empty() {
        return Vec::new();
    }

    // tails[k] = index into pairs of the smallest b ending a chain of
    // length k+1; parent links rebuild the chain.
    let mut tails: Vec<usize> = Vec::new();
    let mut parents: Vec<Option<usize>> = vec![None; pairs.len()];

    for (idx, &(_, b)) in pairs.iter().enumerate() {
        let pos = tails.partition_point(|&t| pairs[t].1 < b);
        if pos > 0 {
            parents[idx] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(idx);
        } else {
            tails[pos] = idx;
        }
    }

    let mut chain = Vec::new();
    let mut current = tails.last().copied();
    while let Some(idx) = current {
        chain.push(pairs[idx]);
        current = parents[idx];
    }
    chain.reverse();
    chain
}

fn opcodes(runs: &[(usize, usize, usize)], a_len: usize, b_len: usize) -> Vec<Opcode> {
    let mut ops = Vec::new();
    let (mut a_pos, mut b_pos) = (0, 0);

    fn push_gap(ops: &mut Vec<Opcode>, a_pos: usize, b_pos: usize, a_to: usize, b_to: usize) {
        if a_pos < a_to && b_pos < b_to {
            ops.push(Opcode {
                tag: Tag::Replace,
                a0: a_pos,
                a1: a_to,
                b0: b_pos,
                b1: b_to,
            });
        } else if a_pos < a_to {
            ops.push(Opcode {
                tag: Tag::Delete,
                a0: a_pos,
                a1: a_to,
                b0: b_pos,
                b1: b_pos,
            });
        } else if b_pos < b_to {
            ops.push(Opcode {
                tag: Tag::Insert,
                a0: a_pos,
                a1: a_pos,
                b0: b_pos,
                b1: b_to,
            });
        }
    }

    for &(a_start, b_start, len) in runs {
        push_gap(&mut ops, a_pos, b_pos, a_start, b_start);
        // Anchor matching emits many length-1 runs; coalesce contiguous
        // equal regions so hunk grouping sees them whole.
        let merged = ops.last_mut().is_some_and(|last| {
            if last.tag == Tag::Equal && last.a1 == a_start && last.b1 == b_start {
                last.a1 = a_start + len;
                last.b1 = b_start + len;
                true
            } else {
                false
            }
        });
        if !merged {
            ops.push(Opcode {
                tag: Tag::Equal,
                a0: a_start,
                a1: a_start + len,
                b0: b_start,
                b1: b_start + len,
            });
        }
        a_pos = a_start + len;
        b_pos = b_start + len;
    }
    push_gap(&mut ops, a_pos, b_pos, a_len, b_len);

    ops
}

/// Split opcodes into hunk groups, trimming equal runs to the context
/// width.
fn grouped_opcodes(ops: &[Opcode], context: usize) -> Vec<Vec<Opcode>> {
    let mut codes: Vec<Opcode> = ops.to_vec();
    if codes.is_empty() {
        return Vec::new();
    }

    if let Some(first) = codes.first_mut() {
        if first.tag == Tag::Equal {
            first.a0 = first.a0.max(first.a1.saturating_sub(context));
            first.b0 = first.b0.max(first.b1.saturating_sub(context));
        }
    }
    if let Some(last) = codes.last_mut() {
        if last.tag == Tag::Equal {
            last.a1 = last.a1.min(last.a0 + context);
            last.b1 = last.b1.min(last.b0 + context);
        }
    }

    let mut groups: Vec<Vec<Opcode>> = Vec::new();
    let mut group: Vec<Opcode> = Vec::new();

    for mut code in codes {
        if code.tag == Tag::Equal && code.a1 - code.a0 > context * 2 {
            group.push(Opcode {
                tag: Tag::Equal,
                a0: code.a0,
                a1: code.a0 + context,
                b0: code.b0,
                b1: code.b0 + context,
            });
            groups.push(std::mem::take(&mut group));
            code.a0 = code.a1 - context;
            code.b0 = code.b1 - context;
        }
        group.push(code);
    }

    let only_context = group.len() == 1 && group[0].tag == Tag::Equal;
    if !group.is_empty() && !only_context {
        groups.push(group);
    }
    groups
}

fn format_range(start: usize, length: usize) -> String {
    if length == 1 {
        return format!("{}", start + 1);
    }
    let beginning = if length == 0 { start } else { start + 1 };
    format!("{},{}", beginning, length)
}

/// Render a unified diff with file headers. Empty when the inputs match.
fn unified_diff(a: &[&str], b: &[&str], from_label: &str, to_label: &str) -> String {
    let runs = common_runs(a, b);
    let ops = opcodes(&runs, a.len(), b.len());
    let groups = grouped_opcodes(&ops, CONTEXT_LINES);
    if groups.is_empty() {
        return String::new();
    }

    let mut out = vec![format!("--- {}", from_label), format!("+++ {}", to_label)];

    for group in groups {
        let (Some(first), Some(last)) = (group.first().copied(), group.last().copied()) else {
            continue;
        };
        out.push(format!(
            "@@ -{} +{} @@",
            format_range(first.a0, last.a1 - first.a0),
            format_range(first.b0, last.b1 - first.b0)
        ));
        for op in group {
            match op.tag {
                Tag::Equal => {
                    for line in &a[op.a0..op.a1] {
                        out.push(format!(" {}", line));
                    }
                }
                Tag::Delete => {
                    for line in &a[op.a0..op.a1] {
                        out.push(format!("-{}", line));
                    }
                }
                Tag::Insert => {
                    for line in &b[op.b0..op.b1] {
                        out.push(format!("+{}", line));
                    }
                }
                Tag::Replace => {
                    for line in &a[op.a0..op.a1] {
                        out.push(format!("-{}", line));
                    }
                    for line in &b[op.b0..op.b1] {
                        out.push(format!("+{}", line));
                    }
                }
            }
        }
    }

    out.join("\n")
}

/// Count added/removed lines in a unified diff, ignoring the `+++`/`---`
/// file headers.
fn count_changes(diff_text: &str) -> (usize, usize) {
    let mut added = 0;
    let mut removed = 0;
    for line in diff_text.lines() {
        if line.starts_with('+') && !line.starts_with("+++") {
            added += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            removed += 1;
        }
    }
    (added, removed)
}

/// Diff two snapshots. Files with identical line sequences (including
/// empty-vs-empty) generate no entry at all.
pub fn generate_diff(base: &RepoContent, modified: &RepoContent) -> DiffReport {
    let all_paths: BTreeSet<&String> = base.keys().chain(modified.keys()).collect();

    let mut report = DiffReport::default();

    for path in all_paths {
        let original = base.get(path).map(String::as_str).unwrap_or("");
        let updated = modified.get(path).map(String::as_str).unwrap_or("");

        let a: Vec<&str> = original.lines().collect();
        let b: Vec<&str> = updated.lines().collect();
        if a == b {
            continue;
        }

        let diff_text = unified_diff(
            &a,
            &b,
            &format!("base/{}", path),
            &format!("mod/{}", path),
        );
        let (added, removed) = count_changes(&diff_text);

        let change_summary = if a.is_empty() {
            vec!["File Added".to_string()]
        } else if b.is_empty() {
            vec!["File Removed".to_string()]
        } else {
            vec![format!("Lines Changed: {}", diff_text.lines().count())]
        };

        report.file_diffs.push(FileDiff {
            path: path.clone(),
            diff_text,
            change_summary,
        });
        report.files_changed += 1;
        report.lines_added += added;
        report.lines_removed += removed;
    }

    report.summary = format!(
        "{} files changed, {} lines added, {} lines removed",
        report.files_changed, report.lines_added, report.lines_removed
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, &str)]) -> RepoContent {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn identical_snapshots_diff_to_nothing() {
        let content = snapshot(&[("main.py", "print(1)\nprint(2)"), ("b.py", "x = 1")]);
        let report = generate_diff(&content, &content.clone());
        assert_eq!(report.files_changed, 0);
        assert!(report.file_diffs.is_empty());
        assert_eq!(report.summary, "0 files changed, 0 lines added, 0 lines removed");
    }

    #[test]
    fn added_file_is_detected() {
        let base = snapshot(&[("main.py", "print(1)")]);
        let modified = snapshot(&[("main.py", "print(1)"), ("new.py", "print('new')")]);
        let report = generate_diff(&base, &modified);

        assert_eq!(report.files_changed, 1);
        assert!(report.lines_added >= 1);
        assert_eq!(report.lines_removed, 0);
        let diff = &report.file_diffs[0];
        assert_eq!(diff.path, "new.py");
        assert_eq!(diff.change_summary, vec!["File Added"]);
        assert!(diff.diff_text.contains("+print('new')"));
    }

    #[test]
    fn removed_file_is_detected() {
        let base = snapshot(&[("main.py", "print(1)"), ("old.py", "gone = True")]);
        let modified = snapshot(&[("main.py", "print(1)")]);
        let report = generate_diff(&base, &modified);

        assert_eq!(report.files_changed, 1);
        assert_eq!(report.lines_removed, 1);
        assert_eq!(report.file_diffs[0].change_summary, vec!["File Removed"]);
    }

    #[test]
    fn empty_vs_empty_is_identical_not_added() {
        let base = snapshot(&[("ghost.py", "")]);
        let modified = snapshot(&[("ghost.py", "")]);
        let report = generate_diff(&base, &modified);
        assert_eq!(report.files_changed, 0);

        // A file absent from base entirely is also treated as empty.
        let report = generate_diff(&RepoContent::new(), &snapshot(&[("ghost.py", "")]));
        assert_eq!(report.files_changed, 0);
    }

    #[test]
    fn modified_lines_are_counted_without_headers() {
        let base = snapshot(&[("main.py", "a = 1\nb = 2\nc = 3")]);
        let modified = snapshot(&[("main.py", "a = 1\nb = 20\nc = 3")]);
        let report = generate_diff(&base, &modified);

        assert_eq!(report.files_changed, 1);
        assert_eq!(report.lines_added, 1);
        assert_eq!(report.lines_removed, 1);
        let diff = &report.file_diffs[0];
        assert!(diff.diff_text.contains("--- base/main.py"));
        assert!(diff.diff_text.contains("+++ mod/main.py"));
        assert!(diff.diff_text.contains("-b = 2"));
        assert!(diff.diff_text.contains("+b = 20"));
        assert!(diff.change_summary[0].starts_with("Lines Changed:"));
    }

    #[test]
    fn distant_changes_split_into_hunks_with_context() {
        let base_lines: Vec<String> = (0..30).map(|i| format!("line {}", i)).collect();
        let mut modified_lines = base_lines.clone();
        modified_lines[2] = "changed near top".to_string();
        modified_lines[27] = "changed near bottom".to_string();

        let base = snapshot(&[("big.py", base_lines.join("\n").as_str())]);
        let modified = snapshot(&[("big.py", modified_lines.join("\n").as_str())]);
        let report = generate_diff(&base, &modified);

        let diff = &report.file_diffs[0].diff_text;
        assert_eq!(diff.matches("@@").count(), 4, "two hunks expected: {}", diff);
        // Far-away unchanged lines never appear.
        assert!(!diff.contains("line 15"));
        assert_eq!(report.lines_added, 2);
        assert_eq!(report.lines_removed, 2);
    }

    #[test]
    fn hunk_headers_use_unified_ranges() {
        let base = snapshot(&[("f.py", "a\nb\nc")]);
        let modified = snapshot(&[("f.py", "a\nB\nc")]);
        let report = generate_diff(&base, &modified);
        assert!(report.file_diffs[0].diff_text.contains("@@ -1,3 +1,3 @@"));
    }

    #[test]
    fn summary_aggregates_all_files() {
        let base = snapshot(&[("a.py", "one"), ("b.py", "keep")]);
        let modified = snapshot(&[("a.py", "one\ntwo"), ("b.py", "keep"), ("c.py", "three")]);
        let report = generate_diff(&base, &modified);

        assert_eq!(report.files_changed, 2);
        assert_eq!(report.lines_added, 2);
        assert_eq!(report.lines_removed, 0);
        assert_eq!(report.summary, "2 files changed, 2 lines added, 0 lines removed");
    }

    #[test]
    fn trailing_newline_only_difference_is_ignored() {
        // `lines()` sees the same sequence either way.
        let base = snapshot(&[("main.py", "print(1)")]);
        let modified = snapshot(&[("main.py", "print(1)\n")]);
        let report = generate_diff(&base, &modified);
        assert_eq!(report.files_changed, 0);
    }
}
