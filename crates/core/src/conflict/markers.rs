//! Conflict-marker parsing and rewriting.
//!
//! A merge leaves competing edits bracketed by `<<<<<<<` / `=======` /
//! `>>>>>>>` markers. [`parse_conflict_markers`] extracts every marked
//! section; [`apply_strategy`] rewrites the file with one side (or both)
//! and drops the markers.
//!
//! A start marker with no matching separator and end marker before
//! end-of-input is skipped without error — lenient by design of the
//! reference merge tooling, whose output this parser mirrors.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ResolutionStrategy;

/// One parsed conflict region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSection {
    /// Branch label on the start-marker line (`HEAD` if absent).
    pub current_branch: String,
    /// Branch label on the end-marker line (`unknown` if absent).
    pub incoming_branch: String,
    /// Text strictly between the start marker and the separator.
    pub current_content: String,
    /// Text strictly between the separator and the end marker.
    pub incoming_content: String,
    /// Line number (0-based) of the start marker.
    pub start_line: usize,
    /// Line number (0-based) of the end marker.
    pub end_line: usize,
}

fn is_start_marker(line: &str) -> bool {
    line.trim_start().starts_with("<<<<<<<")
}

fn is_separator(line: &str) -> bool {
    line == "======="
}

fn is_end_marker(line: &str) -> bool {
    line.starts_with(">>>>>>>")
}

fn marker_label<'a>(line: &'a str, default: &'a str) -> &'a str {
    match line.split_once(' ') {
        Some((_, label)) if !label.trim().is_empty() => label.trim(),
        _ => default,
    }
}

/// Locate the separator and end marker for a section starting at `start`.
/// Returns `(separator_idx, end_idx)` or `None` for a malformed block.
fn find_section_bounds(lines: &[&str], start: usize) -> Option<(usize, usize)> {
    let separator = (start + 1..lines.len()).find(|&i| is_separator(lines[i]))?;
    let end = (separator + 1..lines.len()).find(|&i| is_end_marker(lines[i]))?;
    Some((separator, end))
}

/// Parse all complete conflict sections out of `content`, in order.
pub fn parse_conflict_markers(content: &str) -> Vec<ConflictSection> {
    let lines: Vec<&str> = content.lines().collect();
    let mut sections = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        if !is_start_marker(lines[i]) {
            i += 1;
            continue;
        }
        match find_section_bounds(&lines, i) {
            Some((separator, end)) => {
                sections.push(ConflictSection {
                    current_branch: marker_label(lines[i].trim_start(), "HEAD").to_string(),
                    incoming_branch: marker_label(lines[end], "unknown").to_string(),
                    current_content: lines[i + 1..separator].join("\n"),
                    incoming_content: lines[separator + 1..end].join("\n"),
                    start_line: i,
                    end_line: end,
                });
                i = end + 1;
            }
            None => {
                // Malformed block: no matching separator/end marker.
                // Skip past the start marker without error.
                i += 1;
            }
        }
    }

    sections
}

/// Rewrite every complete marked region of `content` per `strategy`.
///
/// `AcceptCurrent` keeps the current-side lines, `AcceptIncoming` the
/// incoming-side lines, `AutoMerge` both (current first, naively). Any
/// other strategy leaves the block untouched, so callers can detect "no
/// change" and treat the file as unresolved.
pub fn apply_strategy(content: &str, strategy: ResolutionStrategy) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut output: Vec<&str> = Vec::with_capacity(lines.len());

    let mut i = 0;
    while i < lines.len() {
        if !is_start_marker(lines[i]) {
            output.push(lines[i]);
            i += 1;
            continue;
        }
        match find_section_bounds(&lines, i) {
            Some((separator, end)) => {
                match strategy {
                    ResolutionStrategy::AcceptCurrent => {
                        output.extend(&lines[i + 1..separator]);
                    }
                    ResolutionStrategy::AcceptIncoming => {
                        output.extend(&lines[separator + 1..end]);
                    }
                    ResolutionStrategy::AutoMerge => {
                        output.extend(&lines[i + 1..separator]);
                        output.extend(&lines[separator + 1..end]);
                    }
                    ResolutionStrategy::Manual => {
                        // Untouched, markers included.
                        output.extend(&lines[i..=end]);
                    }
                }
                i = end + 1;
            }
            None => {
                output.push(lines[i]);
                i += 1;
            }
        }
    }

    let mut result = output.join("\n");
    if content.ends_with('\n') && !result.is_empty() {
        result.push('\n');
    }
    result
}

/// Whether every section of a file is safe to resolve automatically.
///
/// A section with one side empty (after trimming) never blocks. Otherwise
/// the two sides are compared as sets of lines: an overlap exceeding 50%
/// of the smaller side means both branches edited the same material, which
/// is a real conflicting edit.
pub fn is_auto_resolvable(sections: &[ConflictSection]) -> bool {
    for section in sections {
        if section.current_content.trim().is_empty()
            || section.incoming_content.trim().is_empty()
        {
            continue;
        }
        let current: HashSet<&str> = section.current_content.lines().collect();
        let incoming: HashSet<&str> = section.incoming_content.lines().collect();
        let overlap = current.intersection(&incoming).count();
        let smaller = current.len().min(incoming.len());
        if smaller > 0 && overlap * 2 > smaller {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "\
line before
<<<<<<< HEAD
current one
current two
=======
incoming one
>>>>>>> feature
line after
";

    #[test]
    fn test_parse_single_section() {
        let sections = parse_conflict_markers(SIMPLE);
        assert_eq!(sections.len(), 1);
        let s = &sections[0];
        assert_eq!(s.current_branch, "HEAD");
        assert_eq!(s.incoming_branch, "feature");
        assert_eq!(s.current_content, "current one\ncurrent two");
        assert_eq!(s.incoming_content, "incoming one");
        assert_eq!(s.start_line, 1);
        assert_eq!(s.end_line, 6);
    }

    #[test]
    fn test_parse_default_labels() {
        let content = "<<<<<<<\na\n=======\nb\n>>>>>>>\n";
        let sections = parse_conflict_markers(content);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].current_branch, "HEAD");
        assert_eq!(sections[0].incoming_branch, "unknown");
    }

    #[test]
    fn test_parse_multiple_sections_in_order() {
        let content = "\
<<<<<<< HEAD
a
=======
b
>>>>>>> one
middle
<<<<<<< HEAD
c
=======
d
>>>>>>> two
";
        let sections = parse_conflict_markers(content);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].incoming_branch, "one");
        assert_eq!(sections[1].incoming_branch, "two");
        assert_eq!(sections[1].current_content, "c");
    }

    #[test]
    fn test_parse_malformed_block_is_skipped() {
        // Start marker with no separator before end-of-input.
        let content = "<<<<<<< HEAD\norphaned\n";
        assert!(parse_conflict_markers(content).is_empty());

        // Separator but no end marker.
        let content = "<<<<<<< HEAD\na\n=======\nb\n";
        assert!(parse_conflict_markers(content).is_empty());

        // A malformed block followed by a complete one: the complete one
        // is still found.
        let content = "<<<<<<< HEAD\n<<<<<<< HEAD\na\n=======\nb\n>>>>>>> f\n";
        let sections = parse_conflict_markers(content);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].incoming_branch, "f");
    }

    #[test]
    fn test_parse_no_markers() {
        assert!(parse_conflict_markers("plain\nfile\n").is_empty());
    }

    #[test]
    fn test_apply_accept_incoming_removes_all_markers() {
        let result = apply_strategy(SIMPLE, ResolutionStrategy::AcceptIncoming);
        assert_eq!(result, "line before\nincoming one\nline after\n");
        assert!(!result.contains("<<<<<<<"));
        assert!(!result.contains("======="));
        assert!(!result.contains(">>>>>>>"));
    }

    #[test]
    fn test_apply_accept_current() {
        let result = apply_strategy(SIMPLE, ResolutionStrategy::AcceptCurrent);
        assert_eq!(result, "line before\ncurrent one\ncurrent two\nline after\n");
    }

    #[test]
    fn test_apply_auto_merge_concatenates() {
        let result = apply_strategy(SIMPLE, ResolutionStrategy::AutoMerge);
        assert_eq!(
            result,
            "line before\ncurrent one\ncurrent two\nincoming one\nline after\n"
        );
    }

    #[test]
    fn test_apply_manual_leaves_content_untouched() {
        let result = apply_strategy(SIMPLE, ResolutionStrategy::Manual);
        assert_eq!(result, SIMPLE);
    }

    #[test]
    fn test_apply_malformed_block_left_as_is() {
        let content = "<<<<<<< HEAD\norphaned\n";
        let result = apply_strategy(content, ResolutionStrategy::AcceptIncoming);
        assert_eq!(result, content);
    }

    fn section(current: &str, incoming: &str) -> ConflictSection {
        ConflictSection {
            current_branch: "HEAD".into(),
            incoming_branch: "feature".into(),
            current_content: current.into(),
            incoming_content: incoming.into(),
            start_line: 0,
            end_line: 0,
        }
    }

    #[test]
    fn test_empty_side_is_auto_resolvable() {
        assert!(is_auto_resolvable(&[section("", "new code")]));
        assert!(is_auto_resolvable(&[section("   \n  ", "new code")]));
    }

    #[test]
    fn test_disjoint_edits_are_auto_resolvable() {
        assert!(is_auto_resolvable(&[section("a\nb\nc", "x\ny\nz")]));
    }

    #[test]
    fn test_overlapping_edits_are_not_auto_resolvable() {
        // Both lines of the smaller side appear on the other side: 100% > 50%.
        assert!(!is_auto_resolvable(&[section("a\nb", "a\nb\nc")]));
    }

    #[test]
    fn test_overlap_at_half_is_still_resolvable() {
        // One of two lines shared: exactly 50%, not strictly greater.
        assert!(is_auto_resolvable(&[section("a\nb", "a\nx")]));
    }

    #[test]
    fn test_one_blocking_section_blocks_the_file() {
        let sections = vec![section("", "ok"), section("a\nb", "a\nb")];
        assert!(!is_auto_resolvable(&sections));
    }

    #[test]
    fn test_no_sections_is_resolvable() {
        assert!(is_auto_resolvable(&[]));
    }
}
