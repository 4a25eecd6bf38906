use serde::{Deserialize, Serialize};

/// Lines compared per side. Longer bodies are diffed on their first lines only.
const MAX_DIFF_LINES: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChange {
    pub old_hash: String,
    pub new_hash: String,
    /// Unified-style line diff (`-`/`+`/` ` prefixes). Empty when no previous
    /// body was retained.
    pub diff: String,
}

impl ContentChange {
    pub fn new(old_hash: String, new_hash: String, old_body: Option<&str>, new_body: Option<&str>) -> Self {
        let diff = match (old_body, new_body) {
            (Some(old), Some(new)) => line_diff(old, new),
            _ => String::new(),
        };
        Self {
            old_hash,
            new_hash,
            diff,
        }
    }
}

/// LCS line diff. Unchanged lines are kept so the change has context.
pub fn line_diff(old: &str, new: &str) -> String {
    let a: Vec<&str> = old.lines().take(MAX_DIFF_LINES).collect();
    let b: Vec<&str> = new.lines().take(MAX_DIFF_LINES).collect();

    // lcs[i][j] = length of the LCS of a[i..] and b[j..]
    let mut lcs = vec![vec![0u32; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = String::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            push_line(&mut out, ' ', a[i]);
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            push_line(&mut out, '-', a[i]);
            i += 1;
        } else {
            push_line(&mut out, '+', b[j]);
            j += 1;
        }
    }
    for line in &a[i..] {
        push_line(&mut out, '-', line);
    }
    for line in &b[j..] {
        push_line(&mut out, '+', line);
    }
    out
}

fn push_line(out: &mut String, prefix: char, line: &str) {
    out.push(prefix);
    out.push_str(line);
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_marks_changed_line() {
        let diff = line_diff("a\nb\nc", "a\nx\nc");
        assert_eq!(diff, " a\n-b\n+x\n c\n");
    }

    #[test]
    fn diff_handles_appends_and_removals() {
        assert_eq!(line_diff("a", "a\nb"), " a\n+b\n");
        assert_eq!(line_diff("a\nb", "b"), "-a\n b\n");
        assert_eq!(line_diff("", "new"), "+new\n");
    }

    #[test]
    fn change_without_previous_body_has_empty_diff() {
        let change = ContentChange::new("h1".into(), "h2".into(), None, Some("body"));
        assert!(change.diff.is_empty());
        assert_eq!(change.new_hash, "h2");
    }
}
