//! Unified diff decoding.
//!
//! The code host serves pull request diffs as unified diff text
//! (`diff --git a/... b/...` file headers, `@@ -a,b +c,d @@` hunk headers).
//! [`parse`] turns that text into a structured change set with a single
//! forward scan and no external diff crate.
//!
//! The decoder is best-effort, not validating: malformed or empty input
//! yields an empty [`Diff`], never an error, and header line counts are not
//! checked against the hunk body. Downstream prompt building degrades
//! gracefully when a diff is partially decoded; rejecting a whole webhook
//! delivery over a stray line would not.

/// One raw line inside a hunk, tagged by its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    /// `+` line present only in the new version.
    Added(String),
    /// `-` line present only in the old version.
    Removed(String),
    /// ` ` line shared by both versions.
    Context(String),
    /// `\` marker line, e.g. `\ No newline at end of file`.
    NoNewline(String),
}

impl DiffLine {
    /// The line content without its prefix.
    pub fn content(&self) -> &str {
        match self {
            DiffLine::Added(s)
            | DiffLine::Removed(s)
            | DiffLine::Context(s)
            | DiffLine::NoNewline(s) => s,
        }
    }
}

/// A contiguous block of changes anchored to line ranges in both versions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiffHunk {
    /// First line of the hunk in the old version.
    pub old_start: u64,
    /// Number of old-version lines the hunk covers.
    pub old_len: u64,
    /// First line of the hunk in the new version.
    pub new_start: u64,
    /// Number of new-version lines the hunk covers.
    pub new_len: u64,
    /// Raw lines in order of appearance.
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Count of (added, removed) lines in this hunk.
    pub fn change_counts(&self) -> (usize, usize) {
        let added = self
            .lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Added(_)))
            .count();
        let removed = self
            .lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Removed(_)))
            .count();
        (added, removed)
    }
}

/// All hunks touching one file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiffFile {
    /// Destination path (the `b/` side of the file header, prefix stripped).
    pub path: String,
    /// Hunks in order of appearance.
    pub hunks: Vec<DiffHunk>,
}

impl DiffFile {
    /// Count of (added, removed) lines across all hunks.
    pub fn change_counts(&self) -> (usize, usize) {
        self.hunks.iter().fold((0, 0), |(a, r), hunk| {
            let (ha, hr) = hunk.change_counts();
            (a + ha, r + hr)
        })
    }
}

/// A parsed change set: files in order of appearance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Diff {
    /// Changed files in order of appearance.
    pub files: Vec<DiffFile>,
}

impl Diff {
    /// Whether the diff contains no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Look up a file record by destination path.
    pub fn file(&self, path: &str) -> Option<&DiffFile> {
        self.files.iter().find(|file| file.path == path)
    }

    /// Total (added, removed) line counts across the change set.
    pub fn change_counts(&self) -> (usize, usize) {
        self.files.iter().fold((0, 0), |(a, r), file| {
            let (fa, fr) = file.change_counts();
            (a + fa, r + fr)
        })
    }
}

/// Decode unified diff text into a structured change set.
pub fn parse(input: &str) -> Diff {
    let mut files: Vec<DiffFile> = Vec::new();
    let mut current_file: Option<DiffFile> = None;
    let mut current_hunk: Option<DiffHunk> = None;

    for line in input.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            flush_hunk(&mut current_file, &mut current_hunk);
            flush_file(&mut files, &mut current_file);
            current_file = Some(DiffFile {
                path: destination_path(rest),
                hunks: Vec::new(),
            });
        } else if line.starts_with("@@") {
            if current_file.is_none() {
                // Hunk with no file header: nothing to attach it to.
                continue;
            }
            flush_hunk(&mut current_file, &mut current_hunk);
            if let Some((old_start, old_len, new_start, new_len)) = parse_hunk_header(line) {
                current_hunk = Some(DiffHunk {
                    old_start,
                    old_len,
                    new_start,
                    new_len,
                    lines: Vec::new(),
                });
            }
        } else if let Some(hunk) = current_hunk.as_mut() {
            let tagged = match line.as_bytes().first() {
                Some(b'+') => Some(DiffLine::Added(line[1..].to_string())),
                Some(b'-') => Some(DiffLine::Removed(line[1..].to_string())),
                Some(b' ') => Some(DiffLine::Context(line[1..].to_string())),
                Some(b'\\') => Some(DiffLine::NoNewline(line[1..].trim_start().to_string())),
                _ => None,
            };
            if let Some(tagged) = tagged {
                hunk.lines.push(tagged);
            }
        }
    }

    flush_hunk(&mut current_file, &mut current_hunk);
    flush_file(&mut files, &mut current_file);
    Diff { files }
}

fn flush_hunk(file: &mut Option<DiffFile>, hunk: &mut Option<DiffHunk>) {
    if let (Some(file), Some(hunk)) = (file.as_mut(), hunk.take()) {
        file.hunks.push(hunk);
    }
}

fn flush_file(files: &mut Vec<DiffFile>, file: &mut Option<DiffFile>) {
    if let Some(file) = file.take() {
        files.push(file);
    }
}

/// Extract the destination path from the remainder of a `diff --git` line
/// (`a/old b/new`), stripping the `b/` prefix.
fn destination_path(rest: &str) -> String {
    let token = rest.split_whitespace().last().unwrap_or_default();
    token
        .strip_prefix("b/")
        .unwrap_or(token)
        .to_string()
}

/// Parse `@@ -old_start[,old_len] +new_start[,new_len] @@ ...`, tolerating
/// the shorthand where an omitted length defaults to 1.
fn parse_hunk_header(line: &str) -> Option<(u64, u64, u64, u64)> {
    let rest = line.strip_prefix("@@ -")?;
    let (ranges, _) = rest.split_once(" @@").unwrap_or((rest, ""));
    let (old, new) = ranges.split_once(" +")?;
    let (old_start, old_len) = parse_range(old)?;
    let (new_start, new_len) = parse_range(new)?;
    Some((old_start, old_len, new_start, new_len))
}

fn parse_range(range: &str) -> Option<(u64, u64)> {
    match range.split_once(',') {
        Some((start, len)) => Some((start.trim().parse().ok()?, len.trim().parse().ok()?)),
        None => Some((range.trim().parse().ok()?, 1)),
    }
}
