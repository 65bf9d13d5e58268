//! Traceback cleanup: escape stripping and line-number recovery.

use std::sync::OnceLock;

use regex::Regex;

fn ansi_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\x1B(?:[@-Z\\\-_]|\[[0-?]*[ -/]*[@-~])").ok())
        .as_ref()
}

struct FramePatterns {
    cell_in: Regex,
    ipython_file: Regex,
    ipython_frame: Regex,
    arrow: Regex,
}

impl FramePatterns {
    fn build() -> Result<Self, regex::Error> {
        Ok(Self {
            cell_in: Regex::new(r"Cell In\[\d*\], line (\d+)")?,
            ipython_file: Regex::new(r#"File "<ipython-input-[^>]*>", line (\d+)"#)?,
            ipython_frame: Regex::new(r"<ipython-input-[^>]*>")?,
            arrow: Regex::new(r"^\s*-+>\s*(\d+)")?,
        })
    }
}

fn frame_patterns() -> Option<&'static FramePatterns> {
    static PATTERNS: OnceLock<Option<FramePatterns>> = OnceLock::new();
    PATTERNS.get_or_init(|| FramePatterns::build().ok()).as_ref()
}

/// Remove terminal escape sequences (colors, cursor movement).
pub fn strip_ansi(text: &str) -> String {
    match ansi_pattern() {
        Some(pattern) => pattern.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// Find the cell line a traceback points at.
///
/// Recognizes `Cell In[n], line L`, `File "<ipython-input-..>", line L`, and an
/// `<ipython-input-..>` frame header followed by a `----> L` marker. Lines are
/// searched in order and the first match wins.
pub fn derive_error_line(traceback: &[String]) -> Option<u32> {
    let patterns = frame_patterns()?;
    let lines: Vec<String> = traceback
        .iter()
        .flat_map(|entry| strip_ansi(entry).lines().map(str::to_string).collect::<Vec<_>>())
        .collect();

    let mut in_ipython_frame = false;
    for line in &lines {
        if let Some(caps) = patterns.cell_in.captures(line) {
            return caps[1].parse().ok();
        }
        if let Some(caps) = patterns.ipython_file.captures(line) {
            return caps[1].parse().ok();
        }
        if patterns.ipython_frame.is_match(line) {
            in_ipython_frame = true;
            continue;
        }
        if in_ipython_frame {
            if let Some(caps) = patterns.arrow.captures(line) {
                return caps[1].parse().ok();
            }
        }
    }
    None
}
