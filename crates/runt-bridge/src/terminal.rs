//! Terminal emulation for persisted stream output.
//!
//! Live output is forwarded to the editor untouched. Before a run of text is
//! written into a report it is replayed through a small character grid so
//! that carriage returns (progress bars) and backspaces collapse to what a
//! terminal would finally show.
//!
//! Only `\n`, `\r` and backspace move the cursor. Every other character is
//! written at the cursor, so escape sequences must be stripped beforehand.

/// A growable grid of character rows with a `(row, col)` cursor.
#[derive(Debug, Clone)]
pub struct StreamTerminal {
    rows: Vec<Vec<char>>,
    row: usize,
    col: usize,
}

impl Default for StreamTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTerminal {
    pub fn new() -> Self {
        Self {
            rows: vec![Vec::new()],
            row: 0,
            col: 0,
        }
    }

    /// Feed more text into the grid. Can be called repeatedly with chunks.
    pub fn feed(&mut self, text: &str) {
        for c in text.chars() {
            match c {
                '\n' => {
                    self.row += 1;
                    self.col = 0;
                    if self.rows.len() <= self.row {
                        self.rows.push(Vec::new());
                    }
                }
                '\r' => self.col = 0,
                '\x08' => self.col = self.col.saturating_sub(1),
                c => self.put(c),
            }
        }
    }

    fn put(&mut self, c: char) {
        let line = &mut self.rows[self.row];
        if line.len() < self.col {
            line.resize(self.col, ' ');
        }
        if self.col < line.len() {
            line[self.col] = c;
        } else {
            line.push(c);
        }
        self.col += 1;
    }

    /// Rows joined by newline, with trailing empty rows removed. Cells are
    /// kept as written, trailing spaces included.
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = self
            .rows
            .iter()
            .map(|row| row.iter().collect::<String>())
            .collect();

        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }

        lines.join("\n")
    }
}

/// Replay `text` through a fresh grid and return the rendered result.
pub fn render(text: &str) -> String {
    let mut terminal = StreamTerminal::new();
    terminal.feed(text);
    terminal.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_text() {
        assert_eq!(render("hello world"), "hello world");
    }

    #[test]
    fn test_carriage_return() {
        let result = render("Progress: 10%\rProgress: 20%\rProgress: 100%\n");
        assert_eq!(result, "Progress: 100%");
    }

    #[test]
    fn test_shorter_overwrite_keeps_tail() {
        // A terminal only overwrites the cells it writes to.
        assert_eq!(render("abcdef\rxy"), "xycdef");
    }

    #[test]
    fn test_newlines() {
        assert_eq!(render("line1\nline2\nline3"), "line1\nline2\nline3");
    }

    #[test]
    fn test_crlf() {
        assert_eq!(render("a\r\nb\r\n"), "a\nb");
    }

    #[test]
    fn test_backspace() {
        assert_eq!(render("abc\x08\x08X"), "aXc");
        // Backspace never moves before the start of the line.
        assert_eq!(render("\x08\x08hi"), "hi");
    }

    #[test]
    fn test_trailing_blank_lines_removed() {
        assert_eq!(render("done\n\n\n"), "done");
        assert_eq!(render("\n\n"), "");
    }

    #[test]
    fn test_trailing_spaces_are_kept() {
        assert_eq!(render("col1  col2  \nx \n"), "col1  col2  \nx ");
    }

    #[test]
    fn test_leading_blank_line_kept() {
        assert_eq!(render("\nafter"), "\nafter");
    }

    #[test]
    fn test_incremental_feed() {
        let mut terminal = StreamTerminal::new();
        terminal.feed("Loading");
        terminal.feed("...");
        terminal.feed("\rDone!     ");
        terminal.feed("\nnext");
        assert_eq!(terminal.render(), "Done!     \nnext");
    }
}
