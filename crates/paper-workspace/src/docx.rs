//! Minimal markdown-to-Word transform used by the zip export.
//!
//! Covers `#` through `#####` headings, paragraphs and stripping of inline
//! `*` / `**` / backticks / link brackets. Nothing more.

use docx_rs::{AlignmentType, Docx, Paragraph, Run};

use crate::error::{Result, WorkspaceError};

pub fn markdown_to_docx(markdown: &str) -> Result<Vec<u8>> {
    let mut docx = Docx::new();

    for line in markdown.lines() {
        let line = line.trim_end();
        let trimmed = line.trim_start();

        docx = if let Some((level, text)) = heading(trimmed) {
            let size = match level {
                1 => 36,
                2 => 32,
                3 => 28,
                4 => 26,
                _ => 24,
            };
            let mut paragraph =
                Paragraph::new().add_run(Run::new().add_text(strip_inline(text)).bold().size(size));
            if level == 1 {
                paragraph = paragraph.align(AlignmentType::Center);
            }
            docx.add_paragraph(paragraph)
        } else if trimmed.is_empty() {
            docx.add_paragraph(Paragraph::new())
        } else {
            docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(strip_inline(trimmed))))
        };
    }

    let mut buffer = std::io::Cursor::new(Vec::new());
    docx.build()
        .pack(&mut buffer)
        .map_err(|e| WorkspaceError::Docx(e.to_string()))?;
    Ok(buffer.into_inner())
}

fn heading(line: &str) -> Option<(usize, &str)> {
    for level in (1..=5).rev() {
        let prefix: String = "#".repeat(level) + " ";
        if let Some(rest) = line.strip_prefix(&prefix) {
            return Some((level, rest));
        }
    }
    None
}

fn strip_inline(text: &str) -> String {
    text.replace("**", "")
        .replace('*', "")
        .replace('`', "")
        .replace(['[', ']', '(', ')'], "")
}
