//! Heading-scoped markdown editing.
//!
//! A heading line starts with one or more `#`; its level is the run length.
//! A section spans from its heading to the next heading of equal or higher
//! level (or end of file).

/// Replace the body of the first section whose heading contains
/// `section_name` (case-insensitive substring). The heading line itself is
/// preserved; the body becomes one blank line, the new content, and a
/// trailing blank line. A missing section is appended as `# **name**` at
/// end of file.
pub fn update_section(original: &str, section_name: &str, new_content: &str) -> String {
    let lines: Vec<&str> = original.split('\n').collect();
    let mut updated: Vec<String> = Vec::with_capacity(lines.len());
    let needle = section_name.to_lowercase();
    let mut i = 0;
    let mut section_found = false;

    while i < lines.len() {
        let line = lines[i];
        if let Some(level) = heading_level(line) {
            if line.to_lowercase().contains(&needle) {
                section_found = true;
                log::info!("找到匹配章节: {}", line.trim());
                updated.push(line.to_string());
                i += 1;

                // Keep leading blank lines under the heading.
                while i < lines.len() && lines[i].trim().is_empty() {
                    updated.push(lines[i].to_string());
                    i += 1;
                }

                if !new_content.trim().is_empty() {
                    updated.push(String::new());
                    updated.push(new_content.trim().to_string());
                    updated.push(String::new());
                }

                // Skip the old body up to the next heading of level <= this.
                while i < lines.len() {
                    if let Some(next_level) = heading_level(lines[i]) {
                        if next_level <= level {
                            break;
                        }
                    }
                    i += 1;
                }

                updated.extend(lines[i..].iter().map(|l| l.to_string()));
                break;
            }
        }
        updated.push(line.to_string());
        i += 1;
    }

    if !section_found {
        log::warn!("没有找到匹配的章节: {section_name}，将在末尾添加");
        if !original.trim().is_empty() {
            updated.push(String::new());
        }
        updated.push(format!("# **{section_name}**"));
        updated.push(String::new());
        if !new_content.trim().is_empty() {
            updated.push(new_content.trim().to_string());
            updated.push(String::new());
        }
    }

    updated.join("\n")
}

/// Extract a section (heading line included) by case-insensitive substring
/// match on the heading text.
pub fn section_content(original: &str, section_title: &str) -> Option<String> {
    let lines: Vec<&str> = original.split('\n').collect();
    let needle = section_title.to_lowercase();
    let mut i = 0;

    while i < lines.len() {
        if let Some(level) = heading_level(lines[i]) {
            if lines[i].to_lowercase().contains(&needle) {
                let mut collected = vec![lines[i].to_string()];
                i += 1;
                while i < lines.len() {
                    if let Some(next_level) = heading_level(lines[i]) {
                        if next_level <= level {
                            break;
                        }
                    }
                    collected.push(lines[i].to_string());
                    i += 1;
                }
                return Some(collected.join("\n"));
            }
        }
        i += 1;
    }
    None
}

/// Rename the first heading containing `old_title`, preserving its level.
pub fn rename_heading(original: &str, old_title: &str, new_title: &str) -> Option<String> {
    let needle = old_title.to_lowercase();
    let mut renamed = false;

    let lines: Vec<String> = original
        .split('\n')
        .map(|line| {
            if renamed {
                return line.to_string();
            }
            if let Some(level) = heading_level(line) {
                if line.to_lowercase().contains(&needle) {
                    renamed = true;
                    return format!("{} {}", "#".repeat(level), new_title);
                }
            }
            line.to_string()
        })
        .collect();

    renamed.then(|| lines.join("\n"))
}

pub fn heading_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    (level > 0).then_some(level)
}
