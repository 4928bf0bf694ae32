//! Repair of truncated tool-call argument JSON.
//!
//! Streaming providers occasionally cut an argument string short at an id
//! boundary or at end-of-stream. The repair appends a closing quote for an
//! unpaired `"`, then a `}` per unmatched `{`, then a `]` per unmatched `[`,
//! and re-parses once after all fixes. Valid input is returned unchanged.

pub fn is_valid_json(input: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(input).is_ok()
}

pub fn try_fix_incomplete_json(input: &str) -> String {
    if input.trim().is_empty() {
        return input.to_string();
    }
    if is_valid_json(input) {
        return input.to_string();
    }

    let mut fixed = input.to_string();

    let quote_count = count_unescaped(input, '"');
    if quote_count % 2 != 0 {
        fixed.push('"');
    }

    let open_braces = fixed.matches('{').count();
    let close_braces = fixed.matches('}').count();
    if open_braces > close_braces {
        for _ in 0..(open_braces - close_braces) {
            fixed.push('}');
        }
    }

    let open_brackets = fixed.matches('[').count();
    let close_brackets = fixed.matches(']').count();
    if open_brackets > close_brackets {
        for _ in 0..(open_brackets - close_brackets) {
            fixed.push(']');
        }
    }

    if is_valid_json(&fixed) {
        log::info!(
            "JSON repair succeeded, {} -> {} chars",
            input.len(),
            fixed.len()
        );
        fixed
    } else {
        log::warn!("JSON repair failed: {:?}", &input[..input.len().min(100)]);
        input.to_string()
    }
}

fn count_unescaped(input: &str, target: char) -> usize {
    let mut count = 0;
    let mut prev_backslash = false;
    for ch in input.chars() {
        if ch == target && !prev_backslash {
            count += 1;
        }
        prev_backslash = ch == '\\' && !prev_backslash;
    }
    count
}
