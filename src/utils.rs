use crate::types::{RelayError, Result};

/// Check that every listed field is present (and not null) on a raw JSON record
pub fn check_fields_defined(record: &serde_json::Value, fields: &[&str]) -> Result<()> {
    for field in fields {
        match record.get(field) {
            Some(value) if !value.is_null() => {}
            _ => {
                return Err(RelayError::MissingField {
                    field: field.to_string(),
                })
            }
        }
    }
    Ok(())
}

/// Text processing utilities
pub mod text {
    /// Format a byte count with 1024-based units, e.g. 1536 -> "1.5 KiB"
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: [&str; 9] = ["Bytes", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];

        if bytes == 0 {
            return "0 Bytes".to_string();
        }

        let mut value = bytes as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }

        let rounded = format!("{:.2}", value);
        let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
        format!("{} {}", trimmed, UNITS[unit])
    }

    /// Join items as prose: "a", "a and b", "a, b, and c"
    pub fn readable_list(items: &[String]) -> String {
        match items {
            [] => String::new(),
            [only] => only.clone(),
            [first, second] => format!("{} and {}", first, second),
            [init @ .., last] => {
                let mut parts: Vec<String> = init.to_vec();
                parts.push(format!("and {}", last));
                parts.join(", ")
            }
        }
    }

    pub fn capitalize_first(token: &str) -> String {
        let mut chars = token.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// Truncate to `limit` characters, ending with "..." when cut
    pub fn truncate(text: &str, limit: usize) -> String {
        if text.chars().count() < limit {
            return text.to_string();
        }
        let kept: String = text.chars().take(limit.saturating_sub(3)).collect();
        format!("{}...", kept)
    }

    /// Makes booru style tags more human readable, e.g. klee_(genshin_impact) -> Klee
    pub fn clean_up_tags(tags: &[String]) -> Vec<String> {
        let mut cleaned: Vec<String> = Vec::new();
        for tag in tags {
            let mut base = tag.as_str();
            if base.ends_with(')') {
                if let Some(open) = base.rfind('(') {
                    // Drop the separator before the qualifier, whatever its width
                    let head = &base[..open];
                    base = head.char_indices().next_back().map_or(head, |(i, _)| &head[..i]);
                }
            }
            let readable = base
                .split('_')
                .map(capitalize_first)
                .collect::<Vec<_>>()
                .join(" ");
            if !cleaned.contains(&readable) {
                cleaned.push(readable);
            }
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::text::*;
    use super::*;
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn formats_bytes() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(500), "500 Bytes");
        assert_eq!(format_bytes(1024), "1 KiB");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5 MiB");
    }

    #[test]
    fn joins_lists_as_prose() {
        assert_eq!(readable_list(&[]), "");
        assert_eq!(readable_list(&strings(&["a"])), "a");
        assert_eq!(readable_list(&strings(&["a", "b"])), "a and b");
        assert_eq!(readable_list(&strings(&["a", "b", "c"])), "a, b, and c");
    }

    #[test]
    fn truncates_long_text() {
        assert_eq!(truncate("short", 96), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
    }

    #[test]
    fn cleans_up_booru_tags() {
        let tags = strings(&["klee_(genshin_impact)", "soga_no_tojiko", "klee"]);
        assert_eq!(clean_up_tags(&tags), strings(&["Klee", "Soga No Tojiko"]));
    }

    #[test]
    fn cleans_up_tags_with_multibyte_text_before_qualifier() {
        let tags = strings(&["mikoé(x)", "é(x)", "shameimaru_aya_(é)"]);
        assert_eq!(clean_up_tags(&tags), strings(&["Miko", "", "Shameimaru Aya"]));
    }

    #[test]
    fn reports_first_missing_field() {
        let record = json!({ "id": 1, "rating": null });
        assert!(check_fields_defined(&record, &["id"]).is_ok());
        match check_fields_defined(&record, &["id", "rating", "file_ext"]) {
            Err(RelayError::MissingField { field }) => assert_eq!(field, "rating"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
