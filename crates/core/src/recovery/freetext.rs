//! Last-resort extraction of edit-set components from prose.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{ModelEditSet, VariableRename};

/// Explanations shorter than this are not trusted; the next pattern is tried.
const MIN_EXPLANATION_CHARS: usize = 20;

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).expect("free-text pattern")).collect()
}

static NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_all(&[
        r#"(?i)(?:better function name|suggested name|function_name|rename the function to)\s*[:`'"]\s*([a-zA-Z0-9_]+)[`'"]"#,
        r#"(?i)function_name\s*:\s*"([a-zA-Z0-9_]+)""#,
        r#"(?i)I would name this function\s*["`':]([a-zA-Z0-9_]+)[`'"]"#,
        r#"(?i)Better name:\s*"?([a-zA-Z0-9_]+)"?"#,
        r#"(?i)(?:should|could|would) be (?:named|called|renamed to)\s*[:`'"]?([A-Za-z_][A-Za-z0-9_]*)"#,
    ])
});

static ROLE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_all(&[
        r#"(?i)(?:security role|security_role)\s*[:`'"]\s*"?([^"'\n]+)[`'"]"#,
        r#"(?i)security_role\s*:\s*"([^"]+)""#,
        r"(?i)(?:This function appears to|This function is) (?:be )?(?:related to|part of|involved in) ([^.]+) security",
        r"(?i)Security implications:\s*([^.]+)",
    ])
});

static EXPLANATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_all(&[
        r"(?i)(?:Function description|Function purpose|What this function does):\s*([^\n]+(?:\n[^\n]+)*?)(?:\n\n|$)",
        r#"(?i)(?:comment|explanation)\s*:\s*"([^"]+)""#,
        r"(?i)(?:This function|The function)\s*([^.]+(?:\.[^.]+){0,5})",
    ])
});

static PARAGRAPH_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("paragraph pattern"));

static VARIABLE_SECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:variable|parameter)s?\s*names?:([^#]+?)(?:\n\n|$)")
        .expect("variable section pattern")
});

static RENAME_PAIR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([a-zA-Z0-9_]+)\s*(?:->|→|=>|:|should be renamed to|rename to)\s*([a-zA-Z0-9_]+)")
        .expect("rename pair pattern")
});

static VARIABLE_ARRAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"?variables"?\s*:\s*\[([\s\S]*?)\]"#).expect("variable array pattern")
});

static TRAILING_COMMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*\]").expect("trailing comma pattern"));

static VARIABLE_ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{\s*"original_name"\s*:\s*"([^"]+)"\s*,\s*"new_name"\s*:\s*"([^"]+)"\s*\}"#)
        .expect("variable item pattern")
});

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().trim().to_string()))
}

fn explanation(text: &str) -> String {
    let mut last = String::new();
    for re in EXPLANATION_PATTERNS.iter() {
        if let Some(m) = re.captures(text).and_then(|c| c.get(1)) {
            last = m.as_str().trim().to_string();
            if last.chars().count() > MIN_EXPLANATION_CHARS {
                return last;
            }
        }
    }
    if !last.is_empty() {
        return last;
    }
    PARAGRAPH_SPLIT_RE.split(text).next().unwrap_or_default().trim().to_string()
}

fn rename_pairs(text: &str) -> Vec<VariableRename> {
    let scope = VARIABLE_SECTION_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);
    RENAME_PAIR_RE
        .captures_iter(scope)
        .filter_map(|c| Some((c.get(1)?.as_str().trim(), c.get(2)?.as_str().trim())))
        .filter(|(original, new)| !original.is_empty() && !new.is_empty() && original != new)
        .map(|(original, new)| VariableRename::new(original, new))
        .collect()
}

fn array_variables(text: &str) -> Vec<VariableRename> {
    let Some(body) = VARIABLE_ARRAY_RE.captures(text).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    let candidate = TRAILING_COMMA_RE.replace_all(&format!("[{}]", body.as_str()), "]").into_owned();
    if let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(&candidate) {
        return items
            .iter()
            .filter_map(|item| {
                let original = item.get("original_name")?.as_str()?;
                let new = item.get("new_name")?.as_str()?;
                Some(VariableRename::new(original, new))
            })
            .collect();
    }
    VARIABLE_ITEM_RE
        .captures_iter(body.as_str())
        .filter_map(|c| Some(VariableRename::new(c.get(1)?.as_str(), c.get(2)?.as_str())))
        .collect()
}

/// Pull whatever edit-set components can be found in free text.
///
/// Variables found in an embedded `variables: [...]` array are appended to
/// the `a -> b` style pairs. Repeated proposals for one name are all kept.
pub fn extract_components(text: &str) -> ModelEditSet {
    let mut variables = rename_pairs(text);
    variables.extend(array_variables(text));

    ModelEditSet {
        comment: explanation(text),
        function_name: first_capture(&NAME_PATTERNS, text).unwrap_or_default(),
        variables,
        security_role: first_capture(&ROLE_PATTERNS, text).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_labelled_description() {
        let edits = extract_components(
            "Function description: Validates the license file and aborts on mismatch.\n\n\
             Better name: checkLicense",
        );
        assert_eq!(edits.comment, "Validates the license file and aborts on mismatch.");
        assert_eq!(edits.function_name, "checkLicense");
    }

    #[test]
    fn variable_section_limits_pair_search() {
        let text = "Step 1: look around\n\nVariable names: v1 -> buffer, v2 -> length\n\n# done";
        let edits = extract_components(text);
        assert_eq!(
            edits.variables,
            vec![VariableRename::new("v1", "buffer"), VariableRename::new("v2", "length")]
        );
    }

    #[test]
    fn embedded_array_with_trailing_comma() {
        let text = r#"I think variables: [{"original_name": "a1", "new_name": "ctx"},] works"#;
        let edits = extract_components(text);
        assert!(edits.variables.contains(&VariableRename::new("a1", "ctx")));
    }

    #[test]
    fn security_role_from_prose() {
        let edits = extract_components(
            "This function is part of the anti-tamper security layer. It hashes code pages.",
        );
        assert_eq!(edits.security_role, "the anti-tamper");
    }

    #[test]
    fn repeated_proposals_are_all_kept() {
        let edits = extract_components("Variable names: v1 -> count, v1 -> total, a2 -> size");
        assert_eq!(
            edits.variables,
            vec![
                VariableRename::new("v1", "count"),
                VariableRename::new("v1", "total"),
                VariableRename::new("a2", "size"),
            ]
        );
    }

    #[test]
    fn whitespace_yields_empty_set() {
        assert!(extract_components("   \n\t ").is_empty());
    }
}
