//! Edit application.
//!
//! Writes a recovered edit-set into the oracle: a wrapped function comment
//! (prefixed with the security role when there is one), an address-suffixed
//! function name and local variable renames. Each edit is attempted
//! independently; one failure never blocks the others.

use serde::Serialize;
use tracing::{info, warn};

use crate::model::{FunctionAddress, ModelEditSet};
use crate::oracle::SymbolOracle;

/// Maximum comment line width.
pub const COMMENT_WIDTH: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EditOutcome {
    /// Written; carries the value stored.
    Applied(String),
    /// The oracle already held this value.
    Unchanged,
    /// Nothing was proposed.
    Skipped,
    Failed(String),
}

impl EditOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, EditOutcome::Applied(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EditOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableOutcome {
    pub original_name: String,
    pub new_name: String,
    pub outcome: EditOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub function: FunctionAddress,
    pub comment: EditOutcome,
    pub function_name: EditOutcome,
    pub variables: Vec<VariableOutcome>,
}

impl ApplyReport {
    pub fn applied_count(&self) -> usize {
        usize::from(self.comment.is_applied())
            + usize::from(self.function_name.is_applied())
            + self.variables.iter().filter(|v| v.outcome.is_applied()).count()
    }

    pub fn failed_count(&self) -> usize {
        usize::from(self.comment.is_failed())
            + usize::from(self.function_name.is_failed())
            + self.variables.iter().filter(|v| v.outcome.is_failed()).count()
    }
}

/// Greedy word wrap. Existing line breaks are kept; words longer than
/// `width` are split.
pub fn wrap_text(text: &str, width: usize) -> String {
    let width = width.max(1);
    let mut lines: Vec<String> = Vec::new();
    for source in text.lines() {
        if source.trim().is_empty() {
            lines.push(String::new());
            continue;
        }
        let mut line = String::new();
        for word in source.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                }
                lines.push(word.drain(..width).collect());
            }
            let word: String = word.into_iter().collect();
            if word.is_empty() {
                continue;
            }
            let needed = if line.is_empty() { word.chars().count() } else { word.chars().count() + 1 };
            if line.chars().count() + needed > width {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&word);
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}

/// Comment text for an edit-set, or `None` when there is nothing to write.
pub fn compose_comment(edits: &ModelEditSet) -> Option<String> {
    let text = match (edits.security_role.trim(), edits.comment.trim()) {
        ("", "") => return None,
        ("", comment) => comment.to_string(),
        (role, "") => format!("SECURITY ROLE: {role}"),
        (role, comment) => format!("SECURITY ROLE: {role}\n\n{comment}"),
    };
    Some(wrap_text(&text, COMMENT_WIDTH))
}

/// `name` with the function's hex address appended, e.g. `parse_header_401000`.
///
/// An address suffix already present is not repeated.
pub fn suffixed_function_name(name: &str, func: FunctionAddress) -> String {
    let suffix = format!("_{:x}", func.0);
    let base = name.trim();
    let base = base.strip_suffix(&suffix).unwrap_or(base);
    format!("{base}{suffix}")
}

/// Apply `edits` to the function at `func` and refresh it.
pub fn apply_edit_set(
    oracle: &mut dyn SymbolOracle,
    func: FunctionAddress,
    edits: &ModelEditSet,
) -> ApplyReport {
    let current = oracle.function(func.0);

    let comment = match compose_comment(edits) {
        None => EditOutcome::Skipped,
        Some(text) if current.as_ref().and_then(|f| f.comment.as_deref()) == Some(text.as_str()) => {
            EditOutcome::Unchanged
        }
        Some(text) => match oracle.set_function_comment(func, &text) {
            Ok(()) => {
                info!(function = %func, "set function comment");
                EditOutcome::Applied(text)
            }
            Err(err) => {
                warn!(function = %func, error = %err, "failed to set function comment");
                EditOutcome::Failed(err.to_string())
            }
        },
    };

    let function_name = if edits.function_name.trim().is_empty() {
        EditOutcome::Skipped
    } else {
        let new_name = suffixed_function_name(&edits.function_name, func);
        if current.as_ref().map(|f| f.name.as_str()) == Some(new_name.as_str()) {
            EditOutcome::Unchanged
        } else {
            match oracle.set_function_name(func, &new_name) {
                Ok(()) => {
                    info!(function = %func, name = %new_name, "renamed function");
                    EditOutcome::Applied(new_name)
                }
                Err(err) => {
                    warn!(function = %func, name = %new_name, error = %err, "failed to rename function");
                    EditOutcome::Failed(err.to_string())
                }
            }
        }
    };

    let mut variables = Vec::new();
    if !edits.variables.is_empty() {
        let mut locals = oracle.local_variables(func).unwrap_or_default();
        for rename in &edits.variables {
            let original = rename.original_name.trim();
            let new = rename.new_name.trim();
            let outcome = if original.is_empty() || new.is_empty() || original == new {
                EditOutcome::Skipped
            } else if !locals.iter().any(|l| l == original) && locals.iter().any(|l| l == new) {
                EditOutcome::Unchanged
            } else {
                match oracle.rename_local(func, original, new) {
                    Ok(()) => {
                        info!(function = %func, from = original, to = new, "renamed variable");
                        if let Some(slot) = locals.iter_mut().find(|l| l.as_str() == original) {
                            *slot = new.to_string();
                        }
                        EditOutcome::Applied(new.to_string())
                    }
                    Err(err) => {
                        warn!(function = %func, from = original, to = new, error = %err, "failed to rename variable");
                        EditOutcome::Failed(err.to_string())
                    }
                }
            };
            variables.push(VariableOutcome {
                original_name: original.to_string(),
                new_name: new.to_string(),
                outcome,
            });
        }
    }

    oracle.refresh(func);
    ApplyReport { function: func, comment, function_name, variables }
}
