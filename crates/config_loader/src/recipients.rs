//! Recipient list input
//!
//! `.txt`: addresses separated by newlines, commas, semicolons or whitespace.
//! `.json`: an array of address strings or of `{ "email": ..., "vars": {...} }`.

use std::collections::HashSet;
use std::path::Path;

use contracts::{ContractError, TemplateVars};
use serde::Deserialize;

/// Ordered recipients with optional per-recipient variables.
///
/// `template_vars` is either empty or exactly as long as `recipients`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecipientList {
    pub recipients: Vec<String>,
    pub template_vars: Vec<TemplateVars>,
}

impl RecipientList {
    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    /// Keep only the first `limit` recipients (and their variables).
    pub fn truncate(&mut self, limit: usize) {
        self.recipients.truncate(limit);
        if !self.template_vars.is_empty() {
            self.template_vars.truncate(limit);
        }
    }

    /// Drop repeated addresses, keeping the first occurrence.
    ///
    /// Returns the number of entries removed.
    pub fn dedup(&mut self) -> usize {
        let before = self.recipients.len();
        let mut seen = HashSet::new();
        let has_vars = !self.template_vars.is_empty();
        let mut vars = std::mem::take(&mut self.template_vars).into_iter();

        let mut recipients = Vec::with_capacity(before);
        let mut kept_vars = Vec::new();
        for recipient in self.recipients.drain(..) {
            let entry_vars = vars.next();
            if seen.insert(recipient.to_lowercase()) {
                recipients.push(recipient);
                if has_vars {
                    kept_vars.push(entry_vars.unwrap_or_default());
                }
            }
        }

        self.recipients = recipients;
        self.template_vars = kept_vars;
        before - self.recipients.len()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecipientEntry {
    Address(String),
    Detailed {
        email: String,
        #[serde(default)]
        vars: TemplateVars,
    },
}

/// Load recipients from a `.txt` or `.json` file
pub fn load_recipients(path: &Path) -> Result<RecipientList, ContractError> {
    let content = std::fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "json" => parse_recipients_json(&content),
        _ => Ok(parse_recipients_text(&content)),
    }
}

/// Split free text into addresses; tokens without `@` are skipped
pub fn parse_recipients_text(content: &str) -> RecipientList {
    let recipients = content
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(str::trim)
        .filter(|token| token.contains('@'))
        .map(str::to_string)
        .collect();

    RecipientList {
        recipients,
        template_vars: Vec::new(),
    }
}

/// Parse a JSON recipient array
pub fn parse_recipients_json(content: &str) -> Result<RecipientList, ContractError> {
    let entries: Vec<RecipientEntry> =
        serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
            message: format!("recipient list parse error: {e}"),
            source: Some(Box::new(e)),
        })?;

    let mut list = RecipientList::default();
    let mut any_vars = false;
    let mut vars = Vec::with_capacity(entries.len());

    for (idx, entry) in entries.into_iter().enumerate() {
        let (email, entry_vars) = match entry {
            RecipientEntry::Address(email) => (email, TemplateVars::new()),
            RecipientEntry::Detailed { email, vars } => (email, vars),
        };
        let email = email.trim().to_string();
        if !email.contains('@') {
            return Err(ContractError::config_validation(
                format!("recipients[{idx}]"),
                format!("'{email}' is not an email address"),
            ));
        }
        any_vars |= !entry_vars.is_empty();
        list.recipients.push(email);
        vars.push(entry_vars);
    }

    if any_vars {
        list.template_vars = vars;
    }
    Ok(list)
}
