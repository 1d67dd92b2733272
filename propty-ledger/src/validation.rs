//! Input validation - Checks free text and content addresses
//!
//! Content hashes and metadata URIs are opaque to the ledger. Only their
//! presence and length are checked here, never their format.

use crate::{config::ValidationConfig, error::LedgerError, LedgerResult};

/// Validator bound to the configured limits
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    config: &'a ValidationConfig,
}

impl<'a> Validator<'a> {
    pub fn new(config: &'a ValidationConfig) -> Self {
        Self { config }
    }

    /// Required short text such as names and locations
    pub fn name(&self, field: &str, value: &str) -> LedgerResult<()> {
        Self::required(field, value)?;
        Self::max_len(field, value, self.config.max_name_len)
    }

    /// Optional long text such as terms and comments
    pub fn text(&self, field: &str, value: &str) -> LedgerResult<()> {
        Self::max_len(field, value, self.config.max_text_len)
    }

    /// Required content address (hash, CID, ...)
    pub fn content_hash(&self, field: &str, value: &str) -> LedgerResult<()> {
        Self::required(field, value)?;
        Self::max_len(field, value, self.config.max_hash_len)
    }

    /// Optional URI, bounded like long text
    pub fn uri(&self, field: &str, value: &str) -> LedgerResult<()> {
        Self::max_len(field, value, self.config.max_text_len)
    }

    fn required(field: &str, value: &str) -> LedgerResult<()> {
        if value.trim().is_empty() {
            return Err(LedgerError::invalid_input(format!("{} cannot be empty", field)));
        }
        Ok(())
    }

    fn max_len(field: &str, value: &str, max: usize) -> LedgerResult<()> {
        let len = value.chars().count();
        if len > max {
            return Err(LedgerError::invalid_input(format!(
                "{} is {} characters, maximum is {}",
                field, len, max
            )));
        }
        Ok(())
    }
}
