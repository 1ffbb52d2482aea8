//! Wire types for the execution API
//!
//! Every request field is optional on the wire so a missing field surfaces
//! as a validation error instead of a decoding failure.

use crate::result::RunReport;
use serde::{Deserialize, Serialize};

/// Request to execute code
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Language identifier, matched case-insensitively
    pub language: Option<String>,
    /// Source code to run
    pub code: Option<String>,
    /// Data fed to the program's standard input
    pub input: Option<String>,
}

impl ExecuteRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            code: Some(code.into()),
            input: None,
        }
    }

    #[must_use]
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }
}

/// Successful execution response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub run: RunReport,
}

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Entry in the language listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageInfo {
    pub name: String,
    pub aliases: Vec<String>,
    pub source_file: String,
}

impl From<&crate::LanguageRecipe> for LanguageInfo {
    fn from(recipe: &crate::LanguageRecipe) -> Self {
        Self {
            name: recipe.name.to_string(),
            aliases: recipe.aliases.iter().map(ToString::to_string).collect(),
            source_file: recipe.source_file.to_string(),
        }
    }
}
