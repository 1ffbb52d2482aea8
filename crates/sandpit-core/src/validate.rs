//! Request validation
//!
//! Runs before any workspace or process is allocated, so a malformed or
//! oversized request costs nothing beyond parsing.

use crate::language::{LanguageRecipe, LanguageRegistry};
use crate::protocol::ExecuteRequest;
use crate::{Result, SandboxConfig, SandboxError};

/// A request that passed validation
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub recipe: LanguageRecipe,
    pub source_code: String,
    pub stdin: String,
}

/// Check presence, size ceilings, then language support, in that order.
pub fn validate(
    request: ExecuteRequest,
    registry: &LanguageRegistry,
    config: &SandboxConfig,
) -> Result<ExecutionRequest> {
    let ExecuteRequest {
        language,
        code,
        input,
    } = request;

    let (Some(language), Some(code)) = (language, code) else {
        return Err(SandboxError::InvalidRequest(
            "language and code are required".into(),
        ));
    };
    let stdin = input.unwrap_or_default();

    check_size("code", &code, config.code_limit)?;
    check_size("input", &stdin, config.input_limit)?;

    let recipe = registry.resolve(&language)?;

    Ok(ExecutionRequest {
        recipe,
        source_code: code,
        stdin,
    })
}

fn check_size(field: &'static str, value: &str, limit: usize) -> Result<()> {
    // Byte length bounds the char count from above; skip the scan when it fits.
    if value.len() <= limit {
        return Ok(());
    }
    let actual = value.chars().count();
    if actual > limit {
        return Err(SandboxError::PayloadTooLarge {
            field,
            limit,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SandboxConfig {
        SandboxConfig::builder().code_limit(10).input_limit(5).build()
    }

    fn check(request: ExecuteRequest) -> Result<ExecutionRequest> {
        validate(request, LanguageRegistry::global(), &config())
    }

    #[test]
    fn missing_language_is_invalid() {
        let request = ExecuteRequest {
            code: Some("print(1)".into()),
            ..Default::default()
        };
        assert!(matches!(check(request), Err(SandboxError::InvalidRequest(_))));
    }

    #[test]
    fn missing_code_is_invalid() {
        let request = ExecuteRequest {
            language: Some("python".into()),
            ..Default::default()
        };
        assert!(matches!(check(request), Err(SandboxError::InvalidRequest(_))));
    }

    #[test]
    fn code_at_limit_is_accepted() {
        let request = ExecuteRequest::new("python", "x".repeat(10));
        let validated = check(request).unwrap();
        assert_eq!(validated.recipe.name, "python");
        assert_eq!(validated.stdin, "");
    }

    #[test]
    fn code_over_limit_is_rejected() {
        let request = ExecuteRequest::new("python", "x".repeat(11));
        let err = check(request).unwrap_err();
        assert!(matches!(
            err,
            SandboxError::PayloadTooLarge {
                field: "code",
                limit: 10,
                actual: 11
            }
        ));
    }

    #[test]
    fn limits_count_characters_not_bytes() {
        // 10 characters, 30 bytes
        let request = ExecuteRequest::new("python", "€".repeat(10));
        assert!(check(request).is_ok());
    }

    #[test]
    fn input_over_limit_is_rejected() {
        let request = ExecuteRequest::new("python", "print(1)").with_input("123456");
        assert!(matches!(
            check(request),
            Err(SandboxError::PayloadTooLarge { field: "input", .. })
        ));
    }

    #[test]
    fn size_is_checked_before_language() {
        let request = ExecuteRequest::new("ruby", "x".repeat(11));
        assert!(matches!(check(request), Err(SandboxError::PayloadTooLarge { .. })));
    }

    #[test]
    fn unknown_language_is_unsupported() {
        let request = ExecuteRequest::new("ruby", "puts 1");
        assert!(matches!(
            check(request),
            Err(SandboxError::UnsupportedLanguage(_))
        ));
    }
}
