//! Argument validation for subprocess execution paths.
//!
//! The CLI adapter transport invokes providers via `Command::new(...).arg(...)`,
//! which never goes through a shell, so metacharacters in an argument can't
//! themselves trigger injection. `validate_arg` is still checked before
//! spawning as defense-in-depth against a provider CLI that shells out
//! internally on our behalf.
//!
//! # Usage
//!
//! ```rust,ignore
//! use debate_engine::shell_safety::validate_arg;
//!
//! validate_arg(user_input)?;
//! Command::new(cli_path).arg(user_input).spawn()?;
//! ```

/// Subset of metacharacters that indicate chaining/injection intent
/// (vs. globbing characters that might appear in legitimate args).
const INJECTION_CHARACTERS: &[char] = &[';', '|', '&', '`', '$', '(', ')', '\n', '\r'];

/// Validation error for argument checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgValidationError {
    /// The problematic character found.
    pub character: char,
    /// Position in the input string.
    pub position: usize,
    /// The original input (truncated to 100 chars).
    pub input_preview: String,
}

impl std::fmt::Display for ArgValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dangerous character '{}' at position {} in: {}",
            self.character.escape_default(),
            self.position,
            self.input_preview
        )
    }
}

impl std::error::Error for ArgValidationError {}

/// Validate that an argument contains no injection-class metacharacters.
///
/// Returns Ok(()) if clean, Err with details if a dangerous character is found.
pub fn validate_arg(arg: &str) -> Result<(), ArgValidationError> {
    for (pos, ch) in arg.chars().enumerate() {
        if INJECTION_CHARACTERS.contains(&ch) {
            return Err(ArgValidationError {
                character: ch,
                position: pos,
                input_preview: if arg.len() > 100 {
                    format!("{}...", &arg[..100])
                } else {
                    arg.to_string()
                },
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_arg_clean() {
        assert!(validate_arg("hello").is_ok());
        assert!(validate_arg("--flag=value").is_ok());
        assert!(validate_arg("/path/to/file").is_ok());
        assert!(validate_arg("file.rs").is_ok());
        assert!(validate_arg("").is_ok());
        // Globbing chars are OK for validate_arg (only injection chars blocked)
        assert!(validate_arg("*.rs").is_ok());
        assert!(validate_arg("src/**/*.rs").is_ok());
    }

    #[test]
    fn test_validate_arg_injection() {
        let err = validate_arg("; rm -rf /").unwrap_err();
        assert_eq!(err.character, ';');
        assert_eq!(err.position, 0);

        let err = validate_arg("foo | bar").unwrap_err();
        assert_eq!(err.character, '|');

        let err = validate_arg("foo & bar").unwrap_err();
        assert_eq!(err.character, '&');

        let err = validate_arg("$(evil)").unwrap_err();
        assert_eq!(err.character, '$');

        let err = validate_arg("`evil`").unwrap_err();
        assert_eq!(err.character, '`');

        let err = validate_arg("foo\nbar").unwrap_err();
        assert_eq!(err.character, '\n');
    }

    #[test]
    fn test_arg_validation_error_display() {
        let err = validate_arg("; injection").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("dangerous character"));
        assert!(msg.contains("; injection"));
    }

    #[test]
    fn test_validate_arg_long_input_truncated() {
        let long = "a".repeat(200) + ";";
        let err = validate_arg(&long).unwrap_err();
        assert!(err.input_preview.ends_with("..."));
        assert!(err.input_preview.len() < 110);
    }
}
