use std::path::Path;
use std::str::FromStr;

use crate::config::ImageConfig;
use crate::error::LaunchError;

/// Languages the sandbox knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Java,
    Python,
}

impl FromStr for Language {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("java") {
            Ok(Self::Java)
        } else if s.eq_ignore_ascii_case("python") {
            Ok(Self::Python)
        } else {
            Err(LaunchError::UnsupportedLanguage(s.to_string()))
        }
    }
}

impl Language {
    pub fn image<'a>(&self, images: &'a ImageConfig) -> &'a str {
        match self {
            Self::Java => &images.java,
            Self::Python => &images.python,
        }
    }

    /// Shell command run inside the container for the mounted `file_name`
    ///
    /// Java sources are compiled in place and the class named after the
    /// file is run; Python files are handed straight to the interpreter.
    pub fn command(&self, mount_path: &str, file_name: &str) -> String {
        let source = format!("{}/{}", mount_path.trim_end_matches('/'), file_name);
        match self {
            Self::Java => {
                let class = Path::new(file_name)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file_name.to_string());
                format!(
                    "javac {} && java -cp {} {}",
                    shell_quote(&source),
                    shell_quote(mount_path),
                    shell_quote(&class)
                )
            }
            Self::Python => format!("python {}", shell_quote(&source)),
        }
    }
}

/// Quotes `word` for `sh -c` unless it only holds path-safe characters
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("java".parse::<Language>().unwrap(), Language::Java);
        assert_eq!("JAVA".parse::<Language>().unwrap(), Language::Java);
        assert_eq!("Python".parse::<Language>().unwrap(), Language::Python);
        assert!(matches!(
            "cobol".parse::<Language>(),
            Err(LaunchError::UnsupportedLanguage(lang)) if lang == "cobol"
        ));
    }

    #[test]
    fn test_commands() {
        assert_eq!(
            Language::Java.command("/app", "Main.java"),
            "javac /app/Main.java && java -cp /app Main"
        );
        assert_eq!(
            Language::Python.command("/app/", "solution.py"),
            "python /app/solution.py"
        );
    }

    #[test]
    fn test_unsafe_file_names_are_quoted() {
        assert_eq!(
            Language::Python.command("/app", "a b;rm -rf.py"),
            "python '/app/a b;rm -rf.py'"
        );
        assert_eq!(
            Language::Python.command("/app", "it's.py"),
            r"python '/app/it'\''s.py'"
        );
    }

    #[test]
    fn test_images() {
        let images = ImageConfig::default();
        assert_eq!(Language::Java.image(&images), "tkoppine/java-runner");
        assert_eq!(Language::Python.image(&images), "tkoppine/python-runner");
    }
}
