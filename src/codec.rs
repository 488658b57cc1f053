use crate::job::{ExecutionOutcome, ResultPayload};

/// Line prefix a sandboxed program prints to report its structured result
pub const RESULT_PREFIX: &str = "RESULT:";

const UNKNOWN_ERROR: &str = "Unknown error";

/// Maps raw sandbox output to a result payload.
///
/// The first line starting with [`RESULT_PREFIX`] wins and its remainder is
/// returned verbatim. Without such a line the first output line becomes the
/// error message, with double quotes replaced by single quotes.
pub fn decode(outcome: &ExecutionOutcome) -> ResultPayload {
    let output = &outcome.raw_output;

    // Split on `\n` only: a trailing `\r` is part of what the program printed
    if let Some(result) = output
        .split('\n')
        .find_map(|line| line.strip_prefix(RESULT_PREFIX))
    {
        return ResultPayload::Success(result.to_string());
    }

    ResultPayload::Error {
        message: summarize_error(output),
    }
}

fn summarize_error(output: &str) -> String {
    match output.split('\n').next() {
        Some(first) if !output.is_empty() => first.replace('"', "'"),
        _ => UNKNOWN_ERROR.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use pretty_assertions::assert_eq;

    fn outcome(output: &str) -> ExecutionOutcome {
        ExecutionOutcome::completed(output.to_string(), Duration::from_millis(5))
    }

    #[test]
    fn test_result_line_is_passed_through() {
        let payload = decode(&outcome("compiling...\nRESULT:{\"x\":1}\nbye\n"));
        assert_eq!(payload, ResultPayload::Success(r#"{"x":1}"#.to_string()));
    }

    #[test]
    fn test_first_result_line_wins() {
        let payload = decode(&outcome("RESULT:[1]\nRESULT:[2]\n"));
        assert_eq!(payload, ResultPayload::Success("[1]".to_string()));
    }

    #[test]
    fn test_prefix_must_start_the_line() {
        let payload = decode(&outcome("note: RESULT:{}\n"));
        assert_eq!(
            payload.to_json(),
            r#"{"status":"error","message":"note: RESULT:{}"}"#
        );
    }

    #[test]
    fn test_error_uses_first_line() {
        let payload = decode(&outcome("Error \"bad input\"\nstack trace"));
        assert_eq!(
            payload.to_json(),
            r#"{"status":"error","message":"Error 'bad input'"}"#
        );
    }

    #[test]
    fn test_empty_output() {
        let payload = decode(&outcome(""));
        assert_eq!(
            payload.to_json(),
            r#"{"status":"error","message":"Unknown error"}"#
        );
    }

    #[test]
    fn test_timeout_marker() {
        let payload = decode(&ExecutionOutcome::timed_out(Duration::from_secs(90)));
        assert_eq!(
            payload.to_json(),
            r#"{"status":"error","message":"Time limit exceeded"}"#
        );
    }

    #[test]
    fn test_result_line_keeps_carriage_return() {
        let payload = decode(&outcome("RESULT:{\"x\":1}\r\nbye\r\n"));
        assert_eq!(payload, ResultPayload::Success("{\"x\":1}\r".to_string()));
    }

    #[test]
    fn test_error_line_splits_on_newline_only() {
        let payload = decode(&outcome("first\rstill first\nsecond"));
        assert_eq!(
            payload,
            ResultPayload::Error {
                message: "first\rstill first".to_string()
            }
        );
    }

    #[test]
    fn test_decode_is_deterministic() {
        let out = outcome("Traceback (most recent call last):\n  File \"x.py\"");
        assert_eq!(decode(&out), decode(&out));
    }
}
