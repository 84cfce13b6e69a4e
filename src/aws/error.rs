//! Extraction of structured errors from `aws` CLI stderr.

use crate::cloud::ApiError;

const ERROR_PREFIX: &str = "An error occurred (";
const OPERATION_MARKER: &str = "operation: ";

/// Parses every `An error occurred (Code) when calling the Op operation: Msg`
/// line in `stderr`.
///
/// Output that carries no recognisable error line becomes a single `Unknown`
/// entry holding the trimmed text, so nothing the CLI printed is lost.
pub(super) fn parse_cli_errors(stderr: &str, code: Option<i32>) -> Vec<ApiError> {
    let parsed: Vec<ApiError> = stderr.lines().filter_map(parse_line).collect();
    if !parsed.is_empty() {
        return parsed;
    }

    let trimmed = stderr.trim();
    let message = if trimmed.is_empty() {
        code.map_or_else(
            || String::from("terminated without an exit status"),
            |status| format!("exited with status {status}"),
        )
    } else {
        trimmed.to_owned()
    };
    vec![ApiError::new("Unknown", message)]
}

fn parse_line(line: &str) -> Option<ApiError> {
    let rest = line.trim().strip_prefix(ERROR_PREFIX)?;
    let (code, tail) = rest.split_once(')')?;
    let message = tail
        .split_once(OPERATION_MARKER)
        .map_or_else(|| tail.trim(), |(_, msg)| msg.trim());
    Some(ApiError::new(code, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parses_standard_cli_error_line() {
        let errors = parse_cli_errors(
            "\nAn error occurred (InvalidSnapshot.InUse) when calling the DeleteSnapshot operation: The snapshot snap-1 is currently in use by ami-1\n",
            Some(254),
        );
        assert_eq!(
            errors,
            vec![ApiError::new(
                "InvalidSnapshot.InUse",
                "The snapshot snap-1 is currently in use by ami-1"
            )]
        );
    }

    #[rstest]
    #[case("Unable to locate credentials.", Some(253), "Unable to locate credentials.")]
    #[case("   ", Some(255), "exited with status 255")]
    #[case("", None, "terminated without an exit status")]
    fn unrecognised_output_becomes_unknown(
        #[case] stderr: &str,
        #[case] code: Option<i32>,
        #[case] expected: &str,
    ) {
        assert_eq!(
            parse_cli_errors(stderr, code),
            vec![ApiError::new("Unknown", expected)]
        );
    }
}
