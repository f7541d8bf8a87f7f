//! Wire framing for the device's ASCII control protocol.
//!
//! Commands are terminated `\r\n`. Responses are a single result-code line
//! (optionally `$`-prefixed) and, for query commands, one further data line.

use super::error::DeviceError;

/// Append the CRLF terminator a command needs on the wire.
pub fn frame_command(command: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(command.len() + 2);
    bytes.extend_from_slice(command.as_bytes());
    bytes.extend_from_slice(b"\r\n");
    bytes
}

/// Byte sent to end a DRD stream (SUB, 0x1A).
pub const STREAM_TERMINATOR: u8 = 0x1A;

/// True when `command` is a query (expects a second data line).
pub fn is_query(command: &str) -> bool {
    command.trim_end().ends_with('?')
}

/// Strip an optional leading `$` prompt from a response line.
pub fn strip_prompt(line: &str) -> &str {
    line.strip_prefix('$').unwrap_or(line)
}

/// Parse a result-code line (`R+NNNN`, possibly `$`-prefixed) and translate
/// it into the corresponding error, if any.
///
/// `command` is used only to annotate the returned error.
pub fn check_result_code(command: &str, line: &str) -> Result<(), DeviceError> {
    let code = strip_prompt(line.trim());
    if !is_well_formed_code(code) {
        return Err(DeviceError::Protocol {
            command: command.to_owned(),
            code: code.to_owned(),
        });
    }
    match DeviceError::from_result_code(command, code) {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

fn is_well_formed_code(code: &str) -> bool {
    code.len() == 6
        && code.starts_with("R+")
        && code[2..].bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_command_appends_crlf() {
        assert_eq!(frame_command("DOD?"), b"DOD?\r\n".to_vec());
    }

    #[test]
    fn is_query_detects_trailing_question_mark() {
        assert!(is_query("DOD?"));
        assert!(!is_query("Measure,Start"));
    }

    #[test]
    fn strip_prompt_removes_leading_dollar() {
        assert_eq!(strip_prompt("$R+0000"), "R+0000");
        assert_eq!(strip_prompt("R+0000"), "R+0000");
    }

    #[test]
    fn success_code_checks_ok() {
        assert!(check_result_code("DOD?", "R+0000").is_ok());
        assert!(check_result_code("DOD?", "$R+0000").is_ok());
    }

    #[test]
    fn error_codes_map_to_kinds() {
        assert!(matches!(
            check_result_code("DOD?", "R+0002"),
            Err(DeviceError::Parameter { .. })
        ));
    }

    #[test]
    fn malformed_code_is_protocol_violation() {
        assert!(matches!(
            check_result_code("DOD?", "nonsense"),
            Err(DeviceError::Protocol { .. })
        ));
        assert!(matches!(
            check_result_code("DOD?", "R+00"),
            Err(DeviceError::Protocol { .. })
        ));
    }
}
