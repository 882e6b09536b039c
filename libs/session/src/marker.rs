//! End-of-command marker protocol
//!
//! Every framed command is sent as `<command>; printf '\035\036%d\037' $?`. Once the
//! command finishes the shell prints the group marker, the record marker, the decimal
//! exit status and the unit marker. The suffix is written with octal escapes so the
//! echoed command line never contains the control bytes themselves.

/// Group separator (GS): end of the real command output
pub const GROUP_MARKER: u8 = 0x1d;

/// Record separator (RS): confirms the end-of-command record, exit digits follow
pub const RECORD_MARKER: u8 = 0x1e;

/// Unit separator (US): terminates the exit code digits
pub const UNIT_MARKER: u8 = 0x1f;

/// Shell fragment appended to every framed command.
/// Must stay in sync with the three marker bytes above.
pub const COMMAND_SUFFIX: &str = r"; printf '\035\036%d\037' $?";

pub(crate) const CR: u8 = b'\r';
pub(crate) const LF: u8 = b'\n';

/// Append the end-of-command marker suffix to a command line
pub fn with_end_marker(command: &str) -> String {
    format!("{}{}", command, COMMAND_SUFFIX)
}

/// Strip the marker suffix again, if present
pub fn without_end_marker(command: &str) -> &str {
    command.strip_suffix(COMMAND_SUFFIX).unwrap_or(command)
}

/// The record the remote shell prints for a given exit status
pub fn end_record(exit_code: i32) -> Vec<u8> {
    let mut record = vec![GROUP_MARKER, RECORD_MARKER];
    record.extend_from_slice(exit_code.to_string().as_bytes());
    record.push(UNIT_MARKER);
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_escapes_match_marker_bytes() {
        assert!(COMMAND_SUFFIX.contains(&format!("\\{:03o}", GROUP_MARKER)));
        assert!(COMMAND_SUFFIX.contains(&format!("\\{:03o}", RECORD_MARKER)));
        assert!(COMMAND_SUFFIX.contains(&format!("\\{:03o}", UNIT_MARKER)));
        assert!(COMMAND_SUFFIX.bytes().all(|b| !b.is_ascii_control()));
    }

    #[test]
    fn test_with_and_without_end_marker() {
        let marked = with_end_marker("ls -l /tmp");
        assert!(marked.starts_with("ls -l /tmp; printf"));
        assert_eq!(without_end_marker(&marked), "ls -l /tmp");
        assert_eq!(without_end_marker("exit"), "exit");
    }

    #[test]
    fn test_end_record() {
        assert_eq!(end_record(127), b"\x1d\x1e127\x1f".to_vec());
    }
}
