//! Output scanners
//!
//! The framer hands every byte of real command output to an `OutputScanner`.
//! Plain commands use `PassThrough`, which copies bytes to the console and the
//! caller's sink. Privilege elevation and nested-shell exit use byte-driven
//! automata that decide the outcome of the command themselves.

use crate::command::OutputSink;
use crate::credentials::SharedPasswordProvider;
use crate::error::ShellError;
use crate::marker::{CR, LF};
use secrecy::SecretString;
use std::io::{self, Write};
use tracing::{debug, warn};

/// Status reported when a prompt flow succeeded
pub const PROMPT_SUCCESS: i32 = 0;

/// Status reported when a prompt flow failed
pub const PROMPT_FAILURE: i32 = -1;

/// What the framer should do after a byte was scanned
pub(crate) enum ScanStep {
    Continue,
    /// Discard pending input, then send the secret followed by a newline
    Respond(SecretString),
    /// Stop reading, the command is complete with this status
    Finish(i32),
}

pub(crate) trait OutputScanner: Send {
    /// Local echo of the command line, emitted once the shell's own echo was skipped
    fn on_echo(&mut self, echo: &str) -> Result<(), ShellError>;

    fn on_output(&mut self, byte: u8) -> Result<ScanStep, ShellError>;

    /// Out-of-band text such as a watchdog message
    fn on_notice(&mut self, _notice: &str) {}
}

/// Copies command output to the console and to an optional sink
pub(crate) struct PassThrough {
    console: Option<Box<dyn Write + Send>>,
    sink: Option<OutputSink>,
}

impl PassThrough {
    pub(crate) fn new(echo_to_console: bool, sink: Option<OutputSink>) -> Self {
        let console: Option<Box<dyn Write + Send>> = if echo_to_console {
            Some(Box::new(io::stdout()))
        } else {
            None
        };
        Self { console, sink }
    }

    #[cfg(test)]
    pub(crate) fn with_console(console: impl Write + Send + 'static, sink: Option<OutputSink>) -> Self {
        Self {
            console: Some(Box::new(console)),
            sink,
        }
    }

    fn flush(&mut self) {
        if let Some(console) = self.console.as_mut() {
            let _ = console.flush();
        }
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.flush();
        }
    }
}

impl OutputScanner for PassThrough {
    fn on_echo(&mut self, echo: &str) -> Result<(), ShellError> {
        // the command line itself never goes to the sink
        if let Some(console) = self.console.as_mut() {
            console.write_all(echo.as_bytes())?;
            console.flush()?;
        }
        Ok(())
    }

    fn on_output(&mut self, byte: u8) -> Result<ScanStep, ShellError> {
        if let Some(console) = self.console.as_mut() {
            console.write_all(&[byte])?;
            if byte == LF {
                console.flush()?;
            }
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.write_all(&[byte])?;
        }
        Ok(ScanStep::Continue)
    }

    fn on_notice(&mut self, notice: &str) {
        let line = format!("{}\n", notice);
        if let Some(console) = self.console.as_mut() {
            let _ = console.write_all(line.as_bytes());
        }
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.write_all(line.as_bytes());
        }
        self.flush();
    }
}

impl Drop for PassThrough {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Answers an interactive password prompt and judges the shell's reply
///
/// Until the secret is sent, output is matched against the prompt; output that
/// does not look like the prompt means no password was needed. After the secret
/// is sent the reply is compared with the expected success or failure text.
pub(crate) struct PromptResponder {
    command: String,
    prompt: String,
    provider: Option<SharedPasswordProvider>,
    success_response: Option<String>,
    failure_response: Option<String>,
    buffer: Vec<u8>,
    secret_sent: bool,
}

impl PromptResponder {
    pub(crate) fn new(
        command: &str,
        prompt: &str,
        provider: Option<SharedPasswordProvider>,
        success_response: Option<&str>,
        failure_response: Option<&str>,
    ) -> Self {
        Self {
            command: command.to_string(),
            prompt: prompt.to_string(),
            provider,
            success_response: success_response.map(str::to_string),
            failure_response: failure_response.map(str::to_string),
            buffer: Vec::new(),
            secret_sent: false,
        }
    }

    fn judge_reply(&mut self) -> ScanStep {
        let reply_len = self.buffer.len();
        if let Some(expected) = self.success_response.as_deref()
            && reply_len == expected.len()
        {
            let matched = self.buffer == expected.as_bytes();
            self.buffer.clear();
            return Self::verdict(matched);
        }
        if let Some(expected) = self.failure_response.as_deref()
            && reply_len == expected.len()
        {
            let matched = self.buffer == expected.as_bytes();
            self.buffer.clear();
            return Self::verdict(!matched);
        }
        ScanStep::Continue
    }

    fn verdict(success: bool) -> ScanStep {
        if success {
            debug!("Authentication successful");
            ScanStep::Finish(PROMPT_SUCCESS)
        } else {
            warn!("Authentication failed");
            ScanStep::Finish(PROMPT_FAILURE)
        }
    }

    fn match_prompt(&mut self) -> Result<ScanStep, ShellError> {
        if !self.prompt.as_bytes().starts_with(&self.buffer) {
            if self.buffer.len() > 1 {
                debug!("Authentication not needed");
                return Ok(ScanStep::Finish(PROMPT_SUCCESS));
            }
            return Ok(ScanStep::Continue);
        }
        if self.buffer != self.prompt.as_bytes() {
            return Ok(ScanStep::Continue);
        }

        let secret = self
            .provider
            .as_ref()
            .and_then(|provider| provider.password())
            .ok_or_else(|| ShellError::MissingCredential {
                command: self.command.clone(),
                prompt: self.prompt.clone(),
            })?;

        self.buffer.clear();
        self.secret_sent = true;
        debug!("Password prompt matched, sending password");
        Ok(ScanStep::Respond(secret))
    }
}

impl OutputScanner for PromptResponder {
    fn on_echo(&mut self, _echo: &str) -> Result<(), ShellError> {
        Ok(())
    }

    fn on_output(&mut self, byte: u8) -> Result<ScanStep, ShellError> {
        if byte == CR || byte == LF {
            return Ok(ScanStep::Continue);
        }
        self.buffer.push(byte);

        if self.secret_sent {
            Ok(self.judge_reply())
        } else {
            self.match_prompt()
        }
    }
}

/// Waits for a literal response, e.g. `logout` after leaving a nested shell
pub(crate) struct ResponseMatcher {
    response: String,
    buffer: Vec<u8>,
}

impl ResponseMatcher {
    pub(crate) fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            buffer: Vec::new(),
        }
    }
}

impl OutputScanner for ResponseMatcher {
    fn on_echo(&mut self, _echo: &str) -> Result<(), ShellError> {
        Ok(())
    }

    fn on_output(&mut self, byte: u8) -> Result<ScanStep, ShellError> {
        if byte == CR || byte == LF {
            return Ok(ScanStep::Continue);
        }
        self.buffer.push(byte);
        if self.buffer.len() < self.response.len() {
            return Ok(ScanStep::Continue);
        }

        let matched = self.buffer == self.response.as_bytes();
        self.buffer.clear();
        if matched {
            debug!(response = %self.response, "Response matched");
            Ok(ScanStep::Finish(PROMPT_SUCCESS))
        } else {
            debug!(expected = %self.response, "Response did not match");
            Ok(ScanStep::Finish(PROMPT_FAILURE))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CapturedOutput;
    use secrecy::ExposeSecret;
    use std::sync::Arc;

    fn feed(scanner: &mut dyn OutputScanner, text: &str) -> Vec<ScanStep> {
        text.bytes()
            .map(|byte| scanner.on_output(byte).unwrap())
            .collect()
    }

    fn finished(steps: &[ScanStep]) -> Option<i32> {
        steps.iter().find_map(|step| match step {
            ScanStep::Finish(status) => Some(*status),
            _ => None,
        })
    }

    fn sudo_responder(password: Option<&'static str>) -> PromptResponder {
        let provider: Option<SharedPasswordProvider> =
            password.map(|p| Arc::new(SecretString::from(p)) as SharedPasswordProvider);
        PromptResponder::new(
            "sudo echo OK",
            "[sudo] password for ",
            provider,
            Some("OK"),
            None,
        )
    }

    #[test]
    fn test_pass_through_keeps_echo_out_of_sink() {
        let console = CapturedOutput::new();
        let sink = CapturedOutput::new();
        let mut scanner = PassThrough::with_console(console.clone(), Some(Box::new(sink.clone())));

        scanner.on_echo("ls\n").unwrap();
        feed(&mut scanner, "a.txt\n");

        assert_eq!(console.to_string_lossy(), "ls\na.txt\n");
        assert_eq!(sink.to_string_lossy(), "a.txt\n");
    }

    #[test]
    fn test_pass_through_notice_reaches_sink() {
        let sink = CapturedOutput::new();
        let mut scanner = PassThrough::new(false, Some(Box::new(sink.clone())));
        scanner.on_notice("Inactivity timeout");
        assert_eq!(sink.to_string_lossy(), "Inactivity timeout\n");
    }

    #[test]
    fn test_prompt_sends_secret_once_matched() {
        let mut scanner = sudo_responder(Some("hunter22"));
        let steps = feed(&mut scanner, "[sudo] password for ");

        assert!(
            steps[..steps.len() - 1]
                .iter()
                .all(|step| matches!(step, ScanStep::Continue))
        );
        match steps.last() {
            Some(ScanStep::Respond(secret)) => assert_eq!(secret.expose_secret(), "hunter22"),
            _ => panic!("expected the password to be sent"),
        }
    }

    #[test]
    fn test_prompt_success_response() {
        let mut scanner = sudo_responder(Some("hunter22"));
        feed(&mut scanner, "[sudo] password for ");
        let steps = feed(&mut scanner, "\r\nOK\r\n");
        assert_eq!(finished(&steps), Some(PROMPT_SUCCESS));
    }

    #[test]
    fn test_prompt_wrong_password() {
        let mut scanner = sudo_responder(Some("wrong"));
        feed(&mut scanner, "[sudo] password for ");
        let steps = feed(&mut scanner, "\r\nSorry, try again.\r\n");
        assert_eq!(finished(&steps), Some(PROMPT_FAILURE));
    }

    #[test]
    fn test_prompt_not_needed() {
        let mut scanner = sudo_responder(Some("hunter22"));
        let steps = feed(&mut scanner, "OK\r\n");
        assert_eq!(finished(&steps), Some(PROMPT_SUCCESS));
    }

    #[test]
    fn test_prompt_without_provider_fails() {
        let mut scanner = sudo_responder(None);
        let prompt = "[sudo] password for ";
        let (head, last) = prompt.split_at(prompt.len() - 1);
        feed(&mut scanner, head);

        let result = scanner.on_output(last.as_bytes()[0]);
        assert!(matches!(result, Err(ShellError::MissingCredential { .. })));
    }

    #[test]
    fn test_switch_user_failure_response() {
        let provider: SharedPasswordProvider = Arc::new(SecretString::from("rootpw"));
        let mut scanner =
            PromptResponder::new("su - root", "Password:", Some(provider), None, Some("su:"));
        feed(&mut scanner, "Password:");
        let steps = feed(&mut scanner, "\r\nsu: Authentication failure\r\n");
        assert_eq!(finished(&steps), Some(PROMPT_FAILURE));
    }

    #[test]
    fn test_switch_user_success_response() {
        let provider: SharedPasswordProvider = Arc::new(SecretString::from("rootpw"));
        let mut scanner =
            PromptResponder::new("su - root", "Password:", Some(provider), None, Some("su:"));
        feed(&mut scanner, "Password:");
        let steps = feed(&mut scanner, "\r\nroot@host:~# ");
        assert_eq!(finished(&steps), Some(PROMPT_SUCCESS));
    }

    #[test]
    fn test_response_matcher() {
        let mut scanner = ResponseMatcher::new("logout");
        assert_eq!(finished(&feed(&mut scanner, "\r\nlogout\r\n")), Some(PROMPT_SUCCESS));

        let mut scanner = ResponseMatcher::new("logout");
        assert_eq!(finished(&feed(&mut scanner, "bash: x\r\n")), Some(PROMPT_FAILURE));
    }
}
