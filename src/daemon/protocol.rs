//! Line protocol spoken on the daemon's standard streams.
//!
//! Requests, one per line:
//!
//! ```text
//! process "<input.wav>" ["<output dir>"]
//! quit | exit
//! ```
//!
//! Replies, one line per `process` or rejected request: `READY`, `ERROR`,
//! or `ERROR: <reason>`. Empty lines and `quit` get no reply.

use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, TranscribeError};

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonCommand {
    /// Transcribe `input`, writing into `output` or the default directory.
    Process {
        input: PathBuf,
        output: Option<PathBuf>,
    },
    /// Stop the daemon (`quit` or `exit`).
    Quit,
    /// Unrecognized verb; carries the trimmed line for the reply.
    Unknown(String),
}

/// A reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The job succeeded.
    Ready,
    /// The job failed; details go to the log only.
    Error,
    /// The request itself was rejected.
    Rejected(String),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ready => write!(f, "READY"),
            Reply::Error => write!(f, "ERROR"),
            Reply::Rejected(reason) => write!(f, "ERROR: {}", reason),
        }
    }
}

/// Parses one request line.
///
/// Returns `Ok(None)` for blank lines. Malformed `process` arguments are
/// `PROTOCOL_ERROR`s whose message is suitable for a `Rejected` reply.
pub fn parse_line(line: &str) -> Result<Option<DaemonCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

    match verb {
        "quit" | "exit" => Ok(Some(DaemonCommand::Quit)),
        "process" => {
            let mut args = tokenize(rest)?.into_iter();
            let input = args
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| TranscribeError::protocol("Missing input file"))?;
            let output = args.next().filter(|s| !s.is_empty()).map(PathBuf::from);

            Ok(Some(DaemonCommand::Process {
                input: PathBuf::from(input),
                output,
            }))
        }
        _ => Ok(Some(DaemonCommand::Unknown(line.to_string()))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenState {
    /// Between tokens.
    Gap,
    /// Inside an unquoted run.
    Bare,
    /// Inside double quotes.
    Quoted,
    /// After a backslash inside double quotes.
    Escape,
}

/// Splits arguments on whitespace, keeping double-quoted runs together.
///
/// Inside quotes `\"` and `\\` are escapes; any other backslash is kept
/// literally. Quoted and bare runs with no whitespace between them join
/// into one token.
pub fn tokenize(input: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut state = TokenState::Gap;

    for c in input.chars() {
        state = match (state, c) {
            (TokenState::Gap, c) if c.is_whitespace() => TokenState::Gap,
            (TokenState::Gap | TokenState::Bare, '"') => TokenState::Quoted,
            (TokenState::Gap | TokenState::Bare, c) if !c.is_whitespace() => {
                current.push(c);
                TokenState::Bare
            }
            (TokenState::Bare, _) => {
                tokens.push(std::mem::take(&mut current));
                TokenState::Gap
            }
            (TokenState::Quoted, '"') => TokenState::Bare,
            (TokenState::Quoted, '\\') => TokenState::Escape,
            (TokenState::Quoted, c) => {
                current.push(c);
                TokenState::Quoted
            }
            (TokenState::Escape, c @ ('"' | '\\')) => {
                current.push(c);
                TokenState::Quoted
            }
            (TokenState::Escape, c) => {
                current.push('\\');
                current.push(c);
                TokenState::Quoted
            }
            (TokenState::Gap, _) => TokenState::Gap,
        };
    }

    match state {
        TokenState::Gap => {}
        TokenState::Bare => tokens.push(current),
        TokenState::Quoted | TokenState::Escape => {
            return Err(TranscribeError::protocol("Unterminated quote"));
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn process(input: &str, output: Option<&str>) -> DaemonCommand {
        DaemonCommand::Process {
            input: PathBuf::from(input),
            output: output.map(PathBuf::from),
        }
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   \t\r\n").unwrap(), None);
    }

    #[test]
    fn quit_and_exit() {
        assert_eq!(parse_line("quit").unwrap(), Some(DaemonCommand::Quit));
        assert_eq!(parse_line("  exit \r\n").unwrap(), Some(DaemonCommand::Quit));
    }

    #[test]
    fn process_with_quoted_paths() {
        assert_eq!(
            parse_line(r#"process "/music/my song.wav" "/tmp/out dir""#).unwrap(),
            Some(process("/music/my song.wav", Some("/tmp/out dir")))
        );
    }

    #[test]
    fn process_with_bare_paths() {
        assert_eq!(
            parse_line("process a.wav /tmp/out").unwrap(),
            Some(process("a.wav", Some("/tmp/out")))
        );
        assert_eq!(parse_line("process a.wav").unwrap(), Some(process("a.wav", None)));
    }

    #[test]
    fn extra_arguments_ignored() {
        assert_eq!(
            parse_line("process a.wav out extra more").unwrap(),
            Some(process("a.wav", Some("out")))
        );
    }

    #[test]
    fn missing_input_rejected() {
        let err = parse_line("process").unwrap_err();
        assert_eq!(err.code, ErrorCode::Protocol);
        assert_eq!(err.message, "Missing input file");

        let err = parse_line(r#"process """#).unwrap_err();
        assert_eq!(err.message, "Missing input file");
    }

    #[test]
    fn unterminated_quote_rejected() {
        let err = parse_line(r#"process "a.wav"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::Protocol);
        assert_eq!(err.message, "Unterminated quote");
    }

    #[test]
    fn unknown_verb_echoes_line() {
        assert_eq!(
            parse_line("  transcribe a.wav  ").unwrap(),
            Some(DaemonCommand::Unknown("transcribe a.wav".to_string()))
        );
        // Verbs are whole words.
        assert_eq!(
            parse_line("processa.wav").unwrap(),
            Some(DaemonCommand::Unknown("processa.wav".to_string()))
        );
    }

    #[test]
    fn escapes_inside_quotes() {
        assert_eq!(
            tokenize(r#""say \"hi\"" "back\\slash" "C:\music""#).unwrap(),
            vec![r#"say "hi""#, r"back\slash", r"C:\music"]
        );
    }

    #[test]
    fn adjacent_runs_join() {
        assert_eq!(tokenize(r#"/tmp/"my dir"/a.wav"#).unwrap(), vec!["/tmp/my dir/a.wav"]);
        assert_eq!(tokenize(r#""" x"#).unwrap(), vec!["", "x"]);
    }

    #[test]
    fn reply_lines() {
        assert_eq!(Reply::Ready.to_string(), "READY");
        assert_eq!(Reply::Error.to_string(), "ERROR");
        assert_eq!(
            Reply::Rejected("Unknown command: foo".into()).to_string(),
            "ERROR: Unknown command: foo"
        );
    }
}
