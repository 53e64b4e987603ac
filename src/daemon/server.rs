//! Command loop over stdin/stdout.
//!
//! The engine is loaded once before the first command and shut down after
//! the last, whether the loop ends on `quit`, on end of input, on a broken
//! output stream, or by unwinding.

use std::io::{self, BufRead, ErrorKind, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::engine::{EngineResource, TranscriptionEngine};
use crate::error::Result;
use crate::transcription::transcribe_file;
use crate::types::TranscriptionConfig;

use super::protocol::{parse_line, DaemonCommand, Reply};

/// Pause before retrying a reader that reported no data available.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Lifecycle of a daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    /// Created; engine not loaded yet.
    Starting,
    /// Waiting for the next command.
    Ready,
    /// Running a job.
    Processing,
    /// Leaving the loop.
    ShuttingDown,
    /// Engine released; no more commands are read.
    Terminated,
}

/// Long-running transcription daemon.
pub struct DaemonServer<H: TranscriptionEngine> {
    engine: EngineResource<H>,
    default_output_dir: PathBuf,
    config: TranscriptionConfig,
    state: DaemonState,
    completed: usize,
    failed: usize,
}

impl<H: TranscriptionEngine> DaemonServer<H> {
    /// Creates a daemon that writes to `default_output_dir` when a command
    /// names no output directory.
    pub fn new(default_output_dir: impl Into<PathBuf>, config: TranscriptionConfig) -> Self {
        Self {
            engine: EngineResource::new(),
            default_output_dir: default_output_dir.into(),
            config,
            state: DaemonState::Starting,
            completed: 0,
            failed: 0,
        }
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    /// Loads the engine and moves to `Ready`.
    ///
    /// A load failure is fatal: the daemon is left `Terminated`.
    pub fn start<F>(&mut self, load: F) -> Result<()>
    where
        F: FnOnce() -> Result<H>,
    {
        info!("Starting daemon (default output: {})", self.default_output_dir.display());
        match self.engine.initialize(load) {
            Ok(_) => {
                self.state = DaemonState::Ready;
                info!("Ready for commands");
                Ok(())
            }
            Err(e) => {
                error!("Failed to load engine: {}", e);
                self.state = DaemonState::Terminated;
                Err(e)
            }
        }
    }

    /// Serves commands from `reader` until `quit` or end of input, then
    /// shuts the engine down.
    pub fn run<R: BufRead, W: Write>(&mut self, mut reader: R, mut writer: W) -> Result<()> {
        let mut buf = Vec::new();

        while self.state == DaemonState::Ready {
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    if !buf.is_empty() {
                        self.dispatch(&mut buf, &mut writer);
                    }
                    info!("Input closed");
                    break;
                }
                Ok(_) => self.dispatch(&mut buf, &mut writer),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(IDLE_POLL_INTERVAL),
                Err(e) => {
                    warn!("Error reading commands: {}", e);
                    break;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Serves commands on the process's standard streams.
    pub fn run_stdio(&mut self) -> Result<()> {
        let stdin = io::stdin();
        let stdout = io::stdout();
        self.run(stdin.lock(), stdout.lock())
    }

    /// Handles one buffered line and clears the buffer.
    fn dispatch<W: Write>(&mut self, buf: &mut Vec<u8>, writer: &mut W) {
        let line = String::from_utf8_lossy(&buf[..]).into_owned();
        buf.clear();

        if let Some(reply) = self.handle_line(&line) {
            let written = writeln!(writer, "{}", reply).and_then(|_| writer.flush());
            if let Err(e) = written {
                warn!("Output closed ({}), shutting down", e);
                self.state = DaemonState::ShuttingDown;
            }
        }
    }

    /// Runs one request line and returns the reply, if any.
    pub fn handle_line(&mut self, line: &str) -> Option<Reply> {
        let command = match parse_line(line) {
            Ok(Some(command)) => command,
            Ok(None) => return None,
            Err(e) => {
                warn!("Rejected request: {}", e);
                return Some(Reply::Rejected(e.message));
            }
        };

        match command {
            DaemonCommand::Quit => {
                info!("Shutdown requested");
                self.state = DaemonState::ShuttingDown;
                None
            }
            DaemonCommand::Unknown(line) => {
                warn!("Unknown command: {}", line);
                Some(Reply::Rejected(format!("Unknown command: {}", line)))
            }
            DaemonCommand::Process { input, output } => {
                let output_dir = output.unwrap_or_else(|| self.default_output_dir.clone());

                self.state = DaemonState::Processing;
                let result = self
                    .engine
                    .handle_mut()
                    .and_then(|engine| transcribe_file(engine, &input, &output_dir, &self.config));
                self.state = DaemonState::Ready;

                match result {
                    Ok(path) => {
                        self.completed += 1;
                        info!("Completed {} -> {}", input.display(), path.display());
                        Some(Reply::Ready)
                    }
                    Err(e) if e.code.is_job_scoped() => {
                        self.failed += 1;
                        error!("Failed to process {}: {}", input.display(), e);
                        Some(Reply::Error)
                    }
                    Err(e) => {
                        // No usable engine.
                        self.failed += 1;
                        error!("Cannot process {}: {}; shutting down", input.display(), e);
                        self.state = DaemonState::ShuttingDown;
                        Some(Reply::Error)
                    }
                }
            }
        }
    }

    /// Releases the engine. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.state == DaemonState::Terminated {
            return;
        }
        self.state = DaemonState::ShuttingDown;
        self.engine.shutdown();
        self.state = DaemonState::Terminated;
        info!(
            "Daemon stopped ({} completed, {} failed)",
            self.completed, self.failed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::collections::VecDeque;
    use std::io::{BufReader, Cursor, Read};
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    fn write_wav(path: &Path) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..44_100 {
            writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn started(default_dir: &Path) -> (DaemonServer<MockEngine>, std::sync::Arc<std::sync::atomic::AtomicBool>) {
        let engine = MockEngine::new();
        let destroyed = engine.destroyed_flag();
        let mut server = DaemonServer::new(default_dir, TranscriptionConfig::default());
        server.start(|| Ok(engine)).unwrap();
        (server, destroyed)
    }

    fn run(server: &mut DaemonServer<MockEngine>, input: &str) -> String {
        let mut out = Vec::new();
        server.run(Cursor::new(input.as_bytes().to_vec()), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn process_quit_session() {
        let dir = tempdir().unwrap();
        let wav = dir.path().join("a.wav");
        write_wav(&wav);
        let out_dir = dir.path().join("out");
        let default_dir = dir.path().join("default");

        let (mut server, destroyed) = started(&default_dir);
        let script = format!(
            "process \"{}\" \"{}\"\nprocess \"missing.wav\"\n\nquit\n",
            wav.display(),
            out_dir.display()
        );
        let replies = run(&mut server, &script);

        assert_eq!(replies, "READY\nERROR\n");
        assert!(out_dir.join("a.mid").exists());
        assert!(!default_dir.join("missing.mid").exists());
        assert!(destroyed.load(Ordering::SeqCst));
        assert_eq!(server.state(), DaemonState::Terminated);
    }

    #[test]
    fn output_dir_defaults_to_startup_dir() {
        let dir = tempdir().unwrap();
        let wav = dir.path().join("take.wav");
        write_wav(&wav);
        let default_dir = dir.path().join("default");

        let (mut server, _) = started(&default_dir);
        let replies = run(&mut server, &format!("process {}\n", wav.display()));

        assert_eq!(replies, "READY\n");
        assert!(default_dir.join("take.mid").exists());
    }

    #[test]
    fn eof_is_clean_shutdown() {
        let dir = tempdir().unwrap();
        let (mut server, destroyed) = started(dir.path());
        assert_eq!(run(&mut server, ""), "");
        assert!(destroyed.load(Ordering::SeqCst));
    }

    #[test]
    fn commands_after_quit_are_not_read() {
        let dir = tempdir().unwrap();
        let (mut server, _) = started(dir.path());
        assert_eq!(run(&mut server, "exit\nbogus\n"), "");
    }

    #[test]
    fn malformed_requests_do_not_stop_loop() {
        let dir = tempdir().unwrap();
        let (mut server, destroyed) = started(dir.path());
        let replies = run(
            &mut server,
            "hello world\nprocess\nprocess \"open\n   \nquit\n",
        );
        assert_eq!(
            replies,
            "ERROR: Unknown command: hello world\nERROR: Missing input file\nERROR: Unterminated quote\n"
        );
        assert!(destroyed.load(Ordering::SeqCst));
    }

    #[test]
    fn job_failure_keeps_engine_alive() {
        let dir = tempdir().unwrap();
        let wav = dir.path().join("a.wav");
        write_wav(&wav);

        let (mut server, destroyed) = started(dir.path());
        if let Ok(engine) = server.engine.handle_mut() {
            engine.set_failing(true);
        }
        assert_eq!(server.handle_line(&format!("process {}", wav.display())), Some(Reply::Error));
        assert!(!destroyed.load(Ordering::SeqCst));

        if let Ok(engine) = server.engine.handle_mut() {
            engine.set_failing(false);
        }
        assert_eq!(server.handle_line(&format!("process {}", wav.display())), Some(Reply::Ready));
        assert_eq!(server.engine.handle_mut().unwrap().calls, 2);
    }

    #[test]
    fn missing_engine_stops_loop_after_reply() {
        let dir = tempdir().unwrap();
        let mut server: DaemonServer<MockEngine> =
            DaemonServer::new(dir.path(), TranscriptionConfig::default());
        server.state = DaemonState::Ready;

        let replies = run(&mut server, "process a.wav\nprocess b.wav\n");
        assert_eq!(replies, "ERROR\n");
        assert_eq!(server.state(), DaemonState::Terminated);
    }

    #[test]
    fn last_line_without_newline_is_handled() {
        let dir = tempdir().unwrap();
        let (mut server, _) = started(dir.path());
        assert_eq!(run(&mut server, "nope"), "ERROR: Unknown command: nope\n");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let dir = tempdir().unwrap();
        let (mut server, _) = started(dir.path());
        let mut out = Vec::new();
        server.run(Cursor::new(b"bad\xff\n".to_vec()), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "ERROR: Unknown command: bad\u{FFFD}\n");
    }

    /// Reader that reports "no data yet" between chunks.
    struct Trickle(VecDeque<Option<&'static [u8]>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Some(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
                Some(None) => Err(ErrorKind::WouldBlock.into()),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn would_block_waits_and_keeps_partial_line() {
        let dir = tempdir().unwrap();
        let (mut server, destroyed) = started(dir.path());
        let reader = BufReader::new(Trickle(VecDeque::from(vec![
            Some(&b"hel"[..]),
            None,
            Some(&b"lo\n"[..]),
            None,
            Some(&b"quit\n"[..]),
        ])));

        let mut out = Vec::new();
        server.run(reader, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "ERROR: Unknown command: hello\n");
        assert!(destroyed.load(Ordering::SeqCst));
    }

    #[test]
    fn failed_start_terminates() {
        let dir = tempdir().unwrap();
        let mut server: DaemonServer<MockEngine> =
            DaemonServer::new(dir.path(), TranscriptionConfig::default());
        let err = server
            .start(|| Err(crate::error::TranscribeError::engine_load_failed("no model")))
            .unwrap_err();
        assert!(err.code.is_process_fatal());
        assert_eq!(server.state(), DaemonState::Terminated);
        assert_eq!(run(&mut server, "quit\n"), "");
    }

    #[test]
    fn drop_releases_engine() {
        let dir = tempdir().unwrap();
        let (server, destroyed) = started(dir.path());
        drop(server);
        assert!(destroyed.load(Ordering::SeqCst));
    }
}
