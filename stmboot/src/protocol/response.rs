//! Matching of textual bootloader responses.
//!
//! The bootloader answers every command and every firmware chunk with a text
//! line. Success is signalled by a line *containing* a token; anything else
//! (debug prints, banners) is surfaced to the observer and skipped.

use std::time::{Duration, Instant};

use log::trace;

use crate::error::Result;
use crate::observer::UpdateObserver;
use crate::port::Transport;

/// Token the bootloader prints on success.
pub const OK_TOKEN: &str = "OK!";

/// Token the bootloader prints when it starts listening.
pub const READY_TOKEN: &str = "Bootloader ready";

/// Default budget for a single response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Upper bound for a single line read inside a wait.
pub const LINE_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Outcome of waiting for a response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseMatch {
    /// A line containing the pattern arrived.
    Matched(String),
    /// The budget elapsed first.
    TimedOut,
}

impl ResponseMatch {
    /// Whether the pattern was seen.
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

/// Read lines until one contains `pattern` or `timeout` elapses.
///
/// At least one read is attempted even with a zero budget. Transport-level
/// read timeouts only mean "no line yet"; they never end the wait early.
pub fn await_response<T, O>(
    transport: &mut T,
    pattern: &str,
    timeout: Duration,
    observer: &mut O,
) -> Result<ResponseMatch>
where
    T: Transport + ?Sized,
    O: UpdateObserver + ?Sized,
{
    let start = Instant::now();

    loop {
        let remaining = timeout.saturating_sub(start.elapsed());
        match transport.read_line(remaining.min(LINE_READ_TIMEOUT))? {
            Some(line) => {
                observer.on_line(&line);
                if line.contains(pattern) {
                    return Ok(ResponseMatch::Matched(line));
                }
            },
            None => trace!("Waiting for '{pattern}'..."),
        }

        if start.elapsed() >= timeout {
            return Ok(ResponseMatch::TimedOut);
        }
    }
}

/// [`await_response`] for [`OK_TOKEN`].
pub fn await_ok<T, O>(transport: &mut T, timeout: Duration, observer: &mut O) -> Result<ResponseMatch>
where
    T: Transport + ?Sized,
    O: UpdateObserver + ?Sized,
{
    await_response(transport, OK_TOKEN, timeout, observer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Transport replaying queued lines; `None` entries simulate read timeouts.
    struct ScriptedTransport {
        lines: VecDeque<Option<&'static str>>,
        reads: usize,
    }

    impl ScriptedTransport {
        fn new(lines: &[Option<&'static str>]) -> Self {
            Self {
                lines: lines.iter().copied().collect(),
                reads: 0,
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn write_bytes(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
            self.reads += 1;
            match self.lines.pop_front() {
                Some(Some(line)) => Ok(Some(line.to_string())),
                Some(None) | None => {
                    std::thread::sleep(timeout.min(Duration::from_millis(2)));
                    Ok(None)
                },
            }
        }

        fn discard_input(&mut self) -> Result<()> {
            self.lines.clear();
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        lines: Vec<String>,
    }

    impl UpdateObserver for Recorder {
        fn on_line(&mut self, line: &str) {
            self.lines.push(line.to_string());
        }
    }

    const BUDGET: Duration = Duration::from_millis(30);

    #[test]
    fn test_matches_after_unrelated_lines() {
        let mut transport = ScriptedTransport::new(&[Some("debug: erase"), Some("flash OK! 42")]);
        let mut recorder = Recorder::default();

        let result = await_ok(&mut transport, BUDGET, &mut recorder).unwrap();

        assert_eq!(result, ResponseMatch::Matched("flash OK! 42".to_string()));
        assert_eq!(recorder.lines, vec!["debug: erase", "flash OK! 42"]);
    }

    #[test]
    fn test_stops_reading_at_first_match() {
        let mut transport = ScriptedTransport::new(&[Some("OK!"), Some("OK!")]);
        let result = await_ok(&mut transport, BUDGET, &mut Recorder::default()).unwrap();
        assert!(result.is_matched());
        assert_eq!(transport.reads, 1);
        assert_eq!(transport.lines.len(), 1);
    }

    #[test]
    fn test_read_timeouts_are_swallowed() {
        let mut transport = ScriptedTransport::new(&[None, None, Some("OK!")]);
        let result = await_ok(&mut transport, BUDGET, &mut Recorder::default()).unwrap();
        assert!(result.is_matched());
    }

    #[test]
    fn test_times_out_despite_many_lines() {
        let noise: Vec<Option<&'static str>> = vec![Some("FAIL"); 10_000];
        let mut transport = ScriptedTransport::new(&noise);
        let mut recorder = Recorder::default();

        let start = Instant::now();
        let result = await_ok(&mut transport, BUDGET, &mut recorder).unwrap();

        assert_eq!(result, ResponseMatch::TimedOut);
        assert!(start.elapsed() >= BUDGET);
        assert!(!recorder.lines.is_empty());
        assert!(recorder.lines.iter().all(|l| l == "FAIL"));
    }

    #[test]
    fn test_times_out_on_silence() {
        let mut transport = ScriptedTransport::new(&[]);
        let start = Instant::now();
        let result = await_ok(&mut transport, BUDGET, &mut Recorder::default()).unwrap();
        assert_eq!(result, ResponseMatch::TimedOut);
        assert!(start.elapsed() >= BUDGET);
    }

    #[test]
    fn test_custom_pattern() {
        let mut transport = ScriptedTransport::new(&[Some("OK!"), Some("Bootloader ready v2")]);
        let result =
            await_response(&mut transport, READY_TOKEN, BUDGET, &mut Recorder::default()).unwrap();
        assert_eq!(
            result,
            ResponseMatch::Matched("Bootloader ready v2".to_string())
        );
    }

    #[test]
    fn test_zero_budget_still_reads_once() {
        let mut transport = ScriptedTransport::new(&[Some("OK!")]);
        let result = await_ok(&mut transport, Duration::ZERO, &mut Recorder::default()).unwrap();
        assert!(result.is_matched());
    }
}
