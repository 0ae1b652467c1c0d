//! Character I/O between a running program and the host.
//!
//! The simulator never blocks on the host by itself. Programs reach the console
//! through virtual functions (e.g., the ROM monitor's character routines),
//! which use the sim side of the console:
//! - [`Console`]: held by the simulator. Reads characters out of the lines the host sent,
//!     and writes output text.
//! - [`ConsoleHost`]: held by the host. Sends input lines and receives output text.
//!
//! Both sides are connected by unbounded channels, so either side can live on another thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel as cbc;

/// The simulator's side of the console.
#[derive(Debug)]
pub struct Console {
    input: cbc::Receiver<String>,
    pending: VecDeque<u8>,
    output: cbc::Sender<String>,
}

/// The host's side of the console.
#[derive(Debug, Clone)]
pub struct ConsoleHost {
    input: cbc::Sender<String>,
    output: cbc::Receiver<String>,
}

impl Console {
    /// Creates a connected console pair.
    pub fn pair() -> (Console, ConsoleHost) {
        let (in_tx, in_rx) = cbc::unbounded();
        let (out_tx, out_rx) = cbc::unbounded();

        let console = Console { input: in_rx, pending: VecDeque::new(), output: out_tx };
        let host = ConsoleHost { input: in_tx, output: out_rx };
        (console, host)
    }

    /// Creates a console with no host: output is discarded and no input ever arrives.
    pub fn disconnected() -> Self {
        let (console, _) = Self::pair();
        console
    }

    /// Creates a console connected to stdin and stdout.
    ///
    /// A reader thread forwards stdin line by line (newline included),
    /// and a writer thread prints (and flushes) all output.
    ///
    /// The writer thread exits once the console is dropped and all output is printed,
    /// so join the returned handle after dropping the console to not lose any output.
    pub fn stdio() -> (Self, std::thread::JoinHandle<()>) {
        use std::io::{self, BufRead, Write};

        let (console, host) = Self::pair();
        let ConsoleHost { input, output } = host;

        // Reader thread:
        std::thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(mut line) = line else { return };
                line.push('\n');
                let Ok(()) = input.send(line) else { return };
            }
        });

        // Writer thread:
        let writer = std::thread::spawn(move || {
            let mut stdout = io::stdout();
            for text in output {
                let Ok(()) = stdout.write_all(text.as_bytes()) else { return };
                let _ = stdout.flush();
            }
        });

        (console, writer)
    }

    /// Writes text to the host.
    ///
    /// If the host is gone, the text is dropped.
    pub fn write_str(&mut self, text: &str) {
        if !text.is_empty() {
            let _ = self.output.send(text.to_string());
        }
    }

    fn refill(&mut self, line: String) {
        self.pending.extend(line.into_bytes());
    }

    /// Takes the next input character, if one is available right now.
    pub fn try_char(&mut self) -> Option<u8> {
        while self.pending.is_empty() {
            let line = self.input.try_recv().ok()?;
            self.refill(line);
        }
        self.pending.pop_front()
    }

    /// Blocks until an input character is available.
    ///
    /// Every `poll` interval, this checks `running`.
    /// If it is cleared (or the host disconnected), this gives up and returns `None`.
    pub fn wait_char(&mut self, running: &AtomicBool, poll: Duration) -> Option<u8> {
        loop {
            if let Some(c) = self.try_char() {
                return Some(c);
            }
            if !running.load(Ordering::Relaxed) {
                return None;
            }
            match self.input.recv_timeout(poll) {
                Ok(line) => self.refill(line),
                Err(cbc::RecvTimeoutError::Timeout) => {},
                Err(cbc::RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Discards any input that has not been read yet.
    pub fn flush_input(&mut self) {
        self.pending.clear();
        while self.input.try_recv().is_ok() {}
    }
}
impl Default for Console {
    fn default() -> Self {
        Self::disconnected()
    }
}

impl ConsoleHost {
    /// Sends a line of input (no newline is added).
    ///
    /// Returns whether the simulator's side still exists.
    pub fn send(&self, line: impl Into<String>) -> bool {
        self.input.send(line.into()).is_ok()
    }

    /// Receives all output written so far, without blocking.
    pub fn drain(&self) -> String {
        self.output.try_iter().collect()
    }

    /// Blocks until the next piece of output arrives.
    ///
    /// Returns `None` once the simulator's side is gone and everything was received.
    pub fn recv(&self) -> Option<String> {
        self.output.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn characters_come_from_lines() {
        let (mut con, host) = Console::pair();
        assert_eq!(con.try_char(), None);

        assert!(host.send("ab"));
        assert!(host.send(""));
        assert!(host.send("c\n"));
        let chars: Vec<_> = std::iter::from_fn(|| con.try_char()).collect();
        assert_eq!(chars, b"abc\n");
    }

    #[test]
    fn output_is_ordered() {
        let (mut con, host) = Console::pair();
        con.write_str("hello");
        con.write_str("");
        con.write_str(", world\n");
        assert_eq!(host.drain(), "hello, world\n");
        assert_eq!(host.drain(), "");

        drop(con);
        assert_eq!(host.recv(), None);
    }

    #[test]
    fn wait_gives_up() {
        let (mut con, host) = Console::pair();
        let running = AtomicBool::new(false);
        assert_eq!(con.wait_char(&running, Duration::from_millis(1)), None);

        host.send("x");
        assert_eq!(con.wait_char(&running, Duration::from_millis(1)), Some(b'x'));

        drop(host);
        running.store(true, Ordering::Relaxed);
        assert_eq!(con.wait_char(&running, Duration::from_millis(1)), None);
    }

    #[test]
    fn wait_across_threads() {
        let (mut con, host) = Console::pair();
        let running = Arc::new(AtomicBool::new(true));

        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            host.send("q");
            host
        });
        assert_eq!(con.wait_char(&running, Duration::from_millis(5)), Some(b'q'));
        let _host = sender.join().unwrap();
    }

    #[test]
    fn flush_and_disconnected() {
        let (mut con, host) = Console::pair();
        host.send("abc");
        assert_eq!(con.try_char(), Some(b'a'));
        con.flush_input();
        assert_eq!(con.try_char(), None);

        let mut dead = Console::default();
        dead.write_str("nobody hears this");
        assert_eq!(dead.try_char(), None);
    }
}
