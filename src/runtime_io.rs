use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Result type for read operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// Successfully read a line
    Ok(String),
    /// No input queued (buffer-backed I/O)
    WaitingForInput,
    /// Error occurred
    Error(String),
}

/// Abstraction over runtime I/O so the VM can remain pure w.r.t. environment.
/// Spawned tasks share it, hence `Send`.
pub trait RuntimeIo: Send {
    fn write_line(&mut self, s: &str);
    fn write(&mut self, s: &str);
    fn read_line(&mut self) -> ReadResult;
}

/// Default I/O that talks to process stdout/stdin (CLI use).
pub struct StdIo;

impl RuntimeIo for StdIo {
    fn write_line(&mut self, s: &str) {
        println!("{}", s);
    }
    fn write(&mut self, s: &str) {
        use std::io::Write;
        print!("{}", s);
        let _ = std::io::stdout().flush();
    }
    fn read_line(&mut self) -> ReadResult {
        use std::io::{self, BufRead};
        let stdin = io::stdin();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(_) => ReadResult::Ok(line.trim_end().to_string()),
            Err(e) => ReadResult::Error(e.to_string()),
        }
    }
}

/// Buffer-based I/O for tests: caller pushes input, we accumulate output.
///
/// Clones share the same buffers, so a test keeps one handle and hands the
/// other to the runtime.
#[derive(Clone, Default)]
pub struct BufferIo {
    output: Arc<Mutex<String>>,
    input: Arc<Mutex<VecDeque<String>>>,
}

impl BufferIo {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push_input_line<S: Into<String>>(&self, line: S) {
        self.input.lock().push_back(line.into());
    }
    pub fn get_output(&self) -> String {
        self.output.lock().clone()
    }
    pub fn drain_output(&self) -> String {
        std::mem::take(&mut *self.output.lock())
    }
    pub fn clear_output(&self) {
        self.output.lock().clear();
    }
}

impl RuntimeIo for BufferIo {
    fn write_line(&mut self, s: &str) {
        let mut out = self.output.lock();
        out.push_str(s);
        out.push('\n');
    }
    fn write(&mut self, s: &str) {
        self.output.lock().push_str(s);
    }
    fn read_line(&mut self) -> ReadResult {
        match self.input.lock().pop_front() {
            Some(line) => ReadResult::Ok(line),
            None => ReadResult::WaitingForInput,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_io_shares_between_clones() {
        let io = BufferIo::new();
        let mut handle: Box<dyn RuntimeIo> = Box::new(io.clone());
        handle.write("a");
        handle.write_line("b");
        assert_eq!(io.get_output(), "ab\n");
        assert_eq!(io.drain_output(), "ab\n");
        assert_eq!(io.get_output(), "");
    }

    #[test]
    fn test_buffer_io_input_queue() {
        let io = BufferIo::new();
        io.push_input_line("42");
        let mut handle = io.clone();
        assert_eq!(handle.read_line(), ReadResult::Ok("42".into()));
        assert_eq!(handle.read_line(), ReadResult::WaitingForInput);
    }
}
