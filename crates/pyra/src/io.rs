//! The `print` sink: an embedding seam so the host decides where a script's
//! textual output goes instead of the interpreter writing to stdout itself.

/// Receives the text a script produces through `print()`, one call per
/// `print()` invocation (the trailing newline `print` appends is part of
/// the text handed to the sink, matching the single-write-per-call contract
/// a host callback naturally wants).
pub trait PrintWriter {
    fn write_line(&mut self, text: &str);
}

/// Writes to the host process's real stdout. The default sink.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write_line(&mut self, text: &str) {
        println!("{text}");
    }
}

/// Discards all output. Useful for embedding contexts that only care about
/// a script's return value or side effects on the object graph.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write_line(&mut self, _text: &str) {}
}

/// Collects every line into a newline-joined buffer, shared via `Rc<RefCell<_>>`
/// so a caller can hold a handle to the text after the sink itself has been
/// moved into a `Context` (which owns its `Box<dyn PrintWriter>` outright).
/// Used by tests and by embedders that want to inspect output after the fact
/// rather than stream it.
#[derive(Debug, Default, Clone)]
pub struct CollectStringPrint(pub std::rc::Rc<std::cell::RefCell<String>>);

impl CollectStringPrint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    pub fn contents(&self) -> String {
        self.0.borrow().clone()
    }
}

impl PrintWriter for CollectStringPrint {
    fn write_line(&mut self, text: &str) {
        let mut buf = self.0.borrow_mut();
        buf.push_str(text);
        buf.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_string_print_joins_with_newlines() {
        let mut sink = CollectStringPrint::default();
        sink.write_line("hello");
        sink.write_line("world");
        assert_eq!(sink.contents(), "hello\nworld\n");
    }

    #[test]
    fn collect_string_print_clone_shares_the_buffer() {
        let sink = CollectStringPrint::new();
        let mut handle = sink.clone();
        handle.write_line("hello");
        assert_eq!(sink.contents(), "hello\n");
    }
}
