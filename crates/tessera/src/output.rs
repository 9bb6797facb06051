//! Output sinks for rendered text.

use crate::error::Result;
use std::io::Write;

/// Destination of rendered text.
pub trait Output {
    fn write_str(&mut self, text: &str) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects output in memory.
#[derive(Debug, Default, Clone)]
pub struct StringOutput {
    buffer: String,
}

impl StringOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}

impl Output for StringOutput {
    fn write_str(&mut self, text: &str) -> Result<()> {
        self.buffer.push_str(text);
        Ok(())
    }
}

/// Adapts any [`std::io::Write`] as an output sink.
pub struct WriterOutput<W: Write> {
    writer: W,
}

impl<W: Write> WriterOutput<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Output for WriterOutput<W> {
    fn write_str(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes())?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
