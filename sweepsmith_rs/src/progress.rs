use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

pub const DEFAULT_BAR_WIDTH: usize = 50;
pub const DEFAULT_FILL: char = '*';
/// Message used when none is configured. `{count}` and `{final}` are
/// replaced at render time.
pub const DEFAULT_MESSAGE: &str = "{count} of {final} complete";

/// Integer percentage of `count` over `final_count`, floored and capped at
/// 100. A zero final count is complete by definition.
pub fn percentage(count: u64, final_count: u64) -> u64 {
    if final_count == 0 {
        return 100;
    }
    (count.saturating_mul(100) / final_count).min(100)
}

/// Destination of rendered progress text.
pub struct ProgressSink {
    out: Box<dyn Write + Send>,
}

impl ProgressSink {
    pub fn stdout() -> Self {
        Self {
            out: Box::new(io::stdout()),
        }
    }

    /// Truncate (or create) `path` and write renders to it.
    pub fn file(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Unable to open progress file {}", path.display()))?;
        Ok(Self::from_file(file))
    }

    pub fn from_file(file: File) -> Self {
        Self {
            out: Box::new(file),
        }
    }

    /// In-memory sink plus a handle to read back what was written.
    pub fn memory() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Self {
            out: Box::new(SharedBuffer(Arc::clone(&buffer))),
        };
        (sink, buffer)
    }

    fn write_str(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes())?;
        self.out.flush()
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProgressSink")
    }
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::other("progress buffer poisoned"))?;
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Fixed-width bracketed text bar with the percentage centred on it:
///
/// ```text
/// [**************         30%                      ]  15 of 50 complete
/// ```
///
/// Every render starts with `\r` so a terminal redraws in place; the 100%
/// render ends the line.
#[derive(Debug)]
pub struct ProgressBar {
    final_count: u64,
    width: usize,
    fill: char,
    message: Option<String>,
    sink: ProgressSink,
    finished: bool,
}

impl ProgressBar {
    pub fn new(final_count: u64, sink: ProgressSink) -> Self {
        Self {
            final_count,
            width: DEFAULT_BAR_WIDTH,
            fill: DEFAULT_FILL,
            message: None,
            sink,
            finished: false,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(2);
        self
    }

    pub fn with_fill(mut self, fill: char) -> Self {
        self.fill = fill;
        self
    }

    pub fn final_count(&self) -> u64 {
        self.final_count
    }

    pub fn set_final_count(&mut self, final_count: u64) {
        self.final_count = final_count;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The bracketed bar for `percent`, without message or control
    /// characters.
    pub fn representation(&self, percent: u64) -> String {
        let inner = self.width - 2;
        let percent = percent.min(100) as usize;
        let filled = inner * percent / 100;
        let label = format!("{percent}%");

        let mut cells: Vec<char> = std::iter::repeat_n(self.fill, filled)
            .chain(std::iter::repeat_n(' ', inner - filled))
            .collect();
        if label.len() <= inner {
            let start = (inner - label.len() + 1) / 2;
            for (offset, ch) in label.chars().enumerate() {
                cells[start + offset] = ch;
            }
        }

        let mut bar = String::with_capacity(self.width);
        bar.push('[');
        bar.extend(cells);
        bar.push(']');
        bar
    }

    fn message_for(&self, count: u64) -> String {
        self.message
            .as_deref()
            .unwrap_or(DEFAULT_MESSAGE)
            .replace("{count}", &count.to_string())
            .replace("{final}", &self.final_count.to_string())
    }

    /// Render the bar for an absolute `count`. Renders after reaching 100%
    /// are dropped.
    pub fn progress(&mut self, count: u64) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let percent = percentage(count, self.final_count);
        self.render(percent, count, percent >= 100)
    }

    /// Render `count` in place without ever ending the line, for bars whose
    /// total can still grow.
    pub fn redraw(&mut self, count: u64) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let percent = percentage(count, self.final_count);
        self.render(percent, count, false)
    }

    /// Render 100% regardless of the last count.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.render(100, self.final_count, true)
    }

    /// Accept renders again after [`ProgressBar::finish`].
    pub fn reopen(&mut self) {
        self.finished = false;
    }

    fn render(&mut self, percent: u64, count: u64, end_line: bool) -> Result<()> {
        let mut line = format!(
            "\r{}  {}",
            self.representation(percent),
            self.message_for(count)
        );
        if end_line {
            line.push('\n');
            self.finished = true;
        }
        self.sink
            .write_str(&line)
            .context("Unable to write progress")
    }
}

/// Anything that can be told the absolute number of completed units.
pub trait ProgressReporter: Send {
    fn report(&mut self, count: u64) -> Result<()>;

    /// Mark the work done. Reporters that render saturate to 100% here.
    fn finish(&mut self) -> Result<()>;
}

impl ProgressReporter for ProgressBar {
    fn report(&mut self, count: u64) -> Result<()> {
        self.progress(count)
    }

    fn finish(&mut self) -> Result<()> {
        ProgressBar::finish(self)
    }
}

/// Completed-unit counter for one runner, aware of work skipped by resume.
///
/// One unit is one repetition slot: every finished combination counts as
/// `units_per_step` units whether or not it stopped early.
pub struct ProgressTracker {
    processed: u64,
    total: u64,
    start_offset: u64,
    units_per_step: u64,
    reporter: Option<Box<dyn ProgressReporter>>,
}

impl ProgressTracker {
    pub fn new(total_steps: usize, units_per_step: usize) -> Self {
        let units_per_step = units_per_step.max(1) as u64;
        Self {
            processed: 0,
            total: total_steps as u64 * units_per_step,
            start_offset: 0,
            units_per_step,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Credit `steps` already completed in an earlier run.
    pub fn resume_from(&mut self, steps: usize) {
        self.start_offset = steps as u64 * self.units_per_step;
        self.processed = self.start_offset;
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn processed_since_start(&self) -> u64 {
        self.processed.saturating_sub(self.start_offset)
    }

    /// Count one finished step and forward the new total to the reporter.
    pub fn record_step(&mut self) -> Result<()> {
        self.processed = (self.processed + self.units_per_step).min(self.total);
        match self.reporter.as_mut() {
            Some(reporter) => reporter.report(self.processed),
            None => Ok(()),
        }
    }

    pub fn finish(&mut self) -> Result<()> {
        match self.reporter.as_mut() {
            Some(reporter) => reporter.finish(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("processed", &self.processed)
            .field("total", &self.total)
            .field("start_offset", &self.start_offset)
            .finish()
    }
}
