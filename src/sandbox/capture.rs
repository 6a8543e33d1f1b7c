//! Output capture for a single execution.
//!
//! Both output channels of a running script feed one [`StreamBuilder`], which
//! coalesces bursts of same-channel writes into timestamped [`OutputEvent`]s.
//! A write to the other channel, or a pause longer than the coalescing window,
//! closes the pending event first, so the relative order of the two channels
//! is always preserved.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default coalescing window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(10);

/// Logical output channel of a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Standard output
    #[serde(rename = "out")]
    Primary,
    /// Standard error
    #[serde(rename = "err")]
    Diagnostic,
}

/// A run of text written to one channel, timestamped relative to the start
/// of the execution.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputEvent {
    pub channel: Channel,
    pub text: String,
    pub offset: Duration,
}

#[derive(Debug)]
struct Pending {
    channel: Channel,
    text: String,
    first_write: Instant,
}

/// Coalesces channel writes into an ordered list of events.
#[derive(Debug)]
pub struct StreamBuilder {
    window: Duration,
    start: Instant,
    events: Vec<OutputEvent>,
    pending: Option<Pending>,
}

impl StreamBuilder {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    pub fn starting_at(window: Duration, start: Instant) -> Self {
        Self {
            window,
            start,
            events: Vec::new(),
            pending: None,
        }
    }

    /// Move the reference point event offsets are measured from.
    pub fn reset_start(&mut self, start: Instant) {
        self.start = start;
    }

    pub fn write(&mut self, channel: Channel, text: &str) -> usize {
        self.write_at(channel, text, Instant::now())
    }

    /// Record `text` on `channel` as written at `now`.
    ///
    /// The window is measured from the first write of the pending event, so a
    /// continuous stream is still split into window-sized chunks.
    pub fn write_at(&mut self, channel: Channel, text: &str, now: Instant) -> usize {
        if text.is_empty() {
            return 0;
        }

        match self.pending.as_mut() {
            Some(pending)
                if pending.channel == channel
                    && now.saturating_duration_since(pending.first_write) < self.window =>
            {
                pending.text.push_str(text);
            }
            _ => {
                self.flush();
                self.pending = Some(Pending {
                    channel,
                    text: text.to_string(),
                    first_write: now,
                });
            }
        }

        text.len()
    }

    /// Flush the pending event and return everything captured so far.
    /// Calling this again without new writes returns the same events.
    pub fn finish(&mut self) -> Vec<OutputEvent> {
        self.flush();
        self.events.clone()
    }

    fn flush(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.events.push(OutputEvent {
                channel: pending.channel,
                text: pending.text,
                offset: pending.first_write.saturating_duration_since(self.start),
            });
        }
    }
}

#[derive(Debug)]
struct Shared {
    builder: StreamBuilder,
    closed: bool,
}

/// Scoped capture of one execution's output.
///
/// Sinks handed out by [`StreamCapture::sinks`] write into this capture until
/// it is finished or dropped; afterwards their writes are discarded.
#[derive(Debug)]
pub struct StreamCapture {
    shared: Arc<Mutex<Shared>>,
}

impl StreamCapture {
    pub fn new(window: Duration) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                builder: StreamBuilder::new(window),
                closed: false,
            })),
        }
    }

    pub fn sinks(&self) -> OutputSinks {
        OutputSinks {
            primary: OutputSink {
                channel: Channel::Primary,
                shared: Arc::clone(&self.shared),
            },
            diagnostic: OutputSink {
                channel: Channel::Diagnostic,
                shared: Arc::clone(&self.shared),
            },
        }
    }

    /// Start the execution clock now.
    pub fn start(&self) -> Instant {
        let now = Instant::now();
        lock(&self.shared).builder.reset_start(now);
        now
    }

    /// Close every sink and return the finished event stream.
    pub fn finish(self) -> Vec<OutputEvent> {
        let mut shared = lock(&self.shared);
        shared.closed = true;
        shared.builder.finish()
    }
}

impl Drop for StreamCapture {
    fn drop(&mut self) {
        lock(&self.shared).closed = true;
    }
}

/// Write end of one channel.
#[derive(Debug, Clone)]
pub struct OutputSink {
    channel: Channel,
    shared: Arc<Mutex<Shared>>,
}

impl OutputSink {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Returns the number of bytes accepted; zero once the capture is closed.
    pub fn write(&self, text: &str) -> usize {
        let mut shared = lock(&self.shared);
        if shared.closed {
            debug!(channel = ?self.channel, len = text.len(), "Discarding write after capture closed");
            return 0;
        }
        shared.builder.write(self.channel, text)
    }
}

/// The pair of sinks a runtime writes script output to.
#[derive(Debug, Clone)]
pub struct OutputSinks {
    pub primary: OutputSink,
    pub diagnostic: OutputSink,
}

impl OutputSinks {
    pub fn get(&self, channel: Channel) -> &OutputSink {
        match channel {
            Channel::Primary => &self.primary,
            Channel::Diagnostic => &self.diagnostic,
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    // A panicking writer leaves the builder in a consistent state
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_rapid_same_channel_writes_coalesce() {
        let t0 = Instant::now();
        let mut builder = StreamBuilder::starting_at(DEFAULT_WINDOW, t0);
        for (i, ch) in "hello".chars().enumerate() {
            builder.write_at(Channel::Primary, &ch.to_string(), t0 + ms(1) + ms(i as u64));
        }

        let events = builder.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "hello");
        assert_eq!(events[0].channel, Channel::Primary);
        assert_eq!(events[0].offset, ms(1));
    }

    #[test]
    fn test_gap_beyond_window_flushes() {
        let t0 = Instant::now();
        let mut builder = StreamBuilder::starting_at(DEFAULT_WINDOW, t0);
        builder.write_at(Channel::Primary, "a", t0);
        builder.write_at(Channel::Primary, "b", t0 + ms(50));

        let events = builder.finish();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].text, "a");
        assert_eq!(events[1].text, "b");
        assert_eq!(events[1].offset, ms(50));
    }

    #[test]
    fn test_window_is_anchored_at_first_write() {
        let t0 = Instant::now();
        let mut builder = StreamBuilder::starting_at(DEFAULT_WINDOW, t0);
        builder.write_at(Channel::Primary, "a", t0);
        builder.write_at(Channel::Primary, "b", t0 + ms(6));
        builder.write_at(Channel::Primary, "c", t0 + ms(12));

        let events = builder.finish();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].text, "ab");
        assert_eq!(events[1].text, "c");
    }

    #[test]
    fn test_other_channel_forces_flush_and_keeps_order() {
        let t0 = Instant::now();
        let mut builder = StreamBuilder::starting_at(DEFAULT_WINDOW, t0);
        builder.write_at(Channel::Primary, "out1", t0);
        builder.write_at(Channel::Diagnostic, "err1", t0 + ms(1));
        builder.write_at(Channel::Primary, "out2", t0 + ms(2));

        let events = builder.finish();
        let order: Vec<_> = events.iter().map(|e| (e.channel, e.text.as_str())).collect();
        assert_eq!(
            order,
            vec![
                (Channel::Primary, "out1"),
                (Channel::Diagnostic, "err1"),
                (Channel::Primary, "out2"),
            ]
        );
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut builder = StreamBuilder::new(DEFAULT_WINDOW);
        builder.write(Channel::Diagnostic, "warning\n");
        let first = builder.finish();
        let second = builder.finish();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_empty_writes_are_ignored() {
        let mut builder = StreamBuilder::new(DEFAULT_WINDOW);
        assert_eq!(builder.write(Channel::Primary, ""), 0);
        assert!(builder.finish().is_empty());
    }

    #[test]
    fn test_sinks_share_one_builder_and_close_on_finish() {
        let capture = StreamCapture::new(Duration::from_secs(1));
        let sinks = capture.sinks();
        capture.start();

        assert_eq!(sinks.primary.write("one "), 4);
        sinks.primary.write("two");
        sinks.diagnostic.write("oops");

        let events = capture.finish();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].text, "one two");
        assert_eq!(events[1].channel, Channel::Diagnostic);

        assert_eq!(sinks.primary.write("late"), 0);
    }

    #[test]
    fn test_dropping_capture_closes_sinks() {
        let capture = StreamCapture::new(DEFAULT_WINDOW);
        let sinks = capture.sinks();
        drop(capture);
        assert_eq!(sinks.get(Channel::Diagnostic).write("late"), 0);
    }
}
