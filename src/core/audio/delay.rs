use std::collections::VecDeque;
use std::time::Duration;

use super::AudioFrame;
use crate::core::realtime::config::REALTIME_SAMPLE_RATE;

/// Sample-accurate delay line.
///
/// Every processed frame pushes its samples in and pops the same number out,
/// so output lags input by exactly `delay` while frames arrive in real time.
/// The line is primed with silence.
#[derive(Debug)]
pub struct DelayNode {
    delay: Duration,
    sample_rate: u32,
    line: VecDeque<i16>,
}

impl DelayNode {
    pub fn new(delay: Duration) -> Self {
        let mut node = Self {
            delay,
            sample_rate: REALTIME_SAMPLE_RATE,
            line: VecDeque::new(),
        };
        node.reset();
        node
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Change the delay. Buffered audio is discarded.
    pub fn set_delay(&mut self, delay: Duration) {
        if delay != self.delay {
            self.delay = delay;
            self.reset();
        }
    }

    /// Replace buffered audio with silence.
    pub fn reset(&mut self) {
        self.line.clear();
        self.line.resize(self.delay_samples(), 0);
    }

    /// Samples currently held back.
    pub fn buffered(&self) -> usize {
        self.line.len()
    }

    fn delay_samples(&self) -> usize {
        (self.delay.as_millis() as u64 * u64::from(self.sample_rate) / 1000) as usize
    }

    pub fn process(&mut self, frame: AudioFrame) -> AudioFrame {
        if frame.sample_rate != self.sample_rate {
            self.sample_rate = frame.sample_rate;
            self.reset();
        }
        if self.line.is_empty() {
            return frame;
        }

        let len = frame.samples.len();
        self.line.extend(frame.samples);
        let samples: Vec<i16> = self.line.drain(..len).collect();
        AudioFrame::new(samples, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_delay_passthrough() {
        let mut node = DelayNode::new(Duration::ZERO);
        let frame = AudioFrame::new(vec![1, 2, 3], 8000);
        assert_eq!(node.process(frame.clone()), frame);
    }

    #[test]
    fn test_delay_shifts_samples() {
        // 1ms at 8kHz = 8 samples
        let mut node = DelayNode::new(Duration::from_millis(1));
        let first = node.process(AudioFrame::new((1..=8).collect(), 8000));
        assert_eq!(first.samples, vec![0; 8]);
        let second = node.process(AudioFrame::new(vec![9; 4], 8000));
        assert_eq!(second.samples, vec![1, 2, 3, 4]);
        assert_eq!(node.buffered(), 8);
    }

    #[test]
    fn test_sample_rate_change_resets_line() {
        let mut node = DelayNode::new(Duration::from_millis(10));
        assert_eq!(node.buffered(), 240);
        node.process(AudioFrame::new(vec![5; 16], 16000));
        assert_eq!(node.buffered(), 160);
    }

    #[test]
    fn test_reset_discards_buffered_audio() {
        let mut node = DelayNode::new(Duration::from_millis(1));
        node.process(AudioFrame::new(vec![7; 24], REALTIME_SAMPLE_RATE));
        node.reset();
        let out = node.process(AudioFrame::new(vec![1; 24], REALTIME_SAMPLE_RATE));
        assert_eq!(out.samples, vec![0; 24]);
    }
}
