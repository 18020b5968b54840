//! Sinks that need no playback device.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use tracing::warn;

use super::{AudioFrame, AudioSink};

/// Drops every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl AudioSink for DiscardSink {
    fn write(&self, _frame: AudioFrame) {}
}

/// Records what would have been played to a mono 16-bit WAV file.
pub struct WavFileSink {
    writer: Mutex<Option<WavWriter<BufWriter<File>>>>,
    sample_rate: u32,
}

impl WavFileSink {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self, hound::Error> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        Ok(Self {
            writer: Mutex::new(Some(WavWriter::create(path, spec)?)),
            sample_rate,
        })
    }

    /// Write the header and close the file. Frames written afterwards are dropped.
    pub fn finalize(&self) -> Result<(), hound::Error> {
        match self.writer.lock().take() {
            Some(writer) => writer.finalize(),
            None => Ok(()),
        }
    }
}

impl AudioSink for WavFileSink {
    fn write(&self, frame: AudioFrame) {
        if frame.sample_rate != self.sample_rate {
            warn!(
                expected = self.sample_rate,
                got = frame.sample_rate,
                "Dropping frame with a different sample rate"
            );
            return;
        }

        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return;
        };
        let failed = frame
            .samples
            .iter()
            .try_for_each(|&sample| writer.write_sample(sample))
            .err();
        if let Some(e) = failed {
            warn!(error = %e, "WAV write failed; recording stopped");
            *guard = None;
        }
    }
}
