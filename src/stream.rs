//! The capture → downmix → datagram loop.
//!
//! One blocking thread: read a stereo block, compute diagnostics, average the
//! two channels, send the mono block to the peer, and stop once enough audio
//! has gone out. The stream is closed with a single [`END_OF_STREAM`] datagram.

use std::thread;
use std::time::Duration;

use crate::audio::pcm::{self, BlockStats, MONO_SAMPLE_BYTES, STEREO_FRAME_BYTES};
use crate::audio::{AudioSource, CaptureError};
use crate::settings::{ProgressAccounting, StreamSettings};
use crate::transport::{DatagramSink, END_OF_STREAM};

/// Everything the loop needs to know, resolved from settings up front.
#[derive(Debug, Clone)]
pub struct StreamPlan {
    /// Stereo bytes per read
    pub block_size: usize,
    /// Mono bytes to send before stopping
    pub target_bytes: u64,
    /// Progress between two stats log lines
    pub stats_interval_bytes: u64,
    pub settle_delay: Duration,
    pub accounting: ProgressAccounting,
}

impl StreamPlan {
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            block_size: settings.block_size,
            target_bytes: settings.target_bytes(),
            stats_interval_bytes: settings.bytes_per_second(),
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
            accounting: settings.progress_accounting,
        }
    }

    /// Mono bytes produced by one full block.
    pub fn mono_block_bytes(&self) -> usize {
        self.block_size / STEREO_FRAME_BYTES * MONO_SAMPLE_BYTES
    }
}

/// Picks the blocks that get a stats log line: the first one, then the
/// first block after progress has moved another `interval` bytes.
#[derive(Debug, Clone)]
struct StatsCadence {
    interval: u64,
    next_at: u64,
}

impl StatsCadence {
    fn new(interval: u64) -> Self {
        Self {
            interval,
            next_at: 0,
        }
    }

    fn due(&mut self, progress: u64) -> bool {
        if progress < self.next_at {
            return false;
        }
        self.next_at = progress + self.interval;
        true
    }
}

/// Outcome of a completed stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamReport {
    /// Calls made to the audio source
    pub reads: u64,
    /// Reads that yielded no complete frame
    pub empty_reads: u64,
    pub blocks_sent: u64,
    pub blocks_failed: u64,
    /// Audio bytes the transport accepted, sentinel excluded
    pub bytes_sent: u64,
    /// Value of the progress counter when the loop stopped
    pub progress_bytes: u64,
    /// Stats log lines emitted
    pub stats_lines: u64,
    pub sentinel_sent: bool,
}

/// Stream audio from `source` to `sink` until the plan's target is reached.
///
/// A read error is returned immediately and nothing more is sent. Send
/// errors are logged and the block is dropped. `sink` is released when the
/// function returns.
pub fn run<S, T>(source: &mut S, mut sink: T, plan: &StreamPlan) -> Result<StreamReport, CaptureError>
where
    S: AudioSource + ?Sized,
    T: DatagramSink,
{
    let mut stereo = vec![0i16; plan.block_size / MONO_SAMPLE_BYTES];
    let mut mono = vec![0i16; plan.block_size / STEREO_FRAME_BYTES];
    let mut payload = Vec::with_capacity(plan.mono_block_bytes());
    let mut report = StreamReport::default();
    let mut cadence = StatsCadence::new(plan.stats_interval_bytes);

    log::info!(
        "Start streaming: target={} bytes, block={} bytes, accounting={:?}",
        plan.target_bytes,
        plan.block_size,
        plan.accounting
    );

    if !plan.settle_delay.is_zero() {
        thread::sleep(plan.settle_delay);
    }

    while report.progress_bytes < plan.target_bytes {
        let bytes_read = source.read_block(&mut stereo)?;
        report.reads += 1;

        let frames = (bytes_read / STEREO_FRAME_BYTES).min(mono.len());
        if frames == 0 {
            report.empty_reads += 1;
            continue;
        }

        let stats = BlockStats::from_stereo(&stereo, frames);
        if cadence.due(report.progress_bytes) {
            report.stats_lines += 1;
            log::info!(
                "Audio stats: frames={}, min={}, max={}, range={}, avg_amp={}",
                stats.frames,
                stats.min,
                stats.max,
                stats.range(),
                stats.avg_abs
            );
        }

        let n = pcm::downmix_stereo(&stereo, frames, &mut mono);
        pcm::samples_to_le_bytes(&mono[..n], &mut payload);
        let len = payload.len() as u64;

        match sink.send(&payload) {
            Ok(_) => {
                report.blocks_sent += 1;
                report.bytes_sent += len;
                report.progress_bytes += len;
            }
            Err(e) => {
                log::error!("Failed to send UDP packet: {}", e);
                report.blocks_failed += 1;
                if plan.accounting == ProgressAccounting::Attempted {
                    report.progress_bytes += len;
                }
            }
        }
    }

    match sink.send(END_OF_STREAM) {
        Ok(_) => report.sentinel_sent = true,
        Err(e) => log::error!("Failed to send end-of-stream marker: {}", e),
    }
    drop(sink);

    log::info!(
        "DONE: {} reads, {} blocks sent ({} bytes), {} failed, {} empty reads, {} stats lines",
        report.reads,
        report.blocks_sent,
        report.bytes_sent,
        report.blocks_failed,
        report.empty_reads,
        report.stats_lines
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};
    use std::io;

    enum Step {
        Bytes(usize),
        Fail,
    }

    /// Serves a scripted sequence of reads, then full blocks forever.
    /// Every frame is (left, right) = (2 * i, 2 * i + 10) for frame index i.
    struct ScriptedSource {
        script: VecDeque<Step>,
    }

    impl ScriptedSource {
        fn full_blocks() -> Self {
            Self::with(vec![])
        }

        fn with(script: Vec<Step>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl AudioSource for ScriptedSource {
        fn read_block(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError> {
            let bytes = match self.script.pop_front() {
                Some(Step::Bytes(n)) => n,
                Some(Step::Fail) => {
                    return Err(CaptureError::File(io::Error::other("device gone")));
                }
                None => buf.len() * 2,
            };
            for (i, frame) in buf.chunks_exact_mut(2).enumerate() {
                frame[0] = (2 * i) as i16;
                frame[1] = (2 * i + 10) as i16;
            }
            Ok(bytes)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        datagrams: Vec<Vec<u8>>,
        /// zero-based send calls that fail
        fail_on: HashSet<usize>,
        calls: usize,
    }

    impl DatagramSink for RecordingSink {
        fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_on.contains(&call) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            self.datagrams.push(payload.to_vec());
            Ok(payload.len())
        }
    }

    fn plan(sample_rate: u32, seconds: u32, block_size: usize) -> StreamPlan {
        StreamPlan::from_settings(&StreamSettings {
            sample_rate,
            duration_seconds: seconds,
            block_size,
            settle_delay_ms: 0,
            ..Default::default()
        })
    }

    fn audio_bytes(sink: &RecordingSink) -> u64 {
        sink.datagrams
            .iter()
            .filter(|d| d.as_slice() != END_OF_STREAM)
            .map(|d| d.len() as u64)
            .sum()
    }

    #[test]
    fn one_second_at_48k_takes_188_blocks() {
        let plan = plan(48000, 1, 1024);
        assert_eq!(plan.target_bytes, 96000);
        assert_eq!(plan.mono_block_bytes(), 512);

        let mut sink = RecordingSink::default();
        let report = run(&mut ScriptedSource::full_blocks(), &mut sink, &plan).unwrap();

        assert_eq!(report.blocks_sent, 188);
        assert_eq!(report.bytes_sent, 188 * 512);
        assert!(report.sentinel_sent);
        assert_eq!(sink.datagrams.len(), 189);
        assert!(sink.datagrams[..188].iter().all(|d| d.len() == 512));
        assert_eq!(sink.datagrams[188].as_slice(), END_OF_STREAM);
    }

    #[test]
    fn stats_cadence_first_block_then_once_per_interval() {
        let mut cadence = StatsCadence::new(96000);
        let due: Vec<u64> = (0..600u64)
            .map(|k| k * 512)
            .filter(|&progress| cadence.due(progress))
            .collect();
        // 0, then the first multiples of 512 at or past 96000 and 192512 ...
        assert_eq!(&due[..3], &[0, 188 * 512, 376 * 512]);

        let mut cadence = StatsCadence::new(96000);
        assert!(cadence.due(0));
        // progress that stays put never triggers another line
        assert!(!cadence.due(0));
        assert!(!cadence.due(95999));
        assert!(cadence.due(96000));
    }

    #[test]
    fn stats_logged_about_once_per_second() {
        let plan = plan(48000, 3, 1024);
        let mut sink = RecordingSink::default();
        let report = run(&mut ScriptedSource::full_blocks(), &mut sink, &plan).unwrap();

        // blocks 1, 189 and 377 of 563
        assert_eq!(report.blocks_sent, 563);
        assert_eq!(report.stats_lines, 3);
    }

    #[test]
    fn failed_sends_do_not_add_stats_lines() {
        let plan = plan(48000, 3, 1024);
        let mut sink = RecordingSink {
            fail_on: (0..400).step_by(2).collect(),
            ..Default::default()
        };
        let report = run(&mut ScriptedSource::full_blocks(), &mut sink, &plan).unwrap();

        assert_eq!(report.blocks_failed, 200);
        assert_eq!(report.blocks_sent, 563);
        assert_eq!(report.stats_lines, 3);
    }

    #[test]
    fn total_lands_within_one_block_of_target() {
        for &(rate, secs, block) in &[
            (8000, 1, 256),
            (16000, 2, 1024),
            (44100, 1, 1000),
            (48000, 3, 4096),
            (22050, 1, 4),
        ] {
            let plan = plan(rate, secs, block);
            let mono = plan.mono_block_bytes() as u64;
            let mut sink = RecordingSink::default();
            let report = run(&mut ScriptedSource::full_blocks(), &mut sink, &plan).unwrap();

            let total = audio_bytes(&sink);
            assert!(total >= plan.target_bytes, "rate={rate} block={block}");
            assert!(total < plan.target_bytes + mono, "rate={rate} block={block}");
            assert_eq!(report.blocks_sent, plan.target_bytes.div_ceil(mono));
        }
    }

    #[test]
    fn payload_is_le_mono_average() {
        let plan = plan(8, 1, 16); // 4 frames per block, target 16 bytes
        let mut sink = RecordingSink::default();
        run(&mut ScriptedSource::full_blocks(), &mut sink, &plan).unwrap();

        // frames (0,10) (2,12) (4,14) (6,16) -> 5 7 9 11
        let expected: Vec<u8> = [5i16, 7, 9, 11].iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(sink.datagrams[0], expected);
        assert_eq!(sink.datagrams.len(), 3);
    }

    #[test]
    fn empty_and_partial_reads_send_nothing() {
        let plan = plan(8, 1, 16);
        let mut source = ScriptedSource::with(vec![Step::Bytes(0), Step::Bytes(3), Step::Bytes(0)]);
        let mut sink = RecordingSink::default();
        let report = run(&mut source, &mut sink, &plan).unwrap();

        assert_eq!(report.reads, 5);
        assert_eq!(report.empty_reads, 3);
        assert_eq!(report.blocks_sent, 2);
        assert_eq!(sink.calls, 3);
    }

    #[test]
    fn short_read_sends_only_whole_frames() {
        let plan = plan(8, 1, 16);
        let mut source = ScriptedSource::with(vec![Step::Bytes(10)]);
        let mut sink = RecordingSink::default();
        run(&mut source, &mut sink, &plan).unwrap();

        // 10 bytes = 2 whole frames -> 4 mono bytes
        assert_eq!(sink.datagrams[0].len(), 4);
    }

    #[test]
    fn failed_send_does_not_advance_progress() {
        let plan = plan(8, 1, 16);
        let mut sink = RecordingSink {
            fail_on: [0, 1].into_iter().collect(),
            ..Default::default()
        };
        let report = run(&mut ScriptedSource::full_blocks(), &mut sink, &plan).unwrap();

        assert_eq!(report.blocks_failed, 2);
        assert_eq!(report.blocks_sent, 2);
        assert_eq!(report.reads, 4);
        assert_eq!(report.bytes_sent, 16);
        assert!(report.sentinel_sent);
        assert_eq!(sink.datagrams.last().unwrap().as_slice(), END_OF_STREAM);
    }

    #[test]
    fn attempted_accounting_counts_failed_sends() {
        let mut plan = plan(8, 1, 16);
        plan.accounting = ProgressAccounting::Attempted;
        let mut sink = RecordingSink {
            fail_on: [1].into_iter().collect(), // the last audio block
            ..Default::default()
        };
        let report = run(&mut ScriptedSource::full_blocks(), &mut sink, &plan).unwrap();

        assert_eq!(report.reads, 2);
        assert_eq!(report.progress_bytes, 16);
        assert_eq!(report.bytes_sent, 8);
        // marker still goes out after a failed final block
        assert!(report.sentinel_sent);
        assert_eq!(sink.datagrams.len(), 2);
        assert_eq!(sink.datagrams[1].as_slice(), END_OF_STREAM);
    }

    #[test]
    fn sentinel_failure_is_not_fatal() {
        let plan = plan(8, 1, 16);
        let mut sink = RecordingSink {
            fail_on: [2].into_iter().collect(),
            ..Default::default()
        };
        let report = run(&mut ScriptedSource::full_blocks(), &mut sink, &plan).unwrap();
        assert!(!report.sentinel_sent);
        assert_eq!(sink.calls, 3);
        assert!(sink.datagrams.iter().all(|d| d.as_slice() != END_OF_STREAM));
    }

    #[test]
    fn read_error_stops_without_marker() {
        let plan = plan(8, 1, 16);
        let mut source = ScriptedSource::with(vec![Step::Bytes(16), Step::Fail]);
        let mut sink = RecordingSink::default();
        let err = run(&mut source, &mut sink, &plan).unwrap_err();

        assert!(matches!(err, CaptureError::File(_)));
        assert_eq!(sink.datagrams.len(), 1);
        assert!(sink.datagrams.iter().all(|d| d.as_slice() != END_OF_STREAM));
    }
}
