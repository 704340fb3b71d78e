//! Full engine scenario: triggered playback of a finite playlist with a
//! lossless save consumer and a lossy display consumer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::Array2;
use parking_lot::Mutex;

use daq_comm::{ChunkReceiver, CommKind, CommWorker, DrainPolicy, Received, TimedChunk};
use daq_driver_mock::{MockProvider, MockSampleSink};
use daq_service::{AcquisitionService, ServiceSetup};
use daq_stimulus::{PlayOrder, PlaylistSequencer, Waveform};
use daq_task::{ChannelGroup, HardwareProvider, PortDirection, SampleSink};

fn waveform(samples: usize) -> Waveform {
    Waveform::new(Array2::from_elem((samples, 1), 1.0)).unwrap()
}

fn collecting_worker(
    name: &str,
    kind: CommKind,
    sink: Arc<Mutex<Vec<TimedChunk>>>,
    per_chunk_delay: Duration,
) -> CommWorker {
    CommWorker::new(name, kind, move |rx: ChunkReceiver| loop {
        match rx.recv_timeout(Duration::from_millis(10)) {
            Received::Chunk(chunk) => {
                sink.lock().push(chunk);
                std::thread::sleep(per_chunk_delay);
            }
            Received::Stop => return,
            Received::Empty => {}
        }
    })
}

#[test]
fn playlist_run_feeds_save_and_display_consumers() {
    let provider = MockProvider::new(false);

    // Playlist [A, B, C], no shuffle.
    let (len_a, len_b, len_c) = (300usize, 200usize, 100usize);
    let total_samples = (len_a + len_b + len_c) as u64;
    let sequencer = PlaylistSequencer::new(
        vec![waveform(len_a), waveform(len_b), waveform(len_c)],
        PlayOrder::Sequential,
        false,
        None,
    )
    .unwrap();
    assert_eq!(sequencer.pass_samples(), total_samples);

    let out_group = ChannelGroup::new(
        "mockdev",
        vec!["ao0".into()],
        PortDirection::AnalogOutput,
        1000.0,
        Some(50),
    )
    .unwrap();
    let out_sink = MockSampleSink::new(out_group.clone());
    let written_log = out_sink.written_log();

    let in_group = ChannelGroup::new(
        "mockdev",
        vec!["ai0".into(), "ai1".into()],
        PortDirection::AnalogInput,
        1000.0,
        Some(100),
    )
    .unwrap();
    let total = sequencer.total_duration(1000.0).unwrap();
    let input_total = (total.as_secs_f64() * 1000.0).round() as u64;
    assert_eq!(input_total, total_samples);
    let in_source = provider.input(&in_group, Some(input_total)).unwrap();

    let saved: Arc<Mutex<Vec<TimedChunk>>> = Arc::new(Mutex::new(Vec::new()));
    let displayed: Arc<Mutex<Vec<TimedChunk>>> = Arc::new(Mutex::new(Vec::new()));

    let service = AcquisitionService::new(
        "e2e",
        DrainPolicy {
            poll_interval: Duration::from_millis(5),
            stall_polls: 5,
            max_wait: Duration::from_secs(5),
        },
    );
    service
        .setup(ServiceSetup {
            input: Some((in_group, in_source)),
            outputs: vec![(
                out_group,
                Box::new(out_sink) as Box<dyn SampleSink>,
                Box::new(sequencer),
            )],
            workers: vec![
                collecting_worker("save", CommKind::Queue, Arc::clone(&saved), Duration::ZERO),
                // Slow, last-value consumer: allowed to miss frames.
                collecting_worker(
                    "display",
                    CommKind::Pipe,
                    Arc::clone(&displayed),
                    Duration::from_millis(15),
                ),
            ],
            total: Some(total),
        })
        .unwrap();

    service.start().unwrap();

    // Run until the finite acquisition winds down.
    let deadline = Instant::now() + Duration::from_secs(10);
    while service.is_busy() {
        assert!(Instant::now() < deadline, "acquisition never finished");
        std::thread::sleep(Duration::from_millis(10));
    }
    // Give the lossy consumer a beat before teardown.
    std::thread::sleep(Duration::from_millis(100));
    service.finish(false).unwrap();

    // Save consumer (lossless queue): every sample, in order.
    let saved = saved.lock();
    let saved_samples: usize = saved.iter().map(|c| c.data.samples()).sum();
    assert_eq!(saved_samples as u64, total_samples);
    for pair in saved.windows(2) {
        assert_eq!(pair[1].seq, pair[0].seq + 1, "queue consumer saw a gap");
        assert!(
            pair[1].timestamp >= pair[0].timestamp,
            "timestamps went backwards"
        );
    }

    // Display consumer (last-value pipe): at least one frame, no
    // invented frames, no corruption.
    let displayed = displayed.lock();
    assert!(!displayed.is_empty(), "display consumer never saw a frame");
    assert!(displayed.len() <= saved.len());
    let max_seq = saved.last().map(|c| c.seq).unwrap_or(0);
    for chunk in displayed.iter() {
        assert!(chunk.seq <= max_seq);
        assert_eq!(chunk.data.channels(), 2);
    }

    // The playlist was played out completely through the triggered sink.
    let written: usize = written_log.lock().iter().map(|w| w.samples()).sum();
    assert_eq!(written as u64, total_samples);
}
