//! Teardown-ordering contract of the service stop sequence.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ndarray::Array2;
use parking_lot::Mutex;

use daq_comm::{ChunkReceiver, CommKind, CommWorker, DrainPolicy, Received};
use daq_core::Result;
use daq_service::{AcquisitionService, ServiceSetup, ServiceState};
use daq_stimulus::{ChunkSource, Waveform};
use daq_task::{ChannelGroup, PortDirection, SampleSink, SampleSource, TriggerEdge};

type EventLog = Arc<Mutex<Vec<String>>>;

fn log(events: &EventLog, event: impl Into<String>) {
    events.lock().push(event.into());
}

struct SpySource {
    events: EventLog,
    trigger: Arc<TriggerEdge>,
    produced: u64,
}

impl SampleSource for SpySource {
    fn start(&mut self) -> Result<()> {
        self.trigger.fire();
        Ok(())
    }
    fn read_chunk(&mut self, _timeout: Duration) -> Result<Option<Array2<f64>>> {
        // Continuous acquisition at a tame test rate.
        std::thread::sleep(Duration::from_millis(2));
        self.produced += 8;
        Ok(Some(Array2::zeros((8, 1))))
    }
    fn stop(&mut self) -> Result<()> {
        log(&self.events, "input.stop");
        Ok(())
    }
    fn clear(&mut self) -> Result<()> {
        log(&self.events, "input.clear");
        Ok(())
    }
    fn samples_acquired(&self) -> u64 {
        self.produced
    }
    fn is_done(&self) -> Result<bool> {
        Ok(false)
    }
    fn start_trigger(&self) -> Arc<TriggerEdge> {
        Arc::clone(&self.trigger)
    }
}

struct SpySink {
    events: EventLog,
    label: String,
}

impl SampleSink for SpySink {
    fn arm(&mut self, _start_trigger: Option<Arc<TriggerEdge>>) -> Result<()> {
        Ok(())
    }
    fn write_chunk(&mut self, _chunk: &Waveform) -> Result<()> {
        std::thread::sleep(Duration::from_millis(2));
        Ok(())
    }
    fn stop(&mut self) -> Result<()> {
        log(&self.events, format!("{}.stop", self.label));
        Ok(())
    }
    fn clear(&mut self) -> Result<()> {
        log(&self.events, format!("{}.clear", self.label));
        Ok(())
    }
    fn samples_written(&self) -> u64 {
        0
    }
}

struct SpySequencer {
    events: EventLog,
    label: String,
    closed: bool,
}

impl ChunkSource for SpySequencer {
    fn next_chunk(&mut self) -> Option<Arc<Waveform>> {
        if self.closed {
            return None;
        }
        Some(Arc::new(Waveform::new(Array2::zeros((8, 1))).unwrap()))
    }
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            log(&self.events, format!("{}.close", self.label));
        }
    }
}

fn stop_counting_worker(name: &str, stops: Arc<AtomicU32>) -> CommWorker {
    CommWorker::new(name, CommKind::Queue, move |rx: ChunkReceiver| loop {
        match rx.recv_timeout(Duration::from_millis(10)) {
            Received::Stop => {
                stops.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Received::Chunk(_) | Received::Empty => {}
        }
    })
}

fn in_group() -> ChannelGroup {
    ChannelGroup::new(
        "dev1",
        vec!["ai0".into()],
        PortDirection::AnalogInput,
        1000.0,
        Some(8),
    )
    .unwrap()
}

fn out_group() -> ChannelGroup {
    ChannelGroup::new(
        "dev1",
        vec!["ao0".into()],
        PortDirection::AnalogOutput,
        1000.0,
        Some(8),
    )
    .unwrap()
}

fn build_service(
    events: &EventLog,
    stops: &[Arc<AtomicU32>],
) -> AcquisitionService {
    let service = AcquisitionService::new(
        "stop-order",
        DrainPolicy {
            poll_interval: Duration::from_millis(5),
            stall_polls: 3,
            max_wait: Duration::from_secs(2),
        },
    );

    let input: (ChannelGroup, Box<dyn SampleSource>) = (
        in_group(),
        Box::new(SpySource {
            events: Arc::clone(events),
            trigger: TriggerEdge::new(),
            produced: 0,
        }),
    );

    let outputs: Vec<(ChannelGroup, Box<dyn SampleSink>, Box<dyn ChunkSource>)> = (0..2)
        .map(|i| {
            (
                out_group(),
                Box::new(SpySink {
                    events: Arc::clone(events),
                    label: format!("output{}", i),
                }) as Box<dyn SampleSink>,
                Box::new(SpySequencer {
                    events: Arc::clone(events),
                    label: format!("sequencer{}", i),
                    closed: false,
                }) as Box<dyn ChunkSource>,
            )
        })
        .collect();

    let workers = stops
        .iter()
        .enumerate()
        .map(|(i, counter)| stop_counting_worker(&format!("worker{}", i), Arc::clone(counter)))
        .collect();

    service
        .setup(ServiceSetup {
            input: Some(input),
            outputs,
            workers,
            total: None,
        })
        .unwrap();
    service
}

#[test]
fn sequencers_close_before_the_clock_owner_stops() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let stops = [Arc::new(AtomicU32::new(0)), Arc::new(AtomicU32::new(0))];
    let service = build_service(&events, &stops);

    service.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    service.finish(false).unwrap();
    assert_eq!(service.state(), ServiceState::Stopped);

    let recorded = events.lock().clone();
    let position = |needle: &str| {
        recorded
            .iter()
            .position(|e| e == needle)
            .unwrap_or_else(|| panic!("event '{}' missing from {:?}", needle, recorded))
    };

    // Both sequencers close strictly before any hardware stop, and the
    // clock-owning input stops after every output.
    let input_stop = position("input.stop");
    for i in 0..2 {
        assert!(position(&format!("sequencer{}.close", i)) < position(&format!("output{}.stop", i)));
        assert!(position(&format!("output{}.stop", i)) < input_stop);
        // stop faults must not skip clear
        assert!(position(&format!("output{}.clear", i)) < input_stop);
    }
    assert!(input_stop < position("input.clear"));

    // Every worker saw exactly one stop sentinel.
    for counter in &stops {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn racing_finishes_produce_exactly_one_teardown() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let stops = [Arc::new(AtomicU32::new(0))];
    let service = Arc::new(build_service(&events, &stops));

    service.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));

    // Operator teardown racing a deadline teardown.
    let contenders: Vec<_> = (0..2)
        .map(|_| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || service.finish(false).unwrap())
        })
        .collect();
    for contender in contenders {
        contender.join().unwrap();
    }

    let recorded = events.lock().clone();
    assert_eq!(
        recorded.iter().filter(|e| *e == "input.stop").count(),
        1,
        "teardown ran more than once: {:?}",
        recorded
    );
    assert_eq!(stops[0].load(Ordering::SeqCst), 1);
}
