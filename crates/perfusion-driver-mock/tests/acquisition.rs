//! Mock sources driven against a real clock.

use std::thread;
use std::time::Duration;

use perfusion_core::{DataType, HardwareSource, SampleBuffer, StreamClock};
use perfusion_driver_mock::{factories, MockAnalogConfig, MockAnalogSource, Waveform};

#[test]
fn test_analog_batches_are_contiguous_and_stamped_per_sample() {
    let config = MockAnalogConfig {
        data_type: DataType::F64,
        sampling_period_ms: 2,
        samples_per_read: 4,
        waveform: Waveform::Ramp {
            start: 0.0,
            slope_per_s: 1000.0,
        },
        ..Default::default()
    };
    let mut source = MockAnalogSource::new("flow", config).unwrap();
    let clock = StreamClock::start();
    source.start(&clock).unwrap();

    thread::sleep(Duration::from_millis(40));

    let mut batches = Vec::new();
    while let Some(batch) = source.get_data() {
        batches.push(batch);
    }
    assert!(batches.len() >= 4, "only {} batches ready", batches.len());

    let first = batches[0].timestamp_ms;
    for (i, batch) in batches.iter().enumerate() {
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.timestamp_ms, first + 8 * i as i32);
        // Ramp of 1 unit per ms: the first value of read i is 8 * i.
        match &batch.values {
            SampleBuffer::F64(v) => assert!((v[0] - 8.0 * i as f64).abs() < 1e-9),
            other => panic!("unexpected buffer {other:?}"),
        }
    }
}

#[test]
fn test_seeded_gaps_are_reproducible() {
    let run = || {
        let config = MockAnalogConfig {
            sampling_period_ms: 1,
            gap_rate: 0.5,
            seed: Some(99),
            waveform: Waveform::Constant { value: 1.0 },
            ..Default::default()
        };
        let mut source = MockAnalogSource::new("flow", config).unwrap();
        source.start(&StreamClock::start()).unwrap();
        thread::sleep(Duration::from_millis(30));
        // Poll a fixed number of ready reads.
        (0..20).map(|_| source.get_data().is_some()).collect::<Vec<_>>()
    };
    let a = run();
    let b = run();
    assert_eq!(a, b);
    assert!(a.iter().any(|&ok| ok));
    assert!(a.iter().any(|&ok| !ok));
}

#[test]
fn test_factory_driver_types_are_unique() {
    let mut types: Vec<_> = factories().iter().map(|f| f.driver_type()).collect();
    types.sort_unstable();
    types.dedup();
    assert_eq!(types, vec!["mock_analog", "mock_gas_analyzer", "playback"]);
}
