//! A whole rig built from TOML: hardware sensors, calculated sensors and the
//! end-of-run sentinel.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use perfusion_daq::{
    config::PerfusionConfig, HardwareRegistry, PerfusionSystem, SampleBuffer, StreamState,
};
use tempfile::tempdir;

fn rig_toml(output_dir: &Path) -> String {
    format!(
        r#"
[application]
name = "Bench Rig"
log_level = "debug"

[storage]
output_dir = '{}'

[[hardware]]
name = "flow_probe"
driver = "playback"

[hardware.config]
data_type = "float32"
sampling_period_ms = 100
cycle_period_ms = 1
cycles = [
    {{ timestamp_ms = 0, values = [2.0, 4.0] }},
    {{ timestamp_ms = 200, values = [6.0, 8.0] }},
    {{ timestamp_ms = 400, values = [-1.0] }},
    {{ timestamp_ms = 500, values = [9.0] }},
]

[[hardware]]
name = "pressure_probe"
driver = "playback"

[hardware.config]
data_type = "float64"
sampling_period_ms = 100
cycle_period_ms = 1
cycles = [
    {{ timestamp_ms = 0, values = [2.0] }},
    {{ timestamp_ms = 250, values = [4.0] }},
]

[[hardware]]
name = "bga"
driver = "mock_gas_analyzer"
config = {{ sampling_period_ms = 5, seed = 7 }}

[[sensors]]
name = "Flow"
unit = "ml/min"
hardware = "flow_probe"
stop_sentinel = -1.0

[[sensors.strategies]]
name = "Raw"
kind = "pass_through"

[[sensors.strategies]]
name = "Avg"
kind = "moving_average"
window_len = 2

[[sensors]]
name = "Pressure"
unit = "mmHg"
hardware = "pressure_probe"

[[sensors.strategies]]
name = "Raw"
kind = "pass_through"

[[sensors]]
name = "BloodGas"
hardware = "bga"

[[sensors.strategies]]
name = "Raw"
kind = "pass_through"

[[sensors]]
name = "FlowCopy"
unit = "ml/min"
source = {{ kind = "reader", sensor = "Flow", output = "Raw", samples_per_calc = 2 }}

[[sensors.strategies]]
name = "Raw"
kind = "pass_through"

[[sensors]]
name = "Resistance"
unit = "ml/min/mmHg"

[sensors.source]
kind = "division"
dividend = {{ sensor = "Flow", output = "Raw" }}
divisor = {{ sensor = "Pressure", output = "Raw" }}

[[sensors.strategies]]
name = "Raw"
kind = "pass_through"
"#,
        output_dir.display()
    )
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        thread::sleep(Duration::from_millis(2));
    }
}

fn build(dir: &Path) -> PerfusionSystem {
    let config = PerfusionConfig::from_toml_str(&rig_toml(dir)).unwrap();
    let mut registry = HardwareRegistry::with_mock_drivers();
    registry.define_all(&config.hardware).unwrap();
    PerfusionSystem::from_config(&config, &registry).unwrap()
}

fn raw_count(system: &PerfusionSystem, sensor: &str) -> u64 {
    system
        .sensor(sensor)
        .unwrap()
        .reader("Raw")
        .unwrap()
        .record_count()
        .unwrap()
}

fn raw_values(system: &PerfusionSystem, sensor: &str) -> Vec<(i32, f64)> {
    system
        .sensor(sensor)
        .unwrap()
        .reader("Raw")
        .unwrap()
        .read_variable(0, 100, 0)
        .unwrap()
}

#[test]
fn test_rig_from_config() {
    let dir = tempdir().unwrap();
    let mut system = build(dir.path());
    assert_eq!(system.name(), "Bench Rig");
    assert_eq!(system.sensors().count(), 5);

    system.open_all().unwrap();
    for name in ["Flow", "Pressure", "BloodGas"] {
        system.sensor_mut(name).unwrap().start().unwrap();
    }

    // The sentinel batch is persisted, the batch after it never is.
    wait_for(|| system.sensor("Flow").unwrap().state() == StreamState::Stopped);
    wait_for(|| raw_count(&system, "Pressure") == 2);
    assert_eq!(
        raw_values(&system, "Flow"),
        vec![(0, 2.0), (100, 4.0), (200, 6.0), (300, 8.0), (400, -1.0)]
    );

    // Calculated sensors start once their inputs are complete.
    for name in ["FlowCopy", "Resistance"] {
        system.sensor_mut(name).unwrap().start().unwrap();
    }
    wait_for(|| raw_count(&system, "FlowCopy") == 5);
    wait_for(|| raw_count(&system, "Resistance") == 5);

    let copy = system.sensor("FlowCopy").unwrap().reader("Raw").unwrap();
    assert_eq!(copy.geometry().dtype, perfusion_daq::DataType::F32);
    assert_eq!(raw_values(&system, "FlowCopy"), raw_values(&system, "Flow"));

    // Flow and pressure have their own epochs, opened a moment apart; the
    // division pairs them on absolute time.
    assert_eq!(
        raw_values(&system, "Resistance"),
        vec![(0, 1.0), (100, 2.0), (200, 3.0), (300, 2.0), (400, -0.25)]
    );

    wait_for(|| raw_count(&system, "BloodGas") >= 2);
    let gas = system.sensor("BloodGas").unwrap().reader("Raw").unwrap();
    assert_eq!(gas.geometry().samples_per_timestamp(), 18);
    let ph = gas.read_named(0, 1, "arterial_pH").unwrap();
    assert!((ph[0].1 - 7.40).abs() < 0.2, "{ph:?}");

    let avg = system.sensor("Flow").unwrap().reader("Avg").unwrap();
    let last = avg.read_latest().unwrap().unwrap();
    assert_eq!(last.values, SampleBuffer::F64(vec![3.5]));

    system.close().unwrap();
    for sensor in system.sensors() {
        assert_eq!(sensor.state(), StreamState::Closed);
    }
    assert!(dir.path().join("Resistance_Raw.dat").exists());
    assert!(dir.path().join("Flow_Avg.dat").exists());
}

#[test]
fn test_undefined_hardware_is_error() {
    let dir = tempdir().unwrap();
    let config = PerfusionConfig::from_toml_str(&rig_toml(dir.path())).unwrap();
    // Drivers registered, but no hardware defined.
    let registry = HardwareRegistry::with_mock_drivers();
    let err = PerfusionSystem::from_config(&config, &registry).unwrap_err();
    assert!(format!("{err:#}").contains("flow_probe"), "{err:#}");
}

#[test]
fn test_geometry_override_mismatch_is_error() {
    let dir = tempdir().unwrap();
    let text = rig_toml(dir.path()).replacen(
        "hardware = \"flow_probe\"",
        "hardware = \"flow_probe\"\nsamples_per_timestamp = 4",
        1,
    );
    let config = PerfusionConfig::from_toml_str(&text).unwrap();
    let mut registry = HardwareRegistry::with_mock_drivers();
    registry.define_all(&config.hardware).unwrap();
    let err = PerfusionSystem::from_config(&config, &registry).unwrap_err();
    assert!(format!("{err:#}").contains("Flow"), "{err:#}");
}

#[test]
fn test_shipped_config_builds() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/perfusion.toml");
    let config = PerfusionConfig::load_from(path).unwrap();
    config.validate().unwrap();

    let mut registry = HardwareRegistry::with_mock_drivers();
    registry.define_all(&config.hardware).unwrap();
    let system = PerfusionSystem::from_config(&config, &registry).unwrap();
    let conductance = system.sensor("Conductance").unwrap();
    assert_eq!(
        conductance.metadata().geometry,
        perfusion_daq::Geometry::point(perfusion_daq::DataType::F64)
    );
}
