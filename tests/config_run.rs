//! A bench configuration file driven all the way to CSV result files.

use std::fs;
use std::sync::Arc;
use tempchar_daq::adapters::MockTransport;
use tempchar_daq::measurement::{MeasurementContext, Orchestrator, RunRequest};
use tempchar_daq::{BenchConfig, CancelToken};

fn bench_toml(output_dir: &str) -> String {
    format!(
        r#"
[application]
name = "bench"
output_dir = "{output_dir}"
file_stem = "lot42"

[protocol]
opc_poll_interval_ms = 1
reset_timeout_ms = 50

[timing]
output_settle_ms = 0
value_settle_ms = 0

[[instruments]]
role_id = "SOURCE1"
bus_address = "GPIB0::5::INSTR"
display_name = "B2902A"

[[instruments]]
role_id = "DMM1"
bus_address = "GPIB0::22::INSTR"
display_name = "34461A"

[[tabs]]
name = "Item1"

[tabs.settings.SOURCE1]
kind = "source"
action = "Constant1"
function = "const"
mode = "VOLT"
value = {{ value = 2, unit = "V" }}
range = "2V"
limit = {{ value = 100, unit = "mA" }}

[tabs.settings.DMM1]
kind = "dmm"
mode = "DC_VOLT"

[tabs.settings.VI]
kind = "vi"
standby_time = {{ value = 1, unit = "ms" }}
"#
    )
}

#[tokio::test]
async fn test_vi_run_from_config_writes_csv() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results");
    let config_path = dir.path().join("bench.toml");
    fs::write(&config_path, bench_toml(&output.display().to_string())).unwrap();

    let config = BenchConfig::load_from(&config_path).unwrap();
    let tabs = config.tab_configs().unwrap();
    let source = tabs[0].settings.iter().find(|(role, _)| role == "SOURCE1").unwrap();
    let source = source.1.as_source().unwrap();
    assert!((source.limit - 0.1).abs() < 1e-12);

    let transport = Arc::new(MockTransport::with_responder(|_, cmd| {
        (cmd == "READ?").then(|| "1.999".to_string())
    }));
    let ctx = MeasurementContext::with_csv(&config, transport.clone());
    let request = RunRequest::new(config.instruments.clone(), tabs).with_debug(config.debug);

    let rows = Orchestrator::vi(ctx)
        .run(request, &CancelToken::new())
        .await
        .unwrap();
    assert!(!rows.iter().any(|r| r.is_comment()));

    let result = fs::read_to_string(output.join("lot42_VIData.csv")).unwrap();
    let lines: Vec<&str> = result.lines().collect();
    assert_eq!(lines[0], "DeviceList");
    assert!(lines.contains(&"SOURCE1,GPIB0::5::INSTR,B2902A"));
    assert!(lines.contains(&"VISettings"));
    let data_at = lines.iter().position(|l| *l == "Data").unwrap();
    assert_eq!(lines.len(), data_at + 2);
    assert!(lines[data_at + 1].starts_with("Item1,"));
    assert!(lines[data_at + 1].ends_with(",1.999"));

    assert!(output.join("lot42_TempVIData.csv").exists());
    assert_eq!(
        transport.commands_for("GPIB0::22::INSTR").last().map(String::as_str),
        Some("GTL")
    );
}

#[test]
fn test_unknown_unit_is_a_configuration_error() {
    let toml = bench_toml("out").replace("unit = \"mA\"", "unit = \"parsec\"");
    let config = BenchConfig::load_from_str(&toml).unwrap();
    let err = config.tab_configs().unwrap_err();
    assert!(err.to_string().contains("SOURCE1"));
}
