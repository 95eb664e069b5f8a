//! CLI round-trip test: CSV and JSON inputs in a temp directory, through
//! the prepare command, to a written output table.

use metab_prep::cli::args::{Args, Commands, PrepareArgs};
use metab_prep::cli::commands;
use std::fs;
use std::path::PathBuf;

fn write_fixture_inputs(dir: &std::path::Path) -> (PathBuf, PathBuf, PathBuf) {
    let input = dir.join("records.csv");
    let mut rows = String::from("region,site,DateTime_UTC,variable,value,flagtype,flagcomment\n");
    for i in 0..96 {
        let minutes = i * 15;
        let hh = minutes / 60;
        let mm = minutes % 60;
        let timestamp = format!("2023-06-01T{:02}:{:02}:00Z", hh, mm);
        rows.push_str(&format!(
            "NC,Eno,{},DO_mgL,{:.3},,\n",
            timestamp,
            8.0 + (i as f64) * 0.001
        ));
        rows.push_str(&format!("NC,Eno,{},WaterTemp_C,19.5,,\n", timestamp));
        rows.push_str(&format!(
            "NC,Eno,{},Level_m,{:.3},,\n",
            timestamp,
            0.1 + 0.002 * i as f64
        ));
    }
    // One flagged row the default config blanks.
    rows.push_str("NC,Eno,2023-06-01T00:00:00Z,Light_PAR,0.0,Bad Data,sensor fouled\n");
    fs::write(&input, rows).unwrap();

    let site = dir.join("site.json");
    fs::write(
        &site,
        r#"{"region": "NC", "site": "Eno", "lat": 36.02, "lon": -78.98}"#,
    )
    .unwrap();

    let config = dir.join("prep.toml");
    fs::write(
        &config,
        r#"
            estimate_par = true

            [rating_curve]
            form = "power"

            [rating_curve.calibration_pairs]
            z = [0.1, 0.2, 0.3]
            q = [0.5, 1.1, 2.0]
        "#,
    )
    .unwrap();

    (input, site, config)
}

#[test]
fn test_prepare_command_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (input, site, config) = write_fixture_inputs(dir.path());
    let output = dir.path().join("prepared.csv");

    let args = Args {
        command: Some(Commands::Prepare(PrepareArgs {
            input,
            site,
            config: Some(config),
            output: output.clone(),
            interval: None,
            verbose: false,
        })),
    };
    commands::run(args).expect("prepare command should succeed");

    let written = fs::read_to_string(&output).unwrap();
    let mut lines = written.lines();
    let header = lines.next().unwrap();
    assert_eq!(
        header,
        "solar_time,DO_obs,DO_sat,depth,temp_water,light,discharge"
    );
    // Header plus one row per grid timestamp.
    assert_eq!(lines.count(), 96);
}

#[test]
fn test_prepare_command_rejects_bad_interval_override() {
    let dir = tempfile::tempdir().unwrap();
    let (input, site, config) = write_fixture_inputs(dir.path());

    let args = Args {
        command: Some(Commands::Prepare(PrepareArgs {
            input,
            site,
            config: Some(config),
            output: dir.path().join("prepared.csv"),
            interval: Some("7 min".to_string()),
            verbose: false,
        })),
    };
    assert!(commands::run(args).is_err());
}
