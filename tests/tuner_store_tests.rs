use forecast_monitor::tuner::{
    JsonFileTunerStore, MemoryTunerStore, TunerConfig, TunerConfigStore,
};

#[test]
fn json_store_round_trips_per_symbol() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = JsonFileTunerStore::new(dir.path().join("tuner"));

    assert!(store.load("BTCUSDT").unwrap().is_none());

    let mut cfg = TunerConfig::new(0.8, 0.02, 0.15);
    cfg.last_updated_ms = Some(1_700_000_000_000);
    store.save("btcusdt", &cfg).expect("save");

    let path = store.path_for("BTCUSDT");
    assert!(path.ends_with("BTCUSDT.json"));
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"alert_threshold_pct\": 0.8"));

    assert_eq!(store.load("BTCUSDT").unwrap(), Some(cfg));
    assert!(store.load("ETHUSDT").unwrap().is_none());
}

#[test]
fn json_store_clamps_hand_edited_values() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = JsonFileTunerStore::new(dir.path());
    std::fs::write(
        store.path_for("BTCUSDT"),
        r#"{"alert_threshold_pct": 9.0, "process_noise": 0.0, "measurement_noise": 0.2}"#,
    )
    .unwrap();

    let cfg = store.load("BTCUSDT").unwrap().expect("config");
    assert_eq!(cfg.alert_threshold_pct, 2.0);
    assert_eq!(cfg.process_noise, 0.01);
    assert_eq!(cfg.measurement_noise, 0.2);
    assert_eq!(cfg.last_updated_ms, None);
}

#[test]
fn json_store_reports_corrupt_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = JsonFileTunerStore::new(dir.path());
    std::fs::write(store.path_for("BTCUSDT"), "not json").unwrap();
    let err = store.load("BTCUSDT").unwrap_err();
    assert!(format!("{:#}", err).contains("failed to parse tuner config"));
}

#[test]
fn memory_store_normalises_symbols() {
    let store = MemoryTunerStore::new();
    let cfg = TunerConfig::new(1.0, 0.03, 0.2);
    store.save(" ethusdt ", &cfg).unwrap();
    assert_eq!(store.load("ETHUSDT").unwrap(), Some(cfg));
}
