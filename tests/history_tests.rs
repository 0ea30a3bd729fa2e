use forecast_monitor::history::{ObservationHistory, SharedHistory};
use forecast_monitor::model::observation::Observation;

#[test]
fn rejects_out_of_order_and_invalid_observations() {
    let mut h = ObservationHistory::with_capacity(10);
    assert!(h.push(Observation::new(1_000, 10.0)));
    assert!(h.push(Observation::new(1_000, 10.5)));
    assert!(!h.push(Observation::new(999, 11.0)));
    assert!(!h.push(Observation::new(2_000, 0.0)));
    assert!(!h.push(Observation::new(2_000, f64::NAN)));
    assert_eq!(h.len(), 2);
    assert_eq!(h.latest().map(|o| o.price), Some(10.5));
}

#[test]
fn capacity_drops_the_oldest() {
    let mut h = ObservationHistory::with_capacity(3);
    for i in 0..5u64 {
        h.push(Observation::new(i, 1.0 + i as f64));
    }
    let prices: Vec<f64> = h.iter().map(|o| o.price).collect();
    assert_eq!(prices, vec![3.0, 4.0, 5.0]);
}

#[test]
fn only_one_writer_at_a_time() {
    let shared = SharedHistory::new("btcusdt", 100);
    assert_eq!(shared.symbol(), "BTCUSDT");

    let writer = shared.claim_writer().expect("first writer");
    assert!(shared.claim_writer().is_err());
    assert!(shared.clone().claim_writer().is_err());

    drop(writer);
    assert!(shared.claim_writer().is_ok());
}

#[test]
fn snapshots_are_detached_from_later_appends() {
    let shared = SharedHistory::new("BTCUSDT", 100);
    let writer = shared.claim_writer().unwrap();
    writer.append(Observation::new(1, 100.0)).unwrap();

    let before = shared.snapshot().unwrap();
    writer.append(Observation::new(2, 101.0)).unwrap();

    assert_eq!(before.len(), 1);
    assert_eq!(shared.snapshot().unwrap().len(), 2);
    assert_eq!(shared.len(), 2);
}

#[test]
fn readers_see_appends_from_another_thread() {
    let shared = SharedHistory::new("BTCUSDT", 1_000);
    let writer = shared.claim_writer().unwrap();
    let handle = std::thread::spawn(move || {
        for i in 0..200u64 {
            writer.append(Observation::new(i, 100.0 + i as f64)).unwrap();
        }
    });
    handle.join().unwrap();

    let snap = shared.snapshot().unwrap();
    assert_eq!(snap.len(), 200);
    assert!(snap.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));
    // Writer was dropped with the thread.
    assert!(shared.claim_writer().is_ok());
}
