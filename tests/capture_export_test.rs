//! End-to-end tests: capture through the registry, reload, export, clean up.

use plc_telemetry::data::channel::ChannelSettings;
use plc_telemetry::data::export::ExportFormat;
use plc_telemetry::data::mat::{self, matrix_payload_len, HEADER_LEN, MX_DOUBLE_CLASS};
use plc_telemetry::data::registry::ChannelRegistry;
use plc_telemetry::source::{run_capture, Namespace, SyntheticSource};

#[tokio::test]
async fn test_unequal_channels_export_to_csv_and_mat() {
    let spill = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let mut registry = ChannelRegistry::new(ChannelSettings::new(4, spill.path()));
    registry.register_fast("short").unwrap();
    registry.register_fast("Task[1].Cycle").unwrap();

    for i in 1..=5 {
        registry.add_sample("short", f64::from(i)).await.unwrap();
    }
    for i in 1..=7 {
        registry
            .add_sample("Task[1].Cycle", f64::from(i) * 10.0)
            .await
            .unwrap();
    }

    let loaded = registry.load_all().await.unwrap();
    let base = out.path().join("run");
    let written = registry
        .export(&loaded, &base, &ExportFormat::ALL, None)
        .await
        .unwrap();
    assert_eq!(written.len(), 2);

    // CSV: truncated to the shortest channel
    let csv = tokio::fs::read_to_string(out.path().join("run.csv"))
        .await
        .unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], "short,Task[1].Cycle");
    assert_eq!(lines[1], "1.0,10.0");
    assert_eq!(lines[5], "5.0,50.0");

    // MAT: each channel keeps its own length
    let bytes = tokio::fs::read(out.path().join("run.mat")).await.unwrap();
    let header = mat::read_header(&bytes).unwrap();
    assert_eq!(header.version, [0x00, 0x01]);
    assert_eq!(&header.endian, b"IM");

    let matrices = mat::read_matrices(&bytes).unwrap();
    assert_eq!(matrices.len(), 2);
    assert_eq!(matrices[0].name, "short");
    assert_eq!((matrices[0].rows, matrices[0].cols), (5, 1));
    assert_eq!(matrices[1].name, "Task_1__Cycle");
    assert_eq!((matrices[1].rows, matrices[1].cols), (7, 1));
    assert_eq!(matrices[1].values, vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0]);
    assert!(matrices.iter().all(|m| m.class == MX_DOUBLE_CLASS));

    let expected_len = HEADER_LEN as u64
        + 8
        + matrix_payload_len("short".len(), 5, 1).unwrap()
        + 8
        + matrix_payload_len("Task_1__Cycle".len(), 7, 1).unwrap();
    assert_eq!(bytes.len() as u64, expected_len);
}

#[tokio::test]
async fn test_long_capture_is_reproduced_exactly() {
    let spill = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let names = ["MAIN.fPosition", "MAIN.fVelocity", "MAIN.fCurrent"];
    let mut registry = ChannelRegistry::new(ChannelSettings::new(64, spill.path()));
    for name in names {
        registry.register_fast(name).unwrap();
    }

    let ticks = 20_000;
    let mut source = SyntheticSource::new(names, ticks);
    run_capture(&registry, &mut source, None, Namespace::Fast)
        .await
        .unwrap();

    // Memory stays bounded by the ring capacity
    for name in names {
        let channel = registry.channel(name).unwrap();
        assert!(channel.lock().await.buffered() < 64);
    }

    let loaded = registry.load_all().await.unwrap();
    for (index, name) in names.iter().enumerate() {
        let history = loaded.get(name).unwrap();
        assert_eq!(history.data_length, ticks as usize);
        for (tick, value) in history.samples().iter().enumerate() {
            assert_eq!(*value, SyntheticSource::value_at(index, tick as u64));
        }
    }

    let base = out.path().join("long");
    registry
        .export(&loaded, &base, &[ExportFormat::Mat], None)
        .await
        .unwrap();
    let bytes = tokio::fs::read(out.path().join("long.mat")).await.unwrap();
    let matrices = mat::read_matrices(&bytes).unwrap();
    assert_eq!(matrices[0].name, "MAIN_fPosition");
    assert_eq!(matrices[2].values.len(), ticks as usize);
    assert_eq!(matrices[2].values.as_slice(), loaded.get("MAIN.fCurrent").unwrap().samples());
}

#[tokio::test]
async fn test_cleanup_releases_files_and_storage() {
    let spill = tempfile::tempdir().unwrap();
    let mut registry = ChannelRegistry::new(ChannelSettings::new(8, spill.path()));
    registry.register_fast("a").unwrap();
    registry.register_fast("b").unwrap();
    registry.register_slow("a").unwrap();

    let mut fast = SyntheticSource::new(["a", "b"], 100);
    run_capture(&registry, &mut fast, None, Namespace::Fast)
        .await
        .unwrap();
    let mut slow = SyntheticSource::new(["a"], 3);
    run_capture(&registry, &mut slow, None, Namespace::Slow)
        .await
        .unwrap();

    let loaded = registry.load_all().await.unwrap();
    let snapshot = registry.slow_snapshot();
    assert_eq!(snapshot.get("a").unwrap().data_length, 3);
    drop(loaded);
    drop(snapshot);

    assert_eq!(registry.delete_all_backing_files().await.unwrap(), 2);
    let pools = registry.pools().clone();
    registry.remove_all_channels();
    registry.remove_all_slow();

    assert_eq!(pools.samples.outstanding(), 0);
    assert_eq!(pools.bytes.outstanding(), 0);
    let mut entries = tokio::fs::read_dir(spill.path()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}
