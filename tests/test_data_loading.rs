//! Integration test: recordings on disk to stacked windows

use std::fs;
use std::path::Path;
use timely_anomaly::data::{list_files, load_recording, FeatureRef, LvmOptions, Recording};
use timely_anomaly::error::TimelyError;
use timely_anomaly::preprocessing::{apply_scaler, fit_scaler, resample, ScalerType};
use timely_anomaly::windowing::prepare_data;

fn write_lvm(path: &Path, rows: &[[f64; 3]]) {
    let mut text = String::from(
        "LabVIEW Measurement\t\nSeparator\tTab\nDecimal_Separator\t.\n***End_of_Header***\t\n\n\
         Channels\t2\t\n***End_of_Header***\t\t\t\nX_Value\tAccel\tCurrent\tComment\n",
    );
    for row in rows {
        text.push_str(&format!("{}\t{}\t{}\n", row[0], row[1], row[2]));
    }
    fs::write(path, text).unwrap();
}

fn ramp(n: usize, offset: f64) -> Vec<[f64; 3]> {
    (0..n)
        .map(|i| [i as f64 * 1e-3, offset + i as f64, offset - i as f64])
        .collect()
}

#[test]
fn test_list_files_sorted_and_filtered() {
    let dir = tempfile::tempdir().unwrap();
    write_lvm(&dir.path().join("b.lvm"), &ramp(4, 0.0));
    write_lvm(&dir.path().join("a.lvm"), &ramp(4, 0.0));
    fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
    fs::create_dir(dir.path().join("nested.lvm")).unwrap();

    let files = list_files(dir.path(), "lvm").unwrap();
    let names: Vec<_> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.lvm", "b.lvm"]);

    // A leading dot in the extension is accepted
    assert_eq!(list_files(dir.path(), ".lvm").unwrap().len(), 2);
}

#[test]
fn test_list_files_missing_folder() {
    let err = list_files(Path::new("/nonexistent/state"), "lvm").unwrap_err();
    assert!(matches!(err, TimelyError::DataError(_)));
}

#[test]
fn test_load_lvm_and_select_features() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.lvm");
    write_lvm(&path, &ramp(5, 10.0));

    let rec = load_recording(&path, &LvmOptions::default()).unwrap();
    assert_eq!(rec.len(), 5);
    assert_eq!(rec.n_features(), 3);

    let selected = rec.select(&[FeatureRef::Index(2), FeatureRef::Index(1)]).unwrap();
    assert_eq!(selected.columns(), &["2".to_string(), "1".to_string()]);
    assert_eq!(selected.values()[[3, 0]], 7.0);
    assert_eq!(selected.values()[[3, 1]], 13.0);

    let named = load_recording(&path, &LvmOptions::default().with_channel_names(true)).unwrap();
    let current = named.select(&["Current".into()]).unwrap();
    assert_eq!(current.values()[[0, 0]], 10.0);

    assert!(matches!(
        named.select(&["Pressure".into()]),
        Err(TimelyError::FeatureNotFound(_))
    ));
}

#[test]
fn test_load_csv() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");
    fs::write(&path, "accel,current\n1,0.5\n2,1.5\n3,2.5\n").unwrap();

    let rec = load_recording(&path, &LvmOptions::default()).unwrap();
    assert_eq!(rec.columns(), &["accel".to_string(), "current".to_string()]);
    assert_eq!(rec.values()[[2, 1]], 2.5);
}

#[test]
fn test_unsupported_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.parquet");
    fs::write(&path, "").unwrap();
    assert!(load_recording(&path, &LvmOptions::default()).is_err());
}

#[test]
fn test_resample_scale_and_window() {
    let dir = tempfile::tempdir().unwrap();
    let paths = [dir.path().join("a.lvm"), dir.path().join("b.lvm")];
    write_lvm(&paths[0], &ramp(40, 0.0));
    write_lvm(&paths[1], &ramp(30, 5.0));

    let features = vec![FeatureRef::Index(1), FeatureRef::Index(2)];
    let recordings: Vec<Recording> = paths
        .iter()
        .map(|p| {
            let rec = load_recording(p, &LvmOptions::default()).unwrap();
            resample(&rec.select(&features).unwrap(), 2).unwrap()
        })
        .collect();
    assert_eq!(recordings[0].len(), 20);
    assert_eq!(recordings[1].len(), 15);
    // Mean of samples 0 and 1
    assert_eq!(recordings[0].values()[[0, 0]], 0.5);

    let scaler = fit_scaler(&recordings, ScalerType::MinMax).unwrap();
    let scaled = apply_scaler(&scaler, &recordings).unwrap();
    for rec in &scaled {
        assert!(rec.values().iter().all(|&v| (-1e-12..=1.0 + 1e-12).contains(&v)));
    }

    let (x, y) = prepare_data(&scaled, &[0, 1], 5, 1).unwrap();
    // (20 - 5) / 1 + 1 windows from the first file, (15 - 5) + 1 from the second
    assert_eq!(x.dim(), (16 + 11, 5, 2));
    assert_eq!(y.iter().filter(|&&l| l == 1).count(), 11);
    assert_eq!(x[[16, 0, 0]], scaled[1].values()[[0, 0]]);
}
