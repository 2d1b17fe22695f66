use super::*;

#[test]
fn test_query_all_rows_sorted() {
    let dataset = x_dataset(&[20, 0, 10], &[3.0, 1.0, 2.0]);

    let view = engine().execute(&dataset, &QueryRequest::default()).unwrap();

    assert_eq!(seconds_of(&view), vec![0, 10, 20]);
    assert_eq!(column(&view, "x"), vec![Some(1.0), Some(2.0), Some(3.0)]);
    assert_eq!(view.latest_timestamp(), Some(at(20)));
}

#[test]
fn test_empty_snapshot_gives_empty_view() {
    let view = engine()
        .execute(&Dataset::empty(), &QueryRequest::new(None, None, Some("1min")))
        .unwrap();

    assert!(view.is_empty());
    assert_eq!(view.latest_timestamp(), None);
}

#[test]
fn test_range_is_inclusive_on_both_bounds() {
    let dataset = ten_minutes();

    let view = engine()
        .execute(&dataset, &QueryRequest::new(Some(at(100)), Some(at(150)), None))
        .unwrap();

    assert_eq!(seconds_of(&view), vec![100, 110, 120, 130, 140, 150]);
}

#[test]
fn test_start_before_nanosecond_range_is_open() {
    let start = parse_bound("1600-01-01").unwrap();

    let view = engine()
        .execute(&ten_minutes(), &QueryRequest::new(Some(start), None, Some("1min")))
        .unwrap();

    assert_eq!(view.num_rows(), 10);
    assert_eq!(seconds_of(&view)[0], 0);

    let view = engine()
        .execute(&ten_minutes(), &QueryRequest::new(Some(start), None, None))
        .unwrap();
    assert_eq!(view.num_rows(), 60);
}

#[test]
fn test_range_containment() {
    let dataset = ten_minutes();
    let (start, end) = (at(95), at(305));

    for freq in [None, Some("1min"), Some("1s"), Some("bogus")] {
        let view = engine()
            .execute(&dataset, &QueryRequest::new(Some(start), Some(end), freq))
            .unwrap();
        assert!(view.timestamps().iter().all(|t| start <= *t && *t <= end));
        assert!(view.num_rows() <= 21);
    }
}

#[test]
fn test_partial_first_bin_is_stamped_with_range_start() {
    let dataset = ten_minutes();

    let view = engine()
        .execute(&dataset, &QueryRequest::new(Some(at(95)), Some(at(239)), Some("1min")))
        .unwrap();

    assert_eq!(seconds_of(&view), vec![95, 120, 180]);
    assert_eq!(column(&view, "x"), vec![Some(10.5), Some(14.5), Some(20.5)]);
}

#[test]
fn test_resample_to_coarser_bins() {
    let dataset = ten_minutes();

    let view = engine()
        .execute(&dataset, &QueryRequest::new(None, None, Some("1min")))
        .unwrap();

    assert_eq!(view.num_rows(), 10);
    assert_eq!(seconds_of(&view), (0..10).map(|k| k * 60).collect::<Vec<_>>());
    let expected: Vec<Option<f64>> = (0..10).map(|k| Some(6.0 * k as f64 + 2.5)).collect();
    assert_eq!(column(&view, "x"), expected);
    assert_eq!(view.resample_interval(), Some(chrono::TimeDelta::minutes(1)));
}

#[test]
fn test_upsampling_is_skipped() {
    let dataset = ten_minutes();

    for freq in ["1s", "10s", "10 SECONDS"] {
        let view = engine()
            .execute(&dataset, &QueryRequest::new(None, None, Some(freq)))
            .unwrap();
        assert_eq!(view.num_rows(), 60, "frequency {freq}");
        assert_eq!(view.resample_interval(), None);
    }
}

#[test]
fn test_invalid_frequency_degrades_to_no_resampling() {
    let dataset = ten_minutes();

    let view = engine()
        .execute(&dataset, &QueryRequest::new(None, None, Some("every now and then")))
        .unwrap();

    assert_eq!(view.num_rows(), 60);
}

#[test]
fn test_native_interval_uses_full_history() {
    // Dense only inside the queried window; the history median is 60s.
    let mut seconds: Vec<i64> = (0..20).map(|i| i * 60).collect();
    seconds.extend([1201, 1202, 1203]);
    let x: Vec<f64> = seconds.iter().map(|&s| s as f64).collect();
    let dataset = x_dataset(&seconds, &x);

    let view = engine()
        .execute(&dataset, &QueryRequest::new(Some(at(1200)), None, Some("30s")))
        .unwrap();

    assert_eq!(view.num_rows(), 3);
}

#[test]
fn test_tag_columns_are_dropped() {
    let dataset = x_dataset(&[0, 10], &[1.0, 2.0]);

    let view = engine().execute(&dataset, &QueryRequest::default()).unwrap();

    assert!(!view.column_names().contains(&"partition".to_string()));
    assert!(view.column_names().contains(&"x".to_string()));
}

#[test]
fn test_non_numeric_columns_take_first_value_in_bin() {
    let dataset = ten_minutes();
    let labels: Vec<Option<&str>> = (0..60)
        .map(|i| if i % 6 == 0 { None } else { Some(if i < 30 { "early" } else { "late" }) })
        .collect();
    let dataset = dataset
        .with_column("label", Arc::new(StringArray::from(labels)))
        .unwrap();

    let resampled = resample(&dataset, "1min".parse().unwrap(), None).unwrap();

    let label = resampled.column("label").unwrap();
    let label = label.as_any().downcast_ref::<StringArray>().unwrap();
    assert_eq!(label.len(), 10);
    assert_eq!(label.value(0), "early");
    assert_eq!(label.value(9), "late");
}

#[test]
fn test_query_does_not_touch_snapshot() {
    let dataset = sensor_dataset(&[0, 60], &[Some(1.0), Some(2.0)], &[Some(8.0), Some(8.2)]);
    let before = dataset.clone();

    let view = engine().execute(&dataset, &QueryRequest::default()).unwrap();

    assert_eq!(dataset, before);
    assert!(dataset.column("ph_total_ma").is_none());
    assert!(view.column_names().contains(&"ph_total_ma".to_string()));
}

#[test]
fn test_bins_anchor_to_first_day_midnight() {
    // Day one starts at 86_400 s, which is not a multiple of seven minutes.
    let seconds: Vec<i64> = (0..14).map(|i| 86_400 + i * 60).collect();
    let x: Vec<f64> = (0..14).map(|i| i as f64).collect();
    let dataset = x_dataset(&seconds, &x);

    let view = engine()
        .execute(&dataset, &QueryRequest::new(None, None, Some("7min")))
        .unwrap();

    assert_eq!(seconds_of(&view), vec![86_400, 86_820]);
    assert_eq!(column(&view, "x"), vec![Some(3.0), Some(10.0)]);
}
