use heaplens_core::quantize::{Function, Key, Quantize, QuantizeError, Value};

#[test]
fn linear_double_bucket_boundaries() {
    let mut q = Quantize::linear_frequency_distribution("fill ratio", 0.0, 100.0, 20.0)
        .column("count", Function::Count)
        .build();
    for (id, v) in [(1u32, 25.0f64), (2, 0.0), (3, 150.0), (4, 20.0), (5, 100.0)] {
        q.add_value(Some(id), &[Value::Float(v), Value::Null]).unwrap();
    }
    let table = q.result();
    let keys: Vec<&Key> = table.rows.iter().map(|r| &r.key).collect();
    // 25 rounds up to the 40 boundary, 0 collapses into the lower
    // bound's bucket, 20 keeps its own boundary, 150 overflows.
    assert!(keys.contains(&&Key::Float(40.0f64.to_bits())));
    assert!(keys.contains(&&Key::Float(0.0f64.to_bits())));
    assert!(keys.contains(&&Key::Float(20.0f64.to_bits())));
    assert!(keys.contains(&&Key::Float(100.0f64.to_bits())));
    assert!(keys.contains(&&Key::Overflow));
    // Sorted ascending with the overflow bucket last.
    assert_eq!(table.rows.last().map(|r| &r.key), Some(&Key::Overflow));
}

#[test]
fn linear_long_bucket_boundaries() {
    let mut q = Quantize::linear_frequency_distribution_int("size", 0, 100, 20)
        .column("count", Function::Count)
        .build();
    for v in [25i64, 20, 0, 150] {
        q.add_value(None, &[Value::Int(v), Value::Null]).unwrap();
    }
    let table = q.result();
    let keys: Vec<&Key> = table.rows.iter().map(|r| &r.key).collect();
    assert_eq!(keys, vec![&Key::Int(0), &Key::Int(20), &Key::Int(40), &Key::Overflow]);
}

#[test]
fn empty_average_is_zero_not_an_error() {
    let mut q = Quantize::value_distribution(&["class"])
        .column("avg", Function::Average)
        .column("avg int", Function::AverageInt)
        .build();
    q.add_value(None, &[Value::Text("C".into()), Value::Null, Value::Null]).unwrap();
    let table = q.result();
    assert_eq!(table.rows[0].values[0], Value::Float(0.0));
    assert_eq!(table.rows[0].values[1], Value::Int(0));
}

#[test]
fn count_includes_absent_contributions() {
    let mut q = Quantize::value_distribution(&["class"])
        .column("count", Function::Count)
        .column("sum", Function::SumInt)
        .build();
    q.add_value(Some(7), &[Value::Text("C".into()), Value::Null, Value::Int(10)]).unwrap();
    q.add_value(Some(8), &[Value::Text("C".into()), Value::Null, Value::Null]).unwrap();
    let table = q.result();
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0].values[0], Value::Int(2));
    assert_eq!(table.rows[0].values[1], Value::Int(10));
    assert_eq!(table.rows[0].object_ids, vec![7, 8]);
}

#[test]
fn column_mismatch_is_rejected_up_front() {
    let mut q = Quantize::value_distribution(&["class"])
        .column("count", Function::Count)
        .build();
    let err = q.add_value(None, &[Value::Text("C".into())]).unwrap_err();
    match err {
        QuantizeError::ColumnMismatch { expected, got } => {
            assert_eq!(expected, 2);
            assert_eq!(got, 1);
        }
        other => panic!("expected column mismatch, got {:?}", other),
    }
}

#[test]
fn composite_keys_sort_lexicographically() {
    let mut q = Quantize::value_distribution(&["kind", "state"])
        .column("count", Function::Count)
        .build();
    for (kind, state) in [("b", 2i64), ("a", 2), ("b", 1), ("a", 1)] {
        q.add_value(None, &[Value::Text(kind.into()), Value::Int(state), Value::Null]).unwrap();
    }
    let table = q.result();
    let keys: Vec<Vec<Value>> = table.rows.into_iter().map(|r| r.key_values).collect();
    assert_eq!(
        keys,
        vec![
            vec![Value::Text("a".into()), Value::Int(1)],
            vec![Value::Text("a".into()), Value::Int(2)],
            vec![Value::Text("b".into()), Value::Int(1)],
            vec![Value::Text("b".into()), Value::Int(2)],
        ]
    );
}

#[test]
fn incomparable_keys_emit_unsorted() {
    let mut q = Quantize::value_distribution(&["key"])
        .column("count", Function::Count)
        .build();
    q.add_value(None, &[Value::Text("zz".into()), Value::Null]).unwrap();
    q.add_value(None, &[Value::Int(1), Value::Null]).unwrap();
    q.add_value(None, &[Value::Text("aa".into()), Value::Null]).unwrap();
    let table = q.result();
    // Mixed text and integer keys: insertion order is preserved rather
    // than failing the whole aggregation.
    assert_eq!(table.rows[0].key, Key::Text("zz".into()));
    assert_eq!(table.rows[1].key, Key::Int(1));
    assert_eq!(table.rows[2].key, Key::Text("aa".into()));
}

#[test]
fn min_max_track_extremes() {
    let mut q = Quantize::value_distribution(&["class"])
        .column("min", Function::MinInt)
        .column("max", Function::MaxInt)
        .build();
    for v in [5i64, -3, 12] {
        q.add_value(None, &[Value::Text("C".into()), Value::Int(v), Value::Int(v)]).unwrap();
    }
    let table = q.result();
    assert_eq!(table.rows[0].values[0], Value::Int(-3));
    assert_eq!(table.rows[0].values[1], Value::Int(12));
}

#[test]
fn bulk_ids_land_in_the_bucket() {
    let mut q = Quantize::value_distribution(&["class"])
        .column("count", Function::Count)
        .build();
    q.add_values(&[1, 2, 3], &[Value::Text("C".into()), Value::Null]).unwrap();
    let table = q.result();
    assert_eq!(table.rows[0].object_ids, vec![1, 2, 3]);
}
