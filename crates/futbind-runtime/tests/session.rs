mod support;

use futbind_runtime::{
    BindError, ContextState, ElementKind, HostArray, Input, Returned, Scalar, SessionConfig,
    Value,
};
use ndarray::{arr0, array, Array1, ArrayD};
use pretty_assertions::assert_eq;
use support::FakeLibrary;

fn scalars(returned: Returned) -> Vec<Scalar> {
    returned
        .into_values()
        .iter()
        .map(|v| v.as_scalar().expect("scalar output"))
        .collect()
}

fn host(values: ndarray::Array1<i64>) -> HostArray {
    HostArray::from(values)
}

#[test]
fn test_session_discovers_library() {
    let session = FakeLibrary::new().session();
    assert_eq!(session.state(), ContextState::Live);
    assert_eq!(session.backend(), Some("c"));

    let names: Vec<_> = session.entry_points().names().collect();
    assert_eq!(
        names,
        vec![
            "add_one",
            "sum",
            "prefix_sum",
            "add_sub",
            "double_matrix",
            "negate",
            "scale",
            "take_five",
            "make_pair",
            "split_pair",
            "mystery",
        ]
    );

    let signatures: Vec<String> = session
        .entry_points()
        .iter()
        .map(|e| e.signature().to_string())
        .collect();
    insta::assert_snapshot!(signatures.join("\n"), @r###"
    add_one(out i32, in i32)
    sum(out i64, in futhark_i64_1d)
    prefix_sum(out futhark_i64_1d, in futhark_i64_1d)
    add_sub(out i64, out i64, in i64, in i64)
    double_matrix(out futhark_i64_2d, in futhark_i64_2d)
    negate(out bool, in bool)
    scale(out futhark_f64_1d, in futhark_f64_1d, in f64)
    take_five(out i32, in futhark_i32_1d)
    make_pair(out futhark_opaque_pair, in i64, in i64)
    split_pair(out i64, out i64, in futhark_opaque_pair)
    mystery(out futhark_mystery, in i32)
    "###);
}

#[test]
fn test_registry_contents() {
    let session = FakeLibrary::new().session();
    let registry = session.registry();
    assert_eq!(registry.len(), 16);

    let matrix = registry.by_name("i64_2d").unwrap();
    assert_eq!(matrix.element(), Some(ElementKind::Int64));
    assert_eq!(matrix.rank(), Some(2));
    assert!(matrix.is_array());

    let pair = registry.by_name("opaque_pair").unwrap();
    assert!(!pair.is_array());
    assert!(pair.is_serializable());

    assert!(!registry.by_name("u8_2d").unwrap().is_array());
}

#[test]
fn test_scalar_entry_point() {
    let session = FakeLibrary::new().session();
    let returned = session.call("add_one", &[Input::from(5i32)]).unwrap();
    assert_eq!(scalars(returned), vec![Scalar::I32(6)]);

    // Scalars convert when the value fits
    let returned = session.call("add_one", &[Input::from(5i64)]).unwrap();
    assert_eq!(scalars(returned), vec![Scalar::I32(6)]);

    let err = session.call("add_one", &[Input::from(1i64 << 40)]).unwrap_err();
    assert!(matches!(err, BindError::Conversion { .. }), "{:?}", err);
}

#[test]
fn test_array_input_scalar_output() {
    let session = FakeLibrary::new().session();
    let xs = host(array![1, 2, 3]);
    let returned = session.call("sum", &[Input::Array(&xs)]).unwrap();
    assert!(matches!(returned, Returned::Single(Value::Scalar(Scalar::I64(6)))));
}

#[test]
fn test_multiple_outputs_in_declaration_order() {
    let session = FakeLibrary::new().session();
    let returned = session
        .call("add_sub", &[Input::from(5i64), Input::from(3i64)])
        .unwrap();
    assert!(matches!(returned, Returned::Tuple(_)));
    assert_eq!(scalars(returned), vec![Scalar::I64(8), Scalar::I64(2)]);
}

#[test]
fn test_opaque_output_round_trip() {
    let session = FakeLibrary::new().session();
    let xs = host(Array1::from_iter(1..=10));
    let handle = session
        .call("prefix_sum", &[Input::Array(&xs)])
        .unwrap()
        .into_single()
        .and_then(Value::into_opaque)
        .unwrap();

    let expected = host(array![1, 3, 6, 10, 15, 21, 28, 36, 45, 55]);
    assert_eq!(handle.type_name(), "i64_1d");
    assert_eq!(handle.shape().unwrap(), vec![10]);
    assert_eq!(session.from_foreign(&handle).unwrap(), expected);
    assert_eq!(handle.to_host().unwrap(), expected);
}

#[test]
fn test_handles_pass_through() {
    let session = FakeLibrary::new().session();
    let xs = host(Array1::from_iter(1..=10));
    let prefix = session
        .call("prefix_sum", &[Input::Array(&xs)])
        .unwrap()
        .into_single()
        .and_then(Value::into_opaque)
        .unwrap();

    let returned = session.call("sum", &[Input::Handle(&prefix)]).unwrap();
    assert_eq!(scalars(returned), vec![Scalar::I64(220)]);
}

#[test]
fn test_arrays_widen_losslessly() {
    let session = FakeLibrary::new().session();
    let small = HostArray::from(array![1i32, 2, 3]);
    let returned = session.call("sum", &[Input::Array(&small)]).unwrap();
    assert_eq!(scalars(returned), vec![Scalar::I64(6)]);

    let wide = HostArray::from(array![1u64, 2, 3]);
    let err = session.call("sum", &[Input::Array(&wide)]).unwrap_err();
    assert_eq!(
        err,
        BindError::conversion("cannot convert u64 array to i64 without loss")
    );
}

#[test]
fn test_transposed_input_is_read_logically() {
    let session = FakeLibrary::new().session();
    let matrix = array![[1i64, 2, 3], [4, 5, 6], [7, 8, 9]];
    let transposed = HostArray::from(matrix.clone().reversed_axes());
    assert!(!transposed.is_standard_layout());

    let doubled = session
        .call("double_matrix", &[Input::Array(&transposed)])
        .unwrap()
        .into_single()
        .and_then(Value::into_opaque)
        .unwrap();
    let expected = HostArray::from(matrix.reversed_axes().mapv(|x| x * 2));
    assert_eq!(doubled.shape().unwrap(), vec![3, 3]);
    assert_eq!(session.from_foreign(&doubled).unwrap(), expected);
}

#[test]
fn test_bool_and_float_entries() {
    let session = FakeLibrary::new().session();
    let returned = session.call("negate", &[Input::from(true)]).unwrap();
    assert_eq!(scalars(returned), vec![Scalar::Bool(false)]);

    let xs = HostArray::from(array![1.0f64, 2.0, 4.0]);
    let scaled = session
        .call("scale", &[Input::Array(&xs), Input::from(2i32)])
        .unwrap()
        .into_single()
        .and_then(Value::into_opaque)
        .unwrap();
    assert_eq!(
        session.from_foreign(&scaled).unwrap(),
        HostArray::from(array![2.0f64, 4.0, 8.0])
    );
}

#[test]
fn test_to_foreign_preserves_every_element_kind() {
    let session = FakeLibrary::new().session();
    let cases = vec![
        ("bool_1d", HostArray::from(array![true, false, true])),
        ("i8_1d", HostArray::from(array![-128i8, 0, 127])),
        ("i16_1d", HostArray::from(array![i16::MIN, -1, i16::MAX])),
        ("i32_1d", HostArray::from(array![i32::MIN, 0, i32::MAX])),
        ("i64_1d", HostArray::from(array![i64::MIN, 42, i64::MAX])),
        ("u8_1d", HostArray::from(array![0u8, 128, 255])),
        ("u16_1d", HostArray::from(array![0u16, 65535])),
        ("u32_1d", HostArray::from(array![0u32, u32::MAX])),
        ("u64_1d", HostArray::from(array![u64::MAX, 1])),
        ("f32_1d", HostArray::from(array![0.5f32, -1.25])),
        ("f64_1d", HostArray::from(array![f64::MIN_POSITIVE, -0.0, 1e300])),
    ];
    for (type_name, input) in cases {
        let handle = session.to_foreign(type_name, &input).unwrap();
        assert_eq!(session.from_foreign(&handle).unwrap(), input, "{}", type_name);
    }
}

#[test]
fn test_transposed_round_trip() {
    let session = FakeLibrary::new().session();
    let matrix = array![[1i64, 2, 3], [4, 5, 6], [7, 8, 9]];

    for input in [
        HostArray::from(matrix.clone()),
        HostArray::from(matrix.reversed_axes()),
    ] {
        let handle = session.to_foreign("i64_2d", &input).unwrap();
        let back = session.from_foreign(&handle).unwrap();
        assert!(back.is_standard_layout());
        assert_eq!(back, input);
    }
}

#[test]
fn test_rank_zero_arrays() {
    let session = FakeLibrary::new().session();
    let scalar = session.registry().by_name("i64_0d").unwrap();
    assert_eq!(scalar.rank(), Some(0));
    assert!(scalar.is_array());

    let input = HostArray::from(arr0(42i64));
    let handle = session.to_foreign("i64_0d", &input).unwrap();
    assert_eq!(handle.shape().unwrap(), Vec::<usize>::new());
    assert_eq!(session.from_foreign(&handle).unwrap(), input);
}

#[test]
fn test_empty_arrays() {
    let session = FakeLibrary::new().session();
    let empty = HostArray::from(ArrayD::<i64>::zeros(ndarray::IxDyn(&[0])));
    let returned = session.call("sum", &[Input::Array(&empty)]).unwrap();
    assert_eq!(scalars(returned), vec![Scalar::I64(0)]);

    let handle = session.to_foreign("i64_1d", &empty).unwrap();
    assert_eq!(handle.shape().unwrap(), vec![0]);
    assert!(session.from_foreign(&handle).unwrap().is_empty());
}

#[test]
fn test_store_and_restore() {
    let session = FakeLibrary::new().session();
    let pair = session
        .call("make_pair", &[Input::from(2i64), Input::from(3i64)])
        .unwrap()
        .into_single()
        .and_then(Value::into_opaque)
        .unwrap();

    let bytes = session.store(&pair).unwrap();
    assert_eq!(&bytes[..4], b"PAIR");
    assert_eq!(bytes.len(), 20);

    let restored = session.restore("opaque_pair", &bytes).unwrap();
    let returned = session.call("split_pair", &[Input::Handle(&restored)]).unwrap();
    assert_eq!(scalars(returned), vec![Scalar::I64(2), Scalar::I64(3)]);
}

#[test]
fn test_profiling_report() {
    let lib = FakeLibrary::new();
    let session = lib
        .session_with(&SessionConfig::new().profiling(true).device("fake"))
        .unwrap();

    session.pause_profiling().unwrap();
    assert_eq!(
        session.report().unwrap(),
        "{\"profiling\": true, \"paused\": true}"
    );
    session.unpause_profiling().unwrap();
    assert_eq!(
        session.report().unwrap(),
        "{\"profiling\": true, \"paused\": false}"
    );

    session.clear_caches().unwrap();
    assert!(support::events().contains(&"clear_caches"));
}

#[test]
fn test_config_from_toml() {
    let config = SessionConfig::from_toml_str(
        r#"
profiling = true

[tuning]
"main.group_size" = 256
"#,
    )
    .unwrap();
    let session = FakeLibrary::new().session_with(&config).unwrap();
    assert!(session.report().unwrap().contains("\"profiling\": true"));
}
