mod support;

use futbind_runtime::{
    BindError, ContextState, FfiError, HostArray, Input, SessionConfig, Value,
};
use ndarray::array;
use pretty_assertions::assert_eq;
use support::{clear_events, events, live_objects, FakeLibrary};

#[test]
fn test_call_temporaries_are_released() {
    let session = FakeLibrary::new().session();
    let before = live_objects();

    let xs = HostArray::from(array![1i64, 2, 3]);
    session.call("sum", &[Input::Array(&xs)]).unwrap();
    assert_eq!(live_objects(), before);
}

#[test]
fn test_outputs_released_on_drop() {
    let session = FakeLibrary::new().session();
    let before = live_objects();

    let xs = HostArray::from(array![4i64, 5]);
    let returned = session.call("prefix_sum", &[Input::Array(&xs)]).unwrap();
    assert_eq!(live_objects(), before + 1);

    drop(returned);
    assert_eq!(live_objects(), before);
}

#[test]
fn test_explicit_release() {
    let session = FakeLibrary::new().session();
    let before = live_objects();

    let handle = session
        .to_foreign("f32_2d", &HostArray::from(array![[1.0f32, 2.0], [3.0, 4.0]]))
        .unwrap();
    assert_eq!(live_objects(), before + 1);
    handle.release().unwrap();
    assert_eq!(live_objects(), before);
}

#[test]
fn test_batch_extraction_syncs_once_per_side() {
    let session = FakeLibrary::new().session();
    let a = session
        .to_foreign("i64_1d", &HostArray::from(array![1i64, 2]))
        .unwrap();
    let b = session
        .to_foreign("i64_1d", &HostArray::from(array![3i64]))
        .unwrap();

    clear_events();
    let arrays = session.from_foreign_many(&[&a, &b]).unwrap();
    assert_eq!(events(), vec!["sync", "values", "values", "sync"]);
    assert_eq!(arrays[1], HostArray::from(array![3i64]));
}

#[test]
fn test_close_frees_context_before_config() {
    let session = FakeLibrary::new().session();
    clear_events();
    session.close();

    assert_eq!(events(), vec!["context_free", "config_free"]);
    assert_eq!(session.state(), ContextState::Closed);

    // Closing again is a no-op
    session.close();
    assert_eq!(events().len(), 2);
}

#[test]
fn test_operations_after_close_fail() {
    let session = FakeLibrary::new().session();
    let handle = session
        .to_foreign("i64_1d", &HostArray::from(array![1i64]))
        .unwrap();
    session.close();

    let err = session.call("add_one", &[Input::from(1i32)]).unwrap_err();
    assert_eq!(err, BindError::Closed);
    assert_eq!(session.sync().unwrap_err(), BindError::Closed);
    assert_eq!(session.from_foreign(&handle).unwrap_err(), BindError::Closed);

    // The context already reclaimed it; no destructor runs
    clear_events();
    drop(handle);
    assert!(!events().contains(&"free"));
}

#[test]
fn test_handles_keep_context_alive() {
    let session = FakeLibrary::new().session();
    let xs = HostArray::from(array![1i64, 2]);
    let prefix = session
        .call("prefix_sum", &[Input::Array(&xs)])
        .unwrap()
        .into_single()
        .and_then(Value::into_opaque)
        .unwrap();

    clear_events();
    drop(session);
    assert!(events().is_empty());

    assert_eq!(prefix.to_host().unwrap(), HostArray::from(array![1i64, 3]));
    drop(prefix);
    assert_eq!(events(), vec!["sync", "values", "sync", "free", "context_free", "config_free"]);
}

#[test]
fn test_failed_context_is_torn_down() {
    clear_events();
    let err = FakeLibrary::new()
        .session_with(&SessionConfig::new().device("missing"))
        .unwrap_err();
    assert_eq!(
        err,
        BindError::configuration("No device matching \"missing\" found.\n")
    );
    assert_eq!(events(), vec!["context_free", "config_free"]);
}

#[test]
fn test_unsupported_option() {
    let err = FakeLibrary::new()
        .session_with(&SessionConfig::new().platform("CUDA"))
        .unwrap_err();
    assert_eq!(
        err,
        BindError::configuration(
            "backend does not support option `platform` \
             (`futhark_context_config_set_platform` not exported)"
        )
    );
}

#[test]
fn test_option_with_interior_nul() {
    clear_events();
    let err = FakeLibrary::new()
        .session_with(&SessionConfig::new().device("dev\0ice"))
        .unwrap_err();
    assert_eq!(err, BindError::Ffi(FfiError::InteriorNul { position: 3 }));
    assert!(!err.is_recoverable());
    // The context was never built; only the configuration is freed
    assert_eq!(events(), vec!["config_free"]);
}

#[test]
fn test_unknown_tuning_parameter() {
    let err = FakeLibrary::new()
        .session_with(&SessionConfig::new().tuning("main.nonsense", 7))
        .unwrap_err();
    assert_eq!(
        err,
        BindError::configuration("unknown tuning parameter `main.nonsense`")
    );
}

#[test]
fn test_missing_required_symbol() {
    let err = FakeLibrary::new()
        .without("futhark_context_get_error")
        .session_with(&SessionConfig::default())
        .unwrap_err();
    assert_eq!(
        err,
        BindError::configuration("library does not export `futhark_context_get_error`")
    );
}

#[test]
fn test_missing_sync_is_not_an_error() {
    let session = FakeLibrary::new().without("futhark_context_sync").session();
    let handle = session
        .to_foreign("u32_1d", &HostArray::from(array![7u32]))
        .unwrap();
    assert_eq!(session.from_foreign(&handle).unwrap(), HostArray::from(array![7u32]));
}
