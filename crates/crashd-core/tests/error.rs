//! Tests for error handling

use std::path::PathBuf;

use crashd_core::error::{CrashError, Result};

#[test]
fn test_corrupt_dump_message()
{
    let error = CrashError::corrupt("/tmp/coredump/app.1", "not a core file");
    let message = error.to_string();
    assert!(message.contains("/tmp/coredump/app.1"));
    assert!(message.contains("not a core file"));
}

#[test]
fn test_unsupported_architecture_message()
{
    let message = CrashError::UnsupportedArchitecture(243).to_string();
    assert!(message.contains("243"));
}

#[test]
fn test_object_load_message()
{
    let error = CrashError::ObjectLoad {
        path: PathBuf::from("/usr/lib/libfoo.so"),
        reason: "bad magic".to_string(),
    };
    assert_eq!(error.to_string(), "Failed to load object /usr/lib/libfoo.so: bad magic");
}

#[test]
fn test_fatal_classification()
{
    assert!(CrashError::Watch("inotify gone".to_string()).is_fatal());
    assert!(CrashError::Config("bad".to_string()).is_fatal());
    assert!(!CrashError::DumpVanished(PathBuf::from("/tmp/x")).is_fatal());
    assert!(!CrashError::corrupt("/tmp/x", "short").is_fatal());
    assert!(!CrashError::UnsupportedArchitecture(3).is_fatal());
}

#[test]
fn test_io_error_conversion()
{
    fn read_missing() -> Result<Vec<u8>>
    {
        Ok(std::fs::read("/definitely/not/here")?)
    }

    let err = read_missing().unwrap_err();
    assert!(matches!(err, CrashError::Io(_)));
    assert!(err.to_string().starts_with("IO error:"));
}
