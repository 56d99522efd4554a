//! Tests for binary metadata loading
//!
//! The test harness binary itself is used as the subject: it is a real
//! executable for the host and, in the default test profile, carries DWARF.

use std::io::Write;

use tzdb_core::error::DebuggerError;
use tzdb_core::symbols::BinaryMetadata;

#[cfg(any(target_os = "linux", windows))]
#[test]
fn test_load_current_executable()
{
    let exe = std::env::current_exe().unwrap();
    let metadata = BinaryMetadata::load_optional_debug_info(&exe).unwrap();

    assert_eq!(metadata.path(), exe.as_path());
    assert!(!metadata.symbols().is_empty());
}

#[cfg(target_os = "linux")]
#[test]
fn test_current_executable_has_main_and_dwarf()
{
    let exe = std::env::current_exe().unwrap();
    let metadata = BinaryMetadata::load(&exe).unwrap();

    let main = metadata.symbols().lookup("main").expect("main symbol");
    let symbol = metadata.symbolize(main).expect("main symbolizes");
    assert_eq!(symbol.function, "main");
    assert_eq!(symbol.offset, 0);

    let info = metadata.debug_info().expect("debug info");
    assert!(!info.functions().is_empty());
}

#[test]
fn test_missing_file_is_io_error()
{
    let err = BinaryMetadata::load("/nonexistent/tzdb/program").unwrap_err();
    assert!(matches!(err, DebuggerError::Io(_)));
}

#[test]
fn test_garbage_file_is_invalid_binary()
{
    let mut path = std::env::temp_dir();
    path.push(format!("tzdb-not-a-binary-{}", std::process::id()));
    {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"#!/bin/sh\necho definitely not an object file\n").unwrap();
    }

    let err = BinaryMetadata::load_optional_debug_info(&path).unwrap_err();
    std::fs::remove_file(&path).ok();
    assert!(matches!(err, DebuggerError::InvalidBinary(_)));
}
