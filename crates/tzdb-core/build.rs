//! Build script for tzdb-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version (let-else and `div_ceil` need Rust 1.73.0+)
//! - Whether the target has a process-control backend
//!
//! ## Requirements
//!
//! - **Rust**: 1.73.0 or newer
//! - **Linux**: x86-64, ptrace enabled (`kernel.yama.ptrace_scope` <= 1 for child tracing)
//! - **Windows**: x86-64
//!
//! Other targets still compile; the debugger reports the platform as
//! unsupported at runtime.

use std::env;

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    match rustc_version::version() {
        Ok(version) => {
            let min_rust_version = rustc_version::Version::new(1, 73, 0);
            if version < min_rust_version {
                panic!("tzdb-core requires Rust {min_rust_version} or newer, found {version}");
            }
        }
        // Some build environments hide rustc; just warn
        Err(_) => println!("cargo:warning=could not verify Rust version"),
    }

    let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let supported = arch == "x86_64" && (os == "linux" || os == "windows");
    if !supported {
        println!("cargo:warning=tzdb-core has no process-control backend for {os}/{arch}; launching will fail");
    }
}
