//! Build script for crashd-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version (1.75, for `File::set_modified`)
//! - Platform support for the inotify watcher
//!
//! ## Requirements
//!
//! - **Rust**: 1.75 or newer
//! - **Linux**: full support (inotify watcher and polling watcher)
//! - **Other Unix**: polling watcher only

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::new(1, 75, 0);

        if rustc_version < min_rust_version {
            panic!("crashd-core requires Rust {min_rust_version} or newer, found {rustc_version}");
        }
    } else {
        // If we can't get version (e.g., in some build environments), just warn
        println!("cargo:warning=could not verify Rust version");
    }

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "linux" {
        println!("cargo:warning=crashd-core: inotify is unavailable on {target_os}; only the polling watcher is built");
    }
}
