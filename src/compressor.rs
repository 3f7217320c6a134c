//! Archive/compression capability probing.
//!
//! The in-process mechanisms are compiled in and always usable; the system
//! binaries depend on the host. Probed once, in preference order, and cached
//! for the process lifetime.

use std::path::Path;
use std::sync::OnceLock;

pub const LIB_TAR_GZ: &str = "lib_targz";
pub const LIB_ZLIB: &str = "lib_zlib";
pub const LIB_ZSTD: &str = "lib_zstd";
pub const SYSTEM_TAR: &str = "system_tar";
pub const SYSTEM_ZIP: &str = "system_zip";

static AVAILABLE: OnceLock<Vec<&'static str>> = OnceLock::new();

/// Probe for usable compressors, in fixed preference order.
pub fn available_compressors() -> &'static [&'static str] {
    AVAILABLE.get_or_init(|| {
        let mut found = Vec::new();
        let mut add = |name: &'static str| {
            if !found.contains(&name) {
                found.push(name);
            }
        };

        // In-process: tar + gzip (flate2), raw zlib (flate2), zstd.
        add(LIB_TAR_GZ);
        add(LIB_ZLIB);
        add(LIB_ZSTD);

        if is_executable(Path::new("/bin/tar")) || is_executable(Path::new("/usr/bin/tar")) {
            add(SYSTEM_TAR);
        }
        if is_executable(Path::new("/usr/bin/zip")) {
            add(SYSTEM_ZIP);
        }

        found
    })
}

/// Membership test against the cached probe result. An empty or unknown name
/// is simply unavailable; no probing happens for it.
pub fn is_compressor_available(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    available_compressors().contains(&name)
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(path) {
            Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
            Err(_) => false,
        }
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
