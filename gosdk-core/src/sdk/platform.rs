//! Host platform detection in Go's `GOOS`/`GOARCH` vocabulary.

/// Returns the Go OS name of the running host.
pub fn detect_os() -> &'static str {
    os_from_target(std::env::consts::OS)
}

/// Returns the Go architecture name of the running host.
pub fn detect_arch() -> &'static str {
    normalize_arch(std::env::consts::ARCH)
}

/// Maps a Rust `target_os` value to Go's naming.
pub fn os_from_target(os: &str) -> &'static str {
    match os.to_lowercase().as_str() {
        "macos" | "darwin" | "ios" => "darwin",
        "windows" => "windows",
        "aix" => "aix",
        "freebsd" => "freebsd",
        "netbsd" => "netbsd",
        "openbsd" => "openbsd",
        "solaris" | "illumos" | "sunos" => "solaris",
        _ => "linux",
    }
}

/// Maps common architecture aliases to Go's naming.
///
/// Unknown values fall back to `amd64`.
pub fn normalize_arch(arch: &str) -> &'static str {
    known_arch(arch).unwrap_or("amd64")
}

/// Go's name for `arch` if it is one of the known aliases.
pub fn known_arch(arch: &str) -> Option<&'static str> {
    let go_arch = match arch.trim().to_lowercase().as_str() {
        "powerpc64le" | "ppc64le" => "ppc64le",
        "armv6l" | "arm" => "armv6l",
        "aarch64" | "arm64" => "arm64",
        "s390x" => "s390x",
        "x86" | "i386" | "i686" | "386" => "386",
        "x86_64" | "x64" | "amd64" => "amd64",
        _ => return None,
    };
    Some(go_arch)
}
