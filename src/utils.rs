//! Utility functions for disk probing, hashing, and name handling

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::OnceLock;
use tokio::io::AsyncReadExt;

/// Read size for streamed hashing
const CHECKSUM_CHUNK_SIZE: usize = 256 * 1024;

/// Get available disk space for a given path
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Linux: statvfs
/// - macOS: statvfs
/// - Windows: GetDiskFreeSpaceExW
///
/// # Arguments
///
/// * `path` - The path to check (typically the staging root)
///
/// # Returns
///
/// Returns the available disk space in bytes, or an IO error if the check fails.
///
/// # Examples
///
/// ```ignore
/// let available = get_available_space(Path::new("./relay-temp"))?;
/// println!("Available space: {} GB", available / (1024 * 1024 * 1024));
/// ```
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        // Convert path to C string for statvfs call
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: This is safe because:
        // 1. c_path is a valid, null-terminated C string created from the input path
        // 2. stat is properly initialized with zeroed memory before the call
        // 3. We check the return value and propagate any OS errors
        // 4. The statvfs struct is only read after a successful call
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // Available space = available blocks * fragment size
            // f_bavail is available blocks for unprivileged users
            // f_frsize is the fragment size (preferred over f_bsize)
            let available_bytes = stat.f_bavail.saturating_mul(stat.f_frsize);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        // Convert path to wide string for Windows API
        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0)) // null terminator
            .collect();

        // SAFETY: This is safe because:
        // 1. wide_path is a valid, null-terminated wide string
        // 2. All output pointers point to valid, properly aligned u64 variables
        // 3. We check the return value and propagate any OS errors
        // 4. The output variables are only read after a successful call
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        // Unsupported platform - return an error
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}

/// Compute the SHA-256 of a file, streaming in 256 KiB chunks
///
/// Returns the digest as a lowercase hex string. Reads through tokio's async
/// file APIs so large artifacts do not block the runtime.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHECKSUM_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Format a byte count as a short human-readable string ("1.5 MiB")
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}

/// Reduce a string to a filesystem-safe path component
///
/// Anything outside `[A-Za-z0-9._-]` becomes an underscore, so identifiers
/// can be used directly as directory names. The result is always a real
/// child name: the dot components `.` and `..` and the empty string are
/// remapped to underscores.
pub fn sanitize_component(s: &str) -> String {
    static UNSAFE_CHARS: OnceLock<regex::Regex> = OnceLock::new();
    // The pattern is a literal character class and always compiles
    #[allow(clippy::expect_used)]
    let re =
        UNSAFE_CHARS.get_or_init(|| regex::Regex::new(r"[^A-Za-z0-9._-]").expect("valid regex"));
    let cleaned = re.replace_all(s, "_").into_owned();
    // "." and ".." pass the character class but name the joined directory
    // itself or its parent; "" would vanish entirely in a join
    match cleaned.as_str() {
        "" | "." => "_".to_string(),
        ".." => "__".to_string(),
        _ => cleaned,
    }
}
