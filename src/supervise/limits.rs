use super::types::ResourceCeiling;
use nix::sys::resource::{setrlimit, Resource};

/// Apply the ceiling inside the child between fork and exec. Runs in the
/// forked child, so failures cannot be logged here; they are swallowed and
/// the cap is simply absent. RLIMIT_AS bounds the address space, RLIMIT_DATA
/// the heap, RLIMIT_CPU the CPU seconds.
pub fn apply_ceiling(ceiling: &ResourceCeiling) -> std::io::Result<()> {
    if let Some(bytes) = ceiling.memory_bytes {
        let _ = setrlimit(Resource::RLIMIT_AS, bytes, bytes);
        let _ = setrlimit(Resource::RLIMIT_DATA, bytes, bytes);
    }
    if let Some(secs) = ceiling.cpu_seconds {
        let _ = setrlimit(Resource::RLIMIT_CPU, secs, secs);
    }
    Ok(())
}
