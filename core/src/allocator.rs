//! Advisory local port allocation.

use std::collections::HashSet;

use rand::Rng;

/// Local ports the allocator must never propose. These are held by the
/// surrounding application itself.
pub const RESERVED_LOCAL_PORTS: &[u16] = &[4688, 4689, 5422];

/// Lowest local port the allocator will propose (non-privileged range).
pub const LOCAL_PORT_MIN: u16 = 1024;

/// Highest local port the allocator will propose.
pub const LOCAL_PORT_MAX: u16 = 65535;

/// Draws a uniformly random port in `[min, max]` outside `exclusions`.
///
/// The candidate is advisory only: the forwarding backend may still
/// reject it if the operating system reports the port busy, and the
/// backend's response always wins. The exclusion set is tiny, so the
/// redraw loop terminates after about one draw in expectation.
pub fn generate_candidate(exclusions: &HashSet<u16>, min: u16, max: u16) -> u16 {
    let mut rng = rand::thread_rng();
    loop {
        let port = rng.gen_range(min..=max);
        if !exclusions.contains(&port) {
            return port;
        }
    }
}

/// Candidate from the default range with the process-wide reserved set.
pub fn suggest_local_port() -> u16 {
    let exclusions = RESERVED_LOCAL_PORTS.iter().copied().collect();
    generate_candidate(&exclusions, LOCAL_PORT_MIN, LOCAL_PORT_MAX)
}
