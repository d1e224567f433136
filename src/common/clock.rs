use std::time::Instant;

/// Source of simulation time, in milliseconds since the simulation started.
pub trait Clock: Send {
    /// Current time.
    fn now(&self) -> u64;

    /// Move time forward by `elapsed` and return the new current time.
    ///
    /// Wall clocks ignore `elapsed` and report how much real time has passed.
    fn advance(&mut self, elapsed: u64) -> u64;
}

/// Deterministic clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    now: u64,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(now: u64) -> Self {
        Self { now }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> u64 {
        self.now
    }

    fn advance(&mut self, elapsed: u64) -> u64 {
        self.now = self.now.saturating_add(elapsed);
        self.now
    }
}

/// Clock backed by `Instant`, used by the live runtime.
#[derive(Debug, Clone)]
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn advance(&mut self, _elapsed: u64) -> u64 {
        self.now()
    }
}
