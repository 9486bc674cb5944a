//! Process CPU utilization and resource accounting for the 1 Hz system
//! sampling loop.
//!
//! - `CpuUsageTracker`: per-interval CPU usage as
//!   (user + system time) / (wall time * cores), in percent.
//! - `ResourceUsage`: snapshot of `getrusage(RUSAGE_SELF)` with times
//!   normalized to nanoseconds.

use crate::utils::clock::PerfClock;

/// Core count plus CPU usage over the last sampling interval.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuInfo {
    pub cpu_cores: u32,
    pub cpu_usage: f32,
}

/// Tracks process CPU time between successive `cpu_usage()` calls.
pub struct CpuUsageTracker {
    cpu_cores: u32,
    ticks_to_ns: i64,
    prev_wall: i64,
    prev_user: i64,
    prev_system: i64,
}

impl CpuUsageTracker {
    pub fn new() -> Self {
        let mut tracker = Self {
            cpu_cores: num_cpus::get() as u32,
            ticks_to_ns: clock_ticks_to_ns(),
            prev_wall: 0,
            prev_user: 0,
            prev_system: 0,
        };
        // Baseline so the first interval measures from construction, not
        // from process start.
        let (wall, user, system) = tracker.sample_times();
        tracker.prev_wall = wall;
        tracker.prev_user = user;
        tracker.prev_system = system;
        tracker
    }

    /// CPU usage over the interval since the previous call.
    pub fn cpu_usage(&mut self) -> CpuInfo {
        let (wall, user, system) = self.sample_times();

        let wall_diff = wall - self.prev_wall;
        let busy_diff = (user - self.prev_user) + (system - self.prev_system);

        self.prev_wall = wall;
        self.prev_user = user;
        self.prev_system = system;

        let usage = if wall_diff > 0 {
            100.0 * busy_diff as f32 / (wall_diff as f32 * self.cpu_cores as f32)
        } else {
            0.0
        };

        CpuInfo {
            cpu_cores: self.cpu_cores,
            cpu_usage: usage,
        }
    }

    /// (wall, user, system) in nanoseconds.
    #[cfg(unix)]
    fn sample_times(&self) -> (i64, i64, i64) {
        let mut tm = std::mem::MaybeUninit::<libc::tms>::uninit();
        // times() cannot fail with a valid pointer.
        let tm = unsafe {
            libc::times(tm.as_mut_ptr());
            tm.assume_init()
        };
        let user = (tm.tms_utime + tm.tms_cutime) as i64 * self.ticks_to_ns;
        let system = (tm.tms_stime + tm.tms_cstime) as i64 * self.ticks_to_ns;
        (PerfClock::timestamp(), user, system)
    }

    #[cfg(not(unix))]
    fn sample_times(&self) -> (i64, i64, i64) {
        (PerfClock::timestamp(), 0, 0)
    }
}

impl Default for CpuUsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn clock_ticks_to_ns() -> i64 {
    let ticks_per_sec = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks_per_sec > 0 {
        1_000_000_000 / ticks_per_sec
    } else {
        10_000_000 // 100 Hz fallback
    }
}

#[cfg(not(unix))]
fn clock_ticks_to_ns() -> i64 {
    10_000_000
}

/// Snapshot of `getrusage(RUSAGE_SELF)`. Times in nanoseconds, the rest in
/// the kernel's native units (`ru_maxrss` in kilobytes on Linux).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub utime_ns: i64,
    pub stime_ns: i64,
    pub maxrss: i64,
    pub ixrss: i64,
    pub idrss: i64,
    pub isrss: i64,
    pub minflt: i64,
    pub majflt: i64,
    pub nswap: i64,
    pub inblock: i64,
    pub oublock: i64,
    pub msgsnd: i64,
    pub msgrcv: i64,
    pub nsignals: i64,
    pub nvcsw: i64,
    pub nivcsw: i64,
}

impl ResourceUsage {
    #[cfg(unix)]
    pub fn current() -> Self {
        let mut ru = std::mem::MaybeUninit::<libc::rusage>::uninit();
        let ru = unsafe {
            if libc::getrusage(libc::RUSAGE_SELF, ru.as_mut_ptr()) != 0 {
                return Self::default();
            }
            ru.assume_init()
        };
        Self {
            utime_ns: timeval_to_ns(&ru.ru_utime),
            stime_ns: timeval_to_ns(&ru.ru_stime),
            maxrss: ru.ru_maxrss as i64,
            ixrss: ru.ru_ixrss as i64,
            idrss: ru.ru_idrss as i64,
            isrss: ru.ru_isrss as i64,
            minflt: ru.ru_minflt as i64,
            majflt: ru.ru_majflt as i64,
            nswap: ru.ru_nswap as i64,
            inblock: ru.ru_inblock as i64,
            oublock: ru.ru_oublock as i64,
            msgsnd: ru.ru_msgsnd as i64,
            msgrcv: ru.ru_msgrcv as i64,
            nsignals: ru.ru_nsignals as i64,
            nvcsw: ru.ru_nvcsw as i64,
            nivcsw: ru.ru_nivcsw as i64,
        }
    }

    #[cfg(not(unix))]
    pub fn current() -> Self {
        Self::default()
    }
}

#[cfg(unix)]
fn timeval_to_ns(tv: &libc::timeval) -> i64 {
    tv.tv_sec as i64 * 1_000_000_000 + tv.tv_usec as i64 * 1_000
}
