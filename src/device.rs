//! Host capability probing and device classification

use serde::{Deserialize, Serialize};

/// Substrings marking a mobile user agent (matched case-insensitively)
const MOBILE_UA_MARKERS: [&str; 5] = ["android", "iphone", "ipad", "ipod", "mobi"];

/// Memory at or below this many gigabytes marks a weak device
const WEAK_MEMORY_GB: f64 = 4.0;

/// Logical cores at or below this count mark a weak device
const WEAK_CORE_COUNT: u32 = 4;

/// Raw capabilities reported by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostCapabilities {
    /// Hardware acceleration is available
    pub has_gpu: bool,
    #[serde(default)]
    pub user_agent: String,
    /// Structured mobile flag, when the host exposes one
    #[serde(default)]
    pub mobile_hint: Option<bool>,
    /// Approximate device memory in gigabytes
    #[serde(default)]
    pub device_memory_gb: Option<f64>,
    /// Logical processor count
    #[serde(default)]
    pub hardware_concurrency: Option<u32>,
}

/// Classification used for candidate selection and inference sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    pub has_acceleration: bool,
    pub is_mobile: bool,
    pub is_weak: bool,
}

impl DeviceProfile {
    /// Profile used when no capability information is available
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            has_acceleration: false,
            is_mobile: false,
            is_weak: true,
        }
    }

    #[must_use]
    pub fn is_mobile_or_weak(&self) -> bool {
        self.is_mobile || self.is_weak
    }
}

/// Source of host capabilities
pub trait CapabilityProbe: Send + Sync {
    /// `None` when the host exposes no capability information at all
    fn probe(&self) -> Option<HostCapabilities>;
}

impl<F> CapabilityProbe for F
where
    F: Fn() -> Option<HostCapabilities> + Send + Sync,
{
    fn probe(&self) -> Option<HostCapabilities> {
        self()
    }
}

/// Probe returning a fixed answer
#[derive(Debug, Clone, Default)]
pub struct StaticProbe(pub Option<HostCapabilities>);

impl StaticProbe {
    #[must_use]
    pub fn new(capabilities: HostCapabilities) -> Self {
        Self(Some(capabilities))
    }

    /// Probe for a host without capability information
    #[must_use]
    pub fn unavailable() -> Self {
        Self(None)
    }
}

impl CapabilityProbe for StaticProbe {
    fn probe(&self) -> Option<HostCapabilities> {
        self.0.clone()
    }
}

/// Probe reading the native host
///
/// Core count comes from the standard library and memory from `sysinfo`.
/// Acceleration cannot be discovered without the runtime, so the host
/// states it with [`SystemProbe::with_acceleration`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe {
    has_acceleration: bool,
}

impl SystemProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_acceleration(mut self, has_acceleration: bool) -> Self {
        self.has_acceleration = has_acceleration;
        self
    }

    fn user_agent() -> String {
        let os = match std::env::consts::OS {
            "android" => "Android",
            "ios" => "iPhone OS",
            "macos" => "Macintosh",
            "windows" => "Windows NT",
            "linux" => "X11; Linux",
            other => other,
        };
        format!(
            "{}/{} ({}; {})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            os,
            std::env::consts::ARCH
        )
    }
}

impl CapabilityProbe for SystemProbe {
    fn probe(&self) -> Option<HostCapabilities> {
        let cores = std::thread::available_parallelism()
            .ok()
            .and_then(|n| u32::try_from(n.get()).ok());

        let mut system = sysinfo::System::new();
        system.refresh_memory();
        let total_bytes = system.total_memory();
        let memory_gb = (total_bytes > 0).then(|| total_bytes as f64 / (1024.0 * 1024.0 * 1024.0));

        let os = std::env::consts::OS;
        let mobile_hint = Some(matches!(os, "android" | "ios"));

        Some(HostCapabilities {
            has_gpu: self.has_acceleration,
            user_agent: Self::user_agent(),
            mobile_hint,
            device_memory_gb: memory_gb,
            hardware_concurrency: cores,
        })
    }
}

/// Whether a user agent string looks like a mobile browser
#[must_use]
pub fn is_mobile_user_agent(user_agent: &str) -> bool {
    let lowered = user_agent.to_ascii_lowercase();
    MOBILE_UA_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Classify the host; computed fresh on every call
#[must_use]
pub fn detect(probe: &dyn CapabilityProbe) -> DeviceProfile {
    let Some(caps) = probe.probe() else {
        return DeviceProfile::conservative();
    };

    let has_acceleration = caps.has_gpu;
    let is_mobile = caps.mobile_hint.unwrap_or(false) || is_mobile_user_agent(&caps.user_agent);

    // unknown values (absent or zero) never count as weak
    let low_memory = caps
        .device_memory_gb
        .is_some_and(|gb| gb > 0.0 && gb <= WEAK_MEMORY_GB);
    let low_cpu = caps
        .hardware_concurrency
        .is_some_and(|cores| cores > 0 && cores <= WEAK_CORE_COUNT);
    let is_weak = low_memory || low_cpu || !has_acceleration;

    DeviceProfile {
        has_acceleration,
        is_mobile,
        is_weak,
    }
}
