use serde::{Serialize, ser::SerializeStruct};
use sysinfo::System;

/// Resource figures of the host the agent runs on.
#[derive(Debug, Clone, Default)]
pub struct HostStats {
    pub cpu_usage: f32,
    pub total_memory: u64,
    pub used_memory: u64,
    pub total_swap: u64,
    pub used_swap: u64,
    pub hostname: String,
    pub total_cpus: u64,
}

impl Serialize for HostStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("HostStats", 7)?;
        state.serialize_field("cpu_usage", &format!("{:.2}%", self.cpu_usage))?;
        state.serialize_field("total_memory_mb", &self.total_memory)?;
        state.serialize_field("used_memory_mb", &self.used_memory)?;
        state.serialize_field("total_swap_mb", &self.total_swap)?;
        state.serialize_field("used_swap_mb", &self.used_swap)?;
        state.serialize_field("hostname", &self.hostname)?;
        state.serialize_field("total_cpus", &self.total_cpus)?;
        state.end()
    }
}

/// Refreshes `sysinfo` and reads the current figures. Memory in MiB.
pub fn host_stats(sysinfo: &mut System) -> HostStats {
    sysinfo.refresh_cpu_usage();
    sysinfo.refresh_memory();

    HostStats {
        cpu_usage: (sysinfo.global_cpu_usage() * 100.0).round() / 100.0,
        total_memory: sysinfo.total_memory() / 1024 / 1024,
        used_memory: sysinfo.used_memory() / 1024 / 1024,
        total_swap: sysinfo.total_swap() / 1024 / 1024,
        used_swap: sysinfo.used_swap() / 1024 / 1024,
        hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        total_cpus: sysinfo.cpus().len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_is_rendered_as_percentage() {
        let stats = HostStats {
            cpu_usage: 12.5,
            hostname: "edge-01".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["cpu_usage"], "12.50%");
        assert_eq!(json["hostname"], "edge-01");
    }
}
