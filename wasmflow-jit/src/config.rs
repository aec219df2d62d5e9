//! Runtime-wide configuration read from the environment (§6.5). Kept as a
//! struct rather than scattered `std::env::var` calls so `wasmflow-cli`
//! and tests can both see and override it in one place.

use std::path::PathBuf;

/// Per-compile statistics surfaced when [`RuntimeConfig::perf_metrics`] is
/// enabled: wall-clock split across the pipeline stages
/// `compile_function` runs through, plus the emitted code size.
#[derive(Debug, Clone, Default)]
pub struct CompileStats {
    pub func_index: u32,
    pub translate_ns: u64,
    pub optimize_ns: u64,
    pub lower_ns: u64,
    pub regalloc_ns: u64,
    pub emit_ns: u64,
    pub code_bytes: usize,
    pub spill_slots: u32,
}

impl CompileStats {
    pub fn total_ns(&self) -> u64 {
        self.translate_ns + self.optimize_ns + self.lower_ns + self.regalloc_ns + self.emit_ns
    }

    fn csv_header() -> &'static str {
        "func_index,translate_ns,optimize_ns,lower_ns,regalloc_ns,emit_ns,total_ns,code_bytes,spill_slots"
    }

    fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{}",
            self.func_index,
            self.translate_ns,
            self.optimize_ns,
            self.lower_ns,
            self.regalloc_ns,
            self.emit_ns,
            self.total_ns(),
            self.code_bytes,
            self.spill_slots,
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// `PERF_METRICS=1` (§6.5): collect and report [`CompileStats`] per
    /// function.
    pub perf_metrics: bool,
    /// `PERF_METRICS_FILE`: where to append the CSV report; stderr if unset.
    pub perf_metrics_file: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let perf_metrics = std::env::var("PERF_METRICS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let perf_metrics_file = std::env::var_os("PERF_METRICS_FILE").map(PathBuf::from);
        RuntimeConfig {
            perf_metrics,
            perf_metrics_file,
        }
    }

    pub fn report_stats(&self, stats: &[CompileStats]) -> std::io::Result<()> {
        if !self.perf_metrics || stats.is_empty() {
            return Ok(());
        }
        let mut body = String::new();
        body.push_str(CompileStats::csv_header());
        body.push('\n');
        for s in stats {
            body.push_str(&s.to_csv_row());
            body.push('\n');
        }
        match &self.perf_metrics_file {
            Some(path) => {
                use std::io::Write;
                let mut f = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
                f.write_all(body.as_bytes())
            }
            None => {
                eprint!("{body}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_ns_sums_every_stage() {
        let stats = CompileStats {
            translate_ns: 1,
            optimize_ns: 2,
            lower_ns: 3,
            regalloc_ns: 4,
            emit_ns: 5,
            ..Default::default()
        };
        assert_eq!(stats.total_ns(), 15);
    }
}
