// ETA Estimator: static per-kind lookup tables, no learning from past runs

use crate::domain::JobKind;
use crate::port::Workload;
use std::collections::HashMap;

/// Calibration for one job kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KindProfile {
    /// Seconds for a job of default size
    pub base_seconds: f64,
    pub default_steps: u32,
    pub default_units: u32,
    /// Added when the job needs a resource that is not loaded
    pub load_penalty_seconds: f64,
}

impl KindProfile {
    pub const fn new(base_seconds: f64, default_steps: u32, default_units: u32, load_penalty_seconds: f64) -> Self {
        Self {
            base_seconds,
            default_steps,
            default_units,
            load_penalty_seconds,
        }
    }

    /// Duration is unknown up front (downloads)
    pub const fn unknown() -> Self {
        Self::new(0.0, 0, 0, 0.0)
    }
}

pub struct EtaEstimator {
    profiles: HashMap<JobKind, KindProfile>,
    /// Per-resource base time overriding the kind's base
    resource_base: HashMap<String, f64>,
}

impl Default for EtaEstimator {
    fn default() -> Self {
        let profiles = HashMap::from([
            (JobKind::Image, KindProfile::new(30.0, 20, 1, 30.0)),
            (JobKind::Video, KindProfile::new(180.0, 50, 49, 60.0)),
            (JobKind::I2v, KindProfile::new(180.0, 50, 49, 60.0)),
            // per frame: units carry the frame count against a default of one
            (JobKind::Upscale, KindProfile::new(0.5, 1, 1, 15.0)),
            (JobKind::Bulk, KindProfile::new(30.0, 20, 1, 30.0)),
            (JobKind::Workflow, KindProfile::new(60.0, 1, 1, 0.0)),
            (JobKind::Download, KindProfile::unknown()),
        ]);
        let resource_base = HashMap::from([
            ("sd-turbo".to_string(), 2.0),
            ("flux-dev".to_string(), 45.0),
            ("cogvideox-2b".to_string(), 90.0),
            ("realesrgan-x2plus".to_string(), 0.3),
        ]);
        Self {
            profiles,
            resource_base,
        }
    }
}

impl EtaEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, kind: JobKind, profile: KindProfile) -> Self {
        self.profiles.insert(kind, profile);
        self
    }

    pub fn with_resource_base(mut self, resource: impl Into<String>, base_seconds: f64) -> Self {
        self.resource_base.insert(resource.into(), base_seconds);
        self
    }

    pub fn profile(&self, kind: JobKind) -> KindProfile {
        self.profiles
            .get(&kind)
            .copied()
            .unwrap_or_else(KindProfile::unknown)
    }

    /// `base * (steps / default_steps) * (units / default_units)`, plus the load penalty
    ///
    /// A zero `steps` or `units` means the kind default.
    pub fn estimate(&self, kind: JobKind, steps: u32, units: u32, needs_load: bool) -> f64 {
        let profile = self.profile(kind);
        compute(profile, profile.base_seconds, steps, units, needs_load)
    }

    /// Estimate from a processor's workload, honouring per-resource base times
    pub fn estimate_for(&self, kind: JobKind, workload: &Workload, needs_load: bool) -> f64 {
        let profile = self.profile(kind);
        let base = workload
            .resource
            .as_deref()
            .and_then(|r| self.resource_base.get(r).copied())
            .unwrap_or(profile.base_seconds);
        compute(profile, base, workload.steps, workload.units, needs_load)
    }
}

fn compute(profile: KindProfile, base: f64, steps: u32, units: u32, needs_load: bool) -> f64 {
    let step_factor = ratio(steps, profile.default_steps);
    let unit_factor = ratio(units, profile.default_units);
    let penalty = if needs_load {
        profile.load_penalty_seconds
    } else {
        0.0
    };
    (base * step_factor * unit_factor + penalty).max(0.0)
}

fn ratio(value: u32, default: u32) -> f64 {
    if value == 0 || default == 0 {
        1.0
    } else {
        f64::from(value) / f64::from(default)
    }
}
