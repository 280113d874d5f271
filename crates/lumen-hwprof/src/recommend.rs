//! Tier-driven defaults: which performance mode to start in and what model shape fits.

use lumen_core::{EngineConfig, PerformanceMode};

use crate::types::{DeviceProfile, DeviceTier, ModelRecommendation, ThermalState};

/// Mode for the device's tier, then stepped down for a low battery (0.0..=1.0) or heat.
pub fn recommended_mode(profile: &DeviceProfile, battery_level: f32, thermal: ThermalState) -> PerformanceMode {
    let mut mode = if profile.tier == DeviceTier::High {
        PerformanceMode::Performance
    } else if profile.is_low_end {
        PerformanceMode::PowerSave
    } else {
        PerformanceMode::Balanced
    };

    if battery_level < 0.2 {
        mode = PerformanceMode::PowerSave;
    } else if battery_level < 0.5 && mode == PerformanceMode::Performance {
        mode = PerformanceMode::Balanced;
    }

    match thermal {
        ThermalState::Serious | ThermalState::Critical => mode = PerformanceMode::PowerSave,
        ThermalState::Fair if mode == PerformanceMode::Performance => mode = PerformanceMode::Balanced,
        _ => {}
    }
    mode
}

pub fn recommended_model(profile: &DeviceProfile) -> ModelRecommendation {
    let (size, quant, ctx, batch) = match profile.tier {
        DeviceTier::High => {
            let q = if profile.prefers_quantized { "Q4_K_M" } else { "none" };
            ("7B", q, 8192, 8)
        }
        DeviceTier::Mid => ("3B", "Q4_K_S", 4096, 4),
        DeviceTier::Low => ("1B", "Q4_0", 2048, 2),
    };
    ModelRecommendation {
        model_size: size.to_string(),
        quantization: quant.to_string(),
        context_size: ctx,
        max_batch_size: batch,
    }
}

/// Overlay the device's recommendations on `base`. The quantization label stays with the
/// model file; only context size, mode and the thread ceiling change.
pub fn tune_engine_config(
    base: EngineConfig,
    profile: &DeviceProfile,
    battery_level: f32,
    thermal: ThermalState,
) -> EngineConfig {
    let model = recommended_model(profile);
    EngineConfig {
        default_context_size: model.context_size,
        default_mode: recommended_mode(profile, battery_level, thermal),
        max_threads: Some(profile.cpu.threads.max(1) as usize),
        ..base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CpuInfo;

    fn profile(memory_mb: u64, threads: u32) -> DeviceProfile {
        DeviceProfile::assemble(
            "linux".into(),
            "aarch64".into(),
            CpuInfo {
                brand: "test".into(),
                threads,
                physical_cores: None,
            },
            memory_mb,
        )
    }

    #[test]
    fn base_mode_follows_tier() {
        let n = ThermalState::Nominal;
        assert_eq!(recommended_mode(&profile(8000, 8), 1.0, n), PerformanceMode::Performance);
        assert_eq!(recommended_mode(&profile(4000, 4), 1.0, n), PerformanceMode::Balanced);
        assert_eq!(recommended_mode(&profile(2000, 2), 1.0, n), PerformanceMode::PowerSave);
    }

    #[test]
    fn battery_and_heat_step_down() {
        let high = profile(8000, 8);
        assert_eq!(recommended_mode(&high, 0.4, ThermalState::Nominal), PerformanceMode::Balanced);
        assert_eq!(recommended_mode(&high, 0.1, ThermalState::Nominal), PerformanceMode::PowerSave);
        assert_eq!(recommended_mode(&high, 1.0, ThermalState::Fair), PerformanceMode::Balanced);
        assert_eq!(recommended_mode(&high, 1.0, ThermalState::Critical), PerformanceMode::PowerSave);

        let mid = profile(4000, 4);
        assert_eq!(recommended_mode(&mid, 0.4, ThermalState::Fair), PerformanceMode::Balanced);
        assert_eq!(recommended_mode(&mid, 0.9, ThermalState::Serious), PerformanceMode::PowerSave);
    }

    #[test]
    fn model_shape_per_tier() {
        let high = recommended_model(&profile(8000, 8));
        assert_eq!((high.context_size, high.quantization.as_str(), high.max_batch_size), (8192, "none", 8));
        let mid = recommended_model(&profile(3500, 4));
        assert_eq!((mid.context_size, mid.quantization.as_str()), (4096, "Q4_K_S"));
        let low = recommended_model(&profile(1500, 2));
        assert_eq!((low.context_size, low.quantization.as_str(), low.max_batch_size), (2048, "Q4_0", 2));
    }

    #[test]
    fn tuned_config_keeps_unrelated_fields() {
        let base = EngineConfig {
            prefill_chunk: 16,
            ..EngineConfig::default()
        };
        let cfg = tune_engine_config(base, &profile(2000, 2), 1.0, ThermalState::Nominal);
        assert_eq!(cfg.default_context_size, 2048);
        assert_eq!(cfg.default_quantization, "none");
        assert_eq!(cfg.default_mode, PerformanceMode::PowerSave);
        assert_eq!(cfg.max_threads, Some(2));
        assert_eq!(cfg.prefill_chunk, 16);
    }
}
