//! Shot sizing math (spec.md §4.3): volume calculation and the EC-ratio
//! threshold adjustment.

/// `ecRatio = fusedEC / ecTargetForPhase`. Returns the VWC threshold bump to
/// apply: positive to irrigate sooner (dilute), negative to irrigate later
/// (concentrate). Recomputed every tick, never latched.
pub fn ec_ratio_adjustment(fused_ec: f64, ec_target: f64, ec_high: f64, ec_low: f64, bump_high: f64, bump_low: f64) -> f64 {
    if ec_target <= 0.0 {
        return 0.0;
    }
    let ratio = fused_ec / ec_target;
    if ratio > ec_high {
        bump_high
    } else if ratio < ec_low {
        -bump_low
    } else {
        0.0
    }
}

/// `volumeMl = shotPct/100 * substrateVolumeMl * shotMultiplier`.
pub fn volume_ml(shot_pct: f64, substrate_volume_ml: f64, shot_multiplier: f64) -> f64 {
    (shot_pct / 100.0) * substrate_volume_ml * shot_multiplier
}

/// `durationMs = volumeMl / (dripperCount * dripperFlowMlPerMs)`, clamped to
/// `[minShotMs, maxShotMs]`.
pub fn duration_ms(volume_ml: f64, dripper_count: u32, dripper_flow_ml_per_ms: f64, min_shot_ms: u64, max_shot_ms: u64) -> u64 {
    let flow = dripper_count as f64 * dripper_flow_ml_per_ms;
    if flow <= 0.0 {
        return min_shot_ms;
    }
    let raw = (volume_ml / flow).round() as i64;
    raw.clamp(min_shot_ms as i64, max_shot_ms as i64) as u64
}

/// P1 shot sizing: escalating percent, clamped to the configured max.
pub fn p1_shot_pct(initial_pct: f64, increment_pct: f64, shots_in_phase: u32, max_pct: f64) -> f64 {
    (initial_pct + increment_pct * shots_in_phase as f64).min(max_pct)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ec_ratio_high_bumps_threshold_up() {
        let bump = ec_ratio_adjustment(1.8, 1.2, 1.3, 0.7, 3.0, 3.0);
        assert_eq!(bump, 3.0);
    }

    #[test]
    fn ec_ratio_low_bumps_threshold_down() {
        let bump = ec_ratio_adjustment(0.6, 1.2, 1.3, 0.7, 3.0, 3.0);
        assert_eq!(bump, -3.0);
    }

    #[test]
    fn ec_ratio_within_band_is_unadjusted() {
        let bump = ec_ratio_adjustment(1.2, 1.2, 1.3, 0.7, 3.0, 3.0);
        assert_eq!(bump, 0.0);
    }

    #[test]
    fn volume_and_duration_match_formula() {
        let vol = volume_ml(3.0, 3000.0, 1.0);
        assert_eq!(vol, 90.0);
        let dur = duration_ms(vol, 4, 0.05, 500, 300_000);
        assert_eq!(dur, 450); // 90 / (4*0.05) = 450
    }

    #[test]
    fn duration_clamped_to_bounds() {
        let dur = duration_ms(1.0, 4, 0.05, 500, 300_000);
        assert_eq!(dur, 500);
        let dur_max = duration_ms(1_000_000.0, 4, 0.05, 500, 300_000);
        assert_eq!(dur_max, 300_000);
    }

    #[test]
    fn p1_shot_pct_escalates_and_clamps() {
        assert_eq!(p1_shot_pct(2.0, 1.0, 0, 8.0), 2.0);
        assert_eq!(p1_shot_pct(2.0, 1.0, 3, 8.0), 5.0);
        assert_eq!(p1_shot_pct(2.0, 1.0, 20, 8.0), 8.0);
    }
}
