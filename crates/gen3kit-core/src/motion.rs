//! Pure motion math shared by the command layer and its callers.

/// Microseconds per minute, the basis of the RPM conversions.
const MICROS_PER_MINUTE: u64 = 60 * 1_000_000;

/// Convert a motor speed in RPM to the microseconds-per-revolution
/// value the tool boards expect.
///
/// The quotient is computed in 64 bits and clamped to `u32::MAX`, so a
/// speed slow enough to overflow the wire field saturates instead of
/// wrapping. Non-positive speeds also saturate.
pub fn rpm_to_micros(rpm: f64) -> u32 {
    if rpm <= 0.0 {
        return u32::MAX;
    }
    let micros = (MICROS_PER_MINUTE as f64 / rpm).round() as u64;
    micros.min(u64::from(u32::MAX)) as u32
}

/// Convert a microseconds-per-revolution reading back to RPM.
///
/// A reading of zero (a stopped or unreported motor) maps to 0 RPM.
pub fn micros_to_rpm(micros: u32) -> f64 {
    if micros == 0 {
        return 0.0;
    }
    MICROS_PER_MINUTE as f64 / f64::from(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpm_to_micros() {
        assert_eq!(rpm_to_micros(60.0), 1_000_000);
        assert_eq!(rpm_to_micros(1.0), 60_000_000);
        // 60e6 / 7 rounds up
        assert_eq!(rpm_to_micros(7.0), 8_571_429);
    }

    #[test]
    fn test_rpm_to_micros_saturates() {
        assert_eq!(rpm_to_micros(0.01), u32::MAX);
        assert_eq!(rpm_to_micros(0.0), u32::MAX);
        assert_eq!(rpm_to_micros(-5.0), u32::MAX);
    }

    #[test]
    fn test_micros_to_rpm() {
        assert_eq!(micros_to_rpm(1_000_000), 60.0);
        assert_eq!(micros_to_rpm(60_000_000), 1.0);
        assert_eq!(micros_to_rpm(0), 0.0);
    }

    #[test]
    fn test_roundtrip_at_common_speeds() {
        for rpm in [1.0, 10.0, 60.0, 300.0, 1200.0] {
            let back = micros_to_rpm(rpm_to_micros(rpm));
            assert!((back - rpm).abs() / rpm < 1e-3, "rpm {rpm} round-tripped to {back}");
        }
    }
}
