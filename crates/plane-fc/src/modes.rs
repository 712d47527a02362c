//! ArduPlane custom-mode numbers (HEARTBEAT.custom_mode / DO_SET_MODE param2).

const PLANE_MODES: &[(u32, &str)] = &[
    (0, "MANUAL"),
    (1, "CIRCLE"),
    (2, "STABILIZE"),
    (3, "TRAINING"),
    (4, "ACRO"),
    (5, "FBWA"),
    (6, "FBWB"),
    (7, "CRUISE"),
    (8, "AUTOTUNE"),
    (10, "AUTO"),
    (11, "RTL"),
    (12, "LOITER"),
    (13, "TAKEOFF"),
    (14, "AVOID_ADSB"),
    (15, "GUIDED"),
    (16, "INITIALISING"),
    (17, "QSTABILIZE"),
    (18, "QHOVER"),
    (19, "QLOITER"),
    (20, "QLAND"),
    (21, "QRTL"),
    (22, "QAUTOTUNE"),
    (23, "QACRO"),
    (24, "THERMAL"),
    (25, "LOITERALTQLAND"),
];

pub fn mode_name(custom_mode: u32) -> Option<&'static str> {
    PLANE_MODES.iter().find(|(n, _)| *n == custom_mode).map(|(_, s)| *s)
}

/// Case-insensitive lookup.
pub fn mode_number(name: &str) -> Option<u32> {
    PLANE_MODES
        .iter()
        .find(|(_, s)| s.eq_ignore_ascii_case(name.trim()))
        .map(|(n, _)| *n)
}

pub fn is_known(name: &str) -> bool {
    mode_number(name).is_some()
}

/// Name reported for a mode number the table does not know.
pub fn display_name(custom_mode: u32) -> String {
    mode_name(custom_mode).map(str::to_string).unwrap_or_else(|| format!("MODE({})", custom_mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_modes_round_trip() {
        for name in ["MANUAL", "STABILIZE", "ACRO", "FBWA", "AUTO", "RTL"] {
            let n = mode_number(name).unwrap();
            assert_eq!(mode_name(n), Some(name));
        }
        assert_eq!(mode_number("acro"), Some(4));
        assert_eq!(mode_number("rtl"), Some(11));
    }

    #[test]
    fn unknown_modes() {
        assert_eq!(mode_number("SPORT"), None);
        assert_eq!(mode_name(9), None);
        assert_eq!(display_name(9), "MODE(9)");
        assert!(!is_known("POSHOLD"));
    }
}
