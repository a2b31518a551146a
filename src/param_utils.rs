use std::collections::HashMap;

/// Extract a parameter as usize with a default value
pub fn get_param_usize(params: &HashMap<String, f64>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v.round().max(0.0) as usize)
        .unwrap_or(default)
}

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Extract a parameter as usize with a minimum value
pub fn get_param_usize_at_least(
    params: &HashMap<String, f64>,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    get_param_usize(params, key, default).max(min)
}

/// Parameter map from literal pairs, used when the engine builds its own indicators.
pub fn params_of(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), *value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_defaults_for_missing_or_invalid_values() {
        let params = params_of(&[("period", 14.0), ("bad", f64::NAN), ("neg", -3.0)]);

        assert_eq!(get_param_usize(&params, "period", 5), 14);
        assert_eq!(get_param_usize(&params, "missing", 5), 5);
        assert_eq!(get_param_usize(&params, "bad", 5), 5);
        assert_eq!(get_param_usize(&params, "neg", 5), 0);
        assert_eq!(get_param_usize_at_least(&params, "neg", 5, 1), 1);
        assert!((get_param_f64(&params, "bad", 0.5) - 0.5).abs() < 1e-12);
    }
}
