/// Directory name for a resolution in km: `1km`, `250m`, `0.5m`.
pub fn resolution_to_subdir(resolution: f64) -> String {
    if resolution >= 1.0 {
        format!("{}km", trim_number(resolution))
    } else {
        format!("{}m", trim_number(resolution * 1000.0))
    }
}

fn trim_number(value: f64) -> String {
    let rounded = (value * 1.0e6).round() / 1.0e6;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kilometres_and_metres() {
        assert_eq!(resolution_to_subdir(1.0), "1km");
        assert_eq!(resolution_to_subdir(200.0), "200km");
        assert_eq!(resolution_to_subdir(2.5), "2.5km");
        assert_eq!(resolution_to_subdir(0.25), "250m");
        assert_eq!(resolution_to_subdir(0.0005), "0.5m");
    }
}
