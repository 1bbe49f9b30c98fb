//! Hardware probing. Only host CPUs exist in this build; device-backed
//! kernels would extend the match.

/// Whether at least `num` devices of the named kind are present. An empty
/// name or non-positive count asks "is there any hardware at all".
pub fn has_hardware(name: &str, num: i32) -> bool {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(1);
    match name {
        "" | "cpu" => num <= cores,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_is_present() {
        assert!(has_hardware("cpu", 1));
        assert!(has_hardware("", 0));
    }

    #[test]
    fn unknown_hardware_is_absent() {
        assert!(!has_hardware("fpga", 1));
    }
}
