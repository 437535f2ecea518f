use nix::sys::signal::Signal;
use nix::sys::stat::Mode;
use std::convert::TryFrom;
use std::str::FromStr;

/// Parses an octal permission string ("022", "0o755") into a Mode
pub fn to_mode(mode: &str) -> Result<Mode, String> {
    let trimmed = mode.trim_start_matches("0o");
    if let Ok(bits) = u32::from_str_radix(trimmed, 8) {
        if let Some(mode) = Mode::from_bits(bits as nix::libc::mode_t) {
            return Ok(mode);
        }
    }

    return Err(format!("Invalid mode: {}", mode));
}

/// Parses a signal given either as a name ("TERM", "SIGTERM", "term") or as its number
pub fn to_signal(signal: &str) -> Result<Signal, String> {
    if let Ok(num) = signal.parse::<i32>() {
        return to_signal_num(num);
    }

    let upper = signal.to_uppercase();
    let name = if upper.starts_with("SIG") { upper } else { format!("SIG{}", upper) };

    return Signal::from_str(&name).map_err(|_| format!("Invalid signal: {}", signal));
}

pub fn to_signal_num(signal: i32) -> Result<Signal, String> {
    return Signal::try_from(signal).map_err(|_| format!("Invalid signal number: {}", signal));
}

/// The name of the signal without its SIG prefix, e.g. "TERM"
pub fn signal_name(signal: Signal) -> &'static str {
    let name = signal.as_str();
    return name.strip_prefix("SIG").unwrap_or(name);
}
