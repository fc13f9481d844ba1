//! Construction of ANSI SGR escape sequences (`ESC [ ... m`) for coloring
//! chat messages and console output.

use std::fmt::Write;

/// A single SGR parameter. The numeric values are the ones defined by
/// ECMA-48 and understood by every common terminal emulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SgrCode {
    Reset = 0,

    Bright = 1,
    Underline = 4,

    FgBlack = 30,
    FgRed = 31,
    FgGreen = 32,
    FgYellow = 33,
    FgBlue = 34,
    FgMagenta = 35,
    FgCyan = 36,
    FgWhite = 37,
}

/// Build the escape sequence for the given parameters. An empty parameter
/// list yields the reset sequence `ESC [ 0 m`.
pub fn sgr(codes: &[SgrCode]) -> String {
    let mut result = String::from("\x1b[");

    match codes.split_first() {
        None => result.push('0'),
        Some((first, rest)) => {
            let _ = write!(result, "{}", *first as u8);
            for code in rest {
                let _ = write!(result, ";{}", *code as u8);
            }
        }
    }

    result.push('m');
    result
}

/// The reset sequence, ending any coloring started before it.
pub fn reset() -> String {
    sgr(&[])
}
