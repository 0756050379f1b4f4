//! Chord strings: parsing into `(modifier_mask, virtual_key)`, canonical
//! normalization, and the reserved system set.
use crate::error::HotkeyError;

/// Alt modifier bit.
pub const MOD_ALT: u32 = 0x0001;
/// Control modifier bit.
pub const MOD_CONTROL: u32 = 0x0002;
/// Shift modifier bit.
pub const MOD_SHIFT: u32 = 0x0004;
/// Win/Super modifier bit.
pub const MOD_WIN: u32 = 0x0008;
/// Suppresses auto-repeat while the chord is held.
pub const MOD_NOREPEAT: u32 = 0x4000;

/// Combinations the registry refuses to bind even when the OS would accept
/// the registration: ubiquitous system and application shortcuts.
const RESERVED_HOTKEYS: &[&[&str]] = &[
    &["CTRL", "C"],
    &["CTRL", "V"],
    &["CTRL", "X"],
    &["CTRL", "A"],
    &["CTRL", "Z"],
    &["CTRL", "Y"],
    &["CTRL", "S"],
    &["CTRL", "O"],
    &["CTRL", "N"],
    &["CTRL", "P"],
    &["CTRL", "F"],
    &["CTRL", "H"],
    &["ALT", "TAB"],
    &["ALT", "F4"],
    &["ALT", "ESCAPE"],
    &["CTRL", "ALT", "DELETE"],
    &["CTRL", "SHIFT", "ESCAPE"],
    &["WIN", "L"],
    &["WIN", "D"],
    &["WIN", "E"],
    &["WIN", "R"],
    &["WIN", "TAB"],
    &["WIN", "X"],
];

/// Maps a key token onto its virtual-key code: function keys, digits,
/// letters, the navigation cluster, numpad, and punctuation.
pub fn virtual_key(token: &str) -> Option<u16> {
    let code = match token {
        "F1" => 0x70,
        "F2" => 0x71,
        "F3" => 0x72,
        "F4" => 0x73,
        "F5" => 0x74,
        "F6" => 0x75,
        "F7" => 0x76,
        "F8" => 0x77,
        "F9" => 0x78,
        "F10" => 0x79,
        "F11" => 0x7A,
        "F12" => 0x7B,
        "SPACE" => 0x20,
        "ENTER" => 0x0D,
        "TAB" => 0x09,
        "ESCAPE" | "ESC" => 0x1B,
        "BACKSPACE" => 0x08,
        "DELETE" => 0x2E,
        "INSERT" => 0x2D,
        "HOME" => 0x24,
        "END" => 0x23,
        "PAGEUP" => 0x21,
        "PAGEDOWN" => 0x22,
        "UP" => 0x26,
        "DOWN" => 0x28,
        "LEFT" => 0x25,
        "RIGHT" => 0x27,
        "NUMPAD0" => 0x60,
        "NUMPAD1" => 0x61,
        "NUMPAD2" => 0x62,
        "NUMPAD3" => 0x63,
        "NUMPAD4" => 0x64,
        "NUMPAD5" => 0x65,
        "NUMPAD6" => 0x66,
        "NUMPAD7" => 0x67,
        "NUMPAD8" => 0x68,
        "NUMPAD9" => 0x69,
        "MULTIPLY" => 0x6A,
        "ADD" => 0x6B,
        "SUBTRACT" => 0x6D,
        "DIVIDE" => 0x6F,
        "DECIMAL" => 0x6E,
        "PAUSE" => 0x13,
        "CAPSLOCK" => 0x14,
        "NUMLOCK" => 0x90,
        "SCROLLLOCK" => 0x91,
        "PRINTSCREEN" => 0x2C,
        "PLUS" => 0xBB,
        "MINUS" => 0xBD,
        "COMMA" => 0xBC,
        "PERIOD" => 0xBE,
        "SLASH" => 0xBF,
        "BACKSLASH" => 0xDC,
        "SEMICOLON" => 0xBA,
        "QUOTE" => 0xDE,
        "BRACKET_LEFT" => 0xDB,
        "BRACKET_RIGHT" => 0xDD,
        "GRAVE" => 0xC0,
        single if single.len() == 1 => {
            let c = single.chars().next().expect("single char");
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase() as u16
            } else {
                return None;
            }
        }
        _ => return None,
    };
    Some(code)
}

fn is_modifier(token: &str) -> bool {
    matches!(
        token,
        "CTRL" | "CONTROL" | "ALT" | "SHIFT" | "WIN" | "WINDOWS" | "SUPER"
    )
}

/// Parses a chord into `(modifier_mask, virtual_key)`. The no-repeat bit is
/// always set so a held chord fires once.
pub fn parse_chord(chord: &str) -> Result<(u32, u16), HotkeyError> {
    if chord.trim().is_empty() {
        return Err(HotkeyError::EmptyChord);
    }

    let mut modifiers = 0u32;
    let mut key: Option<String> = None;

    for part in chord.split('+') {
        let token = part.trim().to_uppercase();
        match token.as_str() {
            "CTRL" | "CONTROL" => modifiers |= MOD_CONTROL,
            "ALT" => modifiers |= MOD_ALT,
            "SHIFT" => modifiers |= MOD_SHIFT,
            "WIN" | "WINDOWS" | "SUPER" => modifiers |= MOD_WIN,
            "" => return Err(HotkeyError::InvalidChord(chord.to_string())),
            _ => {
                if key.is_some() {
                    // Two non-modifier tokens make the chord ambiguous.
                    return Err(HotkeyError::InvalidChord(chord.to_string()));
                }
                key = Some(token);
            }
        }
    }

    let key = key.ok_or_else(|| HotkeyError::InvalidChord(chord.to_string()))?;
    let vk = virtual_key(&key)
        .ok_or_else(|| HotkeyError::InvalidChord(chord.to_string()))?;
    Ok((modifiers | MOD_NOREPEAT, vk))
}

/// Normalizes a chord: modifiers in canonical Ctrl, Alt, Shift, Win order,
/// key token title-cased, whitespace around `+` trimmed.
pub fn normalize_chord(chord: &str) -> String {
    let upper = chord.to_uppercase();
    let mut parts: Vec<String> = Vec::new();

    if upper.contains("CTRL") || upper.contains("CONTROL") {
        parts.push("Ctrl".to_string());
    }
    if upper.contains("ALT") {
        parts.push("Alt".to_string());
    }
    if upper.contains("SHIFT") {
        parts.push("Shift".to_string());
    }
    if upper.contains("WIN") || upper.contains("SUPER") {
        parts.push("Win".to_string());
    }

    for part in chord.split('+') {
        let token = part.trim().to_uppercase();
        if !token.is_empty() && !is_modifier(&token) {
            parts.push(title_case(&token));
            break;
        }
    }

    parts.join("+")
}

/// Whether the chord matches a reserved combination, modifier aliases
/// collapsed.
pub fn is_reserved(chord: &str) -> bool {
    let mut tokens: Vec<String> = Vec::new();
    for part in chord.split('+') {
        let token = part.trim().to_uppercase();
        let canonical = match token.as_str() {
            "CONTROL" => "CTRL".to_string(),
            "WINDOWS" | "SUPER" => "WIN".to_string(),
            other => other.to_string(),
        };
        if !canonical.is_empty() && !tokens.contains(&canonical) {
            tokens.push(canonical);
        }
    }

    RESERVED_HOTKEYS.iter().any(|reserved| {
        reserved.len() == tokens.len() && reserved.iter().all(|t| tokens.contains(&t.to_string()))
    })
}

fn title_case(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => {
            first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
        }
        None => String::new(),
    }
}
