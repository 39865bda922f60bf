//! Pure string transforms shared by the pre-evaluator and the renderer
//! (spec §4.5: `pre`/`suf`/`quo`/`noext`/`lastext`/`ext` never depend on
//! anything but their own operand and static values, so both a constant-
//! folding pass and the general runtime path can call the same function
//! and are guaranteed to agree).

/// Strips a single trailing `.ext` component, if present. Mirrors the
/// original's `noext`: only the last extension is removed, and a leading
/// dot (a dotfile with no other dots) is not treated as an extension.
pub fn cut_extension(value: &str) -> String {
    match value.rfind('.') {
        Some(idx) if idx > 0 => value[..idx].to_string(),
        _ => value.to_string(),
    }
}

/// Returns the final `.ext` component without the leading dot, or an empty
/// string if there is none.
pub fn last_extension(value: &str) -> String {
    match value.rfind('.') {
        Some(idx) if idx > 0 => value[idx + 1..].to_string(),
        _ => String::new(),
    }
}

/// Keeps `value` only if its last extension is one of `allowed`; otherwise
/// returns `None` (the `ext` modifier drops the value from its argument).
pub fn extension_filter<'a>(value: &'a str, allowed: &[String]) -> Option<&'a str> {
    let ext = last_extension(value);
    if allowed.iter().any(|a| a == &ext) {
        Some(value)
    } else {
        None
    }
}

/// `pre`: prepends `prefix` to `value`.
pub fn apply_prefix(prefix: &str, value: &str) -> String {
    format!("{prefix}{value}")
}

/// `suf`: appends `suffix` to `value`.
pub fn apply_suffix(value: &str, suffix: &str) -> String {
    format!("{value}{suffix}")
}

/// `quo`: identity. This crate has no later word-splitting pass for `quo`
/// to protect a value from, so the modifier only participates in table
/// bookkeeping (it does not change the rendered text).
pub fn apply_quote(value: &str) -> String {
    value.to_string()
}
