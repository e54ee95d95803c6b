use crate::error::VaultErrorCode;

fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_ascii_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if ch.is_ascii_graphic() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn format_line(
    code: VaultErrorCode,
    stage: &str,
    archive: &str,
    member: &str,
    reason: &str,
    err: &str,
) -> String {
    format!(
        "JVAULT_WARN code={} stage={} archive={} member={} reason={} err={}",
        code.as_str(),
        sanitize_value(stage),
        sanitize_value(archive),
        sanitize_value(member),
        sanitize_value(reason),
        sanitize_value(err),
    )
}

/// One grep-able line per fault that the run absorbed instead of failing.
pub fn emit(
    code: VaultErrorCode,
    stage: &str,
    archive: &str,
    member: &str,
    reason: &str,
    err: &str,
) {
    log::warn!("{}", format_line(code, stage, archive, member, reason, err));
}
