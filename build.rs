use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

/// Sources that read `JVAULT_*` environment variables.
const ENV_SOURCES: &[&str] = &[
    "src/env_loader.rs",
    "src/vault/config.rs",
    "src/vault/paths.rs",
];

fn is_env_char(byte: u8) -> bool {
    byte.is_ascii_uppercase() || byte.is_ascii_digit() || byte == b'_'
}

fn collect_env_keys(source: &str, out: &mut BTreeSet<String>) {
    const PREFIX: &[u8] = b"JVAULT_";
    let bytes = source.as_bytes();
    let mut i = 0usize;
    while i + PREFIX.len() <= bytes.len() {
        if &bytes[i..i + PREFIX.len()] == PREFIX {
            let mut j = i + PREFIX.len();
            while j < bytes.len() && is_env_char(bytes[j]) {
                j += 1;
            }
            if j > i + PREFIX.len() {
                if let Some(raw) = source.get(i..j) {
                    out.insert(raw.to_string());
                }
                i = j;
                continue;
            }
        }
        i += 1;
    }
}

fn write_generated_allowlist() -> std::io::Result<()> {
    let mut keys = BTreeSet::new();
    for file in ENV_SOURCES {
        println!("cargo:rerun-if-changed={file}");
        if let Ok(content) = fs::read_to_string(file) {
            collect_env_keys(&content, &mut keys);
        }
    }

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    let generated = Path::new(&out_dir).join("jvault_env_allowlist.rs");
    let mut f = fs::File::create(generated)?;
    writeln!(f, "pub const GENERATED_JVAULT_ENV_ALLOWLIST: &[&str] = &[")?;
    for key in keys {
        writeln!(f, "    \"{key}\",")?;
    }
    writeln!(f, "];")?;
    Ok(())
}

fn main() {
    write_generated_allowlist().expect("failed to generate JVAULT env allowlist");

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    let build_id = format!("{:x}-{:x}", now.as_secs(), now.subsec_nanos());

    println!("cargo:rustc-env=BUILD_UUID={build_id}");
    println!("cargo:rerun-if-changed=build.rs");
}
