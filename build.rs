use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const ENV_PREFIX: &str = "CASE_INTAKE_";

fn collect_rs_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_rs_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
    Ok(())
}

fn is_env_key(candidate: &str) -> bool {
    candidate.len() > ENV_PREFIX.len()
        && candidate.starts_with(ENV_PREFIX)
        && candidate
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Contents of the string literals in `source`, skipping comments and char
/// literals. Raw strings are returned verbatim; escapes are left undecoded.
fn string_literals(source: &str) -> Vec<&str> {
    let bytes = source.as_bytes();
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        let rest = &bytes[i..];
        if rest.starts_with(b"//") {
            i += rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        } else if rest.starts_with(b"/*") {
            i += rest
                .windows(2)
                .position(|w| w == b"*/")
                .map_or(rest.len(), |p| p + 2);
        } else if bytes[i] == b'r'
            && (i == 0 || !is_ident_byte(bytes[i - 1]) || bytes[i - 1] == b'b')
            && matches!(bytes.get(i + 1), Some(b'"') | Some(b'#'))
        {
            let hashes = rest[1..].iter().take_while(|&&b| b == b'#').count();
            let open = i + 1 + hashes;
            if bytes.get(open) != Some(&b'"') {
                i += 1;
                continue;
            }
            let mut terminator = vec![b'"'];
            terminator.extend(std::iter::repeat_n(b'#', hashes));
            let body = &bytes[open + 1..];
            match body.windows(terminator.len()).position(|w| w == terminator) {
                Some(end) => {
                    out.push(&source[open + 1..open + 1 + end]);
                    i = open + 1 + end + terminator.len();
                }
                None => break,
            }
        } else if bytes[i] == b'"' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j] != b'"' {
                j += if bytes[j] == b'\\' { 2 } else { 1 };
            }
            out.push(&source[i + 1..j.min(bytes.len())]);
            i = j + 1;
        } else if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\\') {
                let close = bytes[i + 2..].iter().position(|&b| b == b'\'');
                i += close.map_or(bytes.len(), |p| p + 3);
            } else if bytes.get(i + 2) == Some(&b'\'') {
                i += 3;
            } else {
                i += 1;
            }
        } else {
            i += 1;
        }
    }
    out
}

fn collect_env_keys(source: &str, out: &mut BTreeSet<String>) {
    for literal in string_literals(source) {
        if is_env_key(literal) {
            out.insert(literal.to_string());
        }
    }
}

fn write_generated_allowlist(files: &[PathBuf]) -> std::io::Result<()> {
    let mut keys = BTreeSet::new();
    for file in files {
        if let Ok(content) = fs::read_to_string(file) {
            collect_env_keys(&content, &mut keys);
        }
    }

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    let generated = Path::new(&out_dir).join("intake_env_allowlist.rs");
    let mut f = fs::File::create(generated)?;
    writeln!(f, "pub const GENERATED_INTAKE_ENV_ALLOWLIST: &[&str] = &[")?;
    for key in keys {
        writeln!(f, "    \"{key}\",")?;
    }
    writeln!(f, "];")?;
    Ok(())
}

fn main() {
    let mut files = Vec::new();
    collect_rs_files(Path::new("src"), &mut files).expect("failed to scan src/");
    files.sort();
    write_generated_allowlist(&files).expect("failed to generate CASE_INTAKE env allowlist");

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("clock before unix epoch");
    let version = env::var("CARGO_PKG_VERSION").unwrap_or_default();
    println!(
        "cargo:rustc-env=BUILD_UUID={version}-{:x}-{:x}",
        now.as_secs(),
        now.subsec_nanos()
    );

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
    for file in &files {
        println!("cargo:rerun-if-changed={}", file.display());
    }
}
