use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Entry points of the bundled effect kernels and the env var each
/// compiled object path is exported through.
const EFFECT_ENTRIES: [(&str, &str); 4] = [
    ("pixel_main", "EFFECT_PIXEL_CSO_PATH"),
    ("bicubic_main", "EFFECT_BICUBIC_CSO_PATH"),
    ("lanczos6_main", "EFFECT_LANCZOS6_CSO_PATH"),
    ("sharpen_main", "EFFECT_SHARPEN_CSO_PATH"),
];

const HLSL_PATH: &str = "src/platform/windows/effects_cs.hlsl";

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={HLSL_PATH}");
    println!("cargo:rustc-check-cfg=cfg(has_precompiled_effects)");
    println!("cargo:rerun-if-env-changed=SNOW_MAGNIFY_FXC_PATH");
    println!("cargo:rerun-if-env-changed=SNOW_MAGNIFY_PRECOMPILE_SHADER");

    if env::var("CARGO_CFG_TARGET_OS").unwrap_or_default() != "windows" {
        return;
    }
    let hlsl_path = PathBuf::from(HLSL_PATH);
    if !hlsl_path.exists() {
        return;
    }

    // SNOW_MAGNIFY_PRECOMPILE_SHADER=0 leaves compilation to D3DCompile at runtime.
    let precompile_enabled = env::var("SNOW_MAGNIFY_PRECOMPILE_SHADER")
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            !(v == "0" || v == "false" || v == "no" || v == "off")
        })
        .unwrap_or(true);
    if !precompile_enabled {
        println!(
            "cargo:warning=SNOW_MAGNIFY_PRECOMPILE_SHADER is disabled; effect kernels compile at runtime"
        );
        return;
    }

    let Ok(out_dir) = env::var("OUT_DIR").map(PathBuf::from) else {
        println!("cargo:warning=OUT_DIR is not set; effect kernels compile at runtime");
        return;
    };

    // All entries or none: the crate embeds the objects as one set.
    let mut compiled = Vec::with_capacity(EFFECT_ENTRIES.len());
    for (entry, env_name) in EFFECT_ENTRIES {
        let cso_path = out_dir.join(format!("{entry}.cso"));
        match compile_with_fxc(&hlsl_path, &cso_path, entry) {
            Ok(()) => compiled.push((env_name, cso_path)),
            Err(detail) => {
                println!(
                    "cargo:warning=failed to precompile {entry} with fxc ({detail}); effect kernels compile at runtime"
                );
                return;
            }
        }
    }
    for (env_name, cso_path) in compiled {
        println!("cargo:rustc-env={env_name}={}", cso_path.display());
    }
    println!("cargo:rustc-cfg=has_precompiled_effects");
}

fn compile_with_fxc(hlsl_path: &Path, cso_path: &Path, entry_point: &str) -> Result<(), String> {
    let mut attempts = Vec::new();
    let mut attempted = false;
    for fxc in fxc_candidates() {
        if !is_path_lookup(&fxc) && !fxc.is_file() {
            continue;
        }
        attempted = true;
        match Command::new(&fxc)
            .args(["/T", "cs_5_0", "/E", entry_point, "/O3", "/Fo"])
            .arg(cso_path)
            .arg(hlsl_path)
            .output()
        {
            Ok(output) if output.status.success() => return Ok(()),
            Ok(output) => {
                attempts.push(format!("{}: {}", fxc.display(), summarize_output(&output)))
            }
            Err(err) => attempts.push(format!("{}: {}", fxc.display(), err)),
        }
    }

    if !attempted {
        return Err(
            "no usable fxc.exe found (PATH/Windows SDK). set SNOW_MAGNIFY_FXC_PATH to an explicit fxc path".to_string()
        );
    }

    Err(attempts.join(" | "))
}

fn is_path_lookup(path: &Path) -> bool {
    path.file_name().is_some()
        && path.parent().is_none()
        && path
            .file_name()
            .is_some_and(|name| name.eq_ignore_ascii_case("fxc.exe"))
}

fn summarize_output(output: &Output) -> String {
    let status = output
        .status
        .code()
        .map_or_else(|| "terminated".to_string(), |code| format!("exit {code}"));
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let mut diagnostic = if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        "no compiler diagnostic output".to_string()
    };
    if diagnostic.len() > 260 {
        diagnostic.truncate(260);
        diagnostic.push_str("...");
    }
    format!("{status}, {diagnostic}")
}

fn fxc_candidates() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(path) = env::var("SNOW_MAGNIFY_FXC_PATH") {
        let path = path.trim();
        if !path.is_empty() {
            out.push(PathBuf::from(path));
        }
    }

    out.push(PathBuf::from("fxc.exe"));

    if let Ok(bin_path) = env::var("WindowsSdkVerBinPath") {
        let bin = PathBuf::from(bin_path);
        out.push(bin.join("x64").join("fxc.exe"));
        out.push(bin.join("x86").join("fxc.exe"));
    }

    if let (Ok(sdk_dir), Ok(sdk_version)) =
        (env::var("WindowsSdkDir"), env::var("WindowsSDKVersion"))
    {
        let version = sdk_version.trim_matches(|c| c == '\\' || c == '/');
        if !version.is_empty() {
            let bin = PathBuf::from(sdk_dir).join("bin").join(version);
            out.push(bin.join("x64").join("fxc.exe"));
            out.push(bin.join("x86").join("fxc.exe"));
        }
    }

    out.extend(scan_windows_kits_fxc());

    dedup_paths(out)
}

fn scan_windows_kits_fxc() -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(program_files) = env::var("ProgramFiles(x86)") else {
        return out;
    };

    let bin_root = PathBuf::from(program_files)
        .join("Windows Kits")
        .join("10")
        .join("bin");
    let Ok(entries) = std::fs::read_dir(bin_root) else {
        return out;
    };

    let mut dirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    dirs.reverse();

    for dir in dirs {
        out.push(dir.join("x64").join("fxc.exe"));
        out.push(dir.join("x86").join("fxc.exe"));
    }

    out
}

fn dedup_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut unique = Vec::new();
    for path in paths {
        if unique.iter().any(|seen| seen == &path) {
            continue;
        }
        unique.push(path);
    }
    unique
}
