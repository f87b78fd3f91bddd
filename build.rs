use std::env;
use std::process::Command;

fn get_rustc_version() -> String {
    let Ok(rustc) = env::var("RUSTC") else {
        return String::from("unknown");
    };

    let Ok(rust_version) = Command::new(&rustc).arg("--version").output() else {
        return String::from("unknown");
    };

    if rust_version.status.code().unwrap_or(1) != 0 {
        panic!(
            "`{} --version` {}\n\n--- stdout\n{}\n--- stderr{}",
            &rustc,
            match rust_version.status.code() {
                Some(code) => format!("exited with status code {}", code),
                None => String::from("was killed by signal"),
            },
            String::from_utf8_lossy(rust_version.stdout.as_slice()),
            String::from_utf8_lossy(rust_version.stderr.as_slice())
        );
    }

    let output = String::from_utf8_lossy(rust_version.stdout.as_slice());
    output.trim_start_matches("rustc ").trim().into()
}

fn main() {
    let rustc_version = get_rustc_version();

    let server_agent = format!(
        "bolt-session/{} Rust/{}",
        env::var("CARGO_PKG_VERSION").unwrap_or_default(),
        rustc_version,
    );

    println!("cargo:rustc-env=BOLT_SESSION_DEFAULT_SERVER_AGENT={}", server_agent);
    println!("cargo:rerun-if-changed=build.rs");
}
