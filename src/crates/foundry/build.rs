use std::env;
use std::process::Command;

fn main() {
    let git_commit = env::var("FOUNDRY_GIT_COMMIT").unwrap_or_else(|_| {
        Command::new("git")
            .args(["rev-parse", "--short", "HEAD"])
            .output()
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| String::from_utf8(output.stdout).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string())
    });
    println!("cargo:rustc-env=FOUNDRY_GIT_COMMIT={}", git_commit);

    let built_at = chrono::Utc::now().to_rfc3339();
    println!("cargo:rustc-env=FOUNDRY_BUILT_AT={}", built_at);

    // Migrations are embedded by sqlx::migrate!
    println!("cargo:rerun-if-changed=migrations");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=FOUNDRY_GIT_COMMIT");
}
