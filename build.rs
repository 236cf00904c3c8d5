use std::process::Command;

fn git(args: &[&str]) -> Option<std::process::Output> {
    Command::new("git").args(args).output().ok()
}

fn main() {
    let build_id = match git(&["rev-parse", "--short", "HEAD"]) {
        Some(out) if out.status.success() => {
            let hash = String::from_utf8_lossy(&out.stdout).trim().to_string();
            let dirty = git(&["diff", "--quiet"]).is_some_and(|o| !o.status.success());
            if dirty { format!("{}-dirty", hash) } else { hash }
        }
        _ => "unknown".to_string(),
    };

    println!("cargo:rustc-env=GIT_HASH={}", build_id);
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}
