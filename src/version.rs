//! Version string formatting for the startup log and the sample-config
//! header.

/// Format a full version string for `cmd`:
/// `myApp 1.0 (git: main b2fecc) (build: 2023-01-02T14:22:23Z)`.
///
/// Empty version falls back to "unknown"; the git part appears when
/// either branch or commit is known; the build part only when set.
pub fn format_full_version(
    cmd: &str,
    version: &str,
    branch: &str,
    commit: &str,
    build: &str,
) -> String {
    let mut parts = vec![cmd.to_string()];

    if version.is_empty() {
        parts.push("unknown".to_string());
    } else {
        parts.push(version.to_string());
    }

    if !branch.is_empty() || !commit.is_empty() {
        let branch = if branch.is_empty() { "unknown" } else { branch };
        let commit = if commit.is_empty() { "unknown" } else { commit };
        parts.push(format!("(git: {branch} {commit})"));
    }

    if !build.is_empty() {
        parts.push(format!("(build: {build})"));
    }

    parts.join(" ")
}

/// Full version of this build, from compile-time metadata. Branch, commit
/// and build timestamp are injected via environment at build time.
pub fn full_version() -> String {
    format_full_version(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_BRANCH").unwrap_or(""),
        option_env!("GIT_COMMIT").unwrap_or(""),
        option_env!("BUILD_TIMESTAMP").unwrap_or(""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_parts() {
        assert_eq!(
            format_full_version("myApp", "1.0", "main", "b2fecc", "2023-01-02T14:22:23Z"),
            "myApp 1.0 (git: main b2fecc) (build: 2023-01-02T14:22:23Z)"
        );
    }

    #[test]
    fn test_missing_version_is_unknown() {
        assert_eq!(format_full_version("myApp", "", "", "", ""), "myApp unknown");
    }

    #[test]
    fn test_partial_git_info() {
        assert_eq!(
            format_full_version("myApp", "1.0", "", "b2fecc", ""),
            "myApp 1.0 (git: unknown b2fecc)"
        );
        assert_eq!(
            format_full_version("myApp", "1.0", "main", "", ""),
            "myApp 1.0 (git: main unknown)"
        );
    }

    #[test]
    fn test_no_git_no_build() {
        assert_eq!(format_full_version("myApp", "1.0", "", "", ""), "myApp 1.0");
    }
}
