//! Detection of interactive terminals and CI environments.

use std::io::IsTerminal;

/// Variables set by common CI systems.
const CI_ENV_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "BUILDKITE",
    "CIRCLECI",
    "JENKINS_URL",
    "TF_BUILD",
];

/// True when running under a recognized CI system. `CI=false` / `CI=0` is
/// honored as an explicit opt-out.
pub fn is_ci() -> bool {
    CI_ENV_VARS.iter().any(|var| match std::env::var(var) {
        Ok(value) => !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false"),
        Err(_) => false,
    })
}

/// True when stdin is a terminal and we are not in CI. Prompts are only
/// attempted when this holds.
pub fn is_interactive() -> bool {
    std::io::stdin().is_terminal() && !is_ci()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        unsafe {
            for var in CI_ENV_VARS {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_ci_detection() {
        clear();
        assert!(!is_ci());

        unsafe { std::env::set_var("GITHUB_ACTIONS", "true") };
        assert!(is_ci());
        assert!(!is_interactive());

        clear();
        unsafe { std::env::set_var("CI", "false") };
        assert!(!is_ci());
        clear();
    }
}
