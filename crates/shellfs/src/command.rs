//! Logical command name resolution.
//!
//! Remote hosts differ in where (and under which names) tools live, so a
//! logical name like `ls` is mapped to a literal executable per filesystem.

use crate::constants::keys;
use crate::environment::Environment;

/// Resolve a logical command name to the literal executable to run.
///
/// First match wins:
/// 1. the `command.<name>` entry, verbatim
/// 2. `<bin_dir><separator><name>` when a binary directory is configured
/// 3. `name` itself, left to the remote `PATH`
///
/// A `command.<name>` entry holding null counts as absent.
pub fn resolve_command(
    environment: &Environment,
    bin_dir: Option<&str>,
    separator: &str,
    name: &str,
) -> String {
    if let Some(command) = environment.get_string(&format!("{}{}", keys::COMMAND_PREFIX, name)) {
        return command;
    }
    match bin_dir {
        Some(dir) => format!("{dir}{separator}{name}"),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvValue;

    #[test]
    fn test_bare_name() {
        assert_eq!(resolve_command(&Environment::new(), None, "/", "ls"), "ls");
    }

    #[test]
    fn test_bin_dir() {
        assert_eq!(
            resolve_command(&Environment::new(), Some("/usr/bin"), "/", "ls"),
            "/usr/bin/ls"
        );
    }

    #[test]
    fn test_override_beats_bin_dir() {
        let env = Environment::new().with("command.ls", "/opt/busybox/ls");
        assert_eq!(
            resolve_command(&env, Some("/usr/bin"), "/", "ls"),
            "/opt/busybox/ls"
        );
        // Other commands still use the bin dir.
        assert_eq!(resolve_command(&env, Some("/usr/bin"), "/", "stat"), "/usr/bin/stat");
    }

    #[test]
    fn test_override_is_verbatim() {
        let env = Environment::new().with("command.stat", "busybox stat");
        assert_eq!(resolve_command(&env, None, "/", "stat"), "busybox stat");
    }

    #[test]
    fn test_null_override_falls_through() {
        let env = Environment::new().with("command.ls", EnvValue::Null);
        assert_eq!(resolve_command(&env, Some("/bin"), "/", "ls"), "/bin/ls");
        assert_eq!(resolve_command(&env, None, "/", "ls"), "ls");
    }
}
