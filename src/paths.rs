use std::path::PathBuf;

const APP_SUBDIR: &str = "vcam";

const ENV_RUNTIME_DIR: &str = "VCAMD_RUNTIME_DIR";
const ENV_CONFIG_DIR: &str = "VCAMD_CONFIG_DIR";
const ENV_STATE_DIR: &str = "VCAMD_STATE_DIR";
const ENV_HELPER_BIN: &str = "VCAMD_HELPER_BIN";
const ENV_HELPER_MODE: &str = "VCAMD_HELPER_MODE";
const ENV_HELPER_TIMEOUT: &str = "VCAMD_HELPER_TIMEOUT";

const DEFAULT_HELPER_BIN: &str = "/usr/libexec/vcam-helper";
const DEFAULT_HELPER_TIMEOUT_SECS: f64 = 15.0;

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Resolved filesystem layout for one daemon instance.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub runtime_dir: PathBuf,
    pub config_dir: PathBuf,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl DaemonPaths {
    pub fn resolve() -> Self {
        let runtime_dir = env_opt(ENV_RUNTIME_DIR).map(PathBuf::from).unwrap_or_else(|| {
            dirs::runtime_dir()
                .unwrap_or_else(|| {
                    #[cfg(unix)]
                    let uid = unsafe { libc::getuid() };
                    #[cfg(not(unix))]
                    let uid = 0;
                    PathBuf::from(format!("/tmp/{APP_SUBDIR}-{uid}"))
                })
                .join(APP_SUBDIR)
        });
        let config_dir = env_opt(ENV_CONFIG_DIR).map(PathBuf::from).unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("~/.config"))
                .join(APP_SUBDIR)
        });
        let state_dir = env_opt(ENV_STATE_DIR).map(PathBuf::from).unwrap_or_else(|| {
            dirs::state_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/state"))
                .join(APP_SUBDIR)
        });
        let log_dir = state_dir.join("logs");

        let paths = Self {
            runtime_dir,
            config_dir,
            state_dir,
            log_dir,
        };
        tracing::trace!(?paths, "Resolved daemon paths");
        paths
    }

    /// Create every directory, restricting the runtime dir to the owner.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.runtime_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.runtime_dir, std::fs::Permissions::from_mode(0o700))?;
        }
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.state_dir)?;
        std::fs::create_dir_all(&self.log_dir)?;
        Ok(())
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn audio_state_file(&self) -> PathBuf {
        self.state_dir.join("audio_state.json")
    }
}

/// Privileged helper binary ($VCAMD_HELPER_BIN or /usr/libexec/vcam-helper)
pub fn helper_bin() -> String {
    env_opt(ENV_HELPER_BIN).unwrap_or_else(|| DEFAULT_HELPER_BIN.to_string())
}

/// Helper elevation mode ($VCAMD_HELPER_MODE: auto|pkexec|systemd-run|direct)
pub fn helper_mode() -> String {
    env_opt(ENV_HELPER_MODE).unwrap_or_else(|| "pkexec".to_string())
}

/// Helper call deadline in seconds ($VCAMD_HELPER_TIMEOUT or 15)
pub fn helper_timeout_secs() -> f64 {
    env_opt(ENV_HELPER_TIMEOUT)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_HELPER_TIMEOUT_SECS)
}
