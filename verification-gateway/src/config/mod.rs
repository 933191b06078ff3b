use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub server: ServerSettings,
    pub backend: BackendSettings,
    #[serde(default)]
    pub routes: RouteSettings,
    #[serde(default)]
    pub scanner: ScannerSettings,
    pub storage: StorageSettings,
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Mark the session cookie `Secure`; enable behind HTTPS.
    #[serde(default)]
    pub secure_cookies: bool,
}

#[derive(Deserialize, Clone, Debug)]
pub struct BackendSettings {
    /// Base URL of the portal REST backend.
    pub url: String,
    #[serde(default = "default_profile_status_path")]
    pub profile_status_path: String,
    #[serde(default = "default_patient_signin_path")]
    pub patient_signin_path: String,
    #[serde(default = "default_clinician_signin_path")]
    pub clinician_signin_path: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl BackendSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_profile_status_path() -> String {
    "/health-card-status".to_string()
}

fn default_patient_signin_path() -> String {
    "/signin".to_string()
}

fn default_clinician_signin_path() -> String {
    "/doctor/signin".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

/// Portal surfaces the access guard and sign-in flow need to know about.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct RouteSettings {
    pub home: String,
    pub signin: String,
    pub clinician_signin: String,
    /// Scan surface; also the prefix of the scanner API.
    pub scan: String,
    pub registration: String,
    /// Post-scan landing surface (identity confirmation).
    pub landing: String,
    pub patient_home: String,
    pub clinician_home: String,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            home: "/".to_string(),
            signin: "/signin".to_string(),
            clinician_signin: "/doctor/signin".to_string(),
            scan: "/scanner".to_string(),
            registration: "/aadhaar-registration".to_string(),
            landing: "/auth".to_string(),
            patient_home: "/userdashboard".to_string(),
            clinician_home: "/doctordashboard".to_string(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ScannerSettings {
    pub frames_per_second: u32,
    pub success_redirect_delay_ms: u64,
    pub preferred_device: Option<String>,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            frames_per_second: 10,
            success_redirect_delay_ms: 1500,
            preferred_device: None,
        }
    }
}

impl ScannerSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.frames_per_second.max(1)))
    }

    pub fn success_redirect_delay(&self) -> Duration {
        Duration::from_millis(self.success_redirect_delay_ms)
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct StorageSettings {
    /// JSON file backing the durable verification store.
    pub durable_path: PathBuf,
    #[serde(default = "default_key_prefix")]
    pub verification_key_prefix: String,
}

fn default_key_prefix() -> String {
    "verification".to_string()
}

#[derive(Deserialize, Clone, Debug)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// OTLP collector endpoint; span export is off when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;

    // Check if we're already in verification-gateway directory or need to navigate to it
    let configuration_directory = if base_path.ends_with("verification-gateway") {
        base_path.join("config")
    } else {
        base_path.join("verification-gateway").join("config")
    };

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")).required(true))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_interval_targets_ten_frames_per_second() {
        let scanner = ScannerSettings::default();
        assert_eq!(scanner.sample_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_zero_fps_does_not_divide_by_zero() {
        let scanner = ScannerSettings {
            frames_per_second: 0,
            ..ScannerSettings::default()
        };
        assert_eq!(scanner.sample_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_minimal_yaml_fills_defaults() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9000
backend:
  url: "http://backend"
storage:
  durable_path: "/tmp/verification.json"
"#;
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.backend.profile_status_path, "/health-card-status");
        assert_eq!(settings.routes, RouteSettings::default());
        assert_eq!(settings.scanner.frames_per_second, 10);
        assert_eq!(settings.storage.verification_key_prefix, "verification");
        assert!(settings.observability.otlp_endpoint.is_none());
    }
}
