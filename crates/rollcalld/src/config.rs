use rollcall_core::DistanceMetric;
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path or `stub://WxH[?frames=N]` (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Where attendance CSV exports are written.
    pub export_dir: PathBuf,
    /// HTTP listen address.
    pub bind_addr: String,
    /// Downscale factor applied before detection, in (0, 1].
    pub scale: f32,
    /// Analyze one frame out of every N.
    pub process_every_n: u64,
    /// A match is accepted only strictly below this distance.
    pub match_threshold: f32,
    pub distance_metric: DistanceMetric,
    /// JPEG quality of the streamed frames, 1-100.
    pub jpeg_quality: u8,
    /// TrueType font for face labels. The bundled font when unset.
    pub font_path: Option<PathBuf>,
    /// Outgoing mail; `None` disables notifications.
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

const DEFAULT_SCALE: f32 = 0.5;

impl Config {
    /// Load configuration from `ROLLCALL_*` (and `SMTP_*`) environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let model_dir = var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("models"));

        let db_path = var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("face_recognition.db"));

        let scale = parsed(&var, "ROLLCALL_SCALE", DEFAULT_SCALE);
        let scale = if scale.is_finite() && scale > 0.0 {
            scale.min(1.0)
        } else {
            DEFAULT_SCALE
        };

        let distance_metric = match var("ROLLCALL_DISTANCE_METRIC") {
            Some(v) => v.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to cosine distance");
                DistanceMetric::default()
            }),
            None => DistanceMetric::default(),
        };

        let smtp = match (var("SMTP_USER"), var("SMTP_PASS")) {
            (Some(username), Some(password)) if !username.is_empty() => Some(SmtpConfig {
                host: var("SMTP_HOST").unwrap_or_else(|| "smtp.gmail.com".to_string()),
                port: parsed(&var, "SMTP_PORT", 587),
                username,
                password,
            }),
            _ => None,
        };

        Self {
            camera_device: var("ROLLCALL_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            model_dir,
            db_path,
            export_dir: var("ROLLCALL_EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            bind_addr: var("ROLLCALL_BIND_ADDR").unwrap_or_else(|| "127.0.0.1:5000".to_string()),
            scale,
            process_every_n: parsed(&var, "ROLLCALL_PROCESS_EVERY_N", 2u64).max(1),
            match_threshold: parsed(
                &var,
                "ROLLCALL_MATCH_THRESHOLD",
                distance_metric.default_threshold(),
            ),
            distance_metric,
            jpeg_quality: parsed(&var, "ROLLCALL_JPEG_QUALITY", 80u8).clamp(1, 100),
            font_path: var("ROLLCALL_FONT_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            smtp,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[("HOME", "/home/ada")]);
        assert_eq!(c.camera_device, "/dev/video0");
        assert_eq!(c.db_path, PathBuf::from("/home/ada/.local/share/rollcall/face_recognition.db"));
        assert_eq!(c.model_dir, PathBuf::from("/home/ada/.local/share/rollcall/models"));
        assert_eq!(c.bind_addr, "127.0.0.1:5000");
        assert_eq!(c.scale, 0.5);
        assert_eq!(c.process_every_n, 2);
        assert_eq!(c.match_threshold, 0.6);
        assert_eq!(c.distance_metric, DistanceMetric::Cosine);
        assert_eq!(c.jpeg_quality, 80);
        assert!(c.font_path.is_none());
        assert!(c.smtp.is_none());
        assert!(c.scrfd_model_path().ends_with("models/det_10g.onnx"));
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let c = config(&[
            ("ROLLCALL_SCALE", "3.0"),
            ("ROLLCALL_PROCESS_EVERY_N", "0"),
            ("ROLLCALL_JPEG_QUALITY", "0"),
        ]);
        assert_eq!(c.scale, 1.0);
        assert_eq!(c.process_every_n, 1);
        assert_eq!(c.jpeg_quality, 1);

        let c = config(&[("ROLLCALL_SCALE", "-1"), ("ROLLCALL_PROCESS_EVERY_N", "banana")]);
        assert_eq!(c.scale, 0.5);
        assert_eq!(c.process_every_n, 2);
    }

    #[test]
    fn test_smtp_requires_credentials() {
        let c = config(&[("SMTP_USER", "attendance@example.com")]);
        assert!(c.smtp.is_none());

        let c = config(&[
            ("SMTP_USER", "attendance@example.com"),
            ("SMTP_PASS", "hunter2"),
            ("SMTP_PORT", "2525"),
        ]);
        let smtp = c.smtp.unwrap();
        assert_eq!(smtp.host, "smtp.gmail.com");
        assert_eq!(smtp.port, 2525);
    }

    #[test]
    fn test_metric_from_env() {
        let c = config(&[("ROLLCALL_DISTANCE_METRIC", "euclidean")]);
        assert_eq!(c.distance_metric, DistanceMetric::Euclidean);
        assert_eq!(c.match_threshold, 1.095);
        let c = config(&[("ROLLCALL_DISTANCE_METRIC", "manhattan")]);
        assert_eq!(c.distance_metric, DistanceMetric::Cosine);
    }

    #[test]
    fn test_explicit_threshold_overrides_metric_default() {
        let c = config(&[
            ("ROLLCALL_DISTANCE_METRIC", "euclidean"),
            ("ROLLCALL_MATCH_THRESHOLD", "0.4"),
        ]);
        assert_eq!(c.match_threshold, 0.4);
    }
}
