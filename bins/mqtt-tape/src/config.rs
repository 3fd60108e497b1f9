use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use tape_api::{PayloadEncoding, QoS};
use transport_mqtt::MqttConfig;

use crate::error::CliError;
use crate::topics::load_topics;

#[derive(Parser)]
#[command(name = "mqtt-tape", about = "Record and replay MQTT traffic")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture messages until Ctrl+C, then write the log file
    Record(RecordArgs),
    /// Republish a log file with its original timing
    Replay(ReplayArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ConnArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "mqtt-tape.toml", env = "MQTT_TAPE_CONFIG")]
    pub config: String,

    /// Broker host
    #[arg(long)]
    pub host: Option<String>,

    /// Broker port
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub client_id: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long, env = "MQTT_TAPE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Log file (CSV)
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Store payloads as base64 instead of text
    #[arg(long)]
    pub encode_b64: bool,

    #[arg(long)]
    pub enable_ssl: bool,

    /// CA certificate (PEM)
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// Client certificate (PEM)
    #[arg(long)]
    pub certfile: Option<PathBuf>,

    /// Client private key (PEM)
    #[arg(long)]
    pub keyfile: Option<PathBuf>,

    /// Skip server certificate and hostname verification
    #[arg(long)]
    pub tls_insecure: bool,
}

#[derive(Args, Clone, Debug)]
pub struct RecordArgs {
    #[command(flatten)]
    pub conn: ConnArgs,

    /// JSON file with `{"topics": [...]}`; all topics when omitted
    #[arg(long)]
    pub topics: Option<PathBuf>,

    /// Subscription QoS
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub qos: Option<u8>,
}

#[derive(Args, Clone, Debug)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub conn: ConnArgs,

    /// Start over after the last message, until Ctrl+C
    #[arg(long = "loop")]
    pub looping: bool,
}

// ---- TOML Config ----

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub file: Option<PathBuf>,
    pub encode_b64: Option<bool>,
    pub topics: Option<PathBuf>,
    pub qos: Option<QoS>,
    #[serde(rename = "loop")]
    pub looping: Option<bool>,
    #[serde(default)]
    pub mqtt: MqttConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CliError::config("read", format!("'{path}': {e}")))?;
        toml::from_str(&content).map_err(|e| CliError::config("parse", format!("'{path}': {e}")))
    }

    /// Load `path`, or fall back to defaults when the file does not exist.
    pub fn load_or_default(path: &str) -> Result<Self, CliError> {
        match Self::load(path) {
            Ok(c) => Ok(c),
            Err(e) => {
                if Path::new(path).exists() {
                    return Err(e);
                }
                tracing::debug!(config = %path, "no config file, using defaults");
                Ok(Config::default())
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Settings shared by both commands after merging CLI over the config file.
#[derive(Debug, Clone)]
pub struct Effective {
    pub mqtt: MqttConfig,
    pub file: PathBuf,
    pub encoding: PayloadEncoding,
}

impl Effective {
    pub fn new(args: &ConnArgs, cfg: &Config) -> Result<Self, CliError> {
        let file = args
            .file
            .clone()
            .or_else(|| cfg.file.clone())
            .ok_or_else(|| CliError::config("file", "no log file given (use --file)"))?;

        let mut mqtt = cfg.mqtt.clone();
        if let Some(host) = &args.host {
            mqtt.host = host.clone();
        }
        if let Some(port) = args.port {
            mqtt.port = port;
        }
        if let Some(client_id) = &args.client_id {
            mqtt.client_id = client_id.clone();
        }
        if args.username.is_some() {
            mqtt.username = args.username.clone();
        }
        if args.password.is_some() {
            mqtt.password = args.password.clone();
        }
        mqtt.ssl.enable |= args.enable_ssl;
        mqtt.ssl.insecure |= args.tls_insecure;
        if args.ca_cert.is_some() {
            mqtt.ssl.ca_cert = args.ca_cert.clone();
        }
        if args.certfile.is_some() {
            mqtt.ssl.certfile = args.certfile.clone();
        }
        if args.keyfile.is_some() {
            mqtt.ssl.keyfile = args.keyfile.clone();
        }

        let b64 = args.encode_b64 || cfg.encode_b64.unwrap_or(false);
        Ok(Self {
            mqtt,
            file,
            encoding: PayloadEncoding::from_flag(b64),
        })
    }
}

#[derive(Debug)]
pub struct EffectiveRecord {
    pub base: Effective,
    pub topics: Vec<String>,
    pub qos: QoS,
}

impl EffectiveRecord {
    pub fn new(args: &RecordArgs) -> Result<Self, CliError> {
        let cfg = Config::load_or_default(&args.conn.config)?;
        Self::merge(args, &cfg)
    }

    fn merge(args: &RecordArgs, cfg: &Config) -> Result<Self, CliError> {
        let base = Effective::new(&args.conn, cfg)?;
        let topics = match args.topics.as_ref().or(cfg.topics.as_ref()) {
            Some(path) => load_topics(path)?,
            None => Vec::new(),
        };
        let qos = match args.qos {
            Some(level) => QoS::try_from(level).map_err(|e| CliError::config("qos", e))?,
            None => cfg.qos.unwrap_or_default(),
        };
        Ok(Self { base, topics, qos })
    }
}

#[derive(Debug)]
pub struct EffectiveReplay {
    pub base: Effective,
    pub looping: bool,
}

impl EffectiveReplay {
    pub fn new(args: &ReplayArgs) -> Result<Self, CliError> {
        let cfg = Config::load_or_default(&args.conn.config)?;
        Self::merge(args, &cfg)
    }

    fn merge(args: &ReplayArgs, cfg: &Config) -> Result<Self, CliError> {
        Ok(Self {
            base: Effective::new(&args.conn, cfg)?,
            looping: args.looping || cfg.looping.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Config {
        toml::from_str(content).unwrap()
    }

    fn record_args(argv: &[&str]) -> RecordArgs {
        let mut full = vec!["mqtt-tape", "record"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Record(args) => args,
            Commands::Replay(_) => panic!("expected record"),
        }
    }

    fn replay_args(argv: &[&str]) -> ReplayArgs {
        let mut full = vec!["mqtt-tape", "replay"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Replay(args) => args,
            Commands::Record(_) => panic!("expected replay"),
        }
    }

    #[test]
    fn cli_alone_uses_defaults() {
        let args = record_args(&["--file", "out.csv"]);
        let eff = EffectiveRecord::merge(&args, &Config::default()).unwrap();
        assert_eq!(eff.base.file, PathBuf::from("out.csv"));
        assert_eq!(eff.base.mqtt, MqttConfig::default());
        assert_eq!(eff.base.encoding, PayloadEncoding::Text);
        assert!(eff.topics.is_empty());
        assert_eq!(eff.qos, QoS::AtMostOnce);
    }

    #[test]
    fn missing_file_is_config_error() {
        let args = replay_args(&[]);
        let err = EffectiveReplay::merge(&args, &Config::default()).unwrap_err();
        assert!(matches!(err, CliError::Config { context: "file", .. }));
    }

    #[test]
    fn cli_overrides_file_values() {
        let cfg = parse(
            r#"
            file = "from-config.csv"
            encode_b64 = true
            qos = 1

            [mqtt]
            host = "broker.lan"
            port = 1884
            username = "cfg-user"

            [mqtt.ssl]
            enable = true
            ca_cert = "/etc/ca.pem"
            "#,
        );

        let args = record_args(&["--file", "cli.csv", "--port", "8883", "--qos", "2", "--tls-insecure"]);
        let eff = EffectiveRecord::merge(&args, &cfg).unwrap();
        assert_eq!(eff.base.file, PathBuf::from("cli.csv"));
        assert_eq!(eff.base.mqtt.host, "broker.lan");
        assert_eq!(eff.base.mqtt.port, 8883);
        assert_eq!(eff.base.mqtt.username.as_deref(), Some("cfg-user"));
        assert!(eff.base.mqtt.ssl.enable);
        assert!(eff.base.mqtt.ssl.insecure);
        assert_eq!(eff.base.mqtt.ssl.ca_cert, Some(PathBuf::from("/etc/ca.pem")));
        assert_eq!(eff.base.encoding, PayloadEncoding::Base64);
        assert_eq!(eff.qos, QoS::ExactlyOnce);
    }

    #[test]
    fn loop_comes_from_flag_or_file() {
        let cfg = parse("file = \"log.csv\"\nloop = true\n");
        assert!(EffectiveReplay::merge(&replay_args(&[]), &cfg).unwrap().looping);
        assert!(EffectiveReplay::merge(&replay_args(&["--loop", "--file", "x.csv"]), &Config::default())
            .unwrap()
            .looping);
        assert!(!EffectiveReplay::merge(&replay_args(&["--file", "x.csv"]), &Config::default())
            .unwrap()
            .looping);
    }

    #[test]
    fn qos_out_of_range_is_rejected_by_cli() {
        assert!(Cli::try_parse_from(["mqtt-tape", "record", "--qos", "3"]).is_err());
    }

    #[test]
    fn bad_qos_in_file_is_rejected() {
        assert!(toml::from_str::<Config>("qos = 7\n").is_err());
    }

    #[test]
    fn unknown_key_in_file_is_rejected() {
        assert!(toml::from_str::<Config>("hots = \"typo\"\n").is_err());
    }

    #[test]
    fn topics_file_is_loaded_for_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topics.json");
        std::fs::write(&path, r#"{"topics": ["a/#", "b/+/c"]}"#).unwrap();

        let args = record_args(&["--file", "out.csv", "--topics", path.to_str().unwrap()]);
        let eff = EffectiveRecord::merge(&args, &Config::default()).unwrap();
        assert_eq!(eff.topics, vec!["a/#".to_string(), "b/+/c".to_string()]);
    }

    #[test]
    fn absent_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let cfg = Config::load_or_default(path.to_str().unwrap()).unwrap();
        assert!(cfg.file.is_none());
        assert_eq!(cfg.mqtt, MqttConfig::default());
    }

    #[test]
    fn broken_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "file = [").unwrap();
        let err = Config::load_or_default(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, CliError::Config { context: "parse", .. }));
    }
}
