//! dek: DEK key manager CLI
//!
//! Lifecycle events (forwarded to dekd over its control socket):
//!   boot <persona> <public.json>            - register a persona at boot
//!   add-user <persona> <public.json>        - register a newly created persona
//!   remove-user <persona>                   - forget a persona and its keys
//!   unlock <persona> <private.json> <master.json>
//!   lock <persona>
//!   change-password <persona> <private.json> <master.json>
//!
//! Key operations:
//!   generate <persona>                      - fresh plain DEK (JSON on stdout)
//!   encrypt <persona> <dek.json> --class rsa|aes
//!   decrypt <persona> <dek.json> --class rsa|aes
//!   get-kek <persona> --role public|private|master [--decrypt]
//!   list
//!
//! Local:
//!   keygen <dir>                            - write public/private/master KEK files

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use dek_core::config::DekConfig;
use dek_core::proto::{decode_line, encode_line, DekRequest, DekResponse};
use dek_core::{Dek, DekType, Kek, KekType, PersonaId, PersonaInfo, PersonaState};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "dek",
    version,
    about = "DEK key manager client",
    long_about = "dek: drive persona lifecycle events and DEK wrap/unwrap through dekd"
)]
struct Cli {
    /// Path to config.toml (used to locate the control socket)
    #[arg(
        long,
        short = 'c',
        env = "DEK_CONFIG",
        default_value = "/etc/dek/config.toml"
    )]
    config: PathBuf,

    /// Control socket path (overrides daemon.socket from the config)
    #[arg(long, env = "DEK_SOCKET")]
    socket: Option<PathBuf>,

    /// Log level for client-side diagnostics
    #[arg(long, env = "DEK_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a persona known at boot (resets it to locked)
    Boot {
        persona: u32,
        /// Public KEK file
        public: PathBuf,
    },

    /// Register a newly created persona
    #[command(name = "add-user")]
    AddUser { persona: u32, public: PathBuf },

    /// Remove a persona and drop all of its keys
    #[command(name = "remove-user")]
    RemoveUser { persona: u32 },

    /// Load the private and master KEKs of a persona
    Unlock {
        persona: u32,
        private: PathBuf,
        master: PathBuf,
    },

    /// Drop the private and master KEKs of a persona
    Lock { persona: u32 },

    /// Replace the private and master KEKs of an unlocked persona
    #[command(name = "change-password")]
    ChangePassword {
        persona: u32,
        private: PathBuf,
        master: PathBuf,
    },

    /// Generate a plain DEK
    Generate {
        persona: u32,
        /// Write the DEK here instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Wrap a plain DEK
    Encrypt {
        persona: u32,
        /// Plain DEK file ("-" for stdin)
        dek: PathBuf,
        #[arg(long, value_enum, default_value = "rsa")]
        class: EncClass,
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Unwrap an encrypted DEK
    Decrypt {
        persona: u32,
        /// Encrypted DEK file ("-" for stdin)
        dek: PathBuf,
        #[arg(long, value_enum, default_value = "rsa")]
        class: EncClass,
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Export a KEK held by the daemon
    #[command(name = "get-kek")]
    GetKek {
        persona: u32,
        #[arg(long, value_enum)]
        role: KekRole,
        /// Ask for a decryption KEK (private or master)
        #[arg(long)]
        decrypt: bool,
        /// Print only the base64 key bytes
        #[arg(long)]
        raw: bool,
    },

    /// List known personas and their lock state
    List,

    /// Generate a KEK set for testing (public.json, private.json, master.json)
    Keygen {
        /// Output directory
        dir: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EncClass {
    Rsa,
    Aes,
}

impl From<EncClass> for DekType {
    fn from(class: EncClass) -> Self {
        match class {
            EncClass::Rsa => DekType::RsaEncrypted,
            EncClass::Aes => DekType::AesEncrypted,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KekRole {
    Public,
    Private,
    Master,
}

impl From<KekRole> for KekType {
    fn from(role: KekRole) -> Self {
        match role {
            KekRole::Public => KekType::Public,
            KekRole::Private => KekType::Private,
            KekRole::Master => KekType::Master,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    if let Commands::Keygen { dir } = &cli.command {
        return cmd_keygen(dir);
    }

    let socket = match cli.socket {
        Some(path) => path,
        None => {
            DekConfig::load(&cli.config)
                .map_err(|e| anyhow::anyhow!("loading config {}: {e}", cli.config.display()))?
                .daemon
                .socket
        }
    };

    let (output, req) = build_request(cli.command)?;
    let resp = send(&socket, &req).await?;
    render(resp, &output)
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Request building ──────────────────────────────────────────────────────────

/// How the response should be presented
#[derive(Debug)]
enum Output {
    Done(&'static str),
    Dek(Option<PathBuf>),
    Kek { raw: bool },
    Personas,
}

fn build_request(command: Commands) -> Result<(Output, DekRequest)> {
    Ok(match command {
        Commands::Boot { persona, public } => (
            Output::Done("booted"),
            DekRequest::OnBoot {
                persona_id: PersonaId(persona),
                public_kek: read_kek(&public)?,
            },
        ),
        Commands::AddUser { persona, public } => (
            Output::Done("added"),
            DekRequest::OnUserAdded {
                persona_id: PersonaId(persona),
                public_kek: read_kek(&public)?,
            },
        ),
        Commands::RemoveUser { persona } => (
            Output::Done("removed"),
            DekRequest::OnUserRemoved {
                persona_id: PersonaId(persona),
            },
        ),
        Commands::Unlock {
            persona,
            private,
            master,
        } => (
            Output::Done("unlocked"),
            DekRequest::OnDeviceUnlocked {
                persona_id: PersonaId(persona),
                private_kek: read_kek(&private)?,
                master_kek: read_kek(&master)?,
            },
        ),
        Commands::Lock { persona } => (
            Output::Done("locked"),
            DekRequest::OnDeviceLocked {
                persona_id: PersonaId(persona),
            },
        ),
        Commands::ChangePassword {
            persona,
            private,
            master,
        } => (
            Output::Done("keys replaced"),
            DekRequest::OnPasswordChanged {
                persona_id: PersonaId(persona),
                private_kek: read_kek(&private)?,
                master_kek: read_kek(&master)?,
            },
        ),
        Commands::Generate { persona, out } => (
            Output::Dek(out),
            DekRequest::GenerateDek {
                persona_id: PersonaId(persona),
            },
        ),
        Commands::Encrypt {
            persona,
            dek,
            class,
            out,
        } => (
            Output::Dek(out),
            DekRequest::EncryptDek {
                persona_id: PersonaId(persona),
                dek: read_dek(&dek)?,
                enc_type: class.into(),
            },
        ),
        Commands::Decrypt {
            persona,
            dek,
            class,
            out,
        } => (
            Output::Dek(out),
            DekRequest::DecryptDek {
                persona_id: PersonaId(persona),
                dek: read_dek(&dek)?,
                enc_type: class.into(),
            },
        ),
        Commands::GetKek {
            persona,
            role,
            decrypt,
            raw,
        } => {
            let persona_id = PersonaId(persona);
            let kek_type = role.into();
            let req = if decrypt {
                DekRequest::GetDecryptionKek {
                    persona_id,
                    kek_type,
                }
            } else {
                DekRequest::GetEncryptionKek {
                    persona_id,
                    kek_type,
                }
            };
            (Output::Kek { raw }, req)
        }
        Commands::List => (Output::Personas, DekRequest::ListPersonas),
        Commands::Keygen { .. } => anyhow::bail!("keygen runs locally"),
    })
}

// ── Key files ─────────────────────────────────────────────────────────────────

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        return std::io::read_to_string(std::io::stdin()).context("reading stdin");
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn read_kek(path: &Path) -> Result<Kek> {
    serde_json::from_str(&read_input(path)?)
        .with_context(|| format!("parsing KEK file: {}", path.display()))
}

fn read_dek(path: &Path) -> Result<Dek> {
    serde_json::from_str(&read_input(path)?)
        .with_context(|| format!("parsing DEK file: {}", path.display()))
}

fn write_secret_file(path: &Path, json: &str) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("creating {}", path.display()))?;
    file.write_all(json.as_bytes())
        .with_context(|| format!("writing {}", path.display()))
}

// ── `dek keygen` ──────────────────────────────────────────────────────────────

fn cmd_keygen(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating dir: {}", dir.display()))?;

    let (public, private) = dek_crypto::generate_keypair()?;
    let master = dek_crypto::generate_master_key()?;

    for (name, kek) in [
        ("public.json", &public),
        ("private.json", &private),
        ("master.json", &master),
    ] {
        let json = serde_json::to_string_pretty(kek).context("serializing KEK")?;
        write_secret_file(&dir.join(name), &json)?;
    }

    println!("wrote KEK set to {}", dir.display());
    println!("  public fingerprint: {}", public.fingerprint());
    println!("  master fingerprint: {}", master.fingerprint());
    Ok(())
}

// ── Control socket ────────────────────────────────────────────────────────────

async fn send(socket: &Path, req: &DekRequest) -> Result<DekResponse> {
    let stream = UnixStream::connect(socket).await.with_context(|| {
        format!(
            "connecting to dekd at {} (is dekd running?)",
            socket.display()
        )
    })?;
    let (reader, mut writer) = stream.into_split();

    tracing::debug!(op = req.name(), "sending request");
    writer.write_all(encode_line(req)?.as_bytes()).await?;
    writer.shutdown().await?;

    let line = BufReader::new(reader)
        .lines()
        .next_line()
        .await?
        .context("dekd closed the connection without replying")?;
    decode_line(&line)
}

// ── Output ────────────────────────────────────────────────────────────────────

fn render(resp: DekResponse, output: &Output) -> Result<()> {
    match (resp, output) {
        (DekResponse::Error { kind, message }, _) => {
            anyhow::bail!("dekd: {message} ({})", kind.as_str())
        }
        (DekResponse::Ok, Output::Done(what)) => println!("{what}"),
        (DekResponse::Dek { dek }, Output::Dek(out)) => {
            let json = serde_json::to_string_pretty(&dek).context("serializing DEK")?;
            match out {
                Some(path) => write_secret_file(path, &json)?,
                None => println!("{json}"),
            }
        }
        (DekResponse::Kek { kek }, Output::Kek { raw }) => {
            if *raw {
                println!("{}", STANDARD.encode(kek.as_bytes()));
            } else {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&kek).context("serializing KEK")?
                );
            }
        }
        (DekResponse::Personas { personas }, Output::Personas) => print_personas(&personas),
        (other, _) => anyhow::bail!("unexpected response from dekd: {other:?}"),
    }
    Ok(())
}

fn print_personas(personas: &[PersonaInfo]) {
    if personas.is_empty() {
        println!("no personas");
        return;
    }
    println!("{:<8} STATE", "PERSONA");
    for p in personas {
        let state = match p.state {
            PersonaState::Locked => "locked",
            PersonaState::Unlocked => "unlocked",
        };
        println!("{:<8} {state}", p.persona_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_keygen_writes_loadable_files() {
        let dir = tempfile::tempdir().unwrap();
        cmd_keygen(dir.path()).unwrap();

        let public = read_kek(&dir.path().join("public.json")).unwrap();
        let private = read_kek(&dir.path().join("private.json")).unwrap();
        let master = read_kek(&dir.path().join("master.json")).unwrap();

        assert_eq!(public.kek_type(), KekType::Public);
        assert_eq!(private.kek_type(), KekType::Private);
        assert_eq!(master.kek_type(), KekType::Master);
        assert_eq!(dek_crypto::public_from_private(&private).unwrap(), public);
    }

    #[test]
    fn test_keygen_files_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        cmd_keygen(dir.path()).unwrap();
        let mode = std::fs::metadata(dir.path().join("private.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[test]
    fn test_build_unlock_request() {
        let dir = tempfile::tempdir().unwrap();
        cmd_keygen(dir.path()).unwrap();

        let cli = Cli::try_parse_from([
            "dek",
            "unlock",
            "4",
            dir.path().join("private.json").to_str().unwrap(),
            dir.path().join("master.json").to_str().unwrap(),
        ])
        .unwrap();
        let (_, req) = build_request(cli.command).unwrap();
        assert_eq!(req.name(), "on_device_unlocked");
        assert_eq!(req.persona_id(), Some(PersonaId(4)));
    }

    #[test]
    fn test_build_get_kek_request() {
        let cli =
            Cli::try_parse_from(["dek", "get-kek", "2", "--role", "master", "--decrypt"]).unwrap();
        match build_request(cli.command).unwrap().1 {
            DekRequest::GetDecryptionKek {
                persona_id,
                kek_type,
            } => {
                assert_eq!(persona_id, PersonaId(2));
                assert_eq!(kek_type, KekType::Master);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_encrypt_class_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dek.json");
        let dek = Dek::plain(vec![7u8; 32]).unwrap();
        std::fs::write(&path, serde_json::to_string(&dek).unwrap()).unwrap();

        let cli = Cli::try_parse_from([
            "dek",
            "encrypt",
            "1",
            path.to_str().unwrap(),
            "--class",
            "aes",
        ])
        .unwrap();
        match build_request(cli.command).unwrap().1 {
            DekRequest::EncryptDek {
                dek: sent,
                enc_type,
                ..
            } => {
                assert_eq!(sent, dek);
                assert_eq!(enc_type, DekType::AesEncrypted);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_render_error_is_failure() {
        let resp = DekResponse::Error {
            kind: dek_core::ErrorKind::KeyNotLoaded,
            message: "private key not loaded for persona 3".into(),
        };
        let err = render(resp, &Output::Done("ok")).unwrap_err();
        assert!(err.to_string().contains("key_not_loaded"));
    }
}
