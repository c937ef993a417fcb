//! medialock: encrypt and decrypt media files
//!
//! Commands:
//!   keygen <out>                       - write a random 32-byte root key
//!   encrypt <in> <out> [--sidecar f]   - encrypt a file, optionally writing a sidecar
//!   decrypt <in> <out>                 - verify and decrypt a file
//!   sidecar <encrypted> <out>          - rebuild the sidecar of an encrypted file
//!   config show                        - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use medialock_core::{MediaLockConfig, MediaType};
use medialock_crypto::{
    decrypting_stream, encrypting_stream, ByteSource, KeyBundle, ReaderSource, RootKey, Sidecar,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "medialock",
    version,
    about = "Streaming media encryption with sidecar indexes"
)]
struct Cli {
    /// Path to medialock.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "MEDIALOCK_CONFIG",
        default_value = "/etc/medialock/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(long, env = "MEDIALOCK_LOG")]
    log: Option<String>,

    /// Log format; overrides the config
    #[arg(long, env = "MEDIALOCK_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a random 32-byte root key
    Keygen {
        /// Where to write the key
        out: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Encrypt a file
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
        /// Write a sidecar index here (VIDEO/AUDIO only)
        #[arg(long)]
        sidecar: Option<PathBuf>,
    },

    /// Verify and decrypt a file
    ///
    /// Plaintext is staged next to the destination and only moved into
    /// place once the trailer MAC has been verified.
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Rebuild the sidecar index of an existing encrypted file
    Sidecar {
        encrypted: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct KeyArgs {
    /// 32-byte root key file (overrides config keys.key_file)
    #[arg(long, short = 'k', env = "MEDIALOCK_KEY_FILE")]
    key: Option<PathBuf>,

    /// Media type: IMAGE, VIDEO, AUDIO or DOCUMENT (default from config)
    #[arg(long, short = 'm')]
    media: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = MediaLockConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    init_logging(&cli, &config);

    match cli.command {
        Commands::Keygen { out, force } => cmd_keygen(&out, force),
        Commands::Encrypt {
            input,
            output,
            key,
            sidecar,
        } => cmd_encrypt(&config, &input, &output, &key, sidecar.as_deref()),
        Commands::Decrypt { input, output, key } => cmd_decrypt(&config, &input, &output, &key),
        Commands::Sidecar {
            encrypted,
            output,
            key,
        } => cmd_sidecar(&config, &encrypted, &output, &key),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(cli: &Cli, config: &MediaLockConfig) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json = match &cli.log_format {
        Some(LogFormat::Json) => true,
        Some(LogFormat::Text) => false,
        None => config.logging.format == "json",
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

// ── Key and media resolution ──────────────────────────────────────────────────

fn resolve_media(config: &MediaLockConfig, args: &KeyArgs) -> Result<MediaType> {
    match &args.media {
        Some(label) => label
            .parse()
            .with_context(|| format!("invalid --media {label:?}")),
        None => Ok(config.stream.default_media_type),
    }
}

fn resolve_key(config: &MediaLockConfig, args: &KeyArgs) -> Result<RootKey> {
    // CLI flag > config > error
    let path = args
        .key
        .clone()
        .or_else(|| config.keys.key_file.clone())
        .context("no root key given: pass --key or set keys.key_file in the config")?;
    let bytes = std::fs::read(&path).with_context(|| format!("reading key: {}", path.display()))?;
    RootKey::from_slice(&bytes).with_context(|| format!("key file {}", path.display()))
}

// ── `medialock keygen` ────────────────────────────────────────────────────────

fn cmd_keygen(out: &Path, force: bool) -> Result<()> {
    if out.exists() && !force {
        anyhow::bail!("refusing to overwrite {} (use --force)", out.display());
    }
    ensure_parent(out)?;
    let key = RootKey::generate();
    std::fs::write(out, key.as_bytes()).with_context(|| format!("writing key: {}", out.display()))?;
    info!(path = %out.display(), "root key written");
    Ok(())
}

// ── `medialock encrypt` ───────────────────────────────────────────────────────

fn cmd_encrypt(
    config: &MediaLockConfig,
    input: &Path,
    output: &Path,
    args: &KeyArgs,
    sidecar_path: Option<&Path>,
) -> Result<()> {
    let media_type = resolve_media(config, args)?;
    let root = resolve_key(config, args)?;

    let sidecar_path = sidecar_path.map(Path::to_path_buf).or_else(|| {
        (config.stream.sidecar && media_type.is_streamable())
            .then(|| append_extension(output, "sidecar"))
    });

    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let source = ReaderSource::new(BufReader::new(file));
    let mut engine = encrypting_stream(source, root.as_bytes(), media_type, sidecar_path.is_some())
        .context("creating encrypting stream")?;

    ensure_parent(output)?;
    let out = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut sink = BufWriter::new(out);
    let written = pump(&mut engine, &mut sink, config.stream.read_size)
        .with_context(|| format!("encrypting {}", input.display()))?;
    sink.flush()?;

    if let Some(path) = &sidecar_path {
        let sidecar = engine
            .sidecar()?
            .context("sidecar was requested but not produced")?;
        write_sidecar(path, sidecar)?;
    }

    info!(
        input = %input.display(),
        output = %output.display(),
        %media_type,
        plaintext_bytes = engine.plaintext_bytes(),
        ciphertext_bytes = written,
        "encrypted"
    );
    Ok(())
}

// ── `medialock decrypt` ───────────────────────────────────────────────────────

fn cmd_decrypt(config: &MediaLockConfig, input: &Path, output: &Path, args: &KeyArgs) -> Result<()> {
    let media_type = resolve_media(config, args)?;
    let root = resolve_key(config, args)?;

    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let source = ReaderSource::new(BufReader::new(file));
    let mut engine = decrypting_stream(source, root.as_bytes(), media_type)
        .context("creating decrypting stream")?;

    let dir = ensure_parent(output)?;
    let staged = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    let mut sink = BufWriter::new(staged);
    let written = pump(&mut engine, &mut sink, config.stream.read_size)
        .with_context(|| format!("decrypting {}", input.display()))?;
    let staged = sink.into_inner().context("flushing decrypted output")?;
    staged
        .persist(output)
        .with_context(|| format!("moving decrypted file to {}", output.display()))?;

    info!(
        input = %input.display(),
        output = %output.display(),
        %media_type,
        plaintext_bytes = written,
        "decrypted"
    );
    Ok(())
}

// ── `medialock sidecar` ───────────────────────────────────────────────────────

fn cmd_sidecar(
    config: &MediaLockConfig,
    encrypted: &Path,
    output: &Path,
    args: &KeyArgs,
) -> Result<()> {
    let media_type = resolve_media(config, args)?;
    let root = resolve_key(config, args)?;
    let keys = KeyBundle::derive(&root, media_type)?;

    let file = File::open(encrypted).with_context(|| format!("opening {}", encrypted.display()))?;
    let sidecar = Sidecar::from_source(&keys, ReaderSource::new(BufReader::new(file)))
        .with_context(|| format!("indexing {}", encrypted.display()))?;
    write_sidecar(output, &sidecar)?;

    info!(
        input = %encrypted.display(),
        output = %output.display(),
        %media_type,
        entries = sidecar.entry_count(),
        "sidecar rebuilt"
    );
    Ok(())
}

// ── `medialock config show` ───────────────────────────────────────────────────

fn cmd_config_show(config: &MediaLockConfig, config_path: &Path) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    if config_path.exists() {
        writeln!(stdout, "# Configuration from: {}", config_path.display())?;
    } else {
        writeln!(
            stdout,
            "# Configuration: defaults (no file at {})",
            config_path.display()
        )?;
    }
    writeln!(stdout)?;
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    write!(stdout, "{rendered}")?;
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Drain a stream into `sink` in `read_size` pieces. Returns bytes written.
fn pump<S: ByteSource>(stream: &mut S, sink: &mut impl Write, read_size: usize) -> Result<u64> {
    let mut written = 0u64;
    while !stream.at_end() {
        let chunk = stream.read(read_size)?;
        if chunk.is_empty() {
            break;
        }
        sink.write_all(&chunk)?;
        written += chunk.len() as u64;
    }
    Ok(written)
}

fn write_sidecar(path: &Path, sidecar: &Sidecar) -> Result<()> {
    ensure_parent(path)?;
    std::fs::write(path, sidecar.as_bytes())
        .with_context(|| format!("writing sidecar: {}", path.display()))?;
    info!(
        path = %path.display(),
        entries = sidecar.entry_count(),
        "sidecar written"
    );
    Ok(())
}

/// Create the parent directory of `path` if needed and return it.
fn ensure_parent(path: &Path) -> Result<PathBuf> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("creating directory {}", parent.display()))?;
    Ok(parent)
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}
