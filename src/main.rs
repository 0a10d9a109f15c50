//! Thin CLI driver demonstrating the EncroCrypt codec: `encrypt` reads a
//! byte stream from stdin and writes a framed, encrypted container to
//! stdout; `decrypt` does the reverse, optionally seeking by timestamp.
//!
//! This binary stands in for the out-of-scope recording/upload/retention
//! machinery; it only exercises the library's encrypt/decrypt surface.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use encrocrypt::codec::{Reader, Writer};
use encrocrypt::config::Config;
use std::io::{self, Read, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "encrocrypt", about = "Streaming authenticated container codec")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encrypt stdin to stdout as a framed EncroCrypt container.
    Encrypt {
        /// Fingerprint whose secret key signs each KEY packet.
        #[arg(long)]
        signing_fingerprint: String,
        /// Fingerprint each KEY packet is encrypted to.
        #[arg(long)]
        encrypt_fingerprint: String,
        /// Directory of armored OpenPGP certificates.
        #[arg(long)]
        keystore: Option<PathBuf>,
        /// Bytes per `Writer::encrypt` call (does not change the output).
        #[arg(long, default_value_t = 65536)]
        chunk_size: usize,
    },
    /// Decrypt an EncroCrypt container from stdin to stdout.
    Decrypt {
        /// Fingerprint every KEY packet must be signed by.
        #[arg(long)]
        signing_fingerprint: String,
        /// Directory of armored OpenPGP certificates.
        #[arg(long)]
        keystore: Option<PathBuf>,
        /// Skip DATA packets stored before this local time
        /// (`YYYY-MM-DDTHH:MM`, interpreted as UTC).
        #[arg(long)]
        seek: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "encrocrypt=info".into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Encrypt {
            signing_fingerprint,
            encrypt_fingerprint,
            keystore,
            chunk_size,
        } => run_encrypt(signing_fingerprint, encrypt_fingerprint, keystore, chunk_size),
        Command::Decrypt {
            signing_fingerprint,
            keystore,
            seek,
        } => run_decrypt(signing_fingerprint, keystore, seek),
    }
}

fn run_encrypt(
    signing_fingerprint: String,
    encrypt_fingerprint: String,
    keystore: Option<PathBuf>,
    chunk_size: usize,
) -> Result<()> {
    let config = Config::for_writer(signing_fingerprint, encrypt_fingerprint, keystore);
    let mut writer = Writer::new(config);

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut output = stdout.lock();

    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = input.read(&mut buf).context("reading from stdin")?;
        if n == 0 {
            break;
        }
        let framed = writer.encrypt(&buf[..n]).context("encrypting chunk")?;
        output.write_all(&framed).context("writing to stdout")?;
    }

    output.flush().context("flushing stdout")
}

fn run_decrypt(signing_fingerprint: String, keystore: Option<PathBuf>, seek: Option<String>) -> Result<()> {
    let seek_until = seek.map(|s| parse_local_timestamp(&s)).transpose()?;

    let config = Config::for_reader(signing_fingerprint, keystore);
    let mut reader = Reader::new(config);

    let stdin = io::stdin();
    let input = stdin.lock();
    let stdout = io::stdout();
    let mut output = stdout.lock();

    reader
        .decrypt(input, &mut output, seek_until)
        .context("decrypting input")?;
    output.flush().context("flushing stdout")
}

/// Parses `YYYY-MM-DDTHH:MM` into unix seconds.
///
/// The source parses this as local time via Python's `datetime.strptime`
/// plus `time.mktime`. Without a calendar/timezone crate in the dependency
/// stack, this treats the wall-clock value as UTC; callers whose system
/// timezone differs from UTC should convert beforehand.
fn parse_local_timestamp(s: &str) -> Result<u64> {
    let (date, time) = s
        .split_once('T')
        .with_context(|| format!("expected YYYY-MM-DDTHH:MM, got {s}"))?;
    let mut date_parts = date.splitn(3, '-');
    let year: i64 = date_parts
        .next()
        .context("missing year")?
        .parse()
        .context("invalid year")?;
    let month: u32 = date_parts
        .next()
        .context("missing month")?
        .parse()
        .context("invalid month")?;
    let day: u32 = date_parts
        .next()
        .context("missing day")?
        .parse()
        .context("invalid day")?;

    let mut time_parts = time.splitn(2, ':');
    let hour: u32 = time_parts
        .next()
        .context("missing hour")?
        .parse()
        .context("invalid hour")?;
    let minute: u32 = time_parts
        .next()
        .context("missing minute")?
        .parse()
        .context("invalid minute")?;

    let days = days_from_civil(year, month, day);
    let seconds = days * 86_400 + (hour as i64) * 3600 + (minute as i64) * 60;
    u64::try_from(seconds).context("timestamp before the unix epoch")
}

/// Howard Hinnant's `days_from_civil`: days since 1970-01-01 for a
/// proleptic Gregorian `(year, month, day)`, valid for any year.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
