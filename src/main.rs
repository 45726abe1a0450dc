use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::warn;

use zip_salvage::{sanitize_path, Crc32Reader, SalvageArchive, SalvageEntry, ZipError};

#[derive(Parser, Debug)]
#[command(name = "zip-salvage")]
#[command(version)]
#[command(
    about = "Recover entries from ZIP archives with a broken or missing central directory",
    long_about = None
)]
#[command(after_help = "Examples:\n  \
  zip-salvage broken.zip                extract everything it can\n  \
  zip-salvage -t broken.zip             list and CRC-check without writing\n  \
  curl -s URL | zip-salvage - '*.txt'   salvage text files mid-download\n  \
  curl -s URL | zip-salvage             same, no patterns")]
struct Cli {
    /// ZIP file to read; `-` or no argument reads stdin
    #[arg(value_name = "ARCHIVE")]
    archive: Option<String>,

    /// Only handle entries matching these patterns (`*` and `?` wildcards)
    #[arg(value_name = "PATTERN")]
    patterns: Vec<String>,

    /// Extract into DIR instead of the current directory
    #[arg(short = 'd', value_name = "DIR")]
    dest: Option<PathBuf>,

    /// Test entry checksums without writing anything
    #[arg(short = 't')]
    test: bool,

    /// Exit non-zero on the first CRC mismatch
    #[arg(long)]
    strict: bool,

    /// Verbose logging to stderr (repeat for scanner-level detail)
    #[arg(long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Codepage for entry names without the UTF-8 flag (e.g. shift_jis)
    #[arg(long, value_name = "CODEPAGE")]
    decode: Option<String>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("zip-salvage: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let verbosity: usize = match cli.debug {
        0 => 1, // warnings
        1 => 3, // debug
        _ => 4, // trace
    };
    let mut errlog = stderrlog::new();
    errlog.verbosity(verbosity);
    errlog.init()?;

    let source: Box<dyn Read + Send> = match cli.archive.as_deref() {
        None | Some("-") => Box::new(io::stdin()),
        Some(path) => {
            Box::new(File::open(path).with_context(|| format!("couldn't open {path}"))?)
        }
    };

    let mut archive = SalvageArchive::new(source);
    archive.set_password_provider(prompt_password);
    if let Some(label) = &cli.decode {
        let encoding = encoding_rs::Encoding::for_label(label.as_bytes())
            .with_context(|| format!("unknown codepage label {label:?}"))?;
        archive.set_name_decoder(move |raw| {
            let (text, _, had_errors) = encoding.decode(raw);
            if had_errors {
                Err(ZipError::NameDecode(
                    format!("name is not valid {}", encoding.name()).into(),
                ))
            } else {
                Ok(text.into_owned())
            }
        });
    }

    let dest = cli.dest.clone().unwrap_or_else(|| PathBuf::from("."));
    let mut mismatches = 0u64;
    loop {
        let mut entry = match archive.next_entry() {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) if e.is_entry_scoped() => {
                warn!("skipping entry: {e}");
                continue;
            }
            Err(e) => return Err(e).context("archive cannot be read any further"),
        };

        if !selected(&cli.patterns, entry.name()) {
            continue; // dropping the entry drains its body
        }

        let crc_ok = if cli.test {
            check_entry(&mut entry)?
        } else {
            extract_entry(&mut entry, &dest)?
        };
        if !crc_ok {
            mismatches += 1;
            if cli.strict {
                bail!("CRC mismatch in {}", entry.name());
            }
            warn!("CRC mismatch in {}", entry.name());
        }
    }

    if mismatches > 0 {
        eprintln!("{mismatches} entries had CRC mismatches");
    }
    Ok(())
}

/// Decode the body and compare its CRC against the reported one.
fn check_entry<R: Read + Send + 'static>(entry: &mut SalvageEntry<'_, R>) -> Result<bool> {
    if entry.is_dir() {
        return Ok(true);
    }
    let name = entry.name().to_owned();
    let mut crc_reader = Crc32Reader::new(&mut *entry);
    io::copy(&mut crc_reader, &mut io::sink())
        .with_context(|| format!("couldn't decode {name}"))?;
    let actual = crc_reader.crc32();
    let expected = entry.crc32()?;
    eprintln!("Test {name}");
    Ok(actual == expected)
}

/// Write the entry below `dest`, creating directories as needed.
fn extract_entry<R: Read + Send + 'static>(
    entry: &mut SalvageEntry<'_, R>,
    dest: &std::path::Path,
) -> Result<bool> {
    let path = dest.join(sanitize_path(entry.name()));
    if entry.is_dir() {
        eprintln!("Mkdir {}", path.display());
        fs::create_dir_all(&path)
            .with_context(|| format!("couldn't create directory {}", path.display()))?;
        return Ok(true);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("couldn't create directory {}", parent.display()))?;
    }
    eprintln!("Extract {}", path.display());
    let name = entry.name().to_owned();
    let mut out = File::create(&path)
        .with_context(|| format!("couldn't create file {}", path.display()))?;
    let mut crc_reader = Crc32Reader::new(&mut *entry);
    io::copy(&mut crc_reader, &mut out).with_context(|| format!("couldn't decode {name}"))?;
    let actual = crc_reader.crc32();
    Ok(actual == entry.crc32()?)
}

fn prompt_password(name: &str, retry: bool) -> io::Result<Vec<u8>> {
    if retry {
        eprintln!("wrong password, try again");
    }
    eprint!("password for {name}: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).as_bytes().to_vec())
}

fn selected(patterns: &[String], name: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| glob_match(p, name))
}

/// Simple glob matching: `*` is zero or more characters, `?` exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn matches(pattern: &[char], text: &[char]) -> bool {
        match (pattern.split_first(), text.split_first()) {
            (None, None) => true,
            (Some((&'*', rest)), _) => {
                matches(rest, text) || (!text.is_empty() && matches(pattern, &text[1..]))
            }
            (Some((&'?', rest)), Some((_, text_rest))) => matches(rest, text_rest),
            (Some((p, rest)), Some((t, text_rest))) if p == t => matches(rest, text_rest),
            _ => false,
        }
    }

    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    matches(&pattern, &text)
}
