/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io::Write;
use std::path::PathBuf;

use membuf_cache::CacheOptions;
use membuf_cache::FileSource;
use membuf_cache::PrebufferCache;
use slog::o;
use slog::Drain;
use structopt::StructOpt;

/// Demo CLI: reads a file through a `PrebufferCache` and writes it back
/// out to stdout, exercising Open/Read/Seek/Close end to end.
#[derive(Debug, StructOpt)]
#[structopt(about = "Cat a file through the prebuffer cache")]
struct Opt {
    /// File to read
    #[structopt(parse(from_os_str))]
    input: PathBuf,

    /// Seek to this offset before reading, rather than reading from the
    /// start of the file
    #[structopt(long)]
    seek: Option<u64>,

    /// Increase logging verbosity; repeat for more detail
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    #[structopt(flatten)]
    cache_options: CacheOptions,
}

fn build_logger(verbose: usize) -> slog::Logger {
    if verbose == 0 {
        return slog::Logger::root(slog::Discard, o!());
    }
    let level = slog::Level::from_usize(verbose).unwrap_or(slog::Level::Trace);
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stderr());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    slog::Logger::root(drain, o!())
}

fn main() -> anyhow::Result<()> {
    let mut opt = Opt::from_args();
    // The CLI's whole purpose is to exercise the cache, so opt in
    // regardless of what the caller passed on the command line.
    opt.cache_options.membuf_enable = true;

    let logger = build_logger(opt.verbose);
    let source = FileSource::open(&opt.input)?;
    let cache = PrebufferCache::open(source, &opt.cache_options, logger)?;

    if let Some(pos) = opt.seek {
        cache.seek(pos)?;
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut chunk = vec![0u8; opt.cache_options.read_chunk];
    loop {
        let n = cache.read(Some(&mut chunk[..]), chunk.len() as u32)?;
        if n == 0 {
            break;
        }
        out.write_all(&chunk[..n as usize])?;
    }
    Ok(())
}
