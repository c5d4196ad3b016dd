/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time;

use membuf_cache::CacheOptions;
use membuf_cache::ControlQuery;
use membuf_cache::ControlResponse;
use membuf_cache::FileSource;
use membuf_cache::PrebufferCache;
use membuf_cache::SliceSource;
use rand::thread_rng;
use rand::Rng;
use slog::o;

const FIVE_MILLISECONDS: time::Duration = time::Duration::from_millis(5);

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, o!())
}

fn small_block_options() -> CacheOptions {
    CacheOptions {
        membuf_enable: true,
        block_size: 64,
        read_chunk: 17,
        short_seek_window: 32,
        already_wrapped: false,
    }
}

#[test]
fn read_sequential_matches_source() -> anyhow::Result<()> {
    let data = pattern(1000);
    let source = SliceSource::new(data.clone());
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    let mut out = vec![0u8; data.len()];
    let mut got = 0usize;
    while got < out.len() {
        let n = cache.read(Some(&mut out[got..]), (out.len() - got) as u32)?;
        if n == 0 {
            panic!("hit EOS early at {}", got);
        }
        got += n as usize;
    }
    assert_eq!(out, data);

    // One more read past the end reports EOS.
    let mut tail = [0u8; 8];
    let n = cache.read(Some(&mut tail[..]), tail.len() as u32)?;
    assert_eq!(n, 0);
    Ok(())
}

#[test]
fn discard_read_advances_without_copying() -> anyhow::Result<()> {
    let data = pattern(256);
    let source = SliceSource::new(data.clone());
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    let n = cache.read(None, 100)?;
    assert_eq!(n, 100);

    let mut out = vec![0u8; 50];
    let n = cache.read(Some(&mut out[..]), 50)?;
    assert_eq!(n, 50);
    assert_eq!(out, data[100..150]);
    Ok(())
}

#[test]
fn concurrent_reader_races_the_fill_worker() -> anyhow::Result<()> {
    let data = pattern(20_000);
    let source = SliceSource::new(data.clone());
    let cache = Arc::new(PrebufferCache::open(
        source,
        &small_block_options(),
        discard_logger(),
    )?);

    let reader_cache = cache.clone();
    let expected = data.clone();
    let reader = thread::spawn(move || -> anyhow::Result<()> {
        let mut out = vec![0u8; expected.len()];
        let mut got = 0usize;
        while got < out.len() {
            let want = (200).min(out.len() - got);
            let n = reader_cache.read(Some(&mut out[got..got + want]), want as u32)?;
            if n == 0 {
                anyhow::bail!("reader hit EOS early at {}", got);
            }
            got += n as usize;
            thread::sleep(FIVE_MILLISECONDS / 10);
        }
        if out != expected {
            anyhow::bail!("reader saw corrupted data");
        }
        Ok(())
    });

    reader.join().expect("reader thread panicked")?;
    Ok(())
}

#[test]
fn peek_within_a_block_is_zero_copy() -> anyhow::Result<()> {
    let data = pattern(256);
    let source = SliceSource::new(data.clone());
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    let view = cache.peek(10)?;
    assert!(view.is_zero_copy());
    assert_eq!(&view[..], &data[0..10]);

    // Peek must not advance stream_offset.
    let mut out = [0u8; 10];
    let n = cache.read(Some(&mut out[..]), 10)?;
    assert_eq!(n, 10);
    assert_eq!(&out[..], &data[0..10]);
    Ok(())
}

#[test]
fn peek_across_a_block_boundary_is_an_owned_copy() -> anyhow::Result<()> {
    let data = pattern(256);
    let source = SliceSource::new(data.clone());
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    // block_size is 64; straddle the boundary.
    cache.read(None, 60)?;
    let view = cache.peek(8)?;
    assert!(!view.is_zero_copy());
    assert_eq!(&view[..], &data[60..68]);
    Ok(())
}

#[test]
fn short_forward_seek_does_not_reseek_the_source() -> anyhow::Result<()> {
    let data = pattern(10_000);
    let source = SliceSource::new(data.clone());
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    // Let the worker get ahead a bit before seeking.
    thread::sleep(time::Duration::from_millis(20));

    cache.seek(16)?;
    let mut out = vec![0u8; 16];
    let n = cache.read(Some(&mut out[..]), 16)?;
    assert_eq!(n, 16);
    assert_eq!(out, data[16..32]);
    Ok(())
}

#[test]
fn long_forward_seek_reseeks_the_source() -> anyhow::Result<()> {
    let data = pattern(1_000_000);
    let source = SliceSource::new(data.clone());
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    cache.seek(900_000)?;
    let mut out = vec![0u8; 32];
    let n = cache.read(Some(&mut out[..]), 32)?;
    assert_eq!(n, 32);
    assert_eq!(out, data[900_000..900_032]);
    Ok(())
}

#[test]
fn seek_backward_into_already_buffered_range_is_served_without_reseeking() -> anyhow::Result<()> {
    let data = pattern(4_000);
    let source = SliceSource::new(data.clone());
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    let mut out = vec![0u8; 2000];
    cache.read(Some(&mut out[..]), 2000)?;

    cache.seek(10)?;
    let mut out2 = vec![0u8; 20];
    let n = cache.read(Some(&mut out2[..]), 20)?;
    assert_eq!(n, 20);
    assert_eq!(out2, data[10..30]);
    Ok(())
}

#[test]
fn fatal_source_error_is_reported_to_the_reader() -> anyhow::Result<()> {
    let data = pattern(10_000);
    let source = SliceSource::new(data).with_fail_at(500);
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    let mut out = vec![0u8; 10_000];
    let result = loop {
        match cache.read(Some(&mut out[..]), out.len() as u32) {
            Ok(0) => break Ok(()),
            Ok(_) => continue,
            Err(e) => break Err(e),
        }
    };
    assert!(result.is_err(), "expected the injected failure to surface");
    Ok(())
}

#[test]
fn seek_is_rejected_on_a_non_seekable_source() -> anyhow::Result<()> {
    let data = pattern(100);
    let source = SliceSource::new(data).non_seekable();
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    assert!(cache.seek(10).is_err());
    Ok(())
}

#[test]
fn open_refuses_an_already_wrapped_source() {
    let data = pattern(100);
    let source = SliceSource::new(data);
    let mut options = small_block_options();
    options.already_wrapped = true;
    let result = PrebufferCache::open(source, &options, discard_logger());
    assert!(result.is_err());
}

#[test]
fn open_refuses_when_membuf_is_disabled() {
    let data = pattern(100);
    let source = SliceSource::new(data);
    let mut options = small_block_options();
    options.membuf_enable = false;
    let result = PrebufferCache::open(source, &options, discard_logger());
    assert!(result.is_err());
}

#[test]
fn read_zero_bytes_is_a_noop() -> anyhow::Result<()> {
    let data = pattern(100);
    let source = SliceSource::new(data);
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    let n = cache.read(Some(&mut []), 0)?;
    assert_eq!(n, 0);
    let pos = cache.control(ControlQuery::GetPosition)?;
    assert_eq!(pos, ControlResponse::Offset(0));
    Ok(())
}

#[test]
fn seek_to_current_offset_is_a_noop() -> anyhow::Result<()> {
    let data = pattern(1000);
    let source = SliceSource::new(data.clone());
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    let mut out = vec![0u8; 40];
    cache.read(Some(&mut out[..]), 40)?;

    cache.seek(40)?;
    let pos = cache.control(ControlQuery::GetPosition)?;
    assert_eq!(pos, ControlResponse::Offset(40));

    let mut next = vec![0u8; 10];
    let n = cache.read(Some(&mut next[..]), 10)?;
    assert_eq!(n, 10);
    assert_eq!(next, data[40..50]);
    Ok(())
}

#[test]
fn read_crossing_a_block_boundary_returns_contiguous_bytes() -> anyhow::Result<()> {
    // block_size is 64 (small_block_options); position the cursor one
    // byte before the boundary and read across it.
    let data = pattern(256);
    let source = SliceSource::new(data.clone());
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    cache.read(None, 63)?;
    let mut out = [0u8; 2];
    let n = cache.read(Some(&mut out[..]), 2)?;
    assert_eq!(n, 2);
    assert_eq!(out, [data[63], data[64]]);
    Ok(())
}

#[test]
fn seek_to_size_yields_eos_on_next_read() -> anyhow::Result<()> {
    let data = pattern(500);
    let source = SliceSource::new(data.clone());
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    cache.seek(data.len() as u64)?;
    let mut out = [0u8; 8];
    let n = cache.read(Some(&mut out[..]), 8)?;
    assert_eq!(n, 0);
    Ok(())
}

#[test]
fn prebuffer_finishes_then_rewind_seek_clears_eos() -> anyhow::Result<()> {
    let data = pattern(4096);
    let source = SliceSource::new(data.clone());
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    // Wait for the background worker to reach the end of the stream.
    loop {
        if cache.control(ControlQuery::GetPrebufferFinished)? == ControlResponse::Bool(true) {
            break;
        }
        thread::sleep(FIVE_MILLISECONDS);
    }

    cache.seek(0)?;
    let mut out = [0u8; 8];
    let n = cache.read(Some(&mut out[..]), 8)?;
    assert_eq!(n, 8);
    assert_eq!(out, data[0..8]);

    // buffered_eos was cleared by the rewind seek; it may already have
    // flipped back to true again by the time we observe it (the worker
    // only needs to refill 8 bytes), so just confirm the cache is still
    // serving correct data rather than asserting the flag's transient
    // value.
    let mut rest = vec![0u8; data.len() - 8];
    let mut got = 0usize;
    while got < rest.len() {
        let n = cache.read(Some(&mut rest[got..]), (rest.len() - got) as u32)?;
        if n == 0 {
            panic!("hit EOS early at {}", got);
        }
        got += n as usize;
    }
    assert_eq!(rest, data[8..]);
    Ok(())
}

#[test]
fn control_queries_report_size_position_and_cached_size() -> anyhow::Result<()> {
    let data = pattern(300);
    let source = SliceSource::new(data);
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    assert_eq!(
        cache.control(ControlQuery::GetSize)?,
        ControlResponse::Offset(300)
    );
    assert_eq!(
        cache.control(ControlQuery::CanSeek)?,
        ControlResponse::Bool(true)
    );
    assert_eq!(
        cache.control(ControlQuery::CanFastSeek)?,
        ControlResponse::Bool(true)
    );

    cache.read(None, 50)?;
    assert_eq!(
        cache.control(ControlQuery::GetPosition)?,
        ControlResponse::Offset(50)
    );

    let cached = match cache.control(ControlQuery::GetCachedSize)? {
        ControlResponse::Offset(n) => n,
        other => panic!("unexpected response {:?}", other),
    };
    assert!(cached >= 50, "cached size {} should cover the read", cached);

    assert!(cache.control(ControlQuery::Unsupported).is_err());
    Ok(())
}

#[test]
fn cached_size_is_non_decreasing_while_polled_concurrently() -> anyhow::Result<()> {
    let data = pattern(4_000_000);
    let source = SliceSource::new(data.clone());
    let cache = Arc::new(PrebufferCache::open(
        source,
        &CacheOptions {
            membuf_enable: true,
            ..CacheOptions::default()
        },
        discard_logger(),
    )?);

    let poller_cache = cache.clone();
    let poller = thread::spawn(move || -> anyhow::Result<()> {
        let mut last = 0u64;
        for _ in 0..200 {
            let cached = match poller_cache.control(ControlQuery::GetCachedSize)? {
                ControlResponse::Offset(n) => n,
                other => anyhow::bail!("unexpected response {:?}", other),
            };
            if cached < last {
                anyhow::bail!("cached size went backwards: {} -> {}", last, cached);
            }
            last = cached;
            thread::sleep(FIVE_MILLISECONDS / 5);
        }
        Ok(())
    });

    let mut out = vec![0u8; 1 << 20];
    let mut got = 0usize;
    while got < out.len() {
        let n = cache.read(Some(&mut out[got..]), (out.len() - got) as u32)?;
        if n == 0 {
            break;
        }
        got += n as usize;
    }
    assert_eq!(&out[..got], &data[..got]);

    poller.join().expect("poller thread panicked")?;
    Ok(())
}

#[test]
fn randomized_reads_via_a_file_backed_source_match_the_file() -> anyhow::Result<()> {
    let mut tempfile = tempfile::NamedTempFile::new()?;
    let data = pattern(200_000);
    tempfile.write_all(&data)?;
    tempfile.flush()?;

    let source = FileSource::open(tempfile.path())?;
    let cache = PrebufferCache::open(source, &small_block_options(), discard_logger())?;

    let mut rng = thread_rng();
    let mut pos = 0usize;
    let mut out = Vec::with_capacity(data.len());
    while pos < data.len() {
        let chunk_len = (rng.gen::<usize>() % 500 + 1).min(data.len() - pos);
        let mut chunk = vec![0u8; chunk_len];
        let n = cache.read(Some(&mut chunk[..]), chunk_len as u32)?;
        assert!(n > 0, "unexpected EOS at {}", pos);
        out.extend_from_slice(&chunk[..n as usize]);
        pos += n as usize;
    }
    assert_eq!(out, data);
    Ok(())
}
