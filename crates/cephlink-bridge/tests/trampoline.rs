//! Trampoline dispatch when the native side calls back from its own threads.

use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use cephlink_bridge::iterate::{read_iterate, IterateSource, NativeIterateCb, ReadIterateConfig};
use libc::{c_char, c_int, size_t};

/// Delivers every extent from a freshly spawned thread, like an async
/// completion in the native library.
struct ThreadedSource {
    data: Vec<u8>,
    chunk: usize,
}

struct Arg(*mut c_void);
unsafe impl Send for Arg {}

impl IterateSource for ThreadedSource {
    unsafe fn read_iterate2(&self, offset: u64, length: u64, cb: NativeIterateCb, arg: *mut c_void) -> c_int {
        let start = offset as usize;
        let end = (start + length as usize).min(self.data.len());
        for pos in (start..end).step_by(self.chunk) {
            let chunk = self.data[pos..(pos + self.chunk).min(end)].to_vec();
            let arg = Arg(arg);
            let ret = thread::spawn(move || {
                let arg = arg;
                unsafe { cb(pos as u64, chunk.len() as size_t, chunk.as_ptr() as *const c_char, arg.0) }
            })
            .join()
            .unwrap();
            if ret < 0 {
                return ret;
            }
        }
        0
    }
}

#[test]
fn test_callbacks_from_native_threads() {
    let source = ThreadedSource {
        data: (0..=255u8).cycle().take(4096).collect(),
        chunk: 512,
    };
    let sum = Arc::new(AtomicU64::new(0));
    let extents = Arc::new(AtomicU64::new(0));
    let (s, e) = (Arc::clone(&sum), Arc::clone(&extents));
    let config = ReadIterateConfig::new(0, 4096, move |_, len, data| {
        let data = data.expect("no holes");
        assert_eq!(data.len() as u64, len);
        s.fetch_add(data.iter().map(|b| *b as u64).sum(), Ordering::SeqCst);
        e.fetch_add(1, Ordering::SeqCst);
        0
    });

    read_iterate(&source, config).unwrap();

    assert_eq!(extents.load(Ordering::SeqCst), 8);
    assert_eq!(sum.load(Ordering::SeqCst), 16 * (0..=255u64).sum::<u64>());
}

#[test]
fn test_concurrent_iterations_stay_separate() {
    let handles: Vec<_> = (0..8u8)
        .map(|n| {
            thread::spawn(move || {
                let source = ThreadedSource {
                    data: vec![n; 1024],
                    chunk: 100,
                };
                let seen = Arc::new(AtomicU64::new(0));
                let sink = Arc::clone(&seen);
                let config = ReadIterateConfig::new(0, 1024, move |_, _, data| {
                    let data = data.unwrap_or_default();
                    if data.iter().any(|b| *b != n) {
                        return -libc::EBADMSG;
                    }
                    sink.fetch_add(data.len() as u64, Ordering::SeqCst);
                    0
                });
                read_iterate(&source, config).unwrap();
                assert_eq!(seen.load(Ordering::SeqCst), 1024);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}
