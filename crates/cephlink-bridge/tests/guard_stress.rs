//! Many independent guards driven by random store/release operations.

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread;

use cephlink_bridge::PtrGuard;
use cephlink_config::GuardConfig;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const GUARDS: usize = 1000;
const OPS: usize = 10_000;
const THREADS: usize = 8;

struct Slot {
    guard: Option<PtrGuard>,
    value: Box<u64>,
}

#[test]
fn test_guard_stress() {
    let cells: Arc<Vec<AtomicPtr<c_void>>> =
        Arc::new((0..GUARDS).map(|_| AtomicPtr::new(ptr::null_mut())).collect());
    let slots: Arc<Vec<Mutex<Slot>>> = Arc::new(
        (0..GUARDS)
            .map(|i| {
                Mutex::new(Slot {
                    guard: None,
                    value: Box::new(i as u64),
                })
            })
            .collect(),
    );
    let config = GuardConfig::default();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cells = Arc::clone(&cells);
            let slots = Arc::clone(&slots);
            let config = config.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(0x5eed + t as u64);
                for _ in 0..OPS / THREADS {
                    let i = rng.gen_range(0..GUARDS);
                    let cell = cells[i].as_ptr();
                    let mut slot = slots[i].lock();
                    let slot = &mut *slot;
                    match slot.guard.take() {
                        Some(mut guard) => {
                            guard.release();
                            assert!(cells[i].load(Ordering::SeqCst).is_null());
                        }
                        None => {
                            let addr = &mut *slot.value as *mut u64 as *mut c_void;
                            let guard = unsafe { PtrGuard::with_config(cell, addr, (), &config) }
                                .expect("spawn guard");
                            assert_eq!(cells[i].load(Ordering::SeqCst), addr);
                            slot.guard = Some(guard);
                        }
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for (i, slot) in slots.iter().enumerate() {
        let mut slot = slot.lock();
        if let Some(guard) = slot.guard.as_ref() {
            assert!(!guard.is_released());
            let published = cells[i].load(Ordering::SeqCst) as *const u64;
            assert_eq!(unsafe { *published }, i as u64);
        }
        slot.guard = None;
        assert!(cells[i].load(Ordering::SeqCst).is_null());
    }
}
