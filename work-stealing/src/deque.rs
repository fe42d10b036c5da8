//! Chase–Lev deque with generation-retained buffers.
//!
//! `top` and `bottom` are monotonically increasing signed cursors; the
//! logical size is `bottom - top`. The circular buffer doubles when the
//! owner pushes into a full buffer. A superseded buffer is never freed while
//! the deque is alive because a stealer that loaded the old pointer may still
//! read from it; retired generations are kept in a disposal list and dropped
//! together with the deque.
//!
//! Slots hold `MaybeUninit<T>`. Both `pop` and `steal` read a bitwise copy
//! of the slot *before* winning the race on `top`; the copy is only turned
//! into a `T` after the race is won, so a lost race never runs a destructor.

use std::{
    cell::{Cell, UnsafeCell},
    fmt,
    marker::PhantomData,
    mem::MaybeUninit,
    ptr,
    sync::{
        atomic::{self, AtomicI64, AtomicPtr, Ordering},
        Arc, Mutex, PoisonError,
    },
};

/// Smallest buffer the deque will allocate.
const MIN_CAPACITY: usize = 2;

struct Buffer<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

impl<T> Buffer<T> {
    fn alloc(capacity: usize) -> Box<Self> {
        debug_assert!(capacity.is_power_of_two());
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Box::new(Self {
            slots,
            mask: capacity.wrapping_sub(1),
        })
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, index: i64) -> *mut MaybeUninit<T> {
        self.slots[(index as usize) & self.mask].get()
    }

    /// # Safety
    ///
    /// Only the owner may write, and only to a slot outside `[top, bottom)`.
    unsafe fn write(&self, index: i64, value: T) {
        // SAFETY: guaranteed by the caller.
        unsafe { ptr::write_volatile(self.slot(index), MaybeUninit::new(value)) }
    }

    /// Bitwise copy of a slot. The copy must not be assumed initialised
    /// until the reader has claimed the index.
    ///
    /// # Safety
    ///
    /// `index` must have been published by a `push` that happens-before
    /// this read.
    unsafe fn read(&self, index: i64) -> MaybeUninit<T> {
        // SAFETY: guaranteed by the caller.
        unsafe { ptr::read_volatile(self.slot(index)) }
    }
}

struct Inner<T> {
    top: AtomicI64,
    bottom: AtomicI64,
    buffer: AtomicPtr<Buffer<T>>,
    /// Buffers replaced by `grow`. Only the owner appends to it.
    retired: Mutex<Vec<Box<Buffer<T>>>>,
}

// SAFETY: items only move between threads by value through `pop`/`steal`,
// and every slot handoff is ordered by the fences on `top`/`bottom`.
unsafe impl<T: Send> Send for Inner<T> {}
// SAFETY: see above.
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let top = *self.top.get_mut();
        let bottom = *self.bottom.get_mut();
        // SAFETY: the pointer came from `Box::into_raw` and we hold the only
        // reference left.
        let buffer = unsafe { Box::from_raw(*self.buffer.get_mut()) };
        let mut index = top;
        while index < bottom {
            // SAFETY: `[top, bottom)` holds initialised items nobody claimed.
            unsafe { (*buffer.slot(index)).assume_init_drop() };
            index = index.wrapping_add(1);
        }
        // Retired buffers hold stale bit copies only; dropping them frees
        // memory without touching any `T`.
    }
}

/// Owner handle of a work-stealing deque.
///
/// Only the thread holding this handle may [`push`](Self::push) or
/// [`pop`](Self::pop). Hand out [`Stealer`]s to other threads.
pub struct WorkStealingDeque<T> {
    inner: Arc<Inner<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> WorkStealingDeque<T> {
    /// Create an empty deque. `capacity` is rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        let buffer = Box::into_raw(Buffer::alloc(capacity));
        Self {
            inner: Arc::new(Inner {
                top: AtomicI64::new(0),
                bottom: AtomicI64::new(0),
                buffer: AtomicPtr::new(buffer),
                retired: Mutex::new(Vec::new()),
            }),
            _not_sync: PhantomData,
        }
    }

    /// A new handle other threads can steal through.
    pub fn stealer(&self) -> Stealer<T> {
        Stealer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Push an item at the bottom, growing the buffer if it is full.
    pub fn push(&self, item: T) {
        let inner = &*self.inner;
        let bottom = inner.bottom.load(Ordering::Relaxed);
        let top = inner.top.load(Ordering::Acquire);
        let mut buffer = inner.buffer.load(Ordering::Relaxed);

        // SAFETY: only the owner swaps the buffer, so `buffer` is live.
        let capacity = unsafe { (*buffer).capacity() } as i64;
        if capacity.wrapping_sub(1) < bottom.wrapping_sub(top) {
            buffer = self.grow(top, bottom, buffer);
        }

        // SAFETY: `bottom` is outside `[top, bottom)` and we are the owner.
        unsafe { (*buffer).write(bottom, item) };
        // The slot must be visible before a stealer can observe the new bottom.
        atomic::fence(Ordering::Release);
        inner.bottom.store(bottom.wrapping_add(1), Ordering::Relaxed);
    }

    /// Pop the most recently pushed item.
    ///
    /// Returns `None` when the deque is empty or when a stealer won the race
    /// for the last remaining item.
    pub fn pop(&self) -> Option<T> {
        let inner = &*self.inner;
        let bottom = inner.bottom.load(Ordering::Relaxed).wrapping_sub(1);
        let buffer = inner.buffer.load(Ordering::Relaxed);
        inner.bottom.store(bottom, Ordering::Relaxed);
        atomic::fence(Ordering::SeqCst);
        let top = inner.top.load(Ordering::Relaxed);

        if top > bottom {
            inner.bottom.store(bottom.wrapping_add(1), Ordering::Relaxed);
            return None;
        }

        // SAFETY: `top <= bottom`, so the slot was published by our own push.
        let item = unsafe { (*buffer).read(bottom) };
        if top == bottom {
            // Last item: settle the race with stealers on `top`.
            let won = inner
                .top
                .compare_exchange(
                    top,
                    top.wrapping_add(1),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
                .is_ok();
            inner.bottom.store(bottom.wrapping_add(1), Ordering::Relaxed);
            if !won {
                return None;
            }
        }
        // SAFETY: the index is ours, either uncontended or by winning the CAS.
        Some(unsafe { item.assume_init() })
    }

    /// Number of items currently queued. Racy by nature when stealers run.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// `true` when `bottom == top`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current buffer capacity.
    pub fn capacity(&self) -> usize {
        let buffer = self.inner.buffer.load(Ordering::Relaxed);
        // SAFETY: only the owner swaps the buffer.
        unsafe { (*buffer).capacity() }
    }

    fn grow(&self, top: i64, bottom: i64, old: *mut Buffer<T>) -> *mut Buffer<T> {
        // SAFETY: `old` is the live buffer and only the owner retires it.
        let old_ref = unsafe { &*old };
        let new = Buffer::alloc(old_ref.capacity().saturating_mul(2));
        let mut index = top;
        while index < bottom {
            // SAFETY: both slots are in bounds; the new buffer is private.
            unsafe { ptr::copy_nonoverlapping(old_ref.slot(index), new.slot(index), 1) };
            index = index.wrapping_add(1);
        }
        let new = Box::into_raw(new);
        self.inner.buffer.store(new, Ordering::Release);

        // SAFETY: `old` came from `Box::into_raw`; stealers may still read
        // it, so it is parked rather than freed.
        let old = unsafe { Box::from_raw(old) };
        self.inner
            .retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(old);
        new
    }
}

impl<T> fmt::Debug for WorkStealingDeque<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkStealingDeque")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Shared handle that steals from the top of a [`WorkStealingDeque`].
pub struct Stealer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Stealer<T> {
    /// Take the oldest item.
    ///
    /// Never blocks. `None` means the deque looked empty or another thread
    /// (the owner or a different stealer) claimed the item first; callers
    /// treat both the same way.
    pub fn steal(&self) -> Option<T> {
        let inner = &*self.inner;
        let top = inner.top.load(Ordering::Acquire);
        atomic::fence(Ordering::SeqCst);
        let bottom = inner.bottom.load(Ordering::Acquire);
        if top >= bottom {
            return None;
        }

        let buffer = inner.buffer.load(Ordering::Acquire);
        // SAFETY: `top < bottom` and the release fence in `push` ordered the
        // slot write before the bottom we observed. Buffers stay allocated
        // while any handle is alive.
        let item = unsafe { (*buffer).read(top) };
        if inner
            .top
            .compare_exchange(
                top,
                top.wrapping_add(1),
                Ordering::SeqCst,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return None;
        }
        // SAFETY: winning the CAS claimed index `top`.
        Some(unsafe { item.assume_init() })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Stealer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stealer").field("len", &self.len()).finish()
    }
}

impl<T> Inner<T> {
    fn len(&self) -> usize {
        let bottom = self.bottom.load(Ordering::Acquire);
        let top = self.top.load(Ordering::Acquire);
        usize::try_from(bottom.wrapping_sub(top)).unwrap_or(0)
    }
}
