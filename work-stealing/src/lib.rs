//! Lock-free work-stealing deque
//!
//! A Chase–Lev double-ended queue: a single owner thread pushes and pops at
//! the bottom while any number of other threads steal from the top without
//! blocking the owner.
//!
//! The single-producer rule is carried by the types:
//!
//! - [`WorkStealingDeque`] is the owner handle. It is `Send` but neither
//!   `Sync` nor `Clone`, so exactly one thread can `push`/`pop`.
//! - [`Stealer`] is `Send + Sync + Clone` and only exposes `steal`.
//!
//! ```
//! use ledger_work_stealing::WorkStealingDeque;
//!
//! let deque = WorkStealingDeque::new(4);
//! let stealer = deque.stealer();
//! deque.push(1);
//! deque.push(2);
//! assert_eq!(stealer.steal(), Some(1));
//! assert_eq!(deque.pop(), Some(2));
//! assert_eq!(deque.pop(), None);
//! ```

pub mod deque;

pub use deque::{Stealer, WorkStealingDeque};
