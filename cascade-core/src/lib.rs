//! Cascade Core
//!
//! This crate provides a fine-grained reactive engine. It implements:
//!
//! - Reactive primitives (signals, computeds, effects)
//! - Automatic dependency tracking with dynamic (conditional) dependencies
//! - Glitch-free, two-phase change propagation
//! - Batching, untracked reads and effect cleanup
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Reactive primitives, tracking context and the runtime
//! - `graph`: Dependency graph, mark phase and snapshots
//! - `config`: Runtime tunables
//! - `error`: The error taxonomy shared by every entry point
//!
//! # Example
//!
//! ```rust
//! use cascade_core::reactive::{Computed, Effect, Signal};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! // Create a signal
//! let count = Signal::new(1);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = Computed::new(move || c.get() * 2);
//!
//! // Create an effect
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let (c, d, l) = (count.clone(), doubled.clone(), log.clone());
//! let _effect = Effect::new(move || l.borrow_mut().push((c.get(), d.get())));
//!
//! // Update the signal; the effect sees a consistent pair
//! count.set(5);
//! assert_eq!(*log.borrow(), vec![(1, 2), (5, 10)]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{BoxError, ReactiveError};
pub use reactive::{batch, untrack, Computed, Effect, Signal};
