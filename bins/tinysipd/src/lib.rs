// tinysip - minimal SIP B2BUA signaling server
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! tinysipd library surface.
//!
//! The daemon is a back-to-back user agent: every call consists of two
//! correlated SIP dialogs (the A-leg towards the caller, the B-leg towards
//! the callee) driven through one shared state machine. The binary in
//! `main.rs` wires the UDP listener, the bounded message queue and the worker
//! pool around the [`state_machine::Engine`]; the integration tests drive the
//! same engine through a capturing transport.

pub mod builder;
pub mod call;
pub mod config;
pub mod dispatcher;
pub mod location;
pub mod queue;
pub mod registrar;
pub mod state_machine;
pub mod transport;
