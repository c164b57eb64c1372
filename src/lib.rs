// Copyright 2020 The Exonum Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Validator-side consensus message handler for a sharded BFT blockchain.
//!
//! # Overview
//!
//! This crate contains the following APIs:
//!
//! - [`Validator`] is the three-phase (`Announce -> Prepare -> Committed`)
//!   consensus state machine a shard's non-leader participants run.
//! - [`ValidatorConfig`] wires a `Validator` to its collaborators: the
//!   roster, this node's own signing key, the `ChainReader`/`BlockVerifier`
//!   pair, the fault-injection capability, the outbound transport, and the
//!   chain consumer hooks.
//! - [`message`] and [`crypto`] expose the wire codec and the BLS
//!   aggregate-signature primitives standalone, for hosts that want to
//!   construct or inspect messages without going through a `Validator`.
//!
//! Network transport, block decoding/header validation internals,
//! transaction-pool bookkeeping, leader-side aggregation, view-change, and
//! persistent storage are all out of scope: this crate only consumes them
//! through the narrow traits in [`verify`], [`transport`], [`chain`], and
//! [`fault`].

#![warn(missing_debug_implementations, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod chain;
pub mod crypto;
pub mod error;
pub mod fault;
pub mod message;
pub mod state;
pub mod transport;
pub mod validator;
pub mod verify;

pub use crate::error::ValidatorError;
pub use crate::validator::{Validator, ValidatorConfig};
