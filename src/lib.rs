// Copyright 2023 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! `ldnsd` is a small DNS server for a single internal zone. It answers
//! A queries for `<host>.<domain>.` from a persistent record store, and
//! has a mutually-authenticated gRPC control plane through which an
//! operator sets, deletes, and lists records.
//!
//! The pieces, from the bottom up:
//!
//! * [`db`] is the record store.
//! * [`resolver`] answers DNS queries from a store and serves them over
//!   UDP and TCP.
//! * [`proto`] and [`handler`] make up the control plane; [`client`]
//!   talks to it.
//! * [`tls`] loads the trust material both sides of the control plane
//!   use.
//! * [`config`] and [`service`] assemble everything into a running
//!   server.

pub mod client;
pub mod config;
pub mod db;
pub mod handler;
pub mod proto;
pub mod resolver;
pub mod service;
pub mod tls;
